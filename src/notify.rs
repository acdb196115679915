//! Outbound notifications about failover events.

use chrono::{DateTime, Local};
use log::{debug, info};
use serde::Serialize;
use std::process::Command;
use std::time::Duration;

use crate::config::NotifyConfig;
use crate::errors::{FailoverError, FailoverResult};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NotificationEvent {
    pub message: String,
    pub timestamp: DateTime<Local>,
}

impl NotificationEvent {
    pub fn new(message: impl Into<String>) -> Self {
        NotificationEvent {
            message: message.into(),
            timestamp: Local::now(),
        }
    }
}

#[cfg_attr(test, mockall::automock)]
pub trait Notifier {
    fn notify(&self, event: &NotificationEvent) -> FailoverResult<()>;
}

/// Writes notifications to the log only
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, event: &NotificationEvent) -> FailoverResult<()> {
        info!(
            "[{}] NOTIFY: {}",
            event.timestamp.format("%Y-%m-%d %H:%M:%S"),
            event.message
        );
        Ok(())
    }
}

/// Runs a program (e.g. an SMS sender) with the message as its last argument
pub struct CommandNotifier {
    program: String,
    args: Vec<String>,
}

impl CommandNotifier {
    pub fn new(program: String, args: Vec<String>) -> Self {
        CommandNotifier { program, args }
    }
}

impl Notifier for CommandNotifier {
    fn notify(&self, event: &NotificationEvent) -> FailoverResult<()> {
        debug!("Notifying via {}: {}", self.program, event.message);
        let output = Command::new(&self.program)
            .args(&self.args)
            .arg(&event.message)
            .output()
            .map_err(|e| FailoverError::CommandExecution(format!("{}: {}", self.program, e)))?;

        if !output.status.success() {
            return Err(FailoverError::CommandFailed {
                command: self.program.clone(),
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(())
    }
}

/// POSTs the event as JSON
pub struct WebhookNotifier {
    url: String,
    agent: ureq::Agent,
}

impl WebhookNotifier {
    pub fn new(url: String, timeout: Duration) -> Self {
        let agent = ureq::Agent::config_builder()
            .timeout_global(Some(timeout))
            .build()
            .into();
        WebhookNotifier { url, agent }
    }
}

impl Notifier for WebhookNotifier {
    fn notify(&self, event: &NotificationEvent) -> FailoverResult<()> {
        debug!("Posting notification to {}", self.url);
        self.agent.post(&self.url).send_json(event)?;
        Ok(())
    }
}

/// Construct the configured notifier
pub fn notifier_for(config: &NotifyConfig) -> Box<dyn Notifier> {
    match config {
        NotifyConfig::Log => Box::new(LogNotifier),
        NotifyConfig::Command { program, args } => {
            Box::new(CommandNotifier::new(program.clone(), args.clone()))
        }
        NotifyConfig::Webhook { url, timeout } => {
            Box::new(WebhookNotifier::new(url.clone(), Duration::from_secs(*timeout)))
        }
    }
}
