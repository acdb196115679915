use thiserror::Error;

/// Errors that can occur while monitoring and switching uplinks
#[derive(Error, Debug)]
pub enum FailoverError {
    /// Interface could not be found
    #[error("Interface not found: {0}")]
    InterfaceNotFound(String),

    /// No usable route table exists for the link
    #[error("No route table for link: {0}")]
    RouteTableMissing(String),

    /// Lease data was incomplete or malformed
    #[error("Invalid lease: {0}")]
    InvalidLease(String),

    /// Command could not be started
    #[error("Failed to execute command: {0}")]
    CommandExecution(String),

    /// Command ran but exited unsuccessfully
    #[error("Command `{command}` failed ({status}): {stderr}")]
    CommandFailed {
        command: String,
        status: String,
        stderr: String,
    },

    /// Output of a collaborator could not be parsed
    #[error("Failed to parse {what}: {reason}")]
    Parse { what: String, reason: String },

    /// JSON decoding failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP request to a router, webhook or metrics endpoint failed
    #[error("HTTP request failed: {0}")]
    Http(#[from] ureq::Error),

    /// Configuration is invalid
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Insufficient permissions
    #[error("Insufficient permissions (try running as root)")]
    InsufficientPermissions,

    /// IO error
    #[error("IO error: {0}")]
    IOError(#[from] std::io::Error),

    /// Unknown error
    #[error("Unknown error: {0}")]
    Unknown(String),
}

/// Shorthand result type for failover operations
pub type FailoverResult<T> = Result<T, FailoverError>;

impl FailoverError {
    pub(crate) fn parse(what: impl Into<String>, reason: impl ToString) -> Self {
        FailoverError::Parse {
            what: what.into(),
            reason: reason.to_string(),
        }
    }
}
