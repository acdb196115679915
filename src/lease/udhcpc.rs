//! Lease dump written by a udhcpc hook script.
//!
//! The hook writes the variables udhcpc exports on `bound`/`renew`, one
//! `key=value` per line:
//!
//! ```text
//! interface=eth0
//! ip=192.168.5.2
//! subnet=255.255.255.0
//! router=192.168.5.1
//! lease=86400
//! ```

use chrono::{DateTime, Utc};
use log::{debug, warn};
use std::collections::BTreeMap;
use std::path::PathBuf;

use super::{Lease, LeaseSource};
use crate::errors::FailoverResult;

/// Parse a dump; `written` is when the file was last modified
pub fn parse_udhcpc(content: &str, interface: &str, written: Option<DateTime<Utc>>) -> FailoverResult<Lease> {
    let mut vars: BTreeMap<String, String> = content
        .lines()
        .filter_map(|line| line.trim().split_once('='))
        .map(|(k, v)| (k.trim().to_string(), v.trim().trim_matches('"').to_string()))
        .collect();

    let address = vars.remove("ip").unwrap_or_default();
    let mask = vars
        .remove("subnet")
        .or_else(|| vars.remove("mask"))
        .unwrap_or_default();
    let router = vars
        .remove("router")
        .and_then(|r| r.split_whitespace().next().map(str::to_string))
        .unwrap_or_default();
    let name = vars.remove("interface").unwrap_or_else(|| interface.to_string());

    let expiry = match (vars.get("lease").and_then(|s| s.parse::<i64>().ok()), written) {
        (Some(secs), Some(written)) => Some(written + chrono::Duration::seconds(secs)),
        _ => None,
    };

    let mut lease = Lease::new(&name, &address, &mask, &router)?.with_extra(vars);
    lease.expiry = expiry;
    Ok(lease)
}

/// Lease source reading a udhcpc dump file
#[derive(Debug, Clone)]
pub struct UdhcpcLease {
    path: PathBuf,
    interface: String,
}

impl UdhcpcLease {
    pub fn new(path: PathBuf, interface: String) -> Self {
        UdhcpcLease { path, interface }
    }
}

impl LeaseSource for UdhcpcLease {
    fn fetch(&self) -> FailoverResult<Option<Lease>> {
        let content = std::fs::read_to_string(&self.path)?;
        let written = std::fs::metadata(&self.path)
            .and_then(|m| m.modified())
            .ok()
            .map(DateTime::<Utc>::from);

        let lease = match parse_udhcpc(&content, &self.interface, written) {
            Ok(lease) => lease,
            Err(e) => {
                warn!("Ignoring incomplete udhcpc lease in {:?}: {}", self.path, e);
                return Ok(None);
            }
        };

        if lease.interface != self.interface {
            warn!(
                "Lease in {:?} is for {}, expected {}",
                self.path, lease.interface, self.interface
            );
            return Ok(None);
        }
        if lease.is_expired(Utc::now()) {
            debug!("udhcpc lease for {} expired at {:?}", self.interface, lease.expiry);
            return Ok(None);
        }
        Ok(Some(lease))
    }
}
