//! ISC dhclient lease database (`/var/lib/dhcp/dhclient.leases`).

use chrono::{DateTime, NaiveDateTime, Utc};
use log::{debug, info, warn};
use std::collections::BTreeMap;
use std::path::PathBuf;

use super::{Lease, LeaseSource};
use crate::errors::FailoverResult;

/// One `lease { ... }` block as written by dhclient
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DhclientEntry {
    pub interface: String,
    pub fixed_address: String,
    pub options: BTreeMap<String, String>,
    pub expires: Option<DateTime<Utc>>,
}

impl DhclientEntry {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires.map(|e| e < now).unwrap_or(false)
    }

    /// Normalize into a [`Lease`], rejecting entries missing mask or router
    pub fn to_lease(&self) -> FailoverResult<Lease> {
        let mask = self.options.get("subnet-mask").map(String::as_str).unwrap_or("");
        let router = self
            .options
            .get("routers")
            .and_then(|r| r.split(',').next())
            .unwrap_or("");

        let extra = self
            .options
            .iter()
            .filter(|(k, _)| k.as_str() != "subnet-mask" && k.as_str() != "routers")
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        let mut lease = Lease::new(&self.interface, &self.fixed_address, mask, router)?.with_extra(extra);
        lease.expiry = self.expires;
        Ok(lease)
    }
}

/// Parse every lease block in a dhclient database, in file order
pub fn parse_dhclient(content: &str) -> Vec<DhclientEntry> {
    let mut entries = Vec::new();
    let mut current: Option<DhclientEntry> = None;

    for line in content.lines() {
        let line = line.trim();
        if line.starts_with("lease") && line.ends_with('{') {
            if let Some(entry) = current.take() {
                entries.push(entry);
            }
            current = Some(DhclientEntry::default());
            continue;
        }
        if line == "}" {
            if let Some(entry) = current.take() {
                entries.push(entry);
            }
            continue;
        }

        let Some(entry) = current.as_mut() else {
            continue;
        };
        let Some(statement) = line.strip_suffix(';') else {
            continue;
        };

        if let Some(rest) = statement.strip_prefix("interface ") {
            entry.interface = rest.trim().trim_matches('"').to_string();
        } else if let Some(rest) = statement.strip_prefix("fixed-address ") {
            entry.fixed_address = rest.trim().to_string();
        } else if let Some(rest) = statement.strip_prefix("option ") {
            if let Some((name, value)) = rest.trim().split_once(' ') {
                entry.options.insert(name.to_string(), value.trim().to_string());
            }
        } else if let Some(rest) = statement.strip_prefix("expire ") {
            entry.expires = parse_expiry(rest);
        }
    }

    if let Some(entry) = current.take() {
        entries.push(entry);
    }
    entries
}

/// `expire 1 2020/10/19 19:36:07` (weekday, then UTC date and time)
fn parse_expiry(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if value == "never" {
        return None;
    }
    let (_, stamp) = value.split_once(' ')?;
    match NaiveDateTime::parse_from_str(stamp.trim(), "%Y/%m/%d %H:%M:%S") {
        Ok(naive) => Some(naive.and_utc()),
        Err(e) => {
            debug!("Unparseable lease expiry '{}': {}", value, e);
            None
        }
    }
}

/// Last non-expired lease for `interface`, as dhclient appends renewals
pub fn select_lease(
    entries: &[DhclientEntry],
    interface: &str,
    now: DateTime<Utc>,
) -> Option<DhclientEntry> {
    entries
        .iter()
        .filter(|e| e.interface == interface && !e.is_expired(now))
        .last()
        .cloned()
}

/// Lease source backed by the dhclient database
#[derive(Debug, Clone)]
pub struct DhclientLeases {
    path: PathBuf,
    interface: String,
}

impl DhclientLeases {
    pub fn new(path: PathBuf, interface: String) -> Self {
        DhclientLeases { path, interface }
    }
}

impl LeaseSource for DhclientLeases {
    fn fetch(&self) -> FailoverResult<Option<Lease>> {
        let content = std::fs::read_to_string(&self.path)?;
        let entries = parse_dhclient(&content);
        debug!("Parsed {} lease blocks from {:?}", entries.len(), self.path);

        let Some(entry) = select_lease(&entries, &self.interface, Utc::now()) else {
            info!("No valid lease for {} in {:?}", self.interface, self.path);
            return Ok(None);
        };

        match entry.to_lease() {
            Ok(lease) => {
                info!(
                    "Found lease for {}, addr {}, expires {:?}",
                    self.interface, lease.address, lease.expiry
                );
                Ok(Some(lease))
            }
            Err(e) => {
                warn!("Ignoring incomplete lease for {}: {}", self.interface, e);
                Ok(None)
            }
        }
    }
}
