//! Normalized IPv4 leases and the backends that produce them.
//!
//! Each backend knows its own interface and how to ask for the lease
//! (dhclient database, ModemManager, router API, udhcpc dump). All of them
//! return the same [`Lease`] shape, and a lease is either complete or absent.

pub mod dhclient;
pub mod mmcli;
pub mod peplink;
pub mod udhcpc;

use chrono::{DateTime, Utc};
use ipnetwork::Ipv4Network;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::Ipv4Addr;
use std::time::Duration;

use crate::config::{LeaseSourceConfig, LinkConfig};
use crate::errors::{FailoverError, FailoverResult};

/// Radio quality figures reported alongside a cellular lease
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CellularSignal {
    pub channel: Option<i64>,
    pub rssi: Option<f64>,
    pub sinr: Option<f64>,
    pub rsrp: Option<f64>,
    pub rsrq: Option<f64>,
}

/// IPv4 configuration currently assigned to a link
#[derive(Debug, Clone, PartialEq)]
pub struct Lease {
    pub interface: String,
    pub address: Ipv4Addr,
    pub prefix: u8,
    pub gateway: Ipv4Addr,
    pub expiry: Option<DateTime<Utc>>,
    pub signal: Option<CellularSignal>,

    /// Vendor fields that are not needed for routing (DNS servers, lease time, ...)
    pub extra: BTreeMap<String, String>,
}

impl Lease {
    /// Build a lease from the textual fields every backend reports.
    ///
    /// `mask` may be a prefix length (`"24"`) or a dotted quad
    /// (`"255.255.255.0"`). Any empty or unparseable field rejects the lease.
    pub fn new(interface: &str, address: &str, mask: &str, gateway: &str) -> FailoverResult<Self> {
        let address = parse_field("address", address)?;
        let gateway = parse_field("gateway", gateway)?;
        let prefix = parse_mask(mask)?;

        Ok(Lease {
            interface: interface.to_string(),
            address,
            prefix,
            gateway,
            expiry: None,
            signal: None,
            extra: BTreeMap::new(),
        })
    }

    pub fn with_expiry(mut self, expiry: DateTime<Utc>) -> Self {
        self.expiry = Some(expiry);
        self
    }

    pub fn with_signal(mut self, signal: CellularSignal) -> Self {
        self.signal = Some(signal);
        self
    }

    pub fn with_extra(mut self, extra: BTreeMap<String, String>) -> Self {
        self.extra = extra;
        self
    }

    /// On-link network of the lease, host bits zeroed
    pub fn subnet(&self) -> Ipv4Network {
        let mask = prefix_to_mask(self.prefix);
        let network = Ipv4Addr::from(u32::from(self.address) & mask);
        // prefix is at most 32 by construction
        Ipv4Network::new(network, self.prefix).unwrap_or_else(|_| Ipv4Network::from(network))
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expiry.map(|e| e < now).unwrap_or(false)
    }
}

fn parse_field(name: &str, value: &str) -> FailoverResult<Ipv4Addr> {
    let value = value.trim();
    if value.is_empty() {
        return Err(FailoverError::InvalidLease(format!("empty {}", name)));
    }
    value
        .parse()
        .map_err(|_| FailoverError::InvalidLease(format!("bad {} '{}'", name, value)))
}

/// Accept a prefix length or a dotted netmask.
///
/// A non-contiguous netmask is taken best-effort as its count of leading one
/// bits rather than rejected.
pub fn parse_mask(mask: &str) -> FailoverResult<u8> {
    let mask = mask.trim().trim_start_matches('/');
    if mask.is_empty() {
        return Err(FailoverError::InvalidLease("empty subnet mask".to_string()));
    }
    if let Ok(prefix) = mask.parse::<u8>() {
        if prefix <= 32 {
            return Ok(prefix);
        }
        return Err(FailoverError::InvalidLease(format!("prefix {} out of range", prefix)));
    }
    let dotted: Ipv4Addr = mask
        .parse()
        .map_err(|_| FailoverError::InvalidLease(format!("bad subnet mask '{}'", mask)))?;
    match ipnetwork::ipv4_mask_to_prefix(dotted) {
        Ok(prefix) => Ok(prefix),
        Err(_) => {
            let prefix = u32::from(dotted).leading_ones() as u8;
            log::warn!("Non-contiguous subnet mask {}, using /{}", dotted, prefix);
            Ok(prefix)
        }
    }
}

fn prefix_to_mask(prefix: u8) -> u32 {
    match prefix {
        0 => 0,
        p => u32::MAX << (32 - u32::from(p.min(32))),
    }
}

/// Capability to fetch the current lease of one link
#[cfg_attr(test, mockall::automock)]
pub trait LeaseSource {
    /// Current lease, `Ok(None)` when the backend has nothing usable
    fn fetch(&self) -> FailoverResult<Option<Lease>>;
}

/// Construct the backend configured for a link
pub fn source_for(link: &LinkConfig) -> Box<dyn LeaseSource> {
    let interface = link.interface.clone();
    match &link.lease {
        LeaseSourceConfig::Dhclient { path } => {
            Box::new(dhclient::DhclientLeases::new(path.clone(), interface))
        }
        LeaseSourceConfig::ModemManager { modem, bearer } => {
            Box::new(mmcli::ModemManager::new(*modem, *bearer, interface))
        }
        LeaseSourceConfig::Peplink {
            url,
            username,
            password,
            connection,
            timeout,
        } => Box::new(peplink::PeplinkRouter::new(
            url.clone(),
            username.clone(),
            password.clone(),
            connection.clone(),
            interface,
            Duration::from_secs(*timeout),
        )),
        LeaseSourceConfig::Udhcpc { path } => {
            Box::new(udhcpc::UdhcpcLease::new(path.clone(), interface))
        }
    }
}
