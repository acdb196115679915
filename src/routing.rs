//! Per-link policy routing tables.
//!
//! Each uplink owns a kernel routing table holding an on-link route for its
//! subnet and a default route via its gateway, both sourced from the link's
//! address. Tables are rebuilt from the current lease whenever the recorded
//! source address no longer matches it.

use ipnetwork::Ipv4Network;
use log::{debug, info, warn};
use serde::Deserialize;
use std::net::Ipv4Addr;

use crate::config::LinkConfig;
use crate::errors::FailoverResult;
use crate::lease::Lease;

/// Contents of a valid per-link routing table
#[derive(Debug, Clone, PartialEq)]
pub struct RouteTableEntry {
    pub table: u32,
    pub default_gateway: Ipv4Addr,

    /// Device of the default route, when the kernel reported one
    pub default_interface: Option<String>,

    pub subnet: Ipv4Network,
    pub source: Ipv4Addr,
}

impl RouteTableEntry {
    /// Table contents derived from a lease on `interface`
    pub fn from_lease(table: u32, interface: &str, lease: &Lease) -> Self {
        RouteTableEntry {
            table,
            default_gateway: lease.gateway,
            default_interface: Some(interface.to_string()),
            subnet: lease.subnet(),
            source: lease.address,
        }
    }
}

/// Read and replace policy routing tables
#[cfg_attr(test, mockall::automock)]
pub trait RouteTableStore {
    /// Current table, `None` if it is missing or not valid
    fn read_table(&self, table: u32) -> FailoverResult<Option<RouteTableEntry>>;

    /// Flush the table and write the on-link and default routes of `entry`
    fn flush_and_write(&self, entry: &RouteTableEntry) -> FailoverResult<()>;
}

/// One route object from `ip -j -4 route show`
#[derive(Debug, Deserialize)]
pub struct IpRouteJson {
    pub dst: String,
    pub gateway: Option<String>,
    pub dev: Option<String>,
    pub prefsrc: Option<String>,
}

/// Interpret the routes of a table.
///
/// The table is valid only with a default route and an on-link route whose
/// subnet contains the default gateway; anything else yields `None`.
pub fn parse_route_table(table: u32, routes: &[IpRouteJson]) -> Option<RouteTableEntry> {
    let default = routes.iter().find(|r| r.dst == "default")?;
    let gateway: Ipv4Addr = match default.gateway.as_deref().map(str::parse) {
        Some(Ok(gw)) => gw,
        _ => {
            debug!("Table {} default route has no usable gateway", table);
            return None;
        }
    };

    // Route order from the kernel is not guaranteed, so scan separately
    for route in routes.iter().filter(|r| r.dst != "default") {
        let Ok(subnet) = route.dst.parse::<Ipv4Network>() else {
            continue;
        };
        if !subnet.contains(gateway) {
            continue;
        }
        let Some(source) = route.prefsrc.as_deref().and_then(|s| s.parse().ok()) else {
            debug!("Table {} on-link route {} has no source address", table, subnet);
            continue;
        };
        return Some(RouteTableEntry {
            table,
            default_gateway: gateway,
            default_interface: default.dev.clone(),
            subnet,
            source,
        });
    }

    debug!("Table {} has no on-link route covering {}", table, gateway);
    None
}

/// What a synchronization pass did to the table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    /// Table already matched the lease
    Unchanged,

    /// Table was flushed and rewritten
    Rebuilt,

    /// No usable lease or the write failed; table left as it was
    Skipped,
}

/// Make the link's table reflect `lease`, rewriting it only when it is
/// missing or its source address differs from the lease address.
pub fn sync_route_table(
    store: &dyn RouteTableStore,
    link: &LinkConfig,
    lease: Option<&Lease>,
) -> SyncOutcome {
    let Some(lease) = lease else {
        info!("No usable lease for {}, leaving table {} alone", link.interface, link.table);
        return SyncOutcome::Skipped;
    };

    let existing = match store.read_table(link.table) {
        Ok(existing) => existing,
        Err(e) => {
            warn!("Failed to read route table {}: {}", link.table, e);
            None
        }
    };

    if let Some(existing) = existing {
        if existing.source == lease.address {
            debug!("Table {} already sourced from {}", link.table, lease.address);
            return SyncOutcome::Unchanged;
        }
        info!(
            "Address on {} changed from {} to {}",
            link.interface, existing.source, lease.address
        );
    }

    rebuild_route_table(store, link, Some(lease))
}

/// Unconditionally flush and rewrite the link's table from `lease`
pub fn rebuild_route_table(
    store: &dyn RouteTableStore,
    link: &LinkConfig,
    lease: Option<&Lease>,
) -> SyncOutcome {
    let Some(lease) = lease else {
        warn!("Cannot rebuild table {} without a lease for {}", link.table, link.interface);
        return SyncOutcome::Skipped;
    };

    let entry = RouteTableEntry::from_lease(link.table, &link.interface, lease);
    info!(
        "Generating route table {}: {} src {} via {}",
        link.table, entry.subnet, entry.source, entry.default_gateway
    );
    match store.flush_and_write(&entry) {
        Ok(()) => SyncOutcome::Rebuilt,
        Err(e) => {
            warn!("Failed to write route table {}: {}", link.table, e);
            SyncOutcome::Skipped
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;
    use crate::errors::FailoverError;

    fn routes(json: &str) -> Vec<IpRouteJson> {
        serde_json::from_str(json).unwrap()
    }

    fn cable_lease(address: &str) -> Lease {
        Lease::new("enp1s0", address, "255.255.255.0", "192.168.5.1").unwrap()
    }

    #[test]
    fn test_on_link_subnet_lookup() {
        let table = routes(
            r#"[{"dst":"10.0.0.0/24","prefsrc":"10.0.0.5"},{"dst":"default","gateway":"10.0.0.1"}]"#,
        );
        let entry = parse_route_table(30, &table).unwrap();
        assert_eq!(entry.subnet.to_string(), "10.0.0.0/24");
        assert_eq!(entry.source, Ipv4Addr::new(10, 0, 0, 5));
        assert_eq!(entry.default_gateway, Ipv4Addr::new(10, 0, 0, 1));
        assert_eq!(entry.default_interface, None);
    }

    #[test]
    fn test_table_without_default_is_absent() {
        let table = routes(r#"[{"dst":"10.45.0.0/30","dev":"wwan0","prefsrc":"10.45.0.2"}]"#);
        assert!(parse_route_table(40, &table).is_none());
    }

    #[test]
    fn test_gateway_outside_subnet_is_absent() {
        let table = routes(
            r#"[{"dst":"default","gateway":"10.9.9.1","dev":"eth0"},
                {"dst":"10.0.0.0/24","dev":"eth0","prefsrc":"10.0.0.5"}]"#,
        );
        assert!(parse_route_table(30, &table).is_none());
    }

    #[test]
    fn test_sync_skips_without_lease() {
        let mut store = MockRouteTableStore::new();
        store.expect_read_table().never();
        store.expect_flush_and_write().never();
        let settings = Settings::default();
        assert_eq!(sync_route_table(&store, &settings.cable, None), SyncOutcome::Skipped);
    }

    #[test]
    fn test_sync_noop_when_source_matches() {
        let settings = Settings::default();
        let lease = cable_lease("192.168.5.2");
        let current = RouteTableEntry::from_lease(30, "enp1s0", &lease);

        let mut store = MockRouteTableStore::new();
        store
            .expect_read_table()
            .returning(move |_| Ok(Some(current.clone())));
        store.expect_flush_and_write().never();

        assert_eq!(
            sync_route_table(&store, &settings.cable, Some(&lease)),
            SyncOutcome::Unchanged
        );
    }

    #[test]
    fn test_sync_rebuilds_on_address_change() {
        let settings = Settings::default();
        let old = RouteTableEntry::from_lease(30, "enp1s0", &cable_lease("192.168.5.2"));
        let lease = cable_lease("192.168.5.77");

        let mut store = MockRouteTableStore::new();
        store.expect_read_table().returning(move |_| Ok(Some(old.clone())));
        store
            .expect_flush_and_write()
            .withf(|entry| {
                entry.table == 30
                    && entry.source == Ipv4Addr::new(192, 168, 5, 77)
                    && entry.subnet.to_string() == "192.168.5.0/24"
                    && entry.default_interface.as_deref() == Some("enp1s0")
            })
            .times(1)
            .returning(|_| Ok(()));

        assert_eq!(
            sync_route_table(&store, &settings.cable, Some(&lease)),
            SyncOutcome::Rebuilt
        );
    }

    #[test]
    fn test_sync_rebuilds_when_read_fails() {
        let settings = Settings::default();
        let mut store = MockRouteTableStore::new();
        store
            .expect_read_table()
            .returning(|_| Err(FailoverError::CommandExecution("ip: not found".to_string())));
        store.expect_flush_and_write().times(1).returning(|_| Ok(()));

        let lease = cable_lease("192.168.5.2");
        assert_eq!(
            sync_route_table(&store, &settings.cable, Some(&lease)),
            SyncOutcome::Rebuilt
        );
    }
}
