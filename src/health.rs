//! Link health: decides whether an uplink needs reloading.
//!
//! Checks run in order and stop at the first one that demands a reload:
//! address presence, gateway reachability through the link's table, then
//! reachability of the external probe targets.

use log::{debug, info, warn};

use crate::config::{LinkConfig, ProbeConfig};
use crate::network::{LinkControl, ProbeVia, Prober};
use crate::routing::RouteTableStore;

pub struct HealthEvaluator<'a> {
    links: &'a dyn LinkControl,
    tables: &'a dyn RouteTableStore,
    prober: &'a dyn Prober,
    probe: &'a ProbeConfig,
}

impl<'a> HealthEvaluator<'a> {
    pub fn new(
        links: &'a dyn LinkControl,
        tables: &'a dyn RouteTableStore,
        prober: &'a dyn Prober,
        probe: &'a ProbeConfig,
    ) -> Self {
        HealthEvaluator {
            links,
            tables,
            prober,
            probe,
        }
    }

    /// `true` means the link needs no reload
    pub fn is_link_healthy(&self, link: &LinkConfig) -> bool {
        let needs_reload = self.address_needs_reload(link)
            || self.gateway_needs_reload(link)
            || self.external_needs_reload(link);
        debug!("Health of {}: needs reload = {}", link.interface, needs_reload);
        !needs_reload
    }

    /// Reports a missing address but never asks for a reload on that alone
    fn address_needs_reload(&self, link: &LinkConfig) -> bool {
        match self.links.ipv4_addresses(&link.interface) {
            Ok(addrs) if addrs.is_empty() => {
                info!("No ip address found on {}", link.interface);
            }
            Ok(addrs) => debug!("{} has addresses {:?}", link.interface, addrs),
            Err(e) => warn!("Unable to list addresses on {}: {}", link.interface, e),
        }
        false
    }

    fn gateway_needs_reload(&self, link: &LinkConfig) -> bool {
        let gateway = match self.tables.read_table(link.table) {
            Ok(Some(entry)) => entry.default_gateway,
            Ok(None) => {
                info!("Unable to determine gateway ip on table {}", link.table);
                return true;
            }
            Err(e) => {
                info!("Unable to read table {}: {}", link.table, e);
                return true;
            }
        };

        if self.prober.probe(gateway, &self.via(link), self.probe.attempts) {
            false
        } else {
            info!("Gateway {} fails to ping via table {}", gateway, link.table);
            true
        }
    }

    /// Only a failure of every target counts; later targets are fallbacks
    fn external_needs_reload(&self, link: &LinkConfig) -> bool {
        let via = self.via(link);
        for target in &self.probe.targets {
            if self.prober.probe(*target, &via, self.probe.attempts) {
                return false;
            }
            info!("{} fails to ping via table {}", target, link.table);
        }
        true
    }

    fn via(&self, link: &LinkConfig) -> ProbeVia {
        ProbeVia {
            interface: Some(link.interface.clone()),
            table: link.table,
        }
    }
}
