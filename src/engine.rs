//! Failover decision engine.
//!
//! Every evaluation starts from scratch: leases are fetched, link tables are
//! reconciled, cable health is measured and the live default route is read
//! back from the kernel. Nothing is remembered between runs, so a run that
//! dies half way is simply corrected by the next one.

use chrono::Utc;
use log::{debug, error, info, warn};
use std::net::Ipv4Addr;

use crate::config::{Link, LinkConfig, Settings};
use crate::errors::{FailoverError, FailoverResult};
use crate::health::HealthEvaluator;
use crate::lease::{Lease, LeaseSource};
use crate::network::{LinkControl, ProbeVia, Prober};
use crate::notify::{NotificationEvent, Notifier};
use crate::routing::{rebuild_route_table, sync_route_table, RouteTableStore};
use crate::telemetry::{record_cellular_stats, CellularSample, MetricsStore};

/// External capabilities the engine drives
pub struct Backends<'a> {
    pub cable_leases: &'a dyn LeaseSource,
    pub cell_leases: &'a dyn LeaseSource,
    pub tables: &'a dyn RouteTableStore,
    pub links: &'a dyn LinkControl,
    pub prober: &'a dyn Prober,
    pub notifier: &'a dyn Notifier,
    pub metrics: &'a dyn MetricsStore,
}

/// Which link held the default route when the evaluation started
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Primary {
    Cable,
    Cell,

    /// No default route at all
    None,

    /// Default route on an interface this engine does not manage
    Other(String),
}

/// Action taken by an evaluation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Cable was reloaded and works again; default route points at cable
    CableRestored,

    /// Cable was reloaded and still fails; default route moved to cell
    FailedOver,

    /// Cable is primary and healthy
    Steady,

    /// Cable recovered while cell was primary; default route moved back
    FailedBack,

    /// Cell is primary and cable still fails; cable was reloaded speculatively
    RetryingCable,

    /// Default route is on an unmanaged interface; nothing done
    Unmanaged,
}

/// Summary of one evaluation
#[derive(Debug, Clone, PartialEq)]
pub struct CycleReport {
    pub primary: Primary,
    pub cable_healthy: bool,
    pub transition: Transition,
    pub notification: Option<String>,
}

pub struct FailoverEngine<'a> {
    settings: &'a Settings,
    backends: Backends<'a>,
}

impl<'a> FailoverEngine<'a> {
    pub fn new(settings: &'a Settings, backends: Backends<'a>) -> Self {
        FailoverEngine { settings, backends }
    }

    /// Run one full evaluation. Collaborator failures are logged and
    /// treated as negative results; this never fails.
    pub fn run_cycle(&self) -> CycleReport {
        let cable = &self.settings.cable;
        let cell = &self.settings.cell;

        let cable_lease = self.fetch_lease(Link::Cable);
        sync_route_table(self.backends.tables, cable, cable_lease.as_ref());
        let cell_lease = self.fetch_lease(Link::Cell);
        sync_route_table(self.backends.tables, cell, cell_lease.as_ref());

        let cable_healthy = self.health().is_link_healthy(cable);
        let primary = self.primary();
        info!(
            "Primary link: {:?}, cable healthy: {}",
            primary, cable_healthy
        );

        let (transition, notification) = match (&primary, cable_healthy) {
            (Primary::Cable | Primary::None, false) => self.reload_cable(cell_lease.as_ref()),
            // A missing default route counts as cable being primary
            (Primary::Cable | Primary::None, true) => {
                self.keepalive();
                (Transition::Steady, None)
            }
            (Primary::Cell, true) => {
                info!("Cable connection has come back, failing back");
                self.switch_to(cable, cable_lease.as_ref());
                (
                    Transition::FailedBack,
                    Some(format!(
                        "{} has come back, failing back from {}",
                        cable.interface, cell.interface
                    )),
                )
            }
            (Primary::Cell, false) => {
                info!("Trying a reload of {} while on {}", cable.interface, cell.interface);
                self.reload(cable);
                (Transition::RetryingCable, None)
            }
            (Primary::Other(iface), _) => {
                warn!("Default route is on unmanaged interface {}, not touching it", iface);
                (Transition::Unmanaged, None)
            }
        };

        if let Some(message) = &notification {
            self.dispatch(message);
        }
        if let Some(lease) = &cell_lease {
            self.record_signal(lease);
        }

        CycleReport {
            primary,
            cable_healthy,
            transition,
            notification,
        }
    }

    /// Point the default route at `link` using its route table
    pub fn manual_failover(&self, link: Link) -> FailoverResult<()> {
        let config = self.settings.link(link);
        let entry = self
            .backends
            .tables
            .read_table(config.table)?
            .ok_or_else(|| FailoverError::RouteTableMissing(link.to_string()))?;

        let interface = entry
            .default_interface
            .clone()
            .unwrap_or_else(|| config.interface.clone());
        info!("Updating default route to {} via {}", entry.default_gateway, interface);
        self.backends
            .links
            .set_default_route(&interface, entry.default_gateway)
    }

    /// Boot-time setup of the cell interface from its lease: assign the
    /// address and build its table. The default route is left to `run_cycle`.
    pub fn configure_cell(&self) -> FailoverResult<()> {
        let cell = &self.settings.cell;
        let lease = self
            .backends
            .cell_leases
            .fetch()?
            .ok_or_else(|| FailoverError::InvalidLease(format!("no lease for {}", cell.interface)))?;

        self.backends
            .links
            .assign_address(&cell.interface, lease.address, lease.prefix)?;
        rebuild_route_table(self.backends.tables, cell, Some(&lease));
        Ok(())
    }

    fn health(&self) -> HealthEvaluator<'_> {
        HealthEvaluator::new(
            self.backends.links,
            self.backends.tables,
            self.backends.prober,
            &self.settings.probe,
        )
    }

    fn fetch_lease(&self, link: Link) -> Option<Lease> {
        let source = match link {
            Link::Cable => self.backends.cable_leases,
            Link::Cell => self.backends.cell_leases,
        };
        match source.fetch() {
            Ok(lease) => lease,
            Err(e) => {
                warn!("Unable to get {} lease: {}", link, e);
                None
            }
        }
    }

    fn primary(&self) -> Primary {
        let iface = match self.backends.links.current_default_interface() {
            Ok(iface) => iface,
            Err(e) => {
                warn!("Unable to read default route: {}", e);
                String::new()
            }
        };
        if iface.is_empty() {
            Primary::None
        } else if iface == self.settings.cable.interface {
            Primary::Cable
        } else if iface == self.settings.cell.interface {
            Primary::Cell
        } else {
            Primary::Other(iface)
        }
    }

    /// Reload cable, rebuild its table and decide between fixed and failover
    fn reload_cable(&self, cell_lease: Option<&Lease>) -> (Transition, Option<String>) {
        let cable = &self.settings.cable;
        let cell = &self.settings.cell;

        info!("Reloading {}", cable.interface);
        self.reload(cable);

        let cable_lease = self.fetch_lease(Link::Cable);
        rebuild_route_table(self.backends.tables, cable, cable_lease.as_ref());

        if self.health().is_link_healthy(cable) {
            info!("Reload completed, cable now works");
            self.switch_to(cable, cable_lease.as_ref());
            (
                Transition::CableRestored,
                Some(format!("{} fixed by reload", cable.interface)),
            )
        } else {
            info!("Cable connection failed, failing over");
            let switched = self.switch_to(cell, cell_lease);
            let message = if switched {
                format!("{} is down, failing over to {}", cable.interface, cell.interface)
            } else {
                format!(
                    "{} is down, failing over to {} failed",
                    cable.interface, cell.interface
                )
            };
            (Transition::FailedOver, Some(message))
        }
    }

    fn reload(&self, link: &LinkConfig) {
        if let Err(e) = self.backends.links.reload_interface(&link.interface, link.reload) {
            error!("Reload of {} failed: {}", link.interface, e);
        }
    }

    /// Gateway from the fresh lease, else from the link's table
    fn gateway_for(&self, link: &LinkConfig, lease: Option<&Lease>) -> Option<Ipv4Addr> {
        if let Some(lease) = lease {
            return Some(lease.gateway);
        }
        match self.backends.tables.read_table(link.table) {
            Ok(entry) => entry.map(|e| e.default_gateway),
            Err(e) => {
                warn!("Unable to read table {}: {}", link.table, e);
                None
            }
        }
    }

    /// Move the default route to `link`; returns whether the route was set
    fn switch_to(&self, link: &LinkConfig, lease: Option<&Lease>) -> bool {
        let Some(gateway) = self.gateway_for(link, lease) else {
            error!("No gateway known for {}, leaving default route alone", link.interface);
            return false;
        };
        match self.backends.links.set_default_route(&link.interface, gateway) {
            Ok(()) => true,
            Err(e) => {
                error!("Failed to set default route via {}: {}", link.interface, e);
                false
            }
        }
    }

    /// Ping through the cell table so the carrier does not drop an idle session
    fn keepalive(&self) {
        if !self.settings.probe.keepalive {
            return;
        }
        let Some(target) = self.settings.probe.targets.first() else {
            return;
        };
        let via = ProbeVia {
            interface: None,
            table: self.settings.cell.table,
        };
        if !self.backends.prober.probe(*target, &via, 1) {
            debug!("Keep-alive ping over {} got no reply", self.settings.cell.interface);
        }
    }

    fn dispatch(&self, message: &str) {
        let event = NotificationEvent::new(message);
        if let Err(e) = self.backends.notifier.notify(&event) {
            warn!("Failed to send notification '{}': {}", message, e);
        }
    }

    fn record_signal(&self, lease: &Lease) {
        if let Some(signal) = &lease.signal {
            let sample = CellularSample::from_signal(signal, Utc::now());
            record_cellular_stats(self.backends.metrics, &sample);
        }
    }
}
