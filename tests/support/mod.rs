//! In-memory stand-ins for the host so engine scenarios run without root.

#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::net::Ipv4Addr;

use uplink_failover::config::ReloadMethod;
use uplink_failover::{
    Backends, CellularSample, CellularSignal, FailoverResult, Lease, LeaseSource, LinkControl,
    MetricsStore, NotificationEvent, Notifier, ProbeVia, Prober, RouteTableEntry, RouteTableStore,
    Settings,
};

pub const CABLE_GW: Ipv4Addr = Ipv4Addr::new(192, 168, 5, 1);
pub const CELL_GW: Ipv4Addr = Ipv4Addr::new(10, 45, 0, 1);
pub const GOOGLE: Ipv4Addr = Ipv4Addr::new(8, 8, 8, 8);
pub const WPCOM: Ipv4Addr = Ipv4Addr::new(192, 0, 78, 9);

pub fn cable_lease() -> Lease {
    Lease::new("enp1s0", "192.168.5.2", "255.255.255.0", "192.168.5.1").unwrap()
}

pub fn cell_lease() -> Lease {
    Lease::new("wwan0", "10.45.0.2", "30", "10.45.0.1").unwrap()
}

pub fn cell_lease_with_signal() -> Lease {
    cell_lease().with_signal(CellularSignal {
        channel: Some(650),
        rssi: Some(-71.0),
        sinr: Some(9.0),
        rsrp: Some(-101.0),
        rsrq: Some(-12.0),
    })
}

/// Lease source returning whatever the test put in it
#[derive(Default)]
pub struct FakeLeases {
    pub lease: RefCell<Option<Lease>>,
    pub fetches: RefCell<usize>,
}

impl FakeLeases {
    pub fn with(lease: Option<Lease>) -> Self {
        FakeLeases {
            lease: RefCell::new(lease),
            fetches: RefCell::new(0),
        }
    }
}

impl LeaseSource for FakeLeases {
    fn fetch(&self) -> FailoverResult<Option<Lease>> {
        *self.fetches.borrow_mut() += 1;
        Ok(self.lease.borrow().clone())
    }
}

/// Kernel routing state, interfaces and ping, recorded call by call
#[derive(Default)]
pub struct FakeHost {
    pub tables: RefCell<HashMap<u32, RouteTableEntry>>,
    pub writes: RefCell<Vec<RouteTableEntry>>,
    pub default_interface: RefCell<String>,
    pub default_routes: RefCell<Vec<(String, Ipv4Addr)>>,
    pub reloads: RefCell<Vec<String>>,
    pub addresses: RefCell<Vec<Ipv4Addr>>,
    pub assigned: RefCell<Vec<(String, Ipv4Addr, u8)>>,

    /// Targets answering through the cable table
    pub reachable: RefCell<HashSet<Ipv4Addr>>,

    /// Replaces `reachable` when the cable interface is reloaded
    pub reachable_after_reload: RefCell<Option<HashSet<Ipv4Addr>>>,

    pub probes: RefCell<Vec<(Ipv4Addr, ProbeVia, u8)>>,
    pub notifications: RefCell<Vec<String>>,
    pub samples: RefCell<Vec<CellularSample>>,
}

impl FakeHost {
    pub fn new(default_interface: &str) -> Self {
        let host = FakeHost::default();
        *host.default_interface.borrow_mut() = default_interface.to_string();
        host.addresses.borrow_mut().push(Ipv4Addr::new(192, 168, 5, 2));
        host
    }

    /// Both link tables already match the standard leases
    pub fn with_current_tables(self) -> Self {
        self.tables
            .borrow_mut()
            .insert(30, RouteTableEntry::from_lease(30, "enp1s0", &cable_lease()));
        self.tables
            .borrow_mut()
            .insert(40, RouteTableEntry::from_lease(40, "wwan0", &cell_lease()));
        self
    }

    pub fn reach(self, targets: &[Ipv4Addr]) -> Self {
        self.reachable.borrow_mut().extend(targets.iter().copied());
        self
    }

    pub fn set_reachable(&self, targets: &[Ipv4Addr]) {
        *self.reachable.borrow_mut() = targets.iter().copied().collect();
    }

    pub fn writes_to(&self, table: u32) -> usize {
        self.writes.borrow().iter().filter(|e| e.table == table).count()
    }

    pub fn backends<'a>(
        &'a self,
        cable_leases: &'a FakeLeases,
        cell_leases: &'a FakeLeases,
    ) -> Backends<'a> {
        Backends {
            cable_leases,
            cell_leases,
            tables: self,
            links: self,
            prober: self,
            notifier: self,
            metrics: self,
        }
    }
}

impl RouteTableStore for FakeHost {
    fn read_table(&self, table: u32) -> FailoverResult<Option<RouteTableEntry>> {
        Ok(self.tables.borrow().get(&table).cloned())
    }

    fn flush_and_write(&self, entry: &RouteTableEntry) -> FailoverResult<()> {
        self.tables.borrow_mut().insert(entry.table, entry.clone());
        self.writes.borrow_mut().push(entry.clone());
        Ok(())
    }
}

impl LinkControl for FakeHost {
    fn current_default_interface(&self) -> FailoverResult<String> {
        Ok(self.default_interface.borrow().clone())
    }

    fn set_default_route(&self, interface: &str, gateway: Ipv4Addr) -> FailoverResult<()> {
        *self.default_interface.borrow_mut() = interface.to_string();
        self.default_routes
            .borrow_mut()
            .push((interface.to_string(), gateway));
        Ok(())
    }

    fn reload_interface(&self, interface: &str, _method: ReloadMethod) -> FailoverResult<()> {
        self.reloads.borrow_mut().push(interface.to_string());
        if let Some(after) = self.reachable_after_reload.borrow_mut().take() {
            *self.reachable.borrow_mut() = after;
        }
        Ok(())
    }

    fn ipv4_addresses(&self, _interface: &str) -> FailoverResult<Vec<Ipv4Addr>> {
        Ok(self.addresses.borrow().clone())
    }

    fn assign_address(&self, interface: &str, address: Ipv4Addr, prefix: u8) -> FailoverResult<()> {
        self.assigned
            .borrow_mut()
            .push((interface.to_string(), address, prefix));
        Ok(())
    }
}

impl Prober for FakeHost {
    fn probe(&self, target: Ipv4Addr, via: &ProbeVia, attempts: u8) -> bool {
        self.probes.borrow_mut().push((target, via.clone(), attempts));
        if via.table == 40 {
            return true;
        }
        self.reachable.borrow().contains(&target)
    }
}

impl Notifier for FakeHost {
    fn notify(&self, event: &NotificationEvent) -> FailoverResult<()> {
        self.notifications.borrow_mut().push(event.message.clone());
        Ok(())
    }
}

impl MetricsStore for FakeHost {
    fn insert_cellular_sample(&self, sample: &CellularSample) -> FailoverResult<()> {
        self.samples.borrow_mut().push(sample.clone());
        Ok(())
    }
}

pub fn settings() -> Settings {
    Settings::default()
}
