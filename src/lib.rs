//! # Uplink Failover
//!
//! Keeps a gateway host online across two last-mile uplinks: a wired
//! "cable" link that is normally primary and a cellular backup. Each
//! evaluation reconciles the per-link policy routing tables with the current
//! leases, checks whether the cable link still carries traffic, and reloads
//! it, fails the default route over to cell, or fails back as needed.
//!
//! The decision logic lives in [`engine`] and only talks to the host through
//! the collaborator traits ([`LeaseSource`], [`RouteTableStore`],
//! [`LinkControl`], [`Prober`], [`Notifier`], [`MetricsStore`]), so it can be
//! exercised without touching real interfaces.

pub mod config;
pub mod engine;
pub mod errors;
pub mod health;
pub mod lease;
pub mod network;
pub mod notify;
pub mod routing;
pub mod telemetry;

// Re-export commonly used types and functions
pub use config::{Link, LinkConfig, ProbeConfig, Settings};
pub use engine::{Backends, CycleReport, FailoverEngine, Primary, Transition};
pub use errors::{FailoverError, FailoverResult};
pub use health::HealthEvaluator;
pub use lease::{CellularSignal, Lease, LeaseSource};
pub use network::{interface_exists, IpRoute2, LinkControl, ProbeVia, Prober};
pub use notify::{NotificationEvent, Notifier};
pub use routing::{sync_route_table, RouteTableEntry, RouteTableStore, SyncOutcome};
pub use telemetry::{CellularSample, MetricsStore};
