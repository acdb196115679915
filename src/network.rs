use log::{debug, info, warn};
use serde::Deserialize;
use std::net::Ipv4Addr;
use std::process::{Command, Output};

use crate::config::ReloadMethod;
use crate::errors::{FailoverError, FailoverResult};
use crate::routing::{parse_route_table, IpRouteJson, RouteTableEntry, RouteTableStore};

/// Path a reachability probe is forced through
#[derive(Debug, Clone, PartialEq)]
pub struct ProbeVia {
    /// Source interface (`ping -I`), if pinned
    pub interface: Option<String>,

    /// Link table id, used as the fwmark selecting that table (`ping -m`)
    pub table: u32,
}

/// Answers whether an address is reachable through a given link
#[cfg_attr(test, mockall::automock)]
pub trait Prober {
    fn probe(&self, target: Ipv4Addr, via: &ProbeVia, attempts: u8) -> bool;
}

/// Interface and main-table operations on the host
#[cfg_attr(test, mockall::automock)]
pub trait LinkControl {
    /// Interface carrying the default route, empty if there is none
    fn current_default_interface(&self) -> FailoverResult<String>;

    /// Replace the main-table default route
    fn set_default_route(&self, interface: &str, gateway: Ipv4Addr) -> FailoverResult<()>;

    /// Cycle the interface down and up
    fn reload_interface(&self, interface: &str, method: ReloadMethod) -> FailoverResult<()>;

    /// IPv4 addresses currently bound to the interface
    fn ipv4_addresses(&self, interface: &str) -> FailoverResult<Vec<Ipv4Addr>>;

    /// Replace all IPv4 addresses on the interface with one
    fn assign_address(&self, interface: &str, address: Ipv4Addr, prefix: u8) -> FailoverResult<()>;
}

/// Runs a command and returns its output, whatever the exit status
fn run(program: &str, args: &[&str]) -> FailoverResult<Output> {
    debug!("Executing command: {} {}", program, args.join(" "));
    Command::new(program)
        .args(args)
        .output()
        .map_err(|e| FailoverError::CommandExecution(format!("{}: {}", program, e)))
}

/// Runs a command and fails unless it exits successfully
fn run_checked(program: &str, args: &[&str]) -> FailoverResult<Output> {
    let output = run(program, args)?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        debug!("Command failed with status {}: {}", output.status, stderr);
        return Err(FailoverError::CommandFailed {
            command: format!("{} {}", program, args.join(" ")),
            status: output.status.to_string(),
            stderr,
        });
    }
    Ok(output)
}

/// Interface of the first default route in `ip -j -4 route show default` output
pub fn parse_default_interface(json: &str) -> FailoverResult<String> {
    let routes: Vec<IpRouteJson> = serde_json::from_str(json)?;
    Ok(routes
        .into_iter()
        .find_map(|r| r.dev)
        .unwrap_or_default())
}

#[derive(Debug, Deserialize)]
struct IpAddrJson {
    #[serde(default)]
    addr_info: Vec<AddrInfoJson>,
}

#[derive(Debug, Deserialize)]
struct AddrInfoJson {
    family: Option<String>,
    local: Option<String>,
}

/// IPv4 addresses in `ip -j -4 addr show dev X` output
pub fn parse_interface_addresses(json: &str) -> FailoverResult<Vec<Ipv4Addr>> {
    let links: Vec<IpAddrJson> = serde_json::from_str(json)?;
    Ok(links
        .iter()
        .flat_map(|l| l.addr_info.iter())
        .filter(|a| a.family.as_deref().map(|f| f == "inet").unwrap_or(true))
        .filter_map(|a| a.local.as_deref()?.parse().ok())
        .collect())
}

/// `ip` output is empty rather than `[]` for some empty results
fn json_or_empty(output: &Output) -> String {
    let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if stdout.is_empty() {
        "[]".to_string()
    } else {
        stdout
    }
}

/// Check if a given interface exists
pub fn interface_exists(iface: &str) -> bool {
    Command::new("ip")
        .args(["link", "show", "dev", iface])
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

/// Host networking through iproute2, ifupdown and ping
#[derive(Debug, Clone)]
pub struct IpRoute2 {
    /// Per-reply ping timeout in seconds
    pub ping_timeout: u8,
}

impl IpRoute2 {
    pub fn new(ping_timeout: u8) -> Self {
        IpRoute2 { ping_timeout }
    }
}

impl RouteTableStore for IpRoute2 {
    fn read_table(&self, table: u32) -> FailoverResult<Option<RouteTableEntry>> {
        let table_arg = table.to_string();
        let output = run("ip", &["-j", "-4", "route", "show", "table", &table_arg])?;
        // `ip route show table N` exits non-zero when the table has never existed
        if !output.status.success() {
            debug!("Route table {} does not exist", table);
            return Ok(None);
        }
        let routes: Vec<IpRouteJson> = serde_json::from_str(&json_or_empty(&output))?;
        Ok(parse_route_table(table, &routes))
    }

    fn flush_and_write(&self, entry: &RouteTableEntry) -> FailoverResult<()> {
        let table = entry.table.to_string();
        let subnet = entry.subnet.to_string();
        let source = entry.source.to_string();
        let gateway = entry.default_gateway.to_string();
        let dev = entry.default_interface.as_deref().ok_or_else(|| {
            FailoverError::InvalidConfiguration(format!("table {} has no interface", table))
        })?;

        // Flushing an empty table fails; that is fine
        if let Err(e) = run_checked("ip", &["route", "flush", "table", &table]) {
            debug!("Flush of table {} reported: {}", table, e);
        }
        run_checked(
            "ip",
            &["route", "add", &subnet, "scope", "link", "dev", dev, "src", &source, "table", &table],
        )?;
        run_checked(
            "ip",
            &["route", "add", "default", "via", &gateway, "dev", dev, "src", &source, "table", &table],
        )?;
        debug!("Table {} now routes {} and default via {}", table, subnet, gateway);
        Ok(())
    }
}

impl LinkControl for IpRoute2 {
    fn current_default_interface(&self) -> FailoverResult<String> {
        let output = run_checked("ip", &["-j", "-4", "route", "show", "default"])?;
        let iface = parse_default_interface(&json_or_empty(&output))?;
        debug!("Default route is on interface '{}'", iface);
        Ok(iface)
    }

    fn set_default_route(&self, interface: &str, gateway: Ipv4Addr) -> FailoverResult<()> {
        info!("Setting default gateway to {} via {}", gateway, interface);
        let gateway = gateway.to_string();

        // Nothing to delete when there is no default route yet
        let _ = run("ip", &["route", "del", "default"]);
        run_checked("ip", &["route", "add", "default", "via", &gateway, "dev", interface])?;
        Ok(())
    }

    fn reload_interface(&self, interface: &str, method: ReloadMethod) -> FailoverResult<()> {
        info!("Reloading {} ({:?})", interface, method);
        match method {
            ReloadMethod::Ifupdown => {
                // ifdown fails for an interface ifupdown considers down already
                if let Err(e) = run_checked("ifdown", &[interface]) {
                    warn!("ifdown {} reported: {}", interface, e);
                }
                run_checked("ifup", &[interface])?;
            }
            ReloadMethod::IpLink => {
                run_checked("ip", &["link", "set", interface, "down"])?;
                run_checked("ip", &["link", "set", interface, "up"])?;
            }
        }
        Ok(())
    }

    fn ipv4_addresses(&self, interface: &str) -> FailoverResult<Vec<Ipv4Addr>> {
        if !interface_exists(interface) {
            return Err(FailoverError::InterfaceNotFound(interface.to_string()));
        }
        let output = run_checked("ip", &["-j", "-4", "addr", "show", "dev", interface])?;
        parse_interface_addresses(&json_or_empty(&output))
    }

    fn assign_address(&self, interface: &str, address: Ipv4Addr, prefix: u8) -> FailoverResult<()> {
        let cidr = format!("{}/{}", address, prefix);
        info!("Assigning {} to {}", cidr, interface);
        run_checked("ip", &["-4", "addr", "flush", "dev", interface])?;
        run_checked("ip", &["-4", "addr", "add", &cidr, "dev", interface])?;
        Ok(())
    }
}

impl Prober for IpRoute2 {
    fn probe(&self, target: Ipv4Addr, via: &ProbeVia, attempts: u8) -> bool {
        debug!("Pinging {} via table {} ({:?})", target, via.table, via.interface);

        let count = attempts.to_string();
        let timeout = self.ping_timeout.to_string();
        let mark = via.table.to_string();
        let target = target.to_string();

        let mut args = vec!["-c", count.as_str(), "-W", timeout.as_str(), "-m", mark.as_str()];
        if let Some(iface) = via.interface.as_deref() {
            args.extend(["-I", iface]);
        }
        args.push(target.as_str());

        match run("ping", &args) {
            Ok(o) if o.status.success() => true,
            Ok(o) => {
                info!(
                    "{} fails to ping via table {}: {}",
                    target,
                    via.table,
                    String::from_utf8_lossy(&o.stdout).lines().last().unwrap_or("").trim()
                );
                false
            }
            Err(e) => {
                warn!("Unable to run ping: {}", e);
                false
            }
        }
    }
}
