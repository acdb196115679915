//! Configuration for the failover engine and its backends.
//!
//! The file format is TOML. Every field is optional; anything left out falls
//! back to the defaults of a typical cable + LTE gateway.

use serde::Deserialize;
use std::fmt;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::errors::{FailoverError, FailoverResult};

/// Default location of the configuration file
pub const DEFAULT_CONFIG_PATH: &str = "/etc/uplink-failover/config.toml";

/// Default dhclient lease database
pub const DEFAULT_DHCLIENT_LEASES: &str = "/var/lib/dhcp/dhclient.leases";

/// One of the two managed uplinks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Link {
    /// Wired WAN, the intended primary
    Cable,

    /// Cellular WAN, the backup
    Cell,
}

impl fmt::Display for Link {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Link::Cable => write!(f, "cable"),
            Link::Cell => write!(f, "cell"),
        }
    }
}

impl FromStr for Link {
    type Err = FailoverError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cable" => Ok(Link::Cable),
            "cell" | "cellular" => Ok(Link::Cell),
            other => Err(FailoverError::InvalidConfiguration(format!(
                "unknown link '{}' (expected cable or cell)",
                other
            ))),
        }
    }
}

/// How a failed interface is cycled down and up
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum ReloadMethod {
    /// `ifdown <iface>; ifup <iface>`, re-runs the DHCP client
    #[default]
    Ifupdown,

    /// `ip link set <iface> down/up`
    IpLink,
}

/// Where a link's lease comes from
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "source", rename_all = "kebab-case")]
pub enum LeaseSourceConfig {
    /// ISC dhclient lease database
    Dhclient {
        #[serde(default = "default_dhclient_path")]
        path: PathBuf,
    },

    /// ModemManager bearer, read through `mmcli`
    ModemManager {
        #[serde(default)]
        modem: u32,
        #[serde(default = "default_bearer")]
        bearer: u32,
    },

    /// Peplink router HTTP API
    Peplink {
        url: String,
        username: String,
        password: String,
        #[serde(default = "default_connection_id")]
        connection: String,
        #[serde(default = "default_http_timeout")]
        timeout: u64,
    },

    /// Key=value lease dump written by a udhcpc hook script
    Udhcpc { path: PathBuf },
}

fn default_dhclient_path() -> PathBuf {
    PathBuf::from(DEFAULT_DHCLIENT_LEASES)
}

fn default_bearer() -> u32 {
    1
}

fn default_connection_id() -> String {
    "2".to_string()
}

fn default_http_timeout() -> u64 {
    10
}

/// Notification backend selection
#[derive(Debug, Clone, PartialEq, Deserialize, Default)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum NotifyConfig {
    /// Only write notifications to the log
    #[default]
    Log,

    /// Run a program with the message appended as the last argument
    Command {
        program: String,
        #[serde(default)]
        args: Vec<String>,
    },

    /// POST a JSON event to a URL (SMS gateway, chat hook, ...)
    Webhook {
        url: String,
        #[serde(default = "default_http_timeout")]
        timeout: u64,
    },
}

/// Metrics store backend selection
#[derive(Debug, Clone, PartialEq, Deserialize, Default)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum MetricsConfig {
    /// Discard samples
    #[default]
    None,

    /// InfluxDB `/write` endpoint using line protocol
    Influx {
        url: String,
        #[serde(default = "default_measurement")]
        measurement: String,
        #[serde(default = "default_http_timeout")]
        timeout: u64,
    },

    /// Append one JSON object per sample to a file
    JsonLines { path: PathBuf },
}

fn default_measurement() -> String {
    "cellular".to_string()
}

/// Raw `[cable]` / `[cell]` section as written in the file
#[derive(Debug, Deserialize, Clone, Default)]
struct LinkSection {
    interface: Option<String>,
    table: Option<u32>,
    reload: Option<ReloadMethod>,
    lease: Option<LeaseSourceConfig>,
}

#[derive(Debug, Deserialize, Clone, Default)]
struct ProbeSection {
    targets: Option<Vec<Ipv4Addr>>,
    attempts: Option<u8>,
    timeout: Option<u8>,
    keepalive: Option<bool>,
}

/// Configuration file layout
#[derive(Debug, Deserialize, Clone, Default)]
pub struct FileConfig {
    cable: Option<LinkSection>,
    cell: Option<LinkSection>,
    probe: Option<ProbeSection>,
    notify: Option<NotifyConfig>,
    metrics: Option<MetricsConfig>,
}

impl FileConfig {
    /// Parse configuration from TOML text
    pub fn from_toml(content: &str) -> FailoverResult<Self> {
        toml::from_str(content).map_err(|e| FailoverError::InvalidConfiguration(e.to_string()))
    }

    /// Read the configuration file, or fall back to defaults if it does not exist
    pub fn load(path: &Path) -> FailoverResult<Self> {
        if !path.exists() {
            log::info!("Configuration file {:?} does not exist, using defaults", path);
            return Ok(FileConfig::default());
        }
        log::debug!("Reading configuration from {:?}", path);
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }
}

/// Settings for one uplink
#[derive(Debug, Clone, PartialEq)]
pub struct LinkConfig {
    pub link: Link,

    /// Network interface name (e.g., enp1s0, wwan0)
    pub interface: String,

    /// Policy-routing table id, also used as the probe fwmark
    pub table: u32,

    pub reload: ReloadMethod,

    pub lease: LeaseSourceConfig,
}

/// Reachability probe settings
#[derive(Debug, Clone, PartialEq)]
pub struct ProbeConfig {
    /// External addresses tried in order; a link fails only if all are unreachable
    pub targets: Vec<Ipv4Addr>,

    /// Number of echo requests per probe
    pub attempts: u8,

    /// Per-reply timeout in seconds
    pub timeout: u8,

    /// Send a ping over the cell table while cable is healthy
    pub keepalive: bool,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        ProbeConfig {
            targets: vec![Ipv4Addr::new(8, 8, 8, 8), Ipv4Addr::new(192, 0, 78, 9)],
            attempts: 2,
            timeout: 2,
            keepalive: true,
        }
    }
}

/// Fully resolved configuration handed to the engine and backend factories
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub cable: LinkConfig,
    pub cell: LinkConfig,
    pub probe: ProbeConfig,
    pub notify: NotifyConfig,
    pub metrics: MetricsConfig,
}

impl Default for Settings {
    fn default() -> Self {
        Settings::merge(FileConfig::default())
    }
}

impl Settings {
    /// Merge a parsed file with the built-in defaults and validate the result
    pub fn resolve(file: FileConfig) -> FailoverResult<Self> {
        let settings = Settings::merge(file);
        settings.validate()?;
        Ok(settings)
    }

    fn merge(file: FileConfig) -> Self {
        let cable_section = file.cable.unwrap_or_default();
        let cell_section = file.cell.unwrap_or_default();
        let probe_section = file.probe.unwrap_or_default();
        let probe_defaults = ProbeConfig::default();

        let cable = LinkConfig {
            link: Link::Cable,
            interface: cable_section.interface.unwrap_or_else(|| "enp1s0".to_string()),
            table: cable_section.table.unwrap_or(30),
            reload: cable_section.reload.unwrap_or_default(),
            lease: cable_section.lease.unwrap_or(LeaseSourceConfig::Dhclient {
                path: default_dhclient_path(),
            }),
        };

        let cell = LinkConfig {
            link: Link::Cell,
            interface: cell_section.interface.unwrap_or_else(|| "wwan0".to_string()),
            table: cell_section.table.unwrap_or(40),
            reload: cell_section.reload.unwrap_or(ReloadMethod::IpLink),
            lease: cell_section.lease.unwrap_or(LeaseSourceConfig::ModemManager {
                modem: 0,
                bearer: default_bearer(),
            }),
        };

        let probe = ProbeConfig {
            targets: probe_section.targets.unwrap_or(probe_defaults.targets),
            attempts: probe_section.attempts.unwrap_or(probe_defaults.attempts),
            timeout: probe_section.timeout.unwrap_or(probe_defaults.timeout),
            keepalive: probe_section.keepalive.unwrap_or(probe_defaults.keepalive),
        };

        Settings {
            cable,
            cell,
            probe,
            notify: file.notify.unwrap_or_default(),
            metrics: file.metrics.unwrap_or_default(),
        }
    }

    fn validate(&self) -> FailoverResult<()> {
        if self.cable.interface.is_empty() || self.cell.interface.is_empty() {
            return Err(FailoverError::InvalidConfiguration(
                "interface names must not be empty".to_string(),
            ));
        }
        if self.cable.interface == self.cell.interface {
            return Err(FailoverError::InvalidConfiguration(format!(
                "cable and cell both use interface {}",
                self.cable.interface
            )));
        }
        if self.cable.table == self.cell.table {
            return Err(FailoverError::InvalidConfiguration(format!(
                "cable and cell both use route table {}",
                self.cable.table
            )));
        }
        if self.probe.targets.is_empty() {
            return Err(FailoverError::InvalidConfiguration(
                "at least one probe target is required".to_string(),
            ));
        }
        if self.probe.attempts == 0 {
            return Err(FailoverError::InvalidConfiguration(
                "probe attempts must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Settings for the given link
    pub fn link(&self, link: Link) -> &LinkConfig {
        match link {
            Link::Cable => &self.cable,
            Link::Cell => &self.cell,
        }
    }
}
