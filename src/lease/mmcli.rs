use log::{debug, warn};
use serde::Deserialize;
use std::process::Command;

use super::{Lease, LeaseSource};
use crate::errors::{FailoverError, FailoverResult};

#[derive(Debug, Deserialize)]
struct MmcliOutput {
    bearer: MmcliBearer,
}

#[derive(Debug, Deserialize)]
struct MmcliBearer {
    #[serde(rename = "ipv4-config")]
    ipv4_config: MmcliIpv4Config,
}

#[derive(Debug, Deserialize)]
struct MmcliIpv4Config {
    #[serde(default)]
    address: String,
    #[serde(default)]
    gateway: String,
    #[serde(default)]
    prefix: String,
}

/// Parse `mmcli --bearer=N -J` output into a lease for `interface`
pub fn parse_mmcli_bearer(json: &str, interface: &str) -> FailoverResult<Lease> {
    let output: MmcliOutput = serde_json::from_str(json)?;
    let config = output.bearer.ipv4_config;
    Lease::new(interface, &config.address, &config.prefix, &config.gateway)
}

/// Lease source reading the active bearer from ModemManager
#[derive(Debug, Clone)]
pub struct ModemManager {
    modem: u32,
    bearer: u32,
    interface: String,
}

impl ModemManager {
    pub fn new(modem: u32, bearer: u32, interface: String) -> Self {
        ModemManager {
            modem,
            bearer,
            interface,
        }
    }
}

impl LeaseSource for ModemManager {
    fn fetch(&self) -> FailoverResult<Option<Lease>> {
        debug!("Querying ModemManager modem {} bearer {}", self.modem, self.bearer);

        let output = Command::new("mmcli")
            .arg(format!("--modem={}", self.modem))
            .arg(format!("--bearer={}", self.bearer))
            .arg("-J")
            .output()
            .map_err(|e| FailoverError::CommandExecution(format!("mmcli: {}", e)))?;

        if !output.status.success() {
            warn!(
                "mmcli failed ({}): {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
            return Ok(None);
        }

        match parse_mmcli_bearer(&String::from_utf8_lossy(&output.stdout), &self.interface) {
            Ok(lease) => Ok(Some(lease)),
            Err(e) => {
                warn!("Unusable bearer data from mmcli: {}", e);
                Ok(None)
            }
        }
    }
}
