//! Peplink router API, for cellular WANs terminated on the router.
//!
//! The router's DHCP server does not hand out a usable lease for the
//! cellular WAN, so the address, gateway and mask are read straight from the
//! WAN status call after a cookie-based login.

use log::{debug, info, warn};
use serde_json::{json, Value};
use std::time::Duration;

use super::{CellularSignal, Lease, LeaseSource};
use crate::errors::{FailoverError, FailoverResult};

/// Parse a `status.wan.connection` response for WAN `connection`
pub fn parse_wan_status(body: &Value, connection: &str, interface: &str) -> FailoverResult<Lease> {
    let wan = body
        .get("response")
        .and_then(|r| r.get(connection))
        .ok_or_else(|| FailoverError::parse("peplink WAN status", format!("no connection {}", connection)))?;

    let field = |name: &str| wan.get(name).and_then(Value::as_str).unwrap_or("").to_string();
    let mut lease = Lease::new(interface, &field("ip"), &field("mask"), &field("gateway"))?;

    if let Some(dns) = wan.get("dns").and_then(Value::as_array) {
        let servers: Vec<&str> = dns.iter().filter_map(Value::as_str).collect();
        if !servers.is_empty() {
            lease.extra.insert("dns".to_string(), servers.join(","));
        }
    }

    if let Some(signal) = parse_band_signal(wan) {
        lease = lease.with_signal(signal);
    }
    Ok(lease)
}

/// First band of the first radio access technology, if the WAN is cellular
fn parse_band_signal(wan: &Value) -> Option<CellularSignal> {
    let band = wan
        .get("cellular")?
        .get("rat")?
        .get(0)?
        .get("band")?
        .get(0)?;

    let number = |v: Option<&Value>| -> Option<f64> {
        match v? {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    };
    let signal = band.get("signal");
    let metric = |name: &str| number(signal.and_then(|s| s.get(name)));

    Some(CellularSignal {
        channel: number(band.get("channel")).map(|c| c as i64),
        rssi: metric("rssi"),
        sinr: metric("sinr"),
        rsrp: metric("rsrp"),
        rsrq: metric("rsrq"),
    })
}

/// Lease source logging into a Peplink router
pub struct PeplinkRouter {
    url: String,
    username: String,
    password: String,
    connection: String,
    interface: String,
    timeout: Duration,
}

impl PeplinkRouter {
    pub fn new(
        url: String,
        username: String,
        password: String,
        connection: String,
        interface: String,
        timeout: Duration,
    ) -> Self {
        PeplinkRouter {
            url,
            username,
            password,
            connection,
            interface,
            timeout,
        }
    }

    fn query(&self) -> FailoverResult<Value> {
        // Session cookie lives only as long as this agent
        let agent: ureq::Agent = ureq::Agent::config_builder()
            .timeout_global(Some(self.timeout))
            .build()
            .into();

        debug!("Logging into router API at {}", self.url);
        let mut login = agent.post(&self.url).send_json(json!({
            "username": self.username,
            "password": self.password,
            "func": "login",
        }))?;
        let login_body: Value = login.body_mut().read_json()?;
        if login_body.get("stat").and_then(Value::as_str) == Some("fail") {
            return Err(FailoverError::InvalidConfiguration(
                "router API rejected the login".to_string(),
            ));
        }

        let mut status = agent
            .get(&self.url)
            .query("func", "status.wan.connection")
            .call()?;
        Ok(status.body_mut().read_json()?)
    }
}

impl LeaseSource for PeplinkRouter {
    fn fetch(&self) -> FailoverResult<Option<Lease>> {
        let body = self.query()?;
        match parse_wan_status(&body, &self.connection, &self.interface) {
            Ok(lease) => {
                info!(
                    "Router reports WAN {} at {} via {}",
                    self.connection, lease.address, lease.gateway
                );
                Ok(Some(lease))
            }
            Err(e) => {
                warn!("Unusable WAN status from router: {}", e);
                Ok(None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_status() -> Value {
        json!({
            "stat": "ok",
            "response": {
                "order": [1, 2],
                "2": {
                    "name": "Cellular",
                    "ip": "100.64.12.34",
                    "gateway": "100.64.12.33",
                    "mask": "255.255.255.252",
                    "dns": ["10.177.0.34", "10.177.0.210"],
                    "cellular": {
                        "rat": [{
                            "name": "LTE",
                            "band": [{
                                "name": "LTE Band 2 (1900 MHz)",
                                "channel": 650,
                                "signal": {"rssi": -71, "sinr": 9.4, "rsrp": -101, "rsrq": "-12"}
                            }]
                        }]
                    }
                }
            }
        })
    }

    #[test]
    fn test_parse_wan_status() {
        let lease = parse_wan_status(&sample_status(), "2", "eth1").unwrap();
        assert_eq!(lease.interface, "eth1");
        assert_eq!(lease.address.to_string(), "100.64.12.34");
        assert_eq!(lease.gateway.to_string(), "100.64.12.33");
        assert_eq!(lease.prefix, 30);
        assert_eq!(lease.extra.get("dns").unwrap(), "10.177.0.34,10.177.0.210");

        let signal = lease.signal.unwrap();
        assert_eq!(signal.channel, Some(650));
        assert_eq!(signal.rssi, Some(-71.0));
        assert_eq!(signal.sinr, Some(9.4));
        assert_eq!(signal.rsrq, Some(-12.0));
    }

    #[test]
    fn test_missing_connection() {
        assert!(parse_wan_status(&sample_status(), "3", "eth1").is_err());
    }

    #[test]
    fn test_wired_wan_has_no_signal() {
        let body = json!({"response": {"1": {"ip": "192.168.1.10", "gateway": "192.168.1.1", "mask": "24"}}});
        let lease = parse_wan_status(&body, "1", "eth1").unwrap();
        assert!(lease.signal.is_none());
    }

    #[test]
    fn test_partial_status_rejected() {
        let body = json!({"response": {"2": {"ip": "100.64.12.34", "gateway": "", "mask": "30"}}});
        assert!(parse_wan_status(&body, "2", "eth1").is_err());
    }
}
