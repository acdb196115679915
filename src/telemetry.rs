//! Cellular signal telemetry.
//!
//! Samples are recorded at the very end of an evaluation; a store that is
//! down or slow only costs a log line.

use chrono::{DateTime, Utc};
use log::{debug, warn};
use serde::Serialize;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;

use crate::config::MetricsConfig;
use crate::errors::FailoverResult;
use crate::lease::CellularSignal;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CellularSample {
    pub timestamp: DateTime<Utc>,
    pub channel: Option<i64>,
    pub rssi: Option<f64>,
    pub sinr: Option<f64>,
    pub rsrp: Option<f64>,
    pub rsrq: Option<f64>,
}

impl CellularSample {
    pub fn from_signal(signal: &CellularSignal, timestamp: DateTime<Utc>) -> Self {
        CellularSample {
            timestamp,
            channel: signal.channel,
            rssi: signal.rssi,
            sinr: signal.sinr,
            rsrp: signal.rsrp,
            rsrq: signal.rsrq,
        }
    }

    /// InfluxDB line protocol; `None` when the sample carries no values
    pub fn to_line_protocol(&self, measurement: &str) -> Option<String> {
        let mut fields = Vec::new();
        if let Some(channel) = self.channel {
            fields.push(format!("channel={}i", channel));
        }
        for (name, value) in [
            ("rssi", self.rssi),
            ("sinr", self.sinr),
            ("rsrp", self.rsrp),
            ("rsrq", self.rsrq),
        ] {
            if let Some(v) = value {
                fields.push(format!("{}={}", name, v));
            }
        }
        if fields.is_empty() {
            return None;
        }
        let nanos = self.timestamp.timestamp_nanos_opt().unwrap_or_default();
        Some(format!("{} {} {}", measurement, fields.join(","), nanos))
    }
}

#[cfg_attr(test, mockall::automock)]
pub trait MetricsStore {
    fn insert_cellular_sample(&self, sample: &CellularSample) -> FailoverResult<()>;
}

/// Discards samples
pub struct NullStore;

impl MetricsStore for NullStore {
    fn insert_cellular_sample(&self, _sample: &CellularSample) -> FailoverResult<()> {
        Ok(())
    }
}

/// Writes to an InfluxDB 1.x `/write` endpoint
pub struct InfluxStore {
    url: String,
    measurement: String,
    agent: ureq::Agent,
}

impl InfluxStore {
    pub fn new(url: String, measurement: String, timeout: Duration) -> Self {
        let agent = ureq::Agent::config_builder()
            .timeout_global(Some(timeout))
            .build()
            .into();
        InfluxStore {
            url,
            measurement,
            agent,
        }
    }
}

impl MetricsStore for InfluxStore {
    fn insert_cellular_sample(&self, sample: &CellularSample) -> FailoverResult<()> {
        let Some(line) = sample.to_line_protocol(&self.measurement) else {
            debug!("Cellular sample has no values, not writing");
            return Ok(());
        };
        self.agent
            .post(&self.url)
            .header("Content-Type", "text/plain; charset=utf-8")
            .send(line.as_str())?;
        Ok(())
    }
}

/// Appends one JSON document per sample
pub struct JsonLinesStore {
    path: PathBuf,
}

impl JsonLinesStore {
    pub fn new(path: PathBuf) -> Self {
        JsonLinesStore { path }
    }
}

impl MetricsStore for JsonLinesStore {
    fn insert_cellular_sample(&self, sample: &CellularSample) -> FailoverResult<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        let line = serde_json::to_string(sample)?;
        writeln!(file, "{}", line)?;
        Ok(())
    }
}

/// Construct the configured store
pub fn store_for(config: &MetricsConfig) -> Box<dyn MetricsStore> {
    match config {
        MetricsConfig::None => Box::new(NullStore),
        MetricsConfig::Influx {
            url,
            measurement,
            timeout,
        } => Box::new(InfluxStore::new(
            url.clone(),
            measurement.clone(),
            Duration::from_secs(*timeout),
        )),
        MetricsConfig::JsonLines { path } => Box::new(JsonLinesStore::new(path.clone())),
    }
}

/// Insert a sample, logging instead of propagating any failure
pub fn record_cellular_stats(store: &dyn MetricsStore, sample: &CellularSample) {
    match store.insert_cellular_sample(sample) {
        Ok(()) => debug!("Recorded cellular sample at {}", sample.timestamp),
        Err(e) => warn!("Failed to record cellular stats: {}", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::FailoverError;
    use chrono::TimeZone;

    fn sample() -> CellularSample {
        CellularSample {
            timestamp: Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap(),
            channel: Some(650),
            rssi: Some(-71.0),
            sinr: Some(9.5),
            rsrp: None,
            rsrq: Some(-12.0),
        }
    }

    #[test]
    fn test_line_protocol() {
        assert_eq!(
            sample().to_line_protocol("cellular").unwrap(),
            "cellular channel=650i,rssi=-71,sinr=9.5,rsrq=-12 1709294400000000000"
        );
    }

    #[test]
    fn test_empty_sample_has_no_line() {
        let empty = CellularSample::from_signal(&CellularSignal::default(), Utc::now());
        assert!(empty.to_line_protocol("cellular").is_none());
    }

    #[test]
    fn test_json_lines_appends() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cell.jsonl");
        let store = JsonLinesStore::new(path.clone());

        store.insert_cellular_sample(&sample()).unwrap();
        store.insert_cellular_sample(&sample()).unwrap();

        let content = std::fs::read_to_string(path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        let value: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(value["channel"], 650);
        assert!(value["rsrp"].is_null());
    }

    #[test]
    fn test_record_swallows_store_errors() {
        let mut store = MockMetricsStore::new();
        store
            .expect_insert_cellular_sample()
            .times(1)
            .returning(|_| Err(FailoverError::Unknown("store unreachable".to_string())));
        record_cellular_stats(&store, &sample());
    }
}
