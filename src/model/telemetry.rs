use serde::{Deserialize, Serialize};

/// OLT-level gauges collected from `GetOLTStatus`.
#[derive(Debug, Deserialize, Serialize, PartialEq, Clone)]
pub struct TelemetryData {
    pub cpu_percent: f64,
    pub mem_percent: f64,
    pub temperature_celsius: f64,
    pub uptime_seconds: u64,
    pub reachable: bool,
    pub healthy: bool,
    #[serde(default)]
    pub firmware: Option<String>,
    #[serde(default)]
    pub serial: Option<String>,
}
