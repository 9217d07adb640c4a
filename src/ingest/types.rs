use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One normalized sensor sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    pub rate: f64,
    pub count: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_count: Option<i64>,
    pub received_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stats {
    pub sample_count: u64,
    pub rate_sum: f64,
    pub rate_avg: f64,
    pub window_start: DateTime<Utc>,
    pub last_sample_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idle_millis: Option<i64>,
    pub cumulative_count: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cumulative_input: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trailing_rate_per_minute: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionState {
    pub last_reading_at: DateTime<Utc>,
    pub latest_reading: Reading,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection_timeout_seconds: Option<u64>,
}

/// Live aggregate for one entity since its last shift report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct State {
    pub stats: Stats,
    pub connection_state: ConnectionState,
}
