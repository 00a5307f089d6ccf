use std::collections::HashMap;
use std::time::Instant;

use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize, Serialize, PartialEq, Clone)]
pub struct MetricSample {
    pub name: String,
    pub value: f64,
    pub timestamp_ms: i64,
    pub labels: HashMap<String, String>,
}

/// One batch of samples that failed to push, parked in the retry buffer.
#[derive(Debug, Clone)]
pub struct BufferedBatch {
    pub payload: Vec<MetricSample>,
    pub first_seen_at: Instant,
    pub attempts: u32,
}

impl BufferedBatch {
    pub fn new(payload: Vec<MetricSample>) -> Self {
        Self {
            payload,
            first_seen_at: Instant::now(),
            attempts: 0,
        }
    }

    pub fn age(&self, now: Instant) -> std::time::Duration {
        now.saturating_duration_since(self.first_seen_at)
    }
}
