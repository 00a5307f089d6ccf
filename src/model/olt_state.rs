use std::time::{Duration, Instant};

use crate::error::PollError;
use crate::model::ids::OltId;
use crate::model::olt_config::OltConfig;
use crate::model::onu::OnuData;
use crate::model::telemetry::TelemetryData;

/// Mutable runtime twin of an `OltConfig`. Owned exclusively by the
/// registry: workers read a snapshot, the result processor mutates it
/// under the registry lock.
#[derive(Debug, Clone)]
pub struct OltState {
    pub config: OltConfig,
    pub last_poll_at: Option<Instant>,
    pub last_success_at: Option<Instant>,
    pub last_error: Option<String>,
    pub error_count: u32,
    pub backoff_until: Option<Instant>,
}

impl OltState {
    pub fn new(config: OltConfig) -> Self {
        Self {
            config,
            last_poll_at: None,
            last_success_at: None,
            last_error: None,
            error_count: 0,
            backoff_until: None,
        }
    }

    /// Preserves runtime fields, swaps in the new config. Used by
    /// `Registry::replace` for OLTs that survive a reconciliation.
    pub fn with_updated_config(self, config: OltConfig) -> Self {
        Self { config, ..self }
    }

    pub fn is_due(&self, now: Instant) -> bool {
        if let Some(backoff_until) = self.backoff_until {
            if now < backoff_until {
                return false;
            }
        }
        match self.last_poll_at {
            None => true,
            Some(last) => now.saturating_duration_since(last) >= self.config.polling.effective_interval(),
        }
    }
}

/// Non-owning handle to an `OltState` queued for polling.
#[derive(Debug, Clone)]
pub struct PollJob {
    pub olt_id: OltId,
}

/// Produced by one worker, consumed by exactly one result-processor
/// invocation.
#[derive(Debug, Clone)]
pub struct PollResult {
    pub olt_id: OltId,
    pub onus: Vec<OnuData>,
    pub telemetry: Option<TelemetryData>,
    pub error: Option<PollError>,
    pub duration: Duration,
    pub timestamp: Instant,
}

impl PollResult {
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}
