//! The result processor (component G): the single-threaded consumer of
//! `PollResult`s. Owns backoff computation, registry mutation, and fanning
//! poll output into ONU/telemetry/metric pushes with retry-buffer fallback.
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use crossbeam::channel::Receiver;
use tracing::{error, info, warn};

use crate::buffer::RetryBuffer;
use crate::control_plane::client::{MetricsPusher, OnuPusher, TelemetryPusher};
use crate::model::{MetricSample, OltId, OnuData, PollResult, TelemetryData};
use crate::registry::{PollOutcome, Registry};

pub const DEFAULT_MAX_BACKOFF: Duration = Duration::from_secs(5 * 60);
const MAX_BACKOFF_EXPONENT: u32 = 30;
const OPPORTUNISTIC_DRAIN_SIZE: usize = 64;

/// `min(2^min(error_count, 30) * 10s, max_backoff)`. `error_count == 1`
/// (the first failure) waits 20s, not 10s — the exponent is the error count
/// itself, not `error_count - 1`.
pub fn compute_backoff(error_count: u32, max_backoff: Duration) -> Duration {
    let exponent = error_count.min(MAX_BACKOFF_EXPONENT);
    let factor = 1u64.checked_shl(exponent).unwrap_or(u64::MAX);
    let secs = 10u64.saturating_mul(factor);
    Duration::from_secs(secs).min(max_backoff)
}

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

fn olt_labels(olt_id: &OltId) -> std::collections::HashMap<String, String> {
    let mut labels = std::collections::HashMap::new();
    labels.insert("olt_id".to_string(), olt_id.to_string());
    labels
}

fn onu_labels(olt_id: &OltId, onu: &OnuData) -> std::collections::HashMap<String, String> {
    let mut labels = olt_labels(olt_id);
    labels.insert("onu_serial".to_string(), onu.serial.clone());
    labels.insert("pon_port".to_string(), onu.pon_port.clone());
    labels
}

/// Builds the metrics batch for one successful poll: OLT-level gauges plus
/// per-ONU optical power, all timestamped at a single `now_ms` for the batch.
pub fn build_metric_batch(olt_id: &OltId, telemetry: Option<&TelemetryData>, onus: &[OnuData]) -> Vec<MetricSample> {
    let ts = now_ms();
    let mut samples = Vec::new();

    if let Some(t) = telemetry {
        let labels = olt_labels(olt_id);
        samples.push(MetricSample {
            name: "olt_cpu_percent".into(),
            value: t.cpu_percent,
            timestamp_ms: ts,
            labels: labels.clone(),
        });
        samples.push(MetricSample {
            name: "olt_memory_percent".into(),
            value: t.mem_percent,
            timestamp_ms: ts,
            labels: labels.clone(),
        });
        samples.push(MetricSample {
            name: "olt_temperature_celsius".into(),
            value: t.temperature_celsius,
            timestamp_ms: ts,
            labels,
        });
    }

    for onu in onus {
        if let Some(rx) = onu.rx_power_dbm.filter(|v| *v != 0.0) {
            samples.push(MetricSample {
                name: "onu_rx_power_dbm".into(),
                value: rx,
                timestamp_ms: ts,
                labels: onu_labels(olt_id, onu),
            });
        }
        if let Some(tx) = onu.tx_power_dbm.filter(|v| *v != 0.0) {
            samples.push(MetricSample {
                name: "onu_tx_power_dbm".into(),
                value: tx,
                timestamp_ms: ts,
                labels: onu_labels(olt_id, onu),
            });
        }
    }

    samples
}

/// Bundles the three optional pushers the processor fans a successful poll
/// result out to. Any of them may be absent (spec.md non-goal: pushing
/// metrics when no pusher is configured is out of scope, i.e. a no-op).
pub struct Pushers {
    pub onus: Option<Arc<dyn OnuPusher + Send + Sync>>,
    pub telemetry: Option<Arc<dyn TelemetryPusher + Send + Sync>>,
    pub metrics: Option<Arc<dyn MetricsPusher + Send + Sync>>,
}

pub struct ResultProcessor {
    registry: Arc<Registry>,
    buffer: Arc<RetryBuffer>,
    pushers: Pushers,
}

impl ResultProcessor {
    pub fn new(registry: Arc<Registry>, buffer: Arc<RetryBuffer>, pushers: Pushers) -> Self {
        Self {
            registry,
            buffer,
            pushers,
        }
    }

    /// Blocks consuming `results` until the channel is closed (shutdown).
    pub fn run(&self, results: Receiver<PollResult>) {
        for result in results {
            self.handle(result);
        }
    }

    pub fn handle(&self, result: PollResult) {
        if result.is_success() {
            self.handle_success(result);
        } else {
            self.handle_failure(result);
        }
    }

    fn handle_failure(&self, result: PollResult) {
        let error = result.error.expect("checked by is_success");
        warn!(olt_id = %result.olt_id, error = %error, "poll failed");
        let _ = self.registry.update_result(
            &result.olt_id,
            PollOutcome::Failure {
                error,
                now: result.timestamp,
            },
        );
    }

    fn handle_success(&self, result: PollResult) {
        let _ = self.registry.update_result(
            &result.olt_id,
            PollOutcome::Success {
                timestamp: result.timestamp,
            },
        );

        if let Some(pusher) = &self.pushers.onus {
            if !result.onus.is_empty() {
                if let Err(e) = pusher.push_onus(&result.olt_id, &result.onus) {
                    warn!(olt_id = %result.olt_id, error = %e, "push_onus failed");
                }
            }
        }

        if let Some(pusher) = &self.pushers.telemetry {
            if let Some(telemetry) = &result.telemetry {
                if let Err(e) = pusher.push_telemetry(&result.olt_id, telemetry) {
                    warn!(olt_id = %result.olt_id, error = %e, "push_telemetry failed");
                }
            }
        }

        let batch = build_metric_batch(&result.olt_id, result.telemetry.as_ref(), &result.onus);
        if batch.is_empty() {
            return;
        }

        let Some(pusher) = &self.pushers.metrics else {
            return;
        };

        match pusher.push_metrics(&batch) {
            Ok(_) => self.drain_and_retry(pusher.as_ref()),
            Err(e) => {
                warn!(olt_id = %result.olt_id, error = %e, "push_metrics failed, buffering");
                self.buffer.add(batch);
            }
        }
    }

    /// Called after every successful metrics push: drains up to
    /// `OPPORTUNISTIC_DRAIN_SIZE` parked batches and retries them, requeuing
    /// any that fail again.
    fn drain_and_retry(&self, pusher: &dyn MetricsPusher) {
        let batches = self.buffer.drain_n(OPPORTUNISTIC_DRAIN_SIZE);
        if batches.is_empty() {
            return;
        }
        let mut failed = Vec::new();
        for batch in batches {
            match pusher.push_metrics(&batch.payload) {
                Ok(_) => info!(attempts = batch.attempts, "retried buffered batch succeeded"),
                Err(e) => {
                    warn!(error = %e, attempts = batch.attempts, "retry of buffered batch failed again");
                    failed.push(batch);
                }
            }
        }
        if !failed.is_empty() {
            self.buffer.requeue(failed);
        }
    }
}

/// Logs a poll duration outlier; split out so the scheduler/worker pool can
/// call it without pulling in the full processor.
pub fn log_slow_poll(olt_id: &OltId, duration: Duration, threshold: Duration) {
    if duration > threshold {
        error!(olt_id = %olt_id, duration_ms = duration.as_millis(), "poll took longer than expected");
    }
}
