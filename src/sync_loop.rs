//! The config sync loop (component I): two independent tickers sharing one
//! control-plane client and the registry. Both honor rotation signals
//! raised by the client's own request handling.
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use tracing::{debug, info, warn};

use crate::control_plane::client::{ControlPlaneClient, HeartbeatRequest};
use crate::model::NodeId;
use crate::registry::Registry;

pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
pub const DEFAULT_CONFIG_SYNC_INTERVAL: Duration = Duration::from_secs(5 * 60);

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// Shared stop flag: set by the signal handler, polled by both tickers.
#[derive(Default)]
pub struct ShutdownFlag(AtomicBool);

impl ShutdownFlag {
    pub fn requested(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub fn request(&self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

pub struct SyncLoop {
    client: Arc<ControlPlaneClient>,
    registry: Arc<Registry>,
    node_id: NodeId,
    heartbeat_interval: Duration,
    config_sync_interval: Duration,
}

impl SyncLoop {
    pub fn new(client: Arc<ControlPlaneClient>, registry: Arc<Registry>, node_id: NodeId) -> Self {
        Self {
            client,
            registry,
            node_id,
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            config_sync_interval: DEFAULT_CONFIG_SYNC_INTERVAL,
        }
    }

    pub fn with_intervals(mut self, heartbeat: Duration, config_sync: Duration) -> Self {
        self.heartbeat_interval = heartbeat;
        self.config_sync_interval = config_sync;
        self
    }

    pub fn heartbeat_once(&self) {
        let req = HeartbeatRequest {
            node_id: self.node_id.as_str().to_string(),
            timestamp: now_ms(),
            vpp_status: "running".into(),
        };
        match self.client.heartbeat(&req) {
            Ok(resp) => {
                debug!(acknowledged = resp.acknowledged, "heartbeat ok");
                if self.client.rotation_state().needs_rotation() {
                    self.maybe_rotate();
                }
            }
            Err(e) => warn!(error = %e, "heartbeat failed"),
        }
    }

    pub fn config_sync_once(&self) {
        match self.client.get_olt_config(&self.node_id) {
            Ok(resp) => {
                info!(version = resp.version, olt_count = resp.olts.len(), "config sync");
                self.registry.replace(resp.olts);
                if self.client.rotation_state().needs_rotation() {
                    self.maybe_rotate();
                }
            }
            Err(e) => warn!(error = %e, "config sync failed"),
        }
    }

    fn maybe_rotate(&self) {
        match self.client.rotate_agent_key() {
            Ok(resp) if resp.success => info!("agent key rotated"),
            Ok(_) => warn!("rotation request rejected by control plane"),
            Err(e) => warn!(error = %e, "key rotation failed, will retry on the next boundary"),
        }
    }

    /// Drives both tickers from a single thread using a coarse common tick,
    /// matching the teacher's single-event-loop habit. `tick_granularity`
    /// should be small relative to both intervals (tests use milliseconds).
    pub fn run(&self, shutdown: &ShutdownFlag, tick_granularity: Duration, sleep: impl Fn(Duration)) {
        let mut last_heartbeat = Instant::now() - self.heartbeat_interval;
        let mut last_config_sync = Instant::now() - self.config_sync_interval;

        while !shutdown.requested() {
            let now = Instant::now();
            if now.duration_since(last_heartbeat) >= self.heartbeat_interval {
                self.heartbeat_once();
                last_heartbeat = now;
            }
            if now.duration_since(last_config_sync) >= self.config_sync_interval {
                self.config_sync_once();
                last_config_sync = now;
            }
            sleep(tick_granularity);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shutdown_flag_starts_clear_and_latches() {
        let flag = ShutdownFlag::default();
        assert!(!flag.requested());
        flag.request();
        assert!(flag.requested());
    }
}
