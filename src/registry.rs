//! The OLT state registry (component D): the single owner of every
//! `OltState`. Workers and the scheduler only ever see snapshots; the result
//! processor is the only writer of runtime fields after `replace`.
use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Instant;

use tracing::{debug, warn};

use crate::error::{PollError, RegistryError};
use crate::model::{OltConfig, OltId, OltState};

/// Outcome of one poll, as seen by `update_result`. Kept separate from
/// `PollResult` so the registry doesn't need to know about ONU/telemetry
/// payload shapes.
pub enum PollOutcome {
    Success { timestamp: Instant },
    Failure { error: PollError, now: Instant },
}

pub struct Registry {
    inner: RwLock<HashMap<OltId, OltState>>,
    max_backoff: std::time::Duration,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(HashMap::new()),
            max_backoff: crate::processor::DEFAULT_MAX_BACKOFF,
        }
    }

    pub fn with_max_backoff(max_backoff: std::time::Duration) -> Self {
        Self {
            inner: RwLock::new(HashMap::new()),
            max_backoff,
        }
    }

    /// Atomically reconciles the registry with the advertised set: insert
    /// new, update in place preserving runtime fields, drop absent. Also
    /// drops any OLT whose polling becomes disabled. Idempotent.
    pub fn replace(&self, configs: Vec<OltConfig>) {
        let mut guard = self.inner.write().expect("registry lock poisoned");

        let incoming: HashMap<OltId, OltConfig> =
            configs.into_iter().map(|c| (c.id.clone(), c)).collect();

        guard.retain(|id, _| incoming.contains_key(id));

        for (id, config) in incoming {
            if !config.polling.enabled {
                guard.remove(&id);
                continue;
            }
            match guard.remove(&id) {
                Some(existing) => {
                    guard.insert(id, existing.with_updated_config(config));
                }
                None => {
                    guard.insert(id, OltState::new(config));
                }
            }
        }
    }

    /// A lock-free-to-the-caller copy sufficient to schedule: the lock is
    /// held only for the duration of the clone, never across I/O.
    pub fn snapshot(&self) -> Vec<OltState> {
        let guard = self.inner.read().expect("registry lock poisoned");
        guard.values().cloned().collect()
    }

    pub fn get(&self, id: &OltId) -> Option<OltState> {
        let guard = self.inner.read().expect("registry lock poisoned");
        guard.get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.inner.read().expect("registry lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stamps `last_poll_at = now`. Called by a worker immediately after
    /// pulling a job, before opening any session.
    pub fn mark_polled(&self, id: &OltId, now: Instant) {
        let mut guard = self.inner.write().expect("registry lock poisoned");
        if let Some(state) = guard.get_mut(id) {
            state.last_poll_at = Some(now);
        }
    }

    /// Applied by the result processor. A result for an OLT no longer in
    /// the registry (dropped mid-flight) is discarded silently, as the
    /// registry invariant documents.
    pub fn update_result(&self, id: &OltId, outcome: PollOutcome) -> Result<(), RegistryError> {
        let mut guard = self.inner.write().expect("registry lock poisoned");
        let Some(state) = guard.get_mut(id) else {
            debug!(olt_id = %id, "discarding result for OLT no longer in registry");
            return Err(RegistryError::NotFound(id.to_string()));
        };

        match outcome {
            PollOutcome::Success { timestamp } => {
                state.last_error = None;
                state.error_count = 0;
                state.backoff_until = None;
                state.last_success_at = Some(timestamp);
            }
            PollOutcome::Failure { error, now } => {
                state.error_count = state.error_count.saturating_add(1);
                let backoff = crate::processor::compute_backoff(state.error_count, self.max_backoff);
                state.backoff_until = Some(now + backoff);
                warn!(olt_id = %id, error = %error, error_count = state.error_count, backoff_secs = backoff.as_secs(), "poll failed, backing off");
                state.last_error = Some(error.to_string());
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::olt_config::{OltProtocols, PollingPolicy, SnmpCredentials};

    fn cfg(id: &str, enabled: bool) -> OltConfig {
        OltConfig {
            id: crate::model::OltId::new(id).unwrap(),
            name: id.into(),
            vendor: "vsol".into(),
            model: "m".into(),
            address: "10.0.0.1".into(),
            protocols: OltProtocols {
                snmp: Some(SnmpCredentials::V2c {
                    community: "public".into(),
                }),
                ..Default::default()
            },
            polling: PollingPolicy {
                enabled,
                interval_seconds: Some(60),
                metric_list: vec![],
            },
            discovery: Default::default(),
        }
    }

    #[test]
    fn replace_is_idempotent() {
        let reg = Registry::new();
        reg.replace(vec![cfg("a", true), cfg("b", true)]);
        let snap1 = reg.snapshot();
        reg.replace(vec![cfg("a", true), cfg("b", true)]);
        let snap2 = reg.snapshot();
        assert_eq!(snap1.len(), snap2.len());
        assert_eq!(snap1.len(), 2);
    }

    #[test]
    fn replace_drops_absent_and_disabled() {
        let reg = Registry::new();
        reg.replace(vec![cfg("a", true), cfg("b", true)]);
        reg.replace(vec![cfg("a", true), cfg("b", false)]);
        let snap = reg.snapshot();
        assert_eq!(snap.len(), 1);
        assert_eq!(snap[0].config.id.as_str(), "a");
    }

    #[test]
    fn replace_preserves_runtime_fields() {
        let reg = Registry::new();
        reg.replace(vec![cfg("a", true)]);
        let id = crate::model::OltId::new("a").unwrap();
        let now = Instant::now();
        reg.update_result(&id, PollOutcome::Success { timestamp: now })
            .unwrap();

        reg.replace(vec![cfg("a", true)]);
        let state = reg.get(&id).unwrap();
        assert_eq!(state.last_success_at, Some(now));
    }

    #[test]
    fn update_result_for_dropped_olt_is_discarded_silently() {
        let reg = Registry::new();
        let id = crate::model::OltId::new("ghost").unwrap();
        let result = reg.update_result(&id, PollOutcome::Success { timestamp: Instant::now() });
        assert!(result.is_err());
    }
}
