//! The scheduler (component E): single-threaded cooperative dispatch that
//! staggers the initial poll wave and then enumerates the registry on a
//! fixed tick, enqueuing any OLT that is due.
use std::time::{Duration, Instant};

use crossbeam::channel::{Sender, TrySendError};
use tracing::{debug, warn};

use crate::model::{OltState, PollJob};
use crate::registry::Registry;

pub const DEFAULT_CHECK_INTERVAL: Duration = Duration::from_secs(10);
pub const MIN_STAGGER: Duration = Duration::from_secs(1);
pub const MAX_STAGGER: Duration = Duration::from_secs(30);
const DEFAULT_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// `clamp(min(interval over all olts) / n_olts, 1s, 30s)`. An empty
/// registry has no meaningful stagger; callers skip the initial wave.
pub fn stagger_interval(states: &[OltState]) -> Option<Duration> {
    if states.is_empty() {
        return None;
    }
    let min_interval = states
        .iter()
        .map(|s| s.config.polling.effective_interval())
        .min()
        .unwrap_or(DEFAULT_INTERVAL);
    let n = states.len() as u32;
    let raw = min_interval / n.max(1);
    Some(raw.clamp(MIN_STAGGER, MAX_STAGGER))
}

pub struct Scheduler {
    registry: std::sync::Arc<Registry>,
    jobs: Sender<PollJob>,
    check_interval: Duration,
}

impl Scheduler {
    pub fn new(registry: std::sync::Arc<Registry>, jobs: Sender<PollJob>) -> Self {
        Self {
            registry,
            jobs,
            check_interval: DEFAULT_CHECK_INTERVAL,
        }
    }

    pub fn with_check_interval(mut self, interval: Duration) -> Self {
        self.check_interval = interval;
        self
    }

    fn enqueue(&self, olt_id: &crate::model::OltId) {
        match self.jobs.try_send(PollJob { olt_id: olt_id.clone() }) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                warn!(olt_id = %olt_id, "job queue full, skipping this tick");
            }
            Err(TrySendError::Disconnected(_)) => {
                debug!("job queue closed, scheduler stopping");
            }
        }
    }

    /// Emits the initial staggered wave, sleeping `stagger_interval` between
    /// each job. Runs to completion before the periodic loop starts.
    pub fn run_initial_wave(&self, sleep: impl Fn(Duration)) {
        let states = self.registry.snapshot();
        let Some(stagger) = stagger_interval(&states) else {
            return;
        };
        for state in states {
            self.enqueue(&state.config.id);
            sleep(stagger);
        }
    }

    /// One tick of the periodic loop: enqueue every due OLT. Exposed
    /// separately from `run` so tests can drive ticks deterministically.
    pub fn tick(&self, now: Instant) {
        for state in self.registry.snapshot() {
            if state.is_due(now) {
                self.enqueue(&state.config.id);
            }
        }
    }

    /// Blocks running the periodic loop until `should_stop` returns true.
    pub fn run(&self, sleep: impl Fn(Duration), should_stop: impl Fn() -> bool) {
        while !should_stop() {
            self.tick(Instant::now());
            sleep(self.check_interval);
        }
    }
}
