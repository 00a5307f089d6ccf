//! The resilience buffer for failed metric batches (component C): a bounded,
//! age-evicting FIFO. `Add` always succeeds (it evicts the oldest entry on
//! overflow rather than rejecting); the eviction itself is the documented
//! side effect, not a signaled failure.
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use tracing::warn;

use crate::model::{BufferedBatch, MetricSample};

pub const DEFAULT_MAX_SIZE: usize = 1_000;
pub const DEFAULT_MAX_AGE: Duration = Duration::from_secs(15 * 60);

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BufferStats {
    pub size: usize,
    pub max_size: usize,
    pub oldest_age: Option<Duration>,
    pub total_attempts: u64,
}

pub struct RetryBuffer {
    inner: Mutex<VecDeque<BufferedBatch>>,
    max_size: usize,
    max_age: Duration,
}

impl Default for RetryBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_SIZE, DEFAULT_MAX_AGE)
    }
}

impl RetryBuffer {
    pub fn new(max_size: usize, max_age: Duration) -> Self {
        Self {
            inner: Mutex::new(VecDeque::new()),
            max_size,
            max_age,
        }
    }

    fn is_stale(&self, batch: &BufferedBatch, now: Instant) -> bool {
        batch.age(now) >= self.max_age
    }

    /// Pushes to the back. If the buffer is at capacity, the oldest entry is
    /// dropped to make room. Always succeeds.
    pub fn add(&self, payload: Vec<MetricSample>) {
        let mut guard = self.inner.lock().expect("retry buffer lock poisoned");
        if guard.len() >= self.max_size {
            guard.pop_front();
            warn!("retry buffer full, evicted oldest batch");
        }
        guard.push_back(BufferedBatch::new(payload));
    }

    /// Removes and returns up to `n` elements, oldest first, filtering out
    /// any batch whose age has exceeded `max_age` along the way. Every
    /// batch returned has its `attempts` counter incremented, since it is
    /// now being exposed to a retry.
    pub fn drain_n(&self, n: usize) -> Vec<BufferedBatch> {
        let mut guard = self.inner.lock().expect("retry buffer lock poisoned");
        let now = Instant::now();
        let mut out = Vec::with_capacity(n.min(guard.len()));
        let mut dropped = 0usize;

        while out.len() < n {
            let Some(mut batch) = guard.pop_front() else {
                break;
            };
            if self.is_stale(&batch, now) {
                dropped += 1;
                continue;
            }
            batch.attempts += 1;
            out.push(batch);
        }

        if dropped > 0 {
            warn!(dropped, "evicted stale batches during drain");
        }
        out
    }

    pub fn drain_all(&self) -> Vec<BufferedBatch> {
        let len = self.inner.lock().expect("retry buffer lock poisoned").len();
        self.drain_n(len)
    }

    /// Pushes batches back to the front (most-recently-drained first, so a
    /// retry of the whole slice preserves its original relative order),
    /// filtering stale entries again and capping total size at `max_size`
    /// by dropping the newest entries off the tail when over cap.
    pub fn requeue(&self, batches: Vec<BufferedBatch>) {
        let mut guard = self.inner.lock().expect("retry buffer lock poisoned");
        let now = Instant::now();

        for batch in batches.into_iter().rev() {
            if self.is_stale(&batch, now) {
                continue;
            }
            guard.push_front(batch);
        }

        while guard.len() > self.max_size {
            guard.pop_back();
        }
    }

    /// Removes aged entries, returns the count dropped.
    pub fn cleanup_stale(&self) -> usize {
        let mut guard = self.inner.lock().expect("retry buffer lock poisoned");
        let now = Instant::now();
        let before = guard.len();
        guard.retain(|b| !self.is_stale(b, now));
        before - guard.len()
    }

    pub fn stats(&self) -> BufferStats {
        let guard = self.inner.lock().expect("retry buffer lock poisoned");
        let now = Instant::now();
        BufferStats {
            size: guard.len(),
            max_size: self.max_size,
            oldest_age: guard.front().map(|b| b.age(now)),
            total_attempts: guard.iter().map(|b| b.attempts as u64).sum(),
        }
    }
}
