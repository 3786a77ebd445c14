//! Worker counters and response-time accumulators
//!
//! `WorkerShared` is the part of a Worker visible to other tasks. The
//! iteration counter is written only by the owning Worker; readers may see a
//! slightly stale value but never a decreasing one.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::futures::Notified;
use tokio::sync::{watch, Notify};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::status::WorkerStatus;

/// Online response-time statistics in microseconds
///
/// Uses Welford's single-pass update for the variance.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct Accumulator {
    count: u64,
    min: u64,
    max: u64,
    total: u64,
    mean: f64,
    m2: f64,
}

impl Accumulator {
    /// Empty accumulator
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold in one sample
    pub fn record(&mut self, micros: u64) {
        if self.count == 0 || micros < self.min {
            self.min = micros;
        }
        if micros > self.max {
            self.max = micros;
        }
        self.count += 1;
        self.total = self.total.saturating_add(micros);

        let x = micros as f64;
        let delta = x - self.mean;
        self.mean += delta / self.count as f64;
        self.m2 += delta * (x - self.mean);
    }

    /// Combine with another accumulator (Chan's parallel update)
    pub fn merge(&mut self, other: &Accumulator) {
        if other.count == 0 {
            return;
        }
        if self.count == 0 {
            *self = *other;
            return;
        }
        let n_a = self.count as f64;
        let n_b = other.count as f64;
        let n = n_a + n_b;
        let delta = other.mean - self.mean;

        self.mean += delta * n_b / n;
        self.m2 += other.m2 + delta * delta * n_a * n_b / n;
        self.count += other.count;
        self.total = self.total.saturating_add(other.total);
        self.min = self.min.min(other.min);
        self.max = self.max.max(other.max);
    }

    /// Number of samples
    pub fn count(&self) -> u64 {
        self.count
    }

    /// True when nothing was recorded
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Smallest sample
    pub fn min(&self) -> Option<u64> {
        (self.count > 0).then_some(self.min)
    }

    /// Largest sample
    pub fn max(&self) -> Option<u64> {
        (self.count > 0).then_some(self.max)
    }

    /// Sum of samples
    pub fn total(&self) -> u64 {
        self.total
    }

    /// Mean sample (0 when empty)
    pub fn mean(&self) -> f64 {
        self.mean
    }

    /// Sample standard deviation (0 with fewer than two samples)
    pub fn std_dev(&self) -> f64 {
        if self.count > 1 {
            (self.m2 / (self.count - 1) as f64).sqrt()
        } else {
            0.0
        }
    }
}

#[derive(Debug, Default)]
struct ResponseTimes {
    interval: Accumulator,
    overall: Accumulator,
}

#[derive(Debug, Default)]
struct Timestamps {
    started: Option<Instant>,
    ended: Option<Instant>,
}

/// State of one Worker shared with the Controller and statistics
pub struct WorkerShared {
    id: usize,
    name: String,
    status: watch::Sender<WorkerStatus>,
    pool_changes: Arc<watch::Sender<u64>>,
    token: CancellationToken,
    wake: Notify,
    rate_wake: Notify,
    iterations: AtomicU64,
    unsuccessful: AtomicU64,
    rate_bits: AtomicU64,
    rate_updated: AtomicBool,
    response: Mutex<ResponseTimes>,
    times: Mutex<Timestamps>,
}

impl WorkerShared {
    pub(crate) fn new(
        id: usize,
        name: String,
        rate: f64,
        token: CancellationToken,
        pool_changes: Arc<watch::Sender<u64>>,
    ) -> Self {
        let (status, _) = watch::channel(WorkerStatus::CREATED);
        Self {
            id,
            name,
            status,
            pool_changes,
            token,
            wake: Notify::new(),
            rate_wake: Notify::new(),
            iterations: AtomicU64::new(0),
            unsuccessful: AtomicU64::new(0),
            rate_bits: AtomicU64::new(rate.to_bits()),
            rate_updated: AtomicBool::new(false),
            response: Mutex::new(ResponseTimes::default()),
            times: Mutex::new(Timestamps::default()),
        }
    }

    /// Worker id
    pub fn id(&self) -> usize {
        self.id
    }

    /// Worker name
    pub fn name(&self) -> &str {
        &self.name
    }

    // ------------------------------------------------------------------
    // Status
    // ------------------------------------------------------------------

    /// Current status
    pub fn status(&self) -> WorkerStatus {
        *self.status.borrow()
    }

    /// Receiver that observes every status change
    pub fn subscribe_status(&self) -> watch::Receiver<WorkerStatus> {
        self.status.subscribe()
    }

    pub(crate) fn advance(&self, next: WorkerStatus) {
        let changed = self.status.send_if_modified(|status| {
            let advanced = status.advance(next);
            let changed = advanced != *status;
            *status = advanced;
            changed
        });
        if changed {
            tracing::debug!(worker = %self.name, status = %self.status(), "Worker status changed");
            self.pool_changes.send_modify(|n| *n = n.wrapping_add(1));
        }
    }

    pub(crate) fn mark_error(&self) {
        self.status.send_modify(|status| *status = status.with_error());
        self.pool_changes.send_modify(|n| *n = n.wrapping_add(1));
    }

    // ------------------------------------------------------------------
    // Shutdown
    // ------------------------------------------------------------------

    /// Ask this Worker to stop
    pub fn signal_shutdown(&self) {
        self.token.cancel();
        self.wake.notify_waiters();
    }

    /// True once shutdown was signalled to this Worker
    pub fn is_shutdown_signalled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub(crate) fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub(crate) fn wake(&self) -> &Notify {
        &self.wake
    }

    // ------------------------------------------------------------------
    // Counters
    // ------------------------------------------------------------------

    /// Iterations completed
    pub fn iterations(&self) -> u64 {
        self.iterations.load(Ordering::Acquire)
    }

    /// Iterations whose unit reported failure
    pub fn unsuccessful(&self) -> u64 {
        self.unsuccessful.load(Ordering::Relaxed)
    }

    /// Count one iteration; only the owning Worker calls this
    pub(crate) fn record_iteration(&self, successful: bool) {
        if !successful {
            self.unsuccessful.fetch_add(1, Ordering::Relaxed);
        }
        let next = self.iterations.load(Ordering::Relaxed) + 1;
        self.iterations.store(next, Ordering::Release);
    }

    // ------------------------------------------------------------------
    // Rate
    // ------------------------------------------------------------------

    /// Per-Worker target rate
    pub fn rate(&self) -> f64 {
        f64::from_bits(self.rate_bits.load(Ordering::Acquire))
    }

    /// Change the target rate
    ///
    /// A Worker sleeping between iterations re-paces at once; otherwise the
    /// rate applies at its next pacing decision.
    pub fn set_rate(&self, rate: f64) {
        self.rate_bits.store(rate.to_bits(), Ordering::Release);
        self.rate_updated.store(true, Ordering::Release);
        self.rate_wake.notify_waiters();
    }

    pub(crate) fn rate_changed(&self) -> Notified<'_> {
        self.rate_wake.notified()
    }

    pub(crate) fn take_rate_update(&self) -> Option<f64> {
        self.rate_updated
            .swap(false, Ordering::AcqRel)
            .then(|| self.rate())
    }

    // ------------------------------------------------------------------
    // Response times
    // ------------------------------------------------------------------

    pub(crate) fn record_response(&self, elapsed: Duration) {
        let micros = u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX);
        let mut response = self.response.lock();
        response.interval.record(micros);
        response.overall.record(micros);
    }

    /// Take and reset the response times gathered since the last call
    pub fn take_interval_response(&self) -> Accumulator {
        std::mem::take(&mut self.response.lock().interval)
    }

    /// Response times over the whole run
    pub fn overall_response(&self) -> Accumulator {
        self.response.lock().overall
    }

    // ------------------------------------------------------------------
    // Timestamps
    // ------------------------------------------------------------------

    /// When the pacing loop started
    pub fn started_at(&self) -> Option<Instant> {
        self.times.lock().started
    }

    /// When the Worker ended
    pub fn ended_at(&self) -> Option<Instant> {
        self.times.lock().ended
    }

    pub(crate) fn mark_started(&self, at: Instant) {
        self.times.lock().started.get_or_insert(at);
    }

    pub(crate) fn mark_ended(&self, at: Instant) {
        self.times.lock().ended.get_or_insert(at);
        self.advance(WorkerStatus::ENDED);
    }
}

impl std::fmt::Debug for WorkerShared {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerShared")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("status", &self.status())
            .field("iterations", &self.iterations())
            .field("rate", &self.rate())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shared() -> WorkerShared {
        let (changes, _) = watch::channel(0);
        WorkerShared::new(
            1,
            "test1".into(),
            10.0,
            CancellationToken::new(),
            Arc::new(changes),
        )
    }

    #[test]
    fn test_accumulator_basic() {
        let mut acc = Accumulator::new();
        for v in [2, 4, 4, 4, 5, 5, 7, 9] {
            acc.record(v);
        }
        assert_eq!(acc.count(), 8);
        assert_eq!(acc.min(), Some(2));
        assert_eq!(acc.max(), Some(9));
        assert_eq!(acc.total(), 40);
        assert!((acc.mean() - 5.0).abs() < 1e-12);
        // sample variance 32 / 7
        assert!((acc.std_dev() - (32.0f64 / 7.0).sqrt()).abs() < 1e-12);
    }

    #[test]
    fn test_accumulator_single_sample() {
        let mut acc = Accumulator::new();
        assert_eq!(acc.min(), None);
        acc.record(42);
        assert_eq!(acc.std_dev(), 0.0);
        assert_eq!(acc.min(), Some(42));
    }

    #[test]
    fn test_accumulator_merge_matches_sequential() {
        let values = [10u64, 20, 35, 1, 99, 50, 50, 7];
        let mut whole = Accumulator::new();
        let mut left = Accumulator::new();
        let mut right = Accumulator::new();
        for (i, v) in values.iter().enumerate() {
            whole.record(*v);
            if i < 3 {
                left.record(*v);
            } else {
                right.record(*v);
            }
        }
        left.merge(&right);

        assert_eq!(left.count(), whole.count());
        assert_eq!(left.min(), whole.min());
        assert_eq!(left.max(), whole.max());
        assert!((left.mean() - whole.mean()).abs() < 1e-9);
        assert!((left.std_dev() - whole.std_dev()).abs() < 1e-9);
    }

    #[test]
    fn test_accumulator_stable_with_large_offset() {
        let mut acc = Accumulator::new();
        for v in [1_000_000_004u64, 1_000_000_007, 1_000_000_013, 1_000_000_016] {
            acc.record(v);
        }
        assert!((acc.std_dev() - 30f64.sqrt()).abs() < 1e-6);
    }

    #[test]
    fn test_rate_update_flag() {
        let worker = shared();
        assert_eq!(worker.take_rate_update(), None);
        worker.set_rate(25.0);
        assert_eq!(worker.take_rate_update(), Some(25.0));
        assert_eq!(worker.take_rate_update(), None);
        assert_eq!(worker.rate(), 25.0);
    }

    #[test]
    fn test_interval_response_resets() {
        let worker = shared();
        worker.record_response(Duration::from_micros(100));
        worker.record_response(Duration::from_micros(300));

        let interval = worker.take_interval_response();
        assert_eq!(interval.count(), 2);
        assert!(worker.take_interval_response().is_empty());
        assert_eq!(worker.overall_response().count(), 2);
    }

    #[test]
    fn test_iterations_and_unsuccessful() {
        let worker = shared();
        worker.record_iteration(true);
        worker.record_iteration(false);
        worker.record_iteration(true);
        assert_eq!(worker.iterations(), 3);
        assert_eq!(worker.unsuccessful(), 1);
    }

    #[test]
    fn test_mark_ended_keeps_first_time() {
        let worker = shared();
        let first = Instant::now();
        worker.mark_ended(first);
        worker.mark_ended(first + Duration::from_secs(1));
        assert_eq!(worker.ended_at(), Some(first));
        assert!(worker.status().is_ended());
    }
}
