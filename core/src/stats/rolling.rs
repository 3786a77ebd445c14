//! Rolling-window statistics
//!
//! Per-sample deltas go into a fixed ring. The reported rate is the mean over
//! the ring, and the highest such mean seen since the discard boundary is
//! the run's headline figure.

use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::error::HarnessResult;
use crate::scheduler::Scheduler;
use crate::worker::{WorkerShared, WorkerStatus};

use super::basic::schedule_reports;
use super::snapshot::StatsCore;
use super::summary::RunSummary;
use super::{fmt2, Statistics, StatisticsKind, SummaryContext};

/// Fixed-length ring of per-sample deltas
#[derive(Debug, Clone)]
pub struct RollingWindow {
    slots: Vec<u64>,
    next: usize,
    samples: u64,
    since_reset: usize,
    sample_secs: f64,
    max_full: Option<f64>,
    max_partial: Option<f64>,
}

impl RollingWindow {
    /// Ring of `len` samples taken every `sample_period`
    pub fn new(len: usize, sample_period: Duration) -> Self {
        let len = len.max(1);
        Self {
            slots: vec![0; len],
            next: 0,
            samples: 0,
            since_reset: 0,
            sample_secs: sample_period.as_secs_f64(),
            max_full: None,
            max_partial: None,
        }
    }

    /// Window length in samples
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// True before the first sample
    pub fn is_empty(&self) -> bool {
        self.samples == 0
    }

    /// Number of occupied slots
    pub fn filled(&self) -> usize {
        self.samples.min(self.slots.len() as u64) as usize
    }

    /// Sum over the occupied slots
    pub fn sum(&self) -> u64 {
        self.slots.iter().sum()
    }

    /// Add one sample
    pub fn push(&mut self, delta: u64) {
        self.slots[self.next] = delta;
        self.next = (self.next + 1) % self.slots.len();
        self.samples += 1;
        self.since_reset = (self.since_reset + 1).min(self.slots.len());

        // only windows made entirely of samples taken since the last reset
        let rate = self.recent_rate(self.since_reset);
        let max = if self.since_reset == self.slots.len() {
            &mut self.max_full
        } else {
            &mut self.max_partial
        };
        if max.map_or(true, |m| rate > m) {
            *max = Some(rate);
        }
    }

    /// Mean rate over the occupied slots, per second
    pub fn rate(&self) -> f64 {
        let filled = self.filled();
        if filled == 0 || self.sample_secs <= 0.0 {
            return 0.0;
        }
        self.sum() as f64 / filled as f64 / self.sample_secs
    }

    fn recent_rate(&self, count: usize) -> f64 {
        if count == 0 || self.sample_secs <= 0.0 {
            return 0.0;
        }
        let len = self.slots.len();
        let sum: u64 = (1..=count).map(|back| self.slots[(self.next + len - back) % len]).sum();
        sum as f64 / count as f64 / self.sample_secs
    }

    /// Highest rate over any full window; before the window first fills,
    /// the highest partial rate
    pub fn max_rate(&self) -> f64 {
        self.max_full.or(self.max_partial).unwrap_or(0.0)
    }

    /// Forget the recorded maximum
    ///
    /// The reported rate keeps using the whole ring, but a new maximum only
    /// counts samples pushed after this call.
    pub fn reset_max(&mut self) {
        self.since_reset = 0;
        self.max_full = None;
        self.max_partial = None;
    }
}

#[derive(Debug)]
struct RollingState {
    window: RollingWindow,
    per_worker_prev: Vec<u64>,
}

/// Rolling-window rate with a recorded maximum
#[derive(Debug)]
pub struct RollingStatistics {
    core: Arc<StatsCore>,
    state: Arc<Mutex<RollingState>>,
}

impl RollingStatistics {
    /// Create over a shared core
    pub fn new(core: Arc<StatsCore>) -> Self {
        let config = core.config();
        let window = RollingWindow::new(config.rolling_window, config.sample_period);
        Self {
            core,
            state: Arc::new(Mutex::new(RollingState {
                window,
                per_worker_prev: Vec::new(),
            })),
        }
    }

    fn line(&self) -> String {
        rolling_line(&self.core, &self.state)
    }
}

fn rolling_line(core: &StatsCore, state: &Mutex<RollingState>) -> String {
    let workers = core.workers();
    let mut state = state.lock();
    let mut line = core.prefix();

    if core.config().per_worker {
        line.push_str(" (");
        let mut prev = std::mem::take(&mut state.per_worker_prev);
        for (i, worker) in workers.iter().enumerate() {
            let curr = worker.iterations();
            let delta = curr.saturating_sub(prev.get(i).copied().unwrap_or(0));
            let _ = write!(line, "{delta}\t");
            if i < prev.len() {
                prev[i] = curr;
            } else {
                prev.push(curr);
            }
        }
        state.per_worker_prev = prev;
        line.push_str(") ");
    }

    let running = workers
        .iter()
        .filter(|w| w.status().state() == WorkerStatus::RUNNING)
        .count();
    let _ = write!(
        line,
        "rateR={},threads={}",
        fmt2(state.window.rate()),
        running
    );
    line
}

impl Statistics for RollingStatistics {
    fn kind(&self) -> StatisticsKind {
        StatisticsKind::Rolling
    }

    fn start(&self, scheduler: &Scheduler) -> HarnessResult<()> {
        self.core.reset();
        let period = self.core.config().sample_period;

        let core = Arc::clone(&self.core);
        let state = Arc::clone(&self.state);
        self.core
            .track(scheduler.schedule_repeating(period, period, move || {
                let collection = core.collect();
                state.lock().window.push(collection.total);
            }));

        let core = Arc::clone(&self.core);
        let state = Arc::clone(&self.state);
        schedule_reports(&self.core, scheduler, move || {
            let line = rolling_line(&core, &state);
            core.emit(&line);
        });
        Ok(())
    }

    fn measurement_started(&self, scheduler: &Scheduler) {
        let state = Arc::clone(&self.state);
        self.core.schedule_discard(scheduler, move || {
            state.lock().window.reset_max();
        });
    }

    fn request_statistics(&self) -> String {
        self.core.requested(|| self.line())
    }

    fn worker_errored(&self, worker: &WorkerShared) {
        if self.core.config().reset_rolling_max_on_error {
            tracing::info!(worker = worker.name(), "Resetting rolling maximum after worker error");
            self.state.lock().window.reset_max();
        }
    }

    fn stop(&self) {
        self.core.cancel_tasks();
    }

    fn final_summary(&self, ctx: &SummaryContext) -> RunSummary {
        let mut summary = self.core.summarize(StatisticsKind::Rolling, ctx);
        summary.max_rolling_rate = Some(self.state.lock().window.max_rate());
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StatisticsConfig;
    use crate::context::RunContext;
    use crate::sink::MemorySink;
    use crate::stats::snapshot::test_support::{bump, FakeWorkers};

    fn brute_max(samples: &[u64], n: usize) -> f64 {
        samples
            .windows(n)
            .map(|w| w.iter().sum::<u64>() as f64 / n as f64)
            .fold(f64::MIN, f64::max)
    }

    #[test]
    fn test_periodic_stream_rate() {
        let mut window = RollingWindow::new(5, Duration::from_secs(1));
        for _ in 0..20 {
            window.push(40);
        }
        assert_eq!(window.rate(), 40.0);
        assert_eq!(window.max_rate(), 40.0);
    }

    #[test]
    fn test_partial_window_averages_filled_slots() {
        let mut window = RollingWindow::new(10, Duration::from_secs(1));
        window.push(10);
        window.push(20);
        assert_eq!(window.filled(), 2);
        assert_eq!(window.rate(), 15.0);
        assert_eq!(window.max_rate(), 15.0);
    }

    #[test]
    fn test_max_matches_best_window() {
        let samples = [5u64, 9, 2, 40, 38, 1, 0, 7, 33, 12, 12, 12, 50, 3, 4, 8];
        for n in [1usize, 3, 4, 7] {
            let mut window = RollingWindow::new(n, Duration::from_secs(1));
            for s in samples {
                window.push(s);
            }
            assert!(
                (window.max_rate() - brute_max(&samples, n)).abs() < 1e-9,
                "window {n}"
            );
        }
    }

    #[test]
    fn test_sample_period_scales_rate() {
        let mut window = RollingWindow::new(2, Duration::from_millis(500));
        window.push(10);
        window.push(10);
        assert_eq!(window.rate(), 20.0);
    }

    #[test]
    fn test_reset_max() {
        let mut window = RollingWindow::new(2, Duration::from_secs(1));
        window.push(100);
        window.push(100);
        window.reset_max();
        window.push(1);
        assert_eq!(window.max_rate(), 1.0);
        assert_eq!(window.rate(), 50.5);
        window.push(1);
        assert_eq!(window.max_rate(), 1.0);
    }

    #[test]
    fn test_max_after_reset_ignores_warm_up() {
        let samples = [3u64, 8, 1, 9, 2, 2, 6];
        let mut window = RollingWindow::new(3, Duration::from_secs(1));
        for warm_up in [500u64, 400, 450, 480] {
            window.push(warm_up);
        }
        window.reset_max();
        for s in samples {
            window.push(s);
        }
        assert!((window.max_rate() - brute_max(&samples, 3)).abs() < 1e-9);
    }

    fn setup(config: StatisticsConfig) -> (Arc<RollingStatistics>, Arc<FakeWorkers>, Arc<MemorySink>) {
        let workers = Arc::new(FakeWorkers::default());
        let sink = Arc::new(MemorySink::new());
        let core = StatsCore::new(config, workers.clone(), sink.clone(), RunContext::new());
        (Arc::new(RollingStatistics::new(Arc::new(core))), workers, sink)
    }

    #[tokio::test(start_paused = true)]
    async fn test_sampled_stream_reports_rate() {
        let (stats, workers, sink) = setup(StatisticsConfig {
            kind: StatisticsKind::Rolling,
            interval: Duration::from_secs(5),
            rolling_window: 3,
            ..Default::default()
        });
        let a = workers.add("a");
        stats.start(&Scheduler::new()).unwrap();

        // 10 iterations in the middle of every second
        for _ in 0..10 {
            tokio::time::sleep(Duration::from_millis(500)).await;
            bump(&a, 10);
            tokio::time::sleep(Duration::from_millis(500)).await;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
        stats.stop();

        let lines = sink.periodic_lines();
        assert_eq!(lines.len(), 2);
        assert!(lines.iter().all(|l| l == "rateR=10.00,threads=1"), "{lines:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn test_error_reset_is_opt_in() {
        for reset in [false, true] {
            let (stats, workers, _) = setup(StatisticsConfig {
                kind: StatisticsKind::Rolling,
                rolling_window: 1,
                reset_rolling_max_on_error: reset,
                ..Default::default()
            });
            let a = workers.add("a");
            stats.state.lock().window.push(50);

            stats.worker_errored(&a);
            let max = stats.state.lock().window.max_rate();
            assert_eq!(max == 0.0, reset);
        }
    }
}
