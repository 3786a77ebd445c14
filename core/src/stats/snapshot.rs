//! Iteration snapshots shared by every statistics variant

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;

use crate::config::{StatisticsConfig, TimingMode};
use crate::context::RunContext;
use crate::scheduler::{Scheduler, TaskHandle};
use crate::sink::ReportSink;
use crate::worker::{WorkerShared, WorkerStatus};

use super::summary::{RunSummary, WorkerSummary};
use super::{StatisticsKind, SummaryContext};

/// Read access to the Workers being measured
///
/// The returned order must be stable: new Workers are only appended.
pub trait WorkerSource: Send + Sync {
    /// Current Workers in registration order
    fn workers(&self) -> Vec<Arc<WorkerShared>>;
}

#[derive(Debug)]
struct Snapshot {
    prev: Vec<u64>,
    curr: Vec<u64>,
    prev_time: Instant,
    curr_time: Instant,
}

/// Counters captured at the end of the discard window
#[derive(Debug, Clone)]
pub struct Baseline {
    /// When the window ended
    pub at: Instant,
    /// Iteration counts at that moment, by Worker position
    pub iterations: Vec<u64>,
}

/// One sample: per-Worker deltas since the previous sample
#[derive(Debug, Clone)]
pub struct Collection {
    /// Iterations per Worker since the previous sample
    pub deltas: Vec<u64>,
    /// Sum of `deltas`
    pub total: u64,
    /// Time since the previous sample
    pub period: Duration,
    /// Workers currently Running
    pub running: usize,
    /// The sampled Workers, in the same order as `deltas`
    pub workers: Vec<Arc<WorkerShared>>,
}

impl Collection {
    /// Aggregate rate in iterations per second over `period`
    pub fn rate_over(&self, period: Duration) -> f64 {
        let ms = period.as_millis();
        if ms == 0 {
            0.0
        } else {
            (self.total * 1000) as f64 / ms as f64
        }
    }
}

/// State common to every statistics variant
pub struct StatsCore {
    config: StatisticsConfig,
    source: Arc<dyn WorkerSource>,
    sink: Arc<dyn ReportSink>,
    run: RunContext,
    snapshot: Mutex<Snapshot>,
    baseline: Mutex<Option<Baseline>>,
    last_line: Mutex<String>,
    tasks: Mutex<Vec<TaskHandle>>,
}

impl StatsCore {
    /// Create a core reading from `source` and writing to `sink`
    pub fn new(
        config: StatisticsConfig,
        source: Arc<dyn WorkerSource>,
        sink: Arc<dyn ReportSink>,
        run: RunContext,
    ) -> Self {
        let now = Instant::now();
        Self {
            config,
            source,
            sink,
            run,
            snapshot: Mutex::new(Snapshot {
                prev: Vec::new(),
                curr: Vec::new(),
                prev_time: now,
                curr_time: now,
            }),
            baseline: Mutex::new(None),
            last_line: Mutex::new(String::new()),
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Statistics settings
    pub fn config(&self) -> &StatisticsConfig {
        &self.config
    }

    /// Workers being measured
    pub fn workers(&self) -> Vec<Arc<WorkerShared>> {
        self.source.workers()
    }

    /// Forward a periodic line to the sink
    pub fn emit(&self, line: &str) {
        self.sink.periodic(line);
        *self.last_line.lock() = line.to_string();
    }

    /// Figures for an on-demand request
    ///
    /// With a reporting interval this is the last periodic line (empty before
    /// the first one), so a request never takes deltas away from the next
    /// periodic sample. Without an interval `sample` is taken now.
    pub fn requested<F>(&self, sample: F) -> String
    where
        F: FnOnce() -> String,
    {
        if self.config.interval.is_zero() {
            sample()
        } else {
            self.last_line.lock().clone()
        }
    }

    /// `id=..,` prefix when a run id is configured
    pub fn prefix(&self) -> String {
        match self.config.run_id.as_deref() {
            Some(id) if !id.is_empty() => format!("id={id},"),
            _ => String::new(),
        }
    }

    /// Restart the sampling clock; the next sample covers everything since now
    pub fn reset(&self) {
        let now = Instant::now();
        let mut snapshot = self.snapshot.lock();
        snapshot.prev_time = now;
        snapshot.curr_time = now;
    }

    /// Take a sample
    ///
    /// Workers added since the previous sample contribute their absolute
    /// count.
    pub fn collect(&self) -> Collection {
        let workers = self.source.workers();
        let now = Instant::now();
        let mut snapshot = self.snapshot.lock();

        let curr: Vec<u64> = workers.iter().map(|w| w.iterations()).collect();
        snapshot.prev = std::mem::replace(&mut snapshot.curr, curr);
        snapshot.prev_time = snapshot.curr_time;
        snapshot.curr_time = now;

        let deltas: Vec<u64> = snapshot
            .curr
            .iter()
            .enumerate()
            .map(|(i, c)| c.saturating_sub(snapshot.prev.get(i).copied().unwrap_or(0)))
            .collect();
        let total = deltas.iter().sum();
        let period = snapshot.curr_time.saturating_duration_since(snapshot.prev_time);
        drop(snapshot);

        let running = workers
            .iter()
            .filter(|w| w.status().state() == WorkerStatus::RUNNING)
            .count();

        Collection {
            deltas,
            total,
            period,
            running,
            workers,
        }
    }

    /// The reporting period to display
    ///
    /// Within 0.5% of the configured interval the interval itself is used, so
    /// timer jitter does not show up in the rates.
    pub fn snap_period(&self, period: Duration) -> Duration {
        let interval = self.config.interval;
        if interval.is_zero() {
            return period;
        }
        let diff = if period > interval {
            period - interval
        } else {
            interval - period
        }
        .as_micros();
        if diff * 1000 / interval.as_micros().max(1) < 5 {
            interval
        } else {
            period
        }
    }

    /// Schedule the end of the discard window
    ///
    /// `on_boundary` runs right after the baseline is captured.
    pub fn schedule_discard<F>(self: &Arc<Self>, scheduler: &Scheduler, on_boundary: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let discard = self.config.discard;
        if discard.is_zero() {
            tracing::info!("Collecting rate data from the beginning of the run");
            return;
        }
        let core = Arc::clone(self);
        let handle = scheduler.schedule_once(discard, move || {
            core.capture_baseline();
            on_boundary();
            tracing::info!("Warm-up period ended, rate data collection starts");
        });
        self.track(handle);
    }

    /// Record the counters subtracted from end-of-run totals
    pub fn capture_baseline(&self) {
        let iterations = self.source.workers().iter().map(|w| w.iterations()).collect();
        *self.baseline.lock() = Some(Baseline {
            at: Instant::now(),
            iterations,
        });
    }

    /// Baseline captured at the discard boundary, if reached
    pub fn baseline(&self) -> Option<Baseline> {
        self.baseline.lock().clone()
    }

    /// Keep a scheduled task so `cancel_tasks` can stop it
    pub fn track(&self, handle: TaskHandle) {
        self.tasks.lock().push(handle);
    }

    /// Cancel every tracked task
    pub fn cancel_tasks(&self) {
        for handle in self.tasks.lock().drain(..) {
            handle.cancel();
        }
    }

    /// Per-Worker figures for the end-of-run summary
    pub fn worker_summaries(&self, ctx: &SummaryContext) -> Vec<WorkerSummary> {
        let baseline = self.baseline();
        let launched = self.run.launched_at();

        self.source
            .workers()
            .iter()
            .enumerate()
            .map(|(index, worker)| {
                let end = worker.ended_at().unwrap_or(ctx.default_end);
                let start = match self.config.timing {
                    TimingMode::TimeToLastFire => Some(launched),
                    TimingMode::Normal => match (&baseline, worker.started_at()) {
                        (Some(b), Some(started)) => Some(b.at.max(started)),
                        (_, started) => started,
                    },
                };

                let discarded = baseline
                    .as_ref()
                    .and_then(|b| b.iterations.get(index).copied())
                    .unwrap_or(0);
                let iterations = worker.iterations().saturating_sub(discarded);
                let duration = start
                    .map(|s| end.saturating_duration_since(s))
                    .unwrap_or(Duration::ZERO);

                WorkerSummary::new(worker, iterations, duration)
            })
            .collect()
    }

    /// Summary built from [`worker_summaries`](Self::worker_summaries)
    pub fn summarize(&self, kind: StatisticsKind, ctx: &SummaryContext) -> RunSummary {
        RunSummary::from_workers(kind, self.worker_summaries(ctx), ctx)
    }
}

impl std::fmt::Debug for StatsCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatsCore")
            .field("kind", &self.config.kind)
            .field("interval", &self.config.interval)
            .field("discard", &self.config.discard)
            .finish()
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use parking_lot::RwLock;
    use tokio::sync::watch;
    use tokio_util::sync::CancellationToken;

    /// Workers driven by hand
    #[derive(Default)]
    pub(crate) struct FakeWorkers {
        workers: RwLock<Vec<Arc<WorkerShared>>>,
    }

    impl FakeWorkers {
        pub(crate) fn add(&self, name: &str) -> Arc<WorkerShared> {
            let id = self.workers.read().len() + 1;
            let worker = Arc::new(WorkerShared::new(
                id,
                name.to_string(),
                0.0,
                CancellationToken::new(),
                Arc::new(watch::channel(0).0),
            ));
            worker.mark_started(Instant::now());
            worker.advance(WorkerStatus::RUNNING);
            self.workers.write().push(Arc::clone(&worker));
            worker
        }
    }

    impl WorkerSource for FakeWorkers {
        fn workers(&self) -> Vec<Arc<WorkerShared>> {
            self.workers.read().clone()
        }
    }

    pub(crate) fn bump(worker: &WorkerShared, n: u64) {
        for _ in 0..n {
            worker.record_iteration(true);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::{bump, FakeWorkers};
    use super::*;
    use crate::sink::MemorySink;

    fn core_with(config: StatisticsConfig) -> (Arc<StatsCore>, Arc<FakeWorkers>) {
        let workers = Arc::new(FakeWorkers::default());
        let core = Arc::new(StatsCore::new(
            config,
            workers.clone(),
            Arc::new(MemorySink::new()),
            RunContext::new(),
        ));
        (core, workers)
    }

    fn ctx() -> SummaryContext {
        SummaryContext {
            default_end: Instant::now(),
            run_length: None,
            partial: false,
            reason: None,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_sum_of_deltas_matches_totals() {
        let (core, workers) = core_with(StatisticsConfig::default());
        let a = workers.add("a");
        let mut collected = 0;

        for tick in 0..20u64 {
            bump(&a, tick % 7);
            if tick == 5 {
                // a Worker joining mid-run contributes its absolute count
                let b = workers.add("b");
                bump(&b, 11);
            }
            if let Some(b) = workers.workers().get(1) {
                bump(b, 3);
            }
            tokio::time::advance(Duration::from_secs(1)).await;
            collected += core.collect().total;
        }

        let totals: u64 = workers.workers().iter().map(|w| w.iterations()).sum();
        assert_eq!(collected, totals);
    }

    #[tokio::test(start_paused = true)]
    async fn test_collect_reports_period_and_running() {
        let (core, workers) = core_with(StatisticsConfig::default());
        let a = workers.add("a");
        workers.add("b");
        core.reset();

        bump(&a, 30);
        tokio::time::advance(Duration::from_secs(3)).await;
        let collection = core.collect();

        assert_eq!(collection.deltas, vec![30, 0]);
        assert_eq!(collection.period, Duration::from_secs(3));
        assert_eq!(collection.running, 2);
        assert_eq!(collection.rate_over(collection.period), 10.0);
    }

    #[test]
    fn test_snap_period_within_half_percent() {
        let (core, _) = core_with(StatisticsConfig {
            interval: Duration::from_secs(10),
            ..Default::default()
        });
        assert_eq!(
            core.snap_period(Duration::from_millis(10_040)),
            Duration::from_secs(10)
        );
        assert_eq!(
            core.snap_period(Duration::from_millis(9_960)),
            Duration::from_secs(10)
        );
        assert_eq!(
            core.snap_period(Duration::from_millis(10_060)),
            Duration::from_millis(10_060)
        );
    }

    #[test]
    fn test_prefix_from_run_id() {
        let (core, _) = core_with(StatisticsConfig {
            run_id: Some("run7".into()),
            ..Default::default()
        });
        assert_eq!(core.prefix(), "id=run7,");
    }

    #[tokio::test(start_paused = true)]
    async fn test_discard_baseline_is_subtracted() {
        let config = StatisticsConfig {
            discard: Duration::from_secs(2),
            ..Default::default()
        };
        let (core, workers) = core_with(config);
        let a = workers.add("a");
        let scheduler = Scheduler::new();
        core.schedule_discard(&scheduler, || {});

        // one iteration every 100ms, deterministic
        for _ in 0..50 {
            tokio::time::sleep(Duration::from_millis(100)).await;
            bump(&a, 1);
        }
        a.mark_ended(Instant::now());

        let baseline = core.baseline().unwrap();
        let summary = core.worker_summaries(&ctx());
        let done_by_discard = baseline.iterations[0];

        assert!((19..=20).contains(&done_by_discard));
        assert_eq!(summary[0].iterations, 50 - done_by_discard);
        assert!((summary[0].duration_secs - 3.0).abs() < 1e-6);
    }

    #[tokio::test(start_paused = true)]
    async fn test_time_to_last_fire_measures_from_launch() {
        for (timing, expected) in [(TimingMode::Normal, 5.0), (TimingMode::TimeToLastFire, 8.0)] {
            let (core, workers) = core_with(StatisticsConfig {
                timing,
                ..Default::default()
            });
            // setup overhead before the Worker starts
            tokio::time::advance(Duration::from_secs(3)).await;
            let a = workers.add("a");
            bump(&a, 40);
            tokio::time::advance(Duration::from_secs(5)).await;
            a.mark_ended(Instant::now());

            let summary = core.worker_summaries(&ctx());
            assert!((summary[0].duration_secs - expected).abs() < 1e-6, "{timing:?}");
            assert!((summary[0].rate - 40.0 / expected).abs() < 1e-6, "{timing:?}");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_worker_starting_after_boundary_uses_own_start() {
        let config = StatisticsConfig {
            discard: Duration::from_secs(1),
            ..Default::default()
        };
        let (core, workers) = core_with(config);
        workers.add("early");
        core.capture_baseline();

        tokio::time::advance(Duration::from_secs(2)).await;
        let late = workers.add("late");
        bump(&late, 10);
        tokio::time::advance(Duration::from_secs(5)).await;
        late.mark_ended(Instant::now());

        let summary = core.worker_summaries(&ctx());
        assert_eq!(summary[1].iterations, 10);
        assert!((summary[1].duration_secs - 5.0).abs() < 1e-6);
        assert!((summary[1].rate - 2.0).abs() < 1e-6);
    }
}
