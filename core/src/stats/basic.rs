//! Interval snapshot statistics

use std::fmt::Write as _;
use std::sync::Arc;

use crate::error::HarnessResult;
use crate::scheduler::Scheduler;

use super::snapshot::{Collection, StatsCore};
use super::summary::RunSummary;
use super::{fmt2, Statistics, StatisticsKind, SummaryContext};

/// Aggregate rate over each reporting interval
#[derive(Debug)]
pub struct BasicStatistics {
    core: Arc<StatsCore>,
}

impl BasicStatistics {
    /// Create over a shared core
    pub fn new(core: Arc<StatsCore>) -> Self {
        Self { core }
    }
}

/// `(d1\td2\t) ` per-Worker breakdown
pub(crate) fn per_worker_deltas(collection: &Collection) -> String {
    let mut out = String::from(" (");
    for delta in &collection.deltas {
        let _ = write!(out, "{delta}\t");
    }
    out.push_str(") ");
    out
}

/// `rate=..,total messages=..,Snapshot period=..,threads=..`
pub(crate) fn basic_line(core: &StatsCore) -> String {
    let collection = core.collect();
    let period = core.snap_period(collection.period);

    let mut line = core.prefix();
    if core.config().per_worker {
        line.push_str(&per_worker_deltas(&collection));
    }
    let _ = write!(
        line,
        "rate={},total messages={},Snapshot period={},threads={}",
        fmt2(collection.rate_over(period)),
        collection.total,
        period.as_secs(),
        collection.running
    );
    line
}

/// Schedule `report` every reporting interval, if one is configured
pub(crate) fn schedule_reports<F>(core: &Arc<StatsCore>, scheduler: &Scheduler, report: F)
where
    F: FnMut() + Send + 'static,
{
    let interval = core.config().interval;
    if interval.is_zero() {
        tracing::debug!("No statistics interval, figures on request only");
        return;
    }
    core.track(scheduler.schedule_repeating(interval, interval, report));
}

impl Statistics for BasicStatistics {
    fn kind(&self) -> StatisticsKind {
        StatisticsKind::Basic
    }

    fn start(&self, scheduler: &Scheduler) -> HarnessResult<()> {
        self.core.reset();
        let core = Arc::clone(&self.core);
        schedule_reports(&self.core, scheduler, move || {
            let line = basic_line(&core);
            core.emit(&line);
        });
        Ok(())
    }

    fn measurement_started(&self, scheduler: &Scheduler) {
        self.core.schedule_discard(scheduler, || {});
    }

    fn request_statistics(&self) -> String {
        self.core.requested(|| basic_line(&self.core))
    }

    fn stop(&self) {
        self.core.cancel_tasks();
    }

    fn final_summary(&self, ctx: &SummaryContext) -> RunSummary {
        self.core.summarize(StatisticsKind::Basic, ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StatisticsConfig;
    use crate::context::RunContext;
    use crate::sink::MemorySink;
    use crate::stats::snapshot::test_support::{bump, FakeWorkers};
    use std::time::Duration;

    fn setup(config: StatisticsConfig) -> (BasicStatistics, Arc<FakeWorkers>, Arc<MemorySink>) {
        let workers = Arc::new(FakeWorkers::default());
        let sink = Arc::new(MemorySink::new());
        let core = StatsCore::new(config, workers.clone(), sink.clone(), RunContext::new());
        (BasicStatistics::new(Arc::new(core)), workers, sink)
    }

    #[tokio::test(start_paused = true)]
    async fn test_periodic_lines() {
        let (stats, workers, sink) = setup(StatisticsConfig {
            kind: StatisticsKind::Basic,
            interval: Duration::from_secs(2),
            ..Default::default()
        });
        let a = workers.add("a");
        let b = workers.add("b");
        let scheduler = Scheduler::new();
        stats.start(&scheduler).unwrap();

        bump(&a, 30);
        bump(&b, 10);
        tokio::time::sleep(Duration::from_millis(2100)).await;
        bump(&a, 4);
        tokio::time::sleep(Duration::from_secs(2)).await;
        stats.stop();

        let lines = sink.periodic_lines();
        assert_eq!(
            lines,
            vec![
                "rate=20.00,total messages=40,Snapshot period=2,threads=2",
                "rate=2.00,total messages=4,Snapshot period=2,threads=2",
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_per_worker_breakdown_and_id() {
        let (stats, workers, _sink) = setup(StatisticsConfig {
            kind: StatisticsKind::Basic,
            interval: Duration::ZERO,
            per_worker: true,
            run_id: Some("r1".into()),
            ..Default::default()
        });
        let a = workers.add("a");
        let b = workers.add("b");
        stats.start(&Scheduler::new()).unwrap();
        bump(&a, 3);
        bump(&b, 5);
        tokio::time::advance(Duration::from_secs(1)).await;

        let line = stats.request_statistics();
        assert_eq!(
            line,
            "id=r1, (3\t5\t) rate=8.00,total messages=8,Snapshot period=1,threads=2"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_request_returns_last_periodic_line() {
        let (stats, workers, sink) = setup(StatisticsConfig {
            kind: StatisticsKind::Basic,
            interval: Duration::from_secs(2),
            ..Default::default()
        });
        let a = workers.add("a");
        stats.start(&Scheduler::new()).unwrap();

        bump(&a, 20);
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(stats.request_statistics(), "");
        bump(&a, 20);
        tokio::time::sleep(Duration::from_millis(1100)).await;
        stats.stop();

        let expected = "rate=20.00,total messages=40,Snapshot period=2,threads=1";
        assert_eq!(sink.periodic_lines(), vec![expected]);
        assert_eq!(stats.request_statistics(), expected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_interval_reports_on_request_only() {
        let (stats, workers, sink) = setup(StatisticsConfig {
            kind: StatisticsKind::Basic,
            interval: Duration::ZERO,
            ..Default::default()
        });
        let a = workers.add("a");
        stats.start(&Scheduler::new()).unwrap();
        bump(&a, 7);
        tokio::time::sleep(Duration::from_secs(30)).await;

        assert!(sink.periodic_lines().is_empty());
        assert!(stats.request_statistics().contains("total messages=7"));
    }
}
