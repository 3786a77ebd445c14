//! Response-time statistics
//!
//! Rates as the basic variant plus mean, min, max and standard deviation of
//! response time. Interval figures reset after every collection.

use std::fmt::Write as _;
use std::sync::Arc;

use crate::error::HarnessResult;
use crate::scheduler::Scheduler;
use crate::worker::Accumulator;

use super::basic::schedule_reports;
use super::snapshot::StatsCore;
use super::summary::{ResponseSummary, RunSummary};
use super::{fmt2, Statistics, StatisticsKind, SummaryContext};

/// Throughput with response-time figures
#[derive(Debug)]
pub struct ResponseStatistics {
    core: Arc<StatsCore>,
}

impl ResponseStatistics {
    /// Create over a shared core
    pub fn new(core: Arc<StatsCore>) -> Self {
        Self { core }
    }
}

fn response_line(core: &StatsCore) -> String {
    let collection = core.collect();
    let period = core.snap_period(collection.period);
    let mut line = core.prefix();
    let mut overall = Accumulator::new();

    if core.config().per_worker {
        line.push_str(" (");
    }
    for (worker, delta) in collection.workers.iter().zip(&collection.deltas) {
        let interval = worker.take_interval_response();
        if core.config().per_worker {
            let _ = write!(line, "{delta}");
            if !interval.is_empty() {
                let _ = write!(line, ",{}(micros)", fmt2(interval.mean()));
            }
            line.push('\t');
        }
        overall.merge(&interval);
    }
    if core.config().per_worker {
        line.push_str(") ");
    }

    let _ = write!(line, "tps={}", fmt2(collection.rate_over(period)));
    match ResponseSummary::from_accumulator(&overall) {
        Some(r) => {
            let _ = write!(
                line,
                ",avgResponse(micros)={},minResponse={},maxResponse={},stdDev={}",
                fmt2(r.mean),
                r.min,
                r.max,
                fmt2(r.std_dev)
            );
        }
        None => line.push_str(",avgResponse(micros)=N/A"),
    }
    let _ = write!(line, ",threads={}", collection.running);
    line
}

impl Statistics for ResponseStatistics {
    fn kind(&self) -> StatisticsKind {
        StatisticsKind::Response
    }

    fn start(&self, scheduler: &Scheduler) -> HarnessResult<()> {
        self.core.reset();
        for worker in self.core.workers() {
            worker.take_interval_response();
        }
        let core = Arc::clone(&self.core);
        schedule_reports(&self.core, scheduler, move || {
            let line = response_line(&core);
            core.emit(&line);
        });
        Ok(())
    }

    fn measurement_started(&self, scheduler: &Scheduler) {
        self.core.schedule_discard(scheduler, || {});
    }

    fn request_statistics(&self) -> String {
        self.core.requested(|| response_line(&self.core))
    }

    fn stop(&self) {
        self.core.cancel_tasks();
    }

    fn final_summary(&self, ctx: &SummaryContext) -> RunSummary {
        let mut summary = self.core.summarize(StatisticsKind::Response, ctx);
        let workers = self.core.workers();
        let mut overall = Accumulator::new();

        for (entry, worker) in summary.workers.iter_mut().zip(&workers) {
            let response = worker.overall_response();
            entry.response = ResponseSummary::from_accumulator(&response);
            overall.merge(&response);
        }
        summary.overall_response = ResponseSummary::from_accumulator(&overall);
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
    use std::time::Duration;
    use tokio::time::Instant;

    fn setup(per_worker: bool) -> (ResponseStatistics, Arc<FakeWorkers>) {
        let workers = Arc::new(FakeWorkers::default());
        let core = StatsCore::new(
            StatisticsConfig {
                kind: StatisticsKind::Response,
                interval: Duration::ZERO,
                per_worker,
                ..Default::default()
            },
            workers.clone(),
            Arc::new(MemorySink::new()),
            RunContext::new(),
        );
        (ResponseStatistics::new(Arc::new(core)), workers)
    }

    #[tokio::test(start_paused = true)]
    async fn test_interval_figures_reset() {
        let (stats, workers) = setup(false);
        let a = workers.add("a");
        stats.start(&Scheduler::new()).unwrap();

        for micros in [100, 200, 300] {
            a.record_response(Duration::from_micros(micros));
        }
        bump(&a, 3);
        tokio::time::advance(Duration::from_secs(1)).await;

        let line = stats.request_statistics();
        assert_eq!(
            line,
            "tps=3.00,avgResponse(micros)=200.00,minResponse=100,maxResponse=300,stdDev=100.00,threads=1"
        );

        tokio::time::advance(Duration::from_secs(1)).await;
        let line = stats.request_statistics();
        assert_eq!(line, "tps=0.00,avgResponse(micros)=N/A,threads=1");
    }

    #[tokio::test(start_paused = true)]
    async fn test_per_worker_means() {
        let (stats, workers) = setup(true);
        let a = workers.add("a");
        let b = workers.add("b");
        stats.start(&Scheduler::new()).unwrap();

        a.record_response(Duration::from_micros(50));
        bump(&a, 1);
        bump(&b, 2);
        tokio::time::advance(Duration::from_secs(1)).await;

        let line = stats.request_statistics();
        assert!(line.starts_with(" (1,50.00(micros)\t2\t) tps=3.00"), "{line}");
    }

    #[tokio::test(start_paused = true)]
    async fn test_final_summary_has_response_table() {
        let (stats, workers) = setup(false);
        let a = workers.add("a");
        let b = workers.add("b");
        a.record_response(Duration::from_micros(10));
        a.record_response(Duration::from_micros(30));
        bump(&a, 2);

        tokio::time::advance(Duration::from_secs(2)).await;
        let now = Instant::now();
        a.mark_ended(now);
        b.mark_ended(now);

        let summary = stats.final_summary(&SummaryContext {
            default_end: now,
            run_length: None,
            partial: false,
            reason: None,
        });
        assert_eq!(summary.workers[0].response.unwrap().mean, 20.0);
        assert!(summary.workers[1].response.is_none());
        assert_eq!(summary.overall_response.unwrap().count, 2);
        assert!(summary.render(false).contains("OVERALL:"));
    }
}
