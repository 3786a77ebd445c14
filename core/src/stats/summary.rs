//! End-of-run summary

use std::fmt::Write as _;
use std::time::Duration;

use serde::Serialize;

use crate::worker::{Accumulator, WorkerShared};

use super::{fmt2, StatisticsKind, SummaryContext};

/// Response-time figures in microseconds
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ResponseSummary {
    /// Number of timed iterations
    pub count: u64,
    /// Mean response time
    pub mean: f64,
    /// Fastest response
    pub min: u64,
    /// Slowest response
    pub max: u64,
    /// Sample standard deviation
    pub std_dev: f64,
}

impl ResponseSummary {
    /// Figures from an accumulator; `None` when it is empty
    pub fn from_accumulator(acc: &Accumulator) -> Option<Self> {
        Some(Self {
            count: acc.count(),
            mean: acc.mean(),
            min: acc.min()?,
            max: acc.max()?,
            std_dev: acc.std_dev(),
        })
    }
}

/// Final figures for one Worker
#[derive(Debug, Clone, Serialize)]
pub struct WorkerSummary {
    /// Worker name
    pub name: String,
    /// Iterations counted (after the discard window)
    pub iterations: u64,
    /// Iterations the unit reported as unsuccessful (whole run)
    pub unsuccessful: u64,
    /// Measured duration in seconds
    pub duration_secs: f64,
    /// Iterations per second over the measured duration
    pub rate: f64,
    /// Final status
    pub status: String,
    /// True if the Worker faulted
    pub errored: bool,
    /// Response times over the whole run
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<ResponseSummary>,
}

impl WorkerSummary {
    pub(crate) fn new(worker: &WorkerShared, iterations: u64, duration: Duration) -> Self {
        let ms = duration.as_millis();
        let rate = if ms == 0 {
            0.0
        } else {
            (iterations * 1000) as f64 / ms as f64
        };
        let status = worker.status();
        Self {
            name: worker.name().to_string(),
            iterations,
            unsuccessful: worker.unsuccessful(),
            duration_secs: duration.as_secs_f64(),
            rate,
            status: status.to_string(),
            errored: status.is_error(),
            response: None,
        }
    }
}

/// Final figures for a run
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    /// Statistics variant that produced the summary
    pub kind: StatisticsKind,
    /// Per-Worker figures
    pub workers: Vec<WorkerSummary>,
    /// Sum of counted iterations
    pub total_iterations: u64,
    /// Mean measured duration in seconds
    pub avg_duration_secs: f64,
    /// Sum of per-Worker rates
    pub total_rate: f64,
    /// Highest rolling-window rate (rolling variant only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_rolling_rate: Option<f64>,
    /// Response times over every Worker (response variant only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub overall_response: Option<ResponseSummary>,
    /// True when the run ended abnormally and figures may be incomplete
    pub partial: bool,
    /// True when the aggregate rate was judged invalid and zeroed
    pub rate_discarded: bool,
    /// Why the run stopped
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl RunSummary {
    /// Aggregate per-Worker figures
    pub fn from_workers(
        kind: StatisticsKind,
        workers: Vec<WorkerSummary>,
        ctx: &SummaryContext,
    ) -> Self {
        let total_iterations = workers.iter().map(|w| w.iterations).sum();
        let total_rate = workers.iter().map(|w| w.rate).sum();
        let avg_duration_secs = if workers.is_empty() {
            0.0
        } else {
            workers.iter().map(|w| w.duration_secs).sum::<f64>() / workers.len() as f64
        };

        Self {
            kind,
            workers,
            total_iterations,
            avg_duration_secs,
            total_rate,
            max_rolling_rate: None,
            overall_response: None,
            partial: ctx.partial,
            rate_discarded: false,
            reason: ctx.reason.as_ref().map(|r| r.to_string()),
        }
    }

    /// Number of Workers that faulted
    pub fn errored_workers(&self) -> usize {
        self.workers.iter().filter(|w| w.errored).count()
    }

    /// Text form handed to the report sink
    pub fn render(&self, per_worker: bool) -> String {
        let mut out = String::new();

        if self.partial {
            let reason = self.reason.as_deref().unwrap_or("unknown");
            let _ = writeln!(out, "Run ended abnormally ({reason}); figures are partial");
        }

        if self.kind == StatisticsKind::Response {
            self.render_response_table(&mut out);
        } else if per_worker {
            for w in &self.workers {
                let _ = writeln!(
                    out,
                    "{}: iterations={},duration={},rate={},status={}",
                    w.name,
                    w.iterations,
                    fmt2(w.duration_secs),
                    fmt2(w.rate),
                    w.status
                );
            }
        }

        let unsuccessful: u64 = self.workers.iter().map(|w| w.unsuccessful).sum();
        if unsuccessful > 0 {
            let _ = writeln!(out, "unsuccessfulIterations={unsuccessful}");
        }

        let _ = write!(
            out,
            "totalIterations={},avgDuration={}",
            self.total_iterations,
            fmt2(self.avg_duration_secs)
        );
        match self.max_rolling_rate {
            Some(max) => {
                let _ = write!(out, ",maxrateR={}", fmt2(max));
            }
            None => {
                let _ = write!(out, ",totalRate={}", fmt2(self.total_rate));
            }
        }
        out
    }

    fn render_response_table(&self, out: &mut String) {
        const RULE: &str = "--------------------------------------------------------------------------------|--------------------------------------------------------------------------------|";
        let pad = |s: &str| format!("{s:<20}");

        let _ = writeln!(out, "{RULE}");
        let _ = writeln!(out, "{:80}|{:^80}|", "", "ResponseTimes");
        let _ = writeln!(
            out,
            "{}{}{}{}|{}{}{}{}|",
            pad("Worker"),
            pad("Iterations"),
            pad("Duration"),
            pad("Average MsgPerSec"),
            pad("Average"),
            pad("Minimum"),
            pad("Maximum"),
            pad("Standard Deviation")
        );
        let _ = writeln!(out, "{RULE}");

        let response_cells = |r: Option<&ResponseSummary>| match r {
            Some(r) => format!(
                "{}{}{}{}",
                pad(&fmt2(r.mean)),
                pad(&r.min.to_string()),
                pad(&r.max.to_string()),
                pad(&fmt2(r.std_dev))
            ),
            None => pad("N/A").repeat(4),
        };

        for w in &self.workers {
            let _ = writeln!(
                out,
                "{}{}{}{}|{}|",
                pad(&w.name),
                pad(&w.iterations.to_string()),
                pad(&fmt2(w.duration_secs)),
                pad(&fmt2(w.rate)),
                response_cells(w.response.as_ref())
            );
        }
        let _ = writeln!(out, "{RULE}");
        let _ = writeln!(
            out,
            "{}{}{}{}|{}|",
            pad("OVERALL:"),
            pad(&self.total_iterations.to_string()),
            pad(&fmt2(self.avg_duration_secs)),
            pad(&fmt2(self.total_rate)),
            response_cells(self.overall_response.as_ref())
        );
        let _ = writeln!(out, "{RULE}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn worker(name: &str, iterations: u64, duration_secs: f64) -> WorkerSummary {
        WorkerSummary {
            name: name.into(),
            iterations,
            unsuccessful: 0,
            duration_secs,
            rate: iterations as f64 / duration_secs,
            status: "Ended".into(),
            errored: false,
            response: None,
        }
    }

    fn ctx(partial: bool) -> SummaryContext {
        SummaryContext {
            default_end: tokio::time::Instant::now(),
            run_length: None,
            partial,
            reason: None,
        }
    }

    #[test]
    fn test_totals_and_final_line() {
        let summary = RunSummary::from_workers(
            StatisticsKind::Basic,
            vec![worker("w1", 200, 8.0), worker("w2", 200, 8.0)],
            &ctx(false),
        );
        assert_eq!(summary.total_iterations, 400);
        assert_eq!(summary.total_rate, 50.0);
        assert_eq!(
            summary.render(false),
            "totalIterations=400,avgDuration=8.00,totalRate=50.00"
        );
    }

    #[test]
    fn test_rolling_reports_max_rate() {
        let mut summary = RunSummary::from_workers(
            StatisticsKind::Rolling,
            vec![worker("w1", 100, 10.0)],
            &ctx(false),
        );
        summary.max_rolling_rate = Some(12.5);
        assert!(summary.render(false).ends_with(",maxrateR=12.50"));
    }

    #[test]
    fn test_partial_is_marked() {
        let summary =
            RunSummary::from_workers(StatisticsKind::Basic, vec![worker("w1", 5, 1.0)], &ctx(true));
        let text = summary.render(true);
        assert!(text.starts_with("Run ended abnormally"));
        assert!(text.contains("w1: iterations=5"));
    }

    #[test]
    fn test_response_table_has_overall_row() {
        let mut w = worker("w1", 10, 2.0);
        w.response = Some(ResponseSummary {
            count: 10,
            mean: 150.0,
            min: 100,
            max: 200,
            std_dev: 30.0,
        });
        let summary = RunSummary::from_workers(StatisticsKind::Response, vec![w], &ctx(false));
        let text = summary.render(false);
        assert!(text.contains("ResponseTimes"));
        assert!(text.contains("OVERALL:"));
        assert!(text.contains("150.00"));
    }

    #[test]
    fn test_empty_accumulator_has_no_summary() {
        assert!(ResponseSummary::from_accumulator(&Accumulator::new()).is_none());
    }
}
