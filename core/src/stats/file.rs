//! File-logging statistics
//!
//! Computes rates as the basic variant and appends timestamped CSV rows:
//!
//! ```text
//! 2026/10/18,14:03:11,Threads,4,MsgRate,100.00,IndThreads,250,250,250,250
//! 2026/10/18,14:03:21,Summary,Threads,4,MsgRate,100.00,Iterations,800,AvgDuration,8.00,msgsize,1024
//! ```

use std::fs::{File, OpenOptions};
use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{HarnessError, HarnessResult};
use crate::scheduler::Scheduler;

use super::basic::schedule_reports;
use super::snapshot::StatsCore;
use super::summary::RunSummary;
use super::{fmt2, Statistics, StatisticsKind, SummaryContext};

/// Fraction of the expected measured duration a run must reach for its
/// aggregate rate to be persisted
const MIN_DURATION_FRACTION: f64 = 0.9;

type CsvWriter = csv::Writer<File>;

/// Basic rates persisted as CSV rows
pub struct FileStatistics {
    core: Arc<StatsCore>,
    path: PathBuf,
    writer: Arc<Mutex<CsvWriter>>,
}

fn timestamp() -> (String, String) {
    let now = chrono::Local::now();
    (
        now.format("%Y/%m/%d").to_string(),
        now.format("%H:%M:%S").to_string(),
    )
}

fn write_row(writer: &Mutex<CsvWriter>, row: &[String]) -> HarnessResult<()> {
    let mut writer = writer.lock();
    writer.write_record(row)?;
    writer.flush()?;
    Ok(())
}

fn interval_row(core: &StatsCore) -> Vec<String> {
    let collection = core.collect();
    let period = core.snap_period(collection.period);
    let (date, time) = timestamp();

    let mut row = vec![date, time];
    if let Some(id) = core.config().run_id.as_deref() {
        row.push(format!("id={id}"));
    }
    row.extend([
        "Threads".to_string(),
        collection.running.to_string(),
        "MsgRate".to_string(),
        fmt2(collection.rate_over(period)),
    ]);
    if core.config().per_worker {
        row.push("IndThreads".to_string());
        row.extend(collection.deltas.iter().map(|d| d.to_string()));
    }
    row
}

impl FileStatistics {
    /// Create over a shared core, opening the CSV file for appending
    pub fn new(core: Arc<StatsCore>) -> HarnessResult<Self> {
        let path = core
            .config()
            .csv_path
            .clone()
            .ok_or(HarnessError::missing_config("statistics.csv_path"))?;
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        let writer = csv::WriterBuilder::new()
            .flexible(true)
            .has_headers(false)
            .from_writer(file);

        Ok(Self {
            core,
            path,
            writer: Arc::new(Mutex::new(writer)),
        })
    }

    fn summary_row(&self, summary: &RunSummary) -> Vec<String> {
        let (date, time) = timestamp();
        let mut row = vec![date, time];
        if let Some(id) = self.core.config().run_id.as_deref() {
            row.push(format!("id={id}"));
        }
        row.extend([
            "Summary".to_string(),
            "Threads".to_string(),
            summary.workers.len().to_string(),
            "MsgRate".to_string(),
            fmt2(summary.total_rate),
            "Iterations".to_string(),
            summary.total_iterations.to_string(),
            "AvgDuration".to_string(),
            fmt2(summary.avg_duration_secs),
        ]);
        for (key, value) in &self.core.config().run_parameters {
            row.push(key.clone());
            row.push(value.clone());
        }
        row
    }
}

impl Statistics for FileStatistics {
    fn kind(&self) -> StatisticsKind {
        StatisticsKind::File
    }

    fn start(&self, scheduler: &Scheduler) -> HarnessResult<()> {
        self.core.reset();
        tracing::info!(path = %self.path.display(), "Writing rate data to file");

        let core = Arc::clone(&self.core);
        let writer = Arc::clone(&self.writer);
        schedule_reports(&self.core, scheduler, move || {
            let row = interval_row(&core);
            core.emit(&row.join(","));
            if let Err(e) = write_row(&writer, &row) {
                tracing::warn!(error = %e, "Failed to write statistics row");
            }
        });
        Ok(())
    }

    fn measurement_started(&self, scheduler: &Scheduler) {
        self.core.schedule_discard(scheduler, || {});
    }

    fn request_statistics(&self) -> String {
        self.core.requested(|| interval_row(&self.core).join(","))
    }

    fn stop(&self) {
        self.core.cancel_tasks();
    }

    fn final_summary(&self, ctx: &SummaryContext) -> RunSummary {
        let mut summary = self.core.summarize(StatisticsKind::File, ctx);

        if let Some(run_length) = ctx.run_length {
            let expected = run_length.saturating_sub(self.core.config().discard);
            let floor = expected.as_secs_f64() * MIN_DURATION_FRACTION;
            if summary.avg_duration_secs < floor {
                tracing::warn!(
                    avg_duration = summary.avg_duration_secs,
                    expected = expected.as_secs_f64(),
                    "Measured duration too short, aggregate rate discarded"
                );
                summary.total_rate = 0.0;
                summary.rate_discarded = true;
            }
        }

        let row = self.summary_row(&summary);
        if let Err(e) = write_row(&self.writer, &row) {
            tracing::warn!(error = %e, path = %self.path.display(), "Failed to write summary row");
        }
        summary
    }
}

impl std::fmt::Debug for FileStatistics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileStatistics")
            .field("core", &self.core)
            .field("path", &self.path)
            .finish()
    }
}
