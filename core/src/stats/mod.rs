//! Statistics engine
//!
//! Every variant samples the Workers' iteration counters on a timer, reports
//! interval figures to a [`ReportSink`](crate::sink::ReportSink) and builds a
//! final [`RunSummary`]. Variants are resolved by tag through
//! [`statistics_registry`]:
//!
//! | tag        | periodic output                         | final figure |
//! |------------|-----------------------------------------|--------------|
//! | `basic`    | `rate=..,total messages=..`             | `totalRate`  |
//! | `rolling`  | `rateR=..` over the last N samples      | `maxrateR`   |
//! | `response` | `tps=..,avgResponse(micros)=..`         | per-worker response table |
//! | `file`     | as `basic`, plus CSV rows               | CSV summary row |

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::context::ShutdownTrigger;
use crate::error::{HarnessError, HarnessResult};
use crate::registry::Registry;
use crate::scheduler::Scheduler;
use crate::worker::WorkerShared;

mod basic;
mod file;
mod response;
mod rolling;
mod snapshot;
mod summary;

pub use basic::BasicStatistics;
pub use file::FileStatistics;
pub use response::ResponseStatistics;
pub use rolling::{RollingStatistics, RollingWindow};
pub use snapshot::{Baseline, Collection, StatsCore, WorkerSource};
pub use summary::{ResponseSummary, RunSummary, WorkerSummary};

/// Statistics variant tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatisticsKind {
    /// Interval snapshot rates
    Basic,
    /// Rolling-window rates with a recorded maximum
    Rolling,
    /// Rates plus response-time figures
    Response,
    /// Basic rates persisted as CSV rows
    File,
}

impl StatisticsKind {
    /// Registry tag for this kind
    pub fn tag(self) -> &'static str {
        match self {
            StatisticsKind::Basic => "basic",
            StatisticsKind::Rolling => "rolling",
            StatisticsKind::Response => "response",
            StatisticsKind::File => "file",
        }
    }
}

impl std::fmt::Display for StatisticsKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.tag())
    }
}

impl FromStr for StatisticsKind {
    type Err = HarnessError;

    fn from_str(tag: &str) -> Result<Self, Self::Err> {
        let kinds = [
            StatisticsKind::Basic,
            StatisticsKind::Rolling,
            StatisticsKind::Response,
            StatisticsKind::File,
        ];
        kinds
            .into_iter()
            .find(|kind| kind.tag() == tag)
            .ok_or_else(|| HarnessError::UnknownTag {
                kind: "statistics",
                tag: tag.to_string(),
                known: statistics_registry().tags().join(", "),
            })
    }
}

/// Inputs to the final summary that only the Controller knows
#[derive(Debug, Clone)]
pub struct SummaryContext {
    /// End time for Workers that never recorded one
    pub default_end: Instant,
    /// Configured run length, if any
    pub run_length: Option<Duration>,
    /// True when the run ended abnormally
    pub partial: bool,
    /// Why the run stopped
    pub reason: Option<ShutdownTrigger>,
}

/// A statistics variant
pub trait Statistics: Send + Sync {
    /// Variant tag
    fn kind(&self) -> StatisticsKind;

    /// Begin periodic reporting
    fn start(&self, scheduler: &Scheduler) -> HarnessResult<()>;

    /// Startup finished; measurement (and the discard window) begins now
    fn measurement_started(&self, scheduler: &Scheduler);

    /// Figures for the command interface: the last periodic line, or a
    /// fresh sample when no reporting interval is configured
    fn request_statistics(&self) -> String;

    /// A Worker entered Error mid-run
    fn worker_errored(&self, _worker: &WorkerShared) {}

    /// Stop periodic reporting
    fn stop(&self);

    /// Build the end-of-run summary
    fn final_summary(&self, ctx: &SummaryContext) -> RunSummary;
}

/// Constructor stored in the statistics registry
pub type StatisticsConstructor = fn(Arc<StatsCore>) -> HarnessResult<Arc<dyn Statistics>>;

/// Registry of the built-in statistics variants
pub fn statistics_registry() -> Registry<StatisticsConstructor> {
    Registry::<StatisticsConstructor>::new("statistics")
        .register("basic", new_basic)
        .register("rolling", new_rolling)
        .register("response", new_response)
        .register("file", new_file)
}

fn new_basic(core: Arc<StatsCore>) -> HarnessResult<Arc<dyn Statistics>> {
    Ok(Arc::new(BasicStatistics::new(core)))
}

fn new_rolling(core: Arc<StatsCore>) -> HarnessResult<Arc<dyn Statistics>> {
    Ok(Arc::new(RollingStatistics::new(core)))
}

fn new_response(core: Arc<StatsCore>) -> HarnessResult<Arc<dyn Statistics>> {
    Ok(Arc::new(ResponseStatistics::new(core)))
}

fn new_file(core: Arc<StatsCore>) -> HarnessResult<Arc<dyn Statistics>> {
    Ok(Arc::new(FileStatistics::new(core)?))
}

/// Build the variant named by the core's configuration
pub fn build_statistics(core: StatsCore) -> HarnessResult<Arc<dyn Statistics>> {
    let registry = statistics_registry();
    let constructor = registry.resolve(core.config().kind.tag())?;
    constructor(Arc::new(core))
}

/// Two-decimal rendering used by every statistics line
pub(crate) fn fmt2(value: f64) -> String {
    format!("{value:.2}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_from_tag() {
        assert_eq!("rolling".parse::<StatisticsKind>().unwrap(), StatisticsKind::Rolling);
        assert_eq!("file".parse::<StatisticsKind>().unwrap(), StatisticsKind::File);

        let err = "histogram".parse::<StatisticsKind>().unwrap_err();
        assert!(err.to_string().contains("basic, file, response, rolling"));
    }

    #[test]
    fn test_registry_covers_every_kind() {
        let registry = statistics_registry();
        for kind in [
            StatisticsKind::Basic,
            StatisticsKind::Rolling,
            StatisticsKind::Response,
            StatisticsKind::File,
        ] {
            assert!(registry.resolve(kind.tag()).is_ok());
        }
    }

    #[test]
    fn test_kind_serializes_as_tag() {
        assert_eq!(
            serde_json::to_string(&StatisticsKind::Response).unwrap(),
            "\"response\""
        );
    }
}
