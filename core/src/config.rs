//! Run configuration types

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::stats::StatisticsKind;

/// How the Controller brings the worker pool up
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StartupPolicy {
    /// Start one worker, wait for it to be Running, then the next
    Sequential,
    /// Keep up to `concurrency` workers starting at once
    Pooled {
        /// Maximum number of workers in the starting pool
        concurrency: usize,
    },
}

/// Worker startup settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StartupConfig {
    /// Startup policy
    pub policy: StartupPolicy,

    /// How long a single worker may take to reach Running (zero: don't wait)
    pub timeout: Duration,

    /// Pause between consecutive worker starts
    pub inter_start_delay: Duration,
}

impl Default for StartupConfig {
    fn default() -> Self {
        Self {
            policy: StartupPolicy::Sequential,
            timeout: Duration::from_secs(20),
            inter_start_delay: Duration::ZERO,
        }
    }
}

/// Which start time the final summary measures durations from
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimingMode {
    /// Worker start, or the end of the discard window when one is configured
    #[default]
    Normal,
    /// Launch of the run context, so setup overhead is included
    TimeToLastFire,
}

/// Statistics engine settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StatisticsConfig {
    /// Statistics variant
    pub kind: StatisticsKind,

    /// Reporting interval (zero: report only on request)
    pub interval: Duration,

    /// Initial period excluded from end-of-run totals
    pub discard: Duration,

    /// Number of samples in the rolling window
    pub rolling_window: usize,

    /// Spacing of rolling-window samples
    pub sample_period: Duration,

    /// Include a per-worker breakdown in periodic lines
    pub per_worker: bool,

    /// Emit the final summary
    pub summary: bool,

    /// Duration measurement mode for the final summary
    pub timing: TimingMode,

    /// Optional identifier prefixed to every periodic line
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,

    /// File the file-logging variant appends rows to
    #[serde(skip_serializing_if = "Option::is_none")]
    pub csv_path: Option<PathBuf>,

    /// Static run parameters written alongside file-logging rows
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub run_parameters: Vec<(String, String)>,

    /// Reset the rolling maximum when a worker enters Error mid-run
    pub reset_rolling_max_on_error: bool,
}

impl Default for StatisticsConfig {
    fn default() -> Self {
        Self {
            kind: StatisticsKind::Rolling,
            interval: Duration::from_secs(10),
            discard: Duration::ZERO,
            rolling_window: 10,
            sample_period: Duration::from_secs(1),
            per_worker: false,
            summary: true,
            timing: TimingMode::Normal,
            run_id: None,
            csv_path: None,
            run_parameters: Vec::new(),
            reset_rolling_max_on_error: false,
        }
    }
}

/// Run configuration
///
/// Defines the worker pool, its pacing, its lifecycle timeouts and the
/// statistics that are collected while it runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Number of workers
    pub workers: usize,

    /// Aggregate target rate in iterations per second (0: unthrottled)
    pub rate: f64,

    /// Linear ramp from ~0 to the target rate
    pub ramp_up: Duration,

    /// Draw delays from an exponential distribution around the mean
    pub jitter: bool,

    /// Iterations per worker (`None`: unlimited)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iteration_cap: Option<u64>,

    /// Yield to the scheduler every N unslept iterations
    pub yield_every: u32,

    /// Worker startup settings
    pub startup: StartupConfig,

    /// Total run length, measured from the end of startup
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_length: Option<Duration>,

    /// How long shutdown waits for workers to end
    pub shutdown_grace: Duration,

    /// How often shutdown rechecks worker status
    pub shutdown_poll: Duration,

    /// Upper bound on the monitor loop's sleep between liveness checks
    pub monitor_interval: Duration,

    /// Statistics settings
    pub statistics: StatisticsConfig,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            workers: 1,
            rate: 0.0,
            ramp_up: Duration::ZERO,
            jitter: false,
            iteration_cap: None,
            yield_every: 1,
            startup: StartupConfig::default(),
            run_length: None,
            shutdown_grace: Duration::from_secs(120),
            shutdown_poll: Duration::from_secs(1),
            monitor_interval: Duration::from_secs(5),
            statistics: StatisticsConfig::default(),
        }
    }
}

impl RunConfig {
    /// Create a new config with the given worker count
    pub fn new(workers: usize) -> Self {
        Self {
            workers,
            ..Default::default()
        }
    }

    /// Set the aggregate target rate
    pub fn with_rate(mut self, rate: f64) -> Self {
        self.rate = rate;
        self
    }

    /// Set the ramp-up duration
    pub fn with_ramp_up(mut self, ramp: Duration) -> Self {
        self.ramp_up = ramp;
        self
    }

    /// Enable or disable exponential jitter
    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Cap iterations per worker
    pub fn with_iteration_cap(mut self, cap: u64) -> Self {
        self.iteration_cap = Some(cap);
        self
    }

    /// Set the run length
    pub fn with_run_length(mut self, run_length: Duration) -> Self {
        self.run_length = Some(run_length);
        self
    }

    /// Set the startup settings
    pub fn with_startup(mut self, startup: StartupConfig) -> Self {
        self.startup = startup;
        self
    }

    /// Set the shutdown grace window
    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    /// Set the statistics settings
    pub fn with_statistics(mut self, statistics: StatisticsConfig) -> Self {
        self.statistics = statistics;
        self
    }

    /// Per-worker share of the aggregate rate for `live` workers
    pub fn per_worker_rate(&self, live: usize) -> f64 {
        if self.rate <= 0.0 || live == 0 {
            0.0
        } else {
            self.rate / live as f64
        }
    }

    /// Validate the configuration
    ///
    /// Combinations that only make a setting pointless are logged as
    /// warnings; combinations that cannot run are errors.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.workers == 0 {
            return Err(ConfigError::InvalidWorkers(
                "at least one worker is required".into(),
            ));
        }

        if !self.rate.is_finite() || self.rate < 0.0 {
            return Err(ConfigError::InvalidRate(format!(
                "rate must be non-negative (0 for unthrottled), got {}",
                self.rate
            )));
        }

        if let StartupPolicy::Pooled { concurrency } = self.startup.policy {
            if concurrency == 0 {
                return Err(ConfigError::InvalidStartup(
                    "pooled startup needs a concurrency of at least 1".into(),
                ));
            }
        }

        if self.shutdown_grace.is_zero() {
            return Err(ConfigError::InvalidShutdown(
                "shutdown grace window must be positive".into(),
            ));
        }

        if self.shutdown_poll.is_zero() || self.monitor_interval.is_zero() {
            return Err(ConfigError::InvalidShutdown(
                "poll and monitor intervals must be positive".into(),
            ));
        }

        let stats = &self.statistics;
        if stats.rolling_window == 0 {
            return Err(ConfigError::InvalidStatistics(
                "rolling window must hold at least one sample".into(),
            ));
        }

        if stats.sample_period.is_zero() {
            return Err(ConfigError::InvalidStatistics(
                "rolling sample period must be positive".into(),
            ));
        }

        if let Some(run_length) = self.run_length {
            if run_length.is_zero() {
                return Err(ConfigError::InvalidRunLength(
                    "run length must be positive when set".into(),
                ));
            }
            if !stats.discard.is_zero() && stats.discard >= run_length {
                return Err(ConfigError::InvalidStatistics(format!(
                    "run length ({:?}) is shorter than the discard window ({:?})",
                    run_length, stats.discard
                )));
            }
            let window_span = u32::try_from(stats.rolling_window)
                .ok()
                .and_then(|n| stats.sample_period.checked_mul(n));
            if stats.kind == StatisticsKind::Rolling
                && window_span.map_or(true, |span| span >= run_length)
            {
                tracing::warn!(
                    window = stats.rolling_window,
                    "run length is shorter than the rolling window, basic statistics may suit better"
                );
            }
        }

        if self.rate == 0.0 && !self.ramp_up.is_zero() {
            tracing::warn!("ramp-up has no effect when no rate is set");
        }
        if self.rate == 0.0 && self.jitter {
            tracing::warn!("jitter has no effect when no rate is set");
        }

        Ok(())
    }
}

/// Configuration validation errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Invalid worker count
    #[error("Invalid worker count: {0}")]
    InvalidWorkers(String),

    /// Invalid rate
    #[error("Invalid rate: {0}")]
    InvalidRate(String),

    /// Invalid startup settings
    #[error("Invalid startup settings: {0}")]
    InvalidStartup(String),

    /// Invalid shutdown settings
    #[error("Invalid shutdown settings: {0}")]
    InvalidShutdown(String),

    /// Invalid run length
    #[error("Invalid run length: {0}")]
    InvalidRunLength(String),

    /// Invalid statistics settings
    #[error("Invalid statistics settings: {0}")]
    InvalidStatistics(String),
}
