//! CLI argument parsing and run dispatch

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use paceharness_core::{
    CommandHandle, ControllerBuilder, RunConfig, RunReport, StartupPolicy, StatisticsKind,
    StdoutSink, TimingMode,
};
use paceharness_units::UnitOptions;

/// Paced multi-worker load harness
#[derive(Parser, Debug)]
#[command(name = "paceharness")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// JSON run configuration; flags below override it
    #[arg(short, long, env = "PACEHARNESS_CONFIG")]
    pub config: Option<PathBuf>,

    /// Number of workers
    #[arg(short, long)]
    pub workers: Option<usize>,

    /// Aggregate target rate in iterations per second (0 for unthrottled)
    #[arg(short, long)]
    pub rate: Option<f64>,

    /// Ramp-up to the target rate, in seconds
    #[arg(long)]
    pub ramp_up: Option<f64>,

    /// Draw delays from an exponential distribution around the mean
    #[arg(long)]
    pub jitter: bool,

    /// Iterations per worker
    #[arg(short = 'n', long)]
    pub iterations: Option<u64>,

    /// Run length in seconds, measured from the end of startup
    #[arg(short = 'l', long)]
    pub run_length: Option<f64>,

    /// Seconds a worker may take to start (0: don't wait)
    #[arg(long)]
    pub startup_timeout: Option<f64>,

    /// Milliseconds between consecutive worker starts
    #[arg(long)]
    pub start_delay_ms: Option<u64>,

    /// Start workers through a pool of this size instead of one by one
    #[arg(long)]
    pub startup_concurrency: Option<usize>,

    /// Seconds shutdown waits for workers to end
    #[arg(long)]
    pub shutdown_grace: Option<f64>,

    /// Statistics variant (basic, rolling, response, file)
    #[arg(short, long)]
    pub stats: Option<String>,

    /// Reporting interval in seconds (0: on request only)
    #[arg(short, long)]
    pub interval: Option<f64>,

    /// Warm-up seconds excluded from the final summary
    #[arg(short, long)]
    pub discard: Option<f64>,

    /// Samples in the rolling window
    #[arg(long)]
    pub rolling_window: Option<usize>,

    /// Include a per-worker breakdown
    #[arg(long)]
    pub per_worker: bool,

    /// Skip the final summary
    #[arg(long)]
    pub no_summary: bool,

    /// Measure durations from launch, setup included
    #[arg(long)]
    pub time_to_last_fire: bool,

    /// Reset the rolling maximum when a worker errors
    #[arg(long)]
    pub reset_max_on_error: bool,

    /// Identifier prefixed to every statistics line
    #[arg(long)]
    pub run_id: Option<String>,

    /// CSV file for the file statistics variant
    #[arg(long)]
    pub csv: Option<PathBuf>,

    /// Run parameter written with CSV summary rows (key=value, repeatable)
    #[arg(long = "param", value_parser = parse_param)]
    pub params: Vec<(String, String)>,

    /// Work unit (noop, sleep, faulty, hold)
    #[arg(short, long, default_value = "noop")]
    pub unit: String,

    /// Unit delay in milliseconds (sleep: per iteration, hold: connect)
    #[arg(long, default_value = "0")]
    pub unit_delay_ms: u64,

    /// Successful iterations before the faulty unit faults
    #[arg(long)]
    pub fail_after: Option<u64>,

    /// Report every Nth noop iteration as unsuccessful
    #[arg(long)]
    pub fail_every: Option<u64>,

    /// Show statistics on a spinner instead of periodic lines
    #[arg(long)]
    pub progress: bool,

    /// Write the run report as JSON
    #[arg(long)]
    pub summary_json: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,
}

fn parse_param(raw: &str) -> std::result::Result<(String, String), String> {
    raw.split_once('=')
        .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
        .filter(|(k, _)| !k.is_empty())
        .ok_or_else(|| format!("expected key=value, got '{raw}'"))
}

fn secs(value: f64, flag: &str) -> Result<Duration> {
    Duration::try_from_secs_f64(value)
        .with_context(|| format!("--{flag} must be a non-negative number of seconds"))
}

impl Cli {
    /// Build the run configuration from the config file and flags
    pub fn build_config(&self) -> Result<RunConfig> {
        let mut config = match &self.config {
            Some(path) => {
                let raw = std::fs::read_to_string(path)
                    .with_context(|| format!("Failed to read config: {}", path.display()))?;
                serde_json::from_str(&raw)
                    .with_context(|| format!("Failed to parse config: {}", path.display()))?
            }
            None => RunConfig::default(),
        };

        if let Some(workers) = self.workers {
            config.workers = workers;
        }
        if let Some(rate) = self.rate {
            config.rate = rate;
        }
        if let Some(ramp) = self.ramp_up {
            config.ramp_up = secs(ramp, "ramp-up")?;
        }
        config.jitter |= self.jitter;
        if self.iterations.is_some() {
            config.iteration_cap = self.iterations;
        }
        if let Some(run_length) = self.run_length {
            config.run_length = Some(secs(run_length, "run-length")?);
        }
        if let Some(timeout) = self.startup_timeout {
            config.startup.timeout = secs(timeout, "startup-timeout")?;
        }
        if let Some(delay) = self.start_delay_ms {
            config.startup.inter_start_delay = Duration::from_millis(delay);
        }
        if let Some(concurrency) = self.startup_concurrency {
            config.startup.policy = StartupPolicy::Pooled { concurrency };
        }
        if let Some(grace) = self.shutdown_grace {
            config.shutdown_grace = secs(grace, "shutdown-grace")?;
        }

        let stats = &mut config.statistics;
        if let Some(kind) = &self.stats {
            stats.kind = kind.parse::<StatisticsKind>()?;
        }
        if let Some(interval) = self.interval {
            stats.interval = secs(interval, "interval")?;
        }
        if let Some(discard) = self.discard {
            stats.discard = secs(discard, "discard")?;
        }
        if let Some(window) = self.rolling_window {
            stats.rolling_window = window;
        }
        stats.per_worker |= self.per_worker;
        stats.summary &= !self.no_summary;
        if self.time_to_last_fire {
            stats.timing = TimingMode::TimeToLastFire;
        }
        stats.reset_rolling_max_on_error |= self.reset_max_on_error;
        if self.run_id.is_some() {
            stats.run_id = self.run_id.clone();
        }
        if self.csv.is_some() {
            stats.csv_path = self.csv.clone();
        }
        stats.run_parameters.extend(self.params.iter().cloned());

        Ok(config)
    }

    fn unit_options(&self) -> UnitOptions {
        UnitOptions {
            delay: Duration::from_millis(self.unit_delay_ms),
            fail_after: self.fail_after,
            fail_every: self.fail_every,
        }
    }

    /// Run to completion
    pub async fn run(&self) -> Result<()> {
        let mut config = self.build_config()?;

        // the spinner takes over periodic reporting
        let progress_every = if self.progress {
            let every = config.statistics.interval;
            config.statistics.interval = Duration::ZERO;
            Some(if every.is_zero() { Duration::from_secs(1) } else { every })
        } else {
            None
        };

        tracing::info!(
            unit = %self.unit,
            workers = config.workers,
            rate = config.rate,
            statistics = %config.statistics.kind,
            "paceharness starting"
        );

        let factory = paceharness_units::factory(&self.unit, self.unit_options())?;
        let controller = ControllerBuilder::new(config)
            .unit_factory(factory)
            .sink(Arc::new(StdoutSink))
            .build()?;

        let progress = progress_every
            .map(|every| tokio::spawn(show_progress(controller.command_handle(), every)));

        let report = controller.run_with_signal_handling().await?;

        if let Some(progress) = progress {
            let _ = progress.await;
        }

        if let Some(path) = &self.summary_json {
            write_report(&report, path)?;
        }

        if let Some(error) = &report.startup_error {
            anyhow::bail!("startup failed: {error}");
        }
        if report.summary.partial {
            let reason = report
                .reason
                .as_ref()
                .map_or_else(|| "unknown".to_string(), |r| r.to_string());
            anyhow::bail!("run ended abnormally: {reason}");
        }
        Ok(())
    }
}

async fn show_progress(handle: CommandHandle, every: Duration) {
    let spinner = ProgressBar::new_spinner();
    spinner.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} [{elapsed_precise}] {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    spinner.enable_steady_tick(Duration::from_millis(120));

    let mut ticker = tokio::time::interval(every);
    ticker.tick().await;
    while !handle.is_stopping() {
        ticker.tick().await;
        spinner.set_message(handle.request_statistics());
    }
    spinner.finish_and_clear();
}

fn write_report(report: &RunReport, path: &Path) -> Result<()> {
    let json = serde_json::to_string_pretty(report)?;
    std::fs::write(path, json)
        .with_context(|| format!("Failed to write report: {}", path.display()))?;
    println!("✓ Report written to: {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("paceharness").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn test_flags_override_defaults() {
        let cli = parse(&[
            "-w", "4", "-r", "100", "-l", "10", "-d", "2", "-s", "basic", "--startup-concurrency",
            "2", "--param", "msgsize=1024",
        ]);
        let config = cli.build_config().unwrap();

        assert_eq!(config.workers, 4);
        assert_eq!(config.rate, 100.0);
        assert_eq!(config.run_length, Some(Duration::from_secs(10)));
        assert_eq!(config.statistics.discard, Duration::from_secs(2));
        assert_eq!(config.statistics.kind, StatisticsKind::Basic);
        assert_eq!(config.startup.policy, StartupPolicy::Pooled { concurrency: 2 });
        assert_eq!(
            config.statistics.run_parameters,
            vec![("msgsize".to_string(), "1024".to_string())]
        );
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_unknown_stats_kind() {
        let err = parse(&["-s", "histogram"]).build_config().unwrap_err();
        assert!(err.to_string().contains("unknown statistics"));
    }

    #[test]
    fn test_negative_seconds_rejected() {
        assert!(parse(&["--run-length=-1"]).build_config().is_err());
    }

    #[test]
    fn test_bad_param_rejected() {
        let result = Cli::try_parse_from(["paceharness", "--param", "novalue"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_no_summary_flag() {
        let config = parse(&["--no-summary"]).build_config().unwrap();
        assert!(!config.statistics.summary);
    }
}
