//! Controller execution logic

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::watch;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::config::RunConfig;
use crate::context::{RunContext, ShutdownTrigger};
use crate::error::HarnessResult;
use crate::sink::ReportSink;
use crate::stats::{RunSummary, Statistics, SummaryContext};
use crate::traits::{WorkUnitFactory, WorkerIdentity};
use crate::worker::{PacingSettings, WorkerBuilder, WorkerShared};

use super::command::CommandHandle;
use super::pool::WorkerPool;
use super::shutdown;
use super::startup::{self, StartupReport};

/// State shared between the Controller's run loop and its command handles
pub(crate) struct ControllerInner {
    pub(crate) config: RunConfig,
    pub(crate) run: RunContext,
    pub(crate) factory: WorkUnitFactory,
    pub(crate) sink: Arc<dyn ReportSink>,
    pub(crate) pool: Arc<WorkerPool>,
    pub(crate) stats: Arc<dyn Statistics>,
    /// Child of the run token; cancelling it stops only this Controller
    pub(crate) stop: CancellationToken,
    stop_reason: Mutex<Option<ShutdownTrigger>>,
    pub(crate) pool_changes: Arc<watch::Sender<u64>>,
    next_id: AtomicUsize,
    target_rate: Mutex<f64>,
    /// Serializes startup between the run loop and worker-count changes
    pub(crate) startup_lock: tokio::sync::Mutex<()>,
}

impl ControllerInner {
    pub(crate) fn new(
        config: RunConfig,
        run: RunContext,
        factory: WorkUnitFactory,
        sink: Arc<dyn ReportSink>,
        pool: Arc<WorkerPool>,
        stats: Arc<dyn Statistics>,
    ) -> Self {
        let stop = run.child_token();
        let target_rate = config.rate;
        Self {
            config,
            run,
            factory,
            sink,
            pool,
            stats,
            stop,
            stop_reason: Mutex::new(None),
            pool_changes: Arc::new(watch::channel(0).0),
            next_id: AtomicUsize::new(1),
            target_rate: Mutex::new(target_rate),
            startup_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Stop this Controller only; the first reason is kept
    pub(crate) fn stop_controller(&self, reason: ShutdownTrigger) {
        {
            let mut slot = self.stop_reason.lock();
            if slot.is_none() {
                tracing::info!(reason = %reason, "Stopping controller");
                *slot = Some(reason);
            }
        }
        self.stop.cancel();
    }

    /// Local stop reason, else the run-wide trigger
    pub(crate) fn stop_reason(&self) -> Option<ShutdownTrigger> {
        self.stop_reason
            .lock()
            .clone()
            .or_else(|| self.run.trigger())
    }

    pub(crate) fn target_rate(&self) -> f64 {
        *self.target_rate.lock()
    }

    pub(crate) fn set_target_rate(&self, rate: f64) {
        *self.target_rate.lock() = rate;
    }

    fn per_worker_rate(&self, live: usize) -> f64 {
        let rate = self.target_rate();
        if rate <= 0.0 || live == 0 {
            0.0
        } else {
            rate / live as f64
        }
    }

    /// Create `count` Workers and register them; they are not started
    pub(crate) fn add_workers(&self, count: usize) -> HarnessResult<()> {
        let rate = self.per_worker_rate(self.pool.live_count() + count);
        let pacing = PacingSettings {
            ramp_up: self.config.ramp_up,
            jitter: self.config.jitter,
            iteration_cap: self.config.iteration_cap,
            yield_every: self.config.yield_every,
        };

        for _ in 0..count {
            let id = self.next_id.fetch_add(1, Ordering::Relaxed);
            let unit = (self.factory)(&WorkerIdentity { id });
            let worker = WorkerBuilder::new(id)
                .unit(unit)
                .run_context(self.run.clone())
                .token(self.stop.child_token())
                .pool_changes(Arc::clone(&self.pool_changes))
                .rate(rate)
                .pacing(pacing)
                .build()?;
            self.pool.push(worker);
        }
        self.rebalance(&self.pool.live());
        Ok(())
    }

    /// Split the aggregate target evenly over `live`
    pub(crate) fn rebalance(&self, live: &[Arc<WorkerShared>]) {
        let rate = self.per_worker_rate(live.len());
        for worker in live {
            if (worker.rate() - rate).abs() > f64::EPSILON {
                worker.set_rate(rate);
            }
        }
        tracing::debug!(workers = live.len(), per_worker = rate, "Rate rebalanced");
    }
}

/// How one Controller run went
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    /// Final statistics
    pub summary: RunSummary,
    /// Initial startup figures, absent if startup was aborted
    #[serde(skip_serializing_if = "Option::is_none")]
    pub startup: Option<StartupReport>,
    /// Why startup was aborted
    #[serde(skip_serializing_if = "Option::is_none")]
    pub startup_error: Option<String>,
    /// Why the Controller stopped
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<ShutdownTrigger>,
    /// Workers forcibly interrupted during shutdown
    pub interrupted: Vec<String>,
    /// Workers still not ended when the grace window closed
    pub stragglers: Vec<String>,
    /// Wall time spent in shutdown
    pub shutdown_secs: f64,
    /// Wall time of the whole run
    pub elapsed_secs: f64,
}

impl RunReport {
    /// True when the run ended normally with every Worker accounted for
    pub fn is_clean(&self) -> bool {
        !self.summary.partial && self.startup_error.is_none() && self.stragglers.is_empty()
    }
}

/// Controller owns a pool of Workers and drives them through
/// startup -> measurement -> shutdown -> summary
///
/// Several Controllers may share one [`RunContext`]; a run-wide shutdown
/// stops all of them.
pub struct Controller {
    pub(crate) inner: Arc<ControllerInner>,
}

impl Controller {
    /// Handle for issuing commands while the Controller runs
    pub fn command_handle(&self) -> CommandHandle {
        CommandHandle::new(Arc::clone(&self.inner))
    }

    /// The Worker pool
    pub fn pool(&self) -> &Arc<WorkerPool> {
        &self.inner.pool
    }

    /// The run context this Controller belongs to
    pub fn run_context(&self) -> &RunContext {
        &self.inner.run
    }

    /// The run configuration
    pub fn config(&self) -> &RunConfig {
        &self.inner.config
    }

    /// Run to completion
    ///
    /// Returns once every Worker ended (or the grace window closed) and the
    /// final summary was produced. Startup failures and Worker faults are
    /// reported in the [`RunReport`]; only errors in the statistics engine
    /// itself are returned as `Err`.
    pub async fn run(self) -> HarnessResult<RunReport> {
        let inner = self.inner;
        let config = &inner.config;
        let _registration = inner.run.register_controller();
        let scheduler = inner.run.scheduler();
        let began = Instant::now();

        tracing::info!(
            workers = config.workers,
            rate = config.rate,
            statistics = %config.statistics.kind,
            run_length = ?config.run_length,
            iteration_cap = ?config.iteration_cap,
            "Starting run"
        );

        inner.stats.start(&scheduler)?;
        inner.add_workers(config.workers)?;

        let startup = {
            let _guard = inner.startup_lock.lock().await;
            startup::start_pending(&inner).await
        };
        let (startup_report, startup_error) = match startup {
            Ok(report) => (Some(report), None),
            Err(e) => {
                tracing::error!(error = %e, "Startup aborted");
                inner.stop_controller(ShutdownTrigger::StartupAborted);
                (None, Some(e.to_string()))
            }
        };

        let mut run_timer = None;
        if !inner.stop.is_cancelled() {
            if let Some(run_length) = config.run_length {
                let run = inner.run.clone();
                run_timer = Some(scheduler.schedule_once(run_length, move || {
                    run.signal_shutdown(ShutdownTrigger::RunLength);
                }));
            }
            inner.stats.measurement_started(&scheduler);
            monitor(&inner).await;
        }

        let outcome = shutdown::shutdown(&inner).await;
        if let Some(timer) = run_timer {
            timer.cancel();
        }
        inner.stats.stop();

        let reason = inner.stop_reason();
        let partial = matches!(
            reason,
            Some(ShutdownTrigger::WorkerFault { .. }) | Some(ShutdownTrigger::StartupAborted)
        ) || startup_error.is_some()
            || !outcome.stragglers.is_empty();

        let summary = inner.stats.final_summary(&SummaryContext {
            default_end: Instant::now(),
            run_length: config.run_length,
            partial,
            reason: reason.clone(),
        });
        if config.statistics.summary {
            inner
                .sink
                .summary(&summary.render(config.statistics.per_worker));
        }

        let elapsed = began.elapsed();
        tracing::info!(
            elapsed_secs = elapsed.as_secs_f64(),
            total_iterations = summary.total_iterations,
            total_rate = summary.total_rate,
            errored = summary.errored_workers(),
            reason = ?reason,
            "Run completed"
        );

        Ok(RunReport {
            summary,
            startup: startup_report,
            startup_error,
            reason,
            interrupted: outcome.interrupted,
            stragglers: outcome.stragglers,
            shutdown_secs: outcome.elapsed.as_secs_f64(),
            elapsed_secs: elapsed.as_secs_f64(),
        })
    }

    /// Run with Ctrl+C signal handling
    ///
    /// Ctrl+C triggers a run-wide shutdown.
    pub async fn run_with_signal_handling(self) -> HarnessResult<RunReport> {
        let run = self.inner.run.clone();

        let signal_handle = tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    tracing::info!("Received Ctrl+C, initiating graceful shutdown...");
                    run.signal_shutdown(ShutdownTrigger::External);
                }
                Err(e) => {
                    tracing::error!(error = %e, "Failed to listen for Ctrl+C");
                }
            }
        });

        let result = self.run().await;
        signal_handle.abort();
        result
    }
}

/// Wait until the Controller is stopped or every Worker has ended,
/// reporting Workers that enter Error on the way
async fn monitor(inner: &ControllerInner) {
    let mut changes = inner.pool_changes.subscribe();
    let mut errored: HashSet<usize> = HashSet::new();
    let wait = inner.config.monitor_interval.max(Duration::from_millis(1));

    loop {
        changes.borrow_and_update();
        if inner.stop.is_cancelled() {
            break;
        }

        for slot in inner.pool.slots() {
            let worker = slot.shared();
            if worker.status().is_error() && errored.insert(worker.id()) {
                inner.stats.worker_errored(worker);
            }
        }

        if inner.pool.live_count() == 0 {
            inner.stop_controller(ShutdownTrigger::PoolExhausted);
            break;
        }

        tokio::select! {
            biased;
            _ = inner.stop.cancelled() => {}
            _ = changes.changed() => {}
            _ = tokio::time::sleep(wait) => {}
        }
    }
}

impl std::fmt::Debug for Controller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Controller")
            .field("config", &self.inner.config)
            .field("pool", &self.inner.pool)
            .field("statistics", &self.inner.stats.kind())
            .finish()
    }
}
