//! Worker execution loop

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::context::{RunContext, ShutdownTrigger};
use crate::traits::{ShutdownStyle, UnitContext, WorkFault, WorkUnit};

use super::pacer::Pacer;
use super::stats::WorkerShared;
use super::status::WorkerStatus;

/// Pacing parameters for one Worker
#[derive(Debug, Clone, Copy)]
pub struct PacingSettings {
    /// Linear ramp to the target rate
    pub ramp_up: Duration,
    /// Exponential jitter around the mean delay
    pub jitter: bool,
    /// Iterations to perform (`None`: until shutdown)
    pub iteration_cap: Option<u64>,
    /// Yield every N unslept iterations
    pub yield_every: u32,
}

impl Default for PacingSettings {
    fn default() -> Self {
        Self {
            ramp_up: Duration::ZERO,
            jitter: false,
            iteration_cap: None,
            yield_every: 1,
        }
    }
}

/// Worker drives one work unit: pace -> perform -> count -> repeat
///
/// Workers are tokio tasks owned by a Controller. Everything other tasks
/// need to see lives in [`WorkerShared`].
pub struct Worker {
    shared: Arc<WorkerShared>,
    unit: Box<dyn WorkUnit>,
    pacing: PacingSettings,
    run: RunContext,
}

/// Records the end time and Ended state however the task finishes,
/// including when it is aborted.
struct EndGuard(Arc<WorkerShared>);

impl Drop for EndGuard {
    fn drop(&mut self) {
        self.0.mark_ended(Instant::now());
    }
}

enum LoopExit {
    Finished,
    Fault(WorkFault),
}

impl Worker {
    pub(crate) fn new(
        shared: Arc<WorkerShared>,
        unit: Box<dyn WorkUnit>,
        pacing: PacingSettings,
        run: RunContext,
    ) -> Self {
        Self {
            shared,
            unit,
            pacing,
            run,
        }
    }

    /// State visible to other tasks
    pub fn shared(&self) -> &Arc<WorkerShared> {
        &self.shared
    }

    /// Spawn the Worker onto the runtime
    pub fn spawn(self) -> JoinHandle<()> {
        // held by the task future, so it drops even if aborted before its first poll
        let guard = EndGuard(Arc::clone(&self.shared));
        tokio::spawn(async move {
            let _guard = guard;
            self.drive().await;
        })
    }

    /// Run the Worker to completion
    pub async fn run(self) {
        let _guard = EndGuard(Arc::clone(&self.shared));
        self.drive().await;
    }

    async fn drive(self) {
        let Worker {
            shared,
            mut unit,
            pacing,
            run,
        } = self;
        let mut ctx = UnitContext::new(Arc::clone(&shared));

        shared.advance(WorkerStatus::CONNECTING);
        tracing::debug!(worker_id = shared.id(), worker = shared.name(), "Worker connecting");

        let exit = match unit.setup(&mut ctx).await {
            Ok(()) => {
                shared.mark_started(Instant::now());
                shared.advance(WorkerStatus::RUNNING);
                tracing::debug!(
                    worker_id = shared.id(),
                    rate = shared.rate(),
                    "Worker running"
                );
                pace(&shared, unit.as_mut(), &mut ctx, &pacing).await
            }
            Err(fault) => LoopExit::Fault(fault),
        };

        if let LoopExit::Fault(fault) = exit {
            tracing::error!(worker = shared.name(), error = %fault, "Worker fault");
            shared.mark_error();
            run.signal_shutdown(ShutdownTrigger::WorkerFault {
                worker: shared.name().to_string(),
            });
        }

        shared.advance(WorkerStatus::ENDING);
        unit.teardown(&mut ctx).await;

        tracing::debug!(
            worker_id = shared.id(),
            iterations = shared.iterations(),
            unsuccessful = shared.unsuccessful(),
            "Worker finished"
        );
    }
}

async fn pace(
    shared: &WorkerShared,
    unit: &mut dyn WorkUnit,
    ctx: &mut UnitContext,
    settings: &PacingSettings,
) -> LoopExit {
    let token = shared.token().clone();
    let style = unit.shutdown_style();
    let mut pacer = Pacer::new(shared.rate(), settings.ramp_up, settings.jitter, Instant::now());
    let mut done: u64 = 0;
    let mut unslept: u32 = 0;

    loop {
        if token.is_cancelled() {
            return LoopExit::Finished;
        }
        if settings.iteration_cap.is_some_and(|cap| done >= cap) {
            tracing::debug!(worker_id = shared.id(), done, "Iteration cap reached");
            return LoopExit::Finished;
        }
        apply_rate_update(shared, &mut pacer);

        ctx.reset_span();
        let began = Instant::now();
        let outcome = match style {
            ShutdownStyle::Polling => unit.perform_one_unit(ctx).await,
            ShutdownStyle::Signalled => {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => return LoopExit::Finished,
                    outcome = unit.perform_one_unit(ctx) => outcome,
                }
            }
        };
        let elapsed = ctx.span_elapsed(began, Instant::now());

        match outcome {
            Ok(successful) => {
                shared.record_response(elapsed);
                shared.record_iteration(successful);
                done += 1;
            }
            Err(fault) => return LoopExit::Fault(fault),
        }

        if settings.iteration_cap.is_some_and(|cap| done >= cap) {
            continue;
        }

        let mut sleep = pacer.next_sleep(Instant::now());
        if sleep.is_zero() {
            unslept += 1;
            if settings.yield_every > 0 && unslept >= settings.yield_every {
                unslept = 0;
                tokio::task::yield_now().await;
            }
        }
        while !sleep.is_zero() {
            let rate_changed = shared.rate_changed();
            tokio::select! {
                biased;
                _ = token.cancelled() => return LoopExit::Finished,
                _ = rate_changed => {
                    // the new rate replaces what is left of this delay
                    if apply_rate_update(shared, &mut pacer) {
                        sleep = pacer.next_sleep(Instant::now());
                    }
                }
                _ = tokio::time::sleep(sleep) => break,
            }
        }
    }
}

fn apply_rate_update(shared: &WorkerShared, pacer: &mut Pacer) -> bool {
    let Some(rate) = shared.take_rate_update() else {
        return false;
    };
    tracing::debug!(worker_id = shared.id(), rate, "Rate updated");
    pacer.set_rate(rate, Instant::now());
    true
}

impl std::fmt::Debug for Worker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Worker")
            .field("shared", &self.shared)
            .field("unit", &self.unit.name())
            .field("pacing", &self.pacing)
            .finish()
    }
}
