//! Commands accepted by a running Controller

use std::sync::Arc;

use crate::context::ShutdownTrigger;
use crate::error::{HarnessError, HarnessResult};
use crate::worker::WorkerShared;

use super::executor::ControllerInner;
use super::startup::{self, StartupReport};

/// Outcome of a worker-count change
#[derive(Debug, Clone, PartialEq)]
pub enum WorkerCountChange {
    /// Workers were added and started
    Added(StartupReport),
    /// The named Workers were asked to stop
    Removed(Vec<String>),
    /// Every Worker was removed, so the Controller is stopping
    Stopping,
    /// Nothing to do
    Unchanged,
}

/// Cloneable handle for steering a running Controller
#[derive(Clone)]
pub struct CommandHandle {
    inner: Arc<ControllerInner>,
}

impl CommandHandle {
    pub(crate) fn new(inner: Arc<ControllerInner>) -> Self {
        Self { inner }
    }

    /// Current figures from the statistics engine
    pub fn request_statistics(&self) -> String {
        self.inner.stats.request_statistics()
    }

    /// Workers that have not reached Ending
    pub fn live_workers(&self) -> Vec<Arc<WorkerShared>> {
        self.inner.pool.live()
    }

    /// Current aggregate target rate
    pub fn target_rate(&self) -> f64 {
        self.inner.target_rate()
    }

    /// True once this Controller is stopping
    pub fn is_stopping(&self) -> bool {
        self.inner.stop.is_cancelled()
    }

    /// Grow or shrink the pool by `delta` Workers
    ///
    /// New Workers are started under the configured startup policy; a
    /// failed start stops the Controller. Removing the last live Workers
    /// stops the Controller. The aggregate rate is re-split afterwards.
    pub async fn change_worker_count(&self, delta: i64) -> HarnessResult<WorkerCountChange> {
        let inner = &self.inner;
        if inner.stop.is_cancelled() {
            return Err(HarnessError::config("controller is stopping"));
        }
        let _guard = inner.startup_lock.lock().await;

        if delta > 0 {
            tracing::info!(adding = delta, "Adding workers");
            inner.add_workers(delta as usize)?;
            return match startup::start_pending(inner).await {
                Ok(report) => Ok(WorkerCountChange::Added(report)),
                Err(e) => {
                    tracing::error!(error = %e, "Startup of added workers failed");
                    inner.stop_controller(ShutdownTrigger::StartupAborted);
                    Err(e)
                }
            };
        }

        let remove = delta.unsigned_abs() as usize;
        if remove == 0 {
            return Ok(WorkerCountChange::Unchanged);
        }

        let mut live = inner.pool.live();
        if remove >= live.len() {
            tracing::info!(removing = remove, live = live.len(), "Removing every worker");
            inner.stop_controller(ShutdownTrigger::External);
            return Ok(WorkerCountChange::Stopping);
        }

        let removed = live.split_off(live.len() - remove);
        let names = removed
            .iter()
            .map(|worker| {
                worker.signal_shutdown();
                worker.name().to_string()
            })
            .collect::<Vec<_>>();
        tracing::info!(removed = ?names, "Removed workers");
        inner.rebalance(&live);
        Ok(WorkerCountChange::Removed(names))
    }

    /// Change the aggregate target rate (0 for unthrottled)
    pub fn alter_rate(&self, rate: f64) -> HarnessResult<()> {
        if !rate.is_finite() || rate < 0.0 {
            return Err(HarnessError::config(format!(
                "rate must be non-negative, got {rate}"
            )));
        }
        tracing::info!(rate, "Altering target rate");
        self.inner.set_target_rate(rate);
        self.inner.rebalance(&self.inner.pool.live());
        Ok(())
    }

    /// Stop this Controller only
    pub fn stop(&self) {
        self.inner.stop_controller(ShutdownTrigger::External);
    }

    /// Shut down the whole run, every Controller sharing its context included
    pub fn shutdown(&self) {
        self.inner.run.signal_shutdown(ShutdownTrigger::External);
    }
}

impl std::fmt::Debug for CommandHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandHandle")
            .field("pool", &self.inner.pool)
            .field("stopping", &self.is_stopping())
            .finish()
    }
}
