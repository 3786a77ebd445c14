//! Builder pattern for Worker construction

use std::sync::Arc;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::context::RunContext;
use crate::error::{HarnessError, HarnessResult};
use crate::traits::WorkUnit;

use super::executor::{PacingSettings, Worker};
use super::stats::WorkerShared;

/// Builder for creating Worker instances
///
/// # Example
/// ```ignore
/// let worker = WorkerBuilder::new(1)
///     .unit(Box::new(NoopUnit))
///     .run_context(run.clone())
///     .token(controller_token.child_token())
///     .rate(25.0)
///     .iteration_cap(Some(100))
///     .build()?;
///
/// let handle = worker.spawn();
/// ```
pub struct WorkerBuilder {
    id: usize,
    name: Option<String>,
    unit: Option<Box<dyn WorkUnit>>,
    run: Option<RunContext>,
    token: Option<CancellationToken>,
    pool_changes: Option<Arc<watch::Sender<u64>>>,
    rate: f64,
    pacing: PacingSettings,
}

impl WorkerBuilder {
    /// Create a new builder with the given worker ID
    pub fn new(id: usize) -> Self {
        Self {
            id,
            name: None,
            unit: None,
            run: None,
            token: None,
            pool_changes: None,
            rate: 0.0,
            pacing: PacingSettings::default(),
        }
    }

    /// Set the Worker name (default: unit name followed by the id)
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Set the work unit
    pub fn unit(mut self, unit: Box<dyn WorkUnit>) -> Self {
        self.unit = Some(unit);
        self
    }

    /// Set the run context
    pub fn run_context(mut self, run: RunContext) -> Self {
        self.run = Some(run);
        self
    }

    /// Set the shutdown token
    pub fn token(mut self, token: CancellationToken) -> Self {
        self.token = Some(token);
        self
    }

    /// Share a pool-wide change counter bumped on every status change
    pub fn pool_changes(mut self, changes: Arc<watch::Sender<u64>>) -> Self {
        self.pool_changes = Some(changes);
        self
    }

    /// Set the per-Worker rate (iterations per second, 0 for unthrottled)
    pub fn rate(mut self, rate: f64) -> Self {
        self.rate = rate;
        self
    }

    /// Set the pacing settings
    pub fn pacing(mut self, pacing: PacingSettings) -> Self {
        self.pacing = pacing;
        self
    }

    /// Set the iteration cap
    pub fn iteration_cap(mut self, cap: Option<u64>) -> Self {
        self.pacing.iteration_cap = cap;
        self
    }

    /// Build the Worker
    ///
    /// # Errors
    /// Returns an error if any required field is missing or the rate is invalid.
    pub fn build(self) -> HarnessResult<Worker> {
        let unit = self.unit.ok_or(HarnessError::missing_config("unit"))?;
        let run = self.run.ok_or(HarnessError::missing_config("run_context"))?;
        let token = self.token.ok_or(HarnessError::missing_config("token"))?;

        if !self.rate.is_finite() || self.rate < 0.0 {
            return Err(HarnessError::config(format!(
                "worker rate must be non-negative, got {}",
                self.rate
            )));
        }

        let name = self
            .name
            .unwrap_or_else(|| format!("{}{}", unit.name(), self.id));
        let pool_changes = self
            .pool_changes
            .unwrap_or_else(|| Arc::new(watch::channel(0).0));

        let shared = Arc::new(WorkerShared::new(
            self.id,
            name,
            self.rate,
            token,
            pool_changes,
        ));

        Ok(Worker::new(shared, unit, self.pacing, run))
    }
}
