//! Builder pattern for Controller construction

use std::sync::Arc;

use crate::config::RunConfig;
use crate::context::RunContext;
use crate::error::{HarnessError, HarnessResult};
use crate::sink::{ReportSink, TracingSink};
use crate::stats::{build_statistics, StatsCore, WorkerSource};
use crate::traits::WorkUnitFactory;

use super::executor::{Controller, ControllerInner};
use super::pool::WorkerPool;

/// Builder for creating a Controller
///
/// # Example
///
/// ```ignore
/// let controller = ControllerBuilder::new(RunConfig::new(4).with_rate(100.0))
///     .unit_factory(Arc::new(|_: &WorkerIdentity| Box::new(NoopUnit::default()) as Box<dyn WorkUnit>))
///     .sink(Arc::new(StdoutSink))
///     .build()?;
///
/// let report = controller.run().await?;
/// ```
pub struct ControllerBuilder {
    config: RunConfig,
    run: Option<RunContext>,
    factory: Option<WorkUnitFactory>,
    sink: Option<Arc<dyn ReportSink>>,
}

impl ControllerBuilder {
    /// Create a builder for the given configuration
    pub fn new(config: RunConfig) -> Self {
        Self {
            config,
            run: None,
            factory: None,
            sink: None,
        }
    }

    /// Join an existing run context (default: a fresh one)
    pub fn run_context(mut self, run: RunContext) -> Self {
        self.run = Some(run);
        self
    }

    /// Set the factory that creates one work unit per Worker
    pub fn unit_factory(mut self, factory: WorkUnitFactory) -> Self {
        self.factory = Some(factory);
        self
    }

    /// Set where statistics go (default: `tracing` at info level)
    pub fn sink(mut self, sink: Arc<dyn ReportSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Build the Controller
    ///
    /// # Errors
    ///
    /// Returns an error if the unit factory is not set, the configuration
    /// fails validation, or the statistics variant cannot be created.
    pub fn build(self) -> HarnessResult<Controller> {
        let factory = self
            .factory
            .ok_or_else(|| HarnessError::missing_config("unit_factory"))?;

        self.config
            .validate()
            .map_err(|e| HarnessError::config(e.to_string()))?;

        let run = self.run.unwrap_or_default();
        let sink = self.sink.unwrap_or_else(|| Arc::new(TracingSink));
        let pool = Arc::new(WorkerPool::new());

        let source: Arc<dyn WorkerSource> = pool.clone();
        let core = StatsCore::new(
            self.config.statistics.clone(),
            source,
            Arc::clone(&sink),
            run.clone(),
        );
        let stats = build_statistics(core)?;

        let inner = ControllerInner::new(self.config, run, factory, sink, pool, stats);
        Ok(Controller {
            inner: Arc::new(inner),
        })
    }
}
