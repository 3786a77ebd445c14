//! paceharness-core: engine for paced multi-worker load runs
//!
//! This crate provides everything except the work itself:
//!
//! - Workers that pace a [`WorkUnit`] to a target rate, with ramp-up and jitter
//! - A Controller that starts, monitors and shuts down a pool of Workers
//! - Statistics variants that sample the pool and build a final summary
//! - The run context, scheduler and tagged registry shared by those parts
//! - Configuration and error types

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod context;
pub mod controller;
pub mod error;
pub mod registry;
pub mod scheduler;
pub mod sink;
pub mod stats;
pub mod traits;
pub mod worker;

pub use config::{
    ConfigError, RunConfig, StartupConfig, StartupPolicy, StatisticsConfig, TimingMode,
};
pub use context::{ControllerRegistration, RunContext, ShutdownTrigger};
pub use controller::{
    CommandHandle, Controller, ControllerBuilder, RunReport, StartupReport, WorkerCountChange,
    WorkerPool,
};
pub use error::{HarnessError, HarnessResult};
pub use registry::Registry;
pub use scheduler::{Scheduler, TaskHandle};
pub use sink::{MemorySink, ReportSink, StdoutSink, TracingSink};
pub use stats::{RunSummary, Statistics, StatisticsKind, WorkerSummary};
pub use traits::{
    ShutdownStyle, UnitContext, WorkFault, WorkUnit, WorkUnitFactory, WorkerIdentity,
};
pub use worker::{Worker, WorkerBuilder, WorkerShared, WorkerStatus};
