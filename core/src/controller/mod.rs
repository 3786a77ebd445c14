//! Controller: owns a worker pool and its lifecycle
//!
//! A Controller starts its Workers under the configured startup policy,
//! watches them while statistics are collected, and shuts them down in a
//! bounded grace window once the run length elapses, the pool runs dry, a
//! Worker faults or a shutdown is requested.

mod builder;
mod command;
mod executor;
mod pool;
mod shutdown;
mod startup;


pub use builder::ControllerBuilder;
pub use command::{CommandHandle, WorkerCountChange};
pub use executor::{Controller, RunReport};
pub use pool::WorkerPool;
pub use startup::StartupReport;
