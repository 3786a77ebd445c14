//! Worker module for paced execution of work units
//!
//! The Worker is the execution unit of the harness, responsible for the
//! loop: **perform -> count -> pace -> repeat**.
//!
//! Each Worker is a tokio task that:
//!
//! 1. Runs its unit's setup while Connecting
//! 2. Performs one unit per iteration while Running
//! 3. Folds the iteration's response time into its accumulators
//! 4. Sleeps whatever the pacing window says is still owed
//! 5. Stops on shutdown, on its iteration cap, or on a fault
//!
//! Status, counters and the target rate live in [`WorkerShared`] so the
//! Controller and statistics can read them while the Worker runs.
//!
//! # Example
//!
//! ```ignore
//! use paceharness_core::worker::WorkerBuilder;
//!
//! let worker = WorkerBuilder::new(1)
//!     .unit(unit)
//!     .run_context(run)
//!     .token(token)
//!     .rate(25.0)
//!     .build()?;
//!
//! let shared = std::sync::Arc::clone(worker.shared());
//! worker.spawn().await?;
//! println!("Completed: {}", shared.iterations());
//! ```

mod builder;
mod executor;
mod pacer;
mod stats;
mod status;

pub use builder::WorkerBuilder;
pub use executor::{PacingSettings, Worker};
pub use pacer::{Pacer, PacingWindow, PACING_WINDOW};
pub use stats::{Accumulator, WorkerShared};
pub use status::WorkerStatus;
