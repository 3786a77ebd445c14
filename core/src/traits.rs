//! Core traits for work units
//!
//! A work unit is the single operation a Worker repeats. Protocol-specific
//! bodies live outside this crate (see `paceharness-units` for synthetic ones).

use std::sync::Arc;

use async_trait::async_trait;
use tokio::time::Instant;

use crate::error::HarnessError;
use crate::worker::WorkerShared;

// ============================================================================
// Work Unit Trait
// ============================================================================

/// How a Worker learns that shutdown was requested
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ShutdownStyle {
    /// The loop checks the shutdown flag before every iteration
    #[default]
    Polling,
    /// The unit blocks on a wait released by an explicit shutdown signal
    Signalled,
}

/// A single repeatable operation driven by a Worker
///
/// `perform_one_unit` must be safe to call repeatedly. Returning `Ok(false)`
/// counts an unsuccessful iteration; returning `Err` is fatal for the Worker
/// and requests a global shutdown.
#[async_trait]
pub trait WorkUnit: Send {
    /// Short unit identifier, used to name Workers
    fn name(&self) -> &str;

    /// Cancellation style this unit relies on
    fn shutdown_style(&self) -> ShutdownStyle {
        ShutdownStyle::Polling
    }

    /// Called once while the Worker is Connecting
    async fn setup(&mut self, _ctx: &mut UnitContext) -> Result<(), WorkFault> {
        Ok(())
    }

    /// Perform one iteration
    async fn perform_one_unit(&mut self, ctx: &mut UnitContext) -> Result<bool, WorkFault>;

    /// Called once while the Worker is Ending
    async fn teardown(&mut self, _ctx: &mut UnitContext) {}
}

/// Fatal fault raised by a work unit
#[derive(Debug, thiserror::Error)]
pub enum WorkFault {
    /// Setup could not complete
    #[error("setup failed: {0}")]
    Setup(String),

    /// The operation failed in a way the Worker cannot recover from
    #[error("{0}")]
    Fatal(String),

    /// IO failure inside the unit
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl WorkFault {
    /// Create a fatal fault
    pub fn fatal(msg: impl Into<String>) -> Self {
        WorkFault::Fatal(msg.into())
    }
}

/// Identity handed to a unit factory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerIdentity {
    /// Numeric id, unique within a Controller
    pub id: usize,
}

/// Creates one work unit per Worker
pub type WorkUnitFactory = Arc<dyn Fn(&WorkerIdentity) -> Box<dyn WorkUnit> + Send + Sync>;

// ============================================================================
// Unit Context
// ============================================================================

/// Per-Worker handle passed into every unit call
pub struct UnitContext {
    shared: Arc<WorkerShared>,
    span: Option<Instant>,
}

impl UnitContext {
    pub(crate) fn new(shared: Arc<WorkerShared>) -> Self {
        Self { shared, span: None }
    }

    /// Worker id
    pub fn worker_id(&self) -> usize {
        self.shared.id()
    }

    /// Worker name
    pub fn worker_name(&self) -> &str {
        self.shared.name()
    }

    /// Iterations completed so far by this Worker
    pub fn iterations(&self) -> u64 {
        self.shared.iterations()
    }

    /// True once shutdown has been signalled to this Worker
    pub fn is_shutting_down(&self) -> bool {
        self.shared.is_shutdown_signalled()
    }

    /// Mark the start of the timed part of the current iteration
    ///
    /// Without a mark the whole call is timed.
    pub fn start_span(&mut self) {
        self.span = Some(Instant::now());
    }

    /// Block until shutdown is signalled
    ///
    /// Wakeups that arrive without a shutdown are logged and the wait resumes.
    pub async fn wait_for_shutdown(&self) {
        let token = self.shared.token().clone();
        loop {
            let woken = self.shared.wake().notified();
            tokio::select! {
                biased;
                _ = token.cancelled() => return,
                _ = woken => {
                    if token.is_cancelled() {
                        return;
                    }
                    tracing::warn!(
                        worker = self.shared.name(),
                        error = %HarnessError::InterruptedWait("wait_for_shutdown"),
                        "Woken without shutdown, waiting again"
                    );
                }
            }
        }
    }

    pub(crate) fn reset_span(&mut self) {
        self.span = None;
    }

    pub(crate) fn span_elapsed(&self, began: Instant, now: Instant) -> std::time::Duration {
        now.saturating_duration_since(self.span.unwrap_or(began))
    }
}

impl std::fmt::Debug for UnitContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnitContext")
            .field("worker", &self.shared.name())
            .field("span", &self.span)
            .finish()
    }
}
