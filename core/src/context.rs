//! Run context shared by every Controller of one run
//!
//! Holds the run-wide shutdown broadcast and the scheduler. Several
//! Controllers may share a context; independent contexts never interact.

use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::scheduler::Scheduler;

/// Why a run (or one Controller) stopped
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "trigger", rename_all = "snake_case")]
pub enum ShutdownTrigger {
    /// The run-length timer fired
    RunLength,
    /// A work unit raised a fatal fault
    WorkerFault {
        /// Worker that faulted
        worker: String,
    },
    /// Shutdown was requested from outside (signal or command)
    External,
    /// Every Worker of a Controller ended on its own
    PoolExhausted,
    /// Startup was aborted by a timeout or a failing Worker
    StartupAborted,
}

impl std::fmt::Display for ShutdownTrigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ShutdownTrigger::RunLength => write!(f, "run length reached"),
            ShutdownTrigger::WorkerFault { worker } => write!(f, "worker {worker} faulted"),
            ShutdownTrigger::External => write!(f, "external request"),
            ShutdownTrigger::PoolExhausted => write!(f, "all workers ended"),
            ShutdownTrigger::StartupAborted => write!(f, "startup aborted"),
        }
    }
}

struct Inner {
    token: CancellationToken,
    trigger: Mutex<Option<ShutdownTrigger>>,
    launched_at: Instant,
    scheduler: Mutex<Option<Scheduler>>,
    controllers: Mutex<usize>,
}

/// Run-scoped shutdown flag and scheduler
#[derive(Clone)]
pub struct RunContext {
    inner: Arc<Inner>,
}

impl Default for RunContext {
    fn default() -> Self {
        Self::new()
    }
}

impl RunContext {
    /// Create a context; its launch time is now
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                token: CancellationToken::new(),
                trigger: Mutex::new(None),
                launched_at: Instant::now(),
                scheduler: Mutex::new(None),
                controllers: Mutex::new(0),
            }),
        }
    }

    /// Time the context was created
    pub fn launched_at(&self) -> Instant {
        self.inner.launched_at
    }

    /// A token cancelled whenever the run shuts down
    pub fn child_token(&self) -> CancellationToken {
        self.inner.token.child_token()
    }

    /// True once a run-wide shutdown was signalled
    pub fn is_shutdown(&self) -> bool {
        self.inner.token.is_cancelled()
    }

    /// The first trigger that shut the run down
    pub fn trigger(&self) -> Option<ShutdownTrigger> {
        self.inner.trigger.lock().clone()
    }

    /// Signal a run-wide shutdown
    ///
    /// Idempotent: only the first trigger is kept. Returns true for the call
    /// that actually initiated the shutdown.
    pub fn signal_shutdown(&self, trigger: ShutdownTrigger) -> bool {
        let first = {
            let mut slot = self.inner.trigger.lock();
            if slot.is_some() {
                false
            } else {
                *slot = Some(trigger.clone());
                true
            }
        };
        if first {
            tracing::info!(reason = %trigger, "Run shutdown signalled");
        }
        self.inner.token.cancel();
        first
    }

    /// The shared scheduler, created on first use
    pub fn scheduler(&self) -> Scheduler {
        self.inner
            .scheduler
            .lock()
            .get_or_insert_with(Scheduler::new)
            .clone()
    }

    /// Number of Controllers currently registered
    pub fn active_controllers(&self) -> usize {
        *self.inner.controllers.lock()
    }

    /// Register a Controller; dropping the guard deregisters it
    ///
    /// The last Controller to deregister cancels the scheduler.
    pub fn register_controller(&self) -> ControllerRegistration {
        *self.inner.controllers.lock() += 1;
        ControllerRegistration {
            context: self.clone(),
        }
    }

    fn deregister_controller(&self) {
        let mut count = self.inner.controllers.lock();
        *count = count.saturating_sub(1);
        if *count == 0 {
            if let Some(scheduler) = self.inner.scheduler.lock().take() {
                tracing::debug!("Last controller deregistered, cancelling scheduler");
                scheduler.cancel();
            }
        }
    }
}

impl std::fmt::Debug for RunContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunContext")
            .field("shutdown", &self.is_shutdown())
            .field("trigger", &self.trigger())
            .field("controllers", &self.active_controllers())
            .finish()
    }
}

/// Keeps a Controller registered with its run context
#[derive(Debug)]
pub struct ControllerRegistration {
    context: RunContext,
}

impl Drop for ControllerRegistration {
    fn drop(&mut self) {
        self.context.deregister_controller();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_first_trigger_wins() {
        let ctx = RunContext::new();
        let token = ctx.child_token();

        assert!(ctx.signal_shutdown(ShutdownTrigger::RunLength));
        assert!(!ctx.signal_shutdown(ShutdownTrigger::External));

        assert!(token.is_cancelled());
        assert_eq!(ctx.trigger(), Some(ShutdownTrigger::RunLength));
    }

    #[tokio::test]
    async fn test_last_controller_cancels_scheduler() {
        let ctx = RunContext::new();
        let first = ctx.register_controller();
        let second = ctx.register_controller();
        let scheduler = ctx.scheduler();

        drop(first);
        assert!(!scheduler.is_cancelled());
        drop(second);
        assert!(scheduler.is_cancelled());
        assert_eq!(ctx.active_controllers(), 0);

        // a later controller gets a fresh scheduler
        let _third = ctx.register_controller();
        assert!(!ctx.scheduler().is_cancelled());
    }

    #[test]
    fn test_independent_contexts() {
        let a = RunContext::new();
        let b = RunContext::new();
        a.signal_shutdown(ShutdownTrigger::External);
        assert!(a.is_shutdown());
        assert!(!b.is_shutdown());
    }
}
