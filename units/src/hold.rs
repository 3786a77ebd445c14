//! Unit that holds a simulated connection open until shutdown

use std::time::Duration;

use async_trait::async_trait;
use paceharness_core::{ShutdownStyle, UnitContext, WorkFault, WorkUnit};

/// Spends `connect_delay` in setup, then blocks in its first iteration
/// until the Worker is told to stop
#[derive(Debug, Clone, Copy)]
pub struct HoldUnit {
    connect_delay: Duration,
}

impl HoldUnit {
    /// Create a unit with the given connect delay
    pub fn new(connect_delay: Duration) -> Self {
        Self { connect_delay }
    }
}

#[async_trait]
impl WorkUnit for HoldUnit {
    fn name(&self) -> &str {
        "hold"
    }

    fn shutdown_style(&self) -> ShutdownStyle {
        ShutdownStyle::Signalled
    }

    async fn setup(&mut self, ctx: &mut UnitContext) -> Result<(), WorkFault> {
        tokio::time::sleep(self.connect_delay).await;
        tracing::debug!(worker = ctx.worker_name(), "Connection held");
        Ok(())
    }

    async fn perform_one_unit(&mut self, ctx: &mut UnitContext) -> Result<bool, WorkFault> {
        ctx.wait_for_shutdown().await;
        Ok(true)
    }

    async fn teardown(&mut self, ctx: &mut UnitContext) {
        tracing::debug!(worker = ctx.worker_name(), "Connection released");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use paceharness_core::{RunContext, WorkerBuilder, WorkerStatus};

    #[tokio::test(start_paused = true)]
    async fn test_holds_until_signalled() {
        let run = RunContext::new();
        let worker = WorkerBuilder::new(1)
            .unit(Box::new(HoldUnit::new(Duration::from_millis(200))))
            .run_context(run.clone())
            .token(run.child_token())
            .build()
            .unwrap();
        let shared = worker.shared().clone();
        let handle = worker.spawn();

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(shared.status().state(), WorkerStatus::CONNECTING);

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(shared.status().state(), WorkerStatus::RUNNING);

        shared.signal_shutdown();
        handle.await.unwrap();
        assert!(shared.status().is_ended());
        assert!(!shared.status().is_error());
    }
}
