//! Unit that fails after a number of iterations

use async_trait::async_trait;
use paceharness_core::{UnitContext, WorkFault, WorkUnit};

/// Succeeds `fail_after` times, then raises a fatal fault
#[derive(Debug)]
pub struct FaultyUnit {
    fail_after: u64,
    calls: u64,
}

impl FaultyUnit {
    /// Create a unit that faults on iteration `fail_after + 1`
    pub fn new(fail_after: u64) -> Self {
        Self {
            fail_after,
            calls: 0,
        }
    }
}

#[async_trait]
impl WorkUnit for FaultyUnit {
    fn name(&self) -> &str {
        "faulty"
    }

    async fn perform_one_unit(&mut self, _ctx: &mut UnitContext) -> Result<bool, WorkFault> {
        if self.calls >= self.fail_after {
            return Err(WorkFault::fatal(format!(
                "injected fault after {} iterations",
                self.calls
            )));
        }
        self.calls += 1;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use paceharness_core::{RunContext, ShutdownTrigger, WorkerBuilder};

    #[tokio::test]
    async fn test_fault_shuts_the_run_down() {
        let run = RunContext::new();
        let worker = WorkerBuilder::new(2)
            .unit(Box::new(FaultyUnit::new(4)))
            .run_context(run.clone())
            .token(run.child_token())
            .build()
            .unwrap();
        let shared = worker.shared().clone();

        worker.spawn().await.unwrap();

        assert_eq!(shared.iterations(), 4);
        assert!(shared.status().is_error());
        assert!(shared.status().is_ended());
        assert_eq!(
            run.trigger(),
            Some(ShutdownTrigger::WorkerFault {
                worker: "faulty2".into()
            })
        );
    }
}
