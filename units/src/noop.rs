//! Unit that does nothing

use async_trait::async_trait;
use paceharness_core::{UnitContext, WorkFault, WorkUnit};

/// Returns immediately; every `fail_every`th iteration reports unsuccessful
#[derive(Debug, Default)]
pub struct NoopUnit {
    fail_every: Option<u64>,
    calls: u64,
}

impl NoopUnit {
    /// Create a unit; `fail_every` of `Some(0)` is treated as never
    pub fn new(fail_every: Option<u64>) -> Self {
        Self {
            fail_every: fail_every.filter(|n| *n > 0),
            calls: 0,
        }
    }
}

#[async_trait]
impl WorkUnit for NoopUnit {
    fn name(&self) -> &str {
        "noop"
    }

    async fn perform_one_unit(&mut self, _ctx: &mut UnitContext) -> Result<bool, WorkFault> {
        self.calls += 1;
        Ok(self.fail_every.map_or(true, |n| self.calls % n != 0))
    }
}
