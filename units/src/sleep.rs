//! Unit that sleeps for a fixed delay

use std::time::Duration;

use async_trait::async_trait;
use paceharness_core::{UnitContext, WorkFault, WorkUnit};

/// Sleeps `delay` per iteration, all of it inside the timed span
#[derive(Debug, Clone, Copy)]
pub struct SleepUnit {
    delay: Duration,
}

impl SleepUnit {
    /// Create a unit with the given per-iteration delay
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }
}

#[async_trait]
impl WorkUnit for SleepUnit {
    fn name(&self) -> &str {
        "sleep"
    }

    async fn perform_one_unit(&mut self, ctx: &mut UnitContext) -> Result<bool, WorkFault> {
        ctx.start_span();
        tokio::time::sleep(self.delay).await;
        Ok(true)
    }
}
