//! Synthetic work units for paceharness
//!
//! These stand in for protocol-specific work bodies and are resolved by tag:
//!
//! - `noop`: returns at once, optionally reporting every Nth iteration as unsuccessful
//! - `sleep`: waits a fixed delay inside the timed span
//! - `faulty`: raises a fatal fault after a number of iterations
//! - `hold`: connects, then holds until shutdown is signalled

#![warn(missing_docs)]
#![warn(clippy::all)]

use std::sync::Arc;
use std::time::Duration;

use paceharness_core::{HarnessResult, Registry, WorkUnit, WorkUnitFactory, WorkerIdentity};
use serde::{Deserialize, Serialize};

mod faulty;
mod hold;
mod noop;
mod sleep;

pub use faulty::FaultyUnit;
pub use hold::HoldUnit;
pub use noop::NoopUnit;
pub use sleep::SleepUnit;

/// Knobs shared by the synthetic units; each unit reads the ones it needs
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UnitOptions {
    /// Per-iteration delay (`sleep`) or connect delay (`hold`)
    #[serde(default)]
    pub delay: Duration,

    /// Successful iterations before the fatal fault (`faulty`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fail_after: Option<u64>,

    /// Report every Nth iteration as unsuccessful (`noop`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fail_every: Option<u64>,
}

/// Constructor stored in the unit registry
pub type UnitConstructor = fn(&UnitOptions, &WorkerIdentity) -> Box<dyn WorkUnit>;

/// Registry of the built-in units
pub fn unit_registry() -> Registry<UnitConstructor> {
    Registry::<UnitConstructor>::new("work unit")
        .register("noop", new_noop)
        .register("sleep", new_sleep)
        .register("faulty", new_faulty)
        .register("hold", new_hold)
}

fn new_noop(options: &UnitOptions, _: &WorkerIdentity) -> Box<dyn WorkUnit> {
    Box::new(NoopUnit::new(options.fail_every))
}

fn new_sleep(options: &UnitOptions, _: &WorkerIdentity) -> Box<dyn WorkUnit> {
    Box::new(SleepUnit::new(options.delay))
}

fn new_faulty(options: &UnitOptions, _: &WorkerIdentity) -> Box<dyn WorkUnit> {
    Box::new(FaultyUnit::new(options.fail_after.unwrap_or(0)))
}

fn new_hold(options: &UnitOptions, _: &WorkerIdentity) -> Box<dyn WorkUnit> {
    Box::new(HoldUnit::new(options.delay))
}

/// Resolve `tag` into a factory that builds one unit per Worker
///
/// # Errors
///
/// Returns [`HarnessError::UnknownTag`](paceharness_core::HarnessError::UnknownTag)
/// listing the registered tags.
pub fn factory(tag: &str, options: UnitOptions) -> HarnessResult<WorkUnitFactory> {
    let constructor = *unit_registry().resolve(tag)?;
    tracing::debug!(unit = tag, ?options, "Resolved work unit");
    Ok(Arc::new(move |identity: &WorkerIdentity| {
        constructor(&options, identity)
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use paceharness_core::HarnessError;

    #[test]
    fn test_registry_tags() {
        assert_eq!(unit_registry().tags(), vec!["faulty", "hold", "noop", "sleep"]);
    }

    #[test]
    fn test_unknown_unit_lists_known_tags() {
        let err = factory("http", UnitOptions::default()).err().unwrap();
        assert!(matches!(err, HarnessError::UnknownTag { kind: "work unit", .. }));
        assert!(err.to_string().contains("faulty, hold, noop, sleep"));
    }

    #[test]
    fn test_factory_builds_named_units() {
        let make = factory("sleep", UnitOptions::default()).unwrap();
        let unit = make(&WorkerIdentity { id: 7 });
        assert_eq!(unit.name(), "sleep");
    }

    #[test]
    fn test_options_from_json() {
        let options: UnitOptions =
            serde_json::from_str(r#"{"delay":{"secs":0,"nanos":5000000},"fail_every":4}"#).unwrap();
        assert_eq!(options.delay, Duration::from_millis(5));
        assert_eq!(options.fail_every, Some(4));
        assert!(options.fail_after.is_none());
    }
}
