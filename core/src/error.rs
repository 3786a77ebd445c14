//! Error types for paceharness-core

use std::time::Duration;

use thiserror::Error;

/// Core error type
#[derive(Error, Debug)]
pub enum HarnessError {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// A required builder field was never set
    #[error("missing required configuration: {0}")]
    MissingConfig(&'static str),

    /// A registry lookup used a tag nobody registered
    #[error("unknown {kind} '{tag}' (known: {known})")]
    UnknownTag {
        /// What was being looked up ("statistics", "work unit", ...)
        kind: &'static str,
        /// The tag that failed to resolve
        tag: String,
        /// Comma-separated list of registered tags
        known: String,
    },

    /// A worker did not reach Running within its startup timeout
    #[error("worker {worker} did not start within {timeout:?}")]
    StartupTimeout {
        /// Worker name
        worker: String,
        /// Configured startup timeout
        timeout: Duration,
    },

    /// A worker entered Error while starting
    #[error("worker {worker} failed while starting")]
    WorkerStartFailed {
        /// Worker name
        worker: String,
    },

    /// A work unit raised a fatal fault
    #[error("worker {worker} faulted: {message}")]
    WorkerFault {
        /// Worker name
        worker: String,
        /// Fault description
        message: String,
    },

    /// A wait ended without the shutdown it was waiting for
    #[error("wait interrupted outside shutdown: {0}")]
    InterruptedWait(&'static str),

    /// Workers still alive when the grace window elapsed
    #[error("{} worker(s) still running after {grace:?}: {}", .workers.len(), .workers.join(" "))]
    ShutdownTimeout {
        /// Names of the stragglers
        workers: Vec<String>,
        /// The grace window that elapsed
        grace: Duration,
    },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// CSV output error
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

impl HarnessError {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        HarnessError::Config(msg.into())
    }

    /// Create a missing-configuration error
    pub fn missing_config(field: &'static str) -> Self {
        HarnessError::MissingConfig(field)
    }

    /// Create a worker fault error
    pub fn worker_fault(worker: impl Into<String>, message: impl Into<String>) -> Self {
        HarnessError::WorkerFault {
            worker: worker.into(),
            message: message.into(),
        }
    }

    /// True for the error classes that abort a startup
    pub fn is_startup_failure(&self) -> bool {
        matches!(
            self,
            HarnessError::StartupTimeout { .. } | HarnessError::WorkerStartFailed { .. }
        )
    }
}

/// Result type alias
pub type HarnessResult<T> = std::result::Result<T, HarnessError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shutdown_timeout_lists_workers() {
        let err = HarnessError::ShutdownTimeout {
            workers: vec!["noop1".into(), "noop3".into()],
            grace: Duration::from_secs(2),
        };
        let msg = err.to_string();
        assert!(msg.starts_with("2 worker(s)"));
        assert!(msg.contains("noop1 noop3"));
    }

    #[test]
    fn test_startup_failure_classification() {
        assert!(HarnessError::StartupTimeout {
            worker: "w1".into(),
            timeout: Duration::from_secs(1)
        }
        .is_startup_failure());
        assert!(HarnessError::WorkerStartFailed { worker: "w1".into() }.is_startup_failure());
        assert!(!HarnessError::config("bad").is_startup_failure());
        assert!(!HarnessError::InterruptedWait("monitor").is_startup_failure());
    }
}
