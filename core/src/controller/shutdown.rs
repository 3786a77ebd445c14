//! Bounded, two-phase shutdown of a Controller's Workers
//!
//! Every Worker is signalled first. Workers that have not reached Ending by
//! half the grace window are interrupted; whatever is still not Ended when
//! the window closes is reported and abandoned.

use std::time::Duration;

use tokio::time::Instant;

use crate::error::HarnessError;
use crate::worker::WorkerStatus;

use super::executor::ControllerInner;

/// Polls between progress warnings
const WARN_EVERY: u32 = 10;

pub(crate) struct ShutdownOutcome {
    pub(crate) interrupted: Vec<String>,
    pub(crate) stragglers: Vec<String>,
    pub(crate) elapsed: Duration,
}

pub(crate) async fn shutdown(inner: &ControllerInner) -> ShutdownOutcome {
    let began = Instant::now();
    let grace = inner.config.shutdown_grace;
    let poll = inner.config.shutdown_poll.max(Duration::from_millis(1));
    let deadline = began + grace;
    let interrupt_at = began + grace / 2;

    inner.stop.cancel();
    let slots = inner.pool.slots();
    for slot in &slots {
        if slot.discard_pending() {
            tracing::debug!(worker = slot.shared().name(), "Discarded unstarted worker");
        } else {
            slot.shared().signal_shutdown();
        }
    }

    let mut changes = inner.pool_changes.subscribe();
    let mut interrupted = Vec::new();
    let mut polls = 0u32;

    loop {
        changes.borrow_and_update();
        let waiting: Vec<_> = slots
            .iter()
            .filter(|slot| !slot.shared().status().is_ended())
            .collect();
        if waiting.is_empty() {
            break;
        }

        let now = Instant::now();
        if now >= deadline {
            break;
        }

        if interrupted.is_empty() && now >= interrupt_at {
            for slot in &waiting {
                let worker = slot.shared();
                if !worker.status().reached(WorkerStatus::ENDING) {
                    tracing::warn!(worker = worker.name(), "Interrupting worker");
                    slot.abort();
                    interrupted.push(worker.name().to_string());
                }
            }
        }

        polls += 1;
        if polls % WARN_EVERY == 0 {
            tracing::warn!(
                remaining = waiting.len(),
                elapsed_secs = now.duration_since(began).as_secs_f64(),
                "Waiting for workers to end"
            );
        }

        let phase_end = if now < interrupt_at { interrupt_at } else { deadline };
        let wake = (now + poll).min(phase_end);
        tokio::select! {
            _ = changes.changed() => {}
            _ = tokio::time::sleep_until(wake) => {}
        }
    }

    let stragglers: Vec<String> = slots
        .iter()
        .filter(|slot| !slot.shared().status().is_ended())
        .map(|slot| {
            slot.abort();
            slot.shared().name().to_string()
        })
        .collect();

    if !stragglers.is_empty() {
        let err = HarnessError::ShutdownTimeout {
            workers: stragglers.clone(),
            grace,
        };
        tracing::warn!(error = %err, "Abandoning workers");
    }

    let elapsed = began.elapsed();
    tracing::debug!(
        elapsed_ms = elapsed.as_millis() as u64,
        interrupted = interrupted.len(),
        "Shutdown complete"
    );

    ShutdownOutcome {
        interrupted,
        stragglers,
        elapsed,
    }
}
