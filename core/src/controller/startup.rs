//! Worker startup policies

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;

use crate::config::StartupPolicy;
use crate::error::{HarnessError, HarnessResult};
use crate::worker::WorkerStatus;

use super::executor::ControllerInner;
use super::pool::WorkerSlot;

/// Connection times observed while starting Workers
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct StartupReport {
    /// Workers started
    pub threads: usize,
    /// Fastest time from spawn to Running, in milliseconds
    pub fastest_ms: f64,
    /// Slowest time from spawn to Running, in milliseconds
    pub slowest_ms: f64,
    /// Mean time from spawn to Running, in milliseconds
    pub avg_ms: f64,
}

impl StartupReport {
    fn from_times(times: &[Duration]) -> Self {
        if times.is_empty() {
            return Self::default();
        }
        let ms: Vec<f64> = times.iter().map(|t| t.as_secs_f64() * 1000.0).collect();
        Self {
            threads: ms.len(),
            fastest_ms: ms.iter().copied().fold(f64::INFINITY, f64::min),
            slowest_ms: ms.iter().copied().fold(0.0, f64::max),
            avg_ms: ms.iter().sum::<f64>() / ms.len() as f64,
        }
    }
}

impl fmt::Display for StartupReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "threads={},fastest_conn={:.0}ms,slowest_conn={:.0}ms,avg_conn={:.0}ms",
            self.threads, self.fastest_ms, self.slowest_ms, self.avg_ms
        )
    }
}

enum Progress {
    Started(Duration),
    Pending,
    Failed(HarnessError),
}

fn check(slot: &WorkerSlot, began: Instant, timeout: Duration, now: Instant) -> Progress {
    let shared = slot.shared();
    let status = shared.status();
    if status.is_error() {
        return Progress::Failed(HarnessError::WorkerStartFailed {
            worker: shared.name().to_string(),
        });
    }
    if status.reached(WorkerStatus::RUNNING) {
        return Progress::Started(now.saturating_duration_since(began));
    }
    if now.saturating_duration_since(began) >= timeout {
        return Progress::Failed(HarnessError::StartupTimeout {
            worker: shared.name().to_string(),
            timeout,
        });
    }
    Progress::Pending
}

/// Start every Worker still waiting in the pool under the configured policy
///
/// Returns early (without error) if the Controller is stopped meanwhile.
pub(crate) async fn start_pending(inner: &ControllerInner) -> HarnessResult<StartupReport> {
    let pending = inner.pool.pending();
    if pending.is_empty() {
        return Ok(StartupReport::default());
    }

    let times = match inner.config.startup.policy {
        StartupPolicy::Sequential => sequential(inner, pending).await?,
        StartupPolicy::Pooled { concurrency } => pooled(inner, pending, concurrency.max(1)).await?,
    };

    let report = StartupReport::from_times(&times);
    tracing::info!(%report, "Workers started");

    let timeout_ms = inner.config.startup.timeout.as_secs_f64() * 1000.0;
    if timeout_ms > 0.0 && report.slowest_ms > timeout_ms / 2.0 {
        tracing::warn!(
            slowest_ms = report.slowest_ms,
            timeout_ms,
            "Slow worker startup, close to the startup timeout"
        );
    }
    Ok(report)
}

async fn sequential(
    inner: &ControllerInner,
    pending: Vec<Arc<WorkerSlot>>,
) -> HarnessResult<Vec<Duration>> {
    let timeout = inner.config.startup.timeout;
    let delay = inner.config.startup.inter_start_delay;
    let mut changes = inner.pool_changes.subscribe();
    let mut times = Vec::with_capacity(pending.len());

    for (i, slot) in pending.iter().enumerate() {
        if inner.stop.is_cancelled() {
            break;
        }
        if i > 0 && !delay.is_zero() {
            tokio::select! {
                biased;
                _ = inner.stop.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        let began = Instant::now();
        slot.start();
        tracing::debug!(worker = slot.shared().name(), "Starting worker");
        if timeout.is_zero() {
            times.push(Duration::ZERO);
            continue;
        }

        loop {
            changes.borrow_and_update();
            match check(slot, began, timeout, Instant::now()) {
                Progress::Started(elapsed) => {
                    times.push(elapsed);
                    break;
                }
                Progress::Failed(e) => return Err(e),
                Progress::Pending => {}
            }
            if inner.stop.is_cancelled() {
                return Ok(times);
            }
            tokio::select! {
                biased;
                _ = inner.stop.cancelled() => {}
                _ = changes.changed() => {}
                _ = tokio::time::sleep_until(began + timeout) => {}
            }
        }
    }
    Ok(times)
}

async fn pooled(
    inner: &ControllerInner,
    pending: Vec<Arc<WorkerSlot>>,
    concurrency: usize,
) -> HarnessResult<Vec<Duration>> {
    let timeout = inner.config.startup.timeout;
    let delay = inner.config.startup.inter_start_delay;
    let mut queue: VecDeque<Arc<WorkerSlot>> = pending.into();
    let mut starting: VecDeque<(Arc<WorkerSlot>, Instant)> = VecDeque::with_capacity(concurrency);
    let mut changes = inner.pool_changes.subscribe();
    let mut times = Vec::with_capacity(queue.len());
    let mut next_spawn = Instant::now();

    loop {
        changes.borrow_and_update();
        let now = Instant::now();

        // oldest first, so a stuck Worker is the one reported
        let mut i = 0;
        while i < starting.len() {
            let (slot, began) = &starting[i];
            match check(slot, *began, timeout, now) {
                Progress::Started(elapsed) => {
                    times.push(elapsed);
                    starting.remove(i);
                }
                Progress::Failed(e) => return Err(e),
                Progress::Pending => i += 1,
            }
        }

        if inner.stop.is_cancelled() {
            return Ok(times);
        }

        while starting.len() < concurrency && now >= next_spawn {
            let Some(slot) = queue.pop_front() else {
                break;
            };
            slot.start();
            next_spawn = now + delay;
            tracing::debug!(worker = slot.shared().name(), "Starting worker");
            if timeout.is_zero() {
                times.push(Duration::ZERO);
            } else {
                starting.push_back((slot, now));
            }
        }

        let mut deadline = starting.front().map(|(_, began)| *began + timeout);
        if !queue.is_empty() && starting.len() < concurrency {
            deadline = Some(deadline.map_or(next_spawn, |d| d.min(next_spawn)));
        }
        let Some(deadline) = deadline else {
            break;
        };

        tokio::select! {
            biased;
            _ = inner.stop.cancelled() => {}
            _ = changes.changed() => {}
            _ = tokio::time::sleep_until(deadline) => {}
        }
    }
    Ok(times)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_from_times() {
        let report = StartupReport::from_times(&[
            Duration::from_millis(10),
            Duration::from_millis(30),
            Duration::from_millis(20),
        ]);
        assert_eq!(report.threads, 3);
        assert_eq!(
            report.to_string(),
            "threads=3,fastest_conn=10ms,slowest_conn=30ms,avg_conn=20ms"
        );
    }

    #[test]
    fn test_empty_report() {
        assert_eq!(StartupReport::from_times(&[]).threads, 0);
    }
}
