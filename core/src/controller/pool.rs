//! Worker registry owned by a Controller
//!
//! Append-only while the Controller lives; one coarse lock guards it.

use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::stats::WorkerSource;
use crate::worker::{Worker, WorkerShared};

/// One registry entry: a Worker that is either waiting to start or running
pub(crate) struct WorkerSlot {
    shared: Arc<WorkerShared>,
    pending: Mutex<Option<Worker>>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl WorkerSlot {
    fn new(worker: Worker) -> Self {
        Self {
            shared: Arc::clone(worker.shared()),
            pending: Mutex::new(Some(worker)),
            handle: Mutex::new(None),
        }
    }

    pub(crate) fn shared(&self) -> &Arc<WorkerShared> {
        &self.shared
    }

    /// Spawn the Worker; false if it was already started
    pub(crate) fn start(&self) -> bool {
        let Some(worker) = self.pending.lock().take() else {
            return false;
        };
        *self.handle.lock() = Some(worker.spawn());
        true
    }

    pub(crate) fn is_spawned(&self) -> bool {
        self.pending.lock().is_none()
    }

    /// Drop a Worker that never started, recording it as Ended
    pub(crate) fn discard_pending(&self) -> bool {
        let discarded = self.pending.lock().take().is_some();
        if discarded {
            self.shared.mark_ended(Instant::now());
        }
        discarded
    }

    /// Forcibly interrupt a running Worker
    pub(crate) fn abort(&self) {
        if let Some(handle) = self.handle.lock().as_ref() {
            handle.abort();
        }
    }
}

/// Ordered registry of a Controller's Workers
#[derive(Default)]
pub struct WorkerPool {
    slots: RwLock<Vec<Arc<WorkerSlot>>>,
}

impl WorkerPool {
    /// Create an empty pool
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn push(&self, worker: Worker) -> Arc<WorkerSlot> {
        let slot = Arc::new(WorkerSlot::new(worker));
        self.slots.write().push(Arc::clone(&slot));
        slot
    }

    pub(crate) fn slots(&self) -> Vec<Arc<WorkerSlot>> {
        self.slots.read().clone()
    }

    /// Slots added but not yet spawned
    pub(crate) fn pending(&self) -> Vec<Arc<WorkerSlot>> {
        self.slots
            .read()
            .iter()
            .filter(|slot| !slot.is_spawned())
            .cloned()
            .collect()
    }

    /// Number of registered Workers
    pub fn len(&self) -> usize {
        self.slots.read().len()
    }

    /// True when no Worker was ever registered
    pub fn is_empty(&self) -> bool {
        self.slots.read().is_empty()
    }

    /// Workers that have not reached Ending
    pub fn live(&self) -> Vec<Arc<WorkerShared>> {
        self.slots
            .read()
            .iter()
            .filter(|slot| !slot.shared.status().is_terminal())
            .map(|slot| Arc::clone(&slot.shared))
            .collect()
    }

    /// Number of Workers that have not reached Ending
    pub fn live_count(&self) -> usize {
        self.slots
            .read()
            .iter()
            .filter(|slot| !slot.shared.status().is_terminal())
            .count()
    }
}

impl WorkerSource for WorkerPool {
    fn workers(&self) -> Vec<Arc<WorkerShared>> {
        self.slots
            .read()
            .iter()
            .map(|slot| Arc::clone(&slot.shared))
            .collect()
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("workers", &self.len())
            .field("live", &self.live_count())
            .finish()
    }
}
