//! # Run Store
//!
//! Keeps every [`WorkflowRun`] observable while it progresses and for a bounded
//! window after it finishes. Each run is published through its own `watch`
//! channel so pollers read a consistent snapshot without blocking the executor.

use super::types::WorkflowRun;
use crate::error::{ResilienceError, Result};
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::debug;
use uuid::Uuid;

#[derive(Debug)]
struct RunEntry {
    sender: Arc<watch::Sender<WorkflowRun>>,
    cancel: watch::Sender<bool>,
    finished_at: Option<Instant>,
}

#[derive(Debug)]
pub struct RunStore {
    runs: DashMap<Uuid, RunEntry>,
    retention: Duration,
    max_retained: usize,
}

impl RunStore {
    pub fn new(retention: Duration, max_retained: usize) -> Self {
        Self {
            runs: DashMap::new(),
            retention,
            max_retained,
        }
    }

    /// Register a new run and hand back the tracker its executor writes through
    pub fn insert(&self, run: WorkflowRun) -> RunTracker {
        let id = run.id;
        let (sender, _) = watch::channel(run);
        let sender = Arc::new(sender);
        let (cancel, cancel_rx) = watch::channel(false);

        self.runs.insert(
            id,
            RunEntry {
                sender: Arc::clone(&sender),
                cancel,
                finished_at: None,
            },
        );

        RunTracker {
            id,
            sender,
            cancel: cancel_rx,
        }
    }

    /// Current snapshot of a run
    pub fn get(&self, id: Uuid) -> Option<WorkflowRun> {
        self.runs.get(&id).map(|entry| entry.sender.borrow().clone())
    }

    /// Receiver that observes every update of a run
    pub fn watch(&self, id: Uuid) -> Result<watch::Receiver<WorkflowRun>> {
        self.runs
            .get(&id)
            .map(|entry| entry.sender.subscribe())
            .ok_or(ResilienceError::UnknownRun(id))
    }

    /// Request cancellation. Returns `false` when the run already finished.
    pub fn cancel(&self, id: Uuid) -> Result<bool> {
        let entry = self.runs.get(&id).ok_or(ResilienceError::UnknownRun(id))?;
        if entry.finished_at.is_some() || entry.sender.borrow().is_finished() {
            return Ok(false);
        }
        entry.cancel.send_replace(true);
        Ok(true)
    }

    /// Start the retention window of a run
    pub fn mark_finished(&self, id: Uuid) {
        if let Some(mut entry) = self.runs.get_mut(&id) {
            entry.finished_at.get_or_insert_with(Instant::now);
        }
    }

    /// Drop finished runs older than the retention window, then the oldest
    /// finished runs beyond the retention cap. Running runs are never dropped.
    pub fn prune(&self) -> usize {
        let now = Instant::now();
        let before = self.runs.len();

        self.runs.retain(|_, entry| match entry.finished_at {
            Some(finished) => now.duration_since(finished) < self.retention,
            None => true,
        });

        let mut finished: Vec<(Uuid, Instant)> = self
            .runs
            .iter()
            .filter_map(|entry| entry.finished_at.map(|at| (*entry.key(), at)))
            .collect();
        if finished.len() > self.max_retained {
            finished.sort_by_key(|(_, at)| *at);
            let excess = finished.len() - self.max_retained;
            for (id, _) in finished.into_iter().take(excess) {
                self.runs.remove(&id);
            }
        }

        let removed = before.saturating_sub(self.runs.len());
        if removed > 0 {
            debug!(removed = removed, "🧹 Pruned finished workflow runs");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.runs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.runs.is_empty()
    }
}

/// Write side of one run, owned by the task executing it
#[derive(Debug, Clone)]
pub struct RunTracker {
    id: Uuid,
    sender: Arc<watch::Sender<WorkflowRun>>,
    cancel: watch::Receiver<bool>,
}

impl RunTracker {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Mutate the run and notify observers
    pub fn update<F>(&self, f: F)
    where
        F: FnOnce(&mut WorkflowRun),
    {
        self.sender.send_modify(f);
    }

    pub fn snapshot(&self) -> WorkflowRun {
        self.sender.borrow().clone()
    }

    pub fn is_cancelled(&self) -> bool {
        *self.cancel.borrow()
    }

    /// Completes once cancellation is requested
    pub async fn cancelled(&self) {
        let mut receiver = self.cancel.clone();
        if receiver.wait_for(|cancelled| *cancelled).await.is_err() {
            // Entry gone: nobody can cancel this run any more
            std::future::pending::<()>().await;
        }
    }
}
