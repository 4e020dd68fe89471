//! Task registry
//!
//! A task is one command fanned out to an ordered list of stations. Each
//! target owns its own outcome cell; completion callbacks write only their
//! own cell, and a cell moves out of `Pending` at most once. The registry
//! map lock only guards inserting and looking up tasks.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::sync::Notify;
use tracing::debug;

use crate::types::*;

/// One dispatched command and its per-target outcomes
#[derive(Debug)]
pub struct Task {
    id: TaskId,
    command: StationCommand,
    created_at: DateTime<Utc>,
    targets: Vec<StationId>,
    cells: HashMap<StationId, Mutex<Outcome>>,
    resolved: Notify,
}

impl Task {
    fn new(id: TaskId, command: StationCommand, targets: Vec<StationId>) -> Self {
        let cells = targets
            .iter()
            .map(|station| (station.clone(), Mutex::new(Outcome::Pending)))
            .collect();

        Self {
            id,
            command,
            created_at: Utc::now(),
            targets,
            cells,
            resolved: Notify::new(),
        }
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn command(&self) -> &StationCommand {
        &self.command
    }

    pub fn targets(&self) -> &[StationId] {
        &self.targets
    }

    /// Settle one target's outcome.
    ///
    /// Returns `false` if the station is not a target, the cell was already
    /// settled, or `outcome` is `Pending`.
    pub fn resolve(&self, station_id: &str, outcome: Outcome) -> bool {
        if outcome.is_pending() {
            return false;
        }

        let Some(cell) = self.cells.get(station_id) else {
            return false;
        };

        {
            let mut current = cell.lock();
            if !current.is_pending() {
                debug!("Task {}: {} already settled, ignoring", self.id, station_id);
                return false;
            }
            debug!("Task {}: {} -> {:?}", self.id, station_id, outcome);
            *current = outcome;
        }

        self.resolved.notify_waiters();
        true
    }

    /// Point-in-time copy of every target's outcome, in target order
    pub fn snapshot(&self) -> TaskSnapshot {
        let results = self
            .targets
            .iter()
            .map(|station| {
                let outcome = self
                    .cells
                    .get(station)
                    .map(|cell| cell.lock().clone())
                    .unwrap_or(Outcome::Pending);
                (station.clone(), outcome)
            })
            .collect();

        TaskSnapshot {
            task_id: self.id,
            command: self.command.clone(),
            created_at: self.created_at,
            results,
        }
    }
}

/// Read-only view of a task returned to pollers
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskSnapshot {
    pub task_id: TaskId,
    pub command: StationCommand,
    pub created_at: DateTime<Utc>,
    pub results: Vec<(StationId, Outcome)>,
}

impl TaskSnapshot {
    /// No target is pending any more
    pub fn is_complete(&self) -> bool {
        self.results.iter().all(|(_, outcome)| !outcome.is_pending())
    }

    pub fn outcome(&self, station_id: &str) -> Option<&Outcome> {
        self.results
            .iter()
            .find(|(station, _)| station == station_id)
            .map(|(_, outcome)| outcome)
    }

    pub fn pending_count(&self) -> usize {
        self.results.iter().filter(|(_, o)| o.is_pending()).count()
    }
}

/// Concurrent map of task handle to task
pub struct TaskRegistry {
    next_id: AtomicU64,
    tasks: RwLock<HashMap<TaskId, Arc<Task>>>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            tasks: RwLock::new(HashMap::new()),
        }
    }

    /// Register a new task with every target pending
    pub fn create(&self, command: StationCommand, targets: Vec<StationId>) -> Arc<Task> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let task = Arc::new(Task::new(id, command, targets));
        self.tasks.write().insert(id, task.clone());
        task
    }

    pub fn get(&self, task_id: TaskId) -> Option<Arc<Task>> {
        self.tasks.read().get(&task_id).cloned()
    }

    /// Current snapshot, or `None` for an unknown handle
    pub fn poll(&self, task_id: TaskId) -> Option<TaskSnapshot> {
        self.get(task_id).map(|task| task.snapshot())
    }

    /// Wait until no target is pending or `timeout` elapses, then snapshot
    pub async fn wait(&self, task_id: TaskId, timeout: Duration) -> Option<TaskSnapshot> {
        let task = self.get(task_id)?;
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            // Register interest before checking so a resolve in between is not lost
            let notified = task.resolved.notified();
            let snapshot = task.snapshot();
            if snapshot.is_complete() {
                return Some(snapshot);
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Some(task.snapshot());
            }
        }
    }

    pub fn len(&self) -> usize {
        self.tasks.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for TaskRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trigger() -> StationCommand {
        StationCommand::TriggerMessage {
            requested_message: MessageTrigger::StatusNotification,
            connector_id: None,
        }
    }

    fn targets(ids: &[&str]) -> Vec<StationId> {
        ids.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_task_starts_pending() {
        let registry = TaskRegistry::new();
        let task = registry.create(trigger(), targets(&["CP1", "CP2"]));

        let snapshot = registry.poll(task.id()).unwrap();
        assert_eq!(snapshot.results.len(), 2);
        assert_eq!(snapshot.pending_count(), 2);
        assert!(!snapshot.is_complete());
        assert_eq!(snapshot.results[0].0, "CP1");
    }

    #[test]
    fn test_ids_are_monotonic() {
        let registry = TaskRegistry::new();
        let a = registry.create(trigger(), targets(&["CP1"]));
        let b = registry.create(trigger(), targets(&["CP1"]));
        assert!(b.id() > a.id());
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_resolve_once() {
        let registry = TaskRegistry::new();
        let task = registry.create(trigger(), targets(&["CP1"]));

        assert!(!task.resolve("CP1", Outcome::Pending));
        assert!(task.resolve("CP1", Outcome::Failure(FailureReason::Timeout)));
        assert!(!task.resolve(
            "CP1",
            Outcome::Success {
                payload: serde_json::json!({"status": "Accepted"})
            }
        ));
        assert!(!task.resolve("CP9", Outcome::Failure(FailureReason::Timeout)));

        let snapshot = registry.poll(task.id()).unwrap();
        assert_eq!(
            snapshot.outcome("CP1"),
            Some(&Outcome::Failure(FailureReason::Timeout))
        );
        assert!(snapshot.is_complete());
    }

    #[test]
    fn test_poll_unknown() {
        let registry = TaskRegistry::new();
        assert!(registry.poll(99).is_none());
    }

    #[tokio::test]
    async fn test_wait_returns_on_completion() {
        let registry = Arc::new(TaskRegistry::new());
        let task = registry.create(trigger(), targets(&["CP1"]));

        let resolver = task.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            resolver.resolve("CP1", Outcome::Success { payload: serde_json::json!({}) });
        });

        let snapshot = registry.wait(task.id(), Duration::from_secs(5)).await.unwrap();
        assert!(snapshot.is_complete());
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_times_out_with_pending() {
        let registry = TaskRegistry::new();
        let task = registry.create(trigger(), targets(&["CP1"]));

        let snapshot = registry.wait(task.id(), Duration::from_secs(1)).await.unwrap();
        assert_eq!(snapshot.pending_count(), 1);
    }
}
