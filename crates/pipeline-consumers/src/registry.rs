//! Worker registry for tracking consumer tick outcomes.
//!
//! The `WorkerRegistry` is shared between the polling workers and the
//! daemon, which prints a summary of every worker on shutdown.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::consumer::TickOutcome;
use crate::retry::Disposition;

/// Short result of the most recent tick.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum LastOutcome {
    Idle,
    Completed,
    Discarded(String),
    Retried(String),
    /// The tick itself failed, e.g. the queue could not be read
    Error(String),
}

/// Status of a registered worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerStatus {
    pub worker_name: String,
    /// Queue the worker polls
    pub queue: String,
    pub last_tick: Option<DateTime<Utc>>,
    pub last_duration_ms: Option<u64>,
    pub last_outcome: Option<LastOutcome>,
    pub tick_count: u64,
    /// Ticks that received a message
    pub handled_count: u64,
    pub completed_count: u64,
    pub discarded_count: u64,
    pub retried_count: u64,
    pub error_count: u64,
    pub is_running: bool,
}

impl WorkerStatus {
    pub fn new(worker_name: String, queue: String) -> Self {
        Self {
            worker_name,
            queue,
            last_tick: None,
            last_duration_ms: None,
            last_outcome: None,
            tick_count: 0,
            handled_count: 0,
            completed_count: 0,
            discarded_count: 0,
            retried_count: 0,
            error_count: 0,
            is_running: false,
        }
    }

    /// One-line summary for shutdown logs.
    pub fn summary(&self) -> String {
        format!(
            "{} ({}): ticks={} handled={} completed={} discarded={} retried={} errors={}",
            self.worker_name,
            self.queue,
            self.tick_count,
            self.handled_count,
            self.completed_count,
            self.discarded_count,
            self.retried_count,
            self.error_count
        )
    }
}

/// Thread-safe registry of worker status.
///
/// # Example
///
/// ```
/// use pipeline_consumers::{TickOutcome, WorkerRegistry};
///
/// let registry = WorkerRegistry::new();
/// registry.register("ingest", "uploads-development");
/// registry.record_start("ingest");
/// registry.record_tick("ingest", Ok(&TickOutcome::Idle), 3);
///
/// let status = registry.get_status("ingest").unwrap();
/// assert_eq!(status.tick_count, 1);
/// assert!(!status.is_running);
/// ```
pub struct WorkerRegistry {
    workers: RwLock<HashMap<String, WorkerStatus>>,
}

impl WorkerRegistry {
    pub fn new() -> Self {
        Self {
            workers: RwLock::new(HashMap::new()),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, WorkerStatus>> {
        self.workers.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, WorkerStatus>> {
        self.workers.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a worker, replacing any previous entry of the same name.
    pub fn register(&self, worker_name: &str, queue: &str) {
        self.write().insert(
            worker_name.to_string(),
            WorkerStatus::new(worker_name.to_string(), queue.to_string()),
        );
    }

    pub fn record_start(&self, worker_name: &str) {
        if let Some(status) = self.write().get_mut(worker_name) {
            status.is_running = true;
        }
    }

    /// Record a finished tick.
    pub fn record_tick(
        &self,
        worker_name: &str,
        outcome: Result<&TickOutcome, String>,
        duration_ms: u64,
    ) {
        let mut workers = self.write();
        let Some(status) = workers.get_mut(worker_name) else {
            return;
        };
        status.is_running = false;
        status.last_tick = Some(Utc::now());
        status.last_duration_ms = Some(duration_ms);
        status.tick_count += 1;

        let last = match outcome {
            Ok(TickOutcome::Idle) => LastOutcome::Idle,
            Ok(TickOutcome::Handled { disposition, .. }) => {
                status.handled_count += 1;
                match disposition {
                    Disposition::Complete => {
                        status.completed_count += 1;
                        LastOutcome::Completed
                    }
                    Disposition::Discard { reason } => {
                        status.discarded_count += 1;
                        LastOutcome::Discarded(reason.clone())
                    }
                    Disposition::Retry { reason } => {
                        status.retried_count += 1;
                        LastOutcome::Retried(reason.clone())
                    }
                }
            }
            Err(message) => {
                status.error_count += 1;
                LastOutcome::Error(message)
            }
        };
        status.last_outcome = Some(last);
    }

    pub fn get_status(&self, worker_name: &str) -> Option<WorkerStatus> {
        self.read().get(worker_name).cloned()
    }

    /// Status of every worker, sorted by name.
    pub fn get_all_status(&self) -> Vec<WorkerStatus> {
        let mut all: Vec<WorkerStatus> = self.read().values().cloned().collect();
        all.sort_by(|a, b| a.worker_name.cmp(&b.worker_name));
        all
    }

    pub fn is_running(&self, worker_name: &str) -> bool {
        self.read()
            .get(worker_name)
            .map(|s| s.is_running)
            .unwrap_or(false)
    }

    pub fn worker_count(&self) -> usize {
        self.read().len()
    }
}

impl Default for WorkerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handled(disposition: Disposition) -> TickOutcome {
        TickOutcome::Handled {
            message_id: "m1".to_string(),
            disposition,
        }
    }

    #[test]
    fn test_register_and_get() {
        let registry = WorkerRegistry::new();
        registry.register("ingest", "uploads-test");

        let status = registry.get_status("ingest").unwrap();
        assert_eq!(status.queue, "uploads-test");
        assert_eq!(status.tick_count, 0);
        assert!(status.last_outcome.is_none());
    }

    #[test]
    fn test_record_dispositions() {
        let registry = WorkerRegistry::new();
        registry.register("provision", "finished-uploads-test");

        registry.record_tick("provision", Ok(&handled(Disposition::Complete)), 10);
        registry.record_tick(
            "provision",
            Ok(&handled(Disposition::Retry {
                reason: "429".into(),
            })),
            5,
        );
        registry.record_tick(
            "provision",
            Ok(&handled(Disposition::Discard {
                reason: "missing".into(),
            })),
            1,
        );
        registry.record_tick("provision", Ok(&TickOutcome::Idle), 1);

        let status = registry.get_status("provision").unwrap();
        assert_eq!(status.tick_count, 4);
        assert_eq!(status.handled_count, 3);
        assert_eq!(status.completed_count, 1);
        assert_eq!(status.retried_count, 1);
        assert_eq!(status.discarded_count, 1);
        assert_eq!(status.last_outcome, Some(LastOutcome::Idle));
        assert_eq!(status.last_duration_ms, Some(1));
    }

    #[test]
    fn test_record_error() {
        let registry = WorkerRegistry::new();
        registry.register("ingest", "uploads-test");
        registry.record_start("ingest");
        assert!(registry.is_running("ingest"));

        registry.record_tick("ingest", Err("queue unavailable".to_string()), 2);
        let status = registry.get_status("ingest").unwrap();
        assert!(!status.is_running);
        assert_eq!(status.error_count, 1);
        assert_eq!(
            status.last_outcome,
            Some(LastOutcome::Error("queue unavailable".to_string()))
        );
        assert!(status.summary().contains("errors=1"));
    }

    #[test]
    fn test_unknown_worker() {
        let registry = WorkerRegistry::new();
        assert!(registry.get_status("nope").is_none());
        assert!(!registry.is_running("nope"));

        registry.record_start("nope");
        registry.record_tick("nope", Ok(&TickOutcome::Idle), 1);
        assert_eq!(registry.worker_count(), 0);
    }

    #[test]
    fn test_get_all_sorted() {
        let registry = WorkerRegistry::new();
        registry.register("provision", "b");
        registry.register("ingest", "a");

        let names: Vec<String> = registry
            .get_all_status()
            .into_iter()
            .map(|s| s.worker_name)
            .collect();
        assert_eq!(names, vec!["ingest", "provision"]);
    }
}
