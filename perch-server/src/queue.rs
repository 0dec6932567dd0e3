//! Queue Gateway
//!
//! The work queue agents pull root procs from. Only the push/evict/error
//! contract is used by the server; scheduling onto agents happens elsewhere.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QueueError {
    /// The task was cancelled together with its build.
    #[error("queue: task canceled")]
    Cancel,

    #[error("queue: {0}")]
    Unavailable(String),
}

/// One unit of work, identified by the id of its root proc
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Task {
    pub id: String,
    pub labels: HashMap<String, String>,
    pub dependencies: Vec<String>,
    pub data: serde_json::Value,
}

/// Snapshot of the queue for diagnostics
#[derive(Debug, Clone, Default, Serialize)]
pub struct QueueInfo {
    pub pending: Vec<Task>,
    pub errored: HashMap<String, String>,
}

/// Work queue operations
///
/// `evict_at_once` and `error_at_once` must treat unknown or already removed
/// ids as no-ops.
#[async_trait]
pub trait Queue: Send + Sync {
    async fn push_at_once(&self, tasks: Vec<Task>) -> Result<(), QueueError>;

    /// Remove tasks that have not been picked up yet.
    async fn evict_at_once(&self, ids: &[String]) -> Result<(), QueueError>;

    /// Resolve tasks with a failure, signalling any agent working on them.
    async fn error_at_once(&self, ids: &[String], err: QueueError) -> Result<(), QueueError>;

    async fn info(&self) -> QueueInfo;
}

#[derive(Default)]
struct Inner {
    pending: VecDeque<Task>,
    errored: HashMap<String, QueueError>,
}

/// In-process FIFO queue
#[derive(Default)]
pub struct MemoryQueue {
    inner: Mutex<Inner>,
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl Queue for MemoryQueue {
    async fn push_at_once(&self, tasks: Vec<Task>) -> Result<(), QueueError> {
        let mut inner = self.lock();
        for task in tasks {
            inner.errored.remove(&task.id);
            inner.pending.push_back(task);
        }
        Ok(())
    }

    async fn evict_at_once(&self, ids: &[String]) -> Result<(), QueueError> {
        if ids.is_empty() {
            return Ok(());
        }
        let mut inner = self.lock();
        inner.pending.retain(|t| !ids.contains(&t.id));
        Ok(())
    }

    async fn error_at_once(&self, ids: &[String], err: QueueError) -> Result<(), QueueError> {
        let mut inner = self.lock();
        inner.pending.retain(|t| !ids.contains(&t.id));
        for id in ids {
            inner.errored.insert(id.clone(), err.clone());
        }
        Ok(())
    }

    async fn info(&self) -> QueueInfo {
        let inner = self.lock();
        QueueInfo {
            pending: inner.pending.iter().cloned().collect(),
            errored: inner
                .errored
                .iter()
                .map(|(id, err)| (id.clone(), err.to_string()))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task(id: &str) -> Task {
        Task {
            id: id.to_string(),
            labels: HashMap::new(),
            dependencies: Vec::new(),
            data: serde_json::Value::Null,
        }
    }

    #[tokio::test]
    async fn test_evict_removes_pending_tasks() {
        let queue = MemoryQueue::new();
        queue
            .push_at_once(vec![task("1"), task("2"), task("3")])
            .await
            .unwrap();

        queue.evict_at_once(&["2".to_string()]).await.unwrap();

        let ids: Vec<String> = queue.info().await.pending.into_iter().map(|t| t.id).collect();
        assert_eq!(ids, ["1", "3"]);
    }

    #[tokio::test]
    async fn test_unknown_ids_are_noops() {
        let queue = MemoryQueue::new();
        queue.push_at_once(vec![task("1")]).await.unwrap();

        queue.evict_at_once(&["9".to_string()]).await.unwrap();
        queue.evict_at_once(&[]).await.unwrap();

        assert_eq!(queue.info().await.pending.len(), 1);
    }

    #[tokio::test]
    async fn test_error_records_failure() {
        let queue = MemoryQueue::new();
        queue.push_at_once(vec![task("1")]).await.unwrap();

        queue
            .error_at_once(&["1".to_string()], QueueError::Cancel)
            .await
            .unwrap();

        assert!(queue.info().await.pending.is_empty());
        assert_eq!(queue.info().await.errored["1"], "queue: task canceled");
    }
}
