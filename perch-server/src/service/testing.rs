//! Service test fixtures

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use perch_core::domain::{Build, BuildEvent, Proc, Repo, Status, User};
use tokio_util::sync::CancellationToken;

use crate::config::ServerConfig;
use crate::forge::{Forge, ForgeError, LogForge};
use crate::pipeline::FileBuilder;
use crate::pubsub::{EVENTS_TOPIC, Subscription};
use crate::queue::{Queue, QueueError, QueueInfo, Task};
use crate::repository::{MemoryStore, Store};
use crate::state::AppState;

#[derive(Debug, Clone, PartialEq)]
pub enum QueueCall {
    Push(Vec<String>),
    Evict(Vec<String>),
    Error(Vec<String>, QueueError),
}

/// Queue that records every call in order
#[derive(Default)]
pub struct RecordingQueue {
    calls: Mutex<Vec<QueueCall>>,
    fail_push: bool,
}

impl RecordingQueue {
    pub fn failing() -> Self {
        Self {
            fail_push: true,
            ..Default::default()
        }
    }

    pub fn calls(&self) -> Vec<QueueCall> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Queue for RecordingQueue {
    async fn push_at_once(&self, tasks: Vec<Task>) -> Result<(), QueueError> {
        if self.fail_push {
            return Err(QueueError::Unavailable("queue is full".to_string()));
        }
        let ids = tasks.into_iter().map(|t| t.id).collect();
        self.calls.lock().unwrap().push(QueueCall::Push(ids));
        Ok(())
    }

    async fn evict_at_once(&self, ids: &[String]) -> Result<(), QueueError> {
        self.calls.lock().unwrap().push(QueueCall::Evict(ids.to_vec()));
        Ok(())
    }

    async fn error_at_once(&self, ids: &[String], err: QueueError) -> Result<(), QueueError> {
        self.calls
            .lock()
            .unwrap()
            .push(QueueCall::Error(ids.to_vec(), err));
        Ok(())
    }

    async fn info(&self) -> QueueInfo {
        QueueInfo::default()
    }
}

/// Forge that is always unreachable
pub struct DownForge;

#[async_trait]
impl Forge for DownForge {
    async fn status(&self, _: &Repo, _: &Build, _: &str, _: Option<&Proc>) -> Result<(), ForgeError> {
        Err(ForgeError("connection refused".to_string()))
    }
}

pub struct Fixture {
    pub state: AppState,
    pub store: Arc<MemoryStore>,
    pub queue: Arc<RecordingQueue>,
    pub repo: Repo,
    pub user: User,
}

impl Fixture {
    pub async fn new() -> Self {
        Self::with(RecordingQueue::default(), Arc::new(LogForge)).await
    }

    pub async fn with(queue: RecordingQueue, forge: Arc<dyn Forge>) -> Self {
        let store = Arc::new(MemoryStore::new());
        let queue = Arc::new(queue);
        let user = store.add_user("octocat", "secret-token", false).await;
        let repo = store
            .add_repo(Repo {
                owner: "octocat".to_string(),
                name: "hello".to_string(),
                branch: "main".to_string(),
                ..Default::default()
            })
            .await;

        let state = AppState::new(
            store.clone(),
            queue.clone(),
            Arc::new(FileBuilder),
            forge,
            ServerConfig::default(),
        );

        Self {
            state,
            store,
            queue,
            repo,
            user,
        }
    }

    /// Store a build with one config file and the given `(pid, ppid, state)`
    /// procs.
    pub async fn build(&self, status: Status, procs: &[(i64, i64, Status)]) -> Build {
        let mut build = Build {
            repo_id: self.repo.id,
            status,
            branch: "main".to_string(),
            ..Default::default()
        };
        self.store.create_build(&mut build).await.unwrap();

        let config = self
            .store
            .add_config(self.repo.id, ".perch/build.yml", "steps: [test]")
            .await;
        self.store
            .build_config_create(config.id, build.id)
            .await
            .unwrap();

        let mut rows: Vec<Proc> = procs
            .iter()
            .map(|&(pid, ppid, state)| Proc {
                build_id: build.id,
                pid,
                ppid,
                name: format!("step-{}", pid),
                state,
                started: if state == Status::Running { 10 } else { 0 },
                ..Default::default()
            })
            .collect();
        self.store.proc_create(&mut rows).await.unwrap();
        build
    }

    pub async fn proc(&self, build: &Build, pid: i64) -> Proc {
        self.store.proc_find(build, pid).await.unwrap()
    }

    pub fn subscribe(&self) -> Subscription {
        self.state
            .bus
            .subscribe(EVENTS_TOPIC, |_| true, CancellationToken::new())
    }
}

/// Next event on the subscription, failing the test after a second.
pub async fn next_event(sub: &mut Subscription) -> BuildEvent {
    let msg = tokio::time::timeout(Duration::from_secs(1), sub.recv())
        .await
        .expect("no event published")
        .expect("subscription closed");
    serde_json::from_slice(&msg.data).unwrap()
}

/// True when nothing is published within a short window.
pub async fn no_event(sub: &mut Subscription) -> bool {
    tokio::time::timeout(Duration::from_millis(50), sub.recv())
        .await
        .is_err()
}
