//! Build Service
//!
//! Business logic for reading builds and for the human actions on them:
//! approve, decline, restart and log purging. Cancellation lives in
//! `cancel`, agent acknowledgements in `proc`.

use std::collections::HashMap;

use perch_core::domain::proc::tree;
use perch_core::domain::{Build, LogLine, Repo, User};
use perch_core::dto::build::RestartOptions;
use perch_core::lifecycle::{self, TransitionError};

use super::dispatch::dispatch;
use super::now;
use crate::forge::build_link;
use crate::repository::{StoreError, encode_log};
use crate::state::AppState;

/// Service error type
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error(transparent)]
    InvalidState(#[from] TransitionError),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    BadRequest(String),

    #[error(transparent)]
    Storage(StoreError),
}

impl From<StoreError> for BuildError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(_) => BuildError::NotFound(err.to_string()),
            other => BuildError::Storage(other),
        }
    }
}

// =============================================================================
// Queries
// =============================================================================

pub async fn get_builds(state: &AppState, repo: &Repo, page: i64) -> Result<Vec<Build>, BuildError> {
    Ok(state.store.get_build_list(repo, page.max(1)).await?)
}

/// Get a build by number with its proc tree attached
pub async fn get_build(state: &AppState, repo: &Repo, number: i64) -> Result<Build, BuildError> {
    let mut build = state.store.get_build_number(repo, number).await?;
    attach_procs(state, &mut build).await?;
    Ok(build)
}

/// Latest build on `branch`, or on the repository's default branch
pub async fn get_build_last(
    state: &AppState,
    repo: &Repo,
    branch: Option<&str>,
) -> Result<Build, BuildError> {
    let branch = branch.filter(|b| !b.is_empty()).unwrap_or(&repo.branch);
    let mut build = state.store.get_build_last(repo, branch).await?;
    attach_procs(state, &mut build).await?;
    Ok(build)
}

pub async fn get_build_queue(state: &AppState) -> Result<Vec<Build>, BuildError> {
    Ok(state.store.get_build_queue().await?)
}

pub(crate) async fn attach_procs(state: &AppState, build: &mut Build) -> Result<(), BuildError> {
    let procs = state.store.proc_list(build).await?;
    build.procs = tree(procs);
    Ok(())
}

// =============================================================================
// Human Actions
// =============================================================================

/// Approve a blocked build and dispatch it
pub async fn approve(
    state: &AppState,
    repo: &Repo,
    number: i64,
    user: &User,
) -> Result<Build, BuildError> {
    let mut build = state.store.get_build_number(repo, number).await?;
    lifecycle::approve(&mut build, &user.login, now())?;

    let configs = state.store.configs_for_build(build.id).await?;
    state.store.update_build(&build).await?;

    tracing::info!(repo = %repo.full_name, build = build.number, reviewer = %user.login, "Build approved");

    dispatch(state, repo, build, &configs, HashMap::new()).await
}

/// Decline a blocked build
pub async fn decline(
    state: &AppState,
    repo: &Repo,
    number: i64,
    user: &User,
) -> Result<Build, BuildError> {
    let mut build = state.store.get_build_number(repo, number).await?;
    lifecycle::decline(&mut build, &user.login, now())?;
    state.store.update_build(&build).await?;

    tracing::info!(repo = %repo.full_name, build = build.number, reviewer = %user.login, "Build declined");

    let link = build_link(&state.config.host, repo, &build);
    if let Err(err) = state.forge.status(repo, &build, &link, None).await {
        tracing::error!(
            "Error setting commit status for {}/{}: {}",
            repo.full_name,
            build.number,
            err
        );
    }

    Ok(build)
}

/// Restart a finished build as a new build
///
/// The new build is returned even when it could not be dispatched; it then
/// carries status `error`.
pub async fn restart(
    state: &AppState,
    repo: &Repo,
    number: i64,
    opts: RestartOptions,
) -> Result<Build, BuildError> {
    let origin = state.store.get_build_number(repo, number).await?;
    let mut build = lifecycle::restart(&origin, &opts, now())?;

    let configs = state.store.configs_for_build(origin.id).await?;
    state.store.create_build(&mut build).await?;
    for config in &configs {
        state.store.build_config_create(config.id, build.id).await?;
    }

    tracing::info!(
        repo = %repo.full_name,
        build = build.number,
        parent = origin.number,
        event = %build.event,
        "Build restarted"
    );

    dispatch(state, repo, build, &configs, opts.params).await
}

// =============================================================================
// Logs
// =============================================================================

pub async fn get_proc_logs(
    state: &AppState,
    repo: &Repo,
    number: i64,
    pid: i64,
) -> Result<Vec<u8>, BuildError> {
    let build = state.store.get_build_number(repo, number).await?;
    let proc = state.store.proc_find(&build, pid).await?;
    Ok(state.store.log_find(&proc).await?)
}

/// Logs of the step `name` nested under proc `ppid`
pub async fn get_build_logs(
    state: &AppState,
    repo: &Repo,
    number: i64,
    ppid: i64,
    name: &str,
) -> Result<Vec<u8>, BuildError> {
    let build = state.store.get_build_number(repo, number).await?;
    let proc = state.store.proc_child(&build, ppid, name).await?;
    Ok(state.store.log_find(&proc).await?)
}

/// Replace every proc log of a finished build with a purge notice
pub async fn delete_build_logs(
    state: &AppState,
    repo: &Repo,
    number: i64,
    user: &User,
) -> Result<(), BuildError> {
    let build = state.store.get_build_number(repo, number).await?;
    if build.status.is_active() {
        return Err(BuildError::BadRequest(
            "Cannot delete logs for a pending or running build".to_string(),
        ));
    }
    let procs = state.store.proc_list(&build).await?;

    let now = chrono::Utc::now();
    let mut failure = None;
    for proc in &procs {
        let notice = LogLine {
            proc: proc.name.clone(),
            pos: 0,
            out: format!(
                "logs purged by {} on {}\n",
                user.login,
                now.format("%a %b %e %H:%M:%S UTC %Y")
            ),
            time: now.timestamp(),
        };
        if let Err(err) = state.store.log_save(proc, encode_log(&[notice])).await {
            failure = Some(err);
        }
    }
    if let Some(err) = failure {
        return Err(BuildError::BadRequest(format!(
            "There was a problem deleting your logs. {}",
            err
        )));
    }

    tracing::info!(repo = %repo.full_name, build = build.number, user = %user.login, "Build logs purged");

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::Store;
    use crate::service::testing::{DownForge, Fixture, QueueCall, RecordingQueue, next_event, no_event};
    use perch_core::domain::{EventKind, EventType, Status};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_approve_enqueues_blocked_build() {
        let fx = Fixture::new().await;
        let build = fx.build(Status::Blocked, &[]).await;
        let mut sub = fx.subscribe();

        let approved = approve(&fx.state, &fx.repo, build.number, &fx.user)
            .await
            .unwrap();

        assert_eq!(approved.status, Status::Pending);
        assert_eq!(approved.reviewer, "octocat");
        assert_eq!(approved.procs.len(), 1);

        let event = next_event(&mut sub).await;
        assert_eq!(event.kind, EventType::Enqueued);
        assert_eq!(event.repo.full_name, "octocat/hello");
        assert_eq!(event.build.number, build.number);

        let root = fx.proc(&approved, 1).await;
        assert_eq!(fx.queue.calls(), [QueueCall::Push(vec![root.id.to_string()])]);
    }

    #[tokio::test]
    async fn test_event_is_labelled_with_repo() {
        let fx = Fixture::new().await;
        let build = fx.build(Status::Blocked, &[]).await;
        let mut sub = fx.subscribe();

        approve(&fx.state, &fx.repo, build.number, &fx.user)
            .await
            .unwrap();

        let msg = sub.recv().await.unwrap();
        assert_eq!(msg.label("repo"), Some("octocat/hello"));
        assert_eq!(msg.label("private"), Some("false"));
    }

    #[tokio::test]
    async fn test_second_approve_is_rejected() {
        let fx = Fixture::new().await;
        let build = fx.build(Status::Blocked, &[]).await;
        approve(&fx.state, &fx.repo, build.number, &fx.user)
            .await
            .unwrap();

        let err = approve(&fx.state, &fx.repo, build.number, &fx.user)
            .await
            .unwrap_err();

        match err {
            BuildError::InvalidState(err) => assert_eq!(err.status(), Status::Pending),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_approve_without_config_marks_build_error() {
        let fx = Fixture::new().await;
        let mut build = Build {
            repo_id: fx.repo.id,
            status: Status::Blocked,
            ..Default::default()
        };
        fx.store.create_build(&mut build).await.unwrap();
        let mut sub = fx.subscribe();

        let approved = approve(&fx.state, &fx.repo, build.number, &fx.user)
            .await
            .unwrap();

        assert_eq!(approved.status, Status::Error);
        assert_eq!(approved.error, "no pipeline configuration found");
        assert_eq!(approved.started, approved.finished);
        let stored = fx.store.get_build(build.id).await.unwrap();
        assert_eq!(stored.status, Status::Error);
        assert!(fx.queue.calls().is_empty());
        assert!(no_event(&mut sub).await);
    }

    #[tokio::test]
    async fn test_queue_failure_keeps_build_as_error() {
        let fx = Fixture::with(RecordingQueue::failing(), Arc::new(crate::forge::LogForge)).await;
        let build = fx.build(Status::Success, &[(1, 0, Status::Success)]).await;

        let restarted = restart(&fx.state, &fx.repo, build.number, RestartOptions::default())
            .await
            .unwrap();

        assert_eq!(restarted.status, Status::Error);
        assert_eq!(restarted.error, "queue: queue is full");
        let stored = fx
            .store
            .get_build_number(&fx.repo, restarted.number)
            .await
            .unwrap();
        assert_eq!(stored.status, Status::Error);
    }

    #[tokio::test]
    async fn test_decline_ignores_forge_failure() {
        let fx = Fixture::with(RecordingQueue::default(), Arc::new(DownForge)).await;
        let build = fx.build(Status::Blocked, &[]).await;

        let declined = decline(&fx.state, &fx.repo, build.number, &fx.user)
            .await
            .unwrap();

        assert_eq!(declined.status, Status::Declined);
        assert_eq!(declined.reviewer, "octocat");
        let stored = fx.store.get_build(build.id).await.unwrap();
        assert_eq!(stored.status, Status::Declined);
    }

    #[tokio::test]
    async fn test_decline_requires_blocked() {
        let fx = Fixture::new().await;
        let build = fx.build(Status::Running, &[]).await;

        let err = decline(&fx.state, &fx.repo, build.number, &fx.user)
            .await
            .unwrap_err();

        assert_eq!(err.to_string(), "cannot decline a build with status running");
    }

    #[tokio::test]
    async fn test_restart_creates_new_build() {
        let fx = Fixture::new().await;
        let build = fx.build(Status::Failure, &[(1, 0, Status::Failure)]).await;
        let opts = RestartOptions {
            event: Some("tag".to_string()),
            deploy_to: None,
            params: HashMap::from([("VERSION".to_string(), "2".to_string())]),
        };

        let restarted = restart(&fx.state, &fx.repo, build.number, opts)
            .await
            .unwrap();

        assert_ne!(restarted.id, build.id);
        assert_eq!(restarted.number, build.number + 1);
        assert_eq!(restarted.parent, build.number);
        assert_eq!(restarted.status, Status::Pending);
        assert_eq!(restarted.event, EventKind::Tag);
        assert_eq!(restarted.procs[0].environ["VERSION"], "2");

        let configs = fx.store.configs_for_build(restarted.id).await.unwrap();
        assert_eq!(configs.len(), 1);
    }

    #[tokio::test]
    async fn test_restart_declined_creates_nothing() {
        let fx = Fixture::new().await;
        let build = fx.build(Status::Declined, &[]).await;

        let err = restart(&fx.state, &fx.repo, build.number, RestartOptions::default())
            .await
            .unwrap_err();

        assert!(matches!(err, BuildError::InvalidState(_)));
        let builds = get_builds(&fx.state, &fx.repo, 1).await.unwrap();
        assert_eq!(builds.len(), 1);
    }

    #[tokio::test]
    async fn test_missing_build_is_not_found() {
        let fx = Fixture::new().await;
        let err = get_build(&fx.state, &fx.repo, 99).await.unwrap_err();
        assert!(matches!(err, BuildError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_get_build_last_defaults_to_repo_branch() {
        let fx = Fixture::new().await;
        let build = fx.build(Status::Success, &[(1, 0, Status::Success), (2, 1, Status::Success)]).await;

        let last = get_build_last(&fx.state, &fx.repo, None).await.unwrap();

        assert_eq!(last.id, build.id);
        assert_eq!(last.procs.len(), 1);
        assert_eq!(last.procs[0].children.len(), 1);
    }

    #[tokio::test]
    async fn test_delete_logs_rejected_while_running() {
        let fx = Fixture::new().await;
        let build = fx.build(Status::Running, &[(1, 0, Status::Running)]).await;

        let err = delete_build_logs(&fx.state, &fx.repo, build.number, &fx.user)
            .await
            .unwrap_err();

        assert!(matches!(err, BuildError::BadRequest(_)));
    }

    #[tokio::test]
    async fn test_delete_logs_writes_purge_notice() {
        let fx = Fixture::new().await;
        let build = fx.build(Status::Success, &[(1, 0, Status::Success)]).await;

        delete_build_logs(&fx.state, &fx.repo, build.number, &fx.user)
            .await
            .unwrap();

        let raw = get_proc_logs(&fx.state, &fx.repo, build.number, 1)
            .await
            .unwrap();
        let lines: Vec<LogLine> = serde_json::from_slice(&raw).unwrap();
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].proc, "step-1");
        assert!(lines[0].out.starts_with("logs purged by octocat on "));
    }
}
