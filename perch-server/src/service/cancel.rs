//! Cancellation Cascade
//!
//! Cancels a pending or running build across its proc tree. Root procs are
//! the only ones the queue knows about: pending roots are evicted, running
//! roots are errored so their agents stop. Every pending proc is then
//! settled in storage, nested ones as skipped and roots as killed.

use perch_core::domain::proc::tree;
use perch_core::domain::{Build, EventType, Proc, Repo, Status};
use perch_core::lifecycle;

use super::build::BuildError;
use super::event::publish;
use super::now;
use crate::queue::QueueError;
use crate::state::AppState;

/// Queue ids of the root procs to cancel (running) and to evict (pending).
pub fn classify(procs: &[Proc]) -> (Vec<String>, Vec<String>) {
    let mut cancel = Vec::new();
    let mut evict = Vec::new();
    for proc in procs.iter().filter(|p| p.is_root()) {
        match proc.state {
            Status::Running => cancel.push(proc.id.to_string()),
            Status::Pending => evict.push(proc.id.to_string()),
            _ => {}
        }
    }
    (cancel, evict)
}

/// Cancel build `number`, returning it in its killed state.
///
/// A build that never started gets its `cancelled` event here. A running
/// build is announced by the agents once they acknowledge the cancel.
pub async fn cancel(state: &AppState, repo: &Repo, number: i64) -> Result<Build, BuildError> {
    let store = &state.store;
    let mut build = store.get_build_number(repo, number).await?;
    let procs = store.proc_list(&build).await?;
    lifecycle::ensure_cancellable(&build)?;

    let (to_cancel, to_evict) = classify(&procs);

    // Evict first so an evicted task is not also treated as a running failure.
    if let Err(err) = state.queue.evict_at_once(&to_evict).await {
        tracing::warn!("Cannot evict procs of {}#{}: {}", repo.full_name, build.number, err);
    }
    if let Err(err) = state.queue.error_at_once(&to_evict, QueueError::Cancel).await {
        tracing::warn!("Cannot error evicted procs of {}#{}: {}", repo.full_name, build.number, err);
    }
    if let Err(err) = state.queue.error_at_once(&to_cancel, QueueError::Cancel).await {
        tracing::warn!("Cannot cancel procs of {}#{}: {}", repo.full_name, build.number, err);
    }

    let now = now();
    for proc in procs.iter().filter(|p| p.state == Status::Pending) {
        let mut proc = proc.clone();
        if proc.is_root() {
            lifecycle::kill_proc(&mut proc, now);
        } else {
            lifecycle::skip_proc(&mut proc, 0);
        }
        if let Err(err) = store.proc_update(&proc).await {
            tracing::error!("Cannot update proc {} state: {}", proc.id, err);
        }
    }

    let prior = build.status;
    lifecycle::kill(&mut build, now);
    store.update_build(&build).await?;

    tracing::info!(
        repo = %repo.full_name,
        build = build.number,
        evicted = to_evict.len(),
        cancelled = to_cancel.len(),
        "Build cancelled"
    );

    if prior == Status::Pending {
        let procs = store.proc_list(&build).await?;
        build.procs = tree(procs);
        publish(&state.bus, EventType::Cancelled, repo, &build);
    }

    Ok(build)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::Store;
    use crate::service::testing::{Fixture, QueueCall, next_event, no_event};

    #[tokio::test]
    async fn test_cancel_running_build() {
        let fx = Fixture::new().await;
        let build = fx
            .build(Status::Running, &[(1, 0, Status::Running), (2, 1, Status::Pending)])
            .await;
        let root = fx.proc(&build, 1).await;
        let mut sub = fx.subscribe();

        let killed = cancel(&fx.state, &fx.repo, build.number).await.unwrap();

        assert_eq!(killed.status, Status::Killed);
        assert_eq!(
            fx.queue.calls(),
            [
                QueueCall::Evict(vec![]),
                QueueCall::Error(vec![], QueueError::Cancel),
                QueueCall::Error(vec![root.id.to_string()], QueueError::Cancel),
            ]
        );
        assert_eq!(fx.proc(&build, 2).await.state, Status::Skipped);
        assert_eq!(fx.proc(&build, 1).await.state, Status::Running);
        assert_eq!(
            fx.store.get_build(build.id).await.unwrap().status,
            Status::Killed
        );
        assert!(no_event(&mut sub).await);
    }

    #[tokio::test]
    async fn test_cancel_pending_build_publishes_tree() {
        let fx = Fixture::new().await;
        let build = fx
            .build(
                Status::Pending,
                &[(1, 0, Status::Pending), (2, 1, Status::Pending), (3, 0, Status::Pending)],
            )
            .await;
        let mut sub = fx.subscribe();

        cancel(&fx.state, &fx.repo, build.number).await.unwrap();

        let roots = [fx.proc(&build, 1).await, fx.proc(&build, 3).await];
        let ids: Vec<String> = roots.iter().map(|p| p.id.to_string()).collect();
        assert_eq!(
            fx.queue.calls(),
            [
                QueueCall::Evict(ids.clone()),
                QueueCall::Error(ids, QueueError::Cancel),
                QueueCall::Error(vec![], QueueError::Cancel),
            ]
        );
        for root in &roots {
            assert_eq!(root.state, Status::Killed);
            assert_eq!(root.exit_code, lifecycle::KILLED_EXIT_CODE);
        }
        assert_eq!(fx.proc(&build, 2).await.state, Status::Skipped);

        let event = next_event(&mut sub).await;
        assert_eq!(event.kind, EventType::Cancelled);
        assert_eq!(event.build.status, Status::Killed);
        assert_eq!(event.build.procs.len(), 2);
        assert_eq!(event.build.procs[0].children[0].state, Status::Skipped);
        assert!(no_event(&mut sub).await);
    }

    #[tokio::test]
    async fn test_cancel_leaves_finished_procs_alone() {
        let fx = Fixture::new().await;
        let build = fx
            .build(Status::Running, &[(1, 0, Status::Success), (2, 0, Status::Pending)])
            .await;

        cancel(&fx.state, &fx.repo, build.number).await.unwrap();

        assert_eq!(fx.proc(&build, 1).await.state, Status::Success);
        assert_eq!(fx.proc(&build, 2).await.state, Status::Killed);
    }

    #[tokio::test]
    async fn test_cancel_rejects_finished_build() {
        let fx = Fixture::new().await;
        let build = fx.build(Status::Success, &[]).await;

        let err = cancel(&fx.state, &fx.repo, build.number).await.unwrap_err();

        assert_eq!(err.to_string(), "cannot cancel a non-running or non-pending build");
        assert!(fx.queue.calls().is_empty());
    }

    #[test]
    fn test_classify_only_roots() {
        let proc = |id, ppid, state| Proc {
            id,
            pid: id,
            ppid,
            state,
            ..Default::default()
        };
        let procs = [
            proc(1, 0, Status::Running),
            proc(2, 0, Status::Pending),
            proc(3, 1, Status::Pending),
            proc(4, 1, Status::Running),
            proc(5, 0, Status::Success),
        ];

        let (cancel, evict) = classify(&procs);

        assert_eq!(cancel, ["1"]);
        assert_eq!(evict, ["2"]);
    }
}
