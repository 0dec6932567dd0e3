//! Proc Service
//!
//! Acknowledgements from agents running procs: start, log output and exit.
//! This is the producer side of the log streams and the path that announces
//! a running build's terminal state, including after a cancel.

use perch_core::domain::proc::tree;
use perch_core::domain::{Build, EventType, LogLine, Proc, Repo, Status};
use perch_core::dto::proc::{AppendLogs, DoneProc, InitProc};
use perch_core::lifecycle;

use super::build::BuildError;
use super::event::publish;
use super::now;
use crate::forge::build_link;
use crate::repository::encode_log;
use crate::state::AppState;

/// Mark a pending proc as running and open its log stream
pub async fn init(state: &AppState, id: i64, req: InitProc) -> Result<Proc, BuildError> {
    let store = &state.store;
    let mut proc = store.proc_load(id).await?;
    if proc.state != Status::Pending {
        return Err(BuildError::BadRequest(format!(
            "cannot start proc {} with status {}",
            id, proc.state
        )));
    }
    let mut build = store.get_build(proc.build_id).await?;
    let repo = store.repo_find(build.repo_id).await?;

    let now = now();
    lifecycle::start_proc(&mut proc, &req.machine, now);
    proc.platform = req.platform;

    state.logs.open(proc.id);
    if let Err(err) = store.proc_update(&proc).await {
        state.logs.close(proc.id);
        return Err(err.into());
    }

    if build.status == Status::Pending {
        lifecycle::start(&mut build, now);
        store.update_build(&build).await?;
        tracing::info!(repo = %repo.full_name, build = build.number, "Build started");
    }

    announce(state, &repo, build, EventType::Started).await?;

    Ok(proc)
}

/// Append output lines to a running proc's log stream
pub async fn append(state: &AppState, id: i64, req: AppendLogs) -> Result<usize, BuildError> {
    let proc = state.store.proc_load(id).await?;
    let count = req.lines.len();
    let lines = req
        .lines
        .into_iter()
        .map(|out| LogLine::new(proc.name.clone(), out))
        .collect();

    state
        .logs
        .write(proc.id, lines)
        .map_err(|err| BuildError::BadRequest(err.to_string()))?;

    Ok(count)
}

/// Record a proc's exit, settle its nested procs and finish the build once
/// nothing is left to run
pub async fn done(state: &AppState, id: i64, req: DoneProc) -> Result<Proc, BuildError> {
    let store = &state.store;
    let mut proc = store.proc_load(id).await?;
    if !proc.is_active() {
        return Err(BuildError::BadRequest(format!(
            "cannot finish proc {} with status {}",
            id, proc.state
        )));
    }

    let now = now();
    lifecycle::finish_proc(&mut proc, req.exit_code, req.error.as_deref(), now);
    store.proc_update(&proc).await?;
    save_logs(state, &proc).await;

    let mut build = store.get_build(proc.build_id).await?;
    let repo = store.repo_find(build.repo_id).await?;
    let mut procs = store.proc_list(&build).await?;

    // Nested procs cannot outlive their parent.
    let mut parents = vec![proc.pid];
    while let Some(parent) = parents.pop() {
        for child in procs.iter_mut().filter(|p| p.ppid == parent && p.pid != parent) {
            parents.push(child.pid);
            if !child.is_active() {
                continue;
            }
            lifecycle::skip_proc(child, proc.stopped);
            if let Err(err) = store.proc_update(child).await {
                tracing::error!("Cannot update proc {} state: {}", child.id, err);
            }
            save_logs(state, child).await;
        }
    }

    let kind = if procs.iter().any(Proc::is_active) {
        EventType::Started
    } else {
        if build.status.is_active() {
            lifecycle::finish(&mut build, lifecycle::aggregate(&procs), now);
            store.update_build(&build).await?;
        }
        tracing::info!(repo = %repo.full_name, build = build.number, status = %build.status, "Build finished");

        let link = build_link(&state.config.host, &repo, &build);
        if let Err(err) = state.forge.status(&repo, &build, &link, None).await {
            tracing::error!(
                "Error setting commit status for {}/{}: {}",
                repo.full_name,
                build.number,
                err
            );
        }
        EventType::Finished
    };

    build.procs = tree(procs);
    publish(&state.bus, kind, &repo, &build);

    Ok(proc)
}

/// Close the proc's log stream, if open, and store what it collected.
async fn save_logs(state: &AppState, proc: &Proc) {
    let Some(lines) = state.logs.close(proc.id) else {
        return;
    };
    if let Err(err) = state.store.log_save(proc, encode_log(&lines)).await {
        tracing::error!("Cannot save logs for proc {}: {}", proc.id, err);
    }
}

async fn announce(
    state: &AppState,
    repo: &Repo,
    mut build: Build,
    kind: EventType,
) -> Result<(), BuildError> {
    let procs = state.store.proc_list(&build).await?;
    build.procs = tree(procs);
    publish(&state.bus, kind, repo, &build);
    Ok(())
}
