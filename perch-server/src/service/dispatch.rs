//! Dispatch Service
//!
//! Compiles a pending build, stores its procs and queues the root procs.
//! A build that fails to compile or queue is marked `error` and returned;
//! the operation that triggered dispatch still succeeds.

use std::collections::HashMap;

use perch_core::domain::proc::{find, tree};
use perch_core::domain::{Build, Config, EventType, Repo};
use perch_core::lifecycle;

use super::build::BuildError;
use super::event::publish;
use super::now;
use crate::forge::build_link;
use crate::pipeline::{BuildContext, BuildItem, set_build_steps};
use crate::queue::Task;
use crate::state::AppState;

/// Compile and queue `build`, which must already be stored.
///
/// `params` are extra build variables; the server's global environment is
/// applied on top of them.
pub async fn dispatch(
    state: &AppState,
    repo: &Repo,
    mut build: Build,
    configs: &[Config],
    mut params: HashMap<String, String>,
) -> Result<Build, BuildError> {
    let store = &state.store;

    let last = store
        .get_build_last_before(repo, &build.branch, build.id)
        .await
        .ok();
    let secrets = store.secret_list(repo).await.unwrap_or_else(|err| {
        tracing::debug!("Error getting secrets for {}#{}. {}", repo.full_name, build.number, err);
        Vec::new()
    });
    let registries = store.registry_list(repo).await.unwrap_or_else(|err| {
        tracing::debug!(
            "Error getting registry credentials for {}#{}. {}",
            repo.full_name,
            build.number,
            err
        );
        Vec::new()
    });
    params.extend(state.config.environment.clone());

    let compiled = state.builder.build(&BuildContext {
        repo,
        curr: &build,
        last: last.as_ref(),
        secrets: &secrets,
        registries: &registries,
        environ: &params,
        link: &state.config.host,
        configs,
    });
    let items = match compiled {
        Ok(items) => items,
        Err(err) => return Ok(mark_error(state, repo, build, err.to_string()).await),
    };

    set_build_steps(&mut build, &items);
    if let Err(err) = store.proc_create(&mut build.procs).await {
        tracing::error!("Cannot persist procs for {}#{}: {}", repo.full_name, build.number, err);
        return Ok(mark_error(state, repo, build, err.to_string()).await);
    }

    let tasks: Vec<Task> = items
        .iter()
        .filter_map(|item| {
            let proc = find(&build.procs, item.proc.pid)?;
            Some(Task {
                id: proc.id.to_string(),
                labels: item.labels.clone(),
                dependencies: item.depends_on.clone(),
                data: item.config.clone(),
            })
        })
        .collect();
    if let Err(err) = state.queue.push_at_once(tasks).await {
        tracing::error!("Cannot queue {}#{}: {}", repo.full_name, build.number, err);
        return Ok(mark_error(state, repo, build, err.to_string()).await);
    }

    report(state, repo, &build, &items).await;

    build.procs = tree(std::mem::take(&mut build.procs));
    publish(&state.bus, EventType::Enqueued, repo, &build);

    tracing::info!(repo = %repo.full_name, build = build.number, "Build enqueued");

    Ok(build)
}

async fn mark_error(state: &AppState, repo: &Repo, mut build: Build, error: String) -> Build {
    tracing::warn!(repo = %repo.full_name, build = build.number, "Build failed to dispatch: {}", error);
    lifecycle::fail(&mut build, error, now());
    build.procs.clear();
    if let Err(err) = state.store.update_build(&build).await {
        tracing::error!(
            "Error setting error status of build for {}#{}. {}",
            repo.full_name,
            build.number,
            err
        );
    }
    build
}

/// Best-effort forge status for every queued item.
async fn report(state: &AppState, repo: &Repo, build: &Build, items: &[BuildItem]) {
    let link = build_link(&state.config.host, repo, build);
    for item in items {
        let proc = if items.len() > 1 {
            find(&build.procs, item.proc.pid)
        } else {
            None
        };
        if let Err(err) = state.forge.status(repo, build, &link, proc).await {
            tracing::error!(
                "Error setting commit status for {}/{}: {}",
                repo.full_name,
                build.number,
                err
            );
        }
    }
}
