//! Pipeline Builder
//!
//! Turns a build's raw config files into schedulable items. Each item is a
//! root proc plus its nested steps; only roots are pushed to the queue.

use std::collections::HashMap;
use std::path::Path;

use perch_core::domain::{Build, Config, Proc, Registry, Repo, Secret, Status};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CompileError {
    #[error("no pipeline configuration found")]
    NoConfig,

    #[error("pipeline configuration {0} is empty")]
    EmptyConfig(String),

    #[error("invalid pipeline configuration {name}: {reason}")]
    Invalid { name: String, reason: String },
}

/// Everything a build is compiled from
pub struct BuildContext<'a> {
    pub repo: &'a Repo,
    pub curr: &'a Build,
    /// Previous build on the same branch, for change notifications.
    pub last: Option<&'a Build>,
    pub secrets: &'a [Secret],
    pub registries: &'a [Registry],
    pub environ: &'a HashMap<String, String>,
    /// Public link to the server.
    pub link: &'a str,
    pub configs: &'a [Config],
}

/// One schedulable unit: a root proc and the steps nested under it
#[derive(Debug, Clone, PartialEq)]
pub struct BuildItem {
    pub proc: Proc,
    pub steps: Vec<Proc>,
    pub labels: HashMap<String, String>,
    /// Names of the items that must finish first.
    pub depends_on: Vec<String>,
    pub config: serde_json::Value,
}

pub trait PipelineBuilder: Send + Sync {
    fn build(&self, ctx: &BuildContext<'_>) -> Result<Vec<BuildItem>, CompileError>;
}

/// Attach the procs of every item to the build, flat and in pid order.
pub fn set_build_steps(build: &mut Build, items: &[BuildItem]) {
    let mut procs: Vec<Proc> = items
        .iter()
        .flat_map(|item| std::iter::once(&item.proc).chain(item.steps.iter()))
        .cloned()
        .map(|mut proc| {
            proc.build_id = build.id;
            proc.children.clear();
            proc
        })
        .collect();
    procs.sort_by_key(|p| p.pid);
    build.procs = procs;
}

/// Builder that schedules every config file as one root proc
///
/// The file contents are handed to the agent untouched.
#[derive(Debug, Default)]
pub struct FileBuilder;

impl FileBuilder {
    fn environ(ctx: &BuildContext<'_>) -> HashMap<String, String> {
        let mut environ = ctx.environ.clone();
        let build = ctx.curr;
        environ.insert("CI_REPO".to_string(), ctx.repo.full_name.clone());
        environ.insert("CI_BUILD_NUMBER".to_string(), build.number.to_string());
        environ.insert("CI_BUILD_PARENT".to_string(), build.parent.to_string());
        environ.insert("CI_BUILD_EVENT".to_string(), build.event.to_string());
        environ.insert("CI_COMMIT_SHA".to_string(), build.commit.clone());
        environ.insert("CI_COMMIT_BRANCH".to_string(), build.branch.clone());
        environ.insert("CI_COMMIT_REF".to_string(), build.git_ref.clone());
        environ.insert("CI_BUILD_LINK".to_string(), ctx.link.to_string());
        if !build.deploy.is_empty() {
            environ.insert("CI_BUILD_DEPLOY_TARGET".to_string(), build.deploy.clone());
        }
        if let Some(last) = ctx.last {
            environ.insert("CI_PREV_BUILD_STATUS".to_string(), last.status.to_string());
        }
        environ
    }
}

impl PipelineBuilder for FileBuilder {
    fn build(&self, ctx: &BuildContext<'_>) -> Result<Vec<BuildItem>, CompileError> {
        if ctx.configs.is_empty() {
            return Err(CompileError::NoConfig);
        }

        let environ = Self::environ(ctx);
        let secrets: Vec<&str> = ctx.secrets.iter().map(|s| s.name.as_str()).collect();
        let registries: Vec<&str> = ctx.registries.iter().map(|r| r.address.as_str()).collect();

        let mut items = Vec::with_capacity(ctx.configs.len());
        for (pid, config) in (1..).zip(ctx.configs) {
            if config.data.trim().is_empty() {
                return Err(CompileError::EmptyConfig(config.name.clone()));
            }
            let name = Path::new(&config.name)
                .file_stem()
                .and_then(|s| s.to_str())
                .filter(|s| !s.is_empty())
                .ok_or_else(|| CompileError::Invalid {
                    name: config.name.clone(),
                    reason: "file name has no stem".to_string(),
                })?
                .to_string();

            let proc = Proc {
                build_id: ctx.curr.id,
                pid,
                ppid: 0,
                pgid: pid,
                name: name.clone(),
                state: Status::Pending,
                environ: environ.clone(),
                ..Default::default()
            };

            items.push(BuildItem {
                proc,
                steps: Vec::new(),
                labels: HashMap::from([("repo".to_string(), ctx.repo.full_name.clone())]),
                depends_on: Vec::new(),
                config: serde_json::json!({
                    "name": name,
                    "file": config.name,
                    "data": config.data,
                    "secrets": secrets,
                    "registries": registries,
                }),
            });
        }

        tracing::debug!(
            repo = %ctx.repo.full_name,
            items = items.len(),
            "Compiled pipeline"
        );

        Ok(items)
    }
}
