//! Postgres store
//!
//! `PgStore` adapts the per-entity repository functions to the `Store`
//! contract, turning missing rows into `StoreError::NotFound`.

pub mod build;
pub mod log;
pub mod proc;
pub mod repo;

pub use build as build_repository;
pub use log as log_repository;
pub use proc as proc_repository;
pub use repo as repo_repository;

use async_trait::async_trait;
use perch_core::domain::{Build, Config, Proc, Registry, Repo, Secret, User};
use sqlx::PgPool;

use super::{Result, Store, StoreError};

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn found<T>(row: Option<T>, what: impl FnOnce() -> String) -> Result<T> {
    row.ok_or_else(|| StoreError::NotFound(what()))
}

#[async_trait]
impl Store for PgStore {
    async fn user_find_token(&self, token: &str) -> Result<User> {
        let user = repo_repository::find_user_by_token(&self.pool, token).await?;
        found(user, || "user".to_string())
    }

    async fn repo_find_name(&self, full_name: &str) -> Result<Repo> {
        let repo = repo_repository::find_by_name(&self.pool, full_name).await?;
        found(repo, || format!("repository {}", full_name))
    }

    async fn repo_find(&self, id: i64) -> Result<Repo> {
        let repo = repo_repository::find_by_id(&self.pool, id).await?;
        found(repo, || format!("repository id {}", id))
    }

    async fn repo_list(&self, user: &User) -> Result<Vec<Repo>> {
        Ok(repo_repository::list_visible(&self.pool, user).await?)
    }

    async fn get_build_list(&self, repo: &Repo, page: i64) -> Result<Vec<Build>> {
        Ok(build_repository::list_by_repo(&self.pool, repo, page).await?)
    }

    async fn get_build_number(&self, repo: &Repo, number: i64) -> Result<Build> {
        let build = build_repository::find_by_number(&self.pool, repo, number).await?;
        found(build, || format!("build {}", number))
    }

    async fn get_build_last(&self, repo: &Repo, branch: &str) -> Result<Build> {
        let build = build_repository::find_last(&self.pool, repo, branch).await?;
        found(build, || format!("last build on {}", branch))
    }

    async fn get_build_last_before(&self, repo: &Repo, branch: &str, id: i64) -> Result<Build> {
        let build = build_repository::find_last_before(&self.pool, repo, branch, id).await?;
        found(build, || format!("build before {}", id))
    }

    async fn get_build(&self, id: i64) -> Result<Build> {
        let build = build_repository::find_by_id(&self.pool, id).await?;
        found(build, || format!("build id {}", id))
    }

    async fn get_build_queue(&self) -> Result<Vec<Build>> {
        Ok(build_repository::list_active(&self.pool).await?)
    }

    async fn create_build(&self, build: &mut Build) -> Result<()> {
        Ok(build_repository::create(&self.pool, build).await?)
    }

    async fn update_build(&self, build: &Build) -> Result<()> {
        if !build_repository::update(&self.pool, build).await? {
            return Err(StoreError::NotFound(format!("build id {}", build.id)));
        }
        Ok(())
    }

    async fn proc_list(&self, build: &Build) -> Result<Vec<Proc>> {
        Ok(proc_repository::list_by_build(&self.pool, build).await?)
    }

    async fn proc_find(&self, build: &Build, pid: i64) -> Result<Proc> {
        let proc = proc_repository::find_by_pid(&self.pool, build, pid).await?;
        found(proc, || format!("proc {}", pid))
    }

    async fn proc_child(&self, build: &Build, ppid: i64, name: &str) -> Result<Proc> {
        let proc = proc_repository::find_child(&self.pool, build, ppid, name).await?;
        found(proc, || format!("proc {}", name))
    }

    async fn proc_load(&self, id: i64) -> Result<Proc> {
        let proc = proc_repository::find_by_id(&self.pool, id).await?;
        found(proc, || format!("proc id {}", id))
    }

    async fn proc_create(&self, procs: &mut [Proc]) -> Result<()> {
        Ok(proc_repository::create_all(&self.pool, procs).await?)
    }

    async fn proc_update(&self, proc: &Proc) -> Result<()> {
        if !proc_repository::update(&self.pool, proc).await? {
            return Err(StoreError::NotFound(format!("proc id {}", proc.id)));
        }
        Ok(())
    }

    async fn log_find(&self, proc: &Proc) -> Result<Vec<u8>> {
        let data = log_repository::find(&self.pool, proc).await?;
        found(data, || format!("logs for proc {}", proc.id))
    }

    async fn log_save(&self, proc: &Proc, data: Vec<u8>) -> Result<()> {
        Ok(log_repository::save(&self.pool, proc, data).await?)
    }

    async fn configs_for_build(&self, build_id: i64) -> Result<Vec<Config>> {
        Ok(repo_repository::configs_for_build(&self.pool, build_id).await?)
    }

    async fn build_config_create(&self, config_id: i64, build_id: i64) -> Result<()> {
        Ok(repo_repository::link_config(&self.pool, config_id, build_id).await?)
    }

    async fn secret_list(&self, repo: &Repo) -> Result<Vec<Secret>> {
        Ok(repo_repository::list_secrets(&self.pool, repo).await?)
    }

    async fn registry_list(&self, repo: &Repo) -> Result<Vec<Registry>> {
        Ok(repo_repository::list_registries(&self.pool, repo).await?)
    }
}
