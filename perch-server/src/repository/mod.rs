//! Repository Module
//!
//! Data access layer for the server. `Store` is the narrow contract the
//! services depend on; `PgStore` backs it with Postgres (one module per
//! entity under `postgres`) and `MemoryStore` keeps everything in process.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use perch_core::domain::{Build, Config, LogLine, Proc, Registry, Repo, Secret, User};

pub use memory::MemoryStore;
pub use postgres::PgStore;

/// Builds returned per page of a listing
pub const BUILD_PAGE_SIZE: i64 = 50;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound(_))
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Persistence operations used by the services
///
/// Every finder returns `StoreError::NotFound` when the row is absent.
#[async_trait]
pub trait Store: Send + Sync {
    async fn user_find_token(&self, token: &str) -> Result<User>;

    async fn repo_find(&self, id: i64) -> Result<Repo>;

    async fn repo_find_name(&self, full_name: &str) -> Result<Repo>;

    /// Repositories the user may read: public ones plus granted ones.
    async fn repo_list(&self, user: &User) -> Result<Vec<Repo>>;

    async fn get_build_list(&self, repo: &Repo, page: i64) -> Result<Vec<Build>>;

    async fn get_build_number(&self, repo: &Repo, number: i64) -> Result<Build>;

    async fn get_build_last(&self, repo: &Repo, branch: &str) -> Result<Build>;

    async fn get_build_last_before(&self, repo: &Repo, branch: &str, id: i64) -> Result<Build>;

    async fn get_build(&self, id: i64) -> Result<Build>;

    /// Pending and running builds across all repositories.
    async fn get_build_queue(&self) -> Result<Vec<Build>>;

    /// Insert a build, assigning its id and the repository's next number.
    async fn create_build(&self, build: &mut Build) -> Result<()>;

    async fn update_build(&self, build: &Build) -> Result<()>;

    async fn proc_list(&self, build: &Build) -> Result<Vec<Proc>>;

    async fn proc_find(&self, build: &Build, pid: i64) -> Result<Proc>;

    async fn proc_child(&self, build: &Build, ppid: i64, name: &str) -> Result<Proc>;

    async fn proc_load(&self, id: i64) -> Result<Proc>;

    /// Insert procs, assigning their ids in place.
    async fn proc_create(&self, procs: &mut [Proc]) -> Result<()>;

    async fn proc_update(&self, proc: &Proc) -> Result<()>;

    async fn log_find(&self, proc: &Proc) -> Result<Vec<u8>>;

    async fn log_save(&self, proc: &Proc, data: Vec<u8>) -> Result<()>;

    async fn configs_for_build(&self, build_id: i64) -> Result<Vec<Config>>;

    async fn build_config_create(&self, config_id: i64, build_id: i64) -> Result<()>;

    async fn secret_list(&self, repo: &Repo) -> Result<Vec<Secret>>;

    async fn registry_list(&self, repo: &Repo) -> Result<Vec<Registry>>;
}

/// Serialize log lines the way `log_save` stores them.
pub fn encode_log(lines: &[LogLine]) -> Vec<u8> {
    serde_json::to_vec(lines).unwrap_or_else(|_| b"[]".to_vec())
}
