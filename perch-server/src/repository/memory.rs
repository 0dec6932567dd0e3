//! In-memory store
//!
//! Same semantics as the Postgres store, kept behind a single async mutex.
//! Used when no database is configured and by the service tests.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use perch_core::domain::{Build, Config, Proc, Registry, Repo, Secret, Status, User};
use serde::Deserialize;
use tokio::sync::Mutex;

use super::{BUILD_PAGE_SIZE, Result, Store, StoreError};

#[derive(Default)]
struct Tables {
    users: Vec<User>,
    repos: Vec<Repo>,
    perms: HashSet<(i64, i64)>,
    builds: Vec<Build>,
    procs: Vec<Proc>,
    logs: HashMap<i64, Vec<u8>>,
    configs: Vec<Config>,
    build_configs: HashSet<(i64, i64)>,
    secrets: HashMap<i64, Vec<Secret>>,
    registries: HashMap<i64, Vec<Registry>>,
    next_id: i64,
}

impl Tables {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }
}

/// Fixture loaded into a fresh memory store
#[derive(Debug, Default, Deserialize)]
pub struct Seed {
    #[serde(default)]
    pub users: Vec<SeedUser>,
    #[serde(default)]
    pub repos: Vec<Repo>,
    /// `(login, full_name)` pairs granting read access to private repos.
    #[serde(default)]
    pub perms: Vec<(String, String)>,
    #[serde(default)]
    pub configs: Vec<Config>,
    #[serde(default)]
    pub builds: Vec<Build>,
}

#[derive(Debug, Deserialize)]
pub struct SeedUser {
    pub login: String,
    pub token: String,
    #[serde(default)]
    pub admin: bool,
}

#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a JSON fixture file.
    pub async fn from_seed_file(path: &str) -> std::result::Result<Self, SeedError> {
        let raw = tokio::fs::read_to_string(path).await?;
        let seed: Seed = serde_json::from_str(&raw)?;
        let store = Self::new();
        store.seed(seed).await;
        Ok(store)
    }

    pub async fn seed(&self, seed: Seed) {
        for user in seed.users {
            self.add_user(&user.login, &user.token, user.admin).await;
        }
        for repo in seed.repos {
            self.add_repo(repo).await;
        }
        for (login, full_name) in seed.perms {
            let mut tables = self.tables.lock().await;
            let user = tables.users.iter().find(|u| u.login == login).map(|u| u.id);
            let repo = tables.repos.iter().find(|r| r.full_name == full_name).map(|r| r.id);
            if let (Some(user), Some(repo)) = (user, repo) {
                tables.perms.insert((user, repo));
            }
        }
        for config in seed.configs {
            self.add_config(config.repo_id, &config.name, &config.data).await;
        }
        for mut build in seed.builds {
            // Seeded builds are linked to every config of their repository.
            if let Err(err) = self.create_build(&mut build).await {
                tracing::warn!("Skipping seeded build: {}", err);
                continue;
            }
            let mut tables = self.tables.lock().await;
            let links: Vec<(i64, i64)> = tables
                .configs
                .iter()
                .filter(|c| c.repo_id == build.repo_id)
                .map(|c| (c.id, build.id))
                .collect();
            tables.build_configs.extend(links);
        }
    }

    pub async fn add_user(&self, login: &str, token: &str, admin: bool) -> User {
        let mut tables = self.tables.lock().await;
        let user = User {
            id: tables.next_id(),
            login: login.to_string(),
            email: String::new(),
            admin,
            token: token.to_string(),
        };
        tables.users.push(user.clone());
        user
    }

    pub async fn add_repo(&self, mut repo: Repo) -> Repo {
        let mut tables = self.tables.lock().await;
        if repo.id == 0 {
            repo.id = tables.next_id();
        }
        if repo.full_name.is_empty() {
            repo.full_name = format!("{}/{}", repo.owner, repo.name);
        }
        tables.repos.push(repo.clone());
        repo
    }

    pub async fn grant(&self, user: &User, repo: &Repo) {
        self.tables.lock().await.perms.insert((user.id, repo.id));
    }

    pub async fn add_config(&self, repo_id: i64, name: &str, data: &str) -> Config {
        let mut tables = self.tables.lock().await;
        let config = Config {
            id: tables.next_id(),
            repo_id,
            name: name.to_string(),
            data: data.to_string(),
        };
        tables.configs.push(config.clone());
        config
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SeedError {
    #[error("cannot read seed file: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid seed file: {0}")]
    Json(#[from] serde_json::Error),
}

fn not_found(what: impl Into<String>) -> StoreError {
    StoreError::NotFound(what.into())
}

#[async_trait]
impl Store for MemoryStore {
    async fn user_find_token(&self, token: &str) -> Result<User> {
        let tables = self.tables.lock().await;
        tables
            .users
            .iter()
            .find(|u| !token.is_empty() && u.token == token)
            .cloned()
            .ok_or_else(|| not_found("user"))
    }

    async fn repo_find(&self, id: i64) -> Result<Repo> {
        let tables = self.tables.lock().await;
        tables
            .repos
            .iter()
            .find(|r| r.id == id)
            .cloned()
            .ok_or_else(|| not_found(format!("repository id {}", id)))
    }

    async fn repo_find_name(&self, full_name: &str) -> Result<Repo> {
        let tables = self.tables.lock().await;
        tables
            .repos
            .iter()
            .find(|r| r.full_name == full_name)
            .cloned()
            .ok_or_else(|| not_found(format!("repository {}", full_name)))
    }

    async fn repo_list(&self, user: &User) -> Result<Vec<Repo>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .repos
            .iter()
            .filter(|r| !r.private || user.admin || tables.perms.contains(&(user.id, r.id)))
            .cloned()
            .collect())
    }

    async fn get_build_list(&self, repo: &Repo, page: i64) -> Result<Vec<Build>> {
        let tables = self.tables.lock().await;
        let mut builds: Vec<Build> = tables
            .builds
            .iter()
            .filter(|b| b.repo_id == repo.id)
            .cloned()
            .collect();
        builds.sort_by(|a, b| b.number.cmp(&a.number));
        let skip = ((page.max(1) - 1) * BUILD_PAGE_SIZE) as usize;
        Ok(builds
            .into_iter()
            .skip(skip)
            .take(BUILD_PAGE_SIZE as usize)
            .collect())
    }

    async fn get_build_number(&self, repo: &Repo, number: i64) -> Result<Build> {
        let tables = self.tables.lock().await;
        tables
            .builds
            .iter()
            .find(|b| b.repo_id == repo.id && b.number == number)
            .cloned()
            .ok_or_else(|| not_found(format!("build {}", number)))
    }

    async fn get_build_last(&self, repo: &Repo, branch: &str) -> Result<Build> {
        let tables = self.tables.lock().await;
        tables
            .builds
            .iter()
            .filter(|b| b.repo_id == repo.id && b.branch == branch)
            .max_by_key(|b| b.number)
            .cloned()
            .ok_or_else(|| not_found(format!("last build on {}", branch)))
    }

    async fn get_build_last_before(&self, repo: &Repo, branch: &str, id: i64) -> Result<Build> {
        let tables = self.tables.lock().await;
        tables
            .builds
            .iter()
            .filter(|b| b.repo_id == repo.id && b.branch == branch && b.id < id)
            .max_by_key(|b| b.id)
            .cloned()
            .ok_or_else(|| not_found(format!("build before {}", id)))
    }

    async fn get_build(&self, id: i64) -> Result<Build> {
        let tables = self.tables.lock().await;
        tables
            .builds
            .iter()
            .find(|b| b.id == id)
            .cloned()
            .ok_or_else(|| not_found(format!("build id {}", id)))
    }

    async fn get_build_queue(&self) -> Result<Vec<Build>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .builds
            .iter()
            .filter(|b| matches!(b.status, Status::Pending | Status::Running))
            .cloned()
            .collect())
    }

    async fn create_build(&self, build: &mut Build) -> Result<()> {
        let mut tables = self.tables.lock().await;
        let number = tables
            .builds
            .iter()
            .filter(|b| b.repo_id == build.repo_id)
            .map(|b| b.number)
            .max()
            .unwrap_or(0)
            + 1;
        build.id = tables.next_id();
        build.number = number;
        let mut row = build.clone();
        row.procs.clear();
        tables.builds.push(row);
        Ok(())
    }

    async fn update_build(&self, build: &Build) -> Result<()> {
        let mut tables = self.tables.lock().await;
        let row = tables
            .builds
            .iter_mut()
            .find(|b| b.id == build.id)
            .ok_or_else(|| not_found(format!("build id {}", build.id)))?;
        *row = build.clone();
        row.procs.clear();
        Ok(())
    }

    async fn proc_list(&self, build: &Build) -> Result<Vec<Proc>> {
        let tables = self.tables.lock().await;
        let mut procs: Vec<Proc> = tables
            .procs
            .iter()
            .filter(|p| p.build_id == build.id)
            .cloned()
            .collect();
        procs.sort_by_key(|p| p.pid);
        Ok(procs)
    }

    async fn proc_find(&self, build: &Build, pid: i64) -> Result<Proc> {
        let tables = self.tables.lock().await;
        tables
            .procs
            .iter()
            .find(|p| p.build_id == build.id && p.pid == pid)
            .cloned()
            .ok_or_else(|| not_found(format!("proc {}", pid)))
    }

    async fn proc_child(&self, build: &Build, ppid: i64, name: &str) -> Result<Proc> {
        let tables = self.tables.lock().await;
        tables
            .procs
            .iter()
            .find(|p| p.build_id == build.id && p.ppid == ppid && p.name == name)
            .cloned()
            .ok_or_else(|| not_found(format!("proc {}", name)))
    }

    async fn proc_load(&self, id: i64) -> Result<Proc> {
        let tables = self.tables.lock().await;
        tables
            .procs
            .iter()
            .find(|p| p.id == id)
            .cloned()
            .ok_or_else(|| not_found(format!("proc id {}", id)))
    }

    async fn proc_create(&self, procs: &mut [Proc]) -> Result<()> {
        let mut tables = self.tables.lock().await;
        let mut taken: HashSet<(i64, i64)> = tables.procs.iter().map(|p| (p.build_id, p.pid)).collect();
        // All or nothing: reject the batch before any row is written.
        for proc in procs.iter() {
            if !taken.insert((proc.build_id, proc.pid)) {
                return Err(StoreError::Conflict(format!(
                    "proc {} already exists for build {}",
                    proc.pid, proc.build_id
                )));
            }
        }
        for proc in procs.iter_mut() {
            proc.id = tables.next_id();
            let mut row = proc.clone();
            row.children.clear();
            tables.procs.push(row);
        }
        Ok(())
    }

    async fn proc_update(&self, proc: &Proc) -> Result<()> {
        let mut tables = self.tables.lock().await;
        let row = tables
            .procs
            .iter_mut()
            .find(|p| p.id == proc.id)
            .ok_or_else(|| not_found(format!("proc id {}", proc.id)))?;
        *row = proc.clone();
        row.children.clear();
        Ok(())
    }

    async fn log_find(&self, proc: &Proc) -> Result<Vec<u8>> {
        let tables = self.tables.lock().await;
        tables
            .logs
            .get(&proc.id)
            .cloned()
            .ok_or_else(|| not_found(format!("logs for proc {}", proc.id)))
    }

    async fn log_save(&self, proc: &Proc, data: Vec<u8>) -> Result<()> {
        self.tables.lock().await.logs.insert(proc.id, data);
        Ok(())
    }

    async fn configs_for_build(&self, build_id: i64) -> Result<Vec<Config>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .configs
            .iter()
            .filter(|c| tables.build_configs.contains(&(c.id, build_id)))
            .cloned()
            .collect())
    }

    async fn build_config_create(&self, config_id: i64, build_id: i64) -> Result<()> {
        self.tables
            .lock()
            .await
            .build_configs
            .insert((config_id, build_id));
        Ok(())
    }

    async fn secret_list(&self, repo: &Repo) -> Result<Vec<Secret>> {
        let tables = self.tables.lock().await;
        Ok(tables.secrets.get(&repo.id).cloned().unwrap_or_default())
    }

    async fn registry_list(&self, repo: &Repo) -> Result<Vec<Registry>> {
        let tables = self.tables.lock().await;
        Ok(tables.registries.get(&repo.id).cloned().unwrap_or_default())
    }
}
