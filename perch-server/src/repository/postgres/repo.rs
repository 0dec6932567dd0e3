//! Repo Repository
//!
//! Users, repositories and the per-repository inputs a build is compiled
//! from (configs, secrets, registries).

use perch_core::domain::{Config, Registry, Repo, Secret, User};
use sqlx::PgPool;

const REPO_COLUMNS: &str = r#"
    id, user_id, owner, name, full_name, link, clone_url, branch, private, timeout
"#;

pub async fn find_user_by_token(pool: &PgPool, token: &str) -> Result<Option<User>, sqlx::Error> {
    let row = sqlx::query_as::<_, UserRow>(
        "SELECT id, login, email, admin, token FROM users WHERE token = $1",
    )
    .bind(token)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|r| r.into()))
}

pub async fn find_by_name(pool: &PgPool, full_name: &str) -> Result<Option<Repo>, sqlx::Error> {
    let row = sqlx::query_as::<_, RepoRow>(&format!(
        "SELECT {REPO_COLUMNS} FROM repos WHERE full_name = $1"
    ))
    .bind(full_name)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|r| r.into()))
}

pub async fn find_by_id(pool: &PgPool, id: i64) -> Result<Option<Repo>, sqlx::Error> {
    let row = sqlx::query_as::<_, RepoRow>(&format!("SELECT {REPO_COLUMNS} FROM repos WHERE id = $1"))
        .bind(id)
        .fetch_optional(pool)
        .await?;

    Ok(row.map(|r| r.into()))
}

/// Public repositories plus the ones the user was granted
pub async fn list_visible(pool: &PgPool, user: &User) -> Result<Vec<Repo>, sqlx::Error> {
    let rows = sqlx::query_as::<_, RepoRow>(&format!(
        r#"
        SELECT {REPO_COLUMNS} FROM repos
        WHERE private = FALSE
           OR $2
           OR id IN (SELECT repo_id FROM perms WHERE user_id = $1)
        ORDER BY full_name ASC
        "#
    ))
    .bind(user.id)
    .bind(user.admin)
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(|r| r.into()).collect())
}

pub async fn configs_for_build(pool: &PgPool, build_id: i64) -> Result<Vec<Config>, sqlx::Error> {
    let rows: Vec<(i64, i64, String, String)> = sqlx::query_as(
        r#"
        SELECT configs.id, configs.repo_id, configs.name, configs.data
        FROM configs
        JOIN build_configs ON build_configs.config_id = configs.id
        WHERE build_configs.build_id = $1
        ORDER BY configs.name ASC
        "#,
    )
    .bind(build_id)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .map(|(id, repo_id, name, data)| Config {
            id,
            repo_id,
            name,
            data,
        })
        .collect())
}

pub async fn link_config(pool: &PgPool, config_id: i64, build_id: i64) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO build_configs (config_id, build_id)
        VALUES ($1, $2)
        ON CONFLICT DO NOTHING
        "#,
    )
    .bind(config_id)
    .bind(build_id)
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn list_secrets(pool: &PgPool, repo: &Repo) -> Result<Vec<Secret>, sqlx::Error> {
    let rows: Vec<(String, String)> =
        sqlx::query_as("SELECT name, value FROM secrets WHERE repo_id = $1 ORDER BY name")
            .bind(repo.id)
            .fetch_all(pool)
            .await?;

    Ok(rows
        .into_iter()
        .map(|(name, value)| Secret { name, value })
        .collect())
}

pub async fn list_registries(pool: &PgPool, repo: &Repo) -> Result<Vec<Registry>, sqlx::Error> {
    let rows: Vec<(String, String, String)> = sqlx::query_as(
        "SELECT address, username, password FROM registries WHERE repo_id = $1 ORDER BY address",
    )
    .bind(repo.id)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .map(|(address, username, password)| Registry {
            address,
            username,
            password,
        })
        .collect())
}

// =============================================================================
// Database Row Types
// =============================================================================

#[derive(sqlx::FromRow)]
struct UserRow {
    id: i64,
    login: String,
    email: String,
    admin: bool,
    token: String,
}

impl From<UserRow> for User {
    fn from(row: UserRow) -> Self {
        User {
            id: row.id,
            login: row.login,
            email: row.email,
            admin: row.admin,
            token: row.token,
        }
    }
}

#[derive(sqlx::FromRow)]
struct RepoRow {
    id: i64,
    user_id: i64,
    owner: String,
    name: String,
    full_name: String,
    link: String,
    clone_url: String,
    branch: String,
    private: bool,
    timeout: i64,
}

impl From<RepoRow> for Repo {
    fn from(row: RepoRow) -> Self {
        Repo {
            id: row.id,
            user_id: row.user_id,
            owner: row.owner,
            name: row.name,
            full_name: row.full_name,
            link: row.link,
            clone_url: row.clone_url,
            branch: row.branch,
            private: row.private,
            timeout: row.timeout,
        }
    }
}
