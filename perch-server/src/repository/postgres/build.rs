//! Build Repository
//!
//! Handles all database operations related to builds.

use perch_core::domain::{Build, EventKind, Repo, Status};
use sqlx::PgPool;

use crate::repository::BUILD_PAGE_SIZE;

const BUILD_COLUMNS: &str = r#"
    id, repo_id, number, parent, event, status, error, enqueued, created,
    started, finished, deploy, commit_sha, branch, git_ref, message, author,
    sender, reviewer, reviewed
"#;

/// Insert a build, assigning the next number for its repository
pub async fn create(pool: &PgPool, build: &mut Build) -> Result<(), sqlx::Error> {
    let (id, number): (i64, i64) = sqlx::query_as(
        r#"
        INSERT INTO builds (repo_id, number, parent, event, status, error, enqueued,
                            created, started, finished, deploy, commit_sha, branch,
                            git_ref, message, author, sender, reviewer, reviewed)
        VALUES ($1,
                COALESCE((SELECT MAX(number) FROM builds WHERE repo_id = $1), 0) + 1,
                $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18)
        RETURNING id, number
        "#,
    )
    .bind(build.repo_id)
    .bind(build.parent)
    .bind(build.event.as_str())
    .bind(build.status.as_str())
    .bind(&build.error)
    .bind(build.enqueued)
    .bind(build.created)
    .bind(build.started)
    .bind(build.finished)
    .bind(&build.deploy)
    .bind(&build.commit)
    .bind(&build.branch)
    .bind(&build.git_ref)
    .bind(&build.message)
    .bind(&build.author)
    .bind(&build.sender)
    .bind(&build.reviewer)
    .bind(build.reviewed)
    .fetch_one(pool)
    .await?;

    build.id = id;
    build.number = number;
    Ok(())
}

/// Persist the mutable fields of a build
pub async fn update(pool: &PgPool, build: &Build) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        r#"
        UPDATE builds
        SET status = $1, error = $2, enqueued = $3, started = $4, finished = $5,
            deploy = $6, event = $7, reviewer = $8, reviewed = $9
        WHERE id = $10
        "#,
    )
    .bind(build.status.as_str())
    .bind(&build.error)
    .bind(build.enqueued)
    .bind(build.started)
    .bind(build.finished)
    .bind(&build.deploy)
    .bind(build.event.as_str())
    .bind(&build.reviewer)
    .bind(build.reviewed)
    .bind(build.id)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

pub async fn find_by_id(pool: &PgPool, id: i64) -> Result<Option<Build>, sqlx::Error> {
    let row = sqlx::query_as::<_, BuildRow>(&format!(
        "SELECT {BUILD_COLUMNS} FROM builds WHERE id = $1"
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|r| r.into()))
}

pub async fn find_by_number(
    pool: &PgPool,
    repo: &Repo,
    number: i64,
) -> Result<Option<Build>, sqlx::Error> {
    let row = sqlx::query_as::<_, BuildRow>(&format!(
        "SELECT {BUILD_COLUMNS} FROM builds WHERE repo_id = $1 AND number = $2"
    ))
    .bind(repo.id)
    .bind(number)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|r| r.into()))
}

/// Most recent build on a branch
pub async fn find_last(
    pool: &PgPool,
    repo: &Repo,
    branch: &str,
) -> Result<Option<Build>, sqlx::Error> {
    let row = sqlx::query_as::<_, BuildRow>(&format!(
        r#"
        SELECT {BUILD_COLUMNS} FROM builds
        WHERE repo_id = $1 AND branch = $2
        ORDER BY number DESC
        LIMIT 1
        "#
    ))
    .bind(repo.id)
    .bind(branch)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|r| r.into()))
}

/// Most recent build on a branch created before the given build id
pub async fn find_last_before(
    pool: &PgPool,
    repo: &Repo,
    branch: &str,
    id: i64,
) -> Result<Option<Build>, sqlx::Error> {
    let row = sqlx::query_as::<_, BuildRow>(&format!(
        r#"
        SELECT {BUILD_COLUMNS} FROM builds
        WHERE repo_id = $1 AND branch = $2 AND id < $3
        ORDER BY id DESC
        LIMIT 1
        "#
    ))
    .bind(repo.id)
    .bind(branch)
    .bind(id)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|r| r.into()))
}

pub async fn list_by_repo(pool: &PgPool, repo: &Repo, page: i64) -> Result<Vec<Build>, sqlx::Error> {
    let rows = sqlx::query_as::<_, BuildRow>(&format!(
        r#"
        SELECT {BUILD_COLUMNS} FROM builds
        WHERE repo_id = $1
        ORDER BY number DESC
        LIMIT $2 OFFSET $3
        "#
    ))
    .bind(repo.id)
    .bind(BUILD_PAGE_SIZE)
    .bind((page.max(1) - 1) * BUILD_PAGE_SIZE)
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(|r| r.into()).collect())
}

/// Pending and running builds, oldest first
pub async fn list_active(pool: &PgPool) -> Result<Vec<Build>, sqlx::Error> {
    let rows = sqlx::query_as::<_, BuildRow>(&format!(
        r#"
        SELECT {BUILD_COLUMNS} FROM builds
        WHERE status IN ('pending', 'running')
        ORDER BY id ASC
        "#
    ))
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(|r| r.into()).collect())
}

// =============================================================================
// Database Row Types
// =============================================================================

#[derive(sqlx::FromRow)]
struct BuildRow {
    id: i64,
    repo_id: i64,
    number: i64,
    parent: i64,
    event: String,
    status: String,
    error: String,
    enqueued: i64,
    created: i64,
    started: i64,
    finished: i64,
    deploy: String,
    commit_sha: String,
    branch: String,
    git_ref: String,
    message: String,
    author: String,
    sender: String,
    reviewer: String,
    reviewed: i64,
}

impl From<BuildRow> for Build {
    fn from(row: BuildRow) -> Self {
        Build {
            id: row.id,
            repo_id: row.repo_id,
            number: row.number,
            parent: row.parent,
            event: row.event.parse().unwrap_or(EventKind::Push),
            status: row.status.parse().unwrap_or(Status::Error),
            error: row.error,
            enqueued: row.enqueued,
            created: row.created,
            started: row.started,
            finished: row.finished,
            deploy: row.deploy,
            commit: row.commit_sha,
            branch: row.branch,
            git_ref: row.git_ref,
            message: row.message,
            author: row.author,
            sender: row.sender,
            reviewer: row.reviewer,
            reviewed: row.reviewed,
            procs: Vec::new(),
        }
    }
}
