//! Proc Repository
//!
//! Handles all database operations related to procs. Procs are stored flat;
//! the tree is rebuilt by the caller.

use std::collections::HashMap;

use perch_core::domain::{Build, Proc, Status};
use sqlx::PgPool;

const PROC_COLUMNS: &str = r#"
    id, build_id, pid, ppid, pgid, name, state, error, exit_code, started,
    stopped, machine, platform, environ
"#;

/// Insert procs in one transaction, assigning their ids
pub async fn create_all(pool: &PgPool, procs: &mut [Proc]) -> Result<(), sqlx::Error> {
    let mut tx = pool.begin().await?;

    for proc in procs.iter_mut() {
        let (id,): (i64,) = sqlx::query_as(
            r#"
            INSERT INTO procs (build_id, pid, ppid, pgid, name, state, error, exit_code,
                               started, stopped, machine, platform, environ)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            RETURNING id
            "#,
        )
        .bind(proc.build_id)
        .bind(proc.pid)
        .bind(proc.ppid)
        .bind(proc.pgid)
        .bind(&proc.name)
        .bind(proc.state.as_str())
        .bind(&proc.error)
        .bind(proc.exit_code)
        .bind(proc.started)
        .bind(proc.stopped)
        .bind(&proc.machine)
        .bind(&proc.platform)
        .bind(serde_json::to_value(&proc.environ).unwrap_or_default())
        .fetch_one(&mut *tx)
        .await?;
        proc.id = id;
    }

    tx.commit().await
}

pub async fn update(pool: &PgPool, proc: &Proc) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        r#"
        UPDATE procs
        SET state = $1, error = $2, exit_code = $3, started = $4, stopped = $5,
            machine = $6, platform = $7
        WHERE id = $8
        "#,
    )
    .bind(proc.state.as_str())
    .bind(&proc.error)
    .bind(proc.exit_code)
    .bind(proc.started)
    .bind(proc.stopped)
    .bind(&proc.machine)
    .bind(&proc.platform)
    .bind(proc.id)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

pub async fn find_by_id(pool: &PgPool, id: i64) -> Result<Option<Proc>, sqlx::Error> {
    let row = sqlx::query_as::<_, ProcRow>(&format!(
        "SELECT {PROC_COLUMNS} FROM procs WHERE id = $1"
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|r| r.into()))
}

pub async fn find_by_pid(pool: &PgPool, build: &Build, pid: i64) -> Result<Option<Proc>, sqlx::Error> {
    let row = sqlx::query_as::<_, ProcRow>(&format!(
        "SELECT {PROC_COLUMNS} FROM procs WHERE build_id = $1 AND pid = $2"
    ))
    .bind(build.id)
    .bind(pid)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|r| r.into()))
}

pub async fn find_child(
    pool: &PgPool,
    build: &Build,
    ppid: i64,
    name: &str,
) -> Result<Option<Proc>, sqlx::Error> {
    let row = sqlx::query_as::<_, ProcRow>(&format!(
        "SELECT {PROC_COLUMNS} FROM procs WHERE build_id = $1 AND ppid = $2 AND name = $3"
    ))
    .bind(build.id)
    .bind(ppid)
    .bind(name)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|r| r.into()))
}

pub async fn list_by_build(pool: &PgPool, build: &Build) -> Result<Vec<Proc>, sqlx::Error> {
    let rows = sqlx::query_as::<_, ProcRow>(&format!(
        "SELECT {PROC_COLUMNS} FROM procs WHERE build_id = $1 ORDER BY pid ASC"
    ))
    .bind(build.id)
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(|r| r.into()).collect())
}

// =============================================================================
// Database Row Types
// =============================================================================

#[derive(sqlx::FromRow)]
struct ProcRow {
    id: i64,
    build_id: i64,
    pid: i64,
    ppid: i64,
    pgid: i64,
    name: String,
    state: String,
    error: String,
    exit_code: i32,
    started: i64,
    stopped: i64,
    machine: String,
    platform: String,
    environ: serde_json::Value,
}

impl From<ProcRow> for Proc {
    fn from(row: ProcRow) -> Self {
        let environ: HashMap<String, String> =
            serde_json::from_value(row.environ).unwrap_or_default();

        Proc {
            id: row.id,
            build_id: row.build_id,
            pid: row.pid,
            ppid: row.ppid,
            pgid: row.pgid,
            name: row.name,
            state: row.state.parse().unwrap_or(Status::Error),
            error: row.error,
            exit_code: row.exit_code,
            started: row.started,
            stopped: row.stopped,
            machine: row.machine,
            platform: row.platform,
            environ,
            children: Vec::new(),
        }
    }
}
