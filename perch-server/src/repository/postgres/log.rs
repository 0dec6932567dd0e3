//! Log Repository
//!
//! Stores the final output of each proc as one blob.

use perch_core::domain::Proc;
use sqlx::PgPool;

pub async fn find(pool: &PgPool, proc: &Proc) -> Result<Option<Vec<u8>>, sqlx::Error> {
    let row: Option<(Vec<u8>,)> = sqlx::query_as("SELECT data FROM logs WHERE proc_id = $1")
        .bind(proc.id)
        .fetch_optional(pool)
        .await?;

    Ok(row.map(|(data,)| data))
}

/// Insert or replace the log of a proc
pub async fn save(pool: &PgPool, proc: &Proc, data: Vec<u8>) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO logs (proc_id, data)
        VALUES ($1, $2)
        ON CONFLICT (proc_id) DO UPDATE SET data = EXCLUDED.data
        "#,
    )
    .bind(proc.id)
    .bind(data)
    .execute(pool)
    .await?;

    Ok(())
}
