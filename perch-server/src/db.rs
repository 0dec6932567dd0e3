use sqlx::{PgPool, postgres::PgPoolOptions};
use std::time::Duration;

pub async fn create_pool(database_url: &str) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(10)
        .acquire_timeout(Duration::from_secs(5))
        .connect(database_url)
        .await
}

pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::Error> {
    // Users and repositories
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS users (
            id BIGSERIAL PRIMARY KEY,
            login VARCHAR(255) NOT NULL UNIQUE,
            email VARCHAR(500) NOT NULL DEFAULT '',
            admin BOOLEAN NOT NULL DEFAULT FALSE,
            token VARCHAR(500) NOT NULL UNIQUE
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS repos (
            id BIGSERIAL PRIMARY KEY,
            user_id BIGINT NOT NULL DEFAULT 0,
            owner VARCHAR(255) NOT NULL,
            name VARCHAR(255) NOT NULL,
            full_name VARCHAR(255) NOT NULL UNIQUE,
            link TEXT NOT NULL DEFAULT '',
            clone_url TEXT NOT NULL DEFAULT '',
            branch VARCHAR(255) NOT NULL DEFAULT 'main',
            private BOOLEAN NOT NULL DEFAULT FALSE,
            timeout BIGINT NOT NULL DEFAULT 60
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS perms (
            user_id BIGINT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            repo_id BIGINT NOT NULL REFERENCES repos(id) ON DELETE CASCADE,
            PRIMARY KEY (user_id, repo_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Builds and their flat proc lists
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS builds (
            id BIGSERIAL PRIMARY KEY,
            repo_id BIGINT NOT NULL REFERENCES repos(id) ON DELETE CASCADE,
            number BIGINT NOT NULL,
            parent BIGINT NOT NULL DEFAULT 0,
            event VARCHAR(50) NOT NULL,
            status VARCHAR(50) NOT NULL,
            error TEXT NOT NULL DEFAULT '',
            enqueued BIGINT NOT NULL DEFAULT 0,
            created BIGINT NOT NULL DEFAULT 0,
            started BIGINT NOT NULL DEFAULT 0,
            finished BIGINT NOT NULL DEFAULT 0,
            deploy VARCHAR(500) NOT NULL DEFAULT '',
            commit_sha VARCHAR(255) NOT NULL DEFAULT '',
            branch VARCHAR(500) NOT NULL DEFAULT '',
            git_ref VARCHAR(500) NOT NULL DEFAULT '',
            message TEXT NOT NULL DEFAULT '',
            author VARCHAR(255) NOT NULL DEFAULT '',
            sender VARCHAR(255) NOT NULL DEFAULT '',
            reviewer VARCHAR(255) NOT NULL DEFAULT '',
            reviewed BIGINT NOT NULL DEFAULT 0,
            UNIQUE (repo_id, number)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS procs (
            id BIGSERIAL PRIMARY KEY,
            build_id BIGINT NOT NULL REFERENCES builds(id) ON DELETE CASCADE,
            pid BIGINT NOT NULL,
            ppid BIGINT NOT NULL DEFAULT 0,
            pgid BIGINT NOT NULL DEFAULT 0,
            name VARCHAR(250) NOT NULL,
            state VARCHAR(50) NOT NULL,
            error TEXT NOT NULL DEFAULT '',
            exit_code INTEGER NOT NULL DEFAULT 0,
            started BIGINT NOT NULL DEFAULT 0,
            stopped BIGINT NOT NULL DEFAULT 0,
            machine VARCHAR(250) NOT NULL DEFAULT '',
            platform VARCHAR(250) NOT NULL DEFAULT '',
            environ JSONB NOT NULL DEFAULT '{}',
            UNIQUE (build_id, pid)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS logs (
            proc_id BIGINT PRIMARY KEY REFERENCES procs(id) ON DELETE CASCADE,
            data BYTEA NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Pipeline inputs
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS configs (
            id BIGSERIAL PRIMARY KEY,
            repo_id BIGINT NOT NULL REFERENCES repos(id) ON DELETE CASCADE,
            name VARCHAR(255) NOT NULL,
            data TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS build_configs (
            config_id BIGINT NOT NULL REFERENCES configs(id) ON DELETE CASCADE,
            build_id BIGINT NOT NULL REFERENCES builds(id) ON DELETE CASCADE,
            PRIMARY KEY (config_id, build_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS secrets (
            id BIGSERIAL PRIMARY KEY,
            repo_id BIGINT NOT NULL REFERENCES repos(id) ON DELETE CASCADE,
            name VARCHAR(255) NOT NULL,
            value TEXT NOT NULL,
            UNIQUE (repo_id, name)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS registries (
            id BIGSERIAL PRIMARY KEY,
            repo_id BIGINT NOT NULL REFERENCES repos(id) ON DELETE CASCADE,
            address VARCHAR(255) NOT NULL,
            username VARCHAR(255) NOT NULL,
            password TEXT NOT NULL,
            UNIQUE (repo_id, address)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create indexes for the lookups the services make
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_builds_status ON builds(status)")
        .execute(pool)
        .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_builds_repo_branch ON builds(repo_id, branch)")
        .execute(pool)
        .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_procs_build_id ON procs(build_id, pid)")
        .execute(pool)
        .await?;

    tracing::info!("Database migrations completed successfully");
    Ok(())
}
