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
    // Append-only deployment history; seq gives a total append order
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS deployment_records (
            seq BIGSERIAL PRIMARY KEY,
            id UUID NOT NULL UNIQUE,
            environment VARCHAR(32) NOT NULL,
            service VARCHAR(64) NOT NULL,
            image_tag VARCHAR(255) NOT NULL,
            run_id UUID,
            run_number BIGINT,
            purpose VARCHAR(16) NOT NULL,
            outcome VARCHAR(16) NOT NULL,
            reason TEXT,
            recorded_at TIMESTAMPTZ NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_deployment_records_target ON deployment_records(environment, service, seq)",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_deployment_records_run ON deployment_records(run_id)",
    )
    .execute(pool)
    .await?;

    // Run numbers outlive runs that never wrote a record
    sqlx::query("CREATE SEQUENCE IF NOT EXISTS run_numbers")
        .execute(pool)
        .await?;

    sqlx::query(
        r#"
        SELECT setval('run_numbers', GREATEST(
            (SELECT last_value FROM run_numbers),
            (SELECT COALESCE(MAX(run_number), 0) FROM deployment_records),
            1
        ))
        "#,
    )
    .execute(pool)
    .await?;

    tracing::info!("Database migrations completed successfully");
    Ok(())
}
