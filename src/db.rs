use anyhow::{Context, Result};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

pub async fn build_pool(database_url: &str, max_connections: u32) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await?;
    Ok(pool)
}

/// Creates the report table this service owns. Catalog and incident tables belong to the
/// admin service and are only read.
pub async fn ensure_schema(pool: &PgPool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS shift_reports (
            id uuid PRIMARY KEY,
            tenant_id text NOT NULL,
            domain text NOT NULL,
            entity_id text NOT NULL,
            shift jsonb NOT NULL,
            rate_avg double precision NOT NULL,
            rollup jsonb NOT NULL,
            idle_percentage double precision NULL,
            worker_id text NOT NULL,
            supervisor_id text NOT NULL,
            downtime_log_ids text[] NOT NULL DEFAULT '{}',
            needle_change_log_ids text[] NOT NULL DEFAULT '{}',
            start_time timestamptz NOT NULL,
            end_time timestamptz NOT NULL,
            created_at timestamptz NOT NULL DEFAULT now()
        )
        "#,
    )
    .execute(pool)
    .await
    .context("failed to create shift_reports")?;

    sqlx::query(
        r#"
        CREATE UNIQUE INDEX IF NOT EXISTS shift_reports_entity_window_idx
            ON shift_reports (entity_id, start_time, end_time)
        "#,
    )
    .execute(pool)
    .await
    .context("failed to create shift_reports unique index")?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS shift_reports_tenant_time_idx ON shift_reports (tenant_id, start_time DESC)",
    )
    .execute(pool)
    .await?;

    Ok(())
}
