use crate::migrate::source::MigrationFile;
use anyhow::Context;
use chrono::{DateTime, Utc};
use sqlx::PgConnection;

pub const LEDGER_TABLE: &str = "public._ops_migrations";

#[derive(Debug, Clone)]
pub struct AppliedMigration {
    pub name: String,
    pub checksum: String,
    pub applied_at: DateTime<Utc>,
    pub execution_ms: i64,
}

pub async fn ensure_ledger(pool: &sqlx::PgPool) -> anyhow::Result<()> {
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS public._ops_migrations ( \
           name text PRIMARY KEY, \
           checksum text NOT NULL, \
           applied_at timestamptz NOT NULL DEFAULT now(), \
           execution_ms bigint NOT NULL \
         )",
    )
    .persistent(false)
    .execute(pool)
    .await
    .context("create _ops_migrations failed")?;
    Ok(())
}

/// Applied rows ordered by name; empty when the ledger has not been created yet.
pub async fn applied(pool: &sqlx::PgPool) -> anyhow::Result<Vec<AppliedMigration>> {
    let exists: (bool,) = sqlx::query_as("SELECT to_regclass($1) IS NOT NULL")
        .persistent(false)
        .bind(LEDGER_TABLE)
        .fetch_one(pool)
        .await
        .context("check _ops_migrations existence failed")?;
    if !exists.0 {
        return Ok(Vec::new());
    }

    let rows = sqlx::query_as::<_, (String, String, DateTime<Utc>, i64)>(
        "SELECT name, checksum, applied_at, execution_ms \
         FROM public._ops_migrations \
         ORDER BY name ASC",
    )
    .persistent(false)
    .fetch_all(pool)
    .await
    .context("select _ops_migrations failed")?;

    Ok(rows
        .into_iter()
        .map(|(name, checksum, applied_at, execution_ms)| AppliedMigration {
            name,
            checksum,
            applied_at,
            execution_ms,
        })
        .collect())
}

pub async fn record(
    conn: &mut PgConnection,
    migration: &MigrationFile,
    execution_ms: i64,
) -> anyhow::Result<()> {
    sqlx::query(
        "INSERT INTO public._ops_migrations (name, checksum, execution_ms) \
         VALUES ($1, $2, $3)",
    )
    .persistent(false)
    .bind(&migration.name)
    .bind(&migration.checksum)
    .bind(execution_ms)
    .execute(conn)
    .await
    .with_context(|| format!("insert _ops_migrations row for {} failed", migration.name))?;
    Ok(())
}

/// Returns whether a row was removed.
pub async fn forget(pool: &sqlx::PgPool, name: &str) -> anyhow::Result<bool> {
    let res = sqlx::query("DELETE FROM public._ops_migrations WHERE name = $1")
        .persistent(false)
        .bind(name)
        .execute(pool)
        .await
        .with_context(|| format!("delete _ops_migrations row for {name} failed"))?;
    Ok(res.rows_affected() > 0)
}
