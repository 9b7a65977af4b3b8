use anyhow::Context;

// Advisory locks are scoped to the Postgres session; `db::connect` keeps the whole run on a
// single connection so the unlock lands on the session that took the lock.
const MIGRATION_LOCK_KEY: i64 = 0x5452_4144_454D; // "TRADEM"

pub async fn try_acquire_migration_lock(pool: &sqlx::PgPool) -> anyhow::Result<bool> {
    let acquired: (bool,) = sqlx::query_as("SELECT pg_try_advisory_lock($1)")
        .persistent(false)
        .bind(MIGRATION_LOCK_KEY)
        .fetch_one(pool)
        .await
        .with_context(|| format!("failed to acquire advisory lock (key={MIGRATION_LOCK_KEY})"))?;
    Ok(acquired.0)
}

pub async fn release_migration_lock(pool: &sqlx::PgPool) -> anyhow::Result<()> {
    sqlx::query("SELECT pg_advisory_unlock($1)")
        .persistent(false)
        .bind(MIGRATION_LOCK_KEY)
        .execute(pool)
        .await
        .with_context(|| format!("failed to release advisory lock (key={MIGRATION_LOCK_KEY})"))?;
    Ok(())
}
