//! Ledger-tracked migration runner.
//!
//! Files from the migrations directory are applied in name order and recorded in
//! `public._ops_migrations`, so each file runs at most once per database regardless of whether
//! its SQL is written idempotently.

pub mod ledger;
pub mod lock;
pub mod source;

use crate::errors::{classify_sqlx, ErrorClass};
use anyhow::Context;
use chrono::{DateTime, Utc};
use ledger::AppliedMigration;
use serde::Serialize;
use sqlx::{Executor, PgConnection, PgPool, Postgres, Transaction};
use std::collections::{BTreeSet, HashMap};
use std::future::Future;
use std::time::Instant;

pub use source::{load_dir, load_file, MigrationFile};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum MigrationState {
    Applied { applied_at: DateTime<Utc> },
    Pending,
    /// Applied, but the file on disk no longer matches what ran.
    Drifted { recorded_checksum: String, current_checksum: String },
    /// Recorded in the ledger with no file on disk.
    Missing { applied_at: DateTime<Utc> },
}

#[derive(Debug, Clone, Serialize)]
pub struct MigrationStatus {
    pub name: String,
    #[serde(flatten)]
    pub state: MigrationState,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RunOptions {
    pub dry_run: bool,
    pub allow_drift: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct AppliedReport {
    pub name: String,
    pub execution_ms: i64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RunReport {
    pub dry_run: bool,
    pub applied: Vec<AppliedReport>,
    pub would_apply: Vec<String>,
    pub already_applied: usize,
    pub drifted: Vec<String>,
    pub missing: Vec<String>,
}

/// Joins files on disk with ledger rows. Files come first in name order, then ledger-only rows.
pub fn plan(files: &[MigrationFile], applied: &[AppliedMigration]) -> Vec<MigrationStatus> {
    let by_name: HashMap<&str, &AppliedMigration> =
        applied.iter().map(|a| (a.name.as_str(), a)).collect();

    let mut out = Vec::with_capacity(files.len());
    for file in files {
        let state = match by_name.get(file.name.as_str()) {
            None => MigrationState::Pending,
            Some(row) if row.checksum == file.checksum => MigrationState::Applied {
                applied_at: row.applied_at,
            },
            Some(row) => MigrationState::Drifted {
                recorded_checksum: row.checksum.clone(),
                current_checksum: file.checksum.clone(),
            },
        };
        out.push(MigrationStatus {
            name: file.name.clone(),
            state,
        });
    }

    let on_disk: BTreeSet<&str> = files.iter().map(|f| f.name.as_str()).collect();
    for row in applied {
        if !on_disk.contains(row.name.as_str()) {
            out.push(MigrationStatus {
                name: row.name.clone(),
                state: MigrationState::Missing {
                    applied_at: row.applied_at,
                },
            });
        }
    }

    out
}

pub async fn status(pool: &PgPool, files: &[MigrationFile]) -> anyhow::Result<Vec<MigrationStatus>> {
    let applied = ledger::applied(pool).await?;
    Ok(plan(files, &applied))
}

pub async fn run(
    pool: &PgPool,
    files: &[MigrationFile],
    opts: RunOptions,
) -> anyhow::Result<RunReport> {
    if opts.dry_run {
        let statuses = status(pool, files).await?;
        return Ok(summarize(&statuses, true));
    }

    with_migration_lock(pool, || run_locked(pool, files, opts)).await
}

/// Runs `f` while holding the migration advisory lock, releasing it on every exit path.
async fn with_migration_lock<T, F, Fut>(pool: &PgPool, f: F) -> anyhow::Result<T>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = anyhow::Result<T>>,
{
    let acquired = lock::try_acquire_migration_lock(pool).await?;
    anyhow::ensure!(acquired, "another migration run is in progress");

    let res = f().await;

    if let Err(err) = lock::release_migration_lock(pool).await {
        tracing::warn!(error = %err, "failed to release migration lock");
    }
    res
}

async fn run_locked(
    pool: &PgPool,
    files: &[MigrationFile],
    opts: RunOptions,
) -> anyhow::Result<RunReport> {
    ledger::ensure_ledger(pool).await?;
    let statuses = status(pool, files).await?;
    let mut report = summarize(&statuses, false);

    for name in &report.missing {
        tracing::warn!(migration = %name, "ledger row has no matching file");
    }
    if !report.drifted.is_empty() {
        if !opts.allow_drift {
            anyhow::bail!(
                "applied migrations changed on disk: {} (pass --allow-drift to continue)",
                report.drifted.join(", ")
            );
        }
        for name in &report.drifted {
            tracing::warn!(migration = %name, "applied migration changed on disk; continuing");
        }
    }

    let pending: BTreeSet<&str> = report.would_apply.iter().map(String::as_str).collect();
    let mut applied = Vec::with_capacity(pending.len());
    for file in files.iter().filter(|f| pending.contains(f.name.as_str())) {
        let execution_ms = apply_one(pool, file).await?;
        tracing::info!(
            migration = %file.name,
            transactional = file.transactional,
            execution_ms,
            "migration applied"
        );
        applied.push(AppliedReport {
            name: file.name.clone(),
            execution_ms,
        });
    }

    report.applied = applied;
    report.would_apply.clear();
    Ok(report)
}

fn summarize(statuses: &[MigrationStatus], dry_run: bool) -> RunReport {
    let mut report = RunReport {
        dry_run,
        ..Default::default()
    };
    for s in statuses {
        match &s.state {
            MigrationState::Applied { .. } => report.already_applied += 1,
            MigrationState::Pending => report.would_apply.push(s.name.clone()),
            MigrationState::Drifted { .. } => {
                report.already_applied += 1;
                report.drifted.push(s.name.clone());
            }
            MigrationState::Missing { .. } => report.missing.push(s.name.clone()),
        }
    }
    report
}

async fn apply_one(pool: &PgPool, file: &MigrationFile) -> anyhow::Result<i64> {
    let t0 = Instant::now();

    if file.transactional {
        let mut tx = pool.begin().await.context("begin transaction failed")?;
        if let Err(err) = (&mut *tx).execute(file.sql.as_str()).await {
            rollback(tx, file).await;
            return Err(describe_failure(err, file));
        }
        let execution_ms = elapsed_ms(t0);
        ledger::record(&mut tx, file, execution_ms).await?;
        tx.commit().await.context("commit transaction failed")?;
        Ok(execution_ms)
    } else {
        let mut conn = pool.acquire().await.context("acquire connection failed")?;
        exec_autocommit(&mut conn, file).await?;
        let execution_ms = elapsed_ms(t0);
        ledger::record(&mut conn, file, execution_ms).await?;
        Ok(execution_ms)
    }
}

// A multi-statement query runs as one implicit transaction, so each statement is sent on
// its own. Statements before a failing one stay committed.
async fn exec_autocommit(conn: &mut PgConnection, file: &MigrationFile) -> anyhow::Result<()> {
    let statements = file.statements()?;
    let total = statements.len();
    for (i, stmt) in statements.into_iter().enumerate() {
        if let Err(err) = (&mut *conn).execute(stmt).await {
            return Err(describe_failure(err, file)
                .context(format!("statement {} of {total} failed", i + 1)));
        }
    }
    Ok(())
}

async fn rollback(tx: Transaction<'_, Postgres>, file: &MigrationFile) {
    if let Err(err) = tx.rollback().await {
        tracing::warn!(migration = %file.name, error = %err, "rollback failed");
    }
}

/// Records a file as applied without running it. Returns `false` if it was already recorded.
pub async fn mark_applied(pool: &PgPool, file: &MigrationFile) -> anyhow::Result<bool> {
    with_migration_lock(pool, || async move {
        ledger::ensure_ledger(pool).await?;
        let applied = ledger::applied(pool).await?;
        if let Some(row) = applied.iter().find(|a| a.name == file.name) {
            anyhow::ensure!(
                row.checksum == file.checksum,
                "{} is already recorded with a different checksum",
                file.name
            );
            return Ok(false);
        }

        let mut conn = pool.acquire().await.context("acquire connection failed")?;
        ledger::record(&mut conn, file, 0).await?;
        Ok(true)
    })
    .await
}

/// Drops a ledger row so the file runs again on the next `run`.
pub async fn forget(pool: &PgPool, name: &str) -> anyhow::Result<bool> {
    with_migration_lock(pool, || async move {
        ledger::ensure_ledger(pool).await?;
        ledger::forget(pool, name).await
    })
    .await
}

/// Runs a SQL file once with no ledger bookkeeping.
pub async fn exec_file(pool: &PgPool, file: &MigrationFile, transactional: bool) -> anyhow::Result<i64> {
    let t0 = Instant::now();
    if transactional {
        let mut tx = pool.begin().await.context("begin transaction failed")?;
        if let Err(err) = (&mut *tx).execute(file.sql.as_str()).await {
            rollback(tx, file).await;
            return Err(describe_failure(err, file));
        }
        tx.commit().await.context("commit transaction failed")?;
    } else {
        let mut conn = pool.acquire().await.context("acquire connection failed")?;
        exec_autocommit(&mut conn, file).await?;
    }
    Ok(elapsed_ms(t0))
}

fn describe_failure(err: sqlx::Error, file: &MigrationFile) -> anyhow::Error {
    let class = classify_sqlx(&err);
    let hint = match class {
        ErrorClass::AlreadyExists => " (object already exists; guard with IF NOT EXISTS)",
        ErrorClass::Connection => " (connection lost)",
        _ => "",
    };
    anyhow::Error::new(err).context(format!("migration {} failed{hint}", file.name))
}

fn elapsed_ms(t0: Instant) -> i64 {
    i64::try_from(t0.elapsed().as_millis()).unwrap_or(i64::MAX)
}
