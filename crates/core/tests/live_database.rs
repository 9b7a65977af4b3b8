//! Runs against a disposable Postgres when `TEST_DATABASE_URL` is set; otherwise each test
//! returns early.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use trademate_core::config::Settings;
use trademate_core::inspect::checks::{self, Check};
use trademate_core::migrate::{self, MigrationState, RunOptions};
use trademate_core::sql::QualifiedName;
use uuid::Uuid;

// Runs share the migration advisory lock, so they must not overlap.
static SERIAL: Mutex<()> = Mutex::new(());

fn serial() -> MutexGuard<'static, ()> {
    SERIAL.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

async fn pool() -> Option<sqlx::PgPool> {
    let url = std::env::var("TEST_DATABASE_URL").ok()?;
    let vars: HashMap<&str, String> = [("DATABASE_URL", url)].into_iter().collect();
    let settings = Settings::from_lookup(|k| vars.get(k).cloned()).unwrap();
    Some(trademate_core::db::connect(&settings).await.unwrap())
}

fn unique(prefix: &str) -> String {
    format!("{prefix}_{}", Uuid::new_v4().simple())
}

#[tokio::test]
async fn migrations_apply_once_and_are_tracked() {
    let _serial = serial();
    let Some(pool) = pool().await else {
        return;
    };

    let schema = unique("ops_test");
    let tmp = tempfile::tempdir().unwrap();
    let first = format!("{}_001_schema.sql", schema);
    let second = format!("{}_002_enum.sql", schema);
    std::fs::write(
        tmp.path().join(&first),
        format!(
            "CREATE SCHEMA {schema};\n\
             CREATE TYPE {schema}.job_status AS ENUM ('draft', 'scheduled');\n\
             CREATE TABLE {schema}.jobs (id uuid PRIMARY KEY, status {schema}.job_status NOT NULL);\n"
        ),
    )
    .unwrap();
    std::fs::write(
        tmp.path().join(&second),
        format!(
            "-- ops:no-transaction\n\
             ALTER TYPE {schema}.job_status ADD VALUE IF NOT EXISTS 'invoiced';\n"
        ),
    )
    .unwrap();

    let files = migrate::load_dir(tmp.path()).unwrap();
    assert!(!files[1].transactional);

    let report = migrate::run(&pool, &files, RunOptions::default()).await.unwrap();
    assert_eq!(report.applied.len(), 2);

    let again = migrate::run(&pool, &files, RunOptions::default()).await.unwrap();
    assert!(again.applied.is_empty());
    assert!(again.already_applied >= 2);

    let statuses = migrate::status(&pool, &files).await.unwrap();
    assert!(statuses
        .iter()
        .filter(|s| s.name == first || s.name == second)
        .all(|s| matches!(s.state, MigrationState::Applied { .. })));

    let type_name = QualifiedName::parse(&format!("{schema}.job_status")).unwrap();
    let values = vec!["invoiced".to_string(), "paid".to_string()];
    let patch = trademate_core::enums::add_enum_values(&pool, &type_name, &values)
        .await
        .unwrap();
    assert_eq!(patch.added, vec!["paid".to_string()]);
    assert_eq!(patch.already_present, vec!["invoiced".to_string()]);

    let patch_again = trademate_core::enums::add_enum_values(&pool, &type_name, &values)
        .await
        .unwrap();
    assert!(patch_again.added.is_empty());

    let report = checks::verify(
        &pool,
        &[
            Check::Table {
                table: format!("{schema}.jobs"),
                columns: vec!["id".to_string(), "status".to_string()],
            },
            Check::Enum {
                type_name: format!("{schema}.job_status"),
                values: vec!["draft".to_string(), "paid".to_string()],
            },
            Check::MinRows {
                table: format!("{schema}.jobs"),
                min: 1,
            },
        ],
    )
    .await;
    assert_eq!(report.passed, 2);
    assert_eq!(report.failed, 1);

    sqlx::query(&format!("DROP SCHEMA {schema} CASCADE"))
        .execute(&pool)
        .await
        .unwrap();
    assert!(migrate::forget(&pool, &first).await.unwrap());
    assert!(migrate::forget(&pool, &second).await.unwrap());
    pool.close().await;
}

#[tokio::test]
async fn failing_transactional_migration_rolls_back() {
    let _serial = serial();
    let Some(pool) = pool().await else {
        return;
    };

    let table = unique("ops_rollback");
    let tmp = tempfile::tempdir().unwrap();
    let name = format!("{table}_001_broken.sql");
    std::fs::write(
        tmp.path().join(&name),
        format!("CREATE TABLE public.{table} (id int);\nSELECT * FROM public.does_not_exist_{table};\n"),
    )
    .unwrap();

    let files = migrate::load_dir(tmp.path()).unwrap();
    let err = migrate::run(&pool, &files, RunOptions::default())
        .await
        .unwrap_err();
    assert!(format!("{err:#}").contains(&name));

    let exists = trademate_core::inspect::table_exists(
        &pool,
        &QualifiedName::parse(&table).unwrap(),
    )
    .await
    .unwrap();
    assert!(!exists);

    let statuses = migrate::status(&pool, &files).await.unwrap();
    assert_eq!(statuses[0].state, MigrationState::Pending);
    pool.close().await;
}

#[tokio::test]
async fn no_transaction_file_runs_each_statement_on_its_own() {
    let _serial = serial();
    let Some(pool) = pool().await else {
        return;
    };

    let schema = unique("ops_autocommit");
    let tmp = tempfile::tempdir().unwrap();
    let first = format!("{schema}_001_jobs.sql");
    let second = format!("{schema}_002_paid.sql");
    std::fs::write(
        tmp.path().join(&first),
        format!(
            "CREATE SCHEMA {schema};\n\
             CREATE TYPE {schema}.job_status AS ENUM ('draft');\n\
             CREATE TABLE {schema}.jobs (id int PRIMARY KEY, status {schema}.job_status NOT NULL, note text);\n\
             INSERT INTO {schema}.jobs VALUES (1, 'draft', NULL);\n"
        ),
    )
    .unwrap();
    std::fs::write(
        tmp.path().join(&second),
        format!(
            "-- ops:no-transaction\n\
             ALTER TYPE {schema}.job_status ADD VALUE IF NOT EXISTS 'paid';\n\
             UPDATE {schema}.jobs SET status = 'paid', note = 'settled; thanks';\n\
             CREATE INDEX CONCURRENTLY jobs_status_idx ON {schema}.jobs (status);\n\
             CREATE INDEX CONCURRENTLY jobs_note_idx ON {schema}.jobs (note);\n"
        ),
    )
    .unwrap();

    let files = migrate::load_dir(tmp.path()).unwrap();
    let report = migrate::run(&pool, &files, RunOptions::default()).await.unwrap();
    assert_eq!(report.applied.len(), 2);

    let (status, note): (String, String) =
        sqlx::query_as(&format!("SELECT status::text, note FROM {schema}.jobs WHERE id = 1"))
            .fetch_one(&pool)
            .await
            .unwrap();
    assert_eq!(status, "paid");
    assert_eq!(note, "settled; thanks");

    let (indexes,): (i64,) =
        sqlx::query_as("SELECT count(*) FROM pg_indexes WHERE schemaname = $1 AND indexname LIKE 'jobs_%_idx'")
            .bind(&schema)
            .fetch_one(&pool)
            .await
            .unwrap();
    assert_eq!(indexes, 2);

    let exec = migrate::MigrationFile::from_sql(
        "adhoc.sql",
        format!(
            "CREATE INDEX CONCURRENTLY jobs_id_note_idx ON {schema}.jobs (id, note);\n\
             SELECT 1;\n"
        ),
        std::path::PathBuf::new(),
    )
    .unwrap();
    migrate::exec_file(&pool, &exec, false).await.unwrap();

    sqlx::query(&format!("DROP SCHEMA {schema} CASCADE"))
        .execute(&pool)
        .await
        .unwrap();
    migrate::forget(&pool, &first).await.unwrap();
    migrate::forget(&pool, &second).await.unwrap();
    pool.close().await;
}

#[tokio::test]
async fn drifted_migration_blocks_run_unless_allowed() {
    let _serial = serial();
    let Some(pool) = pool().await else {
        return;
    };

    let table = unique("ops_drift");
    let tmp = tempfile::tempdir().unwrap();
    let name = format!("{table}_001_create.sql");
    let path = tmp.path().join(&name);
    std::fs::write(&path, format!("CREATE TABLE public.{table} (id int);\n")).unwrap();

    let files = migrate::load_dir(tmp.path()).unwrap();
    migrate::run(&pool, &files, RunOptions::default()).await.unwrap();

    std::fs::write(&path, format!("CREATE TABLE public.{table} (id bigint);\n")).unwrap();
    let files = migrate::load_dir(tmp.path()).unwrap();

    let err = migrate::run(&pool, &files, RunOptions::default())
        .await
        .unwrap_err();
    assert!(format!("{err:#}").contains("changed on disk"));
    assert!(format!("{err:#}").contains(&name));

    let report = migrate::run(
        &pool,
        &files,
        RunOptions {
            dry_run: false,
            allow_drift: true,
        },
    )
    .await
    .unwrap();
    assert_eq!(report.drifted, vec![name.clone()]);
    assert!(report.applied.is_empty());

    // Both runs released the lock.
    assert!(migrate::lock::try_acquire_migration_lock(&pool).await.unwrap());
    migrate::lock::release_migration_lock(&pool).await.unwrap();

    sqlx::query(&format!("DROP TABLE public.{table}"))
        .execute(&pool)
        .await
        .unwrap();
    assert!(migrate::forget(&pool, &name).await.unwrap());
    pool.close().await;
}

#[tokio::test]
async fn held_lock_refuses_runs_and_ledger_edits() {
    let _serial = serial();
    let Some(pool) = pool().await else {
        return;
    };
    let Some(other) = self::pool().await else {
        return;
    };

    let name = format!("{}_001_noop.sql", unique("ops_lock"));
    let file = migrate::MigrationFile::from_sql(&name, "SELECT 1;\n".to_string(), std::path::PathBuf::new())
        .unwrap();

    assert!(migrate::lock::try_acquire_migration_lock(&other).await.unwrap());

    let err = migrate::run(&pool, std::slice::from_ref(&file), RunOptions::default())
        .await
        .unwrap_err();
    assert!(err.to_string().contains("another migration run is in progress"));
    let err = migrate::mark_applied(&pool, &file).await.unwrap_err();
    assert!(err.to_string().contains("another migration run is in progress"));
    let err = migrate::forget(&pool, &name).await.unwrap_err();
    assert!(err.to_string().contains("another migration run is in progress"));

    // Dry runs only read the ledger.
    let dry = migrate::run(
        &pool,
        std::slice::from_ref(&file),
        RunOptions {
            dry_run: true,
            allow_drift: false,
        },
    )
    .await
    .unwrap();
    assert_eq!(dry.would_apply, vec![name.clone()]);

    migrate::lock::release_migration_lock(&other).await.unwrap();
    assert!(!migrate::forget(&pool, &name).await.unwrap());

    other.close().await;
    pool.close().await;
}

#[tokio::test]
async fn mark_applied_records_once_and_rejects_changed_files() {
    let _serial = serial();
    let Some(pool) = pool().await else {
        return;
    };

    let name = format!("{}_001_manual.sql", unique("ops_mark"));
    let file = migrate::MigrationFile::from_sql(
        &name,
        "CREATE TABLE never_created (id int);\n".to_string(),
        std::path::PathBuf::new(),
    )
    .unwrap();

    assert!(migrate::mark_applied(&pool, &file).await.unwrap());
    assert!(!migrate::mark_applied(&pool, &file).await.unwrap());

    let statuses = migrate::status(&pool, std::slice::from_ref(&file)).await.unwrap();
    let own = statuses.iter().find(|s| s.name == name).unwrap();
    assert!(matches!(own.state, MigrationState::Applied { .. }));

    let edited = migrate::MigrationFile::from_sql(
        &name,
        "CREATE TABLE never_created (id bigint);\n".to_string(),
        std::path::PathBuf::new(),
    )
    .unwrap();
    let err = migrate::mark_applied(&pool, &edited).await.unwrap_err();
    assert!(err.to_string().contains("different checksum"));

    // The file was recorded, never executed.
    let exists = trademate_core::inspect::table_exists(
        &pool,
        &QualifiedName::parse("never_created").unwrap(),
    )
    .await
    .unwrap();
    assert!(!exists);

    assert!(migrate::forget(&pool, &name).await.unwrap());
    pool.close().await;
}

#[tokio::test]
async fn verify_reports_query_errors_as_failures() {
    let _serial = serial();
    let Some(pool) = pool().await else {
        return;
    };

    let missing_type = format!("public.{}", unique("ops_missing_type"));
    let report = checks::verify(
        &pool,
        &[Check::Enum {
            type_name: missing_type.clone(),
            values: vec!["draft".to_string()],
        }],
    )
    .await;

    assert_eq!(report.passed, 0);
    assert_eq!(report.failed, 1);
    assert!(!report.all_passed());
    assert!(report.outcomes[0].detail.starts_with("check errored"));
    pool.close().await;
}
