use clap::Subcommand;
use serde::Serialize;
use std::path::{Path, PathBuf};
use trademate_core::config::Settings;
use trademate_core::migrate::{self, RunOptions};
use trademate_core::sql::QualifiedName;

use crate::{print_report, with_pool};

#[derive(Debug, Subcommand)]
pub enum MigrateCommand {
    /// Apply every pending migration in name order.
    Run {
        /// Defaults to MIGRATIONS_DIR.
        #[arg(long)]
        dir: Option<PathBuf>,

        /// Report what would run without touching the database.
        #[arg(long)]
        dry_run: bool,

        /// Continue even if an applied migration changed on disk.
        #[arg(long)]
        allow_drift: bool,
    },

    /// Show applied, pending, drifted and missing migrations.
    Status {
        #[arg(long)]
        dir: Option<PathBuf>,
    },

    /// Record a migration as applied without running it.
    MarkApplied { file: PathBuf },

    /// Remove a migration from the ledger so it runs again.
    Forget { name: String },
}

#[derive(Debug, Subcommand)]
pub enum EnumCommand {
    /// Add values to an enum type, skipping ones that already exist.
    AddValues {
        /// Enum type, `name` or `schema.name`.
        type_name: String,

        #[arg(required = true)]
        values: Vec<String>,
    },

    /// List the values of an enum type.
    Values { type_name: String },
}

#[derive(Debug, Serialize)]
struct ExecReport<'a> {
    file: &'a str,
    transactional: bool,
    execution_ms: i64,
}

#[derive(Debug, Serialize)]
struct LedgerChange<'a> {
    name: &'a str,
    changed: bool,
}

fn migrations_dir(settings: &Settings, dir: Option<PathBuf>) -> PathBuf {
    dir.unwrap_or_else(|| PathBuf::from(&settings.migrations_dir))
}

pub async fn run_migrate(settings: &Settings, cmd: MigrateCommand) -> anyhow::Result<()> {
    match cmd {
        MigrateCommand::Run {
            dir,
            dry_run,
            allow_drift,
        } => {
            let dir = migrations_dir(settings, dir);
            let files = migrate::load_dir(&dir)?;
            tracing::info!(dir = %dir.display(), files = files.len(), dry_run, "migrate run");

            let report = with_pool(settings, |pool| async move {
                migrate::run(
                    &pool,
                    &files,
                    RunOptions {
                        dry_run,
                        allow_drift,
                    },
                )
                .await
            })
            .await?;
            print_report(&report)
        }
        MigrateCommand::Status { dir } => {
            let files = migrate::load_dir(&migrations_dir(settings, dir))?;
            let statuses =
                with_pool(settings, |pool| async move { migrate::status(&pool, &files).await })
                    .await?;
            print_report(&statuses)
        }
        MigrateCommand::MarkApplied { file } => {
            let file = migrate::load_file(&file)?;
            let file_ref = &file;
            let changed = with_pool(settings, |pool| async move {
                migrate::mark_applied(&pool, file_ref).await
            })
            .await?;
            print_report(&LedgerChange {
                name: &file.name,
                changed,
            })
        }
        MigrateCommand::Forget { name } => {
            let name_ref = name.as_str();
            let removed = with_pool(settings, |pool| async move {
                migrate::forget(&pool, name_ref).await
            })
            .await?;
            if !removed {
                tracing::warn!(migration = %name, "no ledger row to remove");
            }
            print_report(&LedgerChange {
                name: &name,
                changed: removed,
            })
        }
    }
}

pub async fn run_exec(settings: &Settings, path: &Path, transactional: bool) -> anyhow::Result<()> {
    let file = migrate::load_file(path)?;
    let file_ref = &file;
    let execution_ms = with_pool(settings, |pool| async move {
        migrate::exec_file(&pool, file_ref, transactional).await
    })
    .await?;

    tracing::info!(file = %file.name, transactional, execution_ms, "sql file executed");
    print_report(&ExecReport {
        file: &file.name,
        transactional,
        execution_ms,
    })
}

pub async fn run_enum(settings: &Settings, cmd: EnumCommand) -> anyhow::Result<()> {
    match cmd {
        EnumCommand::AddValues { type_name, values } => {
            let type_name = QualifiedName::parse(&type_name)?;
            let report = with_pool(settings, |pool| async move {
                trademate_core::enums::add_enum_values(&pool, &type_name, &values).await
            })
            .await?;
            print_report(&report)
        }
        EnumCommand::Values { type_name } => {
            let type_name = QualifiedName::parse(&type_name)?;
            let values = with_pool(settings, |pool| async move {
                trademate_core::enums::enum_values(&pool, &type_name).await
            })
            .await?;
            print_report(&values)
        }
    }
}
