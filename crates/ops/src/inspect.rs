use clap::Subcommand;
use std::path::{Path, PathBuf};
use trademate_core::config::Settings;
use trademate_core::inspect::{self, checks};
use trademate_core::snapshot;
use trademate_core::sql::QualifiedName;

use crate::{print_report, with_pool};

const DEFAULT_SCHEMA: &str = "public";

#[derive(Debug, Subcommand)]
pub enum InspectCommand {
    /// Columns, row count, RLS flag and policies of one table.
    Table {
        /// `table` or `schema.table`.
        table: String,

        /// Include up to N sample rows as JSON.
        #[arg(long)]
        sample: Option<i64>,
    },

    /// Row-level-security policies, optionally for one table.
    Policies {
        table: Option<String>,

        #[arg(long, default_value = DEFAULT_SCHEMA)]
        schema: String,
    },
}

#[derive(Debug, Subcommand)]
pub enum SnapshotCommand {
    /// Write the current schema to a JSON file.
    Capture {
        #[arg(long)]
        out: PathBuf,

        #[arg(long, default_value = DEFAULT_SCHEMA)]
        schema: String,
    },

    /// Compare the current schema with a saved snapshot; exits non-zero on differences.
    Diff {
        snapshot: PathBuf,

        /// Defaults to the schema recorded in the snapshot.
        #[arg(long)]
        schema: Option<String>,
    },
}

pub async fn run_inspect(settings: &Settings, cmd: InspectCommand) -> anyhow::Result<()> {
    match cmd {
        InspectCommand::Table { table, sample } => {
            let table = QualifiedName::parse(&table)?;
            let report = with_pool(settings, |pool| async move {
                inspect::describe_table(&pool, &table, sample).await
            })
            .await?;
            if !report.exists {
                tracing::warn!(table = %report.table, "table does not exist");
            }
            print_report(&report)
        }
        InspectCommand::Policies { table, schema } => {
            // A qualified table name overrides --schema.
            let (schema, table) = match table {
                Some(t) => {
                    let q = QualifiedName::parse(&t)?;
                    if t.contains('.') {
                        (q.schema, Some(q.name))
                    } else {
                        (schema, Some(q.name))
                    }
                }
                None => (schema, None),
            };
            let policies = with_pool(settings, |pool| async move {
                inspect::policies(&pool, &schema, table.as_deref()).await
            })
            .await?;
            print_report(&policies)
        }
    }
}

pub async fn run_verify(settings: &Settings, path: &Path) -> anyhow::Result<()> {
    let expectations = checks::load_checks(path)?;
    let report = with_pool(settings, |pool| async move {
        Ok::<_, anyhow::Error>(checks::verify(&pool, &expectations).await)
    })
    .await?;

    print_report(&report)?;
    tracing::info!(passed = report.passed, failed = report.failed, "verification finished");
    anyhow::ensure!(
        report.all_passed(),
        "{} of {} checks failed",
        report.failed,
        report.outcomes.len()
    );
    Ok(())
}

pub async fn run_snapshot(settings: &Settings, cmd: SnapshotCommand) -> anyhow::Result<()> {
    match cmd {
        SnapshotCommand::Capture { out, schema } => {
            let snap = with_pool(settings, |pool| async move {
                snapshot::capture(&pool, &schema).await
            })
            .await?;
            snapshot::save(&snap, &out)?;
            tracing::info!(
                schema = %snap.schema,
                tables = snap.tables.len(),
                out = %out.display(),
                "schema snapshot written"
            );
            Ok(())
        }
        SnapshotCommand::Diff {
            snapshot: path,
            schema,
        } => {
            let expected = snapshot::load(&path)?;
            let schema = schema.unwrap_or_else(|| expected.schema.clone());
            let actual = with_pool(settings, |pool| async move {
                snapshot::capture(&pool, &schema).await
            })
            .await?;

            let diff = snapshot::diff(&expected, &actual);
            print_report(&diff)?;
            anyhow::ensure!(
                diff.is_empty(),
                "schema differs from snapshot {}",
                path.display()
            );
            Ok(())
        }
    }
}
