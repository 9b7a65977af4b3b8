use anyhow::Context;
use clap::Subcommand;
use serde::Serialize;
use trademate_core::admin::{AdminApi, BucketOutcome, BucketSpec, SupabaseAdmin};
use trademate_core::cleanup::{self, CleanupOptions, DEFAULT_GRACE_MINUTES};
use trademate_core::config::Settings;

use crate::{print_report, with_pool};

#[derive(Debug, Subcommand)]
pub enum StorageCommand {
    /// Create a storage bucket; an existing bucket is not an error.
    CreateBucket {
        name: String,

        #[arg(long)]
        public: bool,

        /// Maximum object size in bytes.
        #[arg(long)]
        file_size_limit: Option<u64>,

        /// Allowed MIME type; repeat for several.
        #[arg(long)]
        mime: Vec<String>,
    },

    /// List storage buckets.
    List,
}

#[derive(Debug, Subcommand)]
pub enum UsersCommand {
    /// Find auth users without a profile row, and delete them with --execute.
    CleanupOrphans {
        #[arg(long)]
        execute: bool,

        /// Skip users created within this many minutes.
        #[arg(long, default_value_t = DEFAULT_GRACE_MINUTES)]
        grace_minutes: i64,
    },
}

#[derive(Debug, Subcommand)]
pub enum SchemaCommand {
    /// Ask the REST layer to reload its schema cache.
    Reload,

    /// Call a database function through the REST RPC endpoint.
    Rpc {
        function: String,

        /// JSON object of named arguments.
        #[arg(long, default_value = "{}")]
        args: String,
    },
}

#[derive(Debug, Serialize)]
struct BucketReport<'a> {
    name: &'a str,
    outcome: BucketOutcome,
}

pub async fn run_storage(settings: &Settings, cmd: StorageCommand) -> anyhow::Result<()> {
    let api = SupabaseAdmin::from_settings(settings)?;
    match cmd {
        StorageCommand::CreateBucket {
            name,
            public,
            file_size_limit,
            mime,
        } => {
            let spec = BucketSpec {
                name,
                public,
                file_size_limit,
                allowed_mime_types: mime,
            };
            let outcome = api.create_bucket(&spec).await?;
            match outcome {
                BucketOutcome::Created => tracing::info!(bucket = %spec.name, "bucket created"),
                BucketOutcome::AlreadyExists => {
                    tracing::info!(bucket = %spec.name, "bucket already exists")
                }
            }
            print_report(&BucketReport {
                name: &spec.name,
                outcome,
            })
        }
        StorageCommand::List => print_report(&api.list_buckets().await?),
    }
}

pub async fn run_users(settings: &Settings, cmd: UsersCommand) -> anyhow::Result<()> {
    match cmd {
        UsersCommand::CleanupOrphans {
            execute,
            grace_minutes,
        } => {
            anyhow::ensure!(grace_minutes >= 0, "--grace-minutes must be >= 0");
            let api = SupabaseAdmin::from_settings(settings)?;
            let opts = CleanupOptions {
                execute,
                grace: chrono::Duration::minutes(grace_minutes),
            };
            let api_ref = &api;
            let report = with_pool(settings, |pool| async move {
                cleanup::cleanup_orphans(api_ref, &pool, opts).await
            })
            .await?;

            print_report(&report)?;
            anyhow::ensure!(
                report.failed.is_empty(),
                "{} orphaned user(s) could not be deleted",
                report.failed.len()
            );
            Ok(())
        }
    }
}

pub async fn run_schema(settings: &Settings, cmd: SchemaCommand) -> anyhow::Result<()> {
    match cmd {
        SchemaCommand::Reload => {
            with_pool(settings, |pool| async move {
                trademate_core::db::reload_schema_cache(&pool).await
            })
            .await?;
            tracing::info!("schema cache reload requested");
            Ok(())
        }
        SchemaCommand::Rpc { function, args } => {
            let args: serde_json::Value =
                serde_json::from_str(&args).context("--args must be valid JSON")?;
            anyhow::ensure!(args.is_object(), "--args must be a JSON object");
            let api = SupabaseAdmin::from_settings(settings)?;
            let out = api.rpc(&function, args).await?;
            print_report(&out)
        }
    }
}
