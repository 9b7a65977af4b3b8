use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use trademate_core::config::Settings;

mod admin;
mod inspect;
mod migrate;

#[derive(Debug, Parser)]
#[command(name = "trademate_ops", about = "Database and backend admin tasks for TradeMate Pro")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Apply and track SQL migrations.
    #[command(subcommand)]
    Migrate(migrate::MigrateCommand),

    /// Run one SQL file without recording it in the ledger.
    Exec {
        file: PathBuf,

        /// Send each statement on its own, outside any transaction.
        #[arg(long)]
        no_transaction: bool,
    },

    /// Patch enum types.
    #[command(subcommand)]
    Enum(migrate::EnumCommand),

    /// Describe tables and row-level-security policies.
    #[command(subcommand)]
    Inspect(inspect::InspectCommand),

    /// Assert the expectations in a checks file; exits non-zero if any fail.
    Verify { checks: PathBuf },

    /// Capture or compare JSON schema snapshots.
    #[command(subcommand)]
    Snapshot(inspect::SnapshotCommand),

    /// Storage buckets.
    #[command(subcommand)]
    Storage(admin::StorageCommand),

    /// Auth user maintenance.
    #[command(subcommand)]
    Users(admin::UsersCommand),

    /// REST layer schema cache.
    #[command(subcommand)]
    Schema(admin::SchemaCommand),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let settings = Settings::from_env()?;
    let _sentry_guard = init_sentry(&settings);

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(sentry_tracing::layer())
        .init();

    let args = Args::parse();

    let res = run(&settings, args.command).await;
    if let Err(err) = &res {
        sentry_anyhow::capture_anyhow(err);
        tracing::error!(error = %format!("{err:#}"), "command failed");
    }
    res
}

async fn run(settings: &Settings, command: Command) -> anyhow::Result<()> {
    match command {
        Command::Migrate(cmd) => migrate::run_migrate(settings, cmd).await,
        Command::Exec {
            file,
            no_transaction,
        } => migrate::run_exec(settings, &file, !no_transaction).await,
        Command::Enum(cmd) => migrate::run_enum(settings, cmd).await,
        Command::Inspect(cmd) => inspect::run_inspect(settings, cmd).await,
        Command::Verify { checks } => inspect::run_verify(settings, &checks).await,
        Command::Snapshot(cmd) => inspect::run_snapshot(settings, cmd).await,
        Command::Storage(cmd) => admin::run_storage(settings, cmd).await,
        Command::Users(cmd) => admin::run_users(settings, cmd).await,
        Command::Schema(cmd) => admin::run_schema(settings, cmd).await,
    }
}

/// Connects, runs `f`, and closes the connection whether or not `f` succeeded.
async fn with_pool<T, F, Fut>(settings: &Settings, f: F) -> anyhow::Result<T>
where
    F: FnOnce(sqlx::PgPool) -> Fut,
    Fut: std::future::Future<Output = anyhow::Result<T>>,
{
    let pool = trademate_core::db::connect(settings).await?;
    let res = f(pool.clone()).await;
    pool.close().await;
    res
}

fn print_report<T: Serialize>(report: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(report)?);
    Ok(())
}

fn init_sentry(settings: &Settings) -> Option<sentry::ClientInitGuard> {
    let dsn = settings.sentry_dsn.as_deref()?;
    Some(sentry::init((
        dsn,
        sentry::ClientOptions {
            release: sentry::release_name!(),
            ..Default::default()
        },
    )))
}
