use crate::config::{DatabaseTarget, DbParams, Settings, SslMode};
use anyhow::Context;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions, PgSslMode};
use sqlx::PgPool;
use std::str::FromStr;
use std::time::Duration;

const ACQUIRE_TIMEOUT_SECS: u64 = 30;

/// Opens the single connection an ops invocation works on.
///
/// Statements run strictly in sequence, and session-scoped state (advisory locks, `SET`s) must
/// stay on one backend, so the pool is capped at one connection.
pub async fn connect(settings: &Settings) -> anyhow::Result<PgPool> {
    let mut options = connect_options(settings.require_database()?)?;
    if let Some(secs) = settings.statement_timeout_secs {
        options = options.options([("statement_timeout", format!("{secs}s"))]);
    }

    let pool = PgPoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .acquire_timeout(Duration::from_secs(ACQUIRE_TIMEOUT_SECS))
        .connect_with(options.clone())
        .await
        .with_context(|| {
            format!(
                "connect to postgres failed (host={}, database={})",
                options.get_host(),
                options.get_database().unwrap_or("<default>")
            )
        })?;

    tracing::debug!(
        host = options.get_host(),
        port = options.get_port(),
        database = options.get_database().unwrap_or("<default>"),
        "connected"
    );
    Ok(pool)
}

pub fn connect_options(target: DatabaseTarget<'_>) -> anyhow::Result<PgConnectOptions> {
    match target {
        DatabaseTarget::Url(url) => {
            PgConnectOptions::from_str(url).context("DATABASE_URL is not a valid postgres URL")
        }
        DatabaseTarget::Params(params) => Ok(params_options(params)),
    }
}

fn params_options(params: &DbParams) -> PgConnectOptions {
    let mut options = PgConnectOptions::new()
        .host(&params.host)
        .port(params.port)
        .username(&params.user)
        .database(&params.database)
        .ssl_mode(pg_ssl_mode(params.ssl_mode));
    if let Some(password) = params.password.as_deref() {
        options = options.password(password);
    }
    options
}

fn pg_ssl_mode(mode: SslMode) -> PgSslMode {
    match mode {
        SslMode::Disable => PgSslMode::Disable,
        SslMode::Prefer => PgSslMode::Prefer,
        SslMode::Require => PgSslMode::Require,
        SslMode::VerifyCa => PgSslMode::VerifyCa,
        SslMode::VerifyFull => PgSslMode::VerifyFull,
    }
}

/// Asks PostgREST to reload its schema cache so new tables and functions are served.
pub async fn reload_schema_cache(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::query("NOTIFY pgrst, 'reload schema'")
        .execute(pool)
        .await
        .context("NOTIFY pgrst reload failed")?;
    Ok(())
}
