pub mod admin;
pub mod cleanup;
pub mod db;
pub mod enums;
pub mod errors;
pub mod inspect;
pub mod migrate;
pub mod snapshot;
pub mod sql;

pub mod config {
    use anyhow::Context;
    use std::fmt;
    use std::str::FromStr;

    const DEFAULT_DB_PORT: u16 = 5432;
    const DEFAULT_DB_USER: &str = "postgres";
    const DEFAULT_DB_NAME: &str = "postgres";
    const DEFAULT_MIGRATIONS_DIR: &str = "migrations";
    const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 30;
    const DEFAULT_HTTP_RETRIES: u32 = 3;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum SslMode {
        Disable,
        Prefer,
        Require,
        VerifyCa,
        VerifyFull,
    }

    impl FromStr for SslMode {
        type Err = anyhow::Error;

        fn from_str(s: &str) -> anyhow::Result<Self> {
            match s.trim().to_ascii_lowercase().as_str() {
                "disable" => Ok(Self::Disable),
                "prefer" => Ok(Self::Prefer),
                "require" => Ok(Self::Require),
                "verify-ca" => Ok(Self::VerifyCa),
                "verify-full" => Ok(Self::VerifyFull),
                other => anyhow::bail!("unknown ssl mode: {other}"),
            }
        }
    }

    /// Connection fields used when no `DATABASE_URL` is set.
    #[derive(Clone)]
    pub struct DbParams {
        pub host: String,
        pub port: u16,
        pub user: String,
        pub password: Option<String>,
        pub database: String,
        pub ssl_mode: SslMode,
    }

    impl fmt::Debug for DbParams {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.debug_struct("DbParams")
                .field("host", &self.host)
                .field("port", &self.port)
                .field("user", &self.user)
                .field("password", &redacted(&self.password))
                .field("database", &self.database)
                .field("ssl_mode", &self.ssl_mode)
                .finish()
        }
    }

    #[derive(Debug, Clone, Copy)]
    pub enum DatabaseTarget<'a> {
        Url(&'a str),
        Params(&'a DbParams),
    }

    #[derive(Clone)]
    pub struct Settings {
        pub database_url: Option<String>,
        pub db_params: Option<DbParams>,
        pub supabase_url: Option<String>,
        pub supabase_service_role_key: Option<String>,
        pub sentry_dsn: Option<String>,
        pub migrations_dir: String,
        pub http_timeout_secs: u64,
        pub http_retries: u32,
        pub statement_timeout_secs: Option<u64>,
    }

    impl fmt::Debug for Settings {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.debug_struct("Settings")
                .field("database_url", &redacted(&self.database_url))
                .field("db_params", &self.db_params)
                .field("supabase_url", &self.supabase_url)
                .field(
                    "supabase_service_role_key",
                    &redacted(&self.supabase_service_role_key),
                )
                .field("sentry_dsn", &redacted(&self.sentry_dsn))
                .field("migrations_dir", &self.migrations_dir)
                .field("http_timeout_secs", &self.http_timeout_secs)
                .field("http_retries", &self.http_retries)
                .field("statement_timeout_secs", &self.statement_timeout_secs)
                .finish()
        }
    }

    impl Settings {
        pub fn from_env() -> anyhow::Result<Self> {
            Self::from_lookup(|key| std::env::var(key).ok())
        }

        pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
        where
            F: Fn(&str) -> Option<String>,
        {
            let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

            let db_params = match get("SUPABASE_DB_HOST") {
                Some(host) => Some(DbParams {
                    host,
                    port: parse_var(&get, "SUPABASE_DB_PORT")?.unwrap_or(DEFAULT_DB_PORT),
                    user: get("SUPABASE_DB_USER").unwrap_or_else(|| DEFAULT_DB_USER.to_string()),
                    password: get("SUPABASE_DB_PASSWORD"),
                    database: get("SUPABASE_DB_NAME")
                        .unwrap_or_else(|| DEFAULT_DB_NAME.to_string()),
                    ssl_mode: parse_var(&get, "SUPABASE_DB_SSLMODE")?
                        .unwrap_or(SslMode::Require),
                }),
                None => None,
            };

            Ok(Self {
                database_url: get("DATABASE_URL"),
                db_params,
                supabase_url: get("SUPABASE_URL"),
                supabase_service_role_key: get("SUPABASE_SERVICE_ROLE_KEY"),
                sentry_dsn: get("SENTRY_DSN"),
                migrations_dir: get("MIGRATIONS_DIR")
                    .unwrap_or_else(|| DEFAULT_MIGRATIONS_DIR.to_string()),
                http_timeout_secs: parse_var(&get, "SUPABASE_HTTP_TIMEOUT_SECS")?
                    .unwrap_or(DEFAULT_HTTP_TIMEOUT_SECS),
                http_retries: parse_var(&get, "SUPABASE_HTTP_RETRIES")?
                    .unwrap_or(DEFAULT_HTTP_RETRIES),
                statement_timeout_secs: parse_var(&get, "DB_STATEMENT_TIMEOUT_SECS")?,
            })
        }

        pub fn require_database(&self) -> anyhow::Result<DatabaseTarget<'_>> {
            if let Some(url) = self.database_url.as_deref() {
                return Ok(DatabaseTarget::Url(url));
            }
            self.db_params
                .as_ref()
                .map(DatabaseTarget::Params)
                .context("DATABASE_URL or SUPABASE_DB_HOST is required")
        }

        pub fn require_supabase_url(&self) -> anyhow::Result<&str> {
            self.supabase_url
                .as_deref()
                .context("SUPABASE_URL is required")
        }

        pub fn require_service_role_key(&self) -> anyhow::Result<&str> {
            self.supabase_service_role_key
                .as_deref()
                .context("SUPABASE_SERVICE_ROLE_KEY is required")
        }
    }

    fn parse_var<T, G>(get: &G, key: &str) -> anyhow::Result<Option<T>>
    where
        T: FromStr,
        T::Err: fmt::Display,
        G: Fn(&str) -> Option<String>,
    {
        match get(key) {
            Some(raw) => raw
                .trim()
                .parse::<T>()
                .map(Some)
                .map_err(|e| anyhow::anyhow!("invalid {key}={raw:?}: {e}")),
            None => Ok(None),
        }
    }

    fn redacted(value: &Option<String>) -> Option<&'static str> {
        value.as_ref().map(|_| "<redacted>")
    }

}
