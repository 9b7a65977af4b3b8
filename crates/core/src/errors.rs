use reqwest::StatusCode;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    AlreadyExists,
    NotFound,
    UniqueViolation,
    ForeignKeyViolation,
    PermissionDenied,
    Connection,
    Other,
}

/// Non-2xx response from the backend admin API.
#[derive(Debug, Clone)]
pub struct AdminApiError {
    pub operation: &'static str,
    pub status: StatusCode,
    pub body: String,
}

impl AdminApiError {
    pub fn class(&self) -> ErrorClass {
        classify_http(self.status, &self.body)
    }
}

impl fmt::Display for AdminApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "admin API error (operation={}, status={}): {}",
            self.operation, self.status, self.body
        )
    }
}

impl std::error::Error for AdminApiError {}

pub fn classify_sqlstate(code: &str) -> ErrorClass {
    match code {
        // duplicate_object, duplicate_table, duplicate_schema, duplicate_function
        "42710" | "42P07" | "42P06" | "42723" => ErrorClass::AlreadyExists,
        // undefined_object, undefined_table, undefined_function, invalid_schema_name
        "42704" | "42P01" | "42883" | "3F000" => ErrorClass::NotFound,
        "23505" => ErrorClass::UniqueViolation,
        "23503" => ErrorClass::ForeignKeyViolation,
        "42501" => ErrorClass::PermissionDenied,
        c if c.starts_with("08") => ErrorClass::Connection,
        _ => ErrorClass::Other,
    }
}

pub fn classify_sqlx(err: &sqlx::Error) -> ErrorClass {
    match err {
        sqlx::Error::Database(db) => db
            .code()
            .map(|code| classify_sqlstate(&code))
            .unwrap_or(ErrorClass::Other),
        sqlx::Error::RowNotFound => ErrorClass::NotFound,
        sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed => ErrorClass::Connection,
        _ => ErrorClass::Other,
    }
}

pub fn classify_http(status: StatusCode, body: &str) -> ErrorClass {
    // Storage answers duplicates with HTTP 400 and a JSON body carrying "409".
    let lower = body.to_ascii_lowercase();
    if status == StatusCode::CONFLICT
        || lower.contains("already exists")
        || lower.contains("\"duplicate\"")
        || lower.contains("already been registered")
    {
        return ErrorClass::AlreadyExists;
    }

    match status {
        StatusCode::NOT_FOUND => ErrorClass::NotFound,
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ErrorClass::PermissionDenied,
        _ => ErrorClass::Other,
    }
}

/// Walks the `anyhow` chain for the first error we know how to classify.
pub fn classify(err: &anyhow::Error) -> ErrorClass {
    for cause in err.chain() {
        if let Some(e) = cause.downcast_ref::<sqlx::Error>() {
            return classify_sqlx(e);
        }
        if let Some(e) = cause.downcast_ref::<AdminApiError>() {
            return e.class();
        }
        if let Some(e) = cause.downcast_ref::<reqwest::Error>() {
            if e.is_connect() || e.is_timeout() {
                return ErrorClass::Connection;
            }
        }
    }
    ErrorClass::Other
}
