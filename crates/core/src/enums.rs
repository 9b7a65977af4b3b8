use crate::errors::{classify_sqlx, ErrorClass};
use crate::sql::{quote_literal, QualifiedName};
use anyhow::Context;
use serde::Serialize;
use sqlx::{Executor, PgPool};

#[derive(Debug, Clone, Default, Serialize)]
pub struct EnumPatchReport {
    pub type_name: String,
    pub added: Vec<String>,
    pub already_present: Vec<String>,
}

/// Labels in declaration order. Errors when the type does not exist.
pub async fn enum_values(pool: &PgPool, type_name: &QualifiedName) -> anyhow::Result<Vec<String>> {
    let exists: (bool,) = sqlx::query_as(
        "SELECT EXISTS ( \
           SELECT 1 FROM pg_type t JOIN pg_namespace n ON n.oid = t.typnamespace \
           WHERE n.nspname = $1 AND t.typname = $2 AND t.typtype = 'e' \
         )",
    )
    .bind(&type_name.schema)
    .bind(&type_name.name)
    .fetch_one(pool)
    .await
    .with_context(|| format!("lookup enum type {type_name} failed"))?;
    anyhow::ensure!(exists.0, "enum type {type_name} does not exist");

    let labels: Vec<(String,)> = sqlx::query_as(
        "SELECT e.enumlabel \
         FROM pg_enum e \
         JOIN pg_type t ON t.oid = e.enumtypid \
         JOIN pg_namespace n ON n.oid = t.typnamespace \
         WHERE n.nspname = $1 AND t.typname = $2 \
         ORDER BY e.enumsortorder",
    )
    .bind(&type_name.schema)
    .bind(&type_name.name)
    .fetch_all(pool)
    .await
    .with_context(|| format!("select labels of {type_name} failed"))?;

    Ok(labels.into_iter().map(|(l,)| l).collect())
}

/// Adds each value with its own autocommit statement; Postgres refuses new enum labels that are
/// used inside the same transaction, and Supabase's SQL runner wraps batches in one.
pub async fn add_enum_values(
    pool: &PgPool,
    type_name: &QualifiedName,
    values: &[String],
) -> anyhow::Result<EnumPatchReport> {
    for v in values {
        anyhow::ensure!(!v.is_empty(), "enum values must be non-empty");
    }

    let existing = enum_values(pool, type_name).await?;
    let (present, missing) = partition_values(&existing, values);

    let mut report = EnumPatchReport {
        type_name: type_name.to_string(),
        added: Vec::with_capacity(missing.len()),
        already_present: present,
    };

    for value in missing {
        let stmt = add_value_statement(type_name, &value);
        match pool.execute(stmt.as_str()).await {
            Ok(_) => {
                tracing::info!(type_name = %type_name, value = %value, "enum value added");
                report.added.push(value);
            }
            Err(err) if classify_sqlx(&err) == ErrorClass::AlreadyExists => {
                tracing::debug!(type_name = %type_name, value = %value, "enum value appeared concurrently");
                report.already_present.push(value);
            }
            Err(err) => {
                return Err(err).with_context(|| format!("add value {value:?} to {type_name} failed"));
            }
        }
    }

    Ok(report)
}

fn add_value_statement(type_name: &QualifiedName, value: &str) -> String {
    format!(
        "ALTER TYPE {} ADD VALUE IF NOT EXISTS {}",
        type_name.quoted(),
        quote_literal(value)
    )
}

/// Splits requested values into (already present, to add), dropping duplicate requests.
fn partition_values(existing: &[String], requested: &[String]) -> (Vec<String>, Vec<String>) {
    let mut present = Vec::new();
    let mut missing: Vec<String> = Vec::new();
    for v in requested {
        if existing.contains(v) {
            if !present.contains(v) {
                present.push(v.clone());
            }
        } else if !missing.contains(v) {
            missing.push(v.clone());
        }
    }
    (present, missing)
}
