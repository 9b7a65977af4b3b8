//! Read-only catalog introspection.

pub mod checks;

use crate::sql::QualifiedName;
use anyhow::Context;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;

pub const MAX_SAMPLE_ROWS: i64 = 100;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnInfo {
    pub name: String,
    pub data_type: String,
    pub is_nullable: bool,
    pub default: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PolicyInfo {
    pub table: String,
    pub name: String,
    pub command: String,
    pub roles: Vec<String>,
    pub using: Option<String>,
    pub with_check: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TableReport {
    pub table: String,
    pub exists: bool,
    pub columns: Vec<ColumnInfo>,
    pub row_count: Option<i64>,
    pub rls_enabled: Option<bool>,
    pub policies: Vec<PolicyInfo>,
    pub sample: Vec<serde_json::Value>,
}

pub async fn table_exists(pool: &PgPool, table: &QualifiedName) -> anyhow::Result<bool> {
    let row: (bool,) = sqlx::query_as(
        "SELECT EXISTS ( \
           SELECT 1 FROM information_schema.tables \
           WHERE table_schema = $1 AND table_name = $2 \
         )",
    )
    .bind(&table.schema)
    .bind(&table.name)
    .fetch_one(pool)
    .await
    .with_context(|| format!("lookup table {table} failed"))?;
    Ok(row.0)
}

pub async fn columns(pool: &PgPool, table: &QualifiedName) -> anyhow::Result<Vec<ColumnInfo>> {
    let rows = sqlx::query_as::<_, (String, String, String, Option<String>)>(
        "SELECT column_name::text, data_type::text, is_nullable::text, column_default::text \
         FROM information_schema.columns \
         WHERE table_schema = $1 AND table_name = $2 \
         ORDER BY ordinal_position",
    )
    .bind(&table.schema)
    .bind(&table.name)
    .fetch_all(pool)
    .await
    .with_context(|| format!("select columns of {table} failed"))?;

    Ok(rows
        .into_iter()
        .map(|(name, data_type, is_nullable, default)| ColumnInfo {
            name,
            data_type,
            is_nullable: is_nullable == "YES",
            default,
        })
        .collect())
}

pub async fn function_exists(pool: &PgPool, function: &QualifiedName) -> anyhow::Result<bool> {
    let row: (bool,) = sqlx::query_as(
        "SELECT EXISTS ( \
           SELECT 1 FROM pg_proc p JOIN pg_namespace n ON n.oid = p.pronamespace \
           WHERE n.nspname = $1 AND p.proname = $2 \
         )",
    )
    .bind(&function.schema)
    .bind(&function.name)
    .fetch_one(pool)
    .await
    .with_context(|| format!("lookup function {function} failed"))?;
    Ok(row.0)
}

pub async fn row_count(pool: &PgPool, table: &QualifiedName) -> anyhow::Result<i64> {
    let sql = format!("SELECT count(*) FROM {}", table.quoted());
    let row: (i64,) = sqlx::query_as(&sql)
        .persistent(false)
        .fetch_one(pool)
        .await
        .with_context(|| format!("count rows of {table} failed"))?;
    Ok(row.0)
}

pub async fn sample_rows(
    pool: &PgPool,
    table: &QualifiedName,
    limit: i64,
) -> anyhow::Result<Vec<serde_json::Value>> {
    anyhow::ensure!(
        (1..=MAX_SAMPLE_ROWS).contains(&limit),
        "sample size must be 1..={MAX_SAMPLE_ROWS} (got {limit})"
    );

    let sql = format!("SELECT to_jsonb(t) FROM {} t LIMIT $1", table.quoted());
    let rows: Vec<(serde_json::Value,)> = sqlx::query_as(&sql)
        .persistent(false)
        .bind(limit)
        .fetch_all(pool)
        .await
        .with_context(|| format!("sample rows of {table} failed"))?;
    Ok(rows.into_iter().map(|(v,)| v).collect())
}

pub async fn rls_enabled(pool: &PgPool, table: &QualifiedName) -> anyhow::Result<bool> {
    let row: Option<(bool,)> = sqlx::query_as(
        "SELECT c.relrowsecurity \
         FROM pg_class c JOIN pg_namespace n ON n.oid = c.relnamespace \
         WHERE n.nspname = $1 AND c.relname = $2",
    )
    .bind(&table.schema)
    .bind(&table.name)
    .fetch_optional(pool)
    .await
    .with_context(|| format!("lookup RLS flag of {table} failed"))?;

    let (enabled,) = row.with_context(|| format!("table {table} does not exist"))?;
    Ok(enabled)
}

/// Policies in `schema`, optionally narrowed to one table.
pub async fn policies(
    pool: &PgPool,
    schema: &str,
    table: Option<&str>,
) -> anyhow::Result<Vec<PolicyInfo>> {
    let rows = sqlx::query_as::<
        _,
        (
            String,
            String,
            String,
            Vec<String>,
            Option<String>,
            Option<String>,
        ),
    >(
        "SELECT tablename::text, policyname::text, cmd::text, roles::text[], qual, with_check \
         FROM pg_policies \
         WHERE schemaname = $1 AND ($2::text IS NULL OR tablename = $2) \
         ORDER BY tablename, policyname",
    )
    .bind(schema)
    .bind(table)
    .fetch_all(pool)
    .await
    .context("select pg_policies failed")?;

    Ok(rows
        .into_iter()
        .map(|(table, name, command, roles, using, with_check)| PolicyInfo {
            table,
            name,
            command,
            roles,
            using,
            with_check,
        })
        .collect())
}

/// Everything the old per-table verification scripts printed, in one report.
pub async fn describe_table(
    pool: &PgPool,
    table: &QualifiedName,
    sample: Option<i64>,
) -> anyhow::Result<TableReport> {
    let exists = table_exists(pool, table).await?;
    if !exists {
        return Ok(TableReport {
            table: table.to_string(),
            exists,
            columns: Vec::new(),
            row_count: None,
            rls_enabled: None,
            policies: Vec::new(),
            sample: Vec::new(),
        });
    }

    let sample = match sample {
        Some(n) => sample_rows(pool, table, n).await?,
        None => Vec::new(),
    };

    Ok(TableReport {
        table: table.to_string(),
        exists,
        columns: columns(pool, table).await?,
        row_count: Some(row_count(pool, table).await?),
        rls_enabled: Some(rls_enabled(pool, table).await?),
        policies: policies(pool, &table.schema, Some(&table.name)).await?,
        sample,
    })
}
