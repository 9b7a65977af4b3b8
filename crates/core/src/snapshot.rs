use crate::inspect::ColumnInfo;
use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use std::collections::BTreeMap;
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaSnapshot {
    pub captured_at: DateTime<Utc>,
    pub schema: String,
    pub tables: BTreeMap<String, Vec<ColumnInfo>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ColumnChange {
    pub table: String,
    pub column: String,
    pub expected: ColumnInfo,
    pub actual: ColumnInfo,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SnapshotDiff {
    pub missing_tables: Vec<String>,
    pub extra_tables: Vec<String>,
    /// `table.column` entries present in the expected snapshot only.
    pub missing_columns: Vec<String>,
    pub extra_columns: Vec<String>,
    pub changed_columns: Vec<ColumnChange>,
}

impl SnapshotDiff {
    pub fn is_empty(&self) -> bool {
        self.missing_tables.is_empty()
            && self.extra_tables.is_empty()
            && self.missing_columns.is_empty()
            && self.extra_columns.is_empty()
            && self.changed_columns.is_empty()
    }
}

/// Base tables of `schema` with their columns. Views are left out.
pub async fn capture(pool: &PgPool, schema: &str) -> anyhow::Result<SchemaSnapshot> {
    let rows = sqlx::query_as::<_, (String, String, String, String, Option<String>)>(
        "SELECT c.table_name::text, c.column_name::text, c.data_type::text, c.is_nullable::text, \
                c.column_default::text \
         FROM information_schema.columns c \
         JOIN information_schema.tables t \
           ON t.table_schema = c.table_schema AND t.table_name = c.table_name \
         WHERE c.table_schema = $1 AND t.table_type = 'BASE TABLE' \
         ORDER BY c.table_name, c.ordinal_position",
    )
    .bind(schema)
    .fetch_all(pool)
    .await
    .with_context(|| format!("capture schema {schema} failed"))?;

    let mut tables: BTreeMap<String, Vec<ColumnInfo>> = BTreeMap::new();
    for (table, name, data_type, is_nullable, default) in rows {
        tables.entry(table).or_default().push(ColumnInfo {
            name,
            data_type,
            is_nullable: is_nullable == "YES",
            default,
        });
    }

    Ok(SchemaSnapshot {
        captured_at: Utc::now(),
        schema: schema.to_string(),
        tables,
    })
}

pub fn load(path: &Path) -> anyhow::Result<SchemaSnapshot> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read snapshot {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("snapshot {} is not valid", path.display()))
}

pub fn save(snapshot: &SchemaSnapshot, path: &Path) -> anyhow::Result<()> {
    let text = serde_json::to_string_pretty(snapshot).context("serialize snapshot failed")?;
    std::fs::write(path, text + "\n")
        .with_context(|| format!("failed to write snapshot {}", path.display()))
}

pub fn diff(expected: &SchemaSnapshot, actual: &SchemaSnapshot) -> SnapshotDiff {
    let mut out = SnapshotDiff::default();

    for (table, expected_cols) in &expected.tables {
        let Some(actual_cols) = actual.tables.get(table) else {
            out.missing_tables.push(table.clone());
            continue;
        };

        for col in expected_cols {
            match actual_cols.iter().find(|c| c.name == col.name) {
                None => out.missing_columns.push(format!("{table}.{}", col.name)),
                Some(found) if found != col => out.changed_columns.push(ColumnChange {
                    table: table.clone(),
                    column: col.name.clone(),
                    expected: col.clone(),
                    actual: found.clone(),
                }),
                Some(_) => {}
            }
        }
        for col in actual_cols {
            if !expected_cols.iter().any(|c| c.name == col.name) {
                out.extra_columns.push(format!("{table}.{}", col.name));
            }
        }
    }

    for table in actual.tables.keys() {
        if !expected.tables.contains_key(table) {
            out.extra_tables.push(table.clone());
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn col(name: &str, data_type: &str, is_nullable: bool) -> ColumnInfo {
        ColumnInfo {
            name: name.to_string(),
            data_type: data_type.to_string(),
            is_nullable,
            default: None,
        }
    }

    fn snapshot(tables: Vec<(&str, Vec<ColumnInfo>)>) -> SchemaSnapshot {
        SchemaSnapshot {
            captured_at: Utc.with_ymd_and_hms(2026, 5, 1, 0, 0, 0).unwrap(),
            schema: "public".to_string(),
            tables: tables
                .into_iter()
                .map(|(t, cols)| (t.to_string(), cols))
                .collect(),
        }
    }

    #[test]
    fn identical_snapshots_have_empty_diff() {
        let s = snapshot(vec![("invoices", vec![col("id", "uuid", false)])]);
        assert!(diff(&s, &s.clone()).is_empty());
    }

    #[test]
    fn reports_table_and_column_differences() {
        let expected = snapshot(vec![
            (
                "work_orders",
                vec![
                    col("id", "uuid", false),
                    col("status", "USER-DEFINED", false),
                    col("notes", "text", true),
                ],
            ),
            ("customers", vec![col("id", "uuid", false)]),
        ]);
        let actual = snapshot(vec![
            (
                "work_orders",
                vec![
                    col("id", "uuid", false),
                    col("status", "text", false),
                    col("company_id", "uuid", false),
                ],
            ),
            ("employees", vec![col("id", "uuid", false)]),
        ]);

        let d = diff(&expected, &actual);
        assert_eq!(d.missing_tables, vec!["customers".to_string()]);
        assert_eq!(d.extra_tables, vec!["employees".to_string()]);
        assert_eq!(d.missing_columns, vec!["work_orders.notes".to_string()]);
        assert_eq!(d.extra_columns, vec!["work_orders.company_id".to_string()]);
        assert_eq!(d.changed_columns.len(), 1);
        assert_eq!(d.changed_columns[0].column, "status");
        assert_eq!(d.changed_columns[0].actual.data_type, "text");
        assert!(!d.is_empty());
    }

    #[test]
    fn save_then_load_preserves_tables() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("schema.json");
        let s = snapshot(vec![("profiles", vec![col("id", "uuid", false)])]);
        save(&s, &path).unwrap();
        let loaded = load(&path).unwrap();
        assert_eq!(loaded.tables, s.tables);
        assert!(diff(&s, &loaded).is_empty());
    }
}
