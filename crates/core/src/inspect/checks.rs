use crate::enums::enum_values;
use crate::inspect::{columns, function_exists, policies, rls_enabled, row_count, table_exists};
use crate::sql::QualifiedName;
use anyhow::Context;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckFile {
    pub checks: Vec<Check>,
}

/// One post-migration expectation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case", deny_unknown_fields)]
pub enum Check {
    Table {
        table: String,
        #[serde(default)]
        columns: Vec<String>,
    },
    Enum {
        #[serde(rename = "type")]
        type_name: String,
        #[serde(default)]
        values: Vec<String>,
    },
    Function {
        function: String,
    },
    RlsEnabled {
        table: String,
    },
    Policy {
        table: String,
        name: String,
    },
    MinRows {
        table: String,
        min: i64,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct CheckOutcome {
    pub check: Check,
    pub passed: bool,
    pub detail: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct VerifyReport {
    pub passed: usize,
    pub failed: usize,
    pub outcomes: Vec<CheckOutcome>,
}

impl VerifyReport {
    pub fn all_passed(&self) -> bool {
        self.failed == 0
    }
}

pub fn load_checks(path: &Path) -> anyhow::Result<Vec<Check>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read checks file {}", path.display()))?;
    let file: CheckFile = serde_json::from_str(&text)
        .with_context(|| format!("checks file {} is not valid", path.display()))?;
    anyhow::ensure!(!file.checks.is_empty(), "checks file {} has no checks", path.display());
    Ok(file.checks)
}

pub async fn verify(pool: &PgPool, checks: &[Check]) -> VerifyReport {
    let mut outcomes = Vec::with_capacity(checks.len());
    for check in checks {
        let (passed, detail) = match evaluate(pool, check).await {
            Ok(Verdict::Pass(detail)) => (true, detail),
            Ok(Verdict::Fail(detail)) => (false, detail),
            Err(err) => (false, format!("check errored: {err:#}")),
        };
        if passed {
            tracing::debug!(?check, %detail, "check passed");
        } else {
            tracing::warn!(?check, %detail, "check failed");
        }
        outcomes.push(CheckOutcome {
            check: check.clone(),
            passed,
            detail,
        });
    }

    let passed = outcomes.iter().filter(|o| o.passed).count();
    VerifyReport {
        passed,
        failed: outcomes.len() - passed,
        outcomes,
    }
}

#[derive(Debug, PartialEq)]
enum Verdict {
    Pass(String),
    Fail(String),
}

async fn evaluate(pool: &PgPool, check: &Check) -> anyhow::Result<Verdict> {
    match check {
        Check::Table { table, columns: expected } => {
            let table = QualifiedName::parse(table)?;
            if !table_exists(pool, &table).await? {
                return Ok(Verdict::Fail(format!("table {table} does not exist")));
            }
            let actual: Vec<String> = columns(pool, &table)
                .await?
                .into_iter()
                .map(|c| c.name)
                .collect();
            Ok(missing_verdict("columns", expected, &actual))
        }
        Check::Enum { type_name, values } => {
            let type_name = QualifiedName::parse(type_name)?;
            let actual = enum_values(pool, &type_name).await?;
            Ok(missing_verdict("enum values", values, &actual))
        }
        Check::Function { function } => {
            let function = QualifiedName::parse(function)?;
            Ok(if function_exists(pool, &function).await? {
                Verdict::Pass(format!("function {function} exists"))
            } else {
                Verdict::Fail(format!("function {function} does not exist"))
            })
        }
        Check::RlsEnabled { table } => {
            let table = QualifiedName::parse(table)?;
            Ok(if rls_enabled(pool, &table).await? {
                Verdict::Pass(format!("RLS enabled on {table}"))
            } else {
                Verdict::Fail(format!("RLS disabled on {table}"))
            })
        }
        Check::Policy { table, name } => {
            let table = QualifiedName::parse(table)?;
            let found = policies(pool, &table.schema, Some(&table.name))
                .await?
                .iter()
                .any(|p| &p.name == name);
            Ok(if found {
                Verdict::Pass(format!("policy {name:?} present on {table}"))
            } else {
                Verdict::Fail(format!("policy {name:?} missing on {table}"))
            })
        }
        Check::MinRows { table, min } => {
            let table = QualifiedName::parse(table)?;
            let count = row_count(pool, &table).await?;
            Ok(if count >= *min {
                Verdict::Pass(format!("{table} has {count} rows"))
            } else {
                Verdict::Fail(format!("{table} has {count} rows, expected at least {min}"))
            })
        }
    }
}

fn missing_verdict(what: &str, expected: &[String], actual: &[String]) -> Verdict {
    let missing: Vec<&str> = expected
        .iter()
        .filter(|e| !actual.contains(*e))
        .map(String::as_str)
        .collect();
    if missing.is_empty() {
        Verdict::Pass(format!("all {} expected {what} present", expected.len()))
    } else {
        Verdict::Fail(format!("missing {what}: {}", missing.join(", ")))
    }
}
