use anyhow::{ensure, Context};
use sha2::{Digest, Sha256};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::tokenizer::{Location, Token, Tokenizer};
use std::path::{Path, PathBuf};

/// First-line marker for files that must run outside a transaction block.
pub const NO_TRANSACTION_DIRECTIVE: &str = "-- ops:no-transaction";

#[derive(Debug, Clone)]
pub struct MigrationFile {
    /// File name, e.g. `20240611_add_invoice_status.sql`. This is the ledger key.
    pub name: String,
    pub description: String,
    pub path: PathBuf,
    pub sql: String,
    /// Lowercase hex SHA-256 of the file contents.
    pub checksum: String,
    pub transactional: bool,
}

impl MigrationFile {
    pub fn from_sql(name: &str, sql: String, path: PathBuf) -> anyhow::Result<Self> {
        ensure!(
            !sql.trim().is_empty(),
            "migration {name} is empty"
        );

        let checksum = checksum(sql.as_bytes());
        let transactional = !sql
            .lines()
            .next()
            .is_some_and(|first| first.trim().eq_ignore_ascii_case(NO_TRANSACTION_DIRECTIVE));
        if !transactional {
            split_statements(&sql).with_context(|| format!("migration {name} is not valid SQL"))?;
        }

        Ok(Self {
            name: name.to_string(),
            description: describe(name),
            path,
            sql,
            checksum,
            transactional,
        })
    }

    /// Top-level statements, in order. Used for files that run outside a transaction, where
    /// each statement has to reach the server as its own query.
    pub fn statements(&self) -> anyhow::Result<Vec<&str>> {
        split_statements(&self.sql).with_context(|| format!("migration {} is not valid SQL", self.name))
    }
}

/// Splits a script on top-level `;`. Semicolons inside string literals, quoted identifiers,
/// dollar-quoted bodies and comments do not split. Segments with only comments are dropped.
pub fn split_statements(sql: &str) -> anyhow::Result<Vec<&str>> {
    let dialect = PostgreSqlDialect {};
    let tokens = Tokenizer::new(&dialect, sql)
        .with_unescape(false)
        .tokenize_with_location()
        .context("failed to tokenize SQL")?;

    let line_starts: Vec<usize> = std::iter::once(0)
        .chain(sql.match_indices('\n').map(|(i, _)| i + 1))
        .collect();

    let mut out = Vec::new();
    let mut start = 0;
    let mut has_code = false;
    for tok in &tokens {
        match tok.token {
            Token::SemiColon => {
                let end = byte_offset(sql, &line_starts, tok.span.start)
                    .context("statement separator out of range")?;
                if has_code {
                    out.push(sql[start..end].trim());
                }
                start = end + 1;
                has_code = false;
            }
            Token::Whitespace(_) | Token::EOF => {}
            _ => has_code = true,
        }
    }
    if has_code {
        out.push(sql[start..].trim());
    }
    Ok(out)
}

// Tokenizer locations are 1-based lines and character columns.
fn byte_offset(sql: &str, line_starts: &[usize], loc: Location) -> Option<usize> {
    let line = usize::try_from(loc.line).ok()?.checked_sub(1)?;
    let column = usize::try_from(loc.column).ok()?.checked_sub(1)?;
    let start = *line_starts.get(line)?;
    sql[start..].char_indices().nth(column).map(|(i, _)| start + i)
}

pub fn checksum(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// `0007_add_employee_role.sql` -> `add employee role`.
fn describe(name: &str) -> String {
    let stem = name.strip_suffix(".sql").unwrap_or(name);
    let rest = stem.trim_start_matches(|c: char| c.is_ascii_digit());
    let rest = rest.trim_start_matches(['_', '-']);
    let rest = if rest.is_empty() { stem } else { rest };
    rest.replace(['_', '-'], " ")
}

pub fn load_file(path: &Path) -> anyhow::Result<MigrationFile> {
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .with_context(|| format!("invalid migration path: {}", path.display()))?;
    let sql = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read migration {}", path.display()))?;
    MigrationFile::from_sql(name, sql, path.to_path_buf())
}

/// Loads every `*.sql` file in `dir`, ordered by file name.
pub fn load_dir(dir: &Path) -> anyhow::Result<Vec<MigrationFile>> {
    let entries = std::fs::read_dir(dir)
        .with_context(|| format!("failed to read migrations dir {}", dir.display()))?;

    let mut paths = Vec::new();
    for entry in entries {
        let entry = entry.with_context(|| format!("failed to list {}", dir.display()))?;
        let path = entry.path();
        if path.is_file() && path.extension().is_some_and(|ext| ext == "sql") {
            paths.push(path);
        }
    }
    paths.sort();

    paths.iter().map(|p| load_file(p)).collect()
}
