//! Identifier and literal quoting for statements that cannot take bind parameters (DDL).

use anyhow::ensure;
use std::fmt;

const DEFAULT_SCHEMA: &str = "public";

/// A `schema.name` pair. Bare names resolve to `public`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QualifiedName {
    pub schema: String,
    pub name: String,
}

impl QualifiedName {
    pub fn parse(raw: &str) -> anyhow::Result<Self> {
        let raw = raw.trim();
        ensure!(!raw.is_empty(), "name must be non-empty");

        let (schema, name) = match raw.split_once('.') {
            Some((schema, name)) => (schema.trim(), name.trim()),
            None => (DEFAULT_SCHEMA, raw),
        };
        ensure!(
            !schema.is_empty() && !name.is_empty() && !name.contains('.'),
            "invalid qualified name: {raw}"
        );

        Ok(Self {
            schema: schema.to_string(),
            name: name.to_string(),
        })
    }

    /// Quoted form safe to splice into SQL text.
    pub fn quoted(&self) -> String {
        format!("{}.{}", quote_ident(&self.schema), quote_ident(&self.name))
    }
}

impl fmt::Display for QualifiedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.schema, self.name)
    }
}

pub fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_name_defaults_to_public() {
        let q = QualifiedName::parse("work_orders").unwrap();
        assert_eq!(q.schema, "public");
        assert_eq!(q.name, "work_orders");
        assert_eq!(q.to_string(), "public.work_orders");
    }

    #[test]
    fn splits_schema_and_name() {
        let q = QualifiedName::parse("auth.users").unwrap();
        assert_eq!(q.schema, "auth");
        assert_eq!(q.quoted(), "\"auth\".\"users\"");
    }

    #[test]
    fn rejects_malformed_names() {
        assert!(QualifiedName::parse("").is_err());
        assert!(QualifiedName::parse(".users").is_err());
        assert!(QualifiedName::parse("a.b.c").is_err());
    }

    #[test]
    fn quoting_doubles_embedded_quotes() {
        assert_eq!(quote_ident("we\"ird"), "\"we\"\"ird\"");
        assert_eq!(quote_literal("o'clock"), "'o''clock'");
        assert_eq!(quote_literal("in_progress"), "'in_progress'");
    }
}
