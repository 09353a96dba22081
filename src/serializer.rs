// ABOUTME: Renders result rows as replayable INSERT statements
// ABOUTME: Owns all literal escaping and tenant id remapping

use crate::store::ColumnKind;
use crate::tenant::TenantId;
use crate::utils::quote_ident;
use anyhow::{bail, Result};

/// One column value, classified for rendering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SqlValue {
    Null,
    /// Finite numeric text, emitted bare.
    Number(String),
    Boolean(bool),
    /// Everything else, emitted as a quoted literal.
    Text(String),
}

impl SqlValue {
    /// Classify PostgreSQL's text output for a column of the given kind
    ///
    /// Numeric values that are not plain finite numbers (`NaN`, `Infinity`)
    /// fall back to quoted text so the statement still parses.
    pub fn from_pg_text(kind: ColumnKind, text: Option<String>) -> Self {
        let Some(text) = text else {
            return SqlValue::Null;
        };
        match kind {
            ColumnKind::Numeric if is_plain_number(&text) => SqlValue::Number(text),
            ColumnKind::Boolean => match text.as_str() {
                "t" | "true" => SqlValue::Boolean(true),
                "f" | "false" => SqlValue::Boolean(false),
                _ => SqlValue::Text(text),
            },
            _ => SqlValue::Text(text),
        }
    }

    pub fn to_sql_literal(&self) -> Result<String> {
        match self {
            SqlValue::Null => Ok("NULL".to_string()),
            SqlValue::Number(n) => Ok(n.clone()),
            SqlValue::Boolean(true) => Ok("TRUE".to_string()),
            SqlValue::Boolean(false) => Ok("FALSE".to_string()),
            SqlValue::Text(text) => quote_literal(text),
        }
    }
}

fn is_plain_number(text: &str) -> bool {
    text.chars().any(|c| c.is_ascii_digit())
        && text
            .chars()
            .all(|c| c.is_ascii_digit() || matches!(c, '-' | '+' | '.' | 'e' | 'E'))
}

/// Quote a string as a standard SQL literal, doubling embedded quotes
///
/// Backslashes and newlines are kept verbatim; the artifact relies on
/// `standard_conforming_strings` (on by default since PostgreSQL 9.1).
/// NUL bytes cannot be stored in PostgreSQL text and are rejected.
///
/// ```
/// # use postgres_tenant_porter::serializer::quote_literal;
/// assert_eq!(quote_literal("O'Brien").unwrap(), "'O''Brien'");
/// ```
pub fn quote_literal(text: &str) -> Result<String> {
    if text.contains('\0') {
        bail!("Text value contains a NUL byte and cannot be written as a SQL literal");
    }
    Ok(format!("'{}'", text.replace('\'', "''")))
}

/// Replace the tenant column's value with a new tenant id.
#[derive(Debug, Clone, Copy)]
pub struct Remap<'a> {
    pub column: &'a str,
    pub tenant: TenantId,
}

/// Render one row as `INSERT INTO "table" ("c1", ...) VALUES (...);`
///
/// With `remap`, the named column (when present) is emitted as the new
/// tenant id. No other column is rewritten, including primary keys and
/// foreign keys into other tenant-scoped tables.
pub fn serialize_row(
    table: &str,
    columns: &[&str],
    values: &[SqlValue],
    remap: Option<&Remap<'_>>,
) -> Result<String> {
    if columns.len() != values.len() {
        bail!(
            "Row for table '{}' has {} values for {} columns",
            table,
            values.len(),
            columns.len()
        );
    }

    let remap_value = remap.map(|r| SqlValue::Number(r.tenant.to_string()));
    let mut rendered = Vec::with_capacity(values.len());
    for (column, value) in columns.iter().zip(values) {
        let value = match (remap, &remap_value) {
            (Some(r), Some(replacement)) if r.column == *column => replacement,
            _ => value,
        };
        rendered.push(value.to_sql_literal()?);
    }

    let column_list = columns
        .iter()
        .map(|c| quote_ident(c))
        .collect::<Vec<_>>()
        .join(", ");

    Ok(format!(
        "INSERT INTO {} ({}) VALUES ({});",
        quote_ident(table),
        column_list,
        rendered.join(", ")
    ))
}
