// ABOUTME: Database seam shared by extraction, validation, and tenant lookup
// ABOUTME: Implemented over tokio-postgres and by in-memory fakes in tests

use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;

/// PostgreSQL type category (`pg_type.typcategory`) as far as rendering cares.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    Numeric,
    Boolean,
    Text,
}

impl ColumnKind {
    pub fn from_type_category(category: &str) -> Self {
        match category {
            "N" => ColumnKind::Numeric,
            "B" => ColumnKind::Boolean,
            _ => ColumnKind::Text,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnInfo {
    pub name: String,
    pub kind: ColumnKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TenantRecord {
    pub id: i64,
    pub name: String,
}

/// A tenant-scoped row selection
///
/// Values come back as PostgreSQL's text representation, in `columns` order.
#[derive(Debug, Clone)]
pub struct RowQuery<'a> {
    pub table: &'a str,
    pub columns: &'a [ColumnInfo],
    pub predicate: &'a str,
    pub order_by: &'a [String],
}

/// Read access to the database holding tenant data.
///
/// Errors raised while touching a specific table are
/// [`crate::error::PorterError::QueryFailure`] naming that table.
#[async_trait]
pub trait TenantStore: Send + Sync {
    async fn tenant_exists(&self, id: i64) -> Result<bool>;

    async fn find_tenants_by_name(&self, name: &str) -> Result<Vec<TenantRecord>>;

    async fn list_tenants(&self) -> Result<Vec<TenantRecord>>;

    async fn table_exists(&self, table: &str) -> Result<bool>;

    /// Insertable columns in ordinal order (dropped and generated columns excluded).
    ///
    /// A table with no such columns is [`crate::error::PorterError::TableNotFound`].
    async fn table_columns(&self, table: &str) -> Result<Vec<ColumnInfo>>;

    async fn primary_key_columns(&self, table: &str) -> Result<Vec<String>>;

    /// Stream matching rows into `on_row` one at a time, returning the count.
    async fn stream_rows(
        &self,
        query: &RowQuery<'_>,
        on_row: &mut (dyn FnMut(Vec<Option<String>>) -> Result<()> + Send),
    ) -> Result<u64>;

    async fn count_rows(&self, table: &str, predicate: &str) -> Result<i64>;

    /// Run a query returning a single `COUNT(*)`.
    async fn count_query(&self, label: &str, sql: &str) -> Result<i64>;
}
