// ABOUTME: TenantStore implementation over a live tokio-postgres client
// ABOUTME: Catalog introspection, counts, and streamed tenant-scoped reads

use crate::error::PorterError;
use crate::registry::TENANT_TABLE;
use crate::store::{ColumnInfo, ColumnKind, RowQuery, TenantRecord, TenantStore};
use crate::utils::quote_ident;
use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::{pin_mut, StreamExt};
use tokio_postgres::Client;

/// Output settings that make `::text` renderings parse back identically on
/// any server, whatever the source session's defaults are.
const EXPORT_SESSION_SETTINGS: &str = "SET DateStyle = ISO, YMD; \
     SET IntervalStyle = postgres; \
     SET extra_float_digits = 3;";

const SNAPSHOT_BEGIN: &str = "BEGIN ISOLATION LEVEL REPEATABLE READ READ ONLY";

/// Reads tenant data from the connected database's current schema.
pub struct PgStore {
    client: Client,
}

impl PgStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Open a read-only REPEATABLE READ transaction
    ///
    /// Every query until [`PgStore::end_snapshot`] sees the same snapshot, so
    /// per-table counts match the rows streamed afterwards and references
    /// between tables stay consistent under concurrent writes. Date, interval
    /// and float output is pinned first so rendered values are unambiguous.
    pub async fn begin_snapshot(&self) -> Result<()> {
        self.client
            .batch_execute(EXPORT_SESSION_SETTINGS)
            .await
            .context("Failed to configure export session")?;
        self.client
            .batch_execute(SNAPSHOT_BEGIN)
            .await
            .context("Failed to open read-only snapshot")
    }

    pub async fn end_snapshot(&self) -> Result<()> {
        self.client
            .batch_execute("COMMIT")
            .await
            .context("Failed to close read-only snapshot")
    }
}

fn select_sql(query: &RowQuery<'_>) -> String {
    let columns = query
        .columns
        .iter()
        .map(|c| format!("{}::text", quote_ident(&c.name)))
        .collect::<Vec<_>>()
        .join(", ");
    let mut sql = format!(
        "SELECT {} FROM {} WHERE ({})",
        columns,
        quote_ident(query.table),
        query.predicate
    );
    if !query.order_by.is_empty() {
        let order = query
            .order_by
            .iter()
            .map(|c| quote_ident(c))
            .collect::<Vec<_>>()
            .join(", ");
        sql.push_str(" ORDER BY ");
        sql.push_str(&order);
    }
    sql
}

#[async_trait]
impl TenantStore for PgStore {
    async fn tenant_exists(&self, id: i64) -> Result<bool> {
        let sql = format!(
            "SELECT EXISTS (SELECT 1 FROM {} WHERE id = $1::bigint)",
            quote_ident(TENANT_TABLE)
        );
        let row = self
            .client
            .query_one(sql.as_str(), &[&id])
            .await
            .map_err(|e| PorterError::query_failure(TENANT_TABLE, e))?;
        Ok(row.get(0))
    }

    async fn find_tenants_by_name(&self, name: &str) -> Result<Vec<TenantRecord>> {
        let sql = format!(
            "SELECT id::bigint, name::text FROM {} WHERE name = $1 ORDER BY id",
            quote_ident(TENANT_TABLE)
        );
        let rows = self
            .client
            .query(sql.as_str(), &[&name])
            .await
            .map_err(|e| PorterError::query_failure(TENANT_TABLE, e))?;
        Ok(rows
            .iter()
            .map(|row| TenantRecord {
                id: row.get(0),
                name: row.get(1),
            })
            .collect())
    }

    async fn list_tenants(&self) -> Result<Vec<TenantRecord>> {
        let sql = format!(
            "SELECT id::bigint, COALESCE(name::text, '') FROM {} ORDER BY id",
            quote_ident(TENANT_TABLE)
        );
        let rows = self
            .client
            .query(sql.as_str(), &[])
            .await
            .map_err(|e| PorterError::query_failure(TENANT_TABLE, e))?;
        Ok(rows
            .iter()
            .map(|row| TenantRecord {
                id: row.get(0),
                name: row.get(1),
            })
            .collect())
    }

    async fn table_exists(&self, table: &str) -> Result<bool> {
        let row = self
            .client
            .query_one(
                "SELECT EXISTS (
                    SELECT 1
                    FROM pg_catalog.pg_class c
                    JOIN pg_catalog.pg_namespace n ON n.oid = c.relnamespace
                    WHERE c.relname = $1
                      AND n.nspname = current_schema()
                      AND c.relkind IN ('r', 'p')
                 )",
                &[&table],
            )
            .await
            .map_err(|e| PorterError::query_failure(table, e))?;
        Ok(row.get(0))
    }

    async fn table_columns(&self, table: &str) -> Result<Vec<ColumnInfo>> {
        let rows = self
            .client
            .query(
                "SELECT a.attname::text, t.typcategory::text
                 FROM pg_catalog.pg_attribute a
                 JOIN pg_catalog.pg_class c ON a.attrelid = c.oid
                 JOIN pg_catalog.pg_namespace n ON c.relnamespace = n.oid
                 JOIN pg_catalog.pg_type t ON a.atttypid = t.oid
                 WHERE n.nspname = current_schema()
                   AND c.relname = $1
                   AND a.attnum > 0
                   AND NOT a.attisdropped
                   AND a.attgenerated = ''
                 ORDER BY a.attnum",
                &[&table],
            )
            .await
            .map_err(|e| PorterError::query_failure(table, e))?;

        if rows.is_empty() {
            return Err(PorterError::TableNotFound(table.to_string()).into());
        }
        Ok(rows
            .iter()
            .map(|row| {
                let category: String = row.get(1);
                ColumnInfo {
                    name: row.get(0),
                    kind: ColumnKind::from_type_category(&category),
                }
            })
            .collect())
    }

    async fn primary_key_columns(&self, table: &str) -> Result<Vec<String>> {
        let rows = self
            .client
            .query(
                "SELECT a.attname::text
                 FROM pg_catalog.pg_index i
                 JOIN pg_catalog.pg_class c ON c.oid = i.indrelid
                 JOIN pg_catalog.pg_namespace n ON n.oid = c.relnamespace
                 JOIN pg_catalog.pg_attribute a
                   ON a.attrelid = i.indrelid AND a.attnum = ANY(i.indkey)
                 WHERE n.nspname = current_schema()
                   AND c.relname = $1
                   AND i.indisprimary
                 ORDER BY array_position(i.indkey::int2[], a.attnum)",
                &[&table],
            )
            .await
            .map_err(|e| PorterError::query_failure(table, e))?;
        Ok(rows.iter().map(|row| row.get(0)).collect())
    }

    async fn stream_rows(
        &self,
        query: &RowQuery<'_>,
        on_row: &mut (dyn FnMut(Vec<Option<String>>) -> Result<()> + Send),
    ) -> Result<u64> {
        let sql = select_sql(query);
        tracing::debug!("Streaming {}: {}", query.table, sql);

        let rows = self
            .client
            .query_raw(sql.as_str(), std::iter::empty::<&str>())
            .await
            .map_err(|e| PorterError::query_failure(query.table, e))?;
        pin_mut!(rows);

        let width = query.columns.len();
        let mut count = 0;
        while let Some(row) = rows.next().await {
            let row = row.map_err(|e| PorterError::query_failure(query.table, e))?;
            let values = (0..width)
                .map(|i| row.try_get::<_, Option<String>>(i))
                .collect::<Result<Vec<_>, _>>()
                .map_err(|e| PorterError::query_failure(query.table, e))?;
            on_row(values)?;
            count += 1;
        }
        Ok(count)
    }

    async fn count_rows(&self, table: &str, predicate: &str) -> Result<i64> {
        let sql = format!(
            "SELECT COUNT(*) FROM {} WHERE ({})",
            quote_ident(table),
            predicate
        );
        let row = self
            .client
            .query_one(sql.as_str(), &[])
            .await
            .map_err(|e| PorterError::query_failure(table, e))?;
        Ok(row.get(0))
    }

    async fn count_query(&self, label: &str, sql: &str) -> Result<i64> {
        let row = self
            .client
            .query_one(sql, &[])
            .await
            .map_err(|e| PorterError::query_failure(label, e))?;
        Ok(row.get(0))
    }
}
