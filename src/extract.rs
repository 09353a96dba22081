// ABOUTME: Extraction engine: streams one tenant's rows into an artifact
// ABOUTME: Sequential, deterministic table order; any query error aborts the run

use crate::artifact::{ArtifactHeader, ArtifactWriter};
use crate::error::PorterError;
use crate::filters::TableFilter;
use crate::registry::Registry;
use crate::selector::resolve_predicate;
use crate::serializer::{serialize_row, Remap, SqlValue};
use crate::store::{RowQuery, TenantStore};
use crate::tenant::TenantId;
use anyhow::{Context, Result};
use indicatif::ProgressBar;
use serde::Serialize;
use std::io::Write;

/// Everything one export run needs, fixed before any I/O.
#[derive(Debug, Clone)]
pub struct ExtractionConfig {
    pub tenant: TenantId,
    pub filter: TableFilter,
    pub include_optional_tables: bool,
    pub remap_tenant_id: Option<TenantId>,
    pub dry_run: bool,
}

/// The resolved table set and settings, as printed by a dry run.
#[derive(Debug, Clone, Serialize)]
pub struct ExtractionPlan {
    pub tenant: TenantId,
    pub tables: Vec<String>,
    pub include_optional_tables: bool,
    pub remap_tenant_id: Option<TenantId>,
}

impl ExtractionPlan {
    pub fn summary_lines(&self) -> Vec<String> {
        let mut lines = vec![
            format!("Tenant: {}", self.tenant),
            format!(
                "Optional tables: {}",
                if self.include_optional_tables {
                    "included"
                } else {
                    "excluded"
                }
            ),
        ];
        if let Some(target) = self.remap_tenant_id {
            lines.push(format!("Remap tenant id: {} -> {}", self.tenant, target));
        }
        lines.push(format!("Tables ({}):", self.tables.len()));
        lines.extend(self.tables.iter().map(|t| format!("  - {}", t)));
        lines
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableStats {
    pub table: String,
    pub rows: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExtractionReport {
    pub plan: ExtractionPlan,
    pub dry_run: bool,
    pub tables: Vec<TableStats>,
    /// Registry tables missing from the connected schema.
    pub skipped: Vec<String>,
}

impl ExtractionReport {
    pub fn total_rows(&self) -> u64 {
        self.tables.iter().map(|t| t.rows).sum()
    }
}

fn is_fatal(err: &anyhow::Error) -> bool {
    err.downcast_ref::<PorterError>()
        .map_or(true, PorterError::is_fatal)
}

/// Resolve the effective table set without touching the database.
pub fn plan(config: &ExtractionConfig, registry: &Registry) -> Result<ExtractionPlan> {
    let tables = config
        .filter
        .resolve_tables(registry, config.include_optional_tables)?
        .into_iter()
        .map(|d| d.name.to_string())
        .collect();

    Ok(ExtractionPlan {
        tenant: config.tenant,
        tables,
        include_optional_tables: config.include_optional_tables,
        remap_tenant_id: config.remap_tenant_id,
    })
}

/// Extract a tenant into `sink`
///
/// Tables are processed one at a time in registry order. Each table's rows
/// are counted, then streamed and written as they arrive; a table whose
/// streamed count differs from its count fails the run. Tables missing from
/// the schema are skipped with a warning and tables without matching rows
/// produce no section.
///
/// In dry-run mode only the plan is computed: neither `store` nor `sink`
/// is touched.
pub async fn extract<S, W>(
    config: &ExtractionConfig,
    registry: &Registry,
    store: &S,
    sink: W,
    progress: &ProgressBar,
) -> Result<(W, ExtractionReport)>
where
    S: TenantStore + ?Sized,
    W: Write + Send,
{
    let plan = plan(config, registry)?;
    let mut report = ExtractionReport {
        plan,
        dry_run: config.dry_run,
        tables: Vec::new(),
        skipped: Vec::new(),
    };

    if config.dry_run {
        return Ok((sink, report));
    }

    if !store.tenant_exists(config.tenant.get()).await? {
        return Err(PorterError::TenantNotFound(config.tenant.to_string()).into());
    }

    tracing::info!(
        "Exporting tenant {} ({} tables)",
        config.tenant,
        report.plan.tables.len()
    );

    let header = ArtifactHeader::new(config.tenant, config.remap_tenant_id);
    let mut writer = ArtifactWriter::begin(sink, &header)?;

    for table in &report.plan.tables {
        let Some(descriptor) = registry.lookup(table) else {
            continue;
        };

        let columns = match store.table_columns(table).await {
            Ok(columns) => columns,
            Err(err) if !is_fatal(&err) => {
                tracing::warn!("{:#}; skipping", err);
                report.skipped.push(table.clone());
                continue;
            }
            Err(err) => return Err(err),
        };
        let predicate = resolve_predicate(descriptor, config.tenant);
        let order_by = store.primary_key_columns(table).await?;

        let expected = store.count_rows(table, &predicate).await?;
        let expected = u64::try_from(expected).unwrap_or_default();
        if expected == 0 {
            tracing::debug!("No rows in '{}' for tenant {}", table, config.tenant);
            report.tables.push(TableStats {
                table: table.clone(),
                rows: 0,
            });
            continue;
        }

        writer.start_table(table, expected)?;
        progress.reset();
        progress.set_length(expected);
        progress.set_message(table.clone());

        let remap = config.remap_tenant_id.map(|tenant| Remap {
            column: descriptor.tenant_column(),
            tenant,
        });
        let column_names: Vec<&str> = columns.iter().map(|c| c.name.as_str()).collect();
        let query = RowQuery {
            table,
            columns: &columns,
            predicate: &predicate,
            order_by: &order_by,
        };

        let mut on_row = |raw: Vec<Option<String>>| -> Result<()> {
            let values: Vec<SqlValue> = columns
                .iter()
                .zip(raw)
                .map(|(column, text)| SqlValue::from_pg_text(column.kind, text))
                .collect();
            let statement = serialize_row(table, &column_names, &values, remap.as_ref())?;
            writer.write_statement(&statement)?;
            progress.inc(1);
            Ok(())
        };

        let streamed = store
            .stream_rows(&query, &mut on_row)
            .await
            .with_context(|| format!("Failed to extract table '{}'", table))?;

        if streamed != expected {
            return Err(PorterError::query_failure(
                table.as_str(),
                format!("counted {} rows but streamed {}", expected, streamed),
            )
            .into());
        }

        tracing::info!("  ✓ {} ({} rows)", table, streamed);
        report.tables.push(TableStats {
            table: table.clone(),
            rows: streamed,
        });
    }

    progress.finish_and_clear();
    let sink = writer.finish()?;

    tracing::info!(
        "Exported {} rows across {} tables for tenant {}",
        report.total_rows(),
        report.tables.iter().filter(|t| t.rows > 0).count(),
        config.tenant
    );

    Ok((sink, report))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::validate_envelope;
    use crate::registry::TableDescriptor;
    use crate::store::fake::{column, FakeStore};
    use crate::store::ColumnKind;
    use std::path::Path;

    fn tenant(id: i64) -> TenantId {
        TenantId::new(id).unwrap()
    }

    fn registry() -> Registry {
        Registry::new(
            vec![
                TableDescriptor::foreign_key("accounts", "id"),
                TableDescriptor::direct("contacts"),
                TableDescriptor::direct("messages"),
                TableDescriptor::derived("users", &["contacts"], |t| {
                    format!("id IN (SELECT user_id FROM contacts WHERE account_id = {})", t)
                }),
            ],
            vec![TableDescriptor::direct("sla_policies")],
            vec![],
        )
        .unwrap()
    }

    fn store() -> FakeStore {
        FakeStore::default()
            .with_tenant(1, "Acme")
            .with_tenant(2, "Globex")
            .with_table(
                "accounts",
                vec![
                    column("id", ColumnKind::Numeric),
                    column("name", ColumnKind::Text),
                ],
            )
            .with_rows("accounts", "\"id\" = 1", vec![vec![Some("1"), Some("Acme")]])
            .with_rows("accounts", "\"id\" = 2", vec![vec![Some("2"), Some("Globex")]])
            .with_table(
                "contacts",
                vec![
                    column("id", ColumnKind::Numeric),
                    column("account_id", ColumnKind::Numeric),
                    column("name", ColumnKind::Text),
                    column("blocked", ColumnKind::Boolean),
                ],
            )
            .with_rows(
                "contacts",
                "\"account_id\" = 1",
                vec![
                    vec![Some("10"), Some("1"), Some("O'Brien"), Some("f")],
                    vec![Some("11"), Some("1"), None, Some("t")],
                ],
            )
            .with_rows(
                "contacts",
                "\"account_id\" = 2",
                vec![vec![Some("20"), Some("2"), Some("Other"), Some("f")]],
            )
            .with_table(
                "messages",
                vec![
                    column("id", ColumnKind::Numeric),
                    column("account_id", ColumnKind::Numeric),
                ],
            )
            .with_table(
                "users",
                vec![
                    column("id", ColumnKind::Numeric),
                    column("email", ColumnKind::Text),
                ],
            )
            .with_rows(
                "users",
                "id IN (SELECT user_id FROM contacts WHERE account_id = 1)",
                vec![vec![Some("5"), Some("agent@acme.test")]],
            )
            .with_table(
                "sla_policies",
                vec![
                    column("id", ColumnKind::Numeric),
                    column("account_id", ColumnKind::Numeric),
                ],
            )
            .with_rows("sla_policies", "\"account_id\" = 1", vec![vec![Some("3"), Some("1")]])
    }

    fn config(id: i64) -> ExtractionConfig {
        ExtractionConfig {
            tenant: tenant(id),
            filter: TableFilter::all(),
            include_optional_tables: false,
            remap_tenant_id: None,
            dry_run: false,
        }
    }

    async fn run(config: &ExtractionConfig, store: &FakeStore) -> Result<(String, ExtractionReport)> {
        let (bytes, report) =
            extract(config, &registry(), store, Vec::new(), &ProgressBar::hidden()).await?;
        Ok((String::from_utf8(bytes).unwrap(), report))
    }

    fn insert_lines(text: &str) -> Vec<&str> {
        text.lines().filter(|l| l.starts_with("INSERT INTO")).collect()
    }

    #[tokio::test]
    async fn test_extracts_only_the_tenants_rows() {
        let (text, report) = run(&config(1), &store()).await.unwrap();

        let inserts = insert_lines(&text);
        assert_eq!(inserts.len(), 4);
        assert!(text.contains("VALUES (1, 'Acme');"));
        assert!(text.contains("VALUES (10, 1, 'O''Brien', FALSE);"));
        assert!(text.contains("VALUES (11, 1, NULL, TRUE);"));
        assert!(text.contains("VALUES (5, 'agent@acme.test');"));
        assert!(!text.contains("Globex"));
        assert!(!text.contains("Other"));
        assert_eq!(report.total_rows(), 4);
    }

    #[tokio::test]
    async fn test_sections_follow_registry_order_and_skip_empty_tables() {
        let (text, report) = run(&config(1), &store()).await.unwrap();

        let sections: Vec<&str> = text.lines().filter(|l| l.starts_with("-- Table:")).collect();
        assert_eq!(
            sections,
            vec![
                "-- Table: accounts (1 rows)",
                "-- Table: contacts (2 rows)",
                "-- Table: users (1 rows)",
            ]
        );
        assert!(report
            .tables
            .contains(&TableStats { table: "messages".into(), rows: 0 }));

        let summary = validate_envelope(Path::new("mem.sql"), &text).unwrap();
        assert_eq!(summary.tenant, Some(1));
        assert_eq!(summary.total_rows(), 4);
    }

    #[tokio::test]
    async fn test_remap_rewrites_tenant_columns_only() {
        let mut cfg = config(1);
        cfg.remap_tenant_id = Some(tenant(77));
        let (text, _) = run(&cfg, &store()).await.unwrap();

        assert!(text.contains("-- Remapped tenant ID: 77"));
        // accounts is scoped by its own id column
        assert!(text.contains("INSERT INTO \"accounts\" (\"id\", \"name\") VALUES (77, 'Acme');"));
        assert!(text.contains("VALUES (10, 77, 'O''Brien', FALSE);"));
        // users has no tenant column and is emitted untouched
        assert!(text.contains("VALUES (5, 'agent@acme.test');"));
    }

    #[tokio::test]
    async fn test_inclusion_filter_touches_exactly_the_named_tables() {
        let store = store();
        let mut cfg = config(1);
        cfg.include_optional_tables = true;
        cfg.filter = TableFilter::new(
            Some(vec!["contacts".into(), "sla_policies".into()]),
            None,
        )
        .unwrap();

        let (_, report) = run(&cfg, &store).await.unwrap();

        assert_eq!(report.plan.tables, vec!["contacts", "sla_policies"]);
        assert_eq!(store.streamed_tables(), vec!["contacts", "sla_policies"]);
    }

    #[tokio::test]
    async fn test_optional_tables_are_exported_when_enabled() {
        let mut cfg = config(1);
        let (text, _) = run(&cfg, &store()).await.unwrap();
        assert!(!text.contains("sla_policies"));

        cfg.include_optional_tables = true;
        let (text, _) = run(&cfg, &store()).await.unwrap();
        assert!(text.contains("-- Table: sla_policies (1 rows)"));
    }

    #[tokio::test]
    async fn test_missing_tables_are_skipped_with_warning() {
        let mut store = store();
        store.tables.remove("messages");

        let (text, report) = run(&config(1), &store).await.unwrap();
        assert_eq!(report.skipped, vec!["messages"]);
        assert!(text.trim_end().ends_with("SET session_replication_role = DEFAULT;"));
    }

    #[tokio::test]
    async fn test_tables_without_insertable_columns_are_skipped() {
        let store = store().with_table("messages", vec![]);

        let (_, report) = run(&config(1), &store).await.unwrap();
        assert_eq!(report.skipped, vec!["messages"]);
        assert!(!store.streamed_tables().contains(&"messages".to_string()));
    }

    #[test]
    fn test_only_table_not_found_is_skippable() {
        assert!(!is_fatal(&PorterError::TableNotFound("messages".into()).into()));
        assert!(is_fatal(&PorterError::query_failure("messages", "timeout").into()));
        assert!(is_fatal(&anyhow::anyhow!("connection reset")));
    }

    #[tokio::test]
    async fn test_unknown_tenant_fails_before_writing() {
        let store = store();
        let err = extract(&config(99), &registry(), &store, Vec::new(), &ProgressBar::hidden())
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<PorterError>(),
            Some(PorterError::TenantNotFound(id)) if id == "99"
        ));
        assert!(store.streamed_tables().is_empty());
    }

    #[tokio::test]
    async fn test_query_failure_aborts_and_names_the_table() {
        let store = store().failing_on("contacts");
        let err = run(&config(1), &store).await.unwrap_err();

        assert!(format!("{:#}", err).contains("contacts"));
        let typed = err.chain().find_map(|e| e.downcast_ref::<PorterError>());
        assert!(matches!(typed, Some(PorterError::QueryFailure { table, .. }) if table == "contacts"));
        // Nothing after the failing table was read
        assert_eq!(store.streamed_tables(), vec!["accounts", "contacts"]);
    }

    #[tokio::test]
    async fn test_dry_run_touches_neither_store_nor_sink() {
        let store = store();
        let mut cfg = config(99);
        cfg.dry_run = true;

        let (text, report) = run(&cfg, &store).await.unwrap();

        assert!(text.is_empty());
        assert!(report.dry_run);
        assert_eq!(report.plan.tables, vec!["accounts", "contacts", "messages", "users"]);
        assert!(store.streamed_tables().is_empty());
    }

    #[tokio::test]
    async fn test_repeated_runs_differ_only_in_timestamp() {
        let strip = |text: String| -> String {
            text.lines()
                .filter(|l| !l.starts_with("-- Generated at:"))
                .collect::<Vec<_>>()
                .join("\n")
        };
        let (first, _) = run(&config(1), &store()).await.unwrap();
        let (second, _) = run(&config(1), &store()).await.unwrap();
        assert_eq!(strip(first), strip(second));
    }

    #[test]
    fn test_plan_summary_lists_tables() {
        let mut cfg = config(3);
        cfg.remap_tenant_id = Some(tenant(4));
        let plan = plan(&cfg, &registry()).unwrap();
        let lines = plan.summary_lines();
        assert!(lines.contains(&"Remap tenant id: 3 -> 4".to_string()));
        assert!(lines.contains(&"  - messages".to_string()));
    }
}
