// ABOUTME: Per-table row counts and cross-tenant integrity checks
// ABOUTME: Read-only report behind the validate command

use crate::error::PorterError;
use crate::registry::Registry;
use crate::selector::resolve_predicate;
use crate::store::TenantStore;
use crate::tenant::TenantId;
use anyhow::Result;
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableCount {
    pub table: String,
    pub rows: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IntegrityResult {
    pub name: String,
    pub description: String,
    pub violations: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ValidationReport {
    pub tenant: TenantId,
    pub tables: Vec<TableCount>,
    /// Registry tables missing from the connected schema.
    pub missing_tables: Vec<String>,
    pub integrity: Vec<IntegrityResult>,
    /// Checks not run because a table they read is missing.
    pub skipped_checks: Vec<String>,
}

impl ValidationReport {
    pub fn total_rows(&self) -> i64 {
        self.tables.iter().map(|t| t.rows).sum()
    }

    pub fn failed_checks(&self) -> impl Iterator<Item = &IntegrityResult> {
        self.integrity.iter().filter(|r| r.violations > 0)
    }

    pub fn is_consistent(&self) -> bool {
        self.failed_checks().next().is_none()
    }
}

/// Count a tenant's rows per table and run the registry's integrity checks
///
/// Uses the same predicates as extraction, so the counts are what an export
/// started now would write.
pub async fn validate<S>(
    tenant: TenantId,
    registry: &Registry,
    store: &S,
    include_optional: bool,
) -> Result<ValidationReport>
where
    S: TenantStore + ?Sized,
{
    if !store.tenant_exists(tenant.get()).await? {
        return Err(PorterError::TenantNotFound(tenant.to_string()).into());
    }

    let mut report = ValidationReport {
        tenant,
        tables: Vec::new(),
        missing_tables: Vec::new(),
        integrity: Vec::new(),
        skipped_checks: Vec::new(),
    };

    for descriptor in registry.active_tables(include_optional) {
        if !store.table_exists(descriptor.name).await? {
            tracing::warn!("{}; skipping", PorterError::TableNotFound(descriptor.name.into()));
            report.missing_tables.push(descriptor.name.to_string());
            continue;
        }
        let predicate = resolve_predicate(descriptor, tenant);
        let rows = store.count_rows(descriptor.name, &predicate).await?;
        tracing::debug!("{}: {} rows", descriptor.name, rows);
        report.tables.push(TableCount {
            table: descriptor.name.to_string(),
            rows,
        });
    }

    for check in registry.integrity_checks() {
        let mut runnable = true;
        for table in check.tables {
            if !store.table_exists(table).await? {
                runnable = false;
                break;
            }
        }
        if !runnable {
            tracing::warn!("Skipping integrity check '{}': a table it reads is missing", check.name);
            report.skipped_checks.push(check.name.to_string());
            continue;
        }

        let violations = store.count_query(check.name, &(check.build)(tenant)).await?;
        if violations > 0 {
            tracing::warn!("✗ {}: {} {}", check.name, violations, check.description);
        } else {
            tracing::info!("✓ {}", check.name);
        }
        report.integrity.push(IntegrityResult {
            name: check.name.to_string(),
            description: check.description.to_string(),
            violations,
        });
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{IntegrityCheck, TableDescriptor};
    use crate::store::fake::{column, FakeStore};
    use crate::store::ColumnKind;

    fn registry() -> Registry {
        Registry::new(
            vec![
                TableDescriptor::foreign_key("accounts", "id"),
                TableDescriptor::direct("contacts"),
                TableDescriptor::direct("conversations"),
            ],
            vec![TableDescriptor::direct("sla_policies")],
            vec![
                IntegrityCheck {
                    name: "conversations_with_foreign_contacts",
                    description: "conversations whose contact belongs to another tenant",
                    tables: &["conversations", "contacts"],
                    build: |t| format!("SELECT COUNT(*) /* {} */", t),
                },
                IntegrityCheck {
                    name: "sla_check",
                    description: "sla rows",
                    tables: &["sla_policies"],
                    build: |t| format!("SELECT COUNT(*) /* {} */", t),
                },
            ],
        )
        .unwrap()
    }

    fn store() -> FakeStore {
        FakeStore::default()
            .with_tenant(1, "Acme")
            .with_table("accounts", vec![column("id", ColumnKind::Numeric)])
            .with_rows("accounts", "\"id\" = 1", vec![vec![Some("1")]])
            .with_table("contacts", vec![column("id", ColumnKind::Numeric)])
            .with_rows(
                "contacts",
                "\"account_id\" = 1",
                vec![vec![Some("1")], vec![Some("2")]],
            )
            .with_table("conversations", vec![column("id", ColumnKind::Numeric)])
    }

    #[tokio::test]
    async fn test_counts_rows_per_table() {
        let report = validate(TenantId::new(1).unwrap(), &registry(), &store(), false)
            .await
            .unwrap();

        assert_eq!(
            report.tables,
            vec![
                TableCount { table: "accounts".into(), rows: 1 },
                TableCount { table: "contacts".into(), rows: 2 },
                TableCount { table: "conversations".into(), rows: 0 },
            ]
        );
        assert_eq!(report.total_rows(), 3);
        assert!(report.is_consistent());
        assert_eq!(report.integrity.len(), 1);
        // sla_policies is neither enabled nor present
        assert_eq!(report.skipped_checks, vec!["sla_check"]);
    }

    #[tokio::test]
    async fn test_reports_integrity_violations() {
        let mut store = store();
        store
            .integrity_violations
            .insert("conversations_with_foreign_contacts".into(), 3);

        let report = validate(TenantId::new(1).unwrap(), &registry(), &store, false)
            .await
            .unwrap();

        assert!(!report.is_consistent());
        let failed: Vec<_> = report.failed_checks().map(|r| r.violations).collect();
        assert_eq!(failed, vec![3]);
    }

    #[tokio::test]
    async fn test_missing_tables_are_skipped_with_their_checks() {
        let report = validate(TenantId::new(1).unwrap(), &registry(), &store(), true)
            .await
            .unwrap();

        assert_eq!(report.missing_tables, vec!["sla_policies"]);
        assert_eq!(report.skipped_checks, vec!["sla_check"]);
    }

    #[tokio::test]
    async fn test_unknown_tenant_fails() {
        let err = validate(TenantId::new(99).unwrap(), &registry(), &store(), false)
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<PorterError>(),
            Some(PorterError::TenantNotFound(_))
        ));
    }
}
