// ABOUTME: Validate command: per-table counts and integrity checks for a tenant
// ABOUTME: Exits non-zero when any cross-tenant reference is found

use crate::config::PorterConfig;
use crate::postgres::{self, PgStore};
use crate::registry::Registry;
use crate::tenant::{self, TenantRef};
use crate::validate::ValidationReport;
use anyhow::{bail, Context, Result};

#[derive(Debug, Clone)]
pub struct ValidateArgs {
    pub tenant: TenantRef,
    pub include_enterprise: bool,
    pub json: bool,
}

fn log_report(report: &ValidationReport) {
    tracing::info!("Row counts for tenant {}:", report.tenant);
    for table in &report.tables {
        tracing::info!("  {:<36} {:>10}", table.table, table.rows);
    }
    for table in &report.missing_tables {
        tracing::warn!("  {:<36} {:>10}", table, "missing");
    }
    tracing::info!("Total rows: {}", report.total_rows());
    for check in &report.skipped_checks {
        tracing::warn!("Integrity check '{}' skipped", check);
    }
}

pub async fn validate(config: &PorterConfig, args: ValidateArgs) -> Result<()> {
    let registry = Registry::standard()?;
    let include_optional = args.include_enterprise || config.export.include_optional_tables;

    let client = postgres::connect(&config.database).await?;
    let store = PgStore::new(client);
    let tenant = tenant::resolve(&store, &args.tenant).await?;

    store.begin_snapshot().await?;
    let report = crate::validate::validate(tenant, &registry, &store, include_optional).await?;
    store.end_snapshot().await?;

    if args.json {
        let rendered = serde_json::to_string_pretty(&report)
            .context("Failed to serialize validation report")?;
        println!("{}", rendered);
    } else {
        log_report(&report);
    }

    if !report.is_consistent() {
        bail!(
            "{} integrity check(s) failed for tenant {}",
            report.failed_checks().count(),
            report.tenant
        );
    }
    tracing::info!("✓ Tenant {} passed all integrity checks", report.tenant);
    Ok(())
}
