// ABOUTME: Import command: replays a tenant artifact into the target database
// ABOUTME: Validates first, confirms with the operator, then backs up and applies

use crate::config::PorterConfig;
use crate::postgres;
use crate::replay::{self, PgReplayTarget, PreparedArtifact, ReplayOptions};
use anyhow::{bail, Context, Result};
use dialoguer::{theme::ColorfulTheme, Confirm};
use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct ImportArgs {
    pub input: PathBuf,
    /// Overrides `[import] backup_before_import` when set.
    pub backup: Option<bool>,
    pub dry_run: bool,
    pub yes: bool,
}

fn describe(prepared: &PreparedArtifact) {
    let tenant = prepared
        .summary
        .tenant
        .map(|id| id.to_string())
        .unwrap_or_else(|| "unknown".to_string());
    tracing::info!("Artifact: {}", prepared.path.display());
    tracing::info!("Tenant: {}", tenant);
    tracing::info!(
        "Checksum: {}",
        if prepared.checksum_verified {
            "verified"
        } else {
            "not present"
        }
    );
    for section in &prepared.summary.sections {
        tracing::info!("  {:<36} {:>10}", section.table, section.rows);
    }
    tracing::info!(
        "Total: {} rows across {} tables",
        prepared.summary.total_rows(),
        prepared.summary.sections.len()
    );
}

/// Import an artifact
///
/// The artifact is validated before any connection is made. A dry run stops
/// there. Otherwise the operator confirms (unless `yes`), a safety backup is
/// taken when enabled, and the artifact is applied as one transaction.
pub async fn import(config: &PorterConfig, args: ImportArgs) -> Result<()> {
    let prepared = replay::prepare(&args.input)?;
    describe(&prepared);

    if args.dry_run {
        tracing::info!("✓ Dry run: artifact is valid; nothing was written");
        return Ok(());
    }

    let backup_enabled = args.backup.unwrap_or(config.import.backup_before_import);
    if !backup_enabled {
        tracing::warn!("⚠ Safety backup disabled for this import");
    }

    if !args.yes {
        let confirmed = Confirm::with_theme(&ColorfulTheme::default())
            .with_prompt(format!(
                "Import {} rows into {}?",
                prepared.summary.total_rows(),
                config.database.display_target()
            ))
            .default(false)
            .interact()
            .context("Failed to get confirmation")?;
        if !confirmed {
            tracing::warn!("⚠ User cancelled import");
            bail!("Import cancelled by user");
        }
    }

    let options = ReplayOptions {
        backup_dir: backup_enabled.then(|| config.import.backup_dir.clone()),
        dry_run: false,
    };
    if options.backup_dir.is_some() {
        crate::utils::check_required_tools(&["pg_dump"])?;
    }

    tracing::info!("Connecting to {}", config.database.display_target());
    let client = postgres::connect(&config.database).await?;
    let target = PgReplayTarget {
        client: &client,
        connection: &config.database,
    };

    let report = replay::apply(&prepared, &target, &options).await?;
    if let Some(backup) = &report.backup {
        tracing::info!("Backup: {}", backup.display());
    }
    tracing::info!(
        "✓ Imported {} rows for tenant {}",
        report.rows,
        report
            .tenant
            .map(|id| id.to_string())
            .unwrap_or_else(|| "unknown".to_string())
    );
    Ok(())
}
