// ABOUTME: Export command: writes one tenant's rows to a replayable artifact
// ABOUTME: Atomic temp-file persist, checksum sidecar, and optional gzip

use crate::artifact;
use crate::config::PorterConfig;
use crate::extract::{self, ExtractionConfig, ExtractionReport};
use crate::filters::TableFilter;
use crate::postgres::{self, PgStore};
use crate::registry::Registry;
use crate::tenant::{self, TenantId, TenantRef};
use anyhow::{Context, Result};
use chrono::Utc;
use indicatif::{ProgressBar, ProgressStyle};
use std::io::{BufWriter, IsTerminal};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

#[derive(Debug, Clone)]
pub struct ExportArgs {
    pub tenant: TenantRef,
    pub output: Option<PathBuf>,
    pub compress: bool,
    pub include_tables: Option<Vec<String>>,
    pub exclude_tables: Option<Vec<String>>,
    pub include_enterprise: bool,
    pub remap_tenant_id: Option<i64>,
    pub dry_run: bool,
    pub verbose: bool,
}

/// Default artifact location: `<dir>/tenant_<id>_<YYYYMMDD_HHMMSS>.sql`.
pub fn default_output_path(dir: &Path, tenant: TenantId) -> PathBuf {
    dir.join(format!(
        "tenant_{}_{}.sql",
        tenant,
        Utc::now().format("%Y%m%d_%H%M%S")
    ))
}

fn progress_bar(verbose: bool) -> ProgressBar {
    if verbose || !std::io::stderr().is_terminal() {
        return ProgressBar::hidden();
    }
    let bar = ProgressBar::new(0);
    if let Ok(style) =
        ProgressStyle::with_template("{spinner} {msg:<28} [{bar:30}] {pos}/{len} rows")
    {
        bar.set_style(style);
    }
    bar
}

/// Export a tenant to an artifact file
///
/// Filters and the remap target are validated before connecting. A dry run
/// with a numeric tenant id never connects; one with a tenant name connects
/// only to resolve the name. Returns the artifact path, or `None` for a dry
/// run.
///
/// The artifact is streamed into a temporary file next to the destination
/// and only moved into place once the envelope is closed, so a failed export
/// leaves nothing at the destination path.
pub async fn export(config: &PorterConfig, args: ExportArgs) -> Result<Option<PathBuf>> {
    let registry = Registry::standard()?;
    let filter = TableFilter::new(args.include_tables.clone(), args.exclude_tables.clone())?;
    let include_optional = args.include_enterprise || config.export.include_optional_tables;
    let remap_tenant_id = args.remap_tenant_id.map(TenantId::new).transpose()?;
    filter.resolve_tables(&registry, include_optional)?;

    if args.compress {
        crate::utils::check_required_tools(&["gzip"])?;
    }

    if args.dry_run {
        if let TenantRef::Id(id) = &args.tenant {
            let extraction = ExtractionConfig {
                tenant: *id,
                filter,
                include_optional_tables: include_optional,
                remap_tenant_id,
                dry_run: true,
            };
            print_plan(&extraction, &registry)?;
            return Ok(None);
        }
    }

    tracing::info!("Connecting to {}", config.database.display_target());
    let client = postgres::connect(&config.database).await?;
    let store = PgStore::new(client);

    let tenant = tenant::resolve(&store, &args.tenant).await?;
    let extraction = ExtractionConfig {
        tenant,
        filter,
        include_optional_tables: include_optional,
        remap_tenant_id,
        dry_run: args.dry_run,
    };

    if args.dry_run {
        print_plan(&extraction, &registry)?;
        return Ok(None);
    }

    let output = args
        .output
        .clone()
        .unwrap_or_else(|| default_output_path(&config.export.output_dir, tenant));
    let parent = match output.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
        _ => PathBuf::from("."),
    };
    std::fs::create_dir_all(&parent)
        .with_context(|| format!("Failed to create output directory {}", parent.display()))?;

    let temp = NamedTempFile::new_in(&parent)
        .with_context(|| format!("Failed to create temporary file in {}", parent.display()))?;

    let progress = progress_bar(args.verbose);

    store.begin_snapshot().await?;
    let (sink, report) =
        extract::extract(&extraction, &registry, &store, BufWriter::new(temp), &progress).await?;
    store.end_snapshot().await?;

    let temp = sink
        .into_inner()
        .map_err(|e| e.into_error())
        .context("Failed to flush artifact")?;
    temp.persist(&output)
        .map_err(|e| e.error)
        .with_context(|| format!("Failed to write artifact to {}", output.display()))?;

    let artifact_path = if args.compress {
        artifact::compress(&output)?
    } else {
        output
    };
    let checksum = artifact::write_checksum(&artifact_path)?;

    print_report(&report, &artifact_path, &checksum);
    Ok(Some(artifact_path))
}

fn print_plan(extraction: &ExtractionConfig, registry: &Registry) -> Result<()> {
    let plan = extract::plan(extraction, registry)?;
    tracing::info!("Dry run: no data will be read and no file written");
    for line in plan.summary_lines() {
        tracing::info!("{}", line);
    }
    Ok(())
}

fn print_report(report: &ExtractionReport, artifact: &Path, checksum: &Path) {
    tracing::info!("");
    tracing::info!("========================================");
    tracing::info!("Export summary for tenant {}", report.plan.tenant);
    tracing::info!("========================================");
    for table in report.tables.iter().filter(|t| t.rows > 0) {
        tracing::info!("  {:<36} {:>10}", table.table, table.rows);
    }
    if !report.skipped.is_empty() {
        tracing::warn!("Skipped (not in schema): {}", report.skipped.join(", "));
    }
    tracing::info!("Total rows: {}", report.total_rows());
    tracing::info!("✓ Artifact: {}", artifact.display());
    tracing::info!("✓ Checksum: {}", checksum.display());
}
