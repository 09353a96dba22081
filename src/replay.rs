// ABOUTME: Replay engine: applies a tenant artifact to a target database
// ABOUTME: Validates the envelope, optionally backs up, then runs one batch

use crate::artifact::{self, ArtifactSummary};
use crate::backup;
use crate::config::ConnectionConfig;
use crate::error::PorterError;
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tokio_postgres::Client;

/// Where an artifact is replayed
///
/// `execute_batch` receives the artifact text unchanged; the artifact's own
/// `BEGIN;`/`COMMIT;` markers are the only transaction boundary.
#[async_trait]
pub trait ReplayTarget: Send + Sync {
    /// Take a full safety dump into `dir`, returning its path.
    async fn backup(&self, dir: &Path) -> Result<PathBuf>;

    async fn execute_batch(&self, sql: &str) -> Result<()>;

    /// Best-effort cleanup after a failed batch.
    async fn reset_session(&self) -> Result<()>;
}

/// Replays into a live connection, dumping the same database for backups.
pub struct PgReplayTarget<'a> {
    pub client: &'a Client,
    pub connection: &'a ConnectionConfig,
}

#[async_trait]
impl ReplayTarget for PgReplayTarget<'_> {
    async fn backup(&self, dir: &Path) -> Result<PathBuf> {
        backup::create_backup(self.connection, dir)
    }

    async fn execute_batch(&self, sql: &str) -> Result<()> {
        // The server tokenizes the whole batch before running its first SET
        self.client
            .batch_execute(&artifact::SESSION_PREAMBLE.join("\n"))
            .await
            .context("Failed to prepare import session")?;
        self.client.batch_execute(sql).await.map_err(|e| {
            let table = e
                .as_db_error()
                .and_then(|db| db.table())
                .unwrap_or("<artifact>")
                .to_string();
            anyhow::Error::from(PorterError::query_failure(table, e))
        })
    }

    async fn reset_session(&self) -> Result<()> {
        self.client
            .batch_execute("ROLLBACK; SET session_replication_role = DEFAULT;")
            .await
            .context("Failed to reset session after import failure")
    }
}

#[derive(Debug, Clone, Default)]
pub struct ReplayOptions {
    /// Take a safety backup into this directory before writing.
    pub backup_dir: Option<PathBuf>,
    pub dry_run: bool,
}

/// An artifact that passed validation and is ready to replay.
#[derive(Debug)]
pub struct PreparedArtifact {
    pub path: PathBuf,
    pub content: String,
    pub summary: ArtifactSummary,
    pub checksum_verified: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReplayReport {
    pub artifact: PathBuf,
    pub tenant: Option<i64>,
    pub tables: usize,
    pub rows: u64,
    pub checksum_verified: bool,
    pub backup: Option<PathBuf>,
    pub dry_run: bool,
}

impl ReplayReport {
    fn new(prepared: &PreparedArtifact, backup: Option<PathBuf>, dry_run: bool) -> Self {
        Self {
            artifact: prepared.path.clone(),
            tenant: prepared.summary.tenant,
            tables: prepared.summary.sections.len(),
            rows: prepared.summary.total_rows(),
            checksum_verified: prepared.checksum_verified,
            backup,
            dry_run,
        }
    }
}

/// Read and validate an artifact without touching any database
///
/// A checksum sidecar, when present, must match. A missing file is
/// [`PorterError::ArtifactMissing`]; a truncated or hand-broken envelope is
/// [`PorterError::ArtifactMalformed`].
pub fn prepare(path: &Path) -> Result<PreparedArtifact> {
    let content = artifact::read_artifact(path)?;
    let summary = artifact::validate_envelope(path, &content)?;
    let checksum_verified = artifact::verify_checksum(path)?;
    if checksum_verified {
        tracing::debug!("Checksum verified for {}", path.display());
    } else {
        tracing::warn!("No checksum file for {}; skipping verification", path.display());
    }
    Ok(PreparedArtifact {
        path: path.to_path_buf(),
        content,
        summary,
        checksum_verified,
    })
}

/// Replay an artifact
///
/// The artifact is validated before anything else happens. When a backup
/// directory is configured the backup runs next and its failure aborts the
/// replay before any write. The artifact then runs as a single batch; on
/// failure the session is rolled back and no rows persist.
///
/// With `dry_run` set only validation runs and `target` is never used.
pub async fn replay<T>(path: &Path, target: &T, options: &ReplayOptions) -> Result<ReplayReport>
where
    T: ReplayTarget + ?Sized,
{
    let prepared = prepare(path)?;
    apply(&prepared, target, options).await
}

/// Replay an artifact already checked by [`prepare`].
pub async fn apply<T>(
    prepared: &PreparedArtifact,
    target: &T,
    options: &ReplayOptions,
) -> Result<ReplayReport>
where
    T: ReplayTarget + ?Sized,
{
    let path = prepared.path.as_path();

    if options.dry_run {
        return Ok(ReplayReport::new(prepared, None, true));
    }

    let backup = match &options.backup_dir {
        Some(dir) => Some(target.backup(dir).await?),
        None => None,
    };

    tracing::info!(
        "Importing {} ({} rows across {} tables)",
        path.display(),
        prepared.summary.total_rows(),
        prepared.summary.sections.len()
    );

    if let Err(e) = target.execute_batch(&prepared.content).await {
        if let Err(reset) = target.reset_session().await {
            tracing::warn!("{:#}", reset);
        }
        return Err(e.context(format!(
            "Import of {} failed; the transaction was rolled back and no rows were applied",
            path.display()
        )));
    }

    tracing::info!("✓ Import complete: {} rows", prepared.summary.total_rows());
    Ok(ReplayReport::new(prepared, backup, false))
}
