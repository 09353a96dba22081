// ABOUTME: Error taxonomy for tenant export and replay
// ABOUTME: Typed failures that commands surface through anyhow

use std::path::PathBuf;
use thiserror::Error;

/// Failures the porter distinguishes between.
///
/// Everything except [`PorterError::TableNotFound`] is fatal for the command
/// that raised it. Callers propagate these through `anyhow` and recover the
/// variant with `downcast_ref` when they need to branch on it.
#[derive(Debug, Error)]
pub enum PorterError {
    #[error("Tenant '{0}' not found")]
    TenantNotFound(String),

    #[error("Tenant name '{name}' is ambiguous: matches ids {ids:?}")]
    TenantAmbiguous { name: String, ids: Vec<i64> },

    #[error("Table '{0}' does not exist in the connected schema")]
    TableNotFound(String),

    #[error("Query failed on table '{table}': {source}")]
    QueryFailure {
        table: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("Artifact not found: {}", .0.display())]
    ArtifactMissing(PathBuf),

    #[error("Artifact {} is not replayable: {reason}", .path.display())]
    ArtifactMalformed { path: PathBuf, reason: String },

    #[error("Safety backup failed: {0}")]
    BackupFailure(String),

    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl PorterError {
    pub fn query_failure(
        table: impl Into<String>,
        source: impl Into<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        PorterError::QueryFailure {
            table: table.into(),
            source: source.into(),
        }
    }

    /// Whether processing may continue past this error.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, PorterError::TableNotFound(_))
    }
}
