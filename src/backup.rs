// ABOUTME: Safety backup of the target database before an import
// ABOUTME: Wraps pg_dump in custom format with credentials via a temporary .pgpass

use crate::config::ConnectionConfig;
use crate::error::PorterError;
use crate::utils::{self, PgPassFile};
use anyhow::Result;
use chrono::Utc;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

/// Where a backup of `database` taken now would be written.
pub fn backup_path(backup_dir: &Path, database: &str) -> PathBuf {
    backup_dir.join(format!(
        "backup_{}_{}.dump",
        utils::sanitize_identifier(database),
        Utc::now().format("%Y%m%d_%H%M%S")
    ))
}

fn pg_dump_command(config: &ConnectionConfig, output: &Path, pgpass: &Path) -> Command {
    let mut cmd = Command::new("pg_dump");
    cmd.arg("--format=custom")
        .arg("--no-password")
        .arg("--host")
        .arg(&config.host)
        .arg("--port")
        .arg(config.port.to_string())
        .arg("--dbname")
        .arg(&config.database)
        .arg("--username")
        .arg(&config.user)
        .arg(format!("--file={}", output.display()))
        .env("PGPASSFILE", pgpass)
        .env("PGSSLMODE", &config.ssl_mode)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped());
    cmd
}

/// Dump the whole target database with `pg_dump --format=custom`
///
/// Any failure (missing tool, unwritable directory, non-zero exit) is a
/// [`PorterError::BackupFailure`]; the caller must not touch the target
/// database afterwards.
pub fn create_backup(config: &ConnectionConfig, backup_dir: &Path) -> Result<PathBuf> {
    let fail = |reason: String| anyhow::Error::from(PorterError::BackupFailure(reason));

    utils::check_required_tools(&["pg_dump"]).map_err(|e| fail(e.to_string()))?;

    std::fs::create_dir_all(backup_dir).map_err(|e| {
        fail(format!(
            "cannot create backup directory {}: {}",
            backup_dir.display(),
            e
        ))
    })?;

    let output = backup_path(backup_dir, &config.database);
    let pgpass = PgPassFile::new(config).map_err(|e| fail(format!("{:#}", e)))?;

    tracing::info!(
        "Backing up {} to {}",
        config.display_target(),
        output.display()
    );

    let result = pg_dump_command(config, &output, pgpass.path())
        .output()
        .map_err(|e| fail(format!("failed to execute pg_dump: {}", e)))?;

    if !result.status.success() {
        let _ = std::fs::remove_file(&output);
        return Err(fail(format!(
            "pg_dump exited with {}: {}",
            result.status,
            String::from_utf8_lossy(&result.stderr).trim()
        )));
    }

    tracing::info!("✓ Backup written to {}", output.display());
    Ok(output)
}
