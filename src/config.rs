// ABOUTME: Loads connection parameters and command defaults
// ABOUTME: Merges built-in defaults, a TOML file, and libpq environment variables

use crate::error::PorterError;
use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

/// Config file picked up from the working directory when `--config` is absent.
pub const DEFAULT_CONFIG_FILE: &str = "tenant-porter.toml";

/// Where and how to reach one PostgreSQL database.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub user: String,
    pub password: Option<String>,
    pub ssl_mode: String,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5432,
            database: "postgres".to_string(),
            user: "postgres".to_string(),
            password: None,
            ssl_mode: "prefer".to_string(),
        }
    }
}

impl ConnectionConfig {
    /// `user@host:port/database`, safe to log.
    pub fn display_target(&self) -> String {
        format!(
            "{}@{}:{}/{}",
            self.user, self.host, self.port, self.database
        )
    }

    fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup("PGHOST") {
            self.host = host;
        }
        if let Some(port) = lookup("PGPORT") {
            self.port = port.parse().map_err(|_| {
                PorterError::Configuration(format!("PGPORT must be a port number, got '{}'", port))
            })?;
        }
        if let Some(database) = lookup("PGDATABASE") {
            self.database = database;
        }
        if let Some(user) = lookup("PGUSER") {
            self.user = user;
        }
        if let Some(password) = lookup("PGPASSWORD") {
            self.password = Some(password);
        }
        if let Some(ssl_mode) = lookup("PGSSLMODE") {
            self.ssl_mode = ssl_mode;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ExportDefaults {
    pub output_dir: PathBuf,
    pub include_optional_tables: bool,
}

impl Default for ExportDefaults {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("exports"),
            include_optional_tables: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ImportDefaults {
    pub backup_before_import: bool,
    pub backup_dir: PathBuf,
}

impl Default for ImportDefaults {
    fn default() -> Self {
        Self {
            backup_before_import: true,
            backup_dir: PathBuf::from("backups"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct PorterConfig {
    pub database: ConnectionConfig,
    pub export: ExportDefaults,
    pub import: ImportDefaults,
}

impl PorterConfig {
    /// Load configuration for one command invocation
    ///
    /// An explicit `path` must exist. Without one, [`DEFAULT_CONFIG_FILE`] is
    /// read when present and built-in defaults are used otherwise. libpq
    /// environment variables (`PGHOST`, `PGPORT`, ...) override the file.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None if Path::new(DEFAULT_CONFIG_FILE).exists() => {
                Self::from_file(Path::new(DEFAULT_CONFIG_FILE))?
            }
            None => Self::default(),
        };
        config.database.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file at {}", path.display()))?;
        Self::parse(&raw)
            .with_context(|| format!("Failed to parse TOML config at {}", path.display()))
    }

    fn parse(raw: &str) -> Result<Self> {
        let config: PorterConfig = toml::from_str(raw)?;
        Ok(config)
    }
}
