// ABOUTME: Identifier validation, quoting, and external tool helpers
// ABOUTME: Shared by the registry, serializer, backup, and artifact code

use crate::config::ConnectionConfig;
use anyhow::{bail, Context, Result};
use std::io::Write;
use std::path::Path;
use tempfile::NamedTempFile;
use which::which;

/// Validate a PostgreSQL identifier (table or column name)
///
/// Identifiers from the registry and from `--include-tables` /
/// `--exclude-tables` end up in generated SQL, so they must:
/// - Be 1-63 characters long
/// - Start with a letter (a-z, A-Z) or underscore (_)
/// - Contain only letters, digits (0-9), or underscores
///
/// # Examples
///
/// ```
/// # use postgres_tenant_porter::utils::validate_postgres_identifier;
/// assert!(validate_postgres_identifier("contact_inboxes").is_ok());
/// assert!(validate_postgres_identifier("1messages").is_err());
/// assert!(validate_postgres_identifier("users\"; DROP TABLE users; --").is_err());
/// ```
pub fn validate_postgres_identifier(identifier: &str) -> Result<()> {
    let trimmed = identifier.trim();
    if trimmed.is_empty() {
        bail!("Identifier cannot be empty or whitespace-only");
    }

    if trimmed.len() > 63 {
        bail!(
            "Identifier '{}' exceeds maximum length of 63 characters (got {})",
            sanitize_identifier(trimmed),
            trimmed.len()
        );
    }

    let mut chars = trimmed.chars();
    if let Some(first) = chars.next() {
        if !first.is_ascii_alphabetic() && first != '_' {
            bail!(
                "Identifier '{}' must start with a letter or underscore, not '{}'",
                sanitize_identifier(trimmed),
                first
            );
        }
    }

    for (i, c) in trimmed.chars().enumerate() {
        if !c.is_ascii_alphanumeric() && c != '_' {
            bail!(
                "Identifier '{}' contains invalid character '{}' at position {}. \
                 Only letters, digits, and underscores are allowed",
                sanitize_identifier(trimmed),
                if c.is_control() {
                    format!("\\x{:02x}", c as u32)
                } else {
                    c.to_string()
                },
                i
            );
        }
    }

    Ok(())
}

/// Strip control characters and cap length so identifiers are safe to log.
pub fn sanitize_identifier(identifier: &str) -> String {
    identifier
        .chars()
        .filter(|c| !c.is_control())
        .take(100)
        .collect()
}

/// Double-quote an identifier, doubling any embedded double quotes.
///
/// ```
/// # use postgres_tenant_porter::utils::quote_ident;
/// assert_eq!(quote_ident("messages"), "\"messages\"");
/// assert_eq!(quote_ident("odd\"name"), "\"odd\"\"name\"");
/// ```
pub fn quote_ident(identifier: &str) -> String {
    format!("\"{}\"", identifier.replace('"', "\"\""))
}

/// Ensure external tools needed by a command are on `PATH`
///
/// Called before any destructive or long-running work so a missing
/// `pg_dump` or `gzip` is reported up front.
pub fn check_required_tools(tools: &[&str]) -> Result<()> {
    let missing: Vec<&str> = tools
        .iter()
        .copied()
        .filter(|tool| which(tool).is_err())
        .collect();

    if !missing.is_empty() {
        bail!(
            "Missing required tools: {}\n\
             \n\
             Please install them before retrying:\n\
             - Ubuntu/Debian: sudo apt-get install postgresql-client gzip\n\
             - macOS: brew install postgresql\n\
             - RHEL/CentOS: sudo yum install postgresql gzip",
            missing.join(", ")
        );
    }

    Ok(())
}

/// Temporary `.pgpass` file for handing credentials to `pg_dump`
///
/// Keeps the password out of the process argument list and environment.
/// The file is created with 0600 permissions and removed on drop.
pub struct PgPassFile {
    file: NamedTempFile,
}

impl PgPassFile {
    pub fn new(config: &ConnectionConfig) -> Result<Self> {
        let mut file = NamedTempFile::new().context("Failed to create temporary .pgpass file")?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(file.path(), std::fs::Permissions::from_mode(0o600))
                .context("Failed to restrict .pgpass permissions")?;
        }

        writeln!(
            file,
            "{}:{}:{}:{}:{}",
            escape_pgpass_field(&config.host),
            config.port,
            escape_pgpass_field(&config.database),
            escape_pgpass_field(&config.user),
            escape_pgpass_field(config.password.as_deref().unwrap_or(""))
        )
        .context("Failed to write .pgpass entry")?;
        file.flush().context("Failed to flush .pgpass file")?;

        Ok(Self { file })
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }
}

// .pgpass treats ':' as a separator and '\' as its escape character
fn escape_pgpass_field(value: &str) -> String {
    value.replace('\\', "\\\\").replace(':', "\\:")
}
