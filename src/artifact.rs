// ABOUTME: Artifact format: header, transactional envelope, per-table INSERT sections
// ABOUTME: Writing, envelope validation, checksum sidecars, and external gzip

use crate::error::PorterError;
use crate::tenant::TenantId;
use anyhow::{bail, Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use sha2::{Digest, Sha256};
use std::ffi::OsString;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

/// Literals are written with `''` as the only escape and encoded as UTF-8.
pub const SESSION_PREAMBLE: &[&str] = &[
    "SET client_encoding = 'UTF8';",
    "SET standard_conforming_strings = on;",
];
/// Disables FK and trigger enforcement so sections can replay in any order.
pub const REPLICATION_ROLE_REPLICA: &str = "SET session_replication_role = replica;";
pub const BEGIN_MARKER: &str = "BEGIN;";
pub const COMMIT_MARKER: &str = "COMMIT;";
pub const REPLICATION_ROLE_DEFAULT: &str = "SET session_replication_role = DEFAULT;";

const TABLE_COMMENT_PREFIX: &str = "-- Table: ";
const TENANT_COMMENT_PREFIX: &str = "-- Tenant ID: ";

#[derive(Debug, Clone)]
pub struct ArtifactHeader {
    pub tenant: TenantId,
    pub remapped_to: Option<TenantId>,
    pub generated_at: DateTime<Utc>,
    pub generator: String,
}

impl ArtifactHeader {
    pub fn new(tenant: TenantId, remapped_to: Option<TenantId>) -> Self {
        Self {
            tenant,
            remapped_to,
            generated_at: Utc::now(),
            generator: format!("{} {}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION")),
        }
    }

    fn render(&self) -> String {
        let mut lines = vec![
            "-- Tenant export".to_string(),
            format!("{}{}", TENANT_COMMENT_PREFIX, self.tenant),
        ];
        if let Some(target) = self.remapped_to {
            lines.push(format!("-- Remapped tenant ID: {}", target));
        }
        lines.push(format!(
            "-- Generated at: {}",
            self.generated_at.to_rfc3339_opts(SecondsFormat::Secs, true)
        ));
        lines.push(format!("-- Generator: {}", self.generator));
        lines.push("--".to_string());
        lines.join("\n")
    }
}

/// Streams an artifact into any writer
///
/// [`ArtifactWriter::begin`] emits the header and opens the envelope;
/// [`ArtifactWriter::finish`] closes it. Dropping the writer without
/// finishing leaves an artifact that replay rejects.
pub struct ArtifactWriter<W: Write> {
    out: W,
}

impl<W: Write> ArtifactWriter<W> {
    pub fn begin(mut out: W, header: &ArtifactHeader) -> Result<Self> {
        writeln!(out, "{}", header.render()).context("Failed to write artifact header")?;
        for setting in SESSION_PREAMBLE {
            writeln!(out, "{}", setting)?;
        }
        writeln!(out, "{}", REPLICATION_ROLE_REPLICA)?;
        writeln!(out, "{}", BEGIN_MARKER)?;
        Ok(Self { out })
    }

    pub fn start_table(&mut self, table: &str, row_count: u64) -> Result<()> {
        writeln!(self.out)?;
        writeln!(self.out, "{}{} ({} rows)", TABLE_COMMENT_PREFIX, table, row_count)
            .with_context(|| format!("Failed to write section header for '{}'", table))?;
        Ok(())
    }

    pub fn write_statement(&mut self, statement: &str) -> Result<()> {
        writeln!(self.out, "{}", statement).context("Failed to write INSERT statement")
    }

    pub fn finish(mut self) -> Result<W> {
        writeln!(self.out)?;
        writeln!(self.out, "{}", COMMIT_MARKER)?;
        writeln!(self.out, "{}", REPLICATION_ROLE_DEFAULT)?;
        self.out.flush().context("Failed to flush artifact")?;
        Ok(self.out)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSection {
    pub table: String,
    pub rows: u64,
}

/// What an artifact claims to contain, read from its comments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactSummary {
    pub tenant: Option<i64>,
    pub sections: Vec<TableSection>,
}

impl ArtifactSummary {
    pub fn total_rows(&self) -> u64 {
        self.sections.iter().map(|s| s.rows).sum()
    }
}

/// Read an artifact's full text, decompressing `.gz` files with `gzip -dc`
pub fn read_artifact(path: &Path) -> Result<String> {
    if !path.is_file() {
        return Err(PorterError::ArtifactMissing(path.to_path_buf()).into());
    }

    if is_gzipped(path) {
        crate::utils::check_required_tools(&["gzip"])?;
        let output = Command::new("gzip")
            .arg("-dc")
            .arg(path)
            .stdin(Stdio::null())
            .output()
            .context("Failed to execute gzip")?;
        if !output.status.success() {
            bail!(
                "gzip failed to decompress {}: {}",
                path.display(),
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        return String::from_utf8(output.stdout)
            .with_context(|| format!("Artifact {} is not valid UTF-8", path.display()));
    }

    fs::read_to_string(path).with_context(|| format!("Failed to read artifact {}", path.display()))
}

fn is_gzipped(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext == "gz")
}

/// Check the transactional envelope and summarise the sections
///
/// `BEGIN;` must appear on its own line before any section, and the
/// artifact must end with `COMMIT;` followed by the replication-role reset.
/// A truncated artifact fails this check.
pub fn validate_envelope(path: &Path, content: &str) -> Result<ArtifactSummary> {
    let malformed = |reason: &str| PorterError::ArtifactMalformed {
        path: path.to_path_buf(),
        reason: reason.to_string(),
    };

    let mut tenant = None;
    let mut sections = Vec::new();
    let mut opened = false;
    // Literals and quoted identifiers may span lines; their continuation
    // lines are data
    let mut quote = Quote::None;

    for line in content.lines() {
        let continuation = quote != Quote::None;
        quote = quote.scan(line);
        if continuation {
            continue;
        }
        if !opened {
            if let Some(id) = line.strip_prefix(TENANT_COMMENT_PREFIX) {
                tenant = id.trim().parse().ok();
            }
            if line.starts_with("INSERT INTO") || line.starts_with(TABLE_COMMENT_PREFIX) {
                return Err(malformed("data appears before BEGIN;").into());
            }
            opened = line == BEGIN_MARKER;
            continue;
        }
        if let Some(section) = line.strip_prefix(TABLE_COMMENT_PREFIX) {
            sections.push(parse_section(section).ok_or_else(|| malformed("bad table comment"))?);
        }
    }

    if !opened {
        return Err(malformed("missing BEGIN; marker").into());
    }

    let closing = format!("{}\n{}", COMMIT_MARKER, REPLICATION_ROLE_DEFAULT);
    if !content.trim_end().ends_with(&closing) {
        return Err(malformed("missing COMMIT; trailer (artifact may be truncated)").into());
    }

    Ok(ArtifactSummary { tenant, sections })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Quote {
    None,
    Literal,
    Identifier,
}

impl Quote {
    /// Quoting state after `line`, starting from `self`.
    ///
    /// Doubled quotes (`''`, `""`) toggle twice, so they need no special case.
    fn scan(self, line: &str) -> Self {
        line.chars().fold(self, |state, c| match (state, c) {
            (Quote::None, '\'') => Quote::Literal,
            (Quote::None, '"') => Quote::Identifier,
            (Quote::Literal, '\'') | (Quote::Identifier, '"') => Quote::None,
            (state, _) => state,
        })
    }
}

fn parse_section(comment: &str) -> Option<TableSection> {
    let (table, rest) = comment.split_once(" (")?;
    let rows = rest.strip_suffix(" rows)")?.parse().ok()?;
    Some(TableSection {
        table: table.to_string(),
        rows,
    })
}

pub fn checksum_path(artifact: &Path) -> PathBuf {
    let mut name = OsString::from(artifact.as_os_str());
    name.push(".sha256");
    PathBuf::from(name)
}

fn sha256_file(path: &Path) -> Result<String> {
    let mut file =
        fs::File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    let mut hasher = Sha256::new();
    std::io::copy(&mut file, &mut hasher)
        .with_context(|| format!("Failed to hash {}", path.display()))?;
    Ok(format!("{:x}", hasher.finalize()))
}

/// Write `<artifact>.sha256` in `sha256sum` format.
pub fn write_checksum(artifact: &Path) -> Result<PathBuf> {
    let digest = sha256_file(artifact)?;
    let file_name = artifact
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let sidecar = checksum_path(artifact);
    fs::write(&sidecar, format!("{}  {}\n", digest, file_name))
        .with_context(|| format!("Failed to write checksum {}", sidecar.display()))?;
    Ok(sidecar)
}

/// Compare an artifact with its sidecar, if one exists
///
/// Returns `Ok(false)` when there is no sidecar to check against.
pub fn verify_checksum(artifact: &Path) -> Result<bool> {
    let sidecar = checksum_path(artifact);
    if !sidecar.exists() {
        return Ok(false);
    }
    let recorded = fs::read_to_string(&sidecar)
        .with_context(|| format!("Failed to read checksum {}", sidecar.display()))?;
    let expected = recorded.split_whitespace().next().unwrap_or_default();
    let actual = sha256_file(artifact)?;
    if !expected.eq_ignore_ascii_case(&actual) {
        return Err(PorterError::ArtifactMalformed {
            path: artifact.to_path_buf(),
            reason: format!("checksum mismatch (expected {}, got {})", expected, actual),
        }
        .into());
    }
    Ok(true)
}

/// Compress a finished artifact in place with `gzip`, returning the `.gz` path.
pub fn compress(artifact: &Path) -> Result<PathBuf> {
    crate::utils::check_required_tools(&["gzip"])?;
    let status = Command::new("gzip")
        .arg("-f")
        .arg(artifact)
        .status()
        .context("Failed to execute gzip")?;
    if !status.success() {
        bail!("gzip failed to compress {} ({})", artifact.display(), status);
    }
    let mut name = OsString::from(artifact.as_os_str());
    name.push(".gz");
    Ok(PathBuf::from(name))
}
