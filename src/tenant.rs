// ABOUTME: Tenant identifiers and name-to-id resolution
// ABOUTME: Fails precisely on zero or multiple name matches

use crate::error::PorterError;
use crate::store::TenantStore;
use anyhow::Result;
use serde::Serialize;
use std::fmt;
use std::str::FromStr;

/// Canonical tenant identifier, always a positive integer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct TenantId(i64);

impl TenantId {
    pub fn new(id: i64) -> Result<Self> {
        if id <= 0 {
            return Err(PorterError::Configuration(format!(
                "Tenant id must be a positive integer, got {}",
                id
            ))
            .into());
        }
        Ok(Self(id))
    }

    pub fn get(self) -> i64 {
        self.0
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What the operator typed: a numeric id or a tenant name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TenantRef {
    Id(TenantId),
    Name(String),
}

impl FromStr for TenantRef {
    type Err = anyhow::Error;

    fn from_str(input: &str) -> Result<Self> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(PorterError::Configuration("Tenant cannot be empty".into()).into());
        }
        if trimmed.chars().all(|c| c.is_ascii_digit()) {
            let id: i64 = trimmed.parse().map_err(|_| {
                PorterError::Configuration(format!("Tenant id '{}' is out of range", trimmed))
            })?;
            return Ok(TenantRef::Id(TenantId::new(id)?));
        }
        Ok(TenantRef::Name(trimmed.to_string()))
    }
}

impl fmt::Display for TenantRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TenantRef::Id(id) => write!(f, "#{}", id),
            TenantRef::Name(name) => write!(f, "'{}'", name),
        }
    }
}

/// Map a tenant reference to its canonical id
///
/// Numeric ids pass through untouched; their existence is checked by the
/// extraction engine. Names must match exactly one tenant.
pub async fn resolve<S>(store: &S, reference: &TenantRef) -> Result<TenantId>
where
    S: TenantStore + ?Sized,
{
    let name = match reference {
        TenantRef::Id(id) => return Ok(*id),
        TenantRef::Name(name) => name,
    };

    let matches = store.find_tenants_by_name(name).await?;
    match matches.as_slice() {
        [] => Err(PorterError::TenantNotFound(name.clone()).into()),
        [only] => {
            tracing::info!("Resolved tenant '{}' to id {}", name, only.id);
            TenantId::new(only.id)
        }
        many => Err(PorterError::TenantAmbiguous {
            name: name.clone(),
            ids: many.iter().map(|t| t.id).collect(),
        }
        .into()),
    }
}
