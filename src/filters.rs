// ABOUTME: Table inclusion/exclusion filtering for tenant exports
// ABOUTME: Validates filter lists against the registry before any I/O

use crate::error::PorterError;
use crate::registry::{Registry, TableDescriptor};
use crate::utils;
use anyhow::Result;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
enum TableSelection {
    #[default]
    All,
    Include(Vec<String>),
    Exclude(Vec<String>),
}

/// Which registry tables an export touches
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TableFilter {
    selection: TableSelection,
}

impl TableFilter {
    /// Creates a filter from CLI arguments
    ///
    /// A table named in both lists is a configuration error. Non-overlapping
    /// lists are allowed but the inclusion list takes precedence and the
    /// exclusion list is ignored.
    pub fn new(include: Option<Vec<String>>, exclude: Option<Vec<String>>) -> Result<Self> {
        for table in include.iter().chain(exclude.iter()).flatten() {
            utils::validate_postgres_identifier(table).map_err(|e| {
                PorterError::Configuration(format!("Invalid table name in filter: {}", e))
            })?;
        }

        let selection = match (include, exclude) {
            (Some(include), Some(exclude)) => {
                if let Some(conflict) = include.iter().find(|t| exclude.contains(t)) {
                    return Err(PorterError::Configuration(format!(
                        "Table '{}' is both included and excluded",
                        conflict
                    ))
                    .into());
                }
                tracing::warn!(
                    "Both --include-tables and --exclude-tables given; the exclusion list is ignored"
                );
                TableSelection::Include(include)
            }
            (Some(include), None) => TableSelection::Include(include),
            (None, Some(exclude)) => TableSelection::Exclude(exclude),
            (None, None) => TableSelection::All,
        };

        Ok(Self { selection })
    }

    /// Creates an empty filter (export every active table)
    pub fn all() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.selection == TableSelection::All
    }

    pub fn include_tables(&self) -> Option<&[String]> {
        match &self.selection {
            TableSelection::Include(tables) => Some(tables),
            _ => None,
        }
    }

    pub fn exclude_tables(&self) -> Option<&[String]> {
        match &self.selection {
            TableSelection::Exclude(tables) => Some(tables),
            _ => None,
        }
    }

    /// Determines if a table passes the filter
    pub fn should_extract(&self, table: &str) -> bool {
        match &self.selection {
            TableSelection::All => true,
            TableSelection::Include(tables) => tables.iter().any(|t| t == table),
            TableSelection::Exclude(tables) => !tables.iter().any(|t| t == table),
        }
    }

    /// Effective table set in registry declaration order
    ///
    /// Starts from the core tables plus the optional set when enabled and
    /// applies the filter. Names unknown to the registry, explicitly included
    /// optional tables while the optional set is disabled, and filters that
    /// leave nothing selected are all configuration errors.
    pub fn resolve_tables<'r>(
        &self,
        registry: &'r Registry,
        include_optional: bool,
    ) -> Result<Vec<&'r TableDescriptor>> {
        let named = self
            .include_tables()
            .or(self.exclude_tables())
            .unwrap_or_default();
        for table in named {
            if registry.lookup(table).is_none() {
                return Err(PorterError::Configuration(format!(
                    "Unknown table '{}' in table filter",
                    table
                ))
                .into());
            }
        }

        if !include_optional {
            if let Some(optional) = self
                .include_tables()
                .unwrap_or_default()
                .iter()
                .find(|t| registry.is_optional(t))
            {
                return Err(PorterError::Configuration(format!(
                    "Table '{}' is an optional table; pass --include-enterprise to export it",
                    optional
                ))
                .into());
            }
        }

        let tables: Vec<&TableDescriptor> = registry
            .active_tables(include_optional)
            .into_iter()
            .filter(|descriptor| self.should_extract(descriptor.name))
            .collect();

        if tables.is_empty() {
            return Err(PorterError::Configuration(
                "No tables selected for export. Check your filters.".into(),
            )
            .into());
        }

        Ok(tables)
    }
}
