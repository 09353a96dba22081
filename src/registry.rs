// ABOUTME: Static catalog of tenant-scoped tables and how to select their rows
// ABOUTME: Validated once at construction; declaration order is extraction order

use crate::error::PorterError;
use crate::tenant::TenantId;
use crate::utils;
use anyhow::Result;
use std::collections::HashSet;

/// Table holding one row per tenant.
pub const TENANT_TABLE: &str = "accounts";
/// Canonical tenant column carried by most scoped tables.
pub const TENANT_COLUMN: &str = "account_id";

/// Builds a raw boolean SQL predicate for a tenant.
pub type PredicateBuilder = fn(TenantId) -> String;

/// How a table's rows are matched to a tenant.
#[derive(Debug, Clone, Copy)]
pub enum SelectionStrategy {
    /// `column = tenant_id`, where the column is the canonical [`TENANT_COLUMN`].
    DirectColumn(&'static str),
    /// `column = tenant_id` through a differently named column.
    ForeignKeyColumn(&'static str),
    /// Subquery over tables that are already tenant scoped.
    ///
    /// `depends_on` lists every registry table the predicate reads; each must
    /// be declared before this one.
    DerivedPredicate {
        depends_on: &'static [&'static str],
        build: PredicateBuilder,
    },
}

#[derive(Debug, Clone, Copy)]
pub struct TableDescriptor {
    pub name: &'static str,
    pub strategy: SelectionStrategy,
}

impl TableDescriptor {
    pub const fn direct(name: &'static str) -> Self {
        Self {
            name,
            strategy: SelectionStrategy::DirectColumn(TENANT_COLUMN),
        }
    }

    pub const fn foreign_key(name: &'static str, column: &'static str) -> Self {
        Self {
            name,
            strategy: SelectionStrategy::ForeignKeyColumn(column),
        }
    }

    pub const fn derived(
        name: &'static str,
        depends_on: &'static [&'static str],
        build: PredicateBuilder,
    ) -> Self {
        Self {
            name,
            strategy: SelectionStrategy::DerivedPredicate { depends_on, build },
        }
    }

    /// Column whose value is the tenant id, and the one rewritten on remap.
    ///
    /// Derived tables have no selection column of their own; when they carry
    /// the canonical tenant column it is still rewritten.
    pub fn tenant_column(&self) -> &'static str {
        match self.strategy {
            SelectionStrategy::DirectColumn(column)
            | SelectionStrategy::ForeignKeyColumn(column) => column,
            SelectionStrategy::DerivedPredicate { .. } => TENANT_COLUMN,
        }
    }

    fn dependencies(&self) -> &'static [&'static str] {
        match self.strategy {
            SelectionStrategy::DerivedPredicate { depends_on, .. } => depends_on,
            _ => &[],
        }
    }
}

/// Count query for rows that leak across a tenant boundary.
#[derive(Debug, Clone, Copy)]
pub struct IntegrityCheck {
    pub name: &'static str,
    pub description: &'static str,
    pub tables: &'static [&'static str],
    pub build: PredicateBuilder,
}

/// The core and optional table sets, in extraction order.
#[derive(Debug, Clone)]
pub struct Registry {
    core: Vec<TableDescriptor>,
    optional: Vec<TableDescriptor>,
    checks: Vec<IntegrityCheck>,
}

impl Registry {
    /// Build a registry, rejecting malformed declarations
    ///
    /// Names must be unique valid identifiers with non-empty selection
    /// columns. Derived predicates may only depend on tables declared
    /// earlier (core before optional), so the dependency graph cannot
    /// contain a cycle. Integrity checks may only reference known tables.
    pub fn new(
        core: Vec<TableDescriptor>,
        optional: Vec<TableDescriptor>,
        checks: Vec<IntegrityCheck>,
    ) -> Result<Self> {
        let mut declared: HashSet<&'static str> = HashSet::new();

        for descriptor in core.iter().chain(optional.iter()) {
            utils::validate_postgres_identifier(descriptor.name).map_err(|e| {
                PorterError::Configuration(format!("Invalid registry table name: {}", e))
            })?;

            match descriptor.strategy {
                SelectionStrategy::DirectColumn(column)
                | SelectionStrategy::ForeignKeyColumn(column) => {
                    utils::validate_postgres_identifier(column).map_err(|e| {
                        PorterError::Configuration(format!(
                            "Table '{}' has an invalid selection column: {}",
                            descriptor.name, e
                        ))
                    })?;
                }
                SelectionStrategy::DerivedPredicate { depends_on, .. } => {
                    if depends_on.is_empty() {
                        return Err(PorterError::Configuration(format!(
                            "Derived table '{}' must declare the tables its predicate reads",
                            descriptor.name
                        ))
                        .into());
                    }
                }
            }

            for dependency in descriptor.dependencies() {
                if !declared.contains(dependency) {
                    return Err(PorterError::Configuration(format!(
                        "Derived table '{}' depends on '{}', which is not declared before it",
                        descriptor.name, dependency
                    ))
                    .into());
                }
            }

            if !declared.insert(descriptor.name) {
                return Err(PorterError::Configuration(format!(
                    "Table '{}' is declared more than once",
                    descriptor.name
                ))
                .into());
            }
        }

        for check in &checks {
            if let Some(unknown) = check.tables.iter().find(|t| !declared.contains(*t)) {
                return Err(PorterError::Configuration(format!(
                    "Integrity check '{}' references unknown table '{}'",
                    check.name, unknown
                ))
                .into());
            }
        }

        Ok(Self {
            core,
            optional,
            checks,
        })
    }

    /// The built-in catalog for the chat platform schema.
    pub fn standard() -> Result<Self> {
        Self::new(
            CORE_TABLES.to_vec(),
            OPTIONAL_TABLES.to_vec(),
            INTEGRITY_CHECKS.to_vec(),
        )
    }

    pub fn all_core_tables(&self) -> &[TableDescriptor] {
        &self.core
    }

    pub fn all_optional_tables(&self) -> &[TableDescriptor] {
        &self.optional
    }

    pub fn integrity_checks(&self) -> &[IntegrityCheck] {
        &self.checks
    }

    pub fn lookup(&self, name: &str) -> Option<&TableDescriptor> {
        self.core
            .iter()
            .chain(self.optional.iter())
            .find(|descriptor| descriptor.name == name)
    }

    pub fn is_optional(&self, name: &str) -> bool {
        self.optional.iter().any(|descriptor| descriptor.name == name)
    }

    /// Core tables followed by optional ones when enabled, in declaration order.
    pub fn active_tables(&self, include_optional: bool) -> Vec<&TableDescriptor> {
        let optional: &[TableDescriptor] = if include_optional { &self.optional } else { &[] };
        self.core.iter().chain(optional.iter()).collect()
    }
}

fn users_predicate(tenant: TenantId) -> String {
    format!(
        "id IN (SELECT user_id FROM account_users WHERE account_id = {})",
        tenant
    )
}

fn team_members_predicate(tenant: TenantId) -> String {
    format!(
        "team_id IN (SELECT id FROM teams WHERE account_id = {})",
        tenant
    )
}

fn inbox_scoped_predicate(tenant: TenantId) -> String {
    format!(
        "inbox_id IN (SELECT id FROM inboxes WHERE account_id = {})",
        tenant
    )
}

fn taggings_predicate(tenant: TenantId) -> String {
    format!(
        "(taggable_type = 'Conversation' AND taggable_id IN \
         (SELECT id FROM conversations WHERE account_id = {tenant})) \
         OR (taggable_type = 'Contact' AND taggable_id IN \
         (SELECT id FROM contacts WHERE account_id = {tenant}))"
    )
}

fn tags_predicate(tenant: TenantId) -> String {
    format!(
        "id IN (SELECT tag_id FROM taggings WHERE {})",
        taggings_predicate(tenant)
    )
}

const CORE_TABLES: &[TableDescriptor] = &[
    TableDescriptor::foreign_key(TENANT_TABLE, "id"),
    TableDescriptor::direct("account_users"),
    TableDescriptor::derived("users", &["account_users"], users_predicate),
    TableDescriptor::direct("teams"),
    TableDescriptor::derived("team_members", &["teams"], team_members_predicate),
    TableDescriptor::direct("inboxes"),
    TableDescriptor::derived("inbox_members", &["inboxes"], inbox_scoped_predicate),
    TableDescriptor::direct("channel_web_widgets"),
    TableDescriptor::direct("channel_email"),
    TableDescriptor::direct("channel_api"),
    TableDescriptor::direct("channel_whatsapp"),
    TableDescriptor::direct("channel_facebook_pages"),
    TableDescriptor::direct("channel_telegram"),
    TableDescriptor::direct("channel_sms"),
    TableDescriptor::direct("contacts"),
    TableDescriptor::derived("contact_inboxes", &["inboxes"], inbox_scoped_predicate),
    TableDescriptor::direct("conversations"),
    TableDescriptor::direct("messages"),
    TableDescriptor::direct("attachments"),
    TableDescriptor::direct("labels"),
    TableDescriptor::derived("taggings", &["conversations", "contacts"], taggings_predicate),
    TableDescriptor::derived("tags", &["taggings"], tags_predicate),
    TableDescriptor::direct("canned_responses"),
    TableDescriptor::direct("automation_rules"),
    TableDescriptor::direct("macros"),
    TableDescriptor::direct("webhooks"),
    TableDescriptor::direct("notes"),
    TableDescriptor::direct("custom_attribute_definitions"),
    TableDescriptor::direct("custom_filters"),
    TableDescriptor::direct("csat_survey_responses"),
    TableDescriptor::direct("reporting_events"),
    TableDescriptor::direct("notifications"),
    TableDescriptor::direct("notification_settings"),
    TableDescriptor::direct("mentions"),
    TableDescriptor::direct("conversation_participants"),
    TableDescriptor::direct("portals"),
    TableDescriptor::direct("categories"),
    TableDescriptor::direct("articles"),
    TableDescriptor::direct("working_hours"),
];

// Enterprise edition tables
const OPTIONAL_TABLES: &[TableDescriptor] = &[
    TableDescriptor::direct("sla_policies"),
    TableDescriptor::direct("applied_slas"),
    TableDescriptor::direct("sla_events"),
    TableDescriptor::direct("custom_roles"),
    TableDescriptor::direct("captain_assistants"),
    TableDescriptor::direct("captain_documents"),
    TableDescriptor::direct("captain_assistant_responses"),
];

const INTEGRITY_CHECKS: &[IntegrityCheck] = &[
    IntegrityCheck {
        name: "messages_in_foreign_conversations",
        description: "messages whose conversation belongs to another tenant",
        tables: &["messages", "conversations"],
        build: |tenant| {
            format!(
                "SELECT COUNT(*) FROM messages m \
                 JOIN conversations c ON c.id = m.conversation_id \
                 WHERE m.account_id = {tenant} AND c.account_id <> {tenant}"
            )
        },
    },
    IntegrityCheck {
        name: "conversations_with_foreign_contacts",
        description: "conversations whose contact belongs to another tenant",
        tables: &["conversations", "contacts"],
        build: |tenant| {
            format!(
                "SELECT COUNT(*) FROM conversations cv \
                 JOIN contacts ct ON ct.id = cv.contact_id \
                 WHERE cv.account_id = {tenant} AND ct.account_id <> {tenant}"
            )
        },
    },
    IntegrityCheck {
        name: "conversations_with_foreign_inboxes",
        description: "conversations whose inbox belongs to another tenant",
        tables: &["conversations", "inboxes"],
        build: |tenant| {
            format!(
                "SELECT COUNT(*) FROM conversations cv \
                 JOIN inboxes i ON i.id = cv.inbox_id \
                 WHERE cv.account_id = {tenant} AND i.account_id <> {tenant}"
            )
        },
    },
    IntegrityCheck {
        name: "contact_inboxes_with_foreign_contacts",
        description: "contact_inboxes joining this tenant's inboxes to another tenant's contacts",
        tables: &["contact_inboxes", "inboxes", "contacts"],
        build: |tenant| {
            format!(
                "SELECT COUNT(*) FROM contact_inboxes ci \
                 JOIN inboxes i ON i.id = ci.inbox_id \
                 JOIN contacts c ON c.id = ci.contact_id \
                 WHERE i.account_id = {tenant} AND c.account_id <> {tenant}"
            )
        },
    },
    IntegrityCheck {
        name: "account_users_without_user",
        description: "account_users rows pointing at a missing user",
        tables: &["account_users", "users"],
        build: |tenant| {
            format!(
                "SELECT COUNT(*) FROM account_users au \
                 LEFT JOIN users u ON u.id = au.user_id \
                 WHERE au.account_id = {tenant} AND u.id IS NULL"
            )
        },
    },
];

#[cfg(test)]
mod tests {
    use super::*;

    fn tenant(id: i64) -> TenantId {
        TenantId::new(id).unwrap()
    }

    fn noop(_: TenantId) -> String {
        "true".to_string()
    }

    fn config_error(result: Result<Registry>) -> String {
        match result.unwrap_err().downcast::<PorterError>() {
            Ok(PorterError::Configuration(message)) => message,
            other => panic!("expected configuration error, got {:?}", other),
        }
    }

    #[test]
    fn test_standard_registry_is_valid() {
        let registry = Registry::standard().unwrap();
        assert_eq!(registry.all_core_tables()[0].name, TENANT_TABLE);
        assert!(!registry.all_optional_tables().is_empty());
        assert_eq!(registry.integrity_checks().len(), 5);
    }

    #[test]
    fn test_lookup_finds_core_and_optional_tables() {
        let registry = Registry::standard().unwrap();
        assert!(registry.lookup("messages").is_some());
        assert!(registry.lookup("sla_policies").is_some());
        assert!(registry.lookup("schema_migrations").is_none());
        assert!(registry.is_optional("captain_documents"));
        assert!(!registry.is_optional("contacts"));
    }

    #[test]
    fn test_active_tables_appends_optional_set_last() {
        let registry = Registry::standard().unwrap();
        let core_only = registry.active_tables(false);
        let everything = registry.active_tables(true);

        assert_eq!(core_only.len(), registry.all_core_tables().len());
        assert_eq!(
            everything.len(),
            registry.all_core_tables().len() + registry.all_optional_tables().len()
        );
        assert_eq!(everything.last().unwrap().name, "captain_assistant_responses");
    }

    #[test]
    fn test_tenant_column_follows_strategy() {
        let registry = Registry::standard().unwrap();
        assert_eq!(registry.lookup("accounts").unwrap().tenant_column(), "id");
        assert_eq!(
            registry.lookup("messages").unwrap().tenant_column(),
            "account_id"
        );
        assert_eq!(
            registry.lookup("contact_inboxes").unwrap().tenant_column(),
            "account_id"
        );
    }

    #[test]
    fn test_derived_predicates_scope_through_parent_tables() {
        let registry = Registry::standard().unwrap();
        let SelectionStrategy::DerivedPredicate { build, depends_on } =
            registry.lookup("tags").unwrap().strategy
        else {
            panic!("tags should be derived");
        };
        assert_eq!(depends_on, &["taggings"]);
        let predicate = build(tenant(42));
        assert!(predicate.contains("FROM taggings"));
        assert!(predicate.contains("FROM conversations WHERE account_id = 42"));
        assert!(predicate.contains("FROM contacts WHERE account_id = 42"));
    }

    #[test]
    fn test_rejects_duplicate_tables() {
        let message = config_error(Registry::new(
            vec![TableDescriptor::direct("contacts")],
            vec![TableDescriptor::direct("contacts")],
            vec![],
        ));
        assert!(message.contains("declared more than once"));
    }

    #[test]
    fn test_rejects_forward_or_cyclic_dependencies() {
        let message = config_error(Registry::new(
            vec![
                TableDescriptor::derived("a", &["b"], noop),
                TableDescriptor::derived("b", &["a"], noop),
            ],
            vec![],
            vec![],
        ));
        assert!(message.contains("depends on 'b'"));
    }

    #[test]
    fn test_rejects_self_dependency() {
        let message = config_error(Registry::new(
            vec![TableDescriptor::derived("loops", &["loops"], noop)],
            vec![],
            vec![],
        ));
        assert!(message.contains("loops"));
    }

    #[test]
    fn test_rejects_derived_table_without_dependencies() {
        let message = config_error(Registry::new(
            vec![TableDescriptor::derived("orphans", &[], noop)],
            vec![],
            vec![],
        ));
        assert!(message.contains("must declare"));
    }

    #[test]
    fn test_rejects_empty_selection_column() {
        let message = config_error(Registry::new(
            vec![TableDescriptor::foreign_key("accounts", "")],
            vec![],
            vec![],
        ));
        assert!(message.contains("invalid selection column"));
    }

    #[test]
    fn test_rejects_invalid_table_names() {
        let message = config_error(Registry::new(
            vec![TableDescriptor::direct("public.messages")],
            vec![],
            vec![],
        ));
        assert!(message.contains("Invalid registry table name"));
    }

    #[test]
    fn test_optional_tables_may_depend_on_core_tables() {
        let registry = Registry::new(
            vec![TableDescriptor::direct("conversations")],
            vec![TableDescriptor::derived(
                "applied_slas",
                &["conversations"],
                noop,
            )],
            vec![],
        );
        assert!(registry.is_ok());
    }

    #[test]
    fn test_rejects_integrity_checks_on_unknown_tables() {
        let message = config_error(Registry::new(
            vec![TableDescriptor::direct("messages")],
            vec![],
            vec![IntegrityCheck {
                name: "ghost",
                description: "",
                tables: &["ghosts"],
                build: noop,
            }],
        ));
        assert!(message.contains("unknown table 'ghosts'"));
    }
}
