// ABOUTME: Turns a registry entry and tenant id into a row filter predicate
// ABOUTME: Pure dispatch over the selection strategy

use crate::registry::{SelectionStrategy, TableDescriptor};
use crate::tenant::TenantId;
use crate::utils::quote_ident;

/// Boolean SQL predicate selecting `tenant`'s rows from `descriptor`'s table.
///
/// Column strategies produce `"column" = <id>`; derived strategies return
/// their builder's output unchanged.
pub fn resolve_predicate(descriptor: &TableDescriptor, tenant: TenantId) -> String {
    match descriptor.strategy {
        SelectionStrategy::DirectColumn(column) | SelectionStrategy::ForeignKeyColumn(column) => {
            format!("{} = {}", quote_ident(column), tenant)
        }
        SelectionStrategy::DerivedPredicate { build, .. } => build(tenant),
    }
}
