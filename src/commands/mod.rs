// ABOUTME: Command implementations for the tenant porter CLI
// ABOUTME: Exports export, import, list-tenants, and validate commands

pub mod export;
pub mod import;
pub mod list_tenants;
pub mod validate;

pub use export::{export, ExportArgs};
pub use import::{import, ImportArgs};
pub use list_tenants::list_tenants;
pub use validate::{validate, ValidateArgs};
