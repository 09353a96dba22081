// ABOUTME: Library module for postgres-tenant-porter
// ABOUTME: Exports all core functionality for use in binary and tests

pub mod artifact;
pub mod backup;
pub mod commands;
pub mod config;
pub mod error;
pub mod extract;
pub mod filters;
pub mod postgres;
pub mod registry;
pub mod replay;
pub mod selector;
pub mod serializer;
pub mod store;
pub mod tenant;
pub mod utils;
pub mod validate;

pub use error::PorterError;
