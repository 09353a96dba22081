// ABOUTME: PostgreSQL utilities module
// ABOUTME: Exports connection setup and the tokio-postgres tenant store

pub mod connection;
pub mod store;

pub use connection::connect;
pub use store::PgStore;
