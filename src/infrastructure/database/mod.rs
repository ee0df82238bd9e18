//! `SQLite`-backed persistence.

pub mod connection;
pub mod store;

pub use connection::DatabaseConnection;
pub use store::SqliteStore;
