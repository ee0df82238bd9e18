//! Sentinel - security event ingestion core
//!
//! The connector runtime of a security operations platform:
//! - Connector lifecycle, registry, and auto-quarantine
//! - Scheduling for pull sources, persistent listeners for push sources
//! - Bounded priority job queue with concurrent workers and retry/backoff
//! - Event pipeline: validation, typed parsing, enrichment, alert persistence
//! - Realtime metrics collection and observer fan-out

pub mod bootstrap;
pub mod connectors;
pub mod domain;
pub mod infrastructure;
pub mod services;

// Re-export key types for convenience
pub use domain::models::config::Config;
pub use infrastructure::database::DatabaseConnection;
