//! `SQLite` connection pool manager.
//!
//! WAL mode for concurrent readers, NORMAL synchronous, foreign keys on,
//! and a busy timeout to ride out lock contention.

use anyhow::{Context, Result};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous,
};
use std::str::FromStr;
use std::time::Duration;

/// Database connection pool manager.
pub struct DatabaseConnection {
    pool: SqlitePool,
}

impl DatabaseConnection {
    /// Create a new connection pool.
    ///
    /// `database_url` is a `SQLite` URL, e.g. `sqlite:.sentinel/sentinel.db`
    /// or `sqlite::memory:`.
    pub async fn new(database_url: &str) -> Result<Self> {
        Self::with_max_connections(database_url, 10).await
    }

    pub async fn with_max_connections(database_url: &str, max_connections: u32) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)
            .context("invalid database URL")?
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(5))
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .min_connections(1)
            .max_connections(max_connections)
            .idle_timeout(Duration::from_secs(30))
            .max_lifetime(Duration::from_secs(30 * 60))
            .acquire_timeout(Duration::from_secs(10))
            .connect_with(options)
            .await
            .context("failed to connect to database")?;

        Ok(Self { pool })
    }

    /// Create all tables and indexes.
    pub async fn migrate(&self) -> Result<()> {
        for statement in MIGRATIONS {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .with_context(|| format!("migration failed: {statement}"))?;
        }
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

const MIGRATIONS: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS connectors (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        organization_id TEXT NOT NULL,
        name TEXT NOT NULL,
        vendor TEXT NOT NULL DEFAULT '',
        type TEXT NOT NULL,
        is_active INTEGER NOT NULL DEFAULT 1,
        status TEXT NOT NULL DEFAULT 'paused',
        configuration TEXT NOT NULL DEFAULT '{}',
        last_successful_connection TEXT,
        next_run TEXT,
        error_count INTEGER NOT NULL DEFAULT 0,
        last_error TEXT,
        cursor_state TEXT NOT NULL DEFAULT '{}',
        metrics TEXT
    )",
    "CREATE INDEX IF NOT EXISTS idx_connectors_org ON connectors(organization_id)",
    "CREATE INDEX IF NOT EXISTS idx_connectors_type ON connectors(type)",
    "CREATE TABLE IF NOT EXISTS alerts (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        title TEXT NOT NULL,
        description TEXT NOT NULL,
        severity TEXT NOT NULL,
        source TEXT NOT NULL,
        source_ip TEXT,
        destination_ip TEXT,
        timestamp TEXT NOT NULL,
        status TEXT NOT NULL DEFAULT 'new',
        organization_id TEXT,
        metadata TEXT NOT NULL DEFAULT '{}'
    )",
    "CREATE INDEX IF NOT EXISTS idx_alerts_severity ON alerts(severity)",
    "CREATE INDEX IF NOT EXISTS idx_alerts_org ON alerts(organization_id)",
    "CREATE TABLE IF NOT EXISTS threat_intel (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        indicator TEXT NOT NULL,
        indicator_type TEXT NOT NULL,
        threat_type TEXT NOT NULL,
        confidence REAL NOT NULL,
        source TEXT NOT NULL,
        first_seen TEXT NOT NULL,
        organization_id TEXT
    )",
    "CREATE TABLE IF NOT EXISTS agents (
        agent_id TEXT PRIMARY KEY,
        connector_id INTEGER NOT NULL,
        organization_id TEXT NOT NULL,
        hostname TEXT NOT NULL,
        ip_address TEXT NOT NULL,
        operating_system TEXT NOT NULL,
        version TEXT NOT NULL,
        capabilities TEXT NOT NULL DEFAULT '[]',
        system_info TEXT,
        status TEXT NOT NULL DEFAULT 'active',
        registered_at TEXT NOT NULL,
        last_heartbeat TEXT,
        last_metrics TEXT
    )",
    "CREATE INDEX IF NOT EXISTS idx_agents_connector ON agents(connector_id)",
];
