//! SQLite store for the automation core. The store is the only channel
//! the workers coordinate through: timestamps and unique constraints are
//! the ordering arbiters, and the `pending → in_progress` claim is a
//! conditional update so exactly one dispatcher wins.
//!
//! All instants are persisted as RFC 3339 UTC text; opaque bags
//! (`action_params`, `config`, `metadata`, ...) as JSON text.

pub mod actions;
pub mod alerts;
pub mod devices;
pub mod readings;
pub mod schedules;
mod schema;

use std::str::FromStr;

use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;

use rc_domain::{Error, Result};

/// Handle over the connection pool. Cheap to clone; every repository
/// method lives in an `impl Store` block in its entity's module.
#[derive(Clone)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    /// Open (creating if missing) the database at `url` and run the
    /// schema bootstrap.
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(url)
            .map_err(store_err)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .foreign_keys(true)
            .busy_timeout(std::time::Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await
            .map_err(store_err)?;

        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    /// In-memory store on a single-connection pool (a `:memory:` database
    /// exists per connection, so the pool must not grow past one).
    /// Used by tests and `--dry-run` style tooling.
    pub async fn memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(store_err)?
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(store_err)?;
        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    /// Idempotent schema bootstrap: tables, indexes, uniqueness guards.
    pub async fn migrate(&self) -> Result<()> {
        schema::migrate(&self.pool).await
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Conversion helpers shared by the repository modules
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub(crate) fn store_err(e: sqlx::Error) -> Error {
    Error::Store(e.to_string())
}

/// Whether an insert failed on a UNIQUE constraint (the materialization
/// and open-event guards rely on this).
pub(crate) fn is_unique_violation(e: &sqlx::Error) -> bool {
    matches!(
        e.as_database_error().map(|d| d.kind()),
        Some(sqlx::error::ErrorKind::UniqueViolation)
    )
}

pub(crate) fn fmt_dt(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339()
}

pub(crate) fn fmt_opt_dt(dt: &Option<DateTime<Utc>>) -> Option<String> {
    dt.as_ref().map(fmt_dt)
}

pub(crate) fn parse_dt(column: &str, raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::Store(format!("{column}: bad timestamp \"{raw}\": {e}")))
}

pub(crate) fn parse_opt_dt(column: &str, raw: Option<String>) -> Result<Option<DateTime<Utc>>> {
    raw.map(|s| parse_dt(column, &s)).transpose()
}

pub(crate) fn parse_json(column: &str, raw: &str) -> Result<serde_json::Value> {
    serde_json::from_str(raw).map_err(|e| Error::Store(format!("{column}: bad JSON: {e}")))
}

pub(crate) fn parse_opt_json(
    column: &str,
    raw: Option<String>,
) -> Result<Option<serde_json::Value>> {
    raw.map(|s| parse_json(column, &s)).transpose()
}

/// Clamp a user-supplied page size into `[1, 1000]`, defaulting to 100.
pub fn clamp_limit(limit: Option<i64>) -> i64 {
    limit.unwrap_or(100).clamp(1, 1000)
}
