//! SQLite implementation of the repository traits.
//!
//! This provides persistent storage that survives service restarts.
//!
//! # Schema Versioning
//!
//! The database has a `schema_version` table that tracks the schema version.
//! When the schema needs to change, increment `CURRENT_SCHEMA_VERSION` and add
//! a migration in `run_migrations()`. Migrations run sequentially from the
//! current version to the target version.
//!
//! # Forward Compatibility
//!
//! Records and queue payloads are stored as JSON. New fields on `Nomination`,
//! `Review` or `NotificationPayload` need `#[serde(default)]` so rows written
//! by an older binary still load.

mod cursors;
mod lifecycle;
mod pings;
mod queue;
mod rankings;


use std::path::Path;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use tracing::warn;

use super::RepositoryError;

/// Current schema version. Increment this when making schema changes and add
/// corresponding migration logic in `run_migrations()`.
const CURRENT_SCHEMA_VERSION: i64 = 2;

/// SQLite-backed repository.
///
/// All calls go through `tokio::task::spawn_blocking` so synchronous rusqlite
/// work never blocks the async runtime.
pub struct SqliteRepository {
    pub(crate) conn: Arc<Mutex<Connection>>,
}

impl SqliteRepository {
    /// Open (or create) the database at `path` and bring its schema up to date.
    ///
    /// # Durability
    ///
    /// - `journal_mode = WAL`, verified after setting it
    /// - `synchronous = FULL`
    /// - `busy_timeout = 5000ms`
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, RepositoryError> {
        let path_ref = path.as_ref();
        let path_str = path_ref.to_string_lossy();
        let is_in_memory = path_str == ":memory:";

        if !is_in_memory && !path_str.is_empty() {
            if let Some(parent) = path_ref.parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent).map_err(|e| {
                        RepositoryError::storage(
                            "create database directory",
                            format!("{}: {}", parent.display(), e),
                        )
                    })?;
                }
            }
        }

        let conn = Connection::open(path_ref)
            .map_err(|e| RepositoryError::storage("open database", e.to_string()))?;

        // SQLite silently keeps DELETE mode on filesystems without shared memory
        let journal_mode: String = conn
            .query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))
            .map_err(|e| RepositoryError::storage("set journal_mode", e.to_string()))?;
        let journal_mode_ok = journal_mode.eq_ignore_ascii_case("wal")
            || (is_in_memory && journal_mode.eq_ignore_ascii_case("memory"));
        if !journal_mode_ok {
            return Err(RepositoryError::storage(
                "configure journal_mode",
                format!(
                    "SQLite returned '{}' instead of 'wal'; the state directory must be on a \
                     filesystem that supports shared memory",
                    journal_mode
                ),
            ));
        }

        conn.execute_batch(
            r#"
            PRAGMA synchronous = FULL;
            PRAGMA busy_timeout = 5000;
            "#,
        )
        .map_err(|e| RepositoryError::storage("configure pragmas", e.to_string()))?;

        #[cfg(unix)]
        if !is_in_memory && !path_str.is_empty() {
            use std::os::unix::fs::PermissionsExt;
            if let Err(e) = std::fs::set_permissions(path_ref, std::fs::Permissions::from_mode(0o600)) {
                warn!("Failed to set restrictive permissions on database file: {}", e);
            }
        }

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS schema_version (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                version INTEGER NOT NULL
            );
            "#,
        )
        .map_err(|e| RepositoryError::storage("create schema_version table", e.to_string()))?;

        let current_version: i64 = conn
            .query_row("SELECT version FROM schema_version WHERE id = 1", [], |row| {
                row.get(0)
            })
            .optional()
            .map_err(|e| RepositoryError::storage("get schema version", e.to_string()))?
            .unwrap_or(0);

        Self::run_migrations(&conn, current_version)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run migrations from `from_version` to `CURRENT_SCHEMA_VERSION`.
    fn run_migrations(conn: &Connection, from_version: i64) -> Result<(), RepositoryError> {
        if from_version > CURRENT_SCHEMA_VERSION {
            return Err(RepositoryError::storage(
                "schema version",
                format!(
                    "Database schema version {} is newer than supported version {}. \
                     Please upgrade the application.",
                    from_version, CURRENT_SCHEMA_VERSION
                ),
            ));
        }

        if from_version == CURRENT_SCHEMA_VERSION {
            return Ok(());
        }

        if from_version < 1 {
            conn.execute_batch(
                r#"
                CREATE TABLE IF NOT EXISTS nominations (
                    article TEXT NOT NULL,
                    kind TEXT NOT NULL,
                    sequence INTEGER NOT NULL,
                    status TEXT NOT NULL,
                    is_open INTEGER NOT NULL,
                    record_json TEXT NOT NULL,
                    pending_effects_json TEXT NOT NULL DEFAULT '[]',
                    has_pending_effects INTEGER NOT NULL DEFAULT 0,
                    PRIMARY KEY (article, kind, sequence)
                );
                CREATE INDEX IF NOT EXISTS idx_nominations_open
                    ON nominations(is_open) WHERE is_open = 1;
                CREATE INDEX IF NOT EXISTS idx_nominations_pending
                    ON nominations(has_pending_effects) WHERE has_pending_effects = 1;

                CREATE TABLE IF NOT EXISTS reviews (
                    article TEXT NOT NULL,
                    kind TEXT NOT NULL,
                    status TEXT NOT NULL,
                    is_open INTEGER NOT NULL,
                    record_json TEXT NOT NULL,
                    pending_effects_json TEXT NOT NULL DEFAULT '[]',
                    has_pending_effects INTEGER NOT NULL DEFAULT 0,
                    PRIMARY KEY (article, kind)
                );

                CREATE TABLE IF NOT EXISTS cursors (
                    source TEXT PRIMARY KEY,
                    version INTEGER NOT NULL,
                    members_json TEXT NOT NULL,
                    scanned_at INTEGER
                );

                CREATE TABLE IF NOT EXISTS notification_queue (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    payload_json TEXT NOT NULL,
                    dispatch_at INTEGER NOT NULL,
                    created_at INTEGER NOT NULL,
                    dedupe_key TEXT UNIQUE,
                    attempts INTEGER NOT NULL DEFAULT 0,
                    status TEXT NOT NULL DEFAULT 'pending',
                    stale INTEGER NOT NULL DEFAULT 0,
                    last_error TEXT,
                    delivered_at INTEGER
                );
                CREATE INDEX IF NOT EXISTS idx_queue_due
                    ON notification_queue(status, dispatch_at, id);

                CREATE TABLE IF NOT EXISTS ranking_entries (
                    user_key TEXT NOT NULL,
                    year INTEGER NOT NULL,
                    user TEXT NOT NULL,
                    featured INTEGER NOT NULL DEFAULT 0,
                    good INTEGER NOT NULL DEFAULT 0,
                    comprehensive INTEGER NOT NULL DEFAULT 0,
                    PRIMARY KEY (user_key, year)
                );
                CREATE TABLE IF NOT EXISTS ranking_credits (
                    nomination TEXT PRIMARY KEY,
                    user TEXT NOT NULL,
                    year INTEGER NOT NULL
                );
                CREATE TABLE IF NOT EXISTS ranking_meta (
                    id INTEGER PRIMARY KEY CHECK (id = 1),
                    pending INTEGER NOT NULL
                );
                INSERT OR IGNORE INTO ranking_meta (id, pending) VALUES (1, 0);

                CREATE TABLE IF NOT EXISTS objection_pings (
                    page TEXT NOT NULL,
                    fingerprint TEXT NOT NULL,
                    level TEXT NOT NULL,
                    pinged_at INTEGER NOT NULL,
                    PRIMARY KEY (page, fingerprint)
                );
                "#,
            )
            .map_err(|e| RepositoryError::storage("migration v1", e.to_string()))?;
        }

        if from_version < 2 {
            // v2: reviews are numbered per article, and dedupe keys outlive
            // the queue rows that carried them
            conn.execute_batch(
                r#"
                BEGIN;
                CREATE TABLE reviews_v2 (
                    article TEXT NOT NULL,
                    kind TEXT NOT NULL,
                    sequence INTEGER NOT NULL,
                    status TEXT NOT NULL,
                    is_open INTEGER NOT NULL,
                    record_json TEXT NOT NULL,
                    pending_effects_json TEXT NOT NULL DEFAULT '[]',
                    has_pending_effects INTEGER NOT NULL DEFAULT 0,
                    PRIMARY KEY (article, kind, sequence)
                );
                INSERT INTO reviews_v2
                    SELECT article, kind, 1, status, is_open, record_json,
                           pending_effects_json, has_pending_effects
                    FROM reviews;
                DROP TABLE reviews;
                ALTER TABLE reviews_v2 RENAME TO reviews;
                CREATE INDEX IF NOT EXISTS idx_reviews_open
                    ON reviews(is_open) WHERE is_open = 1;

                CREATE TABLE IF NOT EXISTS notification_dedupe (
                    dedupe_key TEXT PRIMARY KEY,
                    created_at INTEGER NOT NULL
                );
                INSERT OR IGNORE INTO notification_dedupe (dedupe_key, created_at)
                    SELECT dedupe_key, created_at FROM notification_queue
                    WHERE dedupe_key IS NOT NULL;
                COMMIT;
                "#,
            )
            .map_err(|e| RepositoryError::storage("migration v2", e.to_string()))?;
        }

        conn.execute(
            "INSERT OR REPLACE INTO schema_version (id, version) VALUES (1, ?1)",
            params![CURRENT_SCHEMA_VERSION],
        )
        .map_err(|e| RepositoryError::storage("update schema version", e.to_string()))?;

        Ok(())
    }

    /// Create a new in-memory SQLite repository (for testing).
    #[cfg(test)]
    pub fn new_in_memory() -> Result<Self, RepositoryError> {
        Self::new(":memory:")
    }

    /// Run `f` against the connection on the blocking pool.
    pub(super) async fn with_conn<T, F>(
        &self,
        operation: &'static str,
        f: F,
    ) -> Result<T, RepositoryError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T, RepositoryError> + Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = conn
                .lock()
                .map_err(|_| RepositoryError::storage(operation, "connection lock poisoned"))?;
            f(&mut conn)
        })
        .await
        .map_err(|e| RepositoryError::storage(operation, e.to_string()))?
    }
}

pub(super) fn to_millis(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

pub(super) fn from_millis(millis: i64, what: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::from_timestamp_millis(millis).ok_or_else(|| RepositoryError::corruption(what))
}

pub(super) fn sql_error(operation: &'static str) -> impl Fn(rusqlite::Error) -> RepositoryError {
    move |e| RepositoryError::storage(operation, e.to_string())
}
