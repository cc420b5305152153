//! Repository abstraction for engine persistence.
//!
//! Each concern gets its own trait so the store, detector, queue and
//! aggregator only see what they touch. Both backends implement all of
//! them: `InMemoryRepository` for tests, `SqliteRepository` for the binary.

mod memory;
pub mod sqlite;

pub use memory::InMemoryRepository;
pub use sqlite::SqliteRepository;

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use holocron_core::objection::ObjectionLevel;
use holocron_core::ranking::RankingEntry;
use holocron_core::state_machine::{Effect, Nomination, Record, RecordKey, Review};
use holocron_core::{ArticleTitle, NominationId, NominationType, UserName};

use crate::cursor::Cursor;
use crate::notifications::{NewNotification, QueuedNotification};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RepositoryError {
    #[error("storage error during {operation}: {message}")]
    Storage { operation: String, message: String },

    #[error("corrupt {what} in storage")]
    Corruption { what: String },
}

impl RepositoryError {
    pub fn storage(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Storage {
            operation: operation.into(),
            message: message.into(),
        }
    }

    pub fn corruption(what: impl Into<String>) -> Self {
        Self::Corruption { what: what.into() }
    }
}

/// A lifecycle record plus the post-commit effects not yet run for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredRecord {
    pub record: Record,
    pub pending_effects: Vec<Effect>,
}

impl StoredRecord {
    pub fn new(record: Record) -> Self {
        Self {
            record,
            pending_effects: vec![],
        }
    }
}

#[async_trait]
pub trait LifecycleRepository: Send + Sync {
    async fn get(&self, key: &RecordKey) -> Result<Option<StoredRecord>, RepositoryError>;

    /// Upsert the record and its outbox in one write.
    async fn put(&self, stored: &StoredRecord) -> Result<(), RepositoryError>;

    async fn clear_pending_effects(&self, key: &RecordKey) -> Result<(), RepositoryError>;

    /// Every nomination of one article and type, oldest sequence first.
    async fn nominations_for(
        &self,
        article: &ArticleTitle,
        kind: NominationType,
    ) -> Result<Vec<Nomination>, RepositoryError>;

    async fn open_nominations(&self) -> Result<Vec<Nomination>, RepositoryError>;

    /// Every review of one article and type, oldest sequence first.
    async fn reviews_for(
        &self,
        article: &ArticleTitle,
        kind: NominationType,
    ) -> Result<Vec<Review>, RepositoryError>;

    async fn open_reviews(&self) -> Result<Vec<Review>, RepositoryError>;

    /// Records whose outbox was not emptied before the last shutdown.
    async fn with_pending_effects(&self) -> Result<Vec<StoredRecord>, RepositoryError>;

    /// Number of records per status name.
    async fn status_counts(&self) -> Result<BTreeMap<String, u64>, RepositoryError>;
}

#[async_trait]
pub trait CursorRepository: Send + Sync {
    async fn load_cursor(&self, source: &str) -> Result<Option<Cursor>, RepositoryError>;

    /// Store `next` only if the stored version still equals `expected_version`
    /// (0 meaning "no cursor yet"). Returns whether the swap happened.
    async fn swap_cursor(
        &self,
        source: &str,
        expected_version: u64,
        next: &Cursor,
    ) -> Result<bool, RepositoryError>;
}

#[async_trait]
pub trait NotificationRepository: Send + Sync {
    /// Returns the new id, or `None` when the dedupe key is already queued.
    async fn enqueue(&self, entry: NewNotification) -> Result<Option<u64>, RepositoryError>;

    /// Pending entries due at `now`, by dispatch time then id.
    async fn due(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<QueuedNotification>, RepositoryError>;

    async fn next_dispatch_at(&self) -> Result<Option<DateTime<Utc>>, RepositoryError>;

    async fn mark_delivered(&self, id: u64, at: DateTime<Utc>) -> Result<(), RepositoryError>;

    async fn reschedule(
        &self,
        id: u64,
        attempts: u32,
        dispatch_at: DateTime<Utc>,
        error: &str,
    ) -> Result<(), RepositoryError>;

    async fn mark_failed(&self, id: u64, attempts: u32, error: &str) -> Result<(), RepositoryError>;

    /// Flag pending entries due before `cutoff` as stale: they get one
    /// immediate attempt and no retries.
    async fn mark_stale_before(&self, cutoff: DateTime<Utc>) -> Result<usize, RepositoryError>;

    async fn prune_delivered(&self, before: DateTime<Utc>) -> Result<usize, RepositoryError>;

    async fn pending_count(&self) -> Result<usize, RepositoryError>;
}

#[async_trait]
pub trait RankingRepository: Send + Sync {
    /// Credit a successful nomination to its nominator. Returns the number of
    /// credits since the last publish, or `None` when this nomination was
    /// already credited.
    async fn credit(
        &self,
        nomination: &NominationId,
        user: &UserName,
        year: i32,
    ) -> Result<Option<u64>, RepositoryError>;

    async fn ranking_entries(&self) -> Result<Vec<RankingEntry>, RepositoryError>;

    async fn pending_since_publish(&self) -> Result<u64, RepositoryError>;

    /// Subtract the credits a successful publish covered.
    async fn acknowledge_publish(&self, covered: u64) -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait ObjectionLedger: Send + Sync {
    /// Highest level pinged per objection fingerprint on a page.
    async fn pinged_levels(
        &self,
        page: &str,
    ) -> Result<HashMap<String, ObjectionLevel>, RepositoryError>;

    async fn record_ping(
        &self,
        page: &str,
        fingerprint: &str,
        level: ObjectionLevel,
        at: DateTime<Utc>,
    ) -> Result<(), RepositoryError>;

    async fn forget_pings(&self, page: &str, fingerprints: &[String]) -> Result<(), RepositoryError>;
}

/// Every repository concern behind one object.
pub trait Repository:
    LifecycleRepository + CursorRepository + NotificationRepository + RankingRepository + ObjectionLedger
{
}

impl<T> Repository for T where
    T: LifecycleRepository
        + CursorRepository
        + NotificationRepository
        + RankingRepository
        + ObjectionLedger
{
}
