//! In-memory implementation of the repository traits.
//!
//! Everything is lost on restart. Used by tests and the testing harness.

use std::collections::{BTreeMap, HashMap, HashSet};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use holocron_core::objection::ObjectionLevel;
use holocron_core::ranking::RankingEntry;
use holocron_core::state_machine::{Nomination, Record, RecordKey, Review};
use holocron_core::{ArticleTitle, NominationId, NominationType, UserName};

use super::{
    CursorRepository, LifecycleRepository, NotificationRepository, ObjectionLedger,
    RankingRepository, RepositoryError, StoredRecord,
};
use crate::cursor::Cursor;
use crate::notifications::{
    NewNotification, NotificationStatus, QueuedNotification,
};

#[derive(Default)]
struct QueueState {
    next_id: u64,
    entries: BTreeMap<u64, QueuedNotification>,
    /// Every dedupe key ever enqueued, pruned or not.
    dedupe_keys: HashSet<String>,
}

#[derive(Default)]
struct RankingState {
    credited: HashSet<NominationId>,
    /// Keyed by (normalized user, year).
    entries: BTreeMap<(String, i32), RankingEntry>,
    pending: u64,
}

#[derive(Default)]
pub struct InMemoryRepository {
    records: RwLock<HashMap<RecordKey, StoredRecord>>,
    cursors: RwLock<HashMap<String, Cursor>>,
    queue: RwLock<QueueState>,
    rankings: RwLock<RankingState>,
    pings: RwLock<HashMap<(String, String), ObjectionLevel>>,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LifecycleRepository for InMemoryRepository {
    async fn get(&self, key: &RecordKey) -> Result<Option<StoredRecord>, RepositoryError> {
        Ok(self.records.read().await.get(key).cloned())
    }

    async fn put(&self, stored: &StoredRecord) -> Result<(), RepositoryError> {
        self.records
            .write()
            .await
            .insert(stored.record.key(), stored.clone());
        Ok(())
    }

    async fn clear_pending_effects(&self, key: &RecordKey) -> Result<(), RepositoryError> {
        if let Some(stored) = self.records.write().await.get_mut(key) {
            stored.pending_effects.clear();
        }
        Ok(())
    }

    async fn nominations_for(
        &self,
        article: &ArticleTitle,
        kind: NominationType,
    ) -> Result<Vec<Nomination>, RepositoryError> {
        let records = self.records.read().await;
        let mut found: Vec<Nomination> = records
            .values()
            .filter_map(|s| s.record.as_nomination())
            .filter(|n| &n.id.article == article && n.id.kind == kind)
            .cloned()
            .collect();
        found.sort_by_key(|n| n.id.sequence);
        Ok(found)
    }

    async fn open_nominations(&self) -> Result<Vec<Nomination>, RepositoryError> {
        let records = self.records.read().await;
        let mut open: Vec<Nomination> = records
            .values()
            .filter_map(|s| s.record.as_nomination())
            .filter(|n| n.is_active())
            .cloned()
            .collect();
        open.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(open)
    }

    async fn reviews_for(
        &self,
        article: &ArticleTitle,
        kind: NominationType,
    ) -> Result<Vec<Review>, RepositoryError> {
        let records = self.records.read().await;
        let mut found: Vec<Review> = records
            .values()
            .filter_map(|s| s.record.as_review())
            .filter(|r| &r.id.article == article && r.id.kind == kind)
            .cloned()
            .collect();
        found.sort_by_key(|r| r.id.sequence);
        Ok(found)
    }

    async fn open_reviews(&self) -> Result<Vec<Review>, RepositoryError> {
        let records = self.records.read().await;
        let mut open: Vec<Review> = records
            .values()
            .filter_map(|s| s.record.as_review())
            .filter(|r| r.is_open())
            .cloned()
            .collect();
        open.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(open)
    }

    async fn with_pending_effects(&self) -> Result<Vec<StoredRecord>, RepositoryError> {
        let records = self.records.read().await;
        Ok(records
            .values()
            .filter(|s| !s.pending_effects.is_empty())
            .cloned()
            .collect())
    }

    async fn status_counts(&self) -> Result<BTreeMap<String, u64>, RepositoryError> {
        let records = self.records.read().await;
        let mut counts = BTreeMap::new();
        for stored in records.values() {
            let label = match &stored.record {
                Record::Nomination(n) => format!("nomination {}", n.status.name()),
                Record::Review(r) => format!("review {}", r.status.name()),
            };
            *counts.entry(label).or_insert(0) += 1;
        }
        Ok(counts)
    }
}

#[async_trait]
impl CursorRepository for InMemoryRepository {
    async fn load_cursor(&self, source: &str) -> Result<Option<Cursor>, RepositoryError> {
        Ok(self.cursors.read().await.get(source).cloned())
    }

    async fn swap_cursor(
        &self,
        source: &str,
        expected_version: u64,
        next: &Cursor,
    ) -> Result<bool, RepositoryError> {
        let mut cursors = self.cursors.write().await;
        let current = cursors.get(source).map(|c| c.version).unwrap_or(0);
        if current != expected_version {
            return Ok(false);
        }
        cursors.insert(source.to_string(), next.clone());
        Ok(true)
    }
}

#[async_trait]
impl NotificationRepository for InMemoryRepository {
    async fn enqueue(&self, entry: NewNotification) -> Result<Option<u64>, RepositoryError> {
        let mut queue = self.queue.write().await;
        if let Some(key) = &entry.dedupe_key {
            if !queue.dedupe_keys.insert(key.clone()) {
                return Ok(None);
            }
        }
        queue.next_id += 1;
        let id = queue.next_id;
        queue.entries.insert(
            id,
            QueuedNotification {
                id,
                payload: entry.payload,
                dispatch_at: entry.dispatch_at,
                created_at: entry.created_at,
                dedupe_key: entry.dedupe_key,
                attempts: 0,
                status: NotificationStatus::Pending,
                stale: false,
                last_error: None,
            },
        );
        Ok(Some(id))
    }

    async fn due(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<QueuedNotification>, RepositoryError> {
        let queue = self.queue.read().await;
        let mut due: Vec<QueuedNotification> = queue
            .entries
            .values()
            .filter(|e| e.status == NotificationStatus::Pending && e.dispatch_at <= now)
            .cloned()
            .collect();
        due.sort_by_key(|e| (e.dispatch_at, e.id));
        due.truncate(limit);
        Ok(due)
    }

    async fn next_dispatch_at(&self) -> Result<Option<DateTime<Utc>>, RepositoryError> {
        let queue = self.queue.read().await;
        Ok(queue
            .entries
            .values()
            .filter(|e| e.status == NotificationStatus::Pending)
            .map(|e| e.dispatch_at)
            .min())
    }

    async fn mark_delivered(&self, id: u64, _at: DateTime<Utc>) -> Result<(), RepositoryError> {
        let mut queue = self.queue.write().await;
        if let Some(entry) = queue.entries.get_mut(&id) {
            entry.status = NotificationStatus::Delivered;
            entry.attempts += 1;
        }
        Ok(())
    }

    async fn reschedule(
        &self,
        id: u64,
        attempts: u32,
        dispatch_at: DateTime<Utc>,
        error: &str,
    ) -> Result<(), RepositoryError> {
        let mut queue = self.queue.write().await;
        if let Some(entry) = queue.entries.get_mut(&id) {
            entry.attempts = attempts;
            entry.dispatch_at = dispatch_at;
            entry.last_error = Some(error.to_string());
        }
        Ok(())
    }

    async fn mark_failed(&self, id: u64, attempts: u32, error: &str) -> Result<(), RepositoryError> {
        let mut queue = self.queue.write().await;
        if let Some(entry) = queue.entries.get_mut(&id) {
            entry.status = NotificationStatus::Failed;
            entry.attempts = attempts;
            entry.last_error = Some(error.to_string());
        }
        Ok(())
    }

    async fn mark_stale_before(&self, cutoff: DateTime<Utc>) -> Result<usize, RepositoryError> {
        let mut queue = self.queue.write().await;
        let mut marked = 0;
        for entry in queue.entries.values_mut() {
            if entry.status == NotificationStatus::Pending && entry.dispatch_at < cutoff {
                entry.stale = true;
                marked += 1;
            }
        }
        Ok(marked)
    }

    async fn prune_delivered(&self, before: DateTime<Utc>) -> Result<usize, RepositoryError> {
        let mut queue = self.queue.write().await;
        let before_len = queue.entries.len();
        queue
            .entries
            .retain(|_, e| !(e.status == NotificationStatus::Delivered && e.dispatch_at < before));
        Ok(before_len - queue.entries.len())
    }

    async fn pending_count(&self) -> Result<usize, RepositoryError> {
        let queue = self.queue.read().await;
        Ok(queue
            .entries
            .values()
            .filter(|e| e.status == NotificationStatus::Pending)
            .count())
    }
}

#[async_trait]
impl RankingRepository for InMemoryRepository {
    async fn credit(
        &self,
        nomination: &NominationId,
        user: &UserName,
        year: i32,
    ) -> Result<Option<u64>, RepositoryError> {
        let mut rankings = self.rankings.write().await;
        if !rankings.credited.insert(nomination.clone()) {
            return Ok(None);
        }
        rankings
            .entries
            .entry((user.normalized(), year))
            .or_insert_with(|| RankingEntry::new(user.clone(), year))
            .increment(nomination.kind);
        rankings.pending += 1;
        Ok(Some(rankings.pending))
    }

    async fn ranking_entries(&self) -> Result<Vec<RankingEntry>, RepositoryError> {
        Ok(self.rankings.read().await.entries.values().cloned().collect())
    }

    async fn pending_since_publish(&self) -> Result<u64, RepositoryError> {
        Ok(self.rankings.read().await.pending)
    }

    async fn acknowledge_publish(&self, covered: u64) -> Result<(), RepositoryError> {
        let mut rankings = self.rankings.write().await;
        rankings.pending = rankings.pending.saturating_sub(covered);
        Ok(())
    }
}

#[async_trait]
impl ObjectionLedger for InMemoryRepository {
    async fn pinged_levels(
        &self,
        page: &str,
    ) -> Result<HashMap<String, ObjectionLevel>, RepositoryError> {
        let pings = self.pings.read().await;
        Ok(pings
            .iter()
            .filter(|((p, _), _)| p == page)
            .map(|((_, fingerprint), level)| (fingerprint.clone(), *level))
            .collect())
    }

    async fn record_ping(
        &self,
        page: &str,
        fingerprint: &str,
        level: ObjectionLevel,
        _at: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        let mut pings = self.pings.write().await;
        let entry = pings
            .entry((page.to_string(), fingerprint.to_string()))
            .or_insert(level);
        *entry = (*entry).max(level);
        Ok(())
    }

    async fn forget_pings(&self, page: &str, fingerprints: &[String]) -> Result<(), RepositoryError> {
        let mut pings = self.pings.write().await;
        for fingerprint in fingerprints {
            pings.remove(&(page.to_string(), fingerprint.clone()));
        }
        Ok(())
    }
}
