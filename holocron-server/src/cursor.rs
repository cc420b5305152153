//! Versioned "already seen" markers per watched source.
//!
//! The detector reads a cursor, diffs the live membership against it, and
//! only after every page of the delta was handled swaps in the next
//! version. A swap against a stale version is refused, so two scans can
//! never both advance from the same snapshot.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::debug;

use crate::state_machine::repository::{Repository, RepositoryError};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cursor {
    pub members: BTreeSet<String>,
    /// 0 until the first successful scan.
    pub version: u64,
    pub scanned_at: Option<DateTime<Utc>>,
}

/// Pages that appeared and disappeared since the cursor was taken.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CursorDelta {
    pub added: Vec<String>,
    pub removed: Vec<String>,
}

impl CursorDelta {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

impl Cursor {
    pub fn diff(&self, current: &BTreeSet<String>) -> CursorDelta {
        CursorDelta {
            added: current.difference(&self.members).cloned().collect(),
            removed: self.members.difference(current).cloned().collect(),
        }
    }

    pub fn advanced(&self, members: BTreeSet<String>, at: DateTime<Utc>) -> Cursor {
        Cursor {
            members,
            version: self.version + 1,
            scanned_at: Some(at),
        }
    }
}

/// Cursor cache over the repository. Readers get an `Arc` snapshot that a
/// concurrent advance never mutates.
pub struct CursorStore {
    repo: Arc<dyn Repository>,
    cache: RwLock<HashMap<String, Arc<Cursor>>>,
}

impl CursorStore {
    pub fn new(repo: Arc<dyn Repository>) -> Self {
        Self {
            repo,
            cache: RwLock::new(HashMap::new()),
        }
    }

    pub async fn current(&self, source: &str) -> Result<Arc<Cursor>, RepositoryError> {
        {
            let cache = self.cache.read().await;
            if let Some(cursor) = cache.get(source) {
                return Ok(cursor.clone());
            }
        }

        let loaded = Arc::new(self.repo.load_cursor(source).await?.unwrap_or_default());
        let mut cache = self.cache.write().await;
        Ok(cache
            .entry(source.to_string())
            .or_insert(loaded)
            .clone())
    }

    /// Swap in the next version. Returns false if `from` is no longer current.
    pub async fn advance(
        &self,
        source: &str,
        from: &Cursor,
        members: BTreeSet<String>,
        at: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        let next = from.advanced(members, at);
        let mut cache = self.cache.write().await;
        if !self.repo.swap_cursor(source, from.version, &next).await? {
            debug!("Cursor for {} moved underneath version {}", source, from.version);
            cache.remove(source);
            return Ok(false);
        }
        cache.insert(source.to_string(), Arc::new(next));
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state_machine::repository::InMemoryRepository;
    use chrono::TimeZone;

    fn set(items: &[&str]) -> BTreeSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_diff_reports_added_and_removed() {
        let cursor = Cursor {
            members: set(&["A", "B"]),
            version: 3,
            scanned_at: None,
        };
        let delta = cursor.diff(&set(&["B", "C"]));
        assert_eq!(delta.added, vec!["C".to_string()]);
        assert_eq!(delta.removed, vec!["A".to_string()]);
    }

    #[tokio::test]
    async fn test_advance_refuses_stale_version() {
        let store = CursorStore::new(Arc::new(InMemoryRepository::new()));
        let at = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let start = store.current("fa").await.unwrap();
        assert_eq!(start.version, 0);

        assert!(store.advance("fa", &start, set(&["A"]), at).await.unwrap());
        assert!(!store.advance("fa", &start, set(&["B"]), at).await.unwrap());

        let now = store.current("fa").await.unwrap();
        assert_eq!(now.version, 1);
        assert_eq!(now.members, set(&["A"]));
    }
}
