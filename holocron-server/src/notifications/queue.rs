//! Producer side of the notification queue.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::Notify;
use tracing::{debug, info};

use super::{DispatchDelay, NewNotification, NotificationPayload};
use crate::state_machine::repository::{Repository, RepositoryError};

pub struct NotificationQueue {
    repo: Arc<dyn Repository>,
    wake: Notify,
}

impl NotificationQueue {
    pub fn new(repo: Arc<dyn Repository>) -> Self {
        Self {
            repo,
            wake: Notify::new(),
        }
    }

    pub fn repository(&self) -> &Arc<dyn Repository> {
        &self.repo
    }

    /// Resolve the delay to an absolute time and persist the entry. Returns
    /// `None` when an entry with the same dedupe key was already queued.
    pub async fn enqueue(
        &self,
        payload: NotificationPayload,
        delay: DispatchDelay,
        dedupe_key: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<Option<u64>, RepositoryError> {
        let dispatch_at = {
            let mut rng = rand::thread_rng();
            delay.resolve(now, &mut rng)
        };
        let kind = payload.kind();
        let id = self
            .repo
            .enqueue(NewNotification {
                payload,
                dispatch_at,
                created_at: now,
                dedupe_key: dedupe_key.clone(),
            })
            .await?;

        match id {
            Some(id) => {
                debug!("Queued {} notification #{} for {}", kind, id, dispatch_at);
                self.wake.notify_one();
            }
            None => debug!(
                "Skipped {} notification already queued under {:?}",
                kind, dedupe_key
            ),
        }
        Ok(id)
    }

    /// Entries that fell more than `grace` behind while the process was
    /// down get one immediate attempt and no retries.
    pub async fn apply_restart_grace(
        &self,
        now: DateTime<Utc>,
        grace: chrono::Duration,
    ) -> Result<usize, RepositoryError> {
        let marked = self.repo.mark_stale_before(now - grace).await?;
        if marked > 0 {
            info!("{} queued notifications are overdue past the restart grace", marked);
        }
        Ok(marked)
    }

    /// Sleep until the nearest dispatch time, the poll interval, or a new
    /// enqueue, whichever comes first.
    pub async fn wait_for_work(&self, poll_interval: Duration) {
        let until_next = match self.repo.next_dispatch_at().await {
            Ok(Some(at)) => (at - Utc::now()).to_std().unwrap_or(Duration::ZERO),
            _ => poll_interval,
        };
        let sleep_for = until_next.min(poll_interval);
        tokio::select! {
            _ = tokio::time::sleep(sleep_for) => {}
            _ = self.wake.notified() => {}
        }
    }

    pub async fn pending_count(&self) -> Result<usize, RepositoryError> {
        self.repo.pending_count().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state_machine::repository::{InMemoryRepository, NotificationRepository};
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 4, 9, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn test_enqueue_fixes_dispatch_time() {
        let repo = Arc::new(InMemoryRepository::new());
        let queue = NotificationQueue::new(repo.clone());
        queue
            .enqueue(
                NotificationPayload::chat("ops", "hi"),
                DispatchDelay::Fixed(chrono::Duration::minutes(30)),
                None,
                now(),
            )
            .await
            .unwrap();

        assert!(repo.due(now(), 10).await.unwrap().is_empty());
        let due = repo.due(now() + chrono::Duration::minutes(30), 10).await.unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].created_at, now());
    }

    #[tokio::test]
    async fn test_enqueue_dedupes() {
        let queue = NotificationQueue::new(Arc::new(InMemoryRepository::new()));
        let first = queue
            .enqueue(
                NotificationPayload::chat("ops", "hi"),
                DispatchDelay::Immediate,
                Some("k".into()),
                now(),
            )
            .await
            .unwrap();
        let second = queue
            .enqueue(
                NotificationPayload::chat("ops", "hi"),
                DispatchDelay::Immediate,
                Some("k".into()),
                now(),
            )
            .await
            .unwrap();
        assert!(first.is_some());
        assert!(second.is_none());
        assert_eq!(queue.pending_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_wait_for_work_wakes_on_enqueue() {
        let queue = Arc::new(NotificationQueue::new(Arc::new(InMemoryRepository::new())));
        let waiter = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.wait_for_work(Duration::from_secs(3600)).await })
        };
        tokio::task::yield_now().await;
        queue
            .enqueue(
                NotificationPayload::chat("ops", "hi"),
                DispatchDelay::Fixed(chrono::Duration::hours(1)),
                None,
                Utc::now(),
            )
            .await
            .unwrap();
        tokio::time::timeout(Duration::from_secs(5), waiter)
            .await
            .expect("waiter should wake")
            .unwrap();
    }
}
