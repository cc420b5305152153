//! Startup reconciliation for crash recovery.
//!
//! A record whose post-commit effects had not finished when the previous
//! instance stopped still carries them in its outbox. Every effect is
//! deduplicated downstream (queue dedupe keys, ranking credit per
//! nomination, idempotent page transforms), so replaying the outbox is
//! safe. Queue entries that fell far behind while we were down are marked
//! for a single attempt.

use chrono::{DateTime, Utc};
use tracing::{error, info};

use crate::error::EngineError;
use crate::state_machine::interpreter::InterpreterContext;
use crate::state_machine::store::LifecycleStore;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconciliationReport {
    /// Records whose outbox was replayed.
    pub replayed: usize,
    /// Queue entries past the restart grace.
    pub stale: usize,
}

/// Run once on startup, after the store is open and before the periodic
/// jobs start.
pub async fn reconcile_on_startup(
    store: &LifecycleStore,
    ctx: &InterpreterContext,
    queue_grace: chrono::Duration,
    now: DateTime<Utc>,
) -> Result<ReconciliationReport, EngineError> {
    info!("Starting crash recovery reconciliation...");

    let stale = ctx.queue.apply_restart_grace(now, queue_grace).await?;
    let replayed = match store.replay_outbox(ctx).await {
        Ok(n) => n,
        Err(e) => {
            error!("Outbox replay failed: {}", e);
            return Err(e);
        }
    };

    if replayed == 0 && stale == 0 {
        info!("Nothing to recover. Reconciliation complete.");
    } else {
        info!(
            "Reconciliation complete: replayed {} outbox(es), {} stale notification(s)",
            replayed, stale
        );
    }
    Ok(ReconciliationReport { replayed, stale })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notifications::{DispatchDelay, NotificationPayload};
    use crate::testing::{detected, Harness};
    use chrono::Duration;
    use holocron_core::state_machine::{Effect, RecordKey};
    use holocron_core::{NominationId, NominationType, UserName};

    #[tokio::test]
    async fn test_clean_start_has_nothing_to_do() {
        let harness = Harness::new();
        let report = reconcile_on_startup(&harness.store, &harness.ctx, Duration::hours(1), Utc::now())
            .await
            .unwrap();
        assert_eq!(report, ReconciliationReport::default());
    }

    #[tokio::test]
    async fn test_replays_outbox_and_marks_stale_entries() {
        let harness = Harness::new();
        let now = Utc::now();
        let id = NominationId::new("Luke Skywalker", NominationType::Featured, 1);
        let key = RecordKey::Nomination(id.clone());
        harness
            .store
            .process_event(&key, detected("Tommy", now - Duration::days(2), false), &harness.ctx)
            .await
            .unwrap();

        // Simulate a crash between commit and the ranking credit
        let mut stored = harness.repo.get(&key).await.unwrap().unwrap();
        stored.pending_effects = vec![Effect::RecordRanking {
            id: id.clone(),
            nominator: UserName::from("Tommy"),
            kind: NominationType::Featured,
            year: 2024,
        }];
        harness.repo.put(&stored).await.unwrap();

        harness
            .queue
            .enqueue(
                NotificationPayload::chat("ops", "old"),
                DispatchDelay::Immediate,
                None,
                now - Duration::hours(3),
            )
            .await
            .unwrap();

        let report = reconcile_on_startup(&harness.store, &harness.ctx, Duration::hours(1), now)
            .await
            .unwrap();
        assert_eq!(report, ReconciliationReport { replayed: 1, stale: 1 });
        assert_eq!(harness.rankings.pending().await.unwrap(), 1);
        assert!(harness
            .repo
            .get(&key)
            .await
            .unwrap()
            .unwrap()
            .pending_effects
            .is_empty());

        // A second start finds the outbox empty
        let again = reconcile_on_startup(&harness.store, &harness.ctx, Duration::hours(1), now)
            .await
            .unwrap();
        assert_eq!(again.replayed, 0);
    }
}
