//! Lifecycle store: the only writer of nomination and review records.
//!
//! Every event for a record runs under that record's identity lock:
//! transition, pre-commit effects, result events, and finally one write of
//! the record together with its post-commit outbox. If any step fails the
//! write never happens and the caller gets the error with the stored
//! record untouched. Post-commit effects run after the write, still under
//! the lock, and whatever fails transiently stays in the outbox for the
//! next event or the startup replay.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, RwLock};
use tracing::{debug, error, info, warn};

use holocron_core::state_machine::{
    transition, Disposition, Effect, Event, Nomination, Record, RecordKey, Review,
    TransitionResult,
};
use holocron_core::{
    ArchiveOutcome, ArticleTitle, IdentityKey, NominationId, NominationType, ReviewId,
};

use super::interpreter::{execute_effects, execute_post_commit, InterpreterContext};
use super::repository::{Repository, StoredRecord};
use crate::error::EngineError;

/// What `process_event` did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessOutcome {
    pub record: Record,
    /// `Duplicate` when the event restated the stored record; nothing was written.
    pub disposition: Disposition,
}

/// Persistent lifecycle store with per-identity locking.
///
/// # Concurrency
///
/// Nominations lock on (article, type), so every sequence of one article
/// serializes and the duplicate-active check cannot race the creation that
/// follows it. Reviews lock on (article, type) in their own namespace, so
/// choosing which review of an article a request joins cannot race either.
/// A review forwards into its nomination while holding the review lock; the
/// nomination side never forwards back, so the lock order is acyclic.
///
/// Locks live in the map only while someone holds or waits on them.
pub struct LifecycleStore {
    repo: Arc<dyn Repository>,
    locks: RwLock<HashMap<IdentityKey, Arc<Mutex<()>>>>,
}

impl LifecycleStore {
    pub fn new(repo: Arc<dyn Repository>) -> Self {
        Self {
            repo,
            locks: RwLock::new(HashMap::new()),
        }
    }

    pub fn repository(&self) -> &Arc<dyn Repository> {
        &self.repo
    }

    /// Get or create the lock for one identity.
    async fn get_or_create_lock(&self, identity: &IdentityKey) -> Arc<Mutex<()>> {
        // Fast path: check if lock already exists
        {
            let locks = self.locks.read().await;
            if let Some(lock) = locks.get(identity) {
                return lock.clone();
            }
        }

        // Slow path: create lock (double-check after acquiring write lock)
        let mut locks = self.locks.write().await;
        locks
            .entry(identity.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Drop an identity's lock from the map once nobody else holds or waits on it.
    async fn release_lock(&self, identity: &IdentityKey, lock: Arc<Mutex<()>>) {
        let mut locks = self.locks.write().await;
        let idle = locks
            .get(identity)
            .is_some_and(|held| Arc::ptr_eq(held, &lock) && Arc::strong_count(&lock) == 2);
        if idle {
            locks.remove(identity);
        }
    }

    #[cfg(test)]
    async fn lock_count(&self) -> usize {
        self.locks.read().await.len()
    }

    pub async fn get(&self, key: &RecordKey) -> Result<Option<Record>, EngineError> {
        Ok(self.repo.get(key).await?.map(|s| s.record))
    }

    pub async fn nominations_for(
        &self,
        article: &ArticleTitle,
        kind: NominationType,
    ) -> Result<Vec<Nomination>, EngineError> {
        Ok(self.repo.nominations_for(article, kind).await?)
    }

    /// The open nomination of an article, if there is one.
    pub async fn active_nomination(
        &self,
        article: &ArticleTitle,
        kind: NominationType,
    ) -> Result<Option<Nomination>, EngineError> {
        Ok(self
            .nominations_for(article, kind)
            .await?
            .into_iter()
            .rev()
            .find(|n| n.is_active()))
    }

    pub async fn open_nominations(&self) -> Result<Vec<Nomination>, EngineError> {
        Ok(self.repo.open_nominations().await?)
    }

    pub async fn open_reviews(&self) -> Result<Vec<Review>, EngineError> {
        Ok(self.repo.open_reviews().await?)
    }

    /// The most recent review of an article, open or concluded.
    pub async fn latest_review(
        &self,
        article: &ArticleTitle,
        kind: NominationType,
    ) -> Result<Option<Review>, EngineError> {
        Ok(self.repo.reviews_for(article, kind).await?.pop())
    }

    /// Process an event for a record: transition, execute effects, persist,
    /// then run the post-commit effects.
    ///
    /// Returns the record as stored after the event.
    pub async fn process_event(
        &self,
        key: &RecordKey,
        event: Event,
        ctx: &InterpreterContext,
    ) -> Result<ProcessOutcome, EngineError> {
        let identity = key.identity();
        let lock = self.get_or_create_lock(&identity).await;
        let result = {
            let _guard = lock.lock().await;
            self.commit_locked(key, event, ctx).await
        };
        self.release_lock(&identity, lock).await;
        result
    }

    /// Send a review request for an article. It joins the open review, or
    /// opens the next one when the latest review has concluded.
    pub async fn request_review(
        &self,
        article: &ArticleTitle,
        kind: NominationType,
        event: Event,
        ctx: &InterpreterContext,
    ) -> Result<ProcessOutcome, EngineError> {
        let identity = ReviewId::new(article.clone(), kind, 1).identity();
        let lock = self.get_or_create_lock(&identity).await;
        let result = {
            let _guard = lock.lock().await;
            match self.repo.reviews_for(article, kind).await {
                Ok(mut reviews) => {
                    let id = match reviews.pop() {
                        Some(latest) if latest.is_open() => latest.id,
                        Some(latest) => latest.id.next(),
                        None => ReviewId::new(article.clone(), kind, 1),
                    };
                    self.commit_locked(&RecordKey::Review(id), event, ctx).await
                }
                Err(e) => Err(e.into()),
            }
        };
        self.release_lock(&identity, lock).await;
        result
    }

    /// Apply an event and run its post-commit effects. Must be called with
    /// the identity lock held.
    async fn commit_locked(
        &self,
        key: &RecordKey,
        event: Event,
        ctx: &InterpreterContext,
    ) -> Result<ProcessOutcome, EngineError> {
        let (outcome, pending) = self.apply_locked(key, event, ctx).await?;
        self.run_post_commit(key, pending, ctx).await;
        Ok(outcome)
    }

    /// Run the outbox of every record left with one by the last shutdown.
    pub async fn replay_outbox(&self, ctx: &InterpreterContext) -> Result<usize, EngineError> {
        let stored = self.repo.with_pending_effects().await?;
        let mut replayed = 0;

        for record in stored {
            let key = record.record.key();
            let identity = key.identity();
            let lock = self.get_or_create_lock(&identity).await;
            let result = {
                let _guard = lock.lock().await;
                self.replay_locked(&key, ctx).await
            };
            self.release_lock(&identity, lock).await;
            if result? {
                replayed += 1;
            }
        }
        Ok(replayed)
    }

    /// Re-read under the lock, since an event may have drained the outbox already.
    async fn replay_locked(&self, key: &RecordKey, ctx: &InterpreterContext) -> Result<bool, EngineError> {
        let Some(fresh) = self.repo.get(key).await? else {
            return Ok(false);
        };
        if fresh.pending_effects.is_empty() {
            return Ok(false);
        }
        info!(
            "Replaying {} pending effects for {}",
            fresh.pending_effects.len(),
            key
        );
        self.run_post_commit(key, fresh.pending_effects, ctx).await;
        Ok(true)
    }

    /// The transition loop. Must be called with the identity lock held.
    ///
    /// Returns the outcome and the outbox as persisted: effects left over
    /// from an earlier run plus the ones this event produced.
    async fn apply_locked(
        &self,
        key: &RecordKey,
        event: Event,
        ctx: &InterpreterContext,
    ) -> Result<(ProcessOutcome, Vec<Effect>), EngineError> {
        let stored = self.repo.get(key).await?;
        let (mut current, outbox) = match stored {
            Some(stored) => (Some(stored.record), stored.pending_effects),
            None => (None, vec![]),
        };

        if current.is_none() {
            if let (RecordKey::Nomination(id), Event::NominationDetected { .. }) = (key, &event) {
                self.check_no_active_nomination(id).await?;
            }
        }

        // Event loop: process initial event and any result events from effects
        let mut events_to_process = vec![event];
        let mut post_commit = Vec::new();
        let mut disposition = None;

        while let Some(event) = events_to_process.pop() {
            info!(
                "Processing {} for {} in state {}",
                event.log_summary(),
                key,
                current.as_ref().map_or("untracked", |r| r.status_name())
            );

            let TransitionResult {
                record,
                effects,
                disposition: step,
            } = transition(current.take(), key, event, &ctx.policy)?;
            current = Some(record);
            disposition.get_or_insert(step);

            let (later, now): (Vec<Effect>, Vec<Effect>) =
                effects.into_iter().partition(Effect::is_post_commit);
            post_commit.extend(later);

            if !now.is_empty() {
                debug!("Executing {} effects for {}", now.len(), key);
                let result_events = execute_effects(ctx, now).await;

                // Add result events in reverse so they're processed in order
                for result_event in result_events.into_iter().rev() {
                    events_to_process.push(result_event);
                }
            }
        }

        let record = current.ok_or_else(|| {
            EngineError::DataCorruption(format!("transition for {} produced no record", key))
        })?;
        let disposition = disposition.unwrap_or(Disposition::Duplicate);

        if disposition == Disposition::Duplicate && post_commit.is_empty() {
            debug!("{} unchanged; nothing to persist", key);
            return Ok((ProcessOutcome { record, disposition }, outbox));
        }

        let mut pending = outbox;
        pending.extend(post_commit);
        self.repo
            .put(&StoredRecord {
                record: record.clone(),
                pending_effects: pending.clone(),
            })
            .await?;
        info!("{} is now {}", key, record.status_name());

        Ok((ProcessOutcome { record, disposition }, pending))
    }

    async fn check_no_active_nomination(&self, id: &NominationId) -> Result<(), EngineError> {
        let existing = self.repo.nominations_for(&id.article, id.kind).await?;
        match existing
            .into_iter()
            .find(|n| n.is_active() && n.id.sequence != id.sequence)
        {
            Some(active) => Err(EngineError::DuplicateActiveNomination {
                existing: active.id,
                requested: id.clone(),
            }),
            None => Ok(()),
        }
    }

    /// Run post-commit effects for a record whose lock is held, then shrink
    /// its outbox to whatever failed transiently.
    async fn run_post_commit(&self, key: &RecordKey, effects: Vec<Effect>, ctx: &InterpreterContext) {
        if effects.is_empty() {
            return;
        }

        let mut retained = Vec::new();
        let mut plain = Vec::new();
        for effect in effects {
            let forwarded = match &effect {
                Effect::ForwardReviewOpened { article, kind, at } => {
                    Some((article.clone(), *kind, Event::ReviewOpened { at: *at }))
                }
                Effect::ForwardReviewConcluded {
                    article,
                    kind,
                    outcome,
                    at,
                } => Some((
                    article.clone(),
                    *kind,
                    Event::ReviewConcluded {
                        outcome: *outcome,
                        at: *at,
                    },
                )),
                _ => None,
            };
            match forwarded {
                Some((article, kind, event)) => {
                    if let Err(e) = self.forward_to_nomination(&article, kind, event, ctx).await {
                        keep_if_transient(key, effect, e, &mut retained);
                    }
                }
                None => plain.push(effect),
            }
        }
        retained.extend(run_plain_effects(key, plain, ctx).await);
        self.settle_outbox(key, retained).await;
    }

    /// Apply a review lineage event to the article's promoted nomination.
    async fn forward_to_nomination(
        &self,
        article: &ArticleTitle,
        kind: NominationType,
        event: Event,
        ctx: &InterpreterContext,
    ) -> Result<(), EngineError> {
        let nominations = self.repo.nominations_for(article, kind).await?;
        let Some(target) = nominations.into_iter().rev().find(|n| {
            !n.status.is_open() && n.status.archive_outcome() == Some(ArchiveOutcome::Successful)
        }) else {
            return Err(EngineError::Validation(format!(
                "{} has no promoted {} nomination on record",
                article, kind
            )));
        };

        let key = RecordKey::Nomination(target.id);
        let identity = key.identity();
        let lock = self.get_or_create_lock(&identity).await;
        let result = {
            let _guard = lock.lock().await;
            match self.apply_locked(&key, event, ctx).await {
                Ok((_, pending)) => {
                    let retained = run_plain_effects(&key, pending, ctx).await;
                    self.settle_outbox(&key, retained).await;
                    Ok(())
                }
                Err(e) => Err(e),
            }
        };
        self.release_lock(&identity, lock).await;
        result
    }

    async fn settle_outbox(&self, key: &RecordKey, retained: Vec<Effect>) {
        let result = if retained.is_empty() {
            self.repo.clear_pending_effects(key).await
        } else {
            match self.repo.get(key).await {
                Ok(Some(mut stored)) => {
                    stored.pending_effects = retained;
                    self.repo.put(&stored).await
                }
                Ok(None) => Ok(()),
                Err(e) => Err(e),
            }
        };
        if let Err(e) = result {
            error!("Failed to update the outbox of {}: {}", key, e);
        }
    }
}

/// Run post-commit effects that need no routing. Returns the ones to retry.
async fn run_plain_effects(key: &RecordKey, effects: Vec<Effect>, ctx: &InterpreterContext) -> Vec<Effect> {
    let mut retained = Vec::new();
    for effect in effects {
        if let Err(e) = execute_post_commit(ctx, effect.clone()).await {
            keep_if_transient(key, effect, e, &mut retained);
        }
    }
    retained
}

fn keep_if_transient(key: &RecordKey, effect: Effect, e: EngineError, retained: &mut Vec<Effect>) {
    match e {
        EngineError::TransientIo(_) => {
            warn!("Post-commit effect for {} failed; keeping it for retry: {}", key, e);
            retained.push(effect);
        }
        other => warn!("Dropping post-commit effect for {}: {}", key, other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{archive_request, detected, Harness};
    use chrono::{Duration, Utc};
    use holocron_core::state_machine::{NominationStatus, ReviewStatus};
    use holocron_core::{ReviewOutcome, UserName};

    fn nomination(sequence: u32) -> NominationId {
        NominationId::new("Ahsoka Tano", NominationType::Featured, sequence)
    }

    async fn pending_notifications(harness: &Harness) -> usize {
        harness.repo.pending_count().await.unwrap()
    }

    #[tokio::test]
    async fn test_detection_registers_and_announces() {
        let harness = Harness::new();
        let id = nomination(1);
        let key = RecordKey::Nomination(id.clone());

        let outcome = harness
            .store
            .process_event(&key, detected("Tommy", Utc::now(), true), &harness.ctx)
            .await
            .unwrap();

        assert_eq!(outcome.disposition, Disposition::Applied);
        assert!(harness
            .wiki
            .page("Wookieepedia:Featured article nominations")
            .unwrap()
            .contains(&id.page_title()));
        assert_eq!(pending_notifications(&harness).await, 1);
        let stored = harness.repo.get(&key).await.unwrap().unwrap();
        assert!(stored.pending_effects.is_empty());
    }

    #[tokio::test]
    async fn test_renomination_while_open_is_refused() {
        let harness = Harness::new();
        harness
            .store
            .process_event(
                &RecordKey::Nomination(nomination(1)),
                detected("Tommy", Utc::now(), false),
                &harness.ctx,
            )
            .await
            .unwrap();

        let err = harness
            .store
            .process_event(
                &RecordKey::Nomination(nomination(2)),
                detected("Tommy", Utc::now(), false),
                &harness.ctx,
            )
            .await
            .unwrap_err();
        assert_eq!(
            err,
            EngineError::DuplicateActiveNomination {
                existing: nomination(1),
                requested: nomination(2),
            }
        );
    }

    #[tokio::test]
    async fn test_failed_edit_persists_nothing() {
        let harness = Harness::new();
        harness
            .wiki
            .fail_edits_to("Wookieepedia:Featured article nominations");
        let key = RecordKey::Nomination(nomination(1));

        let err = harness
            .store
            .process_event(&key, detected("Tommy", Utc::now(), true), &harness.ctx)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "transient_io");
        assert!(harness.repo.get(&key).await.unwrap().is_none());
        assert_eq!(pending_notifications(&harness).await, 0);
    }

    #[tokio::test]
    async fn test_repeated_archive_is_a_duplicate() {
        let harness = Harness::new();
        let key = RecordKey::Nomination(nomination(1));
        let created = Utc::now() - Duration::days(10);
        harness
            .store
            .process_event(&key, detected("Tommy", created, false), &harness.ctx)
            .await
            .unwrap();

        let first = harness
            .store
            .process_event(
                &key,
                archive_request(ArchiveOutcome::Successful, "Board", created),
                &harness.ctx,
            )
            .await
            .unwrap();
        assert_eq!(first.disposition, Disposition::Applied);
        assert!(matches!(
            first.record.as_nomination().unwrap().status,
            NominationStatus::Archived { .. }
        ));
        let queued = pending_notifications(&harness).await;

        let second = harness
            .store
            .process_event(
                &key,
                archive_request(ArchiveOutcome::Successful, "Board", created),
                &harness.ctx,
            )
            .await
            .unwrap();
        assert_eq!(second.disposition, Disposition::Duplicate);
        assert_eq!(pending_notifications(&harness).await, queued);

        let conflict = harness
            .store
            .process_event(
                &key,
                archive_request(ArchiveOutcome::Unsuccessful, "Board", created),
                &harness.ctx,
            )
            .await
            .unwrap_err();
        assert_eq!(conflict.kind(), "conflict");
    }

    #[tokio::test]
    async fn test_review_lineage_follows_into_nomination() {
        let harness = Harness::new();
        let key = RecordKey::Nomination(nomination(1));
        let created = Utc::now() - Duration::days(10);
        harness
            .store
            .process_event(&key, detected("Tommy", created, false), &harness.ctx)
            .await
            .unwrap();
        harness
            .store
            .process_event(
                &key,
                archive_request(ArchiveOutcome::Successful, "Board", created),
                &harness.ctx,
            )
            .await
            .unwrap();

        let review = RecordKey::Review(ReviewId::new("Ahsoka Tano", NominationType::Featured, 1));
        harness
            .store
            .process_event(
                &review,
                Event::ReviewRequested {
                    requested_by: UserName::from("Ima"),
                    at: Utc::now(),
                    context: None,
                    create_page: true,
                    announce: true,
                },
                &harness.ctx,
            )
            .await
            .unwrap();
        let under_review = harness.store.get(&key).await.unwrap().unwrap();
        assert!(matches!(
            under_review.as_nomination().unwrap().status,
            NominationStatus::UnderReview { .. }
        ));

        let marked = harness
            .store
            .process_event(
                &review,
                Event::ReviewMarked {
                    outcome: ReviewOutcome::Probation,
                    marked_by: UserName::from("Board"),
                    at: Utc::now(),
                },
                &harness.ctx,
            )
            .await
            .unwrap();
        assert!(matches!(
            marked.record.as_review().unwrap().status,
            ReviewStatus::Concluded {
                outcome: ReviewOutcome::Probation,
                ..
            }
        ));
        let concluded = harness.store.get(&key).await.unwrap().unwrap();
        assert!(matches!(
            concluded.as_nomination().unwrap().status,
            NominationStatus::Probation { .. }
        ));
        assert!(harness
            .wiki
            .page("Ahsoka Tano")
            .unwrap()
            .contains("{{Top|fap}}"));
    }

    #[tokio::test]
    async fn test_transient_post_commit_failure_stays_in_outbox_until_replay() {
        let harness = Harness::new();
        harness.load_projects().await;
        harness.wiki.fail_edits_to("WookieeProject Jedi/Portfolio");

        let key = RecordKey::Nomination(nomination(1));
        let created = Utc::now() - Duration::days(10);
        let mut event = detected("Tommy", created, false);
        if let Event::NominationDetected { projects, .. } = &mut event {
            projects.push(holocron_core::ProjectId::from("Jedi"));
        }
        harness
            .store
            .process_event(&key, event, &harness.ctx)
            .await
            .unwrap();
        harness
            .store
            .process_event(
                &key,
                archive_request(ArchiveOutcome::Successful, "Board", created),
                &harness.ctx,
            )
            .await
            .unwrap();

        let stored = harness.repo.get(&key).await.unwrap().unwrap();
        assert!(matches!(
            stored.pending_effects.as_slice(),
            [Effect::UpdateProjectPortfolios { .. }]
        ));

        harness.wiki.allow_edits_to("WookieeProject Jedi/Portfolio");
        assert_eq!(harness.store.replay_outbox(&harness.ctx).await.unwrap(), 1);
        let stored = harness.repo.get(&key).await.unwrap().unwrap();
        assert!(stored.pending_effects.is_empty());
        assert!(harness
            .wiki
            .page("WookieeProject Jedi/Portfolio")
            .unwrap()
            .contains("*[[Ahsoka Tano]]"));
    }

    fn review_request(by: &str) -> Event {
        Event::ReviewRequested {
            requested_by: UserName::from(by),
            at: Utc::now(),
            context: None,
            create_page: true,
            announce: true,
        }
    }

    fn review_mark(outcome: ReviewOutcome) -> Event {
        Event::ReviewMarked {
            outcome,
            marked_by: UserName::from("Board"),
            at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_request_after_concluded_review_opens_the_next_one() {
        let harness = Harness::new();
        let key = RecordKey::Nomination(nomination(1));
        let created = Utc::now() - Duration::days(10);
        harness
            .store
            .process_event(&key, detected("Tommy", created, false), &harness.ctx)
            .await
            .unwrap();
        harness
            .store
            .process_event(
                &key,
                archive_request(ArchiveOutcome::Successful, "Board", created),
                &harness.ctx,
            )
            .await
            .unwrap();
        let article = ArticleTitle::from("Ahsoka Tano");

        let first = harness
            .store
            .request_review(&article, NominationType::Featured, review_request("Ima"), &harness.ctx)
            .await
            .unwrap();
        let first_id = first.record.as_review().unwrap().id.clone();
        assert_eq!(first_id.sequence, 1);
        harness
            .store
            .process_event(
                &RecordKey::Review(first_id.clone()),
                review_mark(ReviewOutcome::Passed),
                &harness.ctx,
            )
            .await
            .unwrap();

        let second = harness
            .store
            .request_review(&article, NominationType::Featured, review_request("Ima"), &harness.ctx)
            .await
            .unwrap();
        assert_eq!(second.disposition, Disposition::Applied);
        let second_id = second.record.as_review().unwrap().id.clone();
        assert_eq!(second_id, first_id.next());
        assert!(harness.wiki.page(&second_id.page_title()).is_some());

        // Joining the open second review, not opening a third
        let joined = harness
            .store
            .request_review(&article, NominationType::Featured, review_request("Zed"), &harness.ctx)
            .await
            .unwrap();
        assert_eq!(joined.record.as_review().unwrap().id, second_id);
        assert_eq!(joined.record.as_review().unwrap().requests.len(), 2);

        // The first review's outcome is final for the nomination
        let nomination_record = harness.store.get(&key).await.unwrap().unwrap();
        assert!(matches!(
            nomination_record.as_nomination().unwrap().status,
            NominationStatus::Passed { .. }
        ));
        let latest = harness
            .store
            .latest_review(&article, NominationType::Featured)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(latest.id, second_id);
    }

    #[tokio::test]
    async fn test_idle_locks_are_released() {
        let harness = Harness::new();
        let key = RecordKey::Nomination(nomination(1));
        let created = Utc::now() - Duration::days(10);
        harness
            .store
            .process_event(&key, detected("Tommy", created, false), &harness.ctx)
            .await
            .unwrap();
        // A failing event releases its lock too
        harness
            .store
            .process_event(
                &RecordKey::Nomination(nomination(2)),
                detected("Tommy", Utc::now(), false),
                &harness.ctx,
            )
            .await
            .unwrap_err();
        assert_eq!(harness.store.lock_count().await, 0);

        let (a, b) = tokio::join!(
            harness.store.process_event(
                &key,
                archive_request(ArchiveOutcome::Successful, "Board", created),
                &harness.ctx,
            ),
            harness.store.process_event(
                &key,
                archive_request(ArchiveOutcome::Successful, "Inquisitor", created),
                &harness.ctx,
            ),
        );
        a.unwrap();
        b.unwrap();
        assert_eq!(harness.store.lock_count().await, 0);
    }
}
