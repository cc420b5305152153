//! Change detector: polls the tracking categories and turns membership
//! changes into lifecycle events.
//!
//! Each nomination and review category is a separate source with its own
//! cursor. A source's cursor advances only when every page in its delta
//! was handled, so a transient failure replays the same delta next time.
//! Pages that cannot be handled for a permanent reason (a duplicate active
//! nomination, say) are reported and not retried.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use holocron_core::approval::analyze_nomination;
use holocron_core::objection::parse_objections;
use holocron_core::state_machine::{Event, RecordKey};
use holocron_core::{
    nomination_page_prefix, review_page_prefix, NominationId, NominationType, ReviewId,
};

use crate::collaborators::bounded;
use crate::cursor::CursorStore;
use crate::error::EngineError;
use crate::notifications::{DispatchDelay, NotificationPayload};
use crate::state_machine::interpreter::InterpreterContext;
use crate::state_machine::store::{LifecycleStore, ProcessOutcome};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SourceKind {
    Nominations,
    Reviews,
}

/// One watched category.
#[derive(Debug, Clone)]
struct Source {
    name: String,
    kind: NominationType,
    what: SourceKind,
    category: String,
    /// Members are subpages of this page.
    prefix: String,
}

/// Counts from one scan.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanReport {
    pub added: usize,
    pub removed: usize,
    /// Sources whose cursor advanced.
    pub advanced: usize,
    pub failures: Vec<String>,
}

impl ScanReport {
    pub fn summary(&self) -> String {
        format!(
            "{} new, {} removed, {} failure(s)",
            self.added,
            self.removed,
            self.failures.len()
        )
    }
}

/// Outcome of handling one page.
enum PageResult {
    Handled,
    /// Cannot succeed on retry; reported but the cursor still advances.
    Rejected(String),
    /// Retry with the same delta next scan.
    Retry(String),
}

pub struct ChangeDetector {
    store: Arc<LifecycleStore>,
    ctx: Arc<InterpreterContext>,
    cursors: Arc<CursorStore>,
    startup_grace: chrono::Duration,
    /// One scan at a time; the periodic loop and the manual trigger share it.
    scanning: Mutex<()>,
}

impl ChangeDetector {
    pub fn new(
        store: Arc<LifecycleStore>,
        ctx: Arc<InterpreterContext>,
        cursors: Arc<CursorStore>,
        startup_grace: chrono::Duration,
    ) -> Self {
        Self {
            store,
            ctx,
            cursors,
            startup_grace,
            scanning: Mutex::new(()),
        }
    }

    fn sources(&self) -> Vec<Source> {
        let mut sources = Vec::new();
        for (kind, policy) in self.ctx.policy.iter() {
            sources.push(Source {
                name: format!("nominations:{}", kind),
                kind,
                what: SourceKind::Nominations,
                category: policy.nomination_category.clone(),
                prefix: format!("{}/", nomination_page_prefix(kind)),
            });
            sources.push(Source {
                name: format!("reviews:{}", kind),
                kind,
                what: SourceKind::Reviews,
                category: policy.review_category.clone(),
                prefix: format!("{}/", review_page_prefix(kind)),
            });
        }
        sources
    }

    /// Scan every source once. `startup` silences pages older than the
    /// grace window so a catch-up after downtime does not flood the channels.
    pub async fn scan(&self, now: DateTime<Utc>, startup: bool) -> ScanReport {
        let _guard = self.scanning.lock().await;
        let mut report = ScanReport::default();

        for source in self.sources() {
            if let Err(e) = self.scan_source(&source, now, startup, &mut report).await {
                warn!("Scan of {} failed: {}", source.name, e);
                report.failures.push(format!("{}: {}", source.name, e));
            }
        }

        if !report.failures.is_empty() {
            self.report_failures(&report.failures, now).await;
        }
        report
    }

    async fn scan_source(
        &self,
        source: &Source,
        now: DateTime<Utc>,
        startup: bool,
        report: &mut ScanReport,
    ) -> Result<(), EngineError> {
        let cursor = self.cursors.current(&source.name).await?;
        let listed = bounded(
            self.ctx.call_timeout,
            "list category members",
            self.ctx.wiki.list_category_members(&source.category),
        )
        .await?;
        let members: BTreeSet<String> = listed
            .iter()
            .filter_map(|title| title.strip_prefix(&source.prefix))
            .map(|subpage| subpage.trim().to_string())
            .filter(|subpage| !subpage.is_empty())
            .collect();

        let delta = cursor.diff(&members);
        if delta.is_empty() && cursor.version > 0 {
            debug!("{}: no changes", source.name);
            return Ok(());
        }

        let mut complete = true;
        let mut record = |subpage: &str, result: PageResult, report: &mut ScanReport| match result {
            PageResult::Handled => {}
            PageResult::Rejected(reason) => {
                report
                    .failures
                    .push(format!("{}{}: {}", source.prefix, subpage, reason));
            }
            PageResult::Retry(reason) => {
                complete = false;
                report
                    .failures
                    .push(format!("{}{}: {}", source.prefix, subpage, reason));
            }
        };

        for subpage in &delta.added {
            let result = match source.what {
                SourceKind::Nominations => {
                    let id = NominationId::from_subpage(source.kind, subpage);
                    classify(self.detect_nomination(&id, now, startup).await)
                }
                SourceKind::Reviews => {
                    let id = ReviewId::from_subpage(source.kind, subpage);
                    classify(self.detect_review(&id, now, startup).await)
                }
            };
            if matches!(result, PageResult::Handled) {
                report.added += 1;
            }
            record(subpage.as_str(), result, report);
        }

        for subpage in &delta.removed {
            let result = match source.what {
                SourceKind::Nominations => {
                    let id = NominationId::from_subpage(source.kind, subpage);
                    classify(self.page_removed(&id, now).await)
                }
                SourceKind::Reviews => {
                    let id = ReviewId::from_subpage(source.kind, subpage);
                    self.review_removed(&id).await
                }
            };
            if matches!(result, PageResult::Handled) {
                report.removed += 1;
            }
            record(subpage.as_str(), result, report);
        }

        if !complete {
            info!(
                "{}: leaving cursor at version {} so the failed pages are retried",
                source.name, cursor.version
            );
            return Ok(());
        }
        if self
            .cursors
            .advance(&source.name, &cursor, members, now)
            .await?
        {
            report.advanced += 1;
        }
        Ok(())
    }

    /// Read a nomination page and feed its detection event to the store.
    pub async fn detect_nomination(
        &self,
        id: &NominationId,
        now: DateTime<Utc>,
        startup: bool,
    ) -> Result<ProcessOutcome, EngineError> {
        let title = id.page_title();
        let timeout = self.ctx.call_timeout;
        let text = bounded(timeout, "read nomination", self.ctx.wiki.get_page_content(&title)).await?;
        let first = bounded(timeout, "first revision", self.ctx.wiki.first_revision(&title)).await?;

        let projects = self.ctx.projects.snapshot().await.identify(&text);
        let evidence = analyze_nomination(&text, self.ctx.policy.get(id.kind));
        let announce = !startup || now - first.timestamp <= self.startup_grace;
        if !announce {
            debug!("{} predates the startup grace window; tracking silently", id);
        }

        let event = Event::NominationDetected {
            nominator: first.user,
            created_at: first.timestamp,
            projects,
            objections: parse_objections(&title, &text),
            approval_marker: evidence.approval_marker,
            announce,
        };
        self.store
            .process_event(&RecordKey::Nomination(id.clone()), event, &self.ctx)
            .await
    }

    async fn detect_review(
        &self,
        id: &ReviewId,
        now: DateTime<Utc>,
        startup: bool,
    ) -> Result<ProcessOutcome, EngineError> {
        let first = bounded(
            self.ctx.call_timeout,
            "first revision",
            self.ctx.wiki.first_revision(&id.page_title()),
        )
        .await?;
        let announce = !startup || now - first.timestamp <= self.startup_grace;
        let event = Event::ReviewRequested {
            requested_by: first.user,
            at: first.timestamp,
            context: None,
            create_page: false,
            announce,
        };
        self.store
            .process_event(&RecordKey::Review(id.clone()), event, &self.ctx)
            .await
    }

    async fn page_removed(
        &self,
        id: &NominationId,
        now: DateTime<Utc>,
    ) -> Result<ProcessOutcome, EngineError> {
        let key = RecordKey::Nomination(id.clone());
        if self.store.get(&key).await?.is_none() {
            return Err(EngineError::Validation(format!(
                "{} left its category but was never tracked",
                id
            )));
        }
        self.store
            .process_event(&key, Event::PageRemoved { at: now }, &self.ctx)
            .await
    }

    /// Reviews leave their category when concluded. One that leaves while
    /// still open was closed by hand and needs an operator.
    async fn review_removed(&self, id: &ReviewId) -> PageResult {
        match self.store.get(&RecordKey::Review(id.clone())).await {
            Ok(Some(record)) if record.as_review().is_some_and(|r| r.is_open()) => {
                PageResult::Rejected(format!(
                    "{} left its category while still open; mark it with a command",
                    id
                ))
            }
            Ok(_) => PageResult::Handled,
            Err(e) => classify::<()>(Err(e)),
        }
    }

    async fn report_failures(&self, failures: &[String], now: DateTime<Utc>) {
        let text = format!(
            "Nomination scan finished with {} problem(s):\n{}",
            failures.len(),
            failures
                .iter()
                .map(|f| format!("- {}", f))
                .collect::<Vec<_>>()
                .join("\n")
        );
        if let Err(e) = self
            .ctx
            .queue
            .enqueue(
                NotificationPayload::chat(&self.ctx.channels.operators, text),
                DispatchDelay::Immediate,
                None,
                now,
            )
            .await
        {
            error!("Could not queue the scan report for operators: {}", e);
        }
    }

    /// Scan once immediately as the startup scan, then every `interval`.
    pub async fn run(self: Arc<Self>, interval: Duration) {
        let report = self.scan(Utc::now(), true).await;
        info!("Startup scan: {}", report.summary());

        let mut ticker = tokio::time::interval(interval);
        // The first tick completes immediately
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let report = self.scan(Utc::now(), false).await;
            if report.added + report.removed > 0 || !report.failures.is_empty() {
                info!("Scan: {}", report.summary());
            }
        }
    }
}

fn classify<T>(result: Result<T, EngineError>) -> PageResult {
    match result {
        Ok(_) => PageResult::Handled,
        Err(e @ EngineError::TransientIo(_)) => PageResult::Retry(e.to_string()),
        Err(e) => PageResult::Rejected(e.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Harness, NominationPage};
    use chrono::Duration as ChronoDuration;
    use holocron_core::state_machine::NominationStatus;
    use holocron_core::PolicyTable;

    fn policy() -> PolicyTable {
        PolicyTable::default()
    }

    fn publish(harness: &Harness, article: &str, author: &str, at: DateTime<Utc>) -> NominationId {
        let id = NominationId::new(article, NominationType::Featured, 1);
        let text = NominationPage::new(author, at)
            .project("Jedi")
            .render(policy().get(NominationType::Featured));
        harness.wiki.create_page(&id.page_title(), &text, author, at);
        id
    }

    #[tokio::test]
    async fn test_new_page_is_tracked_and_announced() {
        let harness = Harness::new();
        harness.load_projects().await;
        let now = Utc::now();
        let id = publish(&harness, "Ahsoka Tano", "Tommy", now - ChronoDuration::minutes(3));

        let report = harness.detector.scan(now, false).await;
        assert_eq!(report.added, 1);
        assert!(report.failures.is_empty());

        let record = harness
            .store
            .get(&RecordKey::Nomination(id.clone()))
            .await
            .unwrap()
            .unwrap();
        let nomination = record.as_nomination().unwrap();
        assert_eq!(nomination.nominator.as_str(), "Tommy");
        assert_eq!(nomination.projects.len(), 1);
        // Type channel plus project channel
        assert_eq!(harness.queue.pending_count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_startup_scan_silences_old_pages() {
        let harness = Harness::new();
        let now = Utc::now();
        publish(&harness, "Old", "Tommy", now - ChronoDuration::hours(5));
        publish(&harness, "Fresh", "Tommy", now - ChronoDuration::minutes(5));

        let report = harness.detector.scan(now, true).await;
        assert_eq!(report.added, 2);
        assert_eq!(harness.queue.pending_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_second_scan_sees_nothing_new() {
        let harness = Harness::new();
        let now = Utc::now();
        publish(&harness, "Ahsoka Tano", "Tommy", now);

        harness.detector.scan(now, false).await;
        let again = harness.detector.scan(now, false).await;
        assert_eq!(again.added, 0);
        assert_eq!(harness.queue.pending_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_transient_failure_keeps_cursor() {
        let harness = Harness::new();
        let now = Utc::now();
        let id = publish(&harness, "Ahsoka Tano", "Tommy", now);
        harness.wiki.fail_reads_of(&id.page_title());

        let failed = harness.detector.scan(now, false).await;
        assert_eq!(failed.added, 0);
        assert_eq!(failed.failures.len(), 1);
        let cursor = harness.cursors.current("nominations:FA").await.unwrap();
        assert_eq!(cursor.version, 0);
        // One aggregated operator report
        assert_eq!(harness.queue.pending_count().await.unwrap(), 1);

        harness.wiki.allow_reads_of(&id.page_title());
        let retried = harness.detector.scan(now, false).await;
        assert_eq!(retried.added, 1);
        let cursor = harness.cursors.current("nominations:FA").await.unwrap();
        assert!(cursor.members.contains("Ahsoka Tano"));
    }

    #[tokio::test]
    async fn test_listing_failure_is_isolated_per_source() {
        let harness = Harness::new();
        harness.wiki.fail_listings(true);
        let report = harness.detector.scan(Utc::now(), false).await;
        assert_eq!(report.failures.len(), 6);
        assert_eq!(report.advanced, 0);
        assert_eq!(harness.queue.pending_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_page_leaving_category_detaches_open_nomination() {
        let harness = Harness::new();
        let now = Utc::now();
        let id = publish(&harness, "Ahsoka Tano", "Tommy", now);
        harness.detector.scan(now, false).await;

        harness.wiki.set_page(&id.page_title(), "Blanked\n");
        let report = harness.detector.scan(now, false).await;
        assert_eq!(report.removed, 1);

        let record = harness
            .store
            .get(&RecordKey::Nomination(id))
            .await
            .unwrap()
            .unwrap();
        let nomination = record.as_nomination().unwrap();
        assert!(nomination.detached);
        assert_eq!(nomination.status, NominationStatus::Open);
    }

    #[tokio::test]
    async fn test_review_page_opens_review() {
        let harness = Harness::new();
        let now = Utc::now();
        let review = ReviewId::new("Cad Bane", NominationType::Good, 1);
        let binding = policy();
        let category = &binding.get(NominationType::Good).review_category;
        harness.wiki.create_page(
            &review.page_title(),
            &format!("==[[Cad Bane]]==\n[[Category:{}]]\n", category),
            "Ima",
            now,
        );

        let report = harness.detector.scan(now, false).await;
        // The review opens, but there is no promoted nomination to forward to
        assert_eq!(report.added, 1);
        let record = harness
            .store
            .get(&RecordKey::Review(review))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            record.as_review().unwrap().requests[0].requested_by.as_str(),
            "Ima"
        );
    }
}
