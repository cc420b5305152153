//! Consumer side of the notification queue.
//!
//! Each pass takes the due entries in (dispatch time, id) order, coalesces
//! plain chat messages per channel, and delivers. Failures are rescheduled
//! with exponential backoff until the attempt budget runs out; a stale
//! entry gets exactly one attempt. Entries that end up `Failed` are
//! reported to the operator channel in one message per pass.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{error, info, warn};

use holocron_core::UserName;

use super::{NotificationPayload, NotificationQueue, QueuedNotification};
use crate::collaborators::{bounded, ChatClient, SocialClient, WikiClient};
use crate::error::CollaboratorError;
use crate::state_machine::repository::RepositoryError;

/// Upper bound on entries pulled per pass.
const DUE_LIMIT: usize = 100;
/// Coalesced chat posts stay under the platform's message limit.
const MAX_BATCH_CHARS: usize = 1900;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: chrono::Duration,
    pub max_delay: chrono::Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: chrono::Duration::minutes(1),
            max_delay: chrono::Duration::hours(1),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (1-based): base·2^(attempt−1),
    /// capped at `max_delay`.
    pub fn backoff(&self, attempt: u32) -> chrono::Duration {
        let exponent = attempt.saturating_sub(1).min(30);
        let factor = 1i32 << exponent;
        self.base_delay
            .checked_mul(factor)
            .map_or(self.max_delay, |d| d.min(self.max_delay))
    }
}

/// Counts from one dispatch pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub delivered: usize,
    pub rescheduled: usize,
    pub failed: usize,
}

impl DispatchReport {
    pub fn is_empty(&self) -> bool {
        self.delivered == 0 && self.rescheduled == 0 && self.failed == 0
    }
}

pub struct Dispatcher {
    queue: Arc<NotificationQueue>,
    chat: Arc<dyn ChatClient>,
    social: Arc<dyn SocialClient>,
    wiki: Arc<dyn WikiClient>,
    retry: RetryPolicy,
    operator_channel: String,
    batch_size: usize,
    call_timeout: Duration,
}

/// One delivery: a single entry, or several chat entries posted together.
struct Delivery {
    entries: Vec<QueuedNotification>,
    payload: NotificationPayload,
}

impl Dispatcher {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        queue: Arc<NotificationQueue>,
        chat: Arc<dyn ChatClient>,
        social: Arc<dyn SocialClient>,
        wiki: Arc<dyn WikiClient>,
        retry: RetryPolicy,
        operator_channel: impl Into<String>,
        batch_size: usize,
        call_timeout: Duration,
    ) -> Self {
        Self {
            queue,
            chat,
            social,
            wiki,
            retry,
            operator_channel: operator_channel.into(),
            batch_size: batch_size.max(1),
            call_timeout,
        }
    }

    /// Deliver everything due at `now`.
    pub async fn dispatch_due(&self, now: DateTime<Utc>) -> Result<DispatchReport, RepositoryError> {
        let repo = self.queue.repository();
        let due = repo.due(now, DUE_LIMIT).await?;
        let mut report = DispatchReport::default();
        let mut failures = Vec::new();

        for delivery in coalesce(due, self.batch_size) {
            match self.deliver(&delivery.payload).await {
                Ok(()) => {
                    for entry in &delivery.entries {
                        repo.mark_delivered(entry.id, now).await?;
                        report.delivered += 1;
                    }
                }
                Err(e) => {
                    for entry in &delivery.entries {
                        let attempts = entry.attempts + 1;
                        let exhausted = entry.stale || attempts >= self.retry.max_attempts;
                        if exhausted || !e.is_retryable() {
                            warn!(
                                "Giving up on {} notification #{} after {} attempt(s): {}",
                                entry.payload.kind(),
                                entry.id,
                                attempts,
                                e
                            );
                            repo.mark_failed(entry.id, attempts, &e.to_string()).await?;
                            failures.push(format!(
                                "#{} ({}, {} attempt(s)): {}",
                                entry.id,
                                entry.payload.kind(),
                                attempts,
                                e
                            ));
                            report.failed += 1;
                        } else {
                            let mut delay = self.retry.backoff(attempts);
                            if let Some(hint) = e.retry_after().and_then(|d| chrono::Duration::from_std(d).ok()) {
                                delay = delay.max(hint);
                            }
                            repo.reschedule(entry.id, attempts, now + delay, &e.to_string())
                                .await?;
                            report.rescheduled += 1;
                        }
                    }
                }
            }
        }

        if !failures.is_empty() {
            self.report_failures(&failures).await;
        }
        Ok(report)
    }

    async fn deliver(&self, payload: &NotificationPayload) -> Result<(), CollaboratorError> {
        match payload {
            NotificationPayload::ChatMessage {
                channel,
                text,
                reactions,
            } => {
                let message_id = bounded(
                    self.call_timeout,
                    "post message",
                    self.chat.post_message(channel, text),
                )
                .await?;
                // The message is out; a missing reaction is not worth a repost
                for emoji in reactions {
                    if let Err(e) = bounded(
                        self.call_timeout,
                        "add reaction",
                        self.chat.react_to_message(channel, &message_id, emoji),
                    )
                    .await
                    {
                        warn!("Failed to add {} to message {}: {}", emoji, message_id, e);
                    }
                }
                Ok(())
            }
            NotificationPayload::SocialPost { text, link } => {
                let post_id = bounded(
                    self.call_timeout,
                    "social post",
                    self.social.post_update(text, link.as_deref()),
                )
                .await?;
                info!("Posted social update {}", post_id);
                Ok(())
            }
            NotificationPayload::TalkPageMessage { user, header, body } => {
                let page = talk_page(user);
                let transform = |text: &str| append_talk_section(text, header, body);
                bounded(
                    self.call_timeout,
                    "talk page message",
                    self.wiki
                        .edit_page(&page, &transform, &format!("New section: {}", header)),
                )
                .await?;
                Ok(())
            }
        }
    }

    async fn report_failures(&self, failures: &[String]) {
        let text = format!(
            "Undeliverable notifications:\n{}",
            failures
                .iter()
                .map(|f| format!("- {}", f))
                .collect::<Vec<_>>()
                .join("\n")
        );
        if let Err(e) = bounded(
            self.call_timeout,
            "operator report",
            self.chat.post_message(&self.operator_channel, &text),
        )
        .await
        {
            error!("Could not report failed notifications to operators: {}", e);
        }
    }

    /// Dispatch forever, pruning delivered entries older than `retention`.
    pub async fn run(self: Arc<Self>, poll_interval: Duration, retention: chrono::Duration) {
        loop {
            let now = Utc::now();
            match self.dispatch_due(now).await {
                Ok(report) if !report.is_empty() => info!(
                    "Dispatch pass: {} delivered, {} rescheduled, {} failed",
                    report.delivered, report.rescheduled, report.failed
                ),
                Ok(_) => {}
                Err(e) => error!("Dispatch pass failed: {}", e),
            }
            if let Err(e) = self.queue.repository().prune_delivered(now - retention).await {
                warn!("Failed to prune delivered notifications: {}", e);
            }
            self.queue.wait_for_work(poll_interval).await;
        }
    }
}

fn talk_page(user: &UserName) -> String {
    format!("User talk:{}", user)
}

/// Append a new section unless the same body was already posted.
fn append_talk_section(text: &str, header: &str, body: &str) -> String {
    if text.contains(body.trim()) {
        return text.to_string();
    }
    let mut out = text.trim_end().to_string();
    if !out.is_empty() {
        out.push_str("\n\n");
    }
    out.push_str(&format!("== {} ==\n{} ~~~~\n", header, body.trim()));
    out
}

/// Group due entries into deliveries, preserving order of first appearance.
/// Plain chat messages for one channel merge into a single post, up to
/// `batch_size` entries and the character budget.
fn coalesce(due: Vec<QueuedNotification>, batch_size: usize) -> Vec<Delivery> {
    let mut deliveries: Vec<Delivery> = Vec::new();

    for entry in due {
        if let NotificationPayload::ChatMessage {
            channel,
            text,
            reactions,
        } = &entry.payload
        {
            if reactions.is_empty() {
                let open = deliveries.iter_mut().find(|d| match &d.payload {
                    NotificationPayload::ChatMessage {
                        channel: c,
                        text: t,
                        reactions: r,
                    } => {
                        c == channel
                            && r.is_empty()
                            && d.entries.len() < batch_size
                            && t.chars().count() + text.chars().count() < MAX_BATCH_CHARS
                    }
                    _ => false,
                });
                if let Some(delivery) = open {
                    if let NotificationPayload::ChatMessage { text: t, .. } = &mut delivery.payload {
                        t.push('\n');
                        t.push_str(text);
                    }
                    delivery.entries.push(entry);
                    continue;
                }
            }
        }
        deliveries.push(Delivery {
            payload: entry.payload.clone(),
            entries: vec![entry],
        });
    }
    deliveries
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notifications::{DispatchDelay, NotificationStatus};
    use crate::state_machine::repository::SqliteRepository;
    use crate::testing::Harness;
    use chrono::TimeZone;
    use rusqlite::params;

    fn noon() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    fn social(text: &str) -> NotificationPayload {
        NotificationPayload::SocialPost {
            text: text.to_string(),
            link: None,
        }
    }

    fn sqlite_harness() -> (Arc<SqliteRepository>, Harness) {
        let repo = Arc::new(SqliteRepository::new_in_memory().unwrap());
        let harness = Harness::with_repository(repo.clone());
        (repo, harness)
    }

    /// (status, attempts) of one queue row.
    fn row_state(repo: &SqliteRepository, id: u64) -> (String, u32) {
        repo.conn
            .lock()
            .unwrap()
            .query_row(
                "SELECT status, attempts FROM notification_queue WHERE id = ?1",
                params![id as i64],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .unwrap()
    }

    async fn pending(harness: &Harness) -> Vec<QueuedNotification> {
        harness
            .repo
            .due(noon() + chrono::Duration::days(7), 100)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_failed_send_is_rescheduled_with_backoff() {
        let harness = Harness::new();
        let start = noon();
        harness
            .queue
            .enqueue(
                NotificationPayload::chat("announcements", "hello"),
                DispatchDelay::Immediate,
                None,
                start,
            )
            .await
            .unwrap();
        harness.chat.set_failing(true);

        let report = harness.dispatcher.dispatch_due(start).await.unwrap();
        assert_eq!(report, DispatchReport { delivered: 0, rescheduled: 1, failed: 0 });
        let entry = &pending(&harness).await[0];
        assert_eq!(entry.attempts, 1);
        assert_eq!(entry.dispatch_at, start + chrono::Duration::minutes(1));
        assert!(entry.last_error.as_deref().unwrap().contains("service unavailable"));

        // Not due again until the backoff has passed
        let early = harness
            .dispatcher
            .dispatch_due(start + chrono::Duration::seconds(30))
            .await
            .unwrap();
        assert!(early.is_empty());

        let second = start + chrono::Duration::minutes(1);
        harness.dispatcher.dispatch_due(second).await.unwrap();
        let entry = &pending(&harness).await[0];
        assert_eq!(entry.attempts, 2);
        assert_eq!(entry.dispatch_at, second + chrono::Duration::minutes(2));

        harness.chat.set_failing(false);
        let report = harness.dispatcher.dispatch_due(entry.dispatch_at).await.unwrap();
        assert_eq!(report.delivered, 1);
        assert_eq!(harness.chat.messages_to("announcements"), vec!["hello".to_string()]);
        assert!(pending(&harness).await.is_empty());
    }

    #[tokio::test]
    async fn test_exhausted_retries_fail_and_report_to_operators() {
        let (repo, harness) = sqlite_harness();
        let id = harness
            .queue
            .enqueue(social("Luke Skywalker is featured"), DispatchDelay::Immediate, None, noon())
            .await
            .unwrap()
            .unwrap();
        harness
            .social
            .fail_with(Some(CollaboratorError::http("social post", Some(502), "bad gateway")));

        let max_attempts = RetryPolicy::default().max_attempts;
        for attempt in 1..max_attempts {
            let at = pending(&harness).await[0].dispatch_at;
            let report = harness.dispatcher.dispatch_due(at).await.unwrap();
            assert_eq!(report.rescheduled, 1, "attempt {}", attempt);
            assert_eq!(row_state(&repo, id), ("pending".to_string(), attempt));
            assert!(harness.chat.messages_to("ops").is_empty());
        }

        let at = pending(&harness).await[0].dispatch_at;
        let report = harness.dispatcher.dispatch_due(at).await.unwrap();
        assert_eq!(report.failed, 1);
        assert_eq!(row_state(&repo, id), ("failed".to_string(), max_attempts));
        assert!(pending(&harness).await.is_empty());

        let reports = harness.chat.messages_to("ops");
        assert_eq!(reports.len(), 1);
        assert!(reports[0].starts_with("Undeliverable notifications:"));
        assert!(reports[0].contains(&format!("#{} (social, {} attempt(s))", id, max_attempts)));
    }

    #[tokio::test]
    async fn test_permanent_failure_is_not_retried() {
        let (repo, harness) = sqlite_harness();
        let id = harness
            .queue
            .enqueue(social("Mara Jade is featured"), DispatchDelay::Immediate, None, noon())
            .await
            .unwrap()
            .unwrap();
        harness.social.fail_with(Some(CollaboratorError::Auth {
            operation: "social post".to_string(),
            message: "bad app password".to_string(),
        }));

        let report = harness.dispatcher.dispatch_due(noon()).await.unwrap();
        assert_eq!(report.failed, 1);
        assert_eq!(row_state(&repo, id), ("failed".to_string(), 1));
        assert_eq!(harness.chat.messages_to("ops").len(), 1);
    }

    #[tokio::test]
    async fn test_stale_entries_get_exactly_one_attempt() {
        let (repo, harness) = sqlite_harness();
        let queued_at = noon() - chrono::Duration::hours(3);
        let chat = harness
            .queue
            .enqueue(
                NotificationPayload::chat("announcements", "late news"),
                DispatchDelay::Immediate,
                None,
                queued_at,
            )
            .await
            .unwrap()
            .unwrap();
        let post = harness
            .queue
            .enqueue(social("late post"), DispatchDelay::Immediate, None, queued_at)
            .await
            .unwrap()
            .unwrap();

        let stale = harness
            .queue
            .apply_restart_grace(noon(), chrono::Duration::hours(1))
            .await
            .unwrap();
        assert_eq!(stale, 2);

        // A retryable failure still ends a stale entry
        harness
            .social
            .fail_with(Some(CollaboratorError::http("social post", Some(503), "unavailable")));
        let report = harness.dispatcher.dispatch_due(noon()).await.unwrap();
        assert_eq!(report, DispatchReport { delivered: 1, rescheduled: 0, failed: 1 });
        assert_eq!(row_state(&repo, chat), ("delivered".to_string(), 1));
        assert_eq!(row_state(&repo, post), ("failed".to_string(), 1));
        assert_eq!(harness.chat.messages_to("announcements"), vec!["late news".to_string()]);
        assert_eq!(harness.chat.messages_to("ops").len(), 1);

        // Nothing comes back on a later pass
        harness.social.fail_with(None);
        let later = harness
            .dispatcher
            .dispatch_due(noon() + chrono::Duration::hours(2))
            .await
            .unwrap();
        assert!(later.is_empty());
        assert!(harness.social.posts().is_empty());
    }

    fn entry(id: u64, payload: NotificationPayload) -> QueuedNotification {
        QueuedNotification {
            id,
            payload,
            dispatch_at: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            created_at: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            dedupe_key: None,
            attempts: 0,
            status: NotificationStatus::Pending,
            stale: false,
            last_error: None,
        }
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 10,
            base_delay: chrono::Duration::minutes(1),
            max_delay: chrono::Duration::minutes(10),
        };
        assert_eq!(policy.backoff(1), chrono::Duration::minutes(1));
        assert_eq!(policy.backoff(2), chrono::Duration::minutes(2));
        assert_eq!(policy.backoff(4), chrono::Duration::minutes(8));
        assert_eq!(policy.backoff(5), chrono::Duration::minutes(10));
        assert_eq!(policy.backoff(40), chrono::Duration::minutes(10));
    }

    #[test]
    fn test_coalesce_merges_plain_chat_per_channel() {
        let due = vec![
            entry(1, NotificationPayload::chat("a", "one")),
            entry(2, NotificationPayload::chat("b", "two")),
            entry(3, NotificationPayload::chat("a", "three")),
            entry(
                4,
                NotificationPayload::ChatMessage {
                    channel: "a".into(),
                    text: "with reaction".into(),
                    reactions: vec!["wook".into()],
                },
            ),
        ];
        let deliveries = coalesce(due, 10);
        assert_eq!(deliveries.len(), 3);
        assert_eq!(
            deliveries[0].entries.iter().map(|e| e.id).collect::<Vec<_>>(),
            vec![1, 3]
        );
        assert_eq!(deliveries[0].payload, NotificationPayload::chat("a", "one\nthree"));
        assert_eq!(deliveries[2].entries[0].id, 4);
    }

    #[test]
    fn test_coalesce_respects_batch_size() {
        let due = (1..=5)
            .map(|i| entry(i, NotificationPayload::chat("a", format!("m{}", i))))
            .collect();
        let deliveries = coalesce(due, 2);
        let sizes: Vec<usize> = deliveries.iter().map(|d| d.entries.len()).collect();
        assert_eq!(sizes, vec![2, 2, 1]);
    }

    #[test]
    fn test_talk_section_is_appended_once() {
        let once = append_talk_section("Hello", "Archived", "Your nomination passed.");
        let twice = append_talk_section(&once, "Archived", "Your nomination passed.");
        assert_eq!(once, twice);
        assert!(once.contains("== Archived =="));
    }
}
