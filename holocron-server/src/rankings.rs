//! Ranking aggregator.
//!
//! Successful archivals credit their nominator once per nomination. After
//! `threshold` credits the whole rankings page is rebuilt from the
//! persisted entries; the counter only drops once the edit went through.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use holocron_core::ranking::{all_time, render_rankings, RankingEntry};
use holocron_core::{NominationId, UserName};

use crate::collaborators::{bounded, WikiClient};
use crate::error::EngineError;
use crate::state_machine::repository::Repository;

/// What one publish wrote.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishReport {
    pub users: usize,
    /// Credits this publish covered.
    pub covered: u64,
}

pub struct RankingAggregator {
    repo: Arc<dyn Repository>,
    wiki: Arc<dyn WikiClient>,
    page: String,
    excluded: Vec<UserName>,
    threshold: u64,
    call_timeout: Duration,
    /// One publish at a time; a forced publish and a threshold publish
    /// would otherwise both acknowledge the same credits.
    publishing: Mutex<()>,
}

impl RankingAggregator {
    pub fn new(
        repo: Arc<dyn Repository>,
        wiki: Arc<dyn WikiClient>,
        page: impl Into<String>,
        excluded: Vec<UserName>,
        threshold: u64,
        call_timeout: Duration,
    ) -> Self {
        Self {
            repo,
            wiki,
            page: page.into(),
            excluded,
            threshold: threshold.max(1),
            call_timeout,
            publishing: Mutex::new(()),
        }
    }

    /// Credit a successful nomination. Returns false when it was already
    /// credited. A publish failure is logged and retried on the next credit.
    pub async fn record_success(
        &self,
        id: &NominationId,
        nominator: &UserName,
        year: i32,
    ) -> Result<bool, EngineError> {
        let Some(pending) = self.repo.credit(id, nominator, year).await? else {
            debug!("{} was already credited to {}", id, nominator);
            return Ok(false);
        };
        info!(
            "Credited {} to {} for {} ({} since last publish)",
            id, nominator, year, pending
        );

        if pending >= self.threshold {
            if let Err(e) = self.publish().await {
                warn!("Rankings publish after {} credits failed: {}", pending, e);
            }
        }
        Ok(true)
    }

    /// Rebuild and save the rankings page from every persisted entry.
    pub async fn publish(&self) -> Result<PublishReport, EngineError> {
        let _guard = self.publishing.lock().await;

        let covered = self.repo.pending_since_publish().await?;
        let entries = self.repo.ranking_entries().await?;
        let content = render_page(&entries, &self.excluded);
        let users = all_time(&entries).len();

        let transform = |_: &str| content.clone();
        bounded(
            self.call_timeout,
            "publish rankings",
            self.wiki
                .edit_page(&self.page, &transform, "Updating status article rankings"),
        )
        .await?;

        self.repo.acknowledge_publish(covered).await?;
        info!(
            "Published rankings for {} users ({} new credits) at {}",
            users,
            covered,
            Utc::now()
        );
        Ok(PublishReport { users, covered })
    }

    pub async fn pending(&self) -> Result<u64, EngineError> {
        Ok(self.repo.pending_since_publish().await?)
    }
}

/// All-time table first, then one table per year, newest first.
pub fn render_page(entries: &[RankingEntry], excluded: &[UserName]) -> String {
    let mut sections = vec![render_rankings("All time", &all_time(entries), excluded)];

    let years: BTreeSet<i32> = entries.iter().map(|e| e.year).collect();
    for year in years.into_iter().rev() {
        let rows: Vec<RankingEntry> = entries.iter().filter(|e| e.year == year).cloned().collect();
        sections.push(render_rankings(&year.to_string(), &rows, excluded));
    }
    sections.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state_machine::repository::{InMemoryRepository, RankingRepository};
    use crate::testing::FakeWiki;
    use holocron_core::NominationType;

    fn aggregator(
        repo: Arc<InMemoryRepository>,
        wiki: Arc<FakeWiki>,
        threshold: u64,
    ) -> RankingAggregator {
        RankingAggregator::new(
            repo,
            wiki,
            "Rankings",
            vec![UserName::from("Retired")],
            threshold,
            Duration::from_secs(5),
        )
    }

    fn nomination(article: &str, kind: NominationType) -> NominationId {
        NominationId::new(article, kind, 1)
    }

    #[tokio::test]
    async fn test_credit_is_counted_once_per_nomination() {
        let repo = Arc::new(InMemoryRepository::new());
        let wiki = Arc::new(FakeWiki::new());
        let rankings = aggregator(repo.clone(), wiki.clone(), 10);
        let id = nomination("Ahsoka Tano", NominationType::Featured);
        let user = UserName::from("Tommy");

        assert!(rankings.record_success(&id, &user, 2024).await.unwrap());
        assert!(!rankings.record_success(&id, &user, 2024).await.unwrap());

        let entries = repo.ranking_entries().await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].featured, 1);
        assert_eq!(rankings.pending().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_threshold_triggers_publish_and_resets_counter() {
        let repo = Arc::new(InMemoryRepository::new());
        let wiki = Arc::new(FakeWiki::new());
        let rankings = aggregator(repo.clone(), wiki.clone(), 3);
        let user = UserName::from("Tommy");

        for article in ["A", "B"] {
            rankings
                .record_success(&nomination(article, NominationType::Good), &user, 2024)
                .await
                .unwrap();
        }
        assert!(wiki.page("Rankings").is_none());

        rankings
            .record_success(&nomination("C", NominationType::Good), &user, 2024)
            .await
            .unwrap();
        let page = wiki.page("Rankings").unwrap();
        assert!(page.contains("[[User:Tommy|Tommy]] || 0 || 3 || 0 || 3 || 9"));
        assert_eq!(rankings.pending().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_failed_publish_keeps_counter() {
        let repo = Arc::new(InMemoryRepository::new());
        let wiki = Arc::new(FakeWiki::new());
        wiki.fail_edits_to("Rankings");
        let rankings = aggregator(repo.clone(), wiki.clone(), 1);

        rankings
            .record_success(
                &nomination("A", NominationType::Comprehensive),
                &UserName::from("Tommy"),
                2023,
            )
            .await
            .unwrap();
        assert_eq!(rankings.pending().await.unwrap(), 1);

        wiki.allow_edits_to("Rankings");
        let report = rankings.publish().await.unwrap();
        assert_eq!(report.covered, 1);
        assert_eq!(rankings.pending().await.unwrap(), 0);
    }

    #[test]
    fn test_render_page_orders_years_newest_first() {
        let mut older = RankingEntry::new(UserName::from("Tommy"), 2022);
        older.increment(NominationType::Featured);
        let mut newer = RankingEntry::new(UserName::from("Retired"), 2024);
        newer.increment(NominationType::Good);

        let page = render_page(&[older, newer], &[UserName::from("Retired")]);
        let all_time_at = page.find("==All time==").unwrap();
        let newer_at = page.find("==2024==").unwrap();
        let older_at = page.find("==2022==").unwrap();
        assert!(all_time_at < newer_at && newer_at < older_at);
        assert!(page.contains("<s>[[User:Retired|Retired]]</s>"));
        insta::assert_snapshot!(page.trim_end(), @r###"
        ==All time==
        {| class="wikitable sortable"
        ! Rank !! User !! FA !! GA !! CA !! Total !! Score
        |-
        | 1 || [[User:Tommy|Tommy]] || 1 || 0 || 0 || 1 || 5
        |-
        | 2 || <s>[[User:Retired|Retired]]</s> || 0 || 1 || 0 || 1 || 3
        |}

        ==2024==
        {| class="wikitable sortable"
        ! Rank !! User !! FA !! GA !! CA !! Total !! Score
        |-
        | 1 || <s>[[User:Retired|Retired]]</s> || 0 || 1 || 0 || 1 || 3
        |}

        ==2022==
        {| class="wikitable sortable"
        ! Rank !! User !! FA !! GA !! CA !! Total !! Score
        |-
        | 1 || [[User:Tommy|Tommy]] || 1 || 0 || 0 || 1 || 5
        |}
        "###);
    }
}
