//! Status types for the status endpoint.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use holocron_core::state_machine::{Nomination, Review};

use crate::error::EngineError;
use crate::state_machine::interpreter::InterpreterContext;
use crate::state_machine::store::LifecycleStore;

/// An open nomination as shown on the status page.
#[derive(Debug, Serialize)]
pub struct OpenNominationEntry {
    pub page: String,
    pub nominator: String,
    pub created_at: DateTime<Utc>,
    pub unstruck_objections: usize,
    pub detached: bool,
}

impl From<&Nomination> for OpenNominationEntry {
    fn from(n: &Nomination) -> Self {
        Self {
            page: n.id.page_title(),
            nominator: n.nominator.to_string(),
            created_at: n.created_at,
            unstruck_objections: n.objections.iter().filter(|o| !o.struck).count(),
            detached: n.detached,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct OpenReviewEntry {
    pub page: String,
    pub opened_at: DateTime<Utc>,
    pub requests: usize,
}

impl From<&Review> for OpenReviewEntry {
    fn from(r: &Review) -> Self {
        Self {
            page: r.id.page_title(),
            opened_at: r.opened_at,
            requests: r.requests.len(),
        }
    }
}

/// Full status data for rendering.
#[derive(Debug, Serialize)]
pub struct StatusData {
    pub version: String,
    /// Record count per state name.
    pub records: BTreeMap<String, u64>,
    pub open_nominations: Vec<OpenNominationEntry>,
    pub open_reviews: Vec<OpenReviewEntry>,
    pub queued_notifications: usize,
    /// Ranking credits not yet on the published page.
    pub unpublished_rankings: u64,
}

impl StatusData {
    pub async fn collect(
        store: &LifecycleStore,
        ctx: &InterpreterContext,
        version: String,
    ) -> Result<Self, EngineError> {
        let records = store.repository().status_counts().await?;
        let nominations = store.open_nominations().await?;
        let reviews = store.open_reviews().await?;
        Ok(Self {
            version,
            records,
            open_nominations: nominations.iter().map(OpenNominationEntry::from).collect(),
            open_reviews: reviews.iter().map(OpenReviewEntry::from).collect(),
            queued_notifications: ctx.queue.pending_count().await?,
            unpublished_rankings: ctx.rankings.pending().await?,
        })
    }
}
