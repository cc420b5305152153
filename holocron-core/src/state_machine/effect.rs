//! Effects (side effects as data).
//!
//! Wiki effects run inside the transition loop and report back with events.
//! Everything marked post-commit runs only once the new record is durable,
//! and is stored alongside it until it has run.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::nomination::{
    ArchiveOutcome, ArticleTitle, NominationId, NominationType, ProjectId, ReviewId, ReviewOutcome,
    UserName,
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Effect {
    // =========================================================================
    // Wiki Effects
    // =========================================================================
    /// Transclude the nomination on its parent page and add the nominator category.
    RegisterNomination {
        id: NominationId,
        nominator: UserName,
    },

    /// Close the discussion, swap tracking categories, and for a successful
    /// outcome mark the article with its new status.
    ArchiveNominationPages {
        id: NominationId,
        outcome: ArchiveOutcome,
    },

    CreateReviewPage {
        review: ReviewId,
        requested_by: UserName,
        context: Option<String>,
    },

    /// Update the article's status markers and close the review page.
    ApplyReviewOutcome {
        review: ReviewId,
        outcome: ReviewOutcome,
    },

    // =========================================================================
    // Post-commit Effects
    // =========================================================================
    UpdateProjectPortfolios {
        id: NominationId,
        projects: Vec<ProjectId>,
    },

    RecordRanking {
        id: NominationId,
        nominator: UserName,
        kind: NominationType,
        year: i32,
    },

    Announce(Announcement),

    /// Move the article's archived nomination under review.
    ForwardReviewOpened {
        article: ArticleTitle,
        kind: NominationType,
        at: DateTime<Utc>,
    },

    ForwardReviewConcluded {
        article: ArticleTitle,
        kind: NominationType,
        outcome: ReviewOutcome,
        at: DateTime<Utc>,
    },

    ReportToOperators { message: String },

    // =========================================================================
    // Logging Effects
    // =========================================================================
    Log { level: LogLevel, message: String },
}

impl Effect {
    /// Whether this effect waits for the record to be committed.
    pub fn is_post_commit(&self) -> bool {
        matches!(
            self,
            Effect::UpdateProjectPortfolios { .. }
                | Effect::RecordRanking { .. }
                | Effect::Announce(_)
                | Effect::ForwardReviewOpened { .. }
                | Effect::ForwardReviewConcluded { .. }
                | Effect::ReportToOperators { .. }
        )
    }
}

/// Outbound messages, enqueued on the notification queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Announcement {
    NewNomination {
        id: NominationId,
        nominator: UserName,
        projects: Vec<ProjectId>,
    },
    NominationArchived {
        id: NominationId,
        outcome: ArchiveOutcome,
        nominator: UserName,
    },
    /// Delayed by a random window to spread posts out.
    SocialPost { id: NominationId },
    TalkPageAcknowledgment {
        id: NominationId,
        nominator: UserName,
        custom_message: Option<String>,
    },
    ReviewOpened {
        review: ReviewId,
        requested_by: UserName,
        context: Option<String>,
    },
    ReviewConcluded {
        review: ReviewId,
        outcome: ReviewOutcome,
    },
}

impl Announcement {
    /// Queue dedupe key. Replaying an outbox never posts twice.
    pub fn dedupe_key(&self) -> String {
        match self {
            Self::NewNomination { id, .. } => format!("new:{}", id),
            Self::NominationArchived { id, outcome, .. } => format!("archived:{}:{}", id, outcome),
            Self::SocialPost { id } => format!("social:{}", id),
            Self::TalkPageAcknowledgment { id, .. } => format!("talk:{}", id),
            Self::ReviewOpened {
                review,
                requested_by,
                ..
            } => format!("review-opened:{}:{}", review, requested_by.normalized()),
            Self::ReviewConcluded { review, outcome } => {
                format!("review-concluded:{}:{}", review, outcome)
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}
