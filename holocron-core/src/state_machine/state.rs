//! Lifecycle records.
//!
//! A nomination and a review are separate records with their own status
//! enums, so a review outcome can never be written onto a nomination that
//! was never archived and vice versa.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::nomination::{
    ArchiveOutcome, ArticleTitle, IdentityKey, NominationId, NominationType, ProjectId, ReviewId,
    ReviewOutcome, UserName,
};
use crate::objection::Objection;

/// Where a nomination is in its lifecycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status")]
pub enum NominationStatus {
    /// Under discussion on its nomination page.
    Open,

    /// Approved by the board; archival edits not yet confirmed.
    Approved {
        approved_by: UserName,
        approved_at: DateTime<Utc>,
        suppress_message: bool,
        custom_message: Option<String>,
    },

    /// Promoted and archived.
    Archived {
        approved_by: UserName,
        archived_at: DateTime<Utc>,
    },

    Rejected {
        closed_by: UserName,
        closed_at: DateTime<Utc>,
    },

    Withdrawn {
        closed_by: UserName,
        closed_at: DateTime<Utc>,
    },

    /// The promoted article has an open review.
    UnderReview {
        archived_at: DateTime<Utc>,
        review_opened_at: DateTime<Utc>,
    },

    Passed { concluded_at: DateTime<Utc> },
    Probation { concluded_at: DateTime<Utc> },
    Revoked { concluded_at: DateTime<Utc> },
}

impl NominationStatus {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Approved { .. } => "approved",
            Self::Archived { .. } => "archived",
            Self::Rejected { .. } => "rejected",
            Self::Withdrawn { .. } => "withdrawn",
            Self::UnderReview { .. } => "under review",
            Self::Passed { .. } => "passed review",
            Self::Probation { .. } => "on probation",
            Self::Revoked { .. } => "revoked",
        }
    }

    pub fn is_open(&self) -> bool {
        matches!(self, Self::Open)
    }

    /// Outcome this status records for an archive request, if it records one.
    pub fn archive_outcome(&self) -> Option<ArchiveOutcome> {
        match self {
            Self::Open => None,
            Self::Rejected { .. } => Some(ArchiveOutcome::Unsuccessful),
            Self::Withdrawn { .. } => Some(ArchiveOutcome::Withdrawn),
            _ => Some(ArchiveOutcome::Successful),
        }
    }

    pub fn review_outcome(&self) -> Option<ReviewOutcome> {
        match self {
            Self::Passed { .. } => Some(ReviewOutcome::Passed),
            Self::Probation { .. } => Some(ReviewOutcome::Probation),
            Self::Revoked { .. } => Some(ReviewOutcome::Revoked),
            _ => None,
        }
    }

    pub fn after_review(outcome: ReviewOutcome, concluded_at: DateTime<Utc>) -> Self {
        match outcome {
            ReviewOutcome::Passed => Self::Passed { concluded_at },
            ReviewOutcome::Probation => Self::Probation { concluded_at },
            ReviewOutcome::Revoked => Self::Revoked { concluded_at },
        }
    }
}

impl fmt::Display for NominationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One nomination and everything the engine knows about it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Nomination {
    pub id: NominationId,
    pub nominator: UserName,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub projects: Vec<ProjectId>,
    /// Snapshot from detection, refreshed by archive requests.
    #[serde(default)]
    pub objections: Vec<Objection>,
    pub approval_marker: bool,
    /// The page left its tracking category without being archived.
    #[serde(default)]
    pub detached: bool,
    pub status: NominationStatus,
}

impl Nomination {
    pub fn is_active(&self) -> bool {
        self.status.is_open()
    }
}

/// A request to review a promoted article.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewRequest {
    pub requested_by: UserName,
    pub requested_at: DateTime<Utc>,
    #[serde(default)]
    pub context: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status")]
pub enum ReviewStatus {
    Open,
    Concluded {
        outcome: ReviewOutcome,
        marked_by: UserName,
        marked_at: DateTime<Utc>,
    },
}

impl ReviewStatus {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Concluded {
                outcome: ReviewOutcome::Passed,
                ..
            } => "passed",
            Self::Concluded {
                outcome: ReviewOutcome::Probation,
                ..
            } => "probation",
            Self::Concluded {
                outcome: ReviewOutcome::Revoked,
                ..
            } => "revoked",
        }
    }
}

/// Post-promotion review of one article. At most one per article and type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Review {
    pub id: ReviewId,
    pub opened_at: DateTime<Utc>,
    pub requests: Vec<ReviewRequest>,
    pub status: ReviewStatus,
}

impl Review {
    pub fn is_open(&self) -> bool {
        matches!(self.status, ReviewStatus::Open)
    }
}

/// Address of a lifecycle record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RecordKey {
    Nomination(NominationId),
    Review(ReviewId),
}

impl RecordKey {
    pub fn identity(&self) -> IdentityKey {
        match self {
            Self::Nomination(id) => id.identity(),
            Self::Review(id) => id.identity(),
        }
    }

    pub fn article(&self) -> &ArticleTitle {
        match self {
            Self::Nomination(id) => &id.article,
            Self::Review(id) => &id.article,
        }
    }

    pub fn kind(&self) -> NominationType {
        match self {
            Self::Nomination(id) => id.kind,
            Self::Review(id) => id.kind,
        }
    }
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Nomination(id) => write!(f, "{}", id),
            Self::Review(id) => write!(f, "{}", id),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Record {
    Nomination(Nomination),
    Review(Review),
}

impl Record {
    pub fn key(&self) -> RecordKey {
        match self {
            Self::Nomination(n) => RecordKey::Nomination(n.id.clone()),
            Self::Review(r) => RecordKey::Review(r.id.clone()),
        }
    }

    pub fn status_name(&self) -> &'static str {
        match self {
            Self::Nomination(n) => n.status.name(),
            Self::Review(r) => r.status.name(),
        }
    }

    pub fn as_nomination(&self) -> Option<&Nomination> {
        match self {
            Self::Nomination(n) => Some(n),
            Self::Review(_) => None,
        }
    }

    pub fn as_review(&self) -> Option<&Review> {
        match self {
            Self::Review(r) => Some(r),
            Self::Nomination(_) => None,
        }
    }
}
