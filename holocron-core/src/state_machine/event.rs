//! Events that drive lifecycle transitions.
//!
//! Detection events come from the change detector, request events from the
//! command dispatcher, and result events from the effect interpreter.

use chrono::{DateTime, Utc};

use crate::approval::ApprovalEvidence;
use crate::nomination::{ArchiveOutcome, ProjectId, ReviewOutcome, UserName};
use crate::objection::Objection;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    // =========================================================================
    // Detection Events
    // =========================================================================
    /// A nomination page is in its tracking category.
    NominationDetected {
        nominator: UserName,
        created_at: DateTime<Utc>,
        projects: Vec<ProjectId>,
        objections: Vec<Objection>,
        approval_marker: bool,
        /// False for pages older than the startup grace window.
        announce: bool,
    },

    /// A tracked nomination page left its category without being archived.
    PageRemoved { at: DateTime<Utc> },

    // =========================================================================
    // Command Events
    // =========================================================================
    ArchiveRequested {
        outcome: ArchiveOutcome,
        requested_by: UserName,
        at: DateTime<Utc>,
        /// Fresh reading of the nomination page. Required for a successful outcome.
        evidence: Option<ApprovalEvidence>,
        objections: Vec<Objection>,
        suppress_message: bool,
        custom_message: Option<String>,
    },

    WithdrawRequested {
        requested_by: UserName,
        at: DateTime<Utc>,
    },

    /// A review was requested for a promoted article.
    ReviewRequested {
        requested_by: UserName,
        at: DateTime<Utc>,
        context: Option<String>,
        /// Create the review page (command-triggered reviews).
        create_page: bool,
        announce: bool,
    },

    ReviewMarked {
        outcome: ReviewOutcome,
        marked_by: UserName,
        at: DateTime<Utc>,
    },

    // =========================================================================
    // Review Lineage Events
    // =========================================================================
    /// The promoted article's review opened.
    ReviewOpened { at: DateTime<Utc> },

    ReviewConcluded {
        outcome: ReviewOutcome,
        at: DateTime<Utc>,
    },

    // =========================================================================
    // Interpreter Results
    // =========================================================================
    /// Archival edits to the nomination pages went through.
    PagesUpdated { at: DateTime<Utc> },

    /// A wiki edit failed; the whole transition is abandoned.
    EditFailed { error: String },
}

impl Event {
    /// Short description for log lines (drops page snapshots).
    pub fn log_summary(&self) -> String {
        match self {
            Event::NominationDetected {
                nominator,
                objections,
                announce,
                ..
            } => format!(
                "NominationDetected {{ nominator: {}, objections: {}, announce: {} }}",
                nominator,
                objections.len(),
                announce
            ),
            Event::PageRemoved { .. } => "PageRemoved".to_string(),
            Event::ArchiveRequested {
                outcome,
                requested_by,
                ..
            } => format!(
                "ArchiveRequested {{ outcome: {}, by: {} }}",
                outcome, requested_by
            ),
            Event::WithdrawRequested { requested_by, .. } => {
                format!("WithdrawRequested {{ by: {} }}", requested_by)
            }
            Event::ReviewRequested {
                requested_by,
                create_page,
                ..
            } => format!(
                "ReviewRequested {{ by: {}, create_page: {} }}",
                requested_by, create_page
            ),
            Event::ReviewMarked {
                outcome, marked_by, ..
            } => format!("ReviewMarked {{ outcome: {}, by: {} }}", outcome, marked_by),
            Event::ReviewOpened { .. } => "ReviewOpened".to_string(),
            Event::ReviewConcluded { outcome, .. } => {
                format!("ReviewConcluded {{ outcome: {} }}", outcome)
            }
            Event::PagesUpdated { .. } => "PagesUpdated".to_string(),
            Event::EditFailed { error } => format!("EditFailed {{ error: {} }}", error),
        }
    }
}
