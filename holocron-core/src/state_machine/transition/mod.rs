//! Pure lifecycle transition function.
//!
//! `transition` takes the stored record (if any), an event and the policy
//! table, and returns the next record with the effects to run. It performs
//! no I/O. A rejected event comes back as a `LifecycleError` and the caller
//! keeps the record it had.
//!
//! Handlers, one module per record situation:
//! - `untracked`: no nomination record yet
//! - `open`: open nominations
//! - `closed`: approved, archived and terminal nominations
//! - `review`: review records, present or not

mod closed;
mod open;
mod review;
mod untracked;

use super::effect::Effect;
use super::event::Event;
use super::state::{Record, RecordKey};
use crate::error::LifecycleError;
use crate::nomination::PolicyTable;

/// Whether the event changed anything.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Applied,
    /// The event restated what the record already says. Nothing to persist.
    Duplicate,
}

/// Result of a state transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionResult {
    pub record: Record,
    pub effects: Vec<Effect>,
    pub disposition: Disposition,
}

impl TransitionResult {
    pub fn applied(record: Record, effects: Vec<Effect>) -> Self {
        Self {
            record,
            effects,
            disposition: Disposition::Applied,
        }
    }

    pub fn duplicate(record: Record) -> Self {
        Self {
            record,
            effects: vec![],
            disposition: Disposition::Duplicate,
        }
    }
}

/// Pure state transition function.
pub fn transition(
    record: Option<Record>,
    key: &RecordKey,
    event: Event,
    policy: &PolicyTable,
) -> Result<TransitionResult, LifecycleError> {
    if let Event::EditFailed { error } = event {
        return Err(LifecycleError::EditFailed(error));
    }

    match (record, key) {
        (None, RecordKey::Nomination(id)) => untracked::handle(id, event),
        (Some(Record::Nomination(nomination)), RecordKey::Nomination(_)) => {
            if nomination.status.is_open() {
                open::handle(nomination, event, policy.get(key.kind()))
            } else {
                closed::handle(nomination, event)
            }
        }
        (None, RecordKey::Review(id)) => review::handle(None, id, event),
        (Some(Record::Review(existing)), RecordKey::Review(id)) => {
            review::handle(Some(existing), id, event)
        }
        (Some(record), key) => Err(LifecycleError::Validation(format!(
            "{} is stored as a {} record",
            key,
            match record {
                Record::Nomination(_) => "nomination",
                Record::Review(_) => "review",
            }
        ))),
    }
}

/// Rejection for events that do not apply to a record kind.
pub(crate) fn not_applicable(what: impl std::fmt::Display, event: &Event) -> LifecycleError {
    LifecycleError::Validation(format!("{} cannot handle {}", what, event.log_summary()))
}

#[cfg(test)]
pub(crate) mod fixtures {
    use chrono::{DateTime, TimeZone, Utc};

    use crate::approval::ApprovalEvidence;
    use crate::nomination::{ArchiveOutcome, NominationId, NominationType, ProjectId, UserName};
    use crate::state_machine::event::Event;
    use crate::state_machine::state::{Nomination, NominationStatus};

    pub fn at(day: u32, hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, day, hour, 0, 0).unwrap()
    }

    pub fn nomination_id() -> NominationId {
        NominationId::new("Jango Fett", NominationType::Featured, 1)
    }

    pub fn open_nomination() -> Nomination {
        Nomination {
            id: nomination_id(),
            nominator: UserName::from("Nominator"),
            created_at: at(1, 10),
            projects: vec![ProjectId::from("Bounty Hunters")],
            objections: vec![],
            approval_marker: false,
            detached: false,
            status: NominationStatus::Open,
        }
    }

    pub fn ready_evidence() -> ApprovalEvidence {
        ApprovalEvidence {
            nominator: Some(UserName::from("Nominator")),
            nominated_at: Some(at(1, 10)),
            approval_marker: true,
            board_votes: 5,
            cross_board_votes: 0,
            total_votes: 5,
            unsigned_votes: 0,
        }
    }

    pub fn archive(outcome: ArchiveOutcome, by: &str, when: DateTime<Utc>) -> Event {
        Event::ArchiveRequested {
            outcome,
            requested_by: UserName::from(by),
            at: when,
            evidence: Some(ready_evidence()),
            objections: vec![],
            suppress_message: false,
            custom_message: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;
    use crate::nomination::{ArchiveOutcome, ReviewId, ReviewOutcome, UserName};
    use crate::state_machine::effect::Announcement;
    use crate::state_machine::state::NominationStatus;

    fn run(record: Option<Record>, key: &RecordKey, events: Vec<Event>) -> TransitionResult {
        let policy = PolicyTable::default();
        let mut record = record;
        let mut last = None;
        for event in events {
            let result = transition(record.clone(), key, event, &policy).unwrap();
            record = Some(result.record.clone());
            last = Some(result);
        }
        last.unwrap()
    }

    #[test]
    fn test_edit_failure_rejects_in_any_state() {
        let key = RecordKey::Nomination(nomination_id());
        let result = transition(
            Some(Record::Nomination(open_nomination())),
            &key,
            Event::EditFailed {
                error: "protected page".to_string(),
            },
            &PolicyTable::default(),
        );
        assert_eq!(
            result,
            Err(LifecycleError::EditFailed("protected page".to_string()))
        );
    }

    #[test]
    fn test_full_successful_archive_flow() {
        let key = RecordKey::Nomination(nomination_id());
        let result = run(
            Some(Record::Nomination(open_nomination())),
            &key,
            vec![
                archive(ArchiveOutcome::Successful, "Board", at(5, 12)),
                Event::PagesUpdated { at: at(5, 12) },
            ],
        );
        let nomination = result.record.as_nomination().unwrap();
        assert!(matches!(nomination.status, NominationStatus::Archived { .. }));
        assert!(result.effects.iter().any(|e| matches!(
            e,
            Effect::Announce(Announcement::TalkPageAcknowledgment { .. })
        )));
    }

    #[test]
    fn test_archive_is_idempotent_once_archived() {
        let key = RecordKey::Nomination(nomination_id());
        let archived = run(
            Some(Record::Nomination(open_nomination())),
            &key,
            vec![
                archive(ArchiveOutcome::Successful, "Board", at(5, 12)),
                Event::PagesUpdated { at: at(5, 12) },
            ],
        );
        let again = transition(
            Some(archived.record.clone()),
            &key,
            archive(ArchiveOutcome::Successful, "Board", at(5, 13)),
            &PolicyTable::default(),
        )
        .unwrap();
        assert_eq!(again.disposition, Disposition::Duplicate);
        assert!(again.effects.is_empty());
        assert_eq!(again.record, archived.record);
    }

    #[test]
    fn test_review_key_against_nomination_record_is_rejected() {
        let key = RecordKey::Review(ReviewId::new("Jango Fett", crate::NominationType::Featured, 1));
        let result = transition(
            Some(Record::Nomination(open_nomination())),
            &key,
            Event::ReviewMarked {
                outcome: ReviewOutcome::Passed,
                marked_by: UserName::from("Board"),
                at: at(5, 12),
            },
            &PolicyTable::default(),
        );
        assert!(matches!(result, Err(LifecycleError::Validation(_))));
    }
}
