//! Transitions for nominations that are no longer open.
//!
//! Approved nominations are waiting for their archival edits. Everything
//! else is terminal for archive requests; the only way out of `Archived` is
//! the review path.

use chrono::Datelike;

use super::{not_applicable, TransitionResult};
use crate::error::LifecycleError;
use crate::nomination::ArchiveOutcome;
use crate::state_machine::effect::{Announcement, Effect, LogLevel};
use crate::state_machine::event::Event;
use crate::state_machine::state::{Nomination, NominationStatus, Record};

pub fn handle(mut nomination: Nomination, event: Event) -> Result<TransitionResult, LifecycleError> {
    match (nomination.status.clone(), event) {
        // =====================================================================
        // Archival edits confirmed
        // =====================================================================
        (
            NominationStatus::Approved {
                approved_by,
                suppress_message,
                custom_message,
                ..
            },
            Event::PagesUpdated { at },
        ) => {
            let mut effects = vec![
                Effect::Log {
                    level: LogLevel::Info,
                    message: format!("Archived {} as successful", nomination.id),
                },
                // Credit lands in the year of archival, not of nomination
                Effect::RecordRanking {
                    id: nomination.id.clone(),
                    nominator: nomination.nominator.clone(),
                    kind: nomination.id.kind,
                    year: at.year(),
                },
                Effect::Announce(Announcement::NominationArchived {
                    id: nomination.id.clone(),
                    outcome: ArchiveOutcome::Successful,
                    nominator: nomination.nominator.clone(),
                }),
                Effect::Announce(Announcement::SocialPost {
                    id: nomination.id.clone(),
                }),
            ];
            // Self-archival and "(no message)" skip the acknowledgment
            if !suppress_message && !approved_by.same_as(&nomination.nominator) {
                effects.push(Effect::Announce(Announcement::TalkPageAcknowledgment {
                    id: nomination.id.clone(),
                    nominator: nomination.nominator.clone(),
                    custom_message,
                }));
            }
            if !nomination.projects.is_empty() {
                effects.push(Effect::UpdateProjectPortfolios {
                    id: nomination.id.clone(),
                    projects: nomination.projects.clone(),
                });
            }
            nomination.status = NominationStatus::Archived {
                approved_by,
                archived_at: at,
            };
            Ok(TransitionResult::applied(Record::Nomination(nomination), effects))
        }

        (NominationStatus::Rejected { .. } | NominationStatus::Withdrawn { .. }, Event::PagesUpdated { .. }) => {
            let outcome = nomination
                .status
                .archive_outcome()
                .unwrap_or(ArchiveOutcome::Unsuccessful);
            let effects = vec![
                Effect::Log {
                    level: LogLevel::Info,
                    message: format!("Archived {} as {}", nomination.id, outcome),
                },
                Effect::Announce(Announcement::NominationArchived {
                    id: nomination.id.clone(),
                    outcome,
                    nominator: nomination.nominator.clone(),
                }),
            ];
            Ok(TransitionResult::applied(Record::Nomination(nomination), effects))
        }

        (_, Event::PagesUpdated { .. }) => {
            Ok(TransitionResult::duplicate(Record::Nomination(nomination)))
        }

        // Approved but the edits never landed: try them again
        (
            NominationStatus::Approved { .. },
            Event::ArchiveRequested {
                outcome: ArchiveOutcome::Successful,
                ..
            },
        ) => {
            let effects = vec![Effect::ArchiveNominationPages {
                id: nomination.id.clone(),
                outcome: ArchiveOutcome::Successful,
            }];
            Ok(TransitionResult::applied(Record::Nomination(nomination), effects))
        }

        // =====================================================================
        // Repeated closing requests
        // =====================================================================
        (status, Event::ArchiveRequested { outcome, .. }) => {
            repeat_close(status, outcome, nomination)
        }
        (status, Event::WithdrawRequested { .. }) => {
            repeat_close(status, ArchiveOutcome::Withdrawn, nomination)
        }

        // Detection and reconcile are no-ops once closed
        (_, Event::NominationDetected { .. } | Event::PageRemoved { .. }) => {
            Ok(TransitionResult::duplicate(Record::Nomination(nomination)))
        }

        // =====================================================================
        // Review lineage
        // =====================================================================
        (NominationStatus::Archived { archived_at, .. }, Event::ReviewOpened { at }) => {
            nomination.status = NominationStatus::UnderReview {
                archived_at,
                review_opened_at: at,
            };
            let message = format!("{} is under review", nomination.id);
            Ok(TransitionResult::applied(
                Record::Nomination(nomination),
                vec![Effect::Log {
                    level: LogLevel::Info,
                    message,
                }],
            ))
        }
        (NominationStatus::UnderReview { .. }, Event::ReviewOpened { .. }) => {
            Ok(TransitionResult::duplicate(Record::Nomination(nomination)))
        }

        (
            NominationStatus::Archived { .. } | NominationStatus::UnderReview { .. },
            Event::ReviewConcluded { outcome, at },
        ) => {
            nomination.status = NominationStatus::after_review(outcome, at);
            let message = format!("Review of {} concluded: {}", nomination.id, outcome);
            Ok(TransitionResult::applied(
                Record::Nomination(nomination),
                vec![Effect::Log {
                    level: LogLevel::Info,
                    message,
                }],
            ))
        }

        // Review outcomes are absorbing; later reviews of the article leave
        // the nomination where the first one put it
        (status, Event::ReviewOpened { .. } | Event::ReviewConcluded { .. })
            if status.review_outcome().is_some() =>
        {
            Ok(TransitionResult::duplicate(Record::Nomination(nomination)))
        }

        (status, Event::ReviewOpened { .. } | Event::ReviewConcluded { .. }) => {
            Err(LifecycleError::Validation(format!(
                "{} is {} and cannot be reviewed",
                nomination.id, status
            )))
        }

        (_, other) => Err(not_applicable(&nomination.id, &other)),
    }
}

fn repeat_close(
    status: NominationStatus,
    requested: ArchiveOutcome,
    nomination: Nomination,
) -> Result<TransitionResult, LifecycleError> {
    if status.archive_outcome() == Some(requested) {
        Ok(TransitionResult::duplicate(Record::Nomination(nomination)))
    } else {
        Err(LifecycleError::Conflict(format!(
            "{} was already closed ({}); cannot archive it as {}",
            nomination.id, status, requested
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::super::fixtures::*;
    use super::super::Disposition;
    use super::*;
    use crate::nomination::{ReviewOutcome, UserName};
    use chrono::{TimeZone, Utc};

    fn approved(by: &str, suppress_message: bool) -> Nomination {
        Nomination {
            status: NominationStatus::Approved {
                approved_by: UserName::from(by),
                approved_at: at(5, 12),
                suppress_message,
                custom_message: Some("Great work".to_string()),
            },
            ..open_nomination()
        }
    }

    fn archived() -> Nomination {
        Nomination {
            status: NominationStatus::Archived {
                approved_by: UserName::from("Board"),
                archived_at: at(5, 12),
            },
            ..open_nomination()
        }
    }

    fn count_talk_acks(effects: &[Effect]) -> usize {
        effects
            .iter()
            .filter(|e| {
                matches!(
                    e,
                    Effect::Announce(Announcement::TalkPageAcknowledgment { .. })
                )
            })
            .count()
    }

    #[test]
    fn test_pages_updated_archives_with_success_effects() {
        let result = handle(approved("Board", false), Event::PagesUpdated { at: at(5, 12) }).unwrap();
        assert!(matches!(
            result.record.as_nomination().unwrap().status,
            NominationStatus::Archived { .. }
        ));
        assert!(result.effects.iter().any(|e| matches!(e, Effect::RecordRanking { year: 2024, .. })));
        assert!(result
            .effects
            .iter()
            .any(|e| matches!(e, Effect::Announce(Announcement::SocialPost { .. }))));
        assert!(result
            .effects
            .iter()
            .any(|e| matches!(e, Effect::UpdateProjectPortfolios { .. })));
        assert_eq!(count_talk_acks(&result.effects), 1);
    }

    #[test]
    fn test_ranking_credit_uses_archival_year() {
        let december = Utc.with_ymd_and_hms(2023, 12, 28, 18, 0, 0).unwrap();
        let january = Utc.with_ymd_and_hms(2024, 1, 5, 9, 0, 0).unwrap();
        let nomination = Nomination {
            created_at: december,
            ..approved("Board", false)
        };
        let result = handle(nomination, Event::PagesUpdated { at: january }).unwrap();
        let years: Vec<i32> = result
            .effects
            .iter()
            .filter_map(|e| match e {
                Effect::RecordRanking { year, .. } => Some(*year),
                _ => None,
            })
            .collect();
        assert_eq!(years, vec![2024]);
    }

    #[test]
    fn test_acknowledgment_suppressed_for_self_archival_and_flag() {
        let own = handle(approved("nominator", false), Event::PagesUpdated { at: at(5, 12) }).unwrap();
        assert_eq!(count_talk_acks(&own.effects), 0);
        let flagged = handle(approved("Board", true), Event::PagesUpdated { at: at(5, 12) }).unwrap();
        assert_eq!(count_talk_acks(&flagged.effects), 0);
    }

    #[test]
    fn test_differing_outcome_on_archived_conflicts() {
        let err = handle(
            archived(),
            archive(ArchiveOutcome::Unsuccessful, "Board", at(6, 1)),
        )
        .unwrap_err();
        assert!(matches!(err, LifecycleError::Conflict(_)));
    }

    #[test]
    fn test_withdraw_after_withdrawal_is_duplicate() {
        let withdrawn = Nomination {
            status: NominationStatus::Withdrawn {
                closed_by: UserName::from("Nominator"),
                closed_at: at(3, 1),
            },
            ..open_nomination()
        };
        let result = handle(
            withdrawn,
            Event::WithdrawRequested {
                requested_by: UserName::from("Nominator"),
                at: at(3, 2),
            },
        )
        .unwrap();
        assert_eq!(result.disposition, Disposition::Duplicate);
    }

    #[test]
    fn test_review_path() {
        let under = handle(archived(), Event::ReviewOpened { at: at(20, 1) }).unwrap();
        let nomination = under.record.as_nomination().unwrap().clone();
        assert!(matches!(nomination.status, NominationStatus::UnderReview { .. }));

        let concluded = handle(
            nomination,
            Event::ReviewConcluded {
                outcome: ReviewOutcome::Probation,
                at: at(25, 1),
            },
        )
        .unwrap();
        let nomination = concluded.record.as_nomination().unwrap().clone();
        assert!(matches!(nomination.status, NominationStatus::Probation { .. }));

        let same = handle(
            nomination.clone(),
            Event::ReviewConcluded {
                outcome: ReviewOutcome::Probation,
                at: at(26, 1),
            },
        )
        .unwrap();
        assert_eq!(same.disposition, Disposition::Duplicate);

        let later = handle(
            nomination.clone(),
            Event::ReviewConcluded {
                outcome: ReviewOutcome::Revoked,
                at: at(26, 1),
            },
        )
        .unwrap();
        assert_eq!(later.disposition, Disposition::Duplicate);
        assert_eq!(later.record.as_nomination().unwrap().status, nomination.status);

        let reopened = handle(nomination, Event::ReviewOpened { at: at(27, 1) }).unwrap();
        assert_eq!(reopened.disposition, Disposition::Duplicate);
    }

    #[test]
    fn test_rejected_nomination_cannot_be_reviewed() {
        let rejected = Nomination {
            status: NominationStatus::Rejected {
                closed_by: UserName::from("Board"),
                closed_at: at(3, 1),
            },
            ..open_nomination()
        };
        let result = handle(rejected, Event::ReviewOpened { at: at(20, 1) });
        assert!(matches!(result, Err(LifecycleError::Validation(_))));
    }
}
