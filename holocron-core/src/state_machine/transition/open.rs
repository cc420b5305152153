//! Open nomination transitions.

use chrono::{DateTime, Utc};

use super::{not_applicable, TransitionResult};
use crate::approval::approval_problems;
use crate::error::LifecycleError;
use crate::nomination::{ArchiveOutcome, TypePolicy, UserName};
use crate::state_machine::effect::{Effect, LogLevel};
use crate::state_machine::event::Event;
use crate::state_machine::state::{Nomination, NominationStatus, Record};

/// Handle events for a nomination still under discussion.
pub fn handle(
    mut nomination: Nomination,
    event: Event,
    policy: &TypePolicy,
) -> Result<TransitionResult, LifecycleError> {
    match event {
        // Seen again in the category: only interesting if it had gone missing
        Event::NominationDetected {
            projects,
            objections,
            approval_marker,
            ..
        } => {
            if !nomination.detached {
                return Ok(TransitionResult::duplicate(Record::Nomination(nomination)));
            }
            nomination.detached = false;
            nomination.projects = projects;
            nomination.objections = objections;
            nomination.approval_marker = approval_marker;
            let message = format!("{} is back in its nomination category", nomination.id);
            Ok(TransitionResult::applied(
                Record::Nomination(nomination),
                vec![Effect::Log {
                    level: LogLevel::Info,
                    message,
                }],
            ))
        }

        Event::PageRemoved { .. } => {
            if nomination.detached {
                return Ok(TransitionResult::duplicate(Record::Nomination(nomination)));
            }
            nomination.detached = true;
            let message = format!(
                "{} left its nomination category without being archived",
                nomination.id
            );
            Ok(TransitionResult::applied(
                Record::Nomination(nomination),
                vec![
                    Effect::Log {
                        level: LogLevel::Warn,
                        message: message.clone(),
                    },
                    Effect::ReportToOperators { message },
                ],
            ))
        }

        Event::ArchiveRequested {
            outcome: ArchiveOutcome::Successful,
            requested_by,
            at,
            evidence,
            objections,
            suppress_message,
            custom_message,
        } => {
            nomination.objections = objections;
            let evidence = evidence.ok_or_else(|| {
                LifecycleError::Validation(format!(
                    "the page for {} could not be read",
                    nomination.id
                ))
            })?;
            let problems = approval_problems(&evidence, policy, nomination.created_at, at);
            if !problems.is_empty() {
                return Err(LifecycleError::Validation(format!(
                    "{} cannot be archived as successful: {}",
                    nomination.id,
                    problems.join("; ")
                )));
            }

            nomination.approval_marker = true;
            nomination.status = NominationStatus::Approved {
                approved_by: requested_by,
                approved_at: at,
                suppress_message,
                custom_message,
            };
            let effects = vec![Effect::ArchiveNominationPages {
                id: nomination.id.clone(),
                outcome: ArchiveOutcome::Successful,
            }];
            Ok(TransitionResult::applied(
                Record::Nomination(nomination),
                effects,
            ))
        }

        Event::ArchiveRequested {
            outcome: ArchiveOutcome::Unsuccessful,
            requested_by,
            at,
            objections,
            ..
        } => {
            nomination.objections = objections;
            nomination.status = NominationStatus::Rejected {
                closed_by: requested_by,
                closed_at: at,
            };
            let effects = vec![Effect::ArchiveNominationPages {
                id: nomination.id.clone(),
                outcome: ArchiveOutcome::Unsuccessful,
            }];
            Ok(TransitionResult::applied(
                Record::Nomination(nomination),
                effects,
            ))
        }

        Event::ArchiveRequested {
            outcome: ArchiveOutcome::Withdrawn,
            requested_by,
            at,
            ..
        }
        | Event::WithdrawRequested { requested_by, at } => withdraw(nomination, requested_by, at),

        Event::PagesUpdated { .. } => Ok(TransitionResult::duplicate(Record::Nomination(
            nomination,
        ))),

        Event::ReviewOpened { .. } | Event::ReviewConcluded { .. } => {
            Err(LifecycleError::Validation(format!(
                "{} is still open and has no promoted article to review",
                nomination.id
            )))
        }

        other => Err(not_applicable(&nomination.id, &other)),
    }
}

fn withdraw(
    mut nomination: Nomination,
    requested_by: UserName,
    at: DateTime<Utc>,
) -> Result<TransitionResult, LifecycleError> {
    if !nomination.nominator.same_as(&requested_by) {
        return Err(LifecycleError::Validation(format!(
            "only the nominator ({}) can withdraw {}",
            nomination.nominator, nomination.id
        )));
    }
    nomination.status = NominationStatus::Withdrawn {
        closed_by: requested_by,
        closed_at: at,
    };
    let effects = vec![Effect::ArchiveNominationPages {
        id: nomination.id.clone(),
        outcome: ArchiveOutcome::Withdrawn,
    }];
    Ok(TransitionResult::applied(
        Record::Nomination(nomination),
        effects,
    ))
}

#[cfg(test)]
mod tests {
    use super::super::fixtures::*;
    use super::super::Disposition;
    use super::*;
    use crate::approval::ApprovalEvidence;
    use crate::nomination::NominationType;

    fn policy() -> TypePolicy {
        TypePolicy::default_for(NominationType::Featured)
    }

    #[test]
    fn test_successful_archive_moves_to_approved() {
        let result = handle(
            open_nomination(),
            archive(ArchiveOutcome::Successful, "Board", at(5, 12)),
            &policy(),
        )
        .unwrap();
        let nomination = result.record.as_nomination().unwrap();
        assert!(matches!(nomination.status, NominationStatus::Approved { .. }));
        assert_eq!(
            result.effects,
            vec![Effect::ArchiveNominationPages {
                id: nomination_id(),
                outcome: ArchiveOutcome::Successful
            }]
        );
    }

    #[test]
    fn test_successful_archive_without_approval_stays_open() {
        let event = Event::ArchiveRequested {
            outcome: ArchiveOutcome::Successful,
            requested_by: UserName::from("Board"),
            at: at(5, 12),
            evidence: Some(ApprovalEvidence {
                approval_marker: false,
                ..ready_evidence()
            }),
            objections: vec![],
            suppress_message: false,
            custom_message: None,
        };
        let err = handle(open_nomination(), event, &policy()).unwrap_err();
        match err {
            LifecycleError::Validation(message) => {
                assert!(message.contains("approval template"), "{}", message)
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn test_archive_too_young_fails() {
        let err = handle(
            open_nomination(),
            archive(ArchiveOutcome::Successful, "Board", at(2, 9)),
            &policy(),
        )
        .unwrap_err();
        assert!(matches!(err, LifecycleError::Validation(_)));
    }

    #[test]
    fn test_unsuccessful_archive_rejects() {
        let result = handle(
            open_nomination(),
            archive(ArchiveOutcome::Unsuccessful, "Board", at(5, 12)),
            &policy(),
        )
        .unwrap();
        assert!(matches!(
            result.record.as_nomination().unwrap().status,
            NominationStatus::Rejected { .. }
        ));
    }

    #[test]
    fn test_withdraw_requires_nominator() {
        let err = handle(
            open_nomination(),
            Event::WithdrawRequested {
                requested_by: UserName::from("Someone Else"),
                at: at(3, 8),
            },
            &policy(),
        )
        .unwrap_err();
        assert!(matches!(err, LifecycleError::Validation(_)));

        let result = handle(
            open_nomination(),
            Event::WithdrawRequested {
                requested_by: UserName::from("nominator"),
                at: at(3, 8),
            },
            &policy(),
        )
        .unwrap();
        assert!(matches!(
            result.record.as_nomination().unwrap().status,
            NominationStatus::Withdrawn { .. }
        ));
    }

    #[test]
    fn test_detach_and_reattach() {
        let detached = handle(
            open_nomination(),
            Event::PageRemoved { at: at(3, 8) },
            &policy(),
        )
        .unwrap();
        assert!(detached
            .effects
            .iter()
            .any(|e| matches!(e, Effect::ReportToOperators { .. })));
        let nomination = detached.record.as_nomination().unwrap().clone();
        assert!(nomination.detached);

        let again = handle(nomination.clone(), Event::PageRemoved { at: at(3, 9) }, &policy())
            .unwrap();
        assert_eq!(again.disposition, Disposition::Duplicate);

        let back = handle(
            nomination,
            Event::NominationDetected {
                nominator: UserName::from("Nominator"),
                created_at: at(1, 10),
                projects: vec![],
                objections: vec![],
                approval_marker: true,
                announce: false,
            },
            &policy(),
        )
        .unwrap();
        let nomination = back.record.as_nomination().unwrap();
        assert!(!nomination.detached);
        assert!(nomination.approval_marker);
    }

    #[test]
    fn test_redetection_of_attached_nomination_is_duplicate() {
        let result = handle(
            open_nomination(),
            Event::NominationDetected {
                nominator: UserName::from("Nominator"),
                created_at: at(1, 10),
                projects: vec![],
                objections: vec![],
                approval_marker: false,
                announce: true,
            },
            &policy(),
        )
        .unwrap();
        assert_eq!(result.disposition, Disposition::Duplicate);
        assert!(result.effects.is_empty());
    }
}
