//! Nominations with no stored record.

use super::{not_applicable, TransitionResult};
use crate::error::LifecycleError;
use crate::nomination::NominationId;
use crate::state_machine::effect::{Announcement, Effect, LogLevel};
use crate::state_machine::event::Event;
use crate::state_machine::state::{Nomination, NominationStatus, Record};

/// Only detection creates a nomination record.
pub fn handle(id: &NominationId, event: Event) -> Result<TransitionResult, LifecycleError> {
    match event {
        Event::NominationDetected {
            nominator,
            created_at,
            projects,
            objections,
            approval_marker,
            announce,
        } => {
            let mut effects = vec![
                Effect::RegisterNomination {
                    id: id.clone(),
                    nominator: nominator.clone(),
                },
                Effect::Log {
                    level: LogLevel::Info,
                    message: format!("Tracking new nomination {} by {}", id, nominator),
                },
            ];
            if announce {
                effects.push(Effect::Announce(Announcement::NewNomination {
                    id: id.clone(),
                    nominator: nominator.clone(),
                    projects: projects.clone(),
                }));
            }

            let nomination = Nomination {
                id: id.clone(),
                nominator,
                created_at,
                projects,
                objections,
                approval_marker,
                detached: false,
                status: NominationStatus::Open,
            };
            Ok(TransitionResult::applied(
                Record::Nomination(nomination),
                effects,
            ))
        }
        Event::ArchiveRequested { .. } | Event::WithdrawRequested { .. } => Err(
            LifecycleError::Validation(format!("{} is not a tracked nomination", id)),
        ),
        other => Err(not_applicable(format!("untracked {}", id), &other)),
    }
}

#[cfg(test)]
mod tests {
    use super::super::fixtures::*;
    use super::*;
    use crate::nomination::{ArchiveOutcome, ProjectId, UserName};

    fn detected(announce: bool) -> Event {
        Event::NominationDetected {
            nominator: UserName::from("Nominator"),
            created_at: at(1, 10),
            projects: vec![ProjectId::from("Bounty Hunters")],
            objections: vec![],
            approval_marker: false,
            announce,
        }
    }

    #[test]
    fn test_detection_opens_and_registers() {
        let result = handle(&nomination_id(), detected(true)).unwrap();
        let nomination = result.record.as_nomination().unwrap();
        assert_eq!(nomination.status, NominationStatus::Open);
        assert!(matches!(
            result.effects[0],
            Effect::RegisterNomination { .. }
        ));
        assert!(result
            .effects
            .iter()
            .any(|e| matches!(e, Effect::Announce(Announcement::NewNomination { .. }))));
    }

    #[test]
    fn test_detection_inside_grace_window_is_silent() {
        let result = handle(&nomination_id(), detected(false)).unwrap();
        assert!(!result
            .effects
            .iter()
            .any(|e| matches!(e, Effect::Announce(_))));
        assert!(result
            .effects
            .iter()
            .any(|e| matches!(e, Effect::RegisterNomination { .. })));
    }

    #[test]
    fn test_archive_of_unknown_nomination_fails_validation() {
        let result = handle(
            &nomination_id(),
            archive(ArchiveOutcome::Unsuccessful, "Board", at(5, 12)),
        );
        assert!(matches!(result, Err(LifecycleError::Validation(_))));
    }
}
