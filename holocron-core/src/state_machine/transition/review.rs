//! Review transitions.

use super::{not_applicable, TransitionResult};
use crate::error::LifecycleError;
use crate::nomination::ReviewId;
use crate::state_machine::effect::{Announcement, Effect, LogLevel};
use crate::state_machine::event::Event;
use crate::state_machine::state::{Record, Review, ReviewRequest, ReviewStatus};

/// Handle an event for a review, creating it on the first request.
pub fn handle(
    review: Option<Review>,
    id: &ReviewId,
    event: Event,
) -> Result<TransitionResult, LifecycleError> {
    match (review, event) {
        (
            None,
            Event::ReviewRequested {
                requested_by,
                at,
                context,
                create_page,
                announce,
            },
        ) => {
            let mut effects = Vec::new();
            if create_page {
                effects.push(Effect::CreateReviewPage {
                    review: id.clone(),
                    requested_by: requested_by.clone(),
                    context: context.clone(),
                });
            }
            effects.push(Effect::Log {
                level: LogLevel::Info,
                message: format!("Opened {} at the request of {}", id, requested_by),
            });
            effects.push(Effect::ForwardReviewOpened {
                article: id.article.clone(),
                kind: id.kind,
                at,
            });
            if announce {
                effects.push(Effect::Announce(Announcement::ReviewOpened {
                    review: id.clone(),
                    requested_by: requested_by.clone(),
                    context: context.clone(),
                }));
            }
            let review = Review {
                id: id.clone(),
                opened_at: at,
                requests: vec![ReviewRequest {
                    requested_by,
                    requested_at: at,
                    context,
                }],
                status: ReviewStatus::Open,
            };
            Ok(TransitionResult::applied(Record::Review(review), effects))
        }

        (None, Event::ReviewMarked { .. }) => Err(LifecycleError::Validation(format!(
            "there is no open {}",
            id
        ))),

        (None, other) => Err(not_applicable(id, &other)),

        (
            Some(mut review),
            Event::ReviewRequested {
                requested_by,
                at,
                context,
                create_page,
                announce,
            },
        ) => {
            if !review.is_open() {
                return Err(LifecycleError::Conflict(format!(
                    "{} already concluded as {}; request {} instead",
                    id,
                    review.status.name(),
                    id.next()
                )));
            }
            let repeated = review
                .requests
                .iter()
                .any(|r| r.requested_by.same_as(&requested_by) && r.requested_at == at);
            // Detection of a page that is already tracked adds nobody
            if repeated || !create_page {
                return Ok(TransitionResult::duplicate(Record::Review(review)));
            }

            let mut effects = vec![Effect::CreateReviewPage {
                review: id.clone(),
                requested_by: requested_by.clone(),
                context: context.clone(),
            }];
            if announce {
                effects.push(Effect::Announce(Announcement::ReviewOpened {
                    review: id.clone(),
                    requested_by: requested_by.clone(),
                    context: context.clone(),
                }));
            }
            review.requests.push(ReviewRequest {
                requested_by,
                requested_at: at,
                context,
            });
            Ok(TransitionResult::applied(Record::Review(review), effects))
        }

        (
            Some(mut review),
            Event::ReviewMarked {
                outcome,
                marked_by,
                at,
            },
        ) => match &review.status {
            ReviewStatus::Open => {
                review.status = ReviewStatus::Concluded {
                    outcome,
                    marked_by: marked_by.clone(),
                    marked_at: at,
                };
                let effects = vec![
                    Effect::ApplyReviewOutcome {
                        review: id.clone(),
                        outcome,
                    },
                    Effect::Log {
                        level: LogLevel::Info,
                        message: format!("{} marked {} by {}", id, outcome, marked_by),
                    },
                    Effect::ForwardReviewConcluded {
                        article: id.article.clone(),
                        kind: id.kind,
                        outcome,
                        at,
                    },
                    Effect::Announce(Announcement::ReviewConcluded {
                        review: id.clone(),
                        outcome,
                    }),
                ];
                Ok(TransitionResult::applied(Record::Review(review), effects))
            }
            ReviewStatus::Concluded {
                outcome: previous, ..
            } => {
                if *previous == outcome {
                    Ok(TransitionResult::duplicate(Record::Review(review)))
                } else {
                    Err(LifecycleError::Conflict(format!(
                        "{} already concluded as {}; cannot mark it {}",
                        id, previous, outcome
                    )))
                }
            }
        },

        (Some(_), other) => Err(not_applicable(id, &other)),
    }
}

#[cfg(test)]
mod tests {
    use super::super::fixtures::at;
    use super::super::Disposition;
    use super::*;
    use crate::nomination::{NominationType, ReviewOutcome, UserName};

    fn id() -> ReviewId {
        ReviewId::new("Boba Fett", NominationType::Good, 1)
    }

    fn request(by: &str, day: u32) -> Event {
        Event::ReviewRequested {
            requested_by: UserName::from(by),
            at: at(day, 9),
            context: None,
            create_page: true,
            announce: true,
        }
    }

    fn mark(outcome: ReviewOutcome) -> Event {
        Event::ReviewMarked {
            outcome,
            marked_by: UserName::from("Board"),
            at: at(28, 9),
        }
    }

    fn open_review() -> Review {
        match handle(None, &id(), request("First", 10)).unwrap().record {
            Record::Review(r) => r,
            other => panic!("unexpected record {:?}", other),
        }
    }

    #[test]
    fn test_first_request_opens_review_and_forwards() {
        let result = handle(None, &id(), request("First", 10)).unwrap();
        assert!(matches!(result.effects[0], Effect::CreateReviewPage { .. }));
        assert!(result
            .effects
            .iter()
            .any(|e| matches!(e, Effect::ForwardReviewOpened { .. })));
    }

    #[test]
    fn test_second_request_appends() {
        let result = handle(Some(open_review()), &id(), request("Second", 11)).unwrap();
        let review = result.record.as_review().unwrap();
        assert_eq!(review.requests.len(), 2);
        assert!(review.is_open());
        assert!(!result
            .effects
            .iter()
            .any(|e| matches!(e, Effect::ForwardReviewOpened { .. })));
    }

    #[test]
    fn test_identical_request_is_duplicate() {
        let result = handle(Some(open_review()), &id(), request("first", 10)).unwrap();
        assert_eq!(result.disposition, Disposition::Duplicate);
    }

    #[test]
    fn test_detected_page_of_tracked_review_adds_no_request() {
        let detected = Event::ReviewRequested {
            requested_by: UserName::from("HolocronBot"),
            at: at(12, 9),
            context: None,
            create_page: false,
            announce: false,
        };
        let result = handle(Some(open_review()), &id(), detected).unwrap();
        assert_eq!(result.disposition, Disposition::Duplicate);
        assert_eq!(result.record.as_review().unwrap().requests.len(), 1);
    }

    #[test]
    fn test_next_review_opens_fresh_after_conclusion() {
        let concluded = handle(Some(open_review()), &id(), mark(ReviewOutcome::Passed))
            .unwrap()
            .record
            .as_review()
            .unwrap()
            .clone();
        let err = handle(Some(concluded), &id(), request("Late", 29)).unwrap_err();
        assert!(err.to_string().contains("(second)"), "{}", err);

        let second = handle(None, &id().next(), request("Late", 29)).unwrap();
        let review = second.record.as_review().unwrap();
        assert_eq!(review.id.sequence, 2);
        assert!(review.is_open());
        assert!(matches!(
            &second.effects[0],
            Effect::CreateReviewPage { review, .. } if review.sequence == 2
        ));
    }

    #[test]
    fn test_mark_review_is_idempotent_and_conflicts_on_change() {
        let marked = handle(Some(open_review()), &id(), mark(ReviewOutcome::Passed)).unwrap();
        let review = marked.record.as_review().unwrap().clone();
        assert!(matches!(marked.effects[0], Effect::ApplyReviewOutcome { .. }));

        let again = handle(Some(review.clone()), &id(), mark(ReviewOutcome::Passed)).unwrap();
        assert_eq!(again.disposition, Disposition::Duplicate);

        let changed = handle(Some(review.clone()), &id(), mark(ReviewOutcome::Revoked));
        assert!(matches!(changed, Err(LifecycleError::Conflict(_))));

        let reopened = handle(Some(review), &id(), request("Late", 29));
        assert!(matches!(reopened, Err(LifecycleError::Conflict(_))));
    }

    #[test]
    fn test_mark_without_review_fails() {
        let result = handle(None, &id(), mark(ReviewOutcome::Passed));
        assert!(matches!(result, Err(LifecycleError::Validation(_))));
    }
}
