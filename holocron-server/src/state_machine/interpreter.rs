//! Effect interpreter that executes effects against the collaborators.
//!
//! The interpreter is the boundary between the pure state machine and the
//! impure world of I/O. Wiki effects run before the record is committed and
//! answer with result events; a failed edit answers `EditFailed`, which the
//! transition turns into an error so nothing is persisted. Post-commit
//! effects run once the record is durable and only report success or
//! failure, so the store knows what to keep in the outbox.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, error, info, warn};

use holocron_core::state_machine::{Announcement, Effect, Event, LogLevel};
use holocron_core::wikitext::{
    add_category, ensure_line, ensure_line_in_section, remove_category, remove_line,
    remove_template, set_status_flag, wrap_archived,
};
use holocron_core::{
    nomination_page_prefix, ArchiveOutcome, NominationId, NominationType, PolicyTable, ProjectId,
    ReviewId, ReviewOutcome, UserName,
};

use crate::collaborators::{bounded, EditOutcome, PageTransform, ProjectRegistry, WikiClient};
use crate::config::Channels;
use crate::error::{CollaboratorError, EngineError};
use crate::notifications::{DispatchDelay, NotificationPayload, NotificationQueue};
use crate::rankings::RankingAggregator;

/// Everything the interpreter needs to execute effects.
pub struct InterpreterContext {
    pub wiki: Arc<dyn WikiClient>,
    pub queue: Arc<NotificationQueue>,
    pub rankings: Arc<RankingAggregator>,
    pub projects: Arc<ProjectRegistry>,
    pub policy: Arc<PolicyTable>,
    pub channels: Channels,
    /// Users who asked not to receive talk page acknowledgments.
    pub talk_opt_out: Vec<UserName>,
    /// Prefix for article links, e.g. `https://starwars.fandom.com/wiki/`.
    pub article_url: String,
    pub social_delay: DispatchDelay,
    pub call_timeout: Duration,
}

/// Result of executing an effect.
#[derive(Debug)]
pub enum EffectResult {
    /// Effect completed, produced result events.
    Ok(Vec<Event>),
    /// Effect failed with an error.
    Err(String),
}

impl EffectResult {
    pub fn single(event: Event) -> Self {
        Self::Ok(vec![event])
    }

    pub fn none() -> Self {
        Self::Ok(vec![])
    }

    pub fn err(msg: impl Into<String>) -> Self {
        Self::Err(msg.into())
    }
}

/// Execute pre-commit effects in order and collect the result events.
///
/// The first failure stops execution and is reported as `EditFailed`; the
/// transition that follows rejects the whole event.
pub async fn execute_effects(ctx: &InterpreterContext, effects: Vec<Effect>) -> Vec<Event> {
    let mut result_events = Vec::new();

    for effect in effects {
        match execute_effect(ctx, effect).await {
            EffectResult::Ok(events) => result_events.extend(events),
            EffectResult::Err(err) => {
                error!("Effect execution failed: {}", err);
                result_events.push(Event::EditFailed { error: err });
                break;
            }
        }
    }

    result_events
}

/// Execute a single pre-commit effect.
async fn execute_effect(ctx: &InterpreterContext, effect: Effect) -> EffectResult {
    match effect {
        Effect::RegisterNomination { id, nominator } => {
            execute_register_nomination(ctx, &id, &nominator).await
        }

        Effect::ArchiveNominationPages { id, outcome } => {
            execute_archive_pages(ctx, &id, outcome).await
        }

        Effect::CreateReviewPage {
            review,
            requested_by,
            context,
        } => execute_create_review_page(ctx, &review, &requested_by, context.as_deref()).await,

        Effect::ApplyReviewOutcome { review, outcome } => {
            execute_apply_review_outcome(ctx, &review, outcome).await
        }

        Effect::Log { level, message } => {
            match level {
                LogLevel::Info => info!("{}", message),
                LogLevel::Warn => warn!("{}", message),
                LogLevel::Error => error!("{}", message),
            }
            EffectResult::none()
        }

        other => EffectResult::err(format!(
            "{:?} runs after commit, not inside a transition",
            other
        )),
    }
}

/// Execute one post-commit effect. Forwarded review effects belong to the
/// store, which routes them to the article's nomination.
pub async fn execute_post_commit(ctx: &InterpreterContext, effect: Effect) -> Result<(), EngineError> {
    match effect {
        Effect::UpdateProjectPortfolios { id, projects } => {
            execute_update_portfolios(ctx, &id, &projects).await
        }

        Effect::RecordRanking {
            id,
            nominator,
            year,
            ..
        } => ctx
            .rankings
            .record_success(&id, &nominator, year)
            .await
            .map(|_| ()),

        Effect::Announce(announcement) => execute_announce(ctx, announcement).await,

        Effect::ReportToOperators { message } => {
            ctx.queue
                .enqueue(
                    NotificationPayload::chat(&ctx.channels.operators, format!("Attention: {}", message)),
                    DispatchDelay::Immediate,
                    None,
                    Utc::now(),
                )
                .await?;
            Ok(())
        }

        other => Err(EngineError::Validation(format!(
            "{:?} is not a post-commit effect the interpreter runs",
            other
        ))),
    }
}

// =============================================================================
// Page naming
// =============================================================================

pub fn nominator_category(kind: NominationType, nominator: &UserName) -> String {
    format!(
        "Wookieepedia {} article nominations by User:{}",
        kind.adjective(),
        nominator
    )
}

pub fn archived_category(kind: NominationType, outcome: ArchiveOutcome) -> String {
    let suffix = match outcome {
        ArchiveOutcome::Successful => "successful",
        ArchiveOutcome::Unsuccessful | ArchiveOutcome::Withdrawn => "unsuccessful",
    };
    format!(
        "Wookieepedia {} article nomination pages ({})",
        kind.adjective(),
        suffix
    )
}

/// `{{FAnom}}`-style banner on an article under nomination.
pub fn nomination_template(kind: NominationType) -> String {
    format!("{}nom", kind.abbreviation())
}

/// `{{FAreview}}`-style banner on an article under review.
pub fn review_template(kind: NominationType) -> String {
    format!("{}review", kind.abbreviation())
}

fn transclusion(id: &NominationId) -> String {
    format!("{{{{{}}}}}", id.page_title())
}

pub(crate) fn page_url(ctx: &InterpreterContext, title: &str) -> String {
    format!("{}{}", ctx.article_url, title.replace(' ', "_"))
}

fn archive_date() -> String {
    Utc::now().format("%-d %B %Y").to_string()
}

/// Put a banner template at the top of a page unless it is already there.
fn ensure_top_template(text: &str, name: &str) -> String {
    let marker = format!("{{{{{}}}}}", name).to_ascii_lowercase();
    if text.to_ascii_lowercase().contains(&marker) {
        return text.to_string();
    }
    format!("{{{{{}}}}}\n{}", name, text)
}

fn review_request_line(requested_by: &UserName, context: Option<&str>) -> String {
    match context.map(str::trim).filter(|c| !c.is_empty()) {
        Some(context) => format!(
            "*Review requested by [[User:{0}|{0}]]: {1}",
            requested_by, context
        ),
        None => format!("*Review requested by [[User:{0}|{0}]]", requested_by),
    }
}

async fn edit(
    ctx: &InterpreterContext,
    title: &str,
    transform: PageTransform<'_>,
    summary: &str,
) -> Result<EditOutcome, CollaboratorError> {
    let outcome = bounded(
        ctx.call_timeout,
        "edit page",
        ctx.wiki.edit_page(title, transform, summary),
    )
    .await?;
    if outcome == EditOutcome::Unchanged {
        debug!("{} already up to date", title);
    }
    Ok(outcome)
}

fn edit_failure(title: &str, e: CollaboratorError) -> EffectResult {
    EffectResult::err(format!("editing {}: {}", title, e))
}

// =============================================================================
// Wiki effects
// =============================================================================

async fn execute_register_nomination(
    ctx: &InterpreterContext,
    id: &NominationId,
    nominator: &UserName,
) -> EffectResult {
    let parent = nomination_page_prefix(id.kind);
    let line = transclusion(id);
    if let Err(e) = edit(
        ctx,
        &parent,
        &|text: &str| ensure_line(text, &line),
        &format!("Adding {}", id),
    )
    .await
    {
        return edit_failure(&parent, e);
    }

    let category = nominator_category(id.kind, nominator);
    let page = id.page_title();
    if let Err(e) = edit(
        ctx,
        &page,
        &|text: &str| add_category(text, &category),
        "Adding nominator category",
    )
    .await
    {
        return edit_failure(&page, e);
    }

    EffectResult::none()
}

async fn execute_archive_pages(
    ctx: &InterpreterContext,
    id: &NominationId,
    outcome: ArchiveOutcome,
) -> EffectResult {
    let policy = ctx.policy.get(id.kind);
    let date = archive_date();
    let result = outcome.to_string();
    let archived = archived_category(id.kind, outcome);
    let summary = format!("Archiving {} as {}", id, outcome);

    let page = id.page_title();
    let close_discussion = |text: &str| {
        let text = wrap_archived(text, &result, &date);
        let text = remove_category(&text, &policy.nomination_category);
        add_category(&text, &archived)
    };
    if let Err(e) = edit(ctx, &page, &close_discussion, &summary).await {
        return edit_failure(&page, e);
    }

    let parent = nomination_page_prefix(id.kind);
    let line = transclusion(id);
    if let Err(e) = edit(ctx, &parent, &|text: &str| remove_line(text, &line), &summary).await {
        return edit_failure(&parent, e);
    }

    let banner = nomination_template(id.kind);
    let flag = id.kind.status_flag();
    let update_article = |text: &str| {
        let text = remove_template(text, &banner);
        if outcome == ArchiveOutcome::Successful {
            set_status_flag(&text, &[], Some(&flag))
        } else {
            text
        }
    };
    if let Err(e) = edit(ctx, id.article.as_str(), &update_article, &summary).await {
        return edit_failure(id.article.as_str(), e);
    }

    EffectResult::single(Event::PagesUpdated { at: Utc::now() })
}

async fn execute_create_review_page(
    ctx: &InterpreterContext,
    review: &ReviewId,
    requested_by: &UserName,
    context: Option<&str>,
) -> EffectResult {
    let policy = ctx.policy.get(review.kind);
    let request = review_request_line(requested_by, context);
    let summary = format!("Review requested by {}", requested_by);

    let page = review.page_title();
    let add_request = |text: &str| {
        let text = if text.trim().is_empty() {
            format!("==[[{}]]==\n", review.article)
        } else {
            text.to_string()
        };
        let text = ensure_line(&text, &request);
        add_category(&text, &policy.review_category)
    };
    if let Err(e) = edit(ctx, &page, &add_request, &summary).await {
        return edit_failure(&page, e);
    }

    let banner = review_template(review.kind);
    if let Err(e) = edit(
        ctx,
        review.article.as_str(),
        &|text: &str| ensure_top_template(text, &banner),
        &summary,
    )
    .await
    {
        return edit_failure(review.article.as_str(), e);
    }

    EffectResult::none()
}

async fn execute_apply_review_outcome(
    ctx: &InterpreterContext,
    review: &ReviewId,
    outcome: ReviewOutcome,
) -> EffectResult {
    let policy = ctx.policy.get(review.kind);
    let summary = format!("Review concluded: {}", outcome);
    let banner = review_template(review.kind);
    let flag = review.kind.status_flag();
    let probation = format!("{}p", flag);
    let former = format!("former{}", flag);

    let update_article = |text: &str| {
        let text = remove_template(text, &banner);
        match outcome {
            ReviewOutcome::Passed => text,
            ReviewOutcome::Probation => set_status_flag(&text, &[&flag], Some(&probation)),
            ReviewOutcome::Revoked => set_status_flag(&text, &[&flag, &probation], Some(&former)),
        }
    };
    if let Err(e) = edit(ctx, review.article.as_str(), &update_article, &summary).await {
        return edit_failure(review.article.as_str(), e);
    }

    let page = review.page_title();
    let date = archive_date();
    let result = outcome.to_string();
    let close_review = |text: &str| {
        let text = wrap_archived(text, &result, &date);
        remove_category(&text, &policy.review_category)
    };
    if let Err(e) = edit(ctx, &page, &close_review, &summary).await {
        return edit_failure(&page, e);
    }

    EffectResult::none()
}

// =============================================================================
// Post-commit effects
// =============================================================================

async fn execute_update_portfolios(
    ctx: &InterpreterContext,
    id: &NominationId,
    projects: &[ProjectId],
) -> Result<(), EngineError> {
    let data = ctx.projects.snapshot().await;
    let section = format!("{} articles", id.kind.adjective());
    let line = format!("*[[{}]]", id.article);
    let mut failures = Vec::new();

    for project in projects {
        let Some(portfolio) = data.portfolio_page(project, id.kind) else {
            debug!("{} has no {} portfolio page", project, id.kind);
            continue;
        };
        let transform = |text: &str| ensure_line_in_section(text, &section, &line);
        if let Err(e) = edit(ctx, portfolio, &transform, &format!("Adding {}", id.article)).await {
            warn!("Failed to update {} portfolio {}: {}", project, portfolio, e);
            failures.push(format!("{}: {}", portfolio, e));
        }
    }

    if failures.is_empty() {
        Ok(())
    } else {
        Err(EngineError::TransientIo(format!(
            "portfolio updates failed: {}",
            failures.join("; ")
        )))
    }
}

/// Turn an announcement into queue entries under its dedupe key.
async fn execute_announce(ctx: &InterpreterContext, announcement: Announcement) -> Result<(), EngineError> {
    let key = announcement.dedupe_key();
    let mut outgoing: Vec<(NotificationPayload, DispatchDelay, String)> = Vec::new();

    match announcement {
        Announcement::NewNomination {
            id,
            nominator,
            projects,
        } => {
            let data = ctx.projects.snapshot().await;
            let url = page_url(ctx, &id.page_title());
            let reactions = projects
                .iter()
                .filter_map(|p| data.emoji_for(p))
                .map(str::to_string)
                .collect();
            outgoing.push((
                NotificationPayload::ChatMessage {
                    channel: ctx.channels.nominations.get(id.kind).clone(),
                    text: format!(
                        "New **{} article nomination** by **{}**: {}\n<{}>",
                        id.kind.adjective(),
                        nominator,
                        id.subpage(),
                        url
                    ),
                    reactions,
                },
                DispatchDelay::Immediate,
                key.clone(),
            ));
            for project in &projects {
                if let Some(channel) = data.channel_for(project) {
                    outgoing.push((
                        NotificationPayload::chat(
                            channel,
                            format!(
                                "New {} article nomination for {}: {}\n<{}>",
                                id.kind.adjective(),
                                project,
                                id.subpage(),
                                url
                            ),
                        ),
                        DispatchDelay::Immediate,
                        format!("{}:{}", key, project),
                    ));
                }
            }
        }

        Announcement::NominationArchived {
            id,
            outcome,
            nominator,
        } => {
            let text = match outcome {
                ArchiveOutcome::Successful => format!(
                    "**{}** by {} is now a {} article!\n<{}>",
                    id.article,
                    nominator,
                    id.kind.adjective(),
                    page_url(ctx, id.article.as_str())
                ),
                ArchiveOutcome::Unsuccessful => format!("{} was archived as unsuccessful", id),
                ArchiveOutcome::Withdrawn => format!("{} was withdrawn by {}", id, nominator),
            };
            outgoing.push((
                NotificationPayload::chat(&ctx.channels.announcements, text),
                DispatchDelay::Immediate,
                key,
            ));
        }

        Announcement::SocialPost { id } => {
            outgoing.push((
                NotificationPayload::SocialPost {
                    text: format!(
                        "Our newest {} article: {}! #StarWars #Wookieepedia",
                        id.kind.adjective(),
                        id.article
                    ),
                    link: Some(page_url(ctx, id.article.as_str())),
                },
                ctx.social_delay,
                key,
            ));
        }

        Announcement::TalkPageAcknowledgment {
            id,
            nominator,
            custom_message,
        } => {
            if ctx.talk_opt_out.iter().any(|u| u.same_as(&nominator)) {
                info!("{} opted out of talk page messages; skipping {}", nominator, key);
                return Ok(());
            }
            let body = custom_message
                .filter(|m| !m.trim().is_empty())
                .unwrap_or_else(|| {
                    format!(
                        "Congratulations! Your nomination of [[{}]] passed and it is now a {} article. \
                         Thank you for your work!",
                        id.article,
                        id.kind.adjective()
                    )
                });
            outgoing.push((
                NotificationPayload::TalkPageMessage {
                    user: nominator,
                    header: format!("{} article nomination: {}", id.kind.adjective(), id.article),
                    body,
                },
                DispatchDelay::Immediate,
                key,
            ));
        }

        Announcement::ReviewOpened {
            review,
            requested_by,
            context,
        } => {
            let reason = context
                .filter(|c| !c.trim().is_empty())
                .map(|c| format!(" ({})", c.trim()))
                .unwrap_or_default();
            outgoing.push((
                NotificationPayload::chat(
                    ctx.channels.nominations.get(review.kind),
                    format!(
                        "**{}** was sent to a {} article review by {}{}\n<{}>",
                        review.article,
                        review.kind.adjective(),
                        requested_by,
                        reason,
                        page_url(ctx, &review.page_title())
                    ),
                ),
                DispatchDelay::Immediate,
                key,
            ));
        }

        Announcement::ReviewConcluded { review, outcome } => {
            outgoing.push((
                NotificationPayload::chat(
                    &ctx.channels.announcements,
                    format!(
                        "The {} article review of **{}** concluded: {}",
                        review.kind.adjective(),
                        review.article,
                        outcome
                    ),
                ),
                DispatchDelay::Immediate,
                key,
            ));
        }
    }

    let now = Utc::now();
    for (payload, delay, dedupe_key) in outgoing {
        ctx.queue.enqueue(payload, delay, Some(dedupe_key), now).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notifications::QueuedNotification;
    use crate::testing::Harness;
    use chrono::Duration as ChronoDuration;

    fn nomination() -> NominationId {
        NominationId::new("Ahsoka Tano", NominationType::Featured, 1)
    }

    async fn queued(harness: &Harness) -> Vec<QueuedNotification> {
        harness
            .repo
            .due(Utc::now() + ChronoDuration::days(1), 100)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_archive_pages_successful_and_idempotent() {
        let harness = Harness::new();
        let id = nomination();
        harness.wiki.set_page(
            &id.page_title(),
            "Nominated by [[User:Tommy|Tommy]]\n[[Category:Wookieepedia Featured article nominations]]\n",
        );
        harness.wiki.set_page(
            "Wookieepedia:Featured article nominations",
            &format!("{}\n", transclusion(&id)),
        );
        harness
            .wiki
            .set_page("Ahsoka Tano", "{{Top}}\n{{FAnom}}\nAhsoka was a Jedi.\n");

        let effects = vec![Effect::ArchiveNominationPages {
            id: id.clone(),
            outcome: ArchiveOutcome::Successful,
        }];
        let events = execute_effects(&harness.ctx, effects.clone()).await;
        assert!(matches!(events.as_slice(), [Event::PagesUpdated { .. }]));

        let page = harness.wiki.page(&id.page_title()).unwrap();
        assert!(page.starts_with("{{Archivetop|result=successful"));
        assert!(page.contains("[[Category:Wookieepedia Featured article nomination pages (successful)]]"));
        assert!(!page.contains("[[Category:Wookieepedia Featured article nominations]]"));
        assert!(!harness
            .wiki
            .page("Wookieepedia:Featured article nominations")
            .unwrap()
            .contains(&id.page_title()));
        assert_eq!(
            harness.wiki.page("Ahsoka Tano").unwrap(),
            "{{Top|fa}}\nAhsoka was a Jedi.\n"
        );

        let saves = harness.wiki.save_count();
        let again = execute_effects(&harness.ctx, effects).await;
        assert!(matches!(again.as_slice(), [Event::PagesUpdated { .. }]));
        assert_eq!(harness.wiki.save_count(), saves);
    }

    #[tokio::test]
    async fn test_failed_edit_reports_edit_failed_and_stops() {
        let harness = Harness::new();
        let id = nomination();
        harness.wiki.fail_edits_to(&id.page_title());

        let events = execute_effects(
            &harness.ctx,
            vec![
                Effect::ArchiveNominationPages {
                    id: id.clone(),
                    outcome: ArchiveOutcome::Unsuccessful,
                },
                Effect::Log {
                    level: LogLevel::Info,
                    message: "not reached".to_string(),
                },
            ],
        )
        .await;
        assert_eq!(events.len(), 1);
        assert!(matches!(&events[0], Event::EditFailed { error } if error.contains(&id.page_title())));
    }

    #[tokio::test]
    async fn test_review_outcomes_rewrite_status_flags() {
        let harness = Harness::new();
        let review = ReviewId::new("Cad Bane", NominationType::Good, 1);
        harness
            .wiki
            .set_page("Cad Bane", "{{Top|ga}}\n{{GAreview}}\nCad Bane was a bounty hunter.\n");

        let events = execute_effects(
            &harness.ctx,
            vec![Effect::ApplyReviewOutcome {
                review: review.clone(),
                outcome: ReviewOutcome::Revoked,
            }],
        )
        .await;
        assert!(events.is_empty());
        assert_eq!(
            harness.wiki.page("Cad Bane").unwrap(),
            "{{Top|formerga}}\nCad Bane was a bounty hunter.\n"
        );
        assert!(harness
            .wiki
            .page(&review.page_title())
            .unwrap()
            .contains("{{Archivetop|result=revoked"));
    }

    #[tokio::test]
    async fn test_create_review_page_appends_requests() {
        let harness = Harness::new();
        let review = ReviewId::new("Cad Bane", NominationType::Good, 1);
        harness.wiki.set_page("Cad Bane", "{{Top|ga}}\nText\n");

        for (user, context) in [("Tommy", Some("sourcing")), ("Ima", None)] {
            let events = execute_effects(
                &harness.ctx,
                vec![Effect::CreateReviewPage {
                    review: review.clone(),
                    requested_by: UserName::from(user),
                    context: context.map(str::to_string),
                }],
            )
            .await;
            assert!(events.is_empty());
        }

        let page = harness.wiki.page(&review.page_title()).unwrap();
        assert!(page.contains("*Review requested by [[User:Tommy|Tommy]]: sourcing"));
        assert!(page.contains("*Review requested by [[User:Ima|Ima]]"));
        assert!(page.contains("[[Category:Wookieepedia Good article reviews]]"));
        assert_eq!(
            harness.wiki.page("Cad Bane").unwrap(),
            "{{GAreview}}\n{{Top|ga}}\nText\n"
        );
    }

    #[tokio::test]
    async fn test_new_nomination_announces_to_type_and_project_channels() {
        let harness = Harness::new();
        harness.load_projects().await;
        let id = nomination();

        execute_post_commit(
            &harness.ctx,
            Effect::Announce(Announcement::NewNomination {
                id: id.clone(),
                nominator: UserName::from("Tommy"),
                projects: vec![ProjectId::from("Jedi")],
            }),
        )
        .await
        .unwrap();

        let entries = queued(&harness).await;
        assert_eq!(entries.len(), 2);
        match &entries[0].payload {
            NotificationPayload::ChatMessage {
                channel, reactions, ..
            } => {
                assert_eq!(channel, "fa-noms");
                assert_eq!(reactions, &vec!["lightsaber".to_string()]);
            }
            other => panic!("unexpected payload {:?}", other),
        }
        assert!(matches!(
            &entries[1].payload,
            NotificationPayload::ChatMessage { channel, .. } if channel == "jedi"
        ));
    }

    #[tokio::test]
    async fn test_talk_acknowledgment_respects_opt_out() {
        let harness = Harness::with_talk_opt_out(&["Tommy"]);

        execute_post_commit(
            &harness.ctx,
            Effect::Announce(Announcement::TalkPageAcknowledgment {
                id: nomination(),
                nominator: UserName::from("tommy"),
                custom_message: None,
            }),
        )
        .await
        .unwrap();
        assert!(queued(&harness).await.is_empty());
    }

    #[tokio::test]
    async fn test_social_post_lands_in_delay_window() {
        let harness = Harness::new();
        let before = Utc::now();

        execute_post_commit(
            &harness.ctx,
            Effect::Announce(Announcement::SocialPost { id: nomination() }),
        )
        .await
        .unwrap();

        let entries = harness
            .repo
            .due(before + ChronoDuration::hours(2), 10)
            .await
            .unwrap();
        assert_eq!(entries.len(), 1);
        assert!(entries[0].dispatch_at >= before + ChronoDuration::minutes(30));
        assert!(entries[0].dispatch_at <= Utc::now() + ChronoDuration::minutes(40));
    }

    #[tokio::test]
    async fn test_replayed_announcement_is_queued_once() {
        let harness = Harness::new();
        let effect = Effect::Announce(Announcement::NominationArchived {
            id: nomination(),
            outcome: ArchiveOutcome::Successful,
            nominator: UserName::from("Tommy"),
        });
        execute_post_commit(&harness.ctx, effect.clone()).await.unwrap();
        execute_post_commit(&harness.ctx, effect).await.unwrap();
        assert_eq!(queued(&harness).await.len(), 1);
    }

    #[tokio::test]
    async fn test_portfolio_update_is_idempotent() {
        let harness = Harness::new();
        harness.load_projects().await;
        let effect = Effect::UpdateProjectPortfolios {
            id: nomination(),
            projects: vec![ProjectId::from("Jedi")],
        };
        execute_post_commit(&harness.ctx, effect.clone()).await.unwrap();
        execute_post_commit(&harness.ctx, effect).await.unwrap();

        let portfolio = harness.wiki.page("WookieeProject Jedi/Portfolio").unwrap();
        assert_eq!(portfolio.matches("*[[Ahsoka Tano]]").count(), 1);
        assert!(portfolio.contains("==Featured articles=="));
    }
}
