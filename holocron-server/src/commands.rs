//! Command dispatcher: turns operator chat messages into lifecycle events
//! and maintenance actions.
//!
//! Every message gets an acknowledgment. Failures are acknowledged too,
//! with the error kind, so nothing an operator types is ever fatal.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};

use holocron_core::approval::analyze_nomination;
use holocron_core::command::{parse_message, Command, ParseResult};
use holocron_core::objection::parse_objections;
use holocron_core::state_machine::{Disposition, Event, RecordKey};
use holocron_core::wikitext::{ensure_line_in_section, word_count};
use holocron_core::{
    get_bot_version, ArchiveOutcome, ArticleTitle, NominationId, NominationType, ReviewOutcome,
    UserName,
};

use crate::collaborators::{bounded, EditOutcome};
use crate::detector::ChangeDetector;
use crate::error::EngineError;
use crate::state_machine::interpreter::InterpreterContext;
use crate::state_machine::store::LifecycleStore;

/// Reply to one command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Acknowledgment {
    pub ok: bool,
    pub message: String,
    /// Error kind of a failed command, e.g. `validation` or `conflict`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<&'static str>,
}

impl Acknowledgment {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            ok: true,
            message: message.into(),
            error: None,
        }
    }

    pub fn failure(error: &EngineError) -> Self {
        Self {
            ok: false,
            message: error.to_string(),
            error: Some(error.kind()),
        }
    }
}

pub struct CommandDispatcher {
    store: Arc<LifecycleStore>,
    ctx: Arc<InterpreterContext>,
    detector: Arc<ChangeDetector>,
    mention: String,
}

impl CommandDispatcher {
    pub fn new(
        store: Arc<LifecycleStore>,
        ctx: Arc<InterpreterContext>,
        detector: Arc<ChangeDetector>,
        mention: impl Into<String>,
    ) -> Self {
        Self {
            store,
            ctx,
            detector,
            mention: mention.into(),
        }
    }

    /// Handle a chat message from `author`.
    ///
    /// Returns `None` when the message does not address the bot.
    pub async fn handle(
        &self,
        body: &str,
        author: &UserName,
        now: DateTime<Utc>,
    ) -> Option<Acknowledgment> {
        let command = match parse_message(body, &self.mention) {
            ParseResult::NoMention => return None,
            ParseResult::UnrecognizedCommand { attempted } => {
                let error = EngineError::Validation(if attempted.is_empty() {
                    "no command given".to_string()
                } else {
                    format!("unrecognized command `{}`", attempted)
                });
                info!("{} sent an unrecognized command: {:?}", author, attempted);
                return Some(Acknowledgment::failure(&error));
            }
            ParseResult::Command(command) => command,
        };

        info!("{} requested: {}", author, command);
        let ack = match self.execute(command.clone(), author, now).await {
            Ok(message) => Acknowledgment::success(message),
            Err(e) => {
                warn!("Command `{}` from {} failed: {}", command, author, e);
                Acknowledgment::failure(&e)
            }
        };
        Some(ack)
    }

    async fn execute(
        &self,
        command: Command,
        author: &UserName,
        now: DateTime<Utc>,
    ) -> Result<String, EngineError> {
        match command {
            Command::Archive {
                id,
                outcome,
                suppress_message,
                custom_message,
            } => {
                self.archive(&id, outcome, suppress_message, custom_message, author, now)
                    .await
            }
            Command::Withdraw { id } => self.withdraw(&id, author, now).await,
            Command::CreateReview { article, kind } => {
                self.create_review(article, kind, author, now).await
            }
            Command::MarkReview {
                article,
                kind,
                outcome,
            } => self.mark_review(article, kind, outcome, author, now).await,
            Command::AddToProject {
                kind,
                project,
                articles,
            } => self.add_to_project(kind, &project, &articles).await,
            Command::NewNomination { id } => {
                let outcome = self.detector.detect_nomination(&id, now, false).await?;
                Ok(match outcome.disposition {
                    Disposition::Applied => format!("Now tracking {}.", id),
                    Disposition::Duplicate => format!("{} is already being tracked.", id),
                })
            }
            Command::CheckNominations => {
                let report = self.detector.scan(now, false).await;
                if report.failures.is_empty() {
                    Ok(format!("Scan complete: {}.", report.summary()))
                } else {
                    Err(EngineError::TransientIo(format!(
                        "scan finished with problems ({}): {}",
                        report.summary(),
                        report.failures.join("; ")
                    )))
                }
            }
            Command::UpdateRankings => {
                let report = self.ctx.rankings.publish().await?;
                Ok(format!(
                    "Rankings published: {} nominators, {} promotions.",
                    report.users, report.covered
                ))
            }
            Command::ReloadData => {
                let count = self.ctx.projects.reload().await?;
                Ok(format!("Reloaded data for {} WookieeProjects.", count))
            }
            Command::WordCount { article } => {
                let text = bounded(
                    self.ctx.call_timeout,
                    "read article",
                    self.ctx.wiki.get_page_content(article.as_str()),
                )
                .await?;
                Ok(format!("{} has {} words.", article, word_count(&text)))
            }
            Command::Version => Ok(format!("Holocron {}", get_bot_version())),
        }
    }

    async fn archive(
        &self,
        id: &NominationId,
        outcome: ArchiveOutcome,
        suppress_message: bool,
        custom_message: Option<String>,
        author: &UserName,
        now: DateTime<Utc>,
    ) -> Result<String, EngineError> {
        let key = RecordKey::Nomination(id.clone());
        self.require_tracked(&key).await?;

        // Votes and objections are read fresh; the page may have changed since detection
        let title = id.page_title();
        let text = bounded(
            self.ctx.call_timeout,
            "read nomination",
            self.ctx.wiki.get_page_content(&title),
        )
        .await?;
        let evidence = (outcome == ArchiveOutcome::Successful)
            .then(|| analyze_nomination(&text, self.ctx.policy.get(id.kind)));

        let event = Event::ArchiveRequested {
            outcome,
            requested_by: author.clone(),
            at: now,
            evidence,
            objections: parse_objections(&title, &text),
            suppress_message,
            custom_message,
        };
        let result = self.store.process_event(&key, event, &self.ctx).await?;
        Ok(match result.disposition {
            Disposition::Applied => format!("Archived {} as {}.", id, outcome),
            Disposition::Duplicate => format!("{} was already archived as {}.", id, outcome),
        })
    }

    async fn withdraw(
        &self,
        id: &NominationId,
        author: &UserName,
        now: DateTime<Utc>,
    ) -> Result<String, EngineError> {
        let key = RecordKey::Nomination(id.clone());
        self.require_tracked(&key).await?;
        let event = Event::WithdrawRequested {
            requested_by: author.clone(),
            at: now,
        };
        let result = self.store.process_event(&key, event, &self.ctx).await?;
        Ok(match result.disposition {
            Disposition::Applied => format!("Withdrew {}.", id),
            Disposition::Duplicate => format!("{} was already withdrawn.", id),
        })
    }

    async fn create_review(
        &self,
        article: ArticleTitle,
        kind: NominationType,
        author: &UserName,
        now: DateTime<Utc>,
    ) -> Result<String, EngineError> {
        let event = Event::ReviewRequested {
            requested_by: author.clone(),
            at: now,
            context: None,
            create_page: true,
            announce: true,
        };
        let result = self
            .store
            .request_review(&article, kind, event, &self.ctx)
            .await?;
        let Some(review) = result.record.as_review() else {
            return Err(EngineError::DataCorruption(format!(
                "review request for {} produced a nomination record",
                article
            )));
        };
        let (id, requests) = (review.id.clone(), review.requests.len());
        Ok(match (result.disposition, requests) {
            (Disposition::Duplicate, _) => format!("{} already has your request.", id),
            (Disposition::Applied, n) if n > 1 => {
                format!("Added your request to the open {} ({} requests).", id, n)
            }
            (Disposition::Applied, _) => format!("Opened {}.", id),
        })
    }

    async fn mark_review(
        &self,
        article: ArticleTitle,
        kind: NominationType,
        outcome: ReviewOutcome,
        author: &UserName,
        now: DateTime<Utc>,
    ) -> Result<String, EngineError> {
        let Some(latest) = self.store.latest_review(&article, kind).await? else {
            return Err(EngineError::Validation(format!(
                "{} has no {} review to mark",
                article, kind
            )));
        };
        let id = latest.id;
        let key = RecordKey::Review(id.clone());
        let event = Event::ReviewMarked {
            outcome,
            marked_by: author.clone(),
            at: now,
        };
        let result = self.store.process_event(&key, event, &self.ctx).await?;
        Ok(match result.disposition {
            Disposition::Applied => format!("Marked {} as {}.", id, outcome),
            Disposition::Duplicate => format!("{} was already marked as {}.", id, outcome),
        })
    }

    async fn add_to_project(
        &self,
        kind: NominationType,
        project: &str,
        articles: &[ArticleTitle],
    ) -> Result<String, EngineError> {
        if articles.is_empty() {
            return Err(EngineError::Validation("no articles given".to_string()));
        }
        let data = self.ctx.projects.snapshot().await;
        let Some(id) = data.resolve(project) else {
            return Err(EngineError::Validation(format!(
                "{} is not a known WookieeProject",
                project
            )));
        };
        let Some(portfolio) = data.portfolio_page(&id, kind) else {
            return Err(EngineError::Validation(format!(
                "{} has no {} portfolio",
                id, kind
            )));
        };

        let section = format!("{} articles", kind.adjective());
        let transform = |text: &str| {
            articles.iter().fold(text.to_string(), |text, article| {
                ensure_line_in_section(&text, &section, &format!("*[[{}]]", article))
            })
        };
        let summary = format!("Adding {} {} article(s)", articles.len(), kind.adjective());
        let outcome = bounded(
            self.ctx.call_timeout,
            "edit portfolio",
            self.ctx.wiki.edit_page(portfolio, &transform, &summary),
        )
        .await?;

        Ok(match outcome {
            EditOutcome::Saved => format!(
                "Added {} article(s) to {}.",
                articles.len(),
                portfolio
            ),
            EditOutcome::Unchanged => format!("{} already lists every article.", portfolio),
        })
    }

    async fn require_tracked(&self, key: &RecordKey) -> Result<(), EngineError> {
        match self.store.get(key).await? {
            Some(_) => Ok(()),
            None => Err(EngineError::Validation(format!(
                "{} is not being tracked",
                key
            ))),
        }
    }
}
