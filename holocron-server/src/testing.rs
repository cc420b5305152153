//! In-memory collaborators and a fully wired engine for tests.
//!
//! `FakeWiki` derives category membership from page text, so archiving a
//! page (which removes its tracking category) also takes it out of the
//! next listing, just as on the real wiki.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use holocron_core::approval::ApprovalEvidence;
use holocron_core::state_machine::Event;
use holocron_core::wikitext::category_line;
use holocron_core::{ArchiveOutcome, ByType, PolicyTable, TypePolicy, UserName};

use crate::collaborators::{
    ChatClient, EditOutcome, PageTransform, ProjectRegistry, Revision, SocialClient, WikiClient,
    WikiProjectData,
};
use crate::commands::CommandDispatcher;
use crate::config::{Channels, DEFAULT_MENTION};
use crate::cursor::CursorStore;
use crate::detector::ChangeDetector;
use crate::error::CollaboratorError;
use crate::notifications::{DispatchDelay, Dispatcher, NotificationQueue, RetryPolicy};
use crate::objections::ObjectionMonitor;
use crate::rankings::RankingAggregator;
use crate::state_machine::interpreter::InterpreterContext;
use crate::state_machine::repository::{InMemoryRepository, Repository};
use crate::state_machine::store::LifecycleStore;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

fn unavailable(operation: &str) -> CollaboratorError {
    CollaboratorError::http(operation, Some(503), "service unavailable")
}

// =============================================================================
// Wiki
// =============================================================================

#[derive(Default)]
struct WikiState {
    pages: BTreeMap<String, String>,
    revisions: HashMap<String, Revision>,
    failing_edits: HashSet<String>,
    failing_reads: HashSet<String>,
    failing_listings: bool,
    saves: usize,
}

#[derive(Default)]
pub struct FakeWiki {
    state: Mutex<WikiState>,
}

impl FakeWiki {
    pub fn new() -> Self {
        Self::default()
    }

    /// Write a page directly. The first write also sets its first revision.
    pub fn set_page(&self, title: &str, text: &str) {
        self.create_page(title, text, "Holocron", Utc::now());
    }

    /// Write a page as `author` at `at`.
    pub fn create_page(&self, title: &str, text: &str, author: &str, at: DateTime<Utc>) {
        let mut state = lock(&self.state);
        state.pages.insert(title.to_string(), text.to_string());
        state.revisions.entry(title.to_string()).or_insert(Revision {
            user: UserName::from(author),
            timestamp: at,
        });
    }

    pub fn delete_page(&self, title: &str) {
        lock(&self.state).pages.remove(title);
    }

    pub fn page(&self, title: &str) -> Option<String> {
        lock(&self.state).pages.get(title).cloned()
    }

    pub fn fail_edits_to(&self, title: &str) {
        lock(&self.state).failing_edits.insert(title.to_string());
    }

    pub fn allow_edits_to(&self, title: &str) {
        lock(&self.state).failing_edits.remove(title);
    }

    pub fn fail_reads_of(&self, title: &str) {
        lock(&self.state).failing_reads.insert(title.to_string());
    }

    pub fn allow_reads_of(&self, title: &str) {
        lock(&self.state).failing_reads.remove(title);
    }

    pub fn fail_listings(&self, failing: bool) {
        lock(&self.state).failing_listings = failing;
    }

    /// Number of edits that changed a page.
    pub fn save_count(&self) -> usize {
        lock(&self.state).saves
    }
}

#[async_trait]
impl WikiClient for FakeWiki {
    async fn list_category_members(&self, category: &str) -> Result<Vec<String>, CollaboratorError> {
        let state = lock(&self.state);
        if state.failing_listings {
            return Err(unavailable("list category"));
        }
        let marker = category_line(category);
        Ok(state
            .pages
            .iter()
            .filter(|(_, text)| text.lines().any(|l| l.trim() == marker))
            .map(|(title, _)| title.clone())
            .collect())
    }

    async fn get_page_content(&self, title: &str) -> Result<String, CollaboratorError> {
        let state = lock(&self.state);
        if state.failing_reads.contains(title) {
            return Err(unavailable("read page"));
        }
        state
            .pages
            .get(title)
            .cloned()
            .ok_or_else(|| CollaboratorError::not_found(title))
    }

    async fn edit_page(
        &self,
        title: &str,
        transform: PageTransform<'_>,
        _summary: &str,
    ) -> Result<EditOutcome, CollaboratorError> {
        let mut state = lock(&self.state);
        if state.failing_edits.contains(title) {
            return Err(unavailable("edit page"));
        }
        let current = state.pages.get(title).cloned().unwrap_or_default();
        let next = transform(&current);
        if next == current {
            return Ok(EditOutcome::Unchanged);
        }
        state.pages.insert(title.to_string(), next);
        state.revisions.entry(title.to_string()).or_insert(Revision {
            user: UserName::from("Holocron"),
            timestamp: Utc::now(),
        });
        state.saves += 1;
        Ok(EditOutcome::Saved)
    }

    async fn page_exists(&self, title: &str) -> Result<bool, CollaboratorError> {
        Ok(lock(&self.state).pages.contains_key(title))
    }

    async fn first_revision(&self, title: &str) -> Result<Revision, CollaboratorError> {
        lock(&self.state)
            .revisions
            .get(title)
            .cloned()
            .ok_or_else(|| CollaboratorError::not_found(title))
    }
}

// =============================================================================
// Chat and social
// =============================================================================

#[derive(Default)]
struct ChatState {
    messages: Vec<(String, String)>,
    reactions: Vec<(String, String, String)>,
    failing: bool,
}

#[derive(Default)]
pub struct FakeChat {
    state: Mutex<ChatState>,
}

impl FakeChat {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every posted (channel, text), oldest first.
    pub fn messages(&self) -> Vec<(String, String)> {
        lock(&self.state).messages.clone()
    }

    pub fn messages_to(&self, channel: &str) -> Vec<String> {
        lock(&self.state)
            .messages
            .iter()
            .filter(|(c, _)| c == channel)
            .map(|(_, text)| text.clone())
            .collect()
    }

    /// Every (channel, message id, emoji).
    pub fn reactions(&self) -> Vec<(String, String, String)> {
        lock(&self.state).reactions.clone()
    }

    pub fn set_failing(&self, failing: bool) {
        lock(&self.state).failing = failing;
    }
}

#[async_trait]
impl ChatClient for FakeChat {
    async fn post_message(&self, channel: &str, text: &str) -> Result<String, CollaboratorError> {
        let mut state = lock(&self.state);
        if state.failing {
            return Err(unavailable("post message"));
        }
        state.messages.push((channel.to_string(), text.to_string()));
        Ok(format!("m{}", state.messages.len()))
    }

    async fn react_to_message(
        &self,
        channel: &str,
        message_id: &str,
        emoji: &str,
    ) -> Result<(), CollaboratorError> {
        let mut state = lock(&self.state);
        if state.failing {
            return Err(unavailable("react"));
        }
        state
            .reactions
            .push((channel.to_string(), message_id.to_string(), emoji.to_string()));
        Ok(())
    }
}

#[derive(Default)]
struct SocialState {
    posts: Vec<(String, Option<String>)>,
    failure: Option<CollaboratorError>,
}

#[derive(Default)]
pub struct FakeSocial {
    state: Mutex<SocialState>,
}

impl FakeSocial {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn posts(&self) -> Vec<(String, Option<String>)> {
        lock(&self.state).posts.clone()
    }

    /// Answer every post with `failure` until cleared with `None`.
    pub fn fail_with(&self, failure: Option<CollaboratorError>) {
        lock(&self.state).failure = failure;
    }
}

#[async_trait]
impl SocialClient for FakeSocial {
    async fn post_update(&self, text: &str, link: Option<&str>) -> Result<String, CollaboratorError> {
        let mut state = lock(&self.state);
        if let Some(failure) = &state.failure {
            return Err(failure.clone());
        }
        state
            .posts
            .push((text.to_string(), link.map(str::to_string)));
        Ok(format!("post-{}", state.posts.len()))
    }
}

// =============================================================================
// Fixtures
// =============================================================================

pub const PROJECT_DATA_PAGE: &str = "User:Holocron/Project data";
pub const RANKINGS_PAGE: &str = "Wookieepedia:Status article rankings";

const PROJECT_DATA: &str = r#"{
    "Jedi": {
        "shortcuts": ["WP:JEDI"],
        "channel": "jedi",
        "emoji": "lightsaber",
        "portfolios": {"FA": "WookieeProject Jedi/Portfolio"}
    }
}"#;

pub fn channels() -> Channels {
    Channels {
        operators: "ops".to_string(),
        announcements: "announce".to_string(),
        nominations: ByType::new(
            "fa-noms".to_string(),
            "ga-noms".to_string(),
            "ca-noms".to_string(),
        ),
        boards: ByType::new("inq".to_string(), "ac".to_string(), "ec".to_string()),
    }
}

/// A signature as the wiki renders it.
pub fn signature(user: &str, at: DateTime<Utc>) -> String {
    format!("[[User:{0}|{0}]] {1}", user, at.format("%H:%M, %-d %B %Y (UTC)"))
}

/// Detection event for a page created by `nominator` at `created_at`.
pub fn detected(nominator: &str, created_at: DateTime<Utc>, announce: bool) -> Event {
    Event::NominationDetected {
        nominator: UserName::from(nominator),
        created_at,
        projects: vec![],
        objections: vec![],
        approval_marker: false,
        announce,
    }
}

/// Evidence that satisfies every approval rule for a nomination created at `created_at`.
pub fn ready_evidence(nominator: &str, created_at: DateTime<Utc>) -> ApprovalEvidence {
    ApprovalEvidence {
        nominator: Some(UserName::from(nominator)),
        nominated_at: Some(created_at),
        approval_marker: true,
        board_votes: 5,
        cross_board_votes: 0,
        total_votes: 5,
        unsigned_votes: 0,
    }
}

/// Archive request made now, with ready evidence for successful outcomes.
pub fn archive_request(outcome: ArchiveOutcome, by: &str, created_at: DateTime<Utc>) -> Event {
    Event::ArchiveRequested {
        outcome,
        requested_by: UserName::from(by),
        at: Utc::now(),
        evidence: (outcome == ArchiveOutcome::Successful)
            .then(|| ready_evidence("Tommy", created_at)),
        objections: vec![],
        suppress_message: false,
        custom_message: None,
    }
}

/// Builder for nomination page wikitext.
#[derive(Debug, Clone)]
pub struct NominationPage {
    nominator: String,
    nominated_at: DateTime<Utc>,
    projects: Vec<String>,
    board_votes: u32,
    approved: bool,
    objections: Vec<(String, DateTime<Utc>, String)>,
}

impl NominationPage {
    pub fn new(nominator: &str, nominated_at: DateTime<Utc>) -> Self {
        Self {
            nominator: nominator.to_string(),
            nominated_at,
            projects: vec![],
            board_votes: 0,
            approved: false,
            objections: vec![],
        }
    }

    pub fn project(mut self, name: &str) -> Self {
        self.projects.push(name.to_string());
        self
    }

    /// Add `board_votes` signed board votes and the approval template.
    pub fn approved(mut self, board_votes: u32) -> Self {
        self.board_votes = board_votes;
        self.approved = true;
        self
    }

    pub fn objection(mut self, objector: &str, at: DateTime<Utc>, text: &str) -> Self {
        self.objections
            .push((objector.to_string(), at, text.to_string()));
        self
    }

    pub fn render(&self, policy: &TypePolicy) -> String {
        let mut lines = vec![format!(
            "*'''Nominated by''': {}",
            signature(&self.nominator, self.nominated_at)
        )];
        let projects: Vec<String> = self
            .projects
            .iter()
            .map(|p| format!("[[Wookieepedia:WookieeProject {}|{}]]", p, p))
            .collect();
        lines.push(format!(
            "*'''WookieeProject (optional)''': {}",
            projects.join(", ")
        ));
        lines.push("====Support====".to_string());
        for i in 0..self.board_votes {
            lines.push(format!(
                "#{{{{{}}}}} {}",
                policy.board_template,
                signature(&format!("Voter{}", i + 1), self.nominated_at)
            ));
        }
        lines.push("====Object====".to_string());
        for (objector, at, text) in &self.objections {
            lines.push(format!("=====[[User:{0}|{0}]]=====", objector));
            lines.push(format!("*{} {}", text, signature(objector, *at)));
        }
        lines.push("====Comments====".to_string());
        if self.approved {
            lines.push(format!("{{{{{}}}}}", policy.approval_template));
        }
        lines.push(category_line(&policy.nomination_category));
        let mut text = lines.join("\n");
        text.push('\n');
        text
    }
}

// =============================================================================
// Harness
// =============================================================================

/// Every component wired together over in-memory fakes.
pub struct Harness {
    pub repo: Arc<dyn Repository>,
    pub wiki: Arc<FakeWiki>,
    pub chat: Arc<FakeChat>,
    pub social: Arc<FakeSocial>,
    pub queue: Arc<NotificationQueue>,
    pub rankings: Arc<RankingAggregator>,
    pub projects: Arc<ProjectRegistry>,
    pub cursors: Arc<CursorStore>,
    pub store: Arc<LifecycleStore>,
    pub ctx: Arc<InterpreterContext>,
    pub detector: Arc<ChangeDetector>,
    pub monitor: Arc<ObjectionMonitor>,
    pub dispatcher: Arc<Dispatcher>,
    pub commands: Arc<CommandDispatcher>,
}

impl Default for Harness {
    fn default() -> Self {
        Self::new()
    }
}

impl Harness {
    pub fn new() -> Self {
        Self::build(Arc::new(InMemoryRepository::new()), &[])
    }

    pub fn with_talk_opt_out(users: &[&str]) -> Self {
        Self::build(Arc::new(InMemoryRepository::new()), users)
    }

    /// Wire the engine over an existing repository, e.g. a reopened SQLite file.
    pub fn with_repository(repo: Arc<dyn Repository>) -> Self {
        Self::build(repo, &[])
    }

    fn build(repo: Arc<dyn Repository>, talk_opt_out: &[&str]) -> Self {
        let call_timeout = Duration::from_secs(5);
        let wiki = Arc::new(FakeWiki::new());
        let chat = Arc::new(FakeChat::new());
        let social = Arc::new(FakeSocial::new());

        let queue = Arc::new(NotificationQueue::new(repo.clone()));
        let rankings = Arc::new(RankingAggregator::new(
            repo.clone(),
            wiki.clone(),
            RANKINGS_PAGE,
            vec![],
            10,
            call_timeout,
        ));
        let projects = Arc::new(ProjectRegistry::new(Arc::new(WikiProjectData::new(
            wiki.clone(),
            PROJECT_DATA_PAGE,
        ))));
        let channels = channels();

        let ctx = Arc::new(InterpreterContext {
            wiki: wiki.clone(),
            queue: queue.clone(),
            rankings: rankings.clone(),
            projects: projects.clone(),
            policy: Arc::new(PolicyTable::default()),
            channels: channels.clone(),
            talk_opt_out: talk_opt_out.iter().map(|u| UserName::from(*u)).collect(),
            article_url: "https://starwars.fandom.com/wiki/".to_string(),
            social_delay: DispatchDelay::Window {
                min: chrono::Duration::minutes(30),
                max: chrono::Duration::minutes(40),
            },
            call_timeout,
        });

        let store = Arc::new(LifecycleStore::new(repo.clone()));
        let cursors = Arc::new(CursorStore::new(repo.clone()));
        let detector = Arc::new(ChangeDetector::new(
            store.clone(),
            ctx.clone(),
            cursors.clone(),
            chrono::Duration::minutes(20),
        ));
        let monitor = Arc::new(ObjectionMonitor::new(store.clone(), ctx.clone()));
        let dispatcher = Arc::new(Dispatcher::new(
            queue.clone(),
            chat.clone(),
            social.clone(),
            wiki.clone(),
            RetryPolicy::default(),
            channels.operators.clone(),
            5,
            call_timeout,
        ));
        let commands = Arc::new(CommandDispatcher::new(
            store.clone(),
            ctx.clone(),
            detector.clone(),
            DEFAULT_MENTION,
        ));

        Self {
            repo,
            wiki,
            chat,
            social,
            queue,
            rankings,
            projects,
            cursors,
            store,
            ctx,
            detector,
            monitor,
            dispatcher,
            commands,
        }
    }

    /// Publish the project data page (one project, "Jedi") and load it.
    pub async fn load_projects(&self) {
        self.wiki.set_page(PROJECT_DATA_PAGE, PROJECT_DATA);
        if let Err(e) = self.projects.reload().await {
            panic!("project data fixture failed to load: {}", e);
        }
    }
}
