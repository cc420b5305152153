/// Command parsing for messages that mention the bot
use std::fmt;
use std::sync::LazyLock;

use regex::{Captures, Regex};

use crate::nomination::{ArchiveOutcome, ArticleTitle, NominationId, NominationType, ReviewOutcome};

/// A parsed operator command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Archive a nomination with the given outcome
    Archive {
        id: NominationId,
        outcome: ArchiveOutcome,
        /// Skip the talk-page acknowledgment
        suppress_message: bool,
        custom_message: Option<String>,
    },
    /// Withdraw a nomination (nominator only)
    Withdraw { id: NominationId },
    /// Open a review for a promoted article, or add to the open one
    CreateReview {
        article: ArticleTitle,
        kind: NominationType,
    },
    /// Close a review with an outcome
    MarkReview {
        article: ArticleTitle,
        kind: NominationType,
        outcome: ReviewOutcome,
    },
    /// Add articles to a WookieeProject portfolio
    AddToProject {
        kind: NominationType,
        project: String,
        articles: Vec<ArticleTitle>,
    },
    /// Start tracking a nomination page right away
    NewNomination { id: NominationId },
    /// Run the change detector now
    CheckNominations,
    UpdateRankings,
    ReloadData,
    WordCount { article: ArticleTitle },
    Version,
}

/// Result of parsing a message for commands
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseResult {
    /// No mention of the bot in the message
    NoMention,
    /// Bot was mentioned but the command was not recognized
    UnrecognizedCommand {
        /// The unrecognized command text that was attempted
        attempted: String,
    },
    /// A valid command was found
    Command(Command),
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Archive { id, outcome, .. } => write!(f, "archive {} {}", outcome, id),
            Command::Withdraw { id } => write!(f, "withdraw {}", id),
            Command::CreateReview { article, kind } => {
                write!(f, "create review for {}: {}", kind, article)
            }
            Command::MarkReview {
                article,
                kind,
                outcome,
            } => write!(f, "mark review for {}: {} as {}", kind, article, outcome),
            Command::AddToProject {
                kind,
                project,
                articles,
            } => write!(
                f,
                "add {} to {}: {}",
                kind,
                project,
                articles
                    .iter()
                    .map(|a| a.as_str())
                    .collect::<Vec<_>>()
                    .join(" | ")
            ),
            Command::NewNomination { id } => write!(f, "new {}", id),
            Command::CheckNominations => write!(f, "check for new nominations"),
            Command::UpdateRankings => write!(f, "update rankings"),
            Command::ReloadData => write!(f, "reload data"),
            Command::WordCount { article } => write!(f, "word count for {}", article),
            Command::Version => write!(f, "version"),
        }
    }
}

fn pattern(p: &str) -> Regex {
    Regex::new(&format!("(?i)^{}$", p)).expect("command pattern is valid")
}

static ARCHIVE: LazyLock<Regex> = LazyLock::new(|| {
    pattern(r"archive\s+(successful|success|unsuccessful|failed|withdrawn)\s+(fa|ga|ca)n?\s*:\s*(.+)")
});
static WITHDRAW: LazyLock<Regex> = LazyLock::new(|| pattern(r"withdraw\s+(fa|ga|ca)n?\s*:\s*(.+)"));
static CREATE_REVIEW: LazyLock<Regex> =
    LazyLock::new(|| pattern(r"create\s+review\s+for\s+(fa|ga|ca)n?\s*:\s*(.+)"));
static MARK_REVIEW: LazyLock<Regex> = LazyLock::new(|| {
    pattern(r"mark\s+review\s+for\s+(fa|ga|ca)n?\s*:\s*(.+?)\s+as\s+(passed|on\s+probation|probation)")
});
static REVOKE: LazyLock<Regex> =
    LazyLock::new(|| pattern(r"(?:remove|revoke)\s+status\s+for\s+(fa|ga|ca)n?\s*:\s*(.+)"));
static ADD_TO_PROJECT: LazyLock<Regex> =
    LazyLock::new(|| pattern(r"add\s+(fa|ga|ca)s?\s+to\s+(.+?)\s*:\s*(.+)"));
static NEW_NOMINATION: LazyLock<Regex> = LazyLock::new(|| pattern(r"new\s+(fa|ga|ca)n\s*:\s*(.+)"));
static CHECK: LazyLock<Regex> =
    LazyLock::new(|| pattern(r"check\s+for\s+(?:new\s+)?nominations"));
static WORD_COUNT: LazyLock<Regex> = LazyLock::new(|| pattern(r"word\s*count\s+for\s+(.+)"));
static NO_MESSAGE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\s*\(no message\)").expect("flag pattern is valid"));
static CUSTOM_MESSAGE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\s*\(?custom message:\s*").expect("flag pattern is valid"));

fn kind(caps: &Captures, group: usize) -> NominationType {
    NominationType::parse(&caps[group]).unwrap_or(NominationType::Featured)
}

fn parse_command(text: &str) -> Option<Command> {
    let text = text.trim();

    if let Some(caps) = ARCHIVE.captures(text) {
        let outcome = ArchiveOutcome::parse(&caps[1])?;
        let mut rest = caps[3].to_string();
        let mut custom_message = None;
        if let Some(m) = CUSTOM_MESSAGE.find(&rest) {
            let message = rest[m.end()..].trim().trim_end_matches(')').trim().to_string();
            custom_message = (!message.is_empty()).then_some(message);
            rest.truncate(m.start());
        }
        let suppress_message = NO_MESSAGE.is_match(&rest);
        let subpage = NO_MESSAGE.replace_all(&rest, "");
        let id = NominationId::from_subpage(kind(&caps, 2), subpage.trim());
        return Some(match outcome {
            ArchiveOutcome::Withdrawn => Command::Withdraw { id },
            _ => Command::Archive {
                id,
                outcome,
                suppress_message,
                custom_message,
            },
        });
    }
    if let Some(caps) = WITHDRAW.captures(text) {
        let id = NominationId::from_subpage(kind(&caps, 1), caps[2].trim());
        return Some(Command::Withdraw { id });
    }
    if let Some(caps) = CREATE_REVIEW.captures(text) {
        return Some(Command::CreateReview {
            article: ArticleTitle::new(&caps[2]),
            kind: kind(&caps, 1),
        });
    }
    if let Some(caps) = MARK_REVIEW.captures(text) {
        let outcome = if caps[3].eq_ignore_ascii_case("passed") {
            ReviewOutcome::Passed
        } else {
            ReviewOutcome::Probation
        };
        return Some(Command::MarkReview {
            article: ArticleTitle::new(&caps[2]),
            kind: kind(&caps, 1),
            outcome,
        });
    }
    if let Some(caps) = REVOKE.captures(text) {
        return Some(Command::MarkReview {
            article: ArticleTitle::new(&caps[2]),
            kind: kind(&caps, 1),
            outcome: ReviewOutcome::Revoked,
        });
    }
    if let Some(caps) = ADD_TO_PROJECT.captures(text) {
        let articles: Vec<ArticleTitle> = caps[3]
            .split('|')
            .map(str::trim)
            .filter(|a| !a.is_empty())
            .map(ArticleTitle::new)
            .collect();
        return Some(Command::AddToProject {
            kind: kind(&caps, 1),
            project: caps[2].trim().to_string(),
            articles,
        });
    }
    if let Some(caps) = NEW_NOMINATION.captures(text) {
        let id = NominationId::from_subpage(kind(&caps, 1), caps[2].trim());
        return Some(Command::NewNomination { id });
    }
    if CHECK.is_match(text) {
        return Some(Command::CheckNominations);
    }
    if let Some(caps) = WORD_COUNT.captures(text) {
        return Some(Command::WordCount {
            article: ArticleTitle::new(&caps[1]),
        });
    }

    let lower = text.to_ascii_lowercase();
    let words: Vec<&str> = lower.split_whitespace().collect();
    match words.as_slice() {
        ["update", "rankings"] => Some(Command::UpdateRankings),
        ["reload", "data"] => Some(Command::ReloadData),
        ["version"] => Some(Command::Version),
        _ => None,
    }
}

/// Parse a chat message for commands
///
/// Returns a `ParseResult` indicating:
/// - `NoMention` if the bot was not mentioned
/// - `UnrecognizedCommand` if the bot was mentioned but the command was not recognized
/// - `Command` if a valid command was found
///
/// The mention must start a line (after trimming). The parser stops at the
/// **first** such line, even when the command on it is not recognized.
pub fn parse_message(body: &str, mention: &str) -> ParseResult {
    for line in body.lines() {
        let trimmed = line.trim();

        let Some(prefix) = trimmed.get(..mention.len()) else {
            continue;
        };
        if !prefix.eq_ignore_ascii_case(mention) {
            continue;
        }

        let rest = &trimmed[mention.len()..];
        if rest.is_empty() {
            return ParseResult::UnrecognizedCommand {
                attempted: String::new(),
            };
        }

        // "@Holocronversion" is not a mention
        if !rest.starts_with(|c: char| c.is_whitespace() || c == ',' || c == ':') {
            continue;
        }

        let command_part = rest.trim_start_matches([',', ':']).trim();
        return match parse_command(command_part) {
            Some(command) => ParseResult::Command(command),
            None => ParseResult::UnrecognizedCommand {
                attempted: command_part.to_string(),
            },
        };
    }

    ParseResult::NoMention
}
