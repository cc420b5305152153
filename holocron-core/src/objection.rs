//! Objection parsing and age classification.
//!
//! Objections live in the `Object` section of a nomination or review page,
//! grouped under one sub-heading per objector. A top-level bullet opens a
//! thread; deeper bullets are replies. Only structural markers are
//! interpreted: strikethrough, signatures, and date stamps.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::nomination::{TypePolicy, UserName};
use crate::wikitext::{heading, linked_users, signature_timestamp};

/// Reply phrases that mark an objection as handled by the nominator.
pub const ADDRESSED_PHRASES: &[&str] = &["all done", "all handled", "done", "fixed"];

const EXCERPT_LEN: usize = 80;

/// One objection thread as found on the page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Objection {
    /// Stable identity across runs: page, objector, and the first line with
    /// strike markup removed.
    pub fingerprint: String,
    pub raised_by: Option<UserName>,
    pub raised_at: Option<DateTime<Utc>>,
    pub struck: bool,
    /// Newest signature anywhere in the thread.
    pub last_activity: Option<DateTime<Utc>>,
    /// Newest reply carrying an "addressed" phrase.
    pub addressed_at: Option<DateTime<Utc>>,
    pub excerpt: String,
}

impl Objection {
    pub fn is_addressed(&self) -> bool {
        self.addressed_at.is_some()
    }

    /// Timestamp age is measured from. Missing timestamps fall back to `now`
    /// so an unparseable objection reads as fresh rather than disappearing.
    pub fn reference_time(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        self.addressed_at
            .or(self.last_activity)
            .or(self.raised_at)
            .unwrap_or(now)
    }

    pub fn age_days(&self, now: DateTime<Utc>) -> i64 {
        (now - self.reference_time(now)).num_days().max(0)
    }
}

/// Where an objection sits relative to its type's overdue threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ObjectionLevel {
    WithinWindow,
    NearingOverdue,
    Overdue,
}

impl ObjectionLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::WithinWindow => "within_window",
            Self::NearingOverdue => "nearing_overdue",
            Self::Overdue => "overdue",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "within_window" => Some(Self::WithinWindow),
            "nearing_overdue" => Some(Self::NearingOverdue),
            "overdue" => Some(Self::Overdue),
            _ => None,
        }
    }
}

pub fn classify_age(age_days: i64, policy: &TypePolicy) -> ObjectionLevel {
    if age_days >= policy.overdue_days {
        ObjectionLevel::Overdue
    } else if age_days >= policy.notification_days {
        ObjectionLevel::NearingOverdue
    } else {
        ObjectionLevel::WithinWindow
    }
}

pub fn classify(objection: &Objection, policy: &TypePolicy, now: DateTime<Utc>) -> ObjectionLevel {
    classify_age(objection.age_days(now), policy)
}

/// The level to report given what was already pinged. Never lower than the
/// previous level: a downgrade is only possible by striking the objection,
/// which removes it from tracking entirely.
pub fn escalation(previous: Option<ObjectionLevel>, current: ObjectionLevel) -> Option<ObjectionLevel> {
    let floor = previous.unwrap_or(ObjectionLevel::WithinWindow);
    (current > floor).then_some(current)
}

#[derive(Debug, Default)]
struct Thread {
    lines: Vec<String>,
    struck: bool,
    section_user: Option<UserName>,
}

/// Parse every objection thread on a page.
pub fn parse_objections(page: &str, text: &str) -> Vec<Objection> {
    let mut threads: Vec<Thread> = Vec::new();
    let mut object_level: Option<usize> = None;
    let mut section_user: Option<UserName> = None;
    let mut open_strikes: i64 = 0;

    for raw in text.lines() {
        let line = raw.trim();

        if let Some(h) = heading(line) {
            match object_level {
                None if h.title.eq_ignore_ascii_case("object") => {
                    object_level = Some(h.level);
                }
                Some(level) if h.level > level => {
                    section_user = linked_users(&h.title)
                        .into_iter()
                        .last()
                        .or_else(|| Some(UserName::from(h.title.as_str())))
                        .filter(|u| !u.0.is_empty());
                    open_strikes = 0;
                }
                Some(_) => break,
                None => {}
            }
            continue;
        }

        if object_level.is_none() || line.is_empty() {
            continue;
        }

        let prefix_len = line
            .find(|c: char| !matches!(c, '*' | ':' | '#'))
            .unwrap_or(line.len());
        let (prefix, content) = line.split_at(prefix_len);

        if prefix == "*" {
            let struck = open_strikes > 0 || opens_struck(content);
            threads.push(Thread {
                lines: vec![content.trim().to_string()],
                struck,
                section_user: section_user.clone(),
            });
        } else if !prefix.is_empty() {
            if let Some(thread) = threads.last_mut() {
                thread.lines.push(content.trim().to_string());
            }
        }

        open_strikes += count(content, "<s>") - count(content, "</s>");
        open_strikes = open_strikes.max(0);
    }

    threads
        .into_iter()
        .map(|thread| build_objection(page, thread))
        .collect()
}

fn opens_struck(content: &str) -> bool {
    let trimmed = content.trim_start().to_ascii_lowercase();
    trimmed.starts_with("<s>")
        || trimmed.starts_with("(comment)")
        || trimmed.contains("review note")
}

fn count(haystack: &str, needle: &str) -> i64 {
    haystack.to_ascii_lowercase().matches(needle).count() as i64
}

fn build_objection(page: &str, thread: Thread) -> Objection {
    let first = thread.lines.first().cloned().unwrap_or_default();
    let raised_by = linked_users(&first)
        .into_iter()
        .last()
        .or(thread.section_user);
    let raised_at = signature_timestamp(&first);

    let last_activity = thread.lines.iter().filter_map(|l| signature_timestamp(l)).max();
    let addressed_at = thread
        .lines
        .iter()
        .skip(1)
        .filter(|l| is_addressed_reply(l))
        .filter_map(|l| signature_timestamp(l))
        .max();

    let normalized = first.replace("<s>", "").replace("</s>", "");
    let mut hasher = Sha256::new();
    hasher.update(page.as_bytes());
    hasher.update(b"|");
    hasher.update(raised_by.as_ref().map(|u| u.normalized()).unwrap_or_default());
    hasher.update(b"|");
    hasher.update(normalized.trim().as_bytes());
    let fingerprint = hex::encode(&hasher.finalize()[..12]);

    Objection {
        fingerprint,
        raised_by,
        raised_at,
        struck: thread.struck,
        last_activity,
        addressed_at,
        excerpt: excerpt(&normalized),
    }
}

fn is_addressed_reply(line: &str) -> bool {
    let lower = line.to_ascii_lowercase();
    ADDRESSED_PHRASES.iter().any(|phrase| {
        lower.match_indices(phrase).any(|(i, _)| {
            let before = lower[..i].chars().last();
            let after = lower[i + phrase.len()..].chars().next();
            !before.is_some_and(|c| c.is_alphanumeric()) && !after.is_some_and(|c| c.is_alphanumeric())
        })
    })
}

fn excerpt(line: &str) -> String {
    let plain: String = line
        .split("[[User")
        .next()
        .unwrap_or_default()
        .replace("[[", "")
        .replace("]]", "")
        .trim()
        .to_string();
    if plain.chars().count() <= EXCERPT_LEN {
        plain
    } else {
        let cut: String = plain.chars().take(EXCERPT_LEN).collect();
        format!("{}...", cut.trim_end())
    }
}
