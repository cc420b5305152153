//! Identity and policy types shared by every part of the engine.
//!
//! Per-type behaviour (thresholds, vote rules, page names) lives in
//! [`TypePolicy`] rows of a [`ByType`] table rather than in branches
//! scattered through the code.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Status-article class a nomination or review belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum NominationType {
    #[serde(rename = "FA")]
    Featured,
    #[serde(rename = "GA")]
    Good,
    #[serde(rename = "CA")]
    Comprehensive,
}

impl NominationType {
    pub const ALL: [NominationType; 3] = [Self::Featured, Self::Good, Self::Comprehensive];

    pub fn abbreviation(self) -> &'static str {
        match self {
            Self::Featured => "FA",
            Self::Good => "GA",
            Self::Comprehensive => "CA",
        }
    }

    pub fn adjective(self) -> &'static str {
        match self {
            Self::Featured => "Featured",
            Self::Good => "Good",
            Self::Comprehensive => "Comprehensive",
        }
    }

    /// Ranking points awarded for one successful nomination of this type.
    pub fn score_weight(self) -> u32 {
        match self {
            Self::Featured => 5,
            Self::Good => 3,
            Self::Comprehensive => 1,
        }
    }

    /// Parse "FA", "FAN", "fa" or "featured".
    pub fn parse(s: &str) -> Option<Self> {
        let lower = s.trim().to_ascii_lowercase();
        let lower = lower.strip_suffix('n').unwrap_or(&lower);
        match lower {
            "fa" | "featured" => Some(Self::Featured),
            "ga" | "good" => Some(Self::Good),
            "ca" | "comprehensive" => Some(Self::Comprehensive),
            _ => None,
        }
    }

    /// Lower-case flag used by the article status template (`{{Top|fa}}`).
    pub fn status_flag(self) -> String {
        self.abbreviation().to_ascii_lowercase()
    }
}

impl fmt::Display for NominationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.abbreviation())
    }
}

/// One value per nomination type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ByType<T> {
    pub featured: T,
    pub good: T,
    pub comprehensive: T,
}

impl<T> ByType<T> {
    pub fn new(featured: T, good: T, comprehensive: T) -> Self {
        Self {
            featured,
            good,
            comprehensive,
        }
    }

    pub fn get(&self, kind: NominationType) -> &T {
        match kind {
            NominationType::Featured => &self.featured,
            NominationType::Good => &self.good,
            NominationType::Comprehensive => &self.comprehensive,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (NominationType, &T)> {
        NominationType::ALL.into_iter().map(move |k| (k, self.get(k)))
    }
}

/// Newtype for a wiki article title.
///
/// Underscores are folded to spaces so titles from URLs and from
/// page listings compare equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ArticleTitle(pub String);

impl ArticleTitle {
    pub fn new(s: impl AsRef<str>) -> Self {
        Self(s.as_ref().replace('_', " ").trim().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ArticleTitle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ArticleTitle {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for ArticleTitle {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

/// Newtype for a wiki user name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserName(pub String);

impl UserName {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Wiki user names are case-insensitive here and treat `_` as a space.
    pub fn same_as(&self, other: &UserName) -> bool {
        self.normalized() == other.normalized()
    }

    pub fn normalized(&self) -> String {
        self.0.replace('_', " ").trim().to_lowercase()
    }
}

impl fmt::Display for UserName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for UserName {
    fn from(s: &str) -> Self {
        Self(s.trim().to_string())
    }
}

impl From<String> for UserName {
    fn from(s: String) -> Self {
        Self(s.trim().to_string())
    }
}

/// Newtype for a WookieeProject identifier (the key in the project data).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProjectId(pub String);

impl fmt::Display for ProjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ProjectId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

const ORDINALS: [&str; 10] = [
    "first", "second", "third", "fourth", "fifth", "sixth", "seventh", "eighth", "ninth", "tenth",
];

/// Ordinal word for a repeat attempt; `None` for the first.
fn ordinal(sequence: u32) -> Option<String> {
    if sequence <= 1 {
        return None;
    }
    Some(
        ORDINALS
            .get(sequence as usize - 1)
            .map(|s| s.to_string())
            .unwrap_or_else(|| format!("{}th", sequence)),
    )
}

/// Split `Foo (second<suffix>` into `Foo` and 2. Anything else is a first attempt.
fn split_sequence<'a>(subpage: &'a str, suffix: &str) -> (&'a str, u32) {
    let subpage = subpage.trim();
    if let Some(open) = subpage.rfind(" (") {
        if let Some(inner) = subpage[open + 2..].strip_suffix(suffix) {
            let inner = inner.to_ascii_lowercase();
            let sequence = ORDINALS
                .iter()
                .position(|o| *o == inner)
                .map(|p| p as u32 + 1)
                .or_else(|| inner.strip_suffix("th").and_then(|n| n.parse().ok()));
            if let Some(sequence) = sequence {
                return (&subpage[..open], sequence);
            }
        }
    }
    (subpage, 1)
}

fn first_sequence() -> u32 {
    1
}

/// Identity of one nomination: article, type, and which attempt this is.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NominationId {
    pub article: ArticleTitle,
    pub kind: NominationType,
    pub sequence: u32,
}

impl NominationId {
    pub fn new(article: impl Into<ArticleTitle>, kind: NominationType, sequence: u32) -> Self {
        Self {
            article: article.into(),
            kind,
            sequence: sequence.max(1),
        }
    }

    /// Name of the nomination subpage: `Foo` or `Foo (second nomination)`.
    pub fn subpage(&self) -> String {
        match ordinal(self.sequence) {
            None => self.article.0.clone(),
            Some(ordinal) => format!("{} ({} nomination)", self.article, ordinal),
        }
    }

    /// Parse a subpage name back into an identity.
    pub fn from_subpage(kind: NominationType, subpage: &str) -> Self {
        let (article, sequence) = split_sequence(subpage, " nomination)");
        Self::new(article, kind, sequence)
    }

    /// Key under which all nominations of one article and type serialize.
    pub fn identity(&self) -> IdentityKey {
        IdentityKey::Nomination {
            article: self.article.clone(),
            kind: self.kind,
        }
    }
}

impl fmt::Display for NominationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}N: {}", self.kind, self.subpage())
    }
}

/// Identity of a post-promotion review. An article can be reviewed again
/// once its previous review concluded; each review gets its own page.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ReviewId {
    pub article: ArticleTitle,
    pub kind: NominationType,
    #[serde(default = "first_sequence")]
    pub sequence: u32,
}

impl ReviewId {
    pub fn new(article: impl Into<ArticleTitle>, kind: NominationType, sequence: u32) -> Self {
        Self {
            article: article.into(),
            kind,
            sequence: sequence.max(1),
        }
    }

    /// The review that follows this one.
    pub fn next(&self) -> Self {
        Self::new(self.article.clone(), self.kind, self.sequence + 1)
    }

    /// Name of the review subpage: `Foo` or `Foo (second)`.
    pub fn subpage(&self) -> String {
        match ordinal(self.sequence) {
            None => self.article.0.clone(),
            Some(ordinal) => format!("{} ({})", self.article, ordinal),
        }
    }

    pub fn from_subpage(kind: NominationType, subpage: &str) -> Self {
        let (article, sequence) = split_sequence(subpage, ")");
        Self::new(article, kind, sequence)
    }

    /// Reviews of one article and type share a lock across sequences.
    pub fn identity(&self) -> IdentityKey {
        IdentityKey::Review {
            article: self.article.clone(),
            kind: self.kind,
        }
    }
}

impl fmt::Display for ReviewId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} review: {}", self.kind, self.subpage())
    }
}

/// Lock identity. Nominations share one lock per article and type so the
/// duplicate-active check and the creation that follows it cannot race.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum IdentityKey {
    Nomination {
        article: ArticleTitle,
        kind: NominationType,
    },
    Review {
        article: ArticleTitle,
        kind: NominationType,
    },
}

/// How a nomination was closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ArchiveOutcome {
    Successful,
    Unsuccessful,
    Withdrawn,
}

impl ArchiveOutcome {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "successful" | "success" | "passed" => Some(Self::Successful),
            "unsuccessful" | "failed" | "rejected" => Some(Self::Unsuccessful),
            "withdrawn" | "withdraw" => Some(Self::Withdrawn),
            _ => None,
        }
    }
}

impl fmt::Display for ArchiveOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Successful => write!(f, "successful"),
            Self::Unsuccessful => write!(f, "unsuccessful"),
            Self::Withdrawn => write!(f, "withdrawn"),
        }
    }
}

/// Terminal outcome of a review.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReviewOutcome {
    Passed,
    Probation,
    Revoked,
}

impl fmt::Display for ReviewOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Passed => write!(f, "passed"),
            Self::Probation => write!(f, "on probation"),
            Self::Revoked => write!(f, "revoked"),
        }
    }
}

/// Thresholds and vote rules for one nomination type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypePolicy {
    /// Age at which an unaddressed objection is overdue.
    pub overdue_days: i64,
    /// Age at which an objection is nearing overdue and the first ping goes out.
    pub notification_days: i64,
    /// Review board votes that pass a nomination regardless of total.
    pub fast_review_votes: u32,
    pub min_review_votes: u32,
    pub min_total_votes: u32,
    /// A nomination younger than this can never be archived as successful.
    pub min_age_days: i64,
    /// After this many days the vote count is no longer checked.
    pub vote_waiver_days: i64,
    /// One extra board vote lowers the required total by one.
    #[serde(default)]
    pub relaxed_total: bool,
    /// Template marking a vote from this type's review board.
    pub board_template: String,
    /// Template marking a vote from another board that tops up the board count.
    #[serde(default)]
    pub cross_board_template: Option<String>,
    /// Template the board adds once it has signed off on a nomination.
    pub approval_template: String,
    pub nomination_category: String,
    pub review_category: String,
}

impl TypePolicy {
    pub fn default_for(kind: NominationType) -> Self {
        let adjective = kind.adjective();
        let (overdue, fast, min_review, min_total, board, cross, relaxed) = match kind {
            NominationType::Featured => (14, 5, 3, 7, "Inq", None, true),
            NominationType::Good => (10, 4, 2, 6, "AC", Some("Inq".to_string()), false),
            NominationType::Comprehensive => (7, 3, 2, 5, "EC", None, false),
        };
        Self {
            overdue_days: overdue,
            notification_days: overdue - 1,
            fast_review_votes: fast,
            min_review_votes: min_review,
            min_total_votes: min_total,
            min_age_days: 2,
            vote_waiver_days: 7,
            relaxed_total: relaxed,
            board_template: board.to_string(),
            cross_board_template: cross,
            approval_template: format!("{}approved", board),
            nomination_category: format!("Wookieepedia {} article nominations", adjective),
            review_category: format!("Wookieepedia {} article reviews", adjective),
        }
    }
}

/// The full per-type policy table.
pub type PolicyTable = ByType<TypePolicy>;

impl Default for PolicyTable {
    fn default() -> Self {
        ByType::new(
            TypePolicy::default_for(NominationType::Featured),
            TypePolicy::default_for(NominationType::Good),
            TypePolicy::default_for(NominationType::Comprehensive),
        )
    }
}

/// Page naming conventions for a type.
pub fn nomination_page_prefix(kind: NominationType) -> String {
    format!("Wookieepedia:{} article nominations", kind.adjective())
}

pub fn review_page_prefix(kind: NominationType) -> String {
    format!("Wookieepedia:{} article reviews", kind.adjective())
}

impl NominationId {
    pub fn page_title(&self) -> String {
        format!("{}/{}", nomination_page_prefix(self.kind), self.subpage())
    }
}

impl ReviewId {
    pub fn page_title(&self) -> String {
        format!("{}/{}", review_page_prefix(self.kind), self.subpage())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_type_accepts_nomination_suffix() {
        assert_eq!(NominationType::parse("FAN"), Some(NominationType::Featured));
        assert_eq!(NominationType::parse("ga"), Some(NominationType::Good));
        assert_eq!(NominationType::parse(" CAN "), Some(NominationType::Comprehensive));
        assert_eq!(NominationType::parse("XA"), None);
    }

    #[test]
    fn test_subpage_round_trip_for_repeat_nominations() {
        let id = NominationId::new("Darth Vader", NominationType::Featured, 2);
        assert_eq!(id.subpage(), "Darth Vader (second nomination)");
        assert_eq!(
            NominationId::from_subpage(NominationType::Featured, &id.subpage()),
            id
        );
    }

    #[test]
    fn test_from_subpage_keeps_unrelated_parentheses() {
        let id = NominationId::from_subpage(NominationType::Good, "Tarkin (novel)");
        assert_eq!(id.article.as_str(), "Tarkin (novel)");
        assert_eq!(id.sequence, 1);
    }

    #[test]
    fn test_user_names_compare_loosely() {
        let a = UserName::from("Ayrehead_Fan");
        let b = UserName::from("ayrehead fan");
        assert!(a.same_as(&b));
        assert!(!a.same_as(&UserName::from("Someone")));
    }

    #[test]
    fn test_page_titles() {
        let id = NominationId::new("Mon Mothma", NominationType::Good, 1);
        assert_eq!(
            id.page_title(),
            "Wookieepedia:Good article nominations/Mon Mothma"
        );
        let review = ReviewId::new("Mon Mothma", NominationType::Good, 1);
        assert_eq!(
            review.page_title(),
            "Wookieepedia:Good article reviews/Mon Mothma"
        );
        assert_eq!(
            review.next().page_title(),
            "Wookieepedia:Good article reviews/Mon Mothma (second)"
        );
    }

    #[test]
    fn test_review_subpage_parsing() {
        let third = ReviewId::from_subpage(NominationType::Featured, "Darth Vader (third)");
        assert_eq!(third, ReviewId::new("Darth Vader", NominationType::Featured, 3));
        // A disambiguator is part of the title, not a sequence
        let novel = ReviewId::from_subpage(NominationType::Featured, "Tarkin (novel)");
        assert_eq!(novel, ReviewId::new("Tarkin (novel)", NominationType::Featured, 1));
        // Older rows carry no sequence
        let legacy: ReviewId =
            serde_json::from_str(r#"{"article":"Rex","kind":"GA"}"#).unwrap();
        assert_eq!(legacy.sequence, 1);
    }

    #[test]
    fn test_default_policy_nearing_is_one_day_before_overdue() {
        let table = PolicyTable::default();
        for (_, policy) in table.iter() {
            assert_eq!(policy.notification_days, policy.overdue_days - 1);
        }
    }

    #[test]
    fn test_policy_table_parses_from_json() {
        let json = serde_json::to_string(&PolicyTable::default()).unwrap();
        let parsed: PolicyTable = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, PolicyTable::default());
    }
}
