//! Ranking table rendering.
//!
//! Rendering is a full recompute from the entries handed in; nothing is
//! patched incrementally.

use std::collections::BTreeMap;
use std::fmt::Write;

use serde::{Deserialize, Serialize};

use crate::nomination::{NominationType, UserName};

/// Successful nominations credited to one user in one year.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RankingEntry {
    pub user: UserName,
    pub year: i32,
    pub featured: u32,
    pub good: u32,
    pub comprehensive: u32,
}

impl RankingEntry {
    pub fn new(user: UserName, year: i32) -> Self {
        Self {
            user,
            year,
            featured: 0,
            good: 0,
            comprehensive: 0,
        }
    }

    pub fn count_for(&self, kind: NominationType) -> u32 {
        match kind {
            NominationType::Featured => self.featured,
            NominationType::Good => self.good,
            NominationType::Comprehensive => self.comprehensive,
        }
    }

    pub fn increment(&mut self, kind: NominationType) {
        match kind {
            NominationType::Featured => self.featured += 1,
            NominationType::Good => self.good += 1,
            NominationType::Comprehensive => self.comprehensive += 1,
        }
    }

    pub fn total(&self) -> u32 {
        self.featured + self.good + self.comprehensive
    }

    pub fn score(&self) -> u32 {
        NominationType::ALL
            .iter()
            .map(|k| self.count_for(*k) * k.score_weight())
            .sum()
    }
}

/// Collapse per-year entries into one row per user (year set to 0).
pub fn all_time(entries: &[RankingEntry]) -> Vec<RankingEntry> {
    let mut by_user: BTreeMap<String, RankingEntry> = BTreeMap::new();
    for entry in entries {
        let row = by_user
            .entry(entry.user.normalized())
            .or_insert_with(|| RankingEntry::new(entry.user.clone(), 0));
        row.featured += entry.featured;
        row.good += entry.good;
        row.comprehensive += entry.comprehensive;
    }
    by_user.into_values().collect()
}

/// Render a sortable wikitable. Rows are ordered by score, then total,
/// then name; excluded users are listed struck through at their position.
pub fn render_rankings(title: &str, entries: &[RankingEntry], excluded: &[UserName]) -> String {
    let mut rows: Vec<&RankingEntry> = entries.iter().filter(|e| e.total() > 0).collect();
    rows.sort_by(|a, b| {
        b.score()
            .cmp(&a.score())
            .then(b.total().cmp(&a.total()))
            .then(a.user.normalized().cmp(&b.user.normalized()))
    });

    let mut out = String::new();
    let _ = writeln!(out, "=={}==", title);
    let _ = writeln!(out, "{{| class=\"wikitable sortable\"");
    let _ = writeln!(out, "! Rank !! User !! FA !! GA !! CA !! Total !! Score");

    let mut rank = 0;
    let mut previous: Option<(u32, u32)> = None;
    for (index, entry) in rows.iter().enumerate() {
        let key = (entry.score(), entry.total());
        if previous != Some(key) {
            rank = index + 1;
            previous = Some(key);
        }
        let user = if excluded.iter().any(|u| u.same_as(&entry.user)) {
            format!("<s>[[User:{0}|{0}]]</s>", entry.user)
        } else {
            format!("[[User:{0}|{0}]]", entry.user)
        };
        let _ = writeln!(out, "|-");
        let _ = writeln!(
            out,
            "| {} || {} || {} || {} || {} || {} || {}",
            rank,
            user,
            entry.featured,
            entry.good,
            entry.comprehensive,
            entry.total(),
            entry.score()
        );
    }
    let _ = writeln!(out, "|}}");
    out
}
