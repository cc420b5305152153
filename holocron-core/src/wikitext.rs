//! Structural helpers over raw wikitext.
//!
//! Everything here is a pure function of its input. The page transforms
//! are idempotent: applying one to its own output returns it unchanged,
//! which is what makes retrying a half-finished archival safe.

use std::sync::LazyLock;

use chrono::{DateTime, NaiveDateTime, Utc};
use regex::Regex;

use crate::nomination::UserName;

static USER_LINK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\[\[\s*User(?:\s+talk)?\s*:\s*([^|\]/#]+)|\{\{\s*U\s*\|\s*([^|}]+)")
        .expect("user link pattern is valid")
});

static SIGNATURE_DATE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(\d{1,2}:\d{2}), (\d{1,2} [A-Za-z]+ \d{4}|[A-Za-z]+ \d{1,2}, \d{4}) \(UTC\)",
    )
    .expect("signature date pattern is valid")
});

static HEADING: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(=+)\s*(.*?)\s*(=+)\s*$").expect("heading pattern is valid"));

static PROJECT_LINK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\[\[\s*Wookieepedia\s*:\s*WookieeProject\s+([^|\]]+)")
        .expect("project link pattern is valid")
});

/// All user names linked from a line, in order of appearance.
pub fn linked_users(line: &str) -> Vec<UserName> {
    USER_LINK
        .captures_iter(line)
        .filter_map(|c| c.get(1).or_else(|| c.get(2)))
        .map(|m| UserName::from(m.as_str()))
        .collect()
}

/// The last signature timestamp in a line, if one parses.
pub fn signature_timestamp(line: &str) -> Option<DateTime<Utc>> {
    SIGNATURE_DATE
        .captures_iter(line)
        .filter_map(|c| parse_signature(&c[1], &c[2]))
        .last()
}

fn parse_signature(time: &str, date: &str) -> Option<DateTime<Utc>> {
    let joined = format!("{} {}", time, date);
    ["%H:%M %d %B %Y", "%H:%M %B %d, %Y"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(&joined, fmt).ok())
        .map(|naive| naive.and_utc())
}

/// A parsed section heading.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Heading {
    pub level: usize,
    pub title: String,
}

pub fn heading(line: &str) -> Option<Heading> {
    let caps = HEADING.captures(line.trim())?;
    let level = caps[1].len().min(caps[3].len());
    if level < 2 {
        return None;
    }
    Some(Heading {
        level,
        title: caps[2].to_string(),
    })
}

/// Lines of the first section titled `title` (case-insensitive), up to the
/// next heading of the same or a higher level.
pub fn section<'a>(text: &'a str, title: &str) -> Option<Vec<&'a str>> {
    let mut lines = text.lines();
    let level = loop {
        let line = lines.next()?;
        if let Some(h) = heading(line) {
            if h.title.eq_ignore_ascii_case(title) {
                break h.level;
            }
        }
    };
    Some(
        lines
            .take_while(|line| heading(line).map_or(true, |h| h.level > level))
            .collect(),
    )
}

/// Names of WookieeProjects linked from the nomination's project line.
pub fn project_links(text: &str) -> Vec<String> {
    let mut names: Vec<String> = text
        .lines()
        .filter(|line| line.contains("WookieeProject"))
        .flat_map(|line| PROJECT_LINK.captures_iter(line))
        .map(|c| c[1].trim().to_string())
        .collect();
    names.dedup();
    names
}

// =============================================================================
// Word count
// =============================================================================

static STRIP_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"(?s)<!--.*?-->",
        r"(?s)<ref[^>/]*>.*?</ref>",
        r"<ref[^>]*/>",
        r"(?i)\[\[(?:File|Image|Category):[^\]]*\]\]",
        r"<[^>]+>",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("strip pattern is valid"))
    .collect()
});

static PIPED_LINK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[\[[^\]|]*\|([^\]]*)\]\]").expect("piped link pattern is valid"));

static PLAIN_LINK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[\[([^\]]*)\]\]").expect("plain link pattern is valid"));

/// Prose word count of an article body.
///
/// Counting stops at the first appendix heading (appearances, sources,
/// notes and references) and ignores templates, references, files and
/// markup.
pub fn word_count(text: &str) -> usize {
    let body: Vec<&str> = text
        .lines()
        .take_while(|line| match heading(line) {
            Some(h) => !matches!(
                h.title.to_ascii_lowercase().as_str(),
                "appearances" | "sources" | "notes and references" | "external links"
            ),
            None => true,
        })
        .filter(|line| heading(line).is_none())
        .collect();
    let mut prose = strip_templates(&body.join("\n"));
    for pattern in STRIP_PATTERNS.iter() {
        prose = pattern.replace_all(&prose, " ").into_owned();
    }
    prose = PIPED_LINK.replace_all(&prose, "$1").into_owned();
    prose = PLAIN_LINK.replace_all(&prose, "$1").into_owned();
    prose = prose.replace("'''", "").replace("''", "");
    prose
        .split_whitespace()
        .filter(|w| w.chars().any(|c| c.is_alphanumeric()))
        .count()
}

/// Remove `{{...}}` blocks, honouring nesting.
fn strip_templates(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut depth = 0usize;
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '{' && chars.peek() == Some(&'{') {
            chars.next();
            depth += 1;
        } else if c == '}' && depth > 0 && chars.peek() == Some(&'}') {
            chars.next();
            depth -= 1;
            if depth == 0 {
                out.push(' ');
            }
        } else if depth == 0 {
            out.push(c);
        }
    }
    out
}

// =============================================================================
// Idempotent page transforms
// =============================================================================

/// Append `line` unless an identical line is already present.
pub fn ensure_line(text: &str, line: &str) -> String {
    if text.lines().any(|l| l.trim() == line.trim()) {
        return text.to_string();
    }
    let mut out = text.trim_end().to_string();
    if !out.is_empty() {
        out.push('\n');
    }
    out.push_str(line);
    out.push('\n');
    out
}

/// Remove every line equal (after trimming) to `line`.
pub fn remove_line(text: &str, line: &str) -> String {
    if !text.lines().any(|l| l.trim() == line.trim()) {
        return text.to_string();
    }
    let mut out: String = text
        .lines()
        .filter(|l| l.trim() != line.trim())
        .collect::<Vec<_>>()
        .join("\n");
    if text.ends_with('\n') {
        out.push('\n');
    }
    out
}

pub fn category_line(category: &str) -> String {
    format!("[[Category:{}]]", category)
}

pub fn add_category(text: &str, category: &str) -> String {
    ensure_line(text, &category_line(category))
}

pub fn remove_category(text: &str, category: &str) -> String {
    remove_line(text, &category_line(category))
}

/// Insert `line` directly under the section heading `title`, creating the
/// section at the end of the page when it does not exist.
pub fn ensure_line_in_section(text: &str, title: &str, line: &str) -> String {
    if let Some(lines) = section(text, title) {
        if lines.iter().any(|l| l.trim() == line.trim()) {
            return text.to_string();
        }
    }
    let mut out = Vec::new();
    let mut inserted = false;
    for l in text.lines() {
        out.push(l.to_string());
        if !inserted && heading(l).is_some_and(|h| h.title.eq_ignore_ascii_case(title)) {
            out.push(line.to_string());
            inserted = true;
        }
    }
    if !inserted {
        if !out.is_empty() {
            out.push(String::new());
        }
        out.push(format!("=={}==", title));
        out.push(line.to_string());
    }
    let mut joined = out.join("\n");
    joined.push('\n');
    joined
}

static TOP_TEMPLATE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{\{\s*Top\s*((?:\|[^}]*)?)\}\}").expect("top pattern is valid"));

/// Flags on the article's `{{Top}}` template.
pub fn status_flags(text: &str) -> Vec<String> {
    TOP_TEMPLATE
        .captures(text)
        .map(|c| {
            c[1].split('|')
                .map(|f| f.trim().to_string())
                .filter(|f| !f.is_empty())
                .collect()
        })
        .unwrap_or_default()
}

/// Rewrite the article's `{{Top}}` flags: drop everything in `remove`, then
/// add `add` if absent. Adds a `{{Top}}` when the article has none.
pub fn set_status_flag(text: &str, remove: &[&str], add: Option<&str>) -> String {
    let mut flags: Vec<String> = status_flags(text)
        .into_iter()
        .filter(|f| !remove.iter().any(|r| r.eq_ignore_ascii_case(f)))
        .collect();
    if let Some(add) = add {
        if !flags.iter().any(|f| f.eq_ignore_ascii_case(add)) {
            flags.push(add.to_string());
        }
    }
    let rendered = if flags.is_empty() {
        "{{Top}}".to_string()
    } else {
        format!("{{{{Top|{}}}}}", flags.join("|"))
    };
    if TOP_TEMPLATE.is_match(text) {
        TOP_TEMPLATE
            .replace(text, regex::NoExpand(&rendered))
            .into_owned()
    } else {
        format!("{}\n{}", rendered, text)
    }
}

/// Remove every occurrence of a parameterless template such as `{{FAnom}}`.
pub fn remove_template(text: &str, name: &str) -> String {
    let pattern = format!(r"(?i)\{{\{{\s*{}\s*\}}\}}\n?", regex::escape(name));
    match Regex::new(&pattern) {
        Ok(re) => re.replace_all(text, "").into_owned(),
        Err(_) => text.to_string(),
    }
}

/// Wrap a discussion page in archive banners. No-op when already wrapped.
pub fn wrap_archived(text: &str, result: &str, date: &str) -> String {
    if text.trim_start().starts_with("{{Archivetop") {
        return text.to_string();
    }
    format!(
        "{{{{Archivetop|result={}|date={}}}}}\n{}\n{{{{Archivebottom}}}}\n",
        result,
        date,
        text.trim_end()
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_signature_timestamp_both_formats() {
        let day_first = "Looks fine. [[User:Tommy|Tommy]] 14:05, 3 March 2024 (UTC)";
        let month_first = "--{{U|Tommy}} 09:30, March 4, 2024 (UTC)";
        assert_eq!(
            signature_timestamp(day_first),
            Some(Utc.with_ymd_and_hms(2024, 3, 3, 14, 5, 0).unwrap())
        );
        assert_eq!(
            signature_timestamp(month_first),
            Some(Utc.with_ymd_and_hms(2024, 3, 4, 9, 30, 0).unwrap())
        );
    }

    #[test]
    fn test_signature_timestamp_rejects_malformed_dates() {
        assert_eq!(signature_timestamp("12:00, 45 Smarch 2024 (UTC)"), None);
        assert_eq!(signature_timestamp("no signature here"), None);
    }

    #[test]
    fn test_linked_users_handles_both_link_styles() {
        let line = "*Fix this. [[User:Ayre_Fan|Ayre]] ([[User talk:Ayre_Fan|talk]]) and {{U|Other}}";
        let users: Vec<String> = linked_users(line).into_iter().map(|u| u.0).collect();
        assert_eq!(users, vec!["Ayre_Fan", "Ayre_Fan", "Other"]);
    }

    #[test]
    fn test_section_stops_at_same_level_heading() {
        let text = "====Support====\n#a\n====Object====\n*b\n=====Tommy=====\n*c\n====Comments====\nd";
        let object = section(text, "Object").unwrap();
        assert_eq!(object, vec!["*b", "=====Tommy=====", "*c"]);
        assert!(section(text, "Missing").is_none());
    }

    #[test]
    fn test_word_count_ignores_markup_and_appendices() {
        let text = "{{Top|fa}}\n'''Luke''' was a [[Jedi|Jedi Knight]].<ref>Source</ref>\n\
                    He flew an [[X-wing]]. {{C|note}}\n==Appearances==\n*Lots of words here";
        assert_eq!(word_count(text), 9);
    }

    #[test]
    fn test_line_transforms_are_idempotent() {
        let text = "{{/Foo}}\n{{/Bar}}\n";
        let once = ensure_line(text, "{{/Baz}}");
        assert_eq!(ensure_line(&once, "{{/Baz}}"), once);
        let removed = remove_line(&once, "{{/Foo}}");
        assert_eq!(remove_line(&removed, "{{/Foo}}"), removed);
        assert_eq!(removed, "{{/Bar}}\n{{/Baz}}\n");
    }

    #[test]
    fn test_set_status_flag() {
        let text = "{{Top|can|fa}}\nBody";
        let probation = set_status_flag(text, &["fa"], Some("pfa"));
        assert_eq!(probation, "{{Top|can|pfa}}\nBody");
        assert_eq!(set_status_flag(&probation, &["fa"], Some("pfa")), probation);
        let added = set_status_flag("Body", &[], Some("ga"));
        assert_eq!(added, "{{Top|ga}}\nBody");
    }

    #[test]
    fn test_wrap_archived_is_idempotent() {
        let wrapped = wrap_archived("discussion", "successful", "2024-01-01");
        assert!(wrapped.starts_with("{{Archivetop|result=successful"));
        assert_eq!(wrap_archived(&wrapped, "successful", "2024-01-01"), wrapped);
    }

    #[test]
    fn test_ensure_line_in_section() {
        let text = "==Featured articles==\n*[[A]]\n";
        let out = ensure_line_in_section(text, "Featured articles", "*[[B]]");
        assert_eq!(out, "==Featured articles==\n*[[B]]\n*[[A]]\n");
        assert_eq!(
            ensure_line_in_section(&out, "Featured articles", "*[[B]]"),
            out
        );
        let created = ensure_line_in_section("", "Good articles", "*[[C]]");
        assert_eq!(created, "==Good articles==\n*[[C]]\n");
    }

    #[test]
    fn test_project_links() {
        let text = "*'''WookieeProject (optional)''': [[Wookieepedia:WookieeProject Ahsoka Tano|Ahsoka]], [[Wookieepedia:WookieeProject Sith|Sith]]";
        assert_eq!(project_links(text), vec!["Ahsoka Tano", "Sith"]);
    }
}
