//! Vote counting and approval checks for successful archival.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::nomination::{TypePolicy, UserName};
use crate::wikitext::{linked_users, section, signature_timestamp};

/// What a nomination page says about its own readiness.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalEvidence {
    pub nominator: Option<UserName>,
    pub nominated_at: Option<DateTime<Utc>>,
    /// The review board's sign-off template is on the page.
    pub approval_marker: bool,
    pub board_votes: u32,
    pub cross_board_votes: u32,
    pub total_votes: u32,
    /// Support votes missing either a user link or a date.
    pub unsigned_votes: u32,
}

/// Read the nomination line, the support section and the approval marker.
pub fn analyze_nomination(text: &str, policy: &TypePolicy) -> ApprovalEvidence {
    let mut evidence = ApprovalEvidence::default();

    if let Some(line) = text.lines().find(|l| l.contains("Nominated by")) {
        evidence.nominator = linked_users(line).into_iter().next();
        evidence.nominated_at = signature_timestamp(line);
    }

    let marker = format!("{{{{{}", policy.approval_template.to_ascii_lowercase());
    evidence.approval_marker = text.to_ascii_lowercase().contains(&marker);

    let board = format!("{{{{{}}}}}", policy.board_template.to_ascii_lowercase());
    let cross = policy
        .cross_board_template
        .as_ref()
        .map(|t| format!("{{{{{}}}}}", t.to_ascii_lowercase()));

    for line in section(text, "Support").unwrap_or_default() {
        let line = line.trim();
        if !line.starts_with('#') || line.starts_with("#:") || line.starts_with("##") {
            continue;
        }
        let lower = line.to_ascii_lowercase();
        evidence.total_votes += 1;
        if lower.contains(&board) {
            evidence.board_votes += 1;
        } else if cross.as_ref().is_some_and(|c| lower.contains(c)) {
            evidence.cross_board_votes += 1;
        }
        if linked_users(line).is_empty() || signature_timestamp(line).is_none() {
            evidence.unsigned_votes += 1;
        }
    }

    evidence
}

/// Whether the vote counts alone satisfy the type's rule.
pub fn votes_sufficient(evidence: &ApprovalEvidence, policy: &TypePolicy) -> bool {
    let board = evidence.board_votes;
    let total = evidence.total_votes;

    if board >= policy.fast_review_votes {
        return true;
    }
    if board >= policy.min_review_votes && total >= policy.min_total_votes {
        return true;
    }
    if policy.relaxed_total
        && board > policy.min_review_votes
        && total + 1 >= policy.min_total_votes
    {
        return true;
    }
    if evidence.cross_board_votes > 0 {
        let topped_up = board + 1;
        if topped_up >= policy.fast_review_votes {
            return true;
        }
        if topped_up >= policy.min_review_votes && total >= policy.min_total_votes {
            return true;
        }
    }
    false
}

/// Every reason a nomination cannot be archived as successful yet.
/// Empty when it can.
pub fn approval_problems(
    evidence: &ApprovalEvidence,
    policy: &TypePolicy,
    created_at: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Vec<String> {
    let mut problems = Vec::new();

    if evidence.nominator.is_none() {
        problems.push("the nomination line has no nominator signature".to_string());
    }
    if evidence.nominated_at.is_none() {
        problems.push("the nomination line is not dated".to_string());
    }
    if !evidence.approval_marker {
        problems.push(format!(
            "the {{{{{}}}}} approval template is missing",
            policy.approval_template
        ));
    }

    let age = (now - created_at).num_days();
    if age < policy.min_age_days {
        problems.push(format!(
            "the nomination is {} day(s) old; at least {} required",
            age, policy.min_age_days
        ));
    }

    if age < policy.vote_waiver_days {
        if evidence.unsigned_votes > 0 {
            problems.push(format!(
                "{} support vote(s) lack a signature or date",
                evidence.unsigned_votes
            ));
        }
        if !votes_sufficient(evidence, policy) {
            problems.push(format!(
                "insufficient votes: {} board and {} total (needs {} board, or {} board with {} total)",
                evidence.board_votes,
                evidence.total_votes,
                policy.fast_review_votes,
                policy.min_review_votes,
                policy.min_total_votes
            ));
        }
    }

    problems
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nomination::NominationType;
    use chrono::{Duration, TimeZone};

    fn page(votes: &[&str], approved: bool) -> String {
        let mut text = String::from(
            "*'''Nominated by''': [[User:Nom|Nom]] 10:00, 1 March 2024 (UTC)\n====Support====\n",
        );
        for v in votes {
            text.push_str(&format!("#{} [[User:V|V]] 10:00, 2 March 2024 (UTC)\n", v));
        }
        text.push_str("#:A reply, not a vote\n====Object====\n====Comments====\n");
        if approved {
            text.push_str("{{Inqapproved|Someone}}\n");
        }
        text
    }

    fn created() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap()
    }

    #[test]
    fn test_analyze_counts_board_and_total_votes() {
        let policy = TypePolicy::default_for(NominationType::Featured);
        let text = page(&["{{Inq}}", "{{Inq}}", "Support", "{{Inq}}"], true);
        let evidence = analyze_nomination(&text, &policy);
        assert_eq!(evidence.nominator, Some(UserName::from("Nom")));
        assert_eq!(evidence.board_votes, 3);
        assert_eq!(evidence.total_votes, 4);
        assert!(evidence.approval_marker);
        assert_eq!(evidence.unsigned_votes, 0);
    }

    #[test]
    fn test_fast_pass_on_board_votes() {
        let policy = TypePolicy::default_for(NominationType::Comprehensive);
        let text = page(&["{{EC}}", "{{EC}}", "{{EC}}"], false);
        let evidence = analyze_nomination(&text, &policy);
        assert!(votes_sufficient(&evidence, &policy));
    }

    #[test]
    fn test_relaxed_total_only_where_configured() {
        let fa = TypePolicy::default_for(NominationType::Featured);
        // Four board votes, six total: one short of seven, rescued by the extra board vote.
        let evidence = ApprovalEvidence {
            board_votes: 4,
            total_votes: 6,
            ..Default::default()
        };
        assert!(votes_sufficient(&evidence, &fa));

        let mut strict = fa.clone();
        strict.relaxed_total = false;
        assert!(!votes_sufficient(&evidence, &strict));
    }

    #[test]
    fn test_cross_board_vote_tops_up() {
        let ga = TypePolicy::default_for(NominationType::Good);
        let evidence = ApprovalEvidence {
            board_votes: 3,
            cross_board_votes: 1,
            total_votes: 4,
            ..Default::default()
        };
        assert!(votes_sufficient(&evidence, &ga));
        let without = ApprovalEvidence {
            cross_board_votes: 0,
            ..evidence
        };
        assert!(!votes_sufficient(&without, &ga));
    }

    #[test]
    fn test_problems_for_young_unapproved_nomination() {
        let policy = TypePolicy::default_for(NominationType::Featured);
        let text = page(&["{{Inq}}"], false);
        let evidence = analyze_nomination(&text, &policy);
        let problems = approval_problems(&evidence, &policy, created(), created() + Duration::days(1));
        assert_eq!(problems.len(), 3, "{:?}", problems);
        assert!(problems[0].contains("approval template"));
        assert!(problems[1].contains("1 day(s) old"));
        assert!(problems[2].contains("insufficient votes"));
    }

    #[test]
    fn test_vote_waiver_after_a_week() {
        let policy = TypePolicy::default_for(NominationType::Featured);
        let text = page(&["{{Inq}}"], true);
        let evidence = analyze_nomination(&text, &policy);
        let problems = approval_problems(&evidence, &policy, created(), created() + Duration::days(8));
        assert!(problems.is_empty(), "{:?}", problems);
    }
}
