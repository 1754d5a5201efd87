// src/score/prompt.rs
//! Bounded prompt construction for one candidate.

use crate::ingest::types::Candidate;
use crate::profile::InterestProfile;

pub const MAX_ABSTRACT_CHARS: usize = 2_000;
pub const MAX_LIBRARY_ABSTRACT_CHARS: usize = 300;
pub const MAX_FREE_TEXT_CHARS: usize = 2_000;

const SYSTEM_PROMPT: &str = "You are an academic research assistant. \
Evaluate how relevant a newly published paper is to one researcher's interests. \
Answer with JSON only.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompt {
    pub system: String,
    pub user: String,
}

/// Cut to `max` chars on a char boundary, marking the cut with "...".
pub(crate) fn truncate_chars(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let mut out: String = s.chars().take(max).collect();
    out.push_str("...");
    out
}

/// Numbered titles of the sampled library, abstracts shortened, plus a
/// trailer for entries left out by sampling.
pub fn library_summary(profile: &InterestProfile) -> String {
    let topics = profile.library_topics();
    if topics.is_empty() {
        return String::new();
    }
    let mut out = String::from("RESEARCH BACKGROUND (papers from the reader's library):\n");
    for (i, t) in topics.iter().enumerate() {
        out.push_str(&format!("{}. {}", i + 1, t.title));
        if let Some(y) = t.year {
            out.push_str(&format!(" ({y})"));
        }
        out.push('\n');
        if let Some(abs) = t.abstract_text.as_deref().filter(|a| !a.trim().is_empty()) {
            out.push_str("   ");
            out.push_str(&truncate_chars(abs.trim(), MAX_LIBRARY_ABSTRACT_CHARS));
            out.push('\n');
        }
    }
    let rest = profile.library_total().saturating_sub(topics.len());
    if rest > 0 {
        out.push_str(&format!("... and {rest} more papers\n"));
    }
    out
}

pub fn build_prompt(candidate: &Candidate, profile: &InterestProfile) -> Prompt {
    let mut user = String::with_capacity(4_096);
    user.push_str(
        "Given the following research background and interests, evaluate the relevance of this new arXiv paper.\n\n",
    );

    let background = library_summary(profile);
    if !background.is_empty() {
        user.push_str(&background);
        user.push('\n');
    }

    user.push_str("CURRENT SPECIFIC INTERESTS:\n");
    if profile.free_text().is_empty() {
        user.push_str("(none given, judge against the research background)\n\n");
    } else {
        user.push_str(&truncate_chars(profile.free_text(), MAX_FREE_TEXT_CHARS));
        user.push_str("\n\n");
    }

    user.push_str("NEW PAPER TO EVALUATE:\n");
    user.push_str(&format!("Title: {}\n", candidate.title));
    let cats: Vec<&str> = candidate.categories.iter().map(String::as_str).collect();
    if !cats.is_empty() {
        user.push_str(&format!("Categories: {}\n", cats.join(", ")));
    }
    user.push_str(&format!(
        "Abstract: {}\n\n",
        truncate_chars(&candidate.abstract_text, MAX_ABSTRACT_CHARS)
    ));

    user.push_str(
        "Rate the relevance of this paper on a scale of 0-10:\n\
         - 0-3: Not relevant\n\
         - 4-6: Somewhat relevant\n\
         - 7-8: Relevant\n\
         - 9-10: Highly relevant\n\n\
         Respond with a single JSON object and nothing else:\n\
         {\"score\": <number between 0 and 10>, \"rationale\": \"<one sentence>\"}",
    );

    Prompt {
        system: SYSTEM_PROMPT.to_string(),
        user,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::types::CandidateLinks;
    use crate::profile::TopicSignal;
    use chrono::Utc;
    use std::collections::BTreeSet;

    fn candidate(abs: &str) -> Candidate {
        Candidate {
            id: "2410.00001".into(),
            title: "Flat bands in twisted trilayers".into(),
            abstract_text: abs.into(),
            authors: vec!["A. Author".into()],
            primary_category: Some("cond-mat.str-el".into()),
            categories: BTreeSet::from(["cond-mat.str-el".to_string(), "cond-mat.supr-con".to_string()]),
            published_at: Utc::now(),
            links: CandidateLinks {
                abstract_url: "https://arxiv.org/abs/2410.00001".into(),
                pdf_url: None,
            },
        }
    }

    fn topic(title: &str, year: i32) -> TopicSignal {
        TopicSignal {
            title: title.into(),
            abstract_text: Some("x".repeat(1_000)),
            tags: vec![],
            year: Some(year),
        }
    }

    #[test]
    fn prompt_is_bounded() {
        let p = build_prompt(&candidate(&"a".repeat(50_000)), &InterestProfile::new("y".repeat(9_000), vec![], 20));
        assert!(p.user.chars().count() < 5_000);
        assert!(p.user.contains("cond-mat.str-el, cond-mat.supr-con"));
        assert!(p.user.contains("\"score\""));
    }

    #[test]
    fn summary_mentions_dropped_entries() {
        let topics = (0..5).map(|i| topic(&format!("Paper {i}"), 2020 + i)).collect();
        let profile = InterestProfile::new("", topics, 2);
        let s = library_summary(&profile);
        assert!(s.contains("1. Paper 4 (2024)"));
        assert!(s.contains("2. Paper 3 (2023)"));
        assert!(s.ends_with("... and 3 more papers\n"));
        let abs_line = s.lines().nth(2).unwrap();
        assert_eq!(abs_line.trim().chars().count(), MAX_LIBRARY_ABSTRACT_CHARS + 3);
    }

    #[test]
    fn empty_library_has_no_background() {
        let p = build_prompt(&candidate("abs"), &InterestProfile::new("kagome metals", vec![], 20));
        assert!(!p.user.contains("RESEARCH BACKGROUND"));
        assert!(p.user.contains("kagome metals"));
    }
}
