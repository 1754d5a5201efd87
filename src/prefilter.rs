// src/prefilter.rs
//! Keyword gate in front of the paid scoring step.
//!
//! OR semantics over title and abstract, case-insensitive substring match. This
//! only saves model calls; relevance is judged later by the scorer.

use crate::ingest::types::Candidate;

/// Returns the candidates that mention at least one keyword.
/// With no (non-blank) keywords the input passes through untouched.
pub fn filter(candidates: Vec<Candidate>, keywords: &[String]) -> Vec<Candidate> {
    let needles: Vec<String> = keywords
        .iter()
        .map(|k| k.trim().to_lowercase())
        .filter(|k| !k.is_empty())
        .collect();
    if needles.is_empty() {
        return candidates;
    }

    let before = candidates.len();
    let kept: Vec<Candidate> = candidates
        .into_iter()
        .filter(|c| matches_any(c, &needles))
        .collect();
    tracing::info!(before, kept = kept.len(), keywords = needles.len(), "keyword pre-filter applied");
    kept
}

/// Title and abstract are searched separately so a phrase never spans the two.
fn matches_any(c: &Candidate, needles: &[String]) -> bool {
    let title = c.title.to_lowercase();
    let abstract_text = c.abstract_text.to_lowercase();
    needles
        .iter()
        .any(|n| title.contains(n.as_str()) || abstract_text.contains(n.as_str()))
}
