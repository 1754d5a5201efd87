// src/digest/mod.rs
//! Threshold policy and ordering of the final report.

pub mod render;

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::HashMap;

use crate::ingest::types::Candidate;
use crate::score::{ScoreResult, ScoreStatus};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DigestEntry {
    pub candidate: Candidate,
    pub score: f32,
    pub rationale: String,
}

/// Per-run counters carried alongside the entries.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunStats {
    pub fetched: usize,
    pub prefiltered: usize,
    pub scored: usize,
    pub parse_failed: usize,
    pub model_error: usize,
    pub skipped: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Digest {
    pub generated_at: DateTime<Utc>,
    pub threshold: f32,
    pub entries: Vec<DigestEntry>,
    pub stats: RunStats,
}

impl Digest {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

pub fn aggregate(scored: Vec<(Candidate, ScoreResult)>, threshold: f32) -> Digest {
    aggregate_at(scored, threshold, Utc::now())
}

/// Keep `Scored` results at or above `threshold`, one entry per id (highest
/// score wins), ordered by score desc, then published desc, then id asc.
pub fn aggregate_at(
    scored: Vec<(Candidate, ScoreResult)>,
    threshold: f32,
    generated_at: DateTime<Utc>,
) -> Digest {
    let mut stats = RunStats::default();
    let mut by_id: HashMap<String, DigestEntry> = HashMap::new();

    for (candidate, result) in scored {
        match result.status() {
            ScoreStatus::Scored => stats.scored += 1,
            ScoreStatus::ParseFailed => stats.parse_failed += 1,
            ScoreStatus::ModelError => stats.model_error += 1,
            ScoreStatus::Skipped => stats.skipped += 1,
        }
        let (Some(score), Some(rationale)) = (result.score(), result.rationale()) else {
            continue;
        };
        if !result.is_scored() || score < threshold {
            continue;
        }
        let entry = DigestEntry {
            candidate,
            score,
            rationale: rationale.to_string(),
        };
        let keep_existing = by_id
            .get(&entry.candidate.id)
            .is_some_and(|existing| existing.score >= entry.score);
        if !keep_existing {
            by_id.insert(entry.candidate.id.clone(), entry);
        }
    }

    let mut entries: Vec<DigestEntry> = by_id.into_values().collect();
    entries.sort_by(digest_order);

    tracing::info!(
        entries = entries.len(),
        threshold,
        scored = stats.scored,
        "digest aggregated"
    );
    Digest {
        generated_at,
        threshold,
        entries,
        stats,
    }
}

fn digest_order(a: &DigestEntry, b: &DigestEntry) -> Ordering {
    b.score
        .total_cmp(&a.score)
        .then_with(|| b.candidate.published_at.cmp(&a.candidate.published_at))
        .then_with(|| a.candidate.id.cmp(&b.candidate.id))
}
