// src/ingest/mod.rs
pub mod providers;
pub mod types;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use metrics::{counter, describe_counter, describe_histogram};
use once_cell::sync::OnceCell;
use std::collections::HashSet;

use crate::ingest::types::{Candidate, FetchError, PreprintSource, SourceQuery};
use crate::retry::RetryPolicy;

/// One-time metrics registration (so series show up in the exported file).
fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("digest_fetch_entries_total", "Entries parsed from the preprint feed.");
        describe_counter!(
            "digest_fetch_dedup_total",
            "Candidates removed because another category already returned them."
        );
        describe_counter!("digest_fetch_errors_total", "Failed preprint source queries.");
        describe_histogram!("digest_fetch_parse_ms", "Feed parse time in milliseconds.");
    });
}

/// Normalize feed text: decode entities, fold typographic quotes, collapse whitespace.
pub fn normalize_text(s: &str) -> String {
    let decoded = html_escape::decode_html_entities(s).to_string();

    let folded = decoded
        .replace(['\u{201C}', '\u{201D}', '\u{00AB}', '\u{00BB}'], "\"")
        .replace(['\u{2018}', '\u{2019}'], "'");

    let mut out = folded.split_whitespace().collect::<Vec<_>>().join(" ");

    // Length cap: abstracts on arXiv stay well under this.
    if out.chars().count() > 5_000 {
        out = out.chars().take(5_000).collect();
    }
    out
}

/// Keep the first occurrence of every id, preserving order.
/// Returns (kept, removed_count).
pub fn dedup_by_id(candidates: Vec<Candidate>) -> (Vec<Candidate>, usize) {
    let mut seen: HashSet<String> = HashSet::new();
    let mut keep = Vec::with_capacity(candidates.len());
    let mut removed = 0usize;
    for c in candidates {
        if seen.insert(c.id.clone()) {
            keep.push(c);
        } else {
            removed += 1;
        }
    }
    (keep, removed)
}

/// Newest first (id ascending on equal timestamps), then cut to `max_results`.
pub fn truncate_most_recent(mut candidates: Vec<Candidate>, max_results: usize) -> Vec<Candidate> {
    candidates.sort_by(|a, b| {
        b.published_at
            .cmp(&a.published_at)
            .then_with(|| a.id.cmp(&b.id))
    });
    candidates.truncate(max_results);
    candidates
}

#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub categories: Vec<String>,
    pub max_days_back: u32,
    pub max_results: usize,
    pub now: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchStatus {
    Complete,
    /// Some categories failed; the rest were used.
    Partial { failed: Vec<String> },
    /// Nothing could be fetched. The run continues with zero candidates.
    Failed { reason: String },
}

#[derive(Debug, Clone)]
pub struct Fetched {
    pub candidates: Vec<Candidate>,
    pub status: FetchStatus,
}

impl Fetched {
    pub fn is_failed(&self) -> bool {
        matches!(self.status, FetchStatus::Failed { .. })
    }
}

/// Query every category (each retried on its own), merge, dedupe, cut.
/// Never returns an error: exhaustion degrades to `FetchStatus::Failed`.
pub async fn fetch(source: &dyn PreprintSource, req: &FetchRequest, retry: RetryPolicy) -> Fetched {
    ensure_metrics_described();

    let since = req.now - ChronoDuration::days(i64::from(req.max_days_back));
    let mut raw = Vec::new();
    let mut failed = Vec::new();
    let mut last_error = None;

    for category in &req.categories {
        let q = SourceQuery {
            categories: vec![category.clone()],
            since,
            until: req.now,
            limit: req.max_results,
        };
        match query_with_retry(source, &q, retry).await {
            Ok(mut v) => {
                tracing::debug!(category = %category, count = v.len(), "category fetched");
                raw.append(&mut v);
            }
            Err(e) => {
                tracing::warn!(error = %e, provider = source.name(), category = %category, "category fetch failed");
                counter!("digest_fetch_errors_total").increment(1);
                failed.push(category.clone());
                last_error = Some(e);
            }
        }
    }

    let (unique, dup) = dedup_by_id(raw);
    counter!("digest_fetch_dedup_total").increment(dup as u64);
    let candidates = truncate_most_recent(unique, req.max_results);

    let status = if failed.is_empty() {
        FetchStatus::Complete
    } else if failed.len() == req.categories.len() {
        FetchStatus::Failed {
            reason: last_error
                .map(|e| e.to_string())
                .unwrap_or_else(|| "no category could be fetched".to_string()),
        }
    } else {
        FetchStatus::Partial { failed }
    };

    tracing::info!(
        provider = source.name(),
        kept = candidates.len(),
        dedup = dup,
        status = ?status,
        "candidates fetched"
    );
    Fetched { candidates, status }
}

async fn query_with_retry(
    source: &dyn PreprintSource,
    q: &SourceQuery,
    retry: RetryPolicy,
) -> Result<Vec<Candidate>, FetchError> {
    let mut attempt: u32 = 0;
    loop {
        attempt += 1;
        match source.query(q).await {
            Ok(v) => return Ok(v),
            Err(e) if e.is_transient() && retry.can_retry(attempt) => {
                tracing::warn!(attempt, max_attempts = retry.max_attempts, error = %e, "fetch failed, retrying");
                retry.backoff(attempt, None).await;
            }
            Err(e) => return Err(e),
        }
    }
}
