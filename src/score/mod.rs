// src/score/mod.rs
//! Relevance scoring: one bounded prompt per candidate, defensive parsing,
//! bounded retries for transient model failures, and a per-run call budget.

pub mod ai_adapter;
pub mod parse;
pub mod prompt;

use futures::stream::{self, StreamExt};
use metrics::{counter, describe_counter, describe_histogram, histogram};
use once_cell::sync::OnceCell;
use serde::Serialize;
use std::time::{Duration, Instant};

use crate::config::ScoringConfig;
use crate::ingest::types::Candidate;
use crate::profile::InterestProfile;
use crate::retry::RetryPolicy;
use ai_adapter::{sanitize_rationale, DynScoringModel, ModelError};
use parse::{parse_response, ParseFailure, Parsed};
use prompt::build_prompt;

fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("digest_score_calls_total", "Scoring model calls, retries included.");
        describe_counter!("digest_score_results_total", "Score results by status.");
        describe_histogram!("digest_score_latency_ms", "Scoring model call latency in milliseconds.");
    });
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoreStatus {
    Scored,
    ParseFailed,
    ModelError,
    Skipped,
}

impl ScoreStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScoreStatus::Scored => "scored",
            ScoreStatus::ParseFailed => "parse_failed",
            ScoreStatus::ModelError => "model_error",
            ScoreStatus::Skipped => "skipped",
        }
    }
}

/// Outcome for one candidate.
///
/// `status == Scored` exactly when both `score` (within [0, 10]) and
/// `rationale` are present; the constructors are the only way to build one.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoreResult {
    candidate_id: String,
    score: Option<f32>,
    rationale: Option<String>,
    status: ScoreStatus,
    /// Why the candidate was not scored.
    #[serde(skip_serializing_if = "Option::is_none")]
    detail: Option<String>,
    attempts: u32,
}

impl ScoreResult {
    /// Validates range and rationale; a failure becomes the error to report.
    pub fn scored(
        candidate_id: impl Into<String>,
        score: f32,
        rationale: &str,
    ) -> Result<Self, ParseFailure> {
        if !score.is_finite() || !(0.0..=10.0).contains(&score) {
            return Err(ParseFailure::OutOfRange(f64::from(score)));
        }
        let rationale = sanitize_rationale(rationale);
        if rationale.is_empty() {
            return Err(ParseFailure::MissingRationale);
        }
        Ok(Self {
            candidate_id: candidate_id.into(),
            score: Some(score),
            rationale: Some(rationale),
            status: ScoreStatus::Scored,
            detail: None,
            attempts: 1,
        })
    }

    pub fn parse_failed(candidate_id: impl Into<String>, failure: &ParseFailure) -> Self {
        Self::unscored(candidate_id, ScoreStatus::ParseFailed, failure.to_string())
    }

    pub fn model_error(candidate_id: impl Into<String>, err: &ModelError) -> Self {
        Self::unscored(candidate_id, ScoreStatus::ModelError, err.to_string())
    }

    pub fn skipped(candidate_id: impl Into<String>, reason: impl Into<String>) -> Self {
        let mut r = Self::unscored(candidate_id, ScoreStatus::Skipped, reason.into());
        r.attempts = 0;
        r
    }

    fn unscored(candidate_id: impl Into<String>, status: ScoreStatus, detail: String) -> Self {
        Self {
            candidate_id: candidate_id.into(),
            score: None,
            rationale: None,
            status,
            detail: Some(detail),
            attempts: 1,
        }
    }

    fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts;
        self
    }

    fn from_parsed(candidate_id: &str, parsed: Parsed) -> Self {
        match Self::scored(candidate_id, parsed.score, &parsed.rationale) {
            Ok(r) => r,
            Err(f) => Self::parse_failed(candidate_id, &f),
        }
    }

    pub fn candidate_id(&self) -> &str {
        &self.candidate_id
    }
    pub fn score(&self) -> Option<f32> {
        self.score
    }
    pub fn rationale(&self) -> Option<&str> {
        self.rationale.as_deref()
    }
    pub fn status(&self) -> ScoreStatus {
        self.status
    }
    pub fn detail(&self) -> Option<&str> {
        self.detail.as_deref()
    }
    /// Model calls spent on this candidate.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }
    pub fn is_scored(&self) -> bool {
        self.status == ScoreStatus::Scored
    }
}

pub const DEFAULT_CONCURRENCY: usize = 4;

pub struct Scorer {
    model: DynScoringModel,
    retry: RetryPolicy,
    /// Candidates sent to the model per run; the rest are skipped.
    max_calls: Option<usize>,
    concurrency: usize,
}

impl Scorer {
    pub fn new(model: DynScoringModel, retry: RetryPolicy) -> Self {
        Self {
            model,
            retry,
            max_calls: None,
            concurrency: DEFAULT_CONCURRENCY,
        }
    }

    pub fn from_config(cfg: &ScoringConfig, model: DynScoringModel) -> Self {
        let retry = RetryPolicy::new(cfg.max_attempts, Duration::from_millis(cfg.retry_base_ms));
        Self::new(model, retry)
            .with_concurrency(cfg.max_concurrency)
            .with_max_calls(cfg.max_calls)
    }

    pub fn with_concurrency(mut self, n: usize) -> Self {
        self.concurrency = n.max(1);
        self
    }

    pub fn with_max_calls(mut self, max_calls: Option<usize>) -> Self {
        self.max_calls = max_calls;
        self
    }

    /// Score one candidate. Never fails: every outcome is a `ScoreResult`.
    pub async fn score(&self, candidate: &Candidate, profile: &InterestProfile) -> ScoreResult {
        ensure_metrics_described();
        let prompt = build_prompt(candidate, profile);
        let id = candidate.id.as_str();

        let mut attempt: u32 = 0;
        let result = loop {
            attempt += 1;
            counter!("digest_score_calls_total").increment(1);
            let t0 = Instant::now();
            let reply = self.model.complete(&prompt).await;
            histogram!("digest_score_latency_ms").record(t0.elapsed().as_secs_f64() * 1_000.0);

            match reply {
                Ok(text) => match parse_response(&text) {
                    Ok(parsed) => break ScoreResult::from_parsed(id, parsed),
                    Err(failure) => {
                        tracing::warn!(candidate = id, error = %failure, "model output not parsable");
                        break ScoreResult::parse_failed(id, &failure);
                    }
                },
                Err(e) if e.is_transient() && self.retry.can_retry(attempt) => {
                    tracing::warn!(
                        candidate = id,
                        attempt,
                        max_attempts = self.retry.max_attempts,
                        error = %e,
                        "scoring call failed, retrying"
                    );
                    self.retry.backoff(attempt, e.retry_hint()).await;
                }
                Err(e) => {
                    tracing::warn!(candidate = id, attempt, error = %e, "scoring call failed");
                    break ScoreResult::model_error(id, &e);
                }
            }
        };

        let result = result.with_attempts(attempt);
        counter!("digest_score_results_total", "status" => result.status().as_str()).increment(1);
        result
    }

    /// Score every candidate with bounded parallelism.
    ///
    /// Output keeps input order regardless of completion order. Candidates past
    /// the call budget are `Skipped` without contacting the model.
    pub async fn score_all(
        &self,
        candidates: Vec<Candidate>,
        profile: &InterestProfile,
    ) -> Vec<(Candidate, ScoreResult)> {
        ensure_metrics_described();
        let mut budgeted = candidates;
        let over_budget = match self.max_calls {
            Some(max) if budgeted.len() > max => budgeted.split_off(max),
            _ => Vec::new(),
        };
        if !over_budget.is_empty() {
            tracing::warn!(
                budget = self.max_calls.unwrap_or_default(),
                skipped = over_budget.len(),
                "scoring budget exhausted"
            );
        }

        let mut done: Vec<(usize, ScoreResult)> = stream::iter(budgeted.iter().enumerate())
            .map(|(i, c)| async move { (i, self.score(c, profile).await) })
            .buffer_unordered(self.concurrency)
            .collect()
            .await;
        // Completion order is arbitrary; restore input positions.
        done.sort_by_key(|(i, _)| *i);

        let mut out: Vec<(Candidate, ScoreResult)> = budgeted
            .into_iter()
            .zip(done.into_iter().map(|(_, r)| r))
            .collect();
        for c in over_budget {
            counter!("digest_score_results_total", "status" => ScoreStatus::Skipped.as_str())
                .increment(1);
            let r = ScoreResult::skipped(c.id.clone(), "scoring budget exhausted");
            out.push((c, r));
        }

        let scored = out.iter().filter(|(_, r)| r.is_scored()).count();
        tracing::info!(
            candidates = out.len(),
            scored,
            provider = self.model.provider_name(),
            "scoring finished"
        );
        out
    }
}
