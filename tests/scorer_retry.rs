use arxiv_digest::ingest::types::{Candidate, CandidateLinks};
use arxiv_digest::profile::InterestProfile;
use arxiv_digest::retry::RetryPolicy;
use arxiv_digest::score::ai_adapter::{MockModel, ModelError};
use arxiv_digest::score::{ScoreStatus, Scorer};
use chrono::{TimeZone, Utc};
use std::collections::BTreeSet;
use std::sync::Arc;

const GOOD: &str = r#"{"score": 8, "rationale": "Studies kagome superconductivity directly."}"#;

fn cand(n: u32) -> Candidate {
    Candidate {
        id: format!("2610.{n:05}"),
        title: format!("Paper {n}"),
        abstract_text: "Abstract text.".into(),
        authors: vec!["A. Author".into()],
        primary_category: Some("cond-mat.supr-con".into()),
        categories: BTreeSet::from(["cond-mat.supr-con".to_string()]),
        published_at: Utc.with_ymd_and_hms(2026, 10, 17, 12, 0, 0).unwrap(),
        links: CandidateLinks {
            abstract_url: format!("https://arxiv.org/abs/2610.{n:05}"),
            pdf_url: None,
        },
    }
}

fn profile() -> InterestProfile {
    InterestProfile::new("kagome superconductors", vec![], 20)
}

#[tokio::test]
async fn transient_errors_are_retried_until_success() {
    let model = Arc::new(MockModel::scripted(
        vec![
            Err(ModelError::Timeout),
            Err(ModelError::RateLimited { retry_after_secs: Some(30) }),
        ],
        GOOD,
    ));
    let scorer = Scorer::new(model.clone(), RetryPolicy::immediate(3));
    let r = scorer.score(&cand(1), &profile()).await;
    assert_eq!(r.status(), ScoreStatus::Scored);
    assert_eq!(r.score(), Some(8.0));
    assert_eq!(r.attempts(), 3);
    assert_eq!(model.call_count(), 3);
}

#[tokio::test]
async fn retry_budget_is_bounded() {
    let model = Arc::new(MockModel::scripted(
        vec![
            Err(ModelError::Unavailable("HTTP 503".into())),
            Err(ModelError::Unavailable("HTTP 503".into())),
            Err(ModelError::Unavailable("HTTP 503".into())),
        ],
        GOOD,
    ));
    let scorer = Scorer::new(model.clone(), RetryPolicy::immediate(3));
    let r = scorer.score(&cand(1), &profile()).await;
    assert_eq!(r.status(), ScoreStatus::ModelError);
    assert!(r.score().is_none());
    assert_eq!(model.call_count(), 3);
}

#[tokio::test]
async fn auth_failure_is_not_retried() {
    let model = Arc::new(MockModel::scripted(vec![Err(ModelError::Auth { status: 401 })], GOOD));
    let scorer = Scorer::new(model.clone(), RetryPolicy::immediate(5));
    let r = scorer.score(&cand(1), &profile()).await;
    assert_eq!(r.status(), ScoreStatus::ModelError);
    assert!(r.detail().unwrap().contains("401"));
    assert_eq!(model.call_count(), 1);
}

#[tokio::test]
async fn unparsable_output_is_not_retried_or_clamped() {
    let model = Arc::new(MockModel::fixed("SCORE: 12\nREASON: extremely relevant"));
    let scorer = Scorer::new(model.clone(), RetryPolicy::immediate(3));
    let r = scorer.score(&cand(1), &profile()).await;
    assert_eq!(r.status(), ScoreStatus::ParseFailed);
    assert!(r.score().is_none());
    assert_eq!(model.call_count(), 1);
}

#[tokio::test]
async fn budget_overflow_is_skipped_in_input_order() {
    let model = Arc::new(MockModel::fixed(GOOD));
    let scorer = Scorer::new(model.clone(), RetryPolicy::immediate(1)).with_max_calls(Some(2));
    let out = scorer.score_all((1..=5).map(cand).collect(), &profile()).await;

    let statuses: Vec<_> = out.iter().map(|(_, r)| r.status()).collect();
    assert_eq!(
        statuses,
        vec![
            ScoreStatus::Scored,
            ScoreStatus::Scored,
            ScoreStatus::Skipped,
            ScoreStatus::Skipped,
            ScoreStatus::Skipped
        ]
    );
    assert_eq!(model.call_count(), 2);
    assert!(out.iter().all(|(c, r)| c.id == r.candidate_id()));
}

#[tokio::test]
async fn parallel_results_stay_attached_to_their_candidate() {
    // Score n/2 for "Paper n" so every candidate has a distinct, checkable score.
    let model = Arc::new(MockModel::with_responder(|p| {
        let n: u32 = p
            .user
            .lines()
            .find_map(|l| l.strip_prefix("Title: Paper "))
            .and_then(|n| n.trim().parse().ok())
            .ok_or_else(|| ModelError::BadRequest("no title".into()))?;
        Ok(format!(r#"{{"score": {}, "rationale": "paper {n}"}}"#, f64::from(n) / 2.0))
    }));
    let scorer = Scorer::new(model.clone(), RetryPolicy::immediate(1)).with_concurrency(4);
    let out = scorer.score_all((1..=12).map(cand).collect(), &profile()).await;

    assert_eq!(out.len(), 12);
    for (i, (c, r)) in out.iter().enumerate() {
        let n = i as u32 + 1;
        assert_eq!(c.title, format!("Paper {n}"));
        assert_eq!(r.candidate_id(), c.id);
        assert_eq!(r.score(), Some(n as f32 / 2.0));
        assert_eq!(r.rationale(), Some(format!("paper {n}").as_str()));
    }
}
