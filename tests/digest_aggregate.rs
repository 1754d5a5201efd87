use arxiv_digest::digest::render::{render_json, render_text, render_webhook_text, subject};
use arxiv_digest::digest::{aggregate_at, Digest};
use arxiv_digest::ingest::types::{Candidate, CandidateLinks};
use arxiv_digest::score::parse::ParseFailure;
use arxiv_digest::score::ai_adapter::ModelError;
use arxiv_digest::score::ScoreResult;
use chrono::{DateTime, TimeZone, Utc};
use std::collections::BTreeSet;

fn at(day: u32, hour: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 10, day, hour, 0, 0).unwrap()
}

fn cand(id: &str, published: DateTime<Utc>) -> Candidate {
    Candidate {
        id: id.into(),
        title: format!("Title of {id}"),
        abstract_text: "An abstract long enough to be wrapped across more than one line of the plain text email body.".into(),
        authors: vec!["Ada Lovelace".into(), "Niels Bohr".into()],
        primary_category: Some("cond-mat.supr-con".into()),
        categories: BTreeSet::from(["cond-mat.supr-con".to_string()]),
        published_at: published,
        links: CandidateLinks {
            abstract_url: format!("http://arxiv.org/abs/{id}"),
            pdf_url: Some(format!("http://arxiv.org/pdf/{id}")),
        },
    }
}

fn scored(id: &str, score: f32) -> ScoreResult {
    ScoreResult::scored(id, score, "Matches the reader's interests.").unwrap()
}

fn entry_ids(d: &Digest) -> Vec<&str> {
    d.entries.iter().map(|e| e.candidate.id.as_str()).collect()
}

#[test]
fn threshold_filters_and_orders_by_score() {
    let input = vec![
        (cand("a", at(17, 9)), scored("a", 8.5)),
        (cand("b", at(17, 9)), scored("b", 6.0)),
        (cand("c", at(17, 9)), scored("c", 9.0)),
    ];
    let d = aggregate_at(input, 7.0, at(18, 6));
    let scores: Vec<f32> = d.entries.iter().map(|e| e.score).collect();
    assert_eq!(scores, vec![9.0, 8.5]);
    assert_eq!(entry_ids(&d), vec!["c", "a"]);
}

#[test]
fn threshold_is_inclusive() {
    let d = aggregate_at(vec![(cand("a", at(17, 9)), scored("a", 7.0))], 7.0, at(18, 6));
    assert_eq!(d.len(), 1);
}

#[test]
fn just_below_threshold_is_excluded() {
    // Largest f32 below 7.0.
    let below = f32::from_bits(7.0f32.to_bits() - 1);
    assert!(below < 7.0);
    let input = vec![
        (cand("a", at(17, 9)), scored("a", 6.99)),
        (cand("b", at(17, 9)), scored("b", below)),
        (cand("c", at(17, 9)), scored("c", 7.0)),
    ];
    let d = aggregate_at(input, 7.0, at(18, 6));
    assert_eq!(entry_ids(&d), vec!["c"]);
    assert_eq!(d.stats.scored, 3);
}

#[test]
fn failed_results_never_reach_the_digest() {
    let input = vec![
        (cand("a", at(17, 9)), ScoreResult::parse_failed("a", &ParseFailure::OutOfRange(11.0))),
        (cand("b", at(17, 9)), ScoreResult::model_error("b", &ModelError::Timeout)),
        (cand("c", at(17, 9)), ScoreResult::skipped("c", "scoring budget exhausted")),
        (cand("d", at(17, 9)), scored("d", 7.5)),
    ];
    let d = aggregate_at(input, 0.0, at(18, 6));
    assert_eq!(entry_ids(&d), vec!["d"]);
    assert_eq!(d.stats.parse_failed, 1);
    assert_eq!(d.stats.model_error, 1);
    assert_eq!(d.stats.skipped, 1);
    assert_eq!(d.stats.scored, 1);
}

#[test]
fn order_does_not_depend_on_input_order() {
    let make = || {
        vec![
            (cand("x", at(16, 9)), scored("x", 8.0)),
            (cand("y", at(17, 9)), scored("y", 8.0)),
            (cand("z", at(17, 9)), scored("z", 8.0)),
            (cand("w", at(15, 9)), scored("w", 9.5)),
        ]
    };
    let forward = aggregate_at(make(), 7.0, at(18, 6));
    let mut reversed_input = make();
    reversed_input.reverse();
    let reversed = aggregate_at(reversed_input, 7.0, at(18, 6));
    assert_eq!(forward, reversed);
    assert_eq!(entry_ids(&forward), vec!["w", "y", "z", "x"]);
}

#[test]
fn nothing_relevant_is_an_empty_digest() {
    let d = aggregate_at(vec![(cand("a", at(17, 9)), scored("a", 2.0))], 7.0, at(18, 6));
    assert!(d.is_empty());
    assert_eq!(subject(&d), "ArXiv Digest: 0 relevant papers - 2026-10-18");
    assert!(render_text(&d).contains("No papers matched your interests"));
    assert!(render_webhook_text(&d, 5).contains("No papers matched your interests today."));
}

#[test]
fn renderings_carry_title_authors_score_rationale_links() {
    let input = vec![
        (cand("2610.10001", at(17, 9)), scored("2610.10001", 9.0)),
        (cand("2610.10002", at(17, 8)), scored("2610.10002", 8.0)),
    ];
    let d = aggregate_at(input, 7.0, at(18, 6));

    assert_eq!(subject(&d), "ArXiv Digest: 2 relevant papers - 2026-10-18");
    let text = render_text(&d);
    assert!(text.contains("1. Title of 2610.10001"));
    assert!(text.contains("Authors: Ada Lovelace, Niels Bohr"));
    assert!(text.contains("Relevance: 9.0/10 - Matches the reader's interests."));
    assert!(text.contains("PDF: http://arxiv.org/pdf/2610.10002"));
    assert!(text.lines().all(|l| l.chars().count() <= 80 || l.contains("Relevance:")));

    let hook = render_webhook_text(&d, 1);
    assert!(hook.contains("Top 1 of 2 relevant papers:"));
    assert!(hook.contains("Title of 2610.10001 (9.0/10)"));
    assert!(!hook.contains("2610.10002"));

    let json: serde_json::Value = serde_json::from_str(&render_json(&d).unwrap()).unwrap();
    assert_eq!(json["entries"][0]["candidate"]["id"], "2610.10001");
    assert_eq!(json["entries"][1]["score"], 8.0);
    assert_eq!(json["threshold"], 7.0);
}
