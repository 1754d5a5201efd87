// src/score/parse.rs
//! Defensive parsing of model output into (score, rationale).
//!
//! Structured JSON is tried first; `SCORE:` / `REASON:` lines and loose
//! `"score": n` fields (truncated or malformed JSON) are the fallback.
//! Out-of-range values are rejected, never clamped.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};
use thiserror::Error;

const SCORE_KEYS: &[&str] = &["score", "relevance", "relevance_score", "rating"];
const RATIONALE_KEYS: &[&str] = &["rationale", "reason", "explanation", "justification"];

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ParseFailure {
    #[error("no score found in model output")]
    NoScore,
    #[error("score {0} outside [0, 10]")]
    OutOfRange(f64),
    #[error("score field is not a number")]
    NotANumber,
    #[error("score present but rationale missing")]
    MissingRationale,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Parsed {
    pub score: f32,
    pub rationale: String,
}

static RE_NUMBER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[\s*]*([+-]?\d+(?:\.\d+)?)").expect("number regex"));
static RE_SCORE_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?im)^[\s*#>-]*(?:relevance\s+)?score[\s*]*[:=][ \t]*(.*)$").expect("score regex")
});
static RE_SCORE_FIELD: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)"(?:score|relevance|relevance_score|rating)"\s*:\s*"?\s*([+-]?\d+(?:\.\d+)?)"#)
        .expect("score field regex")
});
static RE_REASON_FIELD: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)"(?:rationale|reason|explanation|justification)"\s*:\s*"((?:[^"\\]|\\.)*)"#)
        .expect("reason field regex")
});
static RE_REASON_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?im)^[\s*#>-]*(?:reason|rationale|explanation)[\s*]*[:=][ \t]*(.+)$")
        .expect("reason regex")
});

pub fn parse_response(text: &str) -> Result<Parsed, ParseFailure> {
    match parse_json(text) {
        Some(res) => res,
        None => parse_lines(text),
    }
}

/// `None` when no complete JSON object with a score-like key starts at the
/// first `{`. Trailing text after the object is ignored.
fn parse_json(text: &str) -> Option<Result<Parsed, ParseFailure>> {
    let start = text.find('{')?;
    let first = serde_json::Deserializer::from_str(&text[start..])
        .into_iter::<Value>()
        .next()?
        .ok()?;
    let Value::Object(obj) = first else {
        return None;
    };

    let raw = SCORE_KEYS.iter().find_map(|k| lookup(&obj, k))?;
    let score = match raw {
        Value::Number(n) => n.as_f64().ok_or(ParseFailure::NotANumber),
        Value::String(s) => leading_number(s),
        _ => Err(ParseFailure::NotANumber),
    };
    let rationale = RATIONALE_KEYS
        .iter()
        .find_map(|k| lookup(&obj, k))
        .and_then(Value::as_str)
        .map(str::to_string);

    Some(score.and_then(|s| finish(s, rationale)))
}

/// Case-insensitive key lookup.
fn lookup<'a>(obj: &'a Map<String, Value>, key: &str) -> Option<&'a Value> {
    obj.get(key).or_else(|| {
        obj.iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v)
    })
}

fn parse_lines(text: &str) -> Result<Parsed, ParseFailure> {
    if let Some(caps) = RE_SCORE_LINE.captures(text) {
        let score = leading_number(caps.get(1).map_or("", |m| m.as_str()))?;
        let rationale = RE_REASON_LINE
            .captures(text)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_string());
        return finish(score, rationale);
    }
    parse_fields(text)
}

/// `"score": 8` style fields in JSON that did not parse as a whole.
fn parse_fields(text: &str) -> Result<Parsed, ParseFailure> {
    let caps = RE_SCORE_FIELD.captures(text).ok_or(ParseFailure::NoScore)?;
    let score = leading_number(caps.get(1).map_or("", |m| m.as_str()))?;
    let rationale = RE_REASON_FIELD
        .captures(text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().replace("\\\"", "\"").replace("\\n", " "));
    finish(score, rationale)
}

fn leading_number(s: &str) -> Result<f64, ParseFailure> {
    RE_NUMBER
        .captures(s)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse::<f64>().ok())
        .ok_or(ParseFailure::NotANumber)
}

fn finish(score: f64, rationale: Option<String>) -> Result<Parsed, ParseFailure> {
    if !score.is_finite() || !(0.0..=10.0).contains(&score) {
        return Err(ParseFailure::OutOfRange(score));
    }
    let rationale = rationale
        .map(|r| r.trim_matches(|c: char| c == '*' || c.is_whitespace()).to_string())
        .filter(|r| !r.is_empty())
        .ok_or(ParseFailure::MissingRationale)?;
    Ok(Parsed {
        score: score as f32,
        rationale,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_json() {
        let p = parse_response(r#"{"score": 8.5, "rationale": "On topic."}"#).unwrap();
        assert_eq!(p.score, 8.5);
        assert_eq!(p.rationale, "On topic.");
    }

    #[test]
    fn fenced_json_with_alias_keys() {
        let text = "Sure!\n```json\n{\"Relevance\": \"7\", \"reason\": \"Close match.\"}\n```";
        let p = parse_response(text).unwrap();
        assert_eq!(p.score, 7.0);
        assert_eq!(p.rationale, "Close match.");
    }

    #[test]
    fn line_format_fallback() {
        let p = parse_response("SCORE: 9/10\nREASON: Exactly the reader's topic.").unwrap();
        assert_eq!(p.score, 9.0);
        assert_eq!(p.rationale, "Exactly the reader's topic.");
        let p = parse_response("**Score:** 4\n**Reason:** Tangential.").unwrap();
        assert_eq!(p.score, 4.0);
    }

    #[test]
    fn json_followed_by_prose_with_braces() {
        let text = "{\"score\": 8, \"rationale\": \"Directly on topic.\"}\nNote: see {ref}.";
        let p = parse_response(text).unwrap();
        assert_eq!(p.score, 8.0);
        assert_eq!(p.rationale, "Directly on topic.");
    }

    #[test]
    fn truncated_json_keeps_explicit_score() {
        let text = r#"{"score": 8, "rationale": "Directly on topic because the"#;
        let p = parse_response(text).unwrap();
        assert_eq!(p.score, 8.0);
        assert_eq!(p.rationale, "Directly on topic because the");

        let text = r#"{"relevance": "6.5", "reason": "Shares the \"kagome\" lattice"#;
        let p = parse_response(text).unwrap();
        assert_eq!(p.score, 6.5);
        assert_eq!(p.rationale, "Shares the \"kagome\" lattice");

        assert_eq!(
            parse_response(r#"{"score": 12, "rationale": "cut"#),
            Err(ParseFailure::OutOfRange(12.0))
        );
        assert_eq!(
            parse_response(r#"{"score": 7, "ration"#),
            Err(ParseFailure::MissingRationale)
        );
    }

    #[test]
    fn boundaries_are_inclusive() {
        assert_eq!(parse_response(r#"{"score":0,"rationale":"no"}"#).unwrap().score, 0.0);
        assert_eq!(parse_response(r#"{"score":10,"rationale":"yes"}"#).unwrap().score, 10.0);
    }

    #[test]
    fn out_of_range_is_not_clamped() {
        assert_eq!(
            parse_response(r#"{"score": 11, "rationale": "very"}"#),
            Err(ParseFailure::OutOfRange(11.0))
        );
        assert_eq!(
            parse_response("SCORE: -1\nREASON: nope"),
            Err(ParseFailure::OutOfRange(-1.0))
        );
    }

    #[test]
    fn missing_pieces() {
        assert_eq!(parse_response("I think it's quite relevant."), Err(ParseFailure::NoScore));
        assert_eq!(
            parse_response(r#"{"score": "high", "rationale": "x"}"#),
            Err(ParseFailure::NotANumber)
        );
        assert_eq!(
            parse_response(r#"{"score": 6}"#),
            Err(ParseFailure::MissingRationale)
        );
        assert_eq!(parse_response(""), Err(ParseFailure::NoScore));
    }
}
