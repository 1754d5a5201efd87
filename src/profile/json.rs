// src/profile/json.rs
//! Zotero JSON and CSL-JSON library exports.
//!
//! Accepts a top-level array or an object with an `items` array. Each entry is
//! read field by field from a `serde_json::Value` so one odd entry never fails
//! the whole file.

use anyhow::{anyhow, Result};
use serde_json::Value;

use super::TopicSignal;

pub fn parse_json(content: &str) -> Result<Vec<TopicSignal>> {
    let root: Value = serde_json::from_str(content)?;
    let items = match root {
        Value::Array(items) => items,
        Value::Object(mut map) => match map.remove("items") {
            Some(Value::Array(items)) => items,
            _ => return Err(anyhow!("json library has no `items` array")),
        },
        _ => return Err(anyhow!("json library must be an array or an object")),
    };

    let total = items.len();
    let out: Vec<TopicSignal> = items.iter().filter_map(entry_to_signal).collect();
    if out.len() < total {
        tracing::debug!(
            skipped = total - out.len(),
            "json library entries without title/abstract skipped"
        );
    }
    Ok(out)
}

/// Zotero item types that are not papers.
const NON_PAPER_TYPES: &[&str] = &["attachment", "note", "annotation"];

fn entry_to_signal(item: &Value) -> Option<TopicSignal> {
    let obj = item.as_object()?;
    if let Some(kind) = obj.get("itemType").and_then(Value::as_str) {
        if NON_PAPER_TYPES.iter().any(|t| kind.eq_ignore_ascii_case(t)) {
            return None;
        }
    }

    let title = str_field(item, &["title"]).unwrap_or_default();
    let abstract_text = str_field(item, &["abstractNote", "abstract"]);
    if title.is_empty() && abstract_text.is_none() {
        return None;
    }

    let mut tags: Vec<String> = match obj.get("tags") {
        Some(Value::Array(arr)) => arr
            .iter()
            .filter_map(|t| match t {
                Value::String(s) => Some(s.trim().to_string()),
                Value::Object(o) => o.get("tag").and_then(Value::as_str).map(|s| s.trim().to_string()),
                _ => None,
            })
            .filter(|t| !t.is_empty())
            .collect(),
        _ => Vec::new(),
    };
    if tags.is_empty() {
        if let Some(kw) = str_field(item, &["keyword", "keywords"]) {
            tags = kw
                .split([',', ';'])
                .map(|t| t.trim().to_string())
                .filter(|t| !t.is_empty())
                .collect();
        }
    }

    Some(TopicSignal {
        title,
        abstract_text,
        tags,
        year: year_of(item),
    })
}

fn str_field(item: &Value, keys: &[&str]) -> Option<String> {
    keys.iter()
        .filter_map(|k| item.get(*k).and_then(Value::as_str))
        .map(|s| s.split_whitespace().collect::<Vec<_>>().join(" "))
        .find(|s| !s.is_empty())
}

/// Zotero `date` ("2021-03-04", "March 2021"), `year`, or CSL `issued.date-parts`.
fn year_of(item: &Value) -> Option<i32> {
    if let Some(parts) = item
        .pointer("/issued/date-parts/0/0")
        .and_then(|v| v.as_i64().or_else(|| v.as_str().and_then(|s| s.parse().ok())))
    {
        return i32::try_from(parts).ok();
    }
    for key in ["year", "date"] {
        match item.get(key) {
            Some(Value::Number(n)) => return n.as_i64().and_then(|y| i32::try_from(y).ok()),
            Some(Value::String(s)) => {
                if let Some(y) = first_year(s) {
                    return Some(y);
                }
            }
            _ => {}
        }
    }
    None
}

fn first_year(s: &str) -> Option<i32> {
    s.as_bytes()
        .windows(4)
        .position(|w| w.iter().all(u8::is_ascii_digit))
        .and_then(|i| s[i..i + 4].parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zotero_items_with_tag_objects() {
        let json = r#"{"items": [
            {"title": "Kagome  metals", "abstractNote": "CsV3Sb5", "date": "2022-05-01",
             "tags": [{"tag": "kagome"}, {"tag": " CDW "}]},
            {"itemType": "attachment", "title": "Full Text PDF"},
            {"itemType": "note", "title": "Reading notes", "abstractNote": "check Fig. 3"},
            "garbage"
        ]}"#;
        let out = parse_json(json).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].title, "Kagome metals");
        assert_eq!(out[0].tags, vec!["kagome", "CDW"]);
        assert_eq!(out[0].year, Some(2022));
    }

    #[test]
    fn csl_json_array() {
        let json = r#"[{"title": "Nematicity", "abstract": "Iron pnictides",
                        "keyword": "nematic; iron", "issued": {"date-parts": [[2019, 7]]}}]"#;
        let out = parse_json(json).unwrap();
        assert_eq!(out[0].year, Some(2019));
        assert_eq!(out[0].tags, vec!["nematic", "iron"]);
        assert_eq!(out[0].abstract_text.as_deref(), Some("Iron pnictides"));
    }

    #[test]
    fn scalar_root_is_rejected() {
        assert!(parse_json("42").is_err());
        assert!(parse_json(r#"{"data": []}"#).is_err());
    }
}
