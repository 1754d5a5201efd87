// src/profile/bibtex.rs
//! Tolerant BibTeX reader.
//!
//! Records start at `@type{` or `@type(`. Field values may be `{braced}` (nested
//! braces allowed), `"quoted"` or bare tokens. Malformed records are skipped.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;

use super::TopicSignal;

static RE_RECORD: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"@\s*([A-Za-z]+)\s*[{(]").expect("bibtex record regex"));
static RE_FIELD: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\A[\s,]*([A-Za-z][\w\-:]*)\s*=\s*").expect("bibtex field regex"));
static RE_YEAR: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b(1[89]\d\d|2\d\d\d)\b").expect("year regex"));

/// Parse every usable record into a `TopicSignal`, in file order.
pub fn parse_bibtex(content: &str) -> Vec<TopicSignal> {
    let starts: Vec<(usize, usize, String)> = RE_RECORD
        .captures_iter(content)
        .filter_map(|c| {
            let whole = c.get(0)?;
            Some((whole.start(), whole.end(), c[1].to_ascii_lowercase()))
        })
        .collect();

    let mut out = Vec::new();
    for (i, (_, body_start, kind)) in starts.iter().enumerate() {
        if matches!(kind.as_str(), "comment" | "string" | "preamble") {
            continue;
        }
        let body_end = starts
            .get(i + 1)
            .map(|(next_start, _, _)| *next_start)
            .unwrap_or(content.len());
        let body = &content[*body_start..body_end];
        let fields = parse_fields(body);
        if let Some(sig) = to_signal(&fields) {
            out.push(sig);
        }
    }
    out
}

/// Extract `name = value` pairs from one record body (citation key first).
fn parse_fields(body: &str) -> HashMap<String, String> {
    let mut fields = HashMap::new();

    // Skip the citation key up to the first comma.
    let mut rest = match body.find(',') {
        Some(pos) => &body[pos + 1..],
        None => return fields,
    };

    while let Some(caps) = RE_FIELD.captures(rest) {
        let name = caps[1].to_ascii_lowercase();
        let after_eq = &rest[caps.get(0).map(|m| m.end()).unwrap_or(0)..];
        let Some((value, consumed)) = read_value(after_eq) else {
            break;
        };
        fields.entry(name).or_insert_with(|| clean_value(&value));
        rest = &after_eq[consumed..];
    }
    fields
}

/// Read one value (possibly `#`-concatenated). Returns (raw value, bytes consumed).
fn read_value(s: &str) -> Option<(String, usize)> {
    let mut value = String::new();
    let mut pos = 0usize;
    loop {
        let trimmed = s[pos..].trim_start();
        pos = s.len() - trimmed.len();
        let first = trimmed.chars().next()?;
        let (piece, used) = match first {
            '{' => read_braced(trimmed)?,
            '"' => read_quoted(trimmed)?,
            _ => {
                let end = trimmed
                    .find(|c: char| c == ',' || c == '}' || c == ')' || c == '#' || c == '\n')
                    .unwrap_or(trimmed.len());
                (trimmed[..end].trim().to_string(), end)
            }
        };
        value.push_str(&piece);
        pos += used;

        let after = s[pos..].trim_start();
        if let Some(stripped) = after.strip_prefix('#') {
            pos = s.len() - stripped.len();
            continue;
        }
        return Some((value, pos));
    }
}

fn read_braced(s: &str) -> Option<(String, usize)> {
    let mut depth = 0i32;
    for (i, ch) in s.char_indices() {
        match ch {
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some((s[1..i].to_string(), i + 1));
                }
            }
            _ => {}
        }
    }
    None
}

fn read_quoted(s: &str) -> Option<(String, usize)> {
    let mut depth = 0i32;
    for (i, ch) in s.char_indices().skip(1) {
        match ch {
            '{' => depth += 1,
            '}' => depth -= 1,
            '"' if depth <= 0 => return Some((s[1..i].to_string(), i + 1)),
            _ => {}
        }
    }
    None
}

/// Drop grouping braces and the common LaTeX escapes, collapse whitespace.
fn clean_value(raw: &str) -> String {
    let unescaped = raw
        .replace("\\&", "&")
        .replace("\\%", "%")
        .replace("\\_", "_")
        .replace("\\$", "$")
        .replace("--", "-");
    let no_braces: String = unescaped.chars().filter(|c| *c != '{' && *c != '}').collect();
    no_braces.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn to_signal(fields: &HashMap<String, String>) -> Option<TopicSignal> {
    let title = fields.get("title").cloned().unwrap_or_default();
    let abstract_text = fields.get("abstract").cloned().filter(|a| !a.is_empty());
    if title.is_empty() && abstract_text.is_none() {
        return None;
    }
    let tags = fields
        .get("keywords")
        .map(|k| {
            k.split([',', ';'])
                .map(|t| t.trim().to_string())
                .filter(|t| !t.is_empty())
                .collect()
        })
        .unwrap_or_default();
    let year = fields
        .get("year")
        .or_else(|| fields.get("date"))
        .and_then(|y| RE_YEAR.captures(y))
        .and_then(|c| c[1].parse().ok());

    Some(TopicSignal {
        title,
        abstract_text,
        tags,
        year,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn braced_quoted_and_bare_values() {
        let bib = r#"
@article{smith2021,
  title = {Flat {Bands} in Twisted \& Strained Graphene},
  abstract = "We study {moir\'e} superlattices.",
  keywords = {graphene; moire, flat bands},
  year = 2021
}
"#;
        let out = parse_bibtex(bib);
        assert_eq!(out.len(), 1);
        let s = &out[0];
        assert_eq!(s.title, "Flat Bands in Twisted & Strained Graphene");
        assert_eq!(s.abstract_text.as_deref(), Some("We study moir\\'e superlattices."));
        assert_eq!(s.tags, vec!["graphene", "moire", "flat bands"]);
        assert_eq!(s.year, Some(2021));
    }

    #[test]
    fn comments_and_untitled_records_are_skipped() {
        let bib = r#"
@comment{jabref-meta: databaseType:bibtex;}
@misc{nothing, author = {Nobody}, year = {2020}}
@inproceedings{ok, title = "Kept", date = {2019-06-01}}
"#;
        let out = parse_bibtex(bib);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].title, "Kept");
        assert_eq!(out[0].year, Some(2019));
    }

    #[test]
    fn unbalanced_record_does_not_swallow_the_next() {
        let bib = "@article{a, title = {Broken\n@article{b, title = {Fine}}";
        let out = parse_bibtex(bib);
        assert!(out.iter().any(|s| s.title == "Fine"));
    }
}
