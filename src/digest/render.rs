// src/digest/render.rs
//! Stable text/JSON views of a digest for the delivery channels.

use super::{Digest, DigestEntry};

const RULE_WIDTH: usize = 70;
const WRAP_WIDTH: usize = 67;
const INDENT: &str = "   ";
const MAX_LISTED_AUTHORS: usize = 8;

fn date_str(d: &Digest) -> String {
    d.generated_at.format("%Y-%m-%d").to_string()
}

fn plural(n: usize) -> &'static str {
    if n == 1 {
        ""
    } else {
        "s"
    }
}

pub fn subject(d: &Digest) -> String {
    let n = d.len();
    format!("ArXiv Digest: {n} relevant paper{} - {}", plural(n), date_str(d))
}

pub fn authors_line(authors: &[String]) -> String {
    if authors.is_empty() {
        return "Unknown".to_string();
    }
    if authors.len() > MAX_LISTED_AUTHORS {
        format!("{} et al.", authors[..MAX_LISTED_AUTHORS].join(", "))
    } else {
        authors.join(", ")
    }
}

/// Greedy word wrap; every line is prefixed with `indent`.
pub fn wrap_text(text: &str, width: usize, indent: &str) -> String {
    let mut lines: Vec<String> = Vec::new();
    let mut current = String::new();
    for word in text.split_whitespace() {
        let len = current.chars().count();
        if !current.is_empty() && len + 1 + word.chars().count() > width {
            lines.push(format!("{indent}{current}"));
            current.clear();
        }
        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(word);
    }
    if !current.is_empty() {
        lines.push(format!("{indent}{current}"));
    }
    lines.join("\n")
}

fn entry_block(i: usize, e: &DigestEntry) -> String {
    let c = &e.candidate;
    let mut lines = vec![
        format!("{i}. {}", c.title),
        format!("{INDENT}Authors: {}", authors_line(&c.authors)),
        format!("{INDENT}Published: {}", c.published_at.format("%Y-%m-%d %H:%M UTC")),
        format!("{INDENT}Relevance: {:.1}/10 - {}", e.score, e.rationale),
        format!("{INDENT}URL: {}", c.links.abstract_url),
    ];
    if let Some(pdf) = &c.links.pdf_url {
        lines.push(format!("{INDENT}PDF: {pdf}"));
    }
    if !c.abstract_text.is_empty() {
        lines.push(String::new());
        lines.push(format!("{INDENT}Abstract:"));
        lines.push(wrap_text(&c.abstract_text, WRAP_WIDTH, INDENT));
    }
    lines.join("\n")
}

/// Plain-text email body.
pub fn render_text(d: &Digest) -> String {
    let rule = "=".repeat(RULE_WIDTH);
    let mut out = Vec::new();
    if d.is_empty() {
        out.push(format!("No papers matched your interests on {}.", date_str(d)));
    } else {
        out.push("Here are today's relevant papers from arXiv:".to_string());
        out.push(String::new());
        out.push(rule.clone());
        for (i, e) in d.entries.iter().enumerate() {
            out.push(String::new());
            out.push(entry_block(i + 1, e));
            out.push(String::new());
            out.push("-".repeat(RULE_WIDTH));
        }
    }
    out.push(String::new());
    out.push(format!(
        "Fetched {} | pre-filtered {} | scored {} | threshold {:.1}",
        d.stats.fetched, d.stats.prefiltered, d.stats.scored, d.threshold
    ));
    let unscored = d.stats.parse_failed + d.stats.model_error + d.stats.skipped;
    if unscored > 0 {
        out.push(format!(
            "Not scored: {} unparsable, {} model errors, {} over budget",
            d.stats.parse_failed, d.stats.model_error, d.stats.skipped
        ));
    }
    out.push("This digest was generated automatically.".to_string());
    out.join("\n")
}

/// Short chat message listing the top `max_papers` entries.
pub fn render_webhook_text(d: &Digest, max_papers: usize) -> String {
    let head = format!("ArXiv Daily Digest - {}", date_str(d));
    if d.is_empty() {
        return format!("{head}\n\nNo papers matched your interests today.");
    }
    let shown = d.len().min(max_papers);
    let mut lines = vec![
        head,
        String::new(),
        format!("Top {shown} of {} relevant paper{}:", d.len(), plural(d.len())),
    ];
    for (i, e) in d.entries.iter().take(shown).enumerate() {
        let c = &e.candidate;
        lines.push(String::new());
        lines.push(format!("{}. {} ({:.1}/10)", i + 1, c.title, e.score));
        lines.push(c.links.pdf_url.clone().unwrap_or_else(|| c.links.abstract_url.clone()));
        lines.push(format!("Reason: {}", e.rationale));
    }
    lines.join("\n")
}

pub fn render_json(d: &Digest) -> serde_json::Result<String> {
    serde_json::to_string_pretty(d)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wrap_respects_width_and_indent() {
        let text = "word ".repeat(40);
        let wrapped = wrap_text(&text, 20, "  ");
        for line in wrapped.lines() {
            assert!(line.starts_with("  "));
            assert!(line.chars().count() <= 22);
        }
        assert_eq!(wrapped.split_whitespace().count(), 40);
    }

    #[test]
    fn long_word_gets_its_own_line() {
        assert_eq!(wrap_text("a verylongword b", 5, ""), "a\nverylongword\nb");
    }

    #[test]
    fn authors_are_capped() {
        let many: Vec<String> = (0..12).map(|i| format!("A{i}")).collect();
        assert!(authors_line(&many).ends_with("A7 et al."));
        assert_eq!(authors_line(&[]), "Unknown");
    }
}
