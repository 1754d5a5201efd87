// src/profile/mod.rs
//! Interest profile: what the reader cares about, built once per run from the
//! reference-library export plus the free-text description in the config.

pub mod bibtex;
pub mod json;

use serde::Serialize;
use std::fs;
use std::path::Path;
use tracing::{info, warn};

use crate::config::DEFAULT_SAMPLE_SIZE;

/// One paper from the reader's library, reduced to what the prompt needs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TopicSignal {
    pub title: String,
    pub abstract_text: Option<String>,
    pub tags: Vec<String>,
    pub year: Option<i32>,
}

/// Library export schema, decided once per file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LibraryFormat {
    Bibtex,
    Json,
}

impl LibraryFormat {
    /// Extension first (`.bib`, `.bibtex`, `.json`), then content sniffing.
    pub fn detect(path: &Path, content: &str) -> Option<Self> {
        let ext = path
            .extension()
            .and_then(|s| s.to_str())
            .unwrap_or_default()
            .to_ascii_lowercase();
        match ext.as_str() {
            "bib" | "bibtex" => return Some(Self::Bibtex),
            "json" => return Some(Self::Json),
            _ => {}
        }
        Self::sniff(content)
    }

    fn sniff(content: &str) -> Option<Self> {
        let head = content.trim_start_matches('\u{feff}').trim_start();
        if head.starts_with('[') || head.starts_with('{') {
            Some(Self::Json)
        } else if head.contains('@') && bibtex::parse_bibtex(head).first().is_some() {
            Some(Self::Bibtex)
        } else {
            None
        }
    }

    pub fn parse(self, content: &str) -> anyhow::Result<Vec<TopicSignal>> {
        match self {
            Self::Bibtex => Ok(bibtex::parse_bibtex(content)),
            Self::Json => json::parse_json(content),
        }
    }
}

/// Immutable per run; shared read-only by every scoring call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InterestProfile {
    free_text: String,
    library_topics: Vec<TopicSignal>,
    /// Usable entries in the library before sampling.
    library_total: usize,
}

impl InterestProfile {
    pub fn new(free_text: impl Into<String>, mut topics: Vec<TopicSignal>, limit: usize) -> Self {
        topics.retain(is_usable);
        let library_total = topics.len();
        Self {
            free_text: free_text.into().trim().to_string(),
            library_topics: sample_topics(topics, limit),
            library_total,
        }
    }

    pub fn free_text(&self) -> &str {
        &self.free_text
    }

    pub fn library_topics(&self) -> &[TopicSignal] {
        &self.library_topics
    }

    /// Always equal to `library_topics().len()`.
    pub fn sample_size(&self) -> usize {
        self.library_topics.len()
    }

    pub fn library_total(&self) -> usize {
        self.library_total
    }

    pub fn is_empty(&self) -> bool {
        self.free_text.is_empty() && self.library_topics.is_empty()
    }
}

/// Build the profile with the default sample size.
pub fn build(library_path: Option<&Path>, free_text: &str) -> InterestProfile {
    build_with_limit(library_path, free_text, DEFAULT_SAMPLE_SIZE)
}

/// Never fails: a missing or unreadable library degrades to free text only.
pub fn build_with_limit(
    library_path: Option<&Path>,
    free_text: &str,
    limit: usize,
) -> InterestProfile {
    let topics = match library_path {
        None => Vec::new(),
        Some(p) => load_library(p),
    };
    let profile = InterestProfile::new(free_text, topics, limit);
    info!(
        sampled = profile.sample_size(),
        total = profile.library_total(),
        free_text_chars = profile.free_text().chars().count(),
        "interest profile built"
    );
    profile
}

fn load_library(path: &Path) -> Vec<TopicSignal> {
    let content = match fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "library unreadable, using interests only");
            return Vec::new();
        }
    };
    let Some(format) = LibraryFormat::detect(path, &content) else {
        warn!(path = %path.display(), "library format not recognized, using interests only");
        return Vec::new();
    };
    match format.parse(&content) {
        Ok(topics) => topics,
        Err(e) => {
            warn!(path = %path.display(), ?format, error = %e, "library parse failed, using interests only");
            Vec::new()
        }
    }
}

fn is_usable(t: &TopicSignal) -> bool {
    !t.title.trim().is_empty() || t.abstract_text.as_deref().is_some_and(|a| !a.trim().is_empty())
}

/// Keep at most `limit` entries: newest `year` first, undated entries after,
/// input order preserved among equals.
pub fn sample_topics(mut topics: Vec<TopicSignal>, limit: usize) -> Vec<TopicSignal> {
    topics.retain(is_usable);
    if topics.iter().any(|t| t.year.is_some()) {
        // Stable sort keeps input order for ties and for undated entries.
        topics.sort_by_key(|t| std::cmp::Reverse(t.year.unwrap_or(i32::MIN)));
    }
    topics.truncate(limit);
    topics
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn sig(title: &str, year: Option<i32>) -> TopicSignal {
        TopicSignal {
            title: title.into(),
            abstract_text: None,
            tags: vec![],
            year,
        }
    }

    #[test]
    fn sampling_prefers_recent_years_then_input_order() {
        let topics = vec![
            sig("a", Some(2018)),
            sig("b", None),
            sig("c", Some(2023)),
            sig("d", Some(2023)),
            sig("e", None),
        ];
        let out = sample_topics(topics, 4);
        let titles: Vec<_> = out.iter().map(|t| t.title.as_str()).collect();
        assert_eq!(titles, vec!["c", "d", "a", "b"]);
    }

    #[test]
    fn sampling_without_years_keeps_input_order() {
        let topics = vec![sig("x", None), sig("y", None), sig("z", None)];
        let out = sample_topics(topics, 2);
        assert_eq!(out[0].title, "x");
        assert_eq!(out[1].title, "y");
    }

    #[test]
    fn sample_size_matches_topics() {
        let p = InterestProfile::new(" flat bands ", vec![sig("a", None), sig("", None)], 20);
        assert_eq!(p.sample_size(), p.library_topics().len());
        assert_eq!(p.sample_size(), 1);
        assert_eq!(p.free_text(), "flat bands");
    }

    #[test]
    fn format_detection_by_extension_and_content() {
        let p = PathBuf::from("lib.BIB");
        assert_eq!(LibraryFormat::detect(&p, ""), Some(LibraryFormat::Bibtex));
        let p = PathBuf::from("export.txt");
        assert_eq!(
            LibraryFormat::detect(&p, "  [{\"title\": \"x\"}]"),
            Some(LibraryFormat::Json)
        );
        assert_eq!(
            LibraryFormat::detect(&p, "@article{k, title={T}}"),
            Some(LibraryFormat::Bibtex)
        );
        assert_eq!(LibraryFormat::detect(&p, "just some notes"), None);
    }

    #[test]
    fn missing_library_keeps_free_text() {
        let p = build(Some(Path::new("/definitely/not/here.bib")), "superconductivity");
        assert!(p.library_topics().is_empty());
        assert_eq!(p.free_text(), "superconductivity");
    }
}
