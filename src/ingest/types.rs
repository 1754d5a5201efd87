// src/ingest/types.rs
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeSet;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CandidateLinks {
    pub abstract_url: String,
    pub pdf_url: Option<String>,
}

/// One fetched preprint. Immutable after the fetcher hands it out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Candidate {
    pub id: String, // versionless arXiv id, e.g. "2401.01234"
    pub title: String,
    #[serde(rename = "abstract")]
    pub abstract_text: String,
    pub authors: Vec<String>,
    pub primary_category: Option<String>,
    pub categories: BTreeSet<String>, // primary + cross-lists
    pub published_at: DateTime<Utc>,
    pub links: CandidateLinks,
}

impl Candidate {
    pub fn in_any_category(&self, wanted: &[String]) -> bool {
        wanted.iter().any(|c| self.categories.contains(c))
            || self
                .primary_category
                .as_ref()
                .is_some_and(|p| wanted.contains(p))
    }
}

/// What to ask the preprint source for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceQuery {
    pub categories: Vec<String>,
    pub since: DateTime<Utc>,
    pub until: DateTime<Utc>,
    pub limit: usize,
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("preprint source returned HTTP {0}")]
    Status(u16),
    #[error("unparsable feed: {0}")]
    Parse(String),
}

impl FetchError {
    /// Network hiccups, throttling and server errors are worth another try.
    pub fn is_transient(&self) -> bool {
        match self {
            FetchError::Transport(_) => true,
            FetchError::Status(code) => *code == 429 || *code >= 500,
            FetchError::Parse(_) => false,
        }
    }
}

#[async_trait::async_trait]
pub trait PreprintSource: Send + Sync {
    async fn query(&self, query: &SourceQuery) -> Result<Vec<Candidate>, FetchError>;
    fn name(&self) -> &'static str;
}
