// src/ingest/providers/arxiv.rs
//! arXiv export API (Atom feed) provider.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use metrics::{counter, histogram};
use once_cell::sync::Lazy;
use quick_xml::de::from_str;
use regex::Regex;
use serde::Deserialize;
use std::collections::BTreeSet;
use std::time::Duration;

use crate::config::ArxivConfig;
use crate::ingest::normalize_text;
use crate::ingest::types::{Candidate, CandidateLinks, FetchError, PreprintSource, SourceQuery};

#[derive(Debug, Deserialize)]
struct Feed {
    #[serde(rename = "entry", default)]
    entries: Vec<Entry>,
}

#[derive(Debug, Deserialize)]
struct Entry {
    id: String,
    published: Option<String>,
    title: Option<String>,
    summary: Option<String>,
    #[serde(rename = "author", default)]
    authors: Vec<Author>,
    #[serde(rename = "link", default)]
    links: Vec<Link>,
    #[serde(rename = "primary_category", alias = "arxiv:primary_category", default)]
    primary_category: Option<Category>,
    #[serde(rename = "category", default)]
    categories: Vec<Category>,
}

#[derive(Debug, Deserialize)]
struct Author {
    name: String,
}

#[derive(Debug, Deserialize)]
struct Link {
    #[serde(rename = "@href")]
    href: String,
    #[serde(rename = "@rel", default)]
    rel: Option<String>,
    #[serde(rename = "@title", default)]
    title: Option<String>,
    #[serde(rename = "@type", default)]
    mime: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Category {
    #[serde(rename = "@term")]
    term: String,
}

static RE_VERSION: Lazy<Regex> = Lazy::new(|| Regex::new(r"v\d+$").expect("version regex"));

/// "http://arxiv.org/abs/2401.01234v2" -> "2401.01234"; old-style ids keep their archive prefix.
pub fn normalize_arxiv_id(raw: &str) -> String {
    let tail = raw
        .split_once("/abs/")
        .map(|(_, t)| t)
        .unwrap_or(raw)
        .trim()
        .trim_end_matches('/');
    RE_VERSION.replace(tail, "").to_string()
}

fn parse_timestamp(ts: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(ts.trim())
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Parse an Atom page into candidates, in feed order.
pub fn parse_feed(xml: &str) -> Result<Vec<Candidate>, FetchError> {
    let t0 = std::time::Instant::now();
    let feed: Feed = from_str(xml).map_err(|e| FetchError::Parse(e.to_string()))?;

    let mut out = Vec::with_capacity(feed.entries.len());
    for entry in feed.entries {
        // The API reports query errors as a single pseudo-entry.
        if entry.id.contains("/api/errors") {
            let msg = entry.summary.as_deref().map(normalize_text).unwrap_or_default();
            return Err(FetchError::Parse(format!("arXiv API error: {msg}")));
        }
        let Some(published_at) = entry.published.as_deref().and_then(parse_timestamp) else {
            tracing::debug!(id = %entry.id, "entry without parsable published date skipped");
            continue;
        };
        let title = entry.title.as_deref().map(normalize_text).unwrap_or_default();
        let abstract_text = entry.summary.as_deref().map(normalize_text).unwrap_or_default();
        if title.is_empty() {
            continue;
        }

        let abstract_url = entry
            .links
            .iter()
            .find(|l| l.rel.as_deref() == Some("alternate"))
            .map(|l| l.href.clone())
            .unwrap_or_else(|| entry.id.trim().to_string());
        let pdf_url = entry
            .links
            .iter()
            .find(|l| {
                l.title.as_deref() == Some("pdf") || l.mime.as_deref() == Some("application/pdf")
            })
            .map(|l| l.href.clone());

        let primary_category = entry.primary_category.map(|c| c.term);
        let mut categories: BTreeSet<String> =
            entry.categories.into_iter().map(|c| c.term).collect();
        if let Some(p) = primary_category.as_ref() {
            categories.insert(p.clone());
        }

        out.push(Candidate {
            id: normalize_arxiv_id(&entry.id),
            title,
            abstract_text,
            authors: entry
                .authors
                .into_iter()
                .map(|a| normalize_text(&a.name))
                .filter(|a| !a.is_empty())
                .collect(),
            primary_category,
            categories,
            published_at,
            links: CandidateLinks {
                abstract_url,
                pdf_url,
            },
        });
    }

    let ms = t0.elapsed().as_secs_f64() * 1_000.0;
    histogram!("digest_fetch_parse_ms").record(ms);
    counter!("digest_fetch_entries_total").increment(out.len() as u64);
    Ok(out)
}

/// Window + category filter, newest first, cut to `limit`.
fn select(mut entries: Vec<Candidate>, q: &SourceQuery) -> Vec<Candidate> {
    entries.retain(|c| {
        c.published_at >= q.since && c.published_at <= q.until && c.in_any_category(&q.categories)
    });
    entries.sort_by(|a, b| b.published_at.cmp(&a.published_at).then_with(|| a.id.cmp(&b.id)));
    entries.truncate(q.limit);
    entries
}

fn search_query(categories: &[String]) -> String {
    categories
        .iter()
        .map(|c| format!("cat:{c}"))
        .collect::<Vec<_>>()
        .join(" OR ")
}

pub struct ArxivProvider {
    mode: Mode,
}

enum Mode {
    Fixture(String),
    Http {
        endpoint: String,
        client: reqwest::Client,
        page_size: usize,
        page_delay: Duration,
    },
}

impl ArxivProvider {
    /// Serve queries from an Atom document held in memory.
    pub fn from_fixture_str(s: &str) -> Self {
        Self {
            mode: Mode::Fixture(s.to_string()),
        }
    }

    pub fn from_config(cfg: &ArxivConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("arxiv-digest/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(60))
            .build()?;
        Ok(Self {
            mode: Mode::Http {
                endpoint: cfg.endpoint().to_string(),
                client,
                page_size: cfg.page_size,
                page_delay: Duration::from_millis(cfg.page_delay_ms),
            },
        })
    }

    async fn fetch_page(
        client: &reqwest::Client,
        endpoint: &str,
        search: &str,
        start: usize,
        page_size: usize,
    ) -> Result<String, FetchError> {
        let start = start.to_string();
        let page_size = page_size.to_string();
        let resp = client
            .get(endpoint)
            .query(&[
                ("search_query", search),
                ("start", start.as_str()),
                ("max_results", page_size.as_str()),
                ("sortBy", "submittedDate"),
                ("sortOrder", "descending"),
            ])
            .send()
            .await
            .map_err(|e| FetchError::Transport(e.to_string()))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16()));
        }
        resp.text()
            .await
            .map_err(|e| FetchError::Transport(e.to_string()))
    }
}

#[async_trait]
impl PreprintSource for ArxivProvider {
    async fn query(&self, q: &SourceQuery) -> Result<Vec<Candidate>, FetchError> {
        match &self.mode {
            Mode::Fixture(xml) => Ok(select(parse_feed(xml)?, q)),

            Mode::Http {
                endpoint,
                client,
                page_size,
                page_delay,
            } => {
                let search = search_query(&q.categories);
                let mut collected = Vec::new();
                let mut start = 0usize;
                loop {
                    let xml = Self::fetch_page(client, endpoint, &search, start, *page_size).await?;
                    let page = parse_feed(&xml)?;
                    let n = page.len();
                    let reached_window_start = page.iter().any(|c| c.published_at < q.since);
                    collected.extend(page);

                    let in_window = collected
                        .iter()
                        .filter(|c| c.published_at >= q.since && c.published_at <= q.until)
                        .count();
                    if n < *page_size || reached_window_start || in_window >= q.limit {
                        break;
                    }
                    start += n;
                    tokio::time::sleep(*page_delay).await;
                }
                tracing::debug!(
                    search = %search,
                    pages_total = collected.len(),
                    "arXiv query finished"
                );
                Ok(select(collected, q))
            }
        }
    }

    fn name(&self) -> &'static str {
        "arxiv"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_lose_url_and_version() {
        assert_eq!(normalize_arxiv_id("http://arxiv.org/abs/2401.01234v2"), "2401.01234");
        assert_eq!(
            normalize_arxiv_id("http://arxiv.org/abs/cond-mat/0102536v1"),
            "cond-mat/0102536"
        );
        assert_eq!(normalize_arxiv_id("2401.00001"), "2401.00001");
    }

    #[test]
    fn search_query_ors_categories() {
        let q = search_query(&["cs.LG".into(), "hep-th".into()]);
        assert_eq!(q, "cat:cs.LG OR cat:hep-th");
    }

    #[test]
    fn api_error_entry_is_a_parse_error() {
        let xml = r#"<?xml version="1.0" encoding="UTF-8"?>
<feed xmlns="http://www.w3.org/2005/Atom">
  <entry>
    <id>http://arxiv.org/api/errors#incorrect_id_format_for_1234</id>
    <title>Error</title>
    <summary>incorrect id format for 1234</summary>
  </entry>
</feed>"#;
        let err = parse_feed(xml).unwrap_err();
        assert!(matches!(err, FetchError::Parse(_)));
        assert!(!err.is_transient());
    }

    #[test]
    fn empty_feed_yields_nothing() {
        let xml = r#"<feed xmlns="http://www.w3.org/2005/Atom"><title>q</title></feed>"#;
        assert!(parse_feed(xml).unwrap().is_empty());
    }
}
