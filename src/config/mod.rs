// src/config/mod.rs
//! Run configuration loaded from TOML, validated once before anything touches the network.

pub mod ai;

use anyhow::Context;
use serde::Deserialize;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{PipelineError, Result};
pub use ai::ScoringConfig;

pub const DEFAULT_CONFIG_PATH: &str = "config/digest.toml";
pub const ENV_CONFIG_PATH: &str = "DIGEST_CONFIG";

pub const DEFAULT_ARXIV_ENDPOINT: &str = "http://export.arxiv.org/api/query";
pub const DEFAULT_SAMPLE_SIZE: usize = 20;

/// A credential or webhook URL. Never printed.
#[derive(Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(transparent)]
pub struct Secret(String);

impl Secret {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(***)")
    }
}

impl fmt::Display for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("***")
    }
}

/// Resolve a secret reference:
/// - `"ENV"` (any case) reads `default_var`
/// - `"env:NAME"` reads `NAME`
/// - anything else is taken literally
pub fn resolve_secret(field: &str, raw: &Secret, default_var: &str) -> Result<Secret> {
    let trimmed = raw.expose().trim();
    let var = if trimmed.eq_ignore_ascii_case("env") {
        Some(default_var.to_string())
    } else {
        trimmed
            .strip_prefix("env:")
            .map(|name| name.trim().to_string())
    };
    match var {
        Some(name) => std::env::var(&name)
            .ok()
            .filter(|v| !v.trim().is_empty())
            .map(Secret::new)
            .ok_or_else(|| {
                PipelineError::config(format!("{field}: missing {name} env var"))
            }),
        None => Ok(Secret::new(trimmed)),
    }
}

fn default_max_days_back() -> u32 {
    1
}
fn default_max_results() -> usize {
    100
}
fn default_page_size() -> usize {
    100
}
fn default_page_delay_ms() -> u64 {
    3_000
}
fn default_fetch_attempts() -> u32 {
    3
}
fn default_sample_size() -> usize {
    DEFAULT_SAMPLE_SIZE
}
fn default_smtp_port() -> u16 {
    587
}
fn default_true() -> bool {
    true
}
fn default_webhook_max_papers() -> usize {
    5
}

#[derive(Debug, Clone, Deserialize)]
pub struct ArxivConfig {
    pub categories: Vec<String>,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default = "default_max_days_back")]
    pub max_days_back: u32,
    #[serde(default = "default_max_results")]
    pub max_results: usize,
    #[serde(default = "default_page_size")]
    pub page_size: usize,
    #[serde(default)]
    pub endpoint: Option<String>,
    /// arXiv asks API clients to wait ~3s between paged requests.
    #[serde(default = "default_page_delay_ms")]
    pub page_delay_ms: u64,
    #[serde(default = "default_fetch_attempts")]
    pub max_attempts: u32,
}

impl ArxivConfig {
    pub fn endpoint(&self) -> &str {
        self.endpoint.as_deref().unwrap_or(DEFAULT_ARXIV_ENDPOINT)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LibraryConfig {
    /// BibTeX or JSON export of the reference library.
    #[serde(default)]
    pub path: Option<PathBuf>,
    #[serde(default = "default_sample_size")]
    pub sample_size: usize,
}

impl Default for LibraryConfig {
    fn default() -> Self {
        Self {
            path: None,
            sample_size: DEFAULT_SAMPLE_SIZE,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct InterestsConfig {
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EmailConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub smtp_host: String,
    #[serde(default = "default_smtp_port")]
    pub smtp_port: u16,
    /// Defaults to `from` when absent.
    #[serde(default)]
    pub username: Option<String>,
    /// "ENV" means: read from SMTP_PASSWORD.
    #[serde(default)]
    pub password: Secret,
    pub from: String,
    pub to: Vec<String>,
    /// Send a "no relevant papers" mail instead of staying silent.
    #[serde(default)]
    pub send_when_empty: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WebhookKind {
    Slack,
    Discord,
    Feishu,
}

impl WebhookKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            WebhookKind::Slack => "slack",
            WebhookKind::Discord => "discord",
            WebhookKind::Feishu => "feishu",
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebhookConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub kind: WebhookKind,
    /// "ENV" means: read from DIGEST_WEBHOOK_URL.
    pub url: Secret,
    /// Feishu signing secret (optional). "ENV" reads DIGEST_WEBHOOK_SECRET.
    #[serde(default)]
    pub secret: Option<Secret>,
    #[serde(default = "default_webhook_max_papers")]
    pub max_papers: usize,
    #[serde(default = "default_true")]
    pub send_when_empty: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub arxiv: ArxivConfig,
    #[serde(default)]
    pub library: LibraryConfig,
    #[serde(default)]
    pub interests: InterestsConfig,
    #[serde(default)]
    pub scoring: ScoringConfig,
    #[serde(default)]
    pub email: Option<EmailConfig>,
    #[serde(default)]
    pub webhook: Option<WebhookConfig>,
}

impl AppConfig {
    /// Read, parse, resolve secrets and validate.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("reading config from {}", path.display()))
            .map_err(|e| PipelineError::config(format!("{e:#}")))?;
        Self::from_toml_str(&content)
    }

    /// Path from `$DIGEST_CONFIG`, falling back to `config/digest.toml`.
    pub fn default_path() -> PathBuf {
        std::env::var(ENV_CONFIG_PATH)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH))
    }

    pub fn from_toml_str(s: &str) -> Result<Self> {
        let mut cfg: AppConfig =
            toml::from_str(s).map_err(|e| PipelineError::config(e.to_string()))?;
        cfg.normalize();
        cfg.resolve_secrets()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn normalize(&mut self) {
        self.arxiv.categories = clean_list(std::mem::take(&mut self.arxiv.categories));
        self.arxiv.keywords = self
            .arxiv
            .keywords
            .iter()
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty())
            .collect();
        self.interests.description = self.interests.description.trim().to_string();
    }

    fn resolve_secrets(&mut self) -> Result<()> {
        self.scoring.resolve()?;
        if let Some(email) = self.email.as_mut().filter(|e| e.enabled) {
            email.password = resolve_secret("email.password", &email.password, "SMTP_PASSWORD")?;
        }
        if let Some(hook) = self.webhook.as_mut().filter(|w| w.enabled) {
            hook.url = resolve_secret("webhook.url", &hook.url, "DIGEST_WEBHOOK_URL")?;
            if let Some(secret) = hook.secret.as_ref() {
                hook.secret = Some(resolve_secret(
                    "webhook.secret",
                    secret,
                    "DIGEST_WEBHOOK_SECRET",
                )?);
            }
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        let a = &self.arxiv;
        if a.categories.is_empty() {
            return Err(PipelineError::config("arxiv.categories must not be empty"));
        }
        if a.max_days_back == 0 {
            return Err(PipelineError::config("arxiv.max_days_back must be at least 1"));
        }
        if a.max_results == 0 || a.page_size == 0 {
            return Err(PipelineError::config(
                "arxiv.max_results and arxiv.page_size must be positive",
            ));
        }
        if a.max_attempts == 0 {
            return Err(PipelineError::config("arxiv.max_attempts must be at least 1"));
        }
        if self.library.sample_size == 0 {
            return Err(PipelineError::config("library.sample_size must be positive"));
        }
        self.scoring.validate()?;

        if let Some(email) = self.email.as_ref().filter(|e| e.enabled) {
            if email.smtp_host.trim().is_empty() {
                return Err(PipelineError::config("email.smtp_host must not be empty"));
            }
            if email.from.trim().is_empty() || email.to.iter().all(|t| t.trim().is_empty()) {
                return Err(PipelineError::config("email.from and email.to are required"));
            }
        }
        if let Some(hook) = self.webhook.as_ref().filter(|w| w.enabled) {
            let url = hook.url.expose();
            if !(url.starts_with("https://") || url.starts_with("http://")) {
                return Err(PipelineError::config("webhook.url must be an http(s) URL"));
            }
            if hook.max_papers == 0 {
                return Err(PipelineError::config("webhook.max_papers must be positive"));
            }
        }
        Ok(())
    }

    pub fn features(&self) -> Features {
        Features::from_config(self)
    }
}

/// Optional behaviour switched on by configuration, resolved once at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Features {
    pub library: bool,
    pub keyword_prefilter: bool,
    pub email: bool,
    pub webhook: bool,
    pub response_cache: bool,
}

impl Features {
    pub fn from_config(cfg: &AppConfig) -> Self {
        Self {
            library: cfg.library.path.is_some(),
            keyword_prefilter: !cfg.arxiv.keywords.is_empty(),
            email: cfg.email.as_ref().is_some_and(|e| e.enabled),
            webhook: cfg.webhook.as_ref().is_some_and(|w| w.enabled),
            response_cache: cfg.scoring.cache_dir.is_some(),
        }
    }
}

fn clean_list(items: Vec<String>) -> Vec<String> {
    use std::collections::BTreeSet;
    let mut set = BTreeSet::new();
    for it in items {
        let t = it.trim();
        if !t.is_empty() {
            set.insert(t.to_string());
        }
    }
    set.into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
[arxiv]
categories = [" cs.LG ", "cond-mat.supr-con", "cs.LG", ""]
keywords = ["superconductor", "  "]

[scoring]
provider = "mock"
"#;

    #[test]
    fn minimal_config_gets_defaults() {
        let cfg = AppConfig::from_toml_str(MINIMAL).unwrap();
        assert_eq!(cfg.arxiv.categories, vec!["cond-mat.supr-con", "cs.LG"]);
        assert_eq!(cfg.arxiv.keywords, vec!["superconductor"]);
        assert_eq!(cfg.arxiv.max_days_back, 1);
        assert_eq!(cfg.arxiv.endpoint(), DEFAULT_ARXIV_ENDPOINT);
        assert_eq!(cfg.library.sample_size, DEFAULT_SAMPLE_SIZE);
        let f = cfg.features();
        assert!(f.keyword_prefilter);
        assert!(!f.email && !f.webhook && !f.library && !f.response_cache);
    }

    #[test]
    fn empty_categories_is_config_invalid() {
        let err = AppConfig::from_toml_str(
            "[arxiv]\ncategories = []\n[scoring]\nprovider = \"mock\"\n",
        )
        .unwrap_err();
        assert!(matches!(err, PipelineError::ConfigInvalid(_)));
    }

    #[test]
    fn secret_is_never_printed() {
        let s = Secret::new("sk-very-secret");
        assert_eq!(format!("{s:?}"), "Secret(***)");
        assert_eq!(format!("{s}"), "***");
    }

    #[test]
    fn literal_secret_is_kept() {
        let s = resolve_secret("x", &Secret::new(" literal "), "UNUSED_VAR").unwrap();
        assert_eq!(s.expose(), "literal");
    }
}
