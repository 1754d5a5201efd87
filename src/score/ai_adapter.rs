//! Scoring model adapter: provider abstraction, OpenAI-compatible client,
//! deterministic mock, and an on-disk response cache.

use std::collections::VecDeque;
use std::fs;
use std::future::Future;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::config::{ScoringConfig, Secret};
use crate::score::prompt::Prompt;

// ------------------------------------------------------------
// Public surface
// ------------------------------------------------------------

/// Transport/auth failures of one completion call.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ModelError {
    #[error("request timed out")]
    Timeout,
    #[error("rate limited by provider")]
    RateLimited { retry_after_secs: Option<u64> },
    #[error("provider unavailable: {0}")]
    Unavailable(String),
    #[error("credentials rejected (HTTP {status})")]
    Auth { status: u16 },
    #[error("request rejected: {0}")]
    BadRequest(String),
    #[error("unreadable provider response: {0}")]
    InvalidResponse(String),
}

impl ModelError {
    /// Timeouts, throttling and server-side outages are retried; the rest are not.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ModelError::Timeout | ModelError::RateLimited { .. } | ModelError::Unavailable(_)
        )
    }

    pub fn retry_hint(&self) -> Option<Duration> {
        match self {
            ModelError::RateLimited {
                retry_after_secs: Some(s),
            } => Some(Duration::from_secs(*s)),
            _ => None,
        }
    }
}

pub type CompletionFuture<'a> =
    Pin<Box<dyn Future<Output = Result<String, ModelError>> + Send + 'a>>;

/// Anything that turns a prompt into completion text.
pub trait ScoringModel: Send + Sync {
    fn complete<'a>(&'a self, prompt: &'a Prompt) -> CompletionFuture<'a>;
    /// Provider name for diagnostics.
    fn provider_name(&self) -> &'static str;
    /// Everything besides the prompt that changes the reply: model, sampling
    /// settings, endpoint. Part of the response cache key.
    fn cache_identity(&self) -> String {
        self.provider_name().to_string()
    }
}

pub type DynScoringModel = Arc<dyn ScoringModel>;

/// Factory: build a model according to config and environment variables.
///
/// * If `SCORING_TEST_MODE=mock` or `provider = "mock"`, returns a deterministic mock.
/// * Else builds the OpenAI-compatible client, wrapped with the response cache when
///   `cache_dir` is set.
pub fn build_model_from_config(cfg: &ScoringConfig) -> anyhow::Result<DynScoringModel> {
    let test_mode = std::env::var("SCORING_TEST_MODE")
        .map(|v| v == "mock")
        .unwrap_or(false);
    if test_mode || cfg.provider == "mock" {
        tracing::warn!("scoring model is mocked; no external calls will be made");
        return Ok(Arc::new(MockModel::fixed(
            r#"{"score": 5, "rationale": "Mock score, no model was called."}"#,
        )));
    }

    let provider = OpenAiProvider::new(cfg)?;
    match cfg.cache_dir.as_deref() {
        Some(dir) => Ok(Arc::new(CachingModel::new(provider, PathBuf::from(dir)))),
        None => Ok(Arc::new(provider)),
    }
}

// ------------------------------------------------------------
// OpenAI-compatible chat completions
// ------------------------------------------------------------

pub struct OpenAiProvider {
    http: reqwest::Client,
    endpoint: String,
    api_key: Secret,
    model: String,
    temperature: f32,
    max_tokens: u32,
    json_mode: bool,
}

impl OpenAiProvider {
    pub fn new(cfg: &ScoringConfig) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("arxiv-digest/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(cfg.timeout_secs))
            .build()?;
        Ok(Self {
            http,
            endpoint: cfg.endpoint().to_string(),
            api_key: cfg.api_key.clone(),
            model: cfg.model.clone(),
            temperature: cfg.temperature,
            max_tokens: cfg.max_tokens,
            json_mode: cfg.json_mode,
        })
    }

    async fn complete_impl(&self, prompt: &Prompt) -> Result<String, ModelError> {
        #[derive(Serialize)]
        struct Msg<'a> {
            role: &'a str,
            content: &'a str,
        }
        #[derive(Serialize)]
        struct ResponseFormat {
            #[serde(rename = "type")]
            kind: &'static str,
        }
        #[derive(Serialize)]
        struct Req<'a> {
            model: &'a str,
            messages: Vec<Msg<'a>>,
            temperature: f32,
            max_tokens: u32,
            #[serde(skip_serializing_if = "Option::is_none")]
            response_format: Option<ResponseFormat>,
        }
        #[derive(Deserialize)]
        struct Resp {
            choices: Vec<Choice>,
        }
        #[derive(Deserialize)]
        struct Choice {
            message: ChoiceMsg,
        }
        #[derive(Deserialize)]
        struct ChoiceMsg {
            #[serde(default)]
            content: Option<String>,
        }

        let req = Req {
            model: &self.model,
            messages: vec![
                Msg {
                    role: "system",
                    content: &prompt.system,
                },
                Msg {
                    role: "user",
                    content: &prompt.user,
                },
            ],
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            response_format: self.json_mode.then_some(ResponseFormat {
                kind: "json_object",
            }),
        };

        let resp = self
            .http
            .post(&self.endpoint)
            .bearer_auth(self.api_key.expose())
            .json(&req)
            .send()
            .await
            .map_err(classify_transport)?;

        let status = resp.status();
        if !status.is_success() {
            let retry_after = resp
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.trim().parse::<u64>().ok());
            let body = resp.text().await.unwrap_or_default();
            return Err(classify_status(status.as_u16(), retry_after, &body));
        }

        let body: Resp = resp
            .json()
            .await
            .map_err(|e| ModelError::InvalidResponse(e.to_string()))?;
        Ok(body
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default())
    }
}

impl ScoringModel for OpenAiProvider {
    fn complete<'a>(&'a self, prompt: &'a Prompt) -> CompletionFuture<'a> {
        Box::pin(self.complete_impl(prompt))
    }
    fn provider_name(&self) -> &'static str {
        "openai"
    }
    fn cache_identity(&self) -> String {
        format!(
            "openai|{}|{}|t={}|max_tokens={}|json={}",
            self.endpoint, self.model, self.temperature, self.max_tokens, self.json_mode
        )
    }
}

fn classify_transport(e: reqwest::Error) -> ModelError {
    if e.is_timeout() {
        ModelError::Timeout
    } else if e.is_connect() {
        ModelError::Unavailable(format!("connection failed: {e}"))
    } else if e.is_builder() {
        ModelError::BadRequest(e.to_string())
    } else {
        ModelError::Unavailable(e.to_string())
    }
}

/// Map a non-2xx status to the retry class it belongs to.
pub fn classify_status(status: u16, retry_after_secs: Option<u64>, body: &str) -> ModelError {
    match status {
        401 | 403 => ModelError::Auth { status },
        408 => ModelError::Timeout,
        429 => ModelError::RateLimited { retry_after_secs },
        s if s >= 500 => ModelError::Unavailable(format!("HTTP {s}")),
        s => {
            let snippet: String = body.chars().take(200).collect();
            ModelError::BadRequest(format!("HTTP {s}: {snippet}"))
        }
    }
}

// ------------------------------------------------------------
// Mock
// ------------------------------------------------------------

type Responder = dyn Fn(&Prompt) -> Result<String, ModelError> + Send + Sync;

/// Deterministic model for tests and dry runs.
///
/// Replies come from the scripted queue first, then from the responder (if any),
/// then the fixed default. Every call is counted.
pub struct MockModel {
    default_reply: String,
    script: Mutex<VecDeque<Result<String, ModelError>>>,
    responder: Option<Box<Responder>>,
    identity: String,
    calls: AtomicUsize,
}

impl MockModel {
    pub fn fixed(reply: impl Into<String>) -> Self {
        Self {
            default_reply: reply.into(),
            script: Mutex::new(VecDeque::new()),
            responder: None,
            identity: "mock".to_string(),
            calls: AtomicUsize::new(0),
        }
    }

    /// Distinguishes mocks that stand in for differently configured models.
    pub fn with_identity(mut self, identity: impl Into<String>) -> Self {
        self.identity = identity.into();
        self
    }

    pub fn scripted(replies: Vec<Result<String, ModelError>>, then: impl Into<String>) -> Self {
        let m = Self::fixed(then);
        if let Ok(mut q) = m.script.lock() {
            q.extend(replies);
        }
        m
    }

    pub fn with_responder<F>(f: F) -> Self
    where
        F: Fn(&Prompt) -> Result<String, ModelError> + Send + Sync + 'static,
    {
        Self {
            responder: Some(Box::new(f)),
            ..Self::fixed(String::new())
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn next_reply(&self, prompt: &Prompt) -> Result<String, ModelError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(scripted) = self.script.lock().ok().and_then(|mut q| q.pop_front()) {
            return scripted;
        }
        match &self.responder {
            Some(f) => f(prompt),
            None => Ok(self.default_reply.clone()),
        }
    }
}

impl ScoringModel for MockModel {
    fn complete<'a>(&'a self, prompt: &'a Prompt) -> CompletionFuture<'a> {
        let out = self.next_reply(prompt);
        Box::pin(async move { out })
    }
    fn provider_name(&self) -> &'static str {
        "mock"
    }
    fn cache_identity(&self) -> String {
        self.identity.clone()
    }
}

// ------------------------------------------------------------
// Caching wrapper (file cache keyed by prompt hash)
// ------------------------------------------------------------

/// Re-running the same day with the same library reuses earlier completions.
pub struct CachingModel<M: ScoringModel> {
    inner: M,
    cache_dir: PathBuf,
}

impl<M: ScoringModel> CachingModel<M> {
    pub fn new(inner: M, cache_dir: PathBuf) -> Self {
        if let Err(e) = fs::create_dir_all(&cache_dir) {
            tracing::warn!(dir = %cache_dir.display(), error = %e, "response cache dir unavailable");
        }
        Self { inner, cache_dir }
    }

    pub fn inner(&self) -> &M {
        &self.inner
    }

    async fn complete_impl(&self, prompt: &Prompt) -> Result<String, ModelError> {
        let key = cache_key(&self.inner.cache_identity(), prompt);
        if let Some(hit) = read_cache_file(&self.cache_dir, &key) {
            tracing::debug!(%key, "response cache hit");
            return Ok(hit.text);
        }
        let text = self.inner.complete(prompt).await?;
        if let Err(e) = write_cache_file(&self.cache_dir, &key, &CachedCompletion { text: text.clone() }) {
            tracing::debug!(error = %e, "response cache write failed");
        }
        Ok(text)
    }
}

impl<M: ScoringModel> ScoringModel for CachingModel<M> {
    fn complete<'a>(&'a self, prompt: &'a Prompt) -> CompletionFuture<'a> {
        Box::pin(self.complete_impl(prompt))
    }
    fn provider_name(&self) -> &'static str {
        self.inner.provider_name()
    }
    fn cache_identity(&self) -> String {
        self.inner.cache_identity()
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct CachedCompletion {
    text: String,
}

fn cache_key(identity: &str, prompt: &Prompt) -> String {
    let mut hasher = Sha256::new();
    hasher.update(identity.as_bytes());
    hasher.update([0u8]);
    hasher.update(prompt.system.as_bytes());
    hasher.update([0u8]);
    hasher.update(prompt.user.as_bytes());
    let digest = hasher.finalize();
    let mut out = String::with_capacity(32);
    for b in digest.iter().take(16) {
        use std::fmt::Write as _;
        let _ = write!(&mut out, "{b:02x}");
    }
    out
}

fn cache_path(dir: &Path, key: &str) -> PathBuf {
    dir.join(format!("{key}.json"))
}

fn read_cache_file(dir: &Path, key: &str) -> Option<CachedCompletion> {
    let buf = fs::read_to_string(cache_path(dir, key)).ok()?;
    serde_json::from_str(&buf).ok()
}

fn write_cache_file(dir: &Path, key: &str, value: &CachedCompletion) -> io::Result<()> {
    let path = cache_path(dir, key);
    let tmp = path.with_extension("json.tmp");
    let json = serde_json::to_string(value).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    let mut f = fs::File::create(&tmp)?;
    f.write_all(json.as_bytes())?;
    fs::rename(tmp, path)?;
    Ok(())
}

// ------------------------------------------------------------
// Sanitization
// ------------------------------------------------------------

pub const MAX_RATIONALE_CHARS: usize = 300;

/// Single line, collapsed whitespace, at most 300 chars.
pub fn sanitize_rationale(input: &str) -> String {
    let mut out = String::with_capacity(MAX_RATIONALE_CHARS);
    let mut count = 0usize;
    for word in input.split_whitespace() {
        let word = word.trim_matches(|c: char| c.is_control());
        if word.is_empty() {
            continue;
        }
        if !out.is_empty() {
            if count + 1 >= MAX_RATIONALE_CHARS {
                break;
            }
            out.push(' ');
            count += 1;
        }
        for ch in word.chars() {
            if count >= MAX_RATIONALE_CHARS {
                break;
            }
            out.push(ch);
            count += 1;
        }
    }
    out.trim().to_string()
}
