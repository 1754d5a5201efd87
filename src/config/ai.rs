// src/config/ai.rs
use serde::Deserialize;

use super::{resolve_secret, Secret};
use crate::error::{PipelineError, Result};

pub const DEFAULT_OPENAI_ENDPOINT: &str = "https://api.openai.com/v1/chat/completions";
pub const DEFAULT_MODEL: &str = "gpt-4o-mini";
pub const DEFAULT_THRESHOLD: f32 = 7.0;

fn default_provider() -> String {
    "openai".to_string()
}
fn default_model() -> String {
    DEFAULT_MODEL.to_string()
}
fn default_api_key() -> Secret {
    Secret::new("ENV")
}
fn default_threshold() -> f32 {
    DEFAULT_THRESHOLD
}
fn default_concurrency() -> usize {
    4
}
fn default_attempts() -> u32 {
    3
}
fn default_temperature() -> f32 {
    0.3
}
fn default_max_tokens() -> u32 {
    200
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_retry_base_ms() -> u64 {
    1_000
}

/// `[scoring]` section: which model scores candidates and how hard we may hit it.
#[derive(Debug, Clone, Deserialize)]
pub struct ScoringConfig {
    /// "openai" | "mock" (case-insensitive)
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_model")]
    pub model: String,
    /// "ENV" means: read from OPENAI_API_KEY. "env:NAME" reads NAME.
    #[serde(default = "default_api_key")]
    pub api_key: Secret,
    /// Chat completions URL; any OpenAI-compatible gateway works.
    #[serde(default)]
    pub endpoint: Option<String>,
    /// Inclusive minimum score for a paper to enter the digest.
    #[serde(default = "default_threshold")]
    pub threshold: f32,
    #[serde(default = "default_concurrency")]
    pub max_concurrency: usize,
    /// Total attempts per candidate for transient failures (timeouts, 429, 5xx).
    #[serde(default = "default_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_retry_base_ms")]
    pub retry_base_ms: u64,
    /// Hard cap on model calls per run; candidates past it are skipped.
    #[serde(default)]
    pub max_calls: Option<usize>,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Ask the endpoint for `response_format = json_object`.
    #[serde(default)]
    pub json_mode: bool,
    /// Directory for the on-disk response cache. Disabled when absent.
    #[serde(default)]
    pub cache_dir: Option<String>,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            api_key: default_api_key(),
            endpoint: None,
            threshold: default_threshold(),
            max_concurrency: default_concurrency(),
            max_attempts: default_attempts(),
            retry_base_ms: default_retry_base_ms(),
            max_calls: None,
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            timeout_secs: default_timeout_secs(),
            json_mode: false,
            cache_dir: None,
        }
    }
}

impl ScoringConfig {
    pub fn endpoint(&self) -> &str {
        self.endpoint.as_deref().unwrap_or(DEFAULT_OPENAI_ENDPOINT)
    }

    /// Normalize provider and resolve the api key reference.
    pub(crate) fn resolve(&mut self) -> Result<()> {
        self.provider = self.provider.trim().to_lowercase();
        match self.provider.as_str() {
            "openai" => {
                self.api_key = resolve_secret("scoring.api_key", &self.api_key, "OPENAI_API_KEY")?;
            }
            // The mock never leaves the process; no key needed.
            "mock" => {}
            other => {
                return Err(PipelineError::config(format!(
                    "unsupported scoring provider: {other}"
                )))
            }
        }
        Ok(())
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if !(0.0..=10.0).contains(&self.threshold) {
            return Err(PipelineError::config(format!(
                "scoring.threshold must be within [0, 10], got {}",
                self.threshold
            )));
        }
        if !(1..=16).contains(&self.max_concurrency) {
            return Err(PipelineError::config(format!(
                "scoring.max_concurrency must be within 1..=16, got {}",
                self.max_concurrency
            )));
        }
        if self.max_attempts == 0 || self.max_attempts > 10 {
            return Err(PipelineError::config(
                "scoring.max_attempts must be within 1..=10",
            ));
        }
        if self.model.trim().is_empty() {
            return Err(PipelineError::config("scoring.model must not be empty"));
        }
        if self.provider == "openai" && self.api_key.is_empty() {
            return Err(PipelineError::config("scoring.api_key resolved to an empty value"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let cfg = ScoringConfig::default();
        assert_eq!(cfg.provider, "openai");
        assert_eq!(cfg.model, DEFAULT_MODEL);
        assert_eq!(cfg.endpoint(), DEFAULT_OPENAI_ENDPOINT);
        assert!((cfg.threshold - 7.0).abs() < f32::EPSILON);
        assert_eq!(cfg.max_attempts, 3);
    }

    #[test]
    fn attempts_bound_is_enforced() {
        let cfg = ScoringConfig {
            provider: "mock".into(),
            max_attempts: 0,
            ..Default::default()
        };
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("scoring.max_attempts"));
    }

    #[test]
    fn threshold_out_of_range_is_rejected() {
        let cfg = ScoringConfig {
            provider: "mock".into(),
            threshold: 10.5,
            ..Default::default()
        };
        assert!(matches!(cfg.validate(), Err(PipelineError::ConfigInvalid(_))));
    }

    #[test]
    fn unknown_provider_is_rejected() {
        let mut cfg = ScoringConfig {
            provider: "Gemini".into(),
            ..Default::default()
        };
        let err = cfg.resolve().unwrap_err();
        assert!(err.to_string().contains("gemini"));
    }
}
