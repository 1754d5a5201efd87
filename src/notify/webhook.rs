use anyhow::{anyhow, Result};
use base64::Engine;
use hmac::{Hmac, Mac};
use reqwest::Client;
use serde::Serialize;
use sha2::Sha256;
use std::time::Duration;

use super::Notifier;
use crate::config::{Secret, WebhookConfig, WebhookKind};
use crate::digest::{render, Digest};
use crate::retry::RetryPolicy;

const DISCORD_CONTENT_LIMIT: usize = 2_000;

#[derive(Serialize)]
struct SlackPayload<'a> {
    text: &'a str,
}

#[derive(Serialize)]
struct DiscordPayload {
    content: String,
}

#[derive(Serialize)]
struct FeishuText<'a> {
    text: &'a str,
}

#[derive(Serialize)]
struct FeishuPayload<'a> {
    msg_type: &'static str,
    content: FeishuText<'a>,
    #[serde(skip_serializing_if = "Option::is_none")]
    timestamp: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    sign: Option<String>,
}

/// Feishu custom-bot signature: HMAC-SHA256 keyed with "timestamp\nsecret"
/// over an empty message, base64 encoded.
pub fn feishu_sign(secret: &str, timestamp: i64) -> Result<String> {
    let key = format!("{timestamp}\n{secret}");
    let mac = Hmac::<Sha256>::new_from_slice(key.as_bytes())
        .map_err(|e| anyhow!("feishu signing key rejected: {e}"))?;
    Ok(base64::engine::general_purpose::STANDARD.encode(mac.finalize().into_bytes()))
}

pub struct WebhookNotifier {
    kind: WebhookKind,
    name: String,
    url: Secret,
    secret: Option<Secret>,
    max_papers: usize,
    send_when_empty: bool,
    client: Client,
    retry: RetryPolicy,
}

impl WebhookNotifier {
    pub fn from_config(cfg: &WebhookConfig) -> Result<Self> {
        let client = Client::builder().timeout(Duration::from_secs(10)).build()?;
        Ok(Self {
            kind: cfg.kind,
            name: format!("webhook:{}", cfg.kind.as_str()),
            url: cfg.url.clone(),
            secret: cfg.secret.clone().filter(|s| !s.is_empty()),
            max_papers: cfg.max_papers,
            send_when_empty: cfg.send_when_empty,
            client,
            retry: RetryPolicy::default(),
        })
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// JSON body for this channel kind; `now_ts` is only used for Feishu signing.
    pub fn payload(&self, digest: &Digest, now_ts: i64) -> Result<serde_json::Value> {
        let text = render::render_webhook_text(digest, self.max_papers);
        let value = match self.kind {
            WebhookKind::Slack => serde_json::to_value(SlackPayload { text: &text })?,
            WebhookKind::Discord => serde_json::to_value(DiscordPayload {
                content: crate::score::prompt::truncate_chars(&text, DISCORD_CONTENT_LIMIT - 3),
            })?,
            WebhookKind::Feishu => {
                let sign = self
                    .secret
                    .as_ref()
                    .map(|s| feishu_sign(s.expose(), now_ts))
                    .transpose()?;
                serde_json::to_value(FeishuPayload {
                    msg_type: "text",
                    content: FeishuText { text: &text },
                    timestamp: sign.as_ref().map(|_| now_ts.to_string()),
                    sign,
                })?
            }
        };
        Ok(value)
    }

    async fn post_once(&self, body: &serde_json::Value) -> Result<(), Attempt> {
        let rsp = self
            .client
            .post(self.url.expose())
            .json(body)
            .send()
            .await
            .map_err(|e| Attempt::Retry(format!("request failed: {}", e.without_url())))?;

        let status = rsp.status();
        if status.as_u16() == 429 || status.is_server_error() {
            return Err(Attempt::Retry(format!("HTTP {status}")));
        }
        if !status.is_success() {
            return Err(Attempt::Fatal(format!("HTTP {status}")));
        }
        if self.kind == WebhookKind::Feishu {
            let text = rsp.text().await.unwrap_or_default();
            check_feishu_response(&text).map_err(Attempt::Fatal)?;
        }
        Ok(())
    }
}

enum Attempt {
    Retry(String),
    Fatal(String),
}

/// Feishu answers 200 even on rejection; the body carries the verdict.
fn check_feishu_response(body: &str) -> Result<(), String> {
    let Ok(v) = serde_json::from_str::<serde_json::Value>(body) else {
        return Ok(());
    };
    let code = v
        .get("StatusCode")
        .or_else(|| v.get("code"))
        .and_then(|c| c.as_i64())
        .unwrap_or(0);
    if code == 0 {
        Ok(())
    } else {
        let msg = v
            .get("msg")
            .or_else(|| v.get("StatusMessage"))
            .and_then(|m| m.as_str())
            .unwrap_or("unknown error");
        Err(format!("feishu rejected message (code {code}): {msg}"))
    }
}

#[async_trait::async_trait]
impl Notifier for WebhookNotifier {
    fn name(&self) -> &str {
        &self.name
    }

    fn send_when_empty(&self) -> bool {
        self.send_when_empty
    }

    async fn deliver(&self, digest: &Digest) -> Result<()> {
        let body = self.payload(digest, chrono::Utc::now().timestamp())?;
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            match self.post_once(&body).await {
                Ok(()) => return Ok(()),
                Err(Attempt::Retry(reason)) if self.retry.can_retry(attempt) => {
                    tracing::warn!(channel = %self.name, attempt, reason = %reason, "webhook failed, retrying");
                    self.retry.backoff(attempt, None).await;
                }
                Err(Attempt::Retry(reason)) | Err(Attempt::Fatal(reason)) => {
                    return Err(anyhow!("{} webhook failed after {attempt} attempt(s): {reason}", self.kind.as_str()));
                }
            }
        }
    }
}
