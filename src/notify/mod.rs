// src/notify/mod.rs
//! Delivery channels for a finished digest.
//!
//! Channels run one after another; a failing channel is recorded in the
//! report and never unwinds the scoring work or the other channels.

pub mod email;
pub mod webhook;

use anyhow::Result;
use metrics::{counter, describe_counter};
use once_cell::sync::OnceCell;
use serde::Serialize;

use crate::config::{AppConfig, Features};
use crate::digest::Digest;
use crate::error::PipelineError;

pub use email::EmailNotifier;
pub use webhook::WebhookNotifier;

fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("digest_delivery_total", "Digest deliveries by channel and outcome.");
        describe_counter!("digest_delivery_failures_total", "Failed digest deliveries by channel.");
    });
}

#[async_trait::async_trait]
pub trait Notifier: Send + Sync {
    fn name(&self) -> &str;
    /// Deliver a digest with no entries too ("no relevant papers today").
    fn send_when_empty(&self) -> bool;
    async fn deliver(&self, digest: &Digest) -> Result<()>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum DeliveryStatus {
    Sent,
    SkippedEmpty,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChannelOutcome {
    pub channel: String,
    #[serde(flatten)]
    pub status: DeliveryStatus,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DeliveryReport {
    pub outcomes: Vec<ChannelOutcome>,
}

impl DeliveryReport {
    pub fn all_ok(&self) -> bool {
        self.failures().is_empty()
    }

    pub fn failures(&self) -> Vec<PipelineError> {
        self.outcomes
            .iter()
            .filter_map(|o| match &o.status {
                DeliveryStatus::Failed(reason) => Some(PipelineError::DeliveryFailed {
                    channel: o.channel.clone(),
                    reason: reason.clone(),
                }),
                _ => None,
            })
            .collect()
    }
}

#[derive(Default)]
pub struct NotifierMux {
    notifiers: Vec<Box<dyn Notifier>>,
}

impl NotifierMux {
    pub fn new(notifiers: Vec<Box<dyn Notifier>>) -> Self {
        Self { notifiers }
    }

    /// Builds every enabled channel. Errors here are configuration errors.
    pub fn from_config(cfg: &AppConfig, features: Features) -> Result<Self> {
        let mut notifiers: Vec<Box<dyn Notifier>> = Vec::new();
        if features.email {
            if let Some(e) = &cfg.email {
                notifiers.push(Box::new(EmailNotifier::from_config(e)?));
            }
        }
        if features.webhook {
            if let Some(w) = &cfg.webhook {
                notifiers.push(Box::new(WebhookNotifier::from_config(w)?));
            }
        }
        if notifiers.is_empty() {
            tracing::warn!("no delivery channel enabled; the digest will only be logged");
        }
        Ok(Self { notifiers })
    }

    pub fn is_empty(&self) -> bool {
        self.notifiers.is_empty()
    }

    pub fn channel_names(&self) -> Vec<&str> {
        self.notifiers.iter().map(|n| n.name()).collect()
    }

    pub async fn deliver_all(&self, digest: &Digest) -> DeliveryReport {
        ensure_metrics_described();
        let mut report = DeliveryReport::default();
        for n in &self.notifiers {
            let channel = n.name().to_string();
            let status = if digest.is_empty() && !n.send_when_empty() {
                tracing::info!(channel = %channel, "empty digest, channel skipped");
                DeliveryStatus::SkippedEmpty
            } else {
                match n.deliver(digest).await {
                    Ok(()) => {
                        tracing::info!(channel = %channel, entries = digest.len(), "digest delivered");
                        DeliveryStatus::Sent
                    }
                    Err(e) => {
                        tracing::error!(channel = %channel, error = %format!("{e:#}"), "delivery failed");
                        counter!("digest_delivery_failures_total", "channel" => channel.clone())
                            .increment(1);
                        DeliveryStatus::Failed(format!("{e:#}"))
                    }
                }
            };
            let outcome = match &status {
                DeliveryStatus::Sent => "sent",
                DeliveryStatus::SkippedEmpty => "skipped_empty",
                DeliveryStatus::Failed(_) => "failed",
            };
            counter!("digest_delivery_total", "channel" => channel.clone(), "outcome" => outcome)
                .increment(1);
            report.outcomes.push(ChannelOutcome { channel, status });
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::digest::aggregate_at;
    use chrono::Utc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct Probe {
        name: &'static str,
        fail: bool,
        when_empty: bool,
        calls: Arc<AtomicUsize>,
    }

    #[async_trait::async_trait]
    impl Notifier for Probe {
        fn name(&self) -> &str {
            self.name
        }
        fn send_when_empty(&self) -> bool {
            self.when_empty
        }
        async fn deliver(&self, _d: &Digest) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                anyhow::bail!("smtp refused");
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn failure_is_isolated_per_channel() {
        let calls = Arc::new(AtomicUsize::new(0));
        let notifiers: Vec<Box<dyn Notifier>> = vec![
            Box::new(Probe { name: "email", fail: true, when_empty: true, calls: calls.clone() }),
            Box::new(Probe { name: "webhook:slack", fail: false, when_empty: true, calls: calls.clone() }),
        ];
        let mux = NotifierMux::new(notifiers);
        let digest = aggregate_at(vec![], 7.0, Utc::now());
        let report = mux.deliver_all(&digest).await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(!report.all_ok());
        let failures = report.failures();
        assert_eq!(failures.len(), 1);
        assert!(failures[0].to_string().contains("email"));
        assert_eq!(report.outcomes[1].status, DeliveryStatus::Sent);
    }

    #[tokio::test]
    async fn empty_digest_respects_channel_preference() {
        let calls = Arc::new(AtomicUsize::new(0));
        let notifiers: Vec<Box<dyn Notifier>> = vec![Box::new(Probe {
            name: "email",
            fail: false,
            when_empty: false,
            calls: calls.clone(),
        })];
        let mux = NotifierMux::new(notifiers);
        let digest = aggregate_at(vec![], 7.0, Utc::now());
        let report = mux.deliver_all(&digest).await;
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(report.outcomes[0].status, DeliveryStatus::SkippedEmpty);
        assert!(report.all_ok());
    }
}
