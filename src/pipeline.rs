// src/pipeline.rs
//! One digest run: fetch -> pre-filter -> score -> aggregate -> deliver.

use chrono::{DateTime, Utc};
use std::time::Duration;
use tracing::{info, warn};

use crate::config::{AppConfig, Features};
use crate::digest::{self, Digest};
use crate::error::{PipelineError, Result};
use crate::ingest::providers::ArxivProvider;
use crate::ingest::types::PreprintSource;
use crate::ingest::{self, FetchRequest, FetchStatus};
use crate::notify::{DeliveryReport, NotifierMux};
use crate::prefilter;
use crate::profile::{self, InterestProfile};
use crate::retry::RetryPolicy;
use crate::score::ai_adapter::build_model_from_config;
use crate::score::Scorer;

/// The plain values a run needs from the configuration.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub categories: Vec<String>,
    pub keywords: Vec<String>,
    pub max_days_back: u32,
    pub max_results: usize,
    pub threshold: f32,
    pub fetch_retry: RetryPolicy,
    pub features: Features,
}

impl PipelineSettings {
    pub fn from_config(cfg: &AppConfig) -> Self {
        Self {
            categories: cfg.arxiv.categories.clone(),
            keywords: cfg.arxiv.keywords.clone(),
            max_days_back: cfg.arxiv.max_days_back,
            max_results: cfg.arxiv.max_results,
            threshold: cfg.scoring.threshold,
            fetch_retry: RetryPolicy::new(cfg.arxiv.max_attempts, Duration::from_millis(2_000)),
            features: cfg.features(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RunOptions {
    /// Score and aggregate but deliver nothing.
    pub dry_run: bool,
    /// Reference time for the fetch window and `generated_at`.
    pub now: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct RunReport {
    pub digest: Digest,
    pub fetch_status: FetchStatus,
    pub delivery: DeliveryReport,
}

impl RunReport {
    pub fn fetch_error(&self) -> Option<PipelineError> {
        match &self.fetch_status {
            FetchStatus::Failed { reason } => Some(PipelineError::FetchFailed(reason.clone())),
            _ => None,
        }
    }

    pub fn delivery_failed(&self) -> bool {
        !self.delivery.all_ok()
    }
}

pub struct Pipeline {
    settings: PipelineSettings,
    source: Box<dyn PreprintSource>,
    scorer: Scorer,
    notifiers: NotifierMux,
    profile: InterestProfile,
}

impl Pipeline {
    /// Everything that can be wrong with the configuration surfaces here,
    /// before the first network call.
    pub fn from_config(cfg: &AppConfig) -> Result<Self> {
        cfg.validate()?;
        let settings = PipelineSettings::from_config(cfg);
        let features = settings.features;
        info!(?features, "features resolved");

        let source = ArxivProvider::from_config(&cfg.arxiv)
            .map_err(|e| PipelineError::config(format!("arxiv client: {e:#}")))?;
        let model = build_model_from_config(&cfg.scoring)
            .map_err(|e| PipelineError::config(format!("scoring model: {e:#}")))?;
        let scorer = Scorer::from_config(&cfg.scoring, model);
        let notifiers = NotifierMux::from_config(cfg, features)
            .map_err(|e| PipelineError::config(format!("{e:#}")))?;

        let library = if features.library {
            cfg.library.path.as_deref()
        } else {
            None
        };
        let profile =
            profile::build_with_limit(library, &cfg.interests.description, cfg.library.sample_size);
        if profile.is_empty() {
            warn!("interest profile is empty; scores will be close to arbitrary");
        }

        Ok(Self::with_parts(settings, Box::new(source), scorer, notifiers, profile))
    }

    pub fn with_parts(
        settings: PipelineSettings,
        source: Box<dyn PreprintSource>,
        scorer: Scorer,
        notifiers: NotifierMux,
        profile: InterestProfile,
    ) -> Self {
        Self {
            settings,
            source,
            scorer,
            notifiers,
            profile,
        }
    }

    pub fn profile(&self) -> &InterestProfile {
        &self.profile
    }

    /// Never fails once constructed: fetch and delivery problems are carried
    /// in the report.
    pub async fn run(&self, opts: RunOptions) -> RunReport {
        let now = opts.now.unwrap_or_else(Utc::now);
        let s = &self.settings;

        let req = FetchRequest {
            categories: s.categories.clone(),
            max_days_back: s.max_days_back,
            max_results: s.max_results,
            now,
        };
        let fetched = ingest::fetch(self.source.as_ref(), &req, s.fetch_retry).await;
        if let FetchStatus::Failed { reason } = &fetched.status {
            warn!(reason = %reason, "no candidates could be fetched; reporting an empty digest");
        }
        let fetch_status = fetched.status;
        let n_fetched = fetched.candidates.len();

        let candidates = if s.features.keyword_prefilter {
            prefilter::filter(fetched.candidates, &s.keywords)
        } else {
            fetched.candidates
        };
        let n_prefiltered = candidates.len();

        let scored = self.scorer.score_all(candidates, &self.profile).await;
        let mut digest = digest::aggregate_at(scored, s.threshold, now);
        digest.stats.fetched = n_fetched;
        digest.stats.prefiltered = n_prefiltered;
        crate::metrics::record_digest(&digest);

        let delivery = if opts.dry_run {
            info!(channels = ?self.notifiers.channel_names(), "dry run, delivery skipped");
            DeliveryReport::default()
        } else {
            self.notifiers.deliver_all(&digest).await
        };

        info!(
            fetched = n_fetched,
            prefiltered = n_prefiltered,
            relevant = digest.len(),
            delivery_ok = delivery.all_ok(),
            "run finished"
        );
        RunReport {
            digest,
            fetch_status,
            delivery,
        }
    }
}
