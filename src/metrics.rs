// src/metrics.rs
//! Prometheus recorder for one run, exported as a textfile at exit
//! (node-exporter textfile collector).

use anyhow::{Context, Result};
use metrics::{describe_gauge, gauge};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::fs;
use std::path::Path;

use crate::digest::Digest;

pub struct Metrics {
    pub handle: PrometheusHandle,
}

impl Metrics {
    /// Install the global recorder. Only one per process.
    pub fn init() -> Result<Self> {
        let handle = PrometheusBuilder::new()
            .install_recorder()
            .context("prometheus: install recorder")?;
        describe_gauge!("digest_last_run_timestamp_seconds", "Unix time the last digest was generated.");
        describe_gauge!("digest_entries", "Entries in the last digest.");
        describe_gauge!("digest_candidates", "Candidates per pipeline stage in the last run.");
        Ok(Self { handle })
    }

    pub fn render(&self) -> String {
        self.handle.render()
    }

    /// Write the exposition text next to `path` and rename it into place.
    pub fn write_textfile(&self, path: &Path) -> Result<()> {
        let tmp = path.with_extension("prom.tmp");
        fs::write(&tmp, self.render())
            .with_context(|| format!("writing metrics to {}", tmp.display()))?;
        fs::rename(&tmp, path).with_context(|| format!("moving metrics to {}", path.display()))?;
        Ok(())
    }
}

/// Per-run gauges describing the finished digest.
pub fn record_digest(digest: &Digest) {
    gauge!("digest_last_run_timestamp_seconds").set(digest.generated_at.timestamp() as f64);
    gauge!("digest_entries").set(digest.len() as f64);
    gauge!("digest_candidates", "stage" => "fetched").set(digest.stats.fetched as f64);
    gauge!("digest_candidates", "stage" => "prefiltered").set(digest.stats.prefiltered as f64);
    gauge!("digest_candidates", "stage" => "scored").set(digest.stats.scored as f64);
}
