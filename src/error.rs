// src/error.rs
//! Run-level error taxonomy.
//!
//! Only `ConfigInvalid` aborts a run. Fetch and delivery problems are carried as
//! values so the run can still report what it found; per-candidate scoring
//! failures never surface here at all (see `score::ScoreStatus`).

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    /// Fatal: raised before any fetch or scoring call is issued.
    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),

    /// Every category query failed; the run continues with zero candidates.
    #[error("fetching candidates failed: {0}")]
    FetchFailed(String),

    /// A delivery channel failed after scoring completed.
    #[error("delivery via {channel} failed: {reason}")]
    DeliveryFailed { channel: String, reason: String },
}

impl PipelineError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::ConfigInvalid(msg.into())
    }
}

pub type Result<T, E = PipelineError> = std::result::Result<T, E>;
