// src/lib.rs
// Public library surface for the binary and integration tests.

pub mod config;
pub mod digest;
pub mod error;
pub mod ingest;
pub mod metrics;
pub mod notify;
pub mod pipeline;
pub mod prefilter;
pub mod profile;
pub mod retry;
pub mod score;

// ---- Re-exports for stable public API ----
pub use crate::config::{AppConfig, Features};
pub use crate::digest::{aggregate, Digest, DigestEntry};
pub use crate::error::PipelineError;
pub use crate::pipeline::{Pipeline, RunOptions, RunReport};
pub use crate::profile::InterestProfile;
pub use crate::score::{ScoreResult, ScoreStatus, Scorer};
