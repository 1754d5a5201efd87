// src/ingest/providers/mod.rs
pub mod arxiv;

pub use arxiv::ArxivProvider;
