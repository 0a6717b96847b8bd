//! Youtubingest — turn a YouTube reference into an LLM-ready text digest.
//!
//! The ingestion core resolves a URL or search term into an ordered set of
//! videos, retrieves metadata and transcripts under strict quota constraints,
//! normalizes the text, and assembles a single digest document:
//!
//! - [`engine::IngestionEngine`] — the orchestrator behind `ingest`
//! - [`youtube_api::YouTubeApiClient`] — quota-accounted Data API v3 client
//! - [`transcript::TranscriptSource`] — caption retrieval and formatting
//! - [`cache::BoundedLru`] / [`cache_registry::CacheRegistry`] — layered
//!   caches with memory-pressure eviction
//! - [`token_counter::TokenCounter`] — lazy BPE token counting

pub mod cache;
pub mod cache_registry;
pub mod circuit_breaker;
pub mod classify;
pub mod config;
pub mod digest;
pub mod engine;
pub mod error;
pub mod memory_monitor;
pub mod models;
pub mod text;
pub mod token_counter;
pub mod transcript;
pub mod youtube_api;

pub use config::Config;
pub use engine::IngestionEngine;
pub use error::{ErrorResponse, IngestError};
pub use models::{IngestRequest, IngestResult, SourceKind, VideoRecord};
