#![deny(missing_docs)]

//! Core library for the newsdigest ingestion pipeline.

/// HTTP routing and control handlers.
pub mod api;
/// Feed source catalog.
pub mod catalog;
/// Environment-driven configuration management.
pub mod config;
/// Embedding client abstraction and adapters.
pub mod embedding;
/// Feed transport and parsing.
pub mod feed;
/// Structured logging and tracing setup.
pub mod logging;
/// Per-publisher entry mapping.
pub mod mapping;
/// Pipeline metrics helpers.
pub mod metrics;
/// Work partitioning.
pub mod partition;
/// Chunked stages and the jobs built from them.
pub mod pipeline;
/// Qdrant search index integration.
pub mod qdrant;
/// Retry with classification and cancellable backoff.
pub mod retry;
/// Job run-state control and triggers.
pub mod scheduler;
/// Article page scraping.
pub mod scrape;
/// Control surface shared by HTTP and CLI.
pub mod service;
/// Article storage.
pub mod store;
/// Summarization client abstraction and adapters.
pub mod summarization;
/// Token-budget truncation for model inputs.
pub mod tokens;
