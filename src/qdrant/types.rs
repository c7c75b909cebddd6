//! Shared types used by the Qdrant client and helpers.

use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors returned while interacting with Qdrant.
#[derive(Debug, Error)]
pub enum QdrantError {
    /// Base URL failed to parse or normalize.
    #[error("Invalid Qdrant URL: {0}")]
    InvalidUrl(String),
    /// HTTP layer failed before receiving a response.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    /// Qdrant responded with an unexpected status code.
    #[error("Unexpected Qdrant response ({status}): {body}")]
    UnexpectedStatus {
        /// HTTP status returned from Qdrant.
        status: StatusCode,
        /// Body payload associated with the failing response.
        body: String,
    },
}

/// Denormalized article document pushed to the search index.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IndexDocument {
    /// Relational id of the source row.
    pub article_id: i64,
    /// Canonical link; the point id is derived from it.
    pub link: String,
    /// Display title.
    pub title: String,
    /// Category label.
    pub category: String,
    /// Publisher-derived identifier.
    pub guid: String,
    /// Publication time.
    pub published_at: DateTime<Utc>,
    /// Abstractive summary.
    pub summary: String,
    /// Lead image.
    pub image_url: Option<String>,
    /// Summary embedding.
    #[serde(skip)]
    pub vector: Vec<f32>,
}

/// Summary of an upsert request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IndexSummary {
    /// Points written (inserted or overwritten).
    pub upserted: usize,
}

#[derive(Debug, Deserialize)]
pub(crate) struct CollectionInfoResponse {
    pub(crate) result: CollectionInfo,
}

#[derive(Debug, Deserialize)]
pub(crate) struct CollectionInfo {
    #[serde(default)]
    pub(crate) points_count: Option<u64>,
}
