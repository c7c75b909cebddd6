//! Article persistence.
//!
//! The relational store is the only shared mutable resource in the pipeline. Its unique `link`
//! constraint is the deduplication mechanism across parallel partitions: writers insert
//! optimistically and treat a constraint violation as "already present".

pub mod codec;
pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

pub use codec::{EncodedVector, VectorCodecError};
pub use memory::MemoryStore;
pub use postgres::PostgresStore;

/// Errors raised by article stores.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Another row already owns this link.
    #[error("article with link {link} already exists")]
    UniqueViolation {
        /// Conflicting link.
        link: String,
    },
    /// Driver or connection failure.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    /// The store rejected the operation for another reason.
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// An article ready for insertion; the store assigns `id` and `created_at`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewArticle {
    /// Display title.
    pub title: String,
    /// Canonical source link, globally unique.
    pub link: String,
    /// Publication time.
    pub published_at: DateTime<Utc>,
    /// Category label.
    pub category: String,
    /// Publisher-derived identifier.
    pub guid: String,
    /// Scraped or feed-supplied body text.
    pub description: Option<String>,
    /// Lead image.
    pub image_url: Option<String>,
}

/// A persisted article.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ArticleRecord {
    /// Surrogate key, monotonic in insertion order.
    pub id: i64,
    /// Display title.
    pub title: String,
    /// Canonical source link.
    pub link: String,
    /// Publication time.
    pub published_at: DateTime<Utc>,
    /// Category label.
    pub category: String,
    /// Publisher-derived identifier.
    pub guid: String,
    /// Body text.
    pub description: Option<String>,
    /// Lead image.
    pub image_url: Option<String>,
    /// Abstractive summary, set once by the summarize stage.
    pub summary: Option<String>,
    /// Summary embedding, set once by the embed stage.
    pub summary_vector: Option<EncodedVector>,
    /// Insertion time.
    pub created_at: DateTime<Utc>,
    /// Time the record was last pushed to the search index.
    pub indexed_at: Option<DateTime<Utc>>,
}

/// Eligibility filters used by the range-partitioned stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ArticlePredicate {
    /// No summary yet.
    MissingSummary,
    /// Summarized but not embedded.
    MissingVector,
    /// Embedded but not yet pushed to the search index.
    PendingIndex,
}

impl ArticlePredicate {
    /// SQL condition over the `articles` table.
    pub fn sql_condition(self) -> &'static str {
        match self {
            Self::MissingSummary => "summary IS NULL",
            Self::MissingVector => "summary IS NOT NULL AND summary_vector IS NULL",
            Self::PendingIndex => "summary_vector IS NOT NULL AND indexed_at IS NULL",
        }
    }

    /// In-process evaluation of the same condition.
    pub fn matches(self, record: &ArticleRecord) -> bool {
        match self {
            Self::MissingSummary => record.summary.is_none(),
            Self::MissingVector => record.summary.is_some() && record.summary_vector.is_none(),
            Self::PendingIndex => record.summary_vector.is_some() && record.indexed_at.is_none(),
        }
    }
}

/// Per-row outcome of a batch insert: the new id, or the row's own (non-fatal) error.
pub type RowOutcome = Result<i64, StoreError>;

/// Storage collaborator used by every stage.
#[async_trait]
pub trait ArticleStore: Send + Sync {
    /// Whether an article with `link` is already stored.
    async fn exists_by_link(&self, link: &str) -> Result<bool, StoreError>;

    /// Insert `articles` in one transaction.
    ///
    /// A unique violation only rolls back its own row and is reported in that row's
    /// [`RowOutcome`]; any other failure aborts the whole batch.
    async fn insert_batch(&self, articles: &[NewArticle]) -> Result<Vec<RowOutcome>, StoreError>;

    /// Smallest and largest id matching `predicate`, or `None` when nothing matches.
    async fn id_bounds(&self, predicate: ArticlePredicate)
    -> Result<Option<(i64, i64)>, StoreError>;

    /// Up to `limit` matching records with `after_id < id <= end`, ascending by id.
    async fn fetch_range(
        &self,
        predicate: ArticlePredicate,
        after_id: i64,
        end: i64,
        limit: usize,
    ) -> Result<Vec<ArticleRecord>, StoreError>;

    /// Fill `summary` for rows that do not have one yet; returns rows changed.
    async fn update_summaries(&self, updates: &[(i64, String)]) -> Result<usize, StoreError>;

    /// Fill `summary_vector` for rows that do not have one yet; returns rows changed.
    async fn update_vectors(&self, updates: &[(i64, EncodedVector)]) -> Result<usize, StoreError>;

    /// Stamp `indexed_at` on the given rows; returns rows changed.
    async fn mark_indexed(&self, ids: &[i64], at: DateTime<Utc>) -> Result<usize, StoreError>;
}
