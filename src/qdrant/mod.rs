//! Qdrant search index integration.

pub mod client;
pub mod payload;
pub mod types;

use async_trait::async_trait;

pub use client::QdrantService;
pub use payload::point_id_for_link;
pub use types::{IndexDocument, IndexSummary, QdrantError};

/// Search index collaborator: accepts bulk upserts of denormalized documents.
///
/// Delivery is at-least-once; point ids derive from the article link so repeated upserts
/// overwrite rather than duplicate.
#[async_trait]
pub trait SearchIndex: Send + Sync {
    /// Upsert `documents`, returning how many points were written.
    async fn upsert(&self, documents: &[IndexDocument]) -> Result<IndexSummary, QdrantError>;
}
