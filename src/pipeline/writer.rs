//! Conflict-safe article persistence.

use crate::pipeline::error::StageError;
use crate::pipeline::executor::ItemWriter;
use crate::store::{ArticleStore, NewArticle, StoreError};
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Arc;

/// Inserts articles that are not yet stored and reports only the genuinely new ones.
///
/// Existence is checked by link first; a unique violation raised by a concurrent partition (or a
/// duplicate entry within the same feed) is treated as "already present" and never surfaces as an
/// error.
#[derive(Clone)]
pub struct IdempotentWriter {
    store: Arc<dyn ArticleStore>,
}

impl IdempotentWriter {
    /// Writer over `store`.
    pub fn new(store: Arc<dyn ArticleStore>) -> Self {
        Self { store }
    }

    /// Persist `items`, returning the number of new rows.
    pub async fn write_batch(&self, items: &[NewArticle]) -> Result<usize, StoreError> {
        let mut seen = HashSet::new();
        let mut pending = Vec::with_capacity(items.len());
        for item in items {
            if !seen.insert(item.link.as_str()) {
                continue;
            }
            if self.store.exists_by_link(&item.link).await? {
                tracing::debug!(link = %item.link, "Article already stored");
                continue;
            }
            pending.push(item.clone());
        }

        if pending.is_empty() {
            return Ok(0);
        }

        let mut written = 0;
        for outcome in self.store.insert_batch(&pending).await? {
            match outcome {
                Ok(_) => written += 1,
                Err(StoreError::UniqueViolation { link }) => {
                    tracing::debug!(link = %link, "Lost insert race; article already stored");
                }
                Err(error) => return Err(error),
            }
        }
        Ok(written)
    }
}

#[async_trait]
impl ItemWriter for IdempotentWriter {
    type Item = NewArticle;

    async fn write(&self, items: &[NewArticle]) -> Result<usize, StageError> {
        Ok(self.write_batch(items).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{
        ArticlePredicate, ArticleRecord, EncodedVector, MemoryStore, RowOutcome,
    };
    use chrono::{DateTime, Utc};

    fn article(link: &str) -> NewArticle {
        NewArticle {
            title: "Headline".into(),
            link: link.into(),
            published_at: Utc::now(),
            category: "World".into(),
            guid: "bb1".into(),
            description: Some("Body".into()),
            image_url: None,
        }
    }

    #[tokio::test]
    async fn writing_the_same_link_twice_counts_once() {
        let store = Arc::new(MemoryStore::new());
        let writer = IdempotentWriter::new(store.clone());

        let first = writer.write_batch(&[article("https://a.example/1")]).await;
        let second = writer.write_batch(&[article("https://a.example/1")]).await;

        assert_eq!(first.expect("first write"), 1);
        assert_eq!(second.expect("second write"), 0);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn duplicates_within_a_batch_are_collapsed() {
        let store = Arc::new(MemoryStore::new());
        let writer = IdempotentWriter::new(store.clone());

        let written = writer
            .write_batch(&[
                article("https://a.example/1"),
                article("https://a.example/2"),
                article("https://a.example/1"),
            ])
            .await
            .expect("write");
        assert_eq!(written, 2);
    }

    /// Reports every link as absent, so inserts race into the unique constraint.
    struct RacingStore {
        inner: MemoryStore,
    }

    #[async_trait]
    impl ArticleStore for RacingStore {
        async fn exists_by_link(&self, _link: &str) -> Result<bool, StoreError> {
            Ok(false)
        }
        async fn insert_batch(
            &self,
            articles: &[NewArticle],
        ) -> Result<Vec<RowOutcome>, StoreError> {
            self.inner.insert_batch(articles).await
        }
        async fn id_bounds(
            &self,
            predicate: ArticlePredicate,
        ) -> Result<Option<(i64, i64)>, StoreError> {
            self.inner.id_bounds(predicate).await
        }
        async fn fetch_range(
            &self,
            predicate: ArticlePredicate,
            after_id: i64,
            end: i64,
            limit: usize,
        ) -> Result<Vec<ArticleRecord>, StoreError> {
            self.inner.fetch_range(predicate, after_id, end, limit).await
        }
        async fn update_summaries(&self, updates: &[(i64, String)]) -> Result<usize, StoreError> {
            self.inner.update_summaries(updates).await
        }
        async fn update_vectors(
            &self,
            updates: &[(i64, EncodedVector)],
        ) -> Result<usize, StoreError> {
            self.inner.update_vectors(updates).await
        }
        async fn mark_indexed(&self, ids: &[i64], at: DateTime<Utc>) -> Result<usize, StoreError> {
            self.inner.mark_indexed(ids, at).await
        }
    }

    #[tokio::test]
    async fn unique_violations_are_swallowed() {
        let store = Arc::new(RacingStore {
            inner: MemoryStore::new(),
        });
        let writer = IdempotentWriter::new(store.clone());

        assert_eq!(
            writer
                .write_batch(&[article("https://a.example/1")])
                .await
                .expect("first"),
            1
        );
        assert_eq!(
            writer
                .write_batch(&[article("https://a.example/1"), article("https://a.example/2")])
                .await
                .expect("second"),
            1
        );
        assert_eq!(store.inner.len(), 2);
    }
}
