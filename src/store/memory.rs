//! In-process article store used by tests and dry runs.

use super::{
    ArticlePredicate, ArticleRecord, ArticleStore, EncodedVector, NewArticle, RowOutcome,
    StoreError,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};

#[derive(Default)]
struct Tables {
    rows: BTreeMap<i64, ArticleRecord>,
    by_link: HashMap<String, i64>,
    next_id: i64,
}

/// Article store backed by a mutex-guarded map, enforcing the unique link constraint.
#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    /// An empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Snapshot of every stored record in id order.
    pub fn records(&self) -> Vec<ArticleRecord> {
        self.lock().rows.values().cloned().collect()
    }

    /// Number of stored records.
    pub fn len(&self) -> usize {
        self.lock().rows.len()
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.lock().rows.is_empty()
    }
}

#[async_trait]
impl ArticleStore for MemoryStore {
    async fn exists_by_link(&self, link: &str) -> Result<bool, StoreError> {
        Ok(self.lock().by_link.contains_key(link))
    }

    async fn insert_batch(&self, articles: &[NewArticle]) -> Result<Vec<RowOutcome>, StoreError> {
        let mut tables = self.lock();
        let outcomes = articles
            .iter()
            .map(|article| {
                if tables.by_link.contains_key(&article.link) {
                    return Err(StoreError::UniqueViolation {
                        link: article.link.clone(),
                    });
                }
                tables.next_id += 1;
                let id = tables.next_id;
                tables.by_link.insert(article.link.clone(), id);
                tables.rows.insert(
                    id,
                    ArticleRecord {
                        id,
                        title: article.title.clone(),
                        link: article.link.clone(),
                        published_at: article.published_at,
                        category: article.category.clone(),
                        guid: article.guid.clone(),
                        description: article.description.clone(),
                        image_url: article.image_url.clone(),
                        summary: None,
                        summary_vector: None,
                        created_at: Utc::now(),
                        indexed_at: None,
                    },
                );
                Ok(id)
            })
            .collect();
        Ok(outcomes)
    }

    async fn id_bounds(
        &self,
        predicate: ArticlePredicate,
    ) -> Result<Option<(i64, i64)>, StoreError> {
        let tables = self.lock();
        let mut matching = tables
            .rows
            .values()
            .filter(|record| predicate.matches(record))
            .map(|record| record.id);
        let Some(first) = matching.next() else {
            return Ok(None);
        };
        let last = matching.last().unwrap_or(first);
        Ok(Some((first, last)))
    }

    async fn fetch_range(
        &self,
        predicate: ArticlePredicate,
        after_id: i64,
        end: i64,
        limit: usize,
    ) -> Result<Vec<ArticleRecord>, StoreError> {
        if after_id >= end {
            return Ok(Vec::new());
        }
        let tables = self.lock();
        Ok(tables
            .rows
            .range(after_id + 1..=end)
            .map(|(_, record)| record)
            .filter(|record| predicate.matches(record))
            .take(limit)
            .cloned()
            .collect())
    }

    async fn update_summaries(&self, updates: &[(i64, String)]) -> Result<usize, StoreError> {
        let mut tables = self.lock();
        let mut changed = 0;
        for (id, summary) in updates {
            if let Some(record) = tables.rows.get_mut(id)
                && record.summary.is_none()
            {
                record.summary = Some(summary.clone());
                changed += 1;
            }
        }
        Ok(changed)
    }

    async fn update_vectors(&self, updates: &[(i64, EncodedVector)]) -> Result<usize, StoreError> {
        let mut tables = self.lock();
        let mut changed = 0;
        for (id, vector) in updates {
            if let Some(record) = tables.rows.get_mut(id)
                && record.summary_vector.is_none()
            {
                record.summary_vector = Some(vector.clone());
                changed += 1;
            }
        }
        Ok(changed)
    }

    async fn mark_indexed(&self, ids: &[i64], at: DateTime<Utc>) -> Result<usize, StoreError> {
        let mut tables = self.lock();
        let mut changed = 0;
        for id in ids {
            if let Some(record) = tables.rows.get_mut(id) {
                record.indexed_at = Some(at);
                changed += 1;
            }
        }
        Ok(changed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn article(link: &str) -> NewArticle {
        NewArticle {
            title: format!("Title for {link}"),
            link: link.to_string(),
            published_at: Utc::now(),
            category: "World".into(),
            guid: "zz1".into(),
            description: Some("Body".into()),
            image_url: None,
        }
    }

    #[tokio::test]
    async fn duplicate_links_are_rejected_per_row() {
        let store = MemoryStore::new();
        let outcomes = store
            .insert_batch(&[article("a"), article("b"), article("a")])
            .await
            .expect("batch");

        assert!(matches!(outcomes[0], Ok(1)));
        assert!(matches!(outcomes[1], Ok(2)));
        assert!(matches!(&outcomes[2], Err(StoreError::UniqueViolation { link }) if link == "a"));
        assert_eq!(store.len(), 2);
    }

    #[tokio::test]
    async fn bounds_and_keyset_pages_follow_predicate() {
        let store = MemoryStore::new();
        let links: Vec<_> = (0..5).map(|i| article(&format!("l{i}"))).collect();
        store.insert_batch(&links).await.expect("insert");
        store
            .update_summaries(&[(1, "s".into()), (2, "s".into())])
            .await
            .expect("summaries");

        assert_eq!(
            store
                .id_bounds(ArticlePredicate::MissingSummary)
                .await
                .expect("bounds"),
            Some((3, 5))
        );
        assert_eq!(
            store
                .id_bounds(ArticlePredicate::PendingIndex)
                .await
                .expect("bounds"),
            None
        );

        let page = store
            .fetch_range(ArticlePredicate::MissingVector, 0, 5, 10)
            .await
            .expect("page");
        assert_eq!(page.iter().map(|r| r.id).collect::<Vec<_>>(), vec![1, 2]);

        let page = store
            .fetch_range(ArticlePredicate::MissingSummary, 3, 5, 1)
            .await
            .expect("page");
        assert_eq!(page.iter().map(|r| r.id).collect::<Vec<_>>(), vec![4]);
    }

    #[tokio::test]
    async fn updates_only_fill_empty_columns() {
        let store = MemoryStore::new();
        store.insert_batch(&[article("a")]).await.expect("insert");

        assert_eq!(store.update_summaries(&[(1, "first".into())]).await.expect("update"), 1);
        assert_eq!(store.update_summaries(&[(1, "second".into())]).await.expect("update"), 0);
        assert_eq!(store.records()[0].summary.as_deref(), Some("first"));
    }
}
