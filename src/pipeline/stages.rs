//! Readers, processors and writers for the four pipeline stages.
//!
//! | stage     | reader                  | processor            | writer              |
//! |-----------|-------------------------|----------------------|---------------------|
//! | collect   | [`SourceFeedReader`]    | [`CollectProcessor`] | [`IdempotentWriter`] |
//! | summarize | [`RangeReader`]         | [`SummarizeProcessor`] | [`SummaryWriter`] |
//! | embed     | [`RangeReader`]         | [`EmbedProcessor`]   | [`VectorWriter`]    |
//! | index     | [`RangeReader`]         | [`IndexProcessor`]   | [`IndexWriter`]     |
//!
//! [`IdempotentWriter`]: crate::pipeline::writer::IdempotentWriter

use crate::catalog::SourceDescriptor;
use crate::embedding::EmbeddingClient;
use crate::feed::{FeedClient, RawEntry};
use crate::mapping::{MappingRegistry, SourceMapper};
use crate::pipeline::error::StageError;
use crate::pipeline::executor::{ItemProcessor, ItemReader, ItemWriter};
use crate::qdrant::{IndexDocument, SearchIndex};
use crate::scrape::ArticleScraper;
use crate::store::{ArticlePredicate, ArticleRecord, ArticleStore, EncodedVector, NewArticle};
use crate::summarization::{SummarizationClient, SummarizationRequest, build_summary_prompt};
use crate::tokens::{EMBEDDING_INPUT_TOKENS, SUMMARY_INPUT_TOKENS, truncate_to_tokens};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::VecDeque;
use std::sync::Arc;

/// Items per chunk for the collect stage.
pub const COLLECT_CHUNK_SIZE: usize = 10;
/// Items per chunk for the summarize stage.
pub const SUMMARIZE_CHUNK_SIZE: usize = 10;
/// Items per chunk for the embed stage.
pub const EMBED_CHUNK_SIZE: usize = 50;
/// Items per chunk for the index stage.
pub const INDEX_CHUNK_SIZE: usize = 100;

/// One feed entry with the source and strategy it was read under.
#[derive(Clone)]
pub struct CollectItem {
    /// Source the entry came from.
    pub source: Arc<SourceDescriptor>,
    /// Strategy resolved for that source.
    pub mapper: Arc<dyn SourceMapper>,
    /// The entry itself.
    pub entry: RawEntry,
}

/// Reads the feeds of a partition's sources, one source at a time.
pub struct SourceFeedReader {
    sources: Vec<Arc<SourceDescriptor>>,
    mappers: Option<Vec<Arc<dyn SourceMapper>>>,
    registry: Arc<MappingRegistry>,
    feeds: Arc<dyn FeedClient>,
    position: usize,
    buffer: VecDeque<CollectItem>,
}

impl SourceFeedReader {
    /// Reader over `sources`, resolving mappers from `registry` on first read.
    pub fn new(
        sources: Vec<SourceDescriptor>,
        registry: Arc<MappingRegistry>,
        feeds: Arc<dyn FeedClient>,
    ) -> Self {
        Self {
            sources: sources.into_iter().map(Arc::new).collect(),
            mappers: None,
            registry,
            feeds,
            position: 0,
            buffer: VecDeque::new(),
        }
    }

    fn resolve_mappers(&mut self) -> Result<(), StageError> {
        if self.mappers.is_none() {
            let mappers = self
                .sources
                .iter()
                .map(|source| self.registry.resolve(&source.mapper_key))
                .collect::<Result<Vec<_>, _>>()?;
            self.mappers = Some(mappers);
        }
        Ok(())
    }
}

#[async_trait]
impl ItemReader for SourceFeedReader {
    type Item = CollectItem;

    async fn read_chunk(&mut self, max: usize) -> Result<Vec<CollectItem>, StageError> {
        self.resolve_mappers()?;

        while self.buffer.len() < max && self.position < self.sources.len() {
            let source = Arc::clone(&self.sources[self.position]);
            let mapper = match &self.mappers {
                Some(mappers) => Arc::clone(&mappers[self.position]),
                None => break,
            };
            match self.feeds.fetch(&source.url).await {
                Ok(entries) => {
                    tracing::debug!(
                        url = %source.url,
                        publisher = %source.publisher,
                        entries = entries.len(),
                        "Feed read"
                    );
                    self.buffer
                        .extend(entries.into_iter().map(|entry| CollectItem {
                            source: Arc::clone(&source),
                            mapper: Arc::clone(&mapper),
                            entry,
                        }));
                    self.position += 1;
                }
                // Hand out what is already buffered; the failed fetch repeats on the next call.
                Err(_) if !self.buffer.is_empty() => break,
                Err(error) => return Err(error.into()),
            }
        }

        let take = max.min(self.buffer.len());
        Ok(self.buffer.drain(..take).collect())
    }

    fn skip_failed(&mut self) -> bool {
        if self.position < self.sources.len() {
            tracing::warn!(url = %self.sources[self.position].url, "Skipping unreadable feed");
            self.position += 1;
            true
        } else {
            false
        }
    }
}

/// Maps an entry, filters links already stored, and fills in body text and image.
pub struct CollectProcessor {
    store: Arc<dyn ArticleStore>,
    scraper: Arc<dyn ArticleScraper>,
    require_image: bool,
}

impl CollectProcessor {
    /// Processor writing through `store` and scraping with `scraper`.
    pub fn new(
        store: Arc<dyn ArticleStore>,
        scraper: Arc<dyn ArticleScraper>,
        require_image: bool,
    ) -> Self {
        Self {
            store,
            scraper,
            require_image,
        }
    }
}

#[async_trait]
impl ItemProcessor for CollectProcessor {
    type Input = CollectItem;
    type Output = NewArticle;

    async fn process(&self, item: &CollectItem) -> Result<Option<NewArticle>, StageError> {
        let CollectItem {
            source,
            mapper,
            entry,
        } = item;

        let link = mapper
            .extract_link(entry)
            .ok_or_else(|| StageError::MissingLink {
                id: entry.id.clone(),
            })?;

        if self.store.exists_by_link(&link).await? {
            return Ok(None);
        }

        let (content, scraped_image) = if source.has_full_content {
            (mapper.extract_description(entry).unwrap_or_default(), None)
        } else {
            let page = self.scraper.scrape(&link).await?;
            (page.content, page.image_url)
        };

        if content.trim().is_empty() {
            return Err(StageError::EmptyArticleContent { link });
        }

        let image_url = entry.image_url.clone().or(scraped_image);
        if self.require_image && image_url.is_none() {
            return Err(StageError::EmptyArticleImage { link });
        }

        Ok(Some(NewArticle {
            title: mapper.extract_title(entry),
            published_at: mapper.extract_published_at(entry),
            category: mapper.extract_category(entry, source),
            guid: mapper.extract_guid(entry, source),
            description: Some(content),
            image_url,
            link,
        }))
    }
}

/// Keyset reader over one id range of stored articles matching a predicate.
pub struct RangeReader {
    store: Arc<dyn ArticleStore>,
    predicate: ArticlePredicate,
    after_id: i64,
    end: i64,
}

impl RangeReader {
    /// Reader over ids in `start..=end`.
    pub fn new(
        store: Arc<dyn ArticleStore>,
        predicate: ArticlePredicate,
        start: i64,
        end: i64,
    ) -> Self {
        Self {
            store,
            predicate,
            after_id: start.saturating_sub(1),
            end,
        }
    }
}

#[async_trait]
impl ItemReader for RangeReader {
    type Item = ArticleRecord;

    async fn read_chunk(&mut self, max: usize) -> Result<Vec<ArticleRecord>, StageError> {
        let records = self
            .store
            .fetch_range(self.predicate, self.after_id, self.end, max)
            .await?;
        if let Some(last) = records.last() {
            self.after_id = last.id;
        }
        Ok(records)
    }
}

/// Calls the summarizer for one article.
pub struct SummarizeProcessor {
    client: Arc<dyn SummarizationClient>,
    model: String,
    max_words: usize,
}

impl SummarizeProcessor {
    /// Processor using `client` with `model` and a word budget.
    pub fn new(client: Arc<dyn SummarizationClient>, model: String, max_words: usize) -> Self {
        Self {
            client,
            model,
            max_words,
        }
    }
}

#[async_trait]
impl ItemProcessor for SummarizeProcessor {
    type Input = ArticleRecord;
    type Output = (i64, String);

    async fn process(&self, record: &ArticleRecord) -> Result<Option<(i64, String)>, StageError> {
        let body = record
            .description
            .as_deref()
            .map(str::trim)
            .filter(|body| !body.is_empty())
            .ok_or_else(|| StageError::EmptyArticleContent {
                link: record.link.clone(),
            })?;

        let body = truncate_to_tokens(body, SUMMARY_INPUT_TOKENS);
        let summary = self
            .client
            .generate_summary(SummarizationRequest {
                model: self.model.clone(),
                prompt: build_summary_prompt(&record.title, &body, self.max_words),
                max_words: self.max_words,
            })
            .await?;
        Ok(Some((record.id, summary)))
    }
}

/// Persists summaries for a chunk.
pub struct SummaryWriter {
    store: Arc<dyn ArticleStore>,
}

impl SummaryWriter {
    /// Writer over `store`.
    pub fn new(store: Arc<dyn ArticleStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl ItemWriter for SummaryWriter {
    type Item = (i64, String);

    async fn write(&self, items: &[(i64, String)]) -> Result<usize, StageError> {
        Ok(self.store.update_summaries(items).await?)
    }
}

/// Embeds one article summary.
pub struct EmbedProcessor {
    client: Arc<dyn EmbeddingClient>,
}

impl EmbedProcessor {
    /// Processor using `client`.
    pub fn new(client: Arc<dyn EmbeddingClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ItemProcessor for EmbedProcessor {
    type Input = ArticleRecord;
    type Output = (i64, EncodedVector);

    async fn process(
        &self,
        record: &ArticleRecord,
    ) -> Result<Option<(i64, EncodedVector)>, StageError> {
        let Some(summary) = record.summary.as_deref() else {
            return Ok(None);
        };
        let text = truncate_to_tokens(summary, EMBEDDING_INPUT_TOKENS).into_owned();
        let vector = self
            .client
            .generate_embeddings(vec![text])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| StageError::ExternalApi("embedding provider returned no vector".into()))?;
        Ok(Some((record.id, EncodedVector::encode(&vector)?)))
    }
}

/// Persists vectors for a chunk.
pub struct VectorWriter {
    store: Arc<dyn ArticleStore>,
}

impl VectorWriter {
    /// Writer over `store`.
    pub fn new(store: Arc<dyn ArticleStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl ItemWriter for VectorWriter {
    type Item = (i64, EncodedVector);

    async fn write(&self, items: &[(i64, EncodedVector)]) -> Result<usize, StageError> {
        Ok(self.store.update_vectors(items).await?)
    }
}

/// Decodes the stored vector and denormalizes a record for the search index.
pub struct IndexProcessor {
    dimension: usize,
}

impl IndexProcessor {
    /// Processor expecting vectors of `dimension` components.
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }
}

#[async_trait]
impl ItemProcessor for IndexProcessor {
    type Input = ArticleRecord;
    type Output = IndexDocument;

    async fn process(&self, record: &ArticleRecord) -> Result<Option<IndexDocument>, StageError> {
        let (Some(summary), Some(encoded)) = (&record.summary, &record.summary_vector) else {
            return Ok(None);
        };
        let vector = encoded.decode(Some(self.dimension))?;
        Ok(Some(IndexDocument {
            article_id: record.id,
            link: record.link.clone(),
            title: record.title.clone(),
            category: record.category.clone(),
            guid: record.guid.clone(),
            published_at: record.published_at,
            summary: summary.clone(),
            image_url: record.image_url.clone(),
            vector,
        }))
    }
}

/// Upserts documents to the search index, then stamps them as indexed.
pub struct IndexWriter {
    store: Arc<dyn ArticleStore>,
    index: Arc<dyn SearchIndex>,
}

impl IndexWriter {
    /// Writer pushing to `index` and recording progress in `store`.
    pub fn new(store: Arc<dyn ArticleStore>, index: Arc<dyn SearchIndex>) -> Self {
        Self { store, index }
    }
}

#[async_trait]
impl ItemWriter for IndexWriter {
    type Item = IndexDocument;

    async fn write(&self, items: &[IndexDocument]) -> Result<usize, StageError> {
        let summary = self.index.upsert(items).await?;
        let ids: Vec<i64> = items.iter().map(|document| document.article_id).collect();
        self.store.mark_indexed(&ids, Utc::now()).await?;
        Ok(summary.upserted)
    }
}
