//! Job assembly: partition the working set, then drive each partition through its stage on a
//! bounded pool of workers.

use crate::catalog::SourceCatalog;
use crate::config::Config;
use crate::embedding::EmbeddingClient;
use crate::feed::FeedClient;
use crate::mapping::MappingRegistry;
use crate::partition::{PartitionError, calculate, partition_sources};
use crate::pipeline::executor::{
    ChunkedStageExecutor, ItemProcessor, ItemWriter, RunSignals, StageSettings, StageState,
    StepReport,
};
use crate::pipeline::stages::{
    COLLECT_CHUNK_SIZE, CollectProcessor, EMBED_CHUNK_SIZE, EmbedProcessor, INDEX_CHUNK_SIZE,
    IndexProcessor, IndexWriter, RangeReader, SUMMARIZE_CHUNK_SIZE, SourceFeedReader,
    SummarizeProcessor, SummaryWriter, VectorWriter,
};
use crate::pipeline::writer::IdempotentWriter;
use crate::qdrant::SearchIndex;
use crate::retry::RetryPolicy;
use crate::scrape::ArticleScraper;
use crate::store::{ArticlePredicate, ArticleRecord, ArticleStore, StoreError};
use crate::summarization::SummarizationClient;
use futures_util::{StreamExt, stream};
use serde::Serialize;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;

/// The schedulable jobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    /// Fetch feeds and store new articles.
    Collector,
    /// Summarize stored articles lacking a summary.
    Summarizer,
    /// Embed summaries lacking a vector.
    Embedder,
    /// Push vectorized articles to the search index.
    Indexer,
}

impl JobKind {
    /// Every job, in pipeline order.
    pub const ALL: [JobKind; 4] = [
        JobKind::Collector,
        JobKind::Summarizer,
        JobKind::Embedder,
        JobKind::Indexer,
    ];

    /// Stable lowercase name used in routes, logs and run ids.
    pub fn as_str(self) -> &'static str {
        match self {
            JobKind::Collector => "collector",
            JobKind::Summarizer => "summarizer",
            JobKind::Embedder => "embedder",
            JobKind::Indexer => "indexer",
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobKind {
    type Err = UnknownJob;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        JobKind::ALL
            .into_iter()
            .find(|kind| kind.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| UnknownJob(s.to_string()))
    }
}

/// A job name that matches none of [`JobKind::ALL`].
#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown job '{0}'")]
pub struct UnknownJob(pub String);

/// Errors that prevent a job from partitioning its work at all.
#[derive(Debug, Error)]
pub enum JobError {
    /// The working-set bounds could not be read.
    #[error("failed to compute working set: {0}")]
    Store(#[from] StoreError),
    /// Partitioning rejected its inputs.
    #[error(transparent)]
    Partition(PartitionError),
}

/// Tunables shared by all jobs.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    /// Partitions per job.
    pub grid_size: usize,
    /// Partitions executed concurrently.
    pub workers: usize,
    /// Skip budget per partition.
    pub skip_limit: usize,
    /// Retry policy for reads, items and writes.
    pub retry: RetryPolicy,
    /// Whether the collector skips articles without an image.
    pub require_image: bool,
    /// Model passed to the summarizer.
    pub summarization_model: String,
    /// Word budget for summaries.
    pub summary_max_words: usize,
    /// Expected vector dimension.
    pub embedding_dimension: usize,
}

impl PipelineSettings {
    /// Settings derived from the process configuration.
    pub fn from_config(config: &Config) -> Self {
        Self {
            grid_size: config.grid_size,
            workers: config.worker_count,
            skip_limit: config.skip_limit,
            retry: RetryPolicy::new(config.retry_max_attempts, config.retry_delay),
            require_image: config.collector_require_image,
            summarization_model: config.summarization_model.clone(),
            summary_max_words: config.summarization_max_words,
            embedding_dimension: config.embedding_dimension,
        }
    }

    fn stage(&self, name: &'static str, chunk_size: usize) -> StageSettings {
        StageSettings {
            name,
            chunk_size,
            skip_limit: self.skip_limit,
            retry: self.retry,
        }
    }
}

/// Collaborators every job draws on.
#[derive(Clone)]
pub struct PipelineContext {
    /// Tunables.
    pub settings: PipelineSettings,
    /// Article storage.
    pub store: Arc<dyn ArticleStore>,
    /// Configured feeds.
    pub catalog: Arc<SourceCatalog>,
    /// Publisher strategies.
    pub mappers: Arc<MappingRegistry>,
    /// Feed transport.
    pub feeds: Arc<dyn FeedClient>,
    /// Article page scraper.
    pub scraper: Arc<dyn ArticleScraper>,
    /// Summarizer.
    pub summarizer: Arc<dyn SummarizationClient>,
    /// Embedder.
    pub embedder: Arc<dyn EmbeddingClient>,
    /// Search index.
    pub index: Arc<dyn SearchIndex>,
}

/// Outcome of one partition.
#[derive(Debug, Clone, Serialize)]
pub struct PartitionReport {
    /// Partition index within the run.
    pub index: usize,
    /// Human-readable bounds (`ids 1..=40` or `sources 0..3`).
    pub label: String,
    /// `completed` or `faulted`.
    pub state: StageState,
    /// Counters reached before the terminal state.
    pub report: StepReport,
    /// Fault description, when faulted.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Outcome of one job run.
#[derive(Debug, Clone, Serialize)]
pub struct JobReport {
    /// Job that ran.
    pub job: JobKind,
    /// Unique id of this run.
    pub run_id: String,
    /// Per-partition results, ordered by partition index.
    pub partitions: Vec<PartitionReport>,
    /// Sum over partitions.
    pub totals: StepReport,
}

impl JobReport {
    fn new(job: JobKind, run_id: &str, mut partitions: Vec<PartitionReport>) -> Self {
        partitions.sort_by_key(|partition| partition.index);
        let mut totals = StepReport::default();
        for partition in &partitions {
            totals.absorb(&partition.report);
        }
        Self {
            job,
            run_id: run_id.to_string(),
            partitions,
            totals,
        }
    }

    /// Number of partitions that faulted.
    pub fn faulted_partitions(&self) -> usize {
        self.partitions
            .iter()
            .filter(|partition| partition.state == StageState::Faulted)
            .count()
    }
}

impl PipelineContext {
    /// Run `job` once under `run_id`.
    ///
    /// An empty working set completes with no partitions. Partition faults are reported in the
    /// result; only a failure to partition at all is an error.
    pub async fn run_job(
        &self,
        job: JobKind,
        run_id: &str,
        signals: &RunSignals,
    ) -> Result<JobReport, JobError> {
        let partitions = match job {
            JobKind::Collector => self.collect(signals).await?,
            JobKind::Summarizer => {
                let settings = self.settings.stage("summarize", SUMMARIZE_CHUNK_SIZE);
                let processor = SummarizeProcessor::new(
                    Arc::clone(&self.summarizer),
                    self.settings.summarization_model.clone(),
                    self.settings.summary_max_words,
                );
                let writer = SummaryWriter::new(Arc::clone(&self.store));
                self.run_ranges(
                    ArticlePredicate::MissingSummary,
                    &settings,
                    &processor,
                    &writer,
                    signals,
                )
                .await?
            }
            JobKind::Embedder => {
                let settings = self.settings.stage("embed", EMBED_CHUNK_SIZE);
                let processor = EmbedProcessor::new(Arc::clone(&self.embedder));
                let writer = VectorWriter::new(Arc::clone(&self.store));
                self.run_ranges(
                    ArticlePredicate::MissingVector,
                    &settings,
                    &processor,
                    &writer,
                    signals,
                )
                .await?
            }
            JobKind::Indexer => {
                let settings = self.settings.stage("index", INDEX_CHUNK_SIZE);
                let processor = IndexProcessor::new(self.settings.embedding_dimension);
                let writer = IndexWriter::new(Arc::clone(&self.store), Arc::clone(&self.index));
                self.run_ranges(
                    ArticlePredicate::PendingIndex,
                    &settings,
                    &processor,
                    &writer,
                    signals,
                )
                .await?
            }
        };

        let report = JobReport::new(job, run_id, partitions);
        tracing::info!(
            job = %job,
            run_id,
            partitions = report.partitions.len(),
            faulted = report.faulted_partitions(),
            read = report.totals.read,
            written = report.totals.written,
            skipped = report.totals.skipped,
            "Job finished"
        );
        Ok(report)
    }

    async fn collect(&self, signals: &RunSignals) -> Result<Vec<PartitionReport>, JobError> {
        let sources = self.catalog.enabled();
        let slices = match partition_sources(&sources, self.settings.grid_size) {
            Ok(slices) => slices,
            Err(PartitionError::EmptyWorkingSet) => {
                tracing::info!("No enabled sources; nothing to collect");
                return Ok(Vec::new());
            }
            Err(error) => return Err(JobError::Partition(error)),
        };

        let settings = self.settings.stage("collect", COLLECT_CHUNK_SIZE);
        let processor = CollectProcessor::new(
            Arc::clone(&self.store),
            Arc::clone(&self.scraper),
            self.settings.require_image,
        );
        let writer = IdempotentWriter::new(Arc::clone(&self.store));

        let mut offset = 0;
        let work: Vec<(usize, String, Vec<_>)> = slices
            .into_iter()
            .enumerate()
            .map(|(index, slice)| {
                let label = format!("sources {}..{}", offset, offset + slice.len());
                offset += slice.len();
                (index, label, slice)
            })
            .collect();

        let reports = stream::iter(work)
            .map(|(index, label, slice)| {
                let settings = &settings;
                let processor = &processor;
                let writer = &writer;
                async move {
                    let mut reader = SourceFeedReader::new(
                        slice,
                        Arc::clone(&self.mappers),
                        Arc::clone(&self.feeds),
                    );
                    let execution = ChunkedStageExecutor::new(settings, signals, label.clone())
                        .run(&mut reader, processor, writer)
                        .await;
                    PartitionReport {
                        index,
                        label,
                        state: execution.state,
                        report: execution.report,
                        error: execution.fault.map(|fault| fault.to_string()),
                    }
                }
            })
            .buffer_unordered(self.settings.workers.max(1))
            .collect()
            .await;
        Ok(reports)
    }

    async fn run_ranges<P, W>(
        &self,
        predicate: ArticlePredicate,
        settings: &StageSettings,
        processor: &P,
        writer: &W,
        signals: &RunSignals,
    ) -> Result<Vec<PartitionReport>, JobError>
    where
        P: ItemProcessor<Input = ArticleRecord>,
        W: ItemWriter<Item = P::Output>,
    {
        let bounds = self.store.id_bounds(predicate).await?;
        let ranges = match calculate(
            bounds.map(|(min, _)| min),
            bounds.map(|(_, max)| max),
            self.settings.grid_size,
        ) {
            Ok(ranges) => ranges,
            Err(PartitionError::EmptyWorkingSet) => {
                tracing::info!(stage = settings.name, "No eligible articles; nothing to do");
                return Ok(Vec::new());
            }
            Err(error) => return Err(JobError::Partition(error)),
        };

        let reports = stream::iter(ranges)
            .map(|range| async move {
                let label = format!("ids {}..={}", range.start, range.end);
                let mut reader =
                    RangeReader::new(Arc::clone(&self.store), predicate, range.start, range.end);
                let execution = ChunkedStageExecutor::new(settings, signals, label.clone())
                    .run(&mut reader, processor, writer)
                    .await;
                PartitionReport {
                    index: range.index,
                    label,
                    state: execution.state,
                    report: execution.report,
                    error: execution.fault.map(|fault| fault.to_string()),
                }
            })
            .buffer_unordered(self.settings.workers.max(1))
            .collect()
            .await;
        Ok(reports)
    }
}
