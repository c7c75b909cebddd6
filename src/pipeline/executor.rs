//! Chunk-oriented stage execution over one partition.
//!
//! A stage is a reader, a processor and a writer. The executor pulls a chunk from the reader,
//! resolves every item in it (processed, filtered or skipped), and only then hands the chunk's
//! output to the writer: the chunk is the unit of durable progress. Chunks within a partition run
//! strictly in sequence.
//!
//! ```text
//! Idle -> Reading -> Processing -> Writing -> Reading ... -> Completed
//!                 \______________ any active state ______________/-> Faulted
//! ```

use crate::pipeline::error::{ErrorClass, StageError};
use crate::retry::{RetryError, RetryPolicy};
use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Source of items for one partition.
#[async_trait]
pub trait ItemReader: Send {
    /// Item type produced.
    type Item: Send + Sync;

    /// Read up to `max` items; an empty chunk means the partition is exhausted.
    ///
    /// After an error the reader must stay positioned so that calling again repeats the failed
    /// read.
    async fn read_chunk(&mut self, max: usize) -> Result<Vec<Self::Item>, StageError>;

    /// Move past input whose read kept failing. Returns `false` when the reader cannot skip,
    /// which faults the partition.
    fn skip_failed(&mut self) -> bool {
        false
    }
}

/// Per-item transform.
#[async_trait]
pub trait ItemProcessor: Send + Sync {
    /// Input item type.
    type Input: Send + Sync;
    /// Output item type.
    type Output: Send + Sync;

    /// Transform one item; `Ok(None)` filters it out without charging the skip budget.
    async fn process(&self, item: &Self::Input) -> Result<Option<Self::Output>, StageError>;
}

/// Durable sink for a resolved chunk.
#[async_trait]
pub trait ItemWriter: Send + Sync {
    /// Item type accepted.
    type Item: Send + Sync;

    /// Persist `items`, returning how many produced a durable change.
    async fn write(&self, items: &[Self::Item]) -> Result<usize, StageError>;
}

/// Fixed parameters of one stage.
#[derive(Debug, Clone)]
pub struct StageSettings {
    /// Stage name used in logs.
    pub name: &'static str,
    /// Items per chunk.
    pub chunk_size: usize,
    /// Skips tolerated per partition before it faults.
    pub skip_limit: usize,
    /// Retry budget for reads, items and writes.
    pub retry: RetryPolicy,
}

/// Cooperative control for a run.
///
/// `stop` is honoured between chunks so the current chunk always finishes; `shutdown` also
/// interrupts retry backoff.
#[derive(Debug, Clone, Default)]
pub struct RunSignals {
    /// Request to stop after the current chunk.
    pub stop: CancellationToken,
    /// Request to abandon retries immediately.
    pub shutdown: CancellationToken,
}

impl RunSignals {
    /// Fresh, untriggered signals.
    pub fn new() -> Self {
        Self::default()
    }
}

/// Executor state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StageState {
    /// Not started.
    Idle,
    /// Pulling a chunk.
    Reading,
    /// Resolving the items of a chunk.
    Processing,
    /// Committing a chunk.
    Writing,
    /// Input exhausted or stop honoured.
    Completed,
    /// Aborted by a fatal error or an exhausted skip budget.
    Faulted,
}

/// Counters for one partition.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StepReport {
    /// Items returned by the reader.
    pub read: usize,
    /// Durable changes reported by the writer.
    pub written: usize,
    /// Items (or reads) dropped against the skip budget.
    pub skipped: usize,
    /// Items the processor filtered out.
    pub filtered: usize,
    /// Chunks committed.
    pub chunks: usize,
    /// Whether a stop request ended the partition early.
    pub stopped: bool,
}

impl StepReport {
    /// Accumulate another partition's counters.
    pub fn absorb(&mut self, other: &StepReport) {
        self.read += other.read;
        self.written += other.written;
        self.skipped += other.skipped;
        self.filtered += other.filtered;
        self.chunks += other.chunks;
        self.stopped |= other.stopped;
    }
}

/// Why a partition faulted.
#[derive(Debug, Error)]
pub enum StepFault {
    /// More items were skipped than the budget allows.
    #[error("skip limit of {limit} exceeded; last skip: {last}")]
    SkipLimitExceeded {
        /// Configured budget.
        limit: usize,
        /// The skip that broke the budget.
        #[source]
        last: StageError,
    },
    /// A fatal error, or a write that could not be committed.
    #[error("fatal error in {phase:?}: {source}")]
    Fatal {
        /// State the executor was in.
        phase: StageState,
        /// Underlying error.
        #[source]
        source: StageError,
    },
    /// Shutdown interrupted a retry backoff.
    #[error("cancelled during retry backoff: {source}")]
    Cancelled {
        /// Error whose retry was interrupted.
        #[source]
        source: StageError,
    },
}

/// Terminal result of one partition.
#[derive(Debug)]
pub struct StepExecution {
    /// `Completed` or `Faulted`.
    pub state: StageState,
    /// Counters accumulated up to the terminal state.
    pub report: StepReport,
    /// Present when `state` is `Faulted`.
    pub fault: Option<StepFault>,
}

impl StepExecution {
    /// Whether the partition completed.
    pub fn is_completed(&self) -> bool {
        self.state == StageState::Completed
    }
}

/// Drives one partition through a stage.
pub struct ChunkedStageExecutor<'a> {
    settings: &'a StageSettings,
    signals: &'a RunSignals,
    partition: String,
    state: StageState,
    report: StepReport,
}

impl<'a> ChunkedStageExecutor<'a> {
    /// Prepare an executor for the partition labelled `partition`.
    pub fn new(
        settings: &'a StageSettings,
        signals: &'a RunSignals,
        partition: impl Into<String>,
    ) -> Self {
        Self {
            settings,
            signals,
            partition: partition.into(),
            state: StageState::Idle,
            report: StepReport::default(),
        }
    }

    /// Current state.
    pub fn state(&self) -> StageState {
        self.state
    }

    /// Run the partition to a terminal state.
    pub async fn run<R, P, W>(mut self, reader: &mut R, processor: &P, writer: &W) -> StepExecution
    where
        R: ItemReader,
        P: ItemProcessor<Input = R::Item>,
        W: ItemWriter<Item = P::Output>,
    {
        let outcome = self.drive(reader, processor, writer).await;
        let fault = outcome.err();
        self.state = if fault.is_some() {
            StageState::Faulted
        } else {
            StageState::Completed
        };

        match &fault {
            None => tracing::info!(
                stage = self.settings.name,
                partition = %self.partition,
                read = self.report.read,
                written = self.report.written,
                skipped = self.report.skipped,
                filtered = self.report.filtered,
                stopped = self.report.stopped,
                "Partition completed"
            ),
            Some(fault) => tracing::error!(
                stage = self.settings.name,
                partition = %self.partition,
                read = self.report.read,
                written = self.report.written,
                skipped = self.report.skipped,
                error = %fault,
                "Partition faulted"
            ),
        }

        StepExecution {
            state: self.state,
            report: self.report,
            fault,
        }
    }

    async fn drive<R, P, W>(
        &mut self,
        reader: &mut R,
        processor: &P,
        writer: &W,
    ) -> Result<(), StepFault>
    where
        R: ItemReader,
        P: ItemProcessor<Input = R::Item>,
        W: ItemWriter<Item = P::Output>,
    {
        let chunk_size = self.settings.chunk_size.max(1);

        loop {
            if self.signals.stop.is_cancelled() {
                tracing::info!(
                    stage = self.settings.name,
                    partition = %self.partition,
                    "Stop requested; ending partition at chunk boundary"
                );
                self.report.stopped = true;
                return Ok(());
            }

            self.state = StageState::Reading;
            let Some(chunk) = self.read(reader, chunk_size).await? else {
                continue;
            };
            if chunk.is_empty() {
                return Ok(());
            }
            self.report.read += chunk.len();

            self.state = StageState::Processing;
            let mut outputs = Vec::with_capacity(chunk.len());
            for item in &chunk {
                if let Some(output) = self.process(processor, item).await? {
                    outputs.push(output);
                }
            }

            self.state = StageState::Writing;
            if !outputs.is_empty() {
                self.report.written += self.write(writer, &outputs).await?;
            }
            self.report.chunks += 1;
        }
    }

    /// `Ok(None)` means a failed read was skipped and the caller should read again.
    ///
    /// Reads retry with the same policy as items. The loop is explicit because the reader is
    /// borrowed mutably across attempts.
    async fn read<R: ItemReader>(
        &mut self,
        reader: &mut R,
        chunk_size: usize,
    ) -> Result<Option<Vec<R::Item>>, StepFault> {
        let retry = &self.settings.retry;
        let max_attempts = retry.max_attempts.max(1);
        let mut attempt = 0;

        let error = loop {
            attempt += 1;
            let error = match reader.read_chunk(chunk_size).await {
                Ok(chunk) => return Ok(Some(chunk)),
                Err(error) => error,
            };
            if error.class() != ErrorClass::Retryable || attempt >= max_attempts {
                break error;
            }
            tracing::debug!(
                stage = self.settings.name,
                partition = %self.partition,
                attempt,
                error = %error,
                "Read failed; backing off"
            );
            if !retry.backoff(&self.signals.shutdown).await {
                return Err(StepFault::Cancelled { source: error });
            }
        };

        if error.class() == ErrorClass::Fatal || !reader.skip_failed() {
            return Err(StepFault::Fatal {
                phase: StageState::Reading,
                source: error,
            });
        }
        self.skip(error)?;
        Ok(None)
    }

    async fn process<P: ItemProcessor>(
        &mut self,
        processor: &P,
        item: &P::Input,
    ) -> Result<Option<P::Output>, StepFault> {
        let result = self
            .settings
            .retry
            .execute(
                move || processor.process(item),
                StageError::retry_decision,
                &self.signals.shutdown,
            )
            .await;

        match result {
            Ok(Some(output)) => Ok(Some(output)),
            Ok(None) => {
                self.report.filtered += 1;
                Ok(None)
            }
            Err(RetryError::Cancelled { source, .. }) => Err(StepFault::Cancelled { source }),
            Err(RetryError::Aborted { source, .. }) if source.class() == ErrorClass::Fatal => {
                Err(StepFault::Fatal {
                    phase: StageState::Processing,
                    source,
                })
            }
            Err(RetryError::Exhausted { source, .. } | RetryError::Aborted { source, .. }) => {
                self.skip(source)?;
                Ok(None)
            }
        }
    }

    async fn write<W: ItemWriter>(
        &mut self,
        writer: &W,
        outputs: &[W::Item],
    ) -> Result<usize, StepFault> {
        self.settings
            .retry
            .execute(
                move || writer.write(outputs),
                StageError::retry_decision,
                &self.signals.shutdown,
            )
            .await
            .map_err(|error| match error {
                RetryError::Cancelled { source, .. } => StepFault::Cancelled { source },
                RetryError::Exhausted { source, .. } | RetryError::Aborted { source, .. } => {
                    StepFault::Fatal {
                        phase: StageState::Writing,
                        source,
                    }
                }
            })
    }

    fn skip(&mut self, error: StageError) -> Result<(), StepFault> {
        self.report.skipped += 1;
        if self.report.skipped > self.settings.skip_limit {
            return Err(StepFault::SkipLimitExceeded {
                limit: self.settings.skip_limit,
                last: error,
            });
        }
        tracing::warn!(
            stage = self.settings.name,
            partition = %self.partition,
            skipped = self.report.skipped,
            error = %error,
            "Skipping item"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct VecReader {
        items: VecDeque<u32>,
    }

    impl VecReader {
        fn new(items: impl IntoIterator<Item = u32>) -> Self {
            Self {
                items: items.into_iter().collect(),
            }
        }
    }

    #[async_trait]
    impl ItemReader for VecReader {
        type Item = u32;

        async fn read_chunk(&mut self, max: usize) -> Result<Vec<u32>, StageError> {
            let take = max.min(self.items.len());
            Ok(self.items.drain(..take).collect())
        }
    }

    /// Fails items listed in `skippable`, `fatal` or, for the first `flaky_failures` calls on an
    /// item, `flaky`.
    #[derive(Default)]
    struct ScriptedProcessor {
        skippable: Vec<u32>,
        fatal: Vec<u32>,
        filtered: Vec<u32>,
        flaky: Vec<u32>,
        flaky_failures: usize,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ItemProcessor for ScriptedProcessor {
        type Input = u32;
        type Output = u32;

        async fn process(&self, item: &u32) -> Result<Option<u32>, StageError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if self.skippable.contains(item) {
                return Err(StageError::EmptyArticleContent {
                    link: item.to_string(),
                });
            }
            if self.fatal.contains(item) {
                return Err(StageError::Mapping(crate::mapping::MappingError::MapperNotFound(
                    "xx".into(),
                )));
            }
            if self.filtered.contains(item) {
                return Ok(None);
            }
            if self.flaky.contains(item) && call < self.flaky_failures {
                return Err(StageError::ExternalApi("busy".into()));
            }
            Ok(Some(*item))
        }
    }

    #[derive(Default)]
    struct CollectingWriter {
        chunks: Mutex<Vec<Vec<u32>>>,
    }

    #[async_trait]
    impl ItemWriter for CollectingWriter {
        type Item = u32;

        async fn write(&self, items: &[u32]) -> Result<usize, StageError> {
            self.chunks
                .lock()
                .expect("writer lock")
                .push(items.to_vec());
            Ok(items.len())
        }
    }

    fn settings(chunk_size: usize, skip_limit: usize) -> StageSettings {
        StageSettings {
            name: "test",
            chunk_size,
            skip_limit,
            retry: RetryPolicy::new(3, Duration::from_millis(1)),
        }
    }

    #[tokio::test]
    async fn skip_budget_drops_items_without_faulting() {
        let settings = settings(10, 2);
        let signals = RunSignals::new();
        let processor = ScriptedProcessor {
            skippable: vec![2, 4],
            ..ScriptedProcessor::default()
        };
        let writer = CollectingWriter::default();

        let execution = ChunkedStageExecutor::new(&settings, &signals, "p0")
            .run(&mut VecReader::new(1..=5), &processor, &writer)
            .await;

        assert!(execution.is_completed());
        assert_eq!(execution.report.read, 5);
        assert_eq!(execution.report.written, 3);
        assert_eq!(execution.report.skipped, 2);
        assert_eq!(*writer.chunks.lock().expect("lock"), vec![vec![1, 3, 5]]);
    }

    #[tokio::test]
    async fn exceeding_skip_budget_faults_before_commit() {
        let settings = settings(10, 1);
        let signals = RunSignals::new();
        let processor = ScriptedProcessor {
            skippable: vec![2, 4],
            ..ScriptedProcessor::default()
        };
        let writer = CollectingWriter::default();

        let execution = ChunkedStageExecutor::new(&settings, &signals, "p0")
            .run(&mut VecReader::new(1..=5), &processor, &writer)
            .await;

        assert_eq!(execution.state, StageState::Faulted);
        assert!(matches!(
            execution.fault,
            Some(StepFault::SkipLimitExceeded { limit: 1, .. })
        ));
        assert!(writer.chunks.lock().expect("lock").is_empty());
    }

    #[tokio::test]
    async fn fatal_item_aborts_without_partial_chunk_commit() {
        let settings = settings(3, 100);
        let signals = RunSignals::new();
        let processor = ScriptedProcessor {
            fatal: vec![5],
            ..ScriptedProcessor::default()
        };
        let writer = CollectingWriter::default();

        let execution = ChunkedStageExecutor::new(&settings, &signals, "p0")
            .run(&mut VecReader::new(1..=6), &processor, &writer)
            .await;

        assert_eq!(execution.state, StageState::Faulted);
        assert!(matches!(
            execution.fault,
            Some(StepFault::Fatal {
                phase: StageState::Processing,
                ..
            })
        ));
        // First chunk committed, second (containing the fatal item) never written.
        assert_eq!(*writer.chunks.lock().expect("lock"), vec![vec![1, 2, 3]]);
        assert_eq!(execution.report.written, 3);
    }

    #[tokio::test]
    async fn retryable_items_succeed_within_budget() {
        let settings = settings(10, 0);
        let signals = RunSignals::new();
        let processor = ScriptedProcessor {
            flaky: vec![1],
            flaky_failures: 2,
            ..ScriptedProcessor::default()
        };
        let writer = CollectingWriter::default();

        let execution = ChunkedStageExecutor::new(&settings, &signals, "p0")
            .run(&mut VecReader::new([1]), &processor, &writer)
            .await;

        assert!(execution.is_completed());
        assert_eq!(execution.report.written, 1);
        assert_eq!(processor.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn exhausted_retries_become_skips() {
        let settings = settings(10, 5);
        let signals = RunSignals::new();
        let processor = ScriptedProcessor {
            flaky: vec![1],
            flaky_failures: usize::MAX,
            ..ScriptedProcessor::default()
        };
        let writer = CollectingWriter::default();

        let execution = ChunkedStageExecutor::new(&settings, &signals, "p0")
            .run(&mut VecReader::new([1, 2]), &processor, &writer)
            .await;

        assert!(execution.is_completed());
        assert_eq!(execution.report.skipped, 1);
        assert_eq!(execution.report.written, 1);
    }

    #[tokio::test]
    async fn filtered_items_are_counted_separately() {
        let settings = settings(10, 0);
        let signals = RunSignals::new();
        let processor = ScriptedProcessor {
            filtered: vec![1, 2],
            ..ScriptedProcessor::default()
        };
        let writer = CollectingWriter::default();

        let execution = ChunkedStageExecutor::new(&settings, &signals, "p0")
            .run(&mut VecReader::new([1, 2, 3]), &processor, &writer)
            .await;

        assert!(execution.is_completed());
        assert_eq!(execution.report.filtered, 2);
        assert_eq!(execution.report.skipped, 0);
        assert_eq!(execution.report.written, 1);
    }

    #[tokio::test]
    async fn stop_is_honoured_between_chunks() {
        let settings = settings(2, 0);
        let signals = RunSignals::new();
        signals.stop.cancel();
        let writer = CollectingWriter::default();

        let execution = ChunkedStageExecutor::new(&settings, &signals, "p0")
            .run(
                &mut VecReader::new(1..=4),
                &ScriptedProcessor::default(),
                &writer,
            )
            .await;

        assert!(execution.is_completed());
        assert!(execution.report.stopped);
        assert_eq!(execution.report.read, 0);
    }

    /// Requests a stop while the first item is still being processed.
    struct StopOnFirstItem {
        stop: CancellationToken,
    }

    #[async_trait]
    impl ItemProcessor for StopOnFirstItem {
        type Input = u32;
        type Output = u32;

        async fn process(&self, item: &u32) -> Result<Option<u32>, StageError> {
            if *item == 1 {
                self.stop.cancel();
            }
            Ok(Some(*item))
        }
    }

    #[tokio::test]
    async fn stop_mid_chunk_commits_current_chunk_then_ends() {
        let settings = settings(2, 0);
        let signals = RunSignals::new();
        let processor = StopOnFirstItem {
            stop: signals.stop.clone(),
        };
        let writer = CollectingWriter::default();
        let mut reader = VecReader::new(1..=4);

        let execution = ChunkedStageExecutor::new(&settings, &signals, "p0")
            .run(&mut reader, &processor, &writer)
            .await;

        assert!(execution.is_completed());
        assert!(execution.report.stopped);
        assert_eq!(execution.report.read, 2);
        assert_eq!(execution.report.written, 2);
        assert_eq!(*writer.chunks.lock().expect("lock"), vec![vec![1, 2]]);
        assert_eq!(reader.items.len(), 2);
    }

    struct FailingReader {
        failures_left: usize,
        skipped: bool,
    }

    #[async_trait]
    impl ItemReader for FailingReader {
        type Item = u32;

        async fn read_chunk(&mut self, _max: usize) -> Result<Vec<u32>, StageError> {
            if self.skipped {
                return Ok(Vec::new());
            }
            if self.failures_left > 0 {
                self.failures_left -= 1;
                return Err(StageError::Feed(crate::feed::FeedError::Timeout {
                    url: "https://slow.example/rss".into(),
                }));
            }
            Ok(Vec::new())
        }

        fn skip_failed(&mut self) -> bool {
            self.skipped = true;
            true
        }
    }

    #[tokio::test]
    async fn unreadable_input_is_skipped_when_reader_can_advance() {
        let settings = settings(10, 1);
        let signals = RunSignals::new();
        let mut reader = FailingReader {
            failures_left: usize::MAX,
            skipped: false,
        };

        let execution = ChunkedStageExecutor::new(&settings, &signals, "p0")
            .run(
                &mut reader,
                &ScriptedProcessor::default(),
                &CollectingWriter::default(),
            )
            .await;

        assert!(execution.is_completed());
        assert_eq!(execution.report.skipped, 1);
    }
}
