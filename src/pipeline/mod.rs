//! The batch pipeline: a chunked stage executor, the stages built on it, and the jobs that
//! partition work across them.
//!
//! Jobs run in order `collector -> summarizer -> embedder -> indexer`, each picking up whatever the
//! previous one left in storage. They share nothing but the store, so any of them can be run or
//! rerun on its own.

pub mod error;
pub mod executor;
pub mod jobs;
pub mod stages;
pub mod writer;

pub use error::{ErrorClass, StageError};
pub use executor::{
    ChunkedStageExecutor, ItemProcessor, ItemReader, ItemWriter, RunSignals, StageSettings,
    StageState, StepExecution, StepFault, StepReport,
};
pub use jobs::{
    JobError, JobKind, JobReport, PartitionReport, PipelineContext, PipelineSettings, UnknownJob,
};
pub use writer::IdempotentWriter;
