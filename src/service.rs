//! Control surface shared by the HTTP router and the CLI.

use crate::config::Config;
use crate::metrics::{MetricsSnapshot, PipelineMetrics};
use crate::pipeline::{JobKind, JobReport};
use crate::scheduler::{
    ControlResponse, IntervalTrigger, JobLauncher, JobRunner, PipelineScheduler, ReadinessProbe,
    SchedulerError, SchedulerStatus,
};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

/// Operations exposed to callers controlling the pipeline.
#[async_trait]
pub trait PipelineApi: Send + Sync {
    /// Start scheduling `job`.
    async fn start_job(&self, job: JobKind) -> Result<ControlResponse, SchedulerError>;

    /// Stop scheduling `job`, letting an in-flight run finish its current chunk.
    async fn stop_job(&self, job: JobKind) -> Result<ControlResponse, SchedulerError>;

    /// Run `job` once now.
    async fn run_job_now(&self, job: JobKind) -> Result<JobReport, SchedulerError>;

    /// Current status of `job`.
    fn job_status(&self, job: JobKind) -> Option<SchedulerStatus>;

    /// Counters for all jobs.
    fn metrics_snapshot(&self) -> MetricsSnapshot;

    /// Start the collector.
    async fn start_collector(&self) -> Result<ControlResponse, SchedulerError> {
        self.start_job(JobKind::Collector).await
    }

    /// Stop the collector.
    async fn stop_collector(&self) -> Result<ControlResponse, SchedulerError> {
        self.stop_job(JobKind::Collector).await
    }
}

/// Trigger cadence per job.
#[derive(Debug, Clone, Copy)]
pub struct Schedule {
    /// Collector period.
    pub collector: Duration,
    /// Summarizer period.
    pub summarizer: Duration,
    /// Embedder period.
    pub embedder: Duration,
    /// Indexer period.
    pub indexer: Duration,
}

impl Schedule {
    /// Cadence from the process configuration.
    pub fn from_config(config: &Config) -> Self {
        Self {
            collector: config.collector_interval,
            summarizer: config.summarizer_interval,
            embedder: config.embedder_interval,
            indexer: config.indexer_interval,
        }
    }

    /// Period for `job`.
    pub fn period(&self, job: JobKind) -> Duration {
        match job {
            JobKind::Collector => self.collector,
            JobKind::Summarizer => self.summarizer,
            JobKind::Embedder => self.embedder,
            JobKind::Indexer => self.indexer,
        }
    }
}

/// One scheduler per job over a shared runner.
pub struct PipelineService {
    schedulers: BTreeMap<JobKind, PipelineScheduler>,
    metrics: Arc<PipelineMetrics>,
}

impl PipelineService {
    /// Wire schedulers for every job. Must be called within a Tokio runtime.
    pub fn new(runner: Arc<dyn JobRunner>, schedule: Schedule, probe: ReadinessProbe) -> Self {
        let metrics = Arc::new(PipelineMetrics::new());
        let schedulers = JobKind::ALL
            .into_iter()
            .map(|job| {
                let launcher = Arc::new(JobLauncher::new(
                    job,
                    Arc::clone(&runner),
                    Arc::clone(&metrics),
                ));
                let trigger = Arc::new(IntervalTrigger::new(
                    Arc::clone(&launcher),
                    schedule.period(job),
                ));
                (job, PipelineScheduler::spawn(launcher, trigger, probe))
            })
            .collect();
        Self {
            schedulers,
            metrics,
        }
    }

    fn scheduler(&self, job: JobKind) -> Result<&PipelineScheduler, SchedulerError> {
        self.schedulers
            .get(&job)
            .ok_or(SchedulerError::Unavailable { job })
    }

    /// Stop every scheduler and wait for in-flight runs to drain.
    pub async fn shutdown(&self) {
        for scheduler in self.schedulers.values() {
            if let Err(error) = scheduler.shutdown().await {
                tracing::warn!(job = %scheduler.job(), error = %error, "Scheduler shutdown failed");
            }
        }
    }
}

#[async_trait]
impl PipelineApi for PipelineService {
    async fn start_job(&self, job: JobKind) -> Result<ControlResponse, SchedulerError> {
        self.scheduler(job)?.start().await
    }

    async fn stop_job(&self, job: JobKind) -> Result<ControlResponse, SchedulerError> {
        self.scheduler(job)?.stop().await
    }

    async fn run_job_now(&self, job: JobKind) -> Result<JobReport, SchedulerError> {
        self.scheduler(job)?.run_now().await
    }

    fn job_status(&self, job: JobKind) -> Option<SchedulerStatus> {
        self.schedulers.get(&job).map(PipelineScheduler::status)
    }

    fn metrics_snapshot(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }
}
