use crate::pipeline::{JobKind, JobReport};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

/// Thread-safe counters describing pipeline activity, one set per job.
#[derive(Default)]
pub struct PipelineMetrics {
    jobs: [JobCounters; 4],
}

#[derive(Default)]
struct JobCounters {
    runs_started: AtomicU64,
    runs_completed: AtomicU64,
    runs_failed: AtomicU64,
    items_read: AtomicU64,
    items_written: AtomicU64,
    items_skipped: AtomicU64,
    items_filtered: AtomicU64,
    partitions_faulted: AtomicU64,
    last_run_id: Mutex<Option<String>>,
}

impl PipelineMetrics {
    /// Create an empty metrics accumulator.
    pub fn new() -> Self {
        Self::default()
    }

    fn counters(&self, job: JobKind) -> &JobCounters {
        &self.jobs[job as usize]
    }

    /// Record that a run of `job` has started under `run_id`.
    pub fn record_run_started(&self, job: JobKind, run_id: &str) {
        let counters = self.counters(job);
        counters.runs_started.fetch_add(1, Ordering::Relaxed);
        *counters
            .last_run_id
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(run_id.to_string());
    }

    /// Fold a finished run's totals into the job's counters.
    pub fn record_run_finished(&self, report: &JobReport) {
        let counters = self.counters(report.job);
        counters.runs_completed.fetch_add(1, Ordering::Relaxed);
        counters
            .items_read
            .fetch_add(report.totals.read as u64, Ordering::Relaxed);
        counters
            .items_written
            .fetch_add(report.totals.written as u64, Ordering::Relaxed);
        counters
            .items_skipped
            .fetch_add(report.totals.skipped as u64, Ordering::Relaxed);
        counters
            .items_filtered
            .fetch_add(report.totals.filtered as u64, Ordering::Relaxed);
        counters
            .partitions_faulted
            .fetch_add(report.faulted_partitions() as u64, Ordering::Relaxed);
    }

    /// Record a run that could not partition its work.
    pub fn record_run_failed(&self, job: JobKind) {
        self.counters(job)
            .runs_failed
            .fetch_add(1, Ordering::Relaxed);
    }

    /// Return a snapshot of the current counters.
    pub fn snapshot(&self) -> MetricsSnapshot {
        let jobs = JobKind::ALL
            .into_iter()
            .map(|job| {
                let counters = self.counters(job);
                let snapshot = JobMetricsSnapshot {
                    runs_started: counters.runs_started.load(Ordering::Relaxed),
                    runs_completed: counters.runs_completed.load(Ordering::Relaxed),
                    runs_failed: counters.runs_failed.load(Ordering::Relaxed),
                    items_read: counters.items_read.load(Ordering::Relaxed),
                    items_written: counters.items_written.load(Ordering::Relaxed),
                    items_skipped: counters.items_skipped.load(Ordering::Relaxed),
                    items_filtered: counters.items_filtered.load(Ordering::Relaxed),
                    partitions_faulted: counters.partitions_faulted.load(Ordering::Relaxed),
                    last_run_id: counters
                        .last_run_id
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .clone(),
                };
                (job, snapshot)
            })
            .collect();
        MetricsSnapshot { jobs }
    }
}

/// Immutable view of all job counters used for reporting.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    /// Counters keyed by job.
    pub jobs: BTreeMap<JobKind, JobMetricsSnapshot>,
}

/// Counters for one job since startup.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct JobMetricsSnapshot {
    /// Runs launched.
    pub runs_started: u64,
    /// Runs that partitioned and executed their work (partition faults included).
    pub runs_completed: u64,
    /// Runs that failed before any partition started.
    pub runs_failed: u64,
    /// Items read across all runs.
    pub items_read: u64,
    /// Items durably written.
    pub items_written: u64,
    /// Items skipped against partition budgets.
    pub items_skipped: u64,
    /// Items filtered out by processors.
    pub items_filtered: u64,
    /// Partitions that ended faulted.
    pub partitions_faulted: u64,
    /// Id of the most recent run.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_run_id: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{PartitionReport, StageState, StepReport};

    #[test]
    fn records_runs_per_job() {
        let metrics = PipelineMetrics::new();
        metrics.record_run_started(JobKind::Summarizer, "summarizer-1-1");
        metrics.record_run_finished(&JobReport {
            job: JobKind::Summarizer,
            run_id: "summarizer-1-1".into(),
            partitions: vec![PartitionReport {
                index: 0,
                label: "ids 1..=5".into(),
                state: StageState::Faulted,
                report: StepReport::default(),
                error: Some("skip limit".into()),
            }],
            totals: StepReport {
                read: 5,
                written: 3,
                skipped: 2,
                ..StepReport::default()
            },
        });
        metrics.record_run_failed(JobKind::Indexer);

        let snapshot = metrics.snapshot();
        let summarizer = &snapshot.jobs[&JobKind::Summarizer];
        assert_eq!(summarizer.runs_started, 1);
        assert_eq!(summarizer.items_written, 3);
        assert_eq!(summarizer.items_skipped, 2);
        assert_eq!(summarizer.partitions_faulted, 1);
        assert_eq!(summarizer.last_run_id.as_deref(), Some("summarizer-1-1"));
        assert_eq!(snapshot.jobs[&JobKind::Indexer].runs_failed, 1);
        assert_eq!(snapshot.jobs[&JobKind::Collector], JobMetricsSnapshot::default());
    }

    #[test]
    fn snapshot_serializes_job_names_as_keys() {
        let json = serde_json::to_value(PipelineMetrics::new().snapshot()).expect("json");
        assert!(json["jobs"]["collector"].is_object());
        assert_eq!(json["jobs"]["embedder"]["runs_started"], 0);
    }
}
