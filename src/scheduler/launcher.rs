//! Single-flight job launching.

use crate::metrics::PipelineMetrics;
use crate::pipeline::{JobError, JobKind, JobReport, PipelineContext, RunSignals};
use crate::scheduler::SchedulerError;
use async_trait::async_trait;
use chrono::Utc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

/// Executes one run of a job.
#[async_trait]
pub trait JobRunner: Send + Sync {
    /// Run `job` once under `run_id`, honouring `signals`.
    async fn run(
        &self,
        job: JobKind,
        run_id: &str,
        signals: &RunSignals,
    ) -> Result<JobReport, JobError>;
}

#[async_trait]
impl JobRunner for PipelineContext {
    async fn run(
        &self,
        job: JobKind,
        run_id: &str,
        signals: &RunSignals,
    ) -> Result<JobReport, JobError> {
        self.run_job(job, run_id, signals).await
    }
}

struct ActiveRun {
    run_id: String,
    signals: RunSignals,
}

/// Launches runs of one job, never more than one at a time.
///
/// Scheduled and manual runs share this guard: a launch while a run is in flight is rejected with
/// [`SchedulerError::JobAlreadyRunning`] rather than queued.
pub struct JobLauncher {
    job: JobKind,
    runner: Arc<dyn JobRunner>,
    metrics: Arc<PipelineMetrics>,
    shutdown: CancellationToken,
    active: Mutex<Option<ActiveRun>>,
    idle: Notify,
    sequence: AtomicU64,
}

impl JobLauncher {
    /// Launcher for `job` executing through `runner`.
    pub fn new(job: JobKind, runner: Arc<dyn JobRunner>, metrics: Arc<PipelineMetrics>) -> Self {
        Self {
            job,
            runner,
            metrics,
            shutdown: CancellationToken::new(),
            active: Mutex::new(None),
            idle: Notify::new(),
            sequence: AtomicU64::new(0),
        }
    }

    /// Job this launcher runs.
    pub fn job(&self) -> JobKind {
        self.job
    }

    /// Run the job to completion under a fresh run id.
    pub async fn launch(&self) -> Result<JobReport, SchedulerError> {
        let (run_id, signals) = self.claim(&mut self.lock())?;
        self.execute(run_id, signals).await
    }

    /// Launch unless `suspended` has been cancelled, returning `None` when nothing started.
    ///
    /// The token is checked under the lock that claims the run, so a suspend followed by
    /// [`JobLauncher::request_stop`] either prevents the launch or finds the run to stop.
    pub(crate) async fn launch_unless(
        &self,
        suspended: &CancellationToken,
    ) -> Option<Result<JobReport, SchedulerError>> {
        let claimed = {
            let mut active = self.lock();
            if suspended.is_cancelled() {
                return None;
            }
            self.claim(&mut active)
        };
        match claimed {
            Ok((run_id, signals)) => Some(self.execute(run_id, signals).await),
            Err(error) => Some(Err(error)),
        }
    }

    async fn execute(
        &self,
        run_id: String,
        signals: RunSignals,
    ) -> Result<JobReport, SchedulerError> {
        let _release = Release(self);

        self.metrics.record_run_started(self.job, &run_id);
        tracing::info!(job = %self.job, run_id = %run_id, "Job run started");

        match self.runner.run(self.job, &run_id, &signals).await {
            Ok(report) => {
                self.metrics.record_run_finished(&report);
                Ok(report)
            }
            Err(source) => {
                self.metrics.record_run_failed(self.job);
                tracing::error!(job = %self.job, run_id = %run_id, error = %source, "Job run failed");
                Err(SchedulerError::JobFailed {
                    job: self.job,
                    run_id,
                    source,
                })
            }
        }
    }

    /// Id of the run in flight, if any.
    pub fn current_run(&self) -> Option<String> {
        self.lock().as_ref().map(|active| active.run_id.clone())
    }

    /// Whether a run is in flight.
    pub fn is_busy(&self) -> bool {
        self.lock().is_some()
    }

    /// Ask the run in flight to stop after its current chunk. Returns whether there was one.
    pub fn request_stop(&self) -> bool {
        match self.lock().as_ref() {
            Some(active) => {
                tracing::info!(job = %self.job, run_id = %active.run_id, "Stop requested");
                active.signals.stop.cancel();
                true
            }
            None => false,
        }
    }

    /// Abandon retry backoffs in the current run and every later one.
    pub fn cancel_retries(&self) {
        self.shutdown.cancel();
    }

    /// Resolve once no run is in flight.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            if !self.is_busy() {
                return;
            }
            notified.await;
        }
    }

    fn claim(&self, active: &mut Option<ActiveRun>) -> Result<(String, RunSignals), SchedulerError> {
        if let Some(current) = active.as_ref() {
            return Err(SchedulerError::JobAlreadyRunning {
                job: self.job,
                run_id: current.run_id.clone(),
            });
        }

        let run_id = format!(
            "{}-{}-{}",
            self.job,
            Utc::now().timestamp_millis(),
            self.sequence.fetch_add(1, Ordering::Relaxed)
        );
        let signals = RunSignals {
            stop: CancellationToken::new(),
            shutdown: self.shutdown.child_token(),
        };
        *active = Some(ActiveRun {
            run_id: run_id.clone(),
            signals: signals.clone(),
        });
        Ok((run_id, signals))
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<ActiveRun>> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Clears the active run when the launch future completes or is dropped.
struct Release<'a>(&'a JobLauncher);

impl Drop for Release<'_> {
    fn drop(&mut self) {
        self.0.lock().take();
        self.0.idle.notify_waiters();
    }
}
