//! Run-state control for scheduled jobs.
//!
//! Each job gets a [`PipelineScheduler`]: a handle to a small actor task that owns the job's
//! [`RunState`]. Start and stop are messages to that task, so concurrent control requests are
//! applied one at a time.
//!
//! ```text
//! Stopped -> Starting -> Running -> Stopping -> Stopped
//! ```

pub mod launcher;
pub mod trigger;

pub use launcher::{JobLauncher, JobRunner};
pub use trigger::{IntervalTrigger, Trigger};

use crate::pipeline::{JobError, JobKind, JobReport};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch};

/// Errors surfaced by scheduler control operations.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// A run is already in flight.
    #[error("{job} is already running (run {run_id})")]
    JobAlreadyRunning {
        /// Job that was requested.
        job: JobKind,
        /// Run currently in flight.
        run_id: String,
    },
    /// The trigger could not be resumed or did not confirm.
    #[error("{job} scheduler control failed: {reason}")]
    Control {
        /// Job that was requested.
        job: JobKind,
        /// What went wrong.
        reason: String,
    },
    /// A run started but could not partition its work.
    #[error("{job} run {run_id} failed: {source}")]
    JobFailed {
        /// Job that ran.
        job: JobKind,
        /// Run id.
        run_id: String,
        /// Cause.
        #[source]
        source: JobError,
    },
    /// The scheduler task is gone.
    #[error("{job} scheduler is unavailable")]
    Unavailable {
        /// Job that was requested.
        job: JobKind,
    },
}

/// Lifecycle of a scheduled job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    /// Trigger suspended.
    Stopped,
    /// Trigger resumed, awaiting confirmation.
    Starting,
    /// Trigger confirmed firing.
    Running,
    /// Trigger suspended, in-flight run draining.
    Stopping,
}

/// Result of a control request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ControlResponse {
    /// Whether the job is scheduled after the request.
    pub running: bool,
    /// Human-readable outcome.
    pub message: String,
}

/// Point-in-time view of one scheduler.
#[derive(Debug, Clone, Serialize)]
pub struct SchedulerStatus {
    /// Job.
    pub job: JobKind,
    /// Run state.
    pub state: RunState,
    /// Whether the trigger reports itself firing.
    pub trigger_active: bool,
    /// Run in flight, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_run_id: Option<String>,
}

/// Bounded confirmation polling.
#[derive(Debug, Clone, Copy)]
pub struct ReadinessProbe {
    /// Checks made before giving up.
    pub attempts: u32,
    /// Pause between checks.
    pub interval: Duration,
}

impl Default for ReadinessProbe {
    fn default() -> Self {
        Self {
            attempts: 10,
            interval: Duration::from_millis(300),
        }
    }
}

impl ReadinessProbe {
    /// Poll `trigger` until it reports active or the attempts run out.
    pub async fn confirm(&self, trigger: &dyn Trigger) -> bool {
        let attempts = self.attempts.max(1);
        for attempt in 1..=attempts {
            if trigger.is_active() {
                return true;
            }
            if attempt < attempts {
                tokio::time::sleep(self.interval).await;
            }
        }
        false
    }
}

type Reply = oneshot::Sender<Result<ControlResponse, SchedulerError>>;

enum Command {
    Start(Reply),
    Stop(Reply),
}

/// Handle to the control task of one job.
pub struct PipelineScheduler {
    job: JobKind,
    commands: mpsc::Sender<Command>,
    state: watch::Receiver<RunState>,
    trigger: Arc<dyn Trigger>,
    launcher: Arc<JobLauncher>,
    probe: ReadinessProbe,
}

impl PipelineScheduler {
    /// Spawn the control task. Must be called within a Tokio runtime.
    pub fn spawn(
        launcher: Arc<JobLauncher>,
        trigger: Arc<dyn Trigger>,
        probe: ReadinessProbe,
    ) -> Self {
        let job = launcher.job();
        let (commands, inbox) = mpsc::channel(16);
        let (state_tx, state) = watch::channel(RunState::Stopped);

        let actor = SchedulerActor {
            job,
            state: state_tx,
            trigger: Arc::clone(&trigger),
            launcher: Arc::clone(&launcher),
            probe,
        };
        tokio::spawn(actor.run(inbox));

        Self {
            job,
            commands,
            state,
            trigger,
            launcher,
            probe,
        }
    }

    /// Job controlled by this scheduler.
    pub fn job(&self) -> JobKind {
        self.job
    }

    /// Resume the trigger. Succeeds without side effects when already running.
    pub async fn start(&self) -> Result<ControlResponse, SchedulerError> {
        self.request(Command::Start).await
    }

    /// Suspend the trigger and let the in-flight run finish its current chunk.
    pub async fn stop(&self) -> Result<ControlResponse, SchedulerError> {
        self.request(Command::Stop).await
    }

    /// Poll the trigger with the readiness probe.
    pub async fn is_running(&self) -> bool {
        self.probe.confirm(self.trigger.as_ref()).await
    }

    /// Current run state.
    pub fn state(&self) -> RunState {
        *self.state.borrow()
    }

    /// Launch one run now, outside the trigger's cadence.
    pub async fn run_now(&self) -> Result<JobReport, SchedulerError> {
        self.launcher.launch().await
    }

    /// Snapshot for status reporting.
    pub fn status(&self) -> SchedulerStatus {
        SchedulerStatus {
            job: self.job,
            state: self.state(),
            trigger_active: self.trigger.is_active(),
            current_run_id: self.launcher.current_run(),
        }
    }

    /// Stop scheduling and abandon retry backoffs; used on process shutdown.
    pub async fn shutdown(&self) -> Result<ControlResponse, SchedulerError> {
        self.launcher.cancel_retries();
        self.stop().await
    }

    async fn request(
        &self,
        command: fn(Reply) -> Command,
    ) -> Result<ControlResponse, SchedulerError> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(command(reply))
            .await
            .map_err(|_| SchedulerError::Unavailable { job: self.job })?;
        response
            .await
            .map_err(|_| SchedulerError::Unavailable { job: self.job })?
    }
}

struct SchedulerActor {
    job: JobKind,
    state: watch::Sender<RunState>,
    trigger: Arc<dyn Trigger>,
    launcher: Arc<JobLauncher>,
    probe: ReadinessProbe,
}

impl SchedulerActor {
    async fn run(self, mut inbox: mpsc::Receiver<Command>) {
        while let Some(command) = inbox.recv().await {
            match command {
                Command::Start(reply) => {
                    let _ = reply.send(self.start().await);
                }
                Command::Stop(reply) => {
                    let _ = reply.send(self.stop().await);
                }
            }
        }
        tracing::debug!(job = %self.job, "Scheduler task exited");
    }

    fn set(&self, state: RunState) {
        self.state.send_replace(state);
        tracing::debug!(job = %self.job, state = ?state, "Run state changed");
    }

    fn current(&self) -> RunState {
        *self.state.borrow()
    }

    async fn start(&self) -> Result<ControlResponse, SchedulerError> {
        if self.current() == RunState::Running && self.trigger.is_active() {
            return Ok(ControlResponse {
                running: true,
                message: format!("{} is already running", self.job),
            });
        }
        if let Some(run_id) = self.launcher.current_run() {
            return Err(SchedulerError::JobAlreadyRunning {
                job: self.job,
                run_id,
            });
        }

        self.set(RunState::Starting);
        if let Err(error) = self.trigger.resume().await {
            self.set(RunState::Stopped);
            return Err(error);
        }

        if !self.probe.confirm(self.trigger.as_ref()).await {
            let _ = self.trigger.suspend().await;
            self.set(RunState::Stopped);
            return Err(SchedulerError::Control {
                job: self.job,
                reason: format!(
                    "trigger did not confirm after {} checks",
                    self.probe.attempts.max(1)
                ),
            });
        }

        self.set(RunState::Running);
        tracing::info!(job = %self.job, "Scheduler started");
        Ok(ControlResponse {
            running: true,
            message: format!("{} started", self.job),
        })
    }

    async fn stop(&self) -> Result<ControlResponse, SchedulerError> {
        if self.current() == RunState::Stopped {
            // A manual run may still be in flight; stop it without touching the trigger.
            if self.launcher.request_stop() {
                self.launcher.wait_idle().await;
                return Ok(ControlResponse {
                    running: false,
                    message: format!("{} run stopped", self.job),
                });
            }
            return Ok(ControlResponse {
                running: false,
                message: format!("{} is already stopped", self.job),
            });
        }

        self.set(RunState::Stopping);
        let suspended = self.trigger.suspend().await;
        self.launcher.request_stop();
        self.launcher.wait_idle().await;
        self.set(RunState::Stopped);

        if let Err(error) = suspended {
            return Err(SchedulerError::Control {
                job: self.job,
                reason: error.to_string(),
            });
        }
        tracing::info!(job = %self.job, "Scheduler stopped");
        Ok(ControlResponse {
            running: false,
            message: format!("{} stopped", self.job),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::PipelineMetrics;
    use crate::pipeline::{RunSignals, StepReport};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    #[derive(Default)]
    struct RecordingTrigger {
        active: AtomicBool,
        resumes: AtomicUsize,
        suspends: AtomicUsize,
        never_confirms: bool,
    }

    #[async_trait]
    impl Trigger for RecordingTrigger {
        async fn resume(&self) -> Result<(), SchedulerError> {
            self.resumes.fetch_add(1, Ordering::SeqCst);
            if !self.never_confirms {
                self.active.store(true, Ordering::SeqCst);
            }
            Ok(())
        }

        async fn suspend(&self) -> Result<(), SchedulerError> {
            self.suspends.fetch_add(1, Ordering::SeqCst);
            self.active.store(false, Ordering::SeqCst);
            Ok(())
        }

        fn is_active(&self) -> bool {
            self.active.load(Ordering::SeqCst)
        }
    }

    struct NoopRunner;

    #[async_trait]
    impl JobRunner for NoopRunner {
        async fn run(
            &self,
            job: JobKind,
            run_id: &str,
            _signals: &RunSignals,
        ) -> Result<JobReport, JobError> {
            Ok(JobReport {
                job,
                run_id: run_id.to_string(),
                partitions: Vec::new(),
                totals: StepReport::default(),
            })
        }
    }

    /// Waits for a stop request, then takes a moment to finish its chunk.
    #[derive(Default)]
    struct DrainingRunner {
        finished: AtomicBool,
    }

    #[async_trait]
    impl JobRunner for DrainingRunner {
        async fn run(
            &self,
            job: JobKind,
            run_id: &str,
            signals: &RunSignals,
        ) -> Result<JobReport, JobError> {
            signals.stop.cancelled().await;
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.finished.store(true, Ordering::SeqCst);
            Ok(JobReport {
                job,
                run_id: run_id.to_string(),
                partitions: Vec::new(),
                totals: StepReport {
                    stopped: true,
                    ..StepReport::default()
                },
            })
        }
    }

    fn scheduler(trigger: Arc<RecordingTrigger>) -> PipelineScheduler {
        scheduler_with(trigger, Arc::new(NoopRunner))
    }

    fn scheduler_with(
        trigger: Arc<RecordingTrigger>,
        runner: Arc<dyn JobRunner>,
    ) -> PipelineScheduler {
        let launcher = Arc::new(JobLauncher::new(
            JobKind::Collector,
            runner,
            Arc::new(PipelineMetrics::new()),
        ));
        PipelineScheduler::spawn(
            launcher,
            trigger,
            ReadinessProbe {
                attempts: 3,
                interval: Duration::from_millis(1),
            },
        )
    }

    #[tokio::test]
    async fn start_twice_resumes_once() {
        let trigger = Arc::new(RecordingTrigger::default());
        let scheduler = scheduler(trigger.clone());

        let first = scheduler.start().await.expect("first start");
        let second = scheduler.start().await.expect("second start");

        assert!(first.running && second.running);
        assert!(second.message.contains("already running"));
        assert_eq!(trigger.resumes.load(Ordering::SeqCst), 1);
        assert_eq!(scheduler.state(), RunState::Running);
        assert!(scheduler.is_running().await);
    }

    #[tokio::test]
    async fn stop_when_stopped_does_not_suspend() {
        let trigger = Arc::new(RecordingTrigger::default());
        let scheduler = scheduler(trigger.clone());

        let response = scheduler.stop().await.expect("stop");
        assert!(!response.running);
        assert_eq!(trigger.suspends.load(Ordering::SeqCst), 0);

        scheduler.start().await.expect("start");
        scheduler.stop().await.expect("stop");
        scheduler.stop().await.expect("stop again");
        assert_eq!(trigger.suspends.load(Ordering::SeqCst), 1);
        assert_eq!(scheduler.state(), RunState::Stopped);
    }

    #[tokio::test]
    async fn unconfirmed_start_is_reported_and_rolled_back() {
        let trigger = Arc::new(RecordingTrigger {
            never_confirms: true,
            ..RecordingTrigger::default()
        });
        let scheduler = scheduler(trigger.clone());

        let error = scheduler.start().await.expect_err("no confirmation");
        assert!(matches!(error, SchedulerError::Control { .. }));
        assert_eq!(scheduler.state(), RunState::Stopped);
        assert_eq!(trigger.suspends.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn stop_returns_after_the_in_flight_run_drains() {
        let trigger = Arc::new(RecordingTrigger::default());
        let runner = Arc::new(DrainingRunner::default());
        let scheduler = Arc::new(scheduler_with(trigger.clone(), runner.clone()));

        scheduler.start().await.expect("start");
        let run = tokio::spawn({
            let scheduler = Arc::clone(&scheduler);
            async move { scheduler.run_now().await }
        });
        while scheduler.status().current_run_id.is_none() {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }

        let response = scheduler.stop().await.expect("stop");

        assert!(!response.running);
        assert!(runner.finished.load(Ordering::SeqCst));
        assert_eq!(scheduler.state(), RunState::Stopped);
        assert!(scheduler.status().current_run_id.is_none());
        let report = run.await.expect("join").expect("run");
        assert!(report.totals.stopped);
    }
}
