//! Triggers decide when a job launches.

use crate::scheduler::SchedulerError;
use crate::scheduler::launcher::JobLauncher;
use async_trait::async_trait;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

/// External firing mechanism a scheduler resumes and suspends.
#[async_trait]
pub trait Trigger: Send + Sync {
    /// Begin firing. Confirmation is observed through [`Trigger::is_active`].
    async fn resume(&self) -> Result<(), SchedulerError>;
    /// Stop firing. Synchronous: once this returns no new launch will start.
    async fn suspend(&self) -> Result<(), SchedulerError>;
    /// Whether the trigger is currently firing.
    fn is_active(&self) -> bool;
}

struct Ticker {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Launches its job on a fixed period, starting immediately on resume.
///
/// Launches are awaited inline, so a slow run delays the next tick instead of overlapping it.
pub struct IntervalTrigger {
    launcher: Arc<JobLauncher>,
    period: Duration,
    ticker: Mutex<Option<Ticker>>,
}

impl IntervalTrigger {
    /// Trigger firing `launcher` every `period`.
    pub fn new(launcher: Arc<JobLauncher>, period: Duration) -> Self {
        Self {
            launcher,
            period,
            ticker: Mutex::new(None),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<Ticker>> {
        self.ticker.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl Trigger for IntervalTrigger {
    async fn resume(&self) -> Result<(), SchedulerError> {
        let mut ticker = self.lock();
        if ticker
            .as_ref()
            .is_some_and(|ticker| !ticker.handle.is_finished() && !ticker.cancel.is_cancelled())
        {
            return Ok(());
        }

        let cancel = CancellationToken::new();
        let launcher = Arc::clone(&self.launcher);
        let period = self.period;
        let token = cancel.clone();
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    _ = interval.tick() => {}
                }
                match launcher.launch_unless(&token).await {
                    None => break,
                    Some(Ok(_)) => {}
                    Some(Err(SchedulerError::JobAlreadyRunning { job, run_id })) => {
                        tracing::debug!(job = %job, run_id = %run_id, "Tick skipped; run in flight");
                    }
                    Some(Err(error)) => tracing::warn!(error = %error, "Scheduled run failed"),
                }
            }
            tracing::debug!(job = %launcher.job(), "Interval trigger exited");
        });

        *ticker = Some(Ticker { cancel, handle });
        tracing::info!(
            job = %self.launcher.job(),
            period_secs = self.period.as_secs(),
            "Interval trigger resumed"
        );
        Ok(())
    }

    async fn suspend(&self) -> Result<(), SchedulerError> {
        if let Some(ticker) = self.lock().take() {
            ticker.cancel.cancel();
            tracing::info!(job = %self.launcher.job(), "Interval trigger suspended");
        }
        Ok(())
    }

    fn is_active(&self) -> bool {
        self.lock()
            .as_ref()
            .is_some_and(|ticker| !ticker.handle.is_finished() && !ticker.cancel.is_cancelled())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::PipelineMetrics;
    use crate::pipeline::{JobError, JobKind, JobReport, RunSignals, StepReport};
    use crate::scheduler::launcher::JobRunner;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingRunner {
        runs: AtomicUsize,
    }

    #[async_trait]
    impl JobRunner for CountingRunner {
        async fn run(
            &self,
            job: JobKind,
            run_id: &str,
            _signals: &RunSignals,
        ) -> Result<JobReport, JobError> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            Ok(JobReport {
                job,
                run_id: run_id.to_string(),
                partitions: Vec::new(),
                totals: StepReport::default(),
            })
        }
    }

    #[tokio::test]
    async fn fires_on_resume_and_stops_on_suspend() {
        let runner = Arc::new(CountingRunner {
            runs: AtomicUsize::new(0),
        });
        let launcher = Arc::new(JobLauncher::new(
            JobKind::Embedder,
            runner.clone(),
            Arc::new(PipelineMetrics::new()),
        ));
        let trigger = IntervalTrigger::new(launcher.clone(), Duration::from_secs(3600));

        assert!(!trigger.is_active());
        trigger.resume().await.expect("resume");
        assert!(trigger.is_active());

        while runner.runs.load(Ordering::SeqCst) == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        trigger.suspend().await.expect("suspend");
        assert!(!trigger.is_active());
        launcher.wait_idle().await;
        assert_eq!(runner.runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn suspended_token_prevents_a_pending_launch() {
        let runner = Arc::new(CountingRunner {
            runs: AtomicUsize::new(0),
        });
        let launcher = JobLauncher::new(
            JobKind::Indexer,
            runner.clone(),
            Arc::new(PipelineMetrics::new()),
        );
        let suspended = CancellationToken::new();

        assert!(launcher.launch_unless(&suspended).await.is_some());
        suspended.cancel();
        assert!(launcher.launch_unless(&suspended).await.is_none());

        assert_eq!(runner.runs.load(Ordering::SeqCst), 1);
        assert!(!launcher.is_busy());
    }
}
