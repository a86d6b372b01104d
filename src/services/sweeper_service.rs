use std::sync::Arc;
use std::time::Instant;

use tokio::sync::Mutex;
use tokio_cron_scheduler::{Job, JobScheduler};

use crate::error::{Error, Result};
use crate::services::attempt_service::AttemptService;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    pub examined: usize,
    pub finalized: usize,
    pub failed: usize,
}

/// Periodically auto-submits in-progress attempts whose deadline has passed.
/// Each attempt is graded as of its deadline, not of the tick.
#[derive(Clone)]
pub struct ExpirationSweeper {
    service: AttemptService,
    running: Arc<Mutex<()>>,
}

impl ExpirationSweeper {
    pub fn new(service: AttemptService) -> Self {
        Self {
            service,
            running: Arc::new(Mutex::new(())),
        }
    }

    /// One pass over the expired attempts. A failure on one attempt is
    /// logged and counted; the pass continues.
    pub async fn sweep_once(&self) -> Result<SweepReport> {
        let expired = self.service.expired_attempts().await?;
        let mut report = SweepReport {
            examined: expired.len(),
            ..SweepReport::default()
        };

        for attempt in &expired {
            match self.service.expire(attempt).await {
                Ok(result) => {
                    report.finalized += 1;
                    tracing::debug!(
                        attempt_id = %result.attempt_id,
                        status = %result.status,
                        score = result.score,
                        "expired attempt auto-submitted"
                    );
                }
                Err(e) => {
                    report.failed += 1;
                    tracing::error!(attempt_id = %attempt.id, error = ?e, "failed to auto-submit expired attempt");
                }
            }
        }

        Ok(report)
    }

    /// Runs a sweep unless one is already in flight.
    pub async fn tick(&self) -> Option<SweepReport> {
        let Ok(_guard) = self.running.try_lock() else {
            tracing::warn!("previous sweep still running, skipping tick");
            return None;
        };

        let started = Instant::now();
        match self.sweep_once().await {
            Ok(report) => {
                if report.examined > 0 {
                    tracing::info!(
                        examined = report.examined,
                        finalized = report.finalized,
                        failed = report.failed,
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "expiration sweep finished"
                    );
                }
                Some(report)
            }
            Err(e) => {
                tracing::error!(error = ?e, "expiration sweep failed");
                None
            }
        }
    }

    /// Registers the sweeper on a cron schedule and starts the scheduler.
    pub async fn start(self, cron: &str) -> Result<JobScheduler> {
        let schedule = normalize_cron(cron)?;
        let scheduler = JobScheduler::new().await?;

        let sweeper = self.clone();
        let job = Job::new_async(schedule.as_str(), move |_id, _scheduler| {
            let sweeper = sweeper.clone();
            Box::pin(async move {
                sweeper.tick().await;
            })
        })?;
        scheduler.add(job).await?;
        scheduler.start().await?;

        tracing::info!(%schedule, "expiration sweeper scheduled");
        Ok(scheduler)
    }
}

/// Accepts standard five-field crontab syntax and prepends the seconds
/// field the scheduler expects.
pub fn normalize_cron(expr: &str) -> Result<String> {
    let fields: Vec<&str> = expr.split_whitespace().collect();
    match fields.len() {
        5 => Ok(format!("0 {}", fields.join(" "))),
        6 | 7 => Ok(fields.join(" ")),
        _ => Err(Error::Config(format!("Invalid cron expression: '{}'", expr))),
    }
}
