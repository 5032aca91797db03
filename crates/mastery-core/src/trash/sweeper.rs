//! Periodic purge of expired trash.
//!
//! Uses tokio-cron-scheduler to run `sweep_expired()` at a fixed interval.

use std::sync::Arc;

use tokio_cron_scheduler::{Job, JobScheduler, JobSchedulerError};
use tracing::{debug, error, info};

use super::manager::{SweepReport, TrashManager};
use crate::error::MasteryResult;

/// Runs the trash sweep in the background.
///
/// # Example
///
/// ```ignore
/// let sweeper = TrashSweeper::new(manager).await?;
/// sweeper.start().await?;
/// ```
pub struct TrashSweeper {
    scheduler: JobScheduler,
    manager: Arc<TrashManager>,
}

impl TrashSweeper {
    /// Create a sweeper. Call `start()` to begin.
    pub async fn new(manager: Arc<TrashManager>) -> Result<Self, JobSchedulerError> {
        let scheduler = JobScheduler::new().await?;
        Ok(Self { scheduler, manager })
    }

    fn interval_minutes(&self) -> u64 {
        self.manager.config().sweep_interval_minutes.max(1)
    }

    /// Schedule the periodic sweep, and sweep once now if configured.
    pub async fn start(&self) -> Result<(), JobSchedulerError> {
        let manager = self.manager.clone();
        let interval_secs = self.interval_minutes() * 60;

        let job = Job::new_repeated_async(
            std::time::Duration::from_secs(interval_secs),
            move |_uuid, _lock| {
                let manager = manager.clone();
                Box::pin(async move {
                    debug!("Starting periodic trash sweep");
                    log_sweep(manager.sweep_expired().await);
                })
            },
        )?;

        self.scheduler.add(job).await?;

        if self.manager.config().sweep_on_start {
            debug!("Running initial trash sweep");
            log_sweep(self.manager.sweep_expired().await);
        }

        self.scheduler.start().await?;

        info!(
            interval_minutes = self.interval_minutes(),
            "Trash sweeper started"
        );
        Ok(())
    }

    /// Stop the scheduler.
    pub async fn shutdown(&mut self) -> Result<(), JobSchedulerError> {
        info!("Shutting down trash sweeper");
        self.scheduler.shutdown().await
    }

    /// Sweep outside the schedule.
    pub async fn run_now(&self) -> MasteryResult<SweepReport> {
        self.manager.sweep_expired().await
    }

    pub fn manager(&self) -> &Arc<TrashManager> {
        &self.manager
    }
}

fn log_sweep(result: MasteryResult<SweepReport>) {
    match result {
        Ok(report) if report.removed > 0 => {
            info!(removed = report.removed, "Trash sweep complete")
        }
        Ok(report) => debug!(skipped = report.skipped, "Trash sweep found nothing to purge"),
        Err(e) => error!(error = %e, "Trash sweep failed"),
    }
}
