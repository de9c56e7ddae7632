//! Batch jobs for the Cagnotte rewards platform.
//!
//! # Available Jobs
//!
//! - **Ticket Expiry**: scans winning tickets past their expiry date and
//!   flags them consumed, optionally notifying the owner
//!
//! - **Bonus Points**: credits pending bonus-point grants to member wallets,
//!   on the first day of each month
//!
//! Both jobs can be invoked directly (the `cagnotte_jobs` binary does this)
//! or scheduled in-process via [`JobScheduler`].
//!
//! # Usage
//!
//! ```rust,ignore
//! use cagnotte::config::JobsConfig;
//! use cagnotte::jobs::JobScheduler;
//! use cagnotte::notify::DatabaseNotifier;
//! use cagnotte::store::Database;
//!
//! let db = Database::new().await?;
//! let notifier = Arc::new(DatabaseNotifier::new(Arc::clone(&db)));
//! let scheduler = JobScheduler::new(db, notifier, JobsConfig::default()).await?;
//! scheduler.start().await?;
//! ```

use std::sync::Arc;
use tokio_cron_scheduler::{Job, JobScheduler as TokioJobScheduler};
use tracing::{error, info};

use crate::clock::SystemClock;
use crate::config::JobsConfig;
use crate::errors::StoreError;
use crate::notify::Notifier;
use crate::store::Database;

pub mod bonus_points;
pub mod ticket_expiry;

pub use bonus_points::{run_bonus_points, BonusStats, Frequency};
pub use ticket_expiry::{run_ticket_expiry_check, RunStats, SkipReason, TicketOutcome};

/// Page size for batch scans. Bounds memory and keeps the per-item unit of
/// work small.
pub const BATCH_SIZE: i64 = 100;

/// Errors that can occur in the job layer.
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("scheduler error: {0}")]
    Scheduler(String),

    #[error("database error: {0}")]
    Database(String),

    #[error("job execution error: {0}")]
    Execution(String),
}

impl From<StoreError> for JobError {
    fn from(err: StoreError) -> Self {
        JobError::Database(err.to_string())
    }
}

/// In-process cron scheduler for the batch jobs.
pub struct JobScheduler {
    scheduler: TokioJobScheduler,
    db: Arc<Database>,
    notifier: Arc<dyn Notifier>,
    config: JobsConfig,
}

impl JobScheduler {
    /// Create a new job scheduler.
    pub async fn new(
        db: Arc<Database>,
        notifier: Arc<dyn Notifier>,
        config: JobsConfig,
    ) -> Result<Self, JobError> {
        let scheduler = TokioJobScheduler::new()
            .await
            .map_err(|e| JobError::Scheduler(e.to_string()))?;

        Ok(Self {
            scheduler,
            db,
            notifier,
            config,
        })
    }

    /// Start the job scheduler with all configured jobs.
    pub async fn start(&self) -> Result<(), JobError> {
        info!("Starting Cagnotte job scheduler");

        self.add_ticket_expiry_job().await?;
        self.add_bonus_points_job().await?;

        self.scheduler
            .start()
            .await
            .map_err(|e| JobError::Scheduler(e.to_string()))?;

        info!("Cagnotte job scheduler started successfully");

        Ok(())
    }

    /// Stop the job scheduler.
    pub async fn shutdown(&mut self) -> Result<(), JobError> {
        info!("Shutting down Cagnotte job scheduler");
        self.scheduler
            .shutdown()
            .await
            .map_err(|e| JobError::Scheduler(e.to_string()))?;
        Ok(())
    }

    /// Add the ticket expiry job.
    async fn add_ticket_expiry_job(&self) -> Result<(), JobError> {
        let db = Arc::clone(&self.db);
        let notifier = Arc::clone(&self.notifier);
        let notify = self.config.ticket_expiry_notify;

        let job = Job::new_async(self.config.ticket_expiry_cron.as_str(), move |_uuid, _l| {
            let db = Arc::clone(&db);
            let notifier = Arc::clone(&notifier);
            Box::pin(async move {
                info!("Running scheduled ticket expiry check");

                match run_ticket_expiry_check(&db, notifier.as_ref(), &SystemClock, notify).await {
                    Ok(stats) => {
                        if stats.expired > 0 || stats.errors > 0 {
                            info!(
                                expired = stats.expired,
                                errors = stats.errors,
                                "Ticket expiry check: {} tickets expired",
                                stats.expired
                            );
                        }
                    }
                    Err(e) => {
                        error!("Ticket expiry check failed: {}", e);
                    }
                }
            })
        })
        .map_err(|e| JobError::Scheduler(e.to_string()))?;

        self.scheduler
            .add(job)
            .await
            .map_err(|e| JobError::Scheduler(e.to_string()))?;

        info!(
            "Added ticket expiry job (schedule: {})",
            self.config.ticket_expiry_cron
        );

        Ok(())
    }

    /// Add the bonus point attribution job.
    ///
    /// Scheduled daily; the job itself decides whether today is an
    /// attribution day (the first of the month).
    async fn add_bonus_points_job(&self) -> Result<(), JobError> {
        let db = Arc::clone(&self.db);
        let notifier = Arc::clone(&self.notifier);

        let job = Job::new_async(self.config.bonus_points_cron.as_str(), move |_uuid, _l| {
            let db = Arc::clone(&db);
            let notifier = Arc::clone(&notifier);
            Box::pin(async move {
                info!("Running scheduled bonus point attribution");

                match run_bonus_points(&db, notifier.as_ref(), &SystemClock, None).await {
                    Ok(stats) if stats.errors > 0 => {
                        error!(
                            attributed = stats.attributed,
                            errors = stats.errors,
                            "Bonus point attribution completed with errors"
                        );
                    }
                    Ok(stats) => {
                        if stats.attributed > 0 {
                            info!(
                                "Bonus point attribution: {} grants credited",
                                stats.attributed
                            );
                        }
                    }
                    Err(e) => {
                        error!("Bonus point attribution failed: {}", e);
                    }
                }
            })
        })
        .map_err(|e| JobError::Scheduler(e.to_string()))?;

        self.scheduler
            .add(job)
            .await
            .map_err(|e| JobError::Scheduler(e.to_string()))?;

        info!(
            "Added bonus point job (schedule: {})",
            self.config.bonus_points_cron
        );

        Ok(())
    }

    /// Run the ticket expiry check immediately (useful for testing or manual triggers).
    pub async fn run_ticket_expiry_now(&self, notify: bool) -> Result<RunStats, JobError> {
        run_ticket_expiry_check(&self.db, self.notifier.as_ref(), &SystemClock, notify).await
    }

    /// Run the bonus point attribution immediately (useful for testing or manual triggers).
    pub async fn run_bonus_points_now(
        &self,
        frequency: Option<Frequency>,
    ) -> Result<BonusStats, JobError> {
        run_bonus_points(&self.db, self.notifier.as_ref(), &SystemClock, frequency).await
    }
}
