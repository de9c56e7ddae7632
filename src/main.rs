//! Operator entry point for the Cagnotte batch jobs.
//!
//! # Usage
//!
//! ```bash
//! cagnotte_jobs check-expired-tickets [--notify]
//! cagnotte_jobs process-bonus-points [monthly]
//! cagnotte_jobs schedule
//! ```
//!
//! `check-expired-tickets` exits successfully when the run completes, even
//! with per-ticket errors. `process-bonus-points` additionally fails when
//! any grant errored. Fatal failures (the scan itself) always exit non-zero.

use clap::{Parser, Subcommand, ValueEnum};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use cagnotte::clock::SystemClock;
use cagnotte::config::init_config;
use cagnotte::jobs::{run_bonus_points, run_ticket_expiry_check, Frequency, JobScheduler};
use cagnotte::notify::DatabaseNotifier;
use cagnotte::store::Database;

/// Batch reconciliation jobs for the Cagnotte rewards platform.
#[derive(Parser)]
#[command(name = "cagnotte_jobs")]
#[command(about = "Batch reconciliation jobs for the Cagnotte rewards platform", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Flag winning tickets past their expiry date as consumed.
    #[command(name = "check-expired-tickets")]
    CheckExpiredTickets {
        /// Also send an in-app notification to each ticket owner
        #[arg(long)]
        notify: bool,
    },

    /// Credit pending bonus-point grants to member wallets.
    ///
    /// Without a frequency the job only runs on the first day of the month.
    #[command(name = "process-bonus-points")]
    ProcessBonusPoints {
        /// Attribution frequency
        #[arg(value_enum)]
        frequency: Option<FrequencyArg>,
    },

    /// Run both jobs on their cron schedules until interrupted.
    Schedule,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum FrequencyArg {
    Monthly,
}

impl From<FrequencyArg> for Frequency {
    fn from(arg: FrequencyArg) -> Self {
        match arg {
            FrequencyArg::Monthly => Frequency::Monthly,
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match init_config() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("configuration error: {e}");
            return ExitCode::FAILURE;
        }
    };

    if config.logging.enabled {
        let filter = EnvFilter::try_from_env("CAGNOTTE_LOG_LEVEL")
            .unwrap_or_else(|_| EnvFilter::new(config.logging.level.clone()));
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    let db = match Database::new().await {
        Ok(db) => db,
        Err(e) => {
            error!("Failed to connect to the database: {e}");
            return ExitCode::FAILURE;
        }
    };

    let notifier = Arc::new(DatabaseNotifier::new(Arc::clone(&db)));

    match cli.command {
        Commands::CheckExpiredTickets { notify } => {
            match run_ticket_expiry_check(&db, notifier.as_ref(), &SystemClock, notify).await {
                Ok(stats) => {
                    println!(
                        "expired: {}, notified: {}, skipped: {}, errors: {} ({} ms)",
                        stats.expired,
                        stats.notified,
                        stats.skipped,
                        stats.errors,
                        stats.elapsed.as_millis()
                    );
                    ExitCode::SUCCESS
                }
                Err(e) => {
                    error!("Ticket expiry check did not complete: {e}");
                    ExitCode::FAILURE
                }
            }
        }

        Commands::ProcessBonusPoints { frequency } => {
            let frequency = frequency.map(Frequency::from);

            match run_bonus_points(&db, notifier.as_ref(), &SystemClock, frequency).await {
                Ok(stats) => {
                    println!(
                        "processed: {}, attributed: {}, skipped: {}, errors: {} ({} ms)",
                        stats.processed,
                        stats.attributed,
                        stats.skipped,
                        stats.errors,
                        stats.elapsed.as_millis()
                    );

                    if stats.errors > 0 {
                        error!(
                            errors = stats.errors,
                            "Bonus point attribution completed with errors"
                        );
                        ExitCode::FAILURE
                    } else {
                        ExitCode::SUCCESS
                    }
                }
                Err(e) => {
                    error!("Bonus point attribution did not complete: {e}");
                    ExitCode::FAILURE
                }
            }
        }

        Commands::Schedule => {
            let mut scheduler =
                match JobScheduler::new(db, notifier, config.jobs.clone()).await {
                    Ok(scheduler) => scheduler,
                    Err(e) => {
                        error!("Failed to create job scheduler: {e}");
                        return ExitCode::FAILURE;
                    }
                };

            if let Err(e) = scheduler.start().await {
                error!("Failed to start job scheduler: {e}");
                return ExitCode::FAILURE;
            }

            info!("Scheduler running, press ctrl-c to stop");

            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to wait for shutdown signal: {e}");
                return ExitCode::FAILURE;
            }

            if let Err(e) = scheduler.shutdown().await {
                error!("Failed to shut down job scheduler: {e}");
                return ExitCode::FAILURE;
            }

            ExitCode::SUCCESS
        }
    }
}
