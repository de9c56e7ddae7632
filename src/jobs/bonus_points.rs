//! Bonus point attribution job.
//!
//! This job credits pending bonus-point grants to member wallets. It is
//! monthly by design: invoked without an explicit frequency it only runs on
//! the first day of the calendar month and is a zero-valued no-op otherwise.

use std::str::FromStr;
use std::time::{Duration, Instant};

use chrono::Datelike;
use tracing::{debug, error, info, warn};

use crate::clock::Clock;
use crate::notify::Notifier;
use crate::store::{BonusGrant, Database};

use super::{JobError, BATCH_SIZE};

/// Attribution frequency. `monthly` is the only recognized literal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Frequency {
    Monthly,
}

impl FromStr for Frequency {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "monthly" => Ok(Frequency::Monthly),
            other => Err(format!("unknown frequency '{other}', expected 'monthly'")),
        }
    }
}

/// Aggregate statistics for one attribution run. Never persisted.
#[derive(Debug, Clone, Default)]
pub struct BonusStats {
    /// Grants examined by this run.
    pub processed: u32,
    /// Grants credited to a wallet.
    pub attributed: u32,
    /// Grants left untouched (missing member, lost race).
    pub skipped: u32,
    /// Per-grant failures.
    pub errors: u32,
    /// Wall-clock duration of the run.
    pub elapsed: Duration,
}

/// Credit pending bonus-point grants to member wallets.
///
/// With `Some(Frequency::Monthly)` the job always runs. With `None` it
/// self-selects: it runs only when today is the first of the month and
/// otherwise reports zero-valued statistics and success.
///
/// Per grant, the wallet credit and the attributed flag are committed in one
/// transaction; a failure rolls back that grant only and is counted. The
/// caller treats `errors > 0` as a failed invocation.
pub async fn run_bonus_points(
    db: &Database,
    notifier: &dyn Notifier,
    clock: &dyn Clock,
    frequency: Option<Frequency>,
) -> Result<BonusStats, JobError> {
    let started = Instant::now();
    let mut stats = BonusStats::default();

    if frequency.is_none() && clock.today().day() != 1 {
        debug!(
            today = %clock.today(),
            "Bonus point attribution skipped: not the first day of the month"
        );
        stats.elapsed = started.elapsed();
        return Ok(stats);
    }

    let now = clock.now();
    debug!("Attributing pending bonus grants at {}", now);

    let mut cursor: Option<String> = None;

    loop {
        let batch = db.fetch_pending_grants(cursor.as_deref(), BATCH_SIZE).await?;

        let Some(last) = batch.last() else {
            break;
        };
        cursor = Some(last.grant_id.clone());

        for grant in &batch {
            stats.processed += 1;
            process_grant(db, notifier, grant, now, &mut stats).await;
        }

        if (batch.len() as i64) < BATCH_SIZE {
            break;
        }
    }

    stats.elapsed = started.elapsed();

    info!(
        processed = stats.processed,
        attributed = stats.attributed,
        skipped = stats.skipped,
        errors = stats.errors,
        elapsed_ms = stats.elapsed.as_millis() as u64,
        "Bonus point attribution complete"
    );

    Ok(stats)
}

async fn process_grant(
    db: &Database,
    notifier: &dyn Notifier,
    grant: &BonusGrant,
    now: chrono::NaiveDateTime,
    stats: &mut BonusStats,
) {
    let user = match db.get_user(&grant.user_id).await {
        Ok(Some(user)) => user,
        Ok(None) => {
            warn!(
                grant_id = %grant.grant_id,
                user_id = %grant.user_id,
                "Skipping bonus grant: member not found"
            );
            stats.skipped += 1;
            return;
        }
        Err(e) => {
            error!(
                grant_id = %grant.grant_id,
                user_id = %grant.user_id,
                error = %e,
                "Failed to resolve member for bonus grant"
            );
            stats.errors += 1;
            return;
        }
    };

    match db.attribute_grant(grant, now).await {
        Ok(true) => {
            stats.attributed += 1;
            info!(
                grant_id = %grant.grant_id,
                user_id = %user.user_id,
                points = grant.points,
                "Bonus points attributed"
            );

            // Dispatched after commit; a dispatch failure never undoes the
            // credit.
            if let Err(e) = notifier.bonus_awarded(&user, grant.points, now).await {
                warn!(
                    grant_id = %grant.grant_id,
                    user_id = %user.user_id,
                    error = %e,
                    "Failed to dispatch bonus notification"
                );
            }
        }
        Ok(false) => {
            warn!(
                grant_id = %grant.grant_id,
                "Bonus grant was attributed by another writer, skipping"
            );
            stats.skipped += 1;
        }
        Err(e) => {
            error!(
                grant_id = %grant.grant_id,
                user_id = %user.user_id,
                error = %e,
                "Failed to attribute bonus grant"
            );
            stats.errors += 1;
        }
    }
}
