//! Ticket expiry reconciliation job.
//!
//! This job scans winning tickets where `consumed = false` and
//! `expires_at < now`, flags each one consumed, and optionally notifies the
//! owner. Tickets are processed one at a time so that a failure on one never
//! affects another; a failure of the page query itself aborts the run.

use std::time::{Duration, Instant};

use tracing::{debug, error, info, warn};

use crate::clock::Clock;
use crate::errors::StoreError;
use crate::notify::Notifier;
use crate::store::{Database, Ticket};

use super::{JobError, BATCH_SIZE};

/// Why an eligible ticket was left untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// The owning user no longer exists.
    MissingUser,
    /// The referenced gift no longer exists.
    MissingGift,
    /// Another writer consumed the ticket between the scan and the update.
    AlreadyClaimed,
}

/// Outcome of processing a single eligible ticket.
#[derive(Debug)]
pub enum TicketOutcome {
    /// The ticket was flagged consumed; `notified` records whether the owner
    /// was successfully told.
    Expired { notified: bool },
    /// Left untouched for a benign reason.
    Skipped(SkipReason),
    /// A store error occurred for this ticket only.
    Failed(StoreError),
}

/// Aggregate statistics for one expiry run. Never persisted.
#[derive(Debug, Clone, Default)]
pub struct RunStats {
    /// Tickets flagged consumed by this run.
    pub expired: u32,
    /// Owners successfully notified (only meaningful when notifications
    /// were requested).
    pub notified: u32,
    /// Eligible tickets left untouched (missing owner/gift, lost race).
    pub skipped: u32,
    /// Per-ticket failures.
    pub errors: u32,
    /// Wall-clock duration of the run.
    pub elapsed: Duration,
}

impl RunStats {
    fn record(&mut self, outcome: &TicketOutcome) {
        match outcome {
            TicketOutcome::Expired { notified } => {
                self.expired += 1;
                if *notified {
                    self.notified += 1;
                }
            }
            TicketOutcome::Skipped(_) => self.skipped += 1,
            TicketOutcome::Failed(_) => self.errors += 1,
        }
    }
}

/// Check for and finalize expired winning tickets.
///
/// Scans in pages of [`BATCH_SIZE`], keyset-paginated by ticket id so the
/// full eligible set is never resident. Per ticket:
/// - resolve the owner and the gift; if either is missing, skip with a
///   warning (no mutation, not an error)
/// - flag the ticket consumed with a compare-and-set on `consumed = false`
/// - if `notify` is set and the claim landed, dispatch an expiry
///   notification; dispatch failure is logged and never undoes the claim.
///   A lost race produces no notification: the ticket may have just been
///   redeemed, and only the winning writer knows why it is terminal.
///
/// Per-ticket store errors are counted and the run continues. Returns
/// `Err` only for run-level failures (the page query itself).
pub async fn run_ticket_expiry_check(
    db: &Database,
    notifier: &dyn Notifier,
    clock: &dyn Clock,
    notify: bool,
) -> Result<RunStats, JobError> {
    let started = Instant::now();
    let now = clock.now();

    debug!("Checking for expired tickets at {}", now);

    let mut stats = RunStats::default();
    let mut cursor: Option<String> = None;

    loop {
        let batch = db
            .fetch_expired_tickets(now, cursor.as_deref(), BATCH_SIZE)
            .await?;

        let Some(last) = batch.last() else {
            break;
        };
        cursor = Some(last.ticket_id.clone());

        for ticket in &batch {
            let outcome = process_ticket(db, notifier, ticket, now, notify).await;

            if let TicketOutcome::Failed(e) = &outcome {
                error!(
                    ticket_id = %ticket.ticket_id,
                    user_id = %ticket.user_id,
                    error = %e,
                    "Failed to process expired ticket"
                );
            }

            stats.record(&outcome);
        }

        if (batch.len() as i64) < BATCH_SIZE {
            break;
        }
    }

    stats.elapsed = started.elapsed();

    info!(
        expired = stats.expired,
        notified = stats.notified,
        skipped = stats.skipped,
        errors = stats.errors,
        elapsed_ms = stats.elapsed.as_millis() as u64,
        "Ticket expiry check complete"
    );

    Ok(stats)
}

async fn process_ticket(
    db: &Database,
    notifier: &dyn Notifier,
    ticket: &Ticket,
    now: chrono::NaiveDateTime,
    notify: bool,
) -> TicketOutcome {
    let user = match db.get_user(&ticket.user_id).await {
        Ok(Some(user)) => user,
        Ok(None) => {
            warn!(
                ticket_id = %ticket.ticket_id,
                user_id = %ticket.user_id,
                "Skipping expired ticket: owner not found"
            );
            return TicketOutcome::Skipped(SkipReason::MissingUser);
        }
        Err(e) => return TicketOutcome::Failed(e),
    };

    let gift = match db.get_gift(&ticket.gift_id).await {
        Ok(Some(gift)) => gift,
        Ok(None) => {
            warn!(
                ticket_id = %ticket.ticket_id,
                gift_id = %ticket.gift_id,
                "Skipping expired ticket: gift not found"
            );
            return TicketOutcome::Skipped(SkipReason::MissingGift);
        }
        Err(e) => return TicketOutcome::Failed(e),
    };

    match db.mark_ticket_consumed(&ticket.ticket_id, now).await {
        Ok(true) => {
            // Notify only after the claim landed, so a lost race or a
            // failed write never produces a spurious expiry notification.
            let mut notified = false;
            if notify {
                match notifier.ticket_expired(&user, ticket, &gift, now).await {
                    Ok(()) => notified = true,
                    Err(e) => {
                        // Non-fatal: the claim stands.
                        warn!(
                            ticket_id = %ticket.ticket_id,
                            user_id = %user.user_id,
                            error = %e,
                            "Failed to dispatch expiry notification"
                        );
                    }
                }
            }

            info!(
                ticket_id = %ticket.ticket_id,
                user_id = %user.user_id,
                gift_id = %gift.gift_id,
                "Ticket expired"
            );
            TicketOutcome::Expired { notified }
        }
        Ok(false) => {
            warn!(
                ticket_id = %ticket.ticket_id,
                "Ticket was consumed by another writer, skipping"
            );
            TicketOutcome::Skipped(SkipReason::AlreadyClaimed)
        }
        Err(e) => TicketOutcome::Failed(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stats_record_each_outcome() {
        let mut stats = RunStats::default();

        stats.record(&TicketOutcome::Expired { notified: true });
        stats.record(&TicketOutcome::Expired { notified: false });
        stats.record(&TicketOutcome::Skipped(SkipReason::MissingUser));
        stats.record(&TicketOutcome::Skipped(SkipReason::AlreadyClaimed));
        stats.record(&TicketOutcome::Failed(StoreError::Database(
            "boom".to_string(),
        )));

        assert_eq!(stats.expired, 2);
        assert_eq!(stats.notified, 1);
        assert_eq!(stats.skipped, 2);
        assert_eq!(stats.errors, 1);
    }
}
