//! Notification dispatch seam.
//!
//! Jobs talk to a [`Notifier`] trait object so that delivery infrastructure
//! can be swapped (and failure-injected in tests) without touching the batch
//! logic. The production implementation appends in-app notification rows;
//! mail delivery is handled downstream by the platform from those rows.

use async_trait::async_trait;
use chrono::NaiveDateTime;
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

use crate::store::{Database, Gift, NotificationRecord, Ticket, User};

/// Notification kind for an expired winning ticket.
pub const KIND_TICKET_EXPIRED: &str = "ticket_expired";

/// Notification kind for an attributed bonus-point grant.
pub const KIND_BONUS_AWARDED: &str = "bonus_points_awarded";

/// Errors raised by notification dispatch.
///
/// Dispatch failures are always non-fatal to the surrounding job; callers
/// log them and move on.
#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("notification dispatch failed: {0}")]
    Dispatch(String),
}

/// Delivery channel for user-facing job notifications.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Tell a user that one of their winning tickets expired unused.
    async fn ticket_expired(
        &self,
        user: &User,
        ticket: &Ticket,
        gift: &Gift,
        now: NaiveDateTime,
    ) -> Result<(), NotifyError>;

    /// Tell a user that bonus points were credited to their wallet.
    async fn bonus_awarded(
        &self,
        user: &User,
        points: i64,
        now: NaiveDateTime,
    ) -> Result<(), NotifyError>;
}

#[derive(Debug, Serialize)]
struct TicketExpiredPayload<'a> {
    ticket_id: &'a str,
    verification_code: &'a str,
    gift_id: &'a str,
    gift_name: &'a str,
}

#[derive(Debug, Serialize)]
struct BonusAwardedPayload {
    points: i64,
}

/// Notifier that appends rows to the `notifications` table.
#[derive(Debug, Clone)]
pub struct DatabaseNotifier {
    db: Arc<Database>,
}

impl DatabaseNotifier {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    async fn append(
        &self,
        user: &User,
        kind: &str,
        payload: String,
        now: NaiveDateTime,
    ) -> Result<(), NotifyError> {
        let record = NotificationRecord {
            notification_id: Uuid::new_v4().to_string(),
            user_id: user.user_id.clone(),
            kind: kind.to_string(),
            payload,
            created_at: now,
        };

        self.db
            .insert_notification(&record)
            .await
            .map_err(|e| NotifyError::Dispatch(e.to_string()))?;

        debug!(
            user_id = %user.user_id,
            kind = %kind,
            notification_id = %record.notification_id,
            "Notification recorded"
        );

        Ok(())
    }
}

#[async_trait]
impl Notifier for DatabaseNotifier {
    async fn ticket_expired(
        &self,
        user: &User,
        ticket: &Ticket,
        gift: &Gift,
        now: NaiveDateTime,
    ) -> Result<(), NotifyError> {
        let payload = serde_json::to_string(&TicketExpiredPayload {
            ticket_id: &ticket.ticket_id,
            verification_code: &ticket.verification_code,
            gift_id: &gift.gift_id,
            gift_name: &gift.name,
        })
        .map_err(|e| NotifyError::Dispatch(format!("payload serialization: {e}")))?;

        self.append(user, KIND_TICKET_EXPIRED, payload, now).await
    }

    async fn bonus_awarded(
        &self,
        user: &User,
        points: i64,
        now: NaiveDateTime,
    ) -> Result<(), NotifyError> {
        let payload = serde_json::to_string(&BonusAwardedPayload { points })
            .map_err(|e| NotifyError::Dispatch(format!("payload serialization: {e}")))?;

        self.append(user, KIND_BONUS_AWARDED, payload, now).await
    }
}
