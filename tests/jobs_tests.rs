//! Integration tests for the batch jobs, run against in-memory SQLite.

#![cfg(feature = "sqlite")]

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime};
use sqlx::sqlite::SqlitePoolOptions;
use std::sync::Arc;

use cagnotte::clock::FixedClock;
use cagnotte::jobs::{run_bonus_points, run_ticket_expiry_check, Frequency};
use cagnotte::notify::{
    DatabaseNotifier, Notifier, NotifyError, KIND_BONUS_AWARDED, KIND_TICKET_EXPIRED,
};
use cagnotte::store::{BonusGrant, Database, Gift, Ticket, User, Wallet};

/// Helper to create a test database with the platform schema.
async fn setup_test_db() -> Arc<Database> {
    // A single connection keeps every statement on the same in-memory
    // database.
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("failed to open in-memory database");

    sqlx::query(
        r#"
        CREATE TABLE tickets (
            ticket_id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            gift_id TEXT NOT NULL,
            consumed INTEGER NOT NULL DEFAULT 0,
            consumed_at TEXT,
            expires_at TEXT NOT NULL,
            verification_code TEXT NOT NULL
        )
        "#,
    )
    .execute(&pool)
    .await
    .expect("failed to create tickets table");

    sqlx::query(
        r#"
        CREATE TABLE users (
            user_id TEXT PRIMARY KEY,
            email TEXT NOT NULL,
            display_name TEXT NOT NULL
        )
        "#,
    )
    .execute(&pool)
    .await
    .expect("failed to create users table");

    sqlx::query(
        r#"
        CREATE TABLE gifts (
            gift_id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            points_value INTEGER NOT NULL
        )
        "#,
    )
    .execute(&pool)
    .await
    .expect("failed to create gifts table");

    sqlx::query(
        r#"
        CREATE TABLE wallets (
            user_id TEXT PRIMARY KEY,
            balance INTEGER NOT NULL DEFAULT 0
        )
        "#,
    )
    .execute(&pool)
    .await
    .expect("failed to create wallets table");

    sqlx::query(
        r#"
        CREATE TABLE bonus_points (
            grant_id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            points INTEGER NOT NULL,
            attributed INTEGER NOT NULL DEFAULT 0,
            attributed_at TEXT,
            created_at TEXT NOT NULL
        )
        "#,
    )
    .execute(&pool)
    .await
    .expect("failed to create bonus_points table");

    sqlx::query(
        r#"
        CREATE TABLE notifications (
            notification_id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            kind TEXT NOT NULL,
            payload TEXT NOT NULL,
            created_at TEXT NOT NULL
        )
        "#,
    )
    .execute(&pool)
    .await
    .expect("failed to create notifications table");

    Arc::new(Database::SQLite(pool))
}

fn at(year: i32, month: u32, day: u32, hour: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(year, month, day)
        .unwrap()
        .and_hms_opt(hour, 0, 0)
        .unwrap()
}

/// "Now" for most tests: mid-March, well away from the first of the month.
fn mid_march() -> NaiveDateTime {
    at(2026, 3, 15, 12)
}

async fn create_user(db: &Database, user_id: &str) {
    db.insert_user(&User {
        user_id: user_id.to_string(),
        email: format!("{user_id}@example.com"),
        display_name: user_id.to_string(),
    })
    .await
    .expect("failed to insert user");
}

async fn create_gift(db: &Database, gift_id: &str, points_value: i64) {
    db.insert_gift(&Gift {
        gift_id: gift_id.to_string(),
        name: format!("Gift {gift_id}"),
        points_value,
    })
    .await
    .expect("failed to insert gift");
}

async fn create_ticket(
    db: &Database,
    ticket_id: &str,
    user_id: &str,
    gift_id: &str,
    expires_at: NaiveDateTime,
    consumed: bool,
    consumed_at: Option<NaiveDateTime>,
) {
    db.insert_ticket(&Ticket {
        ticket_id: ticket_id.to_string(),
        user_id: user_id.to_string(),
        gift_id: gift_id.to_string(),
        consumed,
        consumed_at,
        expires_at,
        verification_code: format!("VC-{ticket_id}"),
    })
    .await
    .expect("failed to insert ticket");
}

async fn create_grant(db: &Database, grant_id: &str, user_id: &str, points: i64) {
    db.insert_grant(&BonusGrant {
        grant_id: grant_id.to_string(),
        user_id: user_id.to_string(),
        points,
        attributed: false,
        attributed_at: None,
        created_at: at(2026, 2, 20, 9),
    })
    .await
    .expect("failed to insert grant");
}

/// Notifier whose delivery channel is down.
struct FailingNotifier;

#[async_trait]
impl Notifier for FailingNotifier {
    async fn ticket_expired(
        &self,
        _user: &User,
        _ticket: &Ticket,
        _gift: &Gift,
        _now: NaiveDateTime,
    ) -> Result<(), NotifyError> {
        Err(NotifyError::Dispatch("delivery channel down".to_string()))
    }

    async fn bonus_awarded(
        &self,
        _user: &User,
        _points: i64,
        _now: NaiveDateTime,
    ) -> Result<(), NotifyError> {
        Err(NotifyError::Dispatch("delivery channel down".to_string()))
    }
}

// ============================================================================
// Ticket Expiry Tests
// ============================================================================

#[tokio::test]
async fn expiry_check_flags_expired_tickets_only() {
    let db = setup_test_db().await;
    let clock = FixedClock(mid_march());
    let notifier = DatabaseNotifier::new(Arc::clone(&db));

    create_user(&db, "alice").await;
    create_gift(&db, "gift-1", 500).await;

    let earlier = at(2026, 3, 10, 8);
    create_ticket(&db, "expired-1", "alice", "gift-1", at(2026, 3, 14, 0), false, None).await;
    create_ticket(&db, "future-1", "alice", "gift-1", at(2026, 4, 14, 0), false, None).await;
    create_ticket(
        &db,
        "redeemed-1",
        "alice",
        "gift-1",
        at(2026, 3, 1, 0),
        true,
        Some(earlier),
    )
    .await;

    let stats = run_ticket_expiry_check(&db, &notifier, &clock, false)
        .await
        .expect("job failed");

    assert_eq!(stats.expired, 1);
    assert_eq!(stats.skipped, 0);
    assert_eq!(stats.errors, 0);

    // The expired ticket is now terminal, stamped with the run's "now".
    let ticket = db.get_ticket("expired-1").await.unwrap().unwrap();
    assert!(ticket.consumed);
    assert_eq!(ticket.consumed_at, Some(mid_march()));
    assert!(ticket.consumed_at.unwrap() >= ticket.expires_at);

    // The future ticket is untouched.
    let ticket = db.get_ticket("future-1").await.unwrap().unwrap();
    assert!(!ticket.consumed);
    assert!(ticket.consumed_at.is_none());

    // The already-consumed ticket keeps its original timestamp.
    let ticket = db.get_ticket("redeemed-1").await.unwrap().unwrap();
    assert!(ticket.consumed);
    assert_eq!(ticket.consumed_at, Some(earlier));
}

#[tokio::test]
async fn expiry_check_is_idempotent() {
    let db = setup_test_db().await;
    let clock = FixedClock(mid_march());
    let notifier = DatabaseNotifier::new(Arc::clone(&db));

    create_user(&db, "alice").await;
    create_gift(&db, "gift-1", 500).await;
    create_ticket(&db, "expired-1", "alice", "gift-1", at(2026, 3, 14, 0), false, None).await;

    let first = run_ticket_expiry_check(&db, &notifier, &clock, false)
        .await
        .expect("job failed");
    assert_eq!(first.expired, 1);

    let later_clock = FixedClock(at(2026, 3, 16, 12));
    let second = run_ticket_expiry_check(&db, &notifier, &later_clock, false)
        .await
        .expect("job failed");

    assert_eq!(second.expired, 0);
    assert_eq!(second.skipped, 0);
    assert_eq!(second.errors, 0);

    // The timestamp from the first run survives the second.
    let ticket = db.get_ticket("expired-1").await.unwrap().unwrap();
    assert_eq!(ticket.consumed_at, Some(mid_march()));
}

#[tokio::test]
async fn expiry_check_processes_all_batches() {
    let db = setup_test_db().await;
    let clock = FixedClock(mid_march());
    let notifier = DatabaseNotifier::new(Arc::clone(&db));

    create_user(&db, "alice").await;
    create_gift(&db, "gift-1", 500).await;

    // 150 eligible tickets: one full page of 100 plus a partial page of 50.
    for i in 0..150 {
        create_ticket(
            &db,
            &format!("ticket-{i:04}"),
            "alice",
            "gift-1",
            at(2026, 3, 14, 0),
            false,
            None,
        )
        .await;
    }

    let stats = run_ticket_expiry_check(&db, &notifier, &clock, false)
        .await
        .expect("job failed");

    assert_eq!(stats.expired, 150);
    assert_eq!(stats.errors, 0);

    let first = db.get_ticket("ticket-0000").await.unwrap().unwrap();
    let last = db.get_ticket("ticket-0149").await.unwrap().unwrap();
    assert!(first.consumed);
    assert!(last.consumed);
}

#[tokio::test]
async fn expiry_check_skips_ticket_with_missing_owner() {
    let db = setup_test_db().await;
    let clock = FixedClock(mid_march());
    let notifier = DatabaseNotifier::new(Arc::clone(&db));

    create_user(&db, "alice").await;
    create_gift(&db, "gift-1", 500).await;

    // "ghost" has no users row.
    create_ticket(&db, "orphan-1", "ghost", "gift-1", at(2026, 3, 14, 0), false, None).await;
    create_ticket(&db, "valid-1", "alice", "gift-1", at(2026, 3, 14, 0), false, None).await;

    let stats = run_ticket_expiry_check(&db, &notifier, &clock, false)
        .await
        .expect("job failed");

    // A missing owner is a skip, not an error, and the run continues.
    assert_eq!(stats.expired, 1);
    assert_eq!(stats.skipped, 1);
    assert_eq!(stats.errors, 0);

    let ticket = db.get_ticket("orphan-1").await.unwrap().unwrap();
    assert!(!ticket.consumed);

    let ticket = db.get_ticket("valid-1").await.unwrap().unwrap();
    assert!(ticket.consumed);
}

#[tokio::test]
async fn expiry_check_skips_ticket_with_missing_gift() {
    let db = setup_test_db().await;
    let clock = FixedClock(mid_march());
    let notifier = DatabaseNotifier::new(Arc::clone(&db));

    create_user(&db, "alice").await;
    create_ticket(&db, "giftless-1", "alice", "gone", at(2026, 3, 14, 0), false, None).await;

    let stats = run_ticket_expiry_check(&db, &notifier, &clock, false)
        .await
        .expect("job failed");

    assert_eq!(stats.expired, 0);
    assert_eq!(stats.skipped, 1);
    assert_eq!(stats.errors, 0);

    let ticket = db.get_ticket("giftless-1").await.unwrap().unwrap();
    assert!(!ticket.consumed);
}

#[tokio::test]
async fn notification_failure_does_not_block_expiry() {
    let db = setup_test_db().await;
    let clock = FixedClock(mid_march());

    create_user(&db, "alice").await;
    create_gift(&db, "gift-1", 500).await;
    create_ticket(&db, "expired-1", "alice", "gift-1", at(2026, 3, 14, 0), false, None).await;

    let stats = run_ticket_expiry_check(&db, &FailingNotifier, &clock, true)
        .await
        .expect("job failed");

    // The ticket is still flagged; only the notified counter misses out.
    assert_eq!(stats.expired, 1);
    assert_eq!(stats.notified, 0);
    assert_eq!(stats.errors, 0);

    let ticket = db.get_ticket("expired-1").await.unwrap().unwrap();
    assert!(ticket.consumed);
}

#[tokio::test]
async fn expiry_check_records_notifications_when_requested() {
    let db = setup_test_db().await;
    let clock = FixedClock(mid_march());
    let notifier = DatabaseNotifier::new(Arc::clone(&db));

    create_user(&db, "alice").await;
    create_gift(&db, "gift-1", 500).await;
    create_ticket(&db, "expired-1", "alice", "gift-1", at(2026, 3, 14, 0), false, None).await;

    let stats = run_ticket_expiry_check(&db, &notifier, &clock, true)
        .await
        .expect("job failed");

    assert_eq!(stats.expired, 1);
    assert_eq!(stats.notified, 1);

    let notifications = db.notifications_for_user("alice").await.unwrap();
    assert_eq!(notifications.len(), 1);
    assert_eq!(notifications[0].kind, KIND_TICKET_EXPIRED);

    let payload: serde_json::Value = serde_json::from_str(&notifications[0].payload).unwrap();
    assert_eq!(payload["ticket_id"], "expired-1");
    assert_eq!(payload["gift_id"], "gift-1");
}

#[tokio::test]
async fn expiry_check_sends_nothing_without_notify_flag() {
    let db = setup_test_db().await;
    let clock = FixedClock(mid_march());
    let notifier = DatabaseNotifier::new(Arc::clone(&db));

    create_user(&db, "alice").await;
    create_gift(&db, "gift-1", 500).await;
    create_ticket(&db, "expired-1", "alice", "gift-1", at(2026, 3, 14, 0), false, None).await;

    let stats = run_ticket_expiry_check(&db, &notifier, &clock, false)
        .await
        .expect("job failed");

    assert_eq!(stats.expired, 1);
    assert_eq!(stats.notified, 0);
    assert!(db.notifications_for_user("alice").await.unwrap().is_empty());
}

#[tokio::test]
async fn expiry_check_counts_per_ticket_errors_and_continues() {
    let db = setup_test_db().await;
    let clock = FixedClock(mid_march());
    let notifier = DatabaseNotifier::new(Arc::clone(&db));

    create_user(&db, "alice").await;
    create_user(&db, "dave").await;
    create_gift(&db, "gift-1", 500).await;

    // "cursed-1" sorts before "valid-1", so the failure happens first.
    create_ticket(&db, "cursed-1", "dave", "gift-1", at(2026, 3, 14, 0), false, None).await;
    create_ticket(&db, "valid-1", "alice", "gift-1", at(2026, 3, 14, 0), false, None).await;

    // Make the flag write fail for one ticket only.
    match &*db {
        Database::SQLite(pool) => {
            sqlx::query(
                "CREATE TRIGGER cursed_ticket_write_fails \
                 BEFORE UPDATE OF consumed ON tickets \
                 WHEN NEW.ticket_id = 'cursed-1' \
                 BEGIN SELECT RAISE(ABORT, 'simulated storage failure'); END",
            )
            .execute(pool)
            .await
            .expect("failed to create trigger");
        }
        #[allow(unreachable_patterns)]
        _ => panic!("expected the SQLite backend"),
    }

    let stats = run_ticket_expiry_check(&db, &notifier, &clock, true)
        .await
        .expect("job failed");

    // The failure is isolated: counted as an error, and the run continues
    // to the next ticket, which still commits.
    assert_eq!(stats.expired, 1);
    assert_eq!(stats.errors, 1);
    assert_eq!(stats.skipped, 0);
    assert_eq!(stats.notified, 1);

    let ticket = db.get_ticket("cursed-1").await.unwrap().unwrap();
    assert!(!ticket.consumed);
    assert!(ticket.consumed_at.is_none());

    let ticket = db.get_ticket("valid-1").await.unwrap().unwrap();
    assert!(ticket.consumed);

    // No claim means no notification for the failed ticket's owner.
    assert!(db.notifications_for_user("dave").await.unwrap().is_empty());
    assert_eq!(db.notifications_for_user("alice").await.unwrap().len(), 1);
}

#[tokio::test]
async fn mark_ticket_consumed_claims_only_once() {
    let db = setup_test_db().await;

    create_user(&db, "alice").await;
    create_gift(&db, "gift-1", 500).await;
    create_ticket(&db, "contended-1", "alice", "gift-1", at(2026, 3, 14, 0), false, None).await;

    let first = db.mark_ticket_consumed("contended-1", mid_march()).await.unwrap();
    let second = db
        .mark_ticket_consumed("contended-1", at(2026, 3, 15, 13))
        .await
        .unwrap();

    assert!(first);
    assert!(!second);

    let ticket = db.get_ticket("contended-1").await.unwrap().unwrap();
    assert_eq!(ticket.consumed_at, Some(mid_march()));
}

// ============================================================================
// Bonus Point Tests
// ============================================================================

#[tokio::test]
async fn bonus_points_noop_when_not_first_of_month() {
    let db = setup_test_db().await;
    let clock = FixedClock(mid_march());
    let notifier = DatabaseNotifier::new(Arc::clone(&db));

    create_user(&db, "bob").await;
    create_grant(&db, "grant-1", "bob", 250).await;

    let stats = run_bonus_points(&db, &notifier, &clock, None)
        .await
        .expect("job failed");

    assert_eq!(stats.processed, 0);
    assert_eq!(stats.attributed, 0);
    assert_eq!(stats.errors, 0);

    let grant = db.get_grant("grant-1").await.unwrap().unwrap();
    assert!(!grant.attributed);
}

#[tokio::test]
async fn bonus_points_runs_with_monthly_frequency() {
    let db = setup_test_db().await;
    let clock = FixedClock(mid_march());
    let notifier = DatabaseNotifier::new(Arc::clone(&db));

    create_user(&db, "bob").await;
    db.insert_wallet(&Wallet {
        user_id: "bob".to_string(),
        balance: 100,
    })
    .await
    .unwrap();
    create_grant(&db, "grant-1", "bob", 250).await;

    let stats = run_bonus_points(&db, &notifier, &clock, Some(Frequency::Monthly))
        .await
        .expect("job failed");

    assert_eq!(stats.processed, 1);
    assert_eq!(stats.attributed, 1);
    assert_eq!(stats.errors, 0);

    let wallet = db.get_wallet("bob").await.unwrap().unwrap();
    assert_eq!(wallet.balance, 350);

    let grant = db.get_grant("grant-1").await.unwrap().unwrap();
    assert!(grant.attributed);
    assert_eq!(grant.attributed_at, Some(mid_march()));

    let notifications = db.notifications_for_user("bob").await.unwrap();
    assert_eq!(notifications.len(), 1);
    assert_eq!(notifications[0].kind, KIND_BONUS_AWARDED);
}

#[tokio::test]
async fn bonus_points_self_selects_on_first_of_month() {
    let db = setup_test_db().await;
    let clock = FixedClock(at(2026, 4, 1, 2));
    let notifier = DatabaseNotifier::new(Arc::clone(&db));

    create_user(&db, "bob").await;
    create_grant(&db, "grant-1", "bob", 250).await;

    let stats = run_bonus_points(&db, &notifier, &clock, None)
        .await
        .expect("job failed");

    assert_eq!(stats.attributed, 1);
}

#[tokio::test]
async fn bonus_points_creates_missing_wallet() {
    let db = setup_test_db().await;
    let clock = FixedClock(mid_march());
    let notifier = DatabaseNotifier::new(Arc::clone(&db));

    create_user(&db, "bob").await;
    create_grant(&db, "grant-1", "bob", 250).await;

    let stats = run_bonus_points(&db, &notifier, &clock, Some(Frequency::Monthly))
        .await
        .expect("job failed");

    assert_eq!(stats.attributed, 1);

    let wallet = db.get_wallet("bob").await.unwrap().unwrap();
    assert_eq!(wallet.balance, 250);
}

#[tokio::test]
async fn bonus_points_skips_grant_with_missing_member() {
    let db = setup_test_db().await;
    let clock = FixedClock(mid_march());
    let notifier = DatabaseNotifier::new(Arc::clone(&db));

    create_grant(&db, "grant-1", "ghost", 250).await;

    let stats = run_bonus_points(&db, &notifier, &clock, Some(Frequency::Monthly))
        .await
        .expect("job failed");

    assert_eq!(stats.processed, 1);
    assert_eq!(stats.skipped, 1);
    assert_eq!(stats.attributed, 0);
    assert_eq!(stats.errors, 0);

    let grant = db.get_grant("grant-1").await.unwrap().unwrap();
    assert!(!grant.attributed);
    assert!(db.get_wallet("ghost").await.unwrap().is_none());
}

#[tokio::test]
async fn bonus_points_attributes_each_grant_once() {
    let db = setup_test_db().await;
    let clock = FixedClock(mid_march());
    let notifier = DatabaseNotifier::new(Arc::clone(&db));

    create_user(&db, "bob").await;
    create_grant(&db, "grant-1", "bob", 250).await;

    let first = run_bonus_points(&db, &notifier, &clock, Some(Frequency::Monthly))
        .await
        .expect("job failed");
    assert_eq!(first.attributed, 1);

    let second = run_bonus_points(&db, &notifier, &clock, Some(Frequency::Monthly))
        .await
        .expect("job failed");
    assert_eq!(second.processed, 0);
    assert_eq!(second.attributed, 0);

    let wallet = db.get_wallet("bob").await.unwrap().unwrap();
    assert_eq!(wallet.balance, 250);
}

#[tokio::test]
async fn bonus_points_counts_per_grant_errors_and_continues() {
    let db = setup_test_db().await;
    let clock = FixedClock(mid_march());
    let notifier = DatabaseNotifier::new(Arc::clone(&db));

    create_user(&db, "bob").await;
    create_user(&db, "carol").await;

    // "grant-1" sorts before "grant-2", so the failure happens first.
    create_grant(&db, "grant-1", "carol", 100).await;
    create_grant(&db, "grant-2", "bob", 250).await;

    // Make the wallet credit fail for one member only.
    match &*db {
        Database::SQLite(pool) => {
            sqlx::query(
                "CREATE TRIGGER carol_wallet_write_fails \
                 BEFORE INSERT ON wallets \
                 WHEN NEW.user_id = 'carol' \
                 BEGIN SELECT RAISE(ABORT, 'simulated storage failure'); END",
            )
            .execute(pool)
            .await
            .expect("failed to create trigger");
        }
        #[allow(unreachable_patterns)]
        _ => panic!("expected the SQLite backend"),
    }

    let stats = run_bonus_points(&db, &notifier, &clock, Some(Frequency::Monthly))
        .await
        .expect("job failed");

    // The run completes despite the per-grant error; the caller decides
    // what errors > 0 means for the exit status.
    assert_eq!(stats.processed, 2);
    assert_eq!(stats.attributed, 1);
    assert_eq!(stats.errors, 1);
    assert_eq!(stats.skipped, 0);

    // The failed grant's transaction rolled back in full: the claim was
    // undone and no wallet or notification was created.
    let grant = db.get_grant("grant-1").await.unwrap().unwrap();
    assert!(!grant.attributed);
    assert!(grant.attributed_at.is_none());
    assert!(db.get_wallet("carol").await.unwrap().is_none());
    assert!(db.notifications_for_user("carol").await.unwrap().is_empty());

    // The other grant still committed.
    let grant = db.get_grant("grant-2").await.unwrap().unwrap();
    assert!(grant.attributed);
    let wallet = db.get_wallet("bob").await.unwrap().unwrap();
    assert_eq!(wallet.balance, 250);
    assert_eq!(db.notifications_for_user("bob").await.unwrap().len(), 1);
}

#[tokio::test]
async fn attribute_grant_claims_only_once() {
    let db = setup_test_db().await;

    create_user(&db, "bob").await;
    create_grant(&db, "grant-1", "bob", 250).await;

    let grant = db.get_grant("grant-1").await.unwrap().unwrap();

    let first = db.attribute_grant(&grant, mid_march()).await.unwrap();
    let second = db.attribute_grant(&grant, at(2026, 3, 15, 13)).await.unwrap();

    assert!(first);
    assert!(!second);

    let wallet = db.get_wallet("bob").await.unwrap().unwrap();
    assert_eq!(wallet.balance, 250);
}
