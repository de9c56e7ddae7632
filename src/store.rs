//! Persistence layer for the batch jobs.
//!
//! All reads and writes go through the [`Database`] enum, which abstracts over
//! the SQLite and PostgreSQL backends. Relationship traversal is explicit:
//! lookups return `Option` and callers decide what a missing row means.
//!
//! Schema ownership lives with the platform (migrations are managed
//! elsewhere); this module only assumes the table shapes below.

use chrono::NaiveDateTime;
use sqlx::{query, query_as, FromRow};
use std::sync::Arc;
use tracing::error;

#[cfg(feature = "sqlite")]
use sqlx::SqlitePool;

#[cfg(feature = "postgres")]
use sqlx::PgPool;

use crate::config::get_config;
use crate::errors::{StoreError, StoreResult};

/// A winning ticket: a user's claim on a gift, which expires if unused.
///
/// Mirrors the `tickets` table. Once `consumed` is true the ticket is
/// terminal; `consumed_at` records when it was redeemed or expired.
#[derive(Debug, Clone, FromRow)]
pub struct Ticket {
    pub ticket_id: String,
    pub user_id: String,
    pub gift_id: String,
    pub consumed: bool,
    pub consumed_at: Option<NaiveDateTime>,
    pub expires_at: NaiveDateTime,
    pub verification_code: String,
}

/// A platform member. Read-only from the jobs' perspective.
#[derive(Debug, Clone, FromRow)]
pub struct User {
    pub user_id: String,
    pub email: String,
    pub display_name: String,
}

/// A gift that a winning ticket can be redeemed for. Read-only here.
#[derive(Debug, Clone, FromRow)]
pub struct Gift {
    pub gift_id: String,
    pub name: String,
    pub points_value: i64,
}

/// A member's point wallet.
#[derive(Debug, Clone, FromRow)]
pub struct Wallet {
    pub user_id: String,
    pub balance: i64,
}

/// A pending bonus-point grant. Attributed to the member's wallet exactly
/// once by the bonus point job.
#[derive(Debug, Clone, FromRow)]
pub struct BonusGrant {
    pub grant_id: String,
    pub user_id: String,
    pub points: i64,
    pub attributed: bool,
    pub attributed_at: Option<NaiveDateTime>,
    pub created_at: NaiveDateTime,
}

/// An in-app notification row. Insert-only; the platform surfaces these to
/// the recipient.
#[derive(Debug, Clone, FromRow)]
pub struct NotificationRecord {
    pub notification_id: String,
    pub user_id: String,
    pub kind: String,
    pub payload: String,
    pub created_at: NaiveDateTime,
}

/// Unified database abstraction over SQLite and Postgres.
///
/// Available variants depend on enabled features:
/// - `sqlite` feature enables `Database::SQLite`
/// - `postgres` feature enables `Database::Postgres`
#[derive(Debug, Clone)]
pub enum Database {
    #[cfg(feature = "sqlite")]
    SQLite(SqlitePool),
    #[cfg(feature = "postgres")]
    Postgres(PgPool),
}

impl Database {
    /// Initialize the database connection based on configuration.
    ///
    /// Uses the global configuration from `config.toml` and environment
    /// variables. See `crate::config` for configuration options.
    pub async fn new() -> StoreResult<Arc<Self>> {
        let config = get_config()?;
        let db_config = &config.database;

        match db_config.db_type.as_str() {
            #[cfg(feature = "sqlite")]
            "sqlite" => {
                let pool = SqlitePool::connect(&db_config.sqlite_url)
                    .await
                    .map_err(|e| {
                        error!("Failed to connect to SQLite: {e}");
                        StoreError::Database(format!("failed to connect to SQLite: {e}"))
                    })?;

                Ok(Arc::new(Database::SQLite(pool)))
            }
            #[cfg(not(feature = "sqlite"))]
            "sqlite" => Err(StoreError::Config(
                "SQLite support not compiled in. Enable the 'sqlite' feature.".to_string(),
            )),
            #[cfg(feature = "postgres")]
            "postgres" => {
                let pool = PgPool::connect(&db_config.postgres_url)
                    .await
                    .map_err(|e| {
                        error!("Failed to connect to PostgreSQL: {e}");
                        StoreError::Database(format!("failed to connect to PostgreSQL: {e}"))
                    })?;

                Ok(Arc::new(Database::Postgres(pool)))
            }
            #[cfg(not(feature = "postgres"))]
            "postgres" => Err(StoreError::Config(
                "PostgreSQL support not compiled in. Enable the 'postgres' feature.".to_string(),
            )),
            other => Err(StoreError::Config(format!(
                "unsupported database type: {other}"
            ))),
        }
    }

    // ------------------------------------------------------------------
    // Tickets
    // ------------------------------------------------------------------

    /// Insert a new ticket or update an existing one, keyed on `ticket_id`.
    pub async fn insert_ticket(&self, ticket: &Ticket) -> StoreResult<()> {
        match self {
            #[cfg(feature = "sqlite")]
            Database::SQLite(pool) => {
                query(
                    r#"
                    INSERT INTO tickets (
                        ticket_id, user_id, gift_id, consumed,
                        consumed_at, expires_at, verification_code
                    )
                    VALUES (?, ?, ?, ?, ?, ?, ?)
                    ON CONFLICT(ticket_id) DO UPDATE SET
                        user_id           = excluded.user_id,
                        gift_id           = excluded.gift_id,
                        consumed          = excluded.consumed,
                        consumed_at       = excluded.consumed_at,
                        expires_at        = excluded.expires_at,
                        verification_code = excluded.verification_code
                    "#,
                )
                .bind(&ticket.ticket_id)
                .bind(&ticket.user_id)
                .bind(&ticket.gift_id)
                .bind(ticket.consumed)
                .bind(ticket.consumed_at)
                .bind(ticket.expires_at)
                .bind(&ticket.verification_code)
                .execute(pool)
                .await
                .map_err(|e| {
                    error!("SQLite insert_ticket failed: {e}");
                    StoreError::Database(format!("database error: {e}"))
                })?;
            }
            #[cfg(feature = "postgres")]
            Database::Postgres(pool) => {
                query(
                    r#"
                    INSERT INTO tickets (
                        ticket_id, user_id, gift_id, consumed,
                        consumed_at, expires_at, verification_code
                    )
                    VALUES ($1, $2, $3, $4, $5, $6, $7)
                    ON CONFLICT (ticket_id) DO UPDATE SET
                        user_id           = EXCLUDED.user_id,
                        gift_id           = EXCLUDED.gift_id,
                        consumed          = EXCLUDED.consumed,
                        consumed_at       = EXCLUDED.consumed_at,
                        expires_at        = EXCLUDED.expires_at,
                        verification_code = EXCLUDED.verification_code
                    "#,
                )
                .bind(&ticket.ticket_id)
                .bind(&ticket.user_id)
                .bind(&ticket.gift_id)
                .bind(ticket.consumed)
                .bind(ticket.consumed_at)
                .bind(ticket.expires_at)
                .bind(&ticket.verification_code)
                .execute(pool)
                .await
                .map_err(|e| {
                    error!("Postgres insert_ticket failed: {e}");
                    StoreError::Database(format!("database error: {e}"))
                })?;
            }
        }

        Ok(())
    }

    /// Fetch a ticket by its ID.
    pub async fn get_ticket(&self, ticket_id: &str) -> StoreResult<Option<Ticket>> {
        match self {
            #[cfg(feature = "sqlite")]
            Database::SQLite(pool) => {
                let ticket = query_as::<_, Ticket>("SELECT * FROM tickets WHERE ticket_id = ?")
                    .bind(ticket_id)
                    .fetch_optional(pool)
                    .await
                    .map_err(|e| {
                        error!("SQLite get_ticket failed: {e}");
                        StoreError::Database(format!("database error: {e}"))
                    })?;

                Ok(ticket)
            }
            #[cfg(feature = "postgres")]
            Database::Postgres(pool) => {
                let ticket = query_as::<_, Ticket>("SELECT * FROM tickets WHERE ticket_id = $1")
                    .bind(ticket_id)
                    .fetch_optional(pool)
                    .await
                    .map_err(|e| {
                        error!("Postgres get_ticket failed: {e}");
                        StoreError::Database(format!("database error: {e}"))
                    })?;

                Ok(ticket)
            }
        }
    }

    /// Fetch one page of tickets eligible for expiry processing.
    ///
    /// Eligible means `consumed = false AND expires_at < now`. Pages are
    /// keyset-paginated: ordered by `ticket_id`, returning only ids greater
    /// than `after`. The cursor advances even over tickets that end up
    /// skipped, so a skip can never cause the same page to be re-fetched.
    pub async fn fetch_expired_tickets(
        &self,
        now: NaiveDateTime,
        after: Option<&str>,
        limit: i64,
    ) -> StoreResult<Vec<Ticket>> {
        let cursor = after.unwrap_or("");

        match self {
            #[cfg(feature = "sqlite")]
            Database::SQLite(pool) => {
                let tickets = query_as::<_, Ticket>(
                    "SELECT * FROM tickets \
                     WHERE consumed = 0 AND expires_at < ? AND ticket_id > ? \
                     ORDER BY ticket_id \
                     LIMIT ?",
                )
                .bind(now)
                .bind(cursor)
                .bind(limit)
                .fetch_all(pool)
                .await
                .map_err(|e| {
                    error!("SQLite fetch_expired_tickets failed: {e}");
                    StoreError::Database(format!("database error: {e}"))
                })?;

                Ok(tickets)
            }
            #[cfg(feature = "postgres")]
            Database::Postgres(pool) => {
                let tickets = query_as::<_, Ticket>(
                    "SELECT * FROM tickets \
                     WHERE consumed = FALSE AND expires_at < $1 AND ticket_id > $2 \
                     ORDER BY ticket_id \
                     LIMIT $3",
                )
                .bind(now)
                .bind(cursor)
                .bind(limit)
                .fetch_all(pool)
                .await
                .map_err(|e| {
                    error!("Postgres fetch_expired_tickets failed: {e}");
                    StoreError::Database(format!("database error: {e}"))
                })?;

                Ok(tickets)
            }
        }
    }

    /// Flag a ticket as consumed due to expiry.
    ///
    /// The update is a compare-and-set: it only applies while the ticket is
    /// still unconsumed, so two overlapping runs cannot both claim it.
    ///
    /// Returns:
    /// - `Ok(true)` if this call consumed the ticket
    /// - `Ok(false)` if another writer got there first (or the ticket is gone)
    /// - `Err(StoreError::Database)` on DB failure
    pub async fn mark_ticket_consumed(
        &self,
        ticket_id: &str,
        now: NaiveDateTime,
    ) -> StoreResult<bool> {
        let rows_affected = match self {
            #[cfg(feature = "sqlite")]
            Database::SQLite(pool) => query(
                "UPDATE tickets \
                     SET consumed = 1, consumed_at = ? \
                     WHERE ticket_id = ? AND consumed = 0",
            )
            .bind(now)
            .bind(ticket_id)
            .execute(pool)
            .await
            .map_err(|e| {
                error!("SQLite mark_ticket_consumed failed: {e}");
                StoreError::Database(format!("database error: {e}"))
            })?
            .rows_affected(),
            #[cfg(feature = "postgres")]
            Database::Postgres(pool) => query(
                "UPDATE tickets \
                     SET consumed = TRUE, consumed_at = $1 \
                     WHERE ticket_id = $2 AND consumed = FALSE",
            )
            .bind(now)
            .bind(ticket_id)
            .execute(pool)
            .await
            .map_err(|e| {
                error!("Postgres mark_ticket_consumed failed: {e}");
                StoreError::Database(format!("database error: {e}"))
            })?
            .rows_affected(),
        };

        Ok(rows_affected > 0)
    }

    // ------------------------------------------------------------------
    // Users and gifts
    // ------------------------------------------------------------------

    /// Insert a new user or update an existing one, keyed on `user_id`.
    pub async fn insert_user(&self, user: &User) -> StoreResult<()> {
        match self {
            #[cfg(feature = "sqlite")]
            Database::SQLite(pool) => {
                query(
                    "INSERT INTO users (user_id, email, display_name) \
                     VALUES (?, ?, ?) \
                     ON CONFLICT(user_id) DO UPDATE SET \
                         email = excluded.email, \
                         display_name = excluded.display_name",
                )
                .bind(&user.user_id)
                .bind(&user.email)
                .bind(&user.display_name)
                .execute(pool)
                .await
                .map_err(|e| {
                    error!("SQLite insert_user failed: {e}");
                    StoreError::Database(format!("database error: {e}"))
                })?;
            }
            #[cfg(feature = "postgres")]
            Database::Postgres(pool) => {
                query(
                    "INSERT INTO users (user_id, email, display_name) \
                     VALUES ($1, $2, $3) \
                     ON CONFLICT (user_id) DO UPDATE SET \
                         email = EXCLUDED.email, \
                         display_name = EXCLUDED.display_name",
                )
                .bind(&user.user_id)
                .bind(&user.email)
                .bind(&user.display_name)
                .execute(pool)
                .await
                .map_err(|e| {
                    error!("Postgres insert_user failed: {e}");
                    StoreError::Database(format!("database error: {e}"))
                })?;
            }
        }

        Ok(())
    }

    /// Fetch a user by ID.
    ///
    /// Returns `Ok(None)` if the user does not exist; callers treat that as
    /// a typed branch, not an error.
    pub async fn get_user(&self, user_id: &str) -> StoreResult<Option<User>> {
        match self {
            #[cfg(feature = "sqlite")]
            Database::SQLite(pool) => {
                let user = query_as::<_, User>("SELECT * FROM users WHERE user_id = ?")
                    .bind(user_id)
                    .fetch_optional(pool)
                    .await
                    .map_err(|e| {
                        error!("SQLite get_user failed: {e}");
                        StoreError::Database(format!("database error: {e}"))
                    })?;

                Ok(user)
            }
            #[cfg(feature = "postgres")]
            Database::Postgres(pool) => {
                let user = query_as::<_, User>("SELECT * FROM users WHERE user_id = $1")
                    .bind(user_id)
                    .fetch_optional(pool)
                    .await
                    .map_err(|e| {
                        error!("Postgres get_user failed: {e}");
                        StoreError::Database(format!("database error: {e}"))
                    })?;

                Ok(user)
            }
        }
    }

    /// Insert a new gift or update an existing one, keyed on `gift_id`.
    pub async fn insert_gift(&self, gift: &Gift) -> StoreResult<()> {
        match self {
            #[cfg(feature = "sqlite")]
            Database::SQLite(pool) => {
                query(
                    "INSERT INTO gifts (gift_id, name, points_value) \
                     VALUES (?, ?, ?) \
                     ON CONFLICT(gift_id) DO UPDATE SET \
                         name = excluded.name, \
                         points_value = excluded.points_value",
                )
                .bind(&gift.gift_id)
                .bind(&gift.name)
                .bind(gift.points_value)
                .execute(pool)
                .await
                .map_err(|e| {
                    error!("SQLite insert_gift failed: {e}");
                    StoreError::Database(format!("database error: {e}"))
                })?;
            }
            #[cfg(feature = "postgres")]
            Database::Postgres(pool) => {
                query(
                    "INSERT INTO gifts (gift_id, name, points_value) \
                     VALUES ($1, $2, $3) \
                     ON CONFLICT (gift_id) DO UPDATE SET \
                         name = EXCLUDED.name, \
                         points_value = EXCLUDED.points_value",
                )
                .bind(&gift.gift_id)
                .bind(&gift.name)
                .bind(gift.points_value)
                .execute(pool)
                .await
                .map_err(|e| {
                    error!("Postgres insert_gift failed: {e}");
                    StoreError::Database(format!("database error: {e}"))
                })?;
            }
        }

        Ok(())
    }

    /// Fetch a gift by ID.
    pub async fn get_gift(&self, gift_id: &str) -> StoreResult<Option<Gift>> {
        match self {
            #[cfg(feature = "sqlite")]
            Database::SQLite(pool) => {
                let gift = query_as::<_, Gift>("SELECT * FROM gifts WHERE gift_id = ?")
                    .bind(gift_id)
                    .fetch_optional(pool)
                    .await
                    .map_err(|e| {
                        error!("SQLite get_gift failed: {e}");
                        StoreError::Database(format!("database error: {e}"))
                    })?;

                Ok(gift)
            }
            #[cfg(feature = "postgres")]
            Database::Postgres(pool) => {
                let gift = query_as::<_, Gift>("SELECT * FROM gifts WHERE gift_id = $1")
                    .bind(gift_id)
                    .fetch_optional(pool)
                    .await
                    .map_err(|e| {
                        error!("Postgres get_gift failed: {e}");
                        StoreError::Database(format!("database error: {e}"))
                    })?;

                Ok(gift)
            }
        }
    }

    // ------------------------------------------------------------------
    // Wallets and bonus grants
    // ------------------------------------------------------------------

    /// Insert a new wallet or replace an existing one, keyed on `user_id`.
    pub async fn insert_wallet(&self, wallet: &Wallet) -> StoreResult<()> {
        match self {
            #[cfg(feature = "sqlite")]
            Database::SQLite(pool) => {
                query(
                    "INSERT INTO wallets (user_id, balance) \
                     VALUES (?, ?) \
                     ON CONFLICT(user_id) DO UPDATE SET \
                         balance = excluded.balance",
                )
                .bind(&wallet.user_id)
                .bind(wallet.balance)
                .execute(pool)
                .await
                .map_err(|e| {
                    error!("SQLite insert_wallet failed: {e}");
                    StoreError::Database(format!("database error: {e}"))
                })?;
            }
            #[cfg(feature = "postgres")]
            Database::Postgres(pool) => {
                query(
                    "INSERT INTO wallets (user_id, balance) \
                     VALUES ($1, $2) \
                     ON CONFLICT (user_id) DO UPDATE SET \
                         balance = EXCLUDED.balance",
                )
                .bind(&wallet.user_id)
                .bind(wallet.balance)
                .execute(pool)
                .await
                .map_err(|e| {
                    error!("Postgres insert_wallet failed: {e}");
                    StoreError::Database(format!("database error: {e}"))
                })?;
            }
        }

        Ok(())
    }

    /// Fetch a member's wallet.
    pub async fn get_wallet(&self, user_id: &str) -> StoreResult<Option<Wallet>> {
        match self {
            #[cfg(feature = "sqlite")]
            Database::SQLite(pool) => {
                let wallet = query_as::<_, Wallet>("SELECT * FROM wallets WHERE user_id = ?")
                    .bind(user_id)
                    .fetch_optional(pool)
                    .await
                    .map_err(|e| {
                        error!("SQLite get_wallet failed: {e}");
                        StoreError::Database(format!("database error: {e}"))
                    })?;

                Ok(wallet)
            }
            #[cfg(feature = "postgres")]
            Database::Postgres(pool) => {
                let wallet = query_as::<_, Wallet>("SELECT * FROM wallets WHERE user_id = $1")
                    .bind(user_id)
                    .fetch_optional(pool)
                    .await
                    .map_err(|e| {
                        error!("Postgres get_wallet failed: {e}");
                        StoreError::Database(format!("database error: {e}"))
                    })?;

                Ok(wallet)
            }
        }
    }

    /// Insert a new bonus grant or update an existing one, keyed on `grant_id`.
    pub async fn insert_grant(&self, grant: &BonusGrant) -> StoreResult<()> {
        match self {
            #[cfg(feature = "sqlite")]
            Database::SQLite(pool) => {
                query(
                    r#"
                    INSERT INTO bonus_points (
                        grant_id, user_id, points, attributed, attributed_at, created_at
                    )
                    VALUES (?, ?, ?, ?, ?, ?)
                    ON CONFLICT(grant_id) DO UPDATE SET
                        user_id       = excluded.user_id,
                        points        = excluded.points,
                        attributed    = excluded.attributed,
                        attributed_at = excluded.attributed_at,
                        created_at    = excluded.created_at
                    "#,
                )
                .bind(&grant.grant_id)
                .bind(&grant.user_id)
                .bind(grant.points)
                .bind(grant.attributed)
                .bind(grant.attributed_at)
                .bind(grant.created_at)
                .execute(pool)
                .await
                .map_err(|e| {
                    error!("SQLite insert_grant failed: {e}");
                    StoreError::Database(format!("database error: {e}"))
                })?;
            }
            #[cfg(feature = "postgres")]
            Database::Postgres(pool) => {
                query(
                    r#"
                    INSERT INTO bonus_points (
                        grant_id, user_id, points, attributed, attributed_at, created_at
                    )
                    VALUES ($1, $2, $3, $4, $5, $6)
                    ON CONFLICT (grant_id) DO UPDATE SET
                        user_id       = EXCLUDED.user_id,
                        points        = EXCLUDED.points,
                        attributed    = EXCLUDED.attributed,
                        attributed_at = EXCLUDED.attributed_at,
                        created_at    = EXCLUDED.created_at
                    "#,
                )
                .bind(&grant.grant_id)
                .bind(&grant.user_id)
                .bind(grant.points)
                .bind(grant.attributed)
                .bind(grant.attributed_at)
                .bind(grant.created_at)
                .execute(pool)
                .await
                .map_err(|e| {
                    error!("Postgres insert_grant failed: {e}");
                    StoreError::Database(format!("database error: {e}"))
                })?;
            }
        }

        Ok(())
    }

    /// Fetch a bonus grant by ID.
    pub async fn get_grant(&self, grant_id: &str) -> StoreResult<Option<BonusGrant>> {
        match self {
            #[cfg(feature = "sqlite")]
            Database::SQLite(pool) => {
                let grant =
                    query_as::<_, BonusGrant>("SELECT * FROM bonus_points WHERE grant_id = ?")
                        .bind(grant_id)
                        .fetch_optional(pool)
                        .await
                        .map_err(|e| {
                            error!("SQLite get_grant failed: {e}");
                            StoreError::Database(format!("database error: {e}"))
                        })?;

                Ok(grant)
            }
            #[cfg(feature = "postgres")]
            Database::Postgres(pool) => {
                let grant =
                    query_as::<_, BonusGrant>("SELECT * FROM bonus_points WHERE grant_id = $1")
                        .bind(grant_id)
                        .fetch_optional(pool)
                        .await
                        .map_err(|e| {
                            error!("Postgres get_grant failed: {e}");
                            StoreError::Database(format!("database error: {e}"))
                        })?;

                Ok(grant)
            }
        }
    }

    /// Fetch one page of unattributed bonus grants, keyset-paginated by
    /// `grant_id` like [`Database::fetch_expired_tickets`].
    pub async fn fetch_pending_grants(
        &self,
        after: Option<&str>,
        limit: i64,
    ) -> StoreResult<Vec<BonusGrant>> {
        let cursor = after.unwrap_or("");

        match self {
            #[cfg(feature = "sqlite")]
            Database::SQLite(pool) => {
                let grants = query_as::<_, BonusGrant>(
                    "SELECT * FROM bonus_points \
                     WHERE attributed = 0 AND grant_id > ? \
                     ORDER BY grant_id \
                     LIMIT ?",
                )
                .bind(cursor)
                .bind(limit)
                .fetch_all(pool)
                .await
                .map_err(|e| {
                    error!("SQLite fetch_pending_grants failed: {e}");
                    StoreError::Database(format!("database error: {e}"))
                })?;

                Ok(grants)
            }
            #[cfg(feature = "postgres")]
            Database::Postgres(pool) => {
                let grants = query_as::<_, BonusGrant>(
                    "SELECT * FROM bonus_points \
                     WHERE attributed = FALSE AND grant_id > $1 \
                     ORDER BY grant_id \
                     LIMIT $2",
                )
                .bind(cursor)
                .bind(limit)
                .fetch_all(pool)
                .await
                .map_err(|e| {
                    error!("Postgres fetch_pending_grants failed: {e}");
                    StoreError::Database(format!("database error: {e}"))
                })?;

                Ok(grants)
            }
        }
    }

    /// Attribute a bonus grant: credit the member's wallet and flag the
    /// grant, atomically.
    ///
    /// Both statements run in one transaction. The grant flag is a
    /// compare-and-set on `attributed = false`; if another run already
    /// claimed the grant the transaction is rolled back and `Ok(false)` is
    /// returned. Any statement failure rolls back the whole grant.
    pub async fn attribute_grant(
        &self,
        grant: &BonusGrant,
        now: NaiveDateTime,
    ) -> StoreResult<bool> {
        match self {
            #[cfg(feature = "sqlite")]
            Database::SQLite(pool) => {
                let mut tx = pool.begin().await.map_err(|e| {
                    error!("SQLite attribute_grant begin failed: {e}");
                    StoreError::Database(format!("database error: {e}"))
                })?;

                let claimed = query(
                    "UPDATE bonus_points \
                     SET attributed = 1, attributed_at = ? \
                     WHERE grant_id = ? AND attributed = 0",
                )
                .bind(now)
                .bind(&grant.grant_id)
                .execute(&mut *tx)
                .await
                .map_err(|e| {
                    error!("SQLite attribute_grant claim failed: {e}");
                    StoreError::Database(format!("database error: {e}"))
                })?
                .rows_affected();

                if claimed == 0 {
                    tx.rollback().await.map_err(|e| {
                        error!("SQLite attribute_grant rollback failed: {e}");
                        StoreError::Database(format!("database error: {e}"))
                    })?;
                    return Ok(false);
                }

                query(
                    "INSERT INTO wallets (user_id, balance) \
                     VALUES (?, ?) \
                     ON CONFLICT(user_id) DO UPDATE SET \
                         balance = balance + excluded.balance",
                )
                .bind(&grant.user_id)
                .bind(grant.points)
                .execute(&mut *tx)
                .await
                .map_err(|e| {
                    error!("SQLite attribute_grant credit failed: {e}");
                    StoreError::Database(format!("database error: {e}"))
                })?;

                tx.commit().await.map_err(|e| {
                    error!("SQLite attribute_grant commit failed: {e}");
                    StoreError::Database(format!("database error: {e}"))
                })?;

                Ok(true)
            }
            #[cfg(feature = "postgres")]
            Database::Postgres(pool) => {
                let mut tx = pool.begin().await.map_err(|e| {
                    error!("Postgres attribute_grant begin failed: {e}");
                    StoreError::Database(format!("database error: {e}"))
                })?;

                let claimed = query(
                    "UPDATE bonus_points \
                     SET attributed = TRUE, attributed_at = $1 \
                     WHERE grant_id = $2 AND attributed = FALSE",
                )
                .bind(now)
                .bind(&grant.grant_id)
                .execute(&mut *tx)
                .await
                .map_err(|e| {
                    error!("Postgres attribute_grant claim failed: {e}");
                    StoreError::Database(format!("database error: {e}"))
                })?
                .rows_affected();

                if claimed == 0 {
                    tx.rollback().await.map_err(|e| {
                        error!("Postgres attribute_grant rollback failed: {e}");
                        StoreError::Database(format!("database error: {e}"))
                    })?;
                    return Ok(false);
                }

                query(
                    "INSERT INTO wallets (user_id, balance) \
                     VALUES ($1, $2) \
                     ON CONFLICT (user_id) DO UPDATE SET \
                         balance = wallets.balance + EXCLUDED.balance",
                )
                .bind(&grant.user_id)
                .bind(grant.points)
                .execute(&mut *tx)
                .await
                .map_err(|e| {
                    error!("Postgres attribute_grant credit failed: {e}");
                    StoreError::Database(format!("database error: {e}"))
                })?;

                tx.commit().await.map_err(|e| {
                    error!("Postgres attribute_grant commit failed: {e}");
                    StoreError::Database(format!("database error: {e}"))
                })?;

                Ok(true)
            }
        }
    }

    // ------------------------------------------------------------------
    // Notifications
    // ------------------------------------------------------------------

    /// Append a notification record. Notifications are never updated or
    /// deleted by this component.
    pub async fn insert_notification(&self, record: &NotificationRecord) -> StoreResult<()> {
        match self {
            #[cfg(feature = "sqlite")]
            Database::SQLite(pool) => {
                query(
                    "INSERT INTO notifications \
                     (notification_id, user_id, kind, payload, created_at) \
                     VALUES (?, ?, ?, ?, ?)",
                )
                .bind(&record.notification_id)
                .bind(&record.user_id)
                .bind(&record.kind)
                .bind(&record.payload)
                .bind(record.created_at)
                .execute(pool)
                .await
                .map_err(|e| {
                    error!("SQLite insert_notification failed: {e}");
                    StoreError::Database(format!("database error: {e}"))
                })?;
            }
            #[cfg(feature = "postgres")]
            Database::Postgres(pool) => {
                query(
                    "INSERT INTO notifications \
                     (notification_id, user_id, kind, payload, created_at) \
                     VALUES ($1, $2, $3, $4, $5)",
                )
                .bind(&record.notification_id)
                .bind(&record.user_id)
                .bind(&record.kind)
                .bind(&record.payload)
                .bind(record.created_at)
                .execute(pool)
                .await
                .map_err(|e| {
                    error!("Postgres insert_notification failed: {e}");
                    StoreError::Database(format!("database error: {e}"))
                })?;
            }
        }

        Ok(())
    }

    /// List a user's notifications, newest first.
    pub async fn notifications_for_user(
        &self,
        user_id: &str,
    ) -> StoreResult<Vec<NotificationRecord>> {
        match self {
            #[cfg(feature = "sqlite")]
            Database::SQLite(pool) => {
                let records = query_as::<_, NotificationRecord>(
                    "SELECT * FROM notifications \
                     WHERE user_id = ? \
                     ORDER BY created_at DESC, notification_id DESC",
                )
                .bind(user_id)
                .fetch_all(pool)
                .await
                .map_err(|e| {
                    error!("SQLite notifications_for_user failed: {e}");
                    StoreError::Database(format!("database error: {e}"))
                })?;

                Ok(records)
            }
            #[cfg(feature = "postgres")]
            Database::Postgres(pool) => {
                let records = query_as::<_, NotificationRecord>(
                    "SELECT * FROM notifications \
                     WHERE user_id = $1 \
                     ORDER BY created_at DESC, notification_id DESC",
                )
                .bind(user_id)
                .fetch_all(pool)
                .await
                .map_err(|e| {
                    error!("Postgres notifications_for_user failed: {e}");
                    StoreError::Database(format!("database error: {e}"))
                })?;

                Ok(records)
            }
        }
    }
}
