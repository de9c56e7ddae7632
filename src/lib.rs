//! Cagnotte batch jobs - the reconciliation layer of the Cagnotte rewards
//! platform.
//!
//! The platform issues winning tickets that members redeem for gifts, and
//! grants bonus points that land in member wallets. This crate owns the two
//! batch processes that finalize those records:
//!
//! - [`jobs::ticket_expiry`] flags tickets that expired unused
//! - [`jobs::bonus_points`] credits pending bonus-point grants, monthly
//!
//! Both jobs run against the shared [`store::Database`] (SQLite or
//! PostgreSQL, feature-gated), dispatch user notifications through the
//! [`notify::Notifier`] seam, and read time from an injected
//! [`clock::Clock`].
//!
//! # Features
//!
//! - `sqlite` - SQLite database backend. Enabled by default.
//! - `postgres` - PostgreSQL database backend.

pub mod clock;
pub mod config;
pub mod errors;
pub mod jobs;
pub mod notify;
pub mod store;
