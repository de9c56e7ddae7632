//! Integration tests for configuration loading.
//!
//! The configuration singleton is loaded once per process, so every test
//! that touches it (or the environment) runs serially and agrees on the
//! same environment.

#![cfg(feature = "sqlite")]

use serial_test::serial;

use cagnotte::config::get_config;
use cagnotte::store::Database;

fn set_test_env() {
    std::env::set_var("CAGNOTTE_DATABASE_TYPE", "sqlite");
    std::env::set_var("CAGNOTTE_DATABASE_URL", "sqlite::memory:");
    std::env::set_var("CAGNOTTE_LOG_LEVEL", "warn");
    std::env::set_var("CAGNOTTE_LOGGING_ENABLED", "false");
}

#[test]
#[serial]
fn config_reads_environment_overrides() {
    set_test_env();

    let config = get_config().expect("failed to load config");

    assert_eq!(config.database.db_type, "sqlite");
    assert_eq!(config.database.sqlite_url, "sqlite::memory:");
    assert_eq!(config.logging.level, "warn");

    // The binary consults this flag before installing the subscriber.
    assert!(!config.logging.enabled);

    // Defaults fill in everything the environment leaves alone.
    assert_eq!(config.jobs.ticket_expiry_cron, "0 15 * * * *");
    assert!(!config.jobs.ticket_expiry_notify);
}

#[tokio::test]
#[serial]
async fn database_connects_from_config() {
    set_test_env();

    let db = Database::new().await.expect("failed to create database");
    match &*db {
        Database::SQLite(_) => {}
        #[allow(unreachable_patterns)]
        _ => panic!("expected the SQLite backend"),
    }
}
