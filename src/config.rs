//! Configuration system for the Cagnotte batch jobs.
//!
//! Configuration is loaded from multiple sources with the following precedence:
//! 1. Environment variables (highest priority)
//! 2. `config.toml` file
//! 3. Default values (lowest priority)
//!
//! # Environment Variables
//!
//! All configuration options can be overridden via environment variables:
//! - `CAGNOTTE_DATABASE_TYPE` - Database backend ("sqlite" or "postgres")
//! - `CAGNOTTE_DATABASE_URL` - Database connection URL
//! - `CAGNOTTE_LOG_LEVEL` - Log level (trace, debug, info, warn, error)
//! - `CAGNOTTE_LOGGING_ENABLED` - Enable logging
//! - `CAGNOTTE_TICKET_EXPIRY_CRON` - Cron schedule for the ticket expiry job
//! - `CAGNOTTE_TICKET_EXPIRY_NOTIFY` - Notify ticket owners on scheduled runs
//! - `CAGNOTTE_BONUS_POINTS_CRON` - Cron schedule for the bonus point job

use config::Config;
use serde::Deserialize;
use std::env;
use std::sync::OnceLock;

use crate::errors::{StoreError, StoreResult};

/// Global configuration singleton.
static CONFIG: OnceLock<CagnotteConfig> = OnceLock::new();

/// Root configuration structure.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CagnotteConfig {
    /// Database configuration
    pub database: DatabaseConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
    /// Scheduled job configuration
    pub jobs: JobsConfig,
}

/// Database configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Database type: "sqlite" or "postgres"
    pub db_type: String,
    /// SQLite connection URL
    pub sqlite_url: String,
    /// PostgreSQL connection URL
    pub postgres_url: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            db_type: "sqlite".to_string(),
            sqlite_url: "sqlite://cagnotte.db".to_string(),
            postgres_url: "postgres://localhost/cagnotte".to_string(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Enable logging
    pub enabled: bool,
    /// Log level: trace, debug, info, warn, error
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            level: "info".to_string(),
        }
    }
}

/// Scheduled job configuration.
///
/// Cron expressions use the six-field form accepted by tokio-cron-scheduler
/// (seconds first).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct JobsConfig {
    /// Cron expression for the ticket expiry check (default: hourly at :15)
    pub ticket_expiry_cron: String,
    /// Whether scheduled expiry runs notify ticket owners (default: false)
    pub ticket_expiry_notify: bool,
    /// Cron expression for the bonus point job (default: daily at 2 AM;
    /// the job itself only attributes on the first of the month)
    pub bonus_points_cron: String,
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            // Every hour at minute 15
            ticket_expiry_cron: "0 15 * * * *".to_string(),
            ticket_expiry_notify: false,
            // Daily at 2 AM
            bonus_points_cron: "0 0 2 * * *".to_string(),
        }
    }
}

impl CagnotteConfig {
    /// Load configuration from file and environment.
    ///
    /// Configuration is loaded in this order (later sources override earlier):
    /// 1. Default values
    /// 2. `config.toml` file (optional)
    /// 3. Environment variables
    fn load() -> StoreResult<Self> {
        let builder = Config::builder()
            // Start with defaults
            .set_default("database.db_type", "sqlite")
            .map_err(|e| StoreError::Config(e.to_string()))?
            .set_default("database.sqlite_url", "sqlite://cagnotte.db")
            .map_err(|e| StoreError::Config(e.to_string()))?
            .set_default("database.postgres_url", "postgres://localhost/cagnotte")
            .map_err(|e| StoreError::Config(e.to_string()))?
            .set_default("logging.enabled", true)
            .map_err(|e| StoreError::Config(e.to_string()))?
            .set_default("logging.level", "info")
            .map_err(|e| StoreError::Config(e.to_string()))?
            .set_default("jobs.ticket_expiry_cron", "0 15 * * * *")
            .map_err(|e| StoreError::Config(e.to_string()))?
            .set_default("jobs.ticket_expiry_notify", false)
            .map_err(|e| StoreError::Config(e.to_string()))?
            .set_default("jobs.bonus_points_cron", "0 0 2 * * *")
            .map_err(|e| StoreError::Config(e.to_string()))?
            // Load from config.toml (optional)
            .add_source(config::File::with_name("config").required(false))
            // Override with environment variables
            .set_override_option("database.db_type", env::var("CAGNOTTE_DATABASE_TYPE").ok())
            .map_err(|e| StoreError::Config(e.to_string()))?
            .set_override_option(
                "database.sqlite_url",
                env::var("CAGNOTTE_DATABASE_URL")
                    .ok()
                    .filter(|url| url.starts_with("sqlite")),
            )
            .map_err(|e| StoreError::Config(e.to_string()))?
            .set_override_option(
                "database.postgres_url",
                env::var("CAGNOTTE_DATABASE_URL")
                    .ok()
                    .filter(|url| url.starts_with("postgres")),
            )
            .map_err(|e| StoreError::Config(e.to_string()))?
            .set_override_option(
                "logging.enabled",
                env::var("CAGNOTTE_LOGGING_ENABLED")
                    .ok()
                    .and_then(|v| v.parse::<bool>().ok()),
            )
            .map_err(|e| StoreError::Config(e.to_string()))?
            .set_override_option("logging.level", env::var("CAGNOTTE_LOG_LEVEL").ok())
            .map_err(|e| StoreError::Config(e.to_string()))?
            .set_override_option(
                "jobs.ticket_expiry_cron",
                env::var("CAGNOTTE_TICKET_EXPIRY_CRON").ok(),
            )
            .map_err(|e| StoreError::Config(e.to_string()))?
            .set_override_option(
                "jobs.ticket_expiry_notify",
                env::var("CAGNOTTE_TICKET_EXPIRY_NOTIFY")
                    .ok()
                    .and_then(|v| v.parse::<bool>().ok()),
            )
            .map_err(|e| StoreError::Config(e.to_string()))?
            .set_override_option(
                "jobs.bonus_points_cron",
                env::var("CAGNOTTE_BONUS_POINTS_CRON").ok(),
            )
            .map_err(|e| StoreError::Config(e.to_string()))?;

        let settings = builder
            .build()
            .map_err(|e| StoreError::Config(format!("failed to build config: {e}")))?;

        settings
            .try_deserialize()
            .map_err(|e| StoreError::Config(format!("failed to deserialize config: {e}")))
    }

    /// Validate the configuration.
    pub fn validate(&self) -> StoreResult<()> {
        // Validate database type
        match self.database.db_type.as_str() {
            "sqlite" | "postgres" => {}
            other => {
                return Err(StoreError::Config(format!(
                    "database.db_type must be 'sqlite' or 'postgres', got '{other}'"
                )));
            }
        }

        // Validate log level
        match self.logging.level.to_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            other => {
                return Err(StoreError::Config(format!(
                    "logging.level must be one of: trace, debug, info, warn, error. Got '{other}'"
                )));
            }
        }

        // Validate job schedules
        if self.jobs.ticket_expiry_cron.is_empty() {
            return Err(StoreError::Config(
                "jobs.ticket_expiry_cron cannot be empty".to_string(),
            ));
        }
        if self.jobs.bonus_points_cron.is_empty() {
            return Err(StoreError::Config(
                "jobs.bonus_points_cron cannot be empty".to_string(),
            ));
        }

        Ok(())
    }
}

/// Get the global configuration.
///
/// This loads the configuration on first access and caches it.
/// Returns an error if configuration loading or validation fails.
pub fn get_config() -> StoreResult<&'static CagnotteConfig> {
    // Check if already initialized
    if let Some(config) = CONFIG.get() {
        return Ok(config);
    }

    // Load and validate configuration
    let config = CagnotteConfig::load()?;
    config.validate()?;

    // Try to set it (ignore if another thread beat us)
    let _ = CONFIG.set(config.clone());

    // Return the stored config (either ours or another thread's)
    Ok(CONFIG.get().expect("config was just set"))
}

/// Initialize configuration explicitly.
///
/// Call this early in your application to catch configuration errors.
/// Returns the validated configuration.
pub fn init_config() -> StoreResult<&'static CagnotteConfig> {
    get_config()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = CagnotteConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.database.db_type, "sqlite");
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.jobs.ticket_expiry_cron, "0 15 * * * *");
        assert!(!config.jobs.ticket_expiry_notify);
        assert_eq!(config.jobs.bonus_points_cron, "0 0 2 * * *");
    }

    #[test]
    fn rejects_unknown_database_type() {
        let mut config = CagnotteConfig::default();
        config.database.db_type = "oracle".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_unknown_log_level() {
        let mut config = CagnotteConfig::default();
        config.logging.level = "verbose".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_empty_cron_expressions() {
        let mut config = CagnotteConfig::default();
        config.jobs.ticket_expiry_cron = String::new();
        assert!(config.validate().is_err());

        let mut config = CagnotteConfig::default();
        config.jobs.bonus_points_cron = String::new();
        assert!(config.validate().is_err());
    }
}
