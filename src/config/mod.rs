// src/config/mod.rs
// Environment-driven configuration, loaded once in main and passed down explicitly

use std::str::FromStr;
use tracing::Level;

use crate::error::{RelayError, Result};

#[derive(Debug, Clone)]
pub struct Config {
    // ── Server
    pub host: String,
    pub port: u16,

    // ── Storage
    pub database_url: String,
    pub document_database_url: String,
    pub database_max_connections: u32,

    // ── Cron
    pub cron_enabled: bool,
    pub cron_page_size: i64,

    // ── Logging
    pub log_level: String,
}

// Values may carry trailing comments copied from .env templates ("20 # page size")
fn env_var_or<T>(key: &str, default: T) -> T
where
    T: FromStr,
{
    match std::env::var(key) {
        Ok(val) => {
            let clean_val = val.split('#').next().unwrap_or("").trim();
            clean_val.parse::<T>().unwrap_or(default)
        }
        Err(_) => default,
    }
}

impl Config {
    pub fn from_env() -> Self {
        let database_url: String =
            env_var_or("DATABASE_URL", "sqlite://relaybase.db?mode=rwc".to_string());
        let document_database_url = env_var_or("DOCUMENT_DATABASE_URL", database_url.clone());

        Self {
            host: env_var_or("RELAY_HOST", "0.0.0.0".to_string()),
            port: env_var_or("RELAY_PORT", 8080),
            database_url,
            document_database_url,
            database_max_connections: env_var_or("DATABASE_MAX_CONNECTIONS", 5),
            cron_enabled: env_var_or("CRON_ENABLED", true),
            cron_page_size: env_var_or("CRON_PAGE_SIZE", 20),
            log_level: env_var_or("LOG_LEVEL", "info".to_string()),
        }
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn validate(&self) -> Result<()> {
        if self.database_url.is_empty() {
            return Err(RelayError::Config("DATABASE_URL is empty".to_string()));
        }
        if self.cron_page_size < 1 {
            return Err(RelayError::Config(format!(
                "CRON_PAGE_SIZE must be positive, got {}",
                self.cron_page_size
            )));
        }
        Ok(())
    }

    /// Tracing level for the subscriber; unknown names fall back to INFO
    pub fn tracing_level(&self) -> Level {
        Level::from_str(&self.log_level).unwrap_or(Level::INFO)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_var_or_strips_comments() {
        // SAFETY: test-local key, not read by other tests
        unsafe { std::env::set_var("RELAY_TEST_PAGE_SIZE", " 35 # rows per page") };
        let value: i64 = env_var_or("RELAY_TEST_PAGE_SIZE", 20);
        assert_eq!(value, 35);
    }

    #[test]
    fn test_env_var_or_parse_failure_uses_default() {
        // SAFETY: test-local key, not read by other tests
        unsafe { std::env::set_var("RELAY_TEST_BAD_PORT", "eighty") };
        let value: u16 = env_var_or("RELAY_TEST_BAD_PORT", 8080);
        assert_eq!(value, 8080);
    }

    #[test]
    fn test_validate_rejects_zero_page_size() {
        let mut config = Config::from_env();
        config.database_url = "sqlite::memory:".to_string();
        config.cron_page_size = 20;
        assert!(config.validate().is_ok());

        config.cron_page_size = 0;
        assert!(matches!(config.validate(), Err(RelayError::Config(_))));
    }

    #[test]
    fn test_tracing_level_fallback() {
        let mut config = Config::from_env();
        config.log_level = "chatty".to_string();
        assert_eq!(config.tracing_level(), Level::INFO);
        config.log_level = "debug".to_string();
        assert_eq!(config.tracing_level(), Level::DEBUG);
    }
}
