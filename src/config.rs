//! Connection and retry configuration.

use std::time::Duration;

use crate::error::{QuarryError, Result};

/// Environment variable consulted by [`DbConfig::from_env`].
pub const DATABASE_URL_ENV: &str = "QUARRY_DATABASE_URL";

/// Configuration for the backing store: one connection-string value plus
/// pool sizing knobs and the fixed per-statement timeout.
#[derive(Debug, Clone)]
pub struct DbConfig {
    /// Connection string, e.g. `sqlite:/var/lib/quarry/quarry.db`.
    pub url: String,
    /// Pool capacity. Callers beyond this block until a connection frees up.
    pub max_connections: u32,
    /// How long an idle connection is kept before being reaped.
    pub idle_timeout: Duration,
    /// Upper bound on acquiring a connection from the pool.
    pub connect_timeout: Duration,
    /// Per-statement timeout, applied as a preparatory statement on every
    /// acquired connection.
    pub statement_timeout: Duration,
    /// Attempts per statement for transient failures.
    pub retry_max_attempts: u32,
    /// Backoff for attempt `n` is `retry_base_delay * 2^(n-1)`.
    pub retry_base_delay: Duration,
}

impl DbConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            max_connections: 20,
            idle_timeout: Duration::from_secs(600),
            connect_timeout: Duration::from_secs(10),
            statement_timeout: Duration::from_secs(30),
            retry_max_attempts: 3,
            retry_base_delay: Duration::from_millis(500),
        }
    }

    /// Read the connection string from `QUARRY_DATABASE_URL`.
    pub fn from_env() -> Result<Self> {
        let url = std::env::var(DATABASE_URL_ENV).map_err(|_| {
            QuarryError::Configuration(format!("{DATABASE_URL_ENV} is not set"))
        })?;
        let config = Self::new(url);
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.url.trim().is_empty() {
            return Err(QuarryError::Configuration(
                "database url must not be empty".to_string(),
            ));
        }
        if self.max_connections == 0 {
            return Err(QuarryError::Configuration(
                "max_connections must be at least 1".to_string(),
            ));
        }
        if self.retry_max_attempts == 0 {
            return Err(QuarryError::Configuration(
                "retry_max_attempts must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = DbConfig::new("sqlite:test.db");
        assert_eq!(config.max_connections, 20);
        assert_eq!(config.statement_timeout, Duration::from_secs(30));
        assert_eq!(config.retry_max_attempts, 3);
    }

    #[test]
    fn test_validate_rejects_empty_url() {
        let config = DbConfig::new("  ");
        assert!(matches!(
            config.validate(),
            Err(QuarryError::Configuration(_))
        ));
    }

    #[test]
    fn test_validate_rejects_zero_pool() {
        let mut config = DbConfig::new("sqlite:test.db");
        config.max_connections = 0;
        assert!(config.validate().is_err());
    }
}
