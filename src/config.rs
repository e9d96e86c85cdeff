use std::env;
use std::time::Duration;

use crate::error::{PgMapError, Result};

/// Environment variable holding the connection string.
pub const DATABASE_URL_ENV: &str = "DATABASE_URL";

/// Environment variable holding the default command timeout in seconds.
pub const COMMAND_TIMEOUT_ENV: &str = "PGMAP_COMMAND_TIMEOUT_SECS";

/// Connection settings for `TokioPostgresConnection`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MapperConfig {
    /// libpq-style connection string or `postgres://` URL.
    pub database_url: String,
    /// Timeout for commands that do not set their own.
    pub command_timeout: Option<Duration>,
}

impl MapperConfig {
    pub fn new(database_url: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
            command_timeout: None,
        }
    }

    pub fn command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = Some(timeout);
        self
    }

    /// Reads `DATABASE_URL` and the optional `PGMAP_COMMAND_TIMEOUT_SECS`.
    ///
    /// # Errors
    /// Returns `PgMapError::Config` if the URL is unset or the timeout is not a whole number.
    pub fn from_env() -> Result<Self> {
        let database_url = env::var(DATABASE_URL_ENV)
            .map_err(|_| PgMapError::Config(format!("{DATABASE_URL_ENV} is not set")))?;
        let timeout = env::var(COMMAND_TIMEOUT_ENV).ok();
        Self::from_parts(database_url, timeout.as_deref())
    }

    fn from_parts(database_url: String, timeout_secs: Option<&str>) -> Result<Self> {
        let command_timeout = match timeout_secs.map(str::trim).filter(|s| !s.is_empty()) {
            Some(raw) => {
                let secs: u64 = raw.parse().map_err(|_| {
                    PgMapError::Config(format!("{COMMAND_TIMEOUT_ENV} must be a whole number of seconds, got {raw:?}"))
                })?;
                Some(Duration::from_secs(secs))
            }
            None => None,
        };
        let config = Self {
            database_url,
            command_timeout,
        };
        config.validate()?;
        Ok(config)
    }

    /// Checks the settings before connecting.
    pub fn validate(&self) -> Result<()> {
        if self.database_url.trim().is_empty() {
            return Err(PgMapError::Config("database url is required".to_string()));
        }
        if self.command_timeout == Some(Duration::ZERO) {
            return Err(PgMapError::Config(
                "command timeout must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}
