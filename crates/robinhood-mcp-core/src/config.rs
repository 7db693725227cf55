//! Runtime configuration.
//!
//! Settings come from defaults overridden by environment variables. The
//! session cache is stored at `~/.config/robinhood-mcp/session.bin` unless
//! `ROBINHOOD_MCP_SESSION_FILE` points elsewhere.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Application name used for the config directory path
const APP_NAME: &str = "robinhood-mcp";

/// Session cache file name
const SESSION_FILE: &str = "session.bin";

/// HTTP request timeout in seconds.
/// Long enough for slow market-data endpoints, short enough that the
/// assistant gets an answer instead of hanging.
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// A tool call may chain several requests (holdings, ratings, watchlists),
/// so its overall bound is a multiple of the per-request timeout.
const CALL_TIMEOUT_FACTOR: u32 = 3;

pub const USERNAME_VAR: &str = "ROBINHOOD_USERNAME";
pub const PASSWORD_VAR: &str = "ROBINHOOD_PASSWORD";
pub const TOTP_SECRET_VAR: &str = "ROBINHOOD_TOTP_SECRET";
pub const SESSION_FILE_VAR: &str = "ROBINHOOD_MCP_SESSION_FILE";
pub const TIMEOUT_VAR: &str = "ROBINHOOD_MCP_TIMEOUT_SECS";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} environment variable is required")]
    MissingVar(&'static str),

    #[error("ROBINHOOD_TOTP_SECRET is not a valid base32 secret: {0}")]
    InvalidTotpSecret(String),

    #[error("Invalid value for {name}: {reason}")]
    InvalidValue { name: &'static str, reason: String },

    #[error("Could not find config directory")]
    NoConfigDir,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub session_path: PathBuf,
    pub request_timeout: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build the configuration from an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let session_path = match non_empty(lookup(SESSION_FILE_VAR)) {
            Some(path) => PathBuf::from(path),
            None => Self::default_session_path()?,
        };

        let request_timeout = match non_empty(lookup(TIMEOUT_VAR)) {
            Some(raw) => {
                let secs: u64 = raw.trim().parse().map_err(|_| ConfigError::InvalidValue {
                    name: TIMEOUT_VAR,
                    reason: format!("'{}' is not a whole number of seconds", raw),
                })?;
                if secs == 0 {
                    return Err(ConfigError::InvalidValue {
                        name: TIMEOUT_VAR,
                        reason: "timeout must be at least one second".to_string(),
                    });
                }
                Duration::from_secs(secs)
            }
            None => Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        };

        Ok(Self {
            session_path,
            request_timeout,
        })
    }

    /// Upper bound for one whole tool call.
    pub fn call_timeout(&self) -> Duration {
        self.request_timeout * CALL_TIMEOUT_FACTOR
    }

    pub fn default_session_path() -> Result<PathBuf, ConfigError> {
        let config_dir = dirs::config_dir().ok_or(ConfigError::NoConfigDir)?;
        Ok(config_dir.join(APP_NAME).join(SESSION_FILE))
    }
}

pub(crate) fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}
