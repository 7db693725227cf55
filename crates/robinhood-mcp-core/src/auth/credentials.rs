use std::fmt;

use crate::config::{non_empty, ConfigError, PASSWORD_VAR, TOTP_SECRET_VAR, USERNAME_VAR};

use super::totp::Totp;

/// Shorter values are left alone by `redact`; they would match unrelated text
const MIN_REDACTED_LEN: usize = 4;

/// Login inputs. `Debug` never prints the values.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    username: String,
    password: String,
    totp_secret: Option<String>,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>, totp_secret: Option<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
            totp_secret: non_empty(totp_secret),
        }
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn password(&self) -> &str {
        &self.password
    }

    pub fn has_totp_secret(&self) -> bool {
        self.totp_secret.is_some()
    }

    /// Decode the TOTP secret, if one is configured.
    pub fn totp(&self) -> Result<Option<Totp>, ConfigError> {
        self.totp_secret.as_deref().map(Totp::from_base32).transpose()
    }

    /// Replace any credential material that appears in `text`. Values shorter
    /// than four characters are not replaced.
    pub fn redact(&self, text: &str) -> String {
        let mut secrets: Vec<&str> = vec![self.password.as_str(), self.username.as_str()];
        if let Some(ref secret) = self.totp_secret {
            secrets.push(secret.as_str());
        }
        // Longest first so a secret containing another is replaced whole
        secrets.sort_by_key(|s| std::cmp::Reverse(s.len()));

        let mut redacted = text.to_string();
        for secret in secrets.into_iter().filter(|s| s.chars().count() >= MIN_REDACTED_LEN) {
            redacted = redacted.replace(secret, "***");
        }
        redacted
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &"<redacted>")
            .field("password", &"<redacted>")
            .field("totp_secret", &self.totp_secret.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Where the session manager gets credentials from.
///
/// Loading happens on first use rather than at startup, so a misconfigured
/// process still starts and reports the problem through a tool result.
pub trait CredentialSource: Send + Sync {
    fn load(&self) -> Result<Credentials, ConfigError>;
}

impl CredentialSource for Credentials {
    fn load(&self) -> Result<Credentials, ConfigError> {
        Ok(self.clone())
    }
}

type Lookup = Box<dyn Fn(&str) -> Option<String> + Send + Sync>;

/// Reads `ROBINHOOD_USERNAME`, `ROBINHOOD_PASSWORD` and the optional
/// `ROBINHOOD_TOTP_SECRET`.
pub struct EnvCredentials {
    lookup: Lookup,
}

impl EnvCredentials {
    /// Read from the process environment
    pub fn new() -> Self {
        Self::with_lookup(|name| std::env::var(name).ok())
    }

    pub fn with_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String> + Send + Sync + 'static,
    {
        Self {
            lookup: Box::new(lookup),
        }
    }

    fn required(&self, name: &'static str) -> Result<String, ConfigError> {
        non_empty((self.lookup)(name))
            .map(|v| v.trim().to_string())
            .ok_or(ConfigError::MissingVar(name))
    }
}

impl Default for EnvCredentials {
    fn default() -> Self {
        Self::new()
    }
}

impl CredentialSource for EnvCredentials {
    fn load(&self) -> Result<Credentials, ConfigError> {
        let username = self.required(USERNAME_VAR)?;
        let password = self.required(PASSWORD_VAR)?;
        // Only assembled here; the secret is decoded when a code is needed
        let totp_secret = (self.lookup)(TOTP_SECRET_VAR);
        Ok(Credentials::new(username, password, totp_secret))
    }
}
