use std::fmt;

use async_trait::async_trait;
use serde_json::Value;

use crate::auth::TokenBlob;

use super::{ApiError, ReadOperation};

/// Inputs for a username/password login.
pub struct LoginRequest<'a> {
    pub username: &'a str,
    pub password: &'a str,
    pub mfa_code: Option<String>,
    /// Token from the session being replaced, if any. Lets the client keep
    /// presenting the same device.
    pub previous: Option<&'a TokenBlob>,
}

impl fmt::Debug for LoginRequest<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoginRequest")
            .field("username", &"<redacted>")
            .field("password", &"<redacted>")
            .field("mfa_code", &self.mfa_code.as_ref().map(|_| "<redacted>"))
            .field("previous", &self.previous.is_some())
            .finish()
    }
}

/// Read-only capability interface to the upstream brokerage.
///
/// Besides logging in and checking a token, the only thing an implementation
/// can be asked to do is perform one of the [`ReadOperation`]s.
#[async_trait]
pub trait Brokerage: Send + Sync {
    /// Perform a full login and return the opaque token blob to cache.
    async fn login(&self, request: &LoginRequest<'_>) -> Result<TokenBlob, ApiError>;

    /// Cheap authenticated call used to check that a cached token still works.
    async fn probe(&self, token: &TokenBlob) -> Result<(), ApiError>;

    async fn read(&self, token: &TokenBlob, operation: &ReadOperation) -> Result<Value, ApiError>;
}
