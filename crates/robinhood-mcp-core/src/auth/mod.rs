//! Authentication module for managing the brokerage session.
//!
//! This module provides:
//! - `Credentials` / `EnvCredentials`: login inputs read from the environment
//! - `Totp`: second-factor codes from a base32 secret
//! - `SessionCache`: the on-disk token cache
//! - `SessionManager`: lazy login, cache restore and re-login on expiry
//!
//! Nothing here touches the network until the first tool call.

pub mod credentials;
pub mod manager;
pub mod session;
pub mod totp;

pub use credentials::{CredentialSource, Credentials, EnvCredentials};
pub use manager::{SessionError, SessionManager, SessionPhase, SessionStatus};
pub use session::{Session, SessionCache, SessionOrigin, TokenBlob};
pub use totp::Totp;
