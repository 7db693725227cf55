//! Core library for robinhood-mcp.
//!
//! Exposes read-only Robinhood portfolio and market data as tool calls for
//! an AI assistant. The pieces, leaf first:
//!
//! - [`auth`]: credentials, TOTP, the token cache and the `SessionManager`
//! - [`api`]: the read-only `Brokerage` trait and its HTTP client
//! - [`tools`]: argument validation, the safe-call wrapper and dispatch
//!
//! No component can place orders or otherwise modify the account: the
//! brokerage trait only accepts [`api::ReadOperation`]s.

pub mod api;
pub mod auth;
pub mod config;
pub mod tools;

#[cfg(test)]
mod testing;

use std::sync::Arc;

pub use api::{ApiClient, ApiError, Brokerage, ReadOperation};
pub use auth::{EnvCredentials, SessionCache, SessionManager};
pub use config::{Config, ConfigError};
pub use tools::{ErrorKind, ToolDispatcher, ToolId, ToolResult};

/// Wire up the HTTP client, environment credentials and session cache.
///
/// Performs no network access and does not read credentials; both happen on
/// the first tool call.
pub fn build_dispatcher(config: &Config) -> Result<ToolDispatcher, ApiError> {
    let client: Arc<dyn Brokerage> = Arc::new(ApiClient::new(config.request_timeout)?);
    let sessions = Arc::new(SessionManager::new(
        Arc::clone(&client),
        Arc::new(EnvCredentials::new()),
        SessionCache::new(config.session_path.clone()),
        config.request_timeout,
    ));
    Ok(ToolDispatcher::new(client, sessions, config.call_timeout()))
}
