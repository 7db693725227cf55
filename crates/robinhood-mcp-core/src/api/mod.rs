//! Upstream brokerage access.
//!
//! This module provides the [`Brokerage`] capability trait, the closed set of
//! [`ReadOperation`]s it accepts, and `ApiClient`, the HTTP implementation
//! against the Robinhood REST API.
//!
//! The API uses OAuth bearer tokens obtained through a password grant, with
//! an optional TOTP code as the second factor.

pub mod brokerage;
pub mod client;
pub mod error;
pub mod operation;

pub use brokerage::{Brokerage, LoginRequest};
pub use client::ApiClient;
pub use error::ApiError;
pub use operation::ReadOperation;
