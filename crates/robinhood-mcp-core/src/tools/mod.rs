//! Read-only research tools.
//!
//! This module provides:
//! - `ToolId`: the closed catalog of twelve tools
//! - `ToolRequest`: argument validation into a `ReadOperation`
//! - `SafeCaller`: session acquisition, timeout, re-login and error folding
//! - `ToolDispatcher`: the entry point tying them together
//! - `ToolResult`: the structured outcome returned to the assistant

pub mod args;
pub mod catalog;
pub mod dispatch;
pub mod result;
pub mod safe_call;

pub use args::{ArgumentError, Interval, Span, Symbol};
pub use catalog::ToolId;
pub use dispatch::{ToolDispatcher, ToolRequest};
pub use result::{ErrorKind, Payload, ToolResult};
pub use safe_call::{classify_api_error, SafeCaller};
