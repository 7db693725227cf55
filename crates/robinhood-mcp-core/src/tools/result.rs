use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Field name to value, as returned to the assistant.
pub type Payload = Map<String, Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    /// Missing or malformed configuration; fix the environment
    ConfigError,
    /// Credentials rejected or the session could not be re-established
    AuthError,
    /// Transport failure or timeout; usually worth retrying
    NetworkError,
    /// Upstream throttling; retry later
    RateLimitError,
    /// The symbol, watchlist or other entity does not exist
    NotFoundError,
    UnknownError,
}

/// Outcome of one tool invocation. Failures are values, never panics or
/// propagated errors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ToolResult {
    Success { payload: Payload },
    Failure { kind: ErrorKind, message: String },
}

impl ToolResult {
    pub fn success(payload: Payload) -> Self {
        ToolResult::Success { payload }
    }

    pub fn failure(kind: ErrorKind, message: impl Into<String>) -> Self {
        ToolResult::Failure {
            kind,
            message: message.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ToolResult::Success { .. })
    }

    /// The failure kind, or `None` on success.
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            ToolResult::Success { .. } => None,
            ToolResult::Failure { kind, .. } => Some(*kind),
        }
    }

    pub fn payload(&self) -> Option<&Payload> {
        match self {
            ToolResult::Success { payload } => Some(payload),
            ToolResult::Failure { .. } => None,
        }
    }
}
