//! The single wrapper every upstream read goes through.
//!
//! [`SafeCaller::call`] acquires a session, runs the read under a timeout,
//! re-runs it once after a re-login if the session expired, and folds every
//! failure (including panics) into a [`ToolResult`].

use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tracing::{debug, warn};

use crate::api::ApiError;
use crate::auth::{Session, SessionError, SessionManager};

use super::result::{ErrorKind, Payload, ToolResult};

enum CallFailure {
    Api(ApiError),
    TimedOut,
    Panicked,
}

pub struct SafeCaller {
    sessions: Arc<SessionManager>,
    timeout: Duration,
}

impl SafeCaller {
    pub fn new(sessions: Arc<SessionManager>, timeout: Duration) -> Self {
        Self { sessions, timeout }
    }

    pub fn sessions(&self) -> &Arc<SessionManager> {
        &self.sessions
    }

    /// Run `operation` with a valid session and normalize the outcome.
    ///
    /// The operation may be invoked twice: once with the current session and,
    /// if that reports an expired session, once more after a single re-login.
    pub async fn call<F, Fut>(&self, operation: F) -> ToolResult
    where
        F: Fn(Arc<Session>) -> Fut,
        Fut: Future<Output = Result<Payload, ApiError>>,
    {
        let session = match self.sessions.ensure_session().await {
            Ok(session) => session,
            Err(e) => return self.session_failure(&e),
        };

        match self.attempt(&operation, Arc::clone(&session)).await {
            Ok(payload) => ToolResult::success(payload),
            Err(CallFailure::Api(e)) if e.is_expired_session() => {
                self.retry_after_relogin(&operation, &session).await
            }
            Err(failure) => self.call_failure(failure),
        }
    }

    async fn retry_after_relogin<F, Fut>(&self, operation: &F, stale: &Arc<Session>) -> ToolResult
    where
        F: Fn(Arc<Session>) -> Fut,
        Fut: Future<Output = Result<Payload, ApiError>>,
    {
        let fresh = match self.sessions.relogin(stale).await {
            Ok(session) => session,
            Err(e) => return self.session_failure(&e),
        };

        match self.attempt(operation, Arc::clone(&fresh)).await {
            Ok(payload) => ToolResult::success(payload),
            Err(CallFailure::Api(e)) if e.is_expired_session() => {
                let reason = "upstream rejected a freshly issued session";
                self.sessions.invalidate(&fresh, reason).await;
                self.session_failure(&SessionError::Rejected(reason.to_string()))
            }
            Err(failure) => self.call_failure(failure),
        }
    }

    async fn attempt<F, Fut>(&self, operation: &F, session: Arc<Session>) -> Result<Payload, CallFailure>
    where
        F: Fn(Arc<Session>) -> Fut,
        Fut: Future<Output = Result<Payload, ApiError>>,
    {
        let future = panic::catch_unwind(AssertUnwindSafe(|| operation(session)))
            .map_err(|_| CallFailure::Panicked)?;

        match tokio::time::timeout(self.timeout, AssertUnwindSafe(future).catch_unwind()).await {
            Ok(Ok(result)) => result.map_err(CallFailure::Api),
            Ok(Err(_)) => Err(CallFailure::Panicked),
            Err(_) => Err(CallFailure::TimedOut),
        }
    }

    fn call_failure(&self, failure: CallFailure) -> ToolResult {
        match failure {
            CallFailure::Api(e) => {
                let kind = classify_api_error(&e);
                self.failure(kind, describe(kind, &e.to_string()))
            }
            CallFailure::TimedOut => self.failure(
                ErrorKind::NetworkError,
                describe(
                    ErrorKind::NetworkError,
                    &format!("request timed out after {}s", self.timeout.as_secs()),
                ),
            ),
            CallFailure::Panicked => self.failure(
                ErrorKind::UnknownError,
                "Robinhood request failed unexpectedly inside the client",
            ),
        }
    }

    fn session_failure(&self, error: &SessionError) -> ToolResult {
        let kind = match error {
            SessionError::Config(_) => ErrorKind::ConfigError,
            SessionError::Timeout(_) => ErrorKind::NetworkError,
            SessionError::Login(e) => match classify_api_error(e) {
                kind @ (ErrorKind::NetworkError | ErrorKind::RateLimitError) => kind,
                _ => ErrorKind::AuthError,
            },
            SessionError::Rejected(_) => ErrorKind::AuthError,
        };
        self.failure(kind, describe(kind, &error.to_string()))
    }

    /// Final sanitizing step for every failure message.
    fn failure(&self, kind: ErrorKind, message: impl AsRef<str>) -> ToolResult {
        let message = ApiError::truncate_body(&self.sessions.redact(message.as_ref()));
        match kind {
            ErrorKind::UnknownError => warn!(?kind, %message, "Tool call failed"),
            _ => debug!(?kind, %message, "Tool call failed"),
        }
        ToolResult::failure(kind, message)
    }
}

/// Map an upstream error onto the failure taxonomy.
pub fn classify_api_error(error: &ApiError) -> ErrorKind {
    match error {
        ApiError::Unauthorized
        | ApiError::AccessDenied(_)
        | ApiError::LoginRejected(_)
        | ApiError::MfaRequired(_) => ErrorKind::AuthError,
        ApiError::NotFound(_) => ErrorKind::NotFoundError,
        ApiError::RateLimited => ErrorKind::RateLimitError,
        ApiError::Timeout(_) | ApiError::Network(_) => ErrorKind::NetworkError,
        ApiError::ServerError(_) | ApiError::InvalidResponse(_) => ErrorKind::UnknownError,
    }
}

/// Human-readable message telling the user what to do about a failure.
fn describe(kind: ErrorKind, detail: &str) -> String {
    match kind {
        ErrorKind::ConfigError => format!(
            "Configuration error: {}. Set ROBINHOOD_USERNAME and ROBINHOOD_PASSWORD \
             (and optionally ROBINHOOD_TOTP_SECRET), then restart the server.",
            detail
        ),
        ErrorKind::AuthError => format!(
            "Authentication failed: {}. Check your Robinhood credentials and TOTP secret.",
            detail
        ),
        ErrorKind::NetworkError => format!(
            "Network error: {}. This is likely a transient issue; retry the request.",
            detail
        ),
        ErrorKind::RateLimitError => {
            "Robinhood is rate limiting requests. Wait a moment before retrying.".to_string()
        }
        ErrorKind::NotFoundError => format!("Not found: {}", detail),
        ErrorKind::UnknownError => format!("Robinhood request failed: {}", detail),
    }
}
