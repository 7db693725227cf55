//! Session lifecycle.
//!
//! `SessionManager` is the only owner of login state. It authenticates
//! lazily on the first request, reuses a cached token when the upstream still
//! accepts it, and performs at most one re-login when a read reports that
//! the session expired. Both paths run under one async mutex so concurrent
//! first requests share a single login.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::api::{ApiError, Brokerage, LoginRequest};
use crate::config::ConfigError;

use super::credentials::{CredentialSource, Credentials};
use super::session::{Session, SessionCache, SessionOrigin, TokenBlob};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Login failed: {0}")]
    Login(#[source] ApiError),

    #[error("Login timed out after {0:?}")]
    Timeout(Duration),

    #[error("Session rejected right after re-login: {0}")]
    Rejected(String),
}

/// Externally visible lifecycle phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Unauthenticated,
    Authenticating,
    Authenticated,
    Expired,
    Failed,
}

#[derive(Debug, Clone)]
pub struct SessionStatus {
    pub phase: SessionPhase,
    pub origin: Option<SessionOrigin>,
    /// Seconds since the current session was established
    pub age_secs: Option<i64>,
    /// Reason for the most recent failure, already sanitized
    pub last_error: Option<String>,
}

enum SessionState {
    Unauthenticated,
    Authenticating,
    Authenticated(Arc<Session>),
    Expired,
    Failed(String),
}

impl SessionState {
    fn phase(&self) -> SessionPhase {
        match self {
            SessionState::Unauthenticated => SessionPhase::Unauthenticated,
            SessionState::Authenticating => SessionPhase::Authenticating,
            SessionState::Authenticated(_) => SessionPhase::Authenticated,
            SessionState::Expired => SessionPhase::Expired,
            SessionState::Failed(_) => SessionPhase::Failed,
        }
    }
}

pub struct SessionManager {
    client: Arc<dyn Brokerage>,
    credentials: Arc<dyn CredentialSource>,
    cache: SessionCache,
    timeout: Duration,
    state: Mutex<SessionState>,
}

impl SessionManager {
    pub fn new(
        client: Arc<dyn Brokerage>,
        credentials: Arc<dyn CredentialSource>,
        cache: SessionCache,
        timeout: Duration,
    ) -> Self {
        Self {
            client,
            credentials,
            cache,
            timeout,
            state: Mutex::new(SessionState::Unauthenticated),
        }
    }

    /// Return the current session, authenticating first if needed.
    ///
    /// A cached token is tried before logging in, including after an earlier
    /// login failed. Credentials are checked on every call that has to
    /// authenticate, so a missing or malformed variable always surfaces as a
    /// config error.
    pub async fn ensure_session(&self) -> Result<Arc<Session>, SessionError> {
        let mut state = self.state.lock().await;
        if let SessionState::Authenticated(ref session) = *state {
            return Ok(Arc::clone(session));
        }

        let credentials = self.load_credentials(&mut state)?;

        let cached = self.read_cache();
        if let Some(ref token) = cached {
            if let Some(session) = self.restore_cached(token).await {
                info!("Restored cached Robinhood session");
                *state = SessionState::Authenticated(Arc::clone(&session));
                return Ok(session);
            }
        }

        self.login_locked(&mut state, &credentials, cached.as_ref()).await
    }

    /// Replace a session the upstream rejected.
    ///
    /// `stale` is the session the caller was using. If another caller already
    /// replaced it, the newer session is returned without logging in again.
    pub async fn relogin(&self, stale: &Arc<Session>) -> Result<Arc<Session>, SessionError> {
        let mut state = self.state.lock().await;
        if let SessionState::Authenticated(ref current) = *state {
            if !Arc::ptr_eq(current, stale) {
                debug!("Session already replaced by another request");
                return Ok(Arc::clone(current));
            }
        }

        warn!(age_secs = stale.age().num_seconds(), "Session expired, logging in again");
        *state = SessionState::Expired;
        self.clear_cache();

        let credentials = self.load_credentials(&mut state)?;
        self.login_locked(&mut state, &credentials, Some(stale.token())).await
    }

    /// Give up on a session that failed even after a fresh login.
    pub async fn invalidate(&self, session: &Arc<Session>, reason: &str) {
        let mut state = self.state.lock().await;
        if let SessionState::Authenticated(ref current) = *state {
            if Arc::ptr_eq(current, session) {
                warn!(reason, "Invalidating session");
                *state = SessionState::Failed(reason.to_string());
                self.clear_cache();
            }
        }
    }

    /// Drop the session and its cache file.
    pub async fn logout(&self) -> std::io::Result<()> {
        let mut state = self.state.lock().await;
        *state = SessionState::Unauthenticated;
        self.cache.clear()
    }

    pub async fn status(&self) -> SessionStatus {
        let state = self.state.lock().await;
        let (origin, age_secs) = match *state {
            SessionState::Authenticated(ref s) => (Some(s.origin()), Some(s.age().num_seconds())),
            _ => (None, None),
        };
        let last_error = match *state {
            SessionState::Failed(ref reason) => Some(reason.clone()),
            _ => None,
        };
        SessionStatus {
            phase: state.phase(),
            origin,
            age_secs,
            last_error,
        }
    }

    /// Scrub credential material from a message before it leaves the crate.
    pub fn redact(&self, message: &str) -> String {
        match self.credentials.load() {
            Ok(credentials) => credentials.redact(message),
            Err(_) => message.to_string(),
        }
    }

    fn load_credentials(&self, state: &mut SessionState) -> Result<Credentials, SessionError> {
        let loaded = self.credentials.load().and_then(|c| {
            // Decode the TOTP secret now so a bad one fails before any network call
            c.totp()?;
            Ok(c)
        });
        loaded.map_err(|e| {
            warn!(error = %e, "Credentials are not usable");
            *state = SessionState::Failed(e.to_string());
            SessionError::Config(e)
        })
    }

    fn read_cache(&self) -> Option<TokenBlob> {
        match self.cache.load() {
            Ok(token) => token,
            Err(e) => {
                warn!(error = %e, path = %self.cache.path().display(), "Failed to read session cache");
                None
            }
        }
    }

    /// Check a cached token with the upstream. Returns `None` when it is not
    /// accepted; a rejected token is deleted.
    async fn restore_cached(&self, token: &TokenBlob) -> Option<Arc<Session>> {
        match self.bounded(self.client.probe(token)).await {
            Ok(()) => Some(Arc::new(Session::new(token.clone(), SessionOrigin::Cache))),
            Err(SessionError::Login(e)) if matches!(e, ApiError::Unauthorized | ApiError::AccessDenied(_)) => {
                debug!("Cached session rejected");
                self.clear_cache();
                None
            }
            Err(e) => {
                debug!(error = %e, "Could not verify cached session");
                None
            }
        }
    }

    async fn login_locked(
        &self,
        state: &mut SessionState,
        credentials: &Credentials,
        previous: Option<&TokenBlob>,
    ) -> Result<Arc<Session>, SessionError> {
        *state = SessionState::Authenticating;

        // A fresh code per attempt; a code may already be spent in this window
        let mfa_code = match credentials.totp() {
            Ok(totp) => totp.map(|t| t.now()),
            Err(e) => {
                *state = SessionState::Failed(e.to_string());
                return Err(e.into());
            }
        };
        let request = LoginRequest {
            username: credentials.username(),
            password: credentials.password(),
            mfa_code,
            previous,
        };
        debug!(with_mfa = credentials.has_totp_secret(), "Logging in to Robinhood");

        match self.bounded(self.client.login(&request)).await {
            Ok(token) => {
                if let Err(e) = self.cache.store(&token) {
                    warn!(error = %e, path = %self.cache.path().display(), "Failed to cache session");
                }
                let session = Arc::new(Session::new(token, SessionOrigin::Login));
                *state = SessionState::Authenticated(Arc::clone(&session));
                info!("Logged in to Robinhood");
                Ok(session)
            }
            Err(e) => {
                let reason = credentials.redact(&e.to_string());
                warn!(error = %reason, "Login failed");
                *state = SessionState::Failed(reason);
                Err(e)
            }
        }
    }

    async fn bounded<T, F>(&self, fut: F) -> Result<T, SessionError>
    where
        F: Future<Output = Result<T, ApiError>>,
    {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(result) => result.map_err(SessionError::Login),
            Err(_) => Err(SessionError::Timeout(self.timeout)),
        }
    }

    fn clear_cache(&self) {
        if let Err(e) = self.cache.clear() {
            warn!(error = %e, path = %self.cache.path().display(), "Failed to clear session cache");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{credentials, MockBrokerage};

    struct Fixture {
        _dir: tempfile::TempDir,
        cache: SessionCache,
        client: Arc<MockBrokerage>,
        manager: Arc<SessionManager>,
    }

    fn fixture_with(client: MockBrokerage, creds: Arc<dyn CredentialSource>) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let cache = SessionCache::new(dir.path().join("session.bin"));
        let client = Arc::new(client);
        let manager = Arc::new(SessionManager::new(
            client.clone(),
            creds,
            cache.clone(),
            Duration::from_secs(5),
        ));
        Fixture {
            _dir: dir,
            cache,
            client,
            manager,
        }
    }

    fn fixture(client: MockBrokerage) -> Fixture {
        fixture_with(client, Arc::new(credentials(None)))
    }

    #[tokio::test]
    async fn test_no_network_until_first_use() {
        let f = fixture(MockBrokerage::new());
        assert_eq!(f.client.login_count(), 0);
        assert_eq!(f.client.probe_count(), 0);
        assert_eq!(f.manager.status().await.phase, SessionPhase::Unauthenticated);
    }

    #[tokio::test]
    async fn test_first_use_logs_in_and_caches() {
        let f = fixture(MockBrokerage::new());
        let session = f.manager.ensure_session().await.unwrap();

        assert_eq!(f.client.login_count(), 1);
        assert_eq!(session.origin(), SessionOrigin::Login);
        assert_eq!(f.cache.load().unwrap().as_ref(), Some(session.token()));

        // Second call reuses the session
        let again = f.manager.ensure_session().await.unwrap();
        assert!(Arc::ptr_eq(&session, &again));
        assert_eq!(f.client.login_count(), 1);
        assert_eq!(f.manager.status().await.phase, SessionPhase::Authenticated);
    }

    #[tokio::test]
    async fn test_login_without_totp_sends_no_code() {
        let f = fixture(MockBrokerage::new());
        f.manager.ensure_session().await.unwrap();
        assert_eq!(f.client.mfa_codes(), vec![None]);
    }

    #[tokio::test]
    async fn test_login_with_totp_sends_fresh_code() {
        let f = fixture_with(
            MockBrokerage::new(),
            Arc::new(credentials(Some("JBSWY3DPEHPK3PXP"))),
        );
        let session = f.manager.ensure_session().await.unwrap();
        f.manager.relogin(&session).await.unwrap();

        let codes = f.client.mfa_codes();
        assert_eq!(codes.len(), 2);
        for code in codes {
            let code = code.expect("code should be sent");
            assert_eq!(code.len(), 6);
            assert!(code.chars().all(|c| c.is_ascii_digit()));
        }
    }

    #[tokio::test]
    async fn test_valid_cache_skips_login() {
        let f = fixture(MockBrokerage::new());
        let cached = TokenBlob::new(b"cached-token".to_vec());
        f.cache.store(&cached).unwrap();
        f.client.accept_token(&cached);

        let session = f.manager.ensure_session().await.unwrap();
        assert_eq!(session.origin(), SessionOrigin::Cache);
        assert_eq!(session.token(), &cached);
        assert_eq!(f.client.probe_count(), 1);
        assert_eq!(f.client.login_count(), 0);
    }

    #[tokio::test]
    async fn test_rejected_cache_is_replaced_by_login() {
        let f = fixture(MockBrokerage::new());
        let stale = TokenBlob::new(b"stale-token".to_vec());
        f.cache.store(&stale).unwrap();

        let session = f.manager.ensure_session().await.unwrap();
        assert_eq!(session.origin(), SessionOrigin::Login);
        assert_eq!(f.client.login_count(), 1);
        assert_eq!(f.cache.load().unwrap().as_ref(), Some(session.token()));
        // The rejected token is still handed over so its device can be reused
        assert_eq!(f.client.previous_tokens(), vec![Some(stale)]);
    }

    #[tokio::test]
    async fn test_cache_is_retried_after_failed_login() {
        let f = fixture(MockBrokerage::new());
        let cached = TokenBlob::new(b"cached-token".to_vec());
        f.cache.store(&cached).unwrap();
        f.client.accept_token(&cached);
        f.client.fail_probes(ApiError::Network("connection reset".to_string()));
        f.client.fail_logins(ApiError::Network("connection reset".to_string()));

        assert!(f.manager.ensure_session().await.is_err());
        assert_eq!(f.manager.status().await.phase, SessionPhase::Failed);
        assert_eq!(f.cache.load().unwrap().as_ref(), Some(&cached));

        f.client.allow_probes();
        f.client.allow_logins();
        let session = f.manager.ensure_session().await.unwrap();
        assert_eq!(session.origin(), SessionOrigin::Cache);
        assert_eq!(f.client.probe_count(), 2);
        assert_eq!(f.client.login_count(), 1);
    }

    #[tokio::test]
    async fn test_missing_credentials_is_config_error() {
        let f = fixture_with(
            MockBrokerage::new(),
            Arc::new(crate::auth::EnvCredentials::with_lookup(|_| None)),
        );
        let err = f.manager.ensure_session().await.unwrap_err();
        assert!(matches!(err, SessionError::Config(ConfigError::MissingVar(_))));
        assert_eq!(f.client.login_count(), 0);
        assert_eq!(f.manager.status().await.phase, SessionPhase::Failed);
    }

    #[tokio::test]
    async fn test_malformed_totp_secret_fails_before_network() {
        let f = fixture_with(MockBrokerage::new(), Arc::new(credentials(Some("not-base32!!"))));
        // Even a valid cached token is not used with broken configuration
        let cached = TokenBlob::new(b"cached-token".to_vec());
        f.cache.store(&cached).unwrap();
        f.client.accept_token(&cached);

        let err = f.manager.ensure_session().await.unwrap_err();
        assert!(matches!(err, SessionError::Config(ConfigError::InvalidTotpSecret(_))));
        assert_eq!(f.client.login_count(), 0);
        assert_eq!(f.client.probe_count(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_first_calls_login_once() {
        let f = fixture(MockBrokerage::new().with_login_delay(Duration::from_millis(50)));
        let (a, b) = tokio::join!(f.manager.ensure_session(), f.manager.ensure_session());
        let (a, b) = (a.unwrap(), b.unwrap());
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(f.client.login_count(), 1);
    }

    #[tokio::test]
    async fn test_relogin_replaces_session_and_cache() {
        let f = fixture(MockBrokerage::new());
        let first = f.manager.ensure_session().await.unwrap();
        let second = f.manager.relogin(&first).await.unwrap();

        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(f.client.login_count(), 2);
        assert_eq!(f.cache.load().unwrap().as_ref(), Some(second.token()));
        assert_eq!(
            f.client.previous_tokens(),
            vec![None, Some(first.token().clone())]
        );
    }

    #[tokio::test]
    async fn test_relogin_for_already_replaced_session_is_shared() {
        let f = fixture(MockBrokerage::new());
        let first = f.manager.ensure_session().await.unwrap();
        let (a, b) = tokio::join!(f.manager.relogin(&first), f.manager.relogin(&first));
        assert!(Arc::ptr_eq(&a.unwrap(), &b.unwrap()));
        assert_eq!(f.client.login_count(), 2);
    }

    #[tokio::test]
    async fn test_failed_relogin_moves_to_failed() {
        let f = fixture(MockBrokerage::new());
        let first = f.manager.ensure_session().await.unwrap();
        f.client.fail_logins(ApiError::LoginRejected("bad password".to_string()));

        let err = f.manager.relogin(&first).await.unwrap_err();
        assert!(matches!(err, SessionError::Login(ApiError::LoginRejected(_))));
        assert_eq!(f.client.login_count(), 2);
        assert_eq!(f.cache.load().unwrap(), None);

        let status = f.manager.status().await;
        assert_eq!(status.phase, SessionPhase::Failed);
        assert!(status.last_error.unwrap().contains("bad password"));
    }

    #[tokio::test]
    async fn test_failed_state_retries_on_next_request() {
        let f = fixture(MockBrokerage::new());
        f.client.fail_logins(ApiError::Network("connection refused".to_string()));
        assert!(f.manager.ensure_session().await.is_err());

        f.client.allow_logins();
        assert!(f.manager.ensure_session().await.is_ok());
        assert_eq!(f.client.login_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_login_is_bounded_by_timeout() {
        let f = fixture(MockBrokerage::new().with_login_delay(Duration::from_secs(60)));
        let err = f.manager.ensure_session().await.unwrap_err();
        assert_eq!(err, SessionError::Timeout(Duration::from_secs(5)));
    }

    #[tokio::test]
    async fn test_login_failure_message_is_redacted() {
        let f = fixture(MockBrokerage::new());
        f.client.fail_logins(ApiError::LoginRejected("user@example.com / hunter2".to_string()));
        f.manager.ensure_session().await.unwrap_err();

        let reason = f.manager.status().await.last_error.unwrap();
        assert!(!reason.contains("hunter2"));
        assert!(!reason.contains("user@example.com"));
    }

    #[tokio::test]
    async fn test_logout_clears_cache() {
        let f = fixture(MockBrokerage::new());
        f.manager.ensure_session().await.unwrap();
        f.manager.logout().await.unwrap();
        assert_eq!(f.cache.load().unwrap(), None);
        assert_eq!(f.manager.status().await.phase, SessionPhase::Unauthenticated);
    }

    #[tokio::test]
    async fn test_invalidate_only_affects_matching_session() {
        let f = fixture(MockBrokerage::new());
        let first = f.manager.ensure_session().await.unwrap();
        let second = f.manager.relogin(&first).await.unwrap();

        f.manager.invalidate(&first, "old").await;
        assert_eq!(f.manager.status().await.phase, SessionPhase::Authenticated);

        f.manager.invalidate(&second, "rejected").await;
        assert_eq!(f.manager.status().await.phase, SessionPhase::Failed);
    }
}
