//! Authentication Module
//!
//! Session state, token lifecycle and persistence of the logged-in identity.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::api::{ApiError, AuthApi, Credentials, NewAccount, User, UserPatch};
use crate::guard::{self, RouteAccess, RouteDecision};
use crate::storage::{self, KeyValueStore};

/// Storage key of the persisted session record
pub const SESSION_STORAGE_KEY: &str = "auth-storage";

/// Minimum password length accepted by the registration form
pub const MIN_PASSWORD_LEN: usize = 6;

/// The part of the session that survives restarts
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PersistedSession {
    pub user: Option<User>,
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
}

/// Current authentication state
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Session {
    pub user: Option<User>,
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    /// True only while a login or register call is in flight
    pub is_loading: bool,
}

impl Session {
    /// A cached user without an access token counts as anonymous
    pub fn status(&self) -> AuthStatus {
        match (&self.user, &self.access_token) {
            (Some(_), Some(_)) => AuthStatus::Authenticated,
            _ => AuthStatus::Anonymous,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.status() == AuthStatus::Authenticated
    }

    /// The authenticated user, if any
    pub fn current_user(&self) -> Option<&User> {
        match self.status() {
            AuthStatus::Authenticated => self.user.as_ref(),
            AuthStatus::Anonymous => None,
        }
    }

    fn persisted(&self) -> PersistedSession {
        PersistedSession {
            user: self.user.clone(),
            access_token: self.access_token.clone(),
            refresh_token: self.refresh_token.clone(),
        }
    }

    fn clear(&mut self) {
        self.user = None;
        self.access_token = None;
        self.refresh_token = None;
    }
}

impl From<PersistedSession> for Session {
    fn from(persisted: PersistedSession) -> Self {
        Self {
            user: persisted.user,
            access_token: persisted.access_token,
            refresh_token: persisted.refresh_token,
            is_loading: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthStatus {
    Anonymous,
    Authenticated,
}

/// Registration form input
#[derive(Debug, Clone)]
pub struct Registration {
    pub username: String,
    pub email: String,
    pub password: String,
    pub confirm_password: String,
}

impl Registration {
    /// Check the form locally and produce the API payload
    pub fn validate(&self) -> Result<NewAccount, SessionError> {
        if self.password != self.confirm_password {
            return Err(SessionError::Validation("Passwords do not match".into()));
        }
        if self.password.chars().count() < MIN_PASSWORD_LEN {
            return Err(SessionError::Validation(format!(
                "Password must be at least {} characters",
                MIN_PASSWORD_LEN
            )));
        }

        Ok(NewAccount {
            username: self.username.clone(),
            email: self.email.clone(),
            password: self.password.clone(),
        })
    }
}

/// Session errors; the message is what the user sees
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SessionError {
    #[error("{0}")]
    Authentication(String),

    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    Network(String),
}

impl SessionError {
    /// Classify an API failure, preferring the server's own message
    pub fn from_api(err: &ApiError, fallback: &str) -> Self {
        let message = err.detail().unwrap_or(fallback).to_string();

        match err {
            ApiError::Status { status: 401 | 403, .. } => SessionError::Authentication(message),
            ApiError::Status { status: 400 | 409 | 422, .. } => SessionError::Validation(message),
            _ => SessionError::Network(message),
        }
    }

    pub fn message(&self) -> &str {
        match self {
            SessionError::Authentication(m)
            | SessionError::Validation(m)
            | SessionError::Network(m) => m,
        }
    }
}

/// Single source of truth for who is logged in
///
/// Only this type mutates the session. Every successful mutation is written
/// through to the key-value store; `is_loading` is never persisted.
pub struct SessionStore {
    api: Arc<dyn AuthApi>,
    storage: Arc<dyn KeyValueStore>,
    state: Mutex<Session>,
    /// Bumped by every logout so late login results can be recognised
    epoch: AtomicU64,
    /// Login/register calls in flight; only changed under the state lock
    in_flight: AtomicUsize,
}

impl SessionStore {
    /// Create an anonymous store without reading storage
    pub fn new(api: Arc<dyn AuthApi>, storage: Arc<dyn KeyValueStore>) -> Self {
        Self {
            api,
            storage,
            state: Mutex::new(Session::default()),
            epoch: AtomicU64::new(0),
            in_flight: AtomicUsize::new(0),
        }
    }

    /// Rehydrate from storage
    ///
    /// A stored token makes the store optimistically authenticated until
    /// `check_auth` confirms it.
    pub fn restore(api: Arc<dyn AuthApi>, storage: Arc<dyn KeyValueStore>) -> Self {
        let session = match storage::load_json::<PersistedSession>(
            storage.as_ref(),
            SESSION_STORAGE_KEY,
        ) {
            Ok(Some(persisted)) => {
                info!("Restored stored session");
                Session::from(persisted)
            }
            Ok(None) => {
                debug!("No stored session found");
                Session::default()
            }
            Err(e) => {
                warn!("Ignoring unreadable stored session: {}", e);
                Session::default()
            }
        };

        Self {
            api,
            storage,
            state: Mutex::new(session),
            epoch: AtomicU64::new(0),
            in_flight: AtomicUsize::new(0),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Session> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn persist(&self, session: &Session) {
        let persisted = session.persisted();

        let result = if persisted == PersistedSession::default() {
            self.storage.remove(SESSION_STORAGE_KEY)
        } else {
            storage::save_json(self.storage.as_ref(), SESSION_STORAGE_KEY, &persisted)
        };

        if let Err(e) = result {
            error!("Failed to save session: {}", e);
        }
    }

    /// Copy of the current state
    pub fn snapshot(&self) -> Session {
        self.lock().clone()
    }

    pub fn status(&self) -> AuthStatus {
        self.lock().status()
    }

    pub fn is_authenticated(&self) -> bool {
        self.lock().is_authenticated()
    }

    pub fn is_loading(&self) -> bool {
        self.lock().is_loading
    }

    /// The authenticated user, if any
    pub fn user(&self) -> Option<User> {
        self.lock().current_user().cloned()
    }

    /// Bearer token for API calls
    pub fn access_token(&self) -> Option<String> {
        self.lock().access_token.clone()
    }

    /// Route guard decision for the current session
    pub fn authorize(&self, access: RouteAccess) -> RouteDecision {
        guard::decide(&self.lock(), access)
    }

    /// Exchange credentials for tokens, then load the user behind them
    ///
    /// Nothing is committed unless both calls succeed. A logout that lands
    /// while the calls are in flight wins over the late result.
    pub async fn login(&self, credentials: &Credentials) -> Result<(), SessionError> {
        let epoch = self.epoch.load(Ordering::SeqCst);
        let _loading = LoadingGuard::begin(self);

        let result = async {
            let tokens = self.api.login(credentials).await?;
            let user = self.api.current_user(&tokens.access_token).await?;
            Ok::<_, ApiError>((tokens, user))
        }
        .await;

        let (tokens, user) = result.map_err(|e| {
            warn!("Login failed for {}: {}", credentials.username, e);
            SessionError::from_api(&e, "Login failed")
        })?;

        let mut session = self.lock();
        if self.epoch.load(Ordering::SeqCst) != epoch {
            warn!("Discarding login result for {}: session ended", credentials.username);
            return Err(SessionError::Authentication(
                "Session ended before login completed".into(),
            ));
        }

        info!("Session set for user: {}", user.username);
        session.user = Some(user);
        session.access_token = Some(tokens.access_token);
        session.refresh_token = tokens.refresh_token;
        self.persist(&session);

        Ok(())
    }

    /// Create an account; the caller logs in separately
    pub async fn register(&self, registration: &Registration) -> Result<(), SessionError> {
        let account = registration.validate()?;
        let _loading = LoadingGuard::begin(self);

        self.api.register(&account).await.map_err(|e| {
            warn!("Registration failed for {}: {}", account.username, e);
            SessionError::from_api(&e, "Registration failed")
        })?;

        info!("Registered account: {}", account.username);
        Ok(())
    }

    /// Forget the user and both tokens; idempotent
    pub fn logout(&self) {
        self.epoch.fetch_add(1, Ordering::SeqCst);

        let mut session = self.lock();
        session.clear();
        self.persist(&session);

        info!("Session cleared");
    }

    /// Revalidate the stored token against the server
    ///
    /// Any failure ends the session instead of surfacing an error.
    pub async fn check_auth(&self) {
        let Some(token) = self.access_token() else {
            debug!("No access token, skipping session check");
            return;
        };

        match self.api.current_user(&token).await {
            Ok(user) => {
                let mut session = self.lock();
                if session.access_token.as_deref() != Some(token.as_str()) {
                    debug!("Token changed during session check, ignoring result");
                    return;
                }
                debug!("Session confirmed for user: {}", user.username);
                session.user = Some(user);
                self.persist(&session);
            }
            Err(e) => {
                // Token check and clear share one lock.
                let mut session = self.lock();
                if session.access_token.as_deref() != Some(token.as_str()) {
                    debug!("Token changed during session check, ignoring failure");
                    return;
                }
                warn!("Session check failed, logging out: {}", e);
                self.epoch.fetch_add(1, Ordering::SeqCst);
                session.clear();
                self.persist(&session);
                info!("Session cleared");
            }
        }
    }

    /// Renew the access token with the stored refresh token
    ///
    /// A rejected refresh ends the session. Without a refresh token this is
    /// a no-op.
    pub async fn refresh(&self) -> Result<(), SessionError> {
        let Some(refresh_token) = self.lock().refresh_token.clone() else {
            debug!("No refresh token, skipping refresh");
            return Ok(());
        };

        match self.api.refresh_token(&refresh_token).await {
            Ok(tokens) => {
                let mut session = self.lock();
                if session.refresh_token.as_deref() != Some(refresh_token.as_str()) {
                    debug!("Session changed during refresh, ignoring result");
                    return Ok(());
                }
                session.access_token = Some(tokens.access_token);
                if let Some(rotated) = tokens.refresh_token {
                    session.refresh_token = Some(rotated);
                }
                self.persist(&session);
                info!("Access token refreshed");
                Ok(())
            }
            Err(e) => {
                warn!("Token refresh failed, logging out: {}", e);
                self.logout();
                Err(SessionError::from_api(&e, "Session expired"))
            }
        }
    }

    /// Shallow-merge `patch` into the cached user; no-op when anonymous
    pub fn update_user(&self, patch: &UserPatch) {
        let mut session = self.lock();

        let Some(user) = session.user.as_mut() else {
            debug!("No user to update");
            return;
        };

        patch.apply_to(user);
        self.persist(&session);
    }

    /// Save profile changes server-side, then mirror the result locally
    pub async fn save_profile(&self, patch: &UserPatch) -> Result<(), SessionError> {
        let Some(token) = self.access_token() else {
            return Err(SessionError::Authentication("Not logged in".into()));
        };

        let updated = self.api.update_profile(&token, patch).await.map_err(|e| {
            warn!("Profile update failed: {}", e);
            SessionError::from_api(&e, "Profile update failed")
        })?;

        self.update_user(&UserPatch::from_user(&updated));
        info!("Profile updated for user: {}", updated.username);
        Ok(())
    }
}

/// Holds `is_loading` for the lifetime of an in-flight call
///
/// Clearing on drop keeps the flag accurate when the call's future is
/// dropped before it resolves. Overlapping calls are counted, so the flag
/// drops only when the last one finishes.
struct LoadingGuard<'a> {
    store: &'a SessionStore,
}

impl<'a> LoadingGuard<'a> {
    fn begin(store: &'a SessionStore) -> Self {
        let mut session = store.lock();
        store.in_flight.fetch_add(1, Ordering::SeqCst);
        session.is_loading = true;
        Self { store }
    }
}

impl Drop for LoadingGuard<'_> {
    fn drop(&mut self) {
        let mut session = self.store.lock();
        if self.store.in_flight.fetch_sub(1, Ordering::SeqCst) == 1 {
            session.is_loading = false;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{Plan, Role};

    fn user() -> User {
        User {
            id: 1,
            username: "alice".into(),
            email: "alice@example.com".into(),
            role: Role::User,
            subscription_plan: Plan::Free,
            is_active: true,
            created_at: None,
        }
    }

    fn registration(password: &str, confirm: &str) -> Registration {
        Registration {
            username: "alice".into(),
            email: "alice@example.com".into(),
            password: password.into(),
            confirm_password: confirm.into(),
        }
    }

    #[test]
    fn test_status_requires_user_and_token() {
        let mut session = Session::default();
        assert_eq!(session.status(), AuthStatus::Anonymous);

        session.user = Some(user());
        assert_eq!(session.status(), AuthStatus::Anonymous);
        assert!(session.current_user().is_none());

        session.access_token = Some("token".into());
        assert_eq!(session.status(), AuthStatus::Authenticated);
        assert_eq!(session.current_user().map(|u| u.id), Some(1));
    }

    #[test]
    fn test_registration_password_mismatch() {
        let err = registration("secret1", "secret2").validate().unwrap_err();
        assert_eq!(err, SessionError::Validation("Passwords do not match".into()));
    }

    #[test]
    fn test_registration_password_too_short() {
        let err = registration("abc", "abc").validate().unwrap_err();
        assert_eq!(err.message(), "Password must be at least 6 characters");
    }

    #[test]
    fn test_registration_valid() {
        let account = registration("secret1", "secret1").validate().unwrap();
        assert_eq!(account.username, "alice");
        assert_eq!(account.password, "secret1");
    }

    #[test]
    fn test_error_prefers_server_detail() {
        let err = ApiError::Status {
            status: 401,
            detail: Some("Incorrect username or password".into()),
        };
        assert_eq!(
            SessionError::from_api(&err, "Login failed"),
            SessionError::Authentication("Incorrect username or password".into())
        );
    }

    #[test]
    fn test_error_falls_back_to_generic_message() {
        let err = ApiError::Network("connection refused".into());
        assert_eq!(
            SessionError::from_api(&err, "Login failed"),
            SessionError::Network("Login failed".into())
        );

        let err = ApiError::Status { status: 500, detail: None };
        assert_eq!(SessionError::from_api(&err, "Login failed").message(), "Login failed");
    }

    #[test]
    fn test_error_classifies_validation_statuses() {
        for status in [400, 409, 422] {
            let err = ApiError::Status {
                status,
                detail: Some("Email already registered".into()),
            };
            assert!(matches!(
                SessionError::from_api(&err, "Registration failed"),
                SessionError::Validation(_)
            ));
        }
    }

    #[test]
    fn test_persisted_session_round_trip_shape() {
        let persisted = PersistedSession {
            user: Some(user()),
            access_token: Some("access".into()),
            refresh_token: Some("refresh".into()),
        };

        let json = serde_json::to_value(&persisted).unwrap();
        assert_eq!(json["access_token"], "access");
        assert_eq!(json["user"]["role"], "USER");

        let session = Session::from(persisted);
        assert!(session.is_authenticated());
        assert!(!session.is_loading);
    }
}
