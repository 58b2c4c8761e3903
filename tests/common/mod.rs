//! In-memory stand-in for the auth API.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::Notify;

use dashboard_client::api::{
    ApiError, AuthApi, Credentials, NewAccount, Plan, Role, TokenResponse, User, UserPatch,
};

struct Account {
    password: String,
    user: User,
}

#[derive(Default)]
pub struct MockApi {
    accounts: Mutex<HashMap<String, Account>>,
    access_tokens: Mutex<HashMap<String, String>>,
    refresh_tokens: Mutex<HashMap<String, String>>,
    next_id: AtomicU64,
    offline: AtomicBool,
    login_gate: Mutex<Option<Arc<Notify>>>,
    current_user_gate: Mutex<Option<Arc<Notify>>>,
    current_user_fails: AtomicBool,
    pub login_calls: AtomicUsize,
    pub current_user_calls: AtomicUsize,
    pub register_calls: AtomicUsize,
}

fn unauthorized(detail: &str) -> ApiError {
    ApiError::Status {
        status: 401,
        detail: Some(detail.to_string()),
    }
}

impl MockApi {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Add an account that can log in
    pub fn with_account(self: Arc<Self>, username: &str, password: &str, role: Role) -> Arc<Self> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) as i64 + 1;
        let user = User {
            id,
            username: username.to_string(),
            email: format!("{}@example.com", username),
            role,
            subscription_plan: Plan::Free,
            is_active: true,
            created_at: None,
        };
        self.accounts.lock().unwrap().insert(
            username.to_string(),
            Account {
                password: password.to_string(),
                user,
            },
        );
        self
    }

    /// Make every call fail as if the server were unreachable
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Invalidate an access token server-side
    pub fn revoke(&self, access_token: &str) {
        self.access_tokens.lock().unwrap().remove(access_token);
    }

    pub fn revoke_refresh(&self, refresh_token: &str) {
        self.refresh_tokens.lock().unwrap().remove(refresh_token);
    }

    /// Block logins until the returned notifier fires
    pub fn hold_logins(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.login_gate.lock().unwrap() = Some(gate.clone());
        gate
    }

    /// Block `/auth/me` until the returned notifier fires
    pub fn hold_current_user(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.current_user_gate.lock().unwrap() = Some(gate.clone());
        gate
    }

    /// Reject every `/auth/me` call with 401 while logins keep working
    pub fn fail_current_user(&self, fail: bool) {
        self.current_user_fails.store(fail, Ordering::SeqCst);
    }

    fn check_online(&self) -> Result<(), ApiError> {
        if self.offline.load(Ordering::SeqCst) {
            Err(ApiError::Network("connection refused".into()))
        } else {
            Ok(())
        }
    }

    fn issue_access_token(&self, username: &str) -> String {
        let token = format!("access-{}", self.next_id.fetch_add(1, Ordering::SeqCst));
        self.access_tokens
            .lock()
            .unwrap()
            .insert(token.clone(), username.to_string());
        token
    }

    fn issue_refresh_token(&self, username: &str) -> String {
        let token = format!("refresh-{}", self.next_id.fetch_add(1, Ordering::SeqCst));
        self.refresh_tokens
            .lock()
            .unwrap()
            .insert(token.clone(), username.to_string());
        token
    }

    fn username_for(&self, access_token: &str) -> Result<String, ApiError> {
        self.access_tokens
            .lock()
            .unwrap()
            .get(access_token)
            .cloned()
            .ok_or_else(|| unauthorized("Could not validate credentials"))
    }
}

#[async_trait]
impl AuthApi for MockApi {
    async fn login(&self, credentials: &Credentials) -> Result<TokenResponse, ApiError> {
        self.login_calls.fetch_add(1, Ordering::SeqCst);

        let gate = self.login_gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }

        self.check_online()?;

        let valid = self
            .accounts
            .lock()
            .unwrap()
            .get(&credentials.username)
            .map(|account| account.password == credentials.password)
            .unwrap_or(false);
        if !valid {
            return Err(unauthorized("Incorrect username or password"));
        }

        Ok(TokenResponse {
            access_token: self.issue_access_token(&credentials.username),
            refresh_token: Some(self.issue_refresh_token(&credentials.username)),
            token_type: Some("bearer".into()),
        })
    }

    async fn current_user(&self, access_token: &str) -> Result<User, ApiError> {
        self.current_user_calls.fetch_add(1, Ordering::SeqCst);

        let gate = self.current_user_gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }

        self.check_online()?;
        if self.current_user_fails.load(Ordering::SeqCst) {
            return Err(unauthorized("Could not validate credentials"));
        }

        let username = self.username_for(access_token)?;
        self.accounts
            .lock()
            .unwrap()
            .get(&username)
            .map(|account| account.user.clone())
            .ok_or_else(|| unauthorized("User not found"))
    }

    async fn register(&self, account: &NewAccount) -> Result<(), ApiError> {
        self.register_calls.fetch_add(1, Ordering::SeqCst);
        self.check_online()?;

        let exists = self
            .accounts
            .lock()
            .unwrap()
            .values()
            .any(|a| a.user.email == account.email || a.user.username == account.username);
        if exists {
            return Err(ApiError::Status {
                status: 400,
                detail: Some("Email already registered".into()),
            });
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst) as i64 + 1;
        self.accounts.lock().unwrap().insert(
            account.username.clone(),
            Account {
                password: account.password.clone(),
                user: User {
                    id,
                    username: account.username.clone(),
                    email: account.email.clone(),
                    role: Role::User,
                    subscription_plan: Plan::Free,
                    is_active: true,
                    created_at: None,
                },
            },
        );
        Ok(())
    }

    async fn refresh_token(&self, refresh_token: &str) -> Result<TokenResponse, ApiError> {
        self.check_online()?;

        let username = self
            .refresh_tokens
            .lock()
            .unwrap()
            .get(refresh_token)
            .cloned()
            .ok_or_else(|| unauthorized("Invalid refresh token"))?;

        Ok(TokenResponse {
            access_token: self.issue_access_token(&username),
            refresh_token: None,
            token_type: Some("bearer".into()),
        })
    }

    async fn update_profile(
        &self,
        access_token: &str,
        patch: &UserPatch,
    ) -> Result<User, ApiError> {
        self.check_online()?;

        let username = self.username_for(access_token)?;
        let mut accounts = self.accounts.lock().unwrap();
        let account = accounts
            .get_mut(&username)
            .ok_or_else(|| unauthorized("User not found"))?;

        if let Some(email) = &patch.email {
            if !email.contains('@') {
                return Err(ApiError::Status {
                    status: 422,
                    detail: Some("value is not a valid email address".into()),
                });
            }
        }

        patch.apply_to(&mut account.user);
        Ok(account.user.clone())
    }
}
