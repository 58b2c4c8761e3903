//! API Client Module
//!
//! HTTP communication with the dashboard's auth/user/admin API.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{RequestBuilder, Response, StatusCode};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::ClientConfig;

/// Account role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Role {
    User,
    Admin,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::User => write!(f, "USER"),
            Role::Admin => write!(f, "ADMIN"),
        }
    }
}

/// Subscription plan
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Plan {
    #[default]
    Free,
    Pro,
    Enterprise,
}

impl std::fmt::Display for Plan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Plan::Free => write!(f, "FREE"),
            Plan::Pro => write!(f, "PRO"),
            Plan::Enterprise => write!(f, "ENTERPRISE"),
        }
    }
}

/// User record as returned by `/auth/me` and the profile endpoints
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub email: String,
    pub role: Role,
    #[serde(default)]
    pub subscription_plan: Plan,
    #[serde(default = "default_active")]
    pub is_active: bool,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

fn default_active() -> bool {
    true
}

impl User {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

/// Partial user update
///
/// Only the fields that are `Some` are sent to the server or merged into
/// the cached user.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<Role>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subscription_plan: Option<Plan>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_active: Option<bool>,
}

impl UserPatch {
    /// Patch carrying every field of `user`
    pub fn from_user(user: &User) -> Self {
        Self {
            username: Some(user.username.clone()),
            email: Some(user.email.clone()),
            role: Some(user.role),
            subscription_plan: Some(user.subscription_plan),
            is_active: Some(user.is_active),
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Shallow-merge into `user`
    pub fn apply_to(&self, user: &mut User) {
        if let Some(username) = &self.username {
            user.username = username.clone();
        }
        if let Some(email) = &self.email {
            user.email = email.clone();
        }
        if let Some(role) = self.role {
            user.role = role;
        }
        if let Some(plan) = self.subscription_plan {
            user.subscription_plan = plan;
        }
        if let Some(is_active) = self.is_active {
            user.is_active = is_active;
        }
    }
}

/// Login credentials, sent as form fields
#[derive(Debug, Clone, Serialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

/// Registration payload
#[derive(Debug, Clone, Serialize)]
pub struct NewAccount {
    pub username: String,
    pub email: String,
    pub password: String,
}

/// Token pair issued by login and refresh
#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub token_type: Option<String>,
}

/// Account usage summary from `/users/usage`
#[derive(Debug, Clone, Deserialize)]
pub struct UsageSummary {
    pub total_requests: u64,
    pub requests_this_month: u64,
    pub most_used_endpoint: String,
    pub average_response_time: f64,
}

/// System-wide statistics from `/admin/stats`
#[derive(Debug, Clone, Deserialize)]
pub struct SystemStats {
    pub total_users: u64,
    pub active_users: u64,
    pub total_requests_today: u64,
    pub total_requests_this_month: u64,
    pub free_plan_users: u64,
    pub pro_plan_users: u64,
}

/// Acknowledgement returned by admin mutations
#[derive(Debug, Clone, Deserialize)]
pub struct MessageResponse {
    pub message: String,
}

#[derive(Debug, Deserialize)]
pub struct HealthResponse {
    pub status: String,
}

/// FastAPI error body; `detail` is a string or a list of validation errors
#[derive(Deserialize)]
struct ErrorResponse {
    detail: Option<serde_json::Value>,
}

impl ErrorResponse {
    fn message(self) -> Option<String> {
        match self.detail? {
            serde_json::Value::String(s) if !s.trim().is_empty() => Some(s),
            serde_json::Value::Array(items) => {
                let messages: Vec<String> = items
                    .iter()
                    .filter_map(|item| item.get("msg").and_then(|m| m.as_str()))
                    .map(str::to_string)
                    .collect();
                if messages.is_empty() {
                    None
                } else {
                    Some(messages.join("; "))
                }
            }
            _ => None,
        }
    }
}

/// Auth endpoints the session store depends on
#[async_trait]
pub trait AuthApi: Send + Sync {
    /// Exchange credentials for a token pair
    async fn login(&self, credentials: &Credentials) -> Result<TokenResponse, ApiError>;

    /// Fetch the identity behind an access token
    async fn current_user(&self, access_token: &str) -> Result<User, ApiError>;

    /// Create an account; does not log in
    async fn register(&self, account: &NewAccount) -> Result<(), ApiError>;

    /// Trade a refresh token for a new access token
    async fn refresh_token(&self, refresh_token: &str) -> Result<TokenResponse, ApiError>;

    /// Persist profile changes server-side
    async fn update_profile(&self, access_token: &str, patch: &UserPatch)
        -> Result<User, ApiError>;
}

/// API client for the dashboard backend
pub struct ApiClient {
    base_url: String,
    client: reqwest::Client,
}

impl ApiClient {
    /// Create a new API client
    pub fn new(config: &ClientConfig) -> Result<Self, ApiError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .user_agent(user_agent())
            .build()
            .map_err(|e| ApiError::Network(e.to_string()))?;

        Ok(Self {
            base_url: config.api_base_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Send a request and decode a JSON body, mapping non-2xx to `ApiError::Status`
    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, ApiError> {
        let response = request
            .send()
            .await
            .map_err(|e| ApiError::Network(e.to_string()))?;

        let response = check_status(response).await?;

        response
            .json::<T>()
            .await
            .map_err(|e| ApiError::Parse(e.to_string()))
    }

    /// Fetch the caller's profile
    pub async fn profile(&self, access_token: &str) -> Result<User, ApiError> {
        let request = self
            .client
            .get(self.url("/users/profile"))
            .bearer_auth(access_token);
        self.send(request).await
    }

    /// Fetch the caller's usage summary
    pub async fn usage(&self, access_token: &str) -> Result<UsageSummary, ApiError> {
        let request = self
            .client
            .get(self.url("/users/usage"))
            .bearer_auth(access_token);
        self.send(request).await
    }

    /// List accounts (admin only)
    pub async fn list_users(
        &self,
        access_token: &str,
        skip: u32,
        limit: u32,
    ) -> Result<Vec<User>, ApiError> {
        let request = self
            .client
            .get(self.url("/admin/users"))
            .bearer_auth(access_token)
            .query(&[("skip", skip), ("limit", limit)]);
        self.send(request).await
    }

    /// System statistics (admin only)
    pub async fn system_stats(&self, access_token: &str) -> Result<SystemStats, ApiError> {
        let request = self
            .client
            .get(self.url("/admin/stats"))
            .bearer_auth(access_token);
        self.send(request).await
    }

    /// Change an account's role (admin only)
    pub async fn update_user_role(
        &self,
        access_token: &str,
        user_id: i64,
        role: Role,
    ) -> Result<MessageResponse, ApiError> {
        info!("Updating role of user {} to {}", user_id, role);

        let request = self
            .client
            .put(self.url(&format!("/admin/users/{}/role", user_id)))
            .bearer_auth(access_token)
            .query(&[("new_role", role.to_string())]);
        self.send(request).await
    }

    /// Toggle an account's suspension (admin only)
    pub async fn suspend_user(
        &self,
        access_token: &str,
        user_id: i64,
    ) -> Result<MessageResponse, ApiError> {
        info!("Toggling suspension of user {}", user_id);

        let request = self
            .client
            .put(self.url(&format!("/admin/users/{}/suspend", user_id)))
            .bearer_auth(access_token);
        self.send(request).await
    }

    /// Backend health check
    pub async fn health(&self) -> Result<HealthResponse, ApiError> {
        self.send(self.client.get(self.url("/health"))).await
    }
}

#[async_trait]
impl AuthApi for ApiClient {
    async fn login(&self, credentials: &Credentials) -> Result<TokenResponse, ApiError> {
        let url = self.url("/auth/login");

        debug!("Logging in at: {}", url);

        let tokens: TokenResponse = self.send(self.client.post(&url).form(credentials)).await?;

        info!("Login accepted for: {}", credentials.username);
        Ok(tokens)
    }

    async fn current_user(&self, access_token: &str) -> Result<User, ApiError> {
        let request = self
            .client
            .get(self.url("/auth/me"))
            .bearer_auth(access_token);
        self.send(request).await
    }

    async fn register(&self, account: &NewAccount) -> Result<(), ApiError> {
        let url = self.url("/auth/register");

        debug!("Registering {} at: {}", account.username, url);

        let response = self
            .client
            .post(&url)
            .json(account)
            .send()
            .await
            .map_err(|e| ApiError::Network(e.to_string()))?;
        check_status(response).await?;

        info!("Account registered: {}", account.username);
        Ok(())
    }

    async fn refresh_token(&self, refresh_token: &str) -> Result<TokenResponse, ApiError> {
        let request = self
            .client
            .post(self.url("/auth/refresh"))
            .query(&[("refresh_token", refresh_token)]);
        self.send(request).await
    }

    async fn update_profile(
        &self,
        access_token: &str,
        patch: &UserPatch,
    ) -> Result<User, ApiError> {
        let request = self
            .client
            .put(self.url("/users/profile"))
            .bearer_auth(access_token)
            .json(patch);
        self.send(request).await
    }
}

async fn check_status(response: Response) -> Result<Response, ApiError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let detail = response
        .json::<ErrorResponse>()
        .await
        .ok()
        .and_then(ErrorResponse::message);

    warn!("API request failed with status {}", status);
    Err(ApiError::Status {
        status: status.as_u16(),
        detail,
    })
}

fn user_agent() -> String {
    let host = whoami::fallible::hostname().unwrap_or_else(|_| "unknown-host".to_string());
    format!("dashboard-client/{} ({})", env!("CARGO_PKG_VERSION"), host)
}

/// API errors
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Server error ({status}): {}", .detail.as_deref().unwrap_or("no detail"))]
    Status { status: u16, detail: Option<String> },

    #[error("Parse error: {0}")]
    Parse(String),
}

impl ApiError {
    /// HTTP status, if the server answered
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            ApiError::Status { status, .. } => StatusCode::from_u16(*status).ok(),
            _ => None,
        }
    }

    /// Human-readable message from the response body, if any
    pub fn detail(&self) -> Option<&str> {
        match self {
            ApiError::Status { detail, .. } => detail.as_deref(),
            _ => None,
        }
    }

    pub fn is_unauthorized(&self) -> bool {
        self.status() == Some(StatusCode::UNAUTHORIZED)
    }
}
