//! Commands Module
//!
//! Operations the dashboard UI invokes. Each one reports its outcome as at
//! most one transient notification.

use serde::Serialize;
use tracing::{debug, info};

use crate::api::{Credentials, User, UserPatch};
use crate::auth::{Registration, SessionStore};
use crate::guard::{Route, RouteDecision};
use crate::usage::{UsageSnapshot, UsageStats, UsageTracker};

/// Transient user-facing notification
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "message", rename_all = "lowercase")]
pub enum Toast {
    Success(String),
    Error(String),
}

impl Toast {
    pub fn is_error(&self) -> bool {
        matches!(self, Toast::Error(_))
    }

    pub fn message(&self) -> &str {
        match self {
            Toast::Success(m) | Toast::Error(m) => m,
        }
    }
}

impl std::fmt::Display for Toast {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Toast::Success(m) => write!(f, "✔ {}", m),
            Toast::Error(m) => write!(f, "✖ {}", m),
        }
    }
}

// Response types for the UI

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionResponse {
    pub user_id: i64,
    pub username: String,
    pub email: String,
    pub role: String,
    pub plan: String,
}

impl From<&User> for SessionResponse {
    fn from(user: &User) -> Self {
        Self {
            user_id: user.id,
            username: user.username.clone(),
            email: user.email.clone(),
            role: user.role.to_string(),
            plan: user.subscription_plan.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CommandResult {
    pub success: bool,
    pub toast: Toast,
}

impl CommandResult {
    fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            toast: Toast::Success(message.into()),
        }
    }

    fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            toast: Toast::Error(message.into()),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SimulationReport {
    pub accepted: u32,
    pub toast: Option<Toast>,
    pub snapshot: UsageSnapshot,
    pub stats: UsageStats,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Navigation {
    pub path: String,
    pub redirected: bool,
}

// Commands

/// Revalidate the restored session and describe it
pub async fn restore_session(session: &SessionStore) -> Option<SessionResponse> {
    debug!("Checking stored session");

    session.check_auth().await;
    session.user().as_ref().map(SessionResponse::from)
}

pub async fn login(session: &SessionStore, username: &str, password: &str) -> CommandResult {
    info!("Logging in as {}", username);

    match session.login(&Credentials::new(username, password)).await {
        Ok(()) => CommandResult::ok("Welcome back!"),
        Err(e) => CommandResult::failed(e.message()),
    }
}

pub async fn register(session: &SessionStore, registration: &Registration) -> CommandResult {
    match session.register(registration).await {
        Ok(()) => CommandResult::ok("Account created successfully!"),
        Err(e) => CommandResult::failed(e.message()),
    }
}

pub fn logout(session: &SessionStore) -> CommandResult {
    session.logout();
    CommandResult::ok("Logged out")
}

pub async fn save_profile(session: &SessionStore, patch: &UserPatch) -> CommandResult {
    if patch.is_empty() {
        return CommandResult::failed("Nothing to update");
    }

    match session.save_profile(patch).await {
        Ok(()) => CommandResult::ok("Profile updated successfully!"),
        Err(e) => CommandResult::failed(e.message()),
    }
}

/// Resolve a path through the route guard
pub fn navigate(session: &SessionStore, path: &str) -> Navigation {
    let route = Route::from_path(path).unwrap_or(Route::Dashboard);

    match session.authorize(route.access()) {
        RouteDecision::Allow => Navigation {
            path: route.path().to_string(),
            redirected: false,
        },
        decision => Navigation {
            path: decision.redirect_path().unwrap_or("/login").to_string(),
            redirected: true,
        },
    }
}

/// Issue up to `count` simulated requests, stopping at the first refusal
pub async fn simulate_requests(
    tracker: &UsageTracker,
    endpoint: &str,
    count: u32,
) -> SimulationReport {
    let mut accepted = 0;
    let mut toast = None;

    for _ in 0..count {
        match tracker.record_request(endpoint).await {
            Ok(_) => accepted += 1,
            Err(e) => {
                toast = Some(Toast::Error(e.to_string()));
                break;
            }
        }
    }

    info!("Simulated {} of {} requests to {}", accepted, count, endpoint);

    SimulationReport {
        accepted,
        toast,
        snapshot: tracker.evaluate(),
        stats: tracker.stats(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::Plan;
    use crate::usage::{PlanLimits, TrackerConfig};

    #[test]
    fn test_toast_serialization() {
        let toast = Toast::Error("Login failed".into());
        let json = serde_json::to_value(&toast).unwrap();
        assert_eq!(json, serde_json::json!({ "kind": "error", "message": "Login failed" }));
        assert!(toast.is_error());
    }

    #[tokio::test]
    async fn test_simulation_stops_at_first_refusal() {
        let tracker = UsageTracker::new(Plan::Free)
            .with_config(TrackerConfig::instant())
            .with_limits(PlanLimits {
                requests_per_minute: 5,
                monthly_quota: 1_000,
            });

        let report = simulate_requests(&tracker, "/users/profile", 8).await;

        assert_eq!(report.accepted, 5);
        assert_eq!(
            report.toast,
            Some(Toast::Error("Rate limit exceeded. Please wait a moment.".into()))
        );
        assert_eq!(report.snapshot.requests_remaining, 0);
        assert_eq!(report.stats.total_requests, 5);
    }

    #[tokio::test]
    async fn test_simulation_within_limits_has_no_toast() {
        let tracker = UsageTracker::new(Plan::Pro).with_config(TrackerConfig::instant());

        let report = simulate_requests(&tracker, "/users/usage", 10).await;

        assert_eq!(report.accepted, 10);
        assert!(report.toast.is_none());
        assert_eq!(report.snapshot.requests_remaining, 290);
    }
}
