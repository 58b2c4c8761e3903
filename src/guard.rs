//! Route Guard Module
//!
//! Decides whether the current session may open a dashboard page.

use crate::auth::Session;

/// Access level a route requires
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteAccess {
    Public,
    Protected,
    AdminOnly,
}

/// Outcome of a guard check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteDecision {
    Allow,
    RedirectToLogin,
    RedirectToDashboard,
}

impl RouteDecision {
    /// Where to send the user instead, if anywhere
    pub fn redirect_path(&self) -> Option<&'static str> {
        match self {
            RouteDecision::Allow => None,
            RouteDecision::RedirectToLogin => Some(Route::Login.path()),
            RouteDecision::RedirectToDashboard => Some(Route::Dashboard.path()),
        }
    }
}

/// Dashboard pages
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Login,
    Register,
    Dashboard,
    Profile,
    Security,
    Analytics,
    Settings,
    Billing,
    Admin,
}

impl Route {
    pub const ALL: [Route; 9] = [
        Route::Login,
        Route::Register,
        Route::Dashboard,
        Route::Profile,
        Route::Security,
        Route::Analytics,
        Route::Settings,
        Route::Billing,
        Route::Admin,
    ];

    pub fn path(&self) -> &'static str {
        match self {
            Route::Login => "/login",
            Route::Register => "/register",
            Route::Dashboard => "/dashboard",
            Route::Profile => "/profile",
            Route::Security => "/security",
            Route::Analytics => "/analytics",
            Route::Settings => "/settings",
            Route::Billing => "/billing",
            Route::Admin => "/admin",
        }
    }

    pub fn access(&self) -> RouteAccess {
        match self {
            Route::Login | Route::Register => RouteAccess::Public,
            Route::Admin => RouteAccess::AdminOnly,
            _ => RouteAccess::Protected,
        }
    }

    /// Resolve a path; `/` is the dashboard
    pub fn from_path(path: &str) -> Option<Route> {
        let path = path.trim_end_matches('/');
        if path.is_empty() {
            return Some(Route::Dashboard);
        }
        Self::ALL.into_iter().find(|route| route.path() == path)
    }
}

/// Guard decision for `session` on a route requiring `access`
pub fn decide(session: &Session, access: RouteAccess) -> RouteDecision {
    match access {
        RouteAccess::Public => RouteDecision::Allow,
        RouteAccess::Protected => match session.current_user() {
            Some(_) => RouteDecision::Allow,
            None => RouteDecision::RedirectToLogin,
        },
        RouteAccess::AdminOnly => match session.current_user() {
            Some(user) if user.is_admin() => RouteDecision::Allow,
            Some(_) => RouteDecision::RedirectToDashboard,
            None => RouteDecision::RedirectToLogin,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{Plan, Role, User};

    fn session_with(role: Option<Role>) -> Session {
        let user = role.map(|role| User {
            id: 1,
            username: "alice".into(),
            email: "alice@example.com".into(),
            role,
            subscription_plan: Plan::Free,
            is_active: true,
            created_at: None,
        });
        Session {
            access_token: user.as_ref().map(|_| "token".to_string()),
            user,
            ..Session::default()
        }
    }

    #[test]
    fn test_public_routes_always_allowed() {
        assert_eq!(decide(&session_with(None), RouteAccess::Public), RouteDecision::Allow);
    }

    #[test]
    fn test_protected_route_requires_login() {
        assert_eq!(
            decide(&session_with(None), RouteAccess::Protected),
            RouteDecision::RedirectToLogin
        );
        assert_eq!(
            decide(&session_with(Some(Role::User)), RouteAccess::Protected),
            RouteDecision::Allow
        );
    }

    #[test]
    fn test_admin_route() {
        assert_eq!(
            decide(&session_with(None), RouteAccess::AdminOnly),
            RouteDecision::RedirectToLogin
        );
        assert_eq!(
            decide(&session_with(Some(Role::User)), RouteAccess::AdminOnly),
            RouteDecision::RedirectToDashboard
        );
        assert_eq!(
            decide(&session_with(Some(Role::Admin)), RouteAccess::AdminOnly),
            RouteDecision::Allow
        );
    }

    #[test]
    fn test_stale_user_without_token_is_redirected() {
        let mut session = session_with(Some(Role::Admin));
        session.access_token = None;

        assert_eq!(
            decide(&session, RouteAccess::Protected),
            RouteDecision::RedirectToLogin
        );
    }

    #[test]
    fn test_route_paths() {
        assert_eq!(Route::from_path("/"), Some(Route::Dashboard));
        assert_eq!(Route::from_path("/admin"), Some(Route::Admin));
        assert_eq!(Route::from_path("/billing/"), Some(Route::Billing));
        assert_eq!(Route::from_path("/nowhere"), None);
        assert_eq!(Route::Security.access(), RouteAccess::Protected);
        assert_eq!(
            RouteDecision::RedirectToLogin.redirect_path(),
            Some("/login")
        );
    }
}
