//! SaaS Dashboard Client Library
//!
//! Session store, route guard and usage tracker behind the dashboard UI.

pub mod api;
pub mod auth;
pub mod clock;
pub mod commands;
pub mod config;
pub mod guard;
pub mod logging;
pub mod storage;
pub mod usage;

use std::sync::Arc;

use tracing::warn;

use api::{ApiClient, ApiError, Plan};
use auth::SessionStore;
use config::ClientConfig;
use storage::FileStore;
use usage::UsageTracker;

/// Application context owned by the root and handed to commands
pub struct AppState {
    pub config: ClientConfig,
    pub session: SessionStore,
    pub api: Arc<ApiClient>,
}

impl AppState {
    /// Build the HTTP client and rehydrate the session from disk
    pub fn new(config: ClientConfig) -> Result<Self, ApiError> {
        let api = Arc::new(ApiClient::new(&config)?);
        let storage = Arc::new(FileStore::new(&config.data_dir));
        let session = SessionStore::restore(api.clone(), storage);

        Ok(Self {
            config,
            session,
            api,
        })
    }

    /// Usage tracker for the current user's plan
    ///
    /// When logged in, the month's count is seeded from `/users/usage`. An
    /// unreachable server leaves it at zero.
    pub async fn usage_tracker(&self) -> UsageTracker {
        let Some(user) = self.session.user() else {
            return UsageTracker::new(Plan::Free);
        };
        let tracker = UsageTracker::new(user.subscription_plan);

        let Some(token) = self.session.access_token() else {
            return tracker;
        };
        match self.api.usage(&token).await {
            Ok(summary) => tracker.with_usage_summary(&summary),
            Err(e) => {
                warn!("Could not load usage summary, starting from zero: {}", e);
                tracker
            }
        }
    }
}
