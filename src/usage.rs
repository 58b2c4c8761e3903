//! Usage Tracking Module
//!
//! Client-side per-minute rate limiting and monthly quota display.
//!
//! Nothing here is authoritative: the backend enforces the real limits. The
//! tracker keeps the timestamps of requests made in the trailing 60-second
//! window and derives everything else from them and the wall clock, so the
//! two background loops can fire in any order.

use std::collections::{HashMap, VecDeque};
use std::ops::Range;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration as StdDuration;

use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc};
use rand::Rng;
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::api::{Plan, UsageSummary};
use crate::clock::{Clock, SystemClock};

/// Length of the sliding window in seconds
pub const WINDOW_SECS: i64 = 60;

/// Monthly quota value meaning "no quota"
pub const UNLIMITED: u64 = u64::MAX;

/// How many endpoints `UsageStats::top_endpoints` reports
const TOP_ENDPOINTS: usize = 5;

fn window() -> Duration {
    Duration::seconds(WINDOW_SECS)
}

/// Limits attached to a subscription plan
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanLimits {
    pub requests_per_minute: u32,
    pub monthly_quota: u64,
}

impl PlanLimits {
    pub fn for_plan(plan: Plan) -> Self {
        match plan {
            Plan::Free => Self {
                requests_per_minute: 60,
                monthly_quota: 1_000,
            },
            Plan::Pro => Self {
                requests_per_minute: 300,
                monthly_quota: 10_000,
            },
            // Custom rate, unlimited requests
            Plan::Enterprise => Self {
                requests_per_minute: 300,
                monthly_quota: UNLIMITED,
            },
        }
    }

    pub fn has_monthly_quota(&self) -> bool {
        self.monthly_quota != UNLIMITED
    }
}

/// Derived rate-limit state at one instant
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageSnapshot {
    pub requests_remaining: u32,
    pub quota_remaining: u64,
    /// Only set while rate limited
    pub reset_time: Option<DateTime<Utc>>,
    pub is_rate_limited: bool,
    pub is_quota_exceeded: bool,
}

/// Aggregate request counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageStats {
    pub total_requests: u64,
    pub requests_this_minute: u32,
    pub requests_today: u64,
    pub requests_this_month: u64,
    pub top_endpoints: Vec<EndpointUsage>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EndpointUsage {
    pub endpoint: String,
    pub count: u64,
}

/// Synthetic response to an accepted request
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestOutcome {
    pub success: bool,
    pub endpoint: String,
    pub message: String,
    pub recorded_at: DateTime<Utc>,
    pub latency_ms: u64,
}

/// Why a request was refused; both clear up on their own or after an upgrade
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum UsageError {
    #[error("Rate limit exceeded. Please wait a moment.")]
    RateLimited,

    #[error("Monthly quota exceeded. Please upgrade your plan.")]
    QuotaExceeded,
}

/// Tracker timing
#[derive(Debug, Clone)]
pub struct TrackerConfig {
    /// How often stale timestamps are dropped
    pub prune_interval: StdDuration,

    /// How often a fresh snapshot is published
    pub publish_interval: StdDuration,

    /// Bounds of the simulated request latency, in milliseconds
    pub simulated_latency_ms: Range<u64>,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            prune_interval: StdDuration::from_secs(10),
            publish_interval: StdDuration::from_secs(1),
            simulated_latency_ms: 100..300,
        }
    }
}

impl TrackerConfig {
    /// No simulated latency
    pub fn instant() -> Self {
        Self {
            simulated_latency_ms: 0..0,
            ..Self::default()
        }
    }
}

/// Mutable tracker state
#[derive(Debug)]
struct UsageWindow {
    /// Request times inside (or just past) the trailing window, oldest first
    timestamps: VecDeque<DateTime<Utc>>,
    monthly_usage: u64,
    total_requests: u64,
    requests_today: u64,
    endpoints: HashMap<String, u64>,
    day: NaiveDate,
}

impl UsageWindow {
    fn new(now: DateTime<Utc>) -> Self {
        Self {
            timestamps: VecDeque::new(),
            monthly_usage: 0,
            total_requests: 0,
            requests_today: 0,
            endpoints: HashMap::new(),
            day: now.date_naive(),
        }
    }

    fn same_month(&self, now: DateTime<Utc>) -> bool {
        self.day.year() == now.year() && self.day.month() == now.month()
    }

    fn monthly_usage_at(&self, now: DateTime<Utc>) -> u64 {
        if self.same_month(now) {
            self.monthly_usage
        } else {
            0
        }
    }

    fn requests_today_at(&self, now: DateTime<Utc>) -> u64 {
        if self.day == now.date_naive() {
            self.requests_today
        } else {
            0
        }
    }

    /// Reset day and month counters once the calendar moves on
    fn roll_over(&mut self, now: DateTime<Utc>) {
        let today = now.date_naive();
        if self.day == today {
            return;
        }

        if !self.same_month(now) {
            info!("New billing month, resetting monthly usage");
            self.monthly_usage = 0;
        }
        self.requests_today = 0;
        self.day = today;
    }

    /// Timestamps strictly newer than `now - 60s`
    fn recent(&self, now: DateTime<Utc>) -> impl Iterator<Item = &DateTime<Utc>> {
        let cutoff = now - window();
        self.timestamps.iter().filter(move |t| **t > cutoff)
    }

    fn evaluate(&self, limits: &PlanLimits, now: DateTime<Utc>) -> UsageSnapshot {
        let (count, oldest) = self
            .recent(now)
            .fold((0usize, None::<DateTime<Utc>>), |(count, oldest), t| {
                let oldest = Some(oldest.map_or(*t, |o| o.min(*t)));
                (count + 1, oldest)
            });
        let count = u32::try_from(count).unwrap_or(u32::MAX);

        let is_rate_limited = count >= limits.requests_per_minute;
        let reset_time = if is_rate_limited {
            Some(oldest.unwrap_or(now) + window())
        } else {
            None
        };

        let monthly_usage = self.monthly_usage_at(now);
        let (quota_remaining, is_quota_exceeded) = if limits.has_monthly_quota() {
            (
                limits.monthly_quota.saturating_sub(monthly_usage),
                monthly_usage >= limits.monthly_quota,
            )
        } else {
            (UNLIMITED, false)
        };

        UsageSnapshot {
            requests_remaining: limits.requests_per_minute.saturating_sub(count),
            quota_remaining,
            reset_time,
            is_rate_limited,
            is_quota_exceeded,
        }
    }
}

/// Simulated per-minute limiter and monthly quota for one session
pub struct UsageTracker {
    plan: Plan,
    limits: PlanLimits,
    config: TrackerConfig,
    clock: Arc<dyn Clock>,
    window: Mutex<UsageWindow>,
}

impl UsageTracker {
    /// Tracker with the plan's limits, the system clock and default timing
    pub fn new(plan: Plan) -> Self {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let window = UsageWindow::new(clock.now());

        Self {
            plan,
            limits: PlanLimits::for_plan(plan),
            config: TrackerConfig::default(),
            clock,
            window: Mutex::new(window),
        }
    }

    /// Use another time source; restarts the day/month bookkeeping from it
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        let now = clock.now();
        self.window
            .get_mut()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .day = now.date_naive();
        self.clock = clock;
        self
    }

    pub fn with_config(mut self, config: TrackerConfig) -> Self {
        self.config = config;
        self
    }

    /// Override the plan's limits
    pub fn with_limits(mut self, limits: PlanLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Seed requests already counted this month
    pub fn with_monthly_usage(mut self, used: u64) -> Self {
        self.window
            .get_mut()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .monthly_usage = used;
        self
    }

    /// Seed the month's count from the server's usage summary
    pub fn with_usage_summary(self, summary: &UsageSummary) -> Self {
        self.with_monthly_usage(summary.requests_this_month)
    }

    pub fn plan(&self) -> Plan {
        self.plan
    }

    pub fn limits(&self) -> PlanLimits {
        self.limits
    }

    fn lock(&self) -> MutexGuard<'_, UsageWindow> {
        self.window.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Current rate-limit state; reads only
    pub fn evaluate(&self) -> UsageSnapshot {
        let now = self.clock.now();
        self.lock().evaluate(&self.limits, now)
    }

    /// Counters and the most used endpoints
    pub fn stats(&self) -> UsageStats {
        let now = self.clock.now();
        let window = self.lock();

        let mut top_endpoints: Vec<EndpointUsage> = window
            .endpoints
            .iter()
            .map(|(endpoint, count)| EndpointUsage {
                endpoint: endpoint.clone(),
                count: *count,
            })
            .collect();
        top_endpoints.sort_by(|a, b| {
            b.count
                .cmp(&a.count)
                .then_with(|| a.endpoint.cmp(&b.endpoint))
        });
        top_endpoints.truncate(TOP_ENDPOINTS);

        UsageStats {
            total_requests: window.total_requests,
            requests_this_minute: u32::try_from(window.recent(now).count()).unwrap_or(u32::MAX),
            requests_today: window.requests_today_at(now),
            requests_this_month: window.monthly_usage_at(now),
            top_endpoints,
        }
    }

    /// Simulate one API request
    ///
    /// The per-minute limit is checked before the monthly quota. An accepted
    /// request is counted before the simulated latency elapses.
    pub async fn record_request(&self, endpoint: &str) -> Result<RequestOutcome, UsageError> {
        let now = self.clock.now();

        {
            let mut window = self.lock();
            window.roll_over(now);

            let snapshot = window.evaluate(&self.limits, now);
            if snapshot.is_rate_limited {
                warn!("Rate limit reached for {} plan on {}", self.plan, endpoint);
                return Err(UsageError::RateLimited);
            }
            if snapshot.is_quota_exceeded {
                warn!("Monthly quota exhausted for {} plan on {}", self.plan, endpoint);
                return Err(UsageError::QuotaExceeded);
            }

            window.timestamps.push_back(now);
            window.total_requests = window.total_requests.saturating_add(1);
            window.requests_today = window.requests_today.saturating_add(1);
            window.monthly_usage = window.monthly_usage.saturating_add(1);
            let count = window.endpoints.entry(endpoint.to_string()).or_insert(0);
            *count = count.saturating_add(1);
        }

        debug!("Recorded request to {}", endpoint);

        let latency = self.simulated_latency();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        Ok(RequestOutcome {
            success: true,
            endpoint: endpoint.to_string(),
            message: "Request successful".to_string(),
            recorded_at: now,
            latency_ms: latency.as_millis() as u64,
        })
    }

    fn simulated_latency(&self) -> StdDuration {
        let range = self.config.simulated_latency_ms.clone();
        if range.is_empty() {
            return StdDuration::ZERO;
        }
        StdDuration::from_millis(rand::rng().random_range(range))
    }

    /// Drop timestamps that have left the window
    pub fn prune(&self) -> usize {
        let cutoff = self.clock.now() - window();
        let mut window = self.lock();

        let before = window.timestamps.len();
        window.timestamps.retain(|t| *t > cutoff);
        let removed = before - window.timestamps.len();

        if removed > 0 {
            debug!("Pruned {} expired request timestamps", removed);
        }
        removed
    }

    /// Number of timestamps currently retained
    pub fn retained(&self) -> usize {
        self.lock().timestamps.len()
    }

    /// Start the prune and publish loops
    ///
    /// Both loops stop when the returned handle is stopped or dropped.
    pub fn start(self: &Arc<Self>) -> TrackerHandle {
        let (tx, rx) = watch::channel(self.evaluate());

        let tracker = Arc::clone(self);
        let prune_every = self.config.prune_interval;
        let prune_task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(prune_every);
            interval.tick().await;
            loop {
                interval.tick().await;
                tracker.prune();
            }
        });

        let tracker = Arc::clone(self);
        let publish_every = self.config.publish_interval;
        let publish_task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(publish_every);
            interval.tick().await;
            loop {
                interval.tick().await;
                if tx.send(tracker.evaluate()).is_err() {
                    debug!("No snapshot subscribers left, stopping publisher");
                    break;
                }
            }
        });

        info!("Usage tracking started for {} plan", self.plan);

        TrackerHandle {
            snapshots: rx,
            tasks: vec![prune_task, publish_task],
        }
    }
}

/// Running background loops of a tracker
pub struct TrackerHandle {
    snapshots: watch::Receiver<UsageSnapshot>,
    tasks: Vec<JoinHandle<()>>,
}

impl TrackerHandle {
    /// Most recently published snapshot
    pub fn latest(&self) -> UsageSnapshot {
        self.snapshots.borrow().clone()
    }

    /// Receiver notified on every publish
    pub fn subscribe(&self) -> watch::Receiver<UsageSnapshot> {
        self.snapshots.clone()
    }

    pub fn is_running(&self) -> bool {
        self.tasks.iter().any(|task| !task.is_finished())
    }

    /// Cancel both loops
    pub fn stop(mut self) {
        self.abort_all();
    }

    fn abort_all(&mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
    }
}

impl Drop for TrackerHandle {
    fn drop(&mut self) {
        if !self.tasks.is_empty() {
            debug!("Stopping usage tracking");
        }
        self.abort_all();
    }
}
