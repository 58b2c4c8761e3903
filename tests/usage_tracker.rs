use std::sync::Arc;

use chrono::{Duration, TimeZone, Utc};
use dashboard_client::api::Plan;
use dashboard_client::clock::{Clock, ManualClock};
use dashboard_client::usage::{PlanLimits, TrackerConfig, UsageError, UsageTracker};

fn tracker_at(plan: Plan, clock: &ManualClock) -> UsageTracker {
    UsageTracker::new(plan)
        .with_clock(Arc::new(clock.clone()))
        .with_config(TrackerConfig::instant())
}

fn clock() -> ManualClock {
    ManualClock::new(Utc.with_ymd_and_hms(2024, 9, 10, 8, 30, 0).unwrap())
}

#[tokio::test]
async fn test_free_plan_sixty_requests_under_a_second() {
    let clock = clock();
    let tracker = tracker_at(Plan::Free, &clock);

    for _ in 0..60 {
        tracker.record_request("/users/profile").await.unwrap();
        clock.advance(Duration::milliseconds(5));
    }

    let err = tracker.record_request("/users/profile").await.unwrap_err();
    assert_eq!(err, UsageError::RateLimited);
    assert_eq!(tracker.evaluate().requests_remaining, 0);
}

#[tokio::test]
async fn test_limit_n_then_recovers_after_61_seconds() {
    for n in [1u32, 7, 60] {
        let clock = clock();
        let start = clock.now();
        let tracker = tracker_at(Plan::Free, &clock).with_limits(PlanLimits {
            requests_per_minute: n,
            monthly_quota: 1_000,
        });

        for _ in 0..n {
            tracker.record_request("/a").await.unwrap();
            clock.advance(Duration::milliseconds(100));
        }
        assert_eq!(tracker.record_request("/a").await, Err(UsageError::RateLimited));

        clock.set(start + Duration::seconds(61));
        assert!(tracker.record_request("/a").await.is_ok(), "limit {}", n);
    }
}

#[tokio::test]
async fn test_reset_time_only_while_limited() {
    let clock = clock();
    let tracker = tracker_at(Plan::Free, &clock).with_limits(PlanLimits {
        requests_per_minute: 4,
        monthly_quota: 1_000,
    });

    for _ in 0..4 {
        let snapshot = tracker.evaluate();
        assert!(!snapshot.is_rate_limited);
        assert!(snapshot.reset_time.is_none());

        tracker.record_request("/a").await.unwrap();
        clock.advance(Duration::seconds(5));
    }

    let snapshot = tracker.evaluate();
    assert!(snapshot.is_rate_limited);
    assert!(snapshot.reset_time.unwrap() > clock.now());
}

#[tokio::test]
async fn test_consumed_quota_blocks_every_request() {
    let clock = clock();
    let tracker = tracker_at(Plan::Pro, &clock).with_monthly_usage(10_000);

    for endpoint in ["/a", "/b", "/c"] {
        assert_eq!(
            tracker.record_request(endpoint).await,
            Err(UsageError::QuotaExceeded)
        );
        clock.advance(Duration::minutes(5));
    }

    let snapshot = tracker.evaluate();
    assert!(snapshot.is_quota_exceeded);
    assert_eq!(snapshot.quota_remaining, 0);
    assert_eq!(tracker.stats().total_requests, 0);
}

#[tokio::test]
async fn test_monthly_usage_counts_only_recorded_requests() {
    let clock = clock();
    let tracker = tracker_at(Plan::Free, &clock);

    for _ in 0..25 {
        tracker.record_request("/a").await.unwrap();
        clock.advance(Duration::seconds(3));
    }

    assert_eq!(tracker.stats().requests_this_month, 25);
    assert_eq!(tracker.evaluate().quota_remaining, 975);
}
