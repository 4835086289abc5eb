//! Rate limiting over real time

use crate::common::{contributors_path, harvester, seeded_store, test_config};
use contrib_harvest::ratelimit::{BackoffPolicy, RateLimiter};
use std::sync::Arc;
use std::time::{Duration, Instant};
use wiremock::matchers::{method, path_regex};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn quick_policy() -> BackoffPolicy {
    BackoffPolicy::new(
        10,
        Duration::from_millis(10),
        2.0,
        Duration::from_secs(1),
    )
}

#[tokio::test]
async fn test_two_per_second_spreads_five_calls_over_two_seconds() {
    let limiter = RateLimiter::new(2, Duration::from_secs(1), quick_policy());
    let start = Instant::now();

    for _ in 0..5 {
        limiter.acquire().await.unwrap();
    }

    assert!(start.elapsed() >= Duration::from_secs(2));
}

#[tokio::test]
async fn test_shared_limiter_bounds_concurrent_callers() {
    let limiter = Arc::new(RateLimiter::new(2, Duration::from_secs(1), quick_policy()));
    let start = Instant::now();

    let mut handles = Vec::new();
    for _ in 0..5 {
        let limiter = Arc::clone(&limiter);
        handles.push(tokio::spawn(async move { limiter.acquire().await }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    assert!(start.elapsed() >= Duration::from_secs(2));
}

#[tokio::test]
async fn test_batch_respects_configured_window() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path_regex(r"^/api/Pypi/[^/]+/contributors$"))
        .respond_with(ResponseTemplate::new(200).set_body_string("[]"))
        .expect(5)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let store = seeded_store(dir.path(), &["a1", "a2", "a3", "a4", "a5"]);
    let mut config = test_config(&server);
    config.rate_limit.calls = 2;
    config.rate_limit.period_secs = 1;
    let harvester = harvester(&config, store);

    let start = Instant::now();
    let report = harvester.run_batch(5).await.unwrap();

    assert_eq!(report.records_written, 5);
    assert!(start.elapsed() >= Duration::from_secs(2));

    // Every request reached the expected endpoint
    let requests = server.received_requests().await.unwrap();
    assert!(requests
        .iter()
        .all(|r| r.url.path().ends_with("/contributors")));
    assert!(requests
        .iter()
        .any(|r| r.url.path() == contributors_path("a1")));
}
