//! Sliding-window limiter against a live Redis server.
//!
//! Uses `PULSE_TEST_REDIS_URL` when set, otherwise starts a throwaway
//! container (requires Docker). Run with `cargo test -- --ignored`.

use std::sync::Arc;
use std::time::Duration;

use testcontainers::{ContainerAsync, runners::AsyncRunner};
use testcontainers_modules::redis::Redis;
use tokio::sync::OnceCell;
use uuid::Uuid;

use pulse_cache::redis::RedisCacheProvider;
use pulse_core::config::RateLimitConfig;
use pulse_core::traits::CacheProvider;
use pulse_core::config::cache::RedisCacheConfig;
use pulse_core::traits::rate_limiter::RateLimiter;
use pulse_ratelimit::{HybridRateLimiter, RedisRateLimiter};

static SHARED_REDIS: OnceCell<(Option<ContainerAsync<Redis>>, String)> = OnceCell::const_new();

async fn redis_url() -> String {
    let (_, url) = SHARED_REDIS
        .get_or_init(|| async {
            if let Ok(url) = std::env::var("PULSE_TEST_REDIS_URL") {
                return (None, url);
            }
            let container = Redis::default()
                .start()
                .await
                .expect("Failed to start Redis container");
            let port = container
                .get_host_port_ipv4(6379)
                .await
                .expect("Failed to get Redis port");
            (Some(container), format!("redis://127.0.0.1:{port}"))
        })
        .await;
    url.clone()
}

async fn provider() -> Arc<RedisCacheProvider> {
    let config = RedisCacheConfig {
        url: redis_url().await,
        key_prefix: format!("pulse-test:{}:", Uuid::new_v4().simple()),
        operation_timeout_ms: 2_000,
        health_check_interval_seconds: 0,
        ..RedisCacheConfig::default()
    };
    let provider = RedisCacheProvider::connect(&config).await.unwrap();
    assert!(provider.is_available());
    Arc::new(provider)
}

async fn limiter() -> RedisRateLimiter {
    RedisRateLimiter::new(provider().await, "ratelimit:")
}

#[tokio::test]
#[ignore = "requires Docker or PULSE_TEST_REDIS_URL"]
async fn admits_up_to_the_limit_then_denies() {
    let limiter = limiter().await;
    let window = Duration::from_secs(60);

    let mut remaining = Vec::new();
    for _ in 0..5 {
        let decision = limiter.allow("ip:1", 5, window).await;
        assert!(decision.allowed);
        remaining.push(decision.remaining);
    }
    assert_eq!(remaining, vec![4, 3, 2, 1, 0]);

    let denied = limiter.allow("ip:1", 5, window).await;
    assert!(!denied.allowed);
    assert_eq!(denied.remaining, 0);
    assert!(denied.retry_after_seconds() >= 1);

    assert!(limiter.allow("ip:2", 5, window).await.allowed);
}

#[tokio::test]
#[ignore = "requires Docker or PULSE_TEST_REDIS_URL"]
async fn remaining_is_read_without_consuming() {
    let limiter = limiter().await;
    let window = Duration::from_secs(60);

    assert_eq!(limiter.get_remaining("user:1", 5, window).await, 5);
    limiter.allow("user:1", 5, window).await;
    limiter.allow("user:1", 5, window).await;
    assert_eq!(limiter.get_remaining("user:1", 5, window).await, 3);
    assert_eq!(limiter.get_remaining("user:1", 5, window).await, 3);
}

#[tokio::test]
#[ignore = "requires Docker or PULSE_TEST_REDIS_URL"]
async fn window_slides_past_old_requests() {
    let limiter = limiter().await;
    let window = Duration::from_secs(1);

    assert!(limiter.allow("k", 2, window).await.allowed);
    assert!(limiter.allow("k", 2, window).await.allowed);
    assert!(!limiter.allow("k", 2, window).await.allowed);

    tokio::time::sleep(Duration::from_millis(1_100)).await;
    assert!(limiter.allow("k", 2, window).await.allowed);
}

#[tokio::test]
#[ignore = "requires Docker or PULSE_TEST_REDIS_URL"]
async fn forgiveness_admits_a_bounded_burst() {
    let limiter = limiter().await;
    let window = Duration::from_secs(60);

    assert!(limiter.allow_with_forgiveness("k", 1, window, 2).await.allowed);
    for _ in 0..2 {
        let forgiven = limiter.allow_with_forgiveness("k", 1, window, 2).await;
        assert!(forgiven.allowed);
        assert_eq!(forgiven.remaining, 0);
    }
    assert!(!limiter.allow_with_forgiveness("k", 1, window, 2).await.allowed);
}

#[tokio::test]
#[ignore = "requires Docker or PULSE_TEST_REDIS_URL"]
async fn reset_clears_both_quotas() {
    let limiter = limiter().await;
    let window = Duration::from_secs(60);

    limiter.allow_with_forgiveness("k", 1, window, 1).await;
    limiter.allow_with_forgiveness("k", 1, window, 1).await;
    assert!(!limiter.allow_with_forgiveness("k", 1, window, 1).await.allowed);

    limiter.reset("k").await;
    assert_eq!(limiter.get_remaining("k", 1, window).await, 1);
    assert!(limiter.allow("k", 1, window).await.allowed);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[ignore = "requires Docker or PULSE_TEST_REDIS_URL"]
async fn concurrent_callers_never_exceed_the_limit() {
    let limiter = Arc::new(limiter().await);
    let window = Duration::from_secs(60);

    let tasks: Vec<_> = (0..50)
        .map(|_| {
            let limiter = limiter.clone();
            tokio::spawn(async move { limiter.allow("hot", 10, window).await.allowed })
        })
        .collect();
    let mut admitted = 0;
    for task in tasks {
        if task.await.unwrap() {
            admitted += 1;
        }
    }

    assert_eq!(admitted, 10);
    assert_eq!(limiter.get_remaining("hot", 10, window).await, 0);
}

#[tokio::test]
#[ignore = "requires Docker or PULSE_TEST_REDIS_URL"]
async fn hybrid_prefers_an_available_server() {
    let limiter = HybridRateLimiter::new(Some(provider().await), &RateLimitConfig::default());
    assert!(limiter.is_distributed());
    assert!(limiter.allow("k", 1, Duration::from_secs(60)).await.allowed);
    assert!(!limiter.allow("k", 1, Duration::from_secs(60)).await.allowed);
}
