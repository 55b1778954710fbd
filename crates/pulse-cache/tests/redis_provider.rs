//! Redis provider behaviour against a live server.
//!
//! Uses `PULSE_TEST_REDIS_URL` when set, otherwise starts a throwaway
//! container (requires Docker). Run with `cargo test -- --ignored`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use testcontainers::{ContainerAsync, runners::AsyncRunner};
use testcontainers_modules::redis::Redis;
use tokio::sync::OnceCell;
use uuid::Uuid;

use pulse_cache::redis::RedisCacheProvider;
use pulse_core::config::cache::RedisCacheConfig;
use pulse_core::error::CacheError;
use pulse_core::traits::cache::{CacheProvider, KeyTtl};

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

/// A connected provider whose keys live under a prefix unique to the test.
async fn provider() -> RedisCacheProvider {
    let config = RedisCacheConfig {
        url: redis_url().await,
        key_prefix: format!("pulse-test:{}:", Uuid::new_v4().simple()),
        operation_timeout_ms: 2_000,
        health_check_interval_seconds: 0,
        ..RedisCacheConfig::default()
    };
    let provider = RedisCacheProvider::connect(&config).await.unwrap();
    assert!(provider.is_available());
    provider
}

#[tokio::test]
#[ignore = "requires Docker or PULSE_TEST_REDIS_URL"]
async fn scalars_and_ttl_sentinels() {
    let cache = provider().await;

    assert!(matches!(cache.get("absent").await, Err(CacheError::Miss { .. })));
    assert_eq!(cache.ttl("absent").await.unwrap(), KeyTtl::Missing);

    cache.set("plain", "v", Duration::ZERO).await.unwrap();
    assert_eq!(cache.get("plain").await.unwrap(), "v");
    assert_eq!(cache.ttl("plain").await.unwrap(), KeyTtl::Persistent);

    cache.set("timed", "v", Duration::from_secs(30)).await.unwrap();
    assert!(matches!(cache.ttl("timed").await.unwrap(), KeyTtl::Expires(_)));
    assert!(cache.expire("timed", Duration::ZERO).await.unwrap());
    assert_eq!(cache.ttl("timed").await.unwrap(), KeyTtl::Persistent);
    assert!(!cache.expire("absent", Duration::from_secs(5)).await.unwrap());

    cache.delete("plain").await.unwrap();
    assert!(!cache.exists("plain").await.unwrap());
    cache.close().await.unwrap();
}

#[tokio::test]
#[ignore = "requires Docker or PULSE_TEST_REDIS_URL"]
async fn batch_operations_keep_request_order() {
    let cache = provider().await;

    let entries = HashMap::from([
        ("a".to_string(), "1".to_string()),
        ("b".to_string(), "2".to_string()),
    ]);
    cache.mset(&entries, Duration::from_secs(60)).await.unwrap();
    assert!(matches!(cache.ttl("a").await.unwrap(), KeyTtl::Expires(_)));

    let values = cache.mget(&["b", "missing", "a"]).await.unwrap();
    assert_eq!(values, vec!["2", "", "1"]);

    cache.mdelete(&["a", "b"]).await.unwrap();
    assert_eq!(cache.mget(&["a", "b"]).await.unwrap(), vec!["", ""]);
    cache.close().await.unwrap();
}

#[tokio::test]
#[ignore = "requires Docker or PULSE_TEST_REDIS_URL"]
async fn lists_push_to_head_and_trim() {
    let cache = provider().await;

    assert_eq!(cache.lpush("l", &["a", "b"]).await.unwrap(), 2);
    assert_eq!(cache.lpush("l", &["c"]).await.unwrap(), 3);
    assert_eq!(cache.lrange("l", 0, -1).await.unwrap(), vec!["c", "b", "a"]);

    for i in 0..30 {
        let value = i.to_string();
        cache.lpush("bounded", &[value.as_str()]).await.unwrap();
        cache.ltrim("bounded", 0, 19).await.unwrap();
    }
    let kept = cache.lrange("bounded", 0, -1).await.unwrap();
    assert_eq!(kept.len(), 20);
    assert_eq!(kept[0], "29");

    cache.ltrim("l", 5, 10).await.unwrap();
    assert!(!cache.exists("l").await.unwrap());
    assert!(cache.lpush("l", &[]).await.is_err());
    cache.close().await.unwrap();
}

#[tokio::test]
#[ignore = "requires Docker or PULSE_TEST_REDIS_URL"]
async fn hashes_and_counters() {
    let cache = provider().await;

    let fields = HashMap::from([
        ("name".to_string(), "ada".to_string()),
        ("role".to_string(), "admin".to_string()),
    ]);
    cache.hset("h", &fields).await.unwrap();
    assert_eq!(cache.hget("h", "name").await.unwrap(), "ada");
    assert!(matches!(cache.hget("h", "nope").await, Err(CacheError::Miss { .. })));
    assert_eq!(cache.hgetall("h").await.unwrap(), fields);
    assert_eq!(cache.hdel("h", &["role", "nope"]).await.unwrap(), 1);
    assert!(cache.hgetall("missing").await.unwrap().is_empty());

    assert_eq!(cache.incr("n").await.unwrap(), 1);
    assert_eq!(cache.decr("n").await.unwrap(), 0);
    cache.set("text", "abc", Duration::ZERO).await.unwrap();
    let err = cache.incr("text").await.unwrap_err();
    assert!(!err.is_cache_miss());
    assert!(!err.is_cache_unavailable());

    let err = cache.lpush("text", &["x"]).await.unwrap_err();
    assert!(err.to_string().contains("WRONGTYPE"));
    cache.close().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[ignore = "requires Docker or PULSE_TEST_REDIS_URL"]
async fn concurrent_hincrby_loses_no_update() {
    let cache = Arc::new(provider().await);

    let tasks: Vec<_> = (0..100)
        .map(|_| {
            let cache = cache.clone();
            tokio::spawn(async move { cache.hincrby("counts", "c1", 1).await.unwrap() })
        })
        .collect();
    for task in tasks {
        task.await.unwrap();
    }

    assert_eq!(cache.hget("counts", "c1").await.unwrap(), "100");
    cache.close().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[ignore = "requires Docker or PULSE_TEST_REDIS_URL"]
async fn concurrent_set_nx_has_one_winner() {
    let cache = Arc::new(provider().await);

    let tasks: Vec<_> = (0..32)
        .map(|i| {
            let cache = cache.clone();
            tokio::spawn(async move {
                cache
                    .set_nx("lock", &format!("owner-{i}"), Duration::from_secs(30))
                    .await
                    .unwrap()
            })
        })
        .collect();
    let mut winners = 0;
    for task in tasks {
        if task.await.unwrap() {
            winners += 1;
        }
    }

    assert_eq!(winners, 1);
    assert!(cache.get("lock").await.unwrap().starts_with("owner-"));
    cache.close().await.unwrap();
}

#[tokio::test]
#[ignore = "requires Docker or PULSE_TEST_REDIS_URL"]
async fn patterns_are_scoped_to_the_prefix() {
    let cache = provider().await;

    for key in ["feed:u1:0", "feed:u1:1", "feed:u2:0"] {
        cache.set(key, "page", Duration::ZERO).await.unwrap();
    }

    let mut keys = cache.keys("feed:u1:*").await.unwrap();
    keys.sort();
    assert_eq!(keys, vec!["feed:u1:0", "feed:u1:1"]);

    let mut cursor = 0;
    let mut scanned = Vec::new();
    loop {
        let (next, batch) = cache.scan(cursor, "feed:*", 10).await.unwrap();
        scanned.extend(batch);
        if next == 0 {
            break;
        }
        cursor = next;
    }
    scanned.sort();
    assert_eq!(scanned, vec!["feed:u1:0", "feed:u1:1", "feed:u2:0"]);

    assert_eq!(cache.delete_pattern("feed:u1:*").await.unwrap(), 2);
    assert_eq!(cache.keys("feed:*").await.unwrap(), vec!["feed:u2:0"]);
    cache.close().await.unwrap();
}

#[tokio::test]
#[ignore = "requires Docker or PULSE_TEST_REDIS_URL"]
async fn published_messages_reach_subscribers() {
    let cache = provider().await;

    let mut sub = cache.subscribe(&["chat:1"]).await.unwrap();
    assert_eq!(cache.publish("chat:1", "hello").await.unwrap(), 1);

    let msg = tokio::time::timeout(Duration::from_secs(2), sub.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(msg.channel, "chat:1");
    assert_eq!(msg.payload, "hello");

    sub.close();
    cache.close().await.unwrap();
}
