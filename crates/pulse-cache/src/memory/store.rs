//! In-memory cache implementation backed by process-local maps.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{RwLock, RwLockWriteGuard, watch};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info};

use pulse_core::config::cache::MemoryCacheConfig;
use pulse_core::error::CacheError;
use pulse_core::result::CacheResult;
use pulse_core::traits::cache::{CacheProvider, KeyTtl, Subscription};

use super::pattern::glob_match;
use super::pubsub::PubSubRegistry;

/// A stored value with an optional deadline.
#[derive(Debug, Clone)]
struct Entry<T> {
    value: T,
    expires_at: Option<Instant>,
}

impl<T> Entry<T> {
    fn new(value: T, ttl: Duration) -> Self {
        Self {
            value,
            expires_at: deadline(ttl),
        }
    }

    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }

    fn ttl(&self, now: Instant) -> KeyTtl {
        match self.expires_at {
            None => KeyTtl::Persistent,
            Some(at) => KeyTtl::Expires(at.saturating_duration_since(now)),
        }
    }
}

fn deadline(ttl: Duration) -> Option<Instant> {
    (!ttl.is_zero()).then(|| Instant::now() + ttl)
}

type Map<T> = RwLock<HashMap<String, Entry<T>>>;
type MapGuard<'a, T> = RwLockWriteGuard<'a, HashMap<String, Entry<T>>>;

/// Which keyspace a live key belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    Scalar,
    List,
    Hash,
}

impl Kind {
    fn name(self) -> &'static str {
        match self {
            Self::Scalar => "string",
            Self::List => "list",
            Self::Hash => "hash",
        }
    }
}

/// The three keyspaces, each behind its own lock.
#[derive(Debug, Default)]
struct MemoryStore {
    scalars: Map<String>,
    lists: Map<VecDeque<String>>,
    hashes: Map<HashMap<String, String>>,
}

impl MemoryStore {
    /// Lock every keyspace for writing, always in the same order.
    async fn write_all(&self) -> Keyspaces<'_> {
        let scalars = self.scalars.write().await;
        let lists = self.lists.write().await;
        let hashes = self.hashes.write().await;
        Keyspaces {
            scalars,
            lists,
            hashes,
        }
    }

    /// Remove every expired entry. Returns how many were removed.
    async fn sweep(&self) -> usize {
        let now = Instant::now();
        let mut removed = 0;
        removed += retain_live(&mut *self.scalars.write().await, now);
        removed += retain_live(&mut *self.lists.write().await, now);
        removed += retain_live(&mut *self.hashes.write().await, now);
        removed
    }
}

/// Write access to all three keyspaces at once, for operations that must
/// keep a key in at most one of them.
struct Keyspaces<'a> {
    scalars: MapGuard<'a, String>,
    lists: MapGuard<'a, VecDeque<String>>,
    hashes: MapGuard<'a, HashMap<String, String>>,
}

impl Keyspaces<'_> {
    /// Keyspace holding a live `key`. Expired entries met on the way are
    /// evicted.
    fn kind(&mut self, key: &str) -> Option<Kind> {
        if live_mut(&mut *self.scalars, key).is_some() {
            return Some(Kind::Scalar);
        }
        if live_mut(&mut *self.lists, key).is_some() {
            return Some(Kind::List);
        }
        if live_mut(&mut *self.hashes, key).is_some() {
            return Some(Kind::Hash);
        }
        None
    }

    /// Reject `key` when it already holds another kind of value.
    fn ensure_kind(&mut self, key: &str, expected: Kind) -> CacheResult<()> {
        match self.kind(key) {
            Some(found) if found != expected => Err(CacheError::backend(format!(
                "WRONGTYPE {key} holds a {}, not a {}",
                found.name(),
                expected.name()
            ))),
            _ => Ok(()),
        }
    }

    /// Forget `key` in every keyspace.
    fn clear(&mut self, key: &str) {
        self.scalars.remove(key);
        self.lists.remove(key);
        self.hashes.remove(key);
    }
}

fn retain_live<T>(map: &mut HashMap<String, Entry<T>>, now: Instant) -> usize {
    let before = map.len();
    map.retain(|_, entry| !entry.is_expired(now));
    before - map.len()
}

/// Look up a live entry, treating an expired one as absent.
fn live<'a, T>(map: &'a HashMap<String, Entry<T>>, key: &str) -> Option<&'a Entry<T>> {
    map.get(key).filter(|e| !e.is_expired(Instant::now()))
}

/// Mutable lookup that lazily evicts an expired entry.
fn live_mut<'a, T>(map: &'a mut HashMap<String, Entry<T>>, key: &str) -> Option<&'a mut Entry<T>> {
    if map.get(key).is_some_and(|e| e.is_expired(Instant::now())) {
        map.remove(key);
    }
    map.get_mut(key)
}

/// Resolve a Redis-style inclusive range against a list of length `len`.
fn resolve_range(len: usize, start: i64, stop: i64) -> Option<(usize, usize)> {
    let len = len as i64;
    let start = if start < 0 { (len + start).max(0) } else { start };
    let stop = if stop < 0 { len + stop } else { stop.min(len - 1) };
    if len == 0 || start > stop || start >= len {
        return None;
    }
    Some((start as usize, stop as usize))
}

fn parse_integer(value: &str) -> CacheResult<i64> {
    value
        .parse::<i64>()
        .map_err(|_| CacheError::backend("value is not an integer"))
}

fn checked_add(current: i64, delta: i64) -> CacheResult<i64> {
    current
        .checked_add(delta)
        .ok_or_else(|| CacheError::backend("increment or decrement would overflow"))
}

/// In-memory cache provider.
///
/// Single-instance only: nothing here is visible to other processes.
/// Expired entries are removed by a background sweep and lazily on access.
#[derive(Debug)]
pub struct MemoryCacheProvider {
    /// Scalar, list, and hash keyspaces.
    store: Arc<MemoryStore>,
    /// Pub/sub fan-out table.
    pubsub: Arc<PubSubRegistry>,
    /// Signals the expiry sweep to stop.
    shutdown_tx: watch::Sender<bool>,
}

impl MemoryCacheProvider {
    /// Create a new in-memory cache and start its expiry sweep.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(config: &MemoryCacheConfig) -> Self {
        let store = Arc::new(MemoryStore::default());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let interval = Duration::from_secs(config.sweep_interval_seconds.max(1));
        tokio::spawn(run_sweeper(Arc::clone(&store), interval, shutdown_rx));

        Self {
            store,
            pubsub: Arc::new(PubSubRegistry::new(config.pubsub_buffer_size)),
            shutdown_tx,
        }
    }

    /// Remove every expired entry now. Returns how many were removed.
    pub async fn purge_expired(&self) -> usize {
        self.store.sweep().await
    }

    async fn incr_by(&self, key: &str, delta: i64) -> CacheResult<i64> {
        let mut spaces = self.store.write_all().await;
        spaces.ensure_kind(key, Kind::Scalar)?;
        match spaces.scalars.get_mut(key) {
            Some(entry) => {
                let next = checked_add(parse_integer(&entry.value)?, delta)?;
                entry.value = next.to_string();
                Ok(next)
            }
            None => {
                spaces
                    .scalars
                    .insert(key.to_string(), Entry::new(delta.to_string(), Duration::ZERO));
                Ok(delta)
            }
        }
    }

    async fn matching_keys(&self, pattern: &str) -> Vec<String> {
        let now = Instant::now();
        let mut keys = Vec::new();
        {
            let scalars = self.store.scalars.read().await;
            keys.extend(
                scalars
                    .iter()
                    .filter(|(k, e)| !e.is_expired(now) && glob_match(pattern, k))
                    .map(|(k, _)| k.clone()),
            );
        }
        {
            let lists = self.store.lists.read().await;
            keys.extend(
                lists
                    .iter()
                    .filter(|(k, e)| !e.is_expired(now) && glob_match(pattern, k))
                    .map(|(k, _)| k.clone()),
            );
        }
        {
            let hashes = self.store.hashes.read().await;
            keys.extend(
                hashes
                    .iter()
                    .filter(|(k, e)| !e.is_expired(now) && glob_match(pattern, k))
                    .map(|(k, _)| k.clone()),
            );
        }
        keys.sort();
        keys.dedup();
        keys
    }
}

async fn run_sweeper(
    store: Arc<MemoryStore>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
            _ = ticker.tick() => {
                let removed = store.sweep().await;
                if removed > 0 {
                    debug!(removed, "Expired cache entries swept");
                }
            }
        }
    }
    debug!("Cache expiry sweep stopped");
}

#[async_trait]
impl CacheProvider for MemoryCacheProvider {
    async fn get(&self, key: &str) -> CacheResult<String> {
        {
            let scalars = self.store.scalars.read().await;
            match scalars.get(key) {
                Some(entry) if !entry.is_expired(Instant::now()) => {
                    return Ok(entry.value.clone());
                }
                Some(_) => {}
                None => return Err(CacheError::miss(key)),
            }
        }
        // Expired entry: evict it now.
        let mut scalars = self.store.scalars.write().await;
        let _ = live_mut(&mut scalars, key);
        Err(CacheError::miss(key))
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> CacheResult<()> {
        let mut spaces = self.store.write_all().await;
        spaces.clear(key);
        spaces
            .scalars
            .insert(key.to_string(), Entry::new(value.to_string(), ttl));
        Ok(())
    }

    async fn delete(&self, key: &str) -> CacheResult<()> {
        self.mdelete(&[key]).await
    }

    async fn exists(&self, key: &str) -> CacheResult<bool> {
        if live(&*self.store.scalars.read().await, key).is_some() {
            return Ok(true);
        }
        if live(&*self.store.lists.read().await, key).is_some() {
            return Ok(true);
        }
        Ok(live(&*self.store.hashes.read().await, key).is_some())
    }

    async fn mget(&self, keys: &[&str]) -> CacheResult<Vec<String>> {
        let scalars = self.store.scalars.read().await;
        Ok(keys
            .iter()
            .map(|k| live(&scalars, k).map(|e| e.value.clone()).unwrap_or_default())
            .collect())
    }

    async fn mset(&self, entries: &HashMap<String, String>, ttl: Duration) -> CacheResult<()> {
        let mut spaces = self.store.write_all().await;
        for (key, value) in entries {
            spaces.clear(key);
            spaces
                .scalars
                .insert(key.clone(), Entry::new(value.clone(), ttl));
        }
        Ok(())
    }

    async fn mdelete(&self, keys: &[&str]) -> CacheResult<()> {
        {
            let mut scalars = self.store.scalars.write().await;
            for key in keys {
                scalars.remove(*key);
            }
        }
        {
            let mut lists = self.store.lists.write().await;
            for key in keys {
                lists.remove(*key);
            }
        }
        let mut hashes = self.store.hashes.write().await;
        for key in keys {
            hashes.remove(*key);
        }
        Ok(())
    }

    async fn lpush(&self, key: &str, values: &[&str]) -> CacheResult<u64> {
        if values.is_empty() {
            return Err(CacheError::backend("LPUSH requires at least one value"));
        }
        let mut spaces = self.store.write_all().await;
        spaces.ensure_kind(key, Kind::List)?;
        let entry = spaces
            .lists
            .entry(key.to_string())
            .or_insert_with(|| Entry::new(VecDeque::new(), Duration::ZERO));
        for value in values {
            entry.value.push_front((*value).to_string());
        }
        Ok(entry.value.len() as u64)
    }

    async fn lrange(&self, key: &str, start: i64, stop: i64) -> CacheResult<Vec<String>> {
        let lists = self.store.lists.read().await;
        let Some(entry) = live(&lists, key) else {
            return Ok(Vec::new());
        };
        Ok(match resolve_range(entry.value.len(), start, stop) {
            Some((from, to)) => entry.value.range(from..=to).cloned().collect(),
            None => Vec::new(),
        })
    }

    async fn ltrim(&self, key: &str, start: i64, stop: i64) -> CacheResult<()> {
        let mut lists = self.store.lists.write().await;
        let Some(entry) = live_mut(&mut lists, key) else {
            return Ok(());
        };
        match resolve_range(entry.value.len(), start, stop) {
            Some((from, to)) => {
                entry.value.truncate(to + 1);
                entry.value.drain(..from);
            }
            None => {
                lists.remove(key);
            }
        }
        Ok(())
    }

    async fn hget(&self, key: &str, field: &str) -> CacheResult<String> {
        let hashes = self.store.hashes.read().await;
        live(&hashes, key)
            .and_then(|e| e.value.get(field).cloned())
            .ok_or_else(|| CacheError::miss(format!("{key}#{field}")))
    }

    async fn hset(&self, key: &str, fields: &HashMap<String, String>) -> CacheResult<()> {
        if fields.is_empty() {
            return Ok(());
        }
        let mut spaces = self.store.write_all().await;
        spaces.ensure_kind(key, Kind::Hash)?;
        spaces
            .hashes
            .entry(key.to_string())
            .or_insert_with(|| Entry::new(HashMap::new(), Duration::ZERO))
            .value
            .extend(fields.iter().map(|(f, v)| (f.clone(), v.clone())));
        Ok(())
    }

    async fn hgetall(&self, key: &str) -> CacheResult<HashMap<String, String>> {
        let hashes = self.store.hashes.read().await;
        Ok(live(&hashes, key).map(|e| e.value.clone()).unwrap_or_default())
    }

    async fn hdel(&self, key: &str, fields: &[&str]) -> CacheResult<u64> {
        let mut hashes = self.store.hashes.write().await;
        let Some(entry) = live_mut(&mut hashes, key) else {
            return Ok(0);
        };
        let removed = fields
            .iter()
            .filter(|f| entry.value.remove(**f).is_some())
            .count() as u64;
        if entry.value.is_empty() {
            hashes.remove(key);
        }
        Ok(removed)
    }

    async fn hincrby(&self, key: &str, field: &str, delta: i64) -> CacheResult<i64> {
        let mut spaces = self.store.write_all().await;
        spaces.ensure_kind(key, Kind::Hash)?;
        let entry = spaces
            .hashes
            .entry(key.to_string())
            .or_insert_with(|| Entry::new(HashMap::new(), Duration::ZERO));
        let current = match entry.value.get(field) {
            Some(value) => parse_integer(value)?,
            None => 0,
        };
        let next = checked_add(current, delta)?;
        entry.value.insert(field.to_string(), next.to_string());
        Ok(next)
    }

    async fn incr(&self, key: &str) -> CacheResult<i64> {
        self.incr_by(key, 1).await
    }

    async fn decr(&self, key: &str) -> CacheResult<i64> {
        self.incr_by(key, -1).await
    }

    async fn set_nx(&self, key: &str, value: &str, ttl: Duration) -> CacheResult<bool> {
        let mut spaces = self.store.write_all().await;
        if spaces.kind(key).is_some() {
            return Ok(false);
        }
        spaces
            .scalars
            .insert(key.to_string(), Entry::new(value.to_string(), ttl));
        Ok(true)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> CacheResult<bool> {
        let expires_at = deadline(ttl);
        if let Some(entry) = live_mut(&mut *self.store.scalars.write().await, key) {
            entry.expires_at = expires_at;
            return Ok(true);
        }
        if let Some(entry) = live_mut(&mut *self.store.lists.write().await, key) {
            entry.expires_at = expires_at;
            return Ok(true);
        }
        if let Some(entry) = live_mut(&mut *self.store.hashes.write().await, key) {
            entry.expires_at = expires_at;
            return Ok(true);
        }
        Ok(false)
    }

    async fn ttl(&self, key: &str) -> CacheResult<KeyTtl> {
        let now = Instant::now();
        if let Some(entry) = live(&*self.store.scalars.read().await, key) {
            return Ok(entry.ttl(now));
        }
        if let Some(entry) = live(&*self.store.lists.read().await, key) {
            return Ok(entry.ttl(now));
        }
        if let Some(entry) = live(&*self.store.hashes.read().await, key) {
            return Ok(entry.ttl(now));
        }
        Ok(KeyTtl::Missing)
    }

    async fn keys(&self, pattern: &str) -> CacheResult<Vec<String>> {
        Ok(self.matching_keys(pattern).await)
    }

    async fn scan(
        &self,
        _cursor: u64,
        pattern: &str,
        _count: usize,
    ) -> CacheResult<(u64, Vec<String>)> {
        // The whole keyspace is local, so one pass covers it.
        Ok((0, self.matching_keys(pattern).await))
    }

    async fn publish(&self, channel: &str, message: &str) -> CacheResult<u64> {
        Ok(self.pubsub.publish(channel, message))
    }

    async fn subscribe(&self, channels: &[&str]) -> CacheResult<Subscription> {
        Ok(self.pubsub.subscribe(channels))
    }

    async fn ping(&self) -> CacheResult<()> {
        Ok(())
    }

    async fn close(&self) -> CacheResult<()> {
        let _ = self.shutdown_tx.send(true);
        self.pubsub.clear();
        info!("In-memory cache closed");
        Ok(())
    }

    fn is_available(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pulse_core::traits::cache::CacheProviderExt;

    fn make_provider() -> MemoryCacheProvider {
        MemoryCacheProvider::new(&MemoryCacheConfig::default())
    }

    #[tokio::test]
    async fn test_set_get_without_expiry() {
        let provider = make_provider();
        provider.set("x", "v", Duration::ZERO).await.unwrap();
        assert_eq!(provider.get("x").await.unwrap(), "v");
        assert_eq!(provider.ttl("x").await.unwrap().as_seconds(), -1);
        assert_eq!(provider.ttl("nope").await.unwrap().as_seconds(), -2);
    }

    #[tokio::test]
    async fn test_get_absent_is_miss() {
        let provider = make_provider();
        let err = provider.get("absent").await.unwrap_err();
        assert!(err.is_cache_miss());
        assert!(!err.is_cache_unavailable());
    }

    #[tokio::test(start_paused = true)]
    async fn test_entry_expires_after_ttl() {
        let provider = make_provider();
        provider
            .set("session", "abc", Duration::from_secs(10))
            .await
            .unwrap();

        tokio::time::advance(Duration::from_secs(9)).await;
        assert_eq!(provider.get("session").await.unwrap(), "abc");
        assert!(matches!(
            provider.ttl("session").await.unwrap(),
            KeyTtl::Expires(_)
        ));

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(provider.get("session").await.unwrap_err().is_cache_miss());
        assert!(!provider.exists("session").await.unwrap());
        assert_eq!(provider.ttl("session").await.unwrap(), KeyTtl::Missing);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_removes_expired_entries() {
        let provider = make_provider();
        provider.set("a", "1", Duration::from_secs(1)).await.unwrap();
        provider.lpush("l", &["x"]).await.unwrap();
        provider.expire("l", Duration::from_secs(1)).await.unwrap();
        provider.set("keep", "1", Duration::ZERO).await.unwrap();

        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(provider.purge_expired().await, 2);
        assert_eq!(provider.keys("*").await.unwrap(), vec!["keep".to_string()]);
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let provider = make_provider();
        provider.set("k", "v", Duration::ZERO).await.unwrap();
        provider.delete("k").await.unwrap();
        provider.delete("k").await.unwrap();
        assert!(!provider.exists("k").await.unwrap());
    }

    #[tokio::test]
    async fn test_mget_reports_missing_as_empty() {
        let provider = make_provider();
        let entries = HashMap::from([
            ("a".to_string(), "1".to_string()),
            ("c".to_string(), "3".to_string()),
        ]);
        provider.mset(&entries, Duration::ZERO).await.unwrap();

        let values = provider.mget(&["a", "b", "c"]).await.unwrap();
        assert_eq!(values, vec!["1", "", "3"]);

        provider.mdelete(&["a", "c"]).await.unwrap();
        assert_eq!(provider.mget(&["a", "c"]).await.unwrap(), vec!["", ""]);
    }

    #[tokio::test]
    async fn test_lpush_prepends_newest_first() {
        let provider = make_provider();
        provider.lpush("msg:conv:1", &["a"]).await.unwrap();
        let len = provider.lpush("msg:conv:1", &["b", "c"]).await.unwrap();
        assert_eq!(len, 3);
        assert_eq!(
            provider.lrange("msg:conv:1", 0, -1).await.unwrap(),
            vec!["c", "b", "a"]
        );
        assert_eq!(provider.lrange("msg:conv:1", -2, -1).await.unwrap(), vec!["b", "a"]);
        assert_eq!(provider.lrange("msg:conv:1", 5, 10).await.unwrap(), Vec::<String>::new());
    }

    #[tokio::test]
    async fn test_ltrim_bounds_list() {
        let provider = make_provider();
        for i in 0..50 {
            let value = i.to_string();
            provider.lpush("recent", &[value.as_str()]).await.unwrap();
            provider.ltrim("recent", 0, 19).await.unwrap();
        }
        let items = provider.lrange("recent", 0, -1).await.unwrap();
        assert_eq!(items.len(), 20);
        assert_eq!(items.first().map(String::as_str), Some("49"));
        assert_eq!(items.last().map(String::as_str), Some("30"));

        provider.ltrim("recent", 30, 40).await.unwrap();
        assert!(!provider.exists("recent").await.unwrap());
    }

    #[tokio::test]
    async fn test_hash_operations() {
        let provider = make_provider();
        let fields = HashMap::from([
            ("online".to_string(), "1".to_string()),
            ("last_seen".to_string(), "1700000000".to_string()),
        ]);
        provider.hset("presence:7", &fields).await.unwrap();

        assert_eq!(provider.hget("presence:7", "online").await.unwrap(), "1");
        assert!(provider
            .hget("presence:7", "missing")
            .await
            .unwrap_err()
            .is_cache_miss());
        assert_eq!(provider.hgetall("presence:7").await.unwrap(), fields);

        assert_eq!(provider.hdel("presence:7", &["online", "nope"]).await.unwrap(), 1);
        assert_eq!(provider.hincrby("unread:7", "conv:1", 3).await.unwrap(), 3);
        assert_eq!(provider.hincrby("unread:7", "conv:1", -1).await.unwrap(), 2);
        assert!(provider.hgetall("nothing").await.unwrap().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_hincrby_is_atomic() {
        let provider = Arc::new(make_provider());
        let mut handles = Vec::new();
        for _ in 0..200 {
            let provider = Arc::clone(&provider);
            handles.push(tokio::spawn(async move {
                provider.hincrby("counts", "field", 1).await.unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(provider.hget("counts", "field").await.unwrap(), "200");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_set_nx_has_one_winner() {
        let provider = Arc::new(make_provider());
        let mut handles = Vec::new();
        for i in 0..64 {
            let provider = Arc::clone(&provider);
            handles.push(tokio::spawn(async move {
                provider
                    .set_nx("lock", &i.to_string(), Duration::from_secs(30))
                    .await
                    .unwrap()
            }));
        }
        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }

    #[tokio::test]
    async fn test_key_holds_one_kind_of_value() {
        let provider = make_provider();
        provider.lpush("lock", &["holder"]).await.unwrap();
        assert!(provider.exists("lock").await.unwrap());
        assert!(!provider.set_nx("lock", "me", Duration::ZERO).await.unwrap());

        let fields = HashMap::from([("f".to_string(), "1".to_string())]);
        let err = provider.hset("lock", &fields).await.unwrap_err();
        assert!(err.to_string().contains("WRONGTYPE"));
        assert!(provider.hincrby("lock", "f", 1).await.is_err());
        assert!(provider.incr("lock").await.is_err());
        assert!(provider.hgetall("lock").await.unwrap().is_empty());

        // A plain SET overwrites whatever was there.
        provider.set("lock", "me", Duration::ZERO).await.unwrap();
        assert_eq!(provider.get("lock").await.unwrap(), "me");
        assert!(provider.lrange("lock", 0, -1).await.unwrap().is_empty());
        assert!(provider.lpush("lock", &["again"]).await.is_err());
        assert_eq!(provider.keys("lock").await.unwrap(), vec!["lock"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_set_nx_after_other_kind_expires() {
        let provider = make_provider();
        provider.hincrby("lock", "n", 1).await.unwrap();
        provider.expire("lock", Duration::from_secs(1)).await.unwrap();
        assert!(!provider.set_nx("lock", "me", Duration::ZERO).await.unwrap());

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(provider.set_nx("lock", "me", Duration::ZERO).await.unwrap());
        assert!(provider.hgetall("lock").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_lpush_without_values_is_rejected() {
        let provider = make_provider();
        assert!(provider.lpush("empty", &[]).await.is_err());
        assert!(!provider.exists("empty").await.unwrap());
    }

    #[tokio::test]
    async fn test_incr_decr() {
        let provider = make_provider();
        assert_eq!(provider.incr("counter").await.unwrap(), 1);
        assert_eq!(provider.decr("counter").await.unwrap(), 0);
        assert_eq!(provider.decr("fresh").await.unwrap(), -1);

        provider.set("text", "abc", Duration::ZERO).await.unwrap();
        let err = provider.incr("text").await.unwrap_err();
        assert!(!err.is_cache_miss());
    }

    #[tokio::test(start_paused = true)]
    async fn test_incr_preserves_expiry() {
        let provider = make_provider();
        provider.set("hits", "5", Duration::from_secs(10)).await.unwrap();
        assert_eq!(provider.incr("hits").await.unwrap(), 6);
        assert!(matches!(provider.ttl("hits").await.unwrap(), KeyTtl::Expires(_)));
    }

    #[tokio::test]
    async fn test_keys_and_delete_pattern() {
        let provider = make_provider();
        provider.set("feed:1:page:0", "a", Duration::ZERO).await.unwrap();
        provider.set("feed:1:page:1", "b", Duration::ZERO).await.unwrap();
        provider.set("feed:2:page:0", "c", Duration::ZERO).await.unwrap();

        let keys = provider.keys("feed:1:*").await.unwrap();
        assert_eq!(keys, vec!["feed:1:page:0", "feed:1:page:1"]);

        let (cursor, scanned) = provider.scan(0, "feed:*", 10).await.unwrap();
        assert_eq!(cursor, 0);
        assert_eq!(scanned.len(), 3);

        assert_eq!(provider.delete_pattern("feed:1:*").await.unwrap(), 2);
        assert_eq!(provider.keys("feed:*").await.unwrap(), vec!["feed:2:page:0"]);
    }

    #[tokio::test]
    async fn test_json_roundtrip() {
        let provider = make_provider();
        let data = serde_json::json!({"name": "test", "count": 42});
        provider
            .set_json("json_key", &data, Duration::from_secs(60))
            .await
            .unwrap();
        let result: Option<serde_json::Value> = provider.get_json("json_key").await.unwrap();
        assert_eq!(result, Some(data));
        let absent: Option<serde_json::Value> = provider.get_json("nope").await.unwrap();
        assert!(absent.is_none());
    }

    #[tokio::test]
    async fn test_pubsub_through_provider() {
        let provider = make_provider();
        let mut sub = provider.subscribe(&["chat:1"]).await.unwrap();
        assert_eq!(provider.publish("chat:1", "hello").await.unwrap(), 1);
        let msg = sub.recv().await.unwrap();
        assert_eq!(msg.channel, "chat:1");
        assert_eq!(msg.payload, "hello");

        sub.close();
        assert_eq!(provider.publish("chat:1", "gone").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_health() {
        let provider = make_provider();
        assert!(provider.is_available());
        provider.ping().await.unwrap();
        provider.close().await.unwrap();
    }
}
