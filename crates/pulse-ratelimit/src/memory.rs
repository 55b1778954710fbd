//! In-memory token bucket rate limiter with a forgiveness allowance.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::sync::{Mutex, watch};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info};

use pulse_core::traits::rate_limiter::{RateLimitDecision, RateLimiter};

/// Per-key bucket.
#[derive(Debug)]
struct BucketState {
    /// Tokens left, within `[0, limit]`.
    tokens: u64,
    /// Start of the current refill period.
    last_refill: Instant,
    /// Forgiveness consumed since the last refill.
    forgiveness_used: u64,
    /// Capacity.
    limit: u64,
    /// Time to refill from empty to full.
    window: Duration,
}

impl BucketState {
    fn new(limit: u64, window: Duration, now: Instant) -> Self {
        Self {
            tokens: limit,
            last_refill: now,
            forgiveness_used: 0,
            limit,
            window,
        }
    }

    /// Time to earn one token.
    fn refill_interval(&self) -> Duration {
        let nanos = self.window.as_nanos() / u128::from(self.limit.max(1));
        Duration::from_nanos(nanos.clamp(1, u64::MAX as u128) as u64)
    }

    /// Adopt the caller's limit and window if they changed.
    fn reconfigure(&mut self, limit: u64, window: Duration) {
        if self.limit != limit || self.window != window {
            self.limit = limit;
            self.window = window;
            self.tokens = self.tokens.min(limit);
        }
    }

    /// Credit the whole tokens earned since `last_refill`.
    fn refill(&mut self, now: Instant) {
        let interval = self.refill_interval();
        let elapsed = now.saturating_duration_since(self.last_refill);
        let earned = (elapsed.as_nanos() / interval.as_nanos()).min(u128::from(u64::MAX)) as u64;
        if earned == 0 {
            return;
        }

        let added = earned.min(self.limit - self.tokens);
        self.tokens += added;
        if self.tokens == self.limit {
            self.last_refill = now;
        } else {
            self.last_refill += scale(interval, earned);
        }
        if added > 0 {
            self.forgiveness_used = 0;
        }
    }

    /// When the next token is earned.
    fn next_token_at(&self) -> Instant {
        self.last_refill + self.refill_interval()
    }

    /// When the bucket is full again.
    fn full_at(&self) -> Instant {
        self.last_refill + scale(self.refill_interval(), self.limit - self.tokens)
    }
}

fn scale(interval: Duration, n: u64) -> Duration {
    let nanos = interval.as_nanos().saturating_mul(u128::from(n));
    Duration::from_nanos(nanos.min(u64::MAX as u128) as u64)
}

/// Translate a monotonic deadline into wall-clock time.
fn wall_clock(at: Instant, now: Instant) -> DateTime<Utc> {
    let ahead = at.saturating_duration_since(now);
    Utc::now() + chrono::Duration::from_std(ahead).unwrap_or_else(|_| chrono::Duration::zero())
}

/// Token bucket limiter keyed by arbitrary strings.
///
/// Each key has its own lock, so unrelated keys never contend. A background
/// sweep drops buckets idle for more than twice their window.
#[derive(Debug)]
pub struct MemoryRateLimiter {
    /// Key → bucket.
    buckets: Arc<DashMap<String, Arc<Mutex<BucketState>>>>,
    /// Stops the eviction sweep.
    shutdown_tx: watch::Sender<bool>,
}

impl MemoryRateLimiter {
    /// Create a limiter and start its eviction sweep.
    ///
    /// Must be called inside a Tokio runtime.
    pub fn new(cleanup_interval: Duration) -> Self {
        let buckets = Arc::new(DashMap::new());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let interval = cleanup_interval.max(Duration::from_secs(1));
        tokio::spawn(run_eviction(buckets.clone(), interval, shutdown_rx));
        info!(interval_secs = interval.as_secs(), "In-memory rate limiter started");

        Self {
            buckets,
            shutdown_tx,
        }
    }

    /// Drop buckets idle for more than twice their window.
    pub fn evict_stale(&self) -> usize {
        evict(&self.buckets)
    }

    /// Number of tracked keys.
    pub fn tracked_keys(&self) -> usize {
        self.buckets.len()
    }

    fn bucket(&self, key: &str, limit: u64, window: Duration) -> Arc<Mutex<BucketState>> {
        self.buckets
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(BucketState::new(limit, window, Instant::now()))))
            .clone()
    }

    async fn decide(
        &self,
        key: &str,
        limit: u64,
        window: Duration,
        forgiveness: u64,
    ) -> RateLimitDecision {
        if limit == 0 {
            let now = Instant::now();
            return RateLimitDecision::denied(0, wall_clock(now + window, now));
        }

        let bucket = self.bucket(key, limit, window);
        let mut state = bucket.lock().await;
        let now = Instant::now();
        state.reconfigure(limit, window);
        state.refill(now);

        if state.tokens > 0 {
            state.tokens -= 1;
            return RateLimitDecision::allowed(limit, state.tokens, wall_clock(state.full_at(), now));
        }

        let reset_at = wall_clock(state.next_token_at(), now);
        if state.forgiveness_used < forgiveness {
            state.forgiveness_used += 1;
            debug!(key, used = state.forgiveness_used, cap = forgiveness, "Request forgiven");
            return RateLimitDecision::allowed(limit, 0, reset_at);
        }

        RateLimitDecision::denied(limit, reset_at)
    }
}

fn evict(buckets: &DashMap<String, Arc<Mutex<BucketState>>>) -> usize {
    let now = Instant::now();
    let before = buckets.len();
    buckets.retain(|_, bucket| match bucket.try_lock() {
        Ok(state) => now.saturating_duration_since(state.last_refill) <= state.window * 2,
        // In use right now, so not stale.
        Err(_) => true,
    });
    before.saturating_sub(buckets.len())
}

async fn run_eviction(
    buckets: Arc<DashMap<String, Arc<Mutex<BucketState>>>>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let evicted = evict(&buckets);
                if evicted > 0 {
                    debug!(count = evicted, "Evicted stale rate limit buckets");
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }
    debug!("Rate limiter eviction stopped");
}

#[async_trait]
impl RateLimiter for MemoryRateLimiter {
    async fn allow(&self, key: &str, limit: u64, window: Duration) -> RateLimitDecision {
        self.decide(key, limit, window, 0).await
    }

    async fn allow_with_forgiveness(
        &self,
        key: &str,
        limit: u64,
        window: Duration,
        forgiveness: u64,
    ) -> RateLimitDecision {
        self.decide(key, limit, window, forgiveness).await
    }

    async fn get_remaining(&self, key: &str, limit: u64, window: Duration) -> u64 {
        let Some(bucket) = self.buckets.get(key).map(|b| b.clone()) else {
            return limit;
        };
        let mut state = bucket.lock().await;
        state.reconfigure(limit, window);
        state.refill(Instant::now());
        state.tokens
    }

    async fn reset(&self, key: &str) {
        self.buckets.remove(key);
    }

    fn is_distributed(&self) -> bool {
        false
    }

    async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }
}
