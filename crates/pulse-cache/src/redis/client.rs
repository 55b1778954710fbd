//! Redis connection management.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use redis::Client;
use redis::aio::ConnectionManager;
use tokio::sync::RwLock;
use tracing::{info, warn};

use pulse_core::config::cache::RedisCacheConfig;
use pulse_core::error::{AppError, CacheError, ErrorKind};
use pulse_core::result::{AppResult, CacheResult};

/// Redis client wrapper with connection management and availability tracking.
///
/// Construction never fails because the server is down: the client starts
/// out unavailable and every operation returns
/// [`CacheError::Unavailable`] without touching the network until a
/// successful [`RedisClient::ping`] flips it back.
#[derive(Debug, Clone)]
pub struct RedisClient {
    /// Redis client used to open connections and pub/sub streams.
    client: Client,
    /// Redis connection manager (multiplexed, reconnecting), once connected.
    conn: Arc<RwLock<Option<ConnectionManager>>>,
    /// Whether the server is currently considered reachable.
    available: Arc<AtomicBool>,
    /// Key prefix for all keys.
    key_prefix: String,
    /// Deadline for connection attempts.
    connect_timeout: Duration,
    /// Deadline for each operation.
    operation_timeout: Duration,
}

impl RedisClient {
    /// Create a new Redis client from configuration and probe connectivity.
    ///
    /// Only a malformed URL is an error; an unreachable server yields an
    /// unavailable client.
    pub async fn connect(config: &RedisCacheConfig) -> AppResult<Self> {
        let url = connection_url(config);
        info!(url = %mask_redis_url(&url), "Connecting to Redis");

        let client = Client::open(url.as_str()).map_err(|e| {
            AppError::with_source(ErrorKind::Configuration, "Failed to create Redis client", e)
        })?;

        let this = Self {
            client,
            conn: Arc::new(RwLock::new(None)),
            available: Arc::new(AtomicBool::new(false)),
            key_prefix: config.key_prefix.clone(),
            connect_timeout: Duration::from_millis(config.connect_timeout_ms.max(1)),
            operation_timeout: Duration::from_millis(config.operation_timeout_ms.max(1)),
        };

        match this.ping().await {
            Ok(()) => info!("Successfully connected to Redis"),
            Err(e) => warn!(error = %e, "Redis is unreachable, starting unavailable"),
        }
        Ok(this)
    }

    /// Whether the server is currently considered reachable.
    pub fn is_available(&self) -> bool {
        self.available.load(Ordering::Acquire)
    }

    /// Probe the server, (re)connecting if needed, and update availability.
    pub async fn ping(&self) -> CacheResult<()> {
        let result = self.probe().await;
        self.set_available(result.is_ok());
        result
    }

    async fn probe(&self) -> CacheResult<()> {
        let mut conn = match self.conn.read().await.clone() {
            Some(conn) => conn,
            None => self.establish().await?,
        };

        let pong: String = tokio::time::timeout(
            self.operation_timeout,
            redis::cmd("PING").query_async(&mut conn),
        )
        .await
        .map_err(|_| CacheError::unavailable("PING timed out"))?
        .map_err(|e| CacheError::unavailable(format!("PING failed: {e}")))?;

        if pong != "PONG" {
            return Err(CacheError::backend(format!("Unexpected PING reply: {pong}")));
        }
        Ok(())
    }

    async fn establish(&self) -> CacheResult<ConnectionManager> {
        let conn = tokio::time::timeout(
            self.connect_timeout,
            ConnectionManager::new(self.client.clone()),
        )
        .await
        .map_err(|_| CacheError::unavailable("Redis connection timed out"))?
        .map_err(|e| CacheError::unavailable(format!("Failed to connect to Redis: {e}")))?;

        *self.conn.write().await = Some(conn.clone());
        Ok(conn)
    }

    fn set_available(&self, available: bool) {
        let was = self.available.swap(available, Ordering::AcqRel);
        if was != available {
            if available {
                info!("Redis is available");
            } else {
                warn!("Redis marked unavailable");
            }
        }
    }

    /// Mark the client unavailable and drop its connection.
    pub async fn disconnect(&self) {
        self.set_available(false);
        self.conn.write().await.take();
    }

    /// Get a connection handle, failing fast when unavailable.
    pub async fn connection(&self) -> CacheResult<ConnectionManager> {
        if !self.is_available() {
            return Err(CacheError::unavailable("Redis is not available"));
        }
        self.conn
            .read()
            .await
            .clone()
            .ok_or_else(|| CacheError::unavailable("Redis is not connected"))
    }

    /// Run one operation on a connection under the operation deadline.
    ///
    /// A timeout or connection-level failure marks the client unavailable.
    pub async fn execute<T, F, Fut>(&self, op: F) -> CacheResult<T>
    where
        F: FnOnce(ConnectionManager) -> Fut,
        Fut: Future<Output = redis::RedisResult<T>>,
    {
        let conn = self.connection().await?;
        match tokio::time::timeout(self.operation_timeout, op(conn)).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(self.map_err(e)),
            Err(_) => {
                self.set_available(false);
                Err(CacheError::unavailable("Redis operation timed out"))
            }
        }
    }

    /// Map a Redis error, separating connectivity problems from rejections.
    pub fn map_err(&self, e: redis::RedisError) -> CacheError {
        if e.is_io_error() || e.is_connection_refusal() || e.is_connection_dropped() || e.is_timeout()
        {
            self.set_available(false);
            CacheError::unavailable(format!("Redis connection error: {e}"))
        } else {
            CacheError::backend_with_source(format!("Redis error: {e}"), e)
        }
    }

    /// The underlying client, for opening pub/sub streams.
    pub fn raw(&self) -> &Client {
        &self.client
    }

    /// Deadline for connection attempts.
    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }

    /// Build a full key with the configured prefix.
    pub fn prefixed_key(&self, key: &str) -> String {
        format!("{}{key}", self.key_prefix)
    }

    /// Remove the configured prefix from a key returned by the server.
    pub fn strip_prefix(&self, key: &str) -> String {
        key.strip_prefix(self.key_prefix.as_str())
            .unwrap_or(key)
            .to_string()
    }

    /// Return the key prefix.
    pub fn prefix(&self) -> &str {
        &self.key_prefix
    }
}

/// Apply the TLS settings to the configured URL.
fn connection_url(config: &RedisCacheConfig) -> String {
    let mut url = config.url.clone();
    if config.tls {
        if let Some(rest) = url.strip_prefix("redis://") {
            url = format!("rediss://{rest}");
        }
    }
    if config.tls_insecure && url.starts_with("rediss://") && !url.ends_with("#insecure") {
        url.push_str("#insecure");
    }
    url
}

/// Mask password in Redis URL for safe logging.
fn mask_redis_url(url: &str) -> String {
    if let Some(at_pos) = url.find('@') {
        if let Some(colon_pos) = url[..at_pos].rfind(':') {
            let scheme_end = url.find("://").map(|p| p + 3).unwrap_or(0);
            if colon_pos > scheme_end {
                return format!("{}:****@{}", &url[..colon_pos], &url[at_pos + 1..]);
            }
        }
    }
    url.to_string()
}
