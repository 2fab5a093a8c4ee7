//! Typed facade over a Redis-compatible shared key-value + pub/sub store.
//!
//! Every operation carries an explicit deadline; a timed-out or failed
//! call surfaces as [`CoreError::StoreUnavailable`] and it is up to the
//! caller whether that aborts the session or is absorbed.

use std::future::Future;
use std::time::Duration;

use futures::Stream;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;

use crate::error::{CoreError, Result};

/// Default per-operation deadline.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(2);

/// A connected handle to the shared store.
#[derive(Clone)]
pub struct Store {
    client: redis::Client,
    conn: ConnectionManager,
    timeout: Duration,
}

impl Store {
    /// Connect to `url` (e.g. `redis://127.0.0.1:6379/0`), using `timeout`
    /// as the deadline for every subsequent operation.
    pub async fn connect(url: &str, timeout: Duration) -> Result<Self> {
        let client = redis::Client::open(url).map_err(|e| CoreError::StoreUnavailable(e.to_string()))?;
        let conn = client
            .get_connection_manager()
            .await
            .map_err(|e| CoreError::StoreUnavailable(e.to_string()))?;
        Ok(Self { client, conn, timeout })
    }

    async fn deadline<F, T>(&self, fut: F) -> Result<T>
    where
        F: Future<Output = redis::RedisResult<T>>,
    {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(Ok(v)) => Ok(v),
            Ok(Err(e)) => Err(CoreError::StoreUnavailable(e.to_string())),
            Err(_) => Err(CoreError::StoreUnavailable("operation timed out".into())),
        }
    }

    /// `SET key val EX ttl`.
    pub async fn set(&self, key: &str, val: &[u8], ttl: Duration) -> Result<()> {
        let mut conn = self.conn.clone();
        self.deadline(conn.set_ex(key, val, ttl.as_secs())).await
    }

    /// `GET key`.
    pub async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let mut conn = self.conn.clone();
        self.deadline(conn.get(key)).await
    }

    /// `DEL key`.
    pub async fn del(&self, key: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        self.deadline(conn.del(key)).await
    }

    /// `EXPIRE key ttl`, refreshing TTL on an existing key.
    pub async fn expire(&self, key: &str, ttl: Duration) -> Result<()> {
        let mut conn = self.conn.clone();
        self.deadline(conn.expire(key, ttl.as_secs() as i64)).await
    }

    /// `RPUSH key val`.
    pub async fn rpush(&self, key: &str, val: &[u8]) -> Result<()> {
        let mut conn = self.conn.clone();
        self.deadline(conn.rpush(key, val)).await
    }

    /// `LRANGE key 0 -1`.
    pub async fn lrange(&self, key: &str, start: isize, stop: isize) -> Result<Vec<Vec<u8>>> {
        let mut conn = self.conn.clone();
        self.deadline(conn.lrange(key, start, stop)).await
    }

    /// `LREM key 0 val`.
    pub async fn lrem(&self, key: &str, val: &[u8]) -> Result<()> {
        let mut conn = self.conn.clone();
        self.deadline(conn.lrem(key, 0, val)).await
    }

    /// `SADD key member`.
    pub async fn sadd(&self, key: &str, member: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        self.deadline(conn.sadd(key, member)).await
    }

    /// `SREM key member`.
    pub async fn srem(&self, key: &str, member: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        self.deadline(conn.srem(key, member)).await
    }

    /// `SISMEMBER key member`.
    pub async fn sismember(&self, key: &str, member: &str) -> Result<bool> {
        let mut conn = self.conn.clone();
        self.deadline(conn.sismember(key, member)).await
    }

    /// `SMEMBERS key`.
    pub async fn smembers(&self, key: &str) -> Result<Vec<String>> {
        let mut conn = self.conn.clone();
        self.deadline(conn.smembers(key)).await
    }

    /// `PUBLISH channel payload`.
    pub async fn publish(&self, channel: &str, payload: &[u8]) -> Result<()> {
        let mut conn = self.conn.clone();
        self.deadline(conn.publish(channel, payload)).await
    }

    /// Subscribe to `channel`, returning a stream of raw message payloads.
    ///
    /// Pub/sub needs a dedicated connection outside the shared
    /// [`ConnectionManager`], so this opens a fresh one from the client.
    pub async fn subscribe(&self, channel: &str) -> Result<impl Stream<Item = Vec<u8>>> {
        let conn = self
            .client
            .get_async_connection()
            .await
            .map_err(|e| CoreError::StoreUnavailable(e.to_string()))?;
        let mut pubsub = conn.into_pubsub();
        pubsub
            .subscribe(channel)
            .await
            .map_err(|e| CoreError::StoreUnavailable(e.to_string()))?;
        Ok(futures::StreamExt::map(pubsub.into_on_message(), |msg| {
            msg.get_payload_bytes().to_vec()
        }))
    }
}
