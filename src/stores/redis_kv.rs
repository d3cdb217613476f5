//! Redis-backed fast-KV store (feature `redis-store`).
//!
//! One multiplexed connection manager per store handle; every operation is
//! wrapped in the configured socket timeout so a stalled backend surfaces as
//! a storage error for the circuit breaker to count.

use super::{FastKvStore, KvOp};
use crate::types::{Error, Result, StoreConfig};
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::collections::BTreeMap;
use std::time::Duration;

#[derive(Clone)]
pub struct RedisKvStore {
    manager: ConnectionManager,
    op_timeout: Duration,
}

impl std::fmt::Debug for RedisKvStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisKvStore")
            .field("op_timeout", &self.op_timeout)
            .finish_non_exhaustive()
    }
}

impl RedisKvStore {
    /// Connect using the configured host/port/db.
    pub async fn connect(config: &StoreConfig) -> Result<Self> {
        let url = format!("redis://{}:{}/{}", config.host, config.port, config.db);
        let client = redis::Client::open(url)
            .map_err(|e| Error::storage(format!("redis client: {e}")))?;
        let manager = client
            .get_connection_manager()
            .await
            .map_err(|e| Error::storage(format!("redis connect: {e}")))?;
        tracing::info!(
            host = %config.host,
            port = config.port,
            db = config.db,
            "redis_kv_connected"
        );
        Ok(Self {
            manager,
            op_timeout: config.socket_timeout,
        })
    }

    async fn timed<T>(
        &self,
        fut: impl std::future::Future<Output = redis::RedisResult<T>>,
    ) -> Result<T> {
        tokio::time::timeout(self.op_timeout, fut)
            .await
            .map_err(|_| Error::timeout("redis operation deadline exceeded"))?
            .map_err(|e| Error::storage(format!("redis: {e}")))
    }
}

#[async_trait]
impl FastKvStore for RedisKvStore {
    async fn list_push(&self, key: &str, value: String) -> Result<()> {
        let mut conn = self.manager.clone();
        self.timed(async move { conn.rpush::<_, _, ()>(key, value).await })
            .await
    }

    async fn list_range(&self, key: &str, start: i64, stop: i64) -> Result<Vec<String>> {
        let mut conn = self.manager.clone();
        self.timed(async move { conn.lrange(key, start as isize, stop as isize).await })
            .await
    }

    async fn list_len(&self, key: &str) -> Result<usize> {
        let mut conn = self.manager.clone();
        self.timed(async move { conn.llen(key).await }).await
    }

    async fn list_pop_front(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.manager.clone();
        self.timed(async move { conn.lpop(key, None).await }).await
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.manager.clone();
        self.timed(async move { conn.get(key).await }).await
    }

    async fn set(&self, key: &str, value: String) -> Result<()> {
        let mut conn = self.manager.clone();
        self.timed(async move { conn.set::<_, _, ()>(key, value).await })
            .await
    }

    async fn hash_set(&self, key: &str, field: &str, value: String) -> Result<()> {
        let mut conn = self.manager.clone();
        self.timed(async move { conn.hset::<_, _, _, ()>(key, field, value).await })
            .await
    }

    async fn hash_get_all(&self, key: &str) -> Result<BTreeMap<String, String>> {
        let mut conn = self.manager.clone();
        self.timed(async move { conn.hgetall(key).await }).await
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<()> {
        let mut conn = self.manager.clone();
        let secs = ttl.as_secs() as i64;
        self.timed(async move { conn.expire::<_, ()>(key, secs).await })
            .await
    }

    async fn ttl(&self, key: &str) -> Result<Option<Duration>> {
        let mut conn = self.manager.clone();
        let remaining: i64 = self.timed(async move { conn.ttl(key).await }).await?;
        Ok(if remaining >= 0 {
            Some(Duration::from_secs(remaining as u64))
        } else {
            None
        })
    }

    async fn delete(&self, keys: &[&str]) -> Result<()> {
        let mut conn = self.manager.clone();
        let keys: Vec<String> = keys.iter().map(|k| k.to_string()).collect();
        self.timed(async move { conn.del::<_, ()>(keys).await }).await
    }

    async fn batch(&self, ops: Vec<KvOp>) -> Result<()> {
        let mut pipe = redis::pipe();
        pipe.atomic();
        for op in ops {
            match op {
                KvOp::ListPush { key, value } => {
                    pipe.rpush(key, value).ignore();
                }
                KvOp::Set { key, value } => {
                    pipe.set(key, value).ignore();
                }
                KvOp::Expire { key, ttl } => {
                    pipe.expire(key, ttl.as_secs() as i64).ignore();
                }
                KvOp::Delete { key } => {
                    pipe.del(key).ignore();
                }
            }
        }
        let mut conn = self.manager.clone();
        self.timed(async move { pipe.query_async::<()>(&mut conn).await })
            .await
    }

    async fn ping(&self) -> Result<()> {
        let mut conn = self.manager.clone();
        self.timed(async move {
            redis::cmd("PING").query_async::<String>(&mut conn).await
        })
        .await
        .map(|_| ())
    }
}
