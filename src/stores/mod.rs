//! Storage abstractions.
//!
//! Concrete backends (Redis, SQL, object storage, the shopping API) sit
//! behind narrow traits so the engine wires to whatever the deployment
//! provides; tests use the in-memory implementations in this module.
//! The Redis-backed fast-KV lives in `redis_kv` behind the `redis-store`
//! feature.

use crate::types::{Error, Result};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Mutex;
use std::time::{Duration, Instant};

#[cfg(feature = "redis-store")]
pub mod redis_kv;

use crate::contract::Product;

// =============================================================================
// Fast key-value store
// =============================================================================

/// One operation in an atomic batch (summary writes are list-append +
/// scalar-set + expire in a single round trip).
#[derive(Debug, Clone)]
pub enum KvOp {
    ListPush { key: String, value: String },
    Set { key: String, value: String },
    Expire { key: String, ttl: Duration },
    Delete { key: String },
}

/// Ephemeral key-value store with lists, hashes and TTLs.
#[async_trait]
pub trait FastKvStore: Send + Sync + fmt::Debug {
    async fn list_push(&self, key: &str, value: String) -> Result<()>;
    /// Inclusive range with Redis semantics: negative indices count from the
    /// tail, `-1` is the last element.
    async fn list_range(&self, key: &str, start: i64, stop: i64) -> Result<Vec<String>>;
    async fn list_len(&self, key: &str) -> Result<usize>;
    async fn list_pop_front(&self, key: &str) -> Result<Option<String>>;
    async fn get(&self, key: &str) -> Result<Option<String>>;
    async fn set(&self, key: &str, value: String) -> Result<()>;
    async fn hash_set(&self, key: &str, field: &str, value: String) -> Result<()>;
    async fn hash_get_all(&self, key: &str) -> Result<BTreeMap<String, String>>;
    async fn expire(&self, key: &str, ttl: Duration) -> Result<()>;
    async fn ttl(&self, key: &str) -> Result<Option<Duration>>;
    async fn delete(&self, keys: &[&str]) -> Result<()>;
    async fn batch(&self, ops: Vec<KvOp>) -> Result<()>;
    async fn ping(&self) -> Result<()>;
}

#[derive(Debug, Clone)]
enum KvValue {
    Scalar(String),
    List(Vec<String>),
    Hash(BTreeMap<String, String>),
}

#[derive(Debug, Clone)]
struct KvEntry {
    value: KvValue,
    expires_at: Option<Instant>,
}

impl KvEntry {
    fn expired(&self) -> bool {
        self.expires_at
            .map(|deadline| Instant::now() >= deadline)
            .unwrap_or(false)
    }
}

/// In-memory fast-KV with TTL eviction on read. The default backend for
/// tests and single-process deployments.
#[derive(Debug, Default)]
pub struct MemoryKvStore {
    entries: Mutex<BTreeMap<String, KvEntry>>,
}

impl MemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_entries<T>(&self, f: impl FnOnce(&mut BTreeMap<String, KvEntry>) -> T) -> Result<T> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| Error::storage("kv store lock poisoned"))?;
        entries.retain(|_, entry| !entry.expired());
        Ok(f(&mut entries))
    }

    fn apply_op(entries: &mut BTreeMap<String, KvEntry>, op: KvOp) {
        match op {
            KvOp::ListPush { key, value } => {
                let entry = entries.entry(key).or_insert(KvEntry {
                    value: KvValue::List(Vec::new()),
                    expires_at: None,
                });
                if let KvValue::List(list) = &mut entry.value {
                    list.push(value);
                } else {
                    entry.value = KvValue::List(vec![value]);
                }
            }
            KvOp::Set { key, value } => {
                let expires_at = entries.get(&key).and_then(|e| e.expires_at);
                entries.insert(
                    key,
                    KvEntry {
                        value: KvValue::Scalar(value),
                        expires_at,
                    },
                );
            }
            KvOp::Expire { key, ttl } => {
                if let Some(entry) = entries.get_mut(&key) {
                    entry.expires_at = Some(Instant::now() + ttl);
                }
            }
            KvOp::Delete { key } => {
                entries.remove(&key);
            }
        }
    }
}

fn resolve_range(len: usize, start: i64, stop: i64) -> Option<(usize, usize)> {
    if len == 0 {
        return None;
    }
    let len = len as i64;
    let clamp = |idx: i64| -> i64 {
        let idx = if idx < 0 { len + idx } else { idx };
        idx.clamp(0, len - 1)
    };
    let start = clamp(start);
    let stop = clamp(stop);
    if start > stop {
        return None;
    }
    Some((start as usize, stop as usize))
}

#[async_trait]
impl FastKvStore for MemoryKvStore {
    async fn list_push(&self, key: &str, value: String) -> Result<()> {
        self.with_entries(|entries| {
            Self::apply_op(
                entries,
                KvOp::ListPush {
                    key: key.to_string(),
                    value,
                },
            );
        })
    }

    async fn list_range(&self, key: &str, start: i64, stop: i64) -> Result<Vec<String>> {
        self.with_entries(|entries| match entries.get(key) {
            Some(KvEntry {
                value: KvValue::List(list),
                ..
            }) => match resolve_range(list.len(), start, stop) {
                Some((from, to)) => list[from..=to].to_vec(),
                None => Vec::new(),
            },
            _ => Vec::new(),
        })
    }

    async fn list_len(&self, key: &str) -> Result<usize> {
        self.with_entries(|entries| match entries.get(key) {
            Some(KvEntry {
                value: KvValue::List(list),
                ..
            }) => list.len(),
            _ => 0,
        })
    }

    async fn list_pop_front(&self, key: &str) -> Result<Option<String>> {
        self.with_entries(|entries| match entries.get_mut(key) {
            Some(KvEntry {
                value: KvValue::List(list),
                ..
            }) if !list.is_empty() => Some(list.remove(0)),
            _ => None,
        })
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        self.with_entries(|entries| match entries.get(key) {
            Some(KvEntry {
                value: KvValue::Scalar(value),
                ..
            }) => Some(value.clone()),
            _ => None,
        })
    }

    async fn set(&self, key: &str, value: String) -> Result<()> {
        self.with_entries(|entries| {
            Self::apply_op(
                entries,
                KvOp::Set {
                    key: key.to_string(),
                    value,
                },
            );
        })
    }

    async fn hash_set(&self, key: &str, field: &str, value: String) -> Result<()> {
        self.with_entries(|entries| {
            let entry = entries.entry(key.to_string()).or_insert(KvEntry {
                value: KvValue::Hash(BTreeMap::new()),
                expires_at: None,
            });
            if let KvValue::Hash(hash) = &mut entry.value {
                hash.insert(field.to_string(), value);
            } else {
                entry.value = KvValue::Hash(BTreeMap::from([(field.to_string(), value)]));
            }
        })
    }

    async fn hash_get_all(&self, key: &str) -> Result<BTreeMap<String, String>> {
        self.with_entries(|entries| match entries.get(key) {
            Some(KvEntry {
                value: KvValue::Hash(hash),
                ..
            }) => hash.clone(),
            _ => BTreeMap::new(),
        })
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<()> {
        self.with_entries(|entries| {
            Self::apply_op(
                entries,
                KvOp::Expire {
                    key: key.to_string(),
                    ttl,
                },
            );
        })
    }

    async fn ttl(&self, key: &str) -> Result<Option<Duration>> {
        self.with_entries(|entries| {
            entries.get(key).and_then(|entry| {
                entry
                    .expires_at
                    .map(|deadline| deadline.saturating_duration_since(Instant::now()))
            })
        })
    }

    async fn delete(&self, keys: &[&str]) -> Result<()> {
        self.with_entries(|entries| {
            for key in keys {
                entries.remove(*key);
            }
        })
    }

    async fn batch(&self, ops: Vec<KvOp>) -> Result<()> {
        self.with_entries(|entries| {
            for op in ops {
                Self::apply_op(entries, op);
            }
        })
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}

// =============================================================================
// Circuit-breaker decorator
// =============================================================================

/// Fast-KV client guarded by a circuit breaker: an OPEN breaker rejects
/// without touching the backend, and breaker state transitions feed the
/// health monitor.
#[derive(Debug)]
pub struct BreakerKvStore {
    inner: std::sync::Arc<dyn FastKvStore>,
    breaker: std::sync::Arc<crate::resilience::CircuitBreaker>,
}

impl BreakerKvStore {
    pub fn new(
        inner: std::sync::Arc<dyn FastKvStore>,
        breaker: std::sync::Arc<crate::resilience::CircuitBreaker>,
    ) -> Self {
        Self { inner, breaker }
    }

    pub fn breaker(&self) -> &crate::resilience::CircuitBreaker {
        &self.breaker
    }
}

#[async_trait]
impl FastKvStore for BreakerKvStore {
    async fn list_push(&self, key: &str, value: String) -> Result<()> {
        self.breaker.call(|| self.inner.list_push(key, value)).await
    }

    async fn list_range(&self, key: &str, start: i64, stop: i64) -> Result<Vec<String>> {
        self.breaker
            .call(|| self.inner.list_range(key, start, stop))
            .await
    }

    async fn list_len(&self, key: &str) -> Result<usize> {
        self.breaker.call(|| self.inner.list_len(key)).await
    }

    async fn list_pop_front(&self, key: &str) -> Result<Option<String>> {
        self.breaker.call(|| self.inner.list_pop_front(key)).await
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        self.breaker.call(|| self.inner.get(key)).await
    }

    async fn set(&self, key: &str, value: String) -> Result<()> {
        self.breaker.call(|| self.inner.set(key, value)).await
    }

    async fn hash_set(&self, key: &str, field: &str, value: String) -> Result<()> {
        self.breaker
            .call(|| self.inner.hash_set(key, field, value))
            .await
    }

    async fn hash_get_all(&self, key: &str) -> Result<BTreeMap<String, String>> {
        self.breaker.call(|| self.inner.hash_get_all(key)).await
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<()> {
        self.breaker.call(|| self.inner.expire(key, ttl)).await
    }

    async fn ttl(&self, key: &str) -> Result<Option<Duration>> {
        self.breaker.call(|| self.inner.ttl(key)).await
    }

    async fn delete(&self, keys: &[&str]) -> Result<()> {
        self.breaker.call(|| self.inner.delete(keys)).await
    }

    async fn batch(&self, ops: Vec<KvOp>) -> Result<()> {
        self.breaker.call(|| self.inner.batch(ops)).await
    }

    async fn ping(&self) -> Result<()> {
        self.breaker.call(|| self.inner.ping()).await
    }
}

// =============================================================================
// Session store (durable context projections)
// =============================================================================

/// Durable store for serialized session contexts.
#[async_trait]
pub trait SessionStore: Send + Sync + fmt::Debug {
    async fn get_context(&self, session_id: &str) -> Result<Option<serde_json::Value>>;
    async fn set_context(&self, session_id: &str, context: serde_json::Value) -> Result<()>;
    async fn clear_context(&self, session_id: &str) -> Result<()>;
}

#[derive(Debug, Default)]
pub struct MemorySessionStore {
    contexts: Mutex<BTreeMap<String, serde_json::Value>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn get_context(&self, session_id: &str) -> Result<Option<serde_json::Value>> {
        let contexts = self
            .contexts
            .lock()
            .map_err(|_| Error::storage("session store lock poisoned"))?;
        Ok(contexts.get(session_id).cloned())
    }

    async fn set_context(&self, session_id: &str, context: serde_json::Value) -> Result<()> {
        let mut contexts = self
            .contexts
            .lock()
            .map_err(|_| Error::storage("session store lock poisoned"))?;
        contexts.insert(session_id.to_string(), context);
        Ok(())
    }

    async fn clear_context(&self, session_id: &str) -> Result<()> {
        let mut contexts = self
            .contexts
            .lock()
            .map_err(|_| Error::storage("session store lock poisoned"))?;
        contexts.remove(session_id);
        Ok(())
    }
}

// =============================================================================
// Summary mirror (best-effort SQL)
// =============================================================================

/// Durable mirror of the current rolling summary, one row per session.
/// Writes are best-effort: a mirror failure never fails the user turn.
#[async_trait]
pub trait SummaryMirrorStore: Send + Sync + fmt::Debug {
    async fn save_summary(&self, session_id: &str, summary: &str) -> Result<()>;
    async fn load_summary(&self, session_id: &str) -> Result<Option<String>>;
}

#[derive(Debug, Default)]
pub struct MemorySummaryMirror {
    summaries: Mutex<BTreeMap<String, String>>,
}

impl MemorySummaryMirror {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SummaryMirrorStore for MemorySummaryMirror {
    async fn save_summary(&self, session_id: &str, summary: &str) -> Result<()> {
        let mut summaries = self
            .summaries
            .lock()
            .map_err(|_| Error::storage("summary mirror lock poisoned"))?;
        summaries.insert(session_id.to_string(), summary.to_string());
        Ok(())
    }

    async fn load_summary(&self, session_id: &str) -> Result<Option<String>> {
        let summaries = self
            .summaries
            .lock()
            .map_err(|_| Error::storage("summary mirror lock poisoned"))?;
        Ok(summaries.get(session_id).cloned())
    }
}

// =============================================================================
// Object store (audit artifacts)
// =============================================================================

/// Write-only object store for audit artifacts.
#[async_trait]
pub trait ObjectStore: Send + Sync + fmt::Debug {
    async fn put_object(
        &self,
        key: &str,
        body: Vec<u8>,
        metadata: BTreeMap<String, String>,
    ) -> Result<()>;
}

#[derive(Debug, Clone)]
pub struct StoredObject {
    pub body: Vec<u8>,
    pub metadata: BTreeMap<String, String>,
}

#[derive(Debug, Default)]
pub struct MemoryObjectStore {
    objects: Mutex<BTreeMap<String, StoredObject>>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn keys(&self) -> Vec<String> {
        self.objects
            .lock()
            .map(|objects| objects.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn get(&self, key: &str) -> Option<StoredObject> {
        self.objects
            .lock()
            .ok()
            .and_then(|objects| objects.get(key).cloned())
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn put_object(
        &self,
        key: &str,
        body: Vec<u8>,
        metadata: BTreeMap<String, String>,
    ) -> Result<()> {
        let mut objects = self
            .objects
            .lock()
            .map_err(|_| Error::storage("object store lock poisoned"))?;
        objects.insert(key.to_string(), StoredObject { body, metadata });
        Ok(())
    }
}

/// Filesystem object store used by the REPL binary: objects land under a
/// base directory, metadata as an adjacent `.meta.json` file.
#[derive(Debug)]
pub struct FsObjectStore {
    base_dir: std::path::PathBuf,
}

impl FsObjectStore {
    pub fn new(base_dir: impl Into<std::path::PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }
}

#[async_trait]
impl ObjectStore for FsObjectStore {
    async fn put_object(
        &self,
        key: &str,
        body: Vec<u8>,
        metadata: BTreeMap<String, String>,
    ) -> Result<()> {
        let path = self.base_dir.join(key);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&path, body)?;
        let meta_path = path.with_extension("meta.json");
        std::fs::write(meta_path, serde_json::to_vec_pretty(&metadata)?)?;
        Ok(())
    }
}

// =============================================================================
// Shopping adapter
// =============================================================================

/// External product search. Errors may surface either as `Err` or as an
/// in-band `[{error}]` item list; callers tolerate both.
#[async_trait]
pub trait ShoppingAdapter: Send + Sync + fmt::Debug {
    async fn search(&self, query: &str) -> Result<Vec<Product>>;
}

/// Canned-results adapter for tests and the offline REPL.
#[derive(Debug, Default)]
pub struct StaticShoppingAdapter {
    results: Mutex<Vec<Product>>,
}

impl StaticShoppingAdapter {
    pub fn new(results: Vec<Product>) -> Self {
        Self {
            results: Mutex::new(results),
        }
    }

    pub fn set_results(&self, results: Vec<Product>) {
        if let Ok(mut slot) = self.results.lock() {
            *slot = results;
        }
    }
}

#[async_trait]
impl ShoppingAdapter for StaticShoppingAdapter {
    async fn search(&self, _query: &str) -> Result<Vec<Product>> {
        Ok(self
            .results
            .lock()
            .map(|results| results.clone())
            .unwrap_or_default())
    }
}

// =============================================================================
// Embedder (semantic memory)
// =============================================================================

/// Text embedding for the semantic store. Production wires a model server;
/// the default is a deterministic feature-hashing embedder.
#[async_trait]
pub trait Embedder: Send + Sync + fmt::Debug {
    fn dimension(&self) -> usize;
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;
}

/// Deterministic 384-dim feature-hashing embedder. Not semantically strong,
/// but stable and dependency-free: token hashes are folded into buckets and
/// the vector L2-normalized for cosine scoring.
#[derive(Debug, Default)]
pub struct HashEmbedder;

impl HashEmbedder {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Embedder for HashEmbedder {
    fn dimension(&self) -> usize {
        384
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        use std::collections::hash_map::DefaultHasher;
        use std::hash::{Hash, Hasher};

        let mut vector = vec![0.0f32; self.dimension()];
        for token in text.to_lowercase().split_whitespace() {
            let mut hasher = DefaultHasher::new();
            token.hash(&mut hasher);
            let hash = hasher.finish();
            let bucket = (hash % self.dimension() as u64) as usize;
            let sign = if hash & (1 << 63) == 0 { 1.0 } else { -1.0 };
            vector[bucket] += sign;
        }

        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut vector {
                *v /= norm;
            }
        }
        Ok(vector)
    }
}
