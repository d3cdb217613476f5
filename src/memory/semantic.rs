//! Semantic long-term store.
//!
//! Cosine-indexed 384-dim memory keyed by user id. Writes pass through the
//! PII gate: unsafe text is stored hash-redacted and flagged, never raw.
//! The vector index parameters mirror the production collection layout
//! (IVF-FLAT, nlist 128, content capped at 1000 chars).

use crate::privacy::PiiRedactor;
use crate::stores::Embedder;
use crate::types::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};

const MAX_CONTENT_CHARS: usize = 1000;
const DEFAULT_TOP_K: usize = 3;
const DEFAULT_THRESHOLD: f32 = 0.7;

/// Index parameters carried for parity with the backing collection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexParams {
    pub collection: String,
    pub metric: String,
    pub index_type: String,
    pub nlist: u32,
    pub dimension: usize,
}

impl Default for IndexParams {
    fn default() -> Self {
        Self {
            collection: "semantic_memory".to_string(),
            metric: "cosine".to_string(),
            index_type: "IVF_FLAT".to_string(),
            nlist: 128,
            dimension: 384,
        }
    }
}

#[derive(Debug, Clone)]
struct SemanticEntry {
    id: u64,
    user_id: String,
    content: String,
    embedding: Vec<f32>,
    memory_type: String,
    metadata: Value,
    timestamp_ms: i64,
}

/// A search hit above the similarity threshold.
#[derive(Debug, Clone, Serialize)]
pub struct SemanticHit {
    pub id: u64,
    pub content: String,
    pub memory_type: String,
    pub score: f32,
    pub metadata: Value,
    pub timestamp_ms: i64,
}

/// User-scoped semantic memory with PII-gated writes.
#[derive(Debug)]
pub struct SemanticStore {
    embedder: Arc<dyn Embedder>,
    redactor: Arc<PiiRedactor>,
    params: IndexParams,
    entries: Mutex<Vec<SemanticEntry>>,
    next_id: Mutex<u64>,
}

impl SemanticStore {
    pub fn new(embedder: Arc<dyn Embedder>, redactor: Arc<PiiRedactor>) -> Self {
        let params = IndexParams {
            dimension: embedder.dimension(),
            ..IndexParams::default()
        };
        Self {
            embedder,
            redactor,
            params,
            entries: Mutex::new(Vec::new()),
            next_id: Mutex::new(1),
        }
    }

    pub fn index_params(&self) -> &IndexParams {
        &self.params
    }

    /// Store a memory for a user. Content flagged by the PII gate is stored
    /// hash-redacted with `pii_detected`/`pii_redacted` metadata flags.
    /// Returns `false` when the write was rejected outright.
    pub async fn add_memory(
        &self,
        user_id: &str,
        content: &str,
        memory_type: &str,
        metadata: Option<Value>,
    ) -> Result<bool> {
        if content.is_empty() {
            return Ok(false);
        }

        let mut metadata = metadata.unwrap_or_else(|| json!({}));
        if !metadata.is_object() {
            metadata = json!({"extra": metadata});
        }
        let content = if self.redactor.is_text_safe_for_storage(content, 0.7) {
            content.to_string()
        } else {
            tracing::warn!(user_id, "semantic_write_pii_redacted");
            metadata["pii_detected"] = json!(true);
            metadata["pii_redacted"] = json!(true);
            self.redactor.redact(content, crate::privacy::RedactionMethod::Hash)
        };

        let content: String = content.chars().take(MAX_CONTENT_CHARS).collect();
        let embedding = self.embedder.embed(&content).await?;
        if embedding.len() != self.params.dimension {
            return Err(Error::storage(format!(
                "embedding dimension {} does not match index dimension {}",
                embedding.len(),
                self.params.dimension
            )));
        }

        let mut next_id = self
            .next_id
            .lock()
            .map_err(|_| Error::storage("semantic id lock poisoned"))?;
        let id = *next_id;
        *next_id += 1;
        drop(next_id);

        let entry = SemanticEntry {
            id,
            user_id: user_id.to_string(),
            content,
            embedding,
            memory_type: memory_type.to_string(),
            metadata,
            timestamp_ms: chrono::Utc::now().timestamp_millis(),
        };

        self.entries
            .lock()
            .map_err(|_| Error::storage("semantic store lock poisoned"))?
            .push(entry);
        Ok(true)
    }

    /// Search a user's memories; only hits at or above the similarity
    /// threshold are returned, best first.
    pub async fn search_memories(
        &self,
        user_id: &str,
        query: &str,
        top_k: Option<usize>,
        threshold: Option<f32>,
    ) -> Result<Vec<SemanticHit>> {
        let top_k = top_k.unwrap_or(DEFAULT_TOP_K);
        let threshold = threshold.unwrap_or(DEFAULT_THRESHOLD);
        let query_embedding = self.embedder.embed(query).await?;

        let entries = self
            .entries
            .lock()
            .map_err(|_| Error::storage("semantic store lock poisoned"))?;

        let mut hits: Vec<SemanticHit> = entries
            .iter()
            .filter(|entry| entry.user_id == user_id)
            .map(|entry| SemanticHit {
                id: entry.id,
                content: entry.content.clone(),
                memory_type: entry.memory_type.clone(),
                score: cosine_similarity(&query_embedding, &entry.embedding),
                metadata: entry.metadata.clone(),
                timestamp_ms: entry.timestamp_ms,
            })
            .filter(|hit| hit.score >= threshold)
            .collect();

        hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        hits.truncate(top_k);
        Ok(hits)
    }

    /// Remove every memory belonging to a user (GDPR erasure).
    pub fn delete_user_memories(&self, user_id: &str) -> Result<usize> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| Error::storage("semantic store lock poisoned"))?;
        let before = entries.len();
        entries.retain(|entry| entry.user_id != user_id);
        let removed = before - entries.len();
        tracing::info!(user_id, removed, "user_memories_deleted");
        Ok(removed)
    }

    /// Per-user stats, including how many records carry PII protection.
    pub fn memory_stats(&self, user_id: &str) -> Value {
        let entries = match self.entries.lock() {
            Ok(entries) => entries,
            Err(_) => return json!({}),
        };
        let user_entries: Vec<&SemanticEntry> = entries
            .iter()
            .filter(|entry| entry.user_id == user_id)
            .collect();
        let pii_protected = user_entries
            .iter()
            .filter(|entry| entry.metadata["pii_detected"] == json!(true))
            .count();

        json!({
            "total_memories": user_entries.len(),
            "pii_protected_memories": pii_protected,
            "collection": self.params.collection,
        })
    }
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stores::HashEmbedder;

    fn store() -> SemanticStore {
        SemanticStore::new(Arc::new(HashEmbedder::new()), Arc::new(PiiRedactor::new()))
    }

    #[tokio::test]
    async fn test_add_and_search_same_text() {
        let store = store();
        assert!(store
            .add_memory("u1", "prefers quiet washing machines", "preference", None)
            .await
            .unwrap());

        let hits = store
            .search_memories("u1", "prefers quiet washing machines", None, None)
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert!(hits[0].score > 0.99);
    }

    #[tokio::test]
    async fn test_threshold_filters_weak_matches() {
        let store = store();
        store
            .add_memory("u1", "prefers quiet washing machines", "preference", None)
            .await
            .unwrap();

        let hits = store
            .search_memories("u1", "completely unrelated astronomy topic", None, None)
            .await
            .unwrap();
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn test_user_isolation() {
        let store = store();
        store
            .add_memory("u1", "likes red laptops", "preference", None)
            .await
            .unwrap();
        let hits = store
            .search_memories("u2", "likes red laptops", None, None)
            .await
            .unwrap();
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn test_pii_is_redacted_and_flagged() {
        let store = store();
        store
            .add_memory(
                "u1",
                "my email is jane.doe@example.com and I like laptops",
                "fact",
                None,
            )
            .await
            .unwrap();

        let entries = store.entries.lock().unwrap();
        assert!(!entries[0].content.contains("jane.doe@example.com"));
        assert_eq!(entries[0].metadata["pii_redacted"], json!(true));
        drop(entries);

        let stats = store.memory_stats("u1");
        assert_eq!(stats["pii_protected_memories"], 1);
    }

    #[tokio::test]
    async fn test_delete_user_memories() {
        let store = store();
        store.add_memory("u1", "fact one", "fact", None).await.unwrap();
        store.add_memory("u1", "fact two", "fact", None).await.unwrap();
        store.add_memory("u2", "other user", "fact", None).await.unwrap();

        assert_eq!(store.delete_user_memories("u1").unwrap(), 2);
        assert_eq!(store.memory_stats("u1")["total_memories"], 0);
        assert_eq!(store.memory_stats("u2")["total_memories"], 1);
    }

    #[tokio::test]
    async fn test_content_capped_at_collection_limit() {
        let store = store();
        let long = "x".repeat(5000);
        store.add_memory("u1", &long, "fact", None).await.unwrap();
        let entries = store.entries.lock().unwrap();
        assert_eq!(entries[0].content.chars().count(), MAX_CONTENT_CHARS);
    }

    #[test]
    fn test_cosine_similarity_basics() {
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
    }
}
