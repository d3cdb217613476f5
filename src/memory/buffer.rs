//! Ephemeral message buffer.
//!
//! Fast-KV-backed list of serialized message envelopes per session, bounded
//! by message count and total tokens. Both limits are enforced after every
//! insert by trimming the oldest entries. Storage failures degrade: writes
//! report `false`, reads return empty.

use super::serializer::{Message, MessageSerializer};
use super::tokens::TokenCounter;
use crate::stores::FastKvStore;
use crate::types::MemoryConfig;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

fn buffer_key(session_id: &str) -> String {
    format!("buffer:{session_id}")
}

fn meta_key(session_id: &str) -> String {
    format!("buffer_meta:{session_id}")
}

/// Buffer statistics exposed to the memory manager.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BufferInfo {
    pub message_count: usize,
    pub total_tokens: usize,
    pub last_updated: i64,
    pub ttl_remaining: Option<u64>,
    pub max_messages: usize,
    pub max_tokens: usize,
}

/// Bounded per-session message buffer.
#[derive(Debug)]
pub struct BufferStore {
    kv: Arc<dyn FastKvStore>,
    serializer: MessageSerializer,
    counter: TokenCounter,
    max_messages: usize,
    max_tokens: usize,
    ttl: Duration,
}

impl BufferStore {
    pub fn new(kv: Arc<dyn FastKvStore>, config: &MemoryConfig) -> Self {
        Self {
            kv,
            serializer: MessageSerializer::new(),
            counter: TokenCounter::new(),
            max_messages: config.max_buffer_messages,
            max_tokens: config.max_buffer_tokens,
            ttl: config.buffer_ttl,
        }
    }

    /// Append a message, refresh metadata and TTLs, then enforce limits.
    /// Returns `false` when storage is unavailable.
    pub async fn add_message(&self, session_id: &str, message: &Message) -> bool {
        let result = async {
            let serialized = self.serializer.serialize(message)?;
            let buffer_key = buffer_key(session_id);
            let meta_key = meta_key(session_id);

            self.kv.list_push(&buffer_key, serialized).await?;
            self.kv.expire(&buffer_key, self.ttl).await?;

            let count = self.kv.list_len(&buffer_key).await?;
            self.kv
                .hash_set(
                    &meta_key,
                    "last_updated",
                    chrono::Utc::now().timestamp().to_string(),
                )
                .await?;
            self.kv
                .hash_set(&meta_key, "message_count", count.to_string())
                .await?;
            self.kv.expire(&meta_key, self.ttl).await?;

            self.enforce_limits(session_id).await?;
            crate::types::Result::Ok(())
        }
        .await;

        match result {
            Ok(()) => true,
            Err(error) => {
                tracing::error!(session_id, error = %error, "buffer_add_failed");
                false
            }
        }
    }

    /// Read messages oldest-first; `limit` keeps only the newest N.
    pub async fn get_messages(&self, session_id: &str, limit: Option<usize>) -> Vec<Message> {
        let key = buffer_key(session_id);
        let raw = match limit {
            Some(limit) => self.kv.list_range(&key, -(limit as i64), -1).await,
            None => self.kv.list_range(&key, 0, -1).await,
        };

        match raw {
            Ok(entries) => entries
                .iter()
                .filter_map(|entry| match self.serializer.deserialize(entry) {
                    Ok(message) => Some(message),
                    Err(error) => {
                        tracing::warn!(error = %error, "buffer_entry_unreadable_skipping");
                        None
                    }
                })
                .collect(),
            Err(error) => {
                tracing::error!(session_id, error = %error, "buffer_read_failed");
                Vec::new()
            }
        }
    }

    pub async fn buffer_info(&self, session_id: &str) -> BufferInfo {
        let messages = self.get_messages(session_id, None).await;
        let last_updated = self
            .kv
            .hash_get_all(&meta_key(session_id))
            .await
            .ok()
            .and_then(|meta| meta.get("last_updated").and_then(|v| v.parse().ok()))
            .unwrap_or(0);
        let ttl_remaining = self
            .kv
            .ttl(&buffer_key(session_id))
            .await
            .ok()
            .flatten()
            .map(|ttl| ttl.as_secs());

        BufferInfo {
            message_count: messages.len(),
            total_tokens: self.counter.count_batch_tokens(&messages),
            last_updated,
            ttl_remaining,
            max_messages: self.max_messages,
            max_tokens: self.max_tokens,
        }
    }

    /// Trim oldest entries until both bounds hold: first the message-count
    /// bound, then the token bound.
    async fn enforce_limits(&self, session_id: &str) -> crate::types::Result<()> {
        let key = buffer_key(session_id);

        let count = self.kv.list_len(&key).await?;
        if count > self.max_messages {
            for _ in 0..(count - self.max_messages) {
                self.kv.list_pop_front(&key).await?;
            }
            tracing::debug!(
                session_id,
                removed = count - self.max_messages,
                "buffer_trimmed_by_count"
            );
        }

        let messages = self.get_messages(session_id, None).await;
        let mut total_tokens = self.counter.count_batch_tokens(&messages);
        let mut removed = 0usize;
        for message in &messages {
            if total_tokens <= self.max_tokens {
                break;
            }
            total_tokens -= self.counter.count_message_tokens(message);
            removed += 1;
        }
        for _ in 0..removed {
            self.kv.list_pop_front(&key).await?;
        }
        if removed > 0 {
            tracing::debug!(session_id, removed, "buffer_trimmed_by_tokens");
        }
        Ok(())
    }

    /// Remove the oldest `count` messages (used by the summarization
    /// trigger after their content has been folded into a summary).
    pub async fn pop_oldest(&self, session_id: &str, count: usize) -> Vec<Message> {
        let key = buffer_key(session_id);
        let mut popped = Vec::with_capacity(count);
        for _ in 0..count {
            match self.kv.list_pop_front(&key).await {
                Ok(Some(raw)) => {
                    if let Ok(message) = self.serializer.deserialize(&raw) {
                        popped.push(message);
                    }
                }
                _ => break,
            }
        }
        popped
    }

    pub async fn clear(&self, session_id: &str) -> bool {
        self.kv
            .delete(&[&buffer_key(session_id), &meta_key(session_id)])
            .await
            .is_ok()
    }

    pub async fn should_trigger_summary(&self, session_id: &str, threshold: usize) -> bool {
        let messages = self.get_messages(session_id, None).await;
        self.counter.should_trigger_summary(&messages, threshold)
    }
}
