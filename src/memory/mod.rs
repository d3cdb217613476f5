//! Tiered conversation memory.
//!
//! Three tiers keyed by session id: a bounded ephemeral buffer, a rolling
//! summary store with a durable mirror, and a semantic long-term store keyed
//! by user id. The manager owns the summarization trigger: once the buffer
//! crosses the token threshold, the oldest messages are folded into a
//! summary and removed.

pub mod buffer;
pub mod semantic;
pub mod serializer;
pub mod summary;
pub mod tokens;

pub use buffer::{BufferInfo, BufferStore};
pub use semantic::{SemanticHit, SemanticStore};
pub use serializer::{Message, MessageSerializer, SummaryRecord};
pub use summary::{SummaryStats, SummaryStore};
pub use tokens::TokenCounter;

use crate::pipelines::RollingSummariser;
use crate::stores::FastKvStore;
use crate::types::MemoryConfig;
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;

/// Assembled memory context handed to upstream consumers.
#[derive(Debug, Clone, Default, Serialize)]
pub struct MemoryContext {
    pub buffer_messages: Vec<Message>,
    pub current_summary: Option<String>,
    pub buffer_info: BufferInfo,
    pub total_tokens: usize,
    pub message_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub semantic_memories: Option<Vec<SemanticHit>>,
}

/// Unified memory interface for the orchestrator and state handlers.
#[derive(Debug)]
pub struct MemoryManager {
    buffer: BufferStore,
    summary: SummaryStore,
    semantic: Option<Arc<SemanticStore>>,
    summariser: RollingSummariser,
    kv: Arc<dyn FastKvStore>,
    summary_trigger_tokens: usize,
    summary_batch_size: usize,
}

impl MemoryManager {
    pub fn new(
        kv: Arc<dyn FastKvStore>,
        mirror: Arc<dyn crate::stores::SummaryMirrorStore>,
        summariser: RollingSummariser,
        config: &MemoryConfig,
    ) -> Self {
        Self {
            buffer: BufferStore::new(kv.clone(), config),
            summary: SummaryStore::new(kv.clone(), mirror, config),
            semantic: None,
            summariser,
            kv,
            summary_trigger_tokens: config.summary_trigger_tokens,
            summary_batch_size: config.summary_batch_size,
        }
    }

    pub fn with_semantic(mut self, semantic: Arc<SemanticStore>) -> Self {
        self.semantic = Some(semantic);
        self
    }

    pub fn semantic(&self) -> Option<&Arc<SemanticStore>> {
        self.semantic.as_ref()
    }

    pub fn summary_store(&self) -> &SummaryStore {
        &self.summary
    }

    pub fn buffer_store(&self) -> &BufferStore {
        &self.buffer
    }

    /// Add a message; the summarization trigger runs after the insert.
    pub async fn add_message(&self, session_id: &str, message: &Message) -> bool {
        let added = self.buffer.add_message(session_id, message).await;
        if added {
            self.check_and_trigger_summary(session_id).await;
        }
        added
    }

    async fn check_and_trigger_summary(&self, session_id: &str) {
        if !self
            .buffer
            .should_trigger_summary(session_id, self.summary_trigger_tokens)
            .await
        {
            return;
        }

        let messages = self.buffer.get_messages(session_id, None).await;
        if messages.len() < self.summary_batch_size {
            return;
        }

        let oldest = self.buffer.pop_oldest(session_id, self.summary_batch_size).await;
        if oldest.is_empty() {
            return;
        }
        let contents: Vec<String> = oldest.iter().map(|m| m.content.clone()).collect();
        let summary = self.summariser.summarize_contents(&contents).await;
        if summary.is_empty() {
            return;
        }

        self.summary
            .add_summary(session_id, &summary, json!({"source": "rolling"}))
            .await;
        tracing::info!(
            session_id,
            summarized = oldest.len(),
            "buffer_messages_summarized"
        );
    }

    /// Assemble the enhanced context; optionally resolves semantic memories
    /// for the user against the given query.
    pub async fn get_context(
        &self,
        session_id: &str,
        semantic_query: Option<(&str, &str)>,
    ) -> MemoryContext {
        let buffer_messages = self.buffer.get_messages(session_id, None).await;
        let current_summary = self.summary.current_summary(session_id).await;
        let buffer_info = self.buffer.buffer_info(session_id).await;

        let semantic_memories = match (self.semantic.as_ref(), semantic_query) {
            (Some(semantic), Some((user_id, query))) => semantic
                .search_memories(user_id, query, None, None)
                .await
                .ok(),
            _ => None,
        };

        MemoryContext {
            total_tokens: buffer_info.total_tokens,
            message_count: buffer_info.message_count,
            buffer_messages,
            current_summary,
            buffer_info,
            semantic_memories,
        }
    }

    /// Buffer, summary and availability statistics for monitoring.
    pub async fn memory_stats(&self, session_id: &str) -> serde_json::Value {
        json!({
            "buffer": self.buffer.buffer_info(session_id).await,
            "summary": self.summary.stats(session_id).await,
            "store_available": self.is_available().await,
        })
    }

    pub async fn clear_session_memory(&self, session_id: &str) -> bool {
        let buffer_cleared = self.buffer.clear(session_id).await;
        let summaries_cleared = self.summary.clear(session_id).await;
        buffer_cleared && summaries_cleared
    }

    pub async fn is_available(&self) -> bool {
        self.kv.ping().await.is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stores::{MemoryKvStore, MemorySummaryMirror};

    fn manager() -> MemoryManager {
        MemoryManager::new(
            Arc::new(MemoryKvStore::new()),
            Arc::new(MemorySummaryMirror::new()),
            RollingSummariser::default(),
            &MemoryConfig::default(),
        )
    }

    #[tokio::test]
    async fn test_add_message_and_context() {
        let memory = manager();
        memory.add_message("s", &Message::user("I want a GPU")).await;
        memory
            .add_message("s", &Message::assistant("Which budget?"))
            .await;

        let context = memory.get_context("s", None).await;
        assert_eq!(context.message_count, 2);
        assert_eq!(context.buffer_messages[0].content, "I want a GPU");
        assert!(context.current_summary.is_none());
        assert!(context.total_tokens > 0);
    }

    #[tokio::test]
    async fn test_summarization_trigger_folds_oldest_messages() {
        let memory = manager();
        // ~400 tokens per message; the 3000-token trigger crosses around
        // message 8, and the buffer stays within bounds throughout.
        for i in 0..12 {
            let body = format!("message {i} {}", "lorem ipsum dolor sit amet. ".repeat(55));
            memory.add_message("s", &Message::user(body)).await;
        }

        let context = memory.get_context("s", None).await;
        assert!(
            context.current_summary.is_some(),
            "summary should exist after trigger"
        );
        assert!(context.total_tokens <= 4000);
        assert!(context.message_count <= 30);

        // The oldest messages were folded out of the buffer.
        assert!(context
            .buffer_messages
            .iter()
            .all(|m| !m.content.starts_with("message 0 ")));
    }

    #[tokio::test]
    async fn test_memory_stats_shape() {
        let memory = manager();
        memory.add_message("s", &Message::user("hello")).await;
        let stats = memory.memory_stats("s").await;
        assert_eq!(stats["buffer"]["message_count"], 1);
        assert_eq!(stats["store_available"], true);
    }

    #[tokio::test]
    async fn test_clear_session_memory() {
        let memory = manager();
        memory.add_message("s", &Message::user("hello")).await;
        assert!(memory.clear_session_memory("s").await);
        let context = memory.get_context("s", None).await;
        assert_eq!(context.message_count, 0);
    }
}
