//! Intent classification front-end.
//!
//! The production classifier is an external collaborator; the keyword
//! implementation here covers offline runs and tests. Contract intent
//! carries the extracted purchase criteria so the orchestrator can seed the
//! state machine's parameters.

use crate::llm::helpers::InitialCriteria;
use crate::llm::LlmHelpers;
use crate::types::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Classified user intent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "intent_type", rename_all = "snake_case")]
pub enum Intent {
    /// Purchase workflow with the extracted criteria.
    Contract { criteria: InitialCriteria },
    /// Direct tool invocation (web search and friends).
    Tool { name: String, query: String },
    /// Document question answering.
    Rag { question: String },
    /// Plain conversation.
    Chat,
}

/// Intent extraction seam.
#[async_trait]
pub trait IntentExtractor: Send + Sync + fmt::Debug {
    async fn extract(&self, text: &str) -> Result<Intent>;
}

const PURCHASE_KEYWORDS: [&str; 6] = ["buy", "purchase", "order", "shop for", "looking for", "get me"];
const RAG_KEYWORDS: [&str; 3] = ["#rag", "according to the document", "in the docs"];
const TOOL_KEYWORDS: [&str; 2] = ["search the web", "web search"];

/// Keyword classifier with criteria extraction through the LLM helper
/// (which itself falls back to regex when no provider is available).
#[derive(Debug)]
pub struct KeywordIntentExtractor {
    llm: Arc<LlmHelpers>,
}

impl KeywordIntentExtractor {
    pub fn new(llm: Arc<LlmHelpers>) -> Self {
        Self { llm }
    }
}

#[async_trait]
impl IntentExtractor for KeywordIntentExtractor {
    async fn extract(&self, text: &str) -> Result<Intent> {
        let lowered = text.to_lowercase();

        if RAG_KEYWORDS.iter().any(|kw| lowered.contains(kw)) {
            return Ok(Intent::Rag {
                question: text.trim().to_string(),
            });
        }
        if TOOL_KEYWORDS.iter().any(|kw| lowered.contains(kw)) {
            return Ok(Intent::Tool {
                name: "websearch".to_string(),
                query: text.trim().to_string(),
            });
        }
        if PURCHASE_KEYWORDS.iter().any(|kw| lowered.contains(kw)) {
            let criteria = self.llm.extract_initial_criteria(text).await;
            tracing::info!(
                base_product = %criteria.base_product,
                enhanced_query = %criteria.enhanced_query,
                "contract_intent_extracted"
            );
            return Ok(Intent::Contract { criteria });
        }
        Ok(Intent::Chat)
    }
}
