//! Rolling summariser pipeline: TextSplitter -> Summarizer.
//!
//! Summarization model inference is an external service behind the
//! `SummarizerModel` trait; the bundled extractive implementation keeps the
//! pipeline functional offline. Output length is bounded (~150 tokens, at
//! least 30 where the input allows); any failure degrades to the first 200
//! characters of the concatenated input.

use super::{Component, Pipeline, EDGE_OUTPUT};
use crate::types::Result;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::fmt;
use std::sync::Arc;

pub const ROLLING_SUMMARISER_PIPELINE: &str = "rolling_summariser";

const NODE_SPLIT: &str = "TextSplitter";
const NODE_SUMMARIZE: &str = "Summarizer";

const MAX_SUMMARY_TOKENS: usize = 150;
const MIN_SUMMARY_TOKENS: usize = 30;
const TRUNCATION_FALLBACK_CHARS: usize = 200;

/// Abstract summarization model (T5-class seq2seq behind an inference
/// endpoint in production).
#[async_trait]
pub trait SummarizerModel: Send + Sync + fmt::Debug {
    async fn summarize(&self, text: &str, max_tokens: usize, min_tokens: usize) -> Result<String>;
}

/// Extractive summarizer: keeps leading sentences until the token budget is
/// spent. Deterministic and dependency-free; the offline default.
#[derive(Debug, Default)]
pub struct ExtractiveSummarizer;

fn approx_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(4)
}

#[async_trait]
impl SummarizerModel for ExtractiveSummarizer {
    async fn summarize(&self, text: &str, max_tokens: usize, _min_tokens: usize) -> Result<String> {
        let mut summary = String::new();
        for sentence in split_sentences(text) {
            if !summary.is_empty() && approx_tokens(&summary) + approx_tokens(sentence) > max_tokens
            {
                break;
            }
            if !summary.is_empty() {
                summary.push(' ');
            }
            summary.push_str(sentence);
        }
        if summary.is_empty() {
            summary = text.chars().take(max_tokens * 4).collect();
        }
        Ok(summary)
    }
}

fn split_sentences(text: &str) -> Vec<&str> {
    text.split_inclusive(['.', '!', '?'])
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect()
}

/// Splits input text into sentence chunks with overlap, so the summarizer
/// never sees arbitrarily long sequences.
#[derive(Debug)]
pub struct TextSplitterComponent {
    split_length: usize,
    split_overlap: usize,
}

impl Default for TextSplitterComponent {
    fn default() -> Self {
        Self {
            split_length: 10,
            split_overlap: 2,
        }
    }
}

#[async_trait]
impl Component for TextSplitterComponent {
    fn name(&self) -> &'static str {
        "TextSplitterComponent"
    }

    async fn run(&self, input: Value) -> Result<(Value, String)> {
        let text = input["text"].as_str().unwrap_or_default();
        let sentences = split_sentences(text);

        let mut chunks = Vec::new();
        let step = self.split_length.saturating_sub(self.split_overlap).max(1);
        let mut start = 0;
        while start < sentences.len() {
            let end = (start + self.split_length).min(sentences.len());
            chunks.push(sentences[start..end].join(" "));
            if end == sentences.len() {
                break;
            }
            start += step;
        }
        if chunks.is_empty() && !text.is_empty() {
            chunks.push(text.to_string());
        }

        Ok((json!({"chunks": chunks}), EDGE_OUTPUT.to_string()))
    }
}

/// Runs the summarization model per chunk and concatenates (map-reduce).
#[derive(Debug)]
pub struct SummarizerComponent {
    model: Arc<dyn SummarizerModel>,
}

#[async_trait]
impl Component for SummarizerComponent {
    fn name(&self) -> &'static str {
        "SummarizerComponent"
    }

    async fn run(&self, input: Value) -> Result<(Value, String)> {
        let chunks: Vec<String> =
            serde_json::from_value(input["chunks"].clone()).unwrap_or_default();

        let mut parts = Vec::with_capacity(chunks.len());
        let per_chunk_budget = (MAX_SUMMARY_TOKENS / chunks.len().max(1)).max(MIN_SUMMARY_TOKENS);
        for chunk in &chunks {
            parts.push(
                self.model
                    .summarize(chunk, per_chunk_budget, MIN_SUMMARY_TOKENS.min(per_chunk_budget))
                    .await?,
            );
        }

        let combined = parts.join(" ");
        let summary = if approx_tokens(&combined) > MAX_SUMMARY_TOKENS {
            self.model
                .summarize(&combined, MAX_SUMMARY_TOKENS, MIN_SUMMARY_TOKENS)
                .await?
        } else {
            combined
        };

        Ok((json!({"summary": summary}), EDGE_OUTPUT.to_string()))
    }
}

/// Rolling summariser over a list of message contents.
#[derive(Debug)]
pub struct RollingSummariser {
    pipeline: Pipeline,
}

impl Default for RollingSummariser {
    fn default() -> Self {
        Self::new(Arc::new(ExtractiveSummarizer))
    }
}

impl RollingSummariser {
    pub fn new(model: Arc<dyn SummarizerModel>) -> Self {
        let pipeline = Pipeline::new(ROLLING_SUMMARISER_PIPELINE)
            .add_node(NODE_SPLIT, Arc::new(TextSplitterComponent::default()))
            .add_node(NODE_SUMMARIZE, Arc::new(SummarizerComponent { model }));
        Self { pipeline }
    }

    /// Summarize message contents. On any failure, degrades to the first
    /// 200 characters of the concatenation.
    pub async fn summarize_contents(&self, contents: &[String]) -> String {
        if contents.is_empty() {
            return String::new();
        }
        let combined = contents.join(" ");

        match self.pipeline.run(json!({"text": combined})).await {
            Ok(outputs) => {
                let summary = outputs
                    .get(NODE_SUMMARIZE)
                    .and_then(|output| output["summary"].as_str())
                    .unwrap_or_default()
                    .to_string();
                if summary.is_empty() {
                    truncate_fallback(&combined)
                } else {
                    summary
                }
            }
            Err(error) => {
                tracing::error!(error = %error, "summarisation_failed_truncating");
                truncate_fallback(&combined)
            }
        }
    }
}

fn truncate_fallback(text: &str) -> String {
    if text.chars().count() > TRUNCATION_FALLBACK_CHARS {
        let truncated: String = text.chars().take(TRUNCATION_FALLBACK_CHARS).collect();
        format!("{truncated}...")
    } else {
        text.to_string()
    }
}
