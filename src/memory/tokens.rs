//! Token estimation.
//!
//! Budget enforcement needs a stable, cheap estimate rather than exact
//! model-specific counts; four characters per token is the conventional
//! approximation and errs slightly high for English prose.

use super::serializer::Message;

#[derive(Debug, Clone, Default)]
pub struct TokenCounter;

impl TokenCounter {
    pub fn new() -> Self {
        Self
    }

    pub fn count_tokens(&self, text: &str) -> usize {
        text.chars().count().div_ceil(4)
    }

    pub fn count_message_tokens(&self, message: &Message) -> usize {
        self.count_tokens(&message.content) + self.count_tokens(&message.role)
    }

    pub fn count_batch_tokens(&self, messages: &[Message]) -> usize {
        messages
            .iter()
            .map(|message| self.count_message_tokens(message))
            .sum()
    }

    pub fn should_trigger_summary(&self, messages: &[Message], threshold: usize) -> bool {
        self.count_batch_tokens(messages) >= threshold
    }
}
