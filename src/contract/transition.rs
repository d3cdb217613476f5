//! State transitions.
//!
//! Every state handler returns a `StateTransition`; the state machine's
//! `apply` step is the only place session context is mutated. Handlers
//! therefore stay pure with respect to the context and testable in
//! isolation.

use super::product::{Constraint, Product, Recommendation};
use super::states::{ContractState, ContractStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Transition outcome tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TransitionStatus {
    #[default]
    Continue,
    WaitingForInput,
    Completed,
    Cancelled,
    Failed,
}

impl TransitionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransitionStatus::Continue => "continue",
            TransitionStatus::WaitingForInput => "waiting_for_input",
            TransitionStatus::Completed => "completed",
            TransitionStatus::Cancelled => "cancelled",
            TransitionStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TransitionStatus::Completed | TransitionStatus::Cancelled | TransitionStatus::Failed
        )
    }
}

/// Partial update applied to the session context by `apply`.
///
/// Only set fields overwrite; `None` leaves the context field untouched.
#[derive(Debug, Clone, Default)]
pub struct ContextUpdates {
    pub product_query: Option<String>,
    pub enhanced_query: Option<String>,
    pub search_results: Option<Vec<Product>>,
    pub extracted_attributes: Option<Vec<String>>,
    pub preferences: Option<BTreeMap<String, String>>,
    pub constraints: Option<Vec<Constraint>>,
    pub refinement_attempts: Option<u32>,
    pub top_products: Option<Vec<Product>>,
    pub product_recommendations: Option<Recommendation>,
    pub preference_scores: Option<Vec<f64>>,
    pub ranking_method: Option<String>,
    pub selected_product: Option<Product>,
    pub confirmation_pending: Option<bool>,
    pub contract_status: Option<ContractStatus>,
    pub is_cancelled: Option<bool>,
}

/// A recorded subtask on the template-derived contract.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subtask {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Product>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_choice: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<String>,
}

/// Partial update applied to the contract struct by `apply`.
#[derive(Debug, Clone, Default)]
pub struct ContractUpdates {
    pub subtasks: Vec<Subtask>,
    pub status: Option<String>,
    pub order_confirmed: Option<bool>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// One pipeline invocation performed by a handler, recorded on the context
/// and in the pipeline-state cache when the transition is applied.
#[derive(Debug, Clone)]
pub struct PipelineInvocation {
    pub pipeline: String,
    pub status: String,
    pub result: Value,
    pub execution_time: f64,
}

/// Result of a state handler: where to go next, what to tell the user, and
/// which partial updates to apply.
#[derive(Debug, Clone, Default)]
pub struct StateTransition {
    /// `None` means stay in the current state.
    pub next_state: Option<ContractState>,
    /// Informational text shown to the user (no input expected).
    pub user_message: Option<String>,
    /// Question shown to the user; setting this is the user-input barrier.
    pub ask_user: Option<String>,
    pub status: TransitionStatus,
    pub context_updates: ContextUpdates,
    pub contract_updates: ContractUpdates,
    pub tools_used: Vec<String>,
    pub pipeline_invocations: Vec<PipelineInvocation>,
    pub error_message: Option<String>,
}

impl StateTransition {
    /// A transition that advances the workflow without user interaction.
    pub fn success(next_state: ContractState) -> Self {
        Self {
            next_state: Some(next_state),
            ..Self::default()
        }
    }

    /// A transition that stays put and asks the user a question.
    pub fn ask(question: impl Into<String>) -> Self {
        Self {
            ask_user: Some(question.into()),
            status: TransitionStatus::WaitingForInput,
            ..Self::default()
        }
    }

    /// A failed transition into the `failed` sink.
    pub fn failure(error_message: impl Into<String>) -> Self {
        let error_message = error_message.into();
        Self {
            next_state: Some(ContractState::Failed),
            status: TransitionStatus::Failed,
            user_message: Some(format!("An error occurred: {error_message}")),
            error_message: Some(error_message),
            context_updates: ContextUpdates {
                contract_status: Some(ContractStatus::Failed),
                ..ContextUpdates::default()
            },
            ..Self::default()
        }
    }

    /// A clean cancellation with the given user-facing sentence.
    pub fn cancellation(user_message: impl Into<String>) -> Self {
        Self {
            next_state: Some(ContractState::Cancelled),
            status: TransitionStatus::Cancelled,
            user_message: Some(user_message.into()),
            context_updates: ContextUpdates {
                contract_status: Some(ContractStatus::Cancelled),
                is_cancelled: Some(true),
                ..ContextUpdates::default()
            },
            contract_updates: ContractUpdates {
                status: Some("cancelled_by_user".to_string()),
                ..ContractUpdates::default()
            },
            ..Self::default()
        }
    }

    pub fn with_context_updates(mut self, updates: ContextUpdates) -> Self {
        self.context_updates = updates;
        self
    }

    pub fn with_tools(mut self, tools: Vec<String>) -> Self {
        self.tools_used = tools;
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.user_message = Some(message.into());
        self
    }

    /// Whether applying this transition must pause for user input.
    pub fn requires_user_input(&self) -> bool {
        self.ask_user.is_some()
    }

    /// Whether this transition targets a terminal state.
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
            || self
                .next_state
                .map(|state| state.is_terminal())
                .unwrap_or(false)
    }

    /// API-response projection with stable keys.
    pub fn to_value(&self) -> Value {
        let mut result = serde_json::Map::new();
        result.insert("status".into(), Value::String(self.status.as_str().into()));
        result.insert(
            "next_state".into(),
            match self.next_state {
                Some(state) => Value::String(state.as_str().into()),
                None => Value::Null,
            },
        );
        if let Some(message) = &self.user_message {
            result.insert("message".into(), Value::String(message.clone()));
        }
        if let Some(ask) = &self.ask_user {
            result.insert("ask_user".into(), Value::String(ask.clone()));
        }
        if let Some(error) = &self.error_message {
            result.insert("error".into(), Value::String(error.clone()));
        }
        if !self.tools_used.is_empty() {
            result.insert(
                "tools_used".into(),
                Value::Array(
                    self.tools_used
                        .iter()
                        .map(|t| Value::String(t.clone()))
                        .collect(),
                ),
            );
        }
        Value::Object(result)
    }
}
