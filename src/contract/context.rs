//! Session context: the per-session root aggregate.
//!
//! All mutation flows through `apply_updates` / `update_state` /
//! `record_pipeline_execution`, called exclusively from the state machine's
//! apply step. The serialized projection keeps the wire keys stable so
//! persisted contexts survive process restarts.

use super::product::{Constraint, Product, Recommendation};
use super::states::{ContractState, ContractStatus};
use super::transition::ContextUpdates;
use crate::types::SessionId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// One recorded pipeline execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineExecutionRecord {
    pub status: String,
    /// Seconds.
    pub execution_time: f64,
    /// Compact summary, e.g. `{"items_count": 3}` or `{"ranking_method": "pipeline"}`.
    pub result_summary: Value,
    pub timestamp: DateTime<Utc>,
}

/// The per-session aggregate driven by the contract state machine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContractContext {
    pub session_id: SessionId,

    /// Path of the declarative template this session was constructed from.
    pub contract_template_ref: String,

    pub current_state: ContractState,

    /// Append-only `"<from> -> <to>"` transition records.
    #[serde(default)]
    pub step_log: Vec<String>,

    #[serde(default)]
    pub product_query: Option<String>,

    #[serde(default)]
    pub enhanced_query: Option<String>,

    #[serde(default)]
    pub search_results: Vec<Product>,

    #[serde(default)]
    pub extracted_attributes: Vec<String>,

    /// Soft preferences. Legacy persisted contexts stored these as a plain
    /// list; that form is accepted on read but never emitted.
    #[serde(default, deserialize_with = "deserialize_preferences")]
    pub preferences: BTreeMap<String, String>,

    #[serde(default)]
    pub constraints: Vec<Constraint>,

    #[serde(default)]
    pub refinement_attempts: u32,

    #[serde(default)]
    pub top_products: Vec<Product>,

    #[serde(default)]
    pub product_recommendations: Option<Recommendation>,

    #[serde(default)]
    pub preference_scores: Vec<f64>,

    #[serde(default)]
    pub ranking_method: Option<String>,

    #[serde(default)]
    pub selected_product: Option<Product>,

    #[serde(default)]
    pub contract_status: ContractStatus,

    #[serde(default)]
    pub confirmation_pending: bool,

    #[serde(default)]
    pub is_cancelled: bool,

    /// Append-only multiset of component names invoked.
    #[serde(default)]
    pub tools_used: Vec<String>,

    /// Pipeline name -> ordered execution records.
    #[serde(default)]
    pub pipeline_executions: BTreeMap<String, Vec<PipelineExecutionRecord>>,

    /// Pipeline name -> full result of the most recent execution.
    #[serde(default)]
    pub last_pipeline_results: BTreeMap<String, Value>,

    /// Derived statistics, e.g. `product_search_avg_time`.
    #[serde(default)]
    pub pipeline_performance_metrics: BTreeMap<String, f64>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

fn deserialize_preferences<'de, D>(deserializer: D) -> Result<BTreeMap<String, String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum PreferenceField {
        Map(BTreeMap<String, String>),
        // Legacy list form: each entry becomes a key marked "preferred".
        List(Vec<String>),
    }

    match Option::<PreferenceField>::deserialize(deserializer)? {
        None => Ok(BTreeMap::new()),
        Some(PreferenceField::Map(map)) => Ok(map),
        Some(PreferenceField::List(items)) => Ok(items
            .into_iter()
            .map(|item| (item, "preferred".to_string()))
            .collect()),
    }
}

impl ContractContext {
    pub fn new(session_id: SessionId, contract_template_ref: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            session_id,
            contract_template_ref: contract_template_ref.into(),
            current_state: ContractState::Start,
            step_log: Vec::new(),
            product_query: None,
            enhanced_query: None,
            search_results: Vec::new(),
            extracted_attributes: Vec::new(),
            preferences: BTreeMap::new(),
            constraints: Vec::new(),
            refinement_attempts: 0,
            top_products: Vec::new(),
            product_recommendations: None,
            preference_scores: Vec::new(),
            ranking_method: None,
            selected_product: None,
            contract_status: ContractStatus::Active,
            confirmation_pending: false,
            is_cancelled: false,
            tools_used: Vec::new(),
            pipeline_executions: BTreeMap::new(),
            last_pipeline_results: BTreeMap::new(),
            pipeline_performance_metrics: BTreeMap::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Construct a context already parked in the error sink. Used when the
    /// contract template cannot be loaded.
    pub fn errored(session_id: SessionId, contract_template_ref: impl Into<String>) -> Self {
        let mut context = Self::new(session_id, contract_template_ref);
        context.current_state = ContractState::Error;
        context.contract_status = ContractStatus::Error;
        context
    }

    /// Transition into `next`, appending to the step log.
    pub fn update_state(&mut self, next: ContractState) {
        let from = self.current_state;
        self.step_log.push(format!("{from} -> {next}"));
        self.current_state = next;
        self.updated_at = Utc::now();
    }

    /// Apply a partial update produced by a state handler.
    ///
    /// `selected_product` is write-once: attempts to overwrite it before the
    /// contract terminates are dropped.
    pub fn apply_updates(&mut self, updates: ContextUpdates) {
        if let Some(query) = updates.product_query {
            self.product_query = Some(query);
        }
        if let Some(query) = updates.enhanced_query {
            self.enhanced_query = Some(query);
        }
        if let Some(results) = updates.search_results {
            self.search_results = results;
        }
        if let Some(attributes) = updates.extracted_attributes {
            self.extracted_attributes = attributes;
        }
        if let Some(preferences) = updates.preferences {
            self.preferences = preferences;
        }
        if let Some(constraints) = updates.constraints {
            self.constraints = constraints;
        }
        if let Some(attempts) = updates.refinement_attempts {
            self.refinement_attempts = attempts;
        }
        if let Some(products) = updates.top_products {
            self.top_products = products;
        }
        if let Some(recommendation) = updates.product_recommendations {
            self.product_recommendations = Some(recommendation);
        }
        if let Some(scores) = updates.preference_scores {
            self.preference_scores = scores;
        }
        if let Some(method) = updates.ranking_method {
            self.ranking_method = Some(method);
        }
        if let Some(product) = updates.selected_product {
            if self.selected_product.is_none() {
                self.selected_product = Some(product);
            } else {
                tracing::warn!(
                    session_id = %self.session_id,
                    "selected_product_overwrite_dropped"
                );
            }
        }
        if let Some(pending) = updates.confirmation_pending {
            self.confirmation_pending = pending;
        }
        if let Some(status) = updates.contract_status {
            self.contract_status = status;
        }
        if let Some(cancelled) = updates.is_cancelled {
            self.is_cancelled = cancelled;
        }
        self.updated_at = Utc::now();
    }

    /// Record one pipeline invocation: appends the execution record, replaces
    /// the last-result slot, and refreshes the rolling average metric so that
    /// `pipeline_performance_metrics["<name>_avg_time"]` always reflects all
    /// recorded executions.
    pub fn record_pipeline_execution(
        &mut self,
        pipeline_name: &str,
        result: Value,
        execution_time: f64,
    ) {
        let status = result
            .get("status")
            .and_then(Value::as_str)
            .unwrap_or("unknown")
            .to_string();

        let mut summary = serde_json::Map::new();
        if let Some(items) = result.get("items").and_then(Value::as_array) {
            summary.insert("items_count".into(), Value::from(items.len()));
        }
        if let Some(ranked) = result.get("ranked_products").and_then(Value::as_array) {
            summary.insert("items_count".into(), Value::from(ranked.len()));
        }
        if let Some(method) = result.get("ranking_method").and_then(Value::as_str) {
            summary.insert("ranking_method".into(), Value::from(method));
        }

        let record = PipelineExecutionRecord {
            status,
            execution_time,
            result_summary: Value::Object(summary),
            timestamp: Utc::now(),
        };

        let executions = self
            .pipeline_executions
            .entry(pipeline_name.to_string())
            .or_default();
        executions.push(record);

        let avg =
            executions.iter().map(|r| r.execution_time).sum::<f64>() / executions.len() as f64;
        self.pipeline_performance_metrics
            .insert(format!("{pipeline_name}_avg_time"), avg);

        self.last_pipeline_results
            .insert(pipeline_name.to_string(), result);
        self.updated_at = Utc::now();
    }

    /// Dict projection used by the persistence layer.
    pub fn to_value(&self) -> crate::types::Result<Value> {
        Ok(serde_json::to_value(self)?)
    }

    /// Rebuild from a persisted dict projection.
    pub fn from_value(value: Value) -> crate::types::Result<Self> {
        Ok(serde_json::from_value(value)?)
    }
}
