//! Preference match pipeline: SpecScraper -> CompatibilityChecker -> PreferenceRanker.
//!
//! Inputs are the surviving search results plus the user's soft preferences
//! and hard constraints. Oversized inputs are truncated to the search bound;
//! failures degrade through the caller-supplied fallback before an error
//! envelope is returned.

use super::components::{
    CompatibilityCheckerComponent, PreferenceRankerComponent, SpecScraperComponent,
};
use super::Pipeline;
use crate::contract::{Constraint, Product};
use crate::llm::LlmHelpers;
use crate::resilience::{HealthMonitor, SERVICE_LLM};
use crate::types::PipelineConfig;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;

pub const PREFERENCE_MATCH_PIPELINE: &str = "preference_match_pipeline";

const NODE_SCRAPE: &str = "scrape_specs";
const NODE_COMPAT: &str = "check_compat";
const NODE_RANK: &str = "rank_prefs";

/// Maximum items accepted per invocation; larger inputs are truncated.
pub const MAX_INPUT_PRODUCTS: usize = 50;

/// Preference envelope status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PreferenceStatus {
    Success,
    NoProducts,
    Fallback,
    Error,
}

/// Result envelope of the preference match pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreferencePipelineResult {
    pub status: PreferenceStatus,
    #[serde(default)]
    pub ranked_products: Vec<Product>,
    #[serde(default)]
    pub scores: Vec<f64>,
    pub ranking_method: String,
    #[serde(default)]
    pub total_processed: usize,
    #[serde(default)]
    pub preferences_applied: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl PreferencePipelineResult {
    pub fn no_products() -> Self {
        Self {
            status: PreferenceStatus::NoProducts,
            ranked_products: Vec::new(),
            scores: Vec::new(),
            ranking_method: "none".to_string(),
            total_processed: 0,
            preferences_applied: 0,
            message: Some("No products provided for preference matching".to_string()),
            error: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: PreferenceStatus::Error,
            ranked_products: Vec::new(),
            scores: Vec::new(),
            ranking_method: "none".to_string(),
            total_processed: 0,
            preferences_applied: 0,
            message: Some("Unable to rank products due to system error".to_string()),
            error: Some(message.into()),
        }
    }

    pub fn to_value(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_else(|_| json!({"status": "error"}))
    }
}

/// Deterministic ranking used when the pipeline cannot run: rating/price
/// scoring, top K, tagged `fallback`.
pub fn fallback_preference_ranking(
    products: &[Product],
    top_k: usize,
    error: Option<&str>,
) -> PreferencePipelineResult {
    if products.is_empty() {
        return PreferencePipelineResult::no_products();
    }

    let mut scored: Vec<(Product, f64)> = products
        .iter()
        .map(|product| {
            (
                product.clone(),
                PreferenceRankerComponent::fallback_score(product),
            )
        })
        .collect();
    scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    scored.truncate(top_k);
    let (ranked_products, scores): (Vec<Product>, Vec<f64>) = scored.into_iter().unzip();

    PreferencePipelineResult {
        status: PreferenceStatus::Fallback,
        ranked_products,
        scores,
        ranking_method: "fallback".to_string(),
        total_processed: products.len(),
        preferences_applied: 0,
        message: Some(match error {
            Some(error) => format!("Used fallback ranking due to: {error}"),
            None => "Using basic ranking due to service limitations".to_string(),
        }),
        error: error.map(ToString::to_string),
    }
}

/// Assemble the preference match pipeline.
pub fn create_preference_match_pipeline(llm: Arc<LlmHelpers>, top_k: usize) -> Pipeline {
    Pipeline::new(PREFERENCE_MATCH_PIPELINE)
        .add_node(NODE_SCRAPE, Arc::new(SpecScraperComponent::default()))
        .add_node(
            NODE_COMPAT,
            Arc::new(CompatibilityCheckerComponent::new(llm.clone())),
        )
        .add_node(NODE_RANK, Arc::new(PreferenceRankerComponent::new(llm, top_k)))
}

/// Run the pipeline. Empty input returns `no_products`; oversized input is
/// truncated with a warning; with the LLM service marked unavailable the
/// simple ranking runs directly; a pipeline failure falls back before an
/// error envelope is produced.
pub async fn run_preference_match(
    pipeline: &Pipeline,
    products: &[Product],
    preferences: &BTreeMap<String, String>,
    constraints: &[Constraint],
    context: &str,
    config: &PipelineConfig,
    health: &HealthMonitor,
) -> PreferencePipelineResult {
    if products.is_empty() {
        return PreferencePipelineResult::no_products();
    }

    let products: &[Product] = if products.len() > MAX_INPUT_PRODUCTS {
        tracing::warn!(
            supplied = products.len(),
            truncated_to = MAX_INPUT_PRODUCTS,
            "preference_match_input_truncated"
        );
        &products[..MAX_INPUT_PRODUCTS]
    } else {
        products
    };

    if !health.is_service_available(SERVICE_LLM) {
        tracing::warn!("llm_unavailable_using_fallback_ranking");
        return fallback_preference_ranking(products, config.top_k, None);
    }

    let input = json!({
        "products": products,
        "query_context": context,
        "product_query": context,
        "preferences": preferences,
        "constraints": constraints,
    });

    let outputs = match pipeline.run(input).await {
        Ok(outputs) => outputs,
        Err(error) => {
            tracing::warn!(error = %error, "preference_pipeline_failed_using_fallback");
            health.report_service_error(SERVICE_LLM, &error);
            return fallback_preference_ranking(products, config.top_k, Some(&error.to_string()));
        }
    };

    let Some(rank_output) = outputs.get(NODE_RANK) else {
        return fallback_preference_ranking(products, config.top_k, Some("no ranker output"));
    };

    let ranked_products: Vec<Product> =
        match serde_json::from_value(rank_output["ranked_products"].clone()) {
            Ok(ranked) => ranked,
            Err(error) => {
                return fallback_preference_ranking(
                    products,
                    config.top_k,
                    Some(&format!("malformed ranker output: {error}")),
                )
            }
        };
    let scores: Vec<f64> =
        serde_json::from_value(rank_output["scores"].clone()).unwrap_or_default();
    let ranking_method = rank_output["ranking_method"]
        .as_str()
        .unwrap_or("pipeline")
        .to_string();

    health.report_service_recovery(SERVICE_LLM);

    tracing::info!(
        ranked = ranked_products.len(),
        method = %ranking_method,
        "preference_match_completed"
    );

    PreferencePipelineResult {
        status: PreferenceStatus::Success,
        ranked_products,
        scores,
        ranking_method,
        total_processed: products.len(),
        preferences_applied: preferences.len(),
        message: None,
        error: None,
    }
}
