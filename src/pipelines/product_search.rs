//! Product search pipeline: Search -> AttributeAnalyzer -> ResultLimiter.
//!
//! The caller supplies a query (hard constraints travel on the session
//! context, not through the pipeline); the pipeline is stateless and returns
//! a tagged envelope with bit-stable keys.

use super::components::{AttributeAnalyzerComponent, ResultLimiterComponent, SearchComponent};
use super::Pipeline;
use crate::contract::Product;
use crate::llm::LlmHelpers;
use crate::resilience::{HealthMonitor, SERVICE_PRODUCT_SEARCH};
use crate::stores::ShoppingAdapter;
use crate::types::PipelineConfig;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;

pub const PRODUCT_SEARCH_PIPELINE: &str = "product_search_pipeline";

const NODE_SEARCH: &str = "search";
const NODE_ANALYZE: &str = "analyze_attributes";
const NODE_LIMIT: &str = "limit_results";

/// Search envelope status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchStatus {
    Ok,
    TooManyResults,
    Error,
}

/// Result envelope of the product search pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchPipelineResult {
    pub status: SearchStatus,
    #[serde(default)]
    pub items: Vec<Product>,
    #[serde(default)]
    pub attributes: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_found: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_allowed: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SearchPipelineResult {
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: SearchStatus::Error,
            items: Vec::new(),
            attributes: Vec::new(),
            total_found: None,
            max_allowed: None,
            error: Some(message.into()),
        }
    }

    pub fn to_value(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_else(|_| json!({"status": "error"}))
    }
}

/// Assemble the product search pipeline.
pub fn create_product_search_pipeline(
    adapter: Arc<dyn ShoppingAdapter>,
    llm: Arc<LlmHelpers>,
    config: &PipelineConfig,
) -> Pipeline {
    Pipeline::new(PRODUCT_SEARCH_PIPELINE)
        .add_node(NODE_SEARCH, Arc::new(SearchComponent::new(adapter)))
        .add_node(
            NODE_ANALYZE,
            Arc::new(AttributeAnalyzerComponent::new(
                llm,
                config.attribute_cache_ttl,
            )),
        )
        .add_node(
            NODE_LIMIT,
            Arc::new(ResultLimiterComponent::new(config.max_search_results)),
        )
}

/// Run the pipeline for a query. Failures become an error envelope, never a
/// raised error, and feed the health monitor; an ok result reports recovery.
pub async fn run_product_search(
    pipeline: &Pipeline,
    query: &str,
    health: &HealthMonitor,
) -> SearchPipelineResult {
    let outputs = match pipeline.run(json!({"query": query})).await {
        Ok(outputs) => outputs,
        Err(error) => {
            tracing::error!(query, error = %error, "product_search_pipeline_failed");
            health.report_service_error(SERVICE_PRODUCT_SEARCH, &error);
            return SearchPipelineResult::error(error.to_string());
        }
    };

    let Some(final_output) = outputs.get(NODE_LIMIT) else {
        return SearchPipelineResult::error("pipeline produced no limiter output");
    };

    match serde_json::from_value::<SearchPipelineResult>(final_output.clone()) {
        Ok(result) => {
            match result.status {
                SearchStatus::Error => {
                    let error = crate::types::Error::pipeline(
                        result.error.clone().unwrap_or_else(|| "search error".into()),
                    );
                    health.report_service_error(SERVICE_PRODUCT_SEARCH, &error);
                }
                _ => health.report_service_recovery(SERVICE_PRODUCT_SEARCH),
            }
            result
        }
        Err(error) => SearchPipelineResult::error(format!("malformed envelope: {error}")),
    }
}
