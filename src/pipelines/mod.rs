//! Stateless data-plane pipelines.
//!
//! A pipeline is a directed acyclic sequence of components. Components are
//! pure functions of their inputs plus injected adapters; each run returns
//! its output document together with an outgoing edge label. The pipeline
//! value owns the node order and exposes the per-node output map.

pub mod components;
pub mod preference_match;
pub mod product_search;
pub mod summariser;

pub use preference_match::{
    create_preference_match_pipeline, fallback_preference_ranking, run_preference_match,
    PreferencePipelineResult, PreferenceStatus, PREFERENCE_MATCH_PIPELINE,
};
pub use product_search::{
    create_product_search_pipeline, run_product_search, SearchPipelineResult, SearchStatus,
    PRODUCT_SEARCH_PIPELINE,
};
pub use summariser::{RollingSummariser, SummarizerModel};

use crate::types::{Error, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Default outgoing edge label for single-output components.
pub const EDGE_OUTPUT: &str = "output_1";

/// A single pipeline node.
///
/// Inputs and outputs are JSON documents; the typed envelopes live at the
/// pipeline boundaries where callers consume them.
#[async_trait]
pub trait Component: Send + Sync + fmt::Debug {
    fn name(&self) -> &'static str;

    async fn run(&self, input: Value) -> Result<(Value, String)>;

    /// Batch variant; the default runs inputs sequentially.
    async fn run_batch(&self, inputs: Vec<Value>) -> Result<Vec<(Value, String)>> {
        let mut outputs = Vec::with_capacity(inputs.len());
        for input in inputs {
            outputs.push(self.run(input).await?);
        }
        Ok(outputs)
    }
}

/// A linear DAG of named components. Output of node k feeds node k+1.
#[derive(Debug, Clone)]
pub struct Pipeline {
    name: String,
    nodes: Vec<(String, Arc<dyn Component>)>,
}

impl Pipeline {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            nodes: Vec::new(),
        }
    }

    pub fn add_node(mut self, node_name: impl Into<String>, component: Arc<dyn Component>) -> Self {
        self.nodes.push((node_name.into(), component));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn node(&self, node_name: &str) -> Option<&Arc<dyn Component>> {
        self.nodes
            .iter()
            .find(|(name, _)| name == node_name)
            .map(|(_, component)| component)
    }

    /// Run the whole pipeline, returning every node's output keyed by node
    /// name. The last node's output is the pipeline result.
    pub async fn run(&self, input: Value) -> Result<BTreeMap<String, Value>> {
        if self.nodes.is_empty() {
            return Err(Error::pipeline(format!("pipeline {} has no nodes", self.name)));
        }

        let mut outputs = BTreeMap::new();
        let mut current = input;
        for (node_name, component) in &self.nodes {
            let started = std::time::Instant::now();
            let (output, edge) = component.run(current.clone()).await.map_err(|e| {
                Error::pipeline(format!(
                    "{}: node {node_name} failed: {e}",
                    self.name
                ))
            })?;
            tracing::debug!(
                pipeline = %self.name,
                node = %node_name,
                edge = %edge,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "pipeline_node_completed"
            );
            outputs.insert(node_name.clone(), output.clone());
            current = output;
        }
        Ok(outputs)
    }

    /// Structure description for diagnostics.
    pub fn info(&self) -> Value {
        serde_json::json!({
            "pipeline_type": self.name,
            "node_count": self.nodes.len(),
            "nodes": self.nodes.iter().map(|(name, c)| {
                serde_json::json!({"name": name, "component": c.name()})
            }).collect::<Vec<_>>(),
        })
    }
}
