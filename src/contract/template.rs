//! Contract templates.
//!
//! A template is a declarative JSON document consumed once at FSM
//! construction. Schema violations are fatal for the session: the state
//! machine is initialised straight into its error sink.

use super::transition::{ContractUpdates, Subtask};
use crate::types::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::path::Path;

/// Parameter names the state machine reads from a template.
pub const PARAM_PRODUCT: &str = "product";
pub const PARAM_SESSION_ID: &str = "session_id";
pub const PARAM_PRODUCT_THRESHOLD: &str = "product_threshold";
pub const PARAM_EXTRACTED_ATTRIBUTES: &str = "extracted_attributes";
pub const PARAM_PREFERENCES: &str = "preferences";
pub const PARAM_CONSTRAINTS: &str = "constraints";
pub const PARAM_INITIAL_CRITERIA: &str = "initial_criteria";
pub const PARAM_PARSED_SPECIFICATIONS: &str = "parsed_specifications";
pub const PARAM_ENHANCED_QUERY: &str = "enhanced_query";

const DEFAULT_PRODUCT_THRESHOLD: usize = 10;

/// Declarative contract template.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContractTemplate {
    pub contract_type: String,
    pub version: String,
    pub description: String,
    #[serde(default)]
    pub parameters: BTreeMap<String, Value>,
    #[serde(default)]
    pub subtasks: Vec<Value>,
}

fn template_schema() -> Value {
    json!({
        "type": "object",
        "required": ["contract_type", "version", "description", "parameters", "subtasks"],
        "properties": {
            "contract_type": {"type": "string", "minLength": 1},
            "version": {"type": "string", "minLength": 1},
            "description": {"type": "string"},
            "parameters": {"type": "object"},
            "subtasks": {"type": "array"}
        }
    })
}

impl ContractTemplate {
    /// Load and validate a template from disk.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| Error::template_load(format!("cannot read {}: {e}", path.display())))?;
        let value: Value = serde_json::from_str(&raw)
            .map_err(|e| Error::template_load(format!("cannot parse {}: {e}", path.display())))?;
        Self::parse(value)
    }

    /// Validate and deserialize an already-parsed template document.
    pub fn parse(value: Value) -> Result<Self> {
        let validator = jsonschema::validator_for(&template_schema())
            .map_err(|e| Error::template_load(format!("template schema is invalid: {e}")))?;
        if let Err(err) = validator.validate(&value) {
            return Err(Error::template_load(format!(
                "template schema violation: {err}"
            )));
        }
        serde_json::from_value(value)
            .map_err(|e| Error::template_load(format!("template shape mismatch: {e}")))
    }

    /// The built-in purchase workflow template, used when no template file is
    /// configured (tests, REPL).
    pub fn purchase_item() -> Self {
        Self {
            contract_type: "purchase_item".to_string(),
            version: "1.0".to_string(),
            description: "Guided product purchase: search, refine, rank, confirm".to_string(),
            parameters: BTreeMap::from([
                (PARAM_PRODUCT.to_string(), Value::Null),
                (PARAM_SESSION_ID.to_string(), Value::Null),
                (
                    PARAM_PRODUCT_THRESHOLD.to_string(),
                    Value::from(DEFAULT_PRODUCT_THRESHOLD),
                ),
                (PARAM_EXTRACTED_ATTRIBUTES.to_string(), json!([])),
                (PARAM_PREFERENCES.to_string(), json!({})),
                (PARAM_CONSTRAINTS.to_string(), json!([])),
                (PARAM_INITIAL_CRITERIA.to_string(), Value::Null),
                (PARAM_PARSED_SPECIFICATIONS.to_string(), json!({})),
                (PARAM_ENHANCED_QUERY.to_string(), Value::Null),
            ]),
            subtasks: Vec::new(),
        }
    }
}

/// Runtime contract instance derived from a template: the template document
/// plus parameters filled at dispatch time and subtasks recorded as the
/// workflow progresses.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Contract {
    pub contract_type: String,
    pub version: String,
    pub description: String,
    pub parameters: BTreeMap<String, Value>,
    pub subtasks: Vec<Subtask>,
    pub status: String,
    #[serde(default)]
    pub order_confirmed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl Contract {
    pub fn from_template(template: &ContractTemplate) -> Self {
        Self {
            contract_type: template.contract_type.clone(),
            version: template.version.clone(),
            description: template.description.clone(),
            parameters: template.parameters.clone(),
            subtasks: Vec::new(),
            status: "active".to_string(),
            order_confirmed: false,
            completed_at: None,
            updated_at: Utc::now(),
        }
    }

    /// Merge caller-supplied parameters into the contract.
    pub fn fill_parameters(&mut self, params: BTreeMap<String, Value>) {
        for (key, value) in params {
            self.parameters.insert(key, value);
        }
        self.updated_at = Utc::now();
    }

    /// Apply the contract-side half of a state transition.
    pub fn apply_updates(&mut self, updates: ContractUpdates) {
        self.subtasks.extend(updates.subtasks);
        if let Some(status) = updates.status {
            self.status = status;
        }
        if let Some(confirmed) = updates.order_confirmed {
            self.order_confirmed = confirmed;
        }
        if let Some(completed_at) = updates.completed_at {
            self.completed_at = Some(completed_at);
        }
        self.updated_at = Utc::now();
    }

    /// Result-set size above which the workflow detours through attribute
    /// analysis instead of ranking directly.
    pub fn product_threshold(&self) -> usize {
        self.parameters
            .get(PARAM_PRODUCT_THRESHOLD)
            .and_then(Value::as_u64)
            .map(|v| v as usize)
            .unwrap_or(DEFAULT_PRODUCT_THRESHOLD)
    }

    pub fn parameter_str(&self, name: &str) -> Option<&str> {
        self.parameters.get(name).and_then(Value::as_str)
    }

    /// True when a subtask with the given id completed.
    pub fn subtask_completed(&self, id: &str) -> bool {
        self.subtasks
            .iter()
            .any(|subtask| subtask.id == id && subtask.status == "completed")
    }

    /// Artifact projection written at completion.
    pub fn to_value(&self) -> Result<Value> {
        Ok(serde_json::to_value(self)?)
    }
}
