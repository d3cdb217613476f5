//! LLM helper contracts.
//!
//! Every helper takes structured input and returns a structured result with
//! a documented deterministic fallback. Helpers never propagate errors to
//! the state machine: a failed call is reported to the health monitor and
//! the fallback result is returned instead.

use super::{complete_with_retry, strip_code_fence, ChatMessage, ChatProvider};
use crate::contract::{Constraint, Product, Recommendation};
use crate::resilience::{HealthMonitor, SERVICE_LLM};
use crate::types::{Error, Result};
use regex::Regex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::{Arc, OnceLock};

/// Attribute names used when product-difference analysis is unavailable.
pub const DEFAULT_ATTRIBUTES: [&str; 6] = [
    "price",
    "brand",
    "capacity",
    "energy_efficiency",
    "size",
    "features",
];

/// Specifications pulled out of an initial purchase request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Specifications {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chip_model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub brand: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price_limit: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub other: Option<String>,
}

/// Result of `extract_initial_criteria`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InitialCriteria {
    pub base_product: String,
    #[serde(default)]
    pub specifications: Specifications,
    #[serde(default)]
    pub search_keywords: Vec<String>,
    pub enhanced_query: String,
}

/// Result of `is_response_relevant`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelevanceCheck {
    pub is_relevant: bool,
    pub confidence: f64,
    pub reason: String,
    pub detected_intent: String,
}

/// Result of `analyze_user_preferences`: measurable soft preferences plus
/// qualitative constraint phrases.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PreferenceAnalysis {
    pub preferences: BTreeMap<String, String>,
    pub constraints: Vec<String>,
}

/// Per-item verdict from `check_product_compatibility`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompatibilityVerdict {
    #[serde(alias = "product_name", alias = "product")]
    pub name: String,
    #[serde(default)]
    pub compatible: bool,
}

#[derive(Debug, Deserialize)]
struct CancelVerdict {
    cancel: bool,
}

/// All LLM-backed helper contracts behind one injectable handle.
#[derive(Debug)]
pub struct LlmHelpers {
    provider: Arc<dyn ChatProvider>,
    model: String,
    max_retries: u32,
    health: Arc<HealthMonitor>,
}

impl LlmHelpers {
    pub fn new(
        provider: Arc<dyn ChatProvider>,
        model: impl Into<String>,
        max_retries: u32,
        health: Arc<HealthMonitor>,
    ) -> Self {
        Self {
            provider,
            model: model.into(),
            max_retries,
            health,
        }
    }

    /// Completion + fence-strip + typed parse. Failures are reported to the
    /// health monitor and bubbled so the caller can branch to its fallback.
    pub(crate) async fn complete_json<T: DeserializeOwned>(&self, prompt: String) -> Result<T> {
        let raw = complete_with_retry(
            self.provider.as_ref(),
            &self.model,
            &[ChatMessage::user(prompt)],
            self.max_retries,
        )
        .await
        .map_err(|error| {
            self.health.report_service_error(SERVICE_LLM, &error);
            error
        })?;

        serde_json::from_str(strip_code_fence(&raw)).map_err(|e| {
            let error = Error::llm(format!("unparseable helper output: {e}"));
            self.health.report_service_error(SERVICE_LLM, &error);
            error
        })
    }

    /// Extract product criteria and specifications from the first utterance.
    pub async fn extract_initial_criteria(&self, user_prompt: &str) -> InitialCriteria {
        let prompt = format!(
            "You are an expert at parsing product purchase requests.\n\n\
             User prompt:\n{user_prompt}\n\n\
             Return a JSON object: {{\"base_product\": \"main product type\", \
             \"specifications\": {{\"chip_model\": null, \"memory\": null, \"storage\": null, \
             \"brand\": null, \"price_limit\": null, \"other\": null}}, \
             \"search_keywords\": [\"terms\"], \
             \"enhanced_query\": \"product type plus key specifications\"}}.\n\
             Return only valid JSON. Do not include markdown or explanations."
        );

        match self.complete_json::<InitialCriteria>(prompt).await {
            Ok(criteria) => criteria,
            Err(error) => {
                tracing::warn!(error = %error, "criteria_extraction_fallback");
                fallback_criteria_extraction(user_prompt)
            }
        }
    }

    /// Whether the input is a cancellation request.
    pub async fn is_cancel_request(&self, input: &str) -> bool {
        let prompt = format!(
            "Does the following message cancel or abandon an in-progress purchase?\n\
             Message: {input}\n\
             Return only JSON: {{\"cancel\": true|false}}."
        );
        match self.complete_json::<CancelVerdict>(prompt).await {
            Ok(verdict) => verdict.cancel,
            Err(_) => crate::contract::parsing::is_cancel_keyword(input),
        }
    }

    /// Whether a reply is on-topic for the question we asked.
    pub async fn is_response_relevant(
        &self,
        user_response: &str,
        expected_context: &str,
        product_context: &str,
    ) -> RelevanceCheck {
        let prompt = format!(
            "We are discussing purchasing a {product_context}.\n\
             EXPECTED RESPONSE TYPE: {expected_context}\n\
             USER'S ACTUAL RESPONSE: {user_response}\n\n\
             Is the response relevant to what we were expecting? Be conservative: \
             if there is any reasonable connection to the purchase, it is relevant.\n\
             Return only JSON: {{\"is_relevant\": true|false, \"confidence\": 0.0, \
             \"reason\": \"\", \"detected_intent\": \"\"}}."
        );

        match self.complete_json::<RelevanceCheck>(prompt).await {
            Ok(check) => check,
            Err(_) => fallback_relevance_check(user_response, product_context),
        }
    }

    /// Key differentiating attribute names for a result set (at most ~7).
    /// Errors bubble so the attribute analyzer can apply its category
    /// heuristics instead.
    pub async fn try_analyze_product_differences(
        &self,
        products: &[Product],
    ) -> Result<Vec<String>> {
        let listing = serde_json::to_string(products).unwrap_or_default();
        let prompt = format!(
            "Analyze these product search results and identify the key differentiating \
             attributes that would help a user decide.\n\n{listing}\n\n\
             Return a JSON list of the top 5-7 attribute names, e.g. \
             [\"price\", \"brand\", \"capacity\"]. Return only valid JSON."
        );

        let attributes: Vec<String> = self.complete_json(prompt).await?;
        if attributes.is_empty() {
            return Err(Error::llm("analyzer returned no attributes"));
        }
        Ok(attributes.into_iter().take(7).collect())
    }

    /// Attribute analysis with the fixed six-attribute default on failure.
    pub async fn analyze_product_differences(&self, products: &[Product]) -> Vec<String> {
        self.try_analyze_product_differences(products)
            .await
            .unwrap_or_else(|_| DEFAULT_ATTRIBUTES.iter().map(|s| s.to_string()).collect())
    }

    /// Extract soft preferences and qualitative constraints from free text.
    pub async fn analyze_user_preferences(
        &self,
        user_input: &str,
        products: &[Product],
    ) -> PreferenceAnalysis {
        let sample = serde_json::to_string(&products.iter().take(5).collect::<Vec<_>>())
            .unwrap_or_default();
        let prompt = format!(
            "Extract structured product preferences and constraints from user input.\n\n\
             User said:\n{user_input}\n\n\
             Representative products:\n{sample}\n\n\
             PREFERENCES are measurable key-value requirements (price, capacity, \
             energy_efficiency, size, power, screen_size, weight). CONSTRAINTS are \
             qualitative phrases ('quiet operation', 'reliable brand').\n\
             Return only JSON: {{\"preferences\": {{}}, \"constraints\": []}}."
        );

        match self.complete_json::<Value>(prompt).await {
            Ok(value) => coerce_preference_analysis(value)
                .unwrap_or_else(|| fallback_preference_analysis_result(user_input)),
            Err(_) => fallback_preference_analysis_result(user_input),
        }
    }

    /// Filter products against preferences and constraints. The returned
    /// list may shrink but never below five when the input has at least
    /// five; a degenerate filter result falls back to the input head.
    pub async fn filter_products_with_llm(
        &self,
        products: &[Product],
        preferences: &BTreeMap<String, String>,
        constraints: &[String],
    ) -> Vec<Product> {
        let prompt = format!(
            "You are an intelligent shopping assistant.\n\
             PREFERENCES: {}\nCONSTRAINTS: {}\n\nProducts:\n{}\n\n\
             Filter the products to the ones that reasonably match. Be flexible; \
             aim for 5-15 qualifying products. Return a JSON list of the qualifying \
             products with all their attributes. Return only valid JSON.",
            serde_json::to_string(preferences).unwrap_or_default(),
            serde_json::to_string(constraints).unwrap_or_default(),
            serde_json::to_string(products).unwrap_or_default(),
        );

        match self.complete_json::<Vec<Product>>(prompt).await {
            Ok(filtered) if filtered.len() >= 5 || products.len() < 5 => filtered,
            Ok(filtered) => {
                tracing::warn!(
                    kept = filtered.len(),
                    "llm_filter_too_aggressive_using_input_head"
                );
                products.iter().take(10).cloned().collect()
            }
            Err(_) => products.iter().take(10).cloned().collect(),
        }
    }

    /// Per-item compatibility verdicts for hard constraints. The fallback is
    /// an empty list, which callers treat as all-compatible.
    pub async fn check_product_compatibility(
        &self,
        products: &[Product],
        constraints: &[Constraint],
        product_type: &str,
    ) -> Vec<CompatibilityVerdict> {
        let prompt = format!(
            "You are a compatibility expert assistant.\n\
             The user is searching for a {product_type} with these constraints:\n{}\n\n\
             Products:\n{}\n\n\
             For each product return whether it is compatible. Return a JSON list of \
             {{\"name\": \"...\", \"compatible\": true|false}}. Return only valid JSON.",
            serde_json::to_string(constraints).unwrap_or_default(),
            serde_json::to_string(products).unwrap_or_default(),
        );

        self.complete_json::<Vec<CompatibilityVerdict>>(prompt)
            .await
            .unwrap_or_default()
    }

    /// Numbered option list plus a recommended pick with reasoning.
    pub async fn generate_product_recommendation(
        &self,
        products: &[Product],
        preferences: &BTreeMap<String, String>,
        constraints: &[Constraint],
    ) -> Recommendation {
        if products.is_empty() {
            return Recommendation::fallback(products);
        }
        let top: Vec<&Product> = products.iter().take(5).collect();
        let prompt = format!(
            "You are an expert product recommendation assistant. Analyze these {} products \
             against the user's preferences and constraints.\n\
             Preferences: {}\nConstraints: {}\n\nProducts:\n{}\n\n\
             Return only JSON: {{\"numbered_products\": [{{\"number\": 1, \"name\": \"\", \
             \"price\": \"\", \"key_specs\": \"\"}}], \"recommendation\": {{\"choice\": 1, \
             \"reasoning\": \"\"}}}}.",
            top.len(),
            serde_json::to_string(preferences).unwrap_or_default(),
            serde_json::to_string(constraints).unwrap_or_default(),
            serde_json::to_string(&top).unwrap_or_default(),
        );

        match self.complete_json::<Recommendation>(prompt).await {
            Ok(recommendation) if !recommendation.numbered_products.is_empty() => recommendation,
            _ => Recommendation::fallback(products),
        }
    }
}

// =============================================================================
// Deterministic fallbacks
// =============================================================================

fn product_type_re() -> &'static [(&'static str, &'static str)] {
    &[
        (r"\b(graphics?\s*cards?|gpu)\b", "graphics card"),
        (r"\b(laptops?|notebooks?)\b", "laptop"),
        (r"\b(smartphones?|phones?|iphones?)\b", "smartphone"),
        (r"\b(washing\s*machines?)\b", "washing machine"),
        (r"\b(processors?|cpus?)\b", "processor"),
    ]
}

fn spec_res() -> &'static [(&'static str, &'static str)] {
    &[
        ("chip_model", r"\b(rtx\s*\d+|gtx\s*\d+|rx\s*\d+)\b"),
        ("memory", r"\b(\d+\s*gb\s*ram|\d+gb\s*memory|\d+\s*gb)\b"),
        ("storage", r"\b(\d+\s*gb\s*storage|\d+\s*tb|\d+gb\s*ssd)\b"),
        ("price_limit", r"\b(under\s*\d+|below\s*\d+|max\s*\d+|\d+\s*chf)\b"),
    ]
}

/// Regex criteria extraction over a known product taxonomy.
pub fn fallback_criteria_extraction(user_prompt: &str) -> InitialCriteria {
    static PRODUCT_PATTERNS: OnceLock<Vec<(Regex, &'static str)>> = OnceLock::new();
    static SPEC_PATTERNS: OnceLock<Vec<(&'static str, Regex)>> = OnceLock::new();

    let product_patterns = PRODUCT_PATTERNS.get_or_init(|| {
        product_type_re()
            .iter()
            .filter_map(|(pattern, label)| Regex::new(pattern).ok().map(|re| (re, *label)))
            .collect()
    });
    let spec_patterns = SPEC_PATTERNS.get_or_init(|| {
        spec_res()
            .iter()
            .filter_map(|(field, pattern)| Regex::new(pattern).ok().map(|re| (*field, re)))
            .collect()
    });

    let lowered = user_prompt.to_lowercase();
    let base_product = product_patterns
        .iter()
        .find(|(re, _)| re.is_match(&lowered))
        .map(|(_, label)| label.to_string())
        .unwrap_or_else(|| "product".to_string());

    let mut specifications = Specifications::default();
    let mut search_keywords = Vec::new();
    for (field, re) in spec_patterns {
        if let Some(caps) = re.captures(&lowered) {
            let value = caps[1].to_string();
            search_keywords.push(value.clone());
            match *field {
                "chip_model" => specifications.chip_model = Some(value),
                "memory" => specifications.memory = Some(value),
                "storage" => specifications.storage = Some(value),
                "price_limit" => specifications.price_limit = Some(value),
                _ => {}
            }
        }
    }

    let enhanced_query = if search_keywords.is_empty() {
        base_product.clone()
    } else {
        format!("{base_product} {}", search_keywords.join(" "))
    };

    InitialCriteria {
        base_product,
        specifications,
        search_keywords,
        enhanced_query,
    }
}

/// Pattern catalog of clearly unrelated domains.
fn fallback_relevance_check(user_response: &str, product_context: &str) -> RelevanceCheck {
    static UNRELATED: OnceLock<Vec<Regex>> = OnceLock::new();
    let patterns = UNRELATED.get_or_init(|| {
        [
            r"\b(who|what|when|where|why)\s+(is|was|are|were)\b",
            r"\b(weather|temperature|climate)\b",
            r"\b(politics|politician|president|chancellor)\b",
            r"\b(quantum|physics|chemistry|biology)\b",
            r"\b(recipe|cooking|food)\b",
        ]
        .iter()
        .filter_map(|pattern| Regex::new(pattern).ok())
        .collect()
    });

    let lowered = user_response.to_lowercase();
    for pattern in patterns {
        if pattern.is_match(&lowered) {
            return RelevanceCheck {
                is_relevant: false,
                confidence: 0.8,
                reason: "Response appears to be about unrelated topics".to_string(),
                detected_intent: "asking about unrelated topic".to_string(),
            };
        }
    }

    // A request to buy a different product category mid-flow is off-topic.
    let other_products = ["washing machine", "laptop", "smartphone", "tablet", "monitor"];
    for other in other_products {
        if lowered.contains(other)
            && lowered.contains("buy")
            && !product_context.to_lowercase().contains(other)
        {
            return RelevanceCheck {
                is_relevant: false,
                confidence: 0.9,
                reason: format!("User wants to buy {other} instead of {product_context}"),
                detected_intent: format!("wants to purchase {other}"),
            };
        }
    }

    RelevanceCheck {
        is_relevant: true,
        confidence: 0.6,
        reason: "No clear irrelevant patterns detected".to_string(),
        detected_intent: "likely relevant to purchase context".to_string(),
    }
}

fn fallback_preference_analysis_result(user_input: &str) -> PreferenceAnalysis {
    let (preferences, constraints) =
        crate::contract::parsing::fallback_preference_analysis(user_input);
    PreferenceAnalysis {
        preferences,
        constraints,
    }
}

/// Coerce loosely-shaped model output into the frozen analysis schema.
/// Non-map preferences and non-list constraints are invalid shapes.
fn coerce_preference_analysis(value: Value) -> Option<PreferenceAnalysis> {
    let map = value.as_object()?;
    let preferences = map.get("preferences")?.as_object()?;
    let constraints = map.get("constraints")?.as_array()?;

    let preferences = preferences
        .iter()
        .map(|(key, value)| {
            let rendered = match value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            (key.clone(), rendered)
        })
        .collect();
    let constraints = constraints
        .iter()
        .filter_map(|value| value.as_str().map(ToString::to_string))
        .collect();

    Some(PreferenceAnalysis {
        preferences,
        constraints,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::NullChatProvider;
    use serde_json::json;

    fn helpers() -> LlmHelpers {
        LlmHelpers::new(
            Arc::new(NullChatProvider),
            "test-model",
            0,
            Arc::new(HealthMonitor::new(100)),
        )
    }

    fn product(name: &str) -> Product {
        Product {
            name: name.to_string(),
            ..Product::default()
        }
    }

    #[test]
    fn test_fallback_criteria_extraction() {
        let criteria =
            fallback_criteria_extraction("I need a graphics card with RTX 4070 under 800 CHF");
        assert_eq!(criteria.base_product, "graphics card");
        assert_eq!(criteria.specifications.chip_model.as_deref(), Some("rtx 4070"));
        assert!(criteria.enhanced_query.starts_with("graphics card"));
    }

    #[test]
    fn test_fallback_criteria_unknown_product() {
        let criteria = fallback_criteria_extraction("buy me something nice");
        assert_eq!(criteria.base_product, "product");
        assert_eq!(criteria.enhanced_query, "product");
    }

    #[test]
    fn test_fallback_relevance_flags_unrelated_topics() {
        let check = fallback_relevance_check("Who was Gerhard Schroeder?", "graphics card");
        assert!(!check.is_relevant);

        let check = fallback_relevance_check("I want to buy a washing machine", "graphics card");
        assert!(!check.is_relevant);

        let check = fallback_relevance_check("under 500 CHF please", "graphics card");
        assert!(check.is_relevant);
    }

    #[test]
    fn test_coerce_preference_analysis_shapes() {
        let parsed = coerce_preference_analysis(json!({
            "preferences": {"price": "below 1400 CHF", "capacity": 6},
            "constraints": ["quiet operation"]
        }))
        .unwrap();
        assert_eq!(parsed.preferences["price"], "below 1400 CHF");
        assert_eq!(parsed.preferences["capacity"], "6");
        assert_eq!(parsed.constraints, vec!["quiet operation"]);

        // Invalid shapes are rejected so the regex fallback fires.
        assert!(coerce_preference_analysis(json!({"preferences": [], "constraints": []})).is_none());
    }

    #[tokio::test]
    async fn test_helpers_fall_back_without_provider() {
        let helpers = helpers();

        assert!(helpers.is_cancel_request("cancel the order").await);
        assert!(!helpers.is_cancel_request("blue one please").await);

        let attributes = helpers.analyze_product_differences(&[product("a")]).await;
        assert_eq!(attributes.len(), DEFAULT_ATTRIBUTES.len());

        let analysis = helpers
            .analyze_user_preferences("quiet, below 800 CHF", &[product("a")])
            .await;
        assert_eq!(
            analysis.preferences.get("price").map(String::as_str),
            Some("below 800 CHF")
        );

        let verdicts = helpers
            .check_product_compatibility(&[product("a")], &[], "gpu")
            .await;
        assert!(verdicts.is_empty());
    }

    #[tokio::test]
    async fn test_filter_fallback_keeps_input_head() {
        let helpers = helpers();
        let products: Vec<Product> = (0..15).map(|i| product(&format!("p{i}"))).collect();
        let filtered = helpers
            .filter_products_with_llm(&products, &BTreeMap::new(), &[])
            .await;
        assert_eq!(filtered.len(), 10);
        assert_eq!(filtered[0].name, "p0");
    }

    #[tokio::test]
    async fn test_recommendation_fallback_numbers_products() {
        let helpers = helpers();
        let recommendation = helpers
            .generate_product_recommendation(
                &[product("a"), product("b")],
                &BTreeMap::new(),
                &[],
            )
            .await;
        assert_eq!(recommendation.numbered_products.len(), 2);
        assert_eq!(recommendation.recommendation.choice, Some(1));
    }

    #[tokio::test]
    async fn test_llm_failures_feed_health_monitor() {
        let health = Arc::new(HealthMonitor::new(3));
        let helpers = LlmHelpers::new(
            Arc::new(NullChatProvider),
            "test-model",
            0,
            health.clone(),
        );

        for _ in 0..3 {
            let _ = helpers.analyze_product_differences(&[product("a")]).await;
        }
        assert!(!health.is_service_available(SERVICE_LLM));
        assert_eq!(
            health.operation_mode(),
            crate::resilience::OperationMode::Degraded
        );
    }
}
