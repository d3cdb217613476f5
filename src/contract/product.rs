//! Product records and constraint shapes.
//!
//! Adapter payloads are loosely typed: price and rating arrive as numbers or
//! currency/star-decorated strings depending on the shopping backend. The
//! `Scalar` union keeps the wire shape intact while exposing numeric views
//! for ranking. Missing price ranks as +infinity, missing rating as 0.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Number-or-string wire value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    Number(f64),
    Text(String),
}

impl Scalar {
    /// Numeric view, stripping currency suffixes, thousands separators and
    /// star decorations from string forms.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Scalar::Number(n) => Some(*n),
            Scalar::Text(s) => {
                let cleaned: String = s
                    .replace("CHF", "")
                    .replace('★', "")
                    .replace(',', "")
                    .trim()
                    .to_string();
                cleaned.parse().ok()
            }
        }
    }
}

impl From<f64> for Scalar {
    fn from(n: f64) -> Self {
        Scalar::Number(n)
    }
}

impl From<&str> for Scalar {
    fn from(s: &str) -> Self {
        Scalar::Text(s.to_string())
    }
}

impl std::fmt::Display for Scalar {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Scalar::Number(n) => write!(f, "{n}"),
            Scalar::Text(s) => f.write_str(s),
        }
    }
}

/// A single product record as returned by the shopping adapter and enriched
/// by the preference-match pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Product {
    #[serde(default)]
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price: Option<Scalar>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rating: Option<Scalar>,

    #[serde(default)]
    pub description: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub brand: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub specs: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub availability: Option<String>,

    /// Populated by the spec scraper.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub detailed_specs: BTreeMap<String, String>,

    /// Populated by the spec scraper.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub compatibility_features: Vec<String>,

    /// In-band adapter error marker (tolerated per the adapter interface).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Product {
    /// Ranking view of price: missing or unparseable means +infinity.
    pub fn price_value(&self) -> f64 {
        self.price
            .as_ref()
            .and_then(Scalar::as_f64)
            .unwrap_or(f64::INFINITY)
    }

    /// Ranking view of rating: missing or unparseable means 0.
    pub fn rating_value(&self) -> f64 {
        self.rating
            .as_ref()
            .and_then(Scalar::as_f64)
            .unwrap_or(0.0)
    }

    /// Adapter-level error marker check.
    pub fn is_error_marker(&self) -> bool {
        self.error.is_some()
    }

    /// Sort key for the simple fallback ranker: best rating first, then
    /// lowest price. Usable with `sort_by` + `partial_cmp` because neither
    /// component is NaN.
    pub fn fallback_rank_key(&self) -> (f64, f64) {
        (-self.rating_value(), self.price_value())
    }
}

/// Hard constraint record: `{type, operator, value}` on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Constraint {
    #[serde(rename = "type")]
    pub kind: String,
    pub operator: String,
    pub value: Scalar,
}

impl Constraint {
    pub fn price_max(value: f64) -> Self {
        Self {
            kind: "price".to_string(),
            operator: "<=".to_string(),
            value: Scalar::Number(value),
        }
    }

    pub fn brand(value: impl Into<String>) -> Self {
        Self {
            kind: "brand".to_string(),
            operator: "equals".to_string(),
            value: Scalar::Text(value.into()),
        }
    }

    pub fn general(value: impl Into<String>) -> Self {
        Self {
            kind: "general".to_string(),
            operator: "contains".to_string(),
            value: Scalar::Text(value.into()),
        }
    }
}

/// One line of the numbered option list presented to the user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NumberedProduct {
    pub number: u32,
    pub name: String,
    pub price: String,
    pub key_specs: String,
}

/// The recommendation the assistant attaches to the numbered list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecommendationChoice {
    pub choice: Option<u32>,
    pub reasoning: String,
}

/// Recommendation payload: numbered options plus a suggested pick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    pub numbered_products: Vec<NumberedProduct>,
    pub recommendation: RecommendationChoice,
}

impl Recommendation {
    /// Deterministic recommendation used when the LLM helper is unavailable:
    /// number the first five products and pick the first.
    pub fn fallback(products: &[Product]) -> Self {
        if products.is_empty() {
            return Self {
                numbered_products: Vec::new(),
                recommendation: RecommendationChoice {
                    choice: None,
                    reasoning: "No products available for recommendation".to_string(),
                },
            };
        }

        let numbered_products = products
            .iter()
            .take(5)
            .enumerate()
            .map(|(i, product)| NumberedProduct {
                number: (i + 1) as u32,
                name: if product.name.is_empty() {
                    format!("Product {}", i + 1)
                } else {
                    product.name.clone()
                },
                price: product
                    .price
                    .as_ref()
                    .map(ToString::to_string)
                    .unwrap_or_else(|| "Price not available".to_string()),
                key_specs: if product.description.is_empty() {
                    "Specs not available".to_string()
                } else {
                    product.description.chars().take(100).collect()
                },
            })
            .collect();

        Self {
            numbered_products,
            recommendation: RecommendationChoice {
                choice: Some(1),
                reasoning: "Based on highest rating and best price-to-value ratio".to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn product(name: &str, price: Option<Scalar>, rating: Option<Scalar>) -> Product {
        Product {
            name: name.to_string(),
            price,
            rating,
            ..Product::default()
        }
    }

    #[test]
    fn test_missing_price_ranks_as_infinity() {
        let p = product("a", None, None);
        assert_eq!(p.price_value(), f64::INFINITY);
        assert_eq!(p.rating_value(), 0.0);
    }

    #[test]
    fn test_string_price_is_parsed() {
        let p = product("a", Some("1,299 CHF".into()), Some("4.5★".into()));
        assert_eq!(p.price_value(), 1299.0);
        assert_eq!(p.rating_value(), 4.5);
    }

    #[test]
    fn test_unparseable_price_ranks_as_infinity() {
        let p = product("a", Some("call for price".into()), None);
        assert_eq!(p.price_value(), f64::INFINITY);
    }

    #[test]
    fn test_constraint_wire_shape() {
        let json = serde_json::to_value(Constraint::price_max(500.0)).unwrap();
        assert_eq!(json["type"], "price");
        assert_eq!(json["operator"], "<=");
        assert_eq!(json["value"], 500.0);
    }

    #[test]
    fn test_product_tolerates_numeric_and_string_fields() {
        let from_number: Product =
            serde_json::from_value(serde_json::json!({"name": "x", "price": 10.5, "rating": 4}))
                .unwrap();
        assert_eq!(from_number.price_value(), 10.5);

        let from_text: Product = serde_json::from_value(
            serde_json::json!({"name": "x", "price": "10.50 CHF", "rating": "4.0"}),
        )
        .unwrap();
        assert_eq!(from_text.price_value(), 10.5);
        assert_eq!(from_text.rating_value(), 4.0);
    }

    #[test]
    fn test_fallback_recommendation_picks_first() {
        let rec = Recommendation::fallback(&[
            product("a", Some(Scalar::Number(10.0)), None),
            product("b", None, None),
        ]);
        assert_eq!(rec.numbered_products.len(), 2);
        assert_eq!(rec.recommendation.choice, Some(1));
        assert_eq!(rec.numbered_products[1].price, "Price not available");
    }

    #[test]
    fn test_fallback_recommendation_empty() {
        let rec = Recommendation::fallback(&[]);
        assert!(rec.numbered_products.is_empty());
        assert_eq!(rec.recommendation.choice, None);
    }
}
