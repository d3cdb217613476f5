//! User-input parsing: constraints, cancellation, selections.
//!
//! These are the deterministic fallbacks behind the LLM helpers, and the
//! primary parsers for short structured replies (digits, yes/no).

use super::product::Constraint;
use regex::Regex;
use std::collections::BTreeMap;
use std::sync::OnceLock;

/// Keywords that always cancel, checked before any substantive parsing.
pub const CANCEL_KEYWORDS: [&str; 6] = ["cancel", "exit", "stop", "quit", "abort", "nevermind"];

const AFFIRMATIVE_SELECTION: [&str; 5] = ["yes", "y", "ok", "okay", "sure"];
const AFFIRMATIVE_ORDER: [&str; 7] = ["yes", "y", "confirm", "ok", "okay", "proceed", "sure"];
const NEGATIVE_ORDER: [&str; 4] = ["no", "n", "decline", "reject"];

fn price_bound_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        #[allow(clippy::unwrap_used)]
        Regex::new(r"(?:under|below|less than|max|maximum)\s+(\d+)").unwrap()
    })
}

fn price_preference_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        #[allow(clippy::unwrap_used)]
        Regex::new(r"\b(?:below|under|max|maximum)\s*(\d+)\s*(?:chf|francs?)?\b").unwrap()
    })
}

fn capacity_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        #[allow(clippy::unwrap_used)]
        Regex::new(r"\b(?:min|minimum|at\s*least)\s*(\d+)\s*kg\b|\b(\d+)\s*kg\s*(?:or\s*)?(?:more|higher|above)\b")
            .unwrap()
    })
}

fn efficiency_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        #[allow(clippy::unwrap_used)]
        Regex::new(r"\benergy\s*efficiency\s*(?:of\s*)?([a-e])\s*(?:or\s*)?(?:better|higher)\b")
            .unwrap()
    })
}

/// Keyword cancellation check (the fallback behind the LLM cancel helper).
pub fn is_cancel_keyword(input: &str) -> bool {
    let lowered = input.to_lowercase();
    CANCEL_KEYWORDS.iter().any(|kw| lowered.contains(kw))
}

pub fn is_affirmative_selection(input: &str) -> bool {
    AFFIRMATIVE_SELECTION.contains(&input.trim().to_lowercase().as_str())
}

pub fn is_affirmative_order(input: &str) -> bool {
    AFFIRMATIVE_ORDER.contains(&input.trim().to_lowercase().as_str())
}

pub fn is_negative_order(input: &str) -> bool {
    NEGATIVE_ORDER.contains(&input.trim().to_lowercase().as_str())
}

/// Parse free-form refinement input into structured hard constraints.
///
/// Constraints accumulate across refinement rounds; this returns only the
/// constraints found in this round. Input that matches nothing specific
/// becomes a single general `contains` constraint so the round is never
/// silently lost.
pub fn parse_user_constraints(input: &str) -> Vec<Constraint> {
    let lowered = input.to_lowercase();
    let mut constraints = Vec::new();

    if let Some(caps) = price_bound_re().captures(&lowered) {
        if let Ok(max_price) = caps[1].parse::<f64>() {
            constraints.push(Constraint::price_max(max_price));
        }
    }

    for keyword in ["brand", "make", "manufacturer"] {
        if lowered.contains(keyword) {
            let words: Vec<&str> = input.split_whitespace().collect();
            for (i, word) in words.iter().enumerate() {
                if word.to_lowercase().contains(keyword) {
                    if let Some(brand) = words.get(i + 1) {
                        let brand = brand.trim_matches(['.', ',', '!', '?']);
                        if !brand.is_empty() {
                            constraints.push(Constraint::brand(brand));
                        }
                    }
                    break;
                }
            }
            break;
        }
    }

    if constraints.is_empty() {
        constraints.push(Constraint::general(input.trim()));
    }

    constraints
}

/// Regex preference extraction (the fallback behind `analyze_user_preferences`).
///
/// Returns measurable key-value preferences plus qualitative constraint
/// phrases.
pub fn fallback_preference_analysis(input: &str) -> (BTreeMap<String, String>, Vec<String>) {
    let lowered = input.to_lowercase();
    let mut preferences = BTreeMap::new();
    let mut constraints = Vec::new();

    if let Some(caps) = price_preference_re().captures(&lowered) {
        preferences.insert("price".to_string(), format!("below {} CHF", &caps[1]));
    }

    if let Some(caps) = capacity_re().captures(&lowered) {
        let amount = caps.get(1).or_else(|| caps.get(2));
        if let Some(amount) = amount {
            preferences.insert(
                "capacity".to_string(),
                format!("at least {}kg", amount.as_str()),
            );
        }
    }

    if let Some(caps) = efficiency_re().captures(&lowered) {
        preferences.insert(
            "energy_efficiency".to_string(),
            format!("{} or better", caps[1].to_uppercase()),
        );
    }

    if lowered.contains("quiet") {
        constraints.push("quiet operation".to_string());
    }
    if lowered.contains("reliable") {
        constraints.push("reliable brand".to_string());
    }
    if lowered.contains("energy efficient") {
        constraints.push("energy efficient".to_string());
    }

    (preferences, constraints)
}

/// Interpretation of a reply to a numbered option list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionReply {
    /// Take the assistant's recommendation.
    Affirmative,
    /// A 1-based in-range option number.
    Choice(u32),
    /// A digit outside 1..=max.
    OutOfRange(u32),
    /// Anything else.
    Other,
}

pub fn parse_selection(input: &str, max: usize) -> SelectionReply {
    let trimmed = input.trim();
    if is_affirmative_selection(trimmed) {
        return SelectionReply::Affirmative;
    }
    if let Ok(choice) = trimmed.parse::<u32>() {
        if choice >= 1 && (choice as usize) <= max {
            return SelectionReply::Choice(choice);
        }
        return SelectionReply::OutOfRange(choice);
    }
    SelectionReply::Other
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contract::product::Scalar;

    #[test]
    fn test_price_constraint_variants() {
        for input in [
            "under 500",
            "below 500 please",
            "less than 500",
            "max 500",
            "maximum 500 chf",
        ] {
            let constraints = parse_user_constraints(input);
            assert_eq!(constraints[0].kind, "price", "input: {input}");
            assert_eq!(constraints[0].operator, "<=");
            assert_eq!(constraints[0].value, Scalar::Number(500.0));
        }
    }

    #[test]
    fn test_brand_constraint() {
        let constraints = parse_user_constraints("I prefer brand Bosch, nothing else");
        assert!(constraints
            .iter()
            .any(|c| c.kind == "brand" && c.value == Scalar::Text("Bosch".to_string())));
    }

    #[test]
    fn test_general_fallback_constraint() {
        let constraints = parse_user_constraints("something silent for a small flat");
        assert_eq!(constraints.len(), 1);
        assert_eq!(constraints[0].kind, "general");
        assert_eq!(constraints[0].operator, "contains");
    }

    #[test]
    fn test_cancel_keywords() {
        assert!(is_cancel_keyword("CANCEL this"));
        assert!(is_cancel_keyword("please stop"));
        assert!(is_cancel_keyword("nevermind"));
        assert!(!is_cancel_keyword("I want a new laptop"));
    }

    #[test]
    fn test_fallback_preferences() {
        let (prefs, constraints) =
            fallback_preference_analysis("quiet, energy efficiency of B or better, below 1400 CHF");
        assert_eq!(prefs.get("price").map(String::as_str), Some("below 1400 CHF"));
        assert_eq!(
            prefs.get("energy_efficiency").map(String::as_str),
            Some("B or better")
        );
        assert!(constraints.contains(&"quiet operation".to_string()));
    }

    #[test]
    fn test_capacity_preference_both_orders() {
        let (prefs, _) = fallback_preference_analysis("minimum 6kg drum");
        assert_eq!(prefs.get("capacity").map(String::as_str), Some("at least 6kg"));

        let (prefs, _) = fallback_preference_analysis("6kg or more");
        assert_eq!(prefs.get("capacity").map(String::as_str), Some("at least 6kg"));
    }

    #[test]
    fn test_selection_parsing() {
        assert_eq!(parse_selection("yes", 3), SelectionReply::Affirmative);
        assert_eq!(parse_selection(" 2 ", 3), SelectionReply::Choice(2));
        assert_eq!(parse_selection("7", 3), SelectionReply::OutOfRange(7));
        assert_eq!(parse_selection("the red one", 3), SelectionReply::Other);
    }

    #[test]
    fn test_order_keywords() {
        assert!(is_affirmative_order("Proceed"));
        assert!(is_negative_order("decline"));
        assert!(!is_affirmative_order("maybe"));
    }
}
