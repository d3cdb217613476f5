//! Contract workflow states.
//!
//! The purchase workflow is a fixed state set with three terminal sinks.
//! String forms are stable: they appear in the step log, in persisted
//! contexts, and in contract templates.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Enumeration of all contract states.
///
/// `PresentOptions` shares a handler with `RankAndSelect`; the distinction is
/// kept because persisted step logs and templates reference both names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContractState {
    Start,
    Search,
    RefineConstraints,
    AskClarification,
    WaitForPreferences,
    FilterProducts,
    MatchPreferences,
    CheckCompatibility,
    RankAndSelect,
    PresentOptions,
    ConfirmSelection,
    ConfirmOrder,
    Completed,
    Cancelled,
    Failed,
    Error,
}

impl ContractState {
    /// Terminal states end the contract; the FSM never leaves them.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ContractState::Completed | ContractState::Cancelled | ContractState::Failed
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ContractState::Start => "start",
            ContractState::Search => "search",
            ContractState::RefineConstraints => "refine_constraints",
            ContractState::AskClarification => "ask_clarification",
            ContractState::WaitForPreferences => "wait_for_preferences",
            ContractState::FilterProducts => "filter_products",
            ContractState::MatchPreferences => "match_preferences",
            ContractState::CheckCompatibility => "check_compatibility",
            ContractState::RankAndSelect => "rank_and_select",
            ContractState::PresentOptions => "present_options",
            ContractState::ConfirmSelection => "confirm_selection",
            ContractState::ConfirmOrder => "confirm_order",
            ContractState::Completed => "completed",
            ContractState::Cancelled => "cancelled",
            ContractState::Failed => "failed",
            ContractState::Error => "error",
        }
    }

    /// Parse a state name, accepting legacy aliases found in persisted
    /// contexts (`analyze_attributes`, `confirm_purchase`).
    pub fn parse(name: &str) -> Option<Self> {
        let state = match name {
            "start" => ContractState::Start,
            "search" => ContractState::Search,
            "refine_constraints" => ContractState::RefineConstraints,
            "analyze_attributes" => ContractState::RefineConstraints,
            "ask_clarification" => ContractState::AskClarification,
            "wait_for_preferences" => ContractState::WaitForPreferences,
            "collect_preferences" => ContractState::WaitForPreferences,
            "filter_products" => ContractState::FilterProducts,
            "match_preferences" => ContractState::MatchPreferences,
            "check_compatibility" => ContractState::CheckCompatibility,
            "rank_and_select" => ContractState::RankAndSelect,
            "present_options" => ContractState::PresentOptions,
            "confirm_selection" => ContractState::ConfirmSelection,
            "confirm_purchase" => ContractState::ConfirmSelection,
            "confirm_order" => ContractState::ConfirmOrder,
            "completed" => ContractState::Completed,
            "cancelled" => ContractState::Cancelled,
            "failed" => ContractState::Failed,
            "error" => ContractState::Error,
            _ => return None,
        };
        Some(state)
    }
}

impl fmt::Display for ContractState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Overall contract status recorded on the session context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ContractStatus {
    #[default]
    Active,
    Completed,
    Cancelled,
    Failed,
    Error,
}

impl ContractStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContractStatus::Active => "active",
            ContractStatus::Completed => "completed",
            ContractStatus::Cancelled => "cancelled",
            ContractStatus::Failed => "failed",
            ContractStatus::Error => "error",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states() {
        assert!(ContractState::Completed.is_terminal());
        assert!(ContractState::Cancelled.is_terminal());
        assert!(ContractState::Failed.is_terminal());
        assert!(!ContractState::Start.is_terminal());
        assert!(!ContractState::Error.is_terminal());
    }

    #[test]
    fn test_parse_accepts_legacy_aliases() {
        assert_eq!(
            ContractState::parse("analyze_attributes"),
            Some(ContractState::RefineConstraints)
        );
        assert_eq!(
            ContractState::parse("confirm_purchase"),
            Some(ContractState::ConfirmSelection)
        );
        assert_eq!(ContractState::parse("bogus"), None);
    }

    #[test]
    fn test_serde_uses_snake_case() {
        let json = serde_json::to_string(&ContractState::WaitForPreferences).unwrap();
        assert_eq!(json, "\"wait_for_preferences\"");
        let back: ContractState = serde_json::from_str("\"refine_constraints\"").unwrap();
        assert_eq!(back, ContractState::RefineConstraints);
    }

    #[test]
    fn test_round_trip_every_state() {
        for state in [
            ContractState::Start,
            ContractState::Search,
            ContractState::RefineConstraints,
            ContractState::AskClarification,
            ContractState::WaitForPreferences,
            ContractState::FilterProducts,
            ContractState::MatchPreferences,
            ContractState::CheckCompatibility,
            ContractState::RankAndSelect,
            ContractState::PresentOptions,
            ContractState::ConfirmSelection,
            ContractState::ConfirmOrder,
            ContractState::Completed,
            ContractState::Cancelled,
            ContractState::Failed,
            ContractState::Error,
        ] {
            assert_eq!(ContractState::parse(state.as_str()), Some(state));
        }
    }
}
