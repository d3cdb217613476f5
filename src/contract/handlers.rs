//! State handlers.
//!
//! One handler per state. Handlers read the session context and call the
//! injected collaborators (pipelines, LLM helpers, audit store) but never
//! mutate the context directly: every effect travels back inside the
//! returned `StateTransition` and is applied by the state machine.

use super::parsing::{self, SelectionReply};
use super::product::{Constraint, Product};
use super::states::{ContractState, ContractStatus};
use super::transition::{
    ContextUpdates, ContractUpdates, PipelineInvocation, StateTransition, Subtask,
};
use super::{ContractStateMachine, MAX_REFINEMENT_ATTEMPTS};
use crate::pipelines::{
    run_preference_match, run_product_search, PreferenceStatus, SearchStatus,
    PREFERENCE_MATCH_PIPELINE, PRODUCT_SEARCH_PIPELINE,
};
use chrono::Utc;
use serde_json::Value;
use std::time::Instant;

const CANCEL_SENTENCE: &str = "Purchase cancelled. Is there anything else I can help you with?";
const ORDER_CANCEL_SENTENCE: &str = "Order cancelled. Is there anything else I can help you with?";

impl ContractStateMachine {
    /// Cancel detection runs before any substantive parsing in every
    /// input-accepting handler; an affirmative always wins.
    async fn cancel_transition(&self, input: Option<&str>) -> Option<StateTransition> {
        let input = input?;
        if input.is_empty() {
            return None;
        }
        if self.services().llm.is_cancel_request(input).await {
            tracing::info!(session_id = %self.context.session_id, "purchase_cancelled_by_user");
            return Some(StateTransition::cancellation(CANCEL_SENTENCE));
        }
        None
    }

    fn active_query(&self) -> Option<String> {
        self.context
            .enhanced_query
            .clone()
            .or_else(|| self.context.product_query.clone())
    }

    // -------------------------------------------------------------------------
    // start
    // -------------------------------------------------------------------------

    pub(super) fn handle_start(&self, _input: Option<&str>) -> StateTransition {
        if self.context.product_query.is_none() {
            tracing::warn!(
                session_id = %self.context.session_id,
                "product_not_set_in_start"
            );
            return StateTransition::ask("What product are you looking for?");
        }
        StateTransition::success(ContractState::Search)
    }

    // -------------------------------------------------------------------------
    // search
    // -------------------------------------------------------------------------

    pub(super) async fn handle_search(&self, _input: Option<&str>) -> StateTransition {
        let Some(query) = self.active_query() else {
            return StateTransition::failure("No product specified for search.");
        };

        let started = Instant::now();
        let result =
            run_product_search(&self.services().product_search, &query, &self.services().health)
                .await;
        let invocation = PipelineInvocation {
            pipeline: PRODUCT_SEARCH_PIPELINE.to_string(),
            status: match result.status {
                SearchStatus::Error => "error".to_string(),
                SearchStatus::TooManyResults => "too_many_results".to_string(),
                SearchStatus::Ok => "ok".to_string(),
            },
            result: result.to_value(),
            execution_time: started.elapsed().as_secs_f64(),
        };

        let display_query = self.context.product_query.clone().unwrap_or(query.clone());

        match result.status {
            SearchStatus::Error => {
                tracing::error!(
                    session_id = %self.context.session_id,
                    error = result.error.as_deref().unwrap_or("unknown"),
                    "product_search_failed"
                );
                let mut transition = StateTransition::ask(format!(
                    "I encountered an error while searching for '{display_query}'. \
                     Could you try again or rephrase your request?"
                ));
                transition.pipeline_invocations.push(invocation);
                transition
            }
            SearchStatus::TooManyResults => {
                if self.context.refinement_attempts >= MAX_REFINEMENT_ATTEMPTS {
                    // Refinement is exhausted: proceed with a truncated raw
                    // result set instead of looping.
                    return self.search_with_truncation(&query, invocation).await;
                }
                tracing::info!(
                    session_id = %self.context.session_id,
                    total_found = result.total_found.unwrap_or(0),
                    "too_many_results_refining"
                );
                let message = self.refinement_message(&result.attributes, &display_query);
                let mut transition = StateTransition::ask(message);
                transition.next_state = Some(ContractState::RefineConstraints);
                transition.context_updates = ContextUpdates {
                    search_results: Some(result.items),
                    extracted_attributes: Some(result.attributes),
                    ..ContextUpdates::default()
                };
                transition.tools_used = vec![PRODUCT_SEARCH_PIPELINE.to_string()];
                transition.pipeline_invocations.push(invocation);
                transition
            }
            SearchStatus::Ok if result.items.is_empty() => {
                tracing::warn!(
                    session_id = %self.context.session_id,
                    query = %display_query,
                    "no_products_found"
                );
                let mut transition = StateTransition::ask(format!(
                    "I couldn't find any products matching '{display_query}'. Could you try \
                     a different search term or be more specific?"
                ));
                transition.pipeline_invocations.push(invocation);
                transition
            }
            SearchStatus::Ok => {
                let threshold = self.contract().product_threshold();
                let next_state = if result.items.len() > threshold {
                    // Large (but in-bounds) sets detour through preference
                    // collection before ranking.
                    ContractState::AskClarification
                } else {
                    ContractState::PresentOptions
                };
                tracing::info!(
                    session_id = %self.context.session_id,
                    found = result.items.len(),
                    threshold,
                    next = %next_state,
                    "search_completed"
                );
                let mut transition = StateTransition::success(next_state);
                transition.context_updates = ContextUpdates {
                    search_results: Some(result.items),
                    extracted_attributes: Some(result.attributes),
                    ..ContextUpdates::default()
                };
                transition.tools_used = vec![PRODUCT_SEARCH_PIPELINE.to_string()];
                transition.pipeline_invocations.push(invocation);
                transition
            }
        }
    }

    /// Refinement exhausted: pull the raw adapter results through the search
    /// node alone, truncate to the limiter bound, and continue.
    async fn search_with_truncation(
        &self,
        query: &str,
        invocation: PipelineInvocation,
    ) -> StateTransition {
        let max = self.services().config.pipeline.max_search_results;
        let raw = match self.services().product_search.node("search") {
            Some(component) => component.run(serde_json::json!({"query": query})).await,
            None => {
                return StateTransition::failure("search node missing from pipeline");
            }
        };

        let mut products: Vec<Product> = match raw {
            Ok((output, _)) => serde_json::from_value(output["products"].clone()).unwrap_or_default(),
            Err(error) => {
                tracing::error!(error = %error, "truncation_search_failed");
                Vec::new()
            }
        };
        if products.is_empty() {
            return StateTransition::failure(
                "Search kept returning too many results and refinement is exhausted.",
            );
        }
        products.truncate(max);

        tracing::info!(
            session_id = %self.context.session_id,
            kept = products.len(),
            "refinement_exhausted_proceeding_truncated"
        );
        let mut transition = StateTransition::success(ContractState::AskClarification)
            .with_message("That's still a lot of options; let me work with the closest matches.");
        transition.context_updates = ContextUpdates {
            search_results: Some(products),
            ..ContextUpdates::default()
        };
        transition.tools_used = vec![PRODUCT_SEARCH_PIPELINE.to_string()];
        transition.pipeline_invocations.push(invocation);
        transition
    }

    fn refinement_message(&self, attributes: &[String], query: &str) -> String {
        if attributes.is_empty() {
            format!(
                "I found many results for '{query}'. Could you provide more specific \
                 criteria like brand, price range, features, or other requirements to \
                 help narrow down the options?"
            )
        } else {
            let examples = attributes
                .iter()
                .take(3)
                .cloned()
                .collect::<Vec<_>>()
                .join(", ");
            format!(
                "I found many results for '{query}'. To help narrow down the options, \
                 could you provide more specific criteria? For example: {examples}, or \
                 any other requirements you have."
            )
        }
    }

    // -------------------------------------------------------------------------
    // refine_constraints
    // -------------------------------------------------------------------------

    pub(super) async fn handle_refine_constraints(&self, input: Option<&str>) -> StateTransition {
        let Some(input) = input.filter(|input| !input.trim().is_empty()) else {
            let query = self.context.product_query.clone().unwrap_or_default();
            return StateTransition::ask(
                self.refinement_message(&self.context.extracted_attributes, &query),
            );
        };

        if let Some(cancel) = self.cancel_transition(Some(input)).await {
            return cancel;
        }

        let new_constraints = parsing::parse_user_constraints(input);
        let mut constraints = self.context.constraints.clone();
        constraints.extend(new_constraints);
        let attempts = (self.context.refinement_attempts + 1).min(MAX_REFINEMENT_ATTEMPTS);

        tracing::info!(
            session_id = %self.context.session_id,
            constraints = constraints.len(),
            attempt = attempts,
            "constraints_refined_rerunning_search"
        );

        let mut transition = StateTransition::success(ContractState::Search)
            .with_message("Let me search again with your additional criteria...");
        transition.context_updates = ContextUpdates {
            constraints: Some(constraints),
            refinement_attempts: Some(attempts),
            ..ContextUpdates::default()
        };
        transition
    }

    // -------------------------------------------------------------------------
    // ask_clarification / wait_for_preferences
    // -------------------------------------------------------------------------

    pub(super) fn handle_ask_clarification(&self, _input: Option<&str>) -> StateTransition {
        let query = self.context.product_query.clone().unwrap_or_default();
        let message = if self.context.extracted_attributes.is_empty() {
            format!(
                "I found many options for '{query}'. Could you tell me more about what \
                 you're looking for? For example, your budget, preferred brand, or \
                 specific features?"
            )
        } else {
            format!(
                "I found many options for '{query}'. To help narrow down the search, \
                 could you tell me your preferences for: {}? For example, what's your \
                 budget, preferred brand, or specific features you need?",
                self.context.extracted_attributes.join(", ")
            )
        };

        let mut transition = StateTransition::ask(message);
        transition.next_state = Some(ContractState::WaitForPreferences);
        transition
    }

    pub(super) async fn handle_wait_for_preferences(&self, input: Option<&str>) -> StateTransition {
        let Some(input) = input.filter(|input| !input.trim().is_empty()) else {
            return StateTransition::ask(
                "Could you please tell me your preferences? For example, your budget, \
                 preferred brand, or specific features you need.",
            );
        };

        if let Some(cancel) = self.cancel_transition(Some(input)).await {
            return cancel;
        }

        let product = self.context.product_query.as_deref().unwrap_or("product");
        let relevance = self
            .services()
            .llm
            .is_response_relevant(input, "product criteria and specifications", product)
            .await;
        if !relevance.is_relevant {
            tracing::info!(
                session_id = %self.context.session_id,
                intent = %relevance.detected_intent,
                "off_topic_preference_reply"
            );
            return StateTransition::ask(format!(
                "I didn't understand your response in the context of finding {product}. \
                 Could you please provide criteria like brand, price range, or features? \
                 Or type 'cancel' to exit this purchase."
            ));
        }

        let analysis = self
            .services()
            .llm
            .analyze_user_preferences(input, &self.context.search_results)
            .await;

        // Qualitative phrases accumulate onto the hard-constraint list.
        let mut constraints = self.context.constraints.clone();
        constraints.extend(analysis.constraints.iter().map(Constraint::general));

        tracing::info!(
            session_id = %self.context.session_id,
            preferences = analysis.preferences.len(),
            constraints = constraints.len(),
            "preferences_recorded"
        );

        let wants_compatibility = ["compatible", "compatibility", "works with", "fits"]
            .iter()
            .any(|kw| input.to_lowercase().contains(kw));
        let next_state = if wants_compatibility && !constraints.is_empty() {
            ContractState::CheckCompatibility
        } else {
            ContractState::MatchPreferences
        };

        let mut transition = StateTransition::success(next_state);
        transition.context_updates = ContextUpdates {
            preferences: Some(analysis.preferences),
            constraints: Some(constraints),
            ..ContextUpdates::default()
        };
        transition.tools_used = vec!["analyze_user_preferences".to_string()];
        transition
    }

    // -------------------------------------------------------------------------
    // filter_products / check_compatibility (legacy path)
    // -------------------------------------------------------------------------

    pub(super) async fn handle_filter_products(&self, _input: Option<&str>) -> StateTransition {
        if self.context.preferences.is_empty() && self.context.constraints.is_empty() {
            return StateTransition::success(ContractState::MatchPreferences);
        }

        let qualitative: Vec<String> = self
            .context
            .constraints
            .iter()
            .map(|constraint| format!("{} {} {}", constraint.kind, constraint.operator, constraint.value))
            .collect();
        let filtered = self
            .services()
            .llm
            .filter_products_with_llm(
                &self.context.search_results,
                &self.context.preferences,
                &qualitative,
            )
            .await;

        tracing::info!(
            session_id = %self.context.session_id,
            remaining = filtered.len(),
            "products_filtered"
        );
        let mut transition = StateTransition::success(ContractState::MatchPreferences);
        transition.context_updates = ContextUpdates {
            search_results: Some(filtered),
            ..ContextUpdates::default()
        };
        transition.tools_used = vec!["filter_products_with_llm".to_string()];
        transition
    }

    pub(super) async fn handle_check_compatibility(&self, _input: Option<&str>) -> StateTransition {
        let product = self.context.product_query.as_deref().unwrap_or("product");
        let verdicts = self
            .services()
            .llm
            .check_product_compatibility(
                &self.context.search_results,
                &self.context.constraints,
                product,
            )
            .await;

        let mut transition = StateTransition::success(ContractState::PresentOptions);
        if verdicts.is_empty() {
            // Treat all as compatible when the check is unavailable.
            tracing::warn!(
                session_id = %self.context.session_id,
                "compatibility_check_unavailable"
            );
            return transition;
        }

        let compatible: Vec<Product> = self
            .context
            .search_results
            .iter()
            .filter(|product| {
                verdicts
                    .iter()
                    .find(|verdict| verdict.name == product.name)
                    .map(|verdict| verdict.compatible)
                    .unwrap_or(true)
            })
            .cloned()
            .collect();

        tracing::info!(
            session_id = %self.context.session_id,
            compatible = compatible.len(),
            "compatibility_checked"
        );
        if !compatible.is_empty() {
            transition.context_updates = ContextUpdates {
                search_results: Some(compatible),
                ..ContextUpdates::default()
            };
        }
        transition.tools_used = vec!["check_product_compatibility".to_string()];
        transition
    }

    // -------------------------------------------------------------------------
    // match_preferences
    // -------------------------------------------------------------------------

    pub(super) async fn handle_match_preferences(&self, _input: Option<&str>) -> StateTransition {
        if self.context.search_results.is_empty() {
            return StateTransition::ask(
                "No products found to match your preferences. Would you like to try a \
                 different search?",
            );
        }

        let services = self.services();
        let context_query = self.context.product_query.clone().unwrap_or_default();
        let started = Instant::now();
        let result = run_preference_match(
            &services.preference_match,
            &self.context.search_results,
            &self.context.preferences,
            &self.context.constraints,
            &context_query,
            &services.config.pipeline,
            &services.health,
        )
        .await;
        let invocation = PipelineInvocation {
            pipeline: PREFERENCE_MATCH_PIPELINE.to_string(),
            status: match result.status {
                PreferenceStatus::Error => "error".to_string(),
                PreferenceStatus::NoProducts => "no_products".to_string(),
                PreferenceStatus::Fallback => "fallback".to_string(),
                PreferenceStatus::Success => "success".to_string(),
            },
            result: result.to_value(),
            execution_time: started.elapsed().as_secs_f64(),
        };

        if result.ranked_products.is_empty() {
            tracing::warn!(
                session_id = %self.context.session_id,
                status = ?result.status,
                "preference_match_returned_nothing"
            );
            let mut transition = StateTransition::ask(
                "I couldn't find products that match your preferences. Would you like to \
                 adjust your requirements or try a different search?",
            );
            transition.pipeline_invocations.push(invocation);
            return transition;
        }

        let mut tools_used = vec![PREFERENCE_MATCH_PIPELINE.to_string()];
        let recommendation = services
            .llm
            .generate_product_recommendation(
                &result.ranked_products,
                &self.context.preferences,
                &self.context.constraints,
            )
            .await;
        tools_used.push("generate_product_recommendation".to_string());

        let count = result.ranked_products.len();
        let message = format!(
            "Based on your preferences, here are the top {count} options:\n\n{}\n\n\
             My recommendation: Option {}\nReason: {}\n\n\
             Please enter the number (1-{count}) of your choice, or type 'yes' to go \
             with my recommendation.",
            render_numbered_list(&recommendation),
            recommendation.recommendation.choice.unwrap_or(1),
            recommendation.recommendation.reasoning,
        );

        tracing::info!(
            session_id = %self.context.session_id,
            ranked = count,
            method = %result.ranking_method,
            "preference_match_presented"
        );

        let mut transition = StateTransition::ask(message);
        transition.next_state = Some(ContractState::ConfirmSelection);
        transition.context_updates = ContextUpdates {
            top_products: Some(result.ranked_products.clone()),
            product_recommendations: Some(recommendation),
            preference_scores: Some(result.scores.clone()),
            ranking_method: Some(result.ranking_method.clone()),
            ..ContextUpdates::default()
        };
        transition.tools_used = tools_used;
        transition.pipeline_invocations.push(invocation);
        transition
    }

    // -------------------------------------------------------------------------
    // rank_and_select / present_options
    // -------------------------------------------------------------------------

    pub(super) async fn handle_rank_and_select(&self, _input: Option<&str>) -> StateTransition {
        let top_products = Self::rank_and_select(&self.context.search_results);
        if top_products.is_empty() {
            return StateTransition::ask(
                "No suitable products were found. Would you like to try a different search?",
            );
        }

        let recommendation = self
            .services()
            .llm
            .generate_product_recommendation(
                &top_products,
                &self.context.preferences,
                &self.context.constraints,
            )
            .await;

        let count = top_products.len();
        let message = format!(
            "Here are the top {count} options:\n\n{}\n\n\
             My recommendation: Option {}\nReason: {}\n\n\
             Please enter the number (1-{count}) of your choice, or type 'yes' to go \
             with my recommendation.",
            render_numbered_list(&recommendation),
            recommendation.recommendation.choice.unwrap_or(1),
            recommendation.recommendation.reasoning,
        );

        tracing::info!(
            session_id = %self.context.session_id,
            ranked = count,
            "options_presented"
        );

        let mut transition = StateTransition::ask(message);
        transition.next_state = Some(ContractState::ConfirmSelection);
        transition.context_updates = ContextUpdates {
            top_products: Some(top_products),
            product_recommendations: Some(recommendation),
            ranking_method: Some("simple".to_string()),
            ..ContextUpdates::default()
        };
        transition
    }

    // -------------------------------------------------------------------------
    // confirm_selection
    // -------------------------------------------------------------------------

    pub(super) async fn handle_confirm_selection(&self, input: Option<&str>) -> StateTransition {
        if let Some(cancel) = self.cancel_transition(input).await {
            return cancel;
        }

        let count = self.context.top_products.len();
        let Some(input) = input.filter(|input| !input.trim().is_empty()) else {
            return StateTransition::ask(format!(
                "Please enter a number (1-{count}) or 'yes' for my recommendation."
            ));
        };

        let choice = match parsing::parse_selection(input, count) {
            SelectionReply::Affirmative => {
                // Accepting the recommendation is also the purchase
                // affirmation: selection and order confirmation collapse
                // into one turn.
                let choice = self
                    .context
                    .product_recommendations
                    .as_ref()
                    .and_then(|rec| rec.recommendation.choice)
                    .unwrap_or(1);
                let Some(selected) = self.context.top_products.get(choice as usize - 1).cloned()
                else {
                    return StateTransition::ask(format!(
                        "Please enter a number between 1 and {count}, or 'yes' for my \
                         recommendation."
                    ));
                };
                let selection_subtask = Subtask {
                    id: "select_product".to_string(),
                    kind: "user_selection".to_string(),
                    status: "completed".to_string(),
                    output: Some(selected.clone()),
                    user_choice: Some(input.to_string()),
                    response: None,
                };
                let price = selected
                    .price
                    .as_ref()
                    .map(ToString::to_string)
                    .unwrap_or_else(|| "price not available".to_string());
                let mut transition = self
                    .complete_order_with(input, &selected.name, &price, vec![selection_subtask])
                    .await;
                transition.context_updates.selected_product = Some(selected);
                return transition;
            }
            SelectionReply::Choice(choice) => choice,
            SelectionReply::OutOfRange(_) => {
                return StateTransition::ask(format!(
                    "Please enter a number between 1 and {count}, or 'yes' for my \
                     recommendation."
                ));
            }
            SelectionReply::Other => {
                return StateTransition::ask(format!(
                    "I didn't understand your selection. Please enter a number (1-{count}) \
                     or 'yes' for my recommendation."
                ));
            }
        };

        let Some(selected) = self.context.top_products.get(choice as usize - 1).cloned() else {
            return StateTransition::ask(format!(
                "Please enter a number between 1 and {count}, or 'yes' for my recommendation."
            ));
        };

        let price_info = selected
            .price
            .as_ref()
            .map(|price| format!(" at {price} CHF"))
            .unwrap_or_default();
        let name = selected.name.clone();

        tracing::info!(
            session_id = %self.context.session_id,
            product = %name,
            "product_selected"
        );

        let mut transition = StateTransition::ask(format!(
            "You selected: {name}{price_info}. Shall I go ahead and confirm this order?"
        ));
        transition.next_state = Some(ContractState::ConfirmOrder);
        transition.contract_updates = ContractUpdates {
            subtasks: vec![Subtask {
                id: "select_product".to_string(),
                kind: "user_selection".to_string(),
                status: "completed".to_string(),
                output: Some(selected.clone()),
                user_choice: Some(input.to_string()),
                response: None,
            }],
            ..ContractUpdates::default()
        };
        transition.context_updates = ContextUpdates {
            selected_product: Some(selected),
            confirmation_pending: Some(true),
            ..ContextUpdates::default()
        };
        transition
    }

    // -------------------------------------------------------------------------
    // confirm_order
    // -------------------------------------------------------------------------

    pub(super) async fn handle_confirm_order(&self, input: Option<&str>) -> StateTransition {
        if let Some(cancel) = self.cancel_transition(input).await {
            return cancel;
        }

        let (name, price) = match &self.context.selected_product {
            Some(product) => (
                product.name.clone(),
                product
                    .price
                    .as_ref()
                    .map(ToString::to_string)
                    .unwrap_or_else(|| "price not available".to_string()),
            ),
            None => ("the product".to_string(), "price not available".to_string()),
        };

        let Some(input) = input.filter(|input| !input.trim().is_empty()) else {
            return StateTransition::ask(format!(
                "Please answer 'yes' to confirm the purchase of {name} at {price} CHF, \
                 or 'no' to decline."
            ));
        };

        let relevance = self
            .services()
            .llm
            .is_response_relevant(
                input,
                "yes/no confirmation for product purchase",
                &format!("{name} at {price} CHF"),
            )
            .await;
        if !relevance.is_relevant {
            return StateTransition::ask(format!(
                "I didn't understand your response. Please answer 'yes' to confirm the \
                 purchase of {name} at {price} CHF, 'no' to decline, or 'cancel' to exit."
            ));
        }

        if parsing::is_affirmative_order(input) {
            return self.complete_order_with(input, &name, &price, Vec::new()).await;
        }
        if parsing::is_negative_order(input) {
            tracing::info!(session_id = %self.context.session_id, "order_declined");
            return StateTransition::cancellation(ORDER_CANCEL_SENTENCE);
        }

        StateTransition::ask(format!(
            "I didn't understand your response. Please answer 'yes' to confirm the \
             purchase of {name} at {price} CHF, or 'no' to decline."
        ))
    }

    /// Affirmative confirmation: record the subtasks, mark the contract
    /// completed and emit the audit artifact.
    async fn complete_order_with(
        &self,
        input: &str,
        name: &str,
        price: &str,
        mut subtasks: Vec<Subtask>,
    ) -> StateTransition {
        let session_id = self.session_id();
        let completed_at = Utc::now();

        subtasks.push(Subtask {
            id: "confirm_order".to_string(),
            kind: "confirmation".to_string(),
            status: "completed".to_string(),
            output: None,
            user_choice: None,
            response: Some(input.to_string()),
        });

        // Artifact projection of the final contract, including the updates
        // this very transition will apply.
        let mut artifact = self
            .contract()
            .to_value()
            .unwrap_or_else(|_| serde_json::json!({}));
        if let Some(map) = artifact.as_object_mut() {
            map.insert("status".to_string(), Value::String("completed".to_string()));
            map.insert("order_confirmed".to_string(), Value::Bool(true));
            map.insert(
                "completed_at".to_string(),
                Value::String(completed_at.to_rfc3339()),
            );
            if let Some(existing) = map.get_mut("subtasks").and_then(Value::as_array_mut) {
                for subtask in &subtasks {
                    if let Ok(subtask) = serde_json::to_value(subtask) {
                        existing.push(subtask);
                    }
                }
            }
        }
        self.services()
            .audit
            .store_contract_artifact(&session_id, &self.user_id(), artifact)
            .await;

        tracing::info!(session_id = %session_id, product = %name, "order_confirmed");

        let mut transition = StateTransition::success(ContractState::Completed).with_message(
            format!("Order confirmed for {name} at {price} CHF. Thank you for your purchase!"),
        );
        transition.status = super::TransitionStatus::Completed;
        transition.context_updates = ContextUpdates {
            confirmation_pending: Some(false),
            contract_status: Some(ContractStatus::Completed),
            ..ContextUpdates::default()
        };
        transition.contract_updates = ContractUpdates {
            subtasks,
            status: Some("completed".to_string()),
            order_confirmed: Some(true),
            completed_at: Some(completed_at),
        };
        transition
    }

    // -------------------------------------------------------------------------
    // terminal sinks
    // -------------------------------------------------------------------------

    pub(super) fn handle_completed(&self, _input: Option<&str>) -> StateTransition {
        let mut transition = StateTransition::default();
        transition.status = super::TransitionStatus::Completed;
        transition.user_message =
            Some("This purchase is already completed. Is there anything else I can help you with?".to_string());
        transition.context_updates = ContextUpdates {
            contract_status: Some(ContractStatus::Completed),
            ..ContextUpdates::default()
        };
        transition
    }

    pub(super) fn handle_cancelled(&self, _input: Option<&str>) -> StateTransition {
        let mut transition = StateTransition::default();
        transition.status = super::TransitionStatus::Cancelled;
        transition.user_message =
            Some("The purchase has been cancelled. Is there anything else I can help you with?".to_string());
        transition.context_updates = ContextUpdates {
            contract_status: Some(ContractStatus::Cancelled),
            is_cancelled: Some(true),
            ..ContextUpdates::default()
        };
        transition.contract_updates = ContractUpdates {
            status: Some("cancelled".to_string()),
            ..ContractUpdates::default()
        };
        transition
    }

    pub(super) fn handle_failed(&self, _input: Option<&str>) -> StateTransition {
        let mut transition = StateTransition::default();
        transition.status = super::TransitionStatus::Failed;
        transition.user_message =
            Some("This contract has failed. Please start a new request.".to_string());
        transition
    }

    pub(super) fn handle_error(&self, _input: Option<&str>) -> StateTransition {
        tracing::error!(
            session_id = %self.context.session_id,
            "fsm_in_error_state"
        );
        StateTransition::failure("Contract initialisation failed (template not loaded).")
    }
}

fn render_numbered_list(recommendation: &super::Recommendation) -> String {
    recommendation
        .numbered_products
        .iter()
        .map(|item| {
            format!(
                "{}. {} - {} ({})",
                item.number, item.name, item.price, item.key_specs
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::super::test_support::services_with_adapter;
    use super::super::{ContractStateMachine, ContractTemplate};
    use super::*;
    use crate::contract::product::Scalar;
    use crate::stores::StaticShoppingAdapter;
    use crate::types::SessionId;
    use std::collections::BTreeMap;
    use std::sync::Arc;

    fn products(count: usize) -> Vec<Product> {
        (0..count)
            .map(|i| Product {
                name: format!("Product {i}"),
                price: Some(Scalar::Number(100.0 + i as f64 * 25.0)),
                rating: Some(Scalar::Number(3.0 + (i % 3) as f64 * 0.7)),
                description: format!("Description {i}"),
                ..Product::default()
            })
            .collect()
    }

    async fn machine_at_selection(count: usize) -> ContractStateMachine {
        let services = services_with_adapter(Arc::new(StaticShoppingAdapter::new(products(count))));
        let mut fsm = ContractStateMachine::new(
            &ContractTemplate::purchase_item(),
            "templates/purchase_item.json",
            SessionId::must("sess-h"),
            services,
        );
        fsm.fill_parameters(BTreeMap::from([(
            "product".to_string(),
            Value::String("gpu".to_string()),
        )]));
        let response = fsm.next(None).await;
        assert_eq!(fsm.context.current_state, ContractState::ConfirmSelection);
        assert!(response.ask_user.is_some());
        fsm
    }

    #[tokio::test]
    async fn test_selection_digit_moves_to_confirm_order() {
        let mut fsm = machine_at_selection(3).await;
        let response = fsm.next(Some("2")).await;
        assert_eq!(fsm.context.current_state, ContractState::ConfirmOrder);
        assert!(response.ask_user.unwrap().contains("You selected:"));
        assert!(fsm.context.selected_product.is_some());
        assert!(fsm.context.confirmation_pending);
        assert!(fsm.contract().subtask_completed("select_product"));
    }

    #[tokio::test]
    async fn test_selection_out_of_range_stays() {
        let mut fsm = machine_at_selection(3).await;
        let response = fsm.next(Some("9")).await;
        assert_eq!(fsm.context.current_state, ContractState::ConfirmSelection);
        assert!(response
            .ask_user
            .unwrap()
            .contains("between 1 and"));
        assert!(fsm.context.selected_product.is_none());
    }

    #[tokio::test]
    async fn test_yes_takes_recommendation_and_completes() {
        let mut fsm = machine_at_selection(3).await;
        let response = fsm.next(Some("yes")).await;

        // Accepting the recommendation is also the purchase confirmation.
        assert_eq!(fsm.context.current_state, ContractState::Completed);
        assert_eq!(fsm.context.contract_status, ContractStatus::Completed);
        assert!(response.message.unwrap().contains("Order confirmed"));

        let selected = fsm.context.selected_product.as_ref().unwrap();
        let recommended = fsm
            .context
            .product_recommendations
            .as_ref()
            .unwrap()
            .recommendation
            .choice
            .unwrap() as usize;
        assert_eq!(
            selected.name,
            fsm.context.top_products[recommended - 1].name
        );
        assert!(fsm.contract().subtask_completed("select_product"));
        assert!(fsm.contract().subtask_completed("confirm_order"));
    }

    #[tokio::test]
    async fn test_cancel_wins_at_selection() {
        let mut fsm = machine_at_selection(3).await;
        let response = fsm.next(Some("cancel")).await;
        assert_eq!(fsm.context.current_state, ContractState::Cancelled);
        assert_eq!(fsm.context.contract_status, ContractStatus::Cancelled);
        assert_eq!(response.message.as_deref(), Some(CANCEL_SENTENCE));
        assert!(response.is_terminal());
    }

    #[tokio::test]
    async fn test_order_confirmation_completes_and_writes_artifact() {
        let mut fsm = machine_at_selection(3).await;
        fsm.next(Some("1")).await;
        let response = fsm.next(Some("yes")).await;

        assert_eq!(fsm.context.current_state, ContractState::Completed);
        assert_eq!(fsm.context.contract_status, ContractStatus::Completed);
        assert!(response.message.unwrap().contains("Order confirmed"));
        assert!(fsm.contract().subtask_completed("confirm_order"));
        assert!(fsm.contract().order_confirmed);
        assert!(!fsm.context.confirmation_pending);
        assert!(fsm.context.selected_product.is_some());
    }

    #[tokio::test]
    async fn test_order_decline_cancels() {
        let mut fsm = machine_at_selection(3).await;
        fsm.next(Some("1")).await;
        let response = fsm.next(Some("no")).await;
        assert_eq!(fsm.context.current_state, ContractState::Cancelled);
        assert_eq!(response.message.as_deref(), Some(ORDER_CANCEL_SENTENCE));
    }

    #[tokio::test]
    async fn test_order_unclear_reprompts() {
        let mut fsm = machine_at_selection(3).await;
        fsm.next(Some("1")).await;
        let response = fsm.next(Some("hmm maybe")).await;
        assert_eq!(fsm.context.current_state, ContractState::ConfirmOrder);
        assert!(response.ask_user.unwrap().contains("'yes' to confirm"));
    }

    #[tokio::test]
    async fn test_too_many_results_routes_to_refinement() {
        let mut fsm = {
            let services =
                services_with_adapter(Arc::new(StaticShoppingAdapter::new(products(60))));
            let mut fsm = ContractStateMachine::new(
                &ContractTemplate::purchase_item(),
                "templates/purchase_item.json",
                SessionId::must("sess-many"),
                services,
            );
            fsm.fill_parameters(BTreeMap::from([(
                "product".to_string(),
                Value::String("gpu".to_string()),
            )]));
            fsm
        };

        let response = fsm.next(None).await;
        assert_eq!(fsm.context.current_state, ContractState::RefineConstraints);
        let ask = response.ask_user.unwrap();
        assert!(ask.contains("I found many results"));
        assert!(fsm.context.search_results.is_empty());
        assert!(!fsm.context.extracted_attributes.is_empty());
    }

    #[tokio::test]
    async fn test_refinement_accumulates_constraints_and_counts() {
        let adapter = Arc::new(StaticShoppingAdapter::new(products(60)));
        let services = services_with_adapter(adapter.clone());
        let mut fsm = ContractStateMachine::new(
            &ContractTemplate::purchase_item(),
            "templates/purchase_item.json",
            SessionId::must("sess-refine"),
            services,
        );
        fsm.fill_parameters(BTreeMap::from([(
            "product".to_string(),
            Value::String("gpu".to_string()),
        )]));
        fsm.next(None).await;

        // Shrink results so the re-search succeeds.
        adapter.set_results(products(3));
        let response = fsm.next(Some("under 500")).await;

        assert_eq!(fsm.context.refinement_attempts, 1);
        assert!(fsm
            .context
            .constraints
            .iter()
            .any(|c| c.kind == "price"
                && c.operator == "<="
                && c.value == Scalar::Number(500.0)));
        // The re-search ran through to the selection barrier.
        assert_eq!(fsm.context.current_state, ContractState::ConfirmSelection);
        assert!(response.ask_user.is_some());
    }

    #[tokio::test]
    async fn test_refinement_attempts_never_exceed_bound() {
        let adapter = Arc::new(StaticShoppingAdapter::new(products(60)));
        let services = services_with_adapter(adapter.clone());
        let mut fsm = ContractStateMachine::new(
            &ContractTemplate::purchase_item(),
            "templates/purchase_item.json",
            SessionId::must("sess-bound"),
            services,
        );
        fsm.fill_parameters(BTreeMap::from([(
            "product".to_string(),
            Value::String("gpu".to_string()),
        )]));
        fsm.next(None).await;

        for round in 0..5 {
            fsm.next(Some(&format!("more criteria {round}"))).await;
            assert!(fsm.context.refinement_attempts <= MAX_REFINEMENT_ATTEMPTS);
            if fsm.context.current_state != ContractState::RefineConstraints {
                break;
            }
        }
        // After the budget is spent the machine proceeded instead of looping.
        assert_ne!(fsm.context.current_state, ContractState::RefineConstraints);
    }

    #[tokio::test]
    async fn test_large_in_bounds_set_collects_preferences() {
        let services = services_with_adapter(Arc::new(StaticShoppingAdapter::new(products(20))));
        let mut fsm = ContractStateMachine::new(
            &ContractTemplate::purchase_item(),
            "templates/purchase_item.json",
            SessionId::must("sess-prefs"),
            services,
        );
        fsm.fill_parameters(BTreeMap::from([(
            "product".to_string(),
            Value::String("washing machine".to_string()),
        )]));

        let response = fsm.next(None).await;
        assert_eq!(fsm.context.current_state, ContractState::WaitForPreferences);
        assert!(response.ask_user.unwrap().contains("I found many options"));

        let response = fsm.next(Some("quiet, below 800 CHF")).await;
        // Preferences recorded, pipeline ranked, selection barrier reached.
        assert_eq!(fsm.context.current_state, ContractState::ConfirmSelection);
        assert!(fsm.context.preferences.contains_key("price"));
        assert!(response
            .ask_user
            .unwrap()
            .contains("Based on your preferences"));
        assert_eq!(fsm.context.top_products.len(), 3);
    }

    #[tokio::test]
    async fn test_empty_search_results_reprompt() {
        let services = services_with_adapter(Arc::new(StaticShoppingAdapter::new(Vec::new())));
        let mut fsm = ContractStateMachine::new(
            &ContractTemplate::purchase_item(),
            "templates/purchase_item.json",
            SessionId::must("sess-empty"),
            services,
        );
        fsm.fill_parameters(BTreeMap::from([(
            "product".to_string(),
            Value::String("unobtainium".to_string()),
        )]));

        let response = fsm.next(None).await;
        assert_eq!(fsm.context.current_state, ContractState::Search);
        assert!(response.ask_user.unwrap().contains("couldn't find any products"));
    }
}
