//! Contract state machine: the per-session control plane.
//!
//! The state machine routes each turn to a single state handler, then
//! applies the returned transition: context updates, contract updates,
//! pipeline execution records and the step log all mutate here and nowhere
//! else. A transition that advances without asking the user re-enters the
//! next handler in the same turn (run-to-completion), bounded by a hop
//! budget so a routing bug surfaces as a failed contract instead of a hang.

pub mod context;
pub mod handlers;
pub mod parsing;
pub mod product;
pub mod states;
pub mod template;
pub mod transition;

pub use context::{ContractContext, PipelineExecutionRecord};
pub use product::{Constraint, NumberedProduct, Product, Recommendation, RecommendationChoice};
pub use states::{ContractState, ContractStatus};
pub use template::{Contract, ContractTemplate};
pub use transition::{
    ContextUpdates, ContractUpdates, PipelineInvocation, StateTransition, Subtask,
    TransitionStatus,
};

use crate::llm::LlmHelpers;
use crate::persistence::SessionPersistence;
use crate::pipelines::Pipeline;
use crate::privacy::AuditStore;
use crate::resilience::HealthMonitor;
use crate::types::{Config, SessionId};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Re-entry budget for a single turn. Exhausting it means a handler cycle
/// never reached a user-input barrier or terminal state, which is a bug.
const MAX_HANDLER_HOPS: usize = 16;

/// Refinement rounds before the workflow stops narrowing and proceeds with
/// whatever the search returns.
pub const MAX_REFINEMENT_ATTEMPTS: u32 = 3;

/// Shared collaborators injected into every state machine.
#[derive(Debug)]
pub struct EngineServices {
    pub config: Config,
    pub llm: Arc<LlmHelpers>,
    pub product_search: Pipeline,
    pub preference_match: Pipeline,
    pub persistence: Arc<SessionPersistence>,
    pub audit: Arc<AuditStore>,
    pub health: Arc<HealthMonitor>,
}

/// What one call to [`ContractStateMachine::next`] yields.
#[derive(Debug, Clone, Serialize)]
pub struct FsmResponse {
    pub status: TransitionStatus,
    pub current_state: ContractState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ask_user: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl FsmResponse {
    /// The text to surface to the user, preferring the question.
    pub fn reply_text(&self) -> Option<&str> {
        self.ask_user.as_deref().or(self.message.as_deref())
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal() || self.current_state.is_terminal()
    }
}

/// Per-session finite state machine bound to one contract template.
#[derive(Debug)]
pub struct ContractStateMachine {
    contract: Contract,
    pub context: ContractContext,
    services: Arc<EngineServices>,
}

impl ContractStateMachine {
    /// Build from an in-memory template.
    pub fn new(
        template: &ContractTemplate,
        template_ref: impl Into<String>,
        session_id: SessionId,
        services: Arc<EngineServices>,
    ) -> Self {
        let mut contract = Contract::from_template(template);
        contract.fill_parameters(BTreeMap::from([(
            template::PARAM_SESSION_ID.to_string(),
            Value::String(session_id.to_string()),
        )]));
        Self {
            contract,
            context: ContractContext::new(session_id, template_ref),
            services,
        }
    }

    /// Build from a template file. A load or validation failure parks the
    /// machine in the error sink; the next turn reports the failure.
    pub fn from_template_path(
        template_path: &str,
        session_id: SessionId,
        services: Arc<EngineServices>,
    ) -> Self {
        match ContractTemplate::load(template_path) {
            Ok(template) => Self::new(&template, template_path, session_id, services),
            Err(error) => {
                tracing::error!(
                    template_path,
                    error = %error,
                    "contract_template_load_failed"
                );
                Self {
                    contract: Contract::from_template(&ContractTemplate::purchase_item()),
                    context: ContractContext::errored(session_id, template_path),
                    services,
                }
            }
        }
    }

    pub fn contract(&self) -> &Contract {
        &self.contract
    }

    pub(crate) fn services(&self) -> &EngineServices {
        &self.services
    }

    pub fn session_id(&self) -> String {
        self.context.session_id.to_string()
    }

    pub(crate) fn user_id(&self) -> String {
        self.contract
            .parameter_str("user_id")
            .unwrap_or("anonymous")
            .to_string()
    }

    /// Merge dispatch-time parameters into the contract and seed the
    /// matching context fields.
    pub fn fill_parameters(&mut self, params: BTreeMap<String, Value>) {
        if let Some(product) = params.get(template::PARAM_PRODUCT).and_then(Value::as_str) {
            self.context.product_query = Some(product.to_string());
        }
        if let Some(query) = params
            .get(template::PARAM_ENHANCED_QUERY)
            .and_then(Value::as_str)
        {
            self.context.enhanced_query = Some(query.to_string());
        }
        if let Some(preferences) = params.get(template::PARAM_PREFERENCES) {
            if let Ok(preferences) = serde_json::from_value(preferences.clone()) {
                self.context.preferences = preferences;
            }
        }
        if let Some(constraints) = params.get(template::PARAM_CONSTRAINTS) {
            if let Ok(constraints) = serde_json::from_value(constraints.clone()) {
                self.context.constraints = constraints;
            }
        }
        tracing::info!(
            session_id = %self.context.session_id,
            params = params.len(),
            "contract_parameters_filled"
        );
        self.contract.fill_parameters(params);
    }

    /// Replace the context wholesale (session recovery: the machine is
    /// rebuilt fresh from the template, then the stored context overwrites
    /// its own).
    pub fn restore_context(&mut self, context: ContractContext) {
        self.context = context;
    }

    /// Advance the machine by one user turn. Handlers re-enter until a
    /// user-input barrier or terminal status, within the hop budget.
    pub async fn next(&mut self, user_input: Option<&str>) -> FsmResponse {
        let mut input: Option<String> = user_input.map(ToString::to_string);

        for _hop in 0..MAX_HANDLER_HOPS {
            let state = self.context.current_state;
            tracing::info!(
                session_id = %self.context.session_id,
                state = %state,
                input = input.as_deref().unwrap_or(""),
                "fsm_dispatch"
            );

            let transition = self.dispatch(state, input.take().as_deref()).await;
            if let Some(response) = self.apply(transition).await {
                return response;
            }
        }

        tracing::error!(
            session_id = %self.context.session_id,
            state = %self.context.current_state,
            "handler_hop_budget_exhausted"
        );
        let failure = StateTransition::failure(
            "contract stalled: no user barrier reached within the handler budget",
        );
        self.apply(failure).await.unwrap_or(FsmResponse {
            status: TransitionStatus::Failed,
            current_state: ContractState::Failed,
            ask_user: None,
            message: None,
            error: Some("contract stalled".to_string()),
        })
    }

    async fn dispatch(&self, state: ContractState, input: Option<&str>) -> StateTransition {
        match state {
            ContractState::Start => self.handle_start(input),
            ContractState::Search => self.handle_search(input).await,
            ContractState::RefineConstraints => self.handle_refine_constraints(input).await,
            ContractState::AskClarification => self.handle_ask_clarification(input),
            ContractState::WaitForPreferences => self.handle_wait_for_preferences(input).await,
            ContractState::FilterProducts => self.handle_filter_products(input).await,
            ContractState::MatchPreferences => self.handle_match_preferences(input).await,
            ContractState::CheckCompatibility => self.handle_check_compatibility(input).await,
            ContractState::RankAndSelect | ContractState::PresentOptions => {
                self.handle_rank_and_select(input).await
            }
            ContractState::ConfirmSelection => self.handle_confirm_selection(input).await,
            ContractState::ConfirmOrder => self.handle_confirm_order(input).await,
            ContractState::Completed => self.handle_completed(input),
            ContractState::Cancelled => self.handle_cancelled(input),
            ContractState::Failed => self.handle_failed(input),
            ContractState::Error => self.handle_error(input),
        }
    }

    /// The sole mutation site. Returns the response when this turn is done,
    /// `None` when the machine should re-enter the next handler.
    async fn apply(&mut self, transition: StateTransition) -> Option<FsmResponse> {
        let StateTransition {
            next_state,
            user_message,
            ask_user,
            status,
            context_updates,
            contract_updates,
            tools_used,
            pipeline_invocations,
            error_message,
        } = transition;

        let session_id = self.session_id();
        for invocation in pipeline_invocations {
            let success = invocation.status != "error";
            self.context.record_pipeline_execution(
                &invocation.pipeline,
                invocation.result.clone(),
                invocation.execution_time,
            );
            self.services.persistence.save_pipeline_state(
                &session_id,
                &invocation.pipeline,
                invocation.result,
                Some(invocation.execution_time),
                success,
            );
        }

        self.context.apply_updates(context_updates);
        self.contract.apply_updates(contract_updates);
        self.context.tools_used.extend(tools_used);

        let mut state_changed = false;
        if let Some(next) = next_state {
            if next != self.context.current_state {
                tracing::info!(
                    session_id = %session_id,
                    from = %self.context.current_state,
                    to = %next,
                    "fsm_transition"
                );
                self.context.update_state(next);
                state_changed = true;
            }
        }

        if state_changed {
            if let Err(error) = self
                .services
                .persistence
                .save_session_context(&session_id, &self.context, None)
                .await
            {
                tracing::warn!(
                    session_id = %session_id,
                    error = %error,
                    "context_persist_failed"
                );
            }
        }

        let barrier = ask_user.is_some();
        let terminal = status.is_terminal();
        let advances = next_state.is_some();

        if barrier || terminal || !advances {
            return Some(FsmResponse {
                status,
                current_state: self.context.current_state,
                ask_user,
                message: user_message,
                error: error_message,
            });
        }
        None
    }

    /// Internal ranking fallback: best rating first, then lowest price,
    /// top five. Missing rating counts as 0, missing price as +infinity.
    pub fn rank_and_select(products: &[Product]) -> Vec<Product> {
        if products.is_empty() {
            return Vec::new();
        }
        let mut ranked: Vec<Product> = products.to_vec();
        ranked.sort_by(|a, b| {
            a.fallback_rank_key()
                .partial_cmp(&b.fallback_rank_key())
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        ranked.truncate(5);
        ranked
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::llm::NullChatProvider;
    use crate::pipelines::{create_preference_match_pipeline, create_product_search_pipeline};
    use crate::stores::{MemoryObjectStore, MemorySessionStore, ShoppingAdapter};

    /// Services wired entirely to in-memory fakes with the given adapter.
    pub fn services_with_adapter(adapter: Arc<dyn ShoppingAdapter>) -> Arc<EngineServices> {
        let config = Config::default();
        let health = Arc::new(HealthMonitor::new(
            config.resilience.degradation_error_threshold,
        ));
        let llm = Arc::new(LlmHelpers::new(
            Arc::new(NullChatProvider),
            config.llm.model.clone(),
            0,
            Arc::new(HealthMonitor::new(u32::MAX)),
        ));
        let product_search =
            create_product_search_pipeline(adapter, llm.clone(), &config.pipeline);
        let preference_match =
            create_preference_match_pipeline(llm.clone(), config.pipeline.top_k);
        let persistence = Arc::new(SessionPersistence::new(
            Arc::new(MemorySessionStore::new()),
            health.clone(),
            &config.pipeline,
        ));
        let audit = Arc::new(AuditStore::new(Arc::new(MemoryObjectStore::new())));

        Arc::new(EngineServices {
            config,
            llm,
            product_search,
            preference_match,
            persistence,
            audit,
            health,
        })
    }
}
