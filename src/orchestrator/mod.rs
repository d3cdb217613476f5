//! Orchestrator: routing between the front-end and the contract engine.
//!
//! For each incoming turn the orchestrator short-circuits pending order
//! confirmations, advances a resident state machine when one exists, and
//! otherwise classifies intent and dispatches to the contract engine or the
//! external collaborators. Residual errors clear the resident machine and
//! produce an apology instead of propagating.

pub mod intent;
pub mod session;

pub use intent::{Intent, IntentExtractor, KeywordIntentExtractor};
pub use session::{SessionEntry, SessionRegistry};

use crate::contract::{
    ContractState, ContractStateMachine, ContractTemplate, EngineServices, FsmResponse,
};
use crate::memory::{MemoryManager, Message};
use crate::resilience::OperationMode;
use crate::types::{Result, SessionId};
use async_trait::async_trait;
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

const ERROR_REPLY: &str = "Sorry, there was an error processing your request.";
const SESSION_SWEEP_MAX_AGE_HOURS: u64 = 24;

/// External collaborator answering non-contract turns (tool, RAG, chat).
#[async_trait]
pub trait CollaboratorDelegate: Send + Sync + fmt::Debug {
    async fn respond(&self, session_id: &str, input: &str) -> Result<String>;
}

/// Default delegate for deployments without the collaborator wired in.
#[derive(Debug)]
pub struct UnavailableDelegate(pub &'static str);

#[async_trait]
impl CollaboratorDelegate for UnavailableDelegate {
    async fn respond(&self, _session_id: &str, _input: &str) -> Result<String> {
        Ok(format!("The {} service is currently unavailable.", self.0))
    }
}

/// Non-contract collaborators, one per routed intent.
#[derive(Debug)]
pub struct Delegates {
    pub tool: Arc<dyn CollaboratorDelegate>,
    pub rag: Arc<dyn CollaboratorDelegate>,
    pub chat: Arc<dyn CollaboratorDelegate>,
}

impl Default for Delegates {
    fn default() -> Self {
        Self {
            tool: Arc::new(UnavailableDelegate("tool")),
            rag: Arc::new(UnavailableDelegate("document search")),
            chat: Arc::new(UnavailableDelegate("chat")),
        }
    }
}

/// Where contract templates come from at machine construction.
#[derive(Debug, Clone)]
pub enum TemplateSource {
    /// Load and validate from a file path.
    Path(String),
    /// Use the built-in purchase workflow.
    Builtin,
}

/// Reply for one handled turn.
#[derive(Debug, Clone, Serialize)]
pub struct OrchestratorReply {
    pub reply: String,
    pub session_id: String,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub contract_completed: bool,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub contract_cancelled: bool,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub contract_failed: bool,
}

impl OrchestratorReply {
    fn plain(reply: impl Into<String>, session_id: &str) -> Self {
        Self {
            reply: reply.into(),
            session_id: session_id.to_string(),
            contract_completed: false,
            contract_cancelled: false,
            contract_failed: false,
        }
    }
}

/// Per-turn dispatcher over the session registry.
#[derive(Debug)]
pub struct Orchestrator {
    registry: SessionRegistry,
    services: Arc<EngineServices>,
    memory: Arc<MemoryManager>,
    intent: Arc<dyn IntentExtractor>,
    delegates: Delegates,
    template_source: TemplateSource,
}

impl Orchestrator {
    pub fn new(
        services: Arc<EngineServices>,
        memory: Arc<MemoryManager>,
        intent: Arc<dyn IntentExtractor>,
        delegates: Delegates,
        template_source: TemplateSource,
    ) -> Self {
        Self {
            registry: SessionRegistry::new(),
            services,
            memory,
            intent,
            delegates,
            template_source,
        }
    }

    /// Handle one turn. Never errors: residual failures clear the resident
    /// machine and reply apologetically.
    pub async fn handle(&self, messages: &[Message], session_id: &str) -> OrchestratorReply {
        self.sweep_expired_sessions().await;

        let Some(user_message) = messages.last().cloned() else {
            tracing::warn!(session_id, "empty_message_list");
            return OrchestratorReply::plain("No messages provided to orchestrator.", session_id);
        };

        let entry = self.registry.entry(session_id).await;
        let mut guard = entry.write().await;
        guard.add_chat_message(user_message.clone());
        self.memory.add_message(session_id, &user_message).await;

        let mut reply = match self
            .handle_turn(&mut guard, session_id, &user_message.content)
            .await
        {
            Ok(reply) => reply,
            Err(error) => {
                tracing::error!(session_id, error = %error, "turn_failed_clearing_fsm");
                guard.resident_fsm = None;
                OrchestratorReply::plain(ERROR_REPLY, session_id)
            }
        };

        let mode = self.services.health.operation_mode();
        if mode != OperationMode::Full && !reply.reply.is_empty() {
            reply.reply = format!("{}\n\n{}", reply.reply, mode.user_notice());
        }

        let assistant_message = Message::assistant(reply.reply.clone());
        guard.add_chat_message(assistant_message.clone());
        self.memory.add_message(session_id, &assistant_message).await;

        reply
    }

    async fn handle_turn(
        &self,
        entry: &mut SessionEntry,
        session_id: &str,
        input: &str,
    ) -> Result<OrchestratorReply> {
        // 1. Pending order confirmation short-circuits everything else.
        if let Some(pending) = entry.pending_confirmation.clone() {
            return Ok(self
                .handle_pending_confirmation(entry, session_id, input, pending)
                .await);
        }

        // 2. A resident machine consumes the turn.
        if entry.resident_fsm.is_some() {
            return self.advance_resident_fsm(entry, session_id, input).await;
        }

        // 3. Fresh classification.
        match self.intent.extract(input).await? {
            Intent::Contract { criteria } => {
                self.start_contract(entry, session_id, input, criteria).await
            }
            Intent::Tool { name, query } => {
                tracing::info!(session_id, tool = %name, "tool_intent_dispatched");
                let reply = self.delegates.tool.respond(session_id, &query).await?;
                Ok(OrchestratorReply::plain(reply, session_id))
            }
            Intent::Rag { question } => {
                tracing::info!(session_id, "rag_intent_dispatched");
                let reply = self.delegates.rag.respond(session_id, &question).await?;
                Ok(OrchestratorReply::plain(reply, session_id))
            }
            Intent::Chat => {
                let reply = self.delegates.chat.respond(session_id, input).await?;
                Ok(OrchestratorReply::plain(reply, session_id))
            }
        }
    }

    async fn handle_pending_confirmation(
        &self,
        entry: &mut SessionEntry,
        session_id: &str,
        input: &str,
        pending: crate::contract::Product,
    ) -> OrchestratorReply {
        let lowered = input.trim().to_lowercase();
        let name = if pending.name.is_empty() {
            "the selected product".to_string()
        } else {
            pending.name.clone()
        };

        if ["yes", "y", "confirm", "ok", "okay", "proceed", "sure"].contains(&lowered.as_str()) {
            tracing::info!(session_id, product = %name, "pending_order_confirmed");
            let artifact = json!({
                "confirmed_product": pending,
                "chat_history_length": entry.chat_history.len(),
            });
            self.services
                .audit
                .store_contract_artifact(session_id, "anonymous", artifact)
                .await;
            entry.pending_confirmation = None;
            return OrchestratorReply::plain(
                format!("Great! Order confirmed for {name}."),
                session_id,
            );
        }

        if ["no", "n", "cancel", "stop"].contains(&lowered.as_str()) {
            tracing::info!(session_id, product = %name, "pending_order_cancelled");
            entry.pending_confirmation = None;
            let mut reply = OrchestratorReply::plain(
                format!("Okay, the order for {name} has been cancelled."),
                session_id,
            );
            reply.contract_cancelled = true;
            return reply;
        }

        OrchestratorReply::plain(
            format!("Sorry, I didn't quite understand. For {name}, please confirm with 'yes' or 'no'."),
            session_id,
        )
    }

    async fn advance_resident_fsm(
        &self,
        entry: &mut SessionEntry,
        session_id: &str,
        input: &str,
    ) -> Result<OrchestratorReply> {
        let Some(fsm) = entry.resident_fsm.as_mut() else {
            return Ok(OrchestratorReply::plain(ERROR_REPLY, session_id));
        };
        tracing::info!(
            session_id,
            state = %fsm.context.current_state,
            "resident_fsm_advancing"
        );

        let response = fsm.next(Some(input)).await;
        Ok(self.settle_fsm_turn(entry, session_id, response).await)
    }

    /// Post-turn bookkeeping shared by fresh and resident machines:
    /// terminal machines are cleared; a machine parked on the order
    /// confirmation question hands its product to the pending-confirmation
    /// shortcut.
    async fn settle_fsm_turn(
        &self,
        entry: &mut SessionEntry,
        session_id: &str,
        response: FsmResponse,
    ) -> OrchestratorReply {
        let mut reply = OrchestratorReply::plain(
            response
                .reply_text()
                .unwrap_or("Processing your request...")
                .to_string(),
            session_id,
        );

        if response.is_terminal() {
            match response.current_state {
                ContractState::Completed => reply.contract_completed = true,
                ContractState::Cancelled => reply.contract_cancelled = true,
                _ => reply.contract_failed = true,
            }
            tracing::info!(
                session_id,
                state = %response.current_state,
                "resident_fsm_cleared_terminal"
            );
            entry.resident_fsm = None;
            return reply;
        }

        let parked_on_confirmation = entry
            .resident_fsm
            .as_ref()
            .map(|fsm| {
                fsm.context.current_state == ContractState::ConfirmOrder
                    && fsm.context.confirmation_pending
                    && fsm.context.selected_product.is_some()
            })
            .unwrap_or(false);

        if parked_on_confirmation {
            if let Some(fsm) = entry.resident_fsm.take() {
                entry.pending_confirmation = fsm.context.selected_product.clone();
                tracing::info!(session_id, "fsm_handed_to_pending_confirmation");
            }
        }

        reply
    }

    async fn start_contract(
        &self,
        entry: &mut SessionEntry,
        session_id: &str,
        input: &str,
        criteria: crate::llm::helpers::InitialCriteria,
    ) -> Result<OrchestratorReply> {
        let session = SessionId::from_string(session_id.to_string())
            .map_err(crate::types::Error::validation)?;

        let mut fsm = match &self.template_source {
            TemplateSource::Path(path) => {
                ContractStateMachine::from_template_path(path, session, self.services.clone())
            }
            TemplateSource::Builtin => ContractStateMachine::new(
                &ContractTemplate::purchase_item(),
                "builtin:purchase_item",
                session,
                self.services.clone(),
            ),
        };

        // Recover a stored context when one exists: the machine is fresh,
        // the context is not.
        if let Some(stored) = self
            .services
            .persistence
            .load_session_context(session_id)
            .await
        {
            tracing::info!(session_id, state = %stored.current_state, "context_recovered");
            fsm.restore_context(stored);
        }

        let mut params: BTreeMap<String, Value> = BTreeMap::from([
            (
                "product".to_string(),
                Value::String(criteria.base_product.clone()),
            ),
            (
                "enhanced_query".to_string(),
                Value::String(criteria.enhanced_query.clone()),
            ),
            (
                "initial_criteria".to_string(),
                serde_json::to_value(&criteria)?,
            ),
            (
                "parsed_specifications".to_string(),
                serde_json::to_value(&criteria.specifications)?,
            ),
            ("raw_prompt".to_string(), Value::String(input.to_string())),
        ]);
        params.insert(
            "session_id".to_string(),
            Value::String(session_id.to_string()),
        );
        fsm.fill_parameters(params);

        let response = fsm.next(None).await;
        entry.resident_fsm = Some(fsm);
        Ok(self.settle_fsm_turn(entry, session_id, response).await)
    }

    /// Best-effort sweep of expired persistence entries and idle sessions.
    async fn sweep_expired_sessions(&self) {
        let swept = self
            .services
            .persistence
            .cleanup(Duration::from_secs(SESSION_SWEEP_MAX_AGE_HOURS * 3600));
        let idle = self
            .registry
            .cleanup_idle((SESSION_SWEEP_MAX_AGE_HOURS * 3600) as i64)
            .await;
        if swept > 0 || idle > 0 {
            tracing::info!(swept, idle, "expired_sessions_cleaned");
        }
    }
}
