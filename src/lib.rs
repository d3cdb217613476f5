//! # Valet Core - Conversational Purchase-Contract Engine
//!
//! Rust implementation of the contract execution engine providing:
//! - Per-session finite state machine driving a purchase workflow
//!   (search, constrain, prefer, rank, confirm)
//! - Stateless data-plane pipelines (product search, preference match,
//!   rolling summarisation)
//! - Tiered conversation memory (bounded buffer, rolling summary,
//!   semantic long-term store)
//! - Resilience layer (service health monitor, circuit breakers,
//!   operation-mode degradation)
//! - Session persistence with pipeline execution history
//!
//! ## Architecture
//!
//! The FSM is the control plane; the pipelines are the data plane:
//! ```text
//!   turn → Orchestrator ──→ ContractStateMachine ──→ state handler
//!                │                  │ apply()              │
//!                │                  ▼                      ▼
//!          SessionRegistry    ContractContext      Pipelines / LLM helpers
//!                │                  │                      │
//!                ▼                  ▼                      ▼
//!          MemoryManager    SessionPersistence      HealthMonitor
//! ```

// Enforce strict safety at compile time
#![deny(unsafe_code)]
#![warn(missing_debug_implementations)]
#![warn(rust_2018_idioms)]

// Re-export public API
pub mod contract;
pub mod llm;
pub mod memory;
pub mod orchestrator;
pub mod persistence;
pub mod pipelines;
pub mod privacy;
pub mod resilience;
pub mod stores;
pub mod types;

// Internal utilities
pub mod observability;

pub use types::{Config, Error, Result};
