//! Application error types.
//!
//! All errors use `thiserror` for automatic Error trait derivation and provide
//! clear error messages with context. The taxonomy mirrors the failure classes
//! the engine distinguishes at runtime: template loading is fatal for the
//! session, pipeline/LLM/storage failures are recoverable through fallbacks,
//! and invalid states fail the current turn only.

use thiserror::Error;

/// Application result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error enum for the contract engine.
#[derive(Error, Debug)]
pub enum Error {
    /// Contract template could not be loaded or failed schema validation.
    /// Fatal: the session FSM is initialised into its error sink.
    #[error("template load error: {0}")]
    TemplateLoad(String),

    /// A pipeline component failed (recoverable via fallback or reprompt).
    #[error("pipeline component error: {0}")]
    PipelineComponent(String),

    /// LLM generation or response-parse failure (recoverable via helper fallback).
    #[error("llm error: {0}")]
    Llm(String),

    /// A downstream service is unavailable (timeout / connection refused).
    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),

    /// The FSM reached a state it has no handler for. Fails the turn.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// Storage layer failure (fast-KV, SQL mirror, vector or object store).
    #[error("storage error: {0}")]
    Storage(String),

    /// Circuit breaker rejected the call without touching the backend.
    #[error("Circuit breaker is OPEN")]
    CircuitOpen,

    /// Operation deadline exceeded.
    #[error("timeout: {0}")]
    Timeout(String),

    /// Clean user cancellation.
    #[error("operation cancelled: {0}")]
    Cancelled(String),

    /// Validation errors (template parameters, envelope shapes).
    #[error("validation error: {0}")]
    Validation(String),

    /// Serialization/deserialization errors.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// HTTP transport errors (LLM provider, shopping adapter).
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// I/O errors.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

// Convenience constructors
impl Error {
    pub fn template_load(msg: impl Into<String>) -> Self {
        Self::TemplateLoad(msg.into())
    }

    pub fn pipeline(msg: impl Into<String>) -> Self {
        Self::PipelineComponent(msg.into())
    }

    pub fn llm(msg: impl Into<String>) -> Self {
        Self::Llm(msg.into())
    }

    pub fn service_unavailable(msg: impl Into<String>) -> Self {
        Self::ServiceUnavailable(msg.into())
    }

    pub fn invalid_state(msg: impl Into<String>) -> Self {
        Self::InvalidState(msg.into())
    }

    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage(msg.into())
    }

    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::Timeout(msg.into())
    }

    pub fn cancelled(msg: impl Into<String>) -> Self {
        Self::Cancelled(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Whether a fallback path exists for this error kind.
    pub fn fallback_available(&self) -> bool {
        matches!(
            self,
            Error::ServiceUnavailable(_)
                | Error::Llm(_)
                | Error::PipelineComponent(_)
                | Error::Timeout(_)
                | Error::Storage(_)
                | Error::CircuitOpen
                | Error::Http(_)
        )
    }

    /// Whether the error is a transient transport failure worth one retry.
    pub fn is_transient(&self) -> bool {
        match self {
            Error::Timeout(_) | Error::ServiceUnavailable(_) => true,
            Error::Http(e) => e.is_timeout() || e.is_connect(),
            _ => false,
        }
    }
}

/// Error severity levels used by the health monitor and log decoration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ErrorSeverity {
    /// Minor issue, system continues normally.
    Low,
    /// Some functionality affected, fallbacks used.
    Medium,
    /// Major issue, degraded operation.
    High,
    /// System barely functional.
    Critical,
}

impl Error {
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            Error::TemplateLoad(_) => ErrorSeverity::Critical,
            Error::InvalidState(_) => ErrorSeverity::High,
            Error::ServiceUnavailable(_)
            | Error::Llm(_)
            | Error::PipelineComponent(_)
            | Error::Storage(_)
            | Error::CircuitOpen
            | Error::Timeout(_)
            | Error::Http(_) => ErrorSeverity::Medium,
            _ => ErrorSeverity::Low,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_circuit_open_message_is_exact() {
        assert_eq!(Error::CircuitOpen.to_string(), "Circuit breaker is OPEN");
    }

    #[test]
    fn test_template_load_is_critical() {
        assert_eq!(
            Error::template_load("missing file").severity(),
            ErrorSeverity::Critical
        );
    }

    #[test]
    fn test_fallback_availability() {
        assert!(Error::llm("parse failure").fallback_available());
        assert!(Error::CircuitOpen.fallback_available());
        assert!(!Error::template_load("x").fallback_available());
        assert!(!Error::invalid_state("x").fallback_available());
    }

    #[test]
    fn test_transient_classification() {
        assert!(Error::timeout("deadline").is_transient());
        assert!(!Error::llm("bad json").is_transient());
    }
}
