//! Health monitoring and graceful degradation.
//!
//! Every pipeline error site and circuit breaker reports into the health
//! monitor; the derived operation mode decides which user-visible notice is
//! appended and whether advanced features give way to the simple ranker.

pub mod circuit_breaker;

pub use circuit_breaker::{CircuitBreaker, CircuitState};

use crate::types::Error;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Mutex, OnceLock};

/// Well-known service names tracked by the monitor.
pub const SERVICE_LLM: &str = "llm";
pub const SERVICE_PRODUCT_SEARCH: &str = "product_search";
pub const SERVICE_WEB_SCRAPING: &str = "web_scraping";
pub const SERVICE_ATTRIBUTE_ANALYSIS: &str = "attribute_analysis";
pub const SERVICE_REDIS: &str = "redis";

/// System-wide degradation level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum OperationMode {
    /// All services available.
    #[default]
    Full,
    /// Some services unavailable, fallbacks in use.
    Degraded,
    /// Only basic functionality available.
    Minimal,
}

impl OperationMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationMode::Full => "full",
            OperationMode::Degraded => "degraded",
            OperationMode::Minimal => "minimal",
        }
    }

    /// Sentence appended to replies at message boundaries; empty in full mode.
    pub fn user_notice(&self) -> &'static str {
        match self {
            OperationMode::Full => "",
            OperationMode::Degraded => {
                "Note: Some advanced features are temporarily unavailable, but I can still help you find great products."
            }
            OperationMode::Minimal => {
                "Note: I'm running in basic mode right now. I can help with simple product searches and comparisons."
            }
        }
    }
}

#[derive(Debug, Default)]
struct HealthState {
    service_available: BTreeMap<String, bool>,
    error_counts: BTreeMap<String, u32>,
    mode: OperationMode,
}

/// Tracks per-service consecutive error counts and derives the operation
/// mode from how many services are currently unavailable.
#[derive(Debug)]
pub struct HealthMonitor {
    state: Mutex<HealthState>,
    error_threshold: u32,
}

impl Default for HealthMonitor {
    fn default() -> Self {
        Self::new(3)
    }
}

impl HealthMonitor {
    pub fn new(error_threshold: u32) -> Self {
        let mut state = HealthState::default();
        for service in [
            SERVICE_LLM,
            SERVICE_PRODUCT_SEARCH,
            SERVICE_WEB_SCRAPING,
            SERVICE_ATTRIBUTE_ANALYSIS,
            SERVICE_REDIS,
        ] {
            state.service_available.insert(service.to_string(), true);
            state.error_counts.insert(service.to_string(), 0);
        }
        Self {
            state: Mutex::new(state),
            error_threshold,
        }
    }

    /// Report a service error; returns the resulting operation mode.
    /// Unknown services are registered on first report.
    pub fn report_service_error(&self, service: &str, error: &Error) -> OperationMode {
        let Ok(mut state) = self.state.lock() else {
            return OperationMode::Minimal;
        };

        let count = state.error_counts.entry(service.to_string()).or_insert(0);
        *count += 1;
        let count = *count;
        state
            .service_available
            .entry(service.to_string())
            .or_insert(true);

        if count >= self.error_threshold {
            state
                .service_available
                .insert(service.to_string(), false);
            tracing::warn!(
                service,
                errors = count,
                error = %error,
                "service_marked_unavailable"
            );
        }

        Self::update_mode(&mut state);
        state.mode
    }

    /// Report service recovery: the error count resets and availability is
    /// restored.
    pub fn report_service_recovery(&self, service: &str) {
        let Ok(mut state) = self.state.lock() else {
            return;
        };
        state.service_available.insert(service.to_string(), true);
        state.error_counts.insert(service.to_string(), 0);
        tracing::info!(service, "service_recovered");
        Self::update_mode(&mut state);
    }

    fn update_mode(state: &mut HealthState) {
        let unavailable = state
            .service_available
            .values()
            .filter(|available| !**available)
            .count();
        let mode = match unavailable {
            0 => OperationMode::Full,
            1 | 2 => OperationMode::Degraded,
            _ => OperationMode::Minimal,
        };
        if mode != state.mode {
            tracing::info!(mode = mode.as_str(), "operation_mode_updated");
            state.mode = mode;
        }
    }

    pub fn operation_mode(&self) -> OperationMode {
        self.state
            .lock()
            .map(|state| state.mode)
            .unwrap_or(OperationMode::Minimal)
    }

    pub fn is_service_available(&self, service: &str) -> bool {
        self.state
            .lock()
            .ok()
            .and_then(|state| state.service_available.get(service).copied())
            .unwrap_or(false)
    }

    /// Availability snapshot for diagnostics.
    pub fn snapshot(&self) -> BTreeMap<String, bool> {
        self.state
            .lock()
            .map(|state| state.service_available.clone())
            .unwrap_or_default()
    }
}

/// Process-global monitor shared by pipelines, breakers and the orchestrator.
pub fn health_monitor() -> &'static HealthMonitor {
    static MONITOR: OnceLock<HealthMonitor> = OnceLock::new();
    MONITOR.get_or_init(HealthMonitor::default)
}

/// Which tracked service a pipeline failure counts against.
pub fn service_for_pipeline(pipeline_name: &str) -> &'static str {
    match pipeline_name {
        "product_search_pipeline" | "product_search" => SERVICE_PRODUCT_SEARCH,
        "preference_match_pipeline" | "preference_match" => SERVICE_LLM,
        _ => SERVICE_LLM,
    }
}

/// User-facing sentence for a failed service, used when a pipeline error
/// reaches the reply.
pub fn user_friendly_error_message(error: &Error, context: &str) -> String {
    let base = match error {
        Error::Llm(_) => {
            "I'm having trouble with my AI analysis right now, but I can still help you find products using basic search and filtering."
        }
        Error::ServiceUnavailable(_) | Error::Timeout(_) | Error::Http(_) => {
            "Product search is temporarily unavailable. Please try again in a few moments, or let me know if you'd like to browse by category."
        }
        Error::Storage(_) | Error::CircuitOpen => {
            "I can't reach part of my memory right now, but I can keep helping with your current search."
        }
        _ => {
            "I'm experiencing some technical difficulties, but I'm still here to help you find the right product."
        }
    };
    if context.is_empty() {
        base.to_string()
    } else {
        format!("{base} {context}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn llm_error() -> Error {
        Error::llm("synthetic failure")
    }

    #[test]
    fn test_threshold_marks_service_unavailable() {
        let monitor = HealthMonitor::new(3);
        assert_eq!(monitor.operation_mode(), OperationMode::Full);

        monitor.report_service_error(SERVICE_LLM, &llm_error());
        monitor.report_service_error(SERVICE_LLM, &llm_error());
        assert!(monitor.is_service_available(SERVICE_LLM));
        assert_eq!(monitor.operation_mode(), OperationMode::Full);

        let mode = monitor.report_service_error(SERVICE_LLM, &llm_error());
        assert!(!monitor.is_service_available(SERVICE_LLM));
        assert_eq!(mode, OperationMode::Degraded);
    }

    #[test]
    fn test_recovery_resets_counts() {
        let monitor = HealthMonitor::new(2);
        monitor.report_service_error(SERVICE_REDIS, &Error::storage("down"));
        monitor.report_service_error(SERVICE_REDIS, &Error::storage("down"));
        assert_eq!(monitor.operation_mode(), OperationMode::Degraded);

        monitor.report_service_recovery(SERVICE_REDIS);
        assert!(monitor.is_service_available(SERVICE_REDIS));
        assert_eq!(monitor.operation_mode(), OperationMode::Full);

        // A single new error must not immediately re-degrade.
        monitor.report_service_error(SERVICE_REDIS, &Error::storage("down"));
        assert_eq!(monitor.operation_mode(), OperationMode::Full);
    }

    #[test]
    fn test_minimal_mode_at_three_unavailable() {
        let monitor = HealthMonitor::new(1);
        monitor.report_service_error(SERVICE_LLM, &llm_error());
        monitor.report_service_error(SERVICE_PRODUCT_SEARCH, &llm_error());
        assert_eq!(monitor.operation_mode(), OperationMode::Degraded);

        monitor.report_service_error(SERVICE_WEB_SCRAPING, &llm_error());
        assert_eq!(monitor.operation_mode(), OperationMode::Minimal);
    }

    #[test]
    fn test_mode_never_improves_without_recovery() {
        let monitor = HealthMonitor::new(1);
        monitor.report_service_error(SERVICE_LLM, &llm_error());
        assert_eq!(monitor.operation_mode(), OperationMode::Degraded);

        // Errors on other services cannot improve the mode.
        monitor.report_service_error(SERVICE_REDIS, &llm_error());
        assert!(monitor.operation_mode() >= OperationMode::Degraded);
    }

    #[test]
    fn test_unknown_service_registered_on_demand() {
        let monitor = HealthMonitor::new(1);
        monitor.report_service_error("exotic_backend", &llm_error());
        assert!(!monitor.is_service_available("exotic_backend"));
    }

    #[test]
    fn test_notices() {
        assert!(OperationMode::Full.user_notice().is_empty());
        assert!(OperationMode::Degraded
            .user_notice()
            .contains("Some advanced features are temporarily unavailable"));
        assert!(OperationMode::Minimal.user_notice().contains("basic mode"));
    }
}
