//! Session persistence.
//!
//! Two levels: an in-process cache of the latest enhanced context
//! serialization (5 min TTL) in front of the durable session store, plus a
//! side cache of raw pipeline results (30 min TTL) for replay. Every
//! pipeline invocation also rolls up into per-session metrics.

use crate::contract::ContractContext;
use crate::resilience::HealthMonitor;
use crate::types::{PipelineConfig, Result};
use crate::stores::SessionStore;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Cached pipeline execution state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineState {
    pub result: Value,
    pub status: String,
    pub execution_time: Option<f64>,
    pub operation_mode: String,
    pub timestamp: DateTime<Utc>,
}

/// Rolled-up per-session pipeline metrics.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionMetrics {
    pub total_pipeline_executions: u64,
    pub total_execution_time: f64,
    pub average_execution_time: f64,
    pub pipeline_executions: HashMap<String, u64>,
    pub pipeline_success_count: u64,
    pub pipeline_failure_count: u64,
    pub pipeline_success_rate: f64,
    pub last_activity: Option<DateTime<Utc>>,
}

#[derive(Debug)]
struct CachedContext {
    context: Value,
    saved_at: Instant,
}

#[derive(Debug)]
struct CachedPipelineState {
    state: PipelineState,
    saved_at: Instant,
}

/// Enhanced session persistence for the pipeline architecture.
#[derive(Debug)]
pub struct SessionPersistence {
    store: Arc<dyn SessionStore>,
    health: Arc<HealthMonitor>,
    context_cache: Mutex<HashMap<String, CachedContext>>,
    pipeline_cache: Mutex<HashMap<String, HashMap<String, CachedPipelineState>>>,
    metrics: Mutex<HashMap<String, SessionMetrics>>,
    context_ttl: Duration,
    pipeline_ttl: Duration,
}

impl SessionPersistence {
    pub fn new(
        store: Arc<dyn SessionStore>,
        health: Arc<HealthMonitor>,
        config: &PipelineConfig,
    ) -> Self {
        Self {
            store,
            health,
            context_cache: Mutex::new(HashMap::new()),
            pipeline_cache: Mutex::new(HashMap::new()),
            metrics: Mutex::new(HashMap::new()),
            context_ttl: config.context_cache_ttl,
            pipeline_ttl: config.pipeline_cache_ttl,
        }
    }

    /// Record a pipeline execution in the side cache and session metrics.
    pub fn save_pipeline_state(
        &self,
        session_id: &str,
        pipeline_name: &str,
        result: Value,
        execution_time: Option<f64>,
        success: bool,
    ) {
        let state = PipelineState {
            status: result
                .get("status")
                .and_then(Value::as_str)
                .unwrap_or("unknown")
                .to_string(),
            result,
            execution_time,
            operation_mode: self.health.operation_mode().as_str().to_string(),
            timestamp: Utc::now(),
        };

        if let Ok(mut cache) = self.pipeline_cache.lock() {
            cache.entry(session_id.to_string()).or_default().insert(
                pipeline_name.to_string(),
                CachedPipelineState {
                    state,
                    saved_at: Instant::now(),
                },
            );
        }

        self.update_metrics(session_id, pipeline_name, execution_time, success);
    }

    /// Fresh cached pipeline state, if any. Expired entries are evicted.
    pub fn get_pipeline_state(
        &self,
        session_id: &str,
        pipeline_name: &str,
    ) -> Option<PipelineState> {
        let mut cache = self.pipeline_cache.lock().ok()?;
        let session_states = cache.get_mut(session_id)?;
        match session_states.get(pipeline_name) {
            Some(cached) if cached.saved_at.elapsed() < self.pipeline_ttl => {
                Some(cached.state.clone())
            }
            Some(_) => {
                session_states.remove(pipeline_name);
                None
            }
            None => None,
        }
    }

    /// Cached raw result of the most recent execution.
    pub fn get_cached_pipeline_result(
        &self,
        session_id: &str,
        pipeline_name: &str,
    ) -> Option<Value> {
        self.get_pipeline_state(session_id, pipeline_name)
            .map(|state| state.result)
    }

    /// Persist the enhanced context: dict projection plus pipeline metadata,
    /// session metrics, operation mode and a pipeline cache summary, into
    /// both the in-process cache and the durable store.
    pub async fn save_session_context(
        &self,
        session_id: &str,
        context: &ContractContext,
        pipeline_metadata: Option<Value>,
    ) -> Result<()> {
        let mut projection = context.to_value()?;

        if let Some(metadata) = pipeline_metadata {
            projection["pipeline_metadata"] = metadata;
        }
        if let Some(metrics) = self.session_metrics(session_id) {
            projection["session_metrics"] = serde_json::to_value(&metrics)?;
        }
        projection["operation_mode"] = json!(self.health.operation_mode().as_str());

        if let Ok(cache) = self.pipeline_cache.lock() {
            if let Some(states) = cache.get(session_id) {
                let summary: HashMap<&String, Value> = states
                    .iter()
                    .map(|(name, cached)| {
                        (
                            name,
                            json!({
                                "status": cached.state.status,
                                "timestamp": cached.state.timestamp,
                                "execution_time": cached.state.execution_time,
                            }),
                        )
                    })
                    .collect();
                projection["pipeline_cache_summary"] = json!(summary);
            }
        }

        if let Ok(mut cache) = self.context_cache.lock() {
            cache.insert(
                session_id.to_string(),
                CachedContext {
                    context: projection.clone(),
                    saved_at: Instant::now(),
                },
            );
        }

        self.store.set_context(session_id, projection).await?;
        tracing::debug!(session_id, "session_context_saved");
        Ok(())
    }

    /// Load the context: fresh in-process cache first, durable store next.
    /// Persistence-only metadata keys are stripped before deserialization.
    pub async fn load_session_context(&self, session_id: &str) -> Option<ContractContext> {
        if let Ok(cache) = self.context_cache.lock() {
            if let Some(cached) = cache.get(session_id) {
                if cached.saved_at.elapsed() < self.context_ttl {
                    return ContractContext::from_value(strip_metadata(cached.context.clone()))
                        .ok();
                }
            }
        }

        match self.store.get_context(session_id).await {
            Ok(Some(stored)) => {
                if let Some(metrics) = stored.get("session_metrics") {
                    if let Ok(metrics) = serde_json::from_value(metrics.clone()) {
                        if let Ok(mut all) = self.metrics.lock() {
                            all.insert(session_id.to_string(), metrics);
                        }
                    }
                }
                if let Ok(mut cache) = self.context_cache.lock() {
                    cache.insert(
                        session_id.to_string(),
                        CachedContext {
                            context: stored.clone(),
                            saved_at: Instant::now(),
                        },
                    );
                }
                match ContractContext::from_value(strip_metadata(stored)) {
                    Ok(context) => {
                        tracing::info!(session_id, "session_context_recovered");
                        Some(context)
                    }
                    Err(error) => {
                        tracing::error!(session_id, error = %error, "stored_context_unreadable");
                        None
                    }
                }
            }
            Ok(None) => None,
            Err(error) => {
                tracing::warn!(session_id, error = %error, "session_store_read_failed");
                None
            }
        }
    }

    /// Drop the stored context and per-session caches.
    pub async fn clear_session(&self, session_id: &str) {
        if let Ok(mut cache) = self.context_cache.lock() {
            cache.remove(session_id);
        }
        if let Ok(mut cache) = self.pipeline_cache.lock() {
            cache.remove(session_id);
        }
        if let Err(error) = self.store.clear_context(session_id).await {
            tracing::warn!(session_id, error = %error, "session_store_clear_failed");
        }
    }

    pub fn session_metrics(&self, session_id: &str) -> Option<SessionMetrics> {
        self.metrics
            .lock()
            .ok()
            .and_then(|metrics| metrics.get(session_id).cloned())
    }

    /// Remove in-memory cache entries older than the bound; returns how many
    /// entries were swept. The durable store applies its own TTLs.
    pub fn cleanup(&self, max_age: Duration) -> usize {
        let mut removed = 0;

        if let Ok(mut cache) = self.pipeline_cache.lock() {
            for states in cache.values_mut() {
                let before = states.len();
                states.retain(|_, cached| cached.saved_at.elapsed() < max_age);
                removed += before - states.len();
            }
            let empty: Vec<String> = cache
                .iter()
                .filter(|(_, states)| states.is_empty())
                .map(|(session, _)| session.clone())
                .collect();
            for session_id in empty {
                cache.remove(&session_id);
                if let Ok(mut metrics) = self.metrics.lock() {
                    metrics.remove(&session_id);
                }
                removed += 1;
            }
        }

        if let Ok(mut cache) = self.context_cache.lock() {
            let before = cache.len();
            cache.retain(|_, cached| cached.saved_at.elapsed() < max_age);
            removed += before - cache.len();
        }

        if removed > 0 {
            tracing::info!(removed, "expired_session_state_swept");
        }
        removed
    }

    fn update_metrics(
        &self,
        session_id: &str,
        pipeline_name: &str,
        execution_time: Option<f64>,
        success: bool,
    ) {
        let Ok(mut all) = self.metrics.lock() else {
            return;
        };
        let metrics = all.entry(session_id.to_string()).or_default();

        metrics.total_pipeline_executions += 1;
        metrics.last_activity = Some(Utc::now());
        if let Some(execution_time) = execution_time {
            metrics.total_execution_time += execution_time;
            metrics.average_execution_time =
                metrics.total_execution_time / metrics.total_pipeline_executions as f64;
        }
        *metrics
            .pipeline_executions
            .entry(pipeline_name.to_string())
            .or_default() += 1;

        if success {
            metrics.pipeline_success_count += 1;
        } else {
            metrics.pipeline_failure_count += 1;
        }
        let attempts = metrics.pipeline_success_count + metrics.pipeline_failure_count;
        metrics.pipeline_success_rate = if attempts > 0 {
            metrics.pipeline_success_count as f64 / attempts as f64
        } else {
            0.0
        };
    }
}

fn strip_metadata(mut value: Value) -> Value {
    if let Some(map) = value.as_object_mut() {
        for key in [
            "pipeline_metadata",
            "session_metrics",
            "operation_mode",
            "pipeline_cache_summary",
        ] {
            map.remove(key);
        }
    }
    value
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stores::MemorySessionStore;
    use crate::types::SessionId;

    fn persistence() -> SessionPersistence {
        SessionPersistence::new(
            Arc::new(MemorySessionStore::new()),
            Arc::new(HealthMonitor::new(3)),
            &PipelineConfig::default(),
        )
    }

    fn context(session: &str) -> ContractContext {
        ContractContext::new(SessionId::must(session), "templates/purchase_item.json")
    }

    #[tokio::test]
    async fn test_context_round_trip() {
        let persistence = persistence();
        let mut ctx = context("s1");
        ctx.product_query = Some("gpu".to_string());

        persistence
            .save_session_context("s1", &ctx, Some(json!({"search": "done"})))
            .await
            .unwrap();

        let loaded = persistence.load_session_context("s1").await.unwrap();
        assert_eq!(loaded.product_query.as_deref(), Some("gpu"));
        assert_eq!(loaded.session_id, ctx.session_id);
    }

    #[tokio::test]
    async fn test_durable_projection_carries_metadata() {
        let store = Arc::new(MemorySessionStore::new());
        let persistence = SessionPersistence::new(
            store.clone(),
            Arc::new(HealthMonitor::new(3)),
            &PipelineConfig::default(),
        );

        persistence.save_pipeline_state(
            "s1",
            "product_search",
            json!({"status": "ok", "items": []}),
            Some(1.2),
            true,
        );
        persistence
            .save_session_context("s1", &context("s1"), None)
            .await
            .unwrap();

        let stored = store.get_context("s1").await.unwrap().unwrap();
        assert_eq!(stored["operation_mode"], "full");
        assert_eq!(stored["session_metrics"]["total_pipeline_executions"], 1);
        assert_eq!(
            stored["pipeline_cache_summary"]["product_search"]["status"],
            "ok"
        );
    }

    #[tokio::test]
    async fn test_pipeline_state_cache_and_metrics() {
        let persistence = persistence();
        persistence.save_pipeline_state(
            "s1",
            "product_search",
            json!({"status": "ok", "items": []}),
            Some(1.0),
            true,
        );
        persistence.save_pipeline_state(
            "s1",
            "product_search",
            json!({"status": "ok", "items": []}),
            Some(2.0),
            true,
        );
        persistence.save_pipeline_state(
            "s1",
            "preference_match",
            json!({"status": "error"}),
            Some(0.5),
            false,
        );

        let state = persistence.get_pipeline_state("s1", "product_search").unwrap();
        assert_eq!(state.status, "ok");
        assert_eq!(state.execution_time, Some(2.0));

        let metrics = persistence.session_metrics("s1").unwrap();
        assert_eq!(metrics.total_pipeline_executions, 3);
        assert_eq!(metrics.pipeline_executions["product_search"], 2);
        assert!((metrics.pipeline_success_rate - 2.0 / 3.0).abs() < 1e-9);
        assert!((metrics.average_execution_time - 3.5 / 3.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_cleanup_sweeps_everything_older_than_bound() {
        let persistence = persistence();
        persistence.save_pipeline_state("s1", "product_search", json!({"status": "ok"}), None, true);
        persistence
            .save_session_context("s1", &context("s1"), None)
            .await
            .unwrap();

        assert_eq!(persistence.cleanup(Duration::from_secs(3600)), 0);
        let removed = persistence.cleanup(Duration::from_secs(0));
        assert!(removed >= 2);
        assert!(persistence.get_pipeline_state("s1", "product_search").is_none());
        assert!(persistence.session_metrics("s1").is_none());
    }

    #[tokio::test]
    async fn test_clear_session_drops_durable_copy() {
        let persistence = persistence();
        persistence
            .save_session_context("s1", &context("s1"), None)
            .await
            .unwrap();
        persistence.clear_session("s1").await;
        assert!(persistence.load_session_context("s1").await.is_none());
    }
}
