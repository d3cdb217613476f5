//! Session registry.
//!
//! One entry per session behind its own `RwLock`: chat history, the
//! resident state machine and any pending order confirmation. Per-session
//! operations serialize on the entry lock while distinct sessions proceed
//! independently.

use crate::contract::{ContractStateMachine, Product};
use crate::memory::Message;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

/// Mutable per-session state owned by the orchestrator.
#[derive(Debug, Default)]
pub struct SessionEntry {
    pub chat_history: Vec<Message>,
    pub resident_fsm: Option<ContractStateMachine>,
    pub pending_confirmation: Option<Product>,
    pub last_activity: Option<DateTime<Utc>>,
}

impl SessionEntry {
    pub fn touch(&mut self) {
        self.last_activity = Some(Utc::now());
    }

    pub fn add_chat_message(&mut self, message: Message) {
        self.chat_history.push(message);
        self.touch();
    }
}

/// Registry of per-session entries. The outer map lock is held only long
/// enough to resolve the entry; turns run under the entry's own lock.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: Mutex<HashMap<String, Arc<RwLock<SessionEntry>>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve (or create) the entry for a session.
    pub async fn entry(&self, session_id: &str) -> Arc<RwLock<SessionEntry>> {
        let mut sessions = self.sessions.lock().await;
        sessions
            .entry(session_id.to_string())
            .or_insert_with(|| Arc::new(RwLock::new(SessionEntry::default())))
            .clone()
    }

    /// Drop entries idle longer than `max_age_secs`; returns how many.
    pub async fn cleanup_idle(&self, max_age_secs: i64) -> usize {
        let cutoff = Utc::now() - chrono::Duration::seconds(max_age_secs);
        let mut sessions = self.sessions.lock().await;
        let before = sessions.len();
        let mut keep = HashMap::new();
        for (session_id, entry) in sessions.drain() {
            let idle = match entry.try_read() {
                Ok(guard) => guard
                    .last_activity
                    .map(|at| at < cutoff)
                    .unwrap_or(false),
                // An entry locked by an in-flight turn is not idle.
                Err(_) => false,
            };
            if !idle {
                keep.insert(session_id, entry);
            }
        }
        *sessions = keep;
        before - sessions.len()
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_entry_is_stable_per_session() {
        let registry = SessionRegistry::new();
        let first = registry.entry("s1").await;
        let second = registry.entry("s1").await;
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(registry.session_count().await, 1);
    }

    #[tokio::test]
    async fn test_chat_history_appends() {
        let registry = SessionRegistry::new();
        let entry = registry.entry("s1").await;
        {
            let mut guard = entry.write().await;
            guard.add_chat_message(Message::user("hello"));
            guard.add_chat_message(Message::assistant("hi"));
        }
        let guard = entry.read().await;
        assert_eq!(guard.chat_history.len(), 2);
        assert!(guard.last_activity.is_some());
    }

    #[tokio::test]
    async fn test_cleanup_removes_only_idle_entries() {
        let registry = SessionRegistry::new();
        let stale = registry.entry("stale").await;
        {
            let mut guard = stale.write().await;
            guard.last_activity = Some(Utc::now() - chrono::Duration::hours(48));
        }
        let fresh = registry.entry("fresh").await;
        {
            let mut guard = fresh.write().await;
            guard.touch();
        }

        let removed = registry.cleanup_idle(24 * 3600).await;
        assert_eq!(removed, 1);
        assert_eq!(registry.session_count().await, 1);
    }

    #[tokio::test]
    async fn test_distinct_sessions_do_not_contend() {
        let registry = Arc::new(SessionRegistry::new());
        let a = registry.entry("a").await;
        let b = registry.entry("b").await;

        // Holding a's write lock must not block b's.
        let _guard_a = a.write().await;
        let guard_b = tokio::time::timeout(std::time::Duration::from_millis(50), b.write()).await;
        assert!(guard_b.is_ok());
    }
}
