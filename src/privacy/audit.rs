//! Audit artifact emission.
//!
//! Artifacts are gzip-compressed JSON objects written to the object store
//! under `audit/<kind>/YYYY/MM/DD/<session_id>_HHMMSS.json.gz` with the
//! session, user and artifact type carried as object metadata. Retention is
//! declared in-band (`retention_policy: "7_years"`). Emission is
//! best-effort: a store failure is logged, never surfaced to the user turn.

use crate::memory::Message;
use crate::stores::ObjectStore;
use crate::types::Result;
use chrono::Utc;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::io::Write;
use std::sync::Arc;

const RETENTION_POLICY: &str = "7_years";

/// Artifact kinds map to path segments.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactKind {
    Chat,
    Fsm,
    Contract,
}

impl ArtifactKind {
    fn path_segment(&self) -> &'static str {
        match self {
            ArtifactKind::Chat => "chat",
            ArtifactKind::Fsm => "fsm",
            ArtifactKind::Contract => "contracts",
        }
    }

    fn artifact_type(&self) -> &'static str {
        match self {
            ArtifactKind::Chat => "chat_history",
            ArtifactKind::Fsm => "fsm_logs",
            ArtifactKind::Contract => "contract",
        }
    }
}

/// Object-store-backed audit writer.
#[derive(Debug)]
pub struct AuditStore {
    store: Arc<dyn ObjectStore>,
}

impl AuditStore {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }

    /// Complete chat history for a session.
    pub async fn store_chat_artifact(
        &self,
        session_id: &str,
        user_id: &str,
        chat_history: &[Message],
    ) -> bool {
        let payload = json!({
            "chat_history": chat_history,
            "message_count": chat_history.len(),
        });
        self.store_artifact(ArtifactKind::Chat, session_id, user_id, payload)
            .await
    }

    /// State transition log for a session.
    pub async fn store_fsm_artifact(
        &self,
        session_id: &str,
        user_id: &str,
        step_log: &[String],
    ) -> bool {
        let payload = json!({
            "fsm_logs": step_log,
            "transition_count": step_log.len(),
        });
        self.store_artifact(ArtifactKind::Fsm, session_id, user_id, payload)
            .await
    }

    /// Final contract document at completion.
    pub async fn store_contract_artifact(
        &self,
        session_id: &str,
        user_id: &str,
        contract: Value,
    ) -> bool {
        let payload = json!({"contract": contract});
        self.store_artifact(ArtifactKind::Contract, session_id, user_id, payload)
            .await
    }

    async fn store_artifact(
        &self,
        kind: ArtifactKind,
        session_id: &str,
        user_id: &str,
        payload: Value,
    ) -> bool {
        let result = self
            .try_store_artifact(kind, session_id, user_id, payload)
            .await;
        match result {
            Ok(key) => {
                tracing::info!(key = %key, "audit_artifact_stored");
                true
            }
            Err(error) => {
                tracing::error!(
                    session_id,
                    kind = kind.path_segment(),
                    error = %error,
                    "audit_artifact_store_failed"
                );
                false
            }
        }
    }

    async fn try_store_artifact(
        &self,
        kind: ArtifactKind,
        session_id: &str,
        user_id: &str,
        payload: Value,
    ) -> Result<String> {
        let now = Utc::now();
        let mut artifact = json!({
            "artifact_type": kind.artifact_type(),
            "session_id": session_id,
            "user_id": user_id,
            "timestamp": now.to_rfc3339(),
            "retention_policy": RETENTION_POLICY,
        });
        if let (Some(artifact_map), Some(payload_map)) =
            (artifact.as_object_mut(), payload.as_object())
        {
            for (key, value) in payload_map {
                artifact_map.insert(key.clone(), value.clone());
            }
        }

        let key = format!(
            "audit/{}/{}/{}_{}.json.gz",
            kind.path_segment(),
            now.format("%Y/%m/%d"),
            sanitize_session_id(session_id),
            now.format("%H%M%S"),
        );

        let body = compress(&serde_json::to_vec(&artifact)?)?;
        let metadata = BTreeMap::from([
            ("session_id".to_string(), session_id.to_string()),
            ("user_id".to_string(), user_id.to_string()),
            (
                "artifact_type".to_string(),
                kind.artifact_type().to_string(),
            ),
        ]);

        self.store.put_object(&key, body, metadata).await?;
        Ok(key)
    }
}

fn sanitize_session_id(session_id: &str) -> String {
    session_id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

fn compress(data: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data)?;
    Ok(encoder.finish()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stores::MemoryObjectStore;
    use flate2::read::GzDecoder;
    use std::io::Read;

    fn decompress(data: &[u8]) -> Value {
        let mut decoder = GzDecoder::new(data);
        let mut raw = Vec::new();
        decoder.read_to_end(&mut raw).unwrap();
        serde_json::from_slice(&raw).unwrap()
    }

    #[tokio::test]
    async fn test_contract_artifact_path_and_payload() {
        let store = Arc::new(MemoryObjectStore::new());
        let audit = AuditStore::new(store.clone());

        assert!(
            audit
                .store_contract_artifact("sess/1", "user-9", json!({"status": "completed"}))
                .await
        );

        let keys = store.keys();
        assert_eq!(keys.len(), 1);
        let key = &keys[0];
        assert!(key.starts_with("audit/contracts/"));
        assert!(key.contains("sess_1_"));
        assert!(key.ends_with(".json.gz"));

        let object = store.get(key).unwrap();
        assert_eq!(object.metadata["session_id"], "sess/1");
        assert_eq!(object.metadata["user_id"], "user-9");
        assert_eq!(object.metadata["artifact_type"], "contract");

        let artifact = decompress(&object.body);
        assert_eq!(artifact["artifact_type"], "contract");
        assert_eq!(artifact["retention_policy"], RETENTION_POLICY);
        assert_eq!(artifact["contract"]["status"], "completed");
    }

    #[tokio::test]
    async fn test_chat_artifact_counts_messages() {
        let store = Arc::new(MemoryObjectStore::new());
        let audit = AuditStore::new(store.clone());
        let history = vec![Message::user("hi"), Message::assistant("hello")];

        audit.store_chat_artifact("s1", "u1", &history).await;

        let key = store.keys().pop().unwrap();
        assert!(key.starts_with("audit/chat/"));
        let artifact = decompress(&store.get(&key).unwrap().body);
        assert_eq!(artifact["message_count"], 2);
        assert_eq!(artifact["artifact_type"], "chat_history");
    }

    #[tokio::test]
    async fn test_fsm_artifact() {
        let store = Arc::new(MemoryObjectStore::new());
        let audit = AuditStore::new(store.clone());

        audit
            .store_fsm_artifact("s1", "u1", &["start -> search".to_string()])
            .await;

        let key = store.keys().pop().unwrap();
        assert!(key.starts_with("audit/fsm/"));
        let artifact = decompress(&store.get(&key).unwrap().body);
        assert_eq!(artifact["transition_count"], 1);
    }
}
