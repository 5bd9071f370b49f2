//! Outbox events — the closed set from spec.md §6, published at-least-once
//! from the append-only log maintained by C9.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const DEFAULT_OUTBOX_EXPIRY_SECS: i64 = 7 * 24 * 3600;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OutboxEventType {
    SagaStepCompleted,
    SagaStepFailed,
    SagaCompensationTriggered,
    SagaCompensationCompleted,
    SagaCompleted,
    SagaFailed,
    WorkflowStateChanged,
    ContinueExecution,
    SagaManualInterventionRequired,
    WorkflowResume,
    #[serde(rename = "SagaCompensated")]
    SagaCompensated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutboxStatus {
    Pending,
    Processing,
    Processed,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboxEvent {
    pub id: String,
    pub event_type: OutboxEventType,
    /// Must carry `executionId` per spec.md §3.
    pub payload: serde_json::Value,
    pub status: OutboxStatus,
    #[serde(default)]
    pub attempts: u32,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl OutboxEvent {
    pub fn new(id: impl Into<String>, event_type: OutboxEventType, execution_id: &str, payload: serde_json::Value) -> Self {
        let mut payload = payload;
        if let serde_json::Value::Object(ref mut map) = payload {
            map.entry("executionId")
                .or_insert_with(|| serde_json::Value::String(execution_id.to_string()));
        }
        let now = Utc::now();
        Self {
            id: id.into(),
            event_type,
            payload,
            status: OutboxStatus::Pending,
            attempts: 0,
            created_at: now,
            expires_at: now + chrono::Duration::seconds(DEFAULT_OUTBOX_EXPIRY_SECS),
            error_message: None,
        }
    }

    pub fn execution_id(&self) -> Option<&str> {
        self.payload.get("executionId").and_then(|v| v.as_str())
    }

    pub fn is_expired(&self) -> bool {
        Utc::now() > self.expires_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn new_event_stamps_execution_id_into_payload() {
        let event = OutboxEvent::new(
            "evt-1",
            OutboxEventType::SagaStepCompleted,
            "exec-1",
            json!({"stepId": "s0"}),
        );
        assert_eq!(event.execution_id(), Some("exec-1"));
        assert_eq!(event.status, OutboxStatus::Pending);
    }

    #[test]
    fn event_type_serializes_to_closed_set_names() {
        let json = serde_json::to_string(&OutboxEventType::SagaCompensated).unwrap();
        assert_eq!(json, "\"SagaCompensated\"");
        let json = serde_json::to_string(&OutboxEventType::ContinueExecution).unwrap();
        assert_eq!(json, "\"CONTINUE_EXECUTION\"");
    }
}
