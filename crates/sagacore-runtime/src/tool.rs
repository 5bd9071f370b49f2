//! External interfaces: the collaborators this engine calls out to but does
//! not implement. Concrete MCP/HTTP/realtime transports live in whichever
//! crate wires this engine up; these traits are the contract.

use async_trait::async_trait;
use sagacore_common::OutboxEvent;
use serde_json::Value;
use std::time::Duration;

/// Executes a single tool call and returns its raw JSON result.
#[async_trait]
pub trait ToolInvoker: Send + Sync {
    async fn execute(&self, tool_name: &str, tool_version: Option<&str>, params: &Value) -> Result<Value, ToolInvocationError>;
}

#[derive(Debug, Clone)]
pub struct ToolInvocationError {
    pub message: String,
    pub http_status: Option<u16>,
    pub is_validation_error: bool,
}

impl std::fmt::Display for ToolInvocationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for ToolInvocationError {}

/// Publishes an outbox event to whatever realtime/pubsub layer the deployment
/// uses. The outbox relay is the only caller.
#[async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(&self, event: &OutboxEvent) -> Result<(), PublishError>;
}

#[derive(Debug, Clone)]
pub struct PublishError(pub String);

impl std::fmt::Display for PublishError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for PublishError {}

/// Delivers a durable resume record at its due time. The checkpoint store
/// only persists `due_resumes` rows; this is what actually wakes them up.
#[async_trait]
pub trait ResumeScheduler: Send + Sync {
    async fn schedule(&self, execution_id: &str, delay: Duration) -> Result<(), PublishError>;
}
