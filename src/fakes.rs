//! In-process stand-ins for the external collaborators `sagacore-runtime`
//! only defines as traits. Fine for local runs and the integration suite;
//! a real deployment supplies its own MCP/HTTP/pubsub transports instead.

use async_trait::async_trait;
use sagacore_common::{OutboxEvent, Step, StepError, TaskState};
use sagacore_runtime::{CorrectionOracle, PublishError, Publisher, RepairAnalyzer, RepairDecision, ToolInvocationError, ToolInvoker};
use serde_json::Value;

/// Echoes its parameters back as the tool's output. Lets `sagacore run`
/// exercise the scheduler, checkpointing, and compensation machinery end to
/// end without a real tool backend.
pub struct EchoToolInvoker;

#[async_trait]
impl ToolInvoker for EchoToolInvoker {
    async fn execute(&self, tool_name: &str, _tool_version: Option<&str>, params: &Value) -> Result<Value, ToolInvocationError> {
        if tool_name.is_empty() {
            return Err(ToolInvocationError {
                message: "empty tool name".to_string(),
                http_status: None,
                is_validation_error: true,
            });
        }
        Ok(serde_json::json!({ "tool": tool_name, "echoed": params }))
    }
}

/// Logs every outbox event instead of shipping it anywhere. Good enough for
/// `sagacore run`/`sagacore sweep` to show what would have been published.
pub struct LoggingPublisher;

#[async_trait]
impl Publisher for LoggingPublisher {
    async fn publish(&self, event: &OutboxEvent) -> Result<(), PublishError> {
        tracing::info!(event_type = ?event.event_type, payload = %event.payload, "outbox event");
        Ok(())
    }
}

/// Never attempts a correction; used wherever the runner needs an oracle and
/// none has been wired in.
pub struct NoOpCorrectionOracle;

#[async_trait]
impl CorrectionOracle for NoOpCorrectionOracle {
    async fn correct(&self, _step: &Step, _error: &StepError) -> Option<Value> {
        None
    }
}

/// Declines every repair; `sagacore sweep` falls back to this until a real
/// analyzer is wired in, so every stuck task is escalated rather than
/// silently auto-resumed.
pub struct ConservativeRepairAnalyzer;

#[async_trait]
impl RepairAnalyzer for ConservativeRepairAnalyzer {
    async fn analyze(&self, _task: &TaskState) -> RepairDecision {
        RepairDecision {
            can_auto_repair: false,
            confidence: 0.0,
            corrected_state: None,
            reason: "no repair analyzer configured".to_string(),
        }
    }
}
