//! Saga Coordinator (C7): on failure, walks completed steps in reverse
//! commit order and invokes each one's compensation, never stopping the
//! sweep on a single failure.

use crate::checkpoint::CheckpointStore;
use crate::errors::SagaError;
use crate::tool::ToolInvoker;
use sagacore_common::{CompensationOutcome, CompensationRegistration, ExecutionState};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SagaResult {
    Compensated,
    Partial { compensated: usize, total: usize },
}

/// Static "needs-compensation" table (spec.md §4.7), consulted when a tool's
/// own result carries no explicit compensation sidecar.
fn default_compensation_tool(tool_name: &str) -> Option<&'static str> {
    match tool_name {
        "book_ride" => Some("cancel_ride"),
        "book_hotel" => Some("cancel_hotel"),
        "book_flight" => Some("cancel_flight"),
        "book_restaurant" => Some("cancel_restaurant"),
        _ => None,
    }
}

/// What to register, if anything, after a step completes successfully:
/// prefer a `compensation: {toolName, parameters}` sidecar in the tool's own
/// output, fall back to the static table, and register nothing for a tool
/// that needs no undo.
pub fn resolve_compensation(step_id: &str, tool_name: &str, output: Option<&serde_json::Value>) -> Option<CompensationRegistration> {
    if let Some(sidecar) = output.and_then(|o| o.get("compensation")) {
        if let Some(compensation_tool) = sidecar.get("toolName").and_then(|v| v.as_str()) {
            let parameters = sidecar
                .get("parameters")
                .and_then(|v| v.as_object())
                .map(|m| m.clone().into_iter().collect())
                .unwrap_or_default();
            return Some(CompensationRegistration::new(step_id, compensation_tool, parameters));
        }
    }
    default_compensation_tool(tool_name).map(|tool| CompensationRegistration::new(step_id, tool, Default::default()))
}

pub struct SagaCoordinator<'a> {
    checkpoints: &'a CheckpointStore<'a>,
    invoker: &'a dyn ToolInvoker,
    compensation_timeout: Duration,
}

impl<'a> SagaCoordinator<'a> {
    pub fn new(checkpoints: &'a CheckpointStore<'a>, invoker: &'a dyn ToolInvoker, compensation_timeout: Duration) -> Self {
        Self {
            checkpoints,
            invoker,
            compensation_timeout,
        }
    }

    /// Registrations recorded in `context`, in commit order (ascending step
    /// index). Under the single-writer-per-segment regime, commit order and
    /// step index coincide, so reversing this list is reverse commit order.
    fn registrations(state: &ExecutionState) -> Vec<(String, CompensationRegistration)> {
        let mut entries: Vec<(String, CompensationRegistration)> = state
            .context
            .iter()
            .filter_map(|(key, value)| {
                key.strip_prefix("compensation:").map(|step_id| {
                    let registration: CompensationRegistration =
                        serde_json::from_value(value.clone()).unwrap_or_else(|_| {
                            CompensationRegistration::new(step_id.to_string(), "unknown", Default::default())
                        });
                    (step_id.to_string(), registration)
                })
            })
            .collect();
        entries.sort_by_key(|(step_id, _)| {
            state
                .plan
                .as_ref()
                .and_then(|p| p.step_by_id(step_id))
                .map(|s| s.step_number)
                .unwrap_or(u32::MAX)
        });
        entries
    }

    pub async fn compensate(&self, execution_id: &str) -> Result<SagaResult, SagaError> {
        let state = self
            .checkpoints
            .get_execution_state(execution_id)?
            .ok_or_else(|| SagaError::Failed(format!("no execution state for {execution_id}")))?;

        let mut registrations = Self::registrations(&state);
        registrations.reverse();

        let total = registrations.len();
        let mut compensated = 0;

        for (step_id, mut registration) in registrations {
            if registration.executed {
                if registration.succeeded() {
                    compensated += 1;
                }
                continue;
            }

            let outcome = self.run_one(&registration).await;
            registration.mark_executed(outcome);
            if registration.succeeded() {
                compensated += 1;
            }

            let key = ExecutionState::compensation_key(&step_id);
            let encoded = serde_json::to_value(&registration).expect("CompensationRegistration always serializes");
            self.checkpoints.save_state_with_occ(
                execution_id,
                || state.clone(),
                |s| {
                    s.context.insert(key.clone(), encoded.clone());
                },
            )?;
        }

        if compensated == total {
            Ok(SagaResult::Compensated)
        } else {
            Ok(SagaResult::Partial { compensated, total })
        }
    }

    async fn run_one(&self, registration: &CompensationRegistration) -> CompensationOutcome {
        let params = serde_json::to_value(&registration.parameters).unwrap_or(serde_json::Value::Null);
        let call = self.invoker.execute(&registration.tool_name, None, &params);
        match tokio::time::timeout(self.compensation_timeout, call).await {
            Ok(Ok(_)) => CompensationOutcome::Succeeded,
            Ok(Err(_)) => CompensationOutcome::Failed,
            Err(_) => CompensationOutcome::Ambiguous,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RuntimeConfig;
    use crate::kv::KvStore;
    use crate::tool::ToolInvocationError;
    use async_trait::async_trait;
    use sagacore_common::Intent;

    struct AlwaysSucceeds;

    #[async_trait]
    impl ToolInvoker for AlwaysSucceeds {
        async fn execute(&self, _tool_name: &str, _tool_version: Option<&str>, _params: &serde_json::Value) -> Result<serde_json::Value, ToolInvocationError> {
            Ok(serde_json::json!({}))
        }
    }

    fn seed_state_with_registrations(checkpoints: &CheckpointStore, execution_id: &str, step_ids: &[&str]) {
        let intent = Intent::new("i1", "book_trip", "book a trip", 0.9);
        checkpoints
            .save_state_with_occ(
                execution_id,
                || ExecutionState::new(execution_id, intent.clone()),
                |s| {
                    for step_id in step_ids {
                        let key = ExecutionState::compensation_key(step_id);
                        let reg = CompensationRegistration::new(*step_id, "cancel_ride", Default::default());
                        s.context.insert(key, serde_json::to_value(&reg).unwrap());
                    }
                },
            )
            .unwrap();
    }

    #[tokio::test]
    async fn compensates_all_registrations_successfully() {
        let kv = KvStore::open_in_memory().unwrap();
        let config = RuntimeConfig::default();
        let checkpoints = CheckpointStore::new(&kv, &config);
        seed_state_with_registrations(&checkpoints, "exec-1", &["s0", "s1"]);

        let invoker = AlwaysSucceeds;
        let saga = SagaCoordinator::new(&checkpoints, &invoker, Duration::from_secs(1));
        let result = saga.compensate("exec-1").await.unwrap();
        assert_eq!(result, SagaResult::Compensated);
    }

    #[test]
    fn resolve_compensation_prefers_the_output_sidecar() {
        let output = serde_json::json!({
            "compensation": {"toolName": "custom_undo", "parameters": {"rideId": "r1"}},
        });
        let reg = resolve_compensation("s0", "book_ride", Some(&output)).unwrap();
        assert_eq!(reg.tool_name, "custom_undo");
        assert_eq!(reg.parameters["rideId"], "r1");
    }

    #[test]
    fn resolve_compensation_falls_back_to_the_static_table() {
        let reg = resolve_compensation("s0", "book_hotel", None).unwrap();
        assert_eq!(reg.tool_name, "cancel_hotel");
    }

    #[test]
    fn resolve_compensation_is_none_for_tools_with_no_undo() {
        assert!(resolve_compensation("s0", "send_email", None).is_none());
    }
}
