//! CompensationRegistration — the per-step undo record the Saga Coordinator
//! stores in `ExecutionState.context` at `compensation:<stepId>`.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompensationRegistration {
    pub step_id: String,
    pub tool_name: String,
    #[serde(default)]
    pub parameters: HashMap<String, serde_json::Value>,
    #[serde(default)]
    pub executed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<CompensationOutcome>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompensationOutcome {
    Succeeded,
    Failed,
    Ambiguous,
}

impl CompensationRegistration {
    pub fn new(step_id: impl Into<String>, tool_name: impl Into<String>, parameters: HashMap<String, serde_json::Value>) -> Self {
        Self {
            step_id: step_id.into(),
            tool_name: tool_name.into(),
            parameters,
            executed: false,
            result: None,
        }
    }

    pub fn mark_executed(&mut self, outcome: CompensationOutcome) {
        self.executed = true;
        self.result = Some(outcome);
    }

    pub fn succeeded(&self) -> bool {
        matches!(self.result, Some(CompensationOutcome::Succeeded))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mark_executed_is_idempotent_in_intent() {
        let mut reg = CompensationRegistration::new("s1", "cancel_ride", HashMap::new());
        assert!(!reg.executed);
        reg.mark_executed(CompensationOutcome::Succeeded);
        assert!(reg.executed);
        assert!(reg.succeeded());
    }
}
