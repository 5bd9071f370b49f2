//! Plan / Step — the DAG of tool invocations a saga executes.
//!
//! This module is pure data. Structural validation (acyclicity, contiguous
//! step numbers, dependency ordering, the 100-step cap) lives in
//! `sagacore-runtime::plan::PlanValidator`, which is the only place allowed
//! to turn a `Plan` into something the scheduler trusts.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Default per-step timeout (spec.md §4.4).
pub const DEFAULT_STEP_TIMEOUT_MS: u64 = 30_000;
/// Default retry attempts for a step with no explicit retry policy.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 1;
/// Hard cap on the number of steps in a single plan (spec.md §3(e)).
pub const MAX_STEPS: usize = 100;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RetryPolicy {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

fn default_max_attempts() -> u32 {
    DEFAULT_MAX_ATTEMPTS
}

impl RetryPolicy {
    pub fn default_policy() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    pub id: String,
    pub step_number: u32,
    pub tool_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_version: Option<String>,
    #[serde(default)]
    pub parameters: HashMap<String, serde_json::Value>,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub requires_confirmation: bool,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default)]
    pub retry: Option<RetryPolicy>,
}

fn default_timeout_ms() -> u64 {
    DEFAULT_STEP_TIMEOUT_MS
}

impl Step {
    pub fn new(id: impl Into<String>, step_number: u32, tool_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            step_number,
            tool_name: tool_name.into(),
            tool_version: None,
            parameters: HashMap::new(),
            dependencies: Vec::new(),
            description: String::new(),
            requires_confirmation: false,
            timeout_ms: DEFAULT_STEP_TIMEOUT_MS,
            retry: None,
        }
    }

    pub fn with_dependencies(mut self, deps: Vec<String>) -> Self {
        self.dependencies = deps;
        self
    }

    pub fn with_parameters(mut self, params: HashMap<String, serde_json::Value>) -> Self {
        self.parameters = params;
        self
    }

    pub fn max_attempts(&self) -> u32 {
        self.retry
            .as_ref()
            .map(|r| r.max_attempts)
            .unwrap_or(DEFAULT_MAX_ATTEMPTS)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PlanBudget {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_time_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tool_calls: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    pub id: String,
    pub intent_id: String,
    pub steps: Vec<Step>,
    #[serde(default)]
    pub budget: PlanBudget,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl Plan {
    pub fn new(id: impl Into<String>, intent_id: impl Into<String>, steps: Vec<Step>) -> Self {
        Self {
            id: id.into(),
            intent_id: intent_id.into(),
            steps,
            budget: PlanBudget::default(),
            metadata: HashMap::new(),
        }
    }

    pub fn step_by_id(&self, id: &str) -> Option<&Step> {
        self.steps.iter().find(|s| s.id == id)
    }

    pub fn step_by_number(&self, number: u32) -> Option<&Step> {
        self.steps.iter().find(|s| s.step_number == number)
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn step_defaults_match_spec() {
        let step = Step::new("s1", 0, "book_ride");
        assert_eq!(step.timeout_ms, DEFAULT_STEP_TIMEOUT_MS);
        assert_eq!(step.max_attempts(), DEFAULT_MAX_ATTEMPTS);
    }

    #[test]
    fn plan_looks_up_steps_by_id_and_number() {
        let plan = Plan::new(
            "p1",
            "i1",
            vec![Step::new("s0", 0, "a"), Step::new("s1", 1, "b")],
        );
        assert_eq!(plan.step_by_id("s1").unwrap().tool_name, "b");
        assert_eq!(plan.step_by_number(0).unwrap().id, "s0");
        assert!(plan.step_by_number(5).is_none());
    }
}
