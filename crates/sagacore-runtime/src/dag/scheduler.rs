//! Ready-set computation and parameter resolution, generalized from the
//! orchestrator's `DagScheduler`/`PhaseStatus` machinery to
//! `Step`/`StepExecutionState`.

use super::builder::{StepGraph, StepIndex};
use crate::errors::SchedulerError;
use sagacore_common::{StepExecutionState, StepStatus};
use serde_json::Value;
use std::collections::HashSet;

/// Tunables for the scheduler's dispatch loop.
#[derive(Debug, Clone)]
pub struct DagConfig {
    pub max_parallel: usize,
}

impl Default for DagConfig {
    fn default() -> Self {
        Self { max_parallel: 4 }
    }
}

impl DagConfig {
    pub fn with_max_parallel(mut self, max: usize) -> Self {
        self.max_parallel = max;
        self
    }
}

pub struct DagScheduler {
    graph: StepGraph,
}

impl DagScheduler {
    pub fn new(graph: StepGraph) -> Self {
        Self { graph }
    }

    pub fn graph(&self) -> &StepGraph {
        &self.graph
    }

    /// Steps whose dependencies are all complete and whose `step_number` is
    /// at or past the segment's resume cursor, ties broken ascending by
    /// `step_number`.
    pub fn ready_steps(&self, step_states: &[StepExecutionState], start_step_index: usize) -> Vec<StepIndex> {
        let completed: HashSet<StepIndex> = step_states
            .iter()
            .enumerate()
            .filter(|(_, s)| s.status == StepStatus::Completed || s.status == StepStatus::Skipped)
            .map(|(i, _)| i)
            .collect();

        let mut ready: Vec<StepIndex> = (0..self.graph.len())
            .filter(|&i| {
                let state = &step_states[i];
                state.status == StepStatus::Pending
                    && self.graph.step(i).step_number as usize >= start_step_index
                    && self.graph.dependencies_satisfied(i, &completed)
            })
            .collect();

        ready.sort_by_key(|&i| self.graph.step(i).step_number);
        ready
    }

    /// `true` once every step is in a terminal state.
    pub fn is_complete(&self, step_states: &[StepExecutionState]) -> bool {
        step_states.iter().all(|s| s.status.is_terminal())
    }

    /// No ready steps and no steps in progress, but not all terminal: the
    /// plan can make no further progress.
    pub fn is_deadlocked(&self, step_states: &[StepExecutionState], start_step_index: usize) -> bool {
        if self.is_complete(step_states) {
            return false;
        }
        let any_in_progress = step_states.iter().any(|s| s.status == StepStatus::InProgress);
        any_in_progress == false && self.ready_steps(step_states, start_step_index).is_empty()
    }

    /// Resolve `$<stepId>.<field>` references against prior step outputs,
    /// plus any tool-level parameter aliases the caller supplies.
    pub fn resolve_parameters(
        &self,
        raw: &serde_json::Map<String, Value>,
        step_states: &[StepExecutionState],
        aliases: &std::collections::HashMap<String, String>,
    ) -> Result<serde_json::Map<String, Value>, SchedulerError> {
        let mut resolved = serde_json::Map::new();
        for (key, value) in raw {
            let out_key = aliases.get(key).cloned().unwrap_or_else(|| key.clone());
            resolved.insert(out_key, self.resolve_value(value, step_states)?);
        }
        Ok(resolved)
    }

    fn resolve_value(&self, value: &Value, step_states: &[StepExecutionState]) -> Result<Value, SchedulerError> {
        match value {
            Value::String(s) => {
                if let Some(reference) = s.strip_prefix('$') {
                    let mut parts = reference.splitn(2, '.');
                    let step_id = parts.next().unwrap_or_default();
                    let field = parts.next();
                    let state = step_states
                        .iter()
                        .find(|st| st.step_id == step_id)
                        .ok_or_else(|| SchedulerError::UnknownParameterReference(s.clone()))?;
                    let output = state
                        .output
                        .as_ref()
                        .ok_or_else(|| SchedulerError::UnknownParameterReference(s.clone()))?;
                    let resolved = match field {
                        Some(field) => output.get(field).cloned().unwrap_or(Value::Null),
                        None => output.clone(),
                    };
                    return Ok(resolved);
                }
                Ok(value.clone())
            }
            Value::Array(items) => {
                let resolved: Result<Vec<Value>, SchedulerError> =
                    items.iter().map(|v| self.resolve_value(v, step_states)).collect();
                Ok(Value::Array(resolved?))
            }
            Value::Object(map) => {
                let mut out = serde_json::Map::new();
                for (k, v) in map {
                    out.insert(k.clone(), self.resolve_value(v, step_states)?);
                }
                Ok(Value::Object(out))
            }
            other => Ok(other.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sagacore_common::{Plan, Step};

    fn step(id: &str, number: u32, deps: &[&str]) -> Step {
        Step::new(id, number, "noop").with_dependencies(deps.iter().map(|s| s.to_string()).collect())
    }

    fn states_for(plan: &Plan) -> Vec<StepExecutionState> {
        plan.steps.iter().map(|s| StepExecutionState::pending(s.id.clone())).collect()
    }

    #[test]
    fn ready_steps_respects_dependencies_and_start_index() {
        let plan = Plan::new("p1", "i1", vec![step("s0", 0, &[]), step("s1", 1, &["s0"])]);
        let scheduler = DagScheduler::new(StepGraph::build(&plan));
        let mut states = states_for(&plan);
        assert_eq!(scheduler.ready_steps(&states, 0), vec![0]);

        states[0].advance(StepStatus::Completed);
        assert_eq!(scheduler.ready_steps(&states, 0), vec![1]);
    }

    #[test]
    fn start_step_index_filters_out_earlier_steps() {
        let plan = Plan::new("p1", "i1", vec![step("s0", 0, &[]), step("s1", 1, &[])]);
        let scheduler = DagScheduler::new(StepGraph::build(&plan));
        let states = states_for(&plan);
        assert_eq!(scheduler.ready_steps(&states, 1), vec![1]);
    }

    #[test]
    fn resolves_step_output_references() {
        let plan = Plan::new("p1", "i1", vec![step("s0", 0, &[]), step("s1", 1, &["s0"])]);
        let scheduler = DagScheduler::new(StepGraph::build(&plan));
        let mut states = states_for(&plan);
        states[0].output = Some(serde_json::json!({"rideId": "r-1"}));
        states[0].advance(StepStatus::Completed);

        let mut raw = serde_json::Map::new();
        raw.insert("ride".to_string(), serde_json::json!("$s0.rideId"));
        let resolved = scheduler
            .resolve_parameters(&raw, &states, &std::collections::HashMap::new())
            .unwrap();
        assert_eq!(resolved["ride"], serde_json::json!("r-1"));
    }

    #[test]
    fn deadlock_detected_when_a_failed_step_blocks_its_dependent() {
        let plan = Plan::new("p1", "i1", vec![step("s0", 0, &[]), step("s1", 1, &["s0"])]);
        let scheduler = DagScheduler::new(StepGraph::build(&plan));
        let mut states = states_for(&plan);
        states[0].advance(StepStatus::Failed);
        assert!(scheduler.is_deadlocked(&states, 0));
        assert!(!scheduler.is_complete(&states));
    }
}
