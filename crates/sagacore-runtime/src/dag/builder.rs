//! Step graph construction — a direct generalization of the orchestrator's
//! `DagBuilder::build` from `Phase` to `sagacore_common::Step`. Assumes the
//! plan has already passed `PlanValidator::validate`; this module only
//! builds the index and edge tables the scheduler walks.

use sagacore_common::{Plan, Step};
use std::collections::HashMap;

pub type StepIndex = usize;

#[derive(Debug)]
pub struct StepGraph {
    steps: Vec<Step>,
    index_by_id: HashMap<String, StepIndex>,
    /// index -> steps that depend on it
    forward_edges: Vec<Vec<StepIndex>>,
    /// index -> steps it depends on
    reverse_edges: Vec<Vec<StepIndex>>,
}

impl StepGraph {
    pub fn build(plan: &Plan) -> Self {
        let steps = plan.steps.clone();
        let index_by_id: HashMap<String, StepIndex> = steps
            .iter()
            .enumerate()
            .map(|(i, s)| (s.id.clone(), i))
            .collect();

        let mut forward_edges: Vec<Vec<StepIndex>> = vec![Vec::new(); steps.len()];
        let mut reverse_edges: Vec<Vec<StepIndex>> = vec![Vec::new(); steps.len()];

        for (to_idx, step) in steps.iter().enumerate() {
            for dep in &step.dependencies {
                if let Some(&from_idx) = index_by_id.get(dep) {
                    forward_edges[from_idx].push(to_idx);
                    reverse_edges[to_idx].push(from_idx);
                }
            }
        }

        Self {
            steps,
            index_by_id,
            forward_edges,
            reverse_edges,
        }
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn step(&self, index: StepIndex) -> &Step {
        &self.steps[index]
    }

    pub fn index_of(&self, id: &str) -> Option<StepIndex> {
        self.index_by_id.get(id).copied()
    }

    pub fn dependents(&self, index: StepIndex) -> &[StepIndex] {
        self.forward_edges.get(index).map_or(&[], |v| v.as_slice())
    }

    pub fn dependencies(&self, index: StepIndex) -> &[StepIndex] {
        self.reverse_edges.get(index).map_or(&[], |v| v.as_slice())
    }

    pub fn dependencies_satisfied(&self, index: StepIndex, completed: &std::collections::HashSet<StepIndex>) -> bool {
        self.dependencies(index).iter().all(|dep| completed.contains(dep))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn step(id: &str, number: u32, deps: &[&str]) -> Step {
        Step::new(id, number, "noop").with_dependencies(deps.iter().map(|s| s.to_string()).collect())
    }

    #[test]
    fn builds_forward_and_reverse_edges() {
        let plan = Plan::new(
            "p1",
            "i1",
            vec![step("s0", 0, &[]), step("s1", 1, &["s0"]), step("s2", 2, &["s0"])],
        );
        let graph = StepGraph::build(&plan);
        assert_eq!(graph.len(), 3);
        assert!(graph.dependencies(0).is_empty());
        assert_eq!(graph.dependencies(1), &[0]);
        let dependents = graph.dependents(0);
        assert!(dependents.contains(&1));
        assert!(dependents.contains(&2));
    }
}
