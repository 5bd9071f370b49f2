//! Plan validator (C4): a direct generalization of the orchestrator's
//! `DagBuilder::build` — duplicate/missing-dependency detection, a
//! contiguous step-number range, and Kahn's-algorithm cycle detection, kept
//! because it also yields a topological order for free.

use crate::errors::PlanError;
use sagacore_common::{Plan, Step, plan::MAX_STEPS};
use std::collections::HashMap;

pub struct PlanValidator;

impl PlanValidator {
    pub fn validate(plan: &Plan) -> Result<(), PlanError> {
        if plan.steps.len() > MAX_STEPS {
            return Err(PlanError::TooManySteps(plan.steps.len(), MAX_STEPS));
        }

        let mut by_number: HashMap<u32, usize> = HashMap::new();
        for (idx, step) in plan.steps.iter().enumerate() {
            if by_number.insert(step.step_number, idx).is_some() {
                return Err(PlanError::DuplicateStepNumber(step.step_number));
            }
            if step.timeout_ms == 0 {
                return Err(PlanError::InvalidTimeout(step.id.clone()));
            }
        }

        let n = plan.steps.len() as u32;
        for i in 0..n {
            if !by_number.contains_key(&i) {
                return Err(PlanError::NonContiguousStepNumbers);
            }
        }

        let id_to_idx: HashMap<&str, usize> = plan
            .steps
            .iter()
            .enumerate()
            .map(|(i, s)| (s.id.as_str(), i))
            .collect();

        for step in &plan.steps {
            for dep in &step.dependencies {
                if !id_to_idx.contains_key(dep.as_str()) {
                    return Err(PlanError::UnknownDependency {
                        step: step.id.clone(),
                        dependency: dep.clone(),
                    });
                }
            }
        }

        // Cycle detection runs on the bare id graph, before the
        // step_number-precedence check: a true cycle always contains at
        // least one edge that also violates precedence, so checking
        // precedence first would shadow PLAN_CIRCULAR_DEPENDENCY with the
        // more generic DependencyNotPrecedent error for every cyclic plan.
        Self::validate_no_cycles(plan, &id_to_idx)?;

        for step in &plan.steps {
            for dep in &step.dependencies {
                let dep_idx = id_to_idx[dep.as_str()];
                let dep_step = &plan.steps[dep_idx];
                if dep_step.step_number >= step.step_number {
                    return Err(PlanError::DependencyNotPrecedent {
                        step: step.id.clone(),
                        dependency: dep.clone(),
                    });
                }
            }
        }

        Ok(())
    }

    fn validate_no_cycles(plan: &Plan, id_to_idx: &HashMap<&str, usize>) -> Result<(), PlanError> {
        let n = plan.steps.len();
        let mut forward: Vec<Vec<usize>> = vec![Vec::new(); n];
        let mut in_degree: Vec<usize> = vec![0; n];

        for (idx, step) in plan.steps.iter().enumerate() {
            in_degree[idx] = step.dependencies.len();
            for dep in &step.dependencies {
                let dep_idx = id_to_idx[dep.as_str()];
                forward[dep_idx].push(idx);
            }
        }

        let mut queue: Vec<usize> = in_degree
            .iter()
            .enumerate()
            .filter(|&(_, deg)| *deg == 0)
            .map(|(i, _)| i)
            .collect();

        let mut processed = 0;
        while let Some(node) = queue.pop() {
            processed += 1;
            for &dependent in &forward[node] {
                in_degree[dependent] -= 1;
                if in_degree[dependent] == 0 {
                    queue.push(dependent);
                }
            }
        }

        if processed != n {
            let remaining: Vec<String> = in_degree
                .iter()
                .enumerate()
                .filter(|&(_, deg)| *deg > 0)
                .map(|(i, _)| plan.steps[i].id.clone())
                .collect();
            return Err(PlanError::CircularDependency(remaining));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn step(id: &str, number: u32, deps: &[&str]) -> Step {
        Step::new(id, number, "noop").with_dependencies(deps.iter().map(|s| s.to_string()).collect())
    }

    #[test]
    fn validates_linear_plan() {
        let plan = Plan::new(
            "p1",
            "i1",
            vec![step("s0", 0, &[]), step("s1", 1, &["s0"]), step("s2", 2, &["s1"])],
        );
        assert!(PlanValidator::validate(&plan).is_ok());
    }

    #[test]
    fn rejects_missing_dependency() {
        let plan = Plan::new("p1", "i1", vec![step("s0", 0, &["nope"])]);
        let err = PlanValidator::validate(&plan).unwrap_err();
        assert!(matches!(err, PlanError::UnknownDependency { .. }));
    }

    #[test]
    fn rejects_dependency_that_does_not_precede() {
        // s0 depends on s1, but s1 has a higher step_number: not a valid
        // ordering even though the id graph alone would be acyclic.
        let plan = Plan::new("p1", "i1", vec![step("s0", 0, &["s1"]), step("s1", 1, &[])]);
        let err = PlanValidator::validate(&plan).unwrap_err();
        assert!(matches!(err, PlanError::DependencyNotPrecedent { .. }));
    }

    #[test]
    fn rejects_two_step_mutual_dependency_as_a_cycle() {
        let plan = Plan::new("p1", "i1", vec![step("s0", 0, &["s1"]), step("s1", 1, &["s0"])]);
        let err = PlanValidator::validate(&plan).unwrap_err();
        assert!(matches!(err, PlanError::CircularDependency(_)));
        assert_eq!(err.code(), sagacore_common::ErrorCode::PlanCircularDependency);
    }

    #[test]
    fn rejects_duplicate_step_number() {
        let plan = Plan::new("p1", "i1", vec![step("s0", 0, &[]), step("s1", 0, &[])]);
        let err = PlanValidator::validate(&plan).unwrap_err();
        assert!(matches!(err, PlanError::DuplicateStepNumber(0)));
    }

    #[test]
    fn rejects_more_than_max_steps() {
        let steps: Vec<Step> = (0..(MAX_STEPS as u32 + 1))
            .map(|i| step(&format!("s{i}"), i, &[]))
            .collect();
        let plan = Plan::new("p1", "i1", steps);
        let err = PlanValidator::validate(&plan).unwrap_err();
        assert!(matches!(err, PlanError::TooManySteps(..)));
    }
}
