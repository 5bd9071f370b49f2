//! DAG executor (C5 core loop): bounded-parallel batch dispatch over the
//! ready set, fan-out via `tokio::spawn` + a `Semaphore`, fan-in via `mpsc`,
//! the same shape as the orchestrator's `DagExecutor::execute`.

use super::builder::StepGraph;
use super::scheduler::{DagConfig, DagScheduler};
use crate::checkpoint::CheckpointStore;
use crate::config::RuntimeConfig;
use crate::errors::SchedulerError;
use crate::runner::{CorrectionOracle, StepOutcome, StepRunner};
use crate::saga::resolve_compensation;
use crate::tool::ToolInvoker;
use sagacore_common::{ExecutionState, ExecutionStatus, Plan, StepExecutionState, StepStatus};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{Semaphore, mpsc};
use tokio_util::sync::CancellationToken;

/// Outcome of running one segment of a plan: either every step reached a
/// terminal state, or the runner yielded because the segment's time budget
/// was exhausted and a resume was scheduled.
pub enum SegmentOutcome {
    Finished(ExecutionState),
    Yielded {
        state: ExecutionState,
        next_start_step_index: usize,
    },
}

pub struct DagExecutor<'a> {
    config: &'a RuntimeConfig,
    dag_config: DagConfig,
    checkpoints: &'a CheckpointStore<'a>,
    invoker: Arc<dyn ToolInvoker>,
    oracle: Arc<dyn CorrectionOracle>,
}

impl<'a> DagExecutor<'a> {
    pub fn new(
        config: &'a RuntimeConfig,
        dag_config: DagConfig,
        checkpoints: &'a CheckpointStore<'a>,
        invoker: Arc<dyn ToolInvoker>,
        oracle: Arc<dyn CorrectionOracle>,
    ) -> Self {
        Self {
            config,
            dag_config,
            checkpoints,
            invoker,
            oracle,
        }
    }

    /// Runs ready-set waves until the plan finishes, deadlocks, or the
    /// segment's checkpoint threshold is reached.
    pub async fn execute(&self, execution_id: &str, plan: &Plan, start_step_index: usize) -> Result<SegmentOutcome, SchedulerError> {
        let graph = StepGraph::build(plan);
        let scheduler = DagScheduler::new(graph);
        let segment_started = Instant::now();
        let segment_token = CancellationToken::new();
        let segment_token_guard = segment_token.clone();
        let segment_timeout_ms = self.config.segment_timeout_ms;
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(segment_timeout_ms)).await;
            segment_token_guard.cancel();
        });

        let mut state = self
            .checkpoints
            .get_execution_state(execution_id)?
            .ok_or_else(|| SchedulerError::NoPlanSet(execution_id.to_string()))?;

        if state.step_states.is_empty() {
            state.step_states = plan.steps.iter().map(|s| StepExecutionState::pending(s.id.clone())).collect();
        }
        if state.status != ExecutionStatus::Executing {
            state = self.checkpoints.save_state_with_occ(execution_id, || state.clone(), |s| {
                s.status = ExecutionStatus::Executing;
            })?;
        }

        // The segment this call is about to run, for TaskState.segment_number
        // (spec.md §3/§4.2(d)) — one past whatever the last checkpointed
        // segment was, or the first segment if no TaskState exists yet.
        let existing_task = self.checkpoints.get_task_state(execution_id)?;
        let segment_number = existing_task.as_ref().map(|t| t.segment_number + 1).unwrap_or(1);
        if matches!(existing_task.as_ref().map(|t| t.status), Some(sagacore_common::TaskStatus::Pending)) {
            self.checkpoints
                .transition_task_state(execution_id, sagacore_common::TaskStatus::InProgress, "segment started")?;
        }

        let aliases: HashMap<String, String> = HashMap::new();
        let semaphore = Arc::new(Semaphore::new(self.dag_config.max_parallel.max(1)));
        let config = Arc::new(self.config.clone());

        loop {
            // spec.md §5: an external caller cancels by flipping TaskState to
            // `cancelled`; observed here, at the top of every iteration,
            // before any new step is dispatched.
            if let Some(task) = self.checkpoints.get_task_state(execution_id)? {
                if task.status == sagacore_common::TaskStatus::Cancelled {
                    segment_token.cancel();
                    state = self.checkpoints.save_state_with_occ(execution_id, || state.clone(), |s| {
                        if s.status.can_transition_to(ExecutionStatus::Cancelled) {
                            s.status = ExecutionStatus::Cancelled;
                        }
                    })?;
                    let cursor = state.step_states.iter().position(|s| !s.status.is_terminal()).unwrap_or(state.step_states.len());
                    self.checkpoints.sync_task_progress(execution_id, &state, cursor, segment_number)?;
                    return Ok(SegmentOutcome::Finished(state));
                }
            }

            if scheduler.is_complete(&state.step_states) {
                self.checkpoints.sync_task_progress(execution_id, &state, state.step_states.len(), segment_number)?;
                return Ok(SegmentOutcome::Finished(state));
            }

            let elapsed = segment_started.elapsed().as_millis() as u64;
            if elapsed >= self.config.checkpoint_threshold_ms {
                let next_index = state.step_states.iter().position(|s| !s.status.is_terminal()).unwrap_or(state.step_states.len());
                self.checkpoints.sync_task_progress(execution_id, &state, next_index, segment_number)?;
                return Ok(SegmentOutcome::Yielded {
                    state,
                    next_start_step_index: next_index,
                });
            }

            let ready = scheduler.ready_steps(&state.step_states, start_step_index);
            if ready.is_empty() {
                if scheduler.is_deadlocked(&state.step_states, start_step_index) {
                    return Err(SchedulerError::Deadlock(
                        state.step_states.iter().filter(|s| !s.status.is_terminal()).count(),
                    ));
                }
                self.checkpoints.sync_task_progress(execution_id, &state, state.step_states.len(), segment_number)?;
                return Ok(SegmentOutcome::Finished(state));
            }

            // spec.md §4.5 step 8: the cursor advances past the highest step
            // number in this wave, not just by one step at a time.
            let cursor_after_wave = ready
                .iter()
                .map(|&idx| scheduler.graph().step(idx).step_number)
                .max()
                .map(|n| n as usize + 1)
                .unwrap_or(state.current_step_index);

            for &idx in &ready {
                state.step_states[idx].advance(StepStatus::InProgress);
                state.step_states[idx].started_at = Some(chrono::Utc::now());
                state.step_states[idx].attempts += 1;
            }

            let (tx, mut rx) = mpsc::channel::<(usize, StepOutcome)>(ready.len().max(1));
            for &idx in &ready {
                let step = scheduler.graph().step(idx).clone();
                let raw_params = serde_json::Map::from_iter(step.parameters.clone());
                let resolved = scheduler.resolve_parameters(&raw_params, &state.step_states, &aliases)?;
                let params = serde_json::Value::Object(resolved);

                let semaphore = semaphore.clone();
                let invoker = self.invoker.clone();
                let oracle = self.oracle.clone();
                let config = config.clone();
                let token = segment_token.clone();
                let tx = tx.clone();

                tokio::spawn(async move {
                    let permit = semaphore.acquire_owned().await.expect("semaphore not closed");
                    let runner = StepRunner::new(config.as_ref(), invoker.as_ref(), oracle.as_ref());
                    let outcome = runner.run_step(&step, &params, &token).await;
                    drop(permit);
                    let _ = tx.send((idx, outcome)).await;
                });
            }
            drop(tx);

            let mut outcomes = Vec::with_capacity(ready.len());
            while let Some(entry) = rx.recv().await {
                outcomes.push(entry);
                if outcomes.len() == ready.len() {
                    break;
                }
            }

            for (idx, outcome) in outcomes {
                let step_id = scheduler.graph().step(idx).id.clone();
                let tool_name = scheduler.graph().step(idx).tool_name.clone();
                let step_state = &mut state.step_states[idx];
                step_state.completed_at = Some(chrono::Utc::now());
                step_state.latency_ms = Some(outcome.latency_ms);
                match outcome.error {
                    None => {
                        step_state.output = outcome.output.clone();
                        step_state.advance(StepStatus::Completed);
                        if let Some(registration) = resolve_compensation(&step_id, &tool_name, outcome.output.as_ref()) {
                            let key = ExecutionState::compensation_key(&step_id);
                            state.context.insert(key, serde_json::to_value(registration).expect("CompensationRegistration always serializes"));
                        }
                    }
                    Some(error) => {
                        let status = if error.code == sagacore_common::ErrorCode::StepTimeout {
                            StepStatus::Timeout
                        } else {
                            StepStatus::Failed
                        };
                        step_state.error = Some(error);
                        step_state.advance(status);
                    }
                }
            }

            let step_states = state.step_states.clone();
            let context = state.context.clone();
            state = self.checkpoints.save_state_with_occ(execution_id, || state.clone(), |s| {
                s.step_states = step_states.clone();
                s.context = context.clone();
                s.current_step_index = cursor_after_wave;
            })?;

            if state.step_states.iter().any(|s| matches!(s.status, StepStatus::Failed | StepStatus::Timeout)) {
                self.checkpoints.sync_task_progress(execution_id, &state, cursor_after_wave, segment_number)?;
                return Ok(SegmentOutcome::Finished(state));
            }
        }
    }

    /// A one-step specialization of the batch path, sharing its semantics.
    pub async fn execute_single_step(&self, execution_id: &str, step_index: usize) -> Result<ExecutionState, SchedulerError> {
        let state = self
            .checkpoints
            .get_execution_state(execution_id)?
            .ok_or_else(|| SchedulerError::NoPlanSet(execution_id.to_string()))?;
        let plan = state.plan.clone().ok_or_else(|| SchedulerError::NoPlanSet(execution_id.to_string()))?;

        match self.execute(execution_id, &plan, step_index).await? {
            SegmentOutcome::Finished(state) => Ok(state),
            SegmentOutcome::Yielded { state, .. } => Ok(state),
        }
    }
}
