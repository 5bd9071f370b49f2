//! Checkpoint store (C2): a typed, OCC-safe wrapper over the KV store for
//! `ExecutionState` and `TaskState`.

use crate::config::RuntimeConfig;
use crate::errors::{CheckpointError, KvError};
use crate::kv::KvStore;
use rand::Rng;
use sagacore_common::{ExecutionState, ExecutionStatus, TaskState, TaskStatus};
use std::time::Duration;

fn execution_key(execution_id: &str) -> String {
    format!("execution:state:{execution_id}")
}

fn task_key(execution_id: &str) -> String {
    format!("execution:task:{execution_id}")
}

pub struct CheckpointStore<'a> {
    kv: &'a KvStore,
    config: &'a RuntimeConfig,
}

impl<'a> CheckpointStore<'a> {
    pub fn new(kv: &'a KvStore, config: &'a RuntimeConfig) -> Self {
        Self { kv, config }
    }

    fn load_execution(&self, execution_id: &str) -> Result<Option<(ExecutionState, u64)>, CheckpointError> {
        let key = execution_key(execution_id);
        let Some(raw) = self.kv.get(&key)? else {
            return Ok(None);
        };
        let version = raw
            .get("__version")
            .and_then(|v| v.as_u64())
            .unwrap_or(0);
        let state: ExecutionState = serde_json::from_value(raw)
            .map_err(|e| CheckpointError::Corrupt(e.to_string()))?;
        Ok(Some((state, version)))
    }

    fn encode(state: &ExecutionState, version: u64) -> serde_json::Value {
        let mut value = serde_json::to_value(state).expect("ExecutionState always serializes");
        if let serde_json::Value::Object(ref mut map) = value {
            map.insert("__version".to_string(), serde_json::json!(version));
        }
        value
    }

    /// Load-mutate-CAS-write with bounded rebase retries. `mutator` is
    /// re-applied from the freshly reloaded state on every retry — it never
    /// replays a stale in-memory copy.
    pub fn save_state_with_occ(
        &self,
        execution_id: &str,
        fresh: impl Fn() -> ExecutionState,
        mutator: impl Fn(&mut ExecutionState),
    ) -> Result<ExecutionState, CheckpointError> {
        let mut attempt = 0;
        loop {
            let (mut state, version) = match self.load_execution(execution_id)? {
                Some((state, version)) => (state, version),
                None => (fresh(), 0),
            };
            let from_status = state.status;
            mutator(&mut state);
            if from_status != state.status && !from_status.can_transition_to(state.status) {
                return Err(CheckpointError::InvalidTransition {
                    from: format!("{from_status:?}"),
                    to: format!("{:?}", state.status),
                });
            }
            state.version = version + 1;
            state.updated_at = chrono::Utc::now();

            let encoded = Self::encode(&state, version);
            let result = self
                .kv
                .cas(&execution_key(execution_id), version, &encoded)?;
            if result.success {
                return Ok(state);
            }

            attempt += 1;
            if attempt > self.config.occ_max_rebases {
                return Err(CheckpointError::RebaseExhausted(self.config.occ_max_rebases));
            }
            std::thread::sleep(backoff_delay(attempt, self.config));
        }
    }

    pub fn get_execution_state(&self, execution_id: &str) -> Result<Option<ExecutionState>, CheckpointError> {
        Ok(self.load_execution(execution_id)?.map(|(s, _)| s))
    }

    pub fn get_task_state(&self, execution_id: &str) -> Result<Option<TaskState>, CheckpointError> {
        let Some(raw) = self.kv.get(&task_key(execution_id))? else {
            return Ok(None);
        };
        serde_json::from_value(raw).map(Some).map_err(|e| CheckpointError::Corrupt(e.to_string()))
    }

    pub fn create_task_state(&self, task: &TaskState) -> Result<(), CheckpointError> {
        let value = serde_json::to_value(task).expect("TaskState always serializes");
        self.kv
            .set_expiring(&task_key(&task.execution_id), &value, task_state_ttl())?;
        Ok(())
    }

    pub fn transition_task_state(
        &self,
        execution_id: &str,
        to: TaskStatus,
        reason: &str,
    ) -> Result<TaskState, CheckpointError> {
        let mut task = self
            .get_task_state(execution_id)?
            .ok_or_else(|| CheckpointError::NotFound(execution_id.to_string()))?;

        if task.status.is_terminal() {
            return Err(CheckpointError::InvalidTransition {
                from: format!("{:?}", task.status),
                to: format!("{to:?}"),
            });
        }

        task.record_transition(to, reason);
        let value = serde_json::to_value(&task).expect("TaskState always serializes");
        self.kv
            .set_expiring(&task_key(execution_id), &value, task_state_ttl())?;
        Ok(task)
    }

    /// Enqueues a durable resume record; the delivery mechanism itself is an
    /// external scheduler's concern (spec.md §4.7) — this only persists the
    /// row and exposes `due_resumes` for it to poll.
    pub fn schedule_resume(
        &self,
        execution_id: &str,
        plan_id: &str,
        start_step_index: usize,
        segment_number: u32,
        trace_id: &str,
        delay: chrono::Duration,
    ) -> Result<(), KvError> {
        let due_at = chrono::Utc::now() + delay;
        let key = format!("resume:{execution_id}:{segment_number}");
        self.kv.set(
            &key,
            &serde_json::json!({
                "executionId": execution_id,
                "planId": plan_id,
                "startStepIndex": start_step_index,
                "segmentNumber": segment_number,
                "traceId": trace_id,
                "dueAt": due_at.to_rfc3339(),
            }),
        )?;
        self.kv.zadd("resume:due", &key, due_at.timestamp() as f64)
    }

    /// Rows whose `dueAt` has passed, oldest first.
    pub fn due_resumes(&self, now: chrono::DateTime<chrono::Utc>) -> Result<Vec<serde_json::Value>, KvError> {
        let all = self.kv.zrange("resume:due", 0, -1)?;
        let mut due = Vec::new();
        for (key, score) in all {
            if score as i64 <= now.timestamp() {
                if let Some(value) = self.kv.get(&key)? {
                    due.push(value);
                }
            }
        }
        Ok(due)
    }

    /// Refreshes the live fields a scheduler mutates every segment — the
    /// embedded `ExecutionState` snapshot, the resume cursor, and which
    /// segment just ran — without touching `status` (that belongs to
    /// `transition_task_state`). A no-op if no `TaskState` exists yet.
    pub fn sync_task_progress(
        &self,
        execution_id: &str,
        execution_state: &ExecutionState,
        current_step_index: usize,
        segment_number: u32,
    ) -> Result<Option<TaskState>, CheckpointError> {
        let Some(mut task) = self.get_task_state(execution_id)? else {
            return Ok(None);
        };
        task.context.execution_state = execution_state.clone();
        task.current_step_index = current_step_index;
        task.segment_number = segment_number;
        task.updated_at = chrono::Utc::now();
        let value = serde_json::to_value(&task).expect("TaskState always serializes");
        self.kv.set_expiring(&task_key(execution_id), &value, task_state_ttl())?;
        Ok(Some(task))
    }

    /// Bumps `recovery_attempts` without touching `status`, used by the
    /// sweeper before it decides whether to attempt an auto-repair.
    pub fn record_recovery_attempt(&self, execution_id: &str) -> Result<TaskState, CheckpointError> {
        let mut task = self
            .get_task_state(execution_id)?
            .ok_or_else(|| CheckpointError::NotFound(execution_id.to_string()))?;
        task.recovery_attempts += 1;
        task.updated_at = chrono::Utc::now();
        let value = serde_json::to_value(&task).expect("TaskState always serializes");
        self.kv.set_expiring(&task_key(execution_id), &value, task_state_ttl())?;
        Ok(task)
    }

    /// Scans every `TaskState` row via the `execution:task:*` key namespace.
    /// Used by the recovery sweeper, which has no other index of "every
    /// non-terminal task" to walk.
    pub fn scan_task_states(&self, cursor: i64, count: i64) -> Result<(i64, Vec<TaskState>), CheckpointError> {
        let (next_cursor, keys) = self.kv.scan(cursor, "execution:task:*", count)?;
        let mut states = Vec::with_capacity(keys.len());
        for key in keys {
            if let Some(raw) = self.kv.get(&key)? {
                let state: TaskState = serde_json::from_value(raw).map_err(|e| CheckpointError::Corrupt(e.to_string()))?;
                states.push(state);
            }
        }
        Ok((next_cursor, states))
    }
}

fn task_state_ttl() -> chrono::Duration {
    chrono::Duration::seconds(sagacore_common::task::TASK_STATE_TTL_SECS as i64)
}

fn backoff_delay(attempt: u32, config: &RuntimeConfig) -> Duration {
    let exp = config.occ_backoff_base_ms.saturating_mul(1u64 << attempt.min(16));
    let capped = exp.min(config.occ_backoff_max_ms);
    let jitter_span = (capped as f64 * config.occ_backoff_jitter) as u64;
    let jitter = if jitter_span > 0 {
        rand::thread_rng().gen_range(0..jitter_span)
    } else {
        0
    };
    Duration::from_millis(capped + jitter)
}

#[cfg(test)]
mod tests {
    use super::*;
    use sagacore_common::Intent;

    fn setup() -> (KvStore, RuntimeConfig) {
        (KvStore::open_in_memory().unwrap(), RuntimeConfig::default())
    }

    fn fresh_state() -> ExecutionState {
        ExecutionState::new("exec-1", Intent::new("i1", "book_trip", "book a trip", 0.9))
    }

    #[test]
    fn save_state_with_occ_creates_then_updates() {
        let (kv, config) = setup();
        let store = CheckpointStore::new(&kv, &config);

        let state = store
            .save_state_with_occ("exec-1", fresh_state, |s| {
                s.status = ExecutionStatus::Parsing;
            })
            .unwrap();
        assert_eq!(state.status, ExecutionStatus::Parsing);

        let state = store
            .save_state_with_occ("exec-1", fresh_state, |s| {
                s.status = ExecutionStatus::Parsed;
            })
            .unwrap();
        assert_eq!(state.status, ExecutionStatus::Parsed);
        assert_eq!(state.version, 2);
    }

    #[test]
    fn illegal_transition_is_rejected() {
        let (kv, config) = setup();
        let store = CheckpointStore::new(&kv, &config);
        let result = store.save_state_with_occ("exec-1", fresh_state, |s| {
            s.status = ExecutionStatus::Executing;
        });
        assert!(matches!(result, Err(CheckpointError::InvalidTransition { .. })));
    }

    #[test]
    fn task_state_transition_rejects_from_terminal() {
        let (kv, config) = setup();
        let store = CheckpointStore::new(&kv, &config);
        let task = TaskState::new("exec-1", 3, fresh_state());
        store.create_task_state(&task).unwrap();
        store
            .transition_task_state("exec-1", TaskStatus::Completed, "done")
            .unwrap();
        let result = store.transition_task_state("exec-1", TaskStatus::InProgress, "oops");
        assert!(result.is_err());
    }

    #[test]
    fn due_resumes_only_returns_past_due_rows() {
        let (kv, config) = setup();
        let store = CheckpointStore::new(&kv, &config);
        store
            .schedule_resume("exec-1", "plan-1", 2, 1, "trace-1", chrono::Duration::seconds(-10))
            .unwrap();
        store
            .schedule_resume("exec-2", "plan-1", 0, 0, "trace-2", chrono::Duration::seconds(600))
            .unwrap();
        let due = store.due_resumes(chrono::Utc::now()).unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0]["executionId"], "exec-1");
    }
}
