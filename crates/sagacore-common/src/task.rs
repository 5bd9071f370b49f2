//! TaskState — the segment-level record an external scheduler polls.

use crate::execution::ExecutionState;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// TTL applied to a TaskState after its last write (spec.md §3).
pub const TASK_STATE_TTL_SECS: u64 = 24 * 3600;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    #[default]
    Pending,
    InProgress,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskTransition {
    pub from: TaskStatus,
    pub to: TaskStatus,
    pub reason: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskState {
    pub execution_id: String,
    pub status: TaskStatus,
    pub current_step_index: usize,
    pub total_steps: usize,
    pub segment_number: u32,
    #[serde(default)]
    pub transitions: Vec<TaskTransition>,
    pub context: TaskContext,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub recovery_attempts: u32,
}

/// Wraps the current `ExecutionState` so TaskState carries execution
/// context inline, matching spec.md's `context.execution_state` field.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskContext {
    pub execution_state: ExecutionState,
}

impl TaskState {
    pub fn new(execution_id: impl Into<String>, total_steps: usize, execution_state: ExecutionState) -> Self {
        let now = Utc::now();
        Self {
            execution_id: execution_id.into(),
            status: TaskStatus::Pending,
            current_step_index: 0,
            total_steps,
            segment_number: 0,
            transitions: Vec::new(),
            context: TaskContext { execution_state },
            created_at: now,
            updated_at: now,
            completed_at: None,
            recovery_attempts: 0,
        }
    }

    /// Append a transition record. Does not enforce the status state
    /// machine itself — callers go through
    /// `CheckpointStore::transition_task_state`, which owns that contract.
    pub fn record_transition(&mut self, to: TaskStatus, reason: impl Into<String>) {
        let now = Utc::now();
        self.transitions.push(TaskTransition {
            from: self.status,
            to,
            reason: reason.into(),
            timestamp: now,
        });
        self.status = to;
        self.updated_at = now;
        if to == TaskStatus::Completed {
            self.completed_at = Some(now);
        }
    }

    pub fn is_stuck(&self, threshold: chrono::Duration) -> bool {
        !self.status.is_terminal() && Utc::now() - self.updated_at > threshold
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intent::Intent;

    fn fixture_execution_state() -> ExecutionState {
        ExecutionState::new("exec-1", Intent::new("i1", "book_trip", "book a trip", 0.9))
    }

    #[test]
    fn record_transition_appends_and_updates_status() {
        let mut task = TaskState::new("exec-1", 3, fixture_execution_state());
        task.record_transition(TaskStatus::InProgress, "started");
        assert_eq!(task.status, TaskStatus::InProgress);
        assert_eq!(task.transitions.len(), 1);
        assert_eq!(task.transitions[0].from, TaskStatus::Pending);

        task.record_transition(TaskStatus::Completed, "done");
        assert!(task.completed_at.is_some());
    }

    #[test]
    fn stuck_detection_respects_terminal_status() {
        let mut task = TaskState::new("exec-1", 3, fixture_execution_state());
        task.updated_at = Utc::now() - chrono::Duration::hours(1);
        assert!(task.is_stuck(chrono::Duration::minutes(5)));

        task.record_transition(TaskStatus::Completed, "done");
        task.updated_at = Utc::now() - chrono::Duration::hours(1);
        assert!(!task.is_stuck(chrono::Duration::minutes(5)));
    }
}
