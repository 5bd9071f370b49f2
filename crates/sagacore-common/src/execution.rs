//! ExecutionState — the per-saga state machine tracked across segments.

use crate::errors::StepError;
use crate::intent::Intent;
use crate::plan::Plan;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Global saga status, per spec.md §4.2's transition graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionStatus {
    Received,
    Parsing,
    Parsed,
    Planning,
    Planned,
    Executing,
    AwaitingConfirmation,
    Reflecting,
    Completed,
    Failed,
    Rejected,
    Timeout,
    Cancelled,
}

impl ExecutionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed | Self::Rejected | Self::Timeout | Self::Cancelled
        )
    }

    /// The allowed destinations for each status, exactly as spec.md §4.2
    /// specifies. This is the single source of truth the checkpoint store
    /// consults before accepting any transition.
    pub fn allowed_targets(&self) -> &'static [ExecutionStatus] {
        use ExecutionStatus::*;
        match self {
            Received => &[Parsing, Cancelled],
            Parsing => &[Parsed, Rejected, Timeout, Failed],
            Parsed => &[Planning, Cancelled],
            Planning => &[Planned, Rejected, Timeout, Failed],
            Planned => &[Executing, Cancelled],
            Executing => &[
                Completed,
                Failed,
                Timeout,
                Cancelled,
                Reflecting,
                AwaitingConfirmation,
            ],
            AwaitingConfirmation => &[Executing, Cancelled, Failed],
            Reflecting => &[Executing, Failed, Cancelled],
            Completed | Failed | Rejected | Timeout | Cancelled => &[],
        }
    }

    pub fn can_transition_to(&self, target: ExecutionStatus) -> bool {
        self.allowed_targets().contains(&target)
    }
}

/// Per-step lifecycle status. Once a step leaves `pending`/`in_progress` it
/// never regresses (spec.md §8).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    #[default]
    Pending,
    InProgress,
    Completed,
    Failed,
    Skipped,
    Timeout,
    AwaitingConfirmation,
}

impl StepStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed | Self::Skipped | Self::Timeout
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepExecutionState {
    pub step_id: String,
    #[serde(default)]
    pub status: StepStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<StepError>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
}

impl StepExecutionState {
    pub fn pending(step_id: impl Into<String>) -> Self {
        Self {
            step_id: step_id.into(),
            status: StepStatus::Pending,
            input: None,
            output: None,
            error: None,
            started_at: None,
            completed_at: None,
            attempts: 0,
            latency_ms: None,
        }
    }

    /// Apply a status transition, enforcing the monotonic-attempts /
    /// never-regress-from-terminal invariants from spec.md §8.
    pub fn advance(&mut self, status: StepStatus) {
        debug_assert!(
            !self.status.is_terminal() || status == self.status,
            "step {} attempted to regress from terminal status {:?} to {:?}",
            self.step_id,
            self.status,
            status
        );
        self.status = status;
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionState {
    pub execution_id: String,
    pub status: ExecutionStatus,
    pub intent: Intent,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan: Option<Plan>,
    #[serde(default)]
    pub step_states: Vec<StepExecutionState>,
    #[serde(default)]
    pub current_step_index: usize,
    /// Opaque context bag. `compensation:<stepId>` entries are the typed
    /// slots the Saga Coordinator owns; everything else is caller data.
    #[serde(default)]
    pub context: HashMap<String, serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<StepError>,
    #[serde(default)]
    pub token_usage: u64,
    #[serde(default)]
    pub latency_ms: u64,
    /// Monotonic version for optimistic concurrency control.
    #[serde(default)]
    pub version: u64,
}

impl ExecutionState {
    pub fn new(execution_id: impl Into<String>, intent: Intent) -> Self {
        let now = Utc::now();
        Self {
            execution_id: execution_id.into(),
            status: ExecutionStatus::Received,
            intent,
            plan: None,
            step_states: Vec::new(),
            current_step_index: 0,
            context: HashMap::new(),
            created_at: now,
            updated_at: now,
            error: None,
            token_usage: 0,
            latency_ms: 0,
            version: 0,
        }
    }

    pub fn step_state(&self, step_id: &str) -> Option<&StepExecutionState> {
        self.step_states.iter().find(|s| s.step_id == step_id)
    }

    pub fn step_state_mut(&mut self, step_id: &str) -> Option<&mut StepExecutionState> {
        self.step_states.iter_mut().find(|s| s.step_id == step_id)
    }

    pub fn compensation_key(step_id: &str) -> String {
        format!("compensation:{step_id}")
    }
}
