//! Recovery sweeper (C10): finds tasks stuck past the configured threshold,
//! asks an injected analyzer whether it's safe to auto-repair, and otherwise
//! escalates to manual intervention.

use crate::checkpoint::CheckpointStore;
use crate::config::RuntimeConfig;
use crate::errors::RecoveryError;
use crate::tool::Publisher;
use async_trait::async_trait;
use sagacore_common::{ExecutionState, OutboxEvent, OutboxEventType, TaskState, TaskStatus};
use std::sync::Arc;

/// Minimum confidence an analyzer must report before a repair is attempted
/// automatically, rather than escalated.
pub const AUTO_REPAIR_CONFIDENCE_THRESHOLD: f64 = 0.8;

#[derive(Debug, Clone)]
pub struct RepairDecision {
    pub can_auto_repair: bool,
    pub confidence: f64,
    pub corrected_state: Option<ExecutionState>,
    pub reason: String,
}

/// Inspects a stuck task and proposes a repair. The real analyzer is an
/// external classifier (spec.md §5); this is the seam it plugs into.
#[async_trait]
pub trait RepairAnalyzer: Send + Sync {
    async fn analyze(&self, task: &TaskState) -> RepairDecision;
}

/// Shadow-runs a proposed correction against the real tool stack to see
/// whether it diverges from what actually happened, before trusting it.
#[async_trait]
pub trait DryRunner: Send + Sync {
    async fn diverges(&self, task: &TaskState, corrected: &ExecutionState) -> bool;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SweepAction {
    Repaired,
    Escalated,
    Skipped,
}

pub struct Sweeper<'a> {
    checkpoints: &'a CheckpointStore<'a>,
    config: &'a RuntimeConfig,
    analyzer: Arc<dyn RepairAnalyzer>,
    dry_runner: Option<Arc<dyn DryRunner>>,
    publisher: Arc<dyn Publisher>,
}

impl<'a> Sweeper<'a> {
    pub fn new(
        checkpoints: &'a CheckpointStore<'a>,
        config: &'a RuntimeConfig,
        analyzer: Arc<dyn RepairAnalyzer>,
        publisher: Arc<dyn Publisher>,
    ) -> Self {
        Self {
            checkpoints,
            config,
            analyzer,
            dry_runner: None,
            publisher,
        }
    }

    pub fn with_dry_runner(mut self, dry_runner: Arc<dyn DryRunner>) -> Self {
        self.dry_runner = Some(dry_runner);
        self
    }

    /// Scans up to `config.recovery_batch_size` task rows, processing the
    /// stuck ones. Returns one `SweepAction` per stuck task it handled.
    pub async fn tick(&self) -> Result<Vec<(String, SweepAction)>, RecoveryError> {
        let (_, tasks) = self.checkpoints.scan_task_states(0, self.config.recovery_batch_size as i64)?;
        let mut outcomes = Vec::new();

        for task in tasks {
            if !task.is_stuck(chrono::Duration::from_std(self.config.recovery_stuck_threshold).unwrap_or_default()) {
                continue;
            }

            let action = self.handle_stuck_task(&task).await?;
            outcomes.push((task.execution_id.clone(), action));
        }

        Ok(outcomes)
    }

    async fn handle_stuck_task(&self, task: &TaskState) -> Result<SweepAction, RecoveryError> {
        if task.recovery_attempts >= self.config.recovery_max_attempts {
            self.escalate(task, "recovery attempts exhausted").await?;
            return Ok(SweepAction::Escalated);
        }

        let decision = self.analyzer.analyze(task).await;
        let eligible = decision.can_auto_repair && decision.confidence >= AUTO_REPAIR_CONFIDENCE_THRESHOLD;
        if !eligible {
            self.escalate(task, &decision.reason).await?;
            return Ok(SweepAction::Escalated);
        }

        let Some(corrected) = decision.corrected_state.clone() else {
            self.escalate(task, "analyzer declared auto-repairable but returned no corrected state").await?;
            return Ok(SweepAction::Escalated);
        };

        if let Some(dry_runner) = &self.dry_runner {
            if dry_runner.diverges(task, &corrected).await {
                self.escalate(task, "dry run diverged from proposed repair").await?;
                return Ok(SweepAction::Escalated);
            }
        }

        self.checkpoints.record_recovery_attempt(&task.execution_id)?;
        self.checkpoints
            .save_state_with_occ(&task.execution_id, || corrected.clone(), |s| *s = corrected.clone())?;
        self.checkpoints
            .transition_task_state(&task.execution_id, TaskStatus::InProgress, "auto-repaired by recovery sweeper")?;

        let event = OutboxEvent::new(
            format!("resume-{}-{}", task.execution_id, task.segment_number),
            OutboxEventType::WorkflowResume,
            &task.execution_id,
            serde_json::json!({ "reason": "auto-repair" }),
        );
        self.publisher
            .publish(&event)
            .await
            .map_err(|e| RecoveryError::AnalyzerFailed(e.0))?;

        Ok(SweepAction::Repaired)
    }

    async fn escalate(&self, task: &TaskState, reason: &str) -> Result<(), RecoveryError> {
        let event = OutboxEvent::new(
            format!("manual-{}-{}", task.execution_id, task.segment_number),
            OutboxEventType::SagaManualInterventionRequired,
            &task.execution_id,
            serde_json::json!({ "reason": reason }),
        );
        self.publisher
            .publish(&event)
            .await
            .map_err(|e| RecoveryError::AnalyzerFailed(e.0))
    }
}
