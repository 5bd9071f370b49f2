//! Typed error hierarchy for the saga engine.
//!
//! One enum per component, each convertible to the closed `ErrorCode`
//! taxonomy via `code()` so a caller two layers up can branch on the stable
//! string without downcasting a concrete error type.

use sagacore_common::ErrorCode;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum KvError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("value at {key} failed to deserialize: {source}")]
    Corrupt {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("cas conflict on {key}: expected version {expected}, found {actual}")]
    CasConflict {
        key: String,
        expected: u64,
        actual: u64,
    },
}

impl KvError {
    pub fn code(&self) -> ErrorCode {
        ErrorCode::MemoryOperationFailed
    }
}

#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error(transparent)]
    Kv(#[from] KvError),

    #[error("checkpoint payload corrupt: {0}")]
    Corrupt(String),

    #[error("illegal transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    #[error("no such execution: {0}")]
    NotFound(String),

    #[error("exhausted {0} OCC rebase attempts")]
    RebaseExhausted(u32),
}

impl CheckpointError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::InvalidTransition { .. } => ErrorCode::StateTransitionInvalid,
            Self::Kv(e) => e.code(),
            _ => ErrorCode::MemoryOperationFailed,
        }
    }
}

#[derive(Debug, Error)]
pub enum PlanError {
    #[error("duplicate step number {0}")]
    DuplicateStepNumber(u32),

    #[error("step numbers are not a contiguous 0..N range")]
    NonContiguousStepNumbers,

    #[error("step {step} depends on unknown step {dependency}")]
    UnknownDependency { step: String, dependency: String },

    #[error("step {step} depends on {dependency}, which does not precede it")]
    DependencyNotPrecedent { step: String, dependency: String },

    #[error("cycle detected among steps: {0:?}")]
    CircularDependency(Vec<String>),

    #[error("plan has {0} steps, exceeding the cap of {1}")]
    TooManySteps(usize, usize),

    #[error("step {0} has non-positive timeout")]
    InvalidTimeout(String),
}

impl PlanError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::CircularDependency(_) => ErrorCode::PlanCircularDependency,
            Self::TooManySteps(..) => ErrorCode::MaxStepsExceeded,
            _ => ErrorCode::PlanValidationFailed,
        }
    }
}

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),

    #[error("no plan set on execution {0}")]
    NoPlanSet(String),

    #[error("deadlock: no ready steps remain but {0} are unresolved")]
    Deadlock(usize),

    #[error("unknown step reference: {0}")]
    UnknownParameterReference(String),
}

impl SchedulerError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Checkpoint(e) => e.code(),
            Self::Deadlock(_) => ErrorCode::PlanValidationFailed,
            _ => ErrorCode::StepExecutionFailed,
        }
    }
}

#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("step {0} timed out")]
    Timeout(String),

    #[error("tool validation failed: {0}")]
    ToolValidation(String),

    #[error("tool {0} not found")]
    ToolNotFound(String),

    #[error("tool execution failed: {0}")]
    ToolExecution(String),
}

impl RunnerError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Timeout(_) => ErrorCode::StepTimeout,
            Self::ToolValidation(_) => ErrorCode::ToolValidationFailed,
            Self::ToolNotFound(_) => ErrorCode::ToolNotFound,
            Self::ToolExecution(_) => ErrorCode::ToolExecutionFailed,
        }
    }
}

#[derive(Debug, Error)]
pub enum SagaError {
    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),

    #[error("{compensated} of {total} compensations succeeded")]
    Partial { compensated: usize, total: usize },

    #[error("saga failed: {0}")]
    Failed(String),
}

impl SagaError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Checkpoint(e) => e.code(),
            Self::Partial { .. } => ErrorCode::CompensationPartial,
            Self::Failed(_) => ErrorCode::SagaFailed,
        }
    }
}

#[derive(Debug, Error)]
pub enum CompatError {
    #[error("no adapter path from {tool} {from} to {to}")]
    NoAdapterPath {
        tool: String,
        from: String,
        to: String,
    },

    #[error("tool {0} is not registered")]
    UnknownTool(String),
}

impl CompatError {
    pub fn code(&self) -> ErrorCode {
        ErrorCode::PlanValidationFailed
    }
}

#[derive(Debug, Error)]
pub enum OutboxError {
    #[error(transparent)]
    Kv(#[from] KvError),

    #[error("projection failed for event {0}: {1}")]
    ProjectionFailed(String, String),
}

impl OutboxError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Kv(e) => e.code(),
            Self::ProjectionFailed(..) => ErrorCode::InfrastructureError,
        }
    }
}

#[derive(Debug, Error)]
pub enum RecoveryError {
    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),

    #[error("repair analyzer failed: {0}")]
    AnalyzerFailed(String),
}

impl RecoveryError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Checkpoint(e) => e.code(),
            Self::AnalyzerFailed(_) => ErrorCode::InfrastructureError,
        }
    }
}
