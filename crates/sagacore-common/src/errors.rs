//! The closed error-code taxonomy from spec.md §7.
//!
//! Every component error type in `sagacore-runtime` is convertible into one
//! of these codes via a `code()` method, so a caller two layers up can
//! branch on the stable string without downcasting a concrete error type.

use serde::{Deserialize, Serialize};

/// Stable, user-visible error codes. Renaming or removing a variant is a
/// breaking change to every consumer of this engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    IntentParseFailed,
    IntentValidationFailed,
    PlanGenerationFailed,
    PlanValidationFailed,
    PlanCircularDependency,
    StepExecutionFailed,
    StepTimeout,
    ToolNotFound,
    ToolExecutionFailed,
    ToolValidationFailed,
    StateTransitionInvalid,
    MemoryOperationFailed,
    LlmRequestFailed,
    LlmSchemaValidationFailed,
    LlmTimeout,
    TokenBudgetExceeded,
    MaxStepsExceeded,
    CompensationPartial,
    SagaCompensated,
    SagaFailed,
    InfrastructureError,
    UnknownError,
}

impl ErrorCode {
    /// The literal string spec.md uses to identify this code, independent of
    /// how serde happens to rename the variant.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::IntentParseFailed => "INTENT_PARSE_FAILED",
            Self::IntentValidationFailed => "INTENT_VALIDATION_FAILED",
            Self::PlanGenerationFailed => "PLAN_GENERATION_FAILED",
            Self::PlanValidationFailed => "PLAN_VALIDATION_FAILED",
            Self::PlanCircularDependency => "PLAN_CIRCULAR_DEPENDENCY",
            Self::StepExecutionFailed => "STEP_EXECUTION_FAILED",
            Self::StepTimeout => "STEP_TIMEOUT",
            Self::ToolNotFound => "TOOL_NOT_FOUND",
            Self::ToolExecutionFailed => "TOOL_EXECUTION_FAILED",
            Self::ToolValidationFailed => "TOOL_VALIDATION_FAILED",
            Self::StateTransitionInvalid => "STATE_TRANSITION_INVALID",
            Self::MemoryOperationFailed => "MEMORY_OPERATION_FAILED",
            Self::LlmRequestFailed => "LLM_REQUEST_FAILED",
            Self::LlmSchemaValidationFailed => "LLM_SCHEMA_VALIDATION_FAILED",
            Self::LlmTimeout => "LLM_TIMEOUT",
            Self::TokenBudgetExceeded => "TOKEN_BUDGET_EXCEEDED",
            Self::MaxStepsExceeded => "MAX_STEPS_EXCEEDED",
            Self::CompensationPartial => "COMPENSATION_PARTIAL",
            Self::SagaCompensated => "SAGA_COMPENSATED",
            Self::SagaFailed => "SAGA_FAILED",
            Self::InfrastructureError => "INFRASTRUCTURE_ERROR",
            Self::UnknownError => "UNKNOWN_ERROR",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A structured step-level error: {code, message, details}.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepError {
    pub code: ErrorCode,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl StepError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    /// Authentication-style failures are never retried (spec.md §7).
    pub fn is_non_recoverable_auth_failure(&self) -> bool {
        let lower = self.message.to_lowercase();
        lower.contains("authentication failed")
            || lower.contains("invalid api key")
            || lower.contains("unauthorized")
    }
}

impl std::fmt::Display for StepError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for StepError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_code_round_trips_through_json() {
        let json = serde_json::to_string(&ErrorCode::StepTimeout).unwrap();
        let back: ErrorCode = serde_json::from_str(&json).unwrap();
        assert_eq!(back.as_str(), "STEP_TIMEOUT");
    }

    #[test]
    fn detects_auth_failures_case_insensitively() {
        let err = StepError::new(
            ErrorCode::ToolExecutionFailed,
            "Invalid API key - authentication failed",
        );
        assert!(err.is_non_recoverable_auth_failure());

        let ok = StepError::new(ErrorCode::ToolExecutionFailed, "Network error: timeout");
        assert!(!ok.is_non_recoverable_auth_failure());
    }
}
