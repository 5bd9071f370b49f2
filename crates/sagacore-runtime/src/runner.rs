//! Time-budgeted step runner (C6): executes a single tool call under a
//! per-step timeout and a segment-wide cancellation deadline, and classifies
//! whatever the tool returns into the closed error taxonomy.

use crate::config::RuntimeConfig;
use crate::errors::RunnerError;
use crate::tool::{ToolInvocationError, ToolInvoker};
use regex::Regex;
use sagacore_common::{Step, StepError};
use std::sync::OnceLock;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// A one-shot correction attempt an external "correction oracle" gets to
/// make after a step fails, before the runner gives up on it. Modeled as a
/// trait so callers can supply a fake in tests; the real implementation is
/// out of scope (spec.md §1).
#[async_trait::async_trait]
pub trait CorrectionOracle: Send + Sync {
    async fn correct(&self, step: &Step, error: &StepError) -> Option<serde_json::Value>;
}

pub struct NoCorrection;

#[async_trait::async_trait]
impl CorrectionOracle for NoCorrection {
    async fn correct(&self, _step: &Step, _error: &StepError) -> Option<serde_json::Value> {
        None
    }
}

pub struct StepOutcome {
    pub output: Option<serde_json::Value>,
    pub error: Option<StepError>,
    pub latency_ms: u64,
}

pub struct StepRunner<'a> {
    config: &'a RuntimeConfig,
    invoker: &'a dyn ToolInvoker,
    oracle: &'a dyn CorrectionOracle,
}

impl<'a> StepRunner<'a> {
    pub fn new(config: &'a RuntimeConfig, invoker: &'a dyn ToolInvoker, oracle: &'a dyn CorrectionOracle) -> Self {
        Self { config, invoker, oracle }
    }

    pub async fn run_step(&self, step: &Step, params: &serde_json::Value, segment_token: &CancellationToken) -> StepOutcome {
        let started = Instant::now();
        let timeout = Duration::from_millis(step.timeout_ms.min(self.config.segment_timeout_ms));

        let result = tokio::select! {
            result = tokio::time::timeout(timeout, self.invoker.execute(&step.tool_name, step.tool_version.as_deref(), params)) => result,
            _ = segment_token.cancelled() => {
                return StepOutcome {
                    output: None,
                    error: Some(StepError::new(sagacore_common::ErrorCode::StepTimeout, "segment cancelled before step completed")),
                    latency_ms: started.elapsed().as_millis() as u64,
                };
            }
        };

        match result {
            Err(_elapsed) => StepOutcome {
                output: None,
                error: Some(StepError::new(sagacore_common::ErrorCode::StepTimeout, format!("step {} exceeded {}ms", step.id, timeout.as_millis()))),
                latency_ms: started.elapsed().as_millis() as u64,
            },
            Ok(Ok(value)) => StepOutcome {
                output: Some(value),
                error: None,
                latency_ms: started.elapsed().as_millis() as u64,
            },
            Ok(Err(invocation_error)) => {
                let mut step_error = classify(&invocation_error);
                step_error.details = http_status_details(&invocation_error);

                // spec.md §4.6: on a 4xx/5xx, the oracle may hand back
                // corrected parameters for one synchronous retry, within the
                // remaining step budget. Exhausting that retry is a failure.
                if step_error.details.is_some() {
                    if let Some(corrected_params) = self.oracle.correct(step, &step_error).await {
                        let remaining = timeout.saturating_sub(started.elapsed());
                        if !remaining.is_zero() {
                            let retry = tokio::time::timeout(
                                remaining,
                                self.invoker.execute(&step.tool_name, step.tool_version.as_deref(), &corrected_params),
                            )
                            .await;
                            if let Ok(Ok(value)) = retry {
                                return StepOutcome {
                                    output: Some(value),
                                    error: None,
                                    latency_ms: started.elapsed().as_millis() as u64,
                                };
                            }
                        }
                    }
                }

                StepOutcome {
                    output: None,
                    error: Some(step_error),
                    latency_ms: started.elapsed().as_millis() as u64,
                }
            }
        }
    }
}

fn classify(error: &ToolInvocationError) -> StepError {
    let code = if error.is_validation_error {
        sagacore_common::ErrorCode::ToolValidationFailed
    } else {
        sagacore_common::ErrorCode::ToolExecutionFailed
    };
    StepError::new(code, error.message.clone())
}

/// spec.md §4.6's literal 4-pattern extraction set, as one alternation.
/// Each arm has its own capture group since the status digits sit in a
/// different position in each pattern.
fn status_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(\d{3}) (?:Bad|Unauthorized|Forbidden|Not|Error|Server)|status:? (\d{3})|HTTP (\d{3})|error (\d{3})")
            .expect("valid regex")
    })
}

fn http_status_details(error: &ToolInvocationError) -> Option<serde_json::Value> {
    let status = error.http_status.or_else(|| {
        let captures = status_regex().captures(&error.message)?;
        captures
            .iter()
            .skip(1)
            .find_map(|m| m.and_then(|m| m.as_str().parse().ok()))
    })?;
    Some(serde_json::json!({ "httpStatus": status }))
}

impl RunnerError {
    pub fn from_step_error(error: &StepError) -> Self {
        match error.code {
            sagacore_common::ErrorCode::StepTimeout => RunnerError::Timeout(error.message.clone()),
            sagacore_common::ErrorCode::ToolValidationFailed => RunnerError::ToolValidation(error.message.clone()),
            sagacore_common::ErrorCode::ToolNotFound => RunnerError::ToolNotFound(error.message.clone()),
            _ => RunnerError::ToolExecution(error.message.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct FlakyInvoker;

    #[async_trait]
    impl ToolInvoker for FlakyInvoker {
        async fn execute(&self, _tool_name: &str, _tool_version: Option<&str>, _params: &serde_json::Value) -> Result<serde_json::Value, ToolInvocationError> {
            Err(ToolInvocationError {
                message: "upstream returned 503 Server Error".to_string(),
                http_status: None,
                is_validation_error: false,
            })
        }
    }

    struct SlowInvoker;

    #[async_trait]
    impl ToolInvoker for SlowInvoker {
        async fn execute(&self, _tool_name: &str, _tool_version: Option<&str>, _params: &serde_json::Value) -> Result<serde_json::Value, ToolInvocationError> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(serde_json::json!({}))
        }
    }

    #[tokio::test]
    async fn scrapes_http_status_from_error_message() {
        let config = RuntimeConfig::default();
        let invoker = FlakyInvoker;
        let oracle = NoCorrection;
        let runner = StepRunner::new(&config, &invoker, &oracle);
        let step = Step::new("s0", 0, "book_ride");
        let outcome = runner.run_step(&step, &serde_json::json!({}), &CancellationToken::new()).await;
        let error = outcome.error.unwrap();
        assert_eq!(error.details.unwrap()["httpStatus"], 503);
    }

    #[tokio::test]
    async fn step_exceeding_timeout_reports_step_timeout() {
        let config = RuntimeConfig::default();
        let invoker = SlowInvoker;
        let oracle = NoCorrection;
        let runner = StepRunner::new(&config, &invoker, &oracle);
        let mut step = Step::new("s0", 0, "slow_tool");
        step.timeout_ms = 50;
        let outcome = runner.run_step(&step, &serde_json::json!({}), &CancellationToken::new()).await;
        assert_eq!(outcome.error.unwrap().code, sagacore_common::ErrorCode::StepTimeout);
    }

    #[test]
    fn status_patterns_match_all_four_documented_shapes() {
        let messages = [
            ("request failed: 404 Not Found", 404),
            ("request failed: status: 429", 429),
            ("request failed: HTTP 500", 500),
            ("request failed: error 403", 403),
        ];
        for (message, expected) in messages {
            let error = ToolInvocationError {
                message: message.to_string(),
                http_status: None,
                is_validation_error: false,
            };
            let details = http_status_details(&error).unwrap();
            assert_eq!(details["httpStatus"], expected);
        }
    }

    #[test]
    fn a_bare_three_digit_number_with_no_context_does_not_match() {
        let error = ToolInvocationError {
            message: "order #503 could not be found in the system".to_string(),
            http_status: None,
            is_validation_error: false,
        };
        assert!(http_status_details(&error).is_none());
    }

    struct CorrectableInvoker;

    #[async_trait]
    impl ToolInvoker for CorrectableInvoker {
        async fn execute(&self, _tool_name: &str, _tool_version: Option<&str>, params: &serde_json::Value) -> Result<serde_json::Value, ToolInvocationError> {
            if params.get("fixed") == Some(&serde_json::Value::Bool(true)) {
                Ok(serde_json::json!({ "ok": true }))
            } else {
                Err(ToolInvocationError {
                    message: "HTTP 500 upstream error".to_string(),
                    http_status: None,
                    is_validation_error: false,
                })
            }
        }
    }

    struct FixingOracle;

    #[async_trait]
    impl CorrectionOracle for FixingOracle {
        async fn correct(&self, _step: &Step, _error: &StepError) -> Option<serde_json::Value> {
            Some(serde_json::json!({ "fixed": true }))
        }
    }

    #[tokio::test]
    async fn oracle_correction_is_retried_once_and_can_succeed() {
        let config = RuntimeConfig::default();
        let invoker = CorrectableInvoker;
        let oracle = FixingOracle;
        let runner = StepRunner::new(&config, &invoker, &oracle);
        let step = Step::new("s0", 0, "book_ride");
        let outcome = runner.run_step(&step, &serde_json::json!({}), &CancellationToken::new()).await;
        assert!(outcome.error.is_none());
        assert_eq!(outcome.output.unwrap()["ok"], true);
    }

    #[tokio::test]
    async fn oracle_correction_exhausted_retry_is_still_a_failure() {
        let config = RuntimeConfig::default();
        let invoker = FlakyInvoker;
        let oracle = FixingOracle;
        let runner = StepRunner::new(&config, &invoker, &oracle);
        let step = Step::new("s0", 0, "book_ride");
        let outcome = runner.run_step(&step, &serde_json::json!({}), &CancellationToken::new()).await;
        assert!(outcome.output.is_none());
        assert_eq!(outcome.error.unwrap().code, sagacore_common::ErrorCode::ToolExecutionFailed);
    }

    struct ValidationFailureInvoker;

    #[async_trait]
    impl ToolInvoker for ValidationFailureInvoker {
        async fn execute(&self, _tool_name: &str, _tool_version: Option<&str>, _params: &serde_json::Value) -> Result<serde_json::Value, ToolInvocationError> {
            Err(ToolInvocationError {
                message: "invalid parameters".to_string(),
                http_status: None,
                is_validation_error: true,
            })
        }
    }

    struct PanicsIfConsultedOracle;

    #[async_trait]
    impl CorrectionOracle for PanicsIfConsultedOracle {
        async fn correct(&self, _step: &Step, _error: &StepError) -> Option<serde_json::Value> {
            panic!("oracle must not be consulted when no 4xx/5xx status was extracted");
        }
    }

    #[tokio::test]
    async fn oracle_is_not_consulted_without_an_extractable_http_status() {
        let config = RuntimeConfig::default();
        let invoker = ValidationFailureInvoker;
        let oracle = PanicsIfConsultedOracle;
        let runner = StepRunner::new(&config, &invoker, &oracle);
        let step = Step::new("s0", 0, "book_ride");
        let outcome = runner.run_step(&step, &serde_json::json!({}), &CancellationToken::new()).await;
        assert_eq!(outcome.error.unwrap().code, sagacore_common::ErrorCode::ToolValidationFailed);
    }
}
