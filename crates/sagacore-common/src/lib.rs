//! Shared domain types for the sagacore workflow orchestration platform.
//!
//! This crate has no I/O and no async runtime dependency: it is the plain
//! data model that `sagacore-runtime` operates on and that the CLI crate
//! renders. Keeping it free of behavior means every component agrees on the
//! wire shape of a Plan, an ExecutionState, or an error code without having
//! to depend on the engine itself.

pub mod compensation;
pub mod errors;
pub mod execution;
pub mod intent;
pub mod lamport;
pub mod outbox;
pub mod plan;
pub mod schema;
pub mod task;

pub use compensation::CompensationRegistration;
pub use errors::{ErrorCode, StepError};
pub use execution::{ExecutionState, ExecutionStatus, StepExecutionState, StepStatus};
pub use intent::Intent;
pub use lamport::LamportTimestamp;
pub use outbox::{OutboxEvent, OutboxEventType, OutboxStatus};
pub use plan::{Plan, RetryPolicy, Step};
pub use schema::{FieldChange, SchemaDiff, SchemaSeverity, SchemaShape};
pub use task::{TaskState, TaskStatus, TaskTransition};
