//! The saga engine: durable plan execution, checkpointing, compensation,
//! schema compatibility, and the background relays that keep a deployment's
//! outbox and stuck-task queue moving.

pub mod checkpoint;
pub mod compat;
pub mod config;
pub mod dag;
pub mod errors;
pub mod idempotency;
pub mod kv;
pub mod outbox;
pub mod plan;
pub mod recovery;
pub mod runner;
pub mod saga;
pub mod tool;

pub use checkpoint::CheckpointStore;
pub use compat::{Adapter, AdapterGraph, CompatOutcome, CompatibilityGuard, ToolDescriptor, ToolRegistry};
pub use config::RuntimeConfig;
pub use dag::{DagConfig, DagExecutor, DagScheduler, SegmentOutcome, StepGraph};
pub use idempotency::{Fingerprint, IdempotencyGate};
pub use kv::KvStore;
pub use outbox::{OutboxWriter, ProjectionCache, RelayWorker};
pub use plan::PlanValidator;
pub use recovery::{DryRunner, RepairAnalyzer, RepairDecision, Sweeper, SweepAction};
pub use runner::{CorrectionOracle, NoCorrection, StepOutcome, StepRunner};
pub use saga::{SagaCoordinator, SagaResult};
pub use tool::{PublishError, Publisher, ResumeScheduler, ToolInvocationError, ToolInvoker};
