//! DAG scheduling (C5): builds a step graph from a validated `Plan` and
//! drives it to completion (or a segment yield) one ready-set wave at a
//! time.

mod builder;
mod executor;
mod scheduler;

pub use builder::{StepGraph, StepIndex};
pub use executor::{DagExecutor, SegmentOutcome};
pub use scheduler::{DagConfig, DagScheduler};
