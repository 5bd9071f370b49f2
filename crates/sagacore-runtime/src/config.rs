//! Runtime configuration for the saga engine.
//!
//! Bridges environment-variable overrides with sensible defaults, following
//! the `std::env::var(...).unwrap_or_else(...)` idiom used throughout the
//! CLI's own configuration layer. Every tunable spec.md calls out as a
//! default is represented here so a deployment can override it without a
//! recompile.

use std::time::Duration;

#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Hard ceiling on a single serverless invocation (spec.md §4.6).
    pub vercel_timeout_ms: u64,
    /// Elapsed-in-segment threshold past which the runner checkpoints and
    /// yields rather than risk exceeding `vercel_timeout_ms`.
    pub checkpoint_threshold_ms: u64,
    /// Per-segment cancellation deadline, strictly under `vercel_timeout_ms`.
    pub segment_timeout_ms: u64,

    /// Maximum OCC rebase attempts before `save_state_with_occ` gives up.
    pub occ_max_rebases: u32,
    pub occ_backoff_base_ms: u64,
    pub occ_backoff_max_ms: u64,
    pub occ_backoff_jitter: f64,

    /// TTL applied to idempotency claims.
    pub idempotency_ttl_secs: u64,
    /// Default per-compensation timeout.
    pub compensation_timeout_ms: u64,

    /// Max outbox rows drained per `RelayWorker::tick`.
    pub outbox_batch_size: usize,
    /// Max attempts before an outbox row is marked `failed`.
    pub outbox_max_attempts: u32,

    /// Max zombie candidates scanned per `Sweeper::tick`.
    pub recovery_batch_size: usize,
    /// How long a non-terminal task can go without an update before it's
    /// considered stuck.
    pub recovery_stuck_threshold: Duration,
    /// Max automated recovery attempts before escalating to manual
    /// intervention.
    pub recovery_max_attempts: u32,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            vercel_timeout_ms: env_u64("SAGACORE_VERCEL_TIMEOUT_MS", 10_000),
            checkpoint_threshold_ms: env_u64("SAGACORE_CHECKPOINT_THRESHOLD_MS", 7_000),
            segment_timeout_ms: env_u64("SAGACORE_SEGMENT_TIMEOUT_MS", 8_500),

            occ_max_rebases: env_u64("SAGACORE_OCC_MAX_REBASES", 3) as u32,
            occ_backoff_base_ms: env_u64("SAGACORE_OCC_BACKOFF_BASE_MS", 100),
            occ_backoff_max_ms: env_u64("SAGACORE_OCC_BACKOFF_MAX_MS", 1_000),
            occ_backoff_jitter: 0.30,

            idempotency_ttl_secs: env_u64("SAGACORE_IDEMPOTENCY_TTL_SECS", 24 * 3600),
            compensation_timeout_ms: env_u64("SAGACORE_COMPENSATION_TIMEOUT_MS", 30_000),

            outbox_batch_size: env_u64("SAGACORE_OUTBOX_BATCH_SIZE", 10) as usize,
            outbox_max_attempts: 3,

            recovery_batch_size: env_u64("SAGACORE_RECOVERY_BATCH_SIZE", 100) as usize,
            recovery_stuck_threshold: Duration::from_secs(env_u64(
                "SAGACORE_RECOVERY_STUCK_THRESHOLD_SECS",
                300,
            )),
            recovery_max_attempts: 2,
        }
    }
}

impl RuntimeConfig {
    pub fn with_vercel_timeout_ms(mut self, ms: u64) -> Self {
        self.vercel_timeout_ms = ms;
        self
    }

    pub fn with_checkpoint_threshold_ms(mut self, ms: u64) -> Self {
        self.checkpoint_threshold_ms = ms;
        self
    }

    pub fn with_segment_timeout_ms(mut self, ms: u64) -> Self {
        self.segment_timeout_ms = ms;
        self
    }

    pub fn with_occ_max_rebases(mut self, n: u32) -> Self {
        self.occ_max_rebases = n;
        self
    }
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
