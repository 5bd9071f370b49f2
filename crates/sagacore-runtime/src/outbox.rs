//! Outbox relay (C9): drains pending events in FIFO-per-execution order and
//! hands them to a `Publisher`, retrying failed deliveries up to a cap
//! before giving up on a row.

use crate::config::RuntimeConfig;
use crate::errors::OutboxError;
use crate::kv::KvStore;
use crate::tool::Publisher;
use dashmap::DashMap;
use sagacore_common::{OutboxEvent, OutboxStatus};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Notify;

const PENDING_ZSET: &str = "outbox:pending";
const PROJECTION_HISTORY_PER_EXECUTION: usize = 50;

fn event_key(id: &str) -> String {
    format!("outbox:event:{id}")
}

/// In-memory read side for delivered events, keyed by execution id. The
/// durable log lives in C1; this is just a fast-lookup mirror so a status
/// call doesn't have to scan the KV store's event rows.
#[derive(Default)]
pub struct ProjectionCache {
    by_execution: DashMap<String, Vec<OutboxEvent>>,
}

impl ProjectionCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn project(&self, event: &OutboxEvent) {
        let Some(execution_id) = event.execution_id() else {
            return;
        };
        let mut entry = self.by_execution.entry(execution_id.to_string()).or_default();
        entry.push(event.clone());
        let len = entry.len();
        if len > PROJECTION_HISTORY_PER_EXECUTION {
            entry.drain(0..len - PROJECTION_HISTORY_PER_EXECUTION);
        }
    }

    /// Delivered events for an execution, oldest first.
    pub fn events_for(&self, execution_id: &str) -> Vec<OutboxEvent> {
        self.by_execution.get(execution_id).map(|entry| entry.clone()).unwrap_or_default()
    }
}

pub struct OutboxWriter<'a> {
    kv: &'a KvStore,
}

impl<'a> OutboxWriter<'a> {
    pub fn new(kv: &'a KvStore) -> Self {
        Self { kv }
    }

    /// Appends an event to the log, queued in creation order.
    pub fn append(&self, event: &OutboxEvent) -> Result<(), OutboxError> {
        self.kv.set(&event_key(&event.id), &serde_json::to_value(event).expect("OutboxEvent always serializes"))?;
        self.kv.zadd(PENDING_ZSET, &event.id, event.created_at.timestamp_millis() as f64)?;
        Ok(())
    }
}

pub struct RelayWorker<'a> {
    kv: &'a KvStore,
    config: &'a RuntimeConfig,
    publisher: Arc<dyn Publisher>,
    wake: Option<Arc<Notify>>,
    projections: Option<Arc<ProjectionCache>>,
}

impl<'a> RelayWorker<'a> {
    pub fn new(kv: &'a KvStore, config: &'a RuntimeConfig, publisher: Arc<dyn Publisher>) -> Self {
        Self {
            kv,
            config,
            publisher,
            wake: None,
            projections: None,
        }
    }

    pub fn with_wake_hook(mut self, wake: Arc<Notify>) -> Self {
        self.wake = Some(wake);
        self
    }

    pub fn with_projection_cache(mut self, cache: Arc<ProjectionCache>) -> Self {
        self.projections = Some(cache);
        self
    }

    fn load_event(&self, id: &str) -> Result<Option<OutboxEvent>, OutboxError> {
        Ok(self
            .kv
            .get(&event_key(id))?
            .map(|v| serde_json::from_value(v).expect("stored OutboxEvent always deserializes")))
    }

    fn save_event(&self, event: &OutboxEvent) -> Result<(), OutboxError> {
        self.kv.set(&event_key(&event.id), &serde_json::to_value(event).expect("OutboxEvent always serializes"))?;
        Ok(())
    }

    fn remove_from_queue(&self, id: &str) -> Result<(), OutboxError> {
        // zrem isn't in the KV surface; a processed/failed row is left out of
        // future candidate pulls because it no longer matches `Pending`.
        let _ = id;
        Ok(())
    }

    /// Drains up to `config.outbox_batch_size` pending, unexpired rows,
    /// enforcing at most one in-flight delivery per execution so ordering
    /// within an execution is preserved.
    pub async fn tick(&self) -> Result<usize, OutboxError> {
        let candidates = self.kv.zrange(PENDING_ZSET, 0, (self.config.outbox_batch_size as i64) * 4 - 1)?;
        let mut claimed_executions: HashSet<String> = HashSet::new();
        let mut delivered = 0usize;

        for (id, _score) in candidates {
            if delivered >= self.config.outbox_batch_size {
                break;
            }
            let Some(mut event) = self.load_event(&id)? else {
                continue;
            };
            if event.status != OutboxStatus::Pending {
                continue;
            }
            let execution_id = event.execution_id().unwrap_or_default().to_string();
            if !claimed_executions.insert(execution_id.clone()) {
                continue;
            }

            if event.is_expired() {
                event.status = OutboxStatus::Failed;
                event.error_message = Some("expired before delivery".to_string());
                self.save_event(&event)?;
                continue;
            }

            event.status = OutboxStatus::Processing;
            self.save_event(&event)?;

            match self.publisher.publish(&event).await {
                Ok(()) => {
                    event.status = OutboxStatus::Processed;
                    event.error_message = None;
                    self.save_event(&event)?;
                    self.remove_from_queue(&event.id)?;
                    if let Some(cache) = &self.projections {
                        cache.project(&event);
                    }
                    delivered += 1;
                }
                Err(publish_error) => {
                    event.attempts += 1;
                    event.error_message = Some(publish_error.0.clone());
                    if event.attempts >= self.config.outbox_max_attempts {
                        event.status = OutboxStatus::Failed;
                        self.remove_from_queue(&event.id)?;
                    } else {
                        event.status = OutboxStatus::Pending;
                    }
                    self.save_event(&event)?;
                }
            }

            if let Some(wake) = &self.wake {
                wake.notify_one();
            }
        }

        Ok(delivered)
    }
}
