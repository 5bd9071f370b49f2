//! Lamport logical clock for cross-service event ordering (spec.md §5).

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// A Lamport timestamp tagged with the emitting service's id, so concurrent
/// events (equal counters, different services) can be told apart from a
/// genuine happens-before relationship.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LamportTimestamp {
    pub counter: u64,
    pub service_id: u32,
}

/// The result of comparing two Lamport timestamps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Causality {
    Before,
    After,
    Concurrent,
}

impl LamportTimestamp {
    pub fn new(service_id: u32) -> Self {
        Self {
            counter: 0,
            service_id,
        }
    }

    /// Tick the local counter on a local emission.
    pub fn tick(&mut self) -> Self {
        self.counter += 1;
        *self
    }

    /// Advance on receipt of a remote timestamp: `max(local, received) + 1`.
    pub fn receive(&mut self, received: LamportTimestamp) -> Self {
        self.counter = self.counter.max(received.counter) + 1;
        *self
    }

    /// `(counter, service_id)` lexicographic ordering; equal counters with
    /// differing service ids are `Concurrent` (undefined order).
    pub fn compare(&self, other: &Self) -> Causality {
        match self.counter.cmp(&other.counter) {
            Ordering::Less => Causality::Before,
            Ordering::Greater => Causality::After,
            Ordering::Equal if self.service_id == other.service_id => Causality::Before,
            Ordering::Equal => Causality::Concurrent,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tick_increments_local_counter() {
        let mut clock = LamportTimestamp::new(1);
        assert_eq!(clock.tick().counter, 1);
        assert_eq!(clock.tick().counter, 2);
    }

    #[test]
    fn receive_takes_the_max_plus_one() {
        let mut clock = LamportTimestamp::new(1);
        clock.tick();
        let remote = LamportTimestamp {
            counter: 10,
            service_id: 2,
        };
        let merged = clock.receive(remote);
        assert_eq!(merged.counter, 11);
    }

    #[test]
    fn equal_counters_different_services_are_concurrent() {
        let a = LamportTimestamp {
            counter: 5,
            service_id: 1,
        };
        let b = LamportTimestamp {
            counter: 5,
            service_id: 2,
        };
        assert_eq!(a.compare(&b), Causality::Concurrent);
    }
}
