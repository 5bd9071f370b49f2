//! Idempotency gate (C3): fingerprints a tool call so the same causal
//! request never executes twice.

use crate::errors::KvError;
use crate::kv::KvStore;
use sagacore_common::LamportTimestamp;
use serde_json::Value;
use sha2::{Digest, Sha256};

/// A 16-hex-char fingerprint over the canonicalized call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn compute(
        user_id: &str,
        parent_intent_id: &str,
        lamport: &LamportTimestamp,
        tool_name: &str,
        params: &Value,
    ) -> Self {
        let canonical = canonicalize(params);
        let material = format!(
            "{user_id}|{parent_intent_id}|{}:{}|{tool_name}|{canonical}",
            lamport.counter, lamport.service_id
        );
        let digest = Sha256::digest(material.as_bytes());
        let hex = hex::encode(digest);
        Self(hex[..16].to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Canonical JSON: object keys sorted, strings trimmed, null and undefined
/// collapsed to the same representation, arrays canonicalized element-wise.
/// Fields are retained even when their value is null — two calls differing
/// only in whether a field is present-but-null versus absent-but-implied-null
/// must still fingerprint identically, but a call that never mentions the
/// field at all is a different causal request from one that explicitly nulls it.
fn canonicalize(value: &Value) -> String {
    fn go(value: &Value) -> Value {
        match value {
            Value::Object(map) => {
                let mut entries: Vec<(String, Value)> = map.iter().map(|(k, v)| (k.clone(), go(v))).collect();
                entries.sort_by(|a, b| a.0.cmp(&b.0));
                let mut sorted = serde_json::Map::new();
                for (k, v) in entries {
                    sorted.insert(k, v);
                }
                Value::Object(sorted)
            }
            Value::Array(items) => Value::Array(items.iter().map(go).collect()),
            Value::String(s) => Value::String(s.trim().to_string()),
            other => other.clone(),
        }
    }
    serde_json::to_string(&go(value)).expect("canonicalized value always serializes")
}

pub struct IdempotencyGate<'a> {
    kv: &'a KvStore,
    ttl: chrono::Duration,
}

impl<'a> IdempotencyGate<'a> {
    pub fn new(kv: &'a KvStore, ttl_secs: u64) -> Self {
        Self {
            kv,
            ttl: chrono::Duration::seconds(ttl_secs as i64),
        }
    }

    /// Atomically claims a fingerprint; returns `true` if this caller is the
    /// first to claim it, `false` if it was already claimed (a "double-tap").
    ///
    /// Goes through `cas` with an expected version of 0 (absent) rather than
    /// a separate exists-then-write, since two separate calls would leave a
    /// window for concurrent claimants to both observe "absent".
    pub fn claim(&self, fingerprint: &Fingerprint) -> Result<bool, KvError> {
        let key = format!("idempotency:{fingerprint}");
        let result = self.kv.cas(&key, 0, &serde_json::Value::Bool(true))?;
        if result.success {
            self.kv.expire(&key, self.ttl)?;
        }
        Ok(result.success)
    }

    /// Scopes a gate to a new causal pair while keeping the same user id, for
    /// child intents spawned off a parent.
    pub fn derive_child(
        user_id: &str,
        parent_intent_id: &str,
        lamport: &LamportTimestamp,
        tool_name: &str,
        params: &Value,
    ) -> Fingerprint {
        Fingerprint::compute(user_id, parent_intent_id, lamport, tool_name, params)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn clock() -> LamportTimestamp {
        LamportTimestamp::new(1)
    }

    #[test]
    fn canonicalization_ignores_key_order_and_whitespace() {
        let a = json!({"b": "  x ", "a": 1});
        let b = json!({"a": 1, "b": "x"});
        assert_eq!(canonicalize(&a), canonicalize(&b));
    }

    #[test]
    fn canonicalization_retains_null_fields_but_distinguishes_them_from_absent() {
        let explicit_null = json!({"a": 1, "b": null});
        let absent = json!({"a": 1});
        assert_ne!(canonicalize(&explicit_null), canonicalize(&absent));

        let other_explicit_null = json!({"b": null, "a": 1});
        assert_eq!(canonicalize(&explicit_null), canonicalize(&other_explicit_null));
    }

    #[test]
    fn same_inputs_produce_same_fingerprint() {
        let clock = clock();
        let fp1 = Fingerprint::compute("u1", "i1", &clock, "book_ride", &json!({"a": 1}));
        let fp2 = Fingerprint::compute("u1", "i1", &clock, "book_ride", &json!({"a": 1}));
        assert_eq!(fp1, fp2);
        assert_eq!(fp1.as_str().len(), 16);
    }

    #[test]
    fn claim_is_one_shot() {
        let kv = KvStore::open_in_memory().unwrap();
        let gate = IdempotencyGate::new(&kv, 3600);
        let fp = Fingerprint::compute("u1", "i1", &clock(), "book_ride", &json!({}));
        assert!(gate.claim(&fp).unwrap());
        assert!(!gate.claim(&fp).unwrap());
    }

    #[test]
    fn concurrent_claims_on_the_same_fingerprint_yield_exactly_one_winner() {
        use std::sync::Arc;
        use std::thread;

        let kv = Arc::new(KvStore::open_in_memory().unwrap());
        let fp = Fingerprint::compute("u1", "i1", &clock(), "book_ride", &json!({}));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let kv = kv.clone();
                let fp = fp.clone();
                thread::spawn(move || {
                    let gate = IdempotencyGate::new(&kv, 3600);
                    gate.claim(&fp).unwrap()
                })
            })
            .collect();

        let wins: usize = handles.into_iter().map(|h| h.join().unwrap()).filter(|&won| won).count();
        assert_eq!(wins, 1);
    }
}
