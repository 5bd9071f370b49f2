//! Durable key-value store (C1): the single SQLite-backed substrate every
//! other component persists through.
//!
//! `rusqlite::Connection` is `Send` but not `Sync`, so it is wrapped behind a
//! `std::sync::Mutex` rather than handed out bare (the same reason the
//! orchestrator's `FactoryDb` wraps a bare `Connection` in a struct; we add
//! the mutex here because C1 is shared across async tasks instead of owned
//! by a single thread).

use crate::errors::KvError;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use std::path::Path;
use std::sync::Mutex;

pub struct KvStore {
    conn: Mutex<Connection>,
}

/// Result of a compare-and-swap attempt.
#[derive(Debug, Clone)]
pub struct CasResult {
    pub success: bool,
    pub current_version: u64,
    pub current_value: Option<serde_json::Value>,
}

impl KvStore {
    pub fn open(path: &Path) -> Result<Self, KvError> {
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.migrate()?;
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self, KvError> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.migrate()?;
        Ok(store)
    }

    fn migrate(&self) -> Result<(), KvError> {
        let conn = self.conn.lock().unwrap();
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS kv_entries (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                version INTEGER NOT NULL DEFAULT 0,
                expires_at TEXT,
                rowid_seq INTEGER
            );
            CREATE TABLE IF NOT EXISTS kv_counters (
                key TEXT PRIMARY KEY,
                value INTEGER NOT NULL DEFAULT 0,
                expires_at TEXT
            );
            CREATE TABLE IF NOT EXISTS kv_zset (
                key TEXT NOT NULL,
                member TEXT NOT NULL,
                score REAL NOT NULL,
                PRIMARY KEY (key, member)
            );
            CREATE INDEX IF NOT EXISTS idx_kv_zset_score ON kv_zset(key, score);
            CREATE TABLE IF NOT EXISTS kv_set (
                key TEXT NOT NULL,
                member TEXT NOT NULL,
                PRIMARY KEY (key, member)
            );
            ",
        )?;
        Ok(())
    }

    fn now() -> DateTime<Utc> {
        Utc::now()
    }

    pub fn get(&self, key: &str) -> Result<Option<serde_json::Value>, KvError> {
        let conn = self.conn.lock().unwrap();
        let row: Option<(String, Option<String>)> = conn
            .query_row(
                "SELECT value, expires_at FROM kv_entries WHERE key = ?1",
                params![key],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .optional()?;
        let Some((value, expires_at)) = row else {
            return Ok(None);
        };
        if let Some(expires_at) = expires_at {
            if is_expired(&expires_at) {
                drop(conn);
                self.delete(key)?;
                return Ok(None);
            }
        }
        Ok(Some(
            serde_json::from_str(&value).map_err(|source| KvError::Corrupt {
                key: key.to_string(),
                source,
            })?,
        ))
    }

    pub fn set(&self, key: &str, value: &serde_json::Value) -> Result<(), KvError> {
        let conn = self.conn.lock().unwrap();
        let serialized = serde_json::to_string(value).expect("Value always serializes");
        conn.execute(
            "INSERT INTO kv_entries (key, value, version, expires_at) VALUES (?1, ?2, 0, NULL)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, version = kv_entries.version + 1",
            params![key, serialized],
        )?;
        Ok(())
    }

    pub fn set_expiring(
        &self,
        key: &str,
        value: &serde_json::Value,
        ttl: chrono::Duration,
    ) -> Result<(), KvError> {
        let conn = self.conn.lock().unwrap();
        let serialized = serde_json::to_string(value).expect("Value always serializes");
        let expires_at = (Self::now() + ttl).to_rfc3339();
        conn.execute(
            "INSERT INTO kv_entries (key, value, version, expires_at) VALUES (?1, ?2, 0, ?3)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, version = kv_entries.version + 1, expires_at = excluded.expires_at",
            params![key, serialized, expires_at],
        )?;
        Ok(())
    }

    pub fn delete(&self, key: &str) -> Result<(), KvError> {
        let conn = self.conn.lock().unwrap();
        conn.execute("DELETE FROM kv_entries WHERE key = ?1", params![key])?;
        Ok(())
    }

    pub fn exists(&self, key: &str) -> Result<bool, KvError> {
        Ok(self.get(key)?.is_some())
    }

    pub fn expire(&self, key: &str, ttl: chrono::Duration) -> Result<(), KvError> {
        let conn = self.conn.lock().unwrap();
        let expires_at = (Self::now() + ttl).to_rfc3339();
        conn.execute(
            "UPDATE kv_entries SET expires_at = ?2 WHERE key = ?1",
            params![key, expires_at],
        )?;
        Ok(())
    }

    /// Read-version, compare, write-if-match, single transaction.
    pub fn cas(
        &self,
        key: &str,
        expected_version: u64,
        new_value: &serde_json::Value,
    ) -> Result<CasResult, KvError> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        let current: Option<(String, u64)> = tx
            .query_row(
                "SELECT value, version FROM kv_entries WHERE key = ?1",
                params![key],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .optional()?;

        let (current_version, current_raw) = match &current {
            Some((raw, v)) => (*v, Some(raw.clone())),
            None => (0, None),
        };

        if current_version != expected_version {
            let current_value = current_raw
                .map(|raw| serde_json::from_str(&raw))
                .transpose()
                .map_err(|source| KvError::Corrupt {
                    key: key.to_string(),
                    source,
                })?;
            return Ok(CasResult {
                success: false,
                current_version,
                current_value,
            });
        }

        let serialized = serde_json::to_string(new_value).expect("Value always serializes");
        tx.execute(
            "INSERT INTO kv_entries (key, value, version, expires_at) VALUES (?1, ?2, 1, NULL)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, version = kv_entries.version + 1",
            params![key, serialized],
        )?;
        tx.commit()?;

        Ok(CasResult {
            success: true,
            current_version: expected_version + 1,
            current_value: Some(new_value.clone()),
        })
    }

    /// Read-modify-CAS-write a shallow JSON object merge. The caller is
    /// expected to retry on a losing race (spec.md §4.2).
    pub fn merge_delta(
        &self,
        key: &str,
        delta: &serde_json::Map<String, serde_json::Value>,
    ) -> Result<CasResult, KvError> {
        let current = self.get(key)?;
        let (version, mut base) = match current {
            Some(value) => {
                let version = self.version_of(key)?;
                (version, value.as_object().cloned().unwrap_or_default())
            }
            None => (0, serde_json::Map::new()),
        };
        for (k, v) in delta {
            base.insert(k.clone(), v.clone());
        }
        self.cas(key, version, &serde_json::Value::Object(base))
    }

    fn version_of(&self, key: &str) -> Result<u64, KvError> {
        let conn = self.conn.lock().unwrap();
        Ok(conn
            .query_row(
                "SELECT version FROM kv_entries WHERE key = ?1",
                params![key],
                |r| r.get(0),
            )
            .optional()?
            .unwrap_or(0))
    }

    pub fn increment(&self, key: &str, by: i64, ttl_on_create: Option<chrono::Duration>) -> Result<i64, KvError> {
        let conn = self.conn.lock().unwrap();
        let existed: bool = conn
            .query_row(
                "SELECT 1 FROM kv_counters WHERE key = ?1",
                params![key],
                |_| Ok(true),
            )
            .optional()?
            .unwrap_or(false);

        conn.execute(
            "INSERT INTO kv_counters (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = kv_counters.value + ?2",
            params![key, by],
        )?;

        // TTL is only ever set on the 0 -> 1 creation transition.
        if !existed {
            if let Some(ttl) = ttl_on_create {
                let expires_at = (Self::now() + ttl).to_rfc3339();
                conn.execute(
                    "UPDATE kv_counters SET expires_at = ?2 WHERE key = ?1",
                    params![key, expires_at],
                )?;
            }
        }

        conn.query_row(
            "SELECT value FROM kv_counters WHERE key = ?1",
            params![key],
            |r| r.get(0),
        )
        .map_err(KvError::from)
    }

    pub fn zadd(&self, key: &str, member: &str, score: f64) -> Result<(), KvError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO kv_zset (key, member, score) VALUES (?1, ?2, ?3)
             ON CONFLICT(key, member) DO UPDATE SET score = excluded.score",
            params![key, member, score],
        )?;
        Ok(())
    }

    pub fn zrange(&self, key: &str, start: i64, stop: i64) -> Result<Vec<(String, f64)>, KvError> {
        let conn = self.conn.lock().unwrap();
        let count = (stop - start + 1).max(0) as i64;
        let mut stmt = conn.prepare(
            "SELECT member, score FROM kv_zset WHERE key = ?1 ORDER BY score ASC LIMIT ?2 OFFSET ?3",
        )?;
        let rows = stmt
            .query_map(params![key, count, start], |r| Ok((r.get(0)?, r.get(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn zrank(&self, key: &str, member: &str) -> Result<Option<i64>, KvError> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT COUNT(*) FROM kv_zset WHERE key = ?1 AND score < (
                SELECT score FROM kv_zset WHERE key = ?1 AND member = ?2
            )",
            params![key, member],
            |r| r.get(0),
        )
        .optional()
        .map_err(KvError::from)
    }

    pub fn zcard(&self, key: &str) -> Result<i64, KvError> {
        let conn = self.conn.lock().unwrap();
        Ok(conn.query_row(
            "SELECT COUNT(*) FROM kv_zset WHERE key = ?1",
            params![key],
            |r| r.get(0),
        )?)
    }

    pub fn zremrangebyrank(&self, key: &str, start: i64, stop: i64) -> Result<u64, KvError> {
        let conn = self.conn.lock().unwrap();
        let count = (stop - start + 1).max(0) as i64;
        let n = conn.execute(
            "DELETE FROM kv_zset WHERE rowid IN (
                SELECT rowid FROM kv_zset WHERE key = ?1 ORDER BY score ASC LIMIT ?2 OFFSET ?3
            )",
            params![key, count, start],
        )?;
        Ok(n as u64)
    }

    pub fn sadd(&self, key: &str, member: &str) -> Result<(), KvError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT OR IGNORE INTO kv_set (key, member) VALUES (?1, ?2)",
            params![key, member],
        )?;
        Ok(())
    }

    pub fn srem(&self, key: &str, member: &str) -> Result<(), KvError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "DELETE FROM kv_set WHERE key = ?1 AND member = ?2",
            params![key, member],
        )?;
        Ok(())
    }

    pub fn smembers(&self, key: &str) -> Result<Vec<String>, KvError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT member FROM kv_set WHERE key = ?1")?;
        let rows = stmt
            .query_map(params![key], |r| r.get(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Cursor-based scan: never a full `keys()` scan. `cursor` is the last
    /// seen `rowid`; `pattern` is a caller `*`-glob translated to SQL `LIKE`.
    pub fn scan(&self, cursor: i64, pattern: &str, count: i64) -> Result<(i64, Vec<String>), KvError> {
        let conn = self.conn.lock().unwrap();
        let like_pattern = pattern.replace('*', "%");
        let mut stmt = conn.prepare(
            "SELECT rowid, key FROM kv_entries WHERE rowid > ?1 AND key LIKE ?2 ORDER BY rowid ASC LIMIT ?3",
        )?;
        let rows: Vec<(i64, String)> = stmt
            .query_map(params![cursor, like_pattern, count], |r| {
                Ok((r.get(0)?, r.get(1)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        let next_cursor = rows.last().map(|(rowid, _)| *rowid).unwrap_or(0);
        Ok((next_cursor, rows.into_iter().map(|(_, k)| k).collect()))
    }
}

fn is_expired(expires_at: &str) -> bool {
    DateTime::parse_from_rfc3339(expires_at)
        .map(|dt| dt.with_timezone(&Utc) < Utc::now())
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn store() -> KvStore {
        KvStore::open_in_memory().unwrap()
    }

    #[test]
    fn set_then_get_roundtrips() {
        let kv = store();
        kv.set("a:b:1", &json!({"x": 1})).unwrap();
        assert_eq!(kv.get("a:b:1").unwrap(), Some(json!({"x": 1})));
    }

    #[test]
    fn cas_succeeds_only_on_matching_version() {
        let kv = store();
        kv.set("k", &json!(1)).unwrap();
        let result = kv.cas("k", 0, &json!(2)).unwrap();
        assert!(result.success);
        let conflict = kv.cas("k", 0, &json!(3)).unwrap();
        assert!(!conflict.success);
        assert_eq!(conflict.current_value, Some(json!(2)));
    }

    #[test]
    fn increment_sets_ttl_only_on_creation() {
        let kv = store();
        let v = kv
            .increment("counter", 1, Some(chrono::Duration::seconds(60)))
            .unwrap();
        assert_eq!(v, 1);
        let v = kv.increment("counter", 1, Some(chrono::Duration::seconds(60))).unwrap();
        assert_eq!(v, 2);
    }

    #[test]
    fn zset_range_and_rank() {
        let kv = store();
        kv.zadd("z", "a", 1.0).unwrap();
        kv.zadd("z", "b", 2.0).unwrap();
        kv.zadd("z", "c", 3.0).unwrap();
        assert_eq!(kv.zcard("z").unwrap(), 3);
        assert_eq!(kv.zrank("z", "b").unwrap(), Some(1));
        let range = kv.zrange("z", 0, 1).unwrap();
        assert_eq!(range.len(), 2);
    }

    #[test]
    fn set_members_add_and_remove() {
        let kv = store();
        kv.sadd("s", "x").unwrap();
        kv.sadd("s", "y").unwrap();
        kv.srem("s", "x").unwrap();
        assert_eq!(kv.smembers("s").unwrap(), vec!["y".to_string()]);
    }

    #[test]
    fn scan_respects_cursor_and_pattern() {
        let kv = store();
        for i in 0..5 {
            kv.set(&format!("ns:item:{i}"), &json!(i)).unwrap();
        }
        kv.set("other:thing", &json!(0)).unwrap();
        let (cursor, keys) = kv.scan(0, "ns:item:*", 3).unwrap();
        assert_eq!(keys.len(), 3);
        let (_, rest) = kv.scan(cursor, "ns:item:*", 10).unwrap();
        assert_eq!(rest.len(), 2);
    }

    #[test]
    fn merge_delta_shallow_merges_object() {
        let kv = store();
        kv.set("obj", &json!({"a": 1})).unwrap();
        let mut delta = serde_json::Map::new();
        delta.insert("b".to_string(), json!(2));
        let result = kv.merge_delta("obj", &delta).unwrap();
        assert!(result.success);
        assert_eq!(kv.get("obj").unwrap(), Some(json!({"a": 1, "b": 2})));
    }
}
