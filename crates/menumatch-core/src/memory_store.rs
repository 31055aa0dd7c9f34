//! In-process [`KeyedStore`] backed by a mutex-held map with per-key version
//! counters. Command execution is serialized the way a single-threaded store
//! would, which is exactly what makes the watch/commit contract honest:
//! every mutation bumps the key's version, and a commit applies only if all
//! watched versions are untouched.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use crate::error::StoreError;
use crate::store::{KeyedStore, TxOp, TxOutcome, TxReply, WatchToken};

#[derive(Debug, Clone)]
enum Value {
    Hash(HashMap<String, String>),
    Set(HashSet<String>),
}

#[derive(Default)]
struct Inner {
    values: HashMap<String, Value>,
    versions: HashMap<String, u64>,
}

impl Inner {
    fn version(&self, key: &str) -> u64 {
        self.versions.get(key).copied().unwrap_or(0)
    }

    fn bump(&mut self, key: &str) {
        *self.versions.entry(key.to_string()).or_insert(0) += 1;
    }

    fn hash_mut(&mut self, key: &str) -> Result<&mut HashMap<String, String>, StoreError> {
        match self
            .values
            .entry(key.to_string())
            .or_insert_with(|| Value::Hash(HashMap::new()))
        {
            Value::Hash(h) => Ok(h),
            Value::Set(_) => Err(StoreError::WrongType {
                key: key.to_string(),
            }),
        }
    }

    fn set_mut(&mut self, key: &str) -> Result<&mut HashSet<String>, StoreError> {
        match self
            .values
            .entry(key.to_string())
            .or_insert_with(|| Value::Set(HashSet::new()))
        {
            Value::Set(s) => Ok(s),
            Value::Hash(_) => Err(StoreError::WrongType {
                key: key.to_string(),
            }),
        }
    }

    fn hash_ref(&self, key: &str) -> Result<Option<&HashMap<String, String>>, StoreError> {
        match self.values.get(key) {
            None => Ok(None),
            Some(Value::Hash(h)) => Ok(Some(h)),
            Some(Value::Set(_)) => Err(StoreError::WrongType {
                key: key.to_string(),
            }),
        }
    }

    fn set_ref(&self, key: &str) -> Result<Option<&HashSet<String>>, StoreError> {
        match self.values.get(key) {
            None => Ok(None),
            Some(Value::Set(s)) => Ok(Some(s)),
            Some(Value::Hash(_)) => Err(StoreError::WrongType {
                key: key.to_string(),
            }),
        }
    }

    /// Drop a key entirely once its collection is empty, so `exists` and
    /// watched versions behave like a store that reaps empty records.
    fn reap_if_empty(&mut self, key: &str) {
        let empty = match self.values.get(key) {
            Some(Value::Hash(h)) => h.is_empty(),
            Some(Value::Set(s)) => s.is_empty(),
            None => false,
        };
        if empty {
            self.values.remove(key);
        }
    }

    fn apply(&mut self, op: &TxOp) -> Result<TxReply, StoreError> {
        match op {
            TxOp::HashPut { key, field, value } => {
                self.hash_mut(key)?.insert(field.clone(), value.clone());
                self.bump(key);
                Ok(TxReply::Done)
            }
            TxOp::HashPutAll { key, entries } => {
                let hash = self.hash_mut(key)?;
                for (field, value) in entries {
                    hash.insert(field.clone(), value.clone());
                }
                self.bump(key);
                Ok(TxReply::Done)
            }
            TxOp::HashDelete { key, fields } => {
                if let Some(Value::Hash(h)) = self.values.get_mut(key.as_str()) {
                    for field in fields {
                        h.remove(field);
                    }
                    self.bump(key);
                    self.reap_if_empty(key);
                }
                Ok(TxReply::Done)
            }
            TxOp::SetAdd { key, member } => {
                self.set_mut(key)?.insert(member.clone());
                self.bump(key);
                Ok(TxReply::Done)
            }
            TxOp::SetRemove { key, member } => {
                if let Some(Value::Set(s)) = self.values.get_mut(key.as_str()) {
                    s.remove(member);
                    self.bump(key);
                    self.reap_if_empty(key);
                }
                Ok(TxReply::Done)
            }
            TxOp::SetLen { key } => {
                let len = self.set_ref(key)?.map(HashSet::len).unwrap_or(0);
                Ok(TxReply::Len(len))
            }
            TxOp::Delete { keys } => {
                for key in keys {
                    if self.values.remove(key).is_some() {
                        self.bump(key);
                    }
                }
                Ok(TxReply::Done)
            }
        }
    }
}

#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        // A poisoned mutex means a panic mid-mutation; propagating the
        // panic is the only sane option for an in-process store.
        self.inner.lock().expect("memory store mutex poisoned")
    }
}

impl KeyedStore for MemoryStore {
    fn hash_get(&self, key: &str, field: &str) -> Result<Option<String>, StoreError> {
        let inner = self.lock();
        Ok(inner.hash_ref(key)?.and_then(|h| h.get(field).cloned()))
    }

    fn hash_put(&self, key: &str, field: &str, value: &str) -> Result<(), StoreError> {
        let mut inner = self.lock();
        inner.hash_mut(key)?.insert(field.to_string(), value.to_string());
        inner.bump(key);
        Ok(())
    }

    fn hash_put_all(&self, key: &str, entries: &[(String, String)]) -> Result<(), StoreError> {
        let mut inner = self.lock();
        let hash = inner.hash_mut(key)?;
        for (field, value) in entries {
            hash.insert(field.clone(), value.clone());
        }
        inner.bump(key);
        Ok(())
    }

    fn hash_delete(&self, key: &str, fields: &[&str]) -> Result<u64, StoreError> {
        let mut inner = self.lock();
        let mut removed = 0;
        if let Some(Value::Hash(h)) = inner.values.get_mut(key) {
            for field in fields {
                if h.remove(*field).is_some() {
                    removed += 1;
                }
            }
        }
        if removed > 0 {
            inner.bump(key);
            inner.reap_if_empty(key);
        }
        Ok(removed)
    }

    fn hash_get_all(&self, key: &str) -> Result<HashMap<String, String>, StoreError> {
        let inner = self.lock();
        Ok(inner.hash_ref(key)?.cloned().unwrap_or_default())
    }

    fn hash_multi_get(
        &self,
        key: &str,
        fields: &[String],
    ) -> Result<Vec<Option<String>>, StoreError> {
        let inner = self.lock();
        let hash = inner.hash_ref(key)?;
        Ok(fields
            .iter()
            .map(|f| hash.and_then(|h| h.get(f).cloned()))
            .collect())
    }

    fn hash_incr(&self, key: &str, field: &str, delta: i64) -> Result<i64, StoreError> {
        let mut inner = self.lock();
        let hash = inner.hash_mut(key)?;
        let current = match hash.get(field) {
            Some(raw) => raw.parse::<i64>().map_err(|_| StoreError::Corrupt {
                key: key.to_string(),
                reason: format!("field '{field}' is not an integer"),
            })?,
            None => 0,
        };
        let next = current + delta;
        hash.insert(field.to_string(), next.to_string());
        inner.bump(key);
        Ok(next)
    }

    fn hash_decr_if_positive(&self, key: &str, field: &str) -> Result<Option<i64>, StoreError> {
        let mut inner = self.lock();
        let current = match inner.hash_ref(key)?.and_then(|h| h.get(field)) {
            Some(raw) => raw.parse::<i64>().map_err(|_| StoreError::Corrupt {
                key: key.to_string(),
                reason: format!("field '{field}' is not an integer"),
            })?,
            None => 0,
        };
        if current <= 0 {
            return Ok(None);
        }
        let next = current - 1;
        inner
            .hash_mut(key)?
            .insert(field.to_string(), next.to_string());
        inner.bump(key);
        Ok(Some(next))
    }

    fn set_add(&self, key: &str, member: &str) -> Result<bool, StoreError> {
        let mut inner = self.lock();
        let added = inner.set_mut(key)?.insert(member.to_string());
        inner.bump(key);
        Ok(added)
    }

    fn set_remove(&self, key: &str, member: &str) -> Result<bool, StoreError> {
        let mut inner = self.lock();
        let mut removed = false;
        if let Some(Value::Set(s)) = inner.values.get_mut(key) {
            removed = s.remove(member);
        }
        if removed {
            inner.bump(key);
            inner.reap_if_empty(key);
        }
        Ok(removed)
    }

    fn set_members(&self, key: &str) -> Result<HashSet<String>, StoreError> {
        let inner = self.lock();
        Ok(inner.set_ref(key)?.cloned().unwrap_or_default())
    }

    fn set_len(&self, key: &str) -> Result<usize, StoreError> {
        let inner = self.lock();
        Ok(inner.set_ref(key)?.map(HashSet::len).unwrap_or(0))
    }

    fn set_contains(&self, key: &str, member: &str) -> Result<bool, StoreError> {
        let inner = self.lock();
        Ok(inner.set_ref(key)?.map(|s| s.contains(member)).unwrap_or(false))
    }

    fn delete(&self, keys: &[String]) -> Result<(), StoreError> {
        let mut inner = self.lock();
        for key in keys {
            if inner.values.remove(key).is_some() {
                inner.bump(key);
            }
        }
        Ok(())
    }

    fn exists(&self, key: &str) -> Result<bool, StoreError> {
        let inner = self.lock();
        Ok(inner.values.contains_key(key))
    }

    fn watch(&self, keys: &[String]) -> Result<WatchToken, StoreError> {
        let inner = self.lock();
        Ok(WatchToken {
            versions: keys
                .iter()
                .map(|k| (k.clone(), inner.version(k)))
                .collect(),
        })
    }

    fn commit_if_unchanged(
        &self,
        token: WatchToken,
        ops: Vec<TxOp>,
    ) -> Result<TxOutcome, StoreError> {
        let mut inner = self.lock();
        for (key, watched) in &token.versions {
            if inner.version(key) != *watched {
                return Ok(TxOutcome::Conflict);
            }
        }
        let mut replies = Vec::with_capacity(ops.len());
        for op in &ops {
            replies.push(inner.apply(op)?);
        }
        Ok(TxOutcome::Applied(replies))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_roundtrip_and_delete() {
        let store = MemoryStore::new();
        store.hash_put("h", "a", "1").unwrap();
        store.hash_put("h", "b", "2").unwrap();
        assert_eq!(store.hash_get("h", "a").unwrap().as_deref(), Some("1"));
        assert_eq!(store.hash_delete("h", &["a"]).unwrap(), 1);
        assert_eq!(store.hash_get("h", "a").unwrap(), None);
        let all = store.hash_get_all("h").unwrap();
        assert_eq!(all.len(), 1);
    }

    #[test]
    fn empty_collections_are_reaped() {
        let store = MemoryStore::new();
        store.set_add("s", "x").unwrap();
        assert!(store.exists("s").unwrap());
        store.set_remove("s", "x").unwrap();
        assert!(!store.exists("s").unwrap());
    }

    #[test]
    fn commit_applies_when_unwatched_keys_change() {
        let store = MemoryStore::new();
        let token = store.watch(&["a".into()]).unwrap();
        store.hash_put("other", "f", "v").unwrap();
        let outcome = store
            .commit_if_unchanged(
                token,
                vec![TxOp::HashPut {
                    key: "a".into(),
                    field: "f".into(),
                    value: "v".into(),
                }],
            )
            .unwrap();
        assert!(matches!(outcome, TxOutcome::Applied(_)));
        assert_eq!(store.hash_get("a", "f").unwrap().as_deref(), Some("v"));
    }

    #[test]
    fn commit_conflicts_when_watched_key_changes() {
        let store = MemoryStore::new();
        let token = store.watch(&["a".into()]).unwrap();
        store.hash_put("a", "f", "other-writer").unwrap();
        let outcome = store
            .commit_if_unchanged(
                token,
                vec![TxOp::HashPut {
                    key: "a".into(),
                    field: "f".into(),
                    value: "mine".into(),
                }],
            )
            .unwrap();
        assert!(outcome.is_conflict());
        // Nothing from the failed commit was written.
        assert_eq!(
            store.hash_get("a", "f").unwrap().as_deref(),
            Some("other-writer")
        );
    }

    #[test]
    fn conflict_on_creation_of_watched_missing_key() {
        let store = MemoryStore::new();
        let token = store.watch(&["new".into()]).unwrap();
        store.set_add("new", "m").unwrap();
        let outcome = store.commit_if_unchanged(token, vec![]).unwrap();
        assert!(outcome.is_conflict());
    }

    #[test]
    fn set_len_reply_reflects_writes_in_same_commit() {
        let store = MemoryStore::new();
        store.set_add("members", "a").unwrap();
        store.set_add("members", "b").unwrap();
        let token = store.watch(&["members".into()]).unwrap();
        let outcome = store
            .commit_if_unchanged(
                token,
                vec![
                    TxOp::SetRemove {
                        key: "members".into(),
                        member: "a".into(),
                    },
                    TxOp::SetLen {
                        key: "members".into(),
                    },
                ],
            )
            .unwrap();
        match outcome {
            TxOutcome::Applied(replies) => assert_eq!(replies[1], TxReply::Len(1)),
            TxOutcome::Conflict => panic!("unexpected conflict"),
        }
    }

    #[test]
    fn decr_if_positive_stops_at_zero() {
        let store = MemoryStore::new();
        store.hash_put("q", "alice", "2").unwrap();
        assert_eq!(store.hash_decr_if_positive("q", "alice").unwrap(), Some(1));
        assert_eq!(store.hash_decr_if_positive("q", "alice").unwrap(), Some(0));
        assert_eq!(store.hash_decr_if_positive("q", "alice").unwrap(), None);
        assert_eq!(store.hash_get("q", "alice").unwrap().as_deref(), Some("0"));
    }

    #[test]
    fn decr_if_positive_missing_field_is_exhausted() {
        let store = MemoryStore::new();
        assert_eq!(store.hash_decr_if_positive("q", "ghost").unwrap(), None);
    }

    #[test]
    fn wrong_type_is_an_error() {
        let store = MemoryStore::new();
        store.set_add("k", "m").unwrap();
        assert!(store.hash_get("k", "f").is_err());
    }
}
