//! Store abstraction: hash-field maps, sets, and an optimistic
//! watch/commit-if-unchanged transaction primitive.
//!
//! No locks are held while application logic runs between `watch` and
//! `commit_if_unchanged`. Conflicts are detected at commit time and must be
//! retried (or surfaced) by the caller.

use std::collections::{HashMap, HashSet};

use crate::error::StoreError;

/// Versions of a set of watched keys, captured at `watch` time.
/// A key that does not exist yet watches at version 0, so creation by
/// another actor is a conflict too.
#[derive(Debug, Clone)]
pub struct WatchToken {
    pub versions: Vec<(String, u64)>,
}

/// A write (or in-transaction read) queued into an optimistic commit.
#[derive(Debug, Clone)]
pub enum TxOp {
    HashPut {
        key: String,
        field: String,
        value: String,
    },
    HashPutAll {
        key: String,
        entries: Vec<(String, String)>,
    },
    HashDelete {
        key: String,
        fields: Vec<String>,
    },
    SetAdd {
        key: String,
        member: String,
    },
    SetRemove {
        key: String,
        member: String,
    },
    /// Cardinality read executed atomically with the writes around it.
    /// The leave protocol uses this to learn the post-removal member count
    /// inside the same commit.
    SetLen {
        key: String,
    },
    Delete {
        keys: Vec<String>,
    },
}

/// Per-op result of an applied transaction, in queue order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TxReply {
    Done,
    Len(usize),
}

#[derive(Debug)]
pub enum TxOutcome {
    /// All ops applied atomically; replies are in queue order.
    Applied(Vec<TxReply>),
    /// A watched key was mutated by another actor since the watch began.
    /// Nothing was written.
    Conflict,
}

impl TxOutcome {
    pub fn is_conflict(&self) -> bool {
        matches!(self, TxOutcome::Conflict)
    }
}

/// Shared, crash-resistant key/value store contract.
///
/// Plain operations are individually atomic; cross-key atomicity comes only
/// from `watch` + `commit_if_unchanged`. Any store with per-key versions or
/// compare-and-swap satisfies this, including the in-process
/// [`MemoryStore`](crate::memory_store::MemoryStore).
pub trait KeyedStore: Send + Sync {
    // -- Hash fields --

    fn hash_get(&self, key: &str, field: &str) -> Result<Option<String>, StoreError>;
    fn hash_put(&self, key: &str, field: &str, value: &str) -> Result<(), StoreError>;
    fn hash_put_all(&self, key: &str, entries: &[(String, String)]) -> Result<(), StoreError>;
    fn hash_delete(&self, key: &str, fields: &[&str]) -> Result<u64, StoreError>;
    fn hash_get_all(&self, key: &str) -> Result<HashMap<String, String>, StoreError>;
    fn hash_multi_get(
        &self,
        key: &str,
        fields: &[String],
    ) -> Result<Vec<Option<String>>, StoreError>;

    /// Atomic counter increment on a hash field (missing field counts as 0).
    fn hash_incr(&self, key: &str, field: &str, delta: i64) -> Result<i64, StoreError>;

    /// Atomic decrement that refuses to go below zero. Returns the remaining
    /// value, or `None` (and writes nothing) when the field is already at or
    /// below zero or missing. This closes the check-then-decrement race for
    /// quota bookkeeping.
    fn hash_decr_if_positive(&self, key: &str, field: &str) -> Result<Option<i64>, StoreError>;

    // -- Sets --

    fn set_add(&self, key: &str, member: &str) -> Result<bool, StoreError>;
    fn set_remove(&self, key: &str, member: &str) -> Result<bool, StoreError>;
    fn set_members(&self, key: &str) -> Result<HashSet<String>, StoreError>;
    fn set_len(&self, key: &str) -> Result<usize, StoreError>;
    fn set_contains(&self, key: &str, member: &str) -> Result<bool, StoreError>;

    // -- Keys --

    fn delete(&self, keys: &[String]) -> Result<(), StoreError>;
    fn exists(&self, key: &str) -> Result<bool, StoreError>;

    // -- Optimistic transactions --

    fn watch(&self, keys: &[String]) -> Result<WatchToken, StoreError>;
    fn commit_if_unchanged(
        &self,
        token: WatchToken,
        ops: Vec<TxOp>,
    ) -> Result<TxOutcome, StoreError>;
}
