//! Process-wide advisory lock table keyed by entity key.
//!
//! # Responsibility
//! - Record which kind of mutation currently holds a key.
//! - Reject contenders immediately; nothing ever waits or queues here.
//!
//! # Invariants
//! - At most one entry per key at any instant.
//! - Acquire is an atomic insert-if-absent, release an atomic remove.
//! - The table never fails; a refused acquire means "held by someone else".

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::fmt::{Display, Formatter};

/// Kind of mutation holding a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    Add,
    Update,
    Delete,
}

impl OperationKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Add => "add",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }
}

impl Display for OperationKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Advisory, fail-fast lock table shared by every operation of a process.
///
/// Create one instance at startup and inject it (usually as `Arc`) into
/// every service that mutates the same store.
#[derive(Debug, Default)]
pub struct EntityLockTable {
    entries: DashMap<String, OperationKind>,
}

impl EntityLockTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts `(key, kind)` only when `key` is absent.
    ///
    /// Returns whether this call now holds the key.
    pub fn try_acquire(&self, key: &str, kind: OperationKind) -> bool {
        match self.entries.entry(key.to_string()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(kind);
                true
            }
        }
    }

    /// Removes the entry for `key`; removing an absent key is a no-op.
    pub fn release(&self, key: &str) {
        self.entries.remove(key);
    }

    /// Like [`Self::try_acquire`], but returns a lease released on drop.
    pub fn try_lease(&self, key: &str, kind: OperationKind) -> Option<LockLease<'_>> {
        self.try_acquire(key, kind).then(|| LockLease {
            table: self,
            key: key.to_string(),
            kind,
        })
    }

    /// Kind of the operation currently holding `key`.
    pub fn holder(&self, key: &str) -> Option<OperationKind> {
        self.entries.get(key).map(|entry| *entry.value())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Held key; the entry is removed when the lease is dropped.
#[derive(Debug)]
pub struct LockLease<'a> {
    table: &'a EntityLockTable,
    key: String,
    kind: OperationKind,
}

impl LockLease<'_> {
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn kind(&self) -> OperationKind {
        self.kind
    }
}

impl Drop for LockLease<'_> {
    fn drop(&mut self) {
        self.table.release(&self.key);
    }
}
