//! # Heap
//!
//! Server-side registry of live capabilities, keyed by unguessable ids.
//!
//! ## Invariants
//!
//! - Ids are v4 UUIDs generated here; nothing else can mint a resolvable id.
//! - A live stub is stored at most once. Promoting it again returns its existing id.
//! - Entries live until released or until the heap is dropped with its session.

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use revive::Value;
use uuid::Uuid;

use crate::stub::Stub;

#[derive(Debug, Default)]
pub struct Heap {
    entries: DashMap<String, Stub>,
    /// Stub identity to heap id.
    ids: DashMap<usize, String>,
}

impl Heap {
    pub fn new() -> Self {
        Self::default()
    }

    /// A fresh heap id.
    pub(crate) fn mint() -> String {
        Uuid::new_v4().to_string()
    }

    /// Stores `stub` under a fresh id.
    pub fn insert(&self, stub: Stub) -> String {
        let id = Self::mint();
        self.ids.insert(stub.identity(), id.clone());
        self.entries.insert(id.clone(), stub);
        tracing::trace!(heap_id = %id, "heap insert");
        id
    }

    /// Returns the id of `stub`, inserting it if it is not stored yet.
    pub fn promote(&self, stub: &Stub) -> String {
        match self.ids.entry(stub.identity()) {
            Entry::Occupied(entry) => entry.get().clone(),
            Entry::Vacant(entry) => {
                let id = Self::mint();
                self.entries.insert(id.clone(), stub.clone());
                entry.insert(id.clone());
                tracing::trace!(heap_id = %id, "heap promote");
                id
            }
        }
    }

    /// The id `stub` is stored under, if it was promoted.
    pub fn id_of(&self, stub: &Stub) -> Option<String> {
        self.ids.get(&stub.identity()).map(|id| id.value().clone())
    }

    /// Stores `stub` under `id`, an id from [`Heap::mint`] nobody holds yet.
    pub(crate) fn adopt(&self, id: String, stub: Stub) {
        self.ids.entry(stub.identity()).or_insert_with(|| id.clone());
        tracing::trace!(heap_id = %id, "heap adopt");
        self.entries.insert(id, stub);
    }

    /// The value behind `id`, unwrapped from its stub.
    pub fn lookup(&self, id: &str) -> Option<Value> {
        self.entries.get(id).map(|entry| entry.value().value().clone())
    }

    /// Drops the entry for `id`. Returns whether one existed.
    pub fn release(&self, id: &str) -> bool {
        let Some((_, stub)) = self.entries.remove(id) else {
            return false;
        };
        self.ids.remove_if(&stub.identity(), |_, stored| stored == id);
        tracing::trace!(heap_id = %id, "heap release");
        true
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
