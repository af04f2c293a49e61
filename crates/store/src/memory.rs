//! In-RAM document store.
//!
//! The merge runs under one lock, so concurrent deltas for the same id serialize.
//! Writes are visible as soon as the call returns regardless of [`Visibility`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use mdindex_core::{merge, DocumentId, IndexDocument, MergeOutcome};
use rustc_hash::FxHashMap;

use crate::{DocumentStore, SeqNo, StoreError, VersionedStore, Visibility};

struct Slot {
    doc: IndexDocument,
    seq: SeqNo,
}

#[derive(Default)]
pub struct MemoryStore {
    docs: Mutex<FxHashMap<DocumentId, Slot>>,
    next_seq: AtomicU64,
    upserts: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, FxHashMap<DocumentId, Slot>> {
        self.docs.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn bump(&self) -> SeqNo {
        self.next_seq.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of `conditional_upsert` calls received, including no-ops.
    pub fn upsert_calls(&self) -> u64 {
        self.upserts.load(Ordering::Relaxed)
    }

    /// All documents ordered by id.
    pub fn documents(&self) -> Vec<IndexDocument> {
        let docs = self.lock();
        let mut ids: Vec<&DocumentId> = docs.keys().collect();
        ids.sort_unstable();
        ids.into_iter().filter_map(|id| docs.get(id).map(|s| s.doc.clone())).collect()
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn conditional_upsert(
        &self,
        id: &DocumentId,
        delta: &IndexDocument,
        _visibility: Visibility,
    ) -> Result<MergeOutcome, StoreError> {
        self.upserts.fetch_add(1, Ordering::Relaxed);
        let mut docs = self.lock();
        let outcome = match docs.get_mut(id) {
            Some(slot) => {
                let outcome = merge::merge_into(&mut slot.doc, delta);
                if outcome != MergeOutcome::Noop {
                    slot.seq = self.bump();
                }
                outcome
            }
            None => {
                let seq = self.bump();
                docs.insert(id.clone(), Slot { doc: delta.clone(), seq });
                MergeOutcome::Created
            }
        };
        Ok(outcome)
    }

    async fn get(&self, id: &DocumentId) -> Result<Option<IndexDocument>, StoreError> {
        Ok(self.lock().get(id).map(|s| s.doc.clone()))
    }
}

#[async_trait]
impl VersionedStore for MemoryStore {
    async fn read(&self, id: &DocumentId) -> Result<Option<(IndexDocument, SeqNo)>, StoreError> {
        Ok(self.lock().get(id).map(|s| (s.doc.clone(), s.seq)))
    }

    async fn compare_and_swap(
        &self,
        id: &DocumentId,
        expected: Option<SeqNo>,
        doc: &IndexDocument,
        _visibility: Visibility,
    ) -> Result<bool, StoreError> {
        let mut docs = self.lock();
        let current = docs.get(id).map(|s| s.seq);
        if current != expected {
            return Ok(false);
        }
        let seq = self.bump();
        docs.insert(id.clone(), Slot { doc: doc.clone(), seq });
        Ok(true)
    }
}
