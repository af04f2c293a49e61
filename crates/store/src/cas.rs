//! Optimistic read-compare-swap merge for stores without server-side scripting.

use async_trait::async_trait;
use mdindex_core::{merge, DocumentId, IndexDocument, MergeOutcome};
use metrics::counter;
use tracing::debug;

use crate::{DocumentStore, StoreError, Visibility};

/// Opaque per-document write sequence, changed by every successful write.
pub type SeqNo = u64;

#[async_trait]
pub trait VersionedStore: Send + Sync {
    async fn read(&self, id: &DocumentId) -> Result<Option<(IndexDocument, SeqNo)>, StoreError>;

    /// Store `doc` only if the current sequence equals `expected` (`None`: document
    /// must be absent). `Ok(false)` means another writer got there first.
    async fn compare_and_swap(
        &self,
        id: &DocumentId,
        expected: Option<SeqNo>,
        doc: &IndexDocument,
        visibility: Visibility,
    ) -> Result<bool, StoreError>;
}

/// Runs the merge client-side, retrying the CAS at most `max_attempts` times.
pub struct CasStore<S> {
    inner: S,
    max_attempts: u32,
}

impl<S: VersionedStore> CasStore<S> {
    pub fn new(inner: S, max_attempts: u32) -> Self {
        Self { inner, max_attempts: max_attempts.max(1) }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }
}

#[async_trait]
impl<S: VersionedStore> DocumentStore for CasStore<S> {
    async fn conditional_upsert(
        &self,
        id: &DocumentId,
        delta: &IndexDocument,
        visibility: Visibility,
    ) -> Result<MergeOutcome, StoreError> {
        for attempt in 1..=self.max_attempts {
            let (doc, outcome, expected) = match self.inner.read(id).await? {
                None => (delta.clone(), MergeOutcome::Created, None),
                Some((mut stored, seq)) => match merge::merge_into(&mut stored, delta) {
                    MergeOutcome::Noop => return Ok(MergeOutcome::Noop),
                    outcome => (stored, outcome, Some(seq)),
                },
            };
            if self.inner.compare_and_swap(id, expected, &doc, visibility).await? {
                return Ok(outcome);
            }
            counter!("store_cas_conflicts_total", 1u64);
            debug!(doc_id = %id, attempt, "cas conflict; re-reading");
        }
        Err(StoreError::ConflictRetriesExhausted { id: id.to_string(), attempts: self.max_attempts })
    }

    async fn get(&self, id: &DocumentId) -> Result<Option<IndexDocument>, StoreError> {
        Ok(self.inner.read(id).await?.map(|(doc, _)| doc))
    }
}
