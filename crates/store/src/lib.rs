//! mdindex store: document backends applying the version-guarded merge.
//!
//! Backends either run the merge atomically themselves ([`MemoryStore`], the
//! Elasticsearch painless script) or expose compare-and-swap primitives and get
//! the merge from [`CasStore`].

#![forbid(unsafe_code)]

pub mod cas;
pub mod elastic;
pub mod memory;

use async_trait::async_trait;
use mdindex_core::{DocumentId, IndexDocument, MergeOutcome};
use thiserror::Error;

pub use cas::{CasStore, SeqNo, VersionedStore};
pub use elastic::ElasticStore;
pub use memory::MemoryStore;

/// When a write must become observable to readers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Visibility {
    /// Refresh on write; the next read sees it.
    #[default]
    Immediate,
    Eventual,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store unreachable: {0}")]
    Unreachable(String),
    #[error("conflicting writers on {id}; gave up after {attempts} attempts")]
    ConflictRetriesExhausted { id: String, attempts: u32 },
    #[error("store rejected request ({status}): {body}")]
    Rejected { status: u16, body: String },
    #[error("serialization: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("backend: {0}")]
    Backend(String),
}

/// A store that can apply [`mdindex_core::merge`] atomically per document.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Insert `delta` under `id` if absent, otherwise merge it under the version guard.
    async fn conditional_upsert(
        &self,
        id: &DocumentId,
        delta: &IndexDocument,
        visibility: Visibility,
    ) -> Result<MergeOutcome, StoreError>;

    async fn get(&self, id: &DocumentId) -> Result<Option<IndexDocument>, StoreError>;
}
