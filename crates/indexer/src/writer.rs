use std::sync::Arc;
use std::time::Instant;

use mdindex_core::{DocumentId, IndexDocument, MergeOutcome};
use mdindex_store::{DocumentStore, StoreError, Visibility};
use metrics::{counter, histogram};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
#[error("writing {doc_id}: {source}")]
pub struct WriteError {
    pub doc_id: DocumentId,
    #[source]
    pub source: StoreError,
}

/// Applies deltas through the store's version-guarded upsert, always with
/// refresh-on-write so the next delta for the same id sees this one.
#[derive(Clone)]
pub struct ConflictAwareWriter {
    store: Arc<dyn DocumentStore>,
}

impl ConflictAwareWriter {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    /// No retries here; a failed write is reported by the caller and left for a newer delta.
    pub async fn apply(&self, delta: &IndexDocument) -> Result<MergeOutcome, WriteError> {
        let doc_id = delta.id();
        let started = Instant::now();
        let res = self.store.conditional_upsert(&doc_id, delta, Visibility::Immediate).await;
        histogram!("indexer_write_ms", started.elapsed().as_secs_f64() * 1000.0);
        match res {
            Ok(outcome) => {
                counter!("indexer_writes_total", 1u64, "outcome" => outcome.as_str());
                debug!(doc_id = %doc_id, version = delta.update_version, outcome = outcome.as_str(), "applied delta");
                Ok(outcome)
            }
            Err(source) => {
                counter!("indexer_writes_total", 1u64, "outcome" => "error");
                Err(WriteError { doc_id, source })
            }
        }
    }
}
