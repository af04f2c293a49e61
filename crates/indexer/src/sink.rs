//! Bounded, non-blocking error reporting shared by all workers.

use metrics::counter;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{error, warn};
use uuid::Uuid;

use crate::IndexerError;

#[derive(Debug)]
pub struct ErrorReport {
    pub vizier_id: Uuid,
    pub cluster_uid: String,
    pub error: IndexerError,
}

/// Sending never waits: when the consumer lags and the channel is full the report
/// is dropped and counted, so a slow consumer cannot stall message processing.
#[derive(Debug, Clone)]
pub struct ErrorSink {
    tx: mpsc::Sender<ErrorReport>,
}

impl ErrorSink {
    pub fn channel(cap: usize) -> (Self, mpsc::Receiver<ErrorReport>) {
        let (tx, rx) = mpsc::channel(cap.max(1));
        (Self { tx }, rx)
    }

    pub fn report(&self, report: ErrorReport) {
        match self.tx.try_send(report) {
            Ok(()) => {}
            Err(TrySendError::Full(r)) => {
                counter!("indexer_error_sink_dropped_total", 1u64);
                warn!(vizier_id = %r.vizier_id, error = %r.error, "error sink full; dropping report");
            }
            Err(TrySendError::Closed(r)) => {
                counter!("indexer_error_sink_dropped_total", 1u64);
                warn!(vizier_id = %r.vizier_id, error = %r.error, "error sink closed");
            }
        }
    }
}

/// Consume reports until every sender is gone, logging each one. Returns how many were seen.
pub async fn log_reports(mut rx: mpsc::Receiver<ErrorReport>) -> u64 {
    let mut seen = 0u64;
    while let Some(r) = rx.recv().await {
        seen += 1;
        error!(vizier_id = %r.vizier_id, cluster_uid = %r.cluster_uid, kind = r.error.kind(), error = %r.error, "error during indexing");
    }
    seen
}
