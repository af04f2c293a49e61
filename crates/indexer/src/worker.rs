//! Subscription worker for a single vizier.
//!
//! `Idle → Subscribed → Closed`. Messages are handled one at a time on the worker's
//! own task; `stop` lets the in-flight message finish (and ack) before the durable
//! subscription is closed, waiting at most `stop_grace`. A message still in flight
//! after that is abandoned unacked and will be redelivered to the next subscriber.

use std::sync::Arc;
use std::time::Duration;

use mdindex_bus::{Message, Streamer, Subscription};
use mdindex_core::{decode, map_update, ClusterScope, MergeOutcome};
use metrics::counter;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::{ConflictAwareWriter, ErrorReport, ErrorSink, IndexerError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexerState {
    Idle,
    Subscribed,
    Closed,
}

/// Per-message pipeline: decode → map → write → ack.
pub struct Pipeline {
    scope: ClusterScope,
    writer: ConflictAwareWriter,
    sink: ErrorSink,
}

impl Pipeline {
    pub fn new(scope: ClusterScope, writer: ConflictAwareWriter, sink: ErrorSink) -> Self {
        Self { scope, writer, sink }
    }

    pub fn scope(&self) -> &ClusterScope {
        &self.scope
    }

    /// Process a payload up to the write. `Ok(None)` means the update maps to no document.
    pub async fn process(&self, payload: &[u8]) -> Result<Option<MergeOutcome>, IndexerError> {
        let update = decode(payload)?;
        let Some(delta) = map_update(&self.scope, &update) else {
            trace!(update_type = update.update.type_name(), "update not indexed");
            return Ok(None);
        };
        Ok(Some(self.writer.apply(&delta).await?))
    }

    /// Handle one delivered message. The ack happens after the write attempt,
    /// whatever its result.
    pub async fn handle(&self, msg: &dyn Message) {
        counter!("indexer_messages_total", 1u64);
        if let Err(e) = self.process(msg.payload()).await {
            self.report(e);
        }
        if let Err(e) = msg.ack().await {
            self.report(e.into());
        }
    }

    pub fn report(&self, error: IndexerError) {
        counter!("indexer_errors_total", 1u64, "kind" => error.kind());
        debug!(vizier_id = %self.scope.vizier_id, error = %error, "reporting indexer error");
        self.sink.report(ErrorReport {
            vizier_id: self.scope.vizier_id,
            cluster_uid: self.scope.cluster_uid.clone(),
            error,
        });
    }
}

struct Running {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

pub struct VizierIndexer {
    pipeline: Arc<Pipeline>,
    streamer: Arc<dyn Streamer>,
    stop_grace: Duration,
    running: Option<Running>,
    state: IndexerState,
}

impl VizierIndexer {
    pub fn new(pipeline: Pipeline, streamer: Arc<dyn Streamer>, stop_grace: Duration) -> Self {
        Self { pipeline: Arc::new(pipeline), streamer, stop_grace, running: None, state: IndexerState::Idle }
    }

    pub fn state(&self) -> IndexerState {
        self.state
    }

    pub fn scope(&self) -> &ClusterScope {
        self.pipeline.scope()
    }

    /// Open the durable subscription and start consuming. Only valid when idle; a
    /// failed subscribe is reported and leaves the worker idle.
    pub async fn start(&mut self, topic: &str, durable_name: &str) -> Result<(), IndexerError> {
        if self.state != IndexerState::Idle {
            return Err(IndexerError::InvalidState(self.state, IndexerState::Idle));
        }
        let scope = self.pipeline.scope();
        info!(vizier_id = %scope.vizier_id, cluster_uid = %scope.cluster_uid, topic = %topic, "starting indexer");
        let sub = match self.streamer.persistent_subscribe(topic, durable_name).await {
            Ok(sub) => sub,
            Err(e) => {
                warn!(topic = %topic, error = %e, "failed to subscribe");
                self.pipeline.report(e.clone().into());
                return Err(e.into());
            }
        };
        let cancel = CancellationToken::new();
        let task = tokio::spawn(run(Arc::clone(&self.pipeline), sub, cancel.clone()));
        self.running = Some(Running { cancel, task });
        self.state = IndexerState::Subscribed;
        Ok(())
    }

    /// Stop consuming and release the subscription. Idempotent; always ends `Closed`.
    pub async fn stop(&mut self) {
        self.state = IndexerState::Closed;
        let Some(Running { cancel, mut task }) = self.running.take() else {
            return;
        };
        cancel.cancel();
        match tokio::time::timeout(self.stop_grace, &mut task).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(vizier_id = %self.scope().vizier_id, error = %e, "indexer task failed"),
            Err(_) => {
                warn!(
                    vizier_id = %self.scope().vizier_id,
                    grace_ms = self.stop_grace.as_millis() as u64,
                    "in-flight message did not finish in time; abandoning it unacked"
                );
                task.abort();
                // Wait for the abort so the subscription is released on return.
                let _ = task.await;
            }
        }
    }
}

async fn run(pipeline: Arc<Pipeline>, mut sub: Box<dyn Subscription>, cancel: CancellationToken) {
    loop {
        // `next` is cancel-safe, so losing the race to `cancelled` drops nothing.
        let msg = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            next = sub.next() => match next {
                Some(msg) => msg,
                None => {
                    warn!(vizier_id = %pipeline.scope().vizier_id, "subscription ended");
                    break;
                }
            },
        };
        pipeline.handle(msg.as_ref()).await;
    }
    if let Err(e) = sub.close().await {
        warn!(vizier_id = %pipeline.scope().vizier_id, error = %e, "failed to un-subscribe");
        pipeline.report(e.into());
    }
    info!(vizier_id = %pipeline.scope().vizier_id, "indexer stopped");
}
