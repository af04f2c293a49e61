//! Registry of running workers, one per vizier.

use std::collections::HashMap;
use std::sync::Arc;

use mdindex_bus::Streamer;
use mdindex_core::ClusterScope;
use mdindex_store::DocumentStore;
use tokio::sync::Mutex;
use tracing::info;
use uuid::Uuid;

use crate::{ConflictAwareWriter, ErrorSink, IndexerConfig, IndexerError, Pipeline, VizierIndexer};

pub struct IndexerManager {
    streamer: Arc<dyn Streamer>,
    writer: ConflictAwareWriter,
    sink: ErrorSink,
    config: IndexerConfig,
    workers: Mutex<HashMap<Uuid, VizierIndexer>>,
}

impl IndexerManager {
    pub fn new(
        streamer: Arc<dyn Streamer>,
        store: Arc<dyn DocumentStore>,
        sink: ErrorSink,
        config: IndexerConfig,
    ) -> Self {
        Self {
            streamer,
            writer: ConflictAwareWriter::new(store),
            sink,
            config,
            workers: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &IndexerConfig {
        &self.config
    }

    /// Start indexing `topic` for the scope's vizier. A vizier has at most one worker.
    pub async fn start_vizier(&self, scope: ClusterScope, topic: &str) -> Result<(), IndexerError> {
        let mut workers = self.workers.lock().await;
        let vizier_id = scope.vizier_id;
        if workers.contains_key(&vizier_id) {
            return Err(IndexerError::AlreadyRunning(vizier_id));
        }
        let pipeline = Pipeline::new(scope, self.writer.clone(), self.sink.clone());
        let mut worker = VizierIndexer::new(pipeline, Arc::clone(&self.streamer), self.config.stop_grace);
        worker.start(topic, &self.config.durable_name()).await?;
        workers.insert(vizier_id, worker);
        Ok(())
    }

    /// Stop and forget the worker for `vizier_id`. Returns whether one was running.
    pub async fn stop_vizier(&self, vizier_id: &Uuid) -> bool {
        let worker = self.workers.lock().await.remove(vizier_id);
        match worker {
            Some(mut w) => {
                w.stop().await;
                info!(vizier_id = %vizier_id, "vizier indexer removed");
                true
            }
            None => false,
        }
    }

    pub async fn stop_all(&self) {
        let drained: Vec<(Uuid, VizierIndexer)> = self.workers.lock().await.drain().collect();
        for (_, mut w) in drained {
            w.stop().await;
        }
    }

    pub async fn running(&self) -> Vec<Uuid> {
        let mut ids: Vec<Uuid> = self.workers.lock().await.keys().copied().collect();
        ids.sort_unstable();
        ids
    }
}
