//! mdindex indexer: one subscription worker per monitored cluster.
//!
//! Each worker runs decode → map → conditional upsert → ack for every message on
//! its durable subscription. Failures are reported to an [`ErrorSink`] and the
//! message is acked anyway; duplicates and replays are absorbed by the version
//! guard in the store, not by redelivery.

#![forbid(unsafe_code)]

pub mod config;
pub mod manager;
pub mod sink;
pub mod worker;
pub mod writer;

use mdindex_bus::SubscriptionError;
use mdindex_core::DecodeError;
use thiserror::Error;
use uuid::Uuid;

pub use config::{metadata_topic, IndexerConfig};
pub use manager::IndexerManager;
pub use sink::{log_reports, ErrorReport, ErrorSink};
pub use worker::{IndexerState, Pipeline, VizierIndexer};
pub use writer::{ConflictAwareWriter, WriteError};

#[derive(Debug, Error)]
pub enum IndexerError {
    #[error("decode: {0}")]
    Decode(#[from] DecodeError),
    #[error(transparent)]
    Write(#[from] WriteError),
    #[error("subscription: {0}")]
    Subscription(#[from] SubscriptionError),
    #[error("indexer is {0:?}; operation requires {1:?}")]
    InvalidState(IndexerState, IndexerState),
    #[error("an indexer is already running for vizier {0}")]
    AlreadyRunning(Uuid),
}

impl IndexerError {
    /// Metric label for the error class.
    pub fn kind(&self) -> &'static str {
        match self {
            IndexerError::Decode(_) => "decode",
            IndexerError::Write(_) => "write",
            IndexerError::Subscription(_) => "subscription",
            IndexerError::InvalidState(..) | IndexerError::AlreadyRunning(_) => "lifecycle",
        }
    }
}
