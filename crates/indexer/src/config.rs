use std::time::Duration;

use uuid::Uuid;

/// Runtime knobs, read from `MDINDEX_*` environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexerConfig {
    pub index_name: String,
    pub error_sink_cap: usize,
    /// How long `stop` waits for the in-flight message before abandoning it.
    pub stop_grace: Duration,
    pub cas_max_attempts: u32,
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            index_name: "md_entities".to_string(),
            error_sink_cap: 256,
            stop_grace: Duration::from_millis(5000),
            cas_max_attempts: 5,
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.parse::<T>().ok())
}

impl IndexerConfig {
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            index_name: std::env::var("MDINDEX_INDEX_NAME").ok().filter(|s| !s.is_empty()).unwrap_or(d.index_name),
            error_sink_cap: env_parse("MDINDEX_ERROR_SINK_CAP").unwrap_or(d.error_sink_cap).max(1),
            stop_grace: env_parse::<u64>("MDINDEX_STOP_GRACE_MS").map(Duration::from_millis).unwrap_or(d.stop_grace),
            cas_max_attempts: env_parse("MDINDEX_CAS_RETRIES").unwrap_or(d.cas_max_attempts).max(1),
        }
    }

    /// Durable subscription name shared by every indexer replica for this index.
    pub fn durable_name(&self) -> String {
        format!("indexer{}", self.index_name)
    }
}

/// Topic carrying durable metadata updates from one vizier.
pub fn metadata_topic(vizier_id: &Uuid) -> String {
    format!("v2c.{}.DurableMetadataUpdates", vizier_id)
}
