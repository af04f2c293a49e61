//! Elasticsearch backend.
//!
//! Uses the `_update` API with the painless merge script and the delta as the
//! `upsert` document, so the merge runs atomically on the shard.

use std::time::Duration;

use async_trait::async_trait;
use mdindex_core::merge::{script_params, PAINLESS_MERGE_SCRIPT};
use mdindex_core::{DocumentId, IndexDocument, MergeOutcome};
use reqwest::StatusCode;
use serde::Deserialize;
use tracing::debug;

use crate::{DocumentStore, StoreError, Visibility};

/// Version conflicts between concurrent scripted updates are retried by the
/// cluster itself this many times before surfacing a 409.
const RETRY_ON_CONFLICT: u32 = 5;

#[derive(Debug, Clone)]
pub struct ElasticStore {
    client: reqwest::Client,
    base_url: String,
    index: String,
}

#[derive(Deserialize)]
struct UpdateResponse {
    result: String,
}

#[derive(Deserialize)]
struct GetResponse {
    #[serde(default)]
    found: bool,
    #[serde(rename = "_source")]
    source: Option<IndexDocument>,
}

impl ElasticStore {
    pub fn new(base_url: &str, index: &str) -> Result<Self, StoreError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| StoreError::Backend(format!("building http client: {}", e)))?;
        Ok(Self { client, base_url: base_url.trim_end_matches('/').to_string(), index: index.to_string() })
    }

    pub fn update_url(&self, id: &DocumentId, visibility: Visibility) -> String {
        let refresh = match visibility {
            Visibility::Immediate => "true",
            Visibility::Eventual => "false",
        };
        format!(
            "{}/{}/_update/{}?refresh={}&retry_on_conflict={}",
            self.base_url, self.index, id, refresh, RETRY_ON_CONFLICT
        )
    }

    pub fn update_body(delta: &IndexDocument) -> serde_json::Value {
        serde_json::json!({
            "script": {
                "source": PAINLESS_MERGE_SCRIPT,
                "lang": "painless",
                "params": script_params(delta),
            },
            "upsert": delta,
        })
    }
}

fn parse_result(result: &str) -> Result<MergeOutcome, StoreError> {
    match result {
        "created" => Ok(MergeOutcome::Created),
        "updated" => Ok(MergeOutcome::Updated),
        "noop" => Ok(MergeOutcome::Noop),
        other => Err(StoreError::Backend(format!("unexpected update result {:?}", other))),
    }
}

async fn rejected(resp: reqwest::Response) -> StoreError {
    let status = resp.status().as_u16();
    let body = resp.text().await.unwrap_or_default();
    StoreError::Rejected { status, body }
}

#[async_trait]
impl DocumentStore for ElasticStore {
    async fn conditional_upsert(
        &self,
        id: &DocumentId,
        delta: &IndexDocument,
        visibility: Visibility,
    ) -> Result<MergeOutcome, StoreError> {
        let resp = self
            .client
            .post(self.update_url(id, visibility))
            .json(&Self::update_body(delta))
            .send()
            .await
            .map_err(|e| StoreError::Unreachable(e.to_string()))?;
        match resp.status() {
            s if s.is_success() => {
                let body: UpdateResponse =
                    resp.json().await.map_err(|e| StoreError::Backend(e.to_string()))?;
                debug!(doc_id = %id, result = %body.result, "elastic update");
                parse_result(&body.result)
            }
            StatusCode::CONFLICT => {
                Err(StoreError::ConflictRetriesExhausted { id: id.to_string(), attempts: RETRY_ON_CONFLICT + 1 })
            }
            s if s.is_server_error() => Err(StoreError::Unreachable(rejected(resp).await.to_string())),
            _ => Err(rejected(resp).await),
        }
    }

    async fn get(&self, id: &DocumentId) -> Result<Option<IndexDocument>, StoreError> {
        let url = format!("{}/{}/_doc/{}", self.base_url, self.index, id);
        let resp = self.client.get(url).send().await.map_err(|e| StoreError::Unreachable(e.to_string()))?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !resp.status().is_success() {
            return Err(rejected(resp).await);
        }
        let body: GetResponse = resp.json().await.map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(if body.found { body.source } else { None })
    }
}
