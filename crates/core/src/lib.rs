//! mdindex core types: resource updates, entity documents and the merge rule.

#![forbid(unsafe_code)]

pub mod decode;
pub mod mapper;
pub mod merge;

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub use decode::{decode, DecodeError};
pub use mapper::map_update;
pub use merge::{upsert, MergeOutcome};

// ---- Input: resource updates as delivered on the metadata topic ----

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PodPhase {
    Pending,
    Running,
    Succeeded,
    Failed,
    #[default]
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct NamespaceUpdate {
    #[serde(deserialize_with = "null_as_default")]
    pub uid: String,
    #[serde(deserialize_with = "null_as_default")]
    pub name: String,
    #[serde(deserialize_with = "null_as_default")]
    pub start_timestamp_ns: i64,
    #[serde(deserialize_with = "null_as_default")]
    pub stop_timestamp_ns: i64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct PodUpdate {
    #[serde(deserialize_with = "null_as_default")]
    pub uid: String,
    #[serde(deserialize_with = "null_as_default")]
    pub name: String,
    #[serde(deserialize_with = "null_as_default")]
    pub namespace: String,
    #[serde(deserialize_with = "null_as_default")]
    pub start_timestamp_ns: i64,
    #[serde(deserialize_with = "null_as_default")]
    pub stop_timestamp_ns: i64,
    #[serde(deserialize_with = "null_as_default")]
    pub phase: PodPhase,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct ServiceUpdate {
    #[serde(deserialize_with = "null_as_default")]
    pub uid: String,
    #[serde(deserialize_with = "null_as_default")]
    pub name: String,
    #[serde(deserialize_with = "null_as_default")]
    pub namespace: String,
    #[serde(deserialize_with = "null_as_default")]
    pub start_timestamp_ns: i64,
    #[serde(deserialize_with = "null_as_default")]
    pub stop_timestamp_ns: i64,
    /// UIDs of the pods currently backing the service.
    #[serde(rename = "podIDs", deserialize_with = "null_as_default")]
    pub pod_ids: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct ContainerUpdate {
    #[serde(deserialize_with = "null_as_default")]
    pub cid: String,
    #[serde(deserialize_with = "null_as_default")]
    pub name: String,
    #[serde(rename = "podID", deserialize_with = "null_as_default")]
    pub pod_id: String,
    #[serde(deserialize_with = "null_as_default")]
    pub namespace: String,
    #[serde(deserialize_with = "null_as_default")]
    pub start_timestamp_ns: i64,
    #[serde(deserialize_with = "null_as_default")]
    pub stop_timestamp_ns: i64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct NodeUpdate {
    #[serde(deserialize_with = "null_as_default")]
    pub uid: String,
    #[serde(deserialize_with = "null_as_default")]
    pub name: String,
    #[serde(deserialize_with = "null_as_default")]
    pub start_timestamp_ns: i64,
    #[serde(deserialize_with = "null_as_default")]
    pub stop_timestamp_ns: i64,
}

/// Closed set of update payloads. Tags we do not know decode as `Unrecognized`
/// so producers can add kinds without breaking older indexers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Update {
    Namespace(NamespaceUpdate),
    Pod(PodUpdate),
    Service(ServiceUpdate),
    Container(ContainerUpdate),
    Node(NodeUpdate),
    #[serde(other)]
    Unrecognized,
}

impl Update {
    pub fn type_name(&self) -> &'static str {
        match self {
            Update::Namespace(_) => "namespace",
            Update::Pod(_) => "pod",
            Update::Service(_) => "service",
            Update::Container(_) => "container",
            Update::Node(_) => "node",
            Update::Unrecognized => "unrecognized",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ResourceUpdate {
    /// Per-entity version assigned upstream. Not comparable across entities.
    #[serde(default, deserialize_with = "null_as_default")]
    pub update_version: i64,
    pub update: Update,
}

/// Producers send explicit nulls for unset fields; treat them like absent ones.
fn null_as_default<'de, D, T>(de: D) -> Result<T, D::Error>
where
    D: serde::Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    Ok(Option::<T>::deserialize(de)?.unwrap_or_default())
}

// ---- Output: entity documents ----

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Namespace,
    Pod,
    Service,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Namespace => "namespace",
            EntityKind::Pod => "pod",
            EntityKind::Service => "service",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "namespace" => Some(EntityKind::Namespace),
            "pod" => Some(EntityKind::Pod),
            "service" => Some(EntityKind::Service),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum EntityState {
    #[default]
    Unknown,
    Pending,
    Running,
    Failed,
    Terminated,
}

impl EntityState {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityState::Unknown => "unknown",
            EntityState::Pending => "pending",
            EntityState::Running => "running",
            EntityState::Failed => "failed",
            EntityState::Terminated => "terminated",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "unknown" => Some(EntityState::Unknown),
            "pending" => Some(EntityState::Pending),
            "running" => Some(EntityState::Running),
            "failed" => Some(EntityState::Failed),
            "terminated" => Some(EntityState::Terminated),
            _ => None,
        }
    }
}

/// The monitored cluster a worker indexes for.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ClusterScope {
    pub org_id: Uuid,
    pub vizier_id: Uuid,
    pub cluster_uid: String,
}

impl ClusterScope {
    pub fn new(org_id: Uuid, vizier_id: Uuid, cluster_uid: impl Into<String>) -> Self {
        Self { org_id, vizier_id, cluster_uid: cluster_uid.into() }
    }

    pub fn document_id(&self, uid: &str) -> DocumentId {
        DocumentId::new(&self.vizier_id.to_string(), &self.cluster_uid, uid)
    }
}

/// Document key `"{vizier_id}-{cluster_uid}-{uid}"`. External readers index by the
/// same string, so the format must not change.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentId(String);

impl DocumentId {
    pub fn new(vizier_id: &str, cluster_uid: &str, uid: &str) -> Self {
        Self(format!("{}-{}-{}", vizier_id, cluster_uid, uid))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for DocumentId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// An indexed entity. Mapper output (a delta) has the same shape as the stored document.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IndexDocument {
    #[serde(rename = "orgID")]
    pub org_id: String,
    #[serde(rename = "vizierID")]
    pub vizier_id: String,
    #[serde(rename = "clusterUID")]
    pub cluster_uid: String,
    pub uid: String,
    pub name: String,
    #[serde(rename = "ns")]
    pub namespace: String,
    pub kind: EntityKind,
    #[serde(rename = "timeStartedNS")]
    pub time_started_ns: i64,
    #[serde(rename = "timeStoppedNS")]
    pub time_stopped_ns: i64,
    /// Sorted and deduplicated by construction.
    #[serde(rename = "relatedEntityNames", default)]
    pub related_entity_names: BTreeSet<String>,
    #[serde(rename = "updateVersion")]
    pub update_version: i64,
    pub state: EntityState,
}

impl IndexDocument {
    pub fn id(&self) -> DocumentId {
        DocumentId::new(&self.vizier_id, &self.cluster_uid, &self.uid)
    }
}

pub mod prelude {
    pub use super::{
        ClusterScope, DocumentId, EntityKind, EntityState, IndexDocument, PodPhase, ResourceUpdate, Update,
    };
    pub use super::{decode, map_update, upsert, DecodeError, MergeOutcome};
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_id_joins_vizier_cluster_uid() {
        let id = DocumentId::new("v", "c", "u");
        assert_eq!(id.as_str(), "v-c-u");
    }

    #[test]
    fn document_serializes_with_index_field_names() {
        let doc = IndexDocument {
            org_id: "o".into(),
            vizier_id: "v".into(),
            cluster_uid: "c".into(),
            uid: "u".into(),
            name: "n".into(),
            namespace: "default".into(),
            kind: EntityKind::Service,
            time_started_ns: 1,
            time_stopped_ns: 0,
            related_entity_names: BTreeSet::new(),
            update_version: 3,
            state: EntityState::Running,
        };
        let v = serde_json::to_value(&doc).unwrap();
        assert_eq!(v["clusterUID"], "c");
        assert_eq!(v["ns"], "default");
        assert_eq!(v["kind"], "service");
        assert_eq!(v["state"], "running");
        assert_eq!(v["relatedEntityNames"], serde_json::json!([]));
        assert_eq!(v["timeStartedNS"], 1);
    }

    #[test]
    fn kind_and_state_parse_their_own_encoding() {
        for kind in [EntityKind::Namespace, EntityKind::Pod, EntityKind::Service] {
            assert_eq!(EntityKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(EntityState::parse("terminated"), Some(EntityState::Terminated));
        assert_eq!(EntityState::parse(EntityState::Unknown.as_str()), Some(EntityState::Unknown));
        assert_eq!(EntityState::parse("bogus"), None);
        assert_eq!(EntityKind::parse("node"), None);
    }
}
