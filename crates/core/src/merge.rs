//! Version-guarded merge of a delta into a stored document.
//!
//! Every backend must apply exactly this rule, atomically per document:
//! - absent document: the delta becomes the document
//! - `delta.update_version <= stored.update_version`: nothing changes
//! - otherwise related names are unioned and the terminal fields
//!   (`time_stopped_ns`, `update_version`, `state`) are overwritten
//!
//! Identity, `kind`, `name`, `namespace` and `time_started_ns` are fixed at creation.

use serde::{Deserialize, Serialize};

use crate::IndexDocument;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum MergeOutcome {
    Created,
    Updated,
    /// Stale or duplicate delta; the stored document was left untouched.
    Noop,
}

impl MergeOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            MergeOutcome::Created => "created",
            MergeOutcome::Updated => "updated",
            MergeOutcome::Noop => "noop",
        }
    }
}

/// Merge `delta` into an existing document.
pub fn merge_into(stored: &mut IndexDocument, delta: &IndexDocument) -> MergeOutcome {
    if delta.update_version <= stored.update_version {
        return MergeOutcome::Noop;
    }
    stored.related_entity_names.extend(delta.related_entity_names.iter().cloned());
    stored.time_stopped_ns = delta.time_stopped_ns;
    stored.update_version = delta.update_version;
    stored.state = delta.state;
    MergeOutcome::Updated
}

/// Insert-if-absent, merge-if-present.
pub fn upsert(slot: &mut Option<IndexDocument>, delta: &IndexDocument) -> MergeOutcome {
    match slot {
        Some(stored) => merge_into(stored, delta),
        None => {
            *slot = Some(delta.clone());
            MergeOutcome::Created
        }
    }
}

/// The same rule as a painless update script, for stores that run it server-side.
/// `ctx.op = 'noop'` discards the update so a stale delta leaves no trace.
pub const PAINLESS_MERGE_SCRIPT: &str = r#"
if (params.updateVersion <= ctx._source.updateVersion) {
  ctx.op = 'noop';
} else {
  ctx._source.relatedEntityNames.addAll(params.entities);
  ctx._source.relatedEntityNames = ctx._source.relatedEntityNames.stream().distinct().sorted().collect(Collectors.toList());
  ctx._source.timeStoppedNS = params.timeStoppedNS;
  ctx._source.updateVersion = params.updateVersion;
  ctx._source.state = params.state;
}
"#;

/// Parameters bound into [`PAINLESS_MERGE_SCRIPT`].
pub fn script_params(delta: &IndexDocument) -> serde_json::Value {
    serde_json::json!({
        "entities": delta.related_entity_names,
        "timeStoppedNS": delta.time_stopped_ns,
        "updateVersion": delta.update_version,
        "state": delta.state,
    })
}
