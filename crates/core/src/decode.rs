//! Payload decoding for resource updates.

use thiserror::Error;

use crate::ResourceUpdate;

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("empty payload")]
    Empty,
    #[error("payload does not match the resource update schema: {0}")]
    Schema(#[from] serde_json::Error),
}

/// Parse one message payload. Pure; unknown fields are ignored and unknown update
/// types decode as `Update::Unrecognized`.
pub fn decode(payload: &[u8]) -> Result<ResourceUpdate, DecodeError> {
    if payload.iter().all(|b| b.is_ascii_whitespace()) {
        return Err(DecodeError::Empty);
    }
    Ok(serde_json::from_slice(payload)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{PodPhase, Update};

    #[test]
    fn decodes_pod_update() {
        let raw = br#"{"updateVersion":5,"update":{"type":"pod","uid":"p1","name":"web","namespace":"default","startTimestampNs":10,"phase":"RUNNING"}}"#;
        let ru = decode(raw).unwrap();
        assert_eq!(ru.update_version, 5);
        match ru.update {
            Update::Pod(p) => {
                assert_eq!(p.uid, "p1");
                assert_eq!(p.namespace, "default");
                assert_eq!(p.start_timestamp_ns, 10);
                assert_eq!(p.stop_timestamp_ns, 0);
                assert_eq!(p.phase, PodPhase::Running);
            }
            other => panic!("unexpected update {:?}", other),
        }
    }

    #[test]
    fn unknown_phase_and_missing_pod_ids_default() {
        let raw = br#"{"updateVersion":1,"update":{"type":"pod","uid":"p","phase":"EVICTED"}}"#;
        match decode(raw).unwrap().update {
            Update::Pod(p) => assert_eq!(p.phase, PodPhase::Unknown),
            other => panic!("unexpected update {:?}", other),
        }
        let raw = br#"{"updateVersion":1,"update":{"type":"service","uid":"s","podIDs":null}}"#;
        match decode(raw).unwrap().update {
            Update::Service(s) => assert!(s.pod_ids.is_empty()),
            other => panic!("unexpected update {:?}", other),
        }
    }

    #[test]
    fn explicit_nulls_decode_as_defaults() {
        let raw = br#"{"updateVersion":null,"update":{"type":"pod","uid":"p","name":null,"namespace":null,"stopTimestampNs":null,"phase":null}}"#;
        let ru = decode(raw).unwrap();
        assert_eq!(ru.update_version, 0);
        match ru.update {
            Update::Pod(p) => {
                assert_eq!(p.uid, "p");
                assert_eq!(p.name, "");
                assert_eq!(p.namespace, "");
                assert_eq!(p.stop_timestamp_ns, 0);
                assert_eq!(p.phase, PodPhase::Unknown);
            }
            other => panic!("unexpected update {:?}", other),
        }
        let raw = br#"{"updateVersion":2,"update":{"type":"namespace","uid":"n","name":null,"startTimestampNs":null}}"#;
        match decode(raw).unwrap().update {
            Update::Namespace(n) => assert_eq!((n.name.as_str(), n.start_timestamp_ns), ("", 0)),
            other => panic!("unexpected update {:?}", other),
        }
    }

    #[test]
    fn unknown_update_type_is_unrecognized() {
        let raw = br#"{"updateVersion":1,"update":{"type":"replicaset","uid":"r"}}"#;
        assert_eq!(decode(raw).unwrap().update, Update::Unrecognized);
    }

    #[test]
    fn malformed_payloads_fail() {
        assert!(matches!(decode(b""), Err(DecodeError::Empty)));
        assert!(matches!(decode(b"\x00\x01garbage"), Err(DecodeError::Schema(_))));
        assert!(matches!(decode(br#"{"updateVersion":1}"#), Err(DecodeError::Schema(_))));
        assert!(matches!(decode(br#"{"updateVersion":"x","update":{"type":"pod"}}"#), Err(DecodeError::Schema(_))));
    }
}
