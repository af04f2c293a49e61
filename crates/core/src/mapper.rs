//! Mapping from resource updates to entity document deltas.
//!
//! Only namespaces, pods and services are indexed. Everything else maps to `None`
//! and never reaches the store.

use std::collections::BTreeSet;

use crate::{
    ClusterScope, EntityKind, EntityState, IndexDocument, NamespaceUpdate, PodPhase, PodUpdate, ResourceUpdate,
    ServiceUpdate, Update,
};

/// Map one update to the document delta it implies for `scope`. Total; never fails.
pub fn map_update(scope: &ClusterScope, update: &ResourceUpdate) -> Option<IndexDocument> {
    let version = update.update_version;
    match &update.update {
        Update::Namespace(ns) => Some(namespace_delta(scope, version, ns)),
        Update::Pod(pod) => Some(pod_delta(scope, version, pod)),
        Update::Service(svc) => Some(service_delta(scope, version, svc)),
        // Containers and nodes are not indexed.
        Update::Container(_) | Update::Node(_) | Update::Unrecognized => None,
    }
}

pub fn pod_phase_to_state(phase: PodPhase) -> EntityState {
    match phase {
        PodPhase::Pending => EntityState::Pending,
        PodPhase::Running => EntityState::Running,
        PodPhase::Succeeded => EntityState::Terminated,
        PodPhase::Failed => EntityState::Failed,
        PodPhase::Unknown => EntityState::Unknown,
    }
}

pub fn state_from_stop_timestamp(stop_timestamp_ns: i64) -> EntityState {
    if stop_timestamp_ns > 0 {
        EntityState::Terminated
    } else {
        EntityState::Running
    }
}

fn base(scope: &ClusterScope, kind: EntityKind, uid: &str, name: &str, namespace: &str) -> IndexDocument {
    IndexDocument {
        org_id: scope.org_id.to_string(),
        vizier_id: scope.vizier_id.to_string(),
        cluster_uid: scope.cluster_uid.clone(),
        uid: uid.to_string(),
        name: name.to_string(),
        namespace: namespace.to_string(),
        kind,
        time_started_ns: 0,
        time_stopped_ns: 0,
        related_entity_names: BTreeSet::new(),
        update_version: 0,
        state: EntityState::Unknown,
    }
}

fn namespace_delta(scope: &ClusterScope, version: i64, ns: &NamespaceUpdate) -> IndexDocument {
    IndexDocument {
        time_started_ns: ns.start_timestamp_ns,
        time_stopped_ns: ns.stop_timestamp_ns,
        update_version: version,
        state: state_from_stop_timestamp(ns.stop_timestamp_ns),
        // A namespace lives in itself.
        ..base(scope, EntityKind::Namespace, &ns.uid, &ns.name, &ns.name)
    }
}

fn pod_delta(scope: &ClusterScope, version: i64, pod: &PodUpdate) -> IndexDocument {
    IndexDocument {
        time_started_ns: pod.start_timestamp_ns,
        time_stopped_ns: pod.stop_timestamp_ns,
        update_version: version,
        state: pod_phase_to_state(pod.phase),
        ..base(scope, EntityKind::Pod, &pod.uid, &pod.name, &pod.namespace)
    }
}

fn service_delta(scope: &ClusterScope, version: i64, svc: &ServiceUpdate) -> IndexDocument {
    IndexDocument {
        time_started_ns: svc.start_timestamp_ns,
        time_stopped_ns: svc.stop_timestamp_ns,
        related_entity_names: svc.pod_ids.iter().cloned().collect(),
        update_version: version,
        state: state_from_stop_timestamp(svc.stop_timestamp_ns),
        ..base(scope, EntityKind::Service, &svc.uid, &svc.name, &svc.namespace)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ContainerUpdate, NodeUpdate};
    use uuid::Uuid;

    fn scope() -> ClusterScope {
        ClusterScope::new(Uuid::nil(), Uuid::from_u128(7), "cluster-a")
    }

    fn ru(version: i64, update: Update) -> ResourceUpdate {
        ResourceUpdate { update_version: version, update }
    }

    #[test]
    fn namespace_maps_name_into_ns_and_state_from_stop() {
        let live = NamespaceUpdate { uid: "n1".into(), name: "kube-system".into(), start_timestamp_ns: 5, stop_timestamp_ns: 0 };
        let d = map_update(&scope(), &ru(1, Update::Namespace(live.clone()))).unwrap();
        assert_eq!(d.kind, EntityKind::Namespace);
        assert_eq!(d.name, "kube-system");
        assert_eq!(d.namespace, "kube-system");
        assert_eq!(d.state, EntityState::Running);
        assert!(d.related_entity_names.is_empty());
        assert_eq!(d.cluster_uid, "cluster-a");
        assert_eq!(d.vizier_id, Uuid::from_u128(7).to_string());

        let gone = NamespaceUpdate { stop_timestamp_ns: 1000, ..live };
        let d = map_update(&scope(), &ru(2, Update::Namespace(gone))).unwrap();
        assert_eq!(d.state, EntityState::Terminated);
        assert_eq!(d.time_stopped_ns, 1000);
        assert_eq!(d.update_version, 2);
    }

    #[test]
    fn every_pod_phase_maps_to_one_state() {
        let table = [
            (PodPhase::Pending, EntityState::Pending),
            (PodPhase::Running, EntityState::Running),
            (PodPhase::Succeeded, EntityState::Terminated),
            (PodPhase::Failed, EntityState::Failed),
            (PodPhase::Unknown, EntityState::Unknown),
        ];
        for (phase, want) in table {
            assert_eq!(pod_phase_to_state(phase), want, "phase {:?}", phase);
        }
    }

    #[test]
    fn pod_keeps_its_namespace() {
        let pod = PodUpdate { uid: "p1".into(), name: "web".into(), namespace: "default".into(), phase: PodPhase::Running, ..Default::default() };
        let d = map_update(&scope(), &ru(5, Update::Pod(pod))).unwrap();
        assert_eq!(d.kind, EntityKind::Pod);
        assert_eq!(d.namespace, "default");
        assert_eq!(d.state, EntityState::Running);
        assert_eq!(d.update_version, 5);
        assert_eq!(d.id(), scope().document_id("p1"));
    }

    #[test]
    fn service_relates_pods() {
        let svc = ServiceUpdate { uid: "s1".into(), pod_ids: vec!["p2".into(), "p1".into(), "p2".into()], ..Default::default() };
        let d = map_update(&scope(), &ru(1, Update::Service(svc))).unwrap();
        assert_eq!(d.kind, EntityKind::Service);
        assert_eq!(d.related_entity_names.iter().cloned().collect::<Vec<_>>(), vec!["p1", "p2"]);
        assert_eq!(d.state, EntityState::Running);

        let empty = ServiceUpdate { uid: "s2".into(), stop_timestamp_ns: 3, ..Default::default() };
        let d = map_update(&scope(), &ru(1, Update::Service(empty))).unwrap();
        assert!(d.related_entity_names.is_empty());
        assert_eq!(d.state, EntityState::Terminated);
    }

    #[test]
    fn containers_nodes_and_unknown_produce_nothing() {
        assert!(map_update(&scope(), &ru(1, Update::Container(ContainerUpdate::default()))).is_none());
        assert!(map_update(&scope(), &ru(1, Update::Node(NodeUpdate::default()))).is_none());
        assert!(map_update(&scope(), &ru(1, Update::Unrecognized)).is_none());
    }
}
