#![forbid(unsafe_code)]

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use mdindex_core::{DocumentId, EntityKind, EntityState, IndexDocument, MergeOutcome};
use mdindex_store::{CasStore, DocumentStore, MemoryStore, SeqNo, StoreError, VersionedStore, Visibility};

fn delta(uid: &str, version: i64, related: &[&str], state: EntityState) -> IndexDocument {
    IndexDocument {
        org_id: "org".into(),
        vizier_id: "viz".into(),
        cluster_uid: "k8s".into(),
        uid: uid.into(),
        name: uid.into(),
        namespace: "default".into(),
        kind: EntityKind::Service,
        time_started_ns: 1,
        time_stopped_ns: 0,
        related_entity_names: related.iter().map(|s| s.to_string()).collect(),
        update_version: version,
        state,
    }
}

async fn run_sequence<S: DocumentStore>(store: &S, seq: &[IndexDocument]) -> Vec<MergeOutcome> {
    let mut out = Vec::new();
    for d in seq {
        out.push(store.conditional_upsert(&d.id(), d, Visibility::Immediate).await.unwrap());
    }
    out
}

fn scenario() -> Vec<IndexDocument> {
    vec![
        delta("s1", 1, &["p1", "p2"], EntityState::Running),
        delta("s1", 2, &["p2", "p3"], EntityState::Running),
        delta("s1", 1, &["late"], EntityState::Failed),
        delta("s1", 2, &["dup"], EntityState::Failed),
    ]
}

#[tokio::test]
async fn memory_store_applies_version_guard() {
    let store = MemoryStore::new();
    let outcomes = run_sequence(&store, &scenario()).await;
    assert_eq!(outcomes, vec![MergeOutcome::Created, MergeOutcome::Updated, MergeOutcome::Noop, MergeOutcome::Noop]);
    let doc = store.get(&DocumentId::new("viz", "k8s", "s1")).await.unwrap().unwrap();
    assert_eq!(doc.related_entity_names.iter().collect::<Vec<_>>(), vec!["p1", "p2", "p3"]);
    assert_eq!(doc.update_version, 2);
    assert_eq!(doc.state, EntityState::Running);
    assert_eq!(store.upsert_calls(), 4);
}

#[tokio::test]
async fn cas_store_matches_memory_store() {
    let direct = MemoryStore::new();
    let cas = CasStore::new(MemoryStore::new(), 3);
    let a = run_sequence(&direct, &scenario()).await;
    let b = run_sequence(&cas, &scenario()).await;
    assert_eq!(a, b);
    assert_eq!(direct.documents(), cas.inner().documents());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_writers_converge_on_highest_version() {
    let stores: [Arc<dyn DocumentStore>; 2] = [Arc::new(MemoryStore::new()), Arc::new(CasStore::new(MemoryStore::new(), 64))];
    for store in stores {
        let mut tasks = Vec::new();
        for v in 1..=32i64 {
            let store = Arc::clone(&store);
            tasks.push(tokio::spawn(async move {
                let name = format!("p{:02}", v);
                let d = delta("s9", v, &[name.as_str()], EntityState::Running);
                store.conditional_upsert(&d.id(), &d, Visibility::Immediate).await
            }));
        }
        for r in futures::future::join_all(tasks).await {
            r.unwrap().unwrap();
        }
        let doc = store.get(&DocumentId::new("viz", "k8s", "s9")).await.unwrap().unwrap();
        assert_eq!(doc.update_version, 32);
        // Every name in the doc came from an accepted delta; the last one always lands.
        assert!(doc.related_entity_names.contains("p32"));
    }
}

/// Fails the first `conflicts` CAS attempts as if another writer raced us.
struct Contended {
    inner: MemoryStore,
    conflicts: AtomicU32,
}

#[async_trait]
impl VersionedStore for Contended {
    async fn read(&self, id: &DocumentId) -> Result<Option<(IndexDocument, SeqNo)>, StoreError> {
        self.inner.read(id).await
    }

    async fn compare_and_swap(
        &self,
        id: &DocumentId,
        expected: Option<SeqNo>,
        doc: &IndexDocument,
        visibility: Visibility,
    ) -> Result<bool, StoreError> {
        if self.conflicts.load(Ordering::SeqCst) > 0 {
            self.conflicts.fetch_sub(1, Ordering::SeqCst);
            return Ok(false);
        }
        self.inner.compare_and_swap(id, expected, doc, visibility).await
    }
}

#[tokio::test]
async fn cas_retries_then_gives_up() {
    let d = delta("s1", 1, &[], EntityState::Running);

    let store = CasStore::new(Contended { inner: MemoryStore::new(), conflicts: AtomicU32::new(2) }, 3);
    assert_eq!(store.conditional_upsert(&d.id(), &d, Visibility::Immediate).await.unwrap(), MergeOutcome::Created);

    let store = CasStore::new(Contended { inner: MemoryStore::new(), conflicts: AtomicU32::new(10) }, 3);
    match store.conditional_upsert(&d.id(), &d, Visibility::Immediate).await {
        Err(StoreError::ConflictRetriesExhausted { attempts, .. }) => assert_eq!(attempts, 3),
        other => panic!("expected exhausted retries, got {:?}", other),
    }
    assert!(store.inner().inner.is_empty());
}
