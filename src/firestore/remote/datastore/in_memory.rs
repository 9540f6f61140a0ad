use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, Weak};

use async_trait::async_trait;

use crate::firestore::api::operations::{set_value_at_field_path, value_for_field_path, FieldTransform};
use crate::firestore::api::snapshot::compute_doc_changes;
use crate::firestore::api::{DocumentSnapshot, Query, QuerySnapshot};
use crate::firestore::error::{internal_error, not_found, FirestoreError, FirestoreResult};
use crate::firestore::model::{DocumentKey, FieldPath};
use crate::firestore::query_evaluator::apply_query_to_documents;
use crate::firestore::value::MapValue;
use crate::util::subscribe::PartialObserver;

use super::{Datastore, ListenerRegistration, WriteOperation};

/// Process-local document store with snapshot listeners.
///
/// Listeners are notified synchronously once a write has been applied, after
/// the internal lock has been released.
#[derive(Clone, Default)]
pub struct InMemoryDatastore {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    state: Mutex<State>,
}

#[derive(Default)]
struct State {
    documents: BTreeMap<DocumentKey, MapValue>,
    next_listener_id: u64,
    document_listeners: HashMap<u64, DocumentListener>,
    query_listeners: HashMap<u64, QueryListener>,
}

struct DocumentListener {
    key: DocumentKey,
    observer: PartialObserver<DocumentSnapshot>,
}

struct QueryListener {
    query: Query,
    observer: PartialObserver<QuerySnapshot>,
    last: Vec<DocumentSnapshot>,
}

enum Delivery {
    Document(PartialObserver<DocumentSnapshot>, DocumentSnapshot),
    Query(PartialObserver<QuerySnapshot>, QuerySnapshot),
}

impl Delivery {
    fn deliver(self) {
        match self {
            Delivery::Document(observer, snapshot) => {
                if let Some(next) = observer.next {
                    next(&snapshot);
                }
            }
            Delivery::Query(observer, snapshot) => {
                if let Some(next) = observer.next {
                    next(&snapshot);
                }
            }
        }
    }
}

impl InMemoryDatastore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of documents currently stored.
    pub fn document_count(&self) -> usize {
        self.inner.state.lock().unwrap().documents.len()
    }

    /// Number of active document and query listeners.
    pub fn listener_count(&self) -> usize {
        let state = self.inner.state.lock().unwrap();
        state.document_listeners.len() + state.query_listeners.len()
    }

    /// Terminates every active listener with `error`.
    pub fn fail_listeners(&self, error: FirestoreError) {
        let callbacks: Vec<_> = {
            let mut guard = self.inner.state.lock().unwrap();
            let state = &mut *guard;
            let documents = state
                .document_listeners
                .drain()
                .map(|(_, listener)| listener.observer.error);
            let queries = state
                .query_listeners
                .drain()
                .map(|(_, listener)| listener.observer.error);
            documents.chain(queries).flatten().collect()
        };
        for callback in callbacks {
            callback(&error as &dyn std::error::Error);
        }
    }

    fn apply_writes(&self, writes: Vec<WriteOperation>) -> FirestoreResult<()> {
        let deliveries = {
            let mut state = self.inner.state.lock().unwrap();
            let mut documents = state.documents.clone();
            let mut touched = Vec::with_capacity(writes.len());
            for write in writes {
                touched.push(write.key().clone());
                apply_write(&mut documents, write)?;
            }
            state.documents = documents;
            state.collect_deliveries(&touched)
        };
        for delivery in deliveries {
            delivery.deliver();
        }
        Ok(())
    }

    fn register_listener<F>(&self, insert: F) -> ListenerRegistration
    where
        F: FnOnce(&mut State, u64),
    {
        let id = {
            let mut state = self.inner.state.lock().unwrap();
            state.next_listener_id += 1;
            let id = state.next_listener_id;
            insert(&mut state, id);
            id
        };
        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        ListenerRegistration::new(Box::new(move || {
            if let Some(inner) = weak.upgrade() {
                let mut state = inner.state.lock().unwrap();
                state.document_listeners.remove(&id);
                state.query_listeners.remove(&id);
            }
        }))
    }
}

impl State {
    fn snapshot(&self, key: &DocumentKey) -> DocumentSnapshot {
        DocumentSnapshot::new(key.clone(), self.documents.get(key).cloned())
    }

    fn query_documents(&self, query: &Query) -> Vec<DocumentSnapshot> {
        let candidates = self
            .documents
            .iter()
            .filter(|(key, _)| query.matches_collection(key))
            .map(|(key, data)| DocumentSnapshot::new(key.clone(), Some(data.clone())))
            .collect();
        apply_query_to_documents(candidates, query)
    }

    fn collect_deliveries(&mut self, touched: &[DocumentKey]) -> Vec<Delivery> {
        let mut deliveries = Vec::new();
        let mut listener_ids: Vec<_> = self.document_listeners.keys().copied().collect();
        listener_ids.sort_unstable();
        for id in listener_ids {
            let listener = &self.document_listeners[&id];
            if touched.contains(&listener.key) {
                let snapshot = self.snapshot(&listener.key);
                deliveries.push(Delivery::Document(listener.observer.clone(), snapshot));
            }
        }

        let mut query_ids: Vec<_> = self.query_listeners.keys().copied().collect();
        query_ids.sort_unstable();
        for id in query_ids {
            let Some(query) = self.query_listeners.get(&id).map(|l| l.query.clone()) else {
                continue;
            };
            let current = self.query_documents(&query);
            let Some(listener) = self.query_listeners.get_mut(&id) else {
                continue;
            };
            let changes = compute_doc_changes(&listener.last, &current);
            if changes.is_empty() {
                continue;
            }
            listener.last = current.clone();
            deliveries.push(Delivery::Query(
                listener.observer.clone(),
                QuerySnapshot::new(current, changes),
            ));
        }
        deliveries
    }
}

fn apply_write(
    documents: &mut BTreeMap<DocumentKey, MapValue>,
    write: WriteOperation,
) -> FirestoreResult<()> {
    match write {
        WriteOperation::Set {
            key,
            data,
            transforms,
        } => {
            let mut fields = data.into_fields();
            apply_transforms(&mut fields, &transforms);
            documents.insert(key, MapValue::new(fields));
        }
        WriteOperation::Update {
            key,
            data,
            field_paths,
            transforms,
        } => {
            let current = documents
                .get(&key)
                .ok_or_else(|| not_found(format!("No document to update: {key}")))?;
            let mut fields = current.fields().clone();
            for path in &field_paths {
                let value = value_for_field_path(&data, path).ok_or_else(|| {
                    internal_error(format!(
                        "Failed to resolve value for update path {}",
                        path.canonical_string()
                    ))
                })?;
                set_value_at_field_path(&mut fields, path, value);
            }
            apply_transforms(&mut fields, &transforms);
            documents.insert(key, MapValue::new(fields));
        }
        WriteOperation::Delete { key } => {
            documents.remove(&key);
        }
    }
    Ok(())
}

fn apply_transforms(
    fields: &mut BTreeMap<String, crate::firestore::value::FirestoreValue>,
    transforms: &[FieldTransform],
) {
    for transform in transforms {
        let current = value_for_field_path(&MapValue::new(fields.clone()), transform.field_path());
        let next = transform.operation().apply(current.as_ref());
        set_value_at_field_path(fields, transform.field_path(), next);
    }
}

#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
impl Datastore for InMemoryDatastore {
    async fn get_document(&self, key: &DocumentKey) -> FirestoreResult<DocumentSnapshot> {
        let state = self.inner.state.lock().unwrap();
        Ok(state.snapshot(key))
    }

    async fn set_document(&self, key: &DocumentKey, data: MapValue) -> FirestoreResult<()> {
        self.apply_writes(vec![WriteOperation::Set {
            key: key.clone(),
            data,
            transforms: Vec::new(),
        }])
    }

    async fn run_query(&self, query: &Query) -> FirestoreResult<Vec<DocumentSnapshot>> {
        let state = self.inner.state.lock().unwrap();
        Ok(state.query_documents(query))
    }

    async fn update_document(
        &self,
        key: &DocumentKey,
        data: MapValue,
        field_paths: Vec<FieldPath>,
        transforms: Vec<FieldTransform>,
    ) -> FirestoreResult<()> {
        self.apply_writes(vec![WriteOperation::Update {
            key: key.clone(),
            data,
            field_paths,
            transforms,
        }])
    }

    async fn delete_document(&self, key: &DocumentKey) -> FirestoreResult<()> {
        self.apply_writes(vec![WriteOperation::Delete { key: key.clone() }])
    }

    async fn commit(&self, writes: Vec<WriteOperation>) -> FirestoreResult<()> {
        self.apply_writes(writes)
    }

    fn listen_document(
        &self,
        key: &DocumentKey,
        observer: PartialObserver<DocumentSnapshot>,
    ) -> FirestoreResult<ListenerRegistration> {
        let initial = self.inner.state.lock().unwrap().snapshot(key);
        let listener = DocumentListener {
            key: key.clone(),
            observer: observer.clone(),
        };
        let registration = self.register_listener(|state, id| {
            state.document_listeners.insert(id, listener);
        });
        Delivery::Document(observer, initial).deliver();
        Ok(registration)
    }

    fn listen_query(
        &self,
        query: &Query,
        observer: PartialObserver<QuerySnapshot>,
    ) -> FirestoreResult<ListenerRegistration> {
        let initial = self.inner.state.lock().unwrap().query_documents(query);
        let changes = compute_doc_changes(&[], &initial);
        let listener = QueryListener {
            query: query.clone(),
            observer: observer.clone(),
            last: initial.clone(),
        };
        let registration = self.register_listener(|state, id| {
            state.query_listeners.insert(id, listener);
        });
        Delivery::Query(observer, QuerySnapshot::new(initial, changes)).deliver();
        Ok(registration)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::firestore::api::operations::TransformOperation;
    use crate::firestore::api::DocumentChangeType;
    use crate::firestore::model::ResourcePath;
    use crate::firestore::value::FirestoreValue;

    fn key(path: &str) -> DocumentKey {
        DocumentKey::from_string(path).unwrap()
    }

    fn named(name: &str) -> MapValue {
        MapValue::new(BTreeMap::from([(
            "name".to_string(),
            FirestoreValue::from_string(name),
        )]))
    }

    #[tokio::test]
    async fn in_memory_get_set() {
        let datastore = InMemoryDatastore::new();
        let key = key("villages/v1");
        datastore.set_document(&key, named("Alpha")).await.unwrap();
        let snapshot = datastore.get_document(&key).await.unwrap();
        assert!(snapshot.exists());
        assert_eq!(snapshot.get("name"), Some(&FirestoreValue::from_string("Alpha")));
    }

    #[tokio::test]
    async fn update_missing_document_fails() {
        let datastore = InMemoryDatastore::new();
        let err = datastore
            .update_document(&key("villages/none"), named("x"), vec![FieldPath::new(["name"]).unwrap()], Vec::new())
            .await
            .unwrap_err();
        assert_eq!(err.code_str(), "firestore/not-found");
    }

    #[tokio::test]
    async fn update_applies_array_transforms() {
        let datastore = InMemoryDatastore::new();
        let key = key("villages/v1");
        datastore.set_document(&key, named("Alpha")).await.unwrap();
        let members = FieldPath::new(["members"]).unwrap();
        let union = FieldTransform::new(
            members.clone(),
            TransformOperation::ArrayUnion(vec![
                FirestoreValue::from_reference("users/a"),
                FirestoreValue::from_reference("users/b"),
            ]),
        );
        datastore
            .update_document(&key, MapValue::default(), Vec::new(), vec![union])
            .await
            .unwrap();
        let remove = FieldTransform::new(
            members,
            TransformOperation::ArrayRemove(vec![FirestoreValue::from_reference("users/a")]),
        );
        datastore
            .update_document(&key, MapValue::default(), Vec::new(), vec![remove])
            .await
            .unwrap();

        let snapshot = datastore.get_document(&key).await.unwrap();
        assert_eq!(
            snapshot.get("members"),
            Some(&FirestoreValue::from_array(vec![FirestoreValue::from_reference("users/b")]))
        );
    }

    #[tokio::test]
    async fn failed_commit_leaves_store_untouched() {
        let datastore = InMemoryDatastore::new();
        let writes = vec![
            WriteOperation::Set {
                key: key("villages/v1"),
                data: named("Alpha"),
                transforms: Vec::new(),
            },
            WriteOperation::Update {
                key: key("villages/missing"),
                data: named("Beta"),
                field_paths: vec![FieldPath::new(["name"]).unwrap()],
                transforms: Vec::new(),
            },
        ];
        assert!(datastore.commit(writes).await.is_err());
        assert_eq!(datastore.document_count(), 0);
    }

    #[tokio::test]
    async fn query_results_follow_path_order() {
        let datastore = InMemoryDatastore::new();
        for id in ["c", "a", "b"] {
            datastore.set_document(&key(&format!("users/{id}")), named(id)).await.unwrap();
        }
        let query = Query::new(ResourcePath::from_string("users").unwrap()).unwrap();
        let ids: Vec<_> = datastore
            .run_query(&query)
            .await
            .unwrap()
            .iter()
            .map(|doc| doc.id().to_string())
            .collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn document_listener_receives_initial_and_updates() {
        let datastore = InMemoryDatastore::new();
        let key = key("villages/v1");
        let seen = Arc::new(Mutex::new(Vec::new()));
        let captured = seen.clone();
        let registration = datastore
            .listen_document(
                &key,
                PartialObserver::new().with_next(move |snapshot: &DocumentSnapshot| {
                    captured.lock().unwrap().push(snapshot.exists());
                }),
            )
            .unwrap();
        datastore.set_document(&key, named("Alpha")).await.unwrap();
        datastore.delete_document(&key).await.unwrap();
        registration.remove();
        datastore.set_document(&key, named("Beta")).await.unwrap();

        assert_eq!(*seen.lock().unwrap(), vec![false, true, false]);
        assert_eq!(datastore.listener_count(), 0);
    }

    #[tokio::test]
    async fn query_listener_reports_changes() {
        let datastore = InMemoryDatastore::new();
        datastore.set_document(&key("users/a"), named("A")).await.unwrap();
        let kinds = Arc::new(Mutex::new(Vec::new()));
        let captured = kinds.clone();
        let query = Query::new(ResourcePath::from_string("users").unwrap()).unwrap();
        let _registration = datastore
            .listen_query(
                &query,
                PartialObserver::new().with_next(move |snapshot: &QuerySnapshot| {
                    for change in snapshot.doc_changes() {
                        captured
                            .lock()
                            .unwrap()
                            .push((change.kind(), change.document().id().to_string()));
                    }
                }),
            )
            .unwrap();
        datastore.set_document(&key("users/a"), named("A2")).await.unwrap();
        datastore.set_document(&key("users/b"), named("B")).await.unwrap();
        datastore.delete_document(&key("users/a")).await.unwrap();
        datastore.set_document(&key("villages/v1"), named("V")).await.unwrap();

        assert_eq!(
            *kinds.lock().unwrap(),
            vec![
                (DocumentChangeType::Added, "a".to_string()),
                (DocumentChangeType::Modified, "a".to_string()),
                (DocumentChangeType::Added, "b".to_string()),
                (DocumentChangeType::Removed, "a".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn fail_listeners_invokes_error_callbacks() {
        let datastore = InMemoryDatastore::new();
        let errors = Arc::new(Mutex::new(Vec::new()));
        let captured = errors.clone();
        let _registration = datastore
            .listen_document(
                &key("villages/v1"),
                PartialObserver::new().with_error(move |err| {
                    captured.lock().unwrap().push(err.to_string());
                }),
            )
            .unwrap();
        datastore.fail_listeners(crate::firestore::error::unavailable("stream closed"));
        assert_eq!(errors.lock().unwrap().len(), 1);
        assert_eq!(datastore.listener_count(), 0);
    }
}
