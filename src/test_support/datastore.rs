use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;

use crate::firestore::api::{DocumentSnapshot, FieldTransform, Query, QuerySnapshot};
use crate::firestore::error::{unavailable, FirestoreResult};
use crate::firestore::model::{DocumentKey, FieldPath};
use crate::firestore::remote::{Datastore, InMemoryDatastore, ListenerRegistration, WriteOperation};
use crate::firestore::value::MapValue;
use crate::util::subscribe::PartialObserver;

/// In-memory datastore that counts calls and can be told to reject writes.
#[derive(Clone, Default)]
pub struct RecordingDatastore {
    store: InMemoryDatastore,
    counters: Arc<Counters>,
}

#[derive(Default)]
struct Counters {
    gets: AtomicUsize,
    queries: AtomicUsize,
    updates: AtomicUsize,
    reject_writes: AtomicBool,
}

impl RecordingDatastore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn store(&self) -> &InMemoryDatastore {
        &self.store
    }

    pub fn gets(&self) -> usize {
        self.counters.gets.load(Ordering::SeqCst)
    }

    pub fn queries(&self) -> usize {
        self.counters.queries.load(Ordering::SeqCst)
    }

    pub fn updates(&self) -> usize {
        self.counters.updates.load(Ordering::SeqCst)
    }

    pub fn reject_writes(&self, reject: bool) {
        self.counters.reject_writes.store(reject, Ordering::SeqCst);
    }

    fn check_writable(&self) -> FirestoreResult<()> {
        if self.counters.reject_writes.load(Ordering::SeqCst) {
            return Err(unavailable("writes are rejected by the test datastore"));
        }
        Ok(())
    }
}

#[async_trait]
impl Datastore for RecordingDatastore {
    async fn get_document(&self, key: &DocumentKey) -> FirestoreResult<DocumentSnapshot> {
        self.counters.gets.fetch_add(1, Ordering::SeqCst);
        self.store.get_document(key).await
    }

    async fn set_document(&self, key: &DocumentKey, data: MapValue) -> FirestoreResult<()> {
        self.check_writable()?;
        self.store.set_document(key, data).await
    }

    async fn run_query(&self, query: &Query) -> FirestoreResult<Vec<DocumentSnapshot>> {
        self.counters.queries.fetch_add(1, Ordering::SeqCst);
        self.store.run_query(query).await
    }

    async fn update_document(
        &self,
        key: &DocumentKey,
        data: MapValue,
        field_paths: Vec<FieldPath>,
        transforms: Vec<FieldTransform>,
    ) -> FirestoreResult<()> {
        self.check_writable()?;
        self.counters.updates.fetch_add(1, Ordering::SeqCst);
        self.store
            .update_document(key, data, field_paths, transforms)
            .await
    }

    async fn delete_document(&self, key: &DocumentKey) -> FirestoreResult<()> {
        self.check_writable()?;
        self.store.delete_document(key).await
    }

    async fn commit(&self, writes: Vec<WriteOperation>) -> FirestoreResult<()> {
        self.check_writable()?;
        self.store.commit(writes).await
    }

    fn listen_document(
        &self,
        key: &DocumentKey,
        observer: PartialObserver<DocumentSnapshot>,
    ) -> FirestoreResult<ListenerRegistration> {
        self.store.listen_document(key, observer)
    }

    fn listen_query(
        &self,
        query: &Query,
        observer: PartialObserver<QuerySnapshot>,
    ) -> FirestoreResult<ListenerRegistration> {
        self.store.listen_query(query, observer)
    }
}
