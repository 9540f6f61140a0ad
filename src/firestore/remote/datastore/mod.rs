use async_trait::async_trait;

use crate::firestore::api::operations::FieldTransform;
use crate::firestore::api::{DocumentSnapshot, Query, QuerySnapshot};
use crate::firestore::error::FirestoreResult;
use crate::firestore::model::{DocumentKey, FieldPath};
use crate::firestore::value::MapValue;
use crate::util::subscribe::{PartialObserver, Unsubscribe};

pub mod in_memory;

#[derive(Clone, Debug)]
pub enum WriteOperation {
    Set {
        key: DocumentKey,
        data: MapValue,
        transforms: Vec<FieldTransform>,
    },
    Update {
        key: DocumentKey,
        data: MapValue,
        field_paths: Vec<FieldPath>,
        transforms: Vec<FieldTransform>,
    },
    Delete {
        key: DocumentKey,
    },
}

impl WriteOperation {
    pub fn key(&self) -> &DocumentKey {
        match self {
            WriteOperation::Set { key, .. }
            | WriteOperation::Update { key, .. }
            | WriteOperation::Delete { key } => key,
        }
    }
}

/// Handle returned by the listen primitives. Removing or dropping it stops delivery.
#[must_use = "dropping a ListenerRegistration stops the listener"]
pub struct ListenerRegistration {
    unsubscribe: Option<Unsubscribe>,
}

impl ListenerRegistration {
    pub fn new(unsubscribe: Unsubscribe) -> Self {
        Self {
            unsubscribe: Some(unsubscribe),
        }
    }

    pub fn remove(mut self) {
        if let Some(unsubscribe) = self.unsubscribe.take() {
            unsubscribe();
        }
    }
}

impl Drop for ListenerRegistration {
    fn drop(&mut self) {
        if let Some(unsubscribe) = self.unsubscribe.take() {
            unsubscribe();
        }
    }
}

impl std::fmt::Debug for ListenerRegistration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerRegistration")
            .field("active", &self.unsubscribe.is_some())
            .finish()
    }
}

#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
pub trait Datastore: Send + Sync + 'static {
    async fn get_document(&self, key: &DocumentKey) -> FirestoreResult<DocumentSnapshot>;
    async fn set_document(&self, key: &DocumentKey, data: MapValue) -> FirestoreResult<()>;
    async fn run_query(&self, query: &Query) -> FirestoreResult<Vec<DocumentSnapshot>>;
    /// Fails with `not-found` when the document does not exist.
    async fn update_document(
        &self,
        key: &DocumentKey,
        data: MapValue,
        field_paths: Vec<FieldPath>,
        transforms: Vec<FieldTransform>,
    ) -> FirestoreResult<()>;
    async fn delete_document(&self, key: &DocumentKey) -> FirestoreResult<()>;
    /// Applies every write or none of them.
    async fn commit(&self, writes: Vec<WriteOperation>) -> FirestoreResult<()>;

    /// Streams snapshots of one document, starting with its current state.
    fn listen_document(
        &self,
        key: &DocumentKey,
        observer: PartialObserver<DocumentSnapshot>,
    ) -> FirestoreResult<ListenerRegistration>;

    /// Streams query results, starting with the current result set reported as additions.
    fn listen_query(
        &self,
        query: &Query,
        observer: PartialObserver<QuerySnapshot>,
    ) -> FirestoreResult<ListenerRegistration>;
}

pub use in_memory::InMemoryDatastore;
