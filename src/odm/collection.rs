//! Collection handles and their document identity cache.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};

use crate::firestore::api::{DocumentChangeType, DocumentSnapshot, Query, QuerySnapshot, WriteBatch};
use crate::firestore::constants::MAX_BATCH_WRITES;
use crate::firestore::error::FirestoreResult;
use crate::firestore::model::{generate_auto_id, DocumentKey, ResourcePath};
use crate::firestore::remote::{Datastore, ListenerRegistration};
use crate::util::subscribe::PartialObserver;

use super::data::DocumentData;
use super::database::OdmContext;
use super::document::{local_error, DocumentHandle};
use super::error::{invalid_argument, listener_state, OdmResult};
use super::events::{ListenerSet, OnCollectionChanged, Subscription};
use super::logger::LOGGER;
use super::schema::CollectionSchema;
use super::settings::OdmSettings;

#[derive(Clone)]
pub struct CollectionHandle {
    inner: Arc<CollectionInner>,
}

pub(crate) struct CollectionInner {
    path: ResourcePath,
    schema: Arc<CollectionSchema>,
    context: OdmContext,
    documents: Mutex<HashMap<String, DocumentHandle>>,
    listener: Mutex<Option<ListenerRegistration>>,
    added: ListenerSet<DocumentHandle>,
    modified: ListenerSet<DocumentHandle>,
    removed: ListenerSet<DocumentHandle>,
}

impl CollectionHandle {
    pub(crate) fn new(path: ResourcePath, schema: Arc<CollectionSchema>, context: OdmContext) -> Self {
        Self {
            inner: Arc::new(CollectionInner {
                path,
                schema,
                context,
                documents: Mutex::new(HashMap::new()),
                listener: Mutex::new(None),
                added: ListenerSet::new(),
                modified: ListenerSet::new(),
                removed: ListenerSet::new(),
            }),
        }
    }

    pub(crate) fn from_inner(inner: Arc<CollectionInner>) -> Self {
        Self { inner }
    }

    pub fn name(&self) -> &str {
        self.inner.path.last_segment().unwrap_or_default()
    }

    pub fn path(&self) -> &ResourcePath {
        &self.inner.path
    }

    pub fn schema(&self) -> &CollectionSchema {
        &self.inner.schema
    }

    pub fn settings(&self) -> &OdmSettings {
        &self.inner.context.settings
    }

    pub(crate) fn datastore(&self) -> &Arc<dyn Datastore> {
        &self.inner.context.datastore
    }

    /// The handle for document `id`, created on first use and cached afterwards.
    pub fn document(&self, id: &str) -> OdmResult<DocumentHandle> {
        if let Some(document) = self.cached(id) {
            return Ok(document);
        }
        let key = DocumentKey::in_collection(&self.inner.path, id).map_err(local_error)?;
        let created = DocumentHandle::new(
            key,
            &self.inner,
            Arc::clone(&self.inner.schema),
            self.inner.context.clone(),
        );

        // Another caller may have raced us while the handle was built.
        let (document, discarded) = {
            let mut documents = self.inner.documents.lock().unwrap();
            match documents.get(id) {
                Some(existing) => (existing.clone(), Some(created)),
                None => {
                    documents.insert(id.to_owned(), created.clone());
                    (created, None)
                }
            }
        };
        if let Some(discarded) = discarded {
            discarded.release();
        }
        Ok(document)
    }

    /// The cached handle for `id`, without creating one.
    pub fn cached(&self, id: &str) -> Option<DocumentHandle> {
        self.inner.documents.lock().unwrap().get(id).cloned()
    }

    pub fn cached_len(&self) -> usize {
        self.inner.documents.lock().unwrap().len()
    }

    fn build_query<F>(&self, make_query: F) -> OdmResult<Query>
    where
        F: FnOnce(Query) -> FirestoreResult<Query>,
    {
        Query::new(self.inner.path.clone())
            .and_then(make_query)
            .map_err(local_error)
    }

    /// Data of every document in the collection.
    pub async fn get(&self) -> OdmResult<Vec<DocumentData>> {
        self.query(Ok).await
    }

    /// Runs the query built by `make_query` from a query over this collection.
    ///
    /// Results for documents with a cached handle refresh that handle and carry
    /// live references; other results are returned as raw field data.
    pub async fn query<F>(&self, make_query: F) -> OdmResult<Vec<DocumentData>>
    where
        F: FnOnce(Query) -> FirestoreResult<Query>,
    {
        let query = self.build_query(make_query)?;
        let snapshots = self.datastore().run_query(&query).await?;
        let mut results = Vec::with_capacity(snapshots.len());
        for snapshot in &snapshots {
            match self.cached(snapshot.id()) {
                Some(document) => {
                    document.apply_snapshot(snapshot);
                    results.extend(document.get_from_cache());
                }
                None => results.extend(
                    snapshot
                        .data()
                        .map(|fields| DocumentData::from_raw(snapshot.id(), fields)),
                ),
            }
        }
        Ok(results)
    }

    /// Writes a new document, under `id` or a generated id, and returns its
    /// handle populated with the written data.
    pub async fn create(&self, id: Option<&str>, data: DocumentData) -> OdmResult<DocumentHandle> {
        let id = id.map(str::to_owned).unwrap_or_else(generate_auto_id);
        let document = self.document(&id)?;
        document.set(&data).await?;

        let written = crate::firestore::api::operations::encode_set_data(data.to_store_map())
            .map_err(local_error)?;
        if written.transforms.is_empty() {
            document.apply_snapshot(&DocumentSnapshot::new(document.key().clone(), Some(written.map)));
        }
        Ok(document)
    }

    /// Queues the creation of a document on `batch` and returns its key.
    pub fn create_in_batch(
        &self,
        batch: &mut WriteBatch,
        id: Option<&str>,
        data: &DocumentData,
    ) -> OdmResult<DocumentKey> {
        let id = id.map(str::to_owned).unwrap_or_else(generate_auto_id);
        let key = DocumentKey::in_collection(&self.inner.path, &id).map_err(local_error)?;
        batch.set(&key, data.to_store_map()).map_err(local_error)?;
        if let Some(document) = self.cached(&id) {
            document.clear_cache();
        }
        Ok(key)
    }

    pub async fn delete(&self, id: &str) -> OdmResult<()> {
        match self.cached(id) {
            Some(document) => document.delete().await,
            None => {
                let key = DocumentKey::in_collection(&self.inner.path, id).map_err(local_error)?;
                self.datastore().delete_document(&key).await?;
                Ok(())
            }
        }
    }

    /// Deletes the documents in atomic batches of at most `MAX_BATCH_WRITES` writes.
    pub async fn batch_delete(&self, keys: &[DocumentKey]) -> OdmResult<()> {
        for key in keys {
            if key.collection_path() != self.inner.path {
                return Err(invalid_argument(format!(
                    "{key} is not a document of {}",
                    self.inner.path
                )));
            }
        }
        for chunk in keys.chunks(MAX_BATCH_WRITES) {
            let mut batch = WriteBatch::new(Arc::clone(self.datastore()));
            for key in chunk {
                batch.delete(key).map_err(local_error)?;
                if let Some(document) = self.cached(key.id()) {
                    document.clear_cache();
                }
            }
            batch.commit().await?;
            LOGGER.debug(format!(
                "Deleted {} document(s) from {}",
                chunk.len(),
                self.inner.path
            ));
        }
        Ok(())
    }

    pub fn is_listening(&self) -> bool {
        self.inner.listener.lock().unwrap().is_some()
    }

    /// Keeps cached handles current from a realtime query listener.
    ///
    /// A listener that is already running is replaced.
    pub fn start_listening<F>(&self, make_query: F) -> OdmResult<()>
    where
        F: FnOnce(Query) -> FirestoreResult<Query>,
    {
        let query = self.build_query(make_query)?;
        let previous = self.inner.listener.lock().unwrap().take();
        if let Some(previous) = previous {
            previous.remove();
            LOGGER.debug(format!("Collection {} restarts listening", self.inner.path));
        }

        let next = Arc::downgrade(&self.inner);
        let failed = Arc::downgrade(&self.inner);
        let path = self.inner.path.clone();
        let observer = PartialObserver::new()
            .with_next(move |snapshot: &QuerySnapshot| {
                if let Some(inner) = next.upgrade() {
                    CollectionHandle::from_inner(inner).apply_changes(snapshot);
                }
            })
            .with_error(move |err| {
                LOGGER.error(format!("Listener of collection {path} failed: {err}"));
                if let Some(inner) = failed.upgrade() {
                    let registration = inner.listener.lock().unwrap().take();
                    drop(registration);
                }
            });

        let registration = self.datastore().listen_query(&query, observer)?;
        *self.inner.listener.lock().unwrap() = Some(registration);
        Ok(())
    }

    pub fn stop_listening(&self) -> OdmResult<()> {
        let registration = self.inner.listener.lock().unwrap().take();
        match registration {
            Some(registration) => {
                registration.remove();
                LOGGER.debug(format!("Collection {} stopped listening", self.inner.path));
                Ok(())
            }
            None => Err(listener_state(format!(
                "Collection {} is not listening",
                self.inner.path
            ))),
        }
    }

    fn apply_changes(&self, snapshot: &QuerySnapshot) {
        for change in snapshot.doc_changes() {
            let id = change.document().id();
            match change.kind() {
                DocumentChangeType::Removed => {
                    let Some(document) = self.cached(id) else {
                        continue;
                    };
                    document.apply_snapshot(&DocumentSnapshot::missing(document.key().clone()));
                    self.inner.removed.emit(&document);
                    document.emit_removed();
                }
                kind => {
                    let document = match self.document(id) {
                        Ok(document) => document,
                        Err(err) => {
                            LOGGER.error(format!("Cannot apply change of {id}: {err}"));
                            continue;
                        }
                    };
                    document.apply_snapshot(change.document());
                    if kind == DocumentChangeType::Added {
                        self.inner.added.emit(&document);
                    } else {
                        self.inner.modified.emit(&document);
                    }
                    document.emit_value_changed();
                }
            }
        }
    }

    pub fn on_document_added<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&DocumentHandle) + Send + Sync + 'static,
    {
        self.inner.added.add(callback)
    }

    pub fn on_document_modified<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&DocumentHandle) + Send + Sync + 'static,
    {
        self.inner.modified.add(callback)
    }

    pub fn on_document_removed<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&DocumentHandle) + Send + Sync + 'static,
    {
        self.inner.removed.add(callback)
    }

    pub fn add_collection_listener(&self, listener: Arc<dyn OnCollectionChanged>) -> Subscription {
        let modified = Arc::clone(&listener);
        let removed = Arc::clone(&listener);
        self.on_document_added(move |document| listener.on_document_added(document))
            .merge(self.on_document_modified(move |document| modified.on_document_modified(document)))
            .merge(self.on_document_removed(move |document| removed.on_document_removed(document)))
    }

    pub(crate) fn release(&self) {
        let listener = self.inner.listener.lock().unwrap().take();
        drop(listener);
        let documents: Vec<DocumentHandle> = self
            .inner
            .documents
            .lock()
            .unwrap()
            .drain()
            .map(|(_, document)| document)
            .collect();
        for document in &documents {
            document.release();
        }
        self.inner.added.clear();
        self.inner.modified.clear();
        self.inner.removed.clear();
    }
}

impl PartialEq for CollectionHandle {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for CollectionHandle {}

impl fmt::Debug for CollectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CollectionHandle")
            .field("path", &self.inner.path.canonical_string())
            .field("type", &self.inner.schema.type_name())
            .finish()
    }
}
