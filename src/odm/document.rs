//! Identity-cached handle to one document.
//!
//! A handle owns the cached field data of its document, the trackers of its
//! reference fields and its nested collections. Snapshots are routed field by
//! field: reference values go to trackers, everything else is stored as-is.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex, Weak};

use crate::firestore::api::operations::{encode_set_data, encode_update_document_data};
use crate::firestore::api::{DocumentSnapshot, WriteBatch};
use crate::firestore::model::{DocumentKey, ResourcePath};
use crate::firestore::remote::{ListenerRegistration, WriteOperation};
use crate::firestore::value::FirestoreValue;
use crate::util::subscribe::PartialObserver;

use super::array_tracker::ArrayTracker;
use super::collection::{CollectionHandle, CollectionInner};
use super::data::{DocumentData, FieldValue};
use super::database::OdmContext;
use super::error::{collection_not_found, invalid_argument, listener_state, OdmError, OdmResult};
use super::events::{ListenerSet, OnValueChanged, Subscription};
use super::logger::LOGGER;
use super::reference::ReferenceTracker;
use super::schema::{CollectionSchema, FieldKind};

/// What is known about the document's existence in the store.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Existence {
    /// Never fetched, or invalidated by a local write.
    #[default]
    Unknown,
    Exists,
    Absent,
}

/// Cheap, clonable handle. Two handles compare equal when they are the same
/// cached instance, which holds for every handle obtained for the same path
/// from the same [`Database`](super::Database).
#[derive(Clone)]
pub struct DocumentHandle {
    inner: Arc<DocumentInner>,
}

pub(crate) struct DocumentInner {
    key: DocumentKey,
    collection: Weak<CollectionInner>,
    schema: Arc<CollectionSchema>,
    context: OdmContext,
    state: Mutex<DocumentState>,
    references: Mutex<BTreeMap<String, ReferenceTracker>>,
    arrays: Mutex<BTreeMap<String, ArrayTracker>>,
    collections: Mutex<BTreeMap<String, CollectionHandle>>,
    listener: Mutex<Option<ListenerRegistration>>,
    value_changed: ListenerSet<DocumentHandle>,
    removed: ListenerSet<DocumentHandle>,
}

struct DocumentState {
    existence: Existence,
    data: DocumentData,
}

impl DocumentHandle {
    pub(crate) fn new(
        key: DocumentKey,
        collection: &Arc<CollectionInner>,
        schema: Arc<CollectionSchema>,
        context: OdmContext,
    ) -> Self {
        let inner = Arc::new_cyclic(|owner: &Weak<DocumentInner>| {
            let mut data = DocumentData::new();
            data.stamp_id(key.id());
            let mut references = BTreeMap::new();
            let mut arrays = BTreeMap::new();

            for (field, kind) in schema.fields() {
                let (collection_path, is_array) = match kind {
                    FieldKind::Plain => continue,
                    FieldKind::Reference { collection_path } => (collection_path, false),
                    FieldKind::ReferenceArray { collection_path } => (collection_path, true),
                };
                let target = match context.resolve_collection(collection_path) {
                    Ok(target) => target,
                    Err(err) => {
                        LOGGER.error(format!(
                            "{} field '{field}' of {key} is treated as plain: {err}",
                            schema.type_name()
                        ));
                        continue;
                    }
                };
                if is_array {
                    let tracker = ArrayTracker::new(
                        field,
                        owner.clone(),
                        target,
                        context.settings.hydration_chunk_size,
                    );
                    data.set(field, FieldValue::DocumentArray(tracker.array()));
                    arrays.insert(field.to_owned(), tracker);
                } else {
                    data.set(field, FieldValue::Document(None));
                    references.insert(
                        field.to_owned(),
                        ReferenceTracker::new(field, owner.clone(), target),
                    );
                }
            }

            let collections = schema
                .collections()
                .map(|(name, nested)| {
                    let path = key.path().child([name]);
                    let handle = CollectionHandle::new(path, Arc::clone(nested), context.clone());
                    (name.to_owned(), handle)
                })
                .collect();

            DocumentInner {
                key: key.clone(),
                collection: Arc::downgrade(collection),
                schema: Arc::clone(&schema),
                context: context.clone(),
                state: Mutex::new(DocumentState {
                    existence: Existence::Unknown,
                    data,
                }),
                references: Mutex::new(references),
                arrays: Mutex::new(arrays),
                collections: Mutex::new(collections),
                listener: Mutex::new(None),
                value_changed: ListenerSet::new(),
                removed: ListenerSet::new(),
            }
        });
        Self { inner }
    }

    pub(crate) fn from_inner(inner: Arc<DocumentInner>) -> Self {
        Self { inner }
    }

    pub(crate) fn same_handle(&self, other: &DocumentHandle) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub fn id(&self) -> &str {
        self.inner.key.id()
    }

    pub fn key(&self) -> &DocumentKey {
        &self.inner.key
    }

    pub fn path(&self) -> &ResourcePath {
        self.inner.key.path()
    }

    pub fn collection_path(&self) -> ResourcePath {
        self.inner.key.collection_path()
    }

    pub fn schema(&self) -> &CollectionSchema {
        &self.inner.schema
    }

    /// The collection this document lives in, while its database is alive.
    pub fn parent(&self) -> Option<CollectionHandle> {
        self.inner
            .collection
            .upgrade()
            .map(CollectionHandle::from_inner)
    }

    /// Reference value pointing at this document.
    pub fn reference_value(&self) -> FirestoreValue {
        FirestoreValue::from_reference(self.path().canonical_string())
    }

    pub fn exists(&self) -> Existence {
        self.inner.state.lock().unwrap().existence
    }

    pub(crate) fn is_cached(&self) -> bool {
        self.exists() != Existence::Unknown
    }

    /// Cached data, regardless of whether the document is known to exist.
    pub fn value(&self) -> DocumentData {
        self.inner.state.lock().unwrap().data.clone()
    }

    /// Cached data when the document is known to exist.
    pub fn get_from_cache(&self) -> Option<DocumentData> {
        let state = self.inner.state.lock().unwrap();
        (state.existence == Existence::Exists).then(|| state.data.clone())
    }

    /// Forgets what is known about existence; the next `get` goes to the store.
    pub fn clear_cache(&self) {
        self.inner.state.lock().unwrap().existence = Existence::Unknown;
    }

    /// Returns the document data, or `None` when it does not exist.
    ///
    /// Cached state is served when existence is known and either `from_cache`
    /// is set or a realtime listener keeps this document current.
    pub async fn get(&self, from_cache: bool) -> OdmResult<Option<DocumentData>> {
        if self.is_cached() && (from_cache || self.is_listening()) {
            return Ok(self.get_from_cache());
        }
        let snapshot = self.inner.context.datastore.get_document(&self.inner.key).await?;
        self.apply_snapshot(&snapshot);
        Ok(self.get_from_cache())
    }

    /// Replaces the stored document with `data`.
    pub async fn set(&self, data: &DocumentData) -> OdmResult<()> {
        self.clear_cache();
        let encoded = encode_set_data(data.to_store_map()).map_err(local_error)?;
        if encoded.transforms.is_empty() {
            self.inner
                .context
                .datastore
                .set_document(&self.inner.key, encoded.map)
                .await?;
        } else {
            self.inner
                .context
                .datastore
                .commit(vec![WriteOperation::Set {
                    key: self.inner.key.clone(),
                    data: encoded.map,
                    transforms: encoded.transforms,
                }])
                .await?;
        }
        Ok(())
    }

    /// Updates the given top-level fields; handles are stored as references.
    pub async fn update<I, K, V>(&self, changes: I) -> OdmResult<()>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<FieldValue>,
    {
        let changes = store_changes(changes);
        self.update_raw(changes).await
    }

    pub(crate) async fn update_raw(&self, changes: BTreeMap<String, FirestoreValue>) -> OdmResult<()> {
        self.clear_cache();
        let encoded = encode_update_document_data(changes).map_err(local_error)?;
        self.inner
            .context
            .datastore
            .update_document(
                &self.inner.key,
                encoded.map,
                encoded.field_paths,
                encoded.transforms,
            )
            .await?;
        Ok(())
    }

    /// Queues an update of the given fields on `batch`.
    pub fn update_in_batch<I, K, V>(&self, batch: &mut WriteBatch, changes: I) -> OdmResult<()>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<FieldValue>,
    {
        self.clear_cache();
        batch
            .update(&self.inner.key, store_changes(changes))
            .map_err(local_error)?;
        Ok(())
    }

    pub async fn delete(&self) -> OdmResult<()> {
        self.inner
            .context
            .datastore
            .delete_document(&self.inner.key)
            .await?;
        // A listener has already recorded the removal.
        if !self.is_listening() {
            self.clear_cache();
        }
        Ok(())
    }

    pub fn linked_document(&self, field: &str) -> OdmResult<ReferenceTracker> {
        self.inner
            .references
            .lock()
            .unwrap()
            .get(field)
            .cloned()
            .ok_or_else(|| self.untracked_field(field, "single reference"))
    }

    pub fn linked_array(&self, field: &str) -> OdmResult<ArrayTracker> {
        self.inner
            .arrays
            .lock()
            .unwrap()
            .get(field)
            .cloned()
            .ok_or_else(|| self.untracked_field(field, "reference array"))
    }

    fn untracked_field(&self, field: &str, kind: &str) -> OdmError {
        invalid_argument(format!(
            "Field '{field}' of {} is not a tracked {kind}",
            self.inner.schema.type_name()
        ))
    }

    /// Nested collection declared on this document's schema.
    pub fn collection(&self, name: &str) -> OdmResult<CollectionHandle> {
        self.inner
            .collections
            .lock()
            .unwrap()
            .get(name)
            .cloned()
            .ok_or_else(|| collection_not_found(&self.path().child([name]).canonical_string()))
    }

    /// Applies a store snapshot to the cached state and the field trackers.
    pub(crate) fn apply_snapshot(&self, snapshot: &DocumentSnapshot) {
        let Some(fields) = snapshot.data() else {
            self.inner.state.lock().unwrap().existence = Existence::Absent;
            return;
        };
        {
            let mut state = self.inner.state.lock().unwrap();
            state.existence = Existence::Exists;
            state.data.stamp_id(self.id());
        }
        for (name, value) in fields {
            if !self.inner.schema.is_declared(name) {
                LOGGER.warn(format!(
                    "Field '{name}' of {} is not declared on {}",
                    self.inner.key,
                    self.inner.schema.type_name()
                ));
            }
            self.apply_field(name, value);
        }
    }

    fn apply_field(&self, name: &str, value: &FirestoreValue) {
        let array = self.inner.arrays.lock().unwrap().get(name).cloned();
        if let Some(tracker) = array {
            match reference_ids(value) {
                Some(ids) => {
                    tracker.update_id_list(ids);
                    self.set_local_field(name, FieldValue::DocumentArray(tracker.array()));
                    return;
                }
                None if value.as_array().is_some() => LOGGER.warn(format!(
                    "Field '{name}' of {} holds values that are not document references",
                    self.inner.key
                )),
                None => {}
            }
        }

        let reference = self.inner.references.lock().unwrap().get(name).cloned();
        if let Some(tracker) = reference {
            if value.is_null() {
                tracker.update_ref(None);
                return;
            }
            if let Some(id) = value.as_reference().and_then(reference_id) {
                tracker.update_ref(Some(&id));
                return;
            }
        }

        self.set_local_field(name, FieldValue::Value(value.clone()));
    }

    pub(crate) fn set_local_field(&self, name: &str, value: FieldValue) {
        self.inner.state.lock().unwrap().data.fields_mut().insert(name.to_owned(), value);
    }

    /// Whether this document, or the collection it lives in, has a realtime listener.
    pub fn is_listening(&self) -> bool {
        self.inner.listener.lock().unwrap().is_some()
            || self.parent().is_some_and(|collection| collection.is_listening())
    }

    /// Keeps this document current from a realtime listener.
    pub fn start_listening(&self) -> OdmResult<()> {
        if self.inner.listener.lock().unwrap().is_some() {
            return Err(listener_state(format!(
                "Document {} is already listening",
                self.inner.key
            )));
        }
        if let Some(collection) = self.parent().filter(CollectionHandle::is_listening) {
            return Err(listener_state(format!(
                "Document {} is already kept current by collection {}",
                self.inner.key,
                collection.path()
            )));
        }

        let next = Arc::downgrade(&self.inner);
        let failed = Arc::downgrade(&self.inner);
        let key = self.inner.key.clone();
        let observer = PartialObserver::new()
            .with_next(move |snapshot: &DocumentSnapshot| {
                if let Some(inner) = next.upgrade() {
                    DocumentHandle::from_inner(inner).apply_realtime_snapshot(snapshot);
                }
            })
            .with_error(move |err| {
                LOGGER.error(format!("Listener of document {key} failed: {err}"));
                if let Some(inner) = failed.upgrade() {
                    let registration = inner.listener.lock().unwrap().take();
                    drop(registration);
                }
            });

        let registration = self
            .inner
            .context
            .datastore
            .listen_document(&self.inner.key, observer)?;
        *self.inner.listener.lock().unwrap() = Some(registration);
        LOGGER.debug(format!("Document {} started listening", self.inner.key));
        Ok(())
    }

    pub fn stop_listening(&self) -> OdmResult<()> {
        let registration = self.inner.listener.lock().unwrap().take();
        if let Some(registration) = registration {
            registration.remove();
            LOGGER.debug(format!("Document {} stopped listening", self.inner.key));
            return Ok(());
        }
        match self.parent().filter(CollectionHandle::is_listening) {
            Some(collection) => Err(listener_state(format!(
                "Document {} is kept current by collection {}; stop the collection instead",
                self.inner.key,
                collection.path()
            ))),
            None => Err(listener_state(format!(
                "Document {} is not listening",
                self.inner.key
            ))),
        }
    }

    fn apply_realtime_snapshot(&self, snapshot: &DocumentSnapshot) {
        let before = self.exists();
        self.apply_snapshot(snapshot);
        if snapshot.exists() {
            self.emit_value_changed();
        } else if before == Existence::Exists {
            self.emit_removed();
        }
    }

    pub(crate) fn emit_value_changed(&self) {
        self.inner.value_changed.emit(self);
    }

    pub(crate) fn emit_removed(&self) {
        self.inner.removed.emit(self);
    }

    /// Registers `callback` for value changes and invokes it once right away.
    pub fn on_value_changed<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&DocumentHandle) + Send + Sync + 'static,
    {
        let callback = Arc::new(callback);
        let registered = Arc::clone(&callback);
        let subscription = self
            .inner
            .value_changed
            .add(move |document: &DocumentHandle| registered(document));
        callback(self);
        subscription
    }

    pub fn on_document_removed<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&DocumentHandle) + Send + Sync + 'static,
    {
        self.inner.removed.add(callback)
    }

    pub fn add_value_listener(&self, listener: Arc<dyn OnValueChanged>) -> Subscription {
        let on_removed = Arc::clone(&listener);
        self.on_value_changed(move |document| listener.on_value_changed(document))
            .merge(self.on_document_removed(move |document| on_removed.on_document_removed(document)))
    }

    /// Drops trackers, listeners, cached data and nested collections.
    pub(crate) fn release(&self) {
        let listener = self.inner.listener.lock().unwrap().take();
        let references = std::mem::take(&mut *self.inner.references.lock().unwrap());
        let arrays = std::mem::take(&mut *self.inner.arrays.lock().unwrap());
        let collections = std::mem::take(&mut *self.inner.collections.lock().unwrap());
        let data = std::mem::take(&mut self.inner.state.lock().unwrap().data);

        drop(listener);
        for tracker in references.values() {
            tracker.release();
        }
        for tracker in arrays.values() {
            tracker.release();
        }
        for collection in collections.values() {
            collection.release();
        }
        self.inner.value_changed.clear();
        self.inner.removed.clear();
        drop(data);
    }
}

impl PartialEq for DocumentHandle {
    fn eq(&self, other: &Self) -> bool {
        self.same_handle(other)
    }
}

impl Eq for DocumentHandle {}

impl fmt::Debug for DocumentHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DocumentHandle")
            .field("path", &self.path().canonical_string())
            .field("exists", &self.exists())
            .finish()
    }
}

fn store_changes<I, K, V>(changes: I) -> BTreeMap<String, FirestoreValue>
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<FieldValue>,
{
    changes
        .into_iter()
        .map(|(name, value)| (name.into(), value.into().to_store_value()))
        .collect()
}

/// Store validation errors raised before anything is sent.
pub(crate) fn local_error(err: crate::firestore::error::FirestoreError) -> OdmError {
    invalid_argument(err.message())
}

fn reference_id(path: &str) -> Option<String> {
    match DocumentKey::from_string(path) {
        Ok(key) => Some(key.id().to_owned()),
        Err(err) => {
            LOGGER.warn(format!("Ignoring malformed reference '{path}': {err}"));
            None
        }
    }
}

/// Ids of a value that is an array made only of references.
fn reference_ids(value: &FirestoreValue) -> Option<Vec<String>> {
    value
        .as_array()?
        .reference_paths()?
        .into_iter()
        .map(reference_id)
        .collect()
}
