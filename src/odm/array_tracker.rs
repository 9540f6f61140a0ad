//! Tracker for a reference-array field of a document.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, Weak};

use futures::future::join_all;

use crate::firestore::api::{DocumentSnapshot, FilterOperator, Query};
use crate::firestore::model::FieldPath;
use crate::firestore::value::FirestoreValue;

use super::collection::CollectionHandle;
use super::data::DocumentData;
use super::document::{DocumentHandle, DocumentInner};
use super::error::{index_out_of_bounds, invalid_argument, parent_not_fetched, released, OdmResult};
use super::events::{ListenerSet, OnArrayChanged, Subscription};
use super::logger::LOGGER;
use super::reference_array::ReferenceArray;

/// Keeps the [`ReferenceArray`] of one field in sync with the store and
/// reports which references were inserted or removed between snapshots.
#[derive(Clone)]
pub struct ArrayTracker {
    inner: Arc<ArrayTrackerInner>,
}

pub(crate) struct ArrayTrackerInner {
    field: String,
    owner: Weak<DocumentInner>,
    target: CollectionHandle,
    array: ReferenceArray,
    ids: Mutex<Option<Vec<String>>>,
    inserted: ListenerSet<Vec<DocumentHandle>>,
    removed: ListenerSet<Vec<DocumentHandle>>,
    chunk_size: usize,
}

impl ArrayTracker {
    pub(crate) fn new(
        field: impl Into<String>,
        owner: Weak<DocumentInner>,
        target: CollectionHandle,
        chunk_size: usize,
    ) -> Self {
        let inner = Arc::new(ArrayTrackerInner {
            field: field.into(),
            owner,
            target,
            array: ReferenceArray::new(),
            ids: Mutex::new(None),
            inserted: ListenerSet::new(),
            removed: ListenerSet::new(),
            chunk_size: chunk_size.max(1),
        });
        inner.array.attach(&inner);
        Self { inner }
    }

    pub(crate) fn from_inner(inner: Arc<ArrayTrackerInner>) -> Self {
        Self { inner }
    }

    pub fn field(&self) -> &str {
        &self.inner.field
    }

    /// Collection every referenced document belongs to.
    pub fn target(&self) -> &CollectionHandle {
        &self.inner.target
    }

    pub fn array(&self) -> ReferenceArray {
        self.inner.array.clone()
    }

    pub fn len(&self) -> usize {
        self.inner.array.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.array.is_empty()
    }

    /// Whether a snapshot of the owning document has been applied yet.
    pub fn is_fetched(&self) -> bool {
        self.inner.ids.lock().unwrap().is_some()
    }

    fn owner(&self) -> OdmResult<DocumentHandle> {
        self.inner
            .owner
            .upgrade()
            .map(DocumentHandle::from_inner)
            .ok_or_else(|| released("owning document"))
    }

    /// Replaces the tracked sequence with `ids` and emits the set difference
    /// against the previous sequence. The first call only seeds the state.
    pub(crate) fn update_id_list(&self, ids: Vec<String>) {
        let handles = match ids
            .iter()
            .map(|id| self.inner.target.document(id))
            .collect::<OdmResult<Vec<_>>>()
        {
            Ok(handles) => handles,
            Err(err) => {
                LOGGER.error(format!(
                    "Cannot track references of '{}': {err}",
                    self.inner.field
                ));
                return;
            }
        };
        self.inner.array.replace_all(handles.clone());

        let previous = self.inner.ids.lock().unwrap().replace(ids.clone());
        let Some(previous) = previous else {
            return;
        };

        let inserted: Vec<DocumentHandle> = ids
            .iter()
            .zip(&handles)
            .filter(|(id, _)| !previous.contains(id))
            .map(|(_, handle)| handle.clone())
            .collect();
        let removed: Vec<DocumentHandle> = previous
            .iter()
            .filter(|id| !ids.contains(id))
            .filter_map(|id| self.inner.target.cached(id))
            .collect();

        if !inserted.is_empty() {
            self.inner.inserted.emit(&inserted);
        }
        if !removed.is_empty() {
            self.inner.removed.emit(&removed);
        }
    }

    fn ensure_targets(&self, documents: &[DocumentHandle]) -> OdmResult<Vec<FirestoreValue>> {
        let target = self.inner.target.path();
        documents
            .iter()
            .map(|document| {
                if &document.collection_path() == target {
                    Ok(document.reference_value())
                } else {
                    Err(invalid_argument(format!(
                        "Field '{}' references {}, cannot hold {}",
                        self.inner.field,
                        target,
                        document.path()
                    )))
                }
            })
            .collect()
    }

    /// Adds the documents to the stored array with a union transform.
    pub async fn add(&self, documents: &[DocumentHandle]) -> OdmResult<()> {
        let references = self.ensure_targets(documents)?;
        if references.is_empty() {
            return Ok(());
        }
        let owner = self.owner()?;
        owner
            .update_raw(BTreeMap::from([(
                self.inner.field.clone(),
                FirestoreValue::array_union(references),
            )]))
            .await
    }

    /// Removes every occurrence of the documents from the stored array.
    pub async fn delete(&self, documents: &[DocumentHandle]) -> OdmResult<()> {
        let references = self.ensure_targets(documents)?;
        if references.is_empty() {
            return Ok(());
        }
        let owner = self.owner()?;
        owner
            .update_raw(BTreeMap::from([(
                self.inner.field.clone(),
                FirestoreValue::array_remove(references),
            )]))
            .await
    }

    /// Removes the reference at `index`, fetching the owner first if needed.
    pub async fn delete_at(&self, index: usize) -> OdmResult<()> {
        if !self.is_fetched() {
            self.owner()?.get(false).await?;
        }
        let document = self
            .inner
            .array
            .get(index)
            .ok_or_else(|| index_out_of_bounds(index, self.len()))?;
        self.delete(std::slice::from_ref(&document)).await
    }

    pub fn get_at(&self, index: usize) -> OdmResult<DocumentHandle> {
        if !self.is_fetched() {
            return Err(parent_not_fetched(&self.inner.field));
        }
        self.inner
            .array
            .get(index)
            .ok_or_else(|| index_out_of_bounds(index, self.len()))
    }

    pub async fn get_data_at(&self, index: usize, from_cache: bool) -> OdmResult<Option<DocumentData>> {
        self.get_at(index)?.get(from_cache).await
    }

    /// Loads the data of every referenced document, one `in` query per chunk.
    ///
    /// The result is aligned with the tracked sequence; `None` marks documents
    /// that do not exist or were not returned by the store. With `from_cache`
    /// set, no query runs when every document's existence is already known.
    pub async fn get_array_data(&self, from_cache: bool) -> OdmResult<Vec<Option<DocumentData>>> {
        let items = self.inner.array.to_vec();
        if items.is_empty() {
            return Ok(Vec::new());
        }
        if from_cache && items.iter().all(DocumentHandle::is_cached) {
            return Ok(items.iter().map(DocumentHandle::get_from_cache).collect());
        }

        for item in &items {
            item.clear_cache();
        }

        let chunk_size = self.inner.chunk_size;
        let queries = items
            .chunks(chunk_size)
            .map(|chunk| {
                let references = chunk.iter().map(DocumentHandle::reference_value).collect();
                Query::new(self.inner.target.path().clone())?.where_field(
                    FieldPath::document_id(),
                    FilterOperator::In,
                    FirestoreValue::from_array(references),
                )
            })
            .collect::<Result<Vec<_>, _>>()?;

        let datastore = self.inner.target.datastore();
        let results = join_all(queries.iter().map(|query| datastore.run_query(query))).await;

        for (chunk_index, result) in results.into_iter().enumerate() {
            let snapshots = result?;
            for (position, snapshot) in snapshots.iter().enumerate() {
                let expected = chunk_index * chunk_size + position;
                self.apply_hydrated(&items, expected, snapshot);
            }
        }

        Ok(items.iter().map(DocumentHandle::get_from_cache).collect())
    }

    fn apply_hydrated(&self, items: &[DocumentHandle], expected: usize, snapshot: &DocumentSnapshot) {
        if let Some(item) = items.get(expected).filter(|item| item.id() == snapshot.id()) {
            item.apply_snapshot(snapshot);
            return;
        }
        LOGGER.warn(format!(
            "Hydration of '{}' returned {} out of order (expected position {expected})",
            self.inner.field,
            snapshot.key()
        ));
        match items.iter().find(|item| item.id() == snapshot.id()) {
            Some(item) => item.apply_snapshot(snapshot),
            None => LOGGER.warn(format!(
                "Discarding {}: it is not referenced by '{}'",
                snapshot.key(),
                self.inner.field
            )),
        }
    }

    pub fn on_inserted<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&[DocumentHandle]) + Send + Sync + 'static,
    {
        self.inner
            .inserted
            .add(move |documents: &Vec<DocumentHandle>| callback(documents))
    }

    pub fn on_removed<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&[DocumentHandle]) + Send + Sync + 'static,
    {
        self.inner
            .removed
            .add(move |documents: &Vec<DocumentHandle>| callback(documents))
    }

    pub fn add_array_listener(&self, listener: Arc<dyn OnArrayChanged>) -> Subscription {
        let on_removed = Arc::clone(&listener);
        self.on_inserted(move |documents| listener.on_items_inserted(documents))
            .merge(self.on_removed(move |documents| on_removed.on_items_removed(documents)))
    }

    pub(crate) fn release(&self) {
        self.inner.inserted.clear();
        self.inner.removed.clear();
        self.inner.array.clear();
        *self.inner.ids.lock().unwrap() = None;
    }
}

impl std::fmt::Debug for ArrayTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArrayTracker")
            .field("field", &self.inner.field)
            .field("target", &self.inner.target.path().canonical_string())
            .field("len", &self.len())
            .finish()
    }
}
