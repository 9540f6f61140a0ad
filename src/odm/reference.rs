//! Tracker for a single-reference field of a document.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, Weak};

use crate::firestore::value::FirestoreValue;

use super::collection::CollectionHandle;
use super::data::{DocumentData, FieldValue};
use super::document::{DocumentHandle, DocumentInner};
use super::error::{invalid_argument, released, OdmResult};
use super::logger::LOGGER;

/// Mirrors one reference field of its owning document as a live handle.
#[derive(Clone)]
pub struct ReferenceTracker {
    inner: Arc<ReferenceTrackerInner>,
}

struct ReferenceTrackerInner {
    field: String,
    owner: Weak<DocumentInner>,
    target: CollectionHandle,
    current: Mutex<Option<DocumentHandle>>,
}

impl ReferenceTracker {
    pub(crate) fn new(field: impl Into<String>, owner: Weak<DocumentInner>, target: CollectionHandle) -> Self {
        Self {
            inner: Arc::new(ReferenceTrackerInner {
                field: field.into(),
                owner,
                target,
                current: Mutex::new(None),
            }),
        }
    }

    pub fn field(&self) -> &str {
        &self.inner.field
    }

    pub fn target(&self) -> &CollectionHandle {
        &self.inner.target
    }

    /// The currently referenced document, if any.
    pub fn document(&self) -> Option<DocumentHandle> {
        self.inner.current.lock().unwrap().clone()
    }

    /// Points the tracker (and the owner's data field) at document `id` of the
    /// target collection, or clears both.
    pub(crate) fn update_ref(&self, id: Option<&str>) {
        let document = match id {
            None => None,
            Some(id) => match self.inner.target.document(id) {
                Ok(document) => Some(document),
                Err(err) => {
                    LOGGER.error(format!(
                        "Cannot resolve reference '{}' to {id}: {err}",
                        self.inner.field
                    ));
                    return;
                }
            },
        };
        *self.inner.current.lock().unwrap() = document.clone();
        if let Some(owner) = self.inner.owner.upgrade().map(DocumentHandle::from_inner) {
            owner.set_local_field(&self.inner.field, FieldValue::Document(document));
        }
    }

    /// Stores a reference to `document` (or null) on the owner, then tracks it.
    pub async fn set(&self, document: Option<&DocumentHandle>) -> OdmResult<()> {
        if let Some(document) = document {
            let target = self.inner.target.path();
            if &document.collection_path() != target {
                return Err(invalid_argument(format!(
                    "Field '{}' references {target}, cannot link {}",
                    self.inner.field,
                    document.path()
                )));
            }
        }
        let owner = self
            .inner
            .owner
            .upgrade()
            .map(DocumentHandle::from_inner)
            .ok_or_else(|| released("owning document"))?;
        let value = document
            .map(DocumentHandle::reference_value)
            .unwrap_or_else(FirestoreValue::null);
        owner
            .update_raw(BTreeMap::from([(self.inner.field.clone(), value)]))
            .await?;
        self.update_ref(document.map(DocumentHandle::id));
        Ok(())
    }

    pub async fn link(&self, document: &DocumentHandle) -> OdmResult<()> {
        self.set(Some(document)).await
    }

    pub async fn unlink(&self) -> OdmResult<()> {
        self.set(None).await
    }

    /// Data of the referenced document; `None` when nothing is referenced.
    pub async fn get(&self, from_cache: bool) -> OdmResult<Option<DocumentData>> {
        match self.document() {
            Some(document) => document.get(from_cache).await,
            None => Ok(None),
        }
    }

    pub(crate) fn release(&self) {
        *self.inner.current.lock().unwrap() = None;
    }
}

impl std::fmt::Debug for ReferenceTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReferenceTracker")
            .field("field", &self.inner.field)
            .field("document", &self.document())
            .finish()
    }
}
