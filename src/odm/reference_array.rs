//! Ordered reference collection bound to an [`ArrayTracker`].
//!
//! Every mutator comes in two forms. The plain form changes the local sequence
//! immediately and syncs the store in the background, reporting failures only
//! through the ODM logger. The `_awaited` form performs the store operation
//! first and applies the local change once it succeeded.

use std::cmp::Ordering;
use std::fmt;
use std::ops::Range;
use std::sync::{Arc, Mutex, Weak};

use crate::platform::runtime::spawn_detached;

use super::array_tracker::{ArrayTracker, ArrayTrackerInner};
use super::data::DocumentData;
use super::document::DocumentHandle;
use super::error::{tracker_not_attached, unsupported_operation, OdmResult};
use super::logger::LOGGER;

#[derive(Clone, Default)]
pub struct ReferenceArray {
    inner: Arc<ReferenceArrayInner>,
}

#[derive(Default)]
struct ReferenceArrayInner {
    items: Mutex<Vec<DocumentHandle>>,
    tracker: Mutex<Option<Weak<ArrayTrackerInner>>>,
}

#[derive(Clone, Copy)]
enum RemoteOp {
    Add,
    Remove,
}

impl ReferenceArray {
    /// An array that is not bound to any tracker. Mutations stay local.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_documents(documents: impl IntoIterator<Item = DocumentHandle>) -> Self {
        let array = Self::new();
        *array.inner.items.lock().unwrap() = documents.into_iter().collect();
        array
    }

    pub(crate) fn attach(&self, tracker: &Arc<ArrayTrackerInner>) {
        *self.inner.tracker.lock().unwrap() = Some(Arc::downgrade(tracker));
    }

    pub(crate) fn replace_all(&self, documents: Vec<DocumentHandle>) {
        *self.inner.items.lock().unwrap() = documents;
    }

    pub(crate) fn clear(&self) {
        self.replace_all(Vec::new());
    }

    fn tracker(&self) -> Option<ArrayTracker> {
        self.inner
            .tracker
            .lock()
            .unwrap()
            .as_ref()
            .and_then(Weak::upgrade)
            .map(ArrayTracker::from_inner)
    }

    pub fn is_attached(&self) -> bool {
        self.tracker().is_some()
    }

    pub fn len(&self) -> usize {
        self.inner.items.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, index: usize) -> Option<DocumentHandle> {
        self.inner.items.lock().unwrap().get(index).cloned()
    }

    /// Membership by handle identity.
    pub fn contains(&self, document: &DocumentHandle) -> bool {
        self.inner
            .items
            .lock()
            .unwrap()
            .iter()
            .any(|item| item.same_handle(document))
    }

    pub fn to_vec(&self) -> Vec<DocumentHandle> {
        self.inner.items.lock().unwrap().clone()
    }

    /// Appends the documents not yet present and returns the new length.
    pub fn push(&self, documents: impl IntoIterator<Item = DocumentHandle>) -> usize {
        let (added, len) = {
            let mut items = self.inner.items.lock().unwrap();
            let added = new_members(&items, documents);
            items.extend(added.iter().cloned());
            (added, items.len())
        };
        self.forward_detached("push", RemoteOp::Add, added);
        len
    }

    pub async fn push_awaited(
        &self,
        documents: impl IntoIterator<Item = DocumentHandle>,
    ) -> OdmResult<usize> {
        let tracker = self.tracker().ok_or_else(tracker_not_attached)?;
        let added = new_members(&self.inner.items.lock().unwrap(), documents);
        if !added.is_empty() {
            tracker.add(&added).await?;
        }
        let mut items = self.inner.items.lock().unwrap();
        let added = new_members(&items, added);
        items.extend(added);
        Ok(items.len())
    }

    pub fn pop(&self) -> Option<DocumentHandle> {
        let popped = self.inner.items.lock().unwrap().pop();
        self.forward_detached("pop", RemoteOp::Remove, popped.iter().cloned().collect());
        popped
    }

    pub async fn pop_awaited(&self) -> OdmResult<Option<DocumentHandle>> {
        let tracker = self.tracker().ok_or_else(tracker_not_attached)?;
        let Some(last) = self.to_vec().pop() else {
            return Ok(None);
        };
        tracker.delete(std::slice::from_ref(&last)).await?;
        self.remove_from(|items| items.iter().rposition(|item| item.same_handle(&last)));
        Ok(Some(last))
    }

    pub fn shift(&self) -> Option<DocumentHandle> {
        let shifted = {
            let mut items = self.inner.items.lock().unwrap();
            (!items.is_empty()).then(|| items.remove(0))
        };
        self.forward_detached("shift", RemoteOp::Remove, shifted.iter().cloned().collect());
        shifted
    }

    pub async fn shift_awaited(&self) -> OdmResult<Option<DocumentHandle>> {
        let tracker = self.tracker().ok_or_else(tracker_not_attached)?;
        let Some(first) = self.get(0) else {
            return Ok(None);
        };
        tracker.delete(std::slice::from_ref(&first)).await?;
        self.remove_from(|items| items.iter().position(|item| item.same_handle(&first)));
        Ok(Some(first))
    }

    /// Removes `delete_count` items starting at `start`, or everything from
    /// `start` on when `delete_count` is `None`. Returns the removed items.
    pub fn splice(&self, start: usize, delete_count: Option<usize>) -> Vec<DocumentHandle> {
        let removed: Vec<_> = {
            let mut items = self.inner.items.lock().unwrap();
            let range = splice_range(items.len(), start, delete_count);
            items.drain(range).collect()
        };
        self.forward_detached("splice", RemoteOp::Remove, removed.clone());
        removed
    }

    pub async fn splice_awaited(
        &self,
        start: usize,
        delete_count: Option<usize>,
    ) -> OdmResult<Vec<DocumentHandle>> {
        let tracker = self.tracker().ok_or_else(tracker_not_attached)?;
        let removed: Vec<_> = {
            let items = self.inner.items.lock().unwrap();
            items[splice_range(items.len(), start, delete_count)].to_vec()
        };
        if removed.is_empty() {
            return Ok(removed);
        }
        tracker.delete(&removed).await?;

        let mut items = self.inner.items.lock().unwrap();
        let end = start + removed.len();
        let unchanged = end <= items.len()
            && items[start..end]
                .iter()
                .zip(&removed)
                .all(|(item, expected)| item.same_handle(expected));
        if unchanged {
            items.drain(start..end);
        } else {
            for expected in &removed {
                if let Some(index) = items.iter().position(|item| item.same_handle(expected)) {
                    items.remove(index);
                }
            }
        }
        Ok(removed)
    }

    /// The store keeps array order, so sorting is a no-op.
    pub fn sort<F>(&self, _compare: F) -> &Self
    where
        F: FnMut(&DocumentHandle, &DocumentHandle) -> Ordering,
    {
        self
    }

    /// Always fails: the store has no insert-at-head primitive.
    pub fn unshift(
        &self,
        _documents: impl IntoIterator<Item = DocumentHandle>,
    ) -> OdmResult<usize> {
        Err(unsupported_operation(
            "Reference arrays cannot unshift: the store only appends to arrays",
        ))
    }

    /// Hydrates every referenced document and returns the data of those that exist.
    pub async fn get_all(&self) -> OdmResult<Vec<DocumentData>> {
        let Some(tracker) = self.tracker() else {
            LOGGER.warn(format!("ReferenceArray::get_all: {}", tracker_not_attached()));
            return Ok(Vec::new());
        };
        let data = tracker.get_array_data(false).await?;
        Ok(data.into_iter().flatten().collect())
    }

    fn remove_from<F>(&self, locate: F)
    where
        F: FnOnce(&[DocumentHandle]) -> Option<usize>,
    {
        let mut items = self.inner.items.lock().unwrap();
        if let Some(index) = locate(&items) {
            items.remove(index);
        }
    }

    fn forward_detached(&self, operation: &'static str, op: RemoteOp, documents: Vec<DocumentHandle>) {
        let Some(tracker) = self.tracker() else {
            LOGGER.error(format!("ReferenceArray::{operation}: {}", tracker_not_attached()));
            return;
        };
        if documents.is_empty() {
            return;
        }
        spawn_detached(async move {
            let result = match op {
                RemoteOp::Add => tracker.add(&documents).await,
                RemoteOp::Remove => tracker.delete(&documents).await,
            };
            if let Err(err) = result {
                LOGGER.error(format!(
                    "ReferenceArray::{operation} on '{}' was not stored: {err}",
                    tracker.field()
                ));
            }
        });
    }
}

impl fmt::Debug for ReferenceArray {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.to_vec().iter()).finish()
    }
}

fn new_members(
    existing: &[DocumentHandle],
    candidates: impl IntoIterator<Item = DocumentHandle>,
) -> Vec<DocumentHandle> {
    let mut added: Vec<DocumentHandle> = Vec::new();
    for candidate in candidates {
        let present = existing
            .iter()
            .chain(added.iter())
            .any(|item| item.same_handle(&candidate));
        if !present {
            added.push(candidate);
        }
    }
    added
}

fn splice_range(len: usize, start: usize, delete_count: Option<usize>) -> Range<usize> {
    let start = start.min(len);
    let end = match delete_count {
        Some(count) => start.saturating_add(count).min(len),
        None => len,
    };
    start..end
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splice_range_matches_array_semantics() {
        assert_eq!(splice_range(11, 1, Some(8)), 1..9);
        assert_eq!(splice_range(11, 4, None), 4..11);
        assert_eq!(splice_range(3, 5, None), 3..3);
        assert_eq!(splice_range(3, 1, Some(0)), 1..1);
        assert_eq!(splice_range(3, 1, Some(usize::MAX)), 1..3);
    }

    #[test]
    fn detached_array_mutates_locally() {
        let array = ReferenceArray::new();
        assert!(!array.is_attached());
        assert!(array.pop().is_none());
        assert!(array.splice(0, None).is_empty());
        assert_eq!(
            array.unshift(Vec::new()).unwrap_err().code_str(),
            "odm/unsupported-operation"
        );
    }

    #[tokio::test]
    async fn awaited_mutators_require_tracker() {
        let array = ReferenceArray::new();
        let err = array.push_awaited(Vec::new()).await.unwrap_err();
        assert_eq!(err.code_str(), "odm/tracker-not-attached");
        assert!(array.pop_awaited().await.is_err());
        assert!(array.get_all().await.unwrap().is_empty());
    }
}
