//! Change-event plumbing shared by trackers, documents and collections.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use crate::util::subscribe::Unsubscribe;

use super::document::DocumentHandle;

type Callback<T> = Arc<dyn Fn(&T) + Send + Sync + 'static>;

/// Keeps a callback registered until it is dropped or [`Subscription::unsubscribe`] is called.
#[must_use = "dropping a Subscription unregisters its callbacks"]
pub struct Subscription {
    unsubscribes: Vec<Unsubscribe>,
}

impl Subscription {
    fn new(unsubscribe: Unsubscribe) -> Self {
        Self {
            unsubscribes: vec![unsubscribe],
        }
    }

    pub(crate) fn merge(mut self, mut other: Subscription) -> Self {
        self.unsubscribes.append(&mut other.unsubscribes);
        self
    }

    pub fn unsubscribe(mut self) {
        self.release();
    }

    fn release(&mut self) {
        for unsubscribe in self.unsubscribes.drain(..) {
            unsubscribe();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.release();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("callbacks", &self.unsubscribes.len())
            .finish()
    }
}

/// Callbacks registered for one kind of event.
pub(crate) struct ListenerSet<T> {
    inner: Arc<ListenerSetInner<T>>,
}

struct ListenerSetInner<T> {
    next_id: AtomicU64,
    callbacks: Mutex<BTreeMap<u64, Callback<T>>>,
}

impl<T: 'static> ListenerSet<T> {
    pub(crate) fn new() -> Self {
        Self {
            inner: Arc::new(ListenerSetInner {
                next_id: AtomicU64::new(1),
                callbacks: Mutex::new(BTreeMap::new()),
            }),
        }
    }

    pub(crate) fn add<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst);
        self.inner
            .callbacks
            .lock()
            .unwrap()
            .insert(id, Arc::new(callback));
        let weak: Weak<ListenerSetInner<T>> = Arc::downgrade(&self.inner);
        Subscription::new(Box::new(move || {
            if let Some(inner) = weak.upgrade() {
                inner.callbacks.lock().unwrap().remove(&id);
            }
        }))
    }

    /// Invokes every callback in registration order. Callbacks may (un)register listeners.
    pub(crate) fn emit(&self, value: &T) {
        let callbacks: Vec<_> = self.inner.callbacks.lock().unwrap().values().cloned().collect();
        for callback in callbacks {
            callback(value);
        }
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.inner.callbacks.lock().unwrap().len()
    }

    pub(crate) fn clear(&self) {
        // Callbacks may unsubscribe from this set when dropped, so drop them unlocked.
        let drained = std::mem::take(&mut *self.inner.callbacks.lock().unwrap());
        drop(drained);
    }
}

/// Receives diff-based changes of a reference array.
pub trait OnArrayChanged: Send + Sync + 'static {
    fn on_items_inserted(&self, _documents: &[DocumentHandle]) {}

    fn on_items_removed(&self, _documents: &[DocumentHandle]) {}
}

/// Receives realtime changes of a listening collection.
pub trait OnCollectionChanged: Send + Sync + 'static {
    fn on_document_added(&self, _document: &DocumentHandle) {}

    fn on_document_modified(&self, _document: &DocumentHandle) {}

    fn on_document_removed(&self, _document: &DocumentHandle) {}
}

/// Receives realtime changes of one document.
pub trait OnValueChanged: Send + Sync + 'static {
    fn on_value_changed(&self, _document: &DocumentHandle) {}

    fn on_document_removed(&self, _document: &DocumentHandle) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn dropping_subscription_unregisters() {
        let set: ListenerSet<usize> = ListenerSet::new();
        let total = Arc::new(AtomicUsize::new(0));
        let captured = total.clone();
        let subscription = set.add(move |value| {
            captured.fetch_add(*value, Ordering::SeqCst);
        });
        set.emit(&2);
        drop(subscription);
        set.emit(&5);
        assert_eq!(total.load(Ordering::SeqCst), 2);
        assert_eq!(set.len(), 0);
    }

    #[test]
    fn merged_subscription_releases_all() {
        let first: ListenerSet<()> = ListenerSet::new();
        let second: ListenerSet<()> = ListenerSet::new();
        let subscription = first.add(|_| {}).merge(second.add(|_| {}));
        assert_eq!(first.len() + second.len(), 2);
        subscription.unsubscribe();
        assert_eq!(first.len() + second.len(), 0);
    }

    #[test]
    fn callbacks_may_register_during_emit() {
        let set = Arc::new(ListenerSet::<()>::new());
        let nested = Arc::new(Mutex::new(Vec::new()));
        let inner_set = set.clone();
        let holder = nested.clone();
        let _outer = set.add(move |_| {
            holder.lock().unwrap().push(inner_set.add(|_| {}));
        });
        set.emit(&());
        assert_eq!(set.len(), 2);
    }
}
