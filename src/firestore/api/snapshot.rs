use std::collections::BTreeMap;

use crate::firestore::model::DocumentKey;
use crate::firestore::value::{FirestoreValue, MapValue};

/// Point-in-time read of a single document.
#[derive(Clone, Debug, PartialEq)]
pub struct DocumentSnapshot {
    key: DocumentKey,
    data: Option<MapValue>,
}

impl DocumentSnapshot {
    pub fn new(key: DocumentKey, data: Option<MapValue>) -> Self {
        Self { key, data }
    }

    /// Snapshot of a document that does not exist on the backend.
    pub fn missing(key: DocumentKey) -> Self {
        Self { key, data: None }
    }

    /// Returns whether the document exists on the backend.
    pub fn exists(&self) -> bool {
        self.data.is_some()
    }

    /// Returns the decoded document fields if the snapshot contains data.
    pub fn data(&self) -> Option<&BTreeMap<String, FirestoreValue>> {
        self.data.as_ref().map(MapValue::fields)
    }

    pub fn map_value(&self) -> Option<&MapValue> {
        self.data.as_ref()
    }

    pub fn get(&self, field: &str) -> Option<&FirestoreValue> {
        self.data.as_ref().and_then(|map| map.get(field))
    }

    pub fn id(&self) -> &str {
        self.key.id()
    }

    pub fn key(&self) -> &DocumentKey {
        &self.key
    }
}

/// How a document entered, changed within, or left a query result.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DocumentChangeType {
    Added,
    Modified,
    Removed,
}

#[derive(Clone, Debug, PartialEq)]
pub struct DocumentChange {
    kind: DocumentChangeType,
    document: DocumentSnapshot,
}

impl DocumentChange {
    pub fn new(kind: DocumentChangeType, document: DocumentSnapshot) -> Self {
        Self { kind, document }
    }

    pub fn kind(&self) -> DocumentChangeType {
        self.kind
    }

    /// For removals this is the last known state of the document.
    pub fn document(&self) -> &DocumentSnapshot {
        &self.document
    }
}

/// Results of a query together with the changes since the previous delivery.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct QuerySnapshot {
    documents: Vec<DocumentSnapshot>,
    changes: Vec<DocumentChange>,
}

impl QuerySnapshot {
    pub fn new(documents: Vec<DocumentSnapshot>, changes: Vec<DocumentChange>) -> Self {
        Self { documents, changes }
    }

    pub fn documents(&self) -> &[DocumentSnapshot] {
        &self.documents
    }

    pub fn doc_changes(&self) -> &[DocumentChange] {
        &self.changes
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }
}

/// Computes the changes turning `previous` into `current`, keyed by document path.
///
/// Removals come first, followed by additions and modifications in `current` order.
pub fn compute_doc_changes(
    previous: &[DocumentSnapshot],
    current: &[DocumentSnapshot],
) -> Vec<DocumentChange> {
    let mut changes = Vec::new();
    for old in previous {
        if !current.iter().any(|doc| doc.key() == old.key()) {
            changes.push(DocumentChange::new(DocumentChangeType::Removed, old.clone()));
        }
    }
    for doc in current {
        match previous.iter().find(|old| old.key() == doc.key()) {
            None => changes.push(DocumentChange::new(DocumentChangeType::Added, doc.clone())),
            Some(old) if old.data() != doc.data() => {
                changes.push(DocumentChange::new(DocumentChangeType::Modified, doc.clone()))
            }
            Some(_) => {}
        }
    }
    changes
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(path: &str, name: &str) -> DocumentSnapshot {
        let key = DocumentKey::from_string(path).unwrap();
        let data = BTreeMap::from([("name".to_string(), FirestoreValue::from_string(name))]);
        DocumentSnapshot::new(key, Some(MapValue::new(data)))
    }

    #[test]
    fn snapshot_reports_existence() {
        let key = DocumentKey::from_string("users/alice").unwrap();
        let snapshot = DocumentSnapshot::missing(key);
        assert!(!snapshot.exists());
        assert!(snapshot.data().is_none());
        assert_eq!(snapshot.id(), "alice");
    }

    #[test]
    fn doc_changes_classify_each_document() {
        let previous = vec![snapshot("users/a", "A"), snapshot("users/b", "B")];
        let current = vec![snapshot("users/b", "B2"), snapshot("users/c", "C")];
        let changes = compute_doc_changes(&previous, &current);
        let summary: Vec<_> = changes
            .iter()
            .map(|change| (change.kind(), change.document().id().to_string()))
            .collect();
        assert_eq!(
            summary,
            vec![
                (DocumentChangeType::Removed, "a".to_string()),
                (DocumentChangeType::Modified, "b".to_string()),
                (DocumentChangeType::Added, "c".to_string()),
            ]
        );
    }

    #[test]
    fn unchanged_documents_produce_no_change() {
        let docs = vec![snapshot("users/a", "A")];
        assert!(compute_doc_changes(&docs, &docs).is_empty());
    }
}
