use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::firestore::api::operations;
use crate::firestore::constants::MAX_BATCH_WRITES;
use crate::firestore::error::{resource_exhausted, FirestoreResult};
use crate::firestore::model::DocumentKey;
use crate::firestore::remote::datastore::{Datastore, WriteOperation};
use crate::firestore::value::FirestoreValue;

/// Aggregates write operations and commits them atomically.
#[derive(Clone)]
pub struct WriteBatch {
    datastore: Arc<dyn Datastore>,
    writes: Vec<WriteOperation>,
}

impl WriteBatch {
    pub fn new(datastore: Arc<dyn Datastore>) -> Self {
        Self {
            datastore,
            writes: Vec::new(),
        }
    }

    /// Adds a set operation replacing the whole document.
    pub fn set(
        &mut self,
        key: &DocumentKey,
        data: BTreeMap<String, FirestoreValue>,
    ) -> FirestoreResult<&mut Self> {
        self.ensure_capacity()?;
        let encoded = operations::encode_set_data(data)?;
        self.writes.push(WriteOperation::Set {
            key: key.clone(),
            data: encoded.map,
            transforms: encoded.transforms,
        });
        Ok(self)
    }

    /// Adds an update operation. The commit fails if the document does not exist.
    pub fn update(
        &mut self,
        key: &DocumentKey,
        data: BTreeMap<String, FirestoreValue>,
    ) -> FirestoreResult<&mut Self> {
        self.ensure_capacity()?;
        let encoded = operations::encode_update_document_data(data)?;
        self.writes.push(WriteOperation::Update {
            key: key.clone(),
            data: encoded.map,
            field_paths: encoded.field_paths,
            transforms: encoded.transforms,
        });
        Ok(self)
    }

    pub fn delete(&mut self, key: &DocumentKey) -> FirestoreResult<&mut Self> {
        self.ensure_capacity()?;
        self.writes.push(WriteOperation::Delete { key: key.clone() });
        Ok(self)
    }

    pub fn len(&self) -> usize {
        self.writes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }

    /// Commits all queued writes atomically.
    pub async fn commit(self) -> FirestoreResult<()> {
        self.datastore.commit(self.writes).await
    }

    fn ensure_capacity(&self) -> FirestoreResult<()> {
        if self.writes.len() >= MAX_BATCH_WRITES {
            return Err(resource_exhausted(format!(
                "WriteBatch cannot contain more than {MAX_BATCH_WRITES} operations"
            )));
        }
        Ok(())
    }
}

impl fmt::Debug for WriteBatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WriteBatch")
            .field("writes", &self.writes.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::firestore::remote::datastore::InMemoryDatastore;

    #[tokio::test]
    async fn commit_applies_all_writes() {
        let datastore = InMemoryDatastore::new();
        let mut batch = WriteBatch::new(Arc::new(datastore.clone()));
        let first = DocumentKey::from_string("wells/w1").unwrap();
        let second = DocumentKey::from_string("wells/w2").unwrap();
        batch
            .set(&first, BTreeMap::from([("depth".into(), FirestoreValue::from_integer(3))]))
            .unwrap()
            .set(&second, BTreeMap::new())
            .unwrap()
            .delete(&second)
            .unwrap();
        assert_eq!(batch.len(), 3);
        batch.commit().await.unwrap();
        assert_eq!(datastore.document_count(), 1);
    }

    #[test]
    fn rejects_writes_past_capacity() {
        let mut batch = WriteBatch::new(Arc::new(InMemoryDatastore::new()));
        let key = DocumentKey::from_string("wells/w1").unwrap();
        for _ in 0..MAX_BATCH_WRITES {
            batch.delete(&key).unwrap();
        }
        let err = batch.delete(&key).unwrap_err();
        assert_eq!(err.code_str(), "firestore/resource-exhausted");
    }
}
