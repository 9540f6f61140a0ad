//! Entry point: a set of root collections bound to one datastore.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, Weak};

use crate::firestore::api::WriteBatch;
use crate::firestore::model::ResourcePath;
use crate::firestore::remote::Datastore;

use super::collection::CollectionHandle;
use super::error::{collection_not_found, invalid_argument, released, OdmResult};
use super::logger::LOGGER;
use super::schema::CollectionSchema;
use super::settings::OdmSettings;

/// Shared by every collection and document created under one [`Database`].
#[derive(Clone)]
pub(crate) struct OdmContext {
    pub(crate) datastore: Arc<dyn Datastore>,
    pub(crate) settings: OdmSettings,
    database: Weak<DatabaseInner>,
}

impl OdmContext {
    /// Resolves a collection path such as `villages/v1/wells` against the database.
    pub(crate) fn resolve_collection(&self, path: &str) -> OdmResult<CollectionHandle> {
        let inner = self.database.upgrade().ok_or_else(|| released("Database"))?;
        Database { inner }.collection_at(path)
    }
}

/// Typed view over a datastore.
///
/// Cloning is cheap and every clone shares the same handle caches. Dropping the
/// last clone releases all handles, trackers and listeners.
#[derive(Clone)]
pub struct Database {
    inner: Arc<DatabaseInner>,
}

pub(crate) struct DatabaseInner {
    datastore: Arc<dyn Datastore>,
    settings: OdmSettings,
    collections: Mutex<BTreeMap<String, CollectionHandle>>,
}

pub struct DatabaseBuilder {
    datastore: Arc<dyn Datastore>,
    settings: OdmSettings,
    collections: Vec<(String, CollectionSchema)>,
}

impl DatabaseBuilder {
    pub fn collection(mut self, name: impl Into<String>, schema: CollectionSchema) -> Self {
        self.collections.push((name.into(), schema));
        self
    }

    pub fn with_settings(mut self, settings: OdmSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn build(self) -> OdmResult<Database> {
        self.settings.validate()?;
        let mut schemas = BTreeMap::new();
        for (name, schema) in self.collections {
            if name.is_empty() || name.contains('/') {
                return Err(invalid_argument(format!(
                    "Invalid root collection name '{name}'"
                )));
            }
            if schemas.insert(name.clone(), Arc::new(schema)).is_some() {
                return Err(invalid_argument(format!(
                    "Collection '{name}' is registered twice"
                )));
            }
        }

        let datastore = self.datastore;
        let settings = self.settings;
        let inner = Arc::new_cyclic(|database| {
            let context = OdmContext {
                datastore: Arc::clone(&datastore),
                settings: settings.clone(),
                database: database.clone(),
            };
            let collections = schemas
                .into_iter()
                .map(|(name, schema)| {
                    let path = ResourcePath::from_segments([name.as_str()]);
                    (name, CollectionHandle::new(path, schema, context.clone()))
                })
                .collect();
            DatabaseInner {
                datastore,
                settings,
                collections: Mutex::new(collections),
            }
        });
        LOGGER.debug(format!(
            "Database ready with {} root collection(s)",
            inner.collections.lock().unwrap().len()
        ));
        Ok(Database { inner })
    }
}

impl Database {
    pub fn builder(datastore: Arc<dyn Datastore>) -> DatabaseBuilder {
        DatabaseBuilder {
            datastore,
            settings: OdmSettings::default(),
            collections: Vec::new(),
        }
    }

    /// Root collection registered under `name`.
    pub fn collection(&self, name: &str) -> OdmResult<CollectionHandle> {
        self.inner
            .collections
            .lock()
            .unwrap()
            .get(name)
            .cloned()
            .ok_or_else(|| collection_not_found(name))
    }

    /// Resolves a root or nested collection path, e.g. `villages/v1/wells`.
    pub fn collection_at(&self, path: &str) -> OdmResult<CollectionHandle> {
        let segments: Vec<&str> = path.split('/').collect();
        if segments.iter().any(|segment| segment.is_empty()) || segments.len() % 2 == 0 {
            return Err(collection_not_found(path));
        }
        let mut collection = self
            .collection(segments[0])
            .map_err(|_| collection_not_found(path))?;
        for pair in segments[1..].chunks(2) {
            let document = collection.document(pair[0])?;
            collection = document
                .collection(pair[1])
                .map_err(|_| collection_not_found(path))?;
        }
        Ok(collection)
    }

    pub fn collection_names(&self) -> Vec<String> {
        self.inner.collections.lock().unwrap().keys().cloned().collect()
    }

    pub fn batch(&self) -> WriteBatch {
        WriteBatch::new(Arc::clone(&self.inner.datastore))
    }

    pub fn settings(&self) -> &OdmSettings {
        &self.inner.settings
    }

    pub fn datastore(&self) -> &Arc<dyn Datastore> {
        &self.inner.datastore
    }
}

impl Drop for DatabaseInner {
    fn drop(&mut self) {
        let collections = match self.collections.get_mut() {
            Ok(collections) => std::mem::take(collections),
            Err(poisoned) => std::mem::take(poisoned.into_inner()),
        };
        for collection in collections.values() {
            collection.release();
        }
        LOGGER.debug(format!(
            "Database released {} root collection(s)",
            collections.len()
        ));
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("collections", &self.collection_names())
            .field("settings", &self.inner.settings)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::firestore::remote::InMemoryDatastore;

    fn datastore() -> Arc<dyn Datastore> {
        Arc::new(InMemoryDatastore::new())
    }

    #[test]
    fn rejects_duplicate_collections() {
        let err = Database::builder(datastore())
            .collection("users", CollectionSchema::new("User"))
            .collection("users", CollectionSchema::new("User"))
            .build()
            .unwrap_err();
        assert_eq!(err.code_str(), "odm/invalid-argument");
    }

    #[test]
    fn rejects_invalid_settings() {
        let err = Database::builder(datastore())
            .with_settings(OdmSettings::default().with_hydration_chunk_size(0))
            .build()
            .unwrap_err();
        assert_eq!(err.code_str(), "odm/invalid-argument");
    }

    #[test]
    fn resolves_nested_collections() {
        let database = Database::builder(datastore())
            .collection(
                "villages",
                CollectionSchema::new("Village").collection("wells", CollectionSchema::new("Well")),
            )
            .build()
            .unwrap();

        let wells = database.collection_at("villages/v1/wells").unwrap();
        assert_eq!(wells.path().canonical_string(), "villages/v1/wells");
        assert_eq!(wells.name(), "wells");

        let again = database.collection_at("villages/v1/wells").unwrap();
        assert_eq!(wells, again);

        for path in ["villages/v1", "wells", "villages//wells", "villages/v1/pumps"] {
            let err = database.collection_at(path).unwrap_err();
            assert_eq!(err.code_str(), "odm/collection-not-found", "{path}");
        }
    }
}
