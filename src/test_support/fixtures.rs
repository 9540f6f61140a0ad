use std::sync::Arc;

use crate::odm::{CollectionSchema, Database, OdmSettings};

use super::RecordingDatastore;

/// Villages with a mayor, a member list and nested wells; users point back at their village.
pub fn sample_database(datastore: &RecordingDatastore) -> Database {
    sample_database_with(datastore, OdmSettings::default())
}

pub fn sample_database_with(datastore: &RecordingDatastore, settings: OdmSettings) -> Database {
    let wells = CollectionSchema::new("Well")
        .field("depth")
        .reference("keeper", "users");
    let villages = CollectionSchema::new("Village")
        .field("name")
        .field("population")
        .reference("mayor", "users")
        .reference_array("members", "users")
        .collection("wells", wells);
    let users = CollectionSchema::new("User")
        .field("name")
        .reference("village", "villages");

    Database::builder(Arc::new(datastore.clone()))
        .collection("villages", villages)
        .collection("users", users)
        .with_settings(settings)
        .build()
        .expect("sample schema is valid")
}

/// Lets detached tasks spawned on the current-thread test runtime run to completion.
pub async fn settle() {
    for _ in 0..16 {
        tokio::task::yield_now().await;
    }
}
