pub mod datastore;

pub use datastore::{Datastore, InMemoryDatastore, ListenerRegistration, WriteOperation};
