//! Document-store boundary: values, paths, queries and the `Datastore` trait.

pub mod api;
pub mod constants;
pub mod error;
pub mod model;
mod query_evaluator;
pub mod remote;
pub mod value;

pub use api::{
    DocumentChange, DocumentChangeType, DocumentSnapshot, FilterOperator, OrderDirection, Query,
    QuerySnapshot, WriteBatch,
};
pub use error::{FirestoreError, FirestoreErrorCode, FirestoreResult};
pub use model::{DocumentKey, FieldPath, ResourcePath};
pub use remote::{Datastore, InMemoryDatastore, ListenerRegistration, WriteOperation};
pub use value::{FirestoreValue, ValueKind};
