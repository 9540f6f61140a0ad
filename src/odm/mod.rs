#![doc = include_str!("README.md")]
mod array_tracker;
mod collection;
pub mod constants;
mod data;
mod database;
mod document;
mod error;
mod events;
pub mod logger;
mod reference;
mod reference_array;
mod schema;
mod settings;


#[doc(inline)]
pub use array_tracker::ArrayTracker;

#[doc(inline)]
pub use collection::CollectionHandle;

#[doc(inline)]
pub use data::{DocumentData, FieldValue};

#[doc(inline)]
pub use database::{Database, DatabaseBuilder};

#[doc(inline)]
pub use document::{DocumentHandle, Existence};

#[doc(inline)]
pub use error::{
    collection_not_found, index_out_of_bounds, invalid_argument, listener_state,
    parent_not_fetched, released, tracker_not_attached, unsupported_operation, OdmError,
    OdmErrorCode, OdmResult,
};

#[doc(inline)]
pub use events::{OnArrayChanged, OnCollectionChanged, OnValueChanged, Subscription};

#[doc(inline)]
pub use reference::ReferenceTracker;

#[doc(inline)]
pub use reference_array::ReferenceArray;

#[doc(inline)]
pub use schema::{CollectionSchema, FieldKind};

#[doc(inline)]
pub use settings::OdmSettings;
