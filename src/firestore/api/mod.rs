pub mod operations;
pub mod query;
pub mod snapshot;
pub mod write_batch;

pub use operations::{FieldTransform, TransformOperation};
pub use query::{FieldFilter, FilterOperator, OrderBy, OrderDirection, Query};
pub use snapshot::{DocumentChange, DocumentChangeType, DocumentSnapshot, QuerySnapshot};
pub use write_batch::WriteBatch;
