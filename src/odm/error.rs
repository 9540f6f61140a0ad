use std::error::Error;
use std::fmt::{Display, Formatter};

use crate::firestore::error::FirestoreError;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum OdmErrorCode {
    IndexOutOfBounds,
    ParentNotFetched,
    TrackerNotAttached,
    UnsupportedOperation,
    RemoteOperationFailure,
    CollectionNotFound,
    InvalidArgument,
    ListenerState,
    Released,
}

impl OdmErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            OdmErrorCode::IndexOutOfBounds => "odm/index-out-of-bounds",
            OdmErrorCode::ParentNotFetched => "odm/parent-not-fetched",
            OdmErrorCode::TrackerNotAttached => "odm/tracker-not-attached",
            OdmErrorCode::UnsupportedOperation => "odm/unsupported-operation",
            OdmErrorCode::RemoteOperationFailure => "odm/remote-operation-failure",
            OdmErrorCode::CollectionNotFound => "odm/collection-not-found",
            OdmErrorCode::InvalidArgument => "odm/invalid-argument",
            OdmErrorCode::ListenerState => "odm/listener-state",
            OdmErrorCode::Released => "odm/released",
        }
    }
}

/// Error surfaced by collection, document, tracker and array operations.
///
/// Store failures keep the original [`FirestoreError`], reachable through
/// [`OdmError::remote`] and [`Error::source`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OdmError {
    pub code: OdmErrorCode,
    message: String,
    remote: Option<FirestoreError>,
}

impl OdmError {
    pub fn new(code: OdmErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            remote: None,
        }
    }

    pub fn code_str(&self) -> &'static str {
        self.code.as_str()
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn remote(&self) -> Option<&FirestoreError> {
        self.remote.as_ref()
    }
}

impl Display for OdmError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.message, self.code_str())
    }
}

impl Error for OdmError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        self.remote.as_ref().map(|err| err as &(dyn Error + 'static))
    }
}

impl From<FirestoreError> for OdmError {
    fn from(err: FirestoreError) -> Self {
        Self {
            code: OdmErrorCode::RemoteOperationFailure,
            message: err.message().to_owned(),
            remote: Some(err),
        }
    }
}

pub type OdmResult<T> = Result<T, OdmError>;

pub fn index_out_of_bounds(index: usize, len: usize) -> OdmError {
    OdmError::new(
        OdmErrorCode::IndexOutOfBounds,
        format!("Index {index} out of bounds for reference array of length {len}"),
    )
}

pub fn parent_not_fetched(field: &str) -> OdmError {
    OdmError::new(
        OdmErrorCode::ParentNotFetched,
        format!("Fetch the owning document before reading reference array '{field}'"),
    )
}

pub fn tracker_not_attached() -> OdmError {
    OdmError::new(
        OdmErrorCode::TrackerNotAttached,
        "Reference array is not attached to a tracker; changes stay local",
    )
}

pub fn unsupported_operation(message: impl Into<String>) -> OdmError {
    OdmError::new(OdmErrorCode::UnsupportedOperation, message)
}

pub fn collection_not_found(path: &str) -> OdmError {
    OdmError::new(
        OdmErrorCode::CollectionNotFound,
        format!("No collection registered at '{path}'"),
    )
}

pub fn invalid_argument(message: impl Into<String>) -> OdmError {
    OdmError::new(OdmErrorCode::InvalidArgument, message)
}

pub fn listener_state(message: impl Into<String>) -> OdmError {
    OdmError::new(OdmErrorCode::ListenerState, message)
}

pub fn released(what: &str) -> OdmError {
    OdmError::new(
        OdmErrorCode::Released,
        format!("{what} was released together with its database"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::firestore::error::not_found;

    #[test]
    fn remote_failures_keep_store_error() {
        let err: OdmError = not_found("No document to update: users/a").into();
        assert_eq!(err.code, OdmErrorCode::RemoteOperationFailure);
        assert_eq!(err.remote().unwrap().code_str(), "firestore/not-found");
        assert!(err.source().is_some());
        assert_eq!(
            err.to_string(),
            "No document to update: users/a (odm/remote-operation-failure)"
        );
    }

    #[test]
    fn local_errors_have_no_source() {
        let err = index_out_of_bounds(3, 2);
        assert_eq!(err.code_str(), "odm/index-out-of-bounds");
        assert!(err.source().is_none());
    }
}
