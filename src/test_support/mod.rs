//! Test utilities shared across crate-level unit tests.

pub mod datastore;
pub mod fixtures;
pub mod logs;

pub use datastore::RecordingDatastore;
pub use fixtures::{sample_database, sample_database_with, settle};
pub use logs::{captured_logs, start_capture, CapturedLog};
