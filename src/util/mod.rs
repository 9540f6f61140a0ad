pub mod subscribe;

pub use subscribe::{ErrorFn, NextFn, PartialObserver, Unsubscribe};
