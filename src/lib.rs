#![doc = include_str!("RUSTDOC.md")]

pub mod firestore;
pub mod logger;
pub mod odm;
pub mod platform;
pub mod util;

#[cfg(test)]
pub mod test_support;
