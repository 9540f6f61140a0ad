pub mod runtime;

pub use runtime::spawn_detached;
