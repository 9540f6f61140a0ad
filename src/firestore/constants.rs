/// Maximum number of values accepted by `in`, `not-in` and `array-contains-any` filters.
pub const MAX_IN_FILTER_VALUES: usize = 10;

/// Maximum number of writes a single batch may carry.
pub const MAX_BATCH_WRITES: usize = 500;
