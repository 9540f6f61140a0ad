use crate::firestore::constants::MAX_IN_FILTER_VALUES;

pub const ODM_LOGGER_NAME: &str = "@flashstore/odm";

/// Hydration queries use an id `in` filter, so a chunk can hold at most this many ids.
pub const DEFAULT_HYDRATION_CHUNK_SIZE: usize = MAX_IN_FILTER_VALUES;
