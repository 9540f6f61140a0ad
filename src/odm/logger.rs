//! Diagnostics of the ODM layer, reported under the `@flashstore/odm` name.
//!
//! Broken references, detached arrays and dropped background writes are never
//! raised to the caller. They only surface here.

use std::sync::LazyLock;

use crate::logger::{IntoLogLevel, LogArgument, LogError, LogLevel, Logger};

use super::constants::ODM_LOGGER_NAME;

pub static LOGGER: LazyLock<Logger> = LazyLock::new(|| Logger::new(ODM_LOGGER_NAME));

/// Changes the verbosity of ODM diagnostics without touching other loggers.
pub fn set_odm_log_level<L>(level: L) -> Result<(), LogError>
where
    L: IntoLogLevel,
{
    LOGGER.set_log_level(level)
}

/// Routes ODM diagnostics to `handler` as `(level, message)` pairs.
pub fn set_odm_log_handler<F>(handler: F)
where
    F: Fn(LogLevel, String) + Send + Sync + 'static,
{
    LOGGER.set_log_handler(move |_logger, level, args| {
        let message = args
            .iter()
            .filter_map(LogArgument::to_message_fragment)
            .collect::<Vec<_>>()
            .join(" ");
        handler(level, message);
    });
}

