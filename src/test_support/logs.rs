use std::sync::{Arc, LazyLock, Mutex};

use crate::logger::LogLevel;
use crate::odm::logger::set_odm_log_handler;

#[derive(Clone, Debug)]
pub struct CapturedLog {
    pub level: LogLevel,
    pub message: String,
}

static CAPTURED: LazyLock<Arc<Mutex<Vec<CapturedLog>>>> = LazyLock::new(|| {
    let records = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&records);
    set_odm_log_handler(move |level, message| {
        sink.lock().unwrap().push(CapturedLog { level, message });
    });
    records
});

/// Starts capturing ODM diagnostics; returns every record mentioning `needle`.
///
/// Tests run concurrently, so callers should filter on something unique to
/// them such as a document id.
pub fn captured_logs(needle: &str) -> Vec<CapturedLog> {
    CAPTURED
        .lock()
        .unwrap()
        .iter()
        .filter(|record| record.message.contains(needle))
        .cloned()
        .collect()
}

pub fn start_capture() {
    LazyLock::force(&CAPTURED);
}
