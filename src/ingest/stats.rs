use std::sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    Mutex,
};

#[derive(Debug, Default)]
pub struct IngestStats {
    pub readings_accepted: AtomicU64,
    pub readings_dropped: AtomicU64,
    pub store_errors: AtomicU64,
    pub windows_restarted: AtomicU64,
    pub last_reading_unix_ms: AtomicU64,
    pub mqtt_connected: AtomicBool,
    pub last_error: Mutex<Option<String>>,
}

/// Point-in-time copy of [`IngestStats`] for the periodic health line.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestSummary {
    pub readings_accepted: u64,
    pub readings_dropped: u64,
    pub store_errors: u64,
    pub windows_restarted: u64,
    pub last_reading_unix_ms: Option<u64>,
    pub mqtt_connected: bool,
    pub last_error: Option<String>,
}

impl IngestStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_mqtt_connected(&self, connected: bool) {
        self.mqtt_connected.store(connected, Ordering::Relaxed);
    }

    pub fn record_accepted(&self, unix_ms: i64) {
        self.readings_accepted.fetch_add(1, Ordering::Relaxed);
        self.last_reading_unix_ms
            .store(unix_ms.max(0) as u64, Ordering::Relaxed);
    }

    pub fn record_dropped(&self) {
        self.readings_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_window_restart(&self) {
        self.windows_restarted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_store_error(&self, err: impl Into<String>) {
        self.store_errors.fetch_add(1, Ordering::Relaxed);
        self.record_error(err);
    }

    pub fn record_error(&self, err: impl Into<String>) {
        if let Ok(mut guard) = self.last_error.lock() {
            *guard = Some(err.into());
        }
    }

    pub fn clear_error(&self) {
        if let Ok(mut guard) = self.last_error.lock() {
            *guard = None;
        }
    }

    pub fn last_error(&self) -> Option<String> {
        self.last_error.lock().ok().and_then(|guard| guard.clone())
    }

    pub fn summary(&self) -> IngestSummary {
        let last_reading = self.last_reading_unix_ms.load(Ordering::Relaxed);
        IngestSummary {
            readings_accepted: self.readings_accepted.load(Ordering::Relaxed),
            readings_dropped: self.readings_dropped.load(Ordering::Relaxed),
            store_errors: self.store_errors.load(Ordering::Relaxed),
            windows_restarted: self.windows_restarted.load(Ordering::Relaxed),
            last_reading_unix_ms: (last_reading > 0).then_some(last_reading),
            mqtt_connected: self.mqtt_connected.load(Ordering::Relaxed),
            last_error: self.last_error(),
        }
    }

    pub fn log_summary(&self) {
        let summary = self.summary();
        tracing::info!(
            accepted = summary.readings_accepted,
            dropped = summary.readings_dropped,
            store_errors = summary.store_errors,
            windows_restarted = summary.windows_restarted,
            last_reading_unix_ms = ?summary.last_reading_unix_ms,
            mqtt_connected = summary.mqtt_connected,
            last_error = ?summary.last_error,
            "ingest summary"
        );
    }
}
