//! Progress of a multipart upload, polled by the client while it runs.

use std::time::{Duration, Instant};

use serde_json::{Value, json};

/// Finished uploads may be discarded after this much inactivity.
pub const DISPOSE_AFTER: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
pub struct UploadStatus {
    current: u64,
    total: u64,
    items_read: u32,
    error: Option<String>,
    last_modified: Instant,
}

impl Default for UploadStatus {
    fn default() -> Self {
        Self::new()
    }
}

impl UploadStatus {
    pub fn new() -> Self {
        Self {
            current: 0,
            total: 0,
            items_read: 0,
            error: None,
            last_modified: Instant::now(),
        }
    }

    pub fn update(&mut self, bytes_read: u64, total: u64, items_read: u32) {
        self.current = bytes_read;
        self.total = total;
        self.items_read = items_read;
        self.last_modified = Instant::now();
    }

    pub fn set_error(&mut self, error: impl Into<String>) {
        self.error = Some(error.into());
        self.last_modified = Instant::now();
    }

    pub fn current(&self) -> u64 {
        self.current
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    pub fn items_read(&self) -> u32 {
        self.items_read
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn is_disposable(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.last_modified) > DISPOSE_AFTER
    }

    pub fn to_json(&self) -> Value {
        json!({
            "current": self.current,
            "total": self.total,
            "itemsRead": self.items_read,
            "error": self.error,
        })
    }
}
