//! # Metrics
//!
//! Lightweight counters for monitoring the buffer engine.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Metrics collector
#[derive(Clone, Default, Debug)]
pub struct Metrics {
    inner: Arc<MetricsInner>,
}

#[derive(Default, Debug)]
struct MetricsInner {
    // Append path
    records_appended: AtomicU64,
    bytes_appended: AtomicU64,
    encode_errors: AtomicU64,

    // Chunk lifecycle
    chunks_sealed: AtomicU64,
    chunks_flushed: AtomicU64,
    bytes_flushed: AtomicU64,
    flush_errors: AtomicU64,

    // Persistence
    chunks_saved: AtomicU64,
    chunks_loaded: AtomicU64,
    replay_errors: AtomicU64,
}

impl Metrics {
    /// Create new metrics collector
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_append(&self, bytes: u64) {
        self.inner.records_appended.fetch_add(1, Ordering::Relaxed);
        self.inner.bytes_appended.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn record_encode_error(&self) {
        self.inner.encode_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_seal(&self) {
        self.inner.chunks_sealed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_flush(&self, bytes: u64) {
        self.inner.chunks_flushed.fetch_add(1, Ordering::Relaxed);
        self.inner.bytes_flushed.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn record_flush_error(&self) {
        self.inner.flush_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_save(&self) {
        self.inner.chunks_saved.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_load(&self) {
        self.inner.chunks_loaded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_replay_error(&self) {
        self.inner.replay_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Get current metrics snapshot
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            records_appended: self.inner.records_appended.load(Ordering::Relaxed),
            bytes_appended: self.inner.bytes_appended.load(Ordering::Relaxed),
            encode_errors: self.inner.encode_errors.load(Ordering::Relaxed),
            chunks_sealed: self.inner.chunks_sealed.load(Ordering::Relaxed),
            chunks_flushed: self.inner.chunks_flushed.load(Ordering::Relaxed),
            bytes_flushed: self.inner.bytes_flushed.load(Ordering::Relaxed),
            flush_errors: self.inner.flush_errors.load(Ordering::Relaxed),
            chunks_saved: self.inner.chunks_saved.load(Ordering::Relaxed),
            chunks_loaded: self.inner.chunks_loaded.load(Ordering::Relaxed),
            replay_errors: self.inner.replay_errors.load(Ordering::Relaxed),
        }
    }
}

/// Metrics snapshot
#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    pub records_appended: u64,
    pub bytes_appended: u64,
    pub encode_errors: u64,
    pub chunks_sealed: u64,
    pub chunks_flushed: u64,
    pub bytes_flushed: u64,
    pub flush_errors: u64,
    pub chunks_saved: u64,
    pub chunks_loaded: u64,
    pub replay_errors: u64,
}
