//! # Configuration
//!
//! Tuning knobs for the buffer engine.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{Error, Result};

/// Buffer engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BufferConfig {
    /// Ceiling on pool-outstanding chunk capacity.
    pub max_buffer_size: usize,
    /// Capacity of the first chunk allocated for a tag.
    pub chunk_initial_size: usize,
    /// Growth factor applied when a chunk must be replaced by a larger one.
    pub chunk_expand_ratio: f64,
    /// A chunk whose write position passes this is sealed for flushing.
    pub chunk_retention_size: usize,
    /// A chunk older than this is sealed by the next sweep.
    pub chunk_retention_time: Duration,
    /// Directory for persisting unflushed chunks on close. `None` disables
    /// persistence.
    pub file_backup_dir: Option<PathBuf>,
    /// Extra filename prefix for backup files, mainly for testing.
    pub file_backup_prefix: Option<String>,
    /// `true` stores chunks on the heap, `false` in anonymous mappings
    /// outside it.
    pub heap_buffer_mode: bool,
    /// Bound of the primary flush queue, in chunks.
    pub flush_queue_capacity: usize,
    /// How long a sealing thread may wait for flush-queue space.
    pub enqueue_timeout: Duration,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            max_buffer_size: 512 * 1024 * 1024, // 512MB
            chunk_initial_size: 1024 * 1024,    // 1MB
            chunk_expand_ratio: 2.0,
            chunk_retention_size: 4 * 1024 * 1024, // 4MB
            chunk_retention_time: Duration::from_millis(1000),
            file_backup_dir: None,
            file_backup_prefix: None,
            heap_buffer_mode: false,
            flush_queue_capacity: 1024,
            enqueue_timeout: Duration::from_secs(3),
        }
    }
}

impl BufferConfig {
    pub fn validate(&self) -> Result<()> {
        if self.chunk_expand_ratio <= 1.0 {
            return Err(Error::InvalidArgument {
                message: format!(
                    "chunk_expand_ratio must be greater than 1.0, got {}",
                    self.chunk_expand_ratio
                ),
            });
        }
        if self.chunk_initial_size == 0 {
            return Err(Error::InvalidArgument {
                message: "chunk_initial_size must be non-zero".to_string(),
            });
        }
        if self.flush_queue_capacity == 0 {
            return Err(Error::InvalidArgument {
                message: "flush_queue_capacity must be non-zero".to_string(),
            });
        }
        if self.chunk_initial_size > self.chunk_retention_size {
            tracing::warn!(
                chunk_initial_size = self.chunk_initial_size,
                chunk_retention_size = self.chunk_retention_size,
                "chunk_initial_size shouldn't be more than chunk_retention_size for better performance"
            );
        }
        Ok(())
    }
}
