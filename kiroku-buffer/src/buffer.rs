//! The buffer facade: append, seal, flush, persist.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                         Write Path                           │
//! │                                                              │
//! │  append(tag, ts, record) ──► encode ──► retention chunk      │
//! │                                            │ size/age        │
//! │                                            ▼                 │
//! │                                       flush queue ──► transporter
//! │                                            │ on close        │
//! │                                            ▼                 │
//! │                                       backup files           │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! One mutex guards the retention map and every chunk it references; a
//! sealed chunk belongs to the queue that holds it. The transporter is
//! always invoked with the retention mutex released.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, error, info, trace, warn};

use kiroku_core::{
    config::BufferConfig,
    error::{Error, Result},
    metrics::Metrics,
    time::{now_millis, Timestamp},
};

use crate::backup::FileBackup;
use crate::chunk::{RetentionChunk, TaggedChunk};
use crate::pool::BufferPool;
use crate::queue::{BackupQueue, FlushQueue};
use crate::record::{RecordEncoder, RecordMap};
use crate::transport::Transporter;

type RetentionMap = HashMap<String, Option<RetentionChunk>>;

/// Tag-partitioned, chunked event buffer.
///
/// Appenders may call [`append`](Buffer::append) from many threads while
/// a single flusher drives [`flush`](Buffer::flush);
/// [`close`](Buffer::close) expects appenders to have quiesced.
#[derive(Debug)]
pub struct Buffer {
    config: BufferConfig,
    pool: BufferPool,
    retention: Mutex<RetentionMap>,
    flush_queue: FlushQueue,
    backup_queue: BackupQueue,
    file_backup: Option<FileBackup>,
    encoder: RecordEncoder,
    metrics: Arc<Metrics>,
    flush_cancelled: AtomicBool,
}

impl Buffer {
    pub fn new(config: BufferConfig) -> Result<Self> {
        Self::with_encoder(config, RecordEncoder::default())
    }

    /// Build a buffer with a caller-supplied encoder (typically one
    /// carrying [`EncoderModule`](crate::record::EncoderModule) plugins).
    pub fn with_encoder(config: BufferConfig, encoder: RecordEncoder) -> Result<Self> {
        config.validate()?;

        let file_backup = match &config.file_backup_dir {
            Some(dir) => Some(FileBackup::new(dir, config.file_backup_prefix.as_deref())?),
            None => None,
        };

        Ok(Self {
            pool: BufferPool::new(config.max_buffer_size, config.heap_buffer_mode),
            retention: Mutex::new(HashMap::new()),
            flush_queue: FlushQueue::new(config.flush_queue_capacity),
            backup_queue: BackupQueue::new(),
            file_backup,
            encoder,
            metrics: Arc::new(Metrics::new()),
            flush_cancelled: AtomicBool::new(false),
            config,
        })
    }

    /// Reload chunks persisted by a previous instance. Each replayed file
    /// is removed; a file that fails to replay is logged and left alone
    /// so it never blocks startup.
    pub fn init(&self) {
        let Some(backup) = &self.file_backup else {
            return;
        };
        for saved in backup.saved_files() {
            let result = saved.open(|params, bytes| {
                let [tag] = params else {
                    return Err(Error::InvalidArgument {
                        message: format!("expected a single tag param, got {:?}", params),
                    });
                };
                info!(tag = %tag, bytes = bytes.len(), "loading saved chunk");
                self.load_into_retention(tag, bytes)
            });
            match result {
                Ok(()) => {
                    self.metrics.record_load();
                    saved.remove();
                }
                Err(e) => {
                    self.metrics.record_replay_error();
                    error!(path = ?saved.path(), error = %e, "failed to replay saved chunk");
                }
            }
        }
    }

    /// Append one record under `tag`.
    pub fn append(
        &self,
        tag: &str,
        timestamp: impl Into<Timestamp>,
        record: &RecordMap,
    ) -> Result<()> {
        let encoded = self
            .encoder
            .encode_entry(timestamp.into(), record)
            .map_err(|e| {
                self.metrics.record_encode_error();
                e
            })?;
        self.append_bytes(tag, &encoded)
    }

    /// Append a record whose map is already MessagePack-encoded.
    pub fn append_encoded(
        &self,
        tag: &str,
        timestamp: impl Into<Timestamp>,
        map_bytes: &[u8],
    ) -> Result<()> {
        let encoded = self
            .encoder
            .encode_entry_raw(timestamp.into(), map_bytes)
            .map_err(|e| {
                self.metrics.record_encode_error();
                e
            })?;
        self.append_bytes(tag, &encoded)
    }

    fn append_bytes(&self, tag: &str, bytes: &[u8]) -> Result<()> {
        self.load_into_retention(tag, bytes)?;
        self.metrics.record_append(bytes.len() as u64);
        Ok(())
    }

    fn load_into_retention(&self, tag: &str, bytes: &[u8]) -> Result<()> {
        let mut retention = self.retention.lock();
        let slot = retention.entry(tag.to_string()).or_insert(None);
        let chunk = self.prepare_chunk(slot, bytes.len())?;
        chunk.write(bytes);
        if chunk.position() > self.config.chunk_retention_size {
            self.seal_slot(tag, slot)?;
        }
        Ok(())
    }

    /// Ensure the slot holds a chunk with room for `write_size` more
    /// bytes, growing through the expand ratio as needed. The existing
    /// chunk is untouched unless the replacement region was acquired.
    fn prepare_chunk<'a>(
        &self,
        slot: &'a mut Option<RetentionChunk>,
        write_size: usize,
    ) -> Result<&'a mut RetentionChunk> {
        let ratio = self.config.chunk_expand_ratio;
        let chunk = match slot.take() {
            Some(chunk) if chunk.remaining() >= write_size => chunk,
            Some(chunk) => {
                let mut target = scaled(chunk.capacity(), ratio);
                while target < chunk.position() + write_size {
                    target = scaled(target, ratio);
                }
                match self.acquire(target) {
                    Ok(storage) => {
                        let (grown, old_storage) = chunk.grow_into(storage);
                        self.pool.release(old_storage);
                        trace!(capacity = grown.capacity(), "grew retention chunk");
                        grown
                    }
                    Err(e) => {
                        *slot = Some(chunk);
                        return Err(e);
                    }
                }
            }
            None => {
                let mut target = self.config.chunk_initial_size;
                while target < write_size {
                    target = scaled(target, ratio);
                }
                let storage = self.acquire(target)?;
                trace!(capacity = target, "allocated retention chunk");
                RetentionChunk::new(storage)
            }
        };
        Ok(slot.insert(chunk))
    }

    fn acquire(&self, size: usize) -> Result<crate::pool::ChunkStorage> {
        self.pool.acquire(size).ok_or(Error::BufferFull {
            requested: size,
            allocated: self.pool.allocated_size(),
            max: self.config.max_buffer_size,
        })
    }

    /// Seal the slot's chunk and hand it to the flush queue. The map
    /// entry stays occupied until the hand-off succeeds.
    fn seal_slot(&self, tag: &str, slot: &mut Option<RetentionChunk>) -> Result<()> {
        let Some(chunk) = slot.take() else {
            return Ok(());
        };
        trace!(tag, bytes = chunk.position(), "sealing retention chunk");
        let sealed = chunk.seal(tag.to_string());
        match self.flush_queue.put(sealed, self.config.enqueue_timeout) {
            Ok(()) => {
                self.metrics.record_seal();
                Ok(())
            }
            Err(refused) => {
                *slot = Some(refused.unseal());
                Err(Error::Cancelled {
                    message: format!("timed out handing chunk for tag {} to the flush queue", tag),
                })
            }
        }
    }

    /// Seal expired chunks, or every non-empty chunk when `force` is set.
    fn sweep_retention(&self, force: bool) -> Result<()> {
        let expired_before =
            now_millis().saturating_sub(self.config.chunk_retention_time.as_millis() as u64);
        let mut retention = self.retention.lock();
        for (tag, slot) in retention.iter_mut() {
            let due = match slot.as_ref() {
                Some(chunk) => {
                    chunk.position() > 0
                        && (force || chunk.created_at_millis() < expired_before)
                }
                None => false,
            };
            if due {
                self.seal_slot(tag, slot)?;
            }
        }
        Ok(())
    }

    /// Drive sealed chunks through `transporter`.
    ///
    /// A transport failure re-enqueues the chunk (primary queue, else
    /// backup) and propagates; the rest of the queue stays intact for the
    /// next flush. The loop also stops between chunks once
    /// [`cancel_flush`](Buffer::cancel_flush) has been called.
    pub fn flush(&self, transporter: &mut dyn Transporter, force: bool) -> Result<()> {
        trace!(force, usage = self.buffer_usage(), "flush");
        self.sweep_retention(force)?;

        while !self.flush_cancelled.load(Ordering::Relaxed) {
            let Some(chunk) = self.flush_queue.poll() else {
                break;
            };
            trace!(tag = chunk.tag(), bytes = chunk.len(), "transporting sealed chunk");
            match transporter.transport(chunk.tag(), chunk.bytes()) {
                Ok(()) => {
                    self.metrics.record_flush(chunk.len() as u64);
                    self.pool.release(chunk.into_storage());
                }
                Err(e) => {
                    self.metrics.record_flush_error();
                    warn!(tag = chunk.tag(), error = %e, "transport failed, keeping chunk");
                    if let Err(kept) = self.flush_queue.put(chunk, self.config.enqueue_timeout) {
                        warn!(
                            tag = kept.tag(),
                            "flush queue refused the kept chunk, moving it to the backup queue"
                        );
                        self.backup_queue.push(kept);
                    }
                    return Err(e);
                }
            }
        }
        Ok(())
    }

    /// Ask the flush loop to stop at the next chunk boundary.
    pub fn cancel_flush(&self) {
        self.flush_cancelled.store(true, Ordering::Relaxed);
    }

    pub fn reset_flush_cancellation(&self) {
        self.flush_cancelled.store(false, Ordering::Relaxed);
    }

    /// Persist everything still buffered, then drop all chunk memory.
    /// Per-chunk save failures are logged; close always completes.
    pub fn close(&self) -> Result<()> {
        debug!("saving all buffered chunks");
        if let Err(e) = self.save_all() {
            warn!(error = %e, "failed to save all buffered chunks");
        }
        debug!("closing buffer");
        self.retention.lock().clear();
        self.pool.release_all();
        Ok(())
    }

    fn save_all(&self) -> Result<()> {
        let sweep_result = self.sweep_retention(true);
        if let Err(e) = &sweep_result {
            warn!(error = %e, "failed to seal every retention chunk, saving what was sealed");
        }
        while let Some(chunk) = self.flush_queue.poll() {
            self.save_chunk(chunk);
        }
        while let Some(chunk) = self.backup_queue.poll() {
            self.save_chunk(chunk);
        }
        sweep_result
    }

    fn save_chunk(&self, chunk: TaggedChunk) {
        if let Some(backup) = &self.file_backup {
            let params = [chunk.tag().to_string()];
            info!(tag = chunk.tag(), bytes = chunk.len(), "saving chunk");
            match backup.save_buffer(&params, chunk.bytes()) {
                Ok(()) => self.metrics.record_save(),
                Err(e) => {
                    error!(tag = chunk.tag(), error = %e, "failed to save chunk to backup file")
                }
            }
        }
        self.pool.release(chunk.into_storage());
    }

    /// Remove every backup file unconditionally.
    pub fn clear_backup_files(&self) {
        if let Some(backup) = &self.file_backup {
            for saved in backup.saved_files() {
                saved.remove();
            }
        }
    }

    /// Fraction of the memory ceiling currently allocated, in `[0, 1]`.
    pub fn buffer_usage(&self) -> f64 {
        self.pool.allocated_size() as f64 / self.config.max_buffer_size as f64
    }

    /// Outstanding plus pooled chunk capacity, in bytes.
    pub fn allocated_size(&self) -> usize {
        self.pool.allocated_size()
    }

    /// Bytes of buffered records: retention positions plus both queues.
    pub fn buffered_data_size(&self) -> u64 {
        let retention_bytes: u64 = self
            .retention
            .lock()
            .values()
            .filter_map(|slot| slot.as_ref())
            .map(|chunk| chunk.position() as u64)
            .sum();
        retention_bytes + self.flush_queue.queued_bytes() + self.backup_queue.queued_bytes()
    }

    pub fn max_buffer_size(&self) -> usize {
        self.config.max_buffer_size
    }

    pub fn chunk_initial_size(&self) -> usize {
        self.config.chunk_initial_size
    }

    pub fn chunk_expand_ratio(&self) -> f64 {
        self.config.chunk_expand_ratio
    }

    pub fn chunk_retention_size(&self) -> usize {
        self.config.chunk_retention_size
    }

    pub fn chunk_retention_time(&self) -> std::time::Duration {
        self.config.chunk_retention_time
    }

    pub fn heap_buffer_mode(&self) -> bool {
        self.pool.heap_mode()
    }

    pub fn metrics(&self) -> Arc<Metrics> {
        Arc::clone(&self.metrics)
    }
}

fn scaled(capacity: usize, ratio: f64) -> usize {
    ((capacity as f64 * ratio) as usize).max(capacity + 1)
}
