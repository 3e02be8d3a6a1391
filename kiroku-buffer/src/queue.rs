//! Hand-off queues for sealed chunks.
//!
//! The primary flush queue is bounded so a slow transporter backpressures
//! the sealers. The backup queue is unbounded and takes chunks only when
//! a re-enqueue on the primary is refused; `close` drains both.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crossbeam::channel::{bounded, Receiver, Sender};
use crossbeam::queue::SegQueue;

use crate::chunk::TaggedChunk;

/// Bounded FIFO of sealed chunks awaiting transport.
///
/// A byte counter shadows the channel contents so buffered-size queries
/// don't have to drain it.
#[derive(Debug)]
pub struct FlushQueue {
    tx: Sender<TaggedChunk>,
    rx: Receiver<TaggedChunk>,
    queued_bytes: AtomicU64,
}

impl FlushQueue {
    pub fn new(capacity: usize) -> Self {
        let (tx, rx) = bounded(capacity);
        Self {
            tx,
            rx,
            queued_bytes: AtomicU64::new(0),
        }
    }

    /// Blocking put, bounded by `timeout`. The chunk is handed back on
    /// refusal so the caller can keep it.
    pub fn put(
        &self,
        chunk: TaggedChunk,
        timeout: Duration,
    ) -> std::result::Result<(), TaggedChunk> {
        let len = chunk.len() as u64;
        match self.tx.send_timeout(chunk, timeout) {
            Ok(()) => {
                self.queued_bytes.fetch_add(len, Ordering::Relaxed);
                Ok(())
            }
            Err(e) => Err(e.into_inner()),
        }
    }

    /// Pop the oldest sealed chunk, if any.
    pub fn poll(&self) -> Option<TaggedChunk> {
        let chunk = self.rx.try_recv().ok()?;
        self.queued_bytes
            .fetch_sub(chunk.len() as u64, Ordering::Relaxed);
        Some(chunk)
    }

    pub fn queued_bytes(&self) -> u64 {
        self.queued_bytes.load(Ordering::Relaxed)
    }
}

/// Unbounded overflow area for chunks the primary queue refused.
#[derive(Default, Debug)]
pub struct BackupQueue {
    queue: SegQueue<TaggedChunk>,
    queued_bytes: AtomicU64,
}

impl BackupQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, chunk: TaggedChunk) {
        self.queued_bytes
            .fetch_add(chunk.len() as u64, Ordering::Relaxed);
        self.queue.push(chunk);
    }

    pub fn poll(&self) -> Option<TaggedChunk> {
        let chunk = self.queue.pop()?;
        self.queued_bytes
            .fetch_sub(chunk.len() as u64, Ordering::Relaxed);
        Some(chunk)
    }

    pub fn queued_bytes(&self) -> u64 {
        self.queued_bytes.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::RetentionChunk;
    use crate::pool::BufferPool;

    fn sealed(pool: &BufferPool, tag: &str, payload: &[u8]) -> TaggedChunk {
        let mut chunk = RetentionChunk::new(pool.acquire(payload.len().max(1)).unwrap());
        chunk.write(payload);
        chunk.seal(tag.to_string())
    }

    #[test]
    fn test_fifo_order_and_byte_counter() {
        let pool = BufferPool::new(1024, true);
        let queue = FlushQueue::new(4);

        queue
            .put(sealed(&pool, "a", b"one"), Duration::from_secs(1))
            .unwrap();
        queue
            .put(sealed(&pool, "a", b"second"), Duration::from_secs(1))
            .unwrap();
        assert_eq!(queue.queued_bytes(), 9);

        assert_eq!(queue.poll().unwrap().bytes(), b"one");
        assert_eq!(queue.queued_bytes(), 6);
        assert_eq!(queue.poll().unwrap().bytes(), b"second");
        assert_eq!(queue.queued_bytes(), 0);
        assert!(queue.poll().is_none());
    }

    #[test]
    fn test_bounded_put_times_out_when_full() {
        let pool = BufferPool::new(1024, true);
        let queue = FlushQueue::new(1);

        queue
            .put(sealed(&pool, "a", b"x"), Duration::from_millis(10))
            .unwrap();
        let refused = queue
            .put(sealed(&pool, "a", b"y"), Duration::from_millis(10))
            .unwrap_err();
        assert_eq!(refused.bytes(), b"y");
        let refused_again = queue.put(refused, Duration::from_millis(10)).unwrap_err();
        assert_eq!(refused_again.bytes(), b"y");
        assert_eq!(queue.queued_bytes(), 1);
    }

    #[test]
    fn test_backup_queue_is_fifo() {
        let pool = BufferPool::new(1024, true);
        let backup = BackupQueue::new();
        backup.push(sealed(&pool, "t", b"first"));
        backup.push(sealed(&pool, "t", b"later"));
        assert_eq!(backup.queued_bytes(), 10);
        assert_eq!(backup.poll().unwrap().bytes(), b"first");
        assert_eq!(backup.poll().unwrap().bytes(), b"later");
        assert!(backup.poll().is_none());
    }
}
