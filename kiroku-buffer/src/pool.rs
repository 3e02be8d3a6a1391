//! Pooled allocation of fixed-capacity chunk regions under a global
//! memory ceiling.
//!
//! Regions come back to the pool after a chunk is flushed and are reused
//! for the next chunk of the same capacity, so steady-state traffic
//! allocates nothing. `allocated_size` counts outstanding plus cached
//! capacity; `release` never decrements it.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use memmap2::MmapMut;
use parking_lot::Mutex;
use tracing::{trace, warn};

/// Backing storage for one chunk region.
///
/// `Direct` regions live in anonymous private mappings outside the heap;
/// `Heap` regions are allocator-backed. The mode is fixed per pool.
pub enum ChunkStorage {
    Heap(Box<[u8]>),
    Direct(MmapMut),
}

impl ChunkStorage {
    fn allocate(size: usize, heap_mode: bool) -> std::io::Result<Self> {
        if heap_mode {
            Ok(ChunkStorage::Heap(vec![0u8; size].into_boxed_slice()))
        } else {
            Ok(ChunkStorage::Direct(MmapMut::map_anon(size)?))
        }
    }

    pub fn capacity(&self) -> usize {
        match self {
            ChunkStorage::Heap(buf) => buf.len(),
            ChunkStorage::Direct(map) => map.len(),
        }
    }

    pub fn as_slice(&self) -> &[u8] {
        match self {
            ChunkStorage::Heap(buf) => buf,
            ChunkStorage::Direct(map) => map,
        }
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        match self {
            ChunkStorage::Heap(buf) => buf,
            ChunkStorage::Direct(map) => map,
        }
    }
}

impl std::fmt::Debug for ChunkStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mode = match self {
            ChunkStorage::Heap(_) => "heap",
            ChunkStorage::Direct(_) => "direct",
        };
        f.debug_struct("ChunkStorage")
            .field("mode", &mode)
            .field("capacity", &self.capacity())
            .finish()
    }
}

/// Fixed-region allocator with a global byte ceiling and an
/// exact-capacity freelist.
#[derive(Debug)]
pub struct BufferPool {
    max_bytes: usize,
    heap_mode: bool,
    allocated: AtomicUsize,
    freelist: Mutex<HashMap<usize, Vec<ChunkStorage>>>,
}

impl BufferPool {
    pub fn new(max_bytes: usize, heap_mode: bool) -> Self {
        Self {
            max_bytes,
            heap_mode,
            allocated: AtomicUsize::new(0),
            freelist: Mutex::new(HashMap::new()),
        }
    }

    /// Hand out a region of exactly `size` bytes, reusing a cached region
    /// of that capacity when one exists. Returns `None` when the ceiling
    /// would be exceeded.
    pub fn acquire(&self, size: usize) -> Option<ChunkStorage> {
        if let Some(region) = self
            .freelist
            .lock()
            .get_mut(&size)
            .and_then(|cached| cached.pop())
        {
            trace!(size, "reusing pooled chunk region");
            return Some(region);
        }

        loop {
            let current = self.allocated.load(Ordering::Acquire);
            if current + size > self.max_bytes {
                return None;
            }
            if self
                .allocated
                .compare_exchange(current, current + size, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                break;
            }
        }

        match ChunkStorage::allocate(size, self.heap_mode) {
            Ok(region) => {
                trace!(size, heap_mode = self.heap_mode, "allocated chunk region");
                Some(region)
            }
            Err(e) => {
                warn!(size, error = %e, "chunk region allocation failed");
                self.allocated.fetch_sub(size, Ordering::AcqRel);
                None
            }
        }
    }

    /// Return a region to the freelist for reuse. The region's capacity
    /// stays accounted against the ceiling.
    pub fn release(&self, region: ChunkStorage) {
        self.freelist
            .lock()
            .entry(region.capacity())
            .or_default()
            .push(region);
    }

    /// Drop every cached region and reset the accounting to zero.
    pub fn release_all(&self) {
        self.freelist.lock().clear();
        self.allocated.store(0, Ordering::Release);
    }

    /// Outstanding plus cached capacity, in bytes.
    pub fn allocated_size(&self) -> usize {
        self.allocated.load(Ordering::Acquire)
    }

    pub fn heap_mode(&self) -> bool {
        self.heap_mode
    }
}
