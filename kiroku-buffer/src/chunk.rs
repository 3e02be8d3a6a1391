//! Writable retention chunks and their sealed, flushable form.

use kiroku_core::time::now_millis;

use crate::pool::ChunkStorage;

/// The growing chunk currently accepting appends for one tag.
///
/// Bytes live in `storage[..position]`. The creation stamp is set at
/// allocation and re-stamped when the chunk's bytes are carried into a
/// larger replacement region.
#[derive(Debug)]
pub struct RetentionChunk {
    storage: ChunkStorage,
    position: usize,
    created_at_millis: u64,
}

impl RetentionChunk {
    pub fn new(storage: ChunkStorage) -> Self {
        Self {
            storage,
            position: 0,
            created_at_millis: now_millis(),
        }
    }

    /// Append `bytes` at the write cursor. The caller guarantees fit.
    pub fn write(&mut self, bytes: &[u8]) {
        let end = self.position + bytes.len();
        debug_assert!(end <= self.storage.capacity());
        self.storage.as_mut_slice()[self.position..end].copy_from_slice(bytes);
        self.position = end;
    }

    pub fn remaining(&self) -> usize {
        self.storage.capacity() - self.position
    }

    pub fn position(&self) -> usize {
        self.position
    }

    pub fn capacity(&self) -> usize {
        self.storage.capacity()
    }

    pub fn created_at_millis(&self) -> u64 {
        self.created_at_millis
    }

    /// Carry the written bytes into `new_storage` and hand back the old
    /// region for release. The replacement chunk gets a fresh creation
    /// stamp.
    pub fn grow_into(self, mut new_storage: ChunkStorage) -> (RetentionChunk, ChunkStorage) {
        debug_assert!(new_storage.capacity() >= self.position);
        new_storage.as_mut_slice()[..self.position]
            .copy_from_slice(&self.storage.as_slice()[..self.position]);
        let grown = RetentionChunk {
            storage: new_storage,
            position: self.position,
            created_at_millis: now_millis(),
        };
        (grown, self.storage)
    }

    /// Freeze the chunk: its readable range becomes `[0, position)`.
    pub fn seal(self, tag: String) -> TaggedChunk {
        TaggedChunk {
            tag,
            limit: self.position,
            created_at_millis: self.created_at_millis,
            storage: self.storage,
        }
    }
}

/// A sealed chunk paired with its tag, owned by a flush or backup queue.
#[derive(Debug)]
pub struct TaggedChunk {
    tag: String,
    storage: ChunkStorage,
    limit: usize,
    created_at_millis: u64,
}

impl TaggedChunk {
    pub fn tag(&self) -> &str {
        &self.tag
    }

    pub fn bytes(&self) -> &[u8] {
        &self.storage.as_slice()[..self.limit]
    }

    pub fn len(&self) -> usize {
        self.limit
    }

    pub fn is_empty(&self) -> bool {
        self.limit == 0
    }

    /// Hand the backing region back for pool release.
    pub fn into_storage(self) -> ChunkStorage {
        self.storage
    }

    /// Reopen for writing. Used when a refused hand-off puts the chunk
    /// back into retention; the original creation stamp is kept.
    pub(crate) fn unseal(self) -> RetentionChunk {
        RetentionChunk {
            storage: self.storage,
            position: self.limit,
            created_at_millis: self.created_at_millis,
        }
    }
}
