//! A fixed-size block of [Memory] with independent read and write cursors.

use crate::{pool::Shared, Error, Memory};
use std::sync::Weak;

/// A fixed-capacity block of bytes with a read cursor and a write cursor.
///
/// # Layout
///
/// ```text
/// [0..............read..............write..............capacity]
///  ^               ^                  ^                  ^
///  |               |                  |                  |
///  start           read position      write position     end
///
/// Regions:
/// - [0..read]:         consumed
/// - [read..write]:     readable bytes
/// - [write..capacity]: writable bytes
/// ```
///
/// # Invariants
///
/// - `read <= write <= capacity`
/// - Cursors only move forward, except through [Chunk::reset].
///
/// A chunk borrowed from a [crate::ChunkPool] returns its memory to that pool when dropped
/// (if the pool still exists). Chunks created with [Chunk::new] are deallocated on drop.
pub struct Chunk {
    memory: Memory,
    read: usize,
    write: usize,
    origin: Weak<Shared>,
}

impl std::fmt::Debug for Chunk {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Chunk")
            .field("read", &self.read)
            .field("write", &self.write)
            .field("capacity", &self.capacity())
            .finish()
    }
}

impl Chunk {
    /// Allocates an untracked chunk of `capacity` bytes.
    pub fn new(capacity: usize) -> Self {
        Self::from_memory(Memory::new(capacity), Weak::new())
    }

    pub(crate) fn from_memory(memory: Memory, origin: Weak<Shared>) -> Self {
        Self {
            memory,
            read: 0,
            write: 0,
            origin,
        }
    }

    /// Detaches the backing memory and the pool it was lent from.
    ///
    /// The (now empty) chunk no longer returns anything to a pool when dropped.
    pub(crate) fn into_parts(mut self) -> (Memory, Weak<Shared>) {
        let memory = std::mem::take(&mut self.memory);
        let origin = std::mem::take(&mut self.origin);
        (memory, origin)
    }

    /// Returns the total number of bytes the chunk can hold.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.memory.size()
    }

    /// Returns the read cursor.
    #[inline]
    pub const fn read_position(&self) -> usize {
        self.read
    }

    /// Returns the write cursor.
    #[inline]
    pub const fn write_position(&self) -> usize {
        self.write
    }

    /// Returns the number of bytes written but not yet read.
    #[inline]
    pub const fn read_remaining(&self) -> usize {
        self.write - self.read
    }

    /// Returns the number of bytes that can still be written.
    #[inline]
    pub fn write_remaining(&self) -> usize {
        self.capacity() - self.write
    }

    /// Returns all readable bytes.
    #[inline]
    pub fn readable(&self) -> &[u8] {
        // read <= write <= capacity, so this cannot fail
        self.memory
            .read(self.read, self.read_remaining())
            .unwrap_or_default()
    }

    /// Returns the whole writable span, failing if it is shorter than `min`.
    ///
    /// Bytes placed in the span are not visible to readers until [Chunk::commit_write].
    pub fn reserve_for_write(&mut self, min: usize) -> Result<&mut [u8], Error> {
        let remaining = self.write_remaining();
        if remaining < min {
            return Err(Error::InsufficientSpace {
                requested: min,
                remaining,
            });
        }
        self.memory.slice_mut(self.write, remaining)
    }

    /// Marks `n` bytes of the reserved span as written.
    pub fn commit_write(&mut self, n: usize) -> Result<(), Error> {
        let remaining = self.write_remaining();
        if n > remaining {
            return Err(Error::InsufficientSpace {
                requested: n,
                remaining,
            });
        }
        self.write += n;
        Ok(())
    }

    /// Returns exactly `n` readable bytes without consuming them.
    pub fn read_span(&self, n: usize) -> Result<&[u8], Error> {
        let remaining = self.read_remaining();
        if n > remaining {
            return Err(Error::InsufficientData {
                requested: n,
                remaining,
            });
        }
        self.memory.read(self.read, n)
    }

    /// Marks `n` readable bytes as consumed.
    pub fn commit_read(&mut self, n: usize) -> Result<(), Error> {
        let remaining = self.read_remaining();
        if n > remaining {
            return Err(Error::InsufficientData {
                requested: n,
                remaining,
            });
        }
        self.read += n;
        Ok(())
    }

    /// Moves both cursors back to the start of the chunk.
    pub fn reset(&mut self) {
        self.read = 0;
        self.write = 0;
    }
}

impl Drop for Chunk {
    fn drop(&mut self) {
        if let Some(pool) = self.origin.upgrade() {
            pool.give_back(std::mem::take(&mut self.memory));
        }
        // else: memory is dropped here, which deallocates it
    }
}
