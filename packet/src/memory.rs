//! Fixed-capacity, bounds-checked byte storage.

use crate::Error;
use std::ops::Range;

/// A fixed-capacity block of zero-initialized bytes.
///
/// `Memory` has no cursor of its own: it is a bounds-checked view that [crate::Chunk] layers
/// read and write positions on top of. Blocks are allocated once and reused through the
/// [crate::ChunkPool]; they are never resized.
///
/// Allocation failure is not recoverable and aborts the process.
#[derive(Default)]
pub struct Memory {
    bytes: Box<[u8]>,
}

impl std::fmt::Debug for Memory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Memory")
            .field("size", &self.size())
            .finish()
    }
}

impl Memory {
    /// Allocates a zeroed block of `capacity` bytes.
    pub fn new(capacity: usize) -> Self {
        Self {
            bytes: vec![0; capacity].into_boxed_slice(),
        }
    }

    /// Returns the capacity of the block.
    #[inline]
    pub fn size(&self) -> usize {
        self.bytes.len()
    }

    /// Returns the range `offset..offset + len` if it lies within the block.
    #[inline]
    fn range(&self, offset: usize, len: usize) -> Result<Range<usize>, Error> {
        let capacity = self.size();
        match offset.checked_add(len) {
            Some(end) if end <= capacity => Ok(offset..end),
            _ => Err(Error::OutOfBounds {
                offset,
                len,
                capacity,
            }),
        }
    }

    /// Returns `len` bytes starting at `offset`.
    pub fn read(&self, offset: usize, len: usize) -> Result<&[u8], Error> {
        let range = self.range(offset, len)?;
        Ok(&self.bytes[range])
    }

    /// Returns a mutable view of `len` bytes starting at `offset`.
    pub fn slice_mut(&mut self, offset: usize, len: usize) -> Result<&mut [u8], Error> {
        let range = self.range(offset, len)?;
        Ok(&mut self.bytes[range])
    }

    /// Copies `src` into the block starting at `offset`.
    pub fn write(&mut self, offset: usize, src: &[u8]) -> Result<(), Error> {
        self.slice_mut(offset, src.len())?.copy_from_slice(src);
        Ok(())
    }

    /// Sets `len` bytes starting at `offset` to `value`.
    pub fn fill(&mut self, offset: usize, len: usize, value: u8) -> Result<(), Error> {
        self.slice_mut(offset, len)?.fill(value);
        Ok(())
    }
}
