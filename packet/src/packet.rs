//! Readable packets and the builders that produce them.

use crate::{ChunkChain, ChunkPool, Error, Input, Output, ReadView, Reservation};
use bytes::{buf::UninitSlice, Buf, BufMut};
use tracing::debug;

/// A readable sequence of bytes spread across pooled chunks.
///
/// Reading consumes bytes from the front and returns drained chunks to their pool. Once
/// drained, every further read fails with [Error::EndOfInput].
pub struct Packet {
    chain: ChunkChain,
}

impl std::fmt::Debug for Packet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Packet")
            .field("remaining", &self.remaining())
            .field("chunks", &self.chunk_count())
            .finish()
    }
}

impl Default for Packet {
    fn default() -> Self {
        Self::empty()
    }
}

impl Packet {
    /// Returns a packet with no bytes, backed by the global pool.
    pub fn empty() -> Self {
        Self {
            chain: ChunkChain::new(ChunkPool::global().clone()),
        }
    }

    /// Copies `data` into a packet backed by the global pool.
    pub fn copy_from_slice(data: &[u8]) -> Self {
        copy_spans(ChunkPool::global().clone(), [data])
    }

    /// Returns the number of unread bytes.
    #[inline]
    pub fn remaining(&self) -> usize {
        self.chain.total_readable()
    }

    /// Returns whether every byte has been read.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.chain.is_empty()
    }

    /// Returns the number of chunks still linked.
    pub fn chunk_count(&self) -> usize {
        self.chain.chunk_count()
    }

    /// Returns the pool the packet's chunks were borrowed from.
    pub fn pool(&self) -> &ChunkPool {
        self.chain.pool()
    }

    /// Returns an independent copy of the unread bytes. `self` is left untouched.
    pub fn duplicate(&self) -> Packet {
        copy_spans(
            self.chain.pool().clone(),
            self.chain.chunks().map(|chunk| chunk.readable()),
        )
    }

    /// Copies the unread bytes into a vector without consuming them.
    pub fn to_vec(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.remaining());
        for chunk in self.chain.chunks() {
            bytes.extend_from_slice(chunk.readable());
        }
        bytes
    }

    /// Discards all unread bytes and returns every chunk to its pool.
    pub fn release(&mut self) {
        self.chain.release();
    }
}

/// Builds a packet holding the concatenation of `spans`.
fn copy_spans<'a>(pool: ChunkPool, spans: impl IntoIterator<Item = &'a [u8]>) -> Packet {
    let mut builder = PacketBuilder::with_pool(pool);
    for span in spans {
        // Slices are split across chunks, so an open builder never rejects them
        builder
            .write_slice(span)
            .expect("open builder accepts any slice");
    }
    builder.build()
}

impl Input for Packet {
    fn read_while<F>(&mut self, f: F) -> Result<(), Error>
    where
        F: FnMut(&mut ReadView<'_>) -> Result<bool, Error>,
    {
        self.chain.read_while(f)
    }

    fn prefetch(&mut self, min: usize) -> Result<bool, Error> {
        Ok(self.chain.total_readable() >= min)
    }

    fn remaining(&self) -> usize {
        self.chain.total_readable()
    }
}

impl Buf for Packet {
    fn remaining(&self) -> usize {
        self.chain.total_readable()
    }

    fn chunk(&self) -> &[u8] {
        self.chain
            .chunks()
            .map(|chunk| chunk.readable())
            .find(|readable| !readable.is_empty())
            .unwrap_or_default()
    }

    fn advance(&mut self, cnt: usize) {
        if let Err(err) = self.chain.consume(cnt) {
            panic!("cannot advance packet: {err}");
        }
    }
}

/// Accumulates bytes into pooled chunks and hands them off as a [Packet].
pub struct PacketBuilder {
    chain: ChunkChain,
    closed: bool,
}

impl std::fmt::Debug for PacketBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PacketBuilder")
            .field("size", &self.size())
            .field("chunks", &self.chunk_count())
            .field("closed", &self.closed)
            .finish()
    }
}

impl Default for PacketBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl PacketBuilder {
    /// Creates a builder that borrows from the global pool.
    pub fn new() -> Self {
        Self::with_pool(ChunkPool::global().clone())
    }

    /// Creates a builder that borrows from `pool`.
    pub fn with_pool(pool: ChunkPool) -> Self {
        Self {
            chain: ChunkChain::new(pool),
            closed: false,
        }
    }

    /// Returns the number of bytes written.
    #[inline]
    pub fn size(&self) -> usize {
        self.chain.total_readable()
    }

    /// Returns whether nothing has been written.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.chain.is_empty()
    }

    /// Returns the number of chunks linked so far.
    pub fn chunk_count(&self) -> usize {
        self.chain.chunk_count()
    }

    /// Hands the written bytes off as a packet.
    ///
    /// Chunks that hold no bytes are returned to the pool rather than carried along.
    pub fn build(mut self) -> Packet {
        let mut chain = self.chain.take();
        chain.trim();
        Packet { chain }
    }

    /// Discards everything written and reopens the builder if it was closed.
    pub fn reset(&mut self) {
        self.chain.release();
        self.closed = false;
    }

    /// Appends the unread bytes of `packet` by linking its chunks, without copying.
    pub fn append_packet(&mut self, mut packet: Packet) -> Result<(), Error> {
        if self.closed {
            return Err(Error::Closed);
        }
        self.chain.append_chain(packet.chain.take());
        Ok(())
    }
}

impl Output for PacketBuilder {
    fn write_u8(&mut self, value: u8) -> Result<(), Error> {
        self.write_while_sized(1, |slot| {
            slot.put_u8(value)?;
            Ok(0)
        })
    }

    fn write_while_sized<F>(&mut self, initial: usize, f: F) -> Result<(), Error>
    where
        F: FnMut(&mut Reservation<'_>) -> Result<usize, Error>,
    {
        if self.closed {
            return Err(Error::Closed);
        }
        self.chain.write_while_sized(initial, f)
    }

    fn flush(&mut self) -> Result<(), Error> {
        Ok(())
    }

    fn close(&mut self) -> Result<(), Error> {
        if self.closed {
            return Ok(());
        }
        debug!(size = self.size(), "closed builder");
        self.closed = true;
        self.chain.release();
        Ok(())
    }
}

unsafe impl BufMut for PacketBuilder {
    fn remaining_mut(&self) -> usize {
        if self.closed {
            return 0;
        }
        isize::MAX as usize - self.size()
    }

    unsafe fn advance_mut(&mut self, cnt: usize) {
        if let Err(err) = self.chain.commit_tail(cnt) {
            panic!("cannot advance builder: {err}");
        }
    }

    fn chunk_mut(&mut self) -> &mut UninitSlice {
        if self.closed {
            return UninitSlice::new(&mut []);
        }
        UninitSlice::new(self.chain.tail_spare())
    }
}
