//! An ordered sequence of chunks borrowed from a single pool.
//!
//! Bytes are appended at the tail chunk and consumed from the head chunk. The chain keeps
//! running totals of readable and writable bytes so that neither requires a traversal.

use crate::{input::ReadView, output::Reservation, Chunk, ChunkPool, Error};
use std::collections::VecDeque;
use tracing::trace;

/// An ordered sequence of [Chunk]s with cached byte counters.
///
/// # Invariants
///
/// - `total_readable` equals the sum of `read_remaining` over all chunks.
/// - `total_writable` equals the sum of `write_remaining` over all chunks.
/// - Every chunk is owned by exactly one chain and returns to its pool once unlinked.
pub struct ChunkChain {
    pool: ChunkPool,
    chunks: VecDeque<Chunk>,
    readable: usize,
    writable: usize,
}

impl std::fmt::Debug for ChunkChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChunkChain")
            .field("chunks", &self.chunks.len())
            .field("readable", &self.readable)
            .field("writable", &self.writable)
            .finish()
    }
}

impl ChunkChain {
    /// Creates an empty chain that borrows from `pool`.
    pub fn new(pool: ChunkPool) -> Self {
        Self {
            pool,
            chunks: VecDeque::new(),
            readable: 0,
            writable: 0,
        }
    }

    /// Returns the pool new chunks are borrowed from.
    pub fn pool(&self) -> &ChunkPool {
        &self.pool
    }

    /// Links `chunk` at the tail.
    pub fn append_chunk(&mut self, chunk: Chunk) {
        self.readable += chunk.read_remaining();
        self.writable += chunk.write_remaining();
        self.chunks.push_back(chunk);
    }

    /// Returns a reservation on a tail chunk with at least `min` free bytes.
    ///
    /// The current tail is used when it has room; otherwise a chunk is borrowed from the
    /// pool and linked. Chunks are never resized. Placed bytes become readable once the
    /// reservation is committed.
    ///
    /// ```
    /// use commonware_packet::{ChunkChain, ChunkPool};
    ///
    /// let mut chain = ChunkChain::new(ChunkPool::global().clone());
    /// let mut slot = chain.request_writable(4).unwrap();
    /// slot.put_slice(b"ping").unwrap();
    /// assert_eq!(slot.commit().unwrap(), 4);
    /// assert_eq!(chain.total_readable(), 4);
    /// ```
    pub fn request_writable(&mut self, min: usize) -> Result<Reservation<'_>, Error> {
        let chunk_size = self.pool.chunk_size();
        if min > chunk_size {
            return Err(Error::ChunkTooSmall(min, chunk_size));
        }
        let min = min.max(1);
        let has_room = self
            .chunks
            .back()
            .is_some_and(|tail| tail.write_remaining() >= min);
        if !has_room {
            let chunk = self.pool.borrow();
            self.append_chunk(chunk);
            trace!(chunks = self.chunks.len(), min, "linked chunk");
        }

        let Self {
            chunks,
            readable,
            writable,
            ..
        } = self;
        let tail = chunks.back_mut().expect("tail chunk was just linked");
        Ok(Reservation::new(tail, readable, writable))
    }

    /// Returns the whole writable span of a tail chunk with room, linking one if needed.
    pub(crate) fn tail_spare(&mut self) -> &mut [u8] {
        let has_room = self
            .chunks
            .back()
            .is_some_and(|tail| tail.write_remaining() > 0);
        if !has_room {
            let chunk = self.pool.borrow();
            self.append_chunk(chunk);
        }
        match self.chunks.back_mut() {
            Some(tail) => tail.reserve_for_write(0).unwrap_or_default(),
            None => &mut [],
        }
    }

    /// Marks `n` bytes of [ChunkChain::tail_spare] as written.
    pub(crate) fn commit_tail(&mut self, n: usize) -> Result<(), Error> {
        let Some(tail) = self.chunks.back_mut() else {
            return match n {
                0 => Ok(()),
                _ => Err(Error::InsufficientSpace {
                    requested: n,
                    remaining: 0,
                }),
            };
        };
        tail.commit_write(n)?;
        self.readable += n;
        self.writable -= n;
        Ok(())
    }

    /// Unlinks the head chunk if it has no readable bytes left, returning it to its pool.
    ///
    /// Returns whether a chunk was unlinked.
    pub fn drop_consumed_head(&mut self) -> bool {
        match self.chunks.front() {
            Some(head) if head.read_remaining() == 0 => {}
            _ => return false,
        }
        let Some(head) = self.chunks.pop_front() else {
            return false;
        };
        self.writable -= head.write_remaining();
        drop(head);
        true
    }

    /// Returns whether the head chunk will receive no more writes.
    pub(crate) fn head_is_sealed(&self) -> bool {
        match self.chunks.front() {
            Some(head) => self.chunks.len() > 1 || head.write_remaining() == 0,
            None => false,
        }
    }

    /// Returns the number of bytes available to read.
    #[inline]
    pub const fn total_readable(&self) -> usize {
        self.readable
    }

    /// Returns the number of bytes that can be written without borrowing.
    #[inline]
    pub const fn total_writable(&self) -> usize {
        self.writable
    }

    /// Runs the write loop of [crate::Output::write_while_sized] against this chain.
    pub fn write_while_sized<F>(&mut self, initial: usize, mut f: F) -> Result<(), Error>
    where
        F: FnMut(&mut Reservation<'_>) -> Result<usize, Error>,
    {
        let mut min = initial;
        loop {
            let mut slot = self.request_writable(min)?;
            let next = f(&mut slot)?;
            slot.commit()?;
            if next == 0 {
                return Ok(());
            }
            min = next;
        }
    }

    /// Returns a view on the first chunk with readable bytes, unlinking consumed chunks
    /// ahead of it.
    fn head_view(&mut self) -> Option<ReadView<'_>> {
        while self.drop_consumed_head() {}
        let Self {
            chunks, readable, ..
        } = self;
        chunks
            .front_mut()
            .map(|head| ReadView::new(head, readable))
    }

    /// Runs the read loop of [crate::Input::read_while] against this chain.
    ///
    /// Returns once the callback returns `Ok(false)` or no readable bytes are left.
    pub fn read_while<F>(&mut self, mut f: F) -> Result<(), Error>
    where
        F: FnMut(&mut ReadView<'_>) -> Result<bool, Error>,
    {
        loop {
            let Some(mut view) = self.head_view() else {
                return Ok(());
            };
            let more = f(&mut view)?;
            if view.commit()? {
                self.drop_consumed_head();
            }
            if !more {
                return Ok(());
            }
        }
    }

    /// Consumes exactly `n` bytes.
    pub fn consume(&mut self, n: usize) -> Result<(), Error> {
        if n > self.readable {
            return Err(Error::InsufficientData {
                requested: n,
                remaining: self.readable,
            });
        }
        let mut left = n;
        while left > 0 {
            self.read_while(|view| {
                let step = view.remaining().min(left);
                view.advance(step)?;
                left -= step;
                Ok(left > 0)
            })?;
        }
        Ok(())
    }

    /// Links every chunk of `other` after the tail, without copying.
    pub fn append_chain(&mut self, mut other: ChunkChain) {
        self.readable += other.readable;
        self.writable += other.writable;
        self.chunks.append(&mut other.chunks);
        other.readable = 0;
        other.writable = 0;
    }

    /// Moves all chunks into a new chain backed by the same pool, leaving this one empty.
    pub fn take(&mut self) -> ChunkChain {
        let chunks = std::mem::take(&mut self.chunks);
        let taken = Self {
            pool: self.pool.clone(),
            chunks,
            readable: self.readable,
            writable: self.writable,
        };
        self.readable = 0;
        self.writable = 0;
        taken
    }

    /// Returns every chunk to its pool.
    pub fn release(&mut self) {
        self.chunks.clear();
        self.readable = 0;
        self.writable = 0;
    }

    /// Unlinks every chunk without readable bytes.
    pub fn trim(&mut self) {
        let writable = &mut self.writable;
        self.chunks.retain(|chunk| {
            if chunk.read_remaining() > 0 {
                return true;
            }
            *writable -= chunk.write_remaining();
            false
        });
    }

    /// Returns the linked chunks, head first.
    pub fn chunks(&self) -> impl Iterator<Item = &Chunk> + '_ {
        self.chunks.iter()
    }

    /// Returns the number of linked chunks.
    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    /// Returns whether there is nothing to read.
    pub const fn is_empty(&self) -> bool {
        self.readable == 0
    }
}

impl Drop for ChunkChain {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::PoolConfig;
    use prometheus_client::registry::Registry;

    fn pool(chunk_size: usize) -> ChunkPool {
        ChunkPool::new(PoolConfig::small(chunk_size), &mut Registry::default())
    }

    /// Recomputes both counters by walking the chain.
    fn assert_counters(chain: &ChunkChain) {
        let readable: usize = chain.chunks().map(Chunk::read_remaining).sum();
        let writable: usize = chain.chunks().map(Chunk::write_remaining).sum();
        assert_eq!(chain.total_readable(), readable);
        assert_eq!(chain.total_writable(), writable);
    }

    fn write(chain: &mut ChunkChain, data: &[u8]) {
        let mut offset = 0;
        chain
            .write_while_sized(1, |slot| {
                let n = slot.remaining().min(data.len() - offset);
                slot.put_slice(&data[offset..offset + n])?;
                offset += n;
                Ok(usize::from(offset < data.len()))
            })
            .unwrap();
    }

    fn read_all(chain: &mut ChunkChain) -> Vec<u8> {
        let mut out = Vec::new();
        chain
            .read_while(|view| {
                out.extend_from_slice(view.chunk());
                let n = view.remaining();
                view.advance(n)?;
                Ok(true)
            })
            .unwrap();
        out
    }

    #[test]
    fn test_empty_chain() {
        let chain = ChunkChain::new(pool(8));
        assert!(chain.is_empty());
        assert_eq!(chain.chunk_count(), 0);
        assert_eq!(chain.total_writable(), 0);
    }

    #[test]
    fn test_request_writable_reuses_tail() {
        let mut chain = ChunkChain::new(pool(8));
        let mut slot = chain.request_writable(4).unwrap();
        slot.put_slice(&[1, 2, 3]).unwrap();
        slot.commit().unwrap();
        assert_eq!(chain.chunk_count(), 1);
        assert_counters(&chain);

        // 5 bytes left in the tail
        chain.request_writable(5).unwrap().commit().unwrap();
        assert_eq!(chain.chunk_count(), 1);

        // Not enough room, a new chunk is linked
        chain.request_writable(6).unwrap().commit().unwrap();
        assert_eq!(chain.chunk_count(), 2);
        assert_eq!(chain.total_readable(), 3);
        assert_eq!(chain.total_writable(), 5 + 8);
        assert_counters(&chain);
    }

    #[test]
    fn test_request_writable_too_large() {
        let mut chain = ChunkChain::new(pool(8));
        assert!(matches!(chain.request_writable(9), Err(Error::ChunkTooSmall(9, 8))));
        assert_eq!(chain.chunk_count(), 0);
    }

    #[test]
    fn test_committed_reservation_is_readable() {
        let mut chain = ChunkChain::new(pool(8));
        let mut slot = chain.request_writable(3).unwrap();
        slot.put_slice(&[1, 2]).unwrap();
        slot.put_u8(3).unwrap();
        assert_eq!(slot.written(), 3);
        assert_eq!(slot.commit().unwrap(), 3);
        assert_eq!(chain.total_readable(), 3);
        assert_eq!(chain.total_writable(), 5);
        assert_counters(&chain);
        assert_eq!(read_all(&mut chain), vec![1, 2, 3]);
    }

    #[test]
    fn test_uncommitted_reservation_is_discarded() {
        let mut chain = ChunkChain::new(pool(8));
        {
            let mut slot = chain.request_writable(1).unwrap();
            slot.put_slice(&[9; 4]).unwrap();
        }
        assert_eq!(chain.total_readable(), 0);
        assert_eq!(chain.total_writable(), 8);
        assert_counters(&chain);
    }

    #[test]
    fn test_write_then_read() {
        let mut chain = ChunkChain::new(pool(8));
        let data: Vec<u8> = (0..30).collect();
        write(&mut chain, &data);
        assert_eq!(chain.chunk_count(), 4);
        assert_eq!(chain.total_readable(), 30);
        assert_counters(&chain);

        assert_eq!(read_all(&mut chain), data);
        assert!(chain.is_empty());
        assert_eq!(chain.chunk_count(), 0);
        assert_counters(&chain);
    }

    #[test]
    fn test_drop_consumed_head() {
        let pool = pool(8);
        let mut chain = ChunkChain::new(pool.clone());
        write(&mut chain, &[1; 12]);
        assert!(!chain.drop_consumed_head());

        chain
            .read_while(|view| {
                view.advance(8)?;
                Ok(false)
            })
            .unwrap();

        // The drained head was returned to the pool as soon as it was consumed
        assert_eq!(chain.chunk_count(), 1);
        assert_eq!(pool.borrowed(), 1);
        assert_eq!(pool.available(), 1);
        assert!(!chain.drop_consumed_head());
        assert_counters(&chain);
    }

    #[test]
    fn test_consume() {
        let mut chain = ChunkChain::new(pool(8));
        write(&mut chain, &(0..20).collect::<Vec<u8>>());
        chain.consume(11).unwrap();
        assert_eq!(chain.total_readable(), 9);
        assert!(matches!(
            chain.consume(10),
            Err(Error::InsufficientData {
                requested: 10,
                remaining: 9
            })
        ));
        assert_eq!(read_all(&mut chain), (11..20).collect::<Vec<u8>>());
    }

    #[test]
    fn test_append_chain() {
        let pool = pool(8);
        let mut a = ChunkChain::new(pool.clone());
        let mut b = ChunkChain::new(pool.clone());
        write(&mut a, b"hello");
        write(&mut b, b" world!");
        a.append_chain(b);
        assert_eq!(a.chunk_count(), 2);
        assert_counters(&a);
        assert_eq!(read_all(&mut a), b"hello world!".to_vec());
        assert_eq!(pool.borrowed(), 0);
    }

    #[test]
    fn test_take() {
        let mut chain = ChunkChain::new(pool(8));
        write(&mut chain, &[5; 10]);
        let mut taken = chain.take();
        assert!(chain.is_empty());
        assert_eq!(chain.chunk_count(), 0);
        assert_counters(&chain);
        assert_eq!(read_all(&mut taken), vec![5; 10]);
    }

    #[test]
    fn test_trim() {
        let mut chain = ChunkChain::new(pool(8));
        chain.request_writable(1).unwrap().commit().unwrap();
        assert_eq!(chain.chunk_count(), 1);
        chain.trim();
        assert_eq!(chain.chunk_count(), 0);
        assert_counters(&chain);
    }

    #[test]
    fn test_trim_keeps_readable_chunks() {
        let pool = pool(8);
        let mut chain = ChunkChain::new(pool.clone());
        write(&mut chain, &[1; 4]);
        chain.append_chunk(pool.borrow());
        let mut other = ChunkChain::new(pool.clone());
        write(&mut other, &[2; 6]);
        chain.append_chain(other);
        chain.append_chunk(pool.borrow());
        assert_eq!(chain.chunk_count(), 4);
        assert_eq!(chain.total_writable(), 22);

        chain.trim();
        assert_eq!(chain.chunk_count(), 2);
        assert_eq!(chain.total_readable(), 10);
        assert_eq!(chain.total_writable(), 6);
        assert_counters(&chain);
        assert_eq!(read_all(&mut chain), [[1; 4].as_slice(), &[2; 6]].concat());
    }

    #[test]
    fn test_release_and_drop_return_chunks() {
        let pool = pool(8);
        let mut chain = ChunkChain::new(pool.clone());
        write(&mut chain, &[0; 20]);
        assert_eq!(pool.borrowed(), 3);
        chain.release();
        assert_eq!(pool.borrowed(), 0);
        assert_eq!(pool.available(), 3);

        write(&mut chain, &[0; 20]);
        drop(chain);
        assert_eq!(pool.borrowed(), 0);
        assert_eq!(pool.available(), 3);
    }

    #[test]
    fn test_append_untracked_chunk() {
        let mut chain = ChunkChain::new(pool(8));
        let mut chunk = Chunk::new(4);
        chunk.reserve_for_write(2).unwrap()[..2].copy_from_slice(&[7, 8]);
        chunk.commit_write(2).unwrap();
        chain.append_chunk(chunk);
        assert_eq!(chain.total_readable(), 2);
        assert_eq!(chain.total_writable(), 2);
        assert_counters(&chain);
        assert_eq!(read_all(&mut chain), vec![7, 8]);
    }
}
