//! Adapters between chunk chains and byte streams.
//!
//! A [Writer] buffers into pooled chunks and hands every completed chunk to a [Sink]. A
//! [Reader] refills pooled chunks from a [Source] one chunk at a time. Any [std::io::Write]
//! is a [Sink] and any [std::io::Read] is a [Source].

use crate::{ChunkChain, ChunkPool, Error, Input, Output, ReadView, Reservation};
use std::io;
use tracing::{debug, trace};

/// Downstream consumer of bytes.
pub trait Sink {
    /// Accepts a prefix of `data`, returning its length. Accepting nothing is an error.
    fn accept(&mut self, data: &[u8]) -> Result<usize, Error>;

    /// Forces accepted bytes to their destination.
    fn flush(&mut self) -> Result<(), Error> {
        Ok(())
    }
}

/// Upstream producer of bytes.
pub trait Source {
    /// Fills a prefix of `buf`, returning its length. `0` means the source is exhausted.
    fn fill(&mut self, buf: &mut [u8]) -> Result<usize, Error>;
}

impl<W: io::Write + ?Sized> Sink for W {
    fn accept(&mut self, data: &[u8]) -> Result<usize, Error> {
        Ok(self.write(data)?)
    }

    fn flush(&mut self) -> Result<(), Error> {
        Ok(io::Write::flush(self)?)
    }
}

impl<R: io::Read + ?Sized> Source for R {
    fn fill(&mut self, buf: &mut [u8]) -> Result<usize, Error> {
        Ok(self.read(buf)?)
    }
}

/// An [Output] that hands completed chunks to a [Sink].
///
/// Completed chunks are handed over while a write is still in progress, so a large write
/// holds at most one partially filled chunk.
///
/// A write that returns `Ok` has buffered all of its bytes, even if the sink failed while
/// they were being handed over. Such a failure is reported by the next write or flush,
/// which then does nothing else; retrying afterwards resumes from the first unaccepted
/// byte. Bytes still buffered when the writer is dropped are discarded; call
/// [Output::flush] or [Output::close] first.
pub struct Writer<S: Sink> {
    sink: S,
    chain: ChunkChain,
    failed: Option<Error>,
    closed: bool,
}

impl<S: Sink> Writer<S> {
    /// Creates a writer that buffers into chunks from the global pool.
    pub fn new(sink: S) -> Self {
        Self::with_pool(sink, ChunkPool::global().clone())
    }

    /// Creates a writer that buffers into chunks from `pool`.
    pub fn with_pool(sink: S, pool: ChunkPool) -> Self {
        Self {
            sink,
            chain: ChunkChain::new(pool),
            failed: None,
            closed: false,
        }
    }

    /// Returns the number of bytes written but not yet handed to the sink.
    pub fn buffered(&self) -> usize {
        self.chain.total_readable()
    }

    /// Returns a reference to the sink.
    pub fn get_ref(&self) -> &S {
        &self.sink
    }

    /// Hands buffered chunks to the sink: only completed ones, or all of them if `all`.
    fn emit(&mut self, all: bool) -> Result<(), Error> {
        let Self { sink, chain, .. } = self;
        while chain.head_is_sealed() || (all && !chain.is_empty()) {
            chain.read_while(|view| {
                let accepted = sink.accept(view.chunk())?;
                if accepted == 0 {
                    return Err(Error::WriteZero);
                }
                view.advance(accepted)?;
                Ok(view.remaining() > 0)
            })?;
        }
        Ok(())
    }

    /// Hands completed chunks to the sink, holding back any failure for the next call.
    fn emit_sealed(&mut self) {
        if self.failed.is_some() {
            return;
        }
        if let Err(err) = self.emit(false) {
            debug!(?err, buffered = self.buffered(), "sink failed");
            self.failed = Some(err);
        }
    }

    /// Returns the error held back by [Writer::emit_sealed], if any, clearing it.
    fn check(&mut self) -> Result<(), Error> {
        match self.failed.take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

impl<S: Sink> Output for Writer<S> {
    fn write_u8(&mut self, value: u8) -> Result<(), Error> {
        self.write_while_sized(1, |slot| {
            slot.put_u8(value)?;
            Ok(0)
        })
    }

    fn write_while_sized<F>(&mut self, initial: usize, mut f: F) -> Result<(), Error>
    where
        F: FnMut(&mut Reservation<'_>) -> Result<usize, Error>,
    {
        if self.closed {
            return Err(Error::Closed);
        }
        self.check()?;
        let mut min = initial;
        loop {
            let next = {
                let mut slot = self.chain.request_writable(min)?;
                let next = f(&mut slot)?;
                slot.commit()?;
                next
            };
            self.emit_sealed();
            if next == 0 {
                return Ok(());
            }
            min = next;
        }
    }

    fn flush(&mut self) -> Result<(), Error> {
        if self.closed {
            return Ok(());
        }
        self.check()?;
        self.emit(true)?;
        self.sink.flush()
    }

    fn close(&mut self) -> Result<(), Error> {
        if self.closed {
            return Ok(());
        }
        let result = self.flush();
        self.closed = true;
        self.chain.release();
        debug!(ok = result.is_ok(), "closed writer");
        result
    }
}

/// An [Input] that refills pooled chunks from a [Source].
pub struct Reader<S: Source> {
    source: S,
    chain: ChunkChain,
    eof: bool,
}

impl<S: Source> Reader<S> {
    /// Creates a reader that buffers into chunks from the global pool.
    pub fn new(source: S) -> Self {
        Self::with_pool(source, ChunkPool::global().clone())
    }

    /// Creates a reader that buffers into chunks from `pool`.
    pub fn with_pool(source: S, pool: ChunkPool) -> Self {
        Self {
            source,
            chain: ChunkChain::new(pool),
            eof: false,
        }
    }

    /// Returns whether the source has reported its end.
    pub const fn is_eof(&self) -> bool {
        self.eof
    }

    /// Reads from the source once into the tail chunk, returning how many bytes arrived.
    fn fill_once(&mut self) -> Result<usize, Error> {
        let Self { source, chain, eof } = self;
        let mut filled = 0;
        chain.write_while_sized(1, |slot| {
            filled = source.fill(slot.spare_mut())?;
            slot.advance(filled)?;
            Ok(0)
        })?;
        if filled == 0 {
            // The last refill may have linked a chunk that stays empty
            chain.trim();
            *eof = true;
            trace!(buffered = chain.total_readable(), "source exhausted");
        }
        Ok(filled)
    }
}

impl<S: Source> Input for Reader<S> {
    fn read_while<F>(&mut self, mut f: F) -> Result<(), Error>
    where
        F: FnMut(&mut ReadView<'_>) -> Result<bool, Error>,
    {
        loop {
            if !self.prefetch(1)? {
                return Ok(());
            }
            let mut more = true;
            self.chain.read_while(|view| {
                more = f(view)?;
                Ok(more)
            })?;
            if !more {
                return Ok(());
            }
        }
    }

    fn prefetch(&mut self, min: usize) -> Result<bool, Error> {
        while self.chain.total_readable() < min && !self.eof {
            self.fill_once()?;
        }
        Ok(self.chain.total_readable() >= min)
    }

    fn remaining(&self) -> usize {
        self.chain.total_readable()
    }
}
