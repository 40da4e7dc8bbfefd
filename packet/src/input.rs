//! Read side of the chunk protocol.
//!
//! Implementors of [Input] provide [Input::read_while], [Input::prefetch], and
//! [Input::remaining]. All other reads are default methods built on them.
//!
//! [Input::read_while] hands its callback a [ReadView] over the head chunk. Consumption is
//! applied once the callback returns `Ok`; a head chunk that has been fully consumed is
//! detached and returned to its pool before the next iteration, so a view never outlives the
//! callback it was passed to.

use crate::{Chunk, Error};
use paste::paste;

/// A view over the readable bytes of a single chunk, valid for one read-while iteration.
pub struct ReadView<'a> {
    chunk: &'a mut Chunk,
    readable: &'a mut usize,
    consumed: usize,
}

impl<'a> ReadView<'a> {
    pub(crate) fn new(chunk: &'a mut Chunk, readable: &'a mut usize) -> Self {
        Self {
            chunk,
            readable,
            consumed: 0,
        }
    }

    /// Returns the bytes not yet consumed through this view.
    #[inline]
    pub fn chunk(&self) -> &[u8] {
        &self.chunk.readable()[self.consumed..]
    }

    /// Returns the number of bytes not yet consumed through this view.
    #[inline]
    pub fn remaining(&self) -> usize {
        self.chunk.read_remaining() - self.consumed
    }

    /// Marks `n` bytes as consumed.
    pub fn advance(&mut self, n: usize) -> Result<(), Error> {
        let remaining = self.remaining();
        if n > remaining {
            return Err(Error::InsufficientData {
                requested: n,
                remaining,
            });
        }
        self.consumed += n;
        Ok(())
    }

    /// Copies `dst.len()` bytes into `dst` and consumes them.
    pub fn copy_to_slice(&mut self, dst: &mut [u8]) -> Result<(), Error> {
        let remaining = self.remaining();
        if dst.len() > remaining {
            return Err(Error::InsufficientData {
                requested: dst.len(),
                remaining,
            });
        }
        dst.copy_from_slice(&self.chunk()[..dst.len()]);
        self.consumed += dst.len();
        Ok(())
    }

    /// Applies the consumption to the chunk and the chain counter.
    ///
    /// Returns whether the chunk has no readable bytes left.
    pub(crate) fn commit(self) -> Result<bool, Error> {
        self.chunk.commit_read(self.consumed)?;
        *self.readable -= self.consumed;
        Ok(self.chunk.read_remaining() == 0)
    }
}

macro_rules! read_primitives {
    ($($ty:ident),*) => {
        paste! {
            $(
                #[doc = concat!("Reads a big-endian `", stringify!($ty), "`.")]
                fn [<read_ $ty>](&mut self) -> Result<$ty, Error> {
                    Ok($ty::from_be_bytes(self.read_array()?))
                }

                #[doc = concat!("Reads a little-endian `", stringify!($ty), "`.")]
                fn [<read_ $ty _le>](&mut self) -> Result<$ty, Error> {
                    Ok($ty::from_le_bytes(self.read_array()?))
                }
            )*
        }
    };
}

macro_rules! read_slices {
    ($($ty:ident),*) => {
        paste! {
            $(
                #[doc = concat!("Fills `dst` with big-endian `", stringify!($ty), "`s.")]
                ///
                /// Fails with [Error::EndOfInput], consuming nothing, if the input is too short.
                fn [<read_ $ty _slice>](&mut self, dst: &mut [$ty]) -> Result<(), Error> {
                    let len = std::mem::size_of_val(&*dst);
                    if !self.prefetch(len)? {
                        return Err(Error::EndOfInput);
                    }
                    for value in dst.iter_mut() {
                        *value = self.[<read_ $ty>]()?;
                    }
                    Ok(())
                }
            )*
        }
    };
}

/// Source of bytes, read across an unbounded number of chunks.
pub trait Input {
    /// Hands `f` non-empty views until the input is exhausted or `f` returns `Ok(false)`.
    ///
    /// `f` must consume at least one byte when it returns `Ok(true)`.
    fn read_while<F>(&mut self, f: F) -> Result<(), Error>
    where
        F: FnMut(&mut ReadView<'_>) -> Result<bool, Error>;

    /// Ensures at least `min` bytes are buffered, without consuming any.
    ///
    /// Returns `false` if the input ends first.
    fn prefetch(&mut self, min: usize) -> Result<bool, Error>;

    /// Returns the number of bytes currently buffered.
    fn remaining(&self) -> usize;

    /// Returns whether no bytes are buffered and none can be fetched.
    fn is_exhausted(&mut self) -> Result<bool, Error> {
        Ok(!self.prefetch(1)?)
    }

    /// Reads a single byte, returning `None` at the end of input.
    fn try_read_u8(&mut self) -> Result<Option<u8>, Error> {
        let mut value = None;
        self.read_while(|view| {
            value = view.chunk().first().copied();
            view.advance(1)?;
            Ok(false)
        })?;
        Ok(value)
    }

    /// Reads a single byte.
    fn read_u8(&mut self) -> Result<u8, Error> {
        self.try_read_u8()?.ok_or(Error::EndOfInput)
    }

    /// Reads a single signed byte.
    fn read_i8(&mut self) -> Result<i8, Error> {
        Ok(self.read_u8()? as i8)
    }

    /// Reads exactly `N` bytes.
    fn read_array<const N: usize>(&mut self) -> Result<[u8; N], Error> {
        let mut bytes = [0; N];
        self.read_exact(&mut bytes)?;
        Ok(bytes)
    }

    read_primitives!(u16, i16, u32, i32, u64, i64, f32, f64);

    read_slices!(u16, i16, u32, i32, u64, i64, f32, f64);

    /// Fills `dst` completely.
    ///
    /// Fails with [Error::EndOfInput], consuming nothing, if the input is too short.
    fn read_exact(&mut self, dst: &mut [u8]) -> Result<(), Error> {
        if dst.is_empty() {
            return Ok(());
        }
        if !self.prefetch(dst.len())? {
            return Err(Error::EndOfInput);
        }
        self.read_available(dst)?;
        Ok(())
    }

    /// Reads up to `dst.len()` bytes, returning how many were read.
    fn read_available(&mut self, dst: &mut [u8]) -> Result<usize, Error> {
        if dst.is_empty() {
            return Ok(0);
        }
        let mut filled = 0;
        self.read_while(|view| {
            let n = view.remaining().min(dst.len() - filled);
            view.copy_to_slice(&mut dst[filled..filled + n])?;
            filled += n;
            Ok(filled < dst.len())
        })?;
        Ok(filled)
    }

    /// Reads exactly `n` bytes.
    fn read_bytes(&mut self, n: usize) -> Result<Vec<u8>, Error> {
        let mut bytes = vec![0; n];
        self.read_exact(&mut bytes)?;
        Ok(bytes)
    }

    /// Reads everything that is left.
    fn read_to_end(&mut self) -> Result<Vec<u8>, Error> {
        let mut bytes = Vec::with_capacity(self.remaining());
        self.read_while(|view| {
            bytes.extend_from_slice(view.chunk());
            let n = view.remaining();
            view.advance(n)?;
            Ok(true)
        })?;
        Ok(bytes)
    }

    /// Skips up to `n` bytes, returning how many were skipped.
    fn discard(&mut self, n: usize) -> Result<usize, Error> {
        if n == 0 {
            return Ok(0);
        }
        let mut skipped = 0;
        self.read_while(|view| {
            let step = view.remaining().min(n - skipped);
            view.advance(step)?;
            skipped += step;
            Ok(skipped < n)
        })?;
        Ok(skipped)
    }

    /// Skips exactly `n` bytes.
    ///
    /// Fails with [Error::EndOfInput], consuming nothing, if the input is too short.
    fn discard_exact(&mut self, n: usize) -> Result<(), Error> {
        if !self.prefetch(n)? {
            return Err(Error::EndOfInput);
        }
        self.discard(n)?;
        Ok(())
    }

    /// Reads exactly `n` bytes and decodes them as UTF-8.
    fn read_utf8(&mut self, n: usize) -> Result<String, Error> {
        let bytes = self.read_bytes(n)?;
        String::from_utf8(bytes).map_err(|err| Error::InvalidUtf8(err.utf8_error()))
    }

    /// Reads one line of UTF-8 text.
    ///
    /// A line ends at `\n` or `\r\n`; the terminator is consumed and not included. The last
    /// line may be unterminated. Returns `None` once the input is exhausted.
    ///
    /// The line is consumed before it is decoded. On [Error::InvalidUtf8] the line and its
    /// terminator are gone and the next call reads the following line.
    fn read_utf8_line(&mut self) -> Result<Option<String>, Error> {
        if !self.prefetch(1)? {
            return Ok(None);
        }
        let mut line = Vec::new();
        let mut terminated = false;
        self.read_while(|view| {
            let (take, found) = {
                let data = view.chunk();
                match data.iter().position(|&b| b == b'\n') {
                    Some(index) => {
                        line.extend_from_slice(&data[..index]);
                        (index + 1, true)
                    }
                    None => {
                        line.extend_from_slice(data);
                        (data.len(), false)
                    }
                }
            };
            view.advance(take)?;
            terminated = found;
            Ok(!found)
        })?;
        if terminated && line.last() == Some(&b'\r') {
            line.pop();
        }
        String::from_utf8(line)
            .map(Some)
            .map_err(|err| Error::InvalidUtf8(err.utf8_error()))
    }

    /// Returns an iterator over the remaining lines.
    fn lines(&mut self) -> Lines<'_, Self>
    where
        Self: Sized,
    {
        Lines { input: self }
    }
}

/// Iterator over the lines of an [Input], created by [Input::lines].
pub struct Lines<'a, I> {
    input: &'a mut I,
}

impl<I: Input> Iterator for Lines<'_, I> {
    type Item = Result<String, Error>;

    fn next(&mut self) -> Option<Self::Item> {
        self.input.read_utf8_line().transpose()
    }
}
