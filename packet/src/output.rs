//! Write side of the chunk protocol.
//!
//! Implementors of [Output] provide four primitives: [Output::write_u8],
//! [Output::write_while_sized], [Output::flush], and [Output::close]. Every other write
//! (fixed-width primitives in either byte order, bulk slices, fills, UTF-8 text, packets) is
//! a default method expressed through those primitives, so it is implemented exactly once.
//!
//! # Reservations
//!
//! [Output::write_while_sized] repeatedly hands its callback a [Reservation]: a claim on the
//! writable tail of one chunk. The callback places bytes into the reservation and reports
//! how much room it needs next. Bytes placed in a reservation become readable only once the
//! callback returns `Ok`. If the callback fails, that iteration is discarded and the chunk is
//! left at its last committed position; iterations committed before it stay valid.
//!
//! A reservation borrows the chain it came from, so it cannot be retained past the callback.

use crate::{Chunk, Error, Input, Packet};
use paste::paste;

/// A claim on the writable tail of a single chunk, valid for one write-while iteration.
pub struct Reservation<'a> {
    chunk: &'a mut Chunk,
    readable: &'a mut usize,
    writable: &'a mut usize,
    pending: usize,
}

impl<'a> Reservation<'a> {
    pub(crate) fn new(
        chunk: &'a mut Chunk,
        readable: &'a mut usize,
        writable: &'a mut usize,
    ) -> Self {
        Self {
            chunk,
            readable,
            writable,
            pending: 0,
        }
    }

    /// Returns the number of bytes that can still be placed in this reservation.
    #[inline]
    pub fn remaining(&self) -> usize {
        self.chunk.write_remaining() - self.pending
    }

    /// Returns the number of bytes placed so far (not yet committed).
    #[inline]
    pub const fn written(&self) -> usize {
        self.pending
    }

    /// Returns the unfilled part of the reservation.
    ///
    /// Call [Reservation::advance] after filling it in place.
    pub fn spare_mut(&mut self) -> &mut [u8] {
        let pending = self.pending;
        match self.chunk.reserve_for_write(0) {
            Ok(span) => &mut span[pending..],
            Err(_) => &mut [],
        }
    }

    /// Marks `n` bytes of [Reservation::spare_mut] as written.
    pub fn advance(&mut self, n: usize) -> Result<(), Error> {
        let remaining = self.remaining();
        if n > remaining {
            return Err(Error::InsufficientSpace {
                requested: n,
                remaining,
            });
        }
        self.pending += n;
        Ok(())
    }

    /// Places all of `src` in the reservation.
    pub fn put_slice(&mut self, src: &[u8]) -> Result<(), Error> {
        let remaining = self.remaining();
        if src.len() > remaining {
            return Err(Error::InsufficientSpace {
                requested: src.len(),
                remaining,
            });
        }
        self.spare_mut()[..src.len()].copy_from_slice(src);
        self.pending += src.len();
        Ok(())
    }

    /// Places a single byte in the reservation.
    pub fn put_u8(&mut self, value: u8) -> Result<(), Error> {
        self.put_slice(&[value])
    }

    /// Places `n` copies of `value` in the reservation.
    pub fn fill(&mut self, n: usize, value: u8) -> Result<(), Error> {
        let remaining = self.remaining();
        if n > remaining {
            return Err(Error::InsufficientSpace {
                requested: n,
                remaining,
            });
        }
        self.spare_mut()[..n].fill(value);
        self.pending += n;
        Ok(())
    }

    /// Makes the placed bytes readable, returning how many there were.
    ///
    /// A reservation dropped without being committed discards its bytes.
    pub fn commit(self) -> Result<usize, Error> {
        self.chunk.commit_write(self.pending)?;
        *self.readable += self.pending;
        *self.writable -= self.pending;
        Ok(self.pending)
    }
}

/// Writes `times` copies of `value` one byte at a time.
///
/// Used by [Output::fill] for outputs that do not support bulk fills. Produces the same bytes
/// as the bulk path.
pub fn fill_bytewise<O: Output + ?Sized>(out: &mut O, times: u64, value: u8) -> Result<(), Error> {
    for _ in 0..times {
        out.write_u8(value)?;
    }
    Ok(())
}

/// Writes fixed-width elements, never splitting a single element across chunks.
///
/// Completion is defined by the number of elements written, not by the room requested from
/// the growth loop.
fn write_elements<O, T, E, const W: usize>(out: &mut O, src: &[T], encode: E) -> Result<(), Error>
where
    O: Output + ?Sized,
    T: Copy,
    E: Fn(T) -> [u8; W],
{
    if src.is_empty() {
        return Ok(());
    }
    let mut written = 0;
    out.write_while_sized(W, |slot| {
        let count = (slot.remaining() / W).min(src.len() - written);
        for &element in &src[written..written + count] {
            slot.put_slice(&encode(element))?;
        }
        written += count;
        Ok(if written < src.len() { W } else { 0 })
    })
}

macro_rules! write_primitives {
    ($($ty:ident),*) => {
        paste! {
            $(
                #[doc = concat!("Writes a big-endian `", stringify!($ty), "`.")]
                fn [<write_ $ty>](&mut self, value: $ty) -> Result<(), Error> {
                    self.write_array(value.to_be_bytes())
                }

                #[doc = concat!("Writes a little-endian `", stringify!($ty), "`.")]
                fn [<write_ $ty _le>](&mut self, value: $ty) -> Result<(), Error> {
                    self.write_array(value.to_le_bytes())
                }
            )*
        }
    };
}

macro_rules! write_slices {
    ($($ty:ident),*) => {
        paste! {
            $(
                #[doc = concat!("Writes every `", stringify!($ty), "` in `src` big-endian.")]
                fn [<write_ $ty _slice>](&mut self, src: &[$ty]) -> Result<(), Error> {
                    write_elements(self, src, $ty::to_be_bytes)
                }
            )*
        }
    };
}

/// Destination of bytes, written across an unbounded number of chunks.
pub trait Output {
    /// Whether [Output::fill] writes whole chunk spans at a time. When `false`, fills fall back
    /// to [fill_bytewise].
    const BULK_FILL: bool = true;

    /// Writes a single byte.
    fn write_u8(&mut self, value: u8) -> Result<(), Error>;

    /// Hands `f` reservations until it returns `Ok(0)`.
    ///
    /// The first reservation has at least `initial` bytes of room. Each subsequent
    /// reservation has at least as many bytes as `f` returned (a new chunk is linked when the
    /// current one is too short). Fails with [Error::ChunkTooSmall] if a request exceeds the
    /// chunk size.
    fn write_while_sized<F>(&mut self, initial: usize, f: F) -> Result<(), Error>
    where
        F: FnMut(&mut Reservation<'_>) -> Result<usize, Error>;

    /// Exposes buffered bytes to the downstream sink, if any.
    fn flush(&mut self) -> Result<(), Error>;

    /// Flushes and releases all chunks. Calling `close` more than once has no effect.
    fn close(&mut self) -> Result<(), Error>;

    /// Hands `f` non-empty reservations until it returns `Ok(false)`.
    ///
    /// The same chunk may be handed out several times while it has room.
    fn write_while<F>(&mut self, mut f: F) -> Result<(), Error>
    where
        F: FnMut(&mut Reservation<'_>) -> Result<bool, Error>,
    {
        self.write_while_sized(1, |slot| Ok(usize::from(f(slot)?)))
    }

    /// Writes `bytes` into a single chunk.
    fn write_array<const N: usize>(&mut self, bytes: [u8; N]) -> Result<(), Error> {
        self.write_while_sized(N, |slot| {
            slot.put_slice(&bytes)?;
            Ok(0)
        })
    }

    /// Writes all of `src`, splitting it across chunks as needed.
    fn write_slice(&mut self, src: &[u8]) -> Result<(), Error> {
        if src.is_empty() {
            return Ok(());
        }
        let mut offset = 0;
        self.write_while(|slot| {
            let n = slot.remaining().min(src.len() - offset);
            slot.put_slice(&src[offset..offset + n])?;
            offset += n;
            Ok(offset < src.len())
        })
    }

    /// Writes `value` `times` times.
    fn fill(&mut self, times: u64, value: u8) -> Result<(), Error> {
        if !Self::BULK_FILL {
            return fill_bytewise(self, times, value);
        }
        if times == 0 {
            return Ok(());
        }
        let mut written = 0u64;
        self.write_while(|slot| {
            let n = (slot.remaining() as u64).min(times - written) as usize;
            slot.fill(n, value)?;
            written += n as u64;
            Ok(written < times)
        })
    }

    /// Writes a single signed byte.
    fn write_i8(&mut self, value: i8) -> Result<(), Error> {
        self.write_u8(value as u8)
    }

    write_primitives!(u16, i16, u32, i32, u64, i64, f32, f64);

    write_slices!(u16, i16, u32, i32, u64, i64, f32, f64);

    /// Writes the UTF-8 bytes of `s`.
    fn write_utf8(&mut self, s: &str) -> Result<(), Error> {
        self.write_slice(s.as_bytes())
    }

    /// Writes the UTF-8 bytes of `s` followed by `\n`.
    fn write_utf8_line(&mut self, s: &str) -> Result<(), Error> {
        self.write_utf8(s)?;
        self.write_u8(b'\n')
    }

    /// Drains `packet` into this output.
    ///
    /// Bytes leave `packet` only as they are committed here, so on error the unwritten
    /// remainder is still in `packet`.
    fn write_packet(&mut self, packet: &mut Packet) -> Result<(), Error> {
        if packet.is_empty() {
            return Ok(());
        }
        self.write_while(|slot| {
            packet.read_while(|view| {
                let n = view.remaining().min(slot.remaining());
                slot.put_slice(&view.chunk()[..n])?;
                view.advance(n)?;
                Ok(slot.remaining() > 0)
            })?;
            Ok(!packet.is_empty())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ChunkPool, PacketBuilder, PoolConfig};
    use prometheus_client::registry::Registry;
    use test_case::test_case;

    fn builder(chunk_size: usize) -> PacketBuilder {
        let pool = ChunkPool::new(PoolConfig::small(chunk_size), &mut Registry::default());
        PacketBuilder::with_pool(pool)
    }

    /// Forwards to a [PacketBuilder] but never fills in bulk.
    struct Bytewise(PacketBuilder);

    impl Output for Bytewise {
        const BULK_FILL: bool = false;

        fn write_u8(&mut self, value: u8) -> Result<(), Error> {
            self.0.write_u8(value)
        }

        fn write_while_sized<F>(&mut self, initial: usize, f: F) -> Result<(), Error>
        where
            F: FnMut(&mut Reservation<'_>) -> Result<usize, Error>,
        {
            self.0.write_while_sized(initial, f)
        }

        fn flush(&mut self) -> Result<(), Error> {
            self.0.flush()
        }

        fn close(&mut self) -> Result<(), Error> {
            self.0.close()
        }
    }

    #[test]
    fn test_write_while_spans_chunks() {
        let mut out = builder(16);
        let mut calls = 0;
        out.write_while(|slot| {
            calls += 1;
            let n = slot.remaining();
            slot.fill(n, calls as u8)?;
            Ok(calls < 3)
        })
        .unwrap();
        assert_eq!(calls, 3);

        let packet = out.build();
        assert_eq!(packet.chunk_count(), 3);
        let mut expected = vec![1u8; 16];
        expected.extend_from_slice(&[2; 16]);
        expected.extend_from_slice(&[3; 16]);
        assert_eq!(packet.to_vec(), expected);
    }

    #[test]
    fn test_write_while_reuses_chunk_with_room() {
        let mut out = builder(16);
        let mut calls = 0;
        out.write_while(|slot| {
            calls += 1;
            slot.put_u8(calls)?;
            Ok(calls < 4)
        })
        .unwrap();
        let packet = out.build();
        assert_eq!(packet.chunk_count(), 1);
        assert_eq!(packet.to_vec(), vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_write_while_sized_grows() {
        let mut out = builder(8);
        out.write_slice(&[0xaa; 5]).unwrap();

        // Only 3 bytes left in the tail, so asking for 4 links a new chunk
        let mut rooms = Vec::new();
        let mut requests = vec![4, 2, 0].into_iter();
        out.write_while_sized(4, |slot| {
            rooms.push(slot.remaining());
            slot.put_slice(&[0xbb, 0xbb])?;
            Ok(requests.next().unwrap())
        })
        .unwrap();
        assert_eq!(rooms, vec![8, 6, 4]);

        let packet = out.build();
        assert_eq!(packet.chunk_count(), 2);
        assert_eq!(packet.remaining(), 5 + 6);
    }

    #[test]
    fn test_write_while_sized_too_large() {
        let mut out = builder(8);
        let result = out.write_while_sized(9, |_| Ok(0));
        assert!(matches!(result, Err(Error::ChunkTooSmall(9, 8))));
        assert!(out.is_empty());
    }

    #[test]
    fn test_failed_iteration_rolls_back() {
        let mut out = builder(8);
        let mut calls = 0;
        let result = out.write_while(|slot| {
            calls += 1;
            if calls == 3 {
                slot.put_slice(&[0xee; 3])?;
                return Err(Error::Closed);
            }
            let n = slot.remaining();
            slot.fill(n, calls)?;
            Ok(true)
        });
        assert!(matches!(result, Err(Error::Closed)));

        // The first two iterations stay committed, the third leaves no trace
        assert_eq!(out.size(), 16);
        let packet = out.build();
        let mut expected = vec![1u8; 8];
        expected.extend_from_slice(&[2; 8]);
        assert_eq!(packet.to_vec(), expected);
    }

    #[test]
    fn test_overfilled_reservation_fails() {
        let mut out = builder(8);
        let result = out.write_while(|slot| {
            slot.put_slice(&[0; 9])?;
            Ok(false)
        });
        assert!(matches!(
            result,
            Err(Error::InsufficientSpace {
                requested: 9,
                remaining: 8
            })
        ));
        assert_eq!(out.size(), 0);
    }

    #[test]
    fn test_spare_mut_and_advance() {
        let mut out = builder(8);
        out.write_while(|slot| {
            let spare = slot.spare_mut();
            assert_eq!(spare.len(), 8);
            spare[..3].copy_from_slice(b"abc");
            slot.advance(3)?;
            assert_eq!(slot.written(), 3);
            assert_eq!(slot.remaining(), 5);
            assert!(slot.advance(6).is_err());
            Ok(false)
        })
        .unwrap();
        assert_eq!(out.build().to_vec(), b"abc".to_vec());
    }

    #[test_case(true; "bulk")]
    #[test_case(false; "bytewise")]
    fn test_fill_spans_chunks(bulk: bool) {
        let bytes = if bulk {
            let mut out = builder(1024);
            out.fill(5000, 0x7f).unwrap();
            let packet = out.build();
            assert_eq!(packet.chunk_count(), 5);
            packet.to_vec()
        } else {
            let mut out = Bytewise(builder(1024));
            out.fill(5000, 0x7f).unwrap();
            out.0.build().to_vec()
        };
        assert_eq!(bytes, vec![0x7f; 5000]);
    }

    #[test]
    fn test_fill_zero() {
        let mut out = builder(8);
        out.fill(0, 1).unwrap();
        assert!(out.is_empty());
        assert_eq!(out.chunk_count(), 0);
    }

    #[test]
    fn test_primitives_big_endian() {
        let mut out = builder(8);
        out.write_u64(0x0102030405060708).unwrap();
        assert_eq!(out.build().to_vec(), vec![1, 2, 3, 4, 5, 6, 7, 8]);
    }

    #[test]
    fn test_primitives_little_endian() {
        let mut out = builder(8);
        out.write_u64_le(0x0102030405060708).unwrap();
        assert_eq!(out.build().to_vec(), vec![8, 7, 6, 5, 4, 3, 2, 1]);
    }

    #[test]
    fn test_primitive_never_split() {
        let mut out = builder(8);
        out.write_u8(0xff).unwrap();
        out.write_u64(u64::MAX).unwrap();
        let packet = out.build();

        // The u64 did not fit in the 7 remaining bytes, so it starts a new chunk
        assert_eq!(packet.chunk_count(), 2);
        assert_eq!(packet.remaining(), 9);
    }

    #[test]
    fn test_mixed_primitives() {
        let mut out = builder(16);
        out.write_i8(-1).unwrap();
        out.write_u16(0x0102).unwrap();
        out.write_i16_le(-2).unwrap();
        out.write_u32(0x03040506).unwrap();
        out.write_f32(1.5).unwrap();
        out.write_f64_le(-0.25).unwrap();
        let mut expected = vec![0xff, 0x01, 0x02, 0xfe, 0xff, 0x03, 0x04, 0x05, 0x06];
        expected.extend_from_slice(&1.5f32.to_be_bytes());
        expected.extend_from_slice(&(-0.25f64).to_le_bytes());
        assert_eq!(out.build().to_vec(), expected);
    }

    #[test]
    fn test_write_slices() {
        let mut out = builder(10);
        let values: Vec<u32> = (0..10).collect();
        out.write_u32_slice(&values).unwrap();
        let packet = out.build();

        // Two u32s fit per 10-byte chunk, the remaining 2 bytes stay unused
        assert_eq!(packet.chunk_count(), 5);
        let expected: Vec<u8> = values.iter().flat_map(|v| v.to_be_bytes()).collect();
        assert_eq!(packet.to_vec(), expected);
    }

    #[test]
    fn test_write_slice_with_offset() {
        let mut out = builder(8);
        let values = [1.0f64, 2.0, 3.0, 4.0];
        out.write_f64_slice(&values[1..3]).unwrap();
        out.write_i16_slice(&[]).unwrap();
        let expected: Vec<u8> = [2.0f64, 3.0].iter().flat_map(|v| v.to_be_bytes()).collect();
        assert_eq!(out.build().to_vec(), expected);
    }

    #[test]
    fn test_write_utf8() {
        let mut out = builder(8);
        out.write_utf8("héllo wörld").unwrap();
        out.write_utf8_line("!").unwrap();
        assert_eq!(out.build().to_vec(), "héllo wörld!\n".as_bytes().to_vec());
    }

    #[test]
    fn test_write_packet() {
        let mut source = builder(8);
        for i in 0..50u8 {
            source.write_u8(i).unwrap();
        }
        let mut source = source.build();

        let mut out = builder(16);
        out.write_u8(0xff).unwrap();
        out.write_packet(&mut source).unwrap();
        assert!(source.is_empty());

        let mut expected = vec![0xff];
        expected.extend(0..50u8);
        assert_eq!(out.build().to_vec(), expected);
    }

    #[test]
    fn test_write_packet_into_closed_output() {
        let mut source = builder(8);
        source.write_slice(b"twelve bytes").unwrap();
        let mut source = source.build();

        let mut out = builder(8);
        out.close().unwrap();
        assert!(matches!(out.write_packet(&mut source), Err(Error::Closed)));
        assert_eq!(source.remaining(), 12);
        assert_eq!(source.to_vec(), b"twelve bytes".to_vec());
    }

    #[test]
    fn test_write_packet_empty() {
        let mut out = builder(8);
        out.write_packet(&mut Packet::empty()).unwrap();
        assert!(out.is_empty());
        assert_eq!(out.chunk_count(), 0);
    }
}
