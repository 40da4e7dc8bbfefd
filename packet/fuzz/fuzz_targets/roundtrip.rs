#![no_main]

use arbitrary::Arbitrary;
use commonware_packet::{ChunkPool, Error, Input, Output, PacketBuilder, PoolConfig};
use libfuzzer_sys::fuzz_target;
use prometheus_client::registry::Registry;

#[derive(Arbitrary, Debug)]
enum WriteOp {
    U8(u8),
    U16(u16),
    U32Le(u32),
    U64(u64),
    Slice(Vec<u8>),
    U32Slice(Vec<u32>),
    Fill(u16, u8),
    Line(String),
    Rollback(Vec<u8>),
}

#[derive(Arbitrary, Debug)]
enum ReadOp {
    U8,
    U16,
    U32Le,
    U64,
    Bytes(u16),
    Discard(u16),
    Line,
    Available(u16),
}

#[derive(Arbitrary, Debug)]
struct FuzzInput {
    chunk_size: u16,
    writes: Vec<WriteOp>,
    reads: Vec<ReadOp>,
}

fn fuzz(input: FuzzInput) {
    let chunk_size = (input.chunk_size as usize).max(PoolConfig::MIN_CHUNK_SIZE);
    let pool = ChunkPool::new(PoolConfig::small(chunk_size), &mut Registry::default());

    // Mirror every write into a flat model
    let mut builder = PacketBuilder::with_pool(pool.clone());
    let mut model = Vec::new();
    for op in input.writes {
        match op {
            WriteOp::U8(v) => {
                builder.write_u8(v).unwrap();
                model.push(v);
            }
            WriteOp::U16(v) => {
                builder.write_u16(v).unwrap();
                model.extend_from_slice(&v.to_be_bytes());
            }
            WriteOp::U32Le(v) => {
                builder.write_u32_le(v).unwrap();
                model.extend_from_slice(&v.to_le_bytes());
            }
            WriteOp::U64(v) => {
                builder.write_u64(v).unwrap();
                model.extend_from_slice(&v.to_be_bytes());
            }
            WriteOp::Slice(v) => {
                builder.write_slice(&v).unwrap();
                model.extend_from_slice(&v);
            }
            WriteOp::U32Slice(v) => {
                builder.write_u32_slice(&v).unwrap();
                model.extend(v.iter().flat_map(|value| value.to_be_bytes()));
            }
            WriteOp::Fill(times, value) => {
                let times = times as u64;
                builder.fill(times, value).unwrap();
                model.extend(std::iter::repeat(value).take(times as usize));
            }
            WriteOp::Line(s) => {
                builder.write_utf8_line(&s).unwrap();
                model.extend_from_slice(s.as_bytes());
                model.push(b'\n');
            }
            WriteOp::Rollback(v) => {
                let result = builder.write_while(|slot| {
                    let n = slot.remaining().min(v.len());
                    slot.put_slice(&v[..n])?;
                    Err(Error::Closed)
                });
                assert!(matches!(result, Err(Error::Closed)));
            }
        }
        assert_eq!(builder.size(), model.len());
    }

    let mut packet = builder.build();
    assert_eq!(packet.to_vec(), model);

    // Every read must agree with the model, and failed reads must consume nothing
    let mut cursor = 0;
    for op in input.reads {
        let left = &model[cursor..];
        match op {
            ReadOp::U8 => match packet.read_u8() {
                Ok(v) => {
                    assert_eq!(v, left[0]);
                    cursor += 1;
                }
                Err(Error::EndOfInput) => assert!(left.is_empty()),
                Err(err) => panic!("unexpected error: {err}"),
            },
            ReadOp::U16 => match packet.read_u16() {
                Ok(v) => {
                    assert_eq!(v.to_be_bytes(), left[..2]);
                    cursor += 2;
                }
                Err(Error::EndOfInput) => assert!(left.len() < 2),
                Err(err) => panic!("unexpected error: {err}"),
            },
            ReadOp::U32Le => match packet.read_u32_le() {
                Ok(v) => {
                    assert_eq!(v.to_le_bytes(), left[..4]);
                    cursor += 4;
                }
                Err(Error::EndOfInput) => assert!(left.len() < 4),
                Err(err) => panic!("unexpected error: {err}"),
            },
            ReadOp::U64 => match packet.read_u64() {
                Ok(v) => {
                    assert_eq!(v.to_be_bytes(), left[..8]);
                    cursor += 8;
                }
                Err(Error::EndOfInput) => assert!(left.len() < 8),
                Err(err) => panic!("unexpected error: {err}"),
            },
            ReadOp::Bytes(n) => {
                let n = n as usize;
                match packet.read_bytes(n) {
                    Ok(bytes) => {
                        assert_eq!(bytes, left[..n]);
                        cursor += n;
                    }
                    Err(Error::EndOfInput) => assert!(left.len() < n),
                    Err(err) => panic!("unexpected error: {err}"),
                }
            }
            ReadOp::Discard(n) => {
                let skipped = packet.discard(n as usize).unwrap();
                assert_eq!(skipped, (n as usize).min(left.len()));
                cursor += skipped;
            }
            ReadOp::Line => {
                let end = left.iter().position(|&b| b == b'\n');
                let raw = match end {
                    Some(index) => &left[..index],
                    None => left,
                };
                match packet.read_utf8_line() {
                    Ok(Some(line)) => {
                        let expected = match end {
                            Some(_) => raw.strip_suffix(b"\r").unwrap_or(raw),
                            None => raw,
                        };
                        assert_eq!(line.as_bytes(), expected);
                        cursor += raw.len() + usize::from(end.is_some());
                    }
                    Ok(None) => assert!(left.is_empty()),
                    Err(Error::InvalidUtf8(_)) => {
                        assert!(std::str::from_utf8(raw).is_err());
                        cursor += raw.len() + usize::from(end.is_some());
                    }
                    Err(err) => panic!("unexpected error: {err}"),
                }
            }
            ReadOp::Available(n) => {
                let mut buf = vec![0; n as usize];
                let read = packet.read_available(&mut buf).unwrap();
                assert_eq!(read, buf.len().min(left.len()));
                assert_eq!(buf[..read], left[..read]);
                cursor += read;
            }
        }
        assert_eq!(packet.remaining(), model.len() - cursor);
    }

    // Drained or released, every chunk goes back
    drop(packet);
    assert_eq!(pool.borrowed(), 0);
}

fuzz_target!(|input: FuzzInput| {
    fuzz(input);
});
