#![no_main]

use arbitrary::Arbitrary;
use commonware_packet::{ChunkPool, Error, Input, Output, PoolConfig, Reader, Source, Writer};
use libfuzzer_sys::fuzz_target;
use prometheus_client::registry::Registry;

#[derive(Arbitrary, Debug)]
struct FuzzInput {
    chunk_size: u16,
    writes: Vec<Vec<u8>>,
    refills: Vec<u8>,
}

/// Yields the data in arbitrarily sized pieces.
struct Pieces<'a> {
    data: &'a [u8],
    sizes: &'a [u8],
}

impl Source for Pieces<'_> {
    fn fill(&mut self, buf: &mut [u8]) -> Result<usize, Error> {
        let size = match self.sizes.split_first() {
            Some((&size, rest)) => {
                self.sizes = rest;
                (size as usize).max(1)
            }
            None => usize::MAX,
        };
        let n = size.min(buf.len()).min(self.data.len());
        buf[..n].copy_from_slice(&self.data[..n]);
        self.data = &self.data[n..];
        Ok(n)
    }
}

fn fuzz(input: FuzzInput) {
    let chunk_size = (input.chunk_size as usize).max(PoolConfig::MIN_CHUNK_SIZE);
    let pool = ChunkPool::new(PoolConfig::small(chunk_size), &mut Registry::default());

    let mut expected = Vec::new();
    let mut writer = Writer::with_pool(Vec::new(), pool.clone());
    for write in &input.writes {
        writer.write_slice(write).unwrap();
        expected.extend_from_slice(write);
        assert_eq!(writer.get_ref().len() + writer.buffered(), expected.len());
    }
    writer.close().unwrap();
    assert_eq!(writer.get_ref(), &expected);

    let source = Pieces {
        data: &expected,
        sizes: &input.refills,
    };
    let mut reader = Reader::with_pool(source, pool.clone());
    assert_eq!(reader.read_to_end().unwrap(), expected);
    assert!(matches!(reader.read_u8(), Err(Error::EndOfInput)));
    drop(reader);
    assert_eq!(pool.borrowed(), 0);
}

fuzz_target!(|input: FuzzInput| {
    fuzz(input);
});
