use commonware_packet::{fill_bytewise, ChunkPool, Output, PacketBuilder, PoolConfig};
use criterion::{criterion_group, Criterion};
use prometheus_client::registry::Registry;
use std::num::NonZeroUsize;

fn bench_fill(c: &mut Criterion) {
    let config = PoolConfig {
        chunk_size: NonZeroUsize::new(4096).unwrap(),
        max_pooled: NonZeroUsize::new(1024).unwrap(),
        prefill: true,
    };
    let pool = ChunkPool::new(config, &mut Registry::default());
    for n in [64u64, 4_096, 65_536, 1_048_576] {
        c.bench_function(&format!("{}/mode=bulk n={}", module_path!(), n), |b| {
            b.iter(|| {
                let mut builder = PacketBuilder::with_pool(pool.clone());
                builder.fill(n, 0x7f).unwrap();
                builder.build()
            })
        });
        c.bench_function(&format!("{}/mode=bytewise n={}", module_path!(), n), |b| {
            b.iter(|| {
                let mut builder = PacketBuilder::with_pool(pool.clone());
                fill_bytewise(&mut builder, n, 0x7f).unwrap();
                builder.build()
            })
        });
    }
}

criterion_group! {
    name = benches;
    config = Criterion::default().sample_size(10);
    targets = bench_fill
}
