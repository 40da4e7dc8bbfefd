//! Pool of fixed-size chunks.
//!
//! Chunks are borrowed from a [ChunkPool] whenever a [crate::ChunkChain] needs more room and
//! are returned as soon as a reader has consumed them. A pool recycles only blocks of its own
//! chunk size and keeps at most [PoolConfig::max_pooled] of them; anything else is dropped
//! and deallocated, which bounds pool growth under bursty load.
//!
//! # Thread Safety
//!
//! [ChunkPool] is `Send + Sync` and can be safely shared across threads (one chain per
//! thread). The free list is a lock-free queue ([`crossbeam_queue::ArrayQueue`]) and all
//! bookkeeping uses atomic counters. Chunks and chains themselves are single-owner.
//!
//! # Pool Lifecycle
//!
//! Chunks hold a weak reference to the pool that lent them, so:
//! - A chunk dropped after its pool is gone is deallocated directly.
//! - The pool can be dropped while chunks are still in use.
//!
//! A process-wide default pool is available through [ChunkPool::global]. Any chain or
//! builder can instead be constructed against an explicit pool.

use crate::{Chunk, Memory};
use crossbeam_queue::ArrayQueue;
use prometheus_client::{
    metrics::{counter::Counter, gauge::Gauge},
    registry::Registry,
};
use std::{
    num::NonZeroUsize,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, OnceLock,
    },
};
use tracing::{debug, trace};

/// Builds a [NonZeroUsize] from a literal at compile time.
macro_rules! NZUsize {
    ($val:literal) => {
        const {
            match NonZeroUsize::new($val) {
                Some(n) => n,
                None => panic!("value must be non-zero"),
            }
        }
    };
}

/// Configuration for a chunk pool.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Capacity of every chunk served by the pool. Must be at least
    /// [PoolConfig::MIN_CHUNK_SIZE].
    pub chunk_size: NonZeroUsize,
    /// Maximum number of chunks kept on the free list.
    pub max_pooled: NonZeroUsize,
    /// Whether to pre-allocate `max_pooled` chunks on pool creation.
    pub prefill: bool,
}

impl Default for PoolConfig {
    /// 4KB chunks, up to 1000 pooled, not prefilled.
    fn default() -> Self {
        Self {
            chunk_size: NZUsize!(4096),
            max_pooled: NZUsize!(1000),
            prefill: false,
        }
    }
}

impl PoolConfig {
    /// Smallest supported chunk size. Every fixed-width primitive fits in a single chunk.
    pub const MIN_CHUNK_SIZE: usize = 8;

    /// Small chunks with a small free list, for exercising chunk boundaries.
    ///
    /// A `chunk_size` below [PoolConfig::MIN_CHUNK_SIZE] (zero included) is rejected when
    /// the pool is created.
    pub fn small(chunk_size: usize) -> Self {
        Self {
            chunk_size: NonZeroUsize::new(chunk_size).unwrap_or(NonZeroUsize::MIN),
            max_pooled: NZUsize!(16),
            prefill: false,
        }
    }

    /// Validates the configuration, panicking on invalid values.
    ///
    /// # Panics
    ///
    /// - `chunk_size < MIN_CHUNK_SIZE`
    fn validate(&self) {
        assert!(
            self.chunk_size.get() >= Self::MIN_CHUNK_SIZE,
            "chunk_size ({}) must be >= {}",
            self.chunk_size,
            Self::MIN_CHUNK_SIZE
        );
    }
}

/// Metrics for the chunk pool.
struct PoolMetrics {
    /// Number of chunks currently lent out.
    borrowed: Gauge,
    /// Number of chunks on the free list.
    available: Gauge,
    /// Total number of chunks lent out.
    borrows_total: Counter,
    /// Total number of fresh chunk allocations.
    allocations_total: Counter,
    /// Total number of returned chunks that were deallocated instead of pooled.
    discarded_total: Counter,
}

impl PoolMetrics {
    fn new(registry: &mut Registry) -> Self {
        let metrics = Self {
            borrowed: Gauge::default(),
            available: Gauge::default(),
            borrows_total: Counter::default(),
            allocations_total: Counter::default(),
            discarded_total: Counter::default(),
        };

        registry.register(
            "chunk_pool_borrowed",
            "Number of chunks currently borrowed from the pool",
            metrics.borrowed.clone(),
        );
        registry.register(
            "chunk_pool_available",
            "Number of chunks available in the pool",
            metrics.available.clone(),
        );
        registry.register(
            "chunk_pool_borrows",
            "Total number of chunks borrowed from the pool",
            metrics.borrows_total.clone(),
        );
        registry.register(
            "chunk_pool_allocations",
            "Total number of chunks allocated because the pool was empty",
            metrics.allocations_total.clone(),
        );
        registry.register(
            "chunk_pool_discarded",
            "Total number of returned chunks deallocated instead of pooled",
            metrics.discarded_total.clone(),
        );

        metrics
    }
}

/// Internal state of the chunk pool.
pub(crate) struct Shared {
    config: PoolConfig,
    freelist: ArrayQueue<Memory>,
    borrowed: AtomicUsize,
    metrics: PoolMetrics,
}

impl Shared {
    /// Record that a chunk lent by this pool has come back (to any pool, or to nowhere).
    fn returned(&self) {
        self.borrowed.fetch_sub(1, Ordering::Relaxed);
        self.metrics.borrowed.dec();
    }

    /// Place a memory block on the free list if it conforms and there is room.
    fn restore(&self, memory: Memory) {
        let size = memory.size();
        if size != self.config.chunk_size.get() {
            self.metrics.discarded_total.inc();
            debug!(size, "discarded non-conforming chunk");
            return;
        }
        match self.freelist.push(memory) {
            Ok(()) => {
                self.metrics.available.inc();
            }
            Err(_memory) => {
                // Free list full, memory is dropped and deallocated
                self.metrics.discarded_total.inc();
                trace!(size, "free list full, discarded chunk");
            }
        }
    }

    /// Called when a chunk lent by this pool is dropped.
    pub(crate) fn give_back(&self, memory: Memory) {
        self.returned();
        self.restore(memory);
    }
}

/// A pool of reusable, fixed-size chunks.
///
/// Cloning a [ChunkPool] yields another handle to the same free list.
#[derive(Clone)]
pub struct ChunkPool {
    inner: Arc<Shared>,
}

impl std::fmt::Debug for ChunkPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChunkPool")
            .field("config", &self.inner.config)
            .field("available", &self.available())
            .field("borrowed", &self.borrowed())
            .finish()
    }
}

impl Default for ChunkPool {
    /// A pool with the default configuration whose metrics are not exported.
    fn default() -> Self {
        Self::new(PoolConfig::default(), &mut Registry::default())
    }
}

impl ChunkPool {
    /// Creates a new chunk pool, registering its metrics with `registry`.
    ///
    /// # Panics
    ///
    /// Panics if the configuration is invalid.
    pub fn new(config: PoolConfig, registry: &mut Registry) -> Self {
        config.validate();

        let metrics = PoolMetrics::new(registry);
        let freelist = ArrayQueue::new(config.max_pooled.get());
        if config.prefill {
            for _ in 0..config.max_pooled.get() {
                let _ = freelist.push(Memory::new(config.chunk_size.get()));
            }
            metrics.available.set(freelist.len() as i64);
        }

        Self {
            inner: Arc::new(Shared {
                config,
                freelist,
                borrowed: AtomicUsize::new(0),
                metrics,
            }),
        }
    }

    /// Returns the process-wide default pool.
    pub fn global() -> &'static ChunkPool {
        static GLOBAL: OnceLock<ChunkPool> = OnceLock::new();
        GLOBAL.get_or_init(ChunkPool::default)
    }

    /// Borrows a chunk with both cursors at zero.
    ///
    /// Reuses a pooled chunk when one is available and allocates a fresh one otherwise. The
    /// chunk returns to this pool when dropped or passed to [ChunkPool::recycle].
    pub fn borrow(&self) -> Chunk {
        let memory = match self.inner.freelist.pop() {
            Some(memory) => {
                self.inner.metrics.available.dec();
                memory
            }
            None => {
                let size = self.inner.config.chunk_size.get();
                self.inner.metrics.allocations_total.inc();
                trace!(size, "allocated chunk");
                Memory::new(size)
            }
        };
        self.inner.borrowed.fetch_add(1, Ordering::Relaxed);
        self.inner.metrics.borrowed.inc();
        self.inner.metrics.borrows_total.inc();
        Chunk::from_memory(memory, Arc::downgrade(&self.inner))
    }

    /// Resets `chunk` and returns it to this pool.
    ///
    /// Chunks whose capacity differs from the pool chunk size, or that arrive while the free
    /// list is full, are deallocated instead.
    pub fn recycle(&self, chunk: Chunk) {
        let (memory, origin) = chunk.into_parts();
        if let Some(origin) = origin.upgrade() {
            origin.returned();
        }
        self.inner.restore(memory);
    }

    /// Returns the capacity of every chunk served by this pool.
    pub fn chunk_size(&self) -> usize {
        self.inner.config.chunk_size.get()
    }

    /// Returns the pool configuration.
    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    /// Returns the number of chunks on the free list.
    pub fn available(&self) -> usize {
        self.inner.freelist.len()
    }

    /// Returns the number of chunks lent out and not yet returned.
    pub fn borrowed(&self) -> usize {
        self.inner.borrowed.load(Ordering::Relaxed)
    }
}
