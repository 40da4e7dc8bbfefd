//! Read and write bytes across pooled, fixed-size chunks.
//!
//! # Overview
//!
//! A [PacketBuilder] accumulates writes into a [ChunkChain]: a FIFO sequence of fixed-size
//! [Chunk]s borrowed from a [ChunkPool]. Chunks are never resized or reallocated. When the
//! tail of the chain cannot hold the next write, another chunk is borrowed and linked. Once
//! writing is done, the builder is turned into a [Packet] that is drained exactly once by a
//! consumer. Every chunk the consumer advances past is returned to the pool immediately, so
//! steady-state producers and consumers do not allocate.
//!
//! Writing is expressed through the [Output] trait and reading through the [Input] trait.
//! Both are built around a single loop primitive ([Output::write_while_sized] and
//! [Input::read_while]) that hands the caller a short-lived handle into one chunk at a time.
//! All typed helpers (big and little endian integers, floats, bulk slices, UTF-8 text) are
//! default methods layered on top of those loops.
//!
//! # Example
//!
//! ```
//! use commonware_packet::{Input, Output, PacketBuilder};
//!
//! let mut builder = PacketBuilder::new();
//! builder.write_u32(0xdeadbeef).unwrap();
//! builder.write_utf8_line("hello").unwrap();
//! builder.fill(3, 0x7f).unwrap();
//!
//! let mut packet = builder.build();
//! assert_eq!(packet.remaining(), 4 + 6 + 3);
//! assert_eq!(packet.read_u32().unwrap(), 0xdeadbeef);
//! assert_eq!(packet.read_utf8_line().unwrap().as_deref(), Some("hello"));
//! assert_eq!(packet.read_bytes(3).unwrap(), vec![0x7f; 3]);
//! assert!(packet.is_empty());
//! ```
//!
//! # Status
//!
//! `commonware-packet` is **ALPHA** software and is not yet recommended for production use.
//! Developers should expect breaking changes and occasional instability.

#![doc(
    html_logo_url = "https://commonware.xyz/imgs/rustdoc_logo.svg",
    html_favicon_url = "https://commonware.xyz/favicon.ico"
)]

pub mod chain;
pub mod chunk;
pub mod error;
pub mod input;
pub mod memory;
pub mod output;
pub mod packet;
pub mod pool;
pub mod stream;

pub use chain::ChunkChain;
pub use chunk::Chunk;
pub use error::Error;
pub use input::{Input, Lines, ReadView};
pub use memory::Memory;
pub use output::{fill_bytewise, Output, Reservation};
pub use packet::{Packet, PacketBuilder};
pub use pool::{ChunkPool, PoolConfig};
pub use stream::{Reader, Sink, Source, Writer};
