//! Error types for packet operations

use thiserror::Error;

/// Error type for packet operations
#[derive(Error, Debug)]
pub enum Error {
    #[error("out of bounds: offset={offset} len={len} capacity={capacity}")]
    OutOfBounds {
        offset: usize,
        len: usize,
        capacity: usize,
    },
    #[error("insufficient space: requested={requested} remaining={remaining}")]
    InsufficientSpace { requested: usize, remaining: usize },
    #[error("insufficient data: requested={requested} remaining={remaining}")]
    InsufficientData { requested: usize, remaining: usize },
    #[error("request exceeds chunk size: {0} > {1}")]
    ChunkTooSmall(usize, usize), // requested, chunk size
    #[error("unexpected end of input")]
    EndOfInput,
    #[error("closed")]
    Closed,
    #[error("sink accepted zero bytes")]
    WriteZero,
    #[error("invalid utf-8: {0}")]
    InvalidUtf8(#[from] std::str::Utf8Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
