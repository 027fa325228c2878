#![forbid(unsafe_code)]
//! Error types for norlog.
//!
//! Defines `NorlogError` and a `Result<T>` alias used throughout the
//! workspace. An empty ring is not represented here: `fetch` reports it
//! in-band as `Ok(false)`.

use thiserror::Error;

/// Unified error type for all norlog operations.
///
/// After any flash adapter failure surfaces through `Io`/`OutOfBounds`, the
/// in-RAM positions are suspect and the caller should re-run `scan`.
#[derive(Debug, Error)]
pub enum NorlogError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("flash access out of bounds: addr={addr:#010x} len={len}")]
    OutOfBounds { addr: u32, len: usize },

    #[error("corrupt sector {sector}: {detail}")]
    Corruption { sector: u32, detail: String },

    #[error("partition is mid-format; reformat required")]
    InterruptedFormat,

    #[error("schema version mismatch in sector {sector}: expected {expected:#010x}, found {found:#010x}")]
    VersionMismatch {
        sector: u32,
        expected: u32,
        found: u32,
    },

    #[error("ring invariant violated: no FREE sector on the partition")]
    NoFreeSector,

    #[error("payload length mismatch: expected {expected} bytes, got {actual}")]
    ObjectSizeMismatch { expected: usize, actual: usize },

    #[error("sector index {sector} out of range (partition has {count} sectors)")]
    SectorOutOfRange { sector: u32, count: u32 },
}

/// Result alias using `NorlogError`.
pub type Result<T> = std::result::Result<T, NorlogError>;
