//! Block-data compression estimators and codecs.
//!
//! Everything here operates on one 64-byte cache line at a time and is a
//! pure function: no estimator keeps state between lines.
//!
//! Submodules:
//! - [`bdi`]     — base-delta-immediate and frequent-pattern size estimators,
//!               plus the compression-factor derivation used at fill time
//! - [`cpack`]   — bit-granular pattern/dictionary codec with a real
//!               decompressor (round-trip capable)
//! - [`tracker`] — per-compression-factor fill histogram

pub mod bdi;
pub mod cpack;
pub mod tracker;

pub use bdi::{compression_factor, fill_compression_factor};
pub use tracker::CompressionTracker;

use crate::config::BLOCK_SIZE;

/// Which estimator sizes a line. Dispatch is exhaustive; there is no
/// "unknown code" path.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Codec {
    /// Lines are stored uncompressed.
    None,
    /// Base-delta-immediate estimate.
    Bdi,
    /// Frequent-pattern estimate.
    Fpc,
    /// Minimum of BDI and FPC.
    Best,
}

impl Codec {
    /// Estimated compressed size of `line`, in bytes, in `[1, 64]`.
    pub fn estimate(self, line: &[u8; BLOCK_SIZE]) -> u32 {
        match self {
            Codec::None => BLOCK_SIZE as u32,
            Codec::Bdi => bdi::compress(line),
            Codec::Fpc => bdi::fpc_compress(line),
            Codec::Best => bdi::compress(line).min(bdi::fpc_compress(line)),
        }
    }
}
