//! ccsim — trace-driven last-level cache simulator with superblock
//! compression and Hawkeye replacement.
//!
//! The crate is organised bottom-up:
//!
//! - [`compression`] — line compressibility estimators and codecs
//! - [`replacement`] — the liveness oracles, PC predictor, RRIP generators,
//!   and the replacement controller
//! - [`cache`]       — packets, queues, tag arrays, and the top-level cache
//!   controller with its packet API
//! - [`mapping`]     — physical↔structural address maps for the prefetcher
//! - [`trace`]       — trace ingest and synthetic stream generation
//! - [`sim`]         — the simulation context and whole-hierarchy driver
//!
//! The `ccsim` binary wraps [`sim::Simulator`] behind a CLI.

pub mod cache;
pub mod compression;
pub mod config;
pub mod mapping;
pub mod replacement;
pub mod sim;
pub mod stats;
pub mod trace;

// ─────────────────────────────────────────────────────────────────────────────
// Top-level convenience re-exports for the most common entry points.
// ─────────────────────────────────────────────────────────────────────────────

/// Standalone BDI compressed-size estimate for one 64-byte line.
pub use compression::bdi::compress as bdi_compress;
/// Frequent-pattern compressed-size estimate for one 64-byte line.
pub use compression::bdi::fpc_compress;
/// Compression factor (1, 2 or 4) for a compressed size.
pub use compression::compression_factor;

pub use cache::{AccessType, Cache, CorePort, MainMemory, Packet, QueueKind};
pub use config::{CacheConfig, DpPolicy, SimConfig};
pub use replacement::{HawkeyePolicy, OptGen, OracleKind, ShctPredictor};
pub use sim::{SimContext, Simulator};
pub use trace::{load_trace, synthetic, TraceRecord};
