//! Physical↔structural address mapping for the prefetcher.
//!
//! - [`amc`]     — the bounded on-chip address-map caches (PS and SP sides)
//! - [`backing`] — the unbounded off-chip store absorbing AMC evictions

pub mod amc;
pub mod backing;

pub use amc::AddressMapCache;
pub use backing::OffChipMap;
