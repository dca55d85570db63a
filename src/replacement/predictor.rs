//! PC-signature history counter table (SHCT).
//!
//! A program counter is folded down to a 14-bit signature by a CRC-style
//! shift-and-xor loop, then mapped to a 5-bit saturating counter. Counters
//! start at the midpoint; a line's insertion PC is predicted cache-friendly
//! while its counter is at or above the midpoint.
//!
//! Two independent instances exist per cache: one trained by demand
//! intervals, one by prefetch intervals.

use std::collections::HashMap;

use crate::config::{MAX_SHCT, SHCT_SIZE};
use crate::replacement::counter::SaturatingCounter;

const CRC_POLYNOMIAL: u64 = 0xEDB8_8284;

/// Fold a block address or PC with 32 iterations of the CRC shift.
pub fn crc_hash(value: u64) -> u64 {
    let mut v = value;
    for _ in 0..32 {
        v = if v & 1 == 1 { (v >> 1) ^ CRC_POLYNOMIAL } else { v >> 1 };
    }
    v
}

/// Signature history counter table. Entries materialise lazily at the
/// midpoint value on first touch and persist for the whole run.
#[derive(Clone, Debug, Default)]
pub struct ShctPredictor {
    table: HashMap<u64, SaturatingCounter<MAX_SHCT>>,
}

const MIDPOINT: u32 = (1 + MAX_SHCT) / 2;

impl ShctPredictor {
    pub fn new() -> Self {
        Self::default()
    }

    fn signature(pc: u64) -> u64 {
        crc_hash(pc) % SHCT_SIZE
    }

    fn entry(&mut self, pc: u64) -> &mut SaturatingCounter<MAX_SHCT> {
        self.table
            .entry(Self::signature(pc))
            .or_insert_with(|| SaturatingCounter::new(MIDPOINT))
    }

    /// Reward the PC: its lines were worth caching.
    pub fn increment(&mut self, pc: u64) {
        self.entry(pc).increment();
    }

    /// Penalise the PC: its lines would have missed under the oracle.
    pub fn decrement(&mut self, pc: u64) {
        self.entry(pc).decrement();
    }

    /// `true` iff lines from this PC are predicted cache-friendly. An
    /// untrained PC defaults to friendly.
    pub fn get_prediction(&self, pc: u64) -> bool {
        match self.table.get(&Self::signature(pc)) {
            Some(counter) => counter.value() >= MIDPOINT,
            None => true,
        }
    }

    /// Raw counter value, if the PC has ever been trained.
    pub fn counter(&self, pc: u64) -> Option<u32> {
        self.table.get(&Self::signature(pc)).map(|c| c.value())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_is_deterministic_and_folds() {
        assert_eq!(crc_hash(0), 0);
        assert_eq!(crc_hash(0xDEAD_BEEF), crc_hash(0xDEAD_BEEF));
        assert_ne!(crc_hash(1), 1);
    }

    #[test]
    fn untrained_pc_is_friendly() {
        let p = ShctPredictor::new();
        assert!(p.get_prediction(0x401000));
    }

    #[test]
    fn training_saturates_at_ceiling() {
        let mut p = ShctPredictor::new();
        for _ in 0..32 {
            p.increment(0x42);
        }
        assert!(p.get_prediction(0x42));
        assert_eq!(p.counter(0x42), Some(MAX_SHCT));
    }

    #[test]
    fn detraining_saturates_at_floor() {
        let mut p = ShctPredictor::new();
        for _ in 0..32 {
            p.decrement(0x43);
        }
        assert!(!p.get_prediction(0x43));
        assert_eq!(p.counter(0x43), Some(0));
    }

    #[test]
    fn midpoint_is_the_friendly_boundary() {
        let mut p = ShctPredictor::new();
        // First touch materialises at 16 (friendly), one decrement drops to
        // 15 (averse), one increment restores it.
        p.decrement(0x99);
        assert!(!p.get_prediction(0x99));
        p.increment(0x99);
        assert!(p.get_prediction(0x99));
    }
}
