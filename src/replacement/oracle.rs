//! Unbounded oracle variants over the quanta ring.
//!
//! Where [`super::optgen::OptGen`] models a fixed modular window, the
//! variants here let the liveness vector grow and instead drop quanta from
//! the front as soon as one saturates: once a quantum reaches capacity no
//! later interval spanning it can fit, so everything at or before it is dead
//! history.
//!
//! Three occupancy models share that skeleton:
//! - [`UnboundedOptGen`]  — one line, one occupancy unit
//! - [`SizeAwareOptGen`]  — occupancy in bytes, lines add `64 / cf`
//! - [`YaccGen`]          — per-way superblock slots, lines share a way only
//!   with their own superblock at the same compression factor
//!
//! They are deployed behind the [`OracleKind`] tagged variant with a common
//! `try_cache` operation.

use crate::config::BLOCK_SIZE;
use crate::replacement::ring::QuantaRing;

// ─────────────────────────────────────────────────────────────────────────────
// Line-granular unbounded oracle
// ─────────────────────────────────────────────────────────────────────────────

/// Occupancy oracle counting whole lines against a line-count capacity.
#[derive(Clone, Debug)]
pub struct UnboundedOptGen {
    liveness: QuantaRing<u32>,
    cache_size: u32,
    num_cached: u64,
    num_attempted: u64,
}

impl UnboundedOptGen {
    pub fn new(cache_size: u32) -> Self {
        Self {
            liveness: QuantaRing::new(),
            cache_size,
            num_cached: 0,
            num_attempted: 0,
        }
    }

    /// Record an attempted interval `[last_quanta, curr_quanta]` and commit
    /// it when it fits. Returns whether it fit.
    pub fn try_cache(&mut self, last_quanta: u64, curr_quanta: u64) -> bool {
        self.num_attempted += 1;
        if !self.should_cache(last_quanta, curr_quanta) {
            return false;
        }

        // Raise occupancy over the retained part of the interval, remembering
        // the newest quantum that saturates.
        let mut overflow: Option<u64> = None;
        let mut q = self.liveness.clamp(last_quanta);
        while self.liveness.in_bounds(q) && q <= curr_quanta {
            let entry = self.liveness.get_mut(q).expect("in bounds");
            *entry += 1;
            if *entry >= self.cache_size {
                overflow = Some(q);
            }
            q += 1;
        }
        if let Some(q) = overflow {
            self.liveness.truncate_through(q);
        }

        // Grow the vector through the current quantum.
        self.liveness.extend_to(curr_quanta, 1);

        self.num_cached += 1;
        true
    }

    /// Fit check without mutation. An interval starting before the retained
    /// window is unfittable: the cache was already full back then.
    pub fn should_cache(&self, last_quanta: u64, curr_quanta: u64) -> bool {
        !self.liveness.before_start(last_quanta) && curr_quanta >= last_quanta
    }

    pub fn num_hits(&self) -> u64 {
        self.num_cached
    }

    pub fn num_accesses(&self) -> u64 {
        self.num_attempted
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Byte-granular oracle
// ─────────────────────────────────────────────────────────────────────────────

/// Occupancy oracle counting bytes against `cache_lines * 64`. A compressed
/// line contributes `64 / cf` bytes.
#[derive(Clone, Debug)]
pub struct SizeAwareOptGen {
    liveness: QuantaRing<u64>,
    capacity_bytes: u64,
    num_cached: u64,
    num_attempted: u64,
}

impl SizeAwareOptGen {
    pub fn new(cache_lines: u32) -> Self {
        Self {
            liveness: QuantaRing::new(),
            capacity_bytes: cache_lines as u64 * BLOCK_SIZE as u64,
            num_cached: 0,
            num_attempted: 0,
        }
    }

    /// Attempt `[last_quanta, curr_quanta]` for a line compressed by factor
    /// `cf` (1, 2 or 4).
    pub fn try_cache(&mut self, last_quanta: u64, curr_quanta: u64, cf: u32) -> bool {
        let bytes = BLOCK_SIZE as u64 / cf as u64;
        self.num_attempted += 1;
        if !self.should_cache(last_quanta, curr_quanta, bytes) {
            return false;
        }

        let mut overflow: Option<u64> = None;
        let mut q = self.liveness.clamp(last_quanta);
        while self.liveness.in_bounds(q) && q <= curr_quanta {
            let entry = self.liveness.get_mut(q).expect("in bounds");
            *entry += bytes;
            if *entry >= self.capacity_bytes {
                overflow = Some(q);
            }
            q += 1;
        }
        if let Some(q) = overflow {
            self.liveness.truncate_through(q);
        }
        self.liveness.extend_to(curr_quanta, bytes);

        self.num_cached += 1;
        true
    }

    fn should_cache(&self, last_quanta: u64, curr_quanta: u64, bytes: u64) -> bool {
        if self.liveness.before_start(last_quanta) || curr_quanta < last_quanta {
            return false;
        }
        let mut q = self.liveness.clamp(last_quanta);
        while self.liveness.in_bounds(q) && q <= curr_quanta {
            if self.liveness.get(q).expect("in bounds") + bytes > self.capacity_bytes {
                return false;
            }
            q += 1;
        }
        true
    }

    pub fn num_hits(&self) -> u64 {
        self.num_cached
    }

    pub fn num_accesses(&self) -> u64 {
        self.num_attempted
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Superblock-aware oracle
// ─────────────────────────────────────────────────────────────────────────────

/// One way of the modelled set at one quantum. `cf == 0` means empty.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
struct YaccSlot {
    sb_tag: u64,
    cf: u32,
    used: u32,
}

impl YaccSlot {
    fn is_empty(&self) -> bool {
        self.cf == 0
    }

    /// Whether a line of superblock `sb_tag` at factor `cf` can coexist here.
    fn admits(&self, sb_tag: u64, cf: u32) -> bool {
        self.is_empty() || (self.sb_tag == sb_tag && self.cf == cf && self.used < cf)
    }
}

/// Occupancy oracle for the compressed organisation: each way holds one
/// superblock at one compression factor, with up to `cf` co-resident lines.
#[derive(Clone, Debug)]
pub struct YaccGen {
    liveness: QuantaRing<Vec<YaccSlot>>,
    num_ways: usize,
    window: usize,
    num_cached: u64,
    num_attempted: u64,
}

impl YaccGen {
    /// `num_ways` models the set's associativity; `window` bounds how much
    /// history is retained.
    pub fn new(num_ways: usize, window: usize) -> Self {
        Self {
            liveness: QuantaRing::new(),
            num_ways,
            window,
            num_cached: 0,
            num_attempted: 0,
        }
    }

    /// A way fits the interval iff every retained quantum in it is empty or
    /// hosts the same superblock at the same factor with a slot to spare.
    fn way_fits(&self, way: usize, sb_tag: u64, cf: u32, last: u64, curr: u64) -> bool {
        let mut q = self.liveness.clamp(last);
        while self.liveness.in_bounds(q) && q <= curr {
            if !self.liveness.get(q).expect("in bounds")[way].admits(sb_tag, cf) {
                return false;
            }
            q += 1;
        }
        true
    }

    /// Newest quantum at which the way is occupied, used as the tie-break.
    fn way_end_time(&self, way: usize) -> Option<u64> {
        self.liveness
            .iter()
            .filter(|(_, ways)| !ways[way].is_empty())
            .map(|(q, _)| q)
            .last()
    }

    /// Attempt to cache a line of superblock `sb_tag` compressed by `cf`
    /// over `[last_quanta, curr_quanta]`.
    pub fn try_cache(&mut self, last_quanta: u64, curr_quanta: u64, sb_tag: u64, cf: u32) -> bool {
        assert!(matches!(cf, 1 | 2 | 4), "invalid compression factor {cf}");
        self.num_attempted += 1;

        if self.liveness.before_start(last_quanta) || curr_quanta < last_quanta {
            return false;
        }

        // Among fitting ways, prefer the one that stayed occupied latest.
        let victim = (0..self.num_ways)
            .filter(|&w| self.way_fits(w, sb_tag, cf, last_quanta, curr_quanta))
            .max_by_key(|&w| (self.way_end_time(w).map(|q| q + 1).unwrap_or(0), std::cmp::Reverse(w)));
        let Some(way) = victim else {
            return false;
        };

        self.liveness
            .extend_to(curr_quanta, vec![YaccSlot::default(); self.num_ways]);
        let mut q = self.liveness.clamp(last_quanta);
        while q <= curr_quanta {
            let slot = &mut self.liveness.get_mut(q).expect("extended")[way];
            if slot.is_empty() {
                *slot = YaccSlot { sb_tag, cf, used: 1 };
            } else {
                slot.used += 1;
            }
            q += 1;
        }

        // Keep the history bounded.
        if self.liveness.len() > self.window {
            let drop_through =
                self.liveness.head_quanta() + (self.liveness.len() - self.window) as u64 - 1;
            self.liveness.truncate_through(drop_through);
        }

        self.num_cached += 1;
        true
    }

    pub fn num_hits(&self) -> u64 {
        self.num_cached
    }

    pub fn num_accesses(&self) -> u64 {
        self.num_attempted
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tagged variant
// ─────────────────────────────────────────────────────────────────────────────

/// The oracle family behind one interface. All variants answer `try_cache`
/// for an interval; the superblock tag and compression factor are ignored by
/// the variants that do not model them.
#[derive(Clone, Debug)]
pub enum OracleKind {
    Unbounded(UnboundedOptGen),
    SizeAware(SizeAwareOptGen),
    Yacc(YaccGen),
}

impl OracleKind {
    pub fn try_cache(&mut self, last_quanta: u64, curr_quanta: u64, sb_tag: u64, cf: u32) -> bool {
        match self {
            OracleKind::Unbounded(gen) => gen.try_cache(last_quanta, curr_quanta),
            OracleKind::SizeAware(gen) => gen.try_cache(last_quanta, curr_quanta, cf),
            OracleKind::Yacc(gen) => gen.try_cache(last_quanta, curr_quanta, sb_tag, cf),
        }
    }

    pub fn num_hits(&self) -> u64 {
        match self {
            OracleKind::Unbounded(gen) => gen.num_hits(),
            OracleKind::SizeAware(gen) => gen.num_hits(),
            OracleKind::Yacc(gen) => gen.num_hits(),
        }
    }

    pub fn num_accesses(&self) -> u64 {
        match self {
            OracleKind::Unbounded(gen) => gen.num_accesses(),
            OracleKind::SizeAware(gen) => gen.num_accesses(),
            OracleKind::Yacc(gen) => gen.num_accesses(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unbounded_truncates_saturated_quanta() {
        let mut gen = UnboundedOptGen::new(2);
        assert!(gen.try_cache(1, 2)); // fills quanta 0..=2 at 1
        assert!(gen.try_cache(0, 6)); // saturates 0..=2, window now starts at 3
        assert!(gen.try_cache(4, 8));
        // quantum 5 is gone once 4..=6 saturate
        assert!(!gen.try_cache(5, 9));
        assert_eq!(gen.num_hits(), 3);
        assert_eq!(gen.num_accesses(), 4);
    }

    #[test]
    fn size_aware_admits_more_compressed_lines() {
        // One line of space. Uncompressed lines conflict; cf=4 lines (16
        // bytes each) pack four deep.
        let mut gen = SizeAwareOptGen::new(1);
        assert!(gen.try_cache(0, 10, 4));
        assert!(gen.try_cache(0, 10, 4));
        assert!(gen.try_cache(0, 10, 4));
        assert!(gen.try_cache(0, 10, 4));
        assert!(!gen.try_cache(0, 10, 1));

        let mut gen = SizeAwareOptGen::new(1);
        assert!(gen.try_cache(0, 10, 1));
        assert!(!gen.try_cache(0, 10, 1));
    }

    #[test]
    fn yacc_shares_ways_only_within_a_superblock() {
        let mut gen = YaccGen::new(2, 1024);
        // Overlapping intervals of one superblock at cf=2 share a way.
        assert!(gen.try_cache(0, 10, 0, 2));
        assert!(gen.try_cache(4, 14, 0, 2));
        // A different superblock takes the other way.
        assert!(gen.try_cache(0, 20, 1, 1));
        // Both ways full: reject.
        assert!(!gen.try_cache(1, 21, 1, 1));
        assert!(!gen.try_cache(1, 22, 0, 2));
    }

    #[test]
    fn yacc_rejects_mismatched_factor_within_superblock() {
        let mut gen = YaccGen::new(1, 1024);
        assert!(gen.try_cache(0, 10, 7, 4));
        // Same superblock, different factor: cannot share the way.
        assert!(!gen.try_cache(2, 8, 7, 2));
    }
}
