//! Size-priority shadow tag arrays.
//!
//! An auxiliary array mirrors one real set (same ways, same slots-per-way)
//! but applies its own eviction preference: each array carries a
//! *prioritized size index* — a bucket in `0..=7` covering compressed sizes
//! `8*i+1 ..= 8*(i+1)` bytes — and victimises lines outside the preferred
//! band first. Running two shadows with different priorities against the
//! same access stream tells the controller which preference would have
//! earned more hits on that set.

use crate::cache::block::{CompressedWay, EVICT_ALL};
use crate::config::{LOG2_MAX_COMPRESSIBILITY, MAX_COMPRESSIBILITY, MAX_RRPV};

/// Bucket of a compressed size: 0 for 1–8 bytes up to 7 for 57–64 bytes.
pub fn size_bucket(compressed_size: u32) -> u32 {
    debug_assert!((1..=64).contains(&compressed_size));
    (compressed_size - 1) / 8
}

/// Shadow of one set with a size-priority eviction preference.
#[derive(Clone, Debug)]
pub struct AuxiliaryTagArray {
    rrpv: Vec<[u8; MAX_COMPRESSIBILITY]>,
    ways: Vec<CompressedWay>,
    log2_sets: u32,
    /// Preferred compressibility band; lines at or under it are protected.
    pub prioritized_size_index: u32,

    pub hits: u64,
    pub accesses: u64,
}

impl AuxiliaryTagArray {
    pub fn new(num_ways: usize, log2_sets: u32, prioritized_size_index: u32) -> Self {
        Self {
            rrpv: vec![[MAX_RRPV; MAX_COMPRESSIBILITY]; num_ways],
            ways: vec![CompressedWay::default(); num_ways],
            log2_sets,
            prioritized_size_index,
            hits: 0,
            accesses: 0,
        }
    }

    fn sb_tag_of(&self, address: u64) -> u64 {
        address >> (LOG2_MAX_COMPRESSIBILITY + self.log2_sets)
    }

    fn blk_id_of(address: u64) -> u32 {
        (address % MAX_COMPRESSIBILITY as u64) as u32
    }

    /// Re-seed the shadow from the real set's current contents.
    pub fn copy_from(&mut self, existing: &[CompressedWay]) {
        for (way, src) in self.ways.iter_mut().zip(existing) {
            way.sb_tag = src.sb_tag;
            way.compression_factor = src.compression_factor;
            for slot in 0..src.compression_factor as usize {
                way.slots[slot] = src.slots[slot].clone();
            }
        }
    }

    /// Locate the slot holding `address`, if resident in the shadow.
    pub fn find(&self, address: u64) -> Option<(usize, usize)> {
        let sb_tag = self.sb_tag_of(address);
        let blk_id = Self::blk_id_of(address);
        for (w, way) in self.ways.iter().enumerate() {
            if way.sb_tag != sb_tag {
                continue;
            }
            for (s, slot) in way.live_slots().iter().enumerate() {
                if slot.valid && slot.blk_id == blk_id {
                    return Some((w, s));
                }
            }
        }
        None
    }

    /// Install a line; mirrors the real array's fill but carries only the
    /// identity and size the shadow needs.
    pub fn fill(&mut self, way: usize, slot: usize, full_addr: u64, compressed_size: u32, cf: u32) {
        let address = full_addr >> crate::config::LOG2_BLOCK_SIZE;
        let sb_tag = self.sb_tag_of(address);
        let w = &mut self.ways[way];
        w.sb_tag = sb_tag;
        w.compression_factor = cf;

        let s = &mut w.slots[slot];
        s.valid = true;
        s.dirty = false;
        s.prefetch = false;
        s.used = false;
        s.compressed_size = compressed_size;
        s.blk_id = Self::blk_id_of(address);
        s.address = address;
        s.full_addr = full_addr;

        self.rrpv[way][slot] = 0;
    }

    /// Invalidate one slot, or the whole way with [`EVICT_ALL`].
    pub fn evict(&mut self, way: usize, slot: usize) {
        let w = &mut self.ways[way];
        if slot == EVICT_ALL {
            for s in w.slots.iter_mut() {
                s.valid = false;
            }
            w.compression_factor = 0;
        } else {
            w.slots[slot].valid = false;
            w.settle_compression_factor();
        }
    }

    /// Whether any slot of a way holds a line outside the preferred band.
    fn way_violates_priority(&self, way: usize) -> bool {
        self.ways[way]
            .live_slots()
            .iter()
            .filter(|s| s.valid)
            .any(|s| size_bucket(s.compressed_size) > self.prioritized_size_index)
    }

    /// Pick where an incoming line of factor `cf` lands: a same-superblock
    /// slot, an empty way, or a victimised way (slot index [`EVICT_ALL`]).
    /// Out-of-band ways are preferred victims; RRPV breaks ties.
    pub fn find_victim(&mut self, address: u64, cf: u32) -> (usize, usize) {
        let sb_tag = self.sb_tag_of(address);

        for (w, way) in self.ways.iter().enumerate() {
            if way.sb_tag == sb_tag && way.compression_factor == cf {
                if let Some(slot) = way.free_slot() {
                    return (w, slot);
                }
            }
        }
        for (w, way) in self.ways.iter_mut().enumerate() {
            if way.compression_factor == 0 {
                way.compression_factor = cf;
                return (w, 0);
            }
        }

        let candidate = |w: usize| {
            self.rrpv[w]
                .iter()
                .take(self.ways[w].compression_factor.max(1) as usize)
                .copied()
                .max()
                .unwrap_or(MAX_RRPV)
        };
        let victim = (0..self.ways.len())
            .max_by_key(|&w| (self.way_violates_priority(w), candidate(w)))
            .expect("non-empty shadow set");
        (victim, EVICT_ALL)
    }

    /// Replay one access against the shadow and report whether it hit.
    pub fn access(&mut self, full_addr: u64, compressed_size: u32) -> bool {
        self.accesses += 1;
        let address = full_addr >> crate::config::LOG2_BLOCK_SIZE;
        if let Some((way, slot)) = self.find(address) {
            self.hits += 1;
            self.rrpv[way][slot] = 0;
            return true;
        }

        let cf = crate::compression::compression_factor(compressed_size);
        let (way, slot) = self.find_victim(address, cf);
        let fill_slot = if slot == EVICT_ALL {
            self.evict(way, EVICT_ALL);
            self.ways[way].compression_factor = cf;
            for r in self.rrpv[way].iter_mut() {
                *r = MAX_RRPV;
            }
            0
        } else {
            slot
        };
        self.fill(way, fill_slot, full_addr, compressed_size, cf);
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buckets_cover_the_size_range() {
        assert_eq!(size_bucket(1), 0);
        assert_eq!(size_bucket(8), 0);
        assert_eq!(size_bucket(9), 1);
        assert_eq!(size_bucket(64), 7);
    }

    #[test]
    fn shadow_tracks_fills_and_hits() {
        let mut aux = AuxiliaryTagArray::new(2, 4, 7);
        let addr = 0x4000u64;
        assert!(!aux.access(addr, 16));
        assert!(aux.access(addr, 16));
        assert_eq!(aux.hits, 1);
        assert_eq!(aux.accesses, 2);
    }

    #[test]
    fn out_of_band_ways_are_victimised_first() {
        let mut aux = AuxiliaryTagArray::new(2, 0, 1); // protect sizes ≤ 16
        // Way 0: in-band line (12 bytes). Way 1: out-of-band line (60 bytes).
        aux.fill(0, 0, 0x1000, 12, 4);
        aux.ways[0].compression_factor = 4;
        aux.fill(1, 0, 0x2000, 60, 1);
        aux.ways[1].compression_factor = 1;

        let (victim, slot) = aux.find_victim(0x3000u64 >> 6, 1);
        assert_eq!(slot, EVICT_ALL);
        assert_eq!(victim, 1);
    }

    #[test]
    fn copy_mirrors_the_real_set() {
        let mut real = vec![CompressedWay::default(); 2];
        real[0].sb_tag = 0x55;
        real[0].compression_factor = 2;
        real[0].slots[1].valid = true;
        real[0].slots[1].blk_id = 1;
        real[0].slots[1].address = (0x55 << 6) | 1;

        let mut aux = AuxiliaryTagArray::new(2, 4, 3);
        aux.copy_from(&real);
        assert_eq!(aux.find((0x55 << 6) | 1), Some((0, 1)));
    }
}
