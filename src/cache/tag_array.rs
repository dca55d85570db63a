//! Set-associative tag storage: the compressed superblock array and the
//! uncompressed baseline array.
//!
//! Addresses handled here are line addresses (byte address with the 6 offset
//! bits already dropped). In the compressed organisation the two bits above
//! the offset select the slot within a superblock, the next bits the set,
//! and the rest the superblock tag; the baseline organisation indexes sets
//! directly with the low line-address bits.

use tracing::trace;

use crate::cache::block::{BaselineWay, CompressedSlot, CompressedWay, EVICT_ALL};
use crate::cache::packet::{AccessType, Packet};
use crate::config::{LOG2_MAX_COMPRESSIBILITY, MAX_COMPRESSIBILITY};

/// Where an incoming fill may land without consulting the replacement
/// policy.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FillSlot {
    /// A way already hosting this superblock at the incoming factor has a
    /// free slot.
    InSuperblock { way: usize, slot: usize },
    /// A fully empty way was claimed (its factor is now the incoming one).
    EmptyWay { way: usize },
    /// Every way is busy: ask the replacement policy for a victim way, then
    /// evict all its slots.
    NeedVictim,
}

/// The compressed superblock tag array.
#[derive(Clone, Debug)]
pub struct SuperblockTagArray {
    sets: Vec<Vec<CompressedWay>>,
    set_mask: u64,
    log2_sets: u32,
}

impl SuperblockTagArray {
    pub fn new(num_sets: usize, num_ways: usize) -> Self {
        assert!(num_sets.is_power_of_two());
        Self {
            sets: vec![vec![CompressedWay::default(); num_ways]; num_sets],
            set_mask: num_sets as u64 - 1,
            log2_sets: num_sets.trailing_zeros(),
        }
    }

    // ── Addressing helpers ───────────────────────────────────────────────────

    /// Set index: skip the block-id bits first.
    pub fn set_of(&self, address: u64) -> usize {
        ((address >> LOG2_MAX_COMPRESSIBILITY) & self.set_mask) as usize
    }

    /// Intra-superblock block id.
    pub fn blk_id_of(address: u64) -> u32 {
        (address % MAX_COMPRESSIBILITY as u64) as u32
    }

    /// Superblock tag: everything above block id and set index.
    pub fn sb_tag_of(&self, address: u64) -> u64 {
        address >> (LOG2_MAX_COMPRESSIBILITY + self.log2_sets)
    }

    pub fn num_ways(&self) -> usize {
        self.sets[0].len()
    }

    pub fn way(&self, set: usize, way: usize) -> &CompressedWay {
        &self.sets[set][way]
    }

    /// All ways of a set.
    pub fn ways(&self, set: usize) -> &[CompressedWay] {
        &self.sets[set]
    }

    pub fn slot(&self, set: usize, way: usize, slot: usize) -> &CompressedSlot {
        &self.sets[set][way].slots[slot]
    }

    // ── Operations ───────────────────────────────────────────────────────────

    /// Find the unique valid slot holding `address`. At most one slot may
    /// match; a second match is a corrupted array.
    pub fn lookup(&self, address: u64) -> Option<(usize, usize)> {
        let set = self.set_of(address);
        let sb_tag = self.sb_tag_of(address);
        let blk_id = Self::blk_id_of(address);

        let mut found = None;
        for (w, way) in self.sets[set].iter().enumerate() {
            if way.sb_tag != sb_tag {
                continue;
            }
            for (s, slot) in way.live_slots().iter().enumerate() {
                if slot.valid && slot.blk_id == blk_id {
                    assert!(
                        found.is_none(),
                        "duplicate resident slots for address {address:#x}"
                    );
                    found = Some((w, s));
                }
            }
        }
        found
    }

    /// Stages 1 and 2 of the victim search: a superblock-compatible slot or
    /// an empty way. Claiming an empty way pre-sets its compression factor.
    pub fn find_fill_slot(&mut self, address: u64, incoming_cf: u32) -> FillSlot {
        let set = self.set_of(address);
        let sb_tag = self.sb_tag_of(address);

        // Stage 1: superblock hit at the same compression factor.
        for (w, way) in self.sets[set].iter().enumerate() {
            if way.sb_tag == sb_tag && way.compression_factor == incoming_cf {
                if let Some(slot) = way.free_slot() {
                    return FillSlot::InSuperblock { way: w, slot };
                }
            }
        }

        // Stage 2: fully empty way.
        for (w, way) in self.sets[set].iter_mut().enumerate() {
            if way.compression_factor == 0 {
                debug_assert!(!way.any_valid());
                way.compression_factor = incoming_cf;
                return FillSlot::EmptyWay { way: w };
            }
        }

        // Stage 3 is the replacement policy's call.
        FillSlot::NeedVictim
    }

    /// Install a packet into a slot. The way's tag and factor follow the
    /// incoming line.
    pub fn fill(&mut self, set: usize, way: usize, slot: usize, packet: &Packet, cf: u32, compressed_size: u32) {
        let sb_tag = self.sb_tag_of(packet.address);
        let blk_id = Self::blk_id_of(packet.address);
        let entry = &mut self.sets[set][way];

        entry.sb_tag = sb_tag;
        entry.compression_factor = cf;

        let s = &mut entry.slots[slot];
        s.valid = true;
        s.dirty = false;
        s.prefetch = packet.kind == AccessType::Prefetch;
        s.used = false;
        s.compressed_size = compressed_size;
        s.blk_id = blk_id;
        s.address = packet.address;
        s.full_addr = packet.full_addr;
        s.data = packet.data;
        s.program_data = packet.program_data;
        s.cpu = packet.cpu;
        s.instr_id = packet.instr_id;

        trace!(set, way, slot, address = packet.address, cf, "fill");
    }

    /// Invalidate one slot (or the whole way with [`EVICT_ALL`]); the way's
    /// factor drops to zero once no slot remains valid.
    pub fn evict(&mut self, set: usize, way: usize, slot: usize) {
        let entry = &mut self.sets[set][way];
        if slot == EVICT_ALL {
            for s in entry.slots.iter_mut() {
                s.valid = false;
            }
            entry.compression_factor = 0;
        } else {
            entry.slots[slot].valid = false;
            entry.settle_compression_factor();
        }
        trace!(set, way, slot, "evict");
    }

    /// Lookup-then-evict. Returns the slot that went away, if any.
    pub fn invalidate(&mut self, address: u64) -> Option<(usize, usize)> {
        let (way, slot) = self.lookup(address)?;
        let set = self.set_of(address);
        self.evict(set, way, slot);
        Some((way, slot))
    }

    /// Valid dirty slots of a way, oldest slot first. These are the lines
    /// the writeback discipline must drain before the way can be reused.
    pub fn dirty_slots(&self, set: usize, way: usize) -> Vec<usize> {
        self.sets[set][way]
            .live_slots()
            .iter()
            .enumerate()
            .filter(|(_, s)| s.valid && s.dirty)
            .map(|(i, _)| i)
            .collect()
    }

    pub fn mark_dirty(&mut self, set: usize, way: usize, slot: usize) {
        self.sets[set][way].slots[slot].dirty = true;
    }

    /// Record a hit on a resident slot: demand touches mark the line used
    /// and clear its prefetch bit.
    pub fn touch(&mut self, set: usize, way: usize, slot: usize, demand: bool) {
        let s = &mut self.sets[set][way].slots[slot];
        if demand {
            s.prefetch = false;
            s.used = true;
        }
    }

    /// Check every way invariant of a set. Test-and-debug aid.
    pub fn assert_set_consistent(&self, set: usize) {
        let total_valid: usize = self.sets[set].iter().map(|w| w.valid_count()).sum();
        let capacity: usize = self.sets[set]
            .iter()
            .map(|w| w.compression_factor as usize)
            .sum();
        assert!(total_valid <= capacity);
        for way in &self.sets[set] {
            way.assert_consistent(|a| self.sb_tag_of(a), Self::blk_id_of);
        }
    }
}

/// The uncompressed baseline array: one line per way, direct set indexing.
#[derive(Clone, Debug)]
pub struct BaselineTagArray {
    sets: Vec<Vec<BaselineWay>>,
    set_mask: u64,
}

impl BaselineTagArray {
    pub fn new(num_sets: usize, num_ways: usize) -> Self {
        assert!(num_sets.is_power_of_two());
        Self {
            sets: vec![vec![BaselineWay::default(); num_ways]; num_sets],
            set_mask: num_sets as u64 - 1,
        }
    }

    pub fn set_of(&self, address: u64) -> usize {
        (address & self.set_mask) as usize
    }

    pub fn way(&self, set: usize, way: usize) -> &BaselineWay {
        &self.sets[set][way]
    }

    pub fn way_mut(&mut self, set: usize, way: usize) -> &mut BaselineWay {
        &mut self.sets[set][way]
    }

    pub fn lookup(&self, address: u64) -> Option<usize> {
        let set = self.set_of(address);
        self.sets[set]
            .iter()
            .position(|w| w.valid && w.tag == address)
    }

    pub fn fill(&mut self, set: usize, way: usize, packet: &Packet) {
        let w = &mut self.sets[set][way];
        w.valid = true;
        w.dirty = false;
        w.prefetch = packet.kind == AccessType::Prefetch;
        w.used = false;
        w.tag = packet.address;
        w.address = packet.address;
        w.full_addr = packet.full_addr;
        w.data = packet.data;
        w.program_data = packet.program_data;
        w.cpu = packet.cpu;
        w.instr_id = packet.instr_id;
    }

    pub fn invalidate(&mut self, address: u64) -> Option<usize> {
        let set = self.set_of(address);
        let way = self.lookup(address)?;
        self.sets[set][way].valid = false;
        Some(way)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn array() -> SuperblockTagArray {
        SuperblockTagArray::new(16, 4)
    }

    fn fill_packet(address: u64) -> Packet {
        let mut p = Packet::new(0, AccessType::Load, address << 6);
        p.address = address;
        p
    }

    #[test]
    fn addressing_helpers_split_the_line_address() {
        let a = array();
        // blk id in bits [1:0], set in [5:2], superblock tag above.
        let addr = 0b1011_0110_10u64;
        assert_eq!(SuperblockTagArray::blk_id_of(addr), 0b10);
        assert_eq!(a.set_of(addr), 0b1101);
        assert_eq!(a.sb_tag_of(addr), 0b1011);
    }

    #[test]
    fn fill_then_lookup_then_invalidate() {
        let mut a = array();
        let addr = 0x1234u64;
        let set = a.set_of(addr);

        assert_eq!(a.lookup(addr), None);
        let slot = a.find_fill_slot(addr, 2);
        let FillSlot::EmptyWay { way } = slot else {
            panic!("expected an empty way, got {slot:?}");
        };
        a.fill(set, way, 0, &fill_packet(addr), 2, 30);
        assert_eq!(a.lookup(addr), Some((way, 0)));
        a.assert_set_consistent(set);

        assert_eq!(a.invalidate(addr), Some((way, 0)));
        assert_eq!(a.lookup(addr), None);
        assert_eq!(a.way(set, way).compression_factor, 0);
        a.assert_set_consistent(set);
    }

    #[test]
    fn superblock_neighbours_share_a_way() {
        let mut a = array();
        // Same superblock and set, block ids 0 and 1.
        let base = 0x40u64 << 6; // well clear of set bits
        let addr0 = base;
        let addr1 = base | 1;
        let set = a.set_of(addr0);

        let FillSlot::EmptyWay { way } = a.find_fill_slot(addr0, 2) else {
            panic!("first fill should claim an empty way");
        };
        a.fill(set, way, 0, &fill_packet(addr0), 2, 20);

        let slot = a.find_fill_slot(addr1, 2);
        assert_eq!(slot, FillSlot::InSuperblock { way, slot: 1 });
        a.fill(set, way, 1, &fill_packet(addr1), 2, 20);

        assert_eq!(a.lookup(addr0), Some((way, 0)));
        assert_eq!(a.lookup(addr1), Some((way, 1)));
        a.assert_set_consistent(set);
    }

    #[test]
    fn mismatched_factor_does_not_share_the_way() {
        let mut a = array();
        let addr0 = 0x80u64;
        let addr1 = 0x81u64;
        let set = a.set_of(addr0);

        let FillSlot::EmptyWay { way } = a.find_fill_slot(addr0, 2) else {
            panic!();
        };
        a.fill(set, way, 0, &fill_packet(addr0), 2, 24);

        // Same superblock but incoming cf=4: must not join way 0.
        match a.find_fill_slot(addr1, 4) {
            FillSlot::EmptyWay { way: w2 } => assert_ne!(w2, way),
            other => panic!("expected another empty way, got {other:?}"),
        }
    }

    #[test]
    fn full_set_requests_a_victim() {
        let mut a = SuperblockTagArray::new(2, 2);
        // Fill both ways of set 0 with distinct superblocks at cf=1.
        for i in 0..2u64 {
            let addr = i << 3; // blk 0, set 0, distinct superblock tags
            assert_eq!(a.set_of(addr), 0);
            let FillSlot::EmptyWay { way } = a.find_fill_slot(addr, 1) else {
                panic!();
            };
            a.fill(0, way, 0, &fill_packet(addr), 1, 64);
        }
        let probe = 7u64 << 3;
        assert_eq!(a.find_fill_slot(probe, 1), FillSlot::NeedVictim);
    }

    #[test]
    fn whole_way_eviction_resets_the_factor() {
        let mut a = array();
        let addr = 0x200u64;
        let set = a.set_of(addr);
        let FillSlot::EmptyWay { way } = a.find_fill_slot(addr, 4) else {
            panic!();
        };
        for blk in 0..4u64 {
            let p = fill_packet(addr | blk);
            a.fill(set, way, blk as usize, &p, 4, 10);
        }
        assert_eq!(a.way(set, way).valid_count(), 4);
        a.evict(set, way, EVICT_ALL);
        assert_eq!(a.way(set, way).valid_count(), 0);
        assert_eq!(a.way(set, way).compression_factor, 0);
    }
}
