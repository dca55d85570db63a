//! Superblock ways and the slots inside them.

use crate::config::{BLOCK_SIZE, MAX_COMPRESSIBILITY};

/// Sentinel slot index meaning "every valid slot in the way".
pub const EVICT_ALL: usize = MAX_COMPRESSIBILITY;

/// One compressed line resident in a superblock slot.
///
/// When `valid` is false every other field is stale and must not be
/// returned to a requester.
#[derive(Clone, Debug)]
pub struct CompressedSlot {
    pub valid: bool,
    pub dirty: bool,
    pub prefetch: bool,
    pub used: bool,
    pub compressed_size: u32,
    /// Intra-superblock block id, `line_address % 4`.
    pub blk_id: u32,
    /// Line address.
    pub address: u64,
    pub full_addr: u64,
    pub data: u64,
    pub program_data: [u8; BLOCK_SIZE],
    pub cpu: usize,
    pub instr_id: u64,
}

impl Default for CompressedSlot {
    fn default() -> Self {
        Self {
            valid: false,
            dirty: false,
            prefetch: false,
            used: false,
            compressed_size: 0,
            blk_id: 0,
            address: 0,
            full_addr: 0,
            data: 0,
            program_data: [0; BLOCK_SIZE],
            cpu: 0,
            instr_id: 0,
        }
    }
}

/// One way of a compressed set: up to four lines sharing a superblock tag
/// and a compression factor.
///
/// Invariants, preserved by every operation on the tag array:
/// - `compression_factor == 0` iff no slot is valid;
/// - at most `compression_factor` slots are valid at once;
/// - every valid slot's `blk_id` equals `address % 4` and its superblock
///   bits match `sb_tag`.
#[derive(Clone, Debug, Default)]
pub struct CompressedWay {
    pub sb_tag: u64,
    /// 0 (empty), 1, 2 or 4.
    pub compression_factor: u32,
    pub slots: [CompressedSlot; MAX_COMPRESSIBILITY],
}

impl CompressedWay {
    pub fn any_valid(&self) -> bool {
        self.slots.iter().any(|s| s.valid)
    }

    pub fn valid_count(&self) -> usize {
        self.slots.iter().filter(|s| s.valid).count()
    }

    /// Slots eligible under the current compression factor.
    pub fn live_slots(&self) -> &[CompressedSlot] {
        &self.slots[..self.compression_factor as usize]
    }

    /// First invalid slot index within the compression-factor range.
    pub fn free_slot(&self) -> Option<usize> {
        self.slots[..self.compression_factor as usize]
            .iter()
            .position(|s| !s.valid)
    }

    /// Drop the way back to empty if its last valid slot went away.
    pub fn settle_compression_factor(&mut self) {
        if !self.any_valid() {
            self.compression_factor = 0;
        }
    }

    /// Debug check of the way invariants against the addressing helpers.
    pub fn assert_consistent(&self, sb_tag_of: impl Fn(u64) -> u64, blk_id_of: impl Fn(u64) -> u32) {
        if self.compression_factor == 0 {
            assert!(!self.any_valid(), "empty way holds a valid slot");
            return;
        }
        assert!(
            self.valid_count() <= self.compression_factor as usize,
            "more valid slots than the compression factor admits"
        );
        for slot in self.live_slots().iter().filter(|s| s.valid) {
            assert_eq!(slot.blk_id, blk_id_of(slot.address));
            assert_eq!(self.sb_tag, sb_tag_of(slot.address));
        }
    }
}

/// One way of the uncompressed baseline organisation.
#[derive(Clone, Debug)]
pub struct BaselineWay {
    pub valid: bool,
    pub dirty: bool,
    pub prefetch: bool,
    pub used: bool,
    pub tag: u64,
    pub address: u64,
    pub full_addr: u64,
    pub data: u64,
    pub program_data: [u8; BLOCK_SIZE],
    pub cpu: usize,
    pub instr_id: u64,
}

impl Default for BaselineWay {
    fn default() -> Self {
        Self {
            valid: false,
            dirty: false,
            prefetch: false,
            used: false,
            tag: 0,
            address: 0,
            full_addr: 0,
            data: 0,
            program_data: [0; BLOCK_SIZE],
            cpu: 0,
            instr_id: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_way_has_factor_zero() {
        let way = CompressedWay::default();
        assert_eq!(way.compression_factor, 0);
        assert!(!way.any_valid());
        way.assert_consistent(|a| a >> 2, |a| (a & 3) as u32);
    }

    #[test]
    fn settle_resets_factor_once_empty() {
        let mut way = CompressedWay {
            compression_factor: 2,
            ..Default::default()
        };
        way.slots[1].valid = true;
        way.settle_compression_factor();
        assert_eq!(way.compression_factor, 2);
        way.slots[1].valid = false;
        way.settle_compression_factor();
        assert_eq!(way.compression_factor, 0);
    }

    #[test]
    fn free_slot_respects_compression_factor() {
        let mut way = CompressedWay {
            compression_factor: 2,
            ..Default::default()
        };
        way.slots[0].valid = true;
        assert_eq!(way.free_slot(), Some(1));
        way.slots[1].valid = true;
        // Slots 2 and 3 exist but are outside the factor range.
        assert_eq!(way.free_slot(), None);
    }
}
