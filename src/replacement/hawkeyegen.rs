//! Per-set RRIP insertion and aging state.
//!
//! Each set mirrors its ways with a re-reference prediction value (RRPV)
//! in `0..=7`. Predicted cache-averse lines insert at 7 and are the first
//! eviction candidates; predicted cache-friendly lines insert at 0 and age
//! only while no way sits at 6, so a long-lived friendly population is never
//! aged straight into eviction range by a single burst of fills.

use crate::cache::packet::AccessType;
use crate::config::MAX_RRPV;

/// Who installed the line currently occupying a way. Returned with a victim
/// so the controller can detrain the responsible PC.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LineMetadata {
    pub pc: u64,
    pub prefetched: bool,
}

/// Outcome of a victim search.
#[derive(Clone, Copy, Debug)]
pub struct Victim {
    pub index: usize,
    /// Present when the victim was *not* at maximum RRPV: the line is being
    /// evicted before its predicted reuse, so its PC deserves detraining.
    pub detrain: Option<LineMetadata>,
    /// Epoch during which the victim was installed.
    pub feedback_epoch: i64,
}

/// RRIP generator state for one set.
#[derive(Clone, Debug)]
pub struct HawkeyeGen {
    tag: Vec<u64>,
    rrpv: Vec<u8>,
    epoch: Vec<i64>,
    metadata: Vec<LineMetadata>,

    pub access: u64,
    pub hit: u64,
    pub prefetch_access: u64,
    pub redundant_prefetch: u64,
}

impl HawkeyeGen {
    pub fn new(ways: usize) -> Self {
        Self {
            tag: vec![0; ways],
            rrpv: vec![MAX_RRPV; ways],
            epoch: vec![-1; ways],
            metadata: vec![LineMetadata::default(); ways],
            access: 0,
            hit: 0,
            prefetch_access: 0,
            redundant_prefetch: 0,
        }
    }

    /// Linear tag scan. A hit bumps the hit counter, or the
    /// redundant-prefetch counter when the probe is a prefetch; writeback
    /// probes count neither.
    pub fn check_hit(&mut self, paddr: u64, kind: AccessType) -> (Option<usize>, i64) {
        for (i, &tag) in self.tag.iter().enumerate() {
            if tag == paddr {
                match kind {
                    AccessType::Prefetch => self.redundant_prefetch += 1,
                    AccessType::Writeback => {}
                    _ => self.hit += 1,
                }
                return (Some(i), self.epoch[i]);
            }
        }
        (None, -1)
    }

    /// Pick the eviction candidate: any way at maximum RRPV, else the way
    /// with the highest RRPV (whose metadata is surfaced for detraining).
    pub fn get_victim(&self) -> Victim {
        if let Some(index) = self.rrpv.iter().position(|&r| r == MAX_RRPV) {
            return Victim { index, detrain: None, feedback_epoch: self.epoch[index] };
        }

        let mut index = 0;
        let mut max_rrpv = 0;
        for (i, &r) in self.rrpv.iter().enumerate() {
            if r >= max_rrpv {
                max_rrpv = r;
                index = i;
            }
        }
        Victim {
            index,
            detrain: Some(self.metadata[index]),
            feedback_epoch: self.epoch[index],
        }
    }

    /// Install or refresh a line.
    ///
    /// Cache-averse lines pin to RRPV 7. Cache-friendly miss-fills age every
    /// other friendly line by one step first, unless some way already sits at
    /// 6 (the saturation guard), then insert at 0. A prefetch miss-fill marks
    /// the line prefetched; any demand touch clears the mark.
    pub fn update(
        &mut self,
        index: usize,
        paddr: u64,
        cache_friendly: bool,
        prefetch: bool,
        pc: u64,
        was_hit: bool,
        epoch: u32,
    ) {
        assert!(index < self.rrpv.len());

        if prefetch {
            self.prefetch_access += 1;
        } else {
            self.access += 1;
        }

        self.tag[index] = paddr;
        self.epoch[index] = epoch as i64;

        if !cache_friendly {
            self.rrpv[index] = MAX_RRPV;
        } else {
            // Reset this way before the saturation scan: when the way being
            // refilled is itself the max-rrpv victim, its stale value must
            // not trip the guard and suppress aging of its siblings.
            self.rrpv[index] = 0;
            if !was_hit {
                let saturated = self.rrpv.iter().any(|&r| r == MAX_RRPV - 1);
                if !saturated {
                    for r in self.rrpv.iter_mut().filter(|r| **r < MAX_RRPV - 1) {
                        *r += 1;
                    }
                }
            }
            // The aging loop advanced this way's fresh zero too.
            self.rrpv[index] = 0;
        }

        self.metadata[index].pc = pc;
        if prefetch {
            if !was_hit {
                self.metadata[index].prefetched = true;
            }
        } else {
            self.metadata[index].prefetched = false;
        }
    }

    /// Refresh a way on a writeback fill without touching RRPV state.
    pub fn update_wb(&mut self, index: usize, paddr: u64, epoch: u32) {
        assert!(index < self.rrpv.len());
        self.tag[index] = paddr;
        self.epoch[index] = epoch as i64;
        self.metadata[index].prefetched = false;
    }

    pub fn rrpv(&self, index: usize) -> u8 {
        self.rrpv[index]
    }

    #[cfg(test)]
    pub(crate) fn metadata(&self, index: usize) -> LineMetadata {
        self.metadata[index]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn averse_lines_insert_at_max_rrpv() {
        let mut gen = HawkeyeGen::new(4);
        gen.update(0, 0x100, false, false, 0x400, false, 0);
        assert_eq!(gen.rrpv(0), MAX_RRPV);
        let v = gen.get_victim();
        assert_eq!(v.index, 0);
        assert!(v.detrain.is_none());
    }

    #[test]
    fn friendly_fill_ages_other_friendly_lines() {
        let mut gen = HawkeyeGen::new(4);
        gen.update(0, 0x100, true, false, 0x400, false, 0);
        assert_eq!(gen.rrpv(0), 0);
        gen.update(1, 0x200, true, false, 0x404, false, 0);
        // Way 0 aged by one, way 1 freshly inserted.
        assert_eq!(gen.rrpv(0), 1);
        assert_eq!(gen.rrpv(1), 0);
    }

    #[test]
    fn aging_stops_while_a_way_sits_at_six() {
        let mut gen = HawkeyeGen::new(2);
        gen.update(0, 0x100, true, false, 0x400, false, 0);
        // Drive way 0 to RRPV 6 with repeated friendly fills elsewhere.
        for i in 0..6 {
            gen.update(1, 0x200 + i, true, false, 0x404, false, 0);
        }
        assert_eq!(gen.rrpv(0), 6);
        // Guard holds: one more friendly fill must not age way 0 to 7.
        gen.update(1, 0x300, true, false, 0x404, false, 0);
        assert_eq!(gen.rrpv(0), 6);
    }

    #[test]
    fn refilling_a_way_at_six_still_ages_its_siblings() {
        let mut gen = HawkeyeGen::new(2);
        gen.update(0, 0x100, true, false, 0x400, false, 0);
        for i in 0..6 {
            gen.update(1, 0x200 + i, true, false, 0x404, false, 0);
        }
        assert_eq!(gen.rrpv(0), 6);
        // No way ever reaches 7 through aging, so the victim is way 0 at
        // the maximum live RRPV. Refilling it must not let its own stale
        // value trip the saturation guard: way 1 still ages.
        let v = gen.get_victim();
        assert_eq!(v.index, 0);
        gen.update(0, 0x300, true, false, 0x408, false, 0);
        assert_eq!(gen.rrpv(0), 0);
        assert_eq!(gen.rrpv(1), 1);
    }

    #[test]
    fn no_averse_way_victimises_max_rrpv_with_detrain_info() {
        let mut gen = HawkeyeGen::new(2);
        gen.update(0, 0x100, true, false, 0xAAA, false, 3);
        gen.update(1, 0x200, true, false, 0xBBB, false, 3);
        let v = gen.get_victim();
        // Way 0 aged once, way 1 at zero: way 0 is the victim and carries
        // its installer's PC.
        assert_eq!(v.index, 0);
        assert_eq!(v.detrain.unwrap().pc, 0xAAA);
        assert_eq!(v.feedback_epoch, 3);
    }

    #[test]
    fn prefetch_bit_set_on_miss_fill_cleared_on_demand() {
        let mut gen = HawkeyeGen::new(2);
        gen.update(0, 0x100, true, true, 0x400, false, 0);
        assert!(gen.metadata(0).prefetched);
        let (hit, _) = gen.check_hit(0x100, AccessType::Load);
        assert_eq!(hit, Some(0));
        gen.update(0, 0x100, true, false, 0x404, true, 0);
        assert!(!gen.metadata(0).prefetched);
    }

    #[test]
    fn prefetch_probe_counts_redundant() {
        let mut gen = HawkeyeGen::new(2);
        gen.update(0, 0x100, true, false, 0x400, false, 0);
        gen.check_hit(0x100, AccessType::Prefetch);
        assert_eq!(gen.redundant_prefetch, 1);
        assert_eq!(gen.hit, 0);
    }
}
