//! On-chip address-map caches.
//!
//! Two set-associative maps translate between physical line addresses and
//! the dense structural identifiers a prefetcher assigns to hot lines: PS
//! (physical → structural) and SP (structural → physical). Each set holds at
//! most `AMC_WAYS` entries; overflow evicts the least-recently-used entry,
//! preferring entries whose page has already left the TLB, and spills the
//! mapping to the off-chip backing store.

use std::collections::HashMap;

use tracing::trace;

use crate::config::{AMC_SIZE, AMC_WAYS};
use crate::mapping::backing::OffChipMap;
use crate::replacement::counter::SaturatingCounter;

const MAX_CONFIDENCE: u32 = 3;

/// Physical→structural entry.
#[derive(Clone, Debug)]
struct PsEntry {
    str_addr: u32,
    valid: bool,
    confidence: SaturatingCounter<MAX_CONFIDENCE>,
    tlb_resident: bool,
    last_access: u64,
}

impl PsEntry {
    fn new(str_addr: u32, last_access: u64) -> Self {
        Self {
            str_addr,
            valid: true,
            confidence: SaturatingCounter::new(MAX_CONFIDENCE),
            tlb_resident: true,
            last_access,
        }
    }
}

/// Structural→physical entry.
#[derive(Clone, Debug)]
struct SpEntry {
    phy_addr: u64,
    valid: bool,
    tlb_resident: bool,
    last_access: u64,
}

impl SpEntry {
    fn new(phy_addr: u64, last_access: u64) -> Self {
        Self { phy_addr, valid: true, tlb_resident: true, last_access }
    }
}

/// The paired on-chip maps plus their off-chip backing.
pub struct AddressMapCache {
    timestamp: u64,
    index_mask: u32,
    /// Bounded per-set population of the on-chip maps.
    tlb_sync: bool,

    ps_sets: Vec<HashMap<u64, PsEntry>>,
    sp_sets: Vec<HashMap<u32, SpEntry>>,
    pub off_chip: OffChipMap,

    // Not cleared by `reset`, matching the long-standing accounting quirk.
    pub ps_evictions: u64,
    pub sp_evictions: u64,
}

impl AddressMapCache {
    pub fn new(tlb_sync: bool) -> Self {
        // Power-of-two set count no larger than the configured total.
        let n = (AMC_SIZE / AMC_WAYS).max(1);
        let num_sets = 1usize << (usize::BITS - 1 - n.leading_zeros());
        Self {
            timestamp: 0,
            index_mask: num_sets as u32 - 1,
            tlb_sync,
            ps_sets: vec![HashMap::new(); num_sets],
            sp_sets: vec![HashMap::new(); num_sets],
            off_chip: OffChipMap::new(),
            ps_evictions: 0,
            sp_evictions: 0,
        }
    }

    fn ps_set(&self, phy_addr: u64) -> usize {
        ((phy_addr >> 6) as u32 & self.index_mask) as usize
    }

    fn sp_set(&self, str_addr: u32) -> usize {
        (str_addr & self.index_mask) as usize
    }

    /// Drop all mapping state; eviction counters intentionally survive.
    pub fn reset(&mut self) {
        self.off_chip.reset();
        for set in self.ps_sets.iter_mut() {
            set.clear();
        }
        for set in self.sp_sets.iter_mut() {
            set.clear();
        }
    }

    // ── Lookups ──────────────────────────────────────────────────────────────

    pub fn get_structural(&mut self, phy_addr: u64) -> Option<u32> {
        self.timestamp += 1;
        let now = self.timestamp;
        let set = self.ps_set(phy_addr);
        if let Some(entry) = self.ps_sets[set].get_mut(&phy_addr) {
            if !entry.valid {
                return None;
            }
            entry.last_access = now;
            return Some(entry.str_addr);
        }
        if !self.tlb_sync {
            // Unsynced mode: the off-chip map can answer, and the mapping
            // is promoted back on chip.
            let str_addr = self.off_chip.get_structural(phy_addr)?;
            self.update(phy_addr, str_addr);
            return Some(str_addr);
        }
        None
    }

    pub fn get_physical(&mut self, str_addr: u32) -> Option<u64> {
        self.timestamp += 1;
        let now = self.timestamp;
        let set = self.sp_set(str_addr);
        if let Some(entry) = self.sp_sets[set].get_mut(&str_addr) {
            if !entry.valid {
                return None;
            }
            entry.last_access = now;
            return Some(entry.phy_addr);
        }
        if !self.tlb_sync {
            let phy_addr = self.off_chip.get_physical(str_addr)?;
            self.update(phy_addr, str_addr);
            return Some(phy_addr);
        }
        None
    }

    // ── Eviction ─────────────────────────────────────────────────────────────

    /// LRU victim of a PS set, preferring entries no longer TLB-resident.
    fn evict_ps(&mut self, set: usize) {
        let map = &self.ps_sets[set];
        let lru = map
            .iter()
            .min_by_key(|(_, e)| e.last_access)
            .map(|(&addr, _)| addr);
        let lru_not_resident = map
            .iter()
            .filter(|(_, e)| !e.tlb_resident)
            .min_by_key(|(_, e)| e.last_access)
            .map(|(&addr, _)| addr);

        let Some(victim) = lru_not_resident.or(lru) else {
            return;
        };
        let entry = self.ps_sets[set].remove(&victim).expect("victim resident");
        self.off_chip.update_physical(victim, entry.str_addr);
        self.ps_evictions += 1;
        trace!(phy = victim, str = entry.str_addr, "ps amc evict");
    }

    /// LRU victim of an SP set, same residency preference.
    fn evict_sp(&mut self, set: usize) {
        let map = &self.sp_sets[set];
        let lru = map
            .iter()
            .min_by_key(|(_, e)| e.last_access)
            .map(|(&addr, _)| addr);
        let lru_not_resident = map
            .iter()
            .filter(|(_, e)| !e.tlb_resident)
            .min_by_key(|(_, e)| e.last_access)
            .map(|(&addr, _)| addr);

        let Some(victim) = lru_not_resident.or(lru) else {
            return;
        };
        let entry = self.sp_sets[set].remove(&victim).expect("victim resident");
        self.off_chip.update_structural(entry.phy_addr, victim);
        self.sp_evictions += 1;
        trace!(str = victim, phy = entry.phy_addr, "sp amc evict");
    }

    // ── Mutation ─────────────────────────────────────────────────────────────

    /// Install the pair bidirectionally, evicting from either map first if
    /// its set is at capacity.
    pub fn update(&mut self, phy_addr: u64, str_addr: u32) {
        let ps_set = self.ps_set(phy_addr);
        let sp_set = self.sp_set(str_addr);

        while self.ps_sets[ps_set].len() >= AMC_WAYS
            && !self.ps_sets[ps_set].contains_key(&phy_addr)
        {
            self.evict_ps(ps_set);
        }
        while self.sp_sets[sp_set].len() >= AMC_WAYS
            && !self.sp_sets[sp_set].contains_key(&str_addr)
        {
            self.evict_sp(sp_set);
        }

        self.timestamp += 1;
        let now = self.timestamp;
        self.ps_sets[ps_set].insert(phy_addr, PsEntry::new(str_addr, now));
        self.sp_sets[sp_set].insert(str_addr, SpEntry::new(phy_addr, now));
    }

    /// Remove the pair from both maps.
    pub fn invalidate(&mut self, phy_addr: u64, str_addr: u32) {
        let ps_set = self.ps_set(phy_addr);
        let sp_set = self.sp_set(str_addr);
        self.ps_sets[ps_set].remove(&phy_addr);
        self.sp_sets[sp_set].remove(&str_addr);
    }

    // ── Confidence ───────────────────────────────────────────────────────────

    pub fn increase_confidence(&mut self, phy_addr: u64) {
        let set = self.ps_set(phy_addr);
        if let Some(entry) = self.ps_sets[set].get_mut(&phy_addr) {
            debug_assert!(entry.valid);
            entry.confidence.increment();
        }
    }

    /// Lower the mapping's confidence. Returns `false` once the counter
    /// reaches the floor: the caller should invalidate upstream state.
    pub fn lower_confidence(&mut self, phy_addr: u64) -> bool {
        let set = self.ps_set(phy_addr);
        match self.ps_sets[set].get_mut(&phy_addr) {
            Some(entry) => {
                debug_assert!(entry.valid);
                entry.confidence.decrement();
                entry.confidence.value() != 0
            }
            None => false,
        }
    }

    pub fn confidence(&self, phy_addr: u64) -> Option<u32> {
        let set = self.ps_set(phy_addr);
        self.ps_sets[set].get(&phy_addr).map(|e| e.confidence.value())
    }

    // ── TLB residency ────────────────────────────────────────────────────────

    fn set_residency(&mut self, phy_addr: u64, resident: bool) {
        let ps_set = self.ps_set(phy_addr);
        let Some(entry) = self.ps_sets[ps_set].get_mut(&phy_addr) else {
            return;
        };
        entry.tlb_resident = resident;
        let str_addr = entry.str_addr;

        let sp_set = self.sp_set(str_addr);
        if let Some(sp) = self.sp_sets[sp_set].get_mut(&str_addr) {
            sp.tlb_resident = resident;
        }
    }

    pub fn mark_tlb_resident(&mut self, phy_addr: u64) {
        self.set_residency(phy_addr, true);
    }

    pub fn mark_not_tlb_resident(&mut self, phy_addr: u64) {
        self.set_residency(phy_addr, false);
    }

    /// PS⇒SP agreement check over the whole structure (test aid).
    pub fn assert_consistent(&self) {
        for set in &self.ps_sets {
            for (&phy, entry) in set.iter().filter(|(_, e)| e.valid) {
                let sp_set = self.sp_set(entry.str_addr);
                if let Some(sp) = self.sp_sets[sp_set].get(&entry.str_addr) {
                    if sp.valid {
                        assert_eq!(sp.phy_addr, phy, "PS/SP disagree on {phy:#x}");
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn update_installs_both_directions() {
        let mut amc = AddressMapCache::new(true);
        amc.update(0x4000, 9);
        assert_eq!(amc.get_structural(0x4000), Some(9));
        assert_eq!(amc.get_physical(9), Some(0x4000));
        amc.assert_consistent();
    }

    #[test]
    fn invalidate_removes_both_directions() {
        let mut amc = AddressMapCache::new(true);
        amc.update(0x4000, 9);
        amc.invalidate(0x4000, 9);
        assert_eq!(amc.get_structural(0x4000), None);
        assert_eq!(amc.get_physical(9), None);
    }

    #[test]
    fn confidence_saturates_both_ways() {
        let mut amc = AddressMapCache::new(true);
        amc.update(0x4000, 9);
        assert_eq!(amc.confidence(0x4000), Some(3));
        for _ in 0..5 {
            amc.increase_confidence(0x4000);
        }
        assert_eq!(amc.confidence(0x4000), Some(3));
        assert!(amc.lower_confidence(0x4000));
        assert!(amc.lower_confidence(0x4000));
        // Third step reaches the floor and signals it.
        assert!(!amc.lower_confidence(0x4000));
        assert_eq!(amc.confidence(0x4000), Some(0));
    }

    #[test]
    fn non_resident_entries_are_preferred_victims() {
        let mut amc = AddressMapCache::new(true);
        // Two entries in the same PS set (same low index bits).
        let stride = (amc.index_mask as u64 + 1) << 6;
        amc.update(stride, 1);
        amc.update(2 * stride, 2);
        amc.mark_not_tlb_resident(2 * stride);
        // The second entry is more recently used, but it lost residency.
        let set = amc.ps_set(stride);
        amc.evict_ps(set);
        assert_eq!(amc.get_structural(2 * stride), None);
        assert_eq!(amc.get_structural(stride), Some(1));
        assert_eq!(amc.ps_evictions, 1);
        // The spilled mapping reached the backing store.
        assert_eq!(amc.off_chip.get_structural(2 * stride), Some(2));
    }

    #[test]
    fn reset_preserves_eviction_counters() {
        let mut amc = AddressMapCache::new(true);
        let stride = (amc.index_mask as u64 + 1) << 6;
        amc.update(stride, 1);
        let set = amc.ps_set(stride);
        amc.evict_ps(set);
        assert_eq!(amc.ps_evictions, 1);
        amc.reset();
        assert_eq!(amc.ps_evictions, 1);
        assert!(amc.get_structural(stride).is_none());
    }

    #[test]
    fn unsynced_mode_falls_through_to_off_chip() {
        let mut amc = AddressMapCache::new(false);
        amc.off_chip.update_physical(0x8000, 5);
        assert_eq!(amc.get_structural(0x8000), Some(5));
        // The fall-through promoted the mapping on chip.
        assert_eq!(amc.get_physical(5), Some(0x8000));
    }
}
