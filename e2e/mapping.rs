//! E2E: the physical↔structural address maps.

use ccsim::mapping::{AddressMapCache, OffChipMap};

#[test]
fn bidirectional_consistency_over_a_population() {
    let mut amc = AddressMapCache::new(true);
    for i in 0..200u64 {
        amc.update(0x10_0000 + i * 64, 1000 + i as u32);
    }
    amc.assert_consistent();
    for i in 0..200u64 {
        let phy = 0x10_0000 + i * 64;
        let s = amc.get_structural(phy);
        if let Some(s) = s {
            assert_eq!(amc.get_physical(s), Some(phy));
        }
    }
}

#[test]
fn confidence_saturation_round_trip() {
    let mut amc = AddressMapCache::new(true);
    let phy = 0x20_0000u64;
    amc.update(phy, 42);

    // Drive the counter to its floor, then saturate both directions: five
    // raises pin it at the ceiling, five lowers return it exactly to the
    // floor it started from.
    while amc.lower_confidence(phy) {}
    let initial = amc.confidence(phy).unwrap();
    assert_eq!(initial, 0);

    for _ in 0..5 {
        amc.increase_confidence(phy);
    }
    assert_eq!(amc.confidence(phy), Some(3));
    for _ in 0..5 {
        amc.lower_confidence(phy);
    }
    assert_eq!(amc.confidence(phy), Some(initial));
}

#[test]
fn lower_confidence_signals_at_the_floor() {
    let mut amc = AddressMapCache::new(true);
    let phy = 0x30_0000u64;
    amc.update(phy, 7);
    // Fresh mappings carry full confidence; exactly three lowers reach 0.
    assert!(amc.lower_confidence(phy));
    assert!(amc.lower_confidence(phy));
    assert!(!amc.lower_confidence(phy), "floor must signal invalidate-upstream");
    // Unmapped addresses also signal.
    assert!(!amc.lower_confidence(0xDEAD_0000));
}

#[test]
fn tlb_eviction_steers_replacement() {
    let mut amc = AddressMapCache::new(true);
    let stride = 1u64 << 20; // same set index for every entry
    amc.update(stride, 1);
    amc.update(2 * stride, 2);
    amc.update(3 * stride, 3);
    amc.mark_not_tlb_resident(2 * stride);

    // Force evictions by overfilling the set far beyond its ways.
    for i in 4..300u64 {
        amc.update(i * stride, i as u32);
    }
    // The non-resident entry must be long gone while the backing store
    // still remembers it.
    assert_eq!(amc.get_structural(2 * stride), None);
    assert_eq!(amc.off_chip.get_structural(2 * stride), Some(2));
    assert!(amc.ps_evictions > 0);
}

#[test]
fn invalidate_is_visible_in_both_maps() {
    let mut amc = AddressMapCache::new(true);
    amc.update(0x40_0000, 99);
    amc.invalidate(0x40_0000, 99);
    assert_eq!(amc.get_structural(0x40_0000), None);
    assert_eq!(amc.get_physical(99), None);
}

#[test]
fn off_chip_map_survives_amc_reset() {
    let mut amc = AddressMapCache::new(true);
    let stride = 1u64 << 20;
    // Overfill one set so evictions spill off chip.
    for i in 1..300u64 {
        amc.update(i * stride, i as u32);
    }
    let spilled = amc.ps_evictions;
    assert!(spilled > 0);

    amc.reset();
    // Eviction counters survive reset.
    assert_eq!(amc.ps_evictions, spilled);
    // Mapping state does not.
    assert_eq!(amc.get_structural(stride), None);
}

#[test]
fn unsynced_lookups_fall_through_and_promote() {
    let mut amc = AddressMapCache::new(false);
    let mut seed = OffChipMap::new();
    seed.update_physical(0x50_0000, 123);
    seed.update_structural(0x50_0000, 123);
    amc.off_chip = seed;

    assert_eq!(amc.get_structural(0x50_0000), Some(123));
    assert_eq!(amc.get_physical(123), Some(0x50_0000));
    amc.assert_consistent();
}
