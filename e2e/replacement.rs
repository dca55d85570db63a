//! E2E: the PC predictor, the RRIP generator, and the replacement
//! controller's training loop driven through the full cache.

use ccsim::cache::controller::AddOutcome;
use ccsim::cache::packet::fill_level;
use ccsim::replacement::hawkeyegen::HawkeyeGen;
use ccsim::{AccessType, Cache, CacheConfig, CorePort, MainMemory, Packet, ShctPredictor};

// ─────────────────────────────────────────────────────────────────────────────
// Signature table saturation
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn shct_saturates_at_ceiling_and_floor() {
    let mut predictor = ShctPredictor::new();

    for _ in 0..32 {
        predictor.increment(0x1111);
    }
    assert!(predictor.get_prediction(0x1111));
    assert_eq!(predictor.counter(0x1111), Some(31));

    for _ in 0..32 {
        predictor.decrement(0x2222);
    }
    assert!(!predictor.get_prediction(0x2222));
    assert_eq!(predictor.counter(0x2222), Some(0));
}

#[test]
fn shct_instances_are_independent() {
    let mut demand = ShctPredictor::new();
    let mut prefetch = ShctPredictor::new();
    for _ in 0..20 {
        demand.decrement(0x3333);
    }
    assert!(!demand.get_prediction(0x3333));
    assert!(prefetch.get_prediction(0x3333));
    prefetch.increment(0x3333);
    assert!(prefetch.get_prediction(0x3333));
}

// ─────────────────────────────────────────────────────────────────────────────
// RRIP generator behaviour
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn averse_lines_are_evicted_before_friendly_ones() {
    let mut gen = HawkeyeGen::new(8);
    for i in 0..4 {
        gen.update(i, 0x100 + i as u64, true, false, 0x400, false, 0);
    }
    // One averse line lands at index 5.
    gen.update(5, 0x999, false, false, 0x404, false, 0);
    let victim = gen.get_victim();
    assert_eq!(victim.index, 5);
    assert!(victim.detrain.is_none(), "averse victims carry no detrain info");
}

#[test]
fn friendly_victim_carries_detrain_metadata() {
    let mut gen = HawkeyeGen::new(4);
    for i in 0..4 {
        gen.update(i, 0x100 + i as u64, true, false, 0xABC0 + i as u64, false, 2);
    }
    let victim = gen.get_victim();
    let meta = victim.detrain.expect("friendly eviction detrains");
    assert_eq!(meta.pc, 0xABC0 + victim.index as u64);
    assert_eq!(victim.feedback_epoch, 2);
}

#[test]
fn writeback_refresh_keeps_rrpv() {
    let mut gen = HawkeyeGen::new(4);
    gen.update(0, 0x100, true, false, 0x400, false, 0);
    let before = gen.rrpv(0);
    gen.update_wb(0, 0x100, 1);
    assert_eq!(gen.rrpv(0), before);
}

// ─────────────────────────────────────────────────────────────────────────────
// End-to-end training through the cache
// ─────────────────────────────────────────────────────────────────────────────

fn tiny_cache() -> Cache {
    let mut cfg = CacheConfig::llc(1);
    cfg.num_sets = 8;
    cfg.num_ways = 4;
    cfg.mshr_size = 8;
    cfg.rq_size = 8;
    cfg.wq_size = 8;
    cfg.pq_size = 8;
    Cache::new("LLC", cfg)
}

fn run_stream(mut llc: &mut Cache, stream: &[(u64, u64)], kind: AccessType) {
    let mut mem = MainMemory::new(30);
    let mut cores = vec![CorePort::default()];
    let mut cycle = 0u64;
    let mut i = 0usize;

    while i < stream.len() {
        let (addr, ip) = stream[i];
        let mut p = Packet::new(0, kind, addr << 6).with_ip(ip);
        p.fill_level = fill_level::L2;
        let outcome = if kind == AccessType::Prefetch {
            llc.add_pq(&p, cycle)
        } else {
            llc.add_rq(&p, cycle)
        };
        if outcome != AddOutcome::Full {
            i += 1;
        }
        for _ in 0..120 {
            llc.operate(cycle, &mut mem, &mut cores);
            mem.operate(cycle, &mut llc);
            cycle += 1;
        }
    }
}

#[test]
fn reused_pc_stays_predicted_friendly() {
    let mut llc = tiny_cache();
    let ip = 0x77_0000;
    // A two-line ping-pong in one set: every interval fits the oracle.
    let stream: Vec<(u64, u64)> = (0..30).map(|i| (0x100 + (i % 2), ip)).collect();
    run_stream(&mut llc, &stream, AccessType::Load);
    assert!(llc.policy.predict(ip, AccessType::Load));
}

#[test]
fn thrashing_pc_becomes_averse() {
    let mut llc = tiny_cache();
    let ip = 0x88_0000;
    // 24 distinct lines cycled through one set (stride keeps the set bits
    // constant): far beyond oracle capacity, every reuse overflows.
    let stream: Vec<(u64, u64)> = (0..96).map(|i| (0x200 + (i % 24) * 32, ip)).collect();
    run_stream(&mut llc, &stream, AccessType::Load);
    assert!(!llc.policy.predict(ip, AccessType::Load));
}

#[test]
fn bypass_skips_the_fill_for_averse_lines() {
    let mut cfg = CacheConfig::llc(1);
    cfg.num_sets = 8;
    cfg.num_ways = 4;
    cfg.llc_bypass = true;
    let mut llc = Cache::new("LLC", cfg);

    // Teach the policy that this PC thrashes.
    let averse_ip = 0x99_0000;
    let stream: Vec<(u64, u64)> = (0..96).map(|i| (0x300 + (i % 24) * 32, averse_ip)).collect();
    run_stream(&mut llc, &stream, AccessType::Load);
    assert!(!llc.policy.predict(averse_ip, AccessType::Load));

    // Fill one set completely with friendly lines so a victim is needed,
    // then miss with the averse PC: the fill is bypassed.
    let friendly_ip = 0xAA_0000;
    let fills: Vec<(u64, u64)> = (1..=4).map(|sb| (sb << 5, friendly_ip)).collect();
    run_stream(&mut llc, &fills, AccessType::Load);

    let before = llc.stats.bypassed;
    let probe: Vec<(u64, u64)> = vec![(9 << 5, averse_ip)];
    run_stream(&mut llc, &probe, AccessType::Load);
    assert!(llc.stats.bypassed > before, "averse miss on a full set must bypass");
    assert!(llc.tags().lookup(9 << 5).is_none());
}
