//! E2E: the liveness oracle family.
//!
//! Exercises the fixed-window oracle, the unbounded truncating variant on
//! the worked reuse example, and the superblock-aware variant on an
//! overlapping-interval schedule including its off-by-one boundary.

use ccsim::replacement::oracle::{OracleKind, UnboundedOptGen, YaccGen};
use ccsim::OptGen;

struct Interval {
    start: u64,
    end: u64,
}

// ─────────────────────────────────────────────────────────────────────────────
// Reuse example: six usage intervals against a 2-line cache
// ─────────────────────────────────────────────────────────────────────────────

const REUSE_STREAM: [Interval; 6] = [
    Interval { start: 1, end: 2 },  // B
    Interval { start: 0, end: 6 },  // A
    Interval { start: 4, end: 8 },  // D
    Interval { start: 5, end: 9 },  // E
    Interval { start: 7, end: 10 }, // F
    Interval { start: 3, end: 11 }, // C
];

#[test]
fn unbounded_oracle_reuse_example_counts_four_hits() {
    let mut gen = UnboundedOptGen::new(2);
    let mut hits = 0;
    for interval in &REUSE_STREAM {
        if gen.try_cache(interval.start, interval.end) {
            hits += 1;
        }
    }
    assert_eq!(hits, 4);
    assert_eq!(gen.num_hits(), 4);
    assert_eq!(gen.num_accesses(), 6);
}

#[test]
fn fixed_window_oracle_agrees_on_the_reuse_example() {
    let mut gen = OptGen::new(2, 1);
    let mut hits = 0;
    for interval in &REUSE_STREAM {
        if gen.should_cache(interval.end, interval.start, false, 0) {
            hits += 1;
        }
        gen.add_access(interval.end, 0);
    }
    assert_eq!(hits, 4);
    assert_eq!(gen.get_num_opt_hits(), 4);
}

#[test]
fn probe_is_idempotent() {
    let mut gen = OptGen::new(2, 1);
    gen.add_access(0, 0);
    gen.add_access(3, 0);
    let first = gen.should_cache_probe(3, 0);
    let second = gen.should_cache_probe(3, 0);
    assert_eq!(first, second);
}

// ─────────────────────────────────────────────────────────────────────────────
// Superblock-aware oracle: overlapping superblocks over two ways
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn yacc_overlapping_superblock_schedule() {
    let mut gen = YaccGen::new(2, 1024);

    // Overlapping usage intervals within superblock 0 at cf=2 share a way.
    assert!(gen.try_cache(0, 10, 0, 2));
    assert!(gen.try_cache(4, 14, 0, 2));

    // A different superblock occupies the other way.
    assert!(gen.try_cache(0, 20, 1, 1));

    // Cache full over these intervals: both rejected.
    assert!(!gen.try_cache(1, 21, 1, 1));
    assert!(!gen.try_cache(1, 22, 0, 2));

    // Superblock 0's way is free from quantum 15 on: displaced.
    assert!(gen.try_cache(15, 20, 3, 1));

    // Much later both ways are free again.
    assert!(gen.try_cache(50, 80, 3, 1));
    assert!(gen.try_cache(50, 81, 3, 1));

    // Off-by-one boundary: both ways still busy at quantum 80.
    assert!(!gen.try_cache(80, 81, 3, 1));

    assert_eq!(gen.num_hits(), 6);
    assert_eq!(gen.num_accesses(), 9);
}

#[test]
fn oracle_kind_dispatches_uniformly() {
    let mut oracles = [
        OracleKind::Unbounded(UnboundedOptGen::new(4)),
        OracleKind::SizeAware(ccsim::replacement::oracle::SizeAwareOptGen::new(4)),
        OracleKind::Yacc(YaccGen::new(4, 256)),
    ];
    for oracle in oracles.iter_mut() {
        assert!(oracle.try_cache(0, 5, 0, 2));
        assert_eq!(oracle.num_hits(), 1);
        assert_eq!(oracle.num_accesses(), 1);
    }
}

#[test]
fn size_aware_oracle_packs_by_compression_factor() {
    // Two lines of space. Four cf=4 lines and one cf=2 line coexist (4×16
    // + 32 = 96 of 128 bytes); a second uncompressed line does not fit.
    let mut gen = ccsim::replacement::oracle::SizeAwareOptGen::new(2);
    for _ in 0..4 {
        assert!(gen.try_cache(0, 10, 4));
    }
    assert!(gen.try_cache(0, 10, 2));
    assert!(!gen.try_cache(0, 10, 1));
}
