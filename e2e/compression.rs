//! E2E: compression estimators and the pattern/dictionary codec.

use ccsim::compression::cpack;
use ccsim::compression::CompressionTracker;
use ccsim::{bdi_compress, compression_factor, fpc_compress};

const LINE: usize = 64;

// ─────────────────────────────────────────────────────────────────────────────
// BDI estimator
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn zero_line_packs_to_one_byte_factor_four() {
    let line = [0u8; LINE];
    assert_eq!(bdi_compress(&line), 1);
    assert_eq!(compression_factor(bdi_compress(&line)), 4);
}

#[test]
fn same_value_line_packs_to_eight_bytes_factor_four() {
    let line = [0xABu8; LINE];
    assert_eq!(bdi_compress(&line), 8);
    assert_eq!(compression_factor(bdi_compress(&line)), 4);
}

#[test]
fn narrow_deltas_compress_by_width() {
    // 8-byte values spread within a 2-byte delta of a large base: the
    // two-byte-delta candidate covers the whole line.
    let mut line = [0u8; LINE];
    for (i, chunk) in line.chunks_exact_mut(8).enumerate() {
        let v: u64 = 0x0123_4567_89AB_0000 + (i as u64) * 0x1000;
        chunk.copy_from_slice(&v.to_le_bytes());
    }
    let size = bdi_compress(&line);
    assert!(size <= 32, "expected delta packing, got {size}");
    assert_eq!(compression_factor(size), 2);
}

#[test]
fn incompressible_line_keeps_full_size() {
    let mut line = [0u8; LINE];
    let mut x: u64 = 88172645463325252;
    for b in line.iter_mut() {
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        *b = (x >> 24) as u8;
    }
    assert_eq!(bdi_compress(&line), LINE as u32);
    assert_eq!(compression_factor(LINE as u32), 1);
}

// ─────────────────────────────────────────────────────────────────────────────
// FPC estimator
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn fpc_sizes_zero_and_small_immediates() {
    // All-zero line: one byte per word plus the 3-bit-per-word prefix.
    assert_eq!(fpc_compress(&[0u8; LINE]), 22);

    // Words holding small positive immediates stay in the one-byte class.
    let mut line = [0u8; LINE];
    for chunk in line.chunks_exact_mut(4) {
        chunk.copy_from_slice(&42u32.to_le_bytes());
    }
    assert_eq!(fpc_compress(&line), 22);
}

#[test]
fn fpc_never_exceeds_line_size() {
    let mut line = [0u8; LINE];
    for (i, b) in line.iter_mut().enumerate() {
        *b = (i as u8).wrapping_mul(167).wrapping_add(13);
    }
    assert!(fpc_compress(&line) <= LINE as u32);
}

// ─────────────────────────────────────────────────────────────────────────────
// Codec round-trips
// ─────────────────────────────────────────────────────────────────────────────

fn cpack_roundtrip(line: &[u8; LINE]) -> usize {
    let mut encoded = [0u8; cpack::MAX_COMPRESSED_BYTES];
    let size = cpack::compress(line, &mut encoded);
    let mut decoded = [0u8; LINE];
    cpack::decompress(&encoded, &mut decoded);
    assert_eq!(&decoded, line, "codec round-trip mismatch");
    size
}

#[test]
fn cpack_round_trips_representative_lines() {
    cpack_roundtrip(&[0u8; LINE]);
    cpack_roundtrip(&[0x5Au8; LINE]);

    // Pointer-like data: shared high bytes, varying low bytes.
    let mut pointers = [0u8; LINE];
    for (i, chunk) in pointers.chunks_exact_mut(8).enumerate() {
        let v = 0x7FFF_AA00_1200u64 + (i as u64) * 0x40;
        chunk.copy_from_slice(&v.to_le_bytes());
    }
    cpack_roundtrip(&pointers);

    // Noise.
    let mut noise = [0u8; LINE];
    let mut x: u32 = 0xC0FF_EE11;
    for b in noise.iter_mut() {
        x = x.wrapping_mul(1664525).wrapping_add(1013904223);
        *b = (x >> 16) as u8;
    }
    cpack_roundtrip(&noise);
}

#[test]
fn cpack_round_trips_random_lines() {
    use rand::{rngs::StdRng, Rng, SeedableRng};
    let mut rng = StdRng::seed_from_u64(0x5EED);
    for _ in 0..200 {
        let mut line = [0u8; LINE];
        rng.fill(&mut line[..]);
        cpack_roundtrip(&line);
    }
}

#[test]
fn cpack_compresses_redundant_lines() {
    let mut line = [0u8; LINE];
    for chunk in line.chunks_exact_mut(4) {
        chunk.copy_from_slice(&0xDEAD_BEEFu32.to_be_bytes());
    }
    let size = cpack_roundtrip(&line);
    assert!(size < LINE / 2, "dictionary hits should halve the line, got {size}");
}

// ─────────────────────────────────────────────────────────────────────────────
// Fill histogram
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn tracker_summarises_fill_mix() {
    let mut tracker = CompressionTracker::new();
    for _ in 0..6 {
        tracker.increment(4);
    }
    for _ in 0..3 {
        tracker.increment(2);
    }
    tracker.increment(1);

    let report = tracker.report();
    assert!(report.contains("Compressible 4: 6"));
    assert!(report.contains("Compressible 2: 3"));
    assert!(report.contains("Compressible 1: 1"));
    // 10 / (6/4 + 3/2 + 1/1) = 2.5
    assert!(report.contains("Benchmark Compression Ratio: 2.50"));
}
