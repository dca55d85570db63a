//! Base-delta-immediate and frequent-pattern compressed-size estimators.
//!
//! Both estimators answer one question: if this 64-byte line were compressed,
//! how many bytes would it occupy? Neither produces an encoded byte stream;
//! the simulator only needs the size to derive a compression factor.
//!
//! Two multi-base searches exist. The greedy two-base search is the
//! standalone estimator exposed as [`compress`]; the three-base search with a
//! duplicate-base check is what the cache fill path uses via
//! [`fill_compress`]. They differ on lines whose values cluster around three
//! distinct bases.

use crate::config::BLOCK_SIZE;

// ─────────────────────────────────────────────────────────────────────────────
// Element packing
// ─────────────────────────────────────────────────────────────────────────────

/// Width of one element when the line is viewed as an array of equal-sized
/// little-endian integers.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum Step {
    Eight = 8,
    Four = 4,
    Two = 2,
}

/// Delta width for the multi-base search. Only 1-, 2- and 4-byte deltas are
/// representable, so an invalid width cannot reach the search.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum DeltaWidth {
    One = 1,
    Two = 2,
    Four = 4,
}

impl DeltaWidth {
    /// Largest absolute delta encodable at this width.
    fn limit(self) -> u64 {
        match self {
            DeltaWidth::One => 0xFF,
            DeltaWidth::Two => 0xFFFF,
            DeltaWidth::Four => 0xFFFF_FFFF,
        }
    }
}

/// Repack the line into little-endian elements of `step` bytes each.
fn pack(line: &[u8; BLOCK_SIZE], step: Step) -> Vec<u64> {
    line.chunks_exact(step as usize)
        .map(|chunk| {
            chunk
                .iter()
                .enumerate()
                .fold(0u64, |acc, (i, &b)| acc + ((b as u64) << (8 * i)))
        })
        .collect()
}

/// Absolute difference of two values interpreted as a signed 64-bit delta.
#[inline]
fn delta_magnitude(a: u64, b: u64) -> u64 {
    (a.wrapping_sub(b) as i64).unsigned_abs()
}

// ─────────────────────────────────────────────────────────────────────────────
// Trivial packings
// ─────────────────────────────────────────────────────────────────────────────

fn is_zero_packable(values: &[u64]) -> bool {
    values.iter().all(|&v| v == 0)
}

fn is_same_value_packable(values: &[u64]) -> bool {
    values.iter().all(|&v| v == values[0])
}

// ─────────────────────────────────────────────────────────────────────────────
// Multi-base search
// ─────────────────────────────────────────────────────────────────────────────

/// How many bases the search may allocate and whether a candidate base is
/// checked against the already-chosen ones before being added.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum BaseSearch {
    /// Up to two bases (implicit zero plus one discovered), no duplicate
    /// check.
    Greedy2,
    /// Up to three bases with duplicate suppression.
    Dedup3,
}

impl BaseSearch {
    fn max_bases(self) -> usize {
        match self {
            BaseSearch::Greedy2 => 2,
            BaseSearch::Dedup3 => 3,
        }
    }
}

/// Size in bytes after multi-base compression of `values` (elements of
/// `elem_size` bytes) with deltas of `width` bytes, or the uncompressed size
/// when not every element is within delta range of some base.
///
/// Base zero is always the first base; further bases are discovered in scan
/// order while iterating elements against the bases found so far.
fn mult_base_size(values: &[u64], width: DeltaWidth, elem_size: usize, search: BaseSearch) -> u32 {
    let limit = width.limit();
    let max_bases = search.max_bases();

    let mut bases = [0u64; 64];
    let mut base_count = 1usize; // bases[0] == 0

    'outer: for &v in values {
        let mut j = 0;
        while j < base_count {
            if delta_magnitude(bases[j], v) > limit {
                let add = match search {
                    BaseSearch::Greedy2 => true,
                    BaseSearch::Dedup3 => !bases[..base_count].contains(&v),
                };
                if add {
                    bases[base_count] = v;
                    base_count += 1;
                }
            }
            j += 1;
        }
        if base_count >= max_bases {
            break 'outer;
        }
    }

    let covered = values
        .iter()
        .filter(|&&v| bases[..base_count].iter().any(|&b| delta_magnitude(b, v) <= limit))
        .count();

    if covered < values.len() {
        return (values.len() * elem_size) as u32;
    }

    (width as usize * covered + elem_size * (max_bases - 1) + (values.len() - covered) * elem_size)
        as u32
}

// ─────────────────────────────────────────────────────────────────────────────
// BDI estimator
// ─────────────────────────────────────────────────────────────────────────────

/// Candidate sweep shared by both BDI entry points: zero-pack, same-value at
/// 8- and 4-byte granularity, then multi-base at element widths 8/4/2 with
/// deltas 1/2/4.
fn bdi_size(line: &[u8; BLOCK_SIZE], search: BaseSearch) -> u32 {
    let mut best = BLOCK_SIZE as u32;

    let v8 = pack(line, Step::Eight);
    if is_zero_packable(&v8) {
        best = best.min(1);
    }
    let same8 = is_same_value_packable(&v8);
    if same8 {
        best = best.min(8);
    }
    best = best.min(mult_base_size(&v8, DeltaWidth::One, 8, search));
    best = best.min(mult_base_size(&v8, DeltaWidth::Two, 8, search));
    best = best.min(mult_base_size(&v8, DeltaWidth::Four, 8, search));

    let v4 = pack(line, Step::Four);
    // The half-width repeated-value encoding only competes when the full
    // 8-byte elements are not already uniform; a uniform line is reported as
    // the 8-byte same-value size.
    if !same8 && is_same_value_packable(&v4) {
        best = best.min(4);
    }
    best = best.min(mult_base_size(&v4, DeltaWidth::One, 4, search));
    best = best.min(mult_base_size(&v4, DeltaWidth::Two, 4, search));

    let v2 = pack(line, Step::Two);
    best = best.min(mult_base_size(&v2, DeltaWidth::One, 2, search));

    best
}

/// Standalone BDI estimate: minimum achievable size in `[1, 64]` using the
/// greedy two-base search.
pub fn compress(line: &[u8; BLOCK_SIZE]) -> u32 {
    bdi_size(line, BaseSearch::Greedy2)
}

/// BDI estimate used by the cache fill path: three bases with duplicate
/// suppression. Never larger than the line size.
pub fn fill_compress(line: &[u8; BLOCK_SIZE]) -> u32 {
    bdi_size(line, BaseSearch::Dedup3)
}

// ─────────────────────────────────────────────────────────────────────────────
// FPC estimator
// ─────────────────────────────────────────────────────────────────────────────

/// Frequent-pattern estimate: classifies each 32-bit word into one of seven
/// compressed encodings and charges 3 prefix bits per word on top.
pub fn fpc_compress(line: &[u8; BLOCK_SIZE]) -> u32 {
    let words = pack(line, Step::Four);
    let mut payload: u32 = 0;

    for &w in &words {
        let w32 = w as u32;
        // zero word
        if w32 == 0 {
            payload += 1;
            continue;
        }
        // sign-extended 8-bit / 16-bit immediates
        if (w32 as i32).unsigned_abs() <= 0xFF {
            payload += 1;
            continue;
        }
        if (w32 as i32).unsigned_abs() <= 0xFFFF {
            payload += 2;
            continue;
        }
        // halfword of zeroes in the low bits
        if w32 & 0xFFFF == 0 {
            payload += 2;
            continue;
        }
        // two independent byte-sized halfwords
        if w32 & 0xFFFF <= 0xFF && (w32 >> 16) & 0xFFFF <= 0xFF {
            payload += 2;
            continue;
        }
        // four repeated bytes
        let b0 = w32 & 0xFF;
        if (w32 >> 8) & 0xFF == b0 && (w32 >> 16) & 0xFF == b0 && (w32 >> 24) & 0xFF == b0 {
            payload += 1;
            continue;
        }
        // uncompressed word
        payload += 4;
    }

    // 3 pattern bits per word, rounded down to whole bytes (6 for 16 words).
    let total = payload + (words.len() as u32 * 3) / 8;
    total.min(BLOCK_SIZE as u32)
}

// ─────────────────────────────────────────────────────────────────────────────
// Compression factor
// ─────────────────────────────────────────────────────────────────────────────

/// Compression factor reaching the cache: half-line granularity only, so the
/// result is 1, 2 or 4 regardless of how small the estimate is.
pub fn compression_factor(compressed_size: u32) -> u32 {
    if compressed_size > 32 {
        1
    } else if compressed_size > 16 {
        2
    } else {
        4
    }
}

/// Compression factor the tag array records at fill time.
pub fn fill_compression_factor(line: &[u8; BLOCK_SIZE]) -> u32 {
    compression_factor(fill_compress(line))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line_of(b: u8) -> [u8; BLOCK_SIZE] {
        [b; BLOCK_SIZE]
    }

    #[test]
    fn zero_line_packs_to_one_byte() {
        assert_eq!(compress(&line_of(0)), 1);
        assert_eq!(compression_factor(1), 4);
    }

    #[test]
    fn same_value_line_packs_to_eight_bytes() {
        // 64 copies of 0xAB: every 8-byte element is identical and non-zero,
        // and the one-byte-delta search at 2-byte granularity cannot beat it.
        assert_eq!(compress(&line_of(0xAB)), 8);
        assert_eq!(compression_factor(8), 4);
    }

    #[test]
    fn small_deltas_compress() {
        // 8-byte elements all within a 1-byte delta of the first.
        let mut line = [0u8; BLOCK_SIZE];
        for (i, chunk) in line.chunks_exact_mut(8).enumerate() {
            chunk[0] = i as u8; // values 0..8, near base zero
        }
        let size = compress(&line);
        assert!(size <= 16, "expected small-delta packing, got {size}");
    }

    #[test]
    fn random_looking_line_does_not_compress() {
        let mut line = [0u8; BLOCK_SIZE];
        let mut x: u64 = 0x9E37_79B9_7F4A_7C15;
        for b in line.iter_mut() {
            x = x.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            *b = (x >> 33) as u8;
        }
        assert_eq!(compress(&line), BLOCK_SIZE as u32);
        assert_eq!(compression_factor(BLOCK_SIZE as u32), 1);
    }

    #[test]
    fn three_base_search_beats_two_base_on_trimodal_data() {
        // Elements cluster at 0, ~2^40 and ~2^50: three bases cover them,
        // two do not.
        let mut line = [0u8; BLOCK_SIZE];
        for (i, chunk) in line.chunks_exact_mut(8).enumerate() {
            let v: u64 = match i % 3 {
                0 => i as u64,
                1 => (1u64 << 40) + i as u64,
                _ => (1u64 << 50) + i as u64,
            };
            chunk.copy_from_slice(&v.to_le_bytes());
        }
        assert!(fill_compress(&line) < compress(&line));
    }

    #[test]
    fn fpc_zero_line() {
        // 16 zero words: 16 bytes of payload + 6 bytes of pattern bits.
        assert_eq!(fpc_compress(&line_of(0)), 22);
    }

    #[test]
    fn fpc_repeated_bytes() {
        // Each word is four repeated 0x77 bytes: 1 byte per word + prefix.
        assert_eq!(fpc_compress(&line_of(0x77)), 22);
    }

    #[test]
    fn fpc_incompressible_is_capped() {
        let mut line = [0u8; BLOCK_SIZE];
        for (i, b) in line.iter_mut().enumerate() {
            *b = (i as u8).wrapping_mul(37).wrapping_add(101);
        }
        assert!(fpc_compress(&line) <= BLOCK_SIZE as u32);
    }

    #[test]
    fn factor_thresholds() {
        assert_eq!(compression_factor(64), 1);
        assert_eq!(compression_factor(33), 1);
        assert_eq!(compression_factor(32), 2);
        assert_eq!(compression_factor(17), 2);
        assert_eq!(compression_factor(16), 4);
        assert_eq!(compression_factor(1), 4);
    }
}
