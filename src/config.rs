// config.rs — Compile-time geometry constants and runtime configuration.
//
// The cache geometry lives here as plain constants; everything that used to
// be a build-time switch (compressed organisation, LLC bypass, TLB-synced
// address maps, verbose per-access printouts) is a runtime field on
// [`CacheConfig`] so a single binary can run every organisation.

use serde::Deserialize;

// ─────────────────────────────────────────────────────────────────────────────
// Line and superblock geometry
// ─────────────────────────────────────────────────────────────────────────────

/// Cache line size in bytes; the atomic unit of transfer.
pub const BLOCK_SIZE: usize = 64;
/// log2(BLOCK_SIZE); bits [5:0] of a physical address are the line offset.
pub const LOG2_BLOCK_SIZE: u32 = 6;

/// Maximum number of compressed lines sharing one superblock tag.
pub const MAX_COMPRESSIBILITY: usize = 4;
/// log2(MAX_COMPRESSIBILITY); bits [7:6] of a physical address are the
/// intra-superblock block id.
pub const LOG2_MAX_COMPRESSIBILITY: u32 = 2;

/// Page size used for the address-map sizing below.
pub const PAGE_SIZE: usize = 4096;

// ─────────────────────────────────────────────────────────────────────────────
// Default LLC geometry
// ─────────────────────────────────────────────────────────────────────────────

/// Default number of LLC sets per core.
pub const LLC_SETS_PER_CORE: usize = 2048;
/// Default LLC associativity.
pub const LLC_WAYS: usize = 16;
/// Default load-to-use latency charged on every queue insertion, in cycles.
pub const LLC_LATENCY: u64 = 20;

/// Default queue depths.
pub const MSHR_SIZE: usize = 32;
pub const RQ_SIZE: usize = 32;
pub const WQ_SIZE: usize = 32;
pub const PQ_SIZE: usize = 32;

/// Reads drained from the read queue per scheduler tick.
pub const MAX_READ_PER_CYCLE: usize = 1;

// ─────────────────────────────────────────────────────────────────────────────
// Replacement-policy sizing
// ─────────────────────────────────────────────────────────────────────────────

/// Width of the liveness window tracked by the per-set oracle.
pub const OPTGEN_VECTOR_SIZE: usize = 128;

/// Occupancy limit handed to each per-set oracle. Two ways are reserved for
/// lines the oracle never sees (writeback-only residents), matching the
/// generator sizing.
pub const fn optgen_capacity(ways: usize) -> usize {
    ways - 2
}

/// Saturation ceiling of a signature counter (5 bits).
pub const MAX_SHCT: u32 = 31;
/// log2 of the signature table size.
pub const SHCT_SIZE_BITS: u32 = 14;
/// Number of distinct PC signatures.
pub const SHCT_SIZE: u64 = 1 << SHCT_SIZE_BITS;

/// Maximum re-reference prediction value (3 bits, saturating).
pub const MAX_RRPV: u8 = 7;

/// Accesses between epoch rollovers of the replacement controller.
pub const EPOCH_LENGTH: u64 = 100_000;

// ─────────────────────────────────────────────────────────────────────────────
// Address-map cache sizing
// ─────────────────────────────────────────────────────────────────────────────

/// Associativity of the on-chip physical↔structural maps.
pub const AMC_WAYS: usize = 16 * 16;
/// Total entries across both maps: one per line covered by the second-level
/// TLB (STLB reach / line size).
pub const AMC_SIZE: usize = 128 * 12 * PAGE_SIZE / BLOCK_SIZE;

// ─────────────────────────────────────────────────────────────────────────────
// Demand-prefetch training policy
// ─────────────────────────────────────────────────────────────────────────────

/// Controls which prefetch-terminated usage intervals train the predictor.
///
/// The right end of a trained interval is normally a demand access; these
/// policies decide when an interval ending in a prefetch may train too.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DpPolicy {
    /// Never train on prefetch-terminated intervals.
    NoDp,
    /// Train only short intervals (reuse distance < 5 × num_cpus).
    #[default]
    Middle,
    /// Train on every prefetch-terminated interval.
    AllDp,
    /// Per-core dynamic threshold recomputed at each epoch rollover.
    Dyn,
}

// ─────────────────────────────────────────────────────────────────────────────
// Runtime configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Per-cache-instance configuration. One value of this struct fully
/// determines the organisation of a [`crate::cache::Cache`].
#[derive(Clone, Debug)]
pub struct CacheConfig {
    /// Number of cores sharing this cache.
    pub num_cpus: usize,
    /// Number of sets.
    pub num_sets: usize,
    /// Associativity.
    pub num_ways: usize,
    pub mshr_size: usize,
    pub rq_size: usize,
    pub wq_size: usize,
    pub pq_size: usize,
    /// Cycles added to a packet's event cycle on each queue insertion.
    pub latency: u64,
    /// Fill level of this cache in the hierarchy (see `packet::fill_level`).
    pub fill_level: u32,
    /// Superblock-compressed organisation when true; uncompressed baseline
    /// otherwise.
    pub compressed_cache: bool,
    /// Allow the replacement policy to answer "no way": the request is
    /// serviced without filling.
    pub llc_bypass: bool,
    /// Keep the physical↔structural maps bounded by TLB residency.
    pub tlb_sync: bool,
    /// Emit per-access trace events (expensive).
    pub debug_printouts: bool,
    /// Demand-prefetch training policy, per core.
    pub dp_policy: Vec<DpPolicy>,
    /// Accesses between epoch rollovers.
    pub epoch_length: u64,
}

impl CacheConfig {
    /// Default single-core LLC organisation.
    pub fn llc(num_cpus: usize) -> Self {
        Self {
            num_cpus,
            num_sets: LLC_SETS_PER_CORE * num_cpus,
            num_ways: LLC_WAYS,
            mshr_size: MSHR_SIZE * num_cpus,
            rq_size: RQ_SIZE * num_cpus,
            wq_size: WQ_SIZE * num_cpus,
            pq_size: PQ_SIZE * num_cpus,
            latency: LLC_LATENCY,
            fill_level: crate::cache::packet::fill_level::LLC,
            compressed_cache: true,
            llc_bypass: false,
            tlb_sync: true,
            debug_printouts: false,
            dp_policy: vec![DpPolicy::Middle; num_cpus],
            epoch_length: EPOCH_LENGTH,
        }
    }

    /// Sanity-check derived quantities; call once after construction.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.num_sets.is_power_of_two() {
            return Err(ConfigError::SetsNotPowerOfTwo(self.num_sets));
        }
        if self.num_ways < 3 {
            // optgen_capacity(ways) reserves two ways
            return Err(ConfigError::TooFewWays(self.num_ways));
        }
        if self.num_cpus == 0 || self.dp_policy.len() != self.num_cpus {
            return Err(ConfigError::CpuCountMismatch {
                cpus: self.num_cpus,
                policies: self.dp_policy.len(),
            });
        }
        Ok(())
    }
}

/// Configuration rejected by [`CacheConfig::validate`].
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("number of sets must be a power of two, got {0}")]
    SetsNotPowerOfTwo(usize),
    #[error("need at least 3 ways, got {0}")]
    TooFewWays(usize),
    #[error("{cpus} cpus but {policies} demand-prefetch policies")]
    CpuCountMismatch { cpus: usize, policies: usize },
}

/// Simulation parameters loadable from a JSON file (`--config`). Every field
/// has a default so a partial file is fine; CLI flags override afterwards.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    pub num_cpus: usize,
    pub llc_sets: usize,
    pub llc_ways: usize,
    pub compressed_cache: bool,
    pub llc_bypass: bool,
    pub tlb_sync: bool,
    pub dp_policy: DpPolicy,
    pub epoch_length: u64,
    /// Accesses to run with statistics suppressed before measurement starts.
    pub warmup_accesses: u64,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            num_cpus: 1,
            llc_sets: LLC_SETS_PER_CORE,
            llc_ways: LLC_WAYS,
            compressed_cache: true,
            llc_bypass: false,
            tlb_sync: true,
            dp_policy: DpPolicy::Middle,
            epoch_length: EPOCH_LENGTH,
            warmup_accesses: 0,
        }
    }
}

impl SimConfig {
    /// Expand into the cache-instance configuration.
    pub fn cache_config(&self) -> CacheConfig {
        let mut cfg = CacheConfig::llc(self.num_cpus);
        cfg.num_sets = self.llc_sets;
        cfg.num_ways = self.llc_ways;
        cfg.compressed_cache = self.compressed_cache;
        cfg.llc_bypass = self.llc_bypass;
        cfg.tlb_sync = self.tlb_sync;
        cfg.dp_policy = vec![self.dp_policy; self.num_cpus];
        cfg.epoch_length = self.epoch_length;
        cfg
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_llc_config_validates() {
        CacheConfig::llc(1).validate().unwrap();
        CacheConfig::llc(4).validate().unwrap();
    }

    #[test]
    fn rejects_non_power_of_two_sets() {
        let mut cfg = CacheConfig::llc(1);
        cfg.num_sets = 1000;
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::SetsNotPowerOfTwo(1000))
        ));
    }

    #[test]
    fn sim_config_json_roundtrip() {
        let cfg: SimConfig =
            serde_json::from_str(r#"{ "num_cpus": 2, "dp_policy": "alldp" }"#).unwrap();
        assert_eq!(cfg.num_cpus, 2);
        assert_eq!(cfg.dp_policy, DpPolicy::AllDp);
        // untouched fields keep their defaults
        assert_eq!(cfg.llc_ways, LLC_WAYS);
        cfg.cache_config().validate().unwrap();
    }
}
