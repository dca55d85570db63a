//! Replacement policy machinery: the offline oracle family, the PC
//! predictor, the RRIP generator, and the controller tying them together.
//!
//! Submodules:
//! - [`counter`]    — const-generic saturating counter
//! - [`predictor`]  — PC-signature history counter table (SHCT)
//! - [`ring`]       — quanta-indexed ring buffer backing the oracle variants
//! - [`optgen`]     — fixed-window per-set liveness oracle
//! - [`oracle`]     — unbounded / size-aware / superblock-aware oracles
//! - [`hawkeyegen`] — per-set RRIP insertion/aging state
//! - [`aux_tag`]    — size-priority shadow tag arrays for set dueling
//! - [`hawkeye`]    — the replacement controller orchestrating the above

pub mod aux_tag;
pub mod counter;
pub mod hawkeye;
pub mod hawkeyegen;
pub mod optgen;
pub mod oracle;
pub mod predictor;
pub mod ring;

pub use hawkeye::{HawkeyePolicy, ReplacementDecision};
pub use optgen::OptGen;
pub use oracle::OracleKind;
pub use predictor::ShctPredictor;
