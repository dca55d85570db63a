//! E2E: trace files, configuration files, and the installed binary.

use std::io::Write;
use std::process::Command;

use ccsim::{load_trace, SimConfig, Simulator};

fn write_trace(lines: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().expect("temp trace");
    file.write_all(lines.as_bytes()).expect("write trace");
    file.flush().expect("flush trace");
    file
}

#[test]
fn trace_file_drives_a_run() {
    // The repeated line comes back long after the first miss completed, so
    // it hits instead of merging with the in-flight miss.
    let file = write_trace(
        "# tiny trace\n\
         0 0 0x400100 0x200040 LOAD\n\
         2 0 0x400100 0x200080 LOAD\n\
         2000 0 0x400100 0x200040 LOAD\n\
         2002 0 0x400200 0x2000c0 RFO\n\
         2004 0 0x0 0x200100 WRITEBACK\n",
    );
    let records = load_trace(file.path()).expect("parse");
    assert_eq!(records.len(), 5);

    let cfg = SimConfig {
        llc_sets: 64,
        llc_ways: 8,
        ..Default::default()
    };
    let mut sim = Simulator::new(&cfg);
    let summary = sim.run(&records);
    assert_eq!(summary.accesses_fed, 5);
    // The repeat of 0x200040 hits.
    assert!(sim.llc.stats.hit.iter().sum::<u64>() >= 1);
}

#[test]
fn malformed_traces_are_rejected_with_line_numbers() {
    let file = write_trace("0 0 0x400100 0x200040 LOAD\n1 0 nonsense 0x200080 LOAD\n");
    let err = load_trace(file.path()).unwrap_err();
    assert!(err.to_string().contains("line 2"), "got: {err}");
}

#[test]
fn config_file_overrides_defaults() {
    let cfg: SimConfig = serde_json::from_str(
        r#"{
            "llc_sets": 128,
            "llc_ways": 8,
            "compressed_cache": false,
            "dp_policy": "dyn",
            "warmup_accesses": 500
        }"#,
    )
    .expect("parse config");
    assert_eq!(cfg.llc_sets, 128);
    assert!(!cfg.compressed_cache);
    assert_eq!(cfg.warmup_accesses, 500);
    cfg.cache_config().validate().expect("valid");
}

// ─────────────────────────────────────────────────────────────────────────────
// Binary smoke tests
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn binary_runs_a_synthetic_stream() {
    let output = Command::new(env!("CARGO_BIN_EXE_ccsim"))
        .args(["--synthetic", "20000", "--sets", "256", "--ways", "8"])
        .output()
        .expect("spawn ccsim");
    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Simulation finished"));
    assert!(stdout.contains("LLC TOTAL"));
    assert!(stdout.contains("OPTgen"));
    assert!(stdout.contains("Compressible"));
}

#[test]
fn binary_runs_a_trace_file() {
    let file = write_trace(
        "0 0 0x400100 0x200040 LOAD\n\
         5 0 0x400100 0x200040 LOAD\n",
    );
    let output = Command::new(env!("CARGO_BIN_EXE_ccsim"))
        .arg(file.path())
        .args(["--sets", "64", "--ways", "8"])
        .output()
        .expect("spawn ccsim");
    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));
    assert!(String::from_utf8_lossy(&output.stdout).contains("2 accesses"));
}

#[test]
fn binary_rejects_unknown_dp_policy() {
    let output = Command::new(env!("CARGO_BIN_EXE_ccsim"))
        .args(["--synthetic", "10", "--dp-policy", "sometimes"])
        .output()
        .expect("spawn ccsim");
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("unknown demand-prefetch policy"));
}
