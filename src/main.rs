//! Binary entry point for the `ccsim` command-line simulator.
//!
//! Resolves the run configuration (defaults ← optional JSON config file ←
//! CLI flags), loads or synthesizes an access trace, runs the simulation to
//! completion, and prints the statistics report to stdout.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{bail, Context};
use clap::Parser;

use ccsim::config::{DpPolicy, SimConfig};
use ccsim::sim::Simulator;
use ccsim::trace;

#[derive(Parser, Debug)]
#[command(name = "ccsim", version, about = "Compressed LLC simulator with Hawkeye replacement")]
struct Args {
    /// Access trace file; omit to run a synthetic stream.
    trace: Option<PathBuf>,

    /// JSON configuration file (CLI flags override it).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Length of the synthetic stream when no trace is given.
    #[arg(long, default_value_t = 1_000_000)]
    synthetic: u64,

    /// Number of cores.
    #[arg(long)]
    cpus: Option<usize>,

    /// Number of LLC sets.
    #[arg(long)]
    sets: Option<usize>,

    /// LLC associativity.
    #[arg(long)]
    ways: Option<usize>,

    /// Run the uncompressed baseline organisation.
    #[arg(long)]
    uncompressed: bool,

    /// Allow predicted-averse fills to bypass the cache.
    #[arg(long)]
    bypass: bool,

    /// Demand-prefetch training policy: nodp, middle, alldp or dyn.
    #[arg(long)]
    dp_policy: Option<String>,

    /// Accesses to run before statistics start counting.
    #[arg(long)]
    warmup: Option<u64>,

    /// Increase log verbosity (-v: debug, -vv: trace).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn resolve_config(args: &Args) -> anyhow::Result<SimConfig> {
    let mut cfg = match &args.config {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("reading config {}", path.display()))?;
            serde_json::from_str(&text)
                .with_context(|| format!("parsing config {}", path.display()))?
        }
        None => SimConfig::default(),
    };

    if let Some(cpus) = args.cpus {
        cfg.num_cpus = cpus;
    }
    if let Some(sets) = args.sets {
        cfg.llc_sets = sets;
    }
    if let Some(ways) = args.ways {
        cfg.llc_ways = ways;
    }
    if args.uncompressed {
        cfg.compressed_cache = false;
    }
    if args.bypass {
        cfg.llc_bypass = true;
    }
    if let Some(policy) = &args.dp_policy {
        cfg.dp_policy = match policy.as_str() {
            "nodp" => DpPolicy::NoDp,
            "middle" => DpPolicy::Middle,
            "alldp" => DpPolicy::AllDp,
            "dyn" => DpPolicy::Dyn,
            other => bail!("unknown demand-prefetch policy: {other}"),
        };
    }
    if let Some(warmup) = args.warmup {
        cfg.warmup_accesses = warmup;
    }

    cfg.cache_config().validate().context("invalid configuration")?;
    Ok(cfg)
}

fn run(args: Args) -> anyhow::Result<()> {
    let cfg = resolve_config(&args)?;

    let records = match &args.trace {
        Some(path) => trace::load_trace(path)
            .with_context(|| format!("loading trace {}", path.display()))?,
        None => trace::synthetic(args.synthetic, cfg.num_cpus),
    };
    if records.is_empty() {
        bail!("empty trace");
    }

    let mut sim = Simulator::new(&cfg);
    let summary = sim.run(&records);
    print!("{}", sim.report(&summary));
    Ok(())
}

fn main() -> ExitCode {
    let args = Args::parse();

    let level = match args.verbose {
        0 => tracing::Level::INFO,
        1 => tracing::Level::DEBUG,
        _ => tracing::Level::TRACE,
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("ccsim: {err:#}");
            ExitCode::FAILURE
        }
    }
}
