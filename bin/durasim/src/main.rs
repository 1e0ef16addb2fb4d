//! durasim - Monte-Carlo reliability simulator for erasure-coded,
//! rack-scale storage clusters
//!
//! Runs the configured number of simulation iterations and appends one
//! CSV result row per iteration.

use anyhow::{Context, Result};
use clap::Parser;
use std::fs::File;
use std::io::Write;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

use durasim_common::SimConfig;
use durasim_engine::{SimResult, Simulation};

#[derive(Parser, Debug)]
#[command(name = "durasim")]
#[command(about = "Reliability simulator for erasure-coded storage clusters")]
#[command(version)]
struct Args {
    /// Configuration file (TOML)
    #[arg(short, long)]
    config: PathBuf,

    /// Number of simulation iterations
    #[arg(short, long, default_value_t = 1)]
    iterations: usize,

    /// Override the configured RNG seed
    #[arg(short, long)]
    seed: Option<u64>,

    /// Result CSV path
    #[arg(short, long, default_value = "durasim-results.csv")]
    output: PathBuf,

    /// Log level filter (overridden by RUST_LOG)
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn emit_outputs(result: &SimResult, codes: &[String]) {
    for code in codes {
        match code.trim().to_ascii_uppercase().as_str() {
            "PDL" => info!(pdl = result.pdl, "probability of data loss"),
            "PUA" => info!(pua = result.pua, "probability of unavailability"),
            "TRC" => info!(
                trc_tib = result.total_repair_transfers_tib(),
                "total repair cost"
            ),
            "NOMDL" => info!(nomdl = result.nomdl, "normalized magnitude of data loss"),
            other => info!(code = other, "unknown output code"),
        }
    }
}

fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(args.log_level.clone())),
        )
        .init();

    let mut config = SimConfig::load(&args.config)
        .with_context(|| format!("loading configuration from {}", args.config.display()))?;
    if let Some(seed) = args.seed {
        config.simulation.seed = seed;
    }
    let output_codes = config.output.outputs.clone();

    let simulation = Simulation::new(config).context("configuring simulation")?;
    let results = simulation
        .run(args.iterations)
        .context("running simulation")?;

    let mut file = File::create(&args.output)
        .with_context(|| format!("creating {}", args.output.display()))?;
    for result in &results {
        writeln!(file, "{}", result.csv_row())?;
        emit_outputs(result, &output_codes);
    }
    info!(
        iterations = results.len(),
        output = %args.output.display(),
        "results written"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_parses() {
        Args::command().debug_assert();
    }

    #[test]
    fn test_defaults() {
        let args = Args::parse_from(["durasim", "--config", "sim.toml"]);
        assert_eq!(args.iterations, 1);
        assert_eq!(args.output, PathBuf::from("durasim-results.csv"));
        assert!(args.seed.is_none());
    }
}
