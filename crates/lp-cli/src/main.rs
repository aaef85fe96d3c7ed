//! lifepath CLI

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};

mod config;
mod ingest;
mod output;
mod pipeline;

#[derive(Parser)]
#[command(name = "lifepath")]
#[command(about = "lifepath - cohort life-path panels and regulation effects on firm dynamics")]
#[command(version)]
struct Cli {
    /// Log verbosity level (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "warn")]
    log_level: tracing::Level,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Clean the input tables, assemble every panel and persist it
    Build {
        /// Run configuration (YAML or JSON)
        #[arg(short, long)]
        config: PathBuf,
    },

    /// Fit the estimation families on persisted panels
    Estimate {
        /// Run configuration (YAML or JSON)
        #[arg(short, long)]
        config: PathBuf,
    },

    /// Build, then estimate
    Run {
        /// Run configuration (YAML or JSON)
        #[arg(short, long)]
        config: PathBuf,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_max_level(cli.log_level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Build { config } => cmd_build(&config),
        Commands::Estimate { config } => cmd_estimate(&config),
        Commands::Run { config } => {
            cmd_build(&config)?;
            cmd_estimate(&config)
        }
    }
}

fn load_config(path: &Path) -> Result<config::RunConfig> {
    tracing::info!(path = %path.display(), "loading run config");
    let cfg = config::read_run_config(path)?;
    if cfg.threads > 0 {
        // A pool installed earlier in the process wins.
        let _ = rayon::ThreadPoolBuilder::new().num_threads(cfg.threads).build_global();
    }
    Ok(cfg)
}

fn cmd_build(config: &Path) -> Result<()> {
    let cfg = load_config(config)?;
    let summary = pipeline::build(&cfg)?;
    tracing::info!(panels = summary.panels.len(), "build finished");
    let path = cfg.panels_dir().join("build_summary.json");
    output::write_json(Some(&path), &summary)
}

fn cmd_estimate(config: &Path) -> Result<()> {
    let cfg = load_config(config)?;
    let summary = pipeline::estimate(&cfg)?;
    let path = cfg.results_dir().join("estimation_summary.json");
    output::write_json(Some(&path), &summary)?;
    if summary.n_failed > 0 {
        tracing::warn!(failed = summary.n_failed, total = summary.n_specs, "some specifications failed");
    }
    output::write_json(None, &summary.key_results)
}
