//! bllvm-differential - run the differential scenario catalogue
//!
//! ## Commands
//!
//! - `run`: compare the structural candidate against a reference node
//! - `discover`: probe the default and configured RPC ports
//! - `locate`: show which reference binaries would be used
//!
//! Exits with status 1 when any case fails.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{info, warn};

use bllvm_differential::config::DifferentialConfig;
use bllvm_differential::differential::{catalogue, find, format_comparison_result};
use bllvm_differential::node::{NodeDiscovery, NodeLocator, NodeRegistry};
use bllvm_differential::utils::init_logging_from_config;
use bllvm_differential::{run_suite, ReferenceSource, StructuralValidator};

#[derive(Parser)]
#[command(name = "bllvm-differential")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Differential validation against a Bitcoin Core reference node", long_about = None)]
struct Cli {
    /// TOML configuration file (environment variables still apply on top)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run scenarios against the candidate and the reference
    Run {
        /// Only run this scenario (repeatable)
        #[arg(short, long)]
        scenario: Vec<String>,

        /// Worker threads, each owning at most one reference node
        #[arg(short, long, default_value_t = 1)]
        workers: usize,

        /// Print one JSON object per case instead of text
        #[arg(long)]
        json: bool,
    },

    /// Probe for running reference nodes
    Discover,

    /// Show the reference binaries that would be started
    Locate,

    /// List the built-in scenarios
    List,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => DifferentialConfig::from_file(path)?,
        None => DifferentialConfig::from_env()?,
    };
    init_logging_from_config(&config.logging);

    match cli.command {
        Commands::Run {
            scenario,
            workers,
            json,
        } => run(config, scenario, workers, json).await,
        Commands::Discover => {
            let records = tokio::task::spawn_blocking(move || {
                NodeDiscovery::new(&config).scan(config.network)
            })
            .await
            .context("discovery task failed")?;
            for record in records {
                match (record.reachable, record.network) {
                    (true, Some(network)) => {
                        println!("{}:{}\t{}", record.host, record.port, network)
                    }
                    _ => println!("{}:{}\tunreachable", record.host, record.port),
                }
            }
            Ok(ExitCode::SUCCESS)
        }
        Commands::Locate => match NodeLocator::new(&config.locator).locate() {
            Ok(paths) => {
                println!("daemon\t{}", paths.daemon.display());
                println!("cli\t{}", paths.cli.display());
                println!("source\t{:?}", paths.source);
                if let Some(version) = paths.version {
                    println!("version\t{}", version);
                }
                Ok(ExitCode::SUCCESS)
            }
            Err(e) => {
                println!("{}", e);
                Ok(ExitCode::FAILURE)
            }
        },
        Commands::List => {
            for def in catalogue() {
                println!("{:<24}{}", def.name, def.description);
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}

async fn run(
    config: DifferentialConfig,
    names: Vec<String>,
    workers: usize,
    json: bool,
) -> Result<ExitCode> {
    let scenarios = if names.is_empty() {
        catalogue()
    } else {
        let mut selected = Vec::with_capacity(names.len());
        for name in &names {
            match find(name) {
                Some(def) => selected.push(def),
                None => bail!("unknown scenario {:?} (see `list`)", name),
            }
        }
        selected
    };

    let registry = NodeRegistry::new();
    let grace = config.node.stop_timeout();
    let suite_registry = registry.clone();
    let suite = tokio::task::spawn_blocking(move || {
        let source = ReferenceSource::prepare(&config, suite_registry);
        run_suite(&source, &scenarios, &StructuralValidator::new(), workers)
    });

    let summary = tokio::select! {
        joined = suite => joined.context("suite task failed")?,
        _ = tokio::signal::ctrl_c() => {
            warn!("Interrupted, stopping owned reference nodes");
            #[cfg(unix)]
            tokio::task::spawn_blocking(move || registry.terminate_all(grace)).await?;
            // Blocking suite workers cannot be cancelled; leave without waiting for them
            std::process::exit(130);
        }
    };

    for report in &summary.results {
        if json {
            println!("{}", serde_json::to_string(report)?);
        } else {
            println!("{}", format_comparison_result(&report.result));
        }
    }
    info!("{}", summary);
    if !json {
        println!("{}", summary);
    }

    Ok(if summary.has_failures() {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    })
}
