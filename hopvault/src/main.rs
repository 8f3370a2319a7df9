//! hopvault command line.
//!
//! ```bash
//! hopvault --config hopvault.toml check
//! hopvault --config hopvault.toml once
//! RUST_LOG=debug hopvault --config hopvault.toml run
//! ```

use std::path::PathBuf;
use std::process::ExitCode;

use chrono::Utc;
use clap::{Parser, Subcommand};
use log::{error, info};

use hopvault::schedule::open_archive;
use hopvault::{AppConfig, Outcome, Scheduler, SweepOutcome};

#[derive(Parser)]
#[command(name = "hopvault", version)]
#[command(about = "Configuration backups across chained SSH hops")]
struct Cli {
    /// Configuration file.
    #[arg(short, long, global = true, default_value = "hopvault.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Capture on the configured period until interrupted.
    Run,

    /// Run one capture cycle; exits non-zero if any device failed.
    Once,

    /// Apply the retention policy to the archive and exit.
    Sweep,

    /// Validate the configuration and print the inventory.
    Check,
}

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> hopvault::Result<ExitCode> {
    let config = AppConfig::load(&cli.config)?;

    match cli.command {
        Command::Check => {
            for chain in &config.chains {
                println!("{} ({})", chain.name, chain.platform.name);
                for (depth, device) in chain.devices.iter().enumerate() {
                    println!(
                        "  {:>2}  {:<16} {}@{}:{}",
                        depth, device.name, device.username, device.address, device.port
                    );
                }
            }
            println!(
                "{} chains, {} devices, archive at {}",
                config.chains.len(),
                config.device_count(),
                config.archive_dir.display()
            );
            Ok(ExitCode::SUCCESS)
        }

        Command::Sweep => {
            let (archive, uploads) = open_archive(&config)?;
            let removed = archive.sweep(&config.retention, Utc::now())?;
            println!("removed {} snapshots", removed);
            if let Some(uploads) = uploads {
                uploads.flush().await;
            }
            Ok(ExitCode::SUCCESS)
        }

        Command::Once => {
            let scheduler = Scheduler::from_config(&config)?;
            let summary = scheduler.run_once().await;
            let uploaded = scheduler.flush_uploads().await;

            for report in &summary.reports {
                for result in &report.results {
                    match (&result.outcome, &result.failure) {
                        (Outcome::Failed, Some(failure)) => println!(
                            "{:<10} {:<16} failed [{}] {}",
                            report.chain, result.device, failure.kind, failure.message
                        ),
                        (outcome, _) => println!(
                            "{:<10} {:<16} {}",
                            report.chain, result.device, outcome
                        ),
                    }
                }
            }
            match &summary.sweep {
                SweepOutcome::Removed(n) => println!("retention: removed {}", n),
                SweepOutcome::Failed(message) => println!("retention: failed: {}", message),
            }

            if !uploaded {
                println!("upload: some snapshots were not mirrored");
            }

            Ok(if summary.has_failures() {
                ExitCode::FAILURE
            } else {
                ExitCode::SUCCESS
            })
        }

        Command::Run => {
            let scheduler = Scheduler::from_config(&config)?;
            info!(
                "capturing {} devices in {} chains every {:?}",
                config.device_count(),
                config.chains.len(),
                config.period
            );

            let shutdown = async {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    error!("cannot listen for Ctrl-C: {}", e);
                    std::future::pending::<()>().await;
                }
            };
            let cycles = scheduler.run_forever(config.period, shutdown).await;
            scheduler.flush_uploads().await;
            info!("stopped after {} cycles", cycles);
            Ok(ExitCode::SUCCESS)
        }
    }
}
