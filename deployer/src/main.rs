//! ocrnet CLI

use clap::{Arg, ArgAction, Command};
use commonware_runtime::{tokio, Runner};
use std::{path::PathBuf, process::ExitCode};
use tracing::{error, info};

/// Returns the version of the crate.
pub const fn crate_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

/// Flag for verbose output
const VERBOSE_FLAG: &str = "verbose";

/// Subcommand that bootstraps a network.
const BOOTSTRAP_CMD: &str = "bootstrap";

/// Subcommand that serves the price feed.
const FEED_CMD: &str = "feed";

/// Port the price feed listens on by default.
const DEFAULT_FEED_PORT: &str = "8080";

/// Entrypoint for the ocrnet CLI
fn main() -> ExitCode {
    // Define application
    let matches = Command::new("ocrnet")
        .version(crate_version())
        .about("Bootstrap an oracle reporting test network.")
        .arg(
            Arg::new(VERBOSE_FLAG)
                .short('v')
                .long(VERBOSE_FLAG)
                .action(ArgAction::SetTrue),
        )
        .subcommand(
            Command::new(BOOTSTRAP_CMD)
                .about("Connect, fund and configure the services described in a YAML file.")
                .arg(
                    Arg::new("config")
                        .long("config")
                        .required(true)
                        .help("Path to YAML config file")
                        .value_parser(clap::value_parser!(PathBuf)),
                ),
        )
        .subcommand(
            Command::new(FEED_CMD)
                .about("Serve a constant USD price for oracle jobs to poll.")
                .arg(
                    Arg::new("port")
                        .long("port")
                        .default_value(DEFAULT_FEED_PORT)
                        .help("Port to listen on")
                        .value_parser(clap::value_parser!(u16)),
                ),
        )
        .get_matches();

    // Create logger
    let level = if matches.get_flag(VERBOSE_FLAG) {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    tracing_subscriber::fmt().with_max_level(level).init();

    // Parse subcommands
    let runner = tokio::Runner::default();
    match matches.subcommand() {
        Some((BOOTSTRAP_CMD, matches)) => {
            let Some(path) = matches.get_one::<PathBuf>("config").cloned() else {
                error!("no config provided");
                return ExitCode::FAILURE;
            };
            runner.start(|context| async move {
                match ocrnet_deployer::bootstrap(context, &path).await {
                    Ok(summary) => {
                        let contracts = &summary.contracts;
                        info!(
                            token = %contracts.token,
                            access_controller = %contracts.access_controller,
                            aggregator = %contracts.aggregator,
                            "deployed contracts"
                        );
                        for (oracle, job) in &summary.jobs {
                            info!(%oracle, job = %job.0, "created job");
                        }
                        ExitCode::SUCCESS
                    }
                    Err(e) => {
                        error!(error=?e, "failed to bootstrap network");
                        ExitCode::FAILURE
                    }
                }
            })
        }
        Some((FEED_CMD, matches)) => {
            let port = matches
                .get_one::<u16>("port")
                .copied()
                .unwrap_or_default();
            runner.start(|_| async move {
                if let Err(e) = ocrnet_deployer::feed::serve(port).await {
                    error!(error=?e, "failed to serve price feed");
                    return ExitCode::FAILURE;
                }
                ExitCode::SUCCESS
            })
        }
        Some((cmd, _)) => {
            error!(cmd, "invalid subcommand");
            ExitCode::FAILURE
        }
        None => {
            error!("no subcommand provided");
            ExitCode::FAILURE
        }
    }
}
