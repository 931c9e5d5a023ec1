//! LwM2M conformance harness
//!
//! Drives the LwM2M client, server and bootstrap-server command-line
//! binaries as black boxes and checks their output against test scenarios.

use clap::Parser;
use commands::Commands;
use lwm2m_conformance::common::{config::Config, logging};
use lwm2m_conformance::{cli, commands};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "lwm2m-conformance", about = "LwM2M conformance-test harness")]
#[command(version, long_about = None)]
struct Cli {
    /// Configuration file (default: platform config dir)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let verbose = matches!(cli.command, Commands::Run { verbose: true, .. });
    logging::init_cli(verbose);

    let result = match Config::load(cli.config.as_deref()) {
        Ok(config) => cli::dispatch(cli.command, &config).await,
        Err(e) => Err(e),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}
