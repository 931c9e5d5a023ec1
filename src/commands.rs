//! CLI command definitions
//!
//! Defines the clap commands for the conformance harness.

use clap::Subcommand;
use std::path::PathBuf;

#[derive(Subcommand)]
pub enum Commands {
    /// Run YAML test scenarios against the LwM2M binaries
    Run {
        /// Scenario files to execute, in order
        #[arg(required = true)]
        scenarios: Vec<PathBuf>,

        /// Verbose output
        #[arg(long, short)]
        verbose: bool,
    },

    /// Decode the first payload in a saved transcript
    Decode {
        /// Transcript file (e.g. lwm2mserver_log.txt)
        transcript: PathBuf,

        /// Content format: auto, senml-json, lwm2m-json, tlv, text
        #[arg(long, default_value = "auto")]
        format: String,

        /// TLV resource ID to extract (required for tlv)
        #[arg(long)]
        id: Option<u16>,
    },

    /// Parse registration and update blocks in a saved transcript
    Registration {
        /// Transcript file
        transcript: PathBuf,
    },

    /// Count notifications for a path in a saved transcript
    Notifications {
        /// Transcript file
        transcript: PathBuf,

        /// Observed path (e.g. /3/0/7)
        #[arg(long)]
        path: String,

        /// Client number
        #[arg(long, default_value = "0")]
        client: u32,
    },
}
