//! Logging and tracing configuration
//!
//! Harness diagnostics go through `tracing`. The raw output of each driven
//! process is kept apart in per-session transcripts (see `session`).

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize tracing for the CLI (stderr logging)
///
/// Logs are controlled by the `RUST_LOG` environment variable.
/// Default level is INFO for this crate, WARN for dependencies.
/// `verbose` raises the crate default to DEBUG so every send and match is shown.
pub fn init_cli(verbose: bool) {
    let default = if verbose {
        "lwm2m_conformance=debug,warn"
    } else {
        "lwm2m_conformance=info,warn"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(true)
                .with_thread_ids(false)
                .with_file(false)
                .with_line_number(false)
                .compact(),
        )
        .init();
}
