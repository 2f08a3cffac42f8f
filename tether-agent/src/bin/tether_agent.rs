//! Agent binary: with no arguments, serves the wire protocol over its own
//! stdin/stdout until `Shutdown` or `SIGTERM`; with `--stop`, signals any
//! peer instances and removes its own binary.
//!
//! Never writes to stdout outside the RPC stream — logging goes to stderr
//! only.

use tracing_subscriber::EnvFilter;

fn init_logging() {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
}

#[tokio::main]
async fn main() -> std::process::ExitCode {
    init_logging();

    let mut args = std::env::args().skip(1);
    match args.next().as_deref() {
        None => run_server().await,
        Some("--stop") => stop(),
        Some(other) => {
            eprintln!("tether-agent: unrecognized argument {other:?} (expected none, or --stop)");
            std::process::ExitCode::FAILURE
        }
    }
}

async fn run_server() -> std::process::ExitCode {
    match tether_agent::serve_stdio().await {
        Ok(()) => std::process::ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "agent server exited with an error");
            std::process::ExitCode::FAILURE
        }
    }
}

fn stop() -> std::process::ExitCode {
    match tether_agent::stop_peers_and_unlink() {
        Ok(()) => std::process::ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "--stop failed");
            std::process::ExitCode::FAILURE
        }
    }
}
