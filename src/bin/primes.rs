//! primes - demo prime-testing service
//!
//! Answers `FirstDivisor`, `Iterate` and `Test` requests from registered
//! callbacks. Launched like any container: `primes HOST PORT PROCESS_ID URL_STUB [SECURE]`,
//! or with `--stdio` to serve events on stdin/stdout.

use anyhow::{Context, Result};
use clap::Parser;
use std::io::{self, BufWriter};
use std::path::PathBuf;
use svclink::service::{ContainerArgs, Service, websocket};
use svclink::util::logging::{self, LogTarget};
use svclink::{Adapter, AdapterConfig, demo};
use tracing::Level;

#[derive(Parser)]
#[command(name = "primes")]
#[command(about = "Prime-testing demo service", long_about = None)]
struct Cli {
    /// Serve on stdin/stdout instead of connecting
    #[arg(long)]
    stdio: bool,

    /// Write logs to a timestamped file in this directory instead of stderr
    #[arg(long)]
    log_dir: Option<PathBuf>,

    /// Container launch arguments
    #[arg(num_args = 4..=6, required_unless_present = "stdio")]
    args: Vec<String>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let target = match cli.log_dir {
        Some(dir) => LogTarget::Directory(dir),
        None => LogTarget::Stderr,
    };
    logging::init(&target, Level::DEBUG)?;

    let mut adapter = Adapter::new(AdapterConfig::default());
    adapter.on_request(demo::handle_request);
    let mut service = Service::new(adapter);

    if cli.stdio {
        let stdin = io::stdin();
        let stdout = io::stdout();
        service.handle(stdin.lock(), BufWriter::new(stdout.lock()))?;
        return Ok(());
    }

    let container = ContainerArgs::parse(&cli.args)?;
    let connection = websocket::connect(&container.endpoint)
        .with_context(|| format!("Failed to connect to {}", container.endpoint.url()))?;
    service.serve(connection)?;
    Ok(())
}
