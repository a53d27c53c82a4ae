//! svclinkd - service adapter daemon
//!
//! Serves NDJSON events over stdio or a TCP listener, or connects to the
//! platform's WebSocket endpoint described by container launch arguments.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::io::{self, BufReader, BufWriter};
use std::net::TcpListener;
use std::path::PathBuf;
use svclink::config::{self, AdapterConfig};
use svclink::service::{ContainerArgs, Service, websocket};
use svclink::util::logging::{self, LogTarget};
use svclink::Adapter;
use tracing::{Level, error, info};

#[derive(Parser)]
#[command(name = "svclinkd")]
#[command(about = "Metadata-driven event adapter for orchestrated services", long_about = None)]
struct Cli {
    /// JSON configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Root directory for script work areas
    #[arg(long)]
    env_root: Option<PathBuf>,

    /// Python module answering internal events
    #[arg(long)]
    internal_script: Option<PathBuf>,

    /// Write logs to a timestamped file in this directory instead of stderr
    #[arg(long)]
    log_dir: Option<PathBuf>,

    /// Default log level
    #[arg(long, default_value = "info")]
    log_level: Level,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve events on stdin/stdout, or on a TCP listener
    Serve {
        /// Listen on ADDR instead of stdio
        #[arg(long)]
        listen: Option<String>,
    },

    /// Connect to the platform: HOST PORT PROCESS_ID URL_STUB [SECURE [ENV_ROOT]]
    Connect {
        /// Container launch arguments
        #[arg(num_args = 4..=6, required = true)]
        args: Vec<String>,
    },

    /// Write the effective configuration to a file
    WriteConfig {
        /// Destination path
        path: PathBuf,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => config::load_config(path)?,
        None => AdapterConfig::default(),
    };
    if let Some(env_root) = cli.env_root {
        config.env_root = env_root;
    }
    if let Some(script) = cli.internal_script {
        config.internal_script = Some(script);
    }

    let level = if config.debug { Level::DEBUG } else { cli.log_level };
    let target = match cli.log_dir {
        Some(dir) => LogTarget::Directory(dir),
        None => LogTarget::Stderr,
    };

    match cli.command {
        Commands::WriteConfig { path } => {
            config::write_config(&path, &config)?;
            println!("Wrote configuration to {:?}", path);
            Ok(())
        }
        Commands::Serve { listen } => {
            start_logging(&target, level)?;
            let service = Service::new(Adapter::new(config));
            match listen {
                Some(addr) => run_tcp(service, &addr),
                None => run_stdio(service),
            }
        }
        Commands::Connect { args } => {
            start_logging(&target, level)?;
            let container = ContainerArgs::parse(&args)?;
            if let Some(env_root) = container.env_root {
                config.env_root = env_root;
            }
            let connection = websocket::connect(&container.endpoint)
                .with_context(|| format!("Failed to connect to {}", container.endpoint.url()))?;
            let mut service = Service::new(Adapter::new(config));
            service.serve(connection)?;
            Ok(())
        }
    }
}

fn start_logging(target: &LogTarget, level: Level) -> Result<()> {
    if let Some(path) = logging::init(target, level)? {
        eprintln!("svclinkd logging to {:?}", path);
    }
    Ok(())
}

fn run_stdio(mut service: Service) -> Result<()> {
    let stdin = io::stdin();
    let stdout = io::stdout();
    let reader = stdin.lock();
    let writer = BufWriter::new(stdout.lock());

    service.handle(reader, writer)?;
    Ok(())
}

fn run_tcp(mut service: Service, addr: &str) -> Result<()> {
    let listener =
        TcpListener::bind(addr).with_context(|| format!("Failed to listen on {addr}"))?;
    info!(addr = %listener.local_addr()?, "svclinkd listening");

    for incoming in listener.incoming() {
        match incoming {
            Ok(stream) => {
                let peer = stream.peer_addr().ok();
                let reader = BufReader::new(stream.try_clone()?);
                let writer = BufWriter::new(stream);
                if let Err(err) = service.handle(reader, writer) {
                    error!(?peer, %err, "connection error");
                }
            }
            Err(err) => {
                error!(%err, "failed to accept connection");
            }
        }
    }

    Ok(())
}
