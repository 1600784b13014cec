//! PRiME logger sink.
//!
//! Binds the logger endpoint and prints one JSON object per received
//! datagram to stdout. Diagnostics go to stderr.
//!
//! ```bash
//! # Default Unix socket under /tmp
//! prime-logger
//!
//! # Listen for remote roles on UDP
//! prime-logger --address 0.0.0.0 --port 9000
//! ```

use std::io::{self, Write};
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use prime_api::{InterfaceConfig, LoggerSink};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Print every PRiME logger datagram as a JSON line
#[derive(Parser, Debug)]
#[command(name = "prime-logger", version, about)]
struct Args {
    /// TOML file with channel addresses
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Directory for default socket files
    #[arg(long)]
    socket_dir: Option<PathBuf>,

    /// Listen on UDP at this address
    #[arg(long)]
    address: Option<String>,

    /// Listen on this UDP port
    #[arg(long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_env_filter(EnvFilter::from_default_env().add_directive("prime_logger=info".parse()?))
        .init();

    let args = Args::parse();
    let mut config = match &args.config {
        Some(path) => InterfaceConfig::load(path)?,
        None => InterfaceConfig::default(),
    };
    if let Some(dir) = args
        .socket_dir
        .or_else(|| std::env::var_os("PRIME_SOCKET_DIR").map(PathBuf::from))
    {
        config.socket_dir = dir;
    }
    config.apply_logger_flags(false, args.address, args.port);

    let mut sink = LoggerSink::bind(&config).context("Failed to bind logger endpoint")?;
    info!(endpoint = ?sink.local_addr(), "Logger listening");

    let stdout = io::stdout();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
            record = sink.next() => {
                let Some(record) = record else { break };
                let line = record.to_json().to_string();
                let mut out = stdout.lock();
                if let Err(e) = writeln!(out, "{line}").and_then(|()| out.flush()) {
                    warn!(error = %e, "stdout closed");
                    break;
                }
            }
        }
    }

    sink.close();
    Ok(())
}
