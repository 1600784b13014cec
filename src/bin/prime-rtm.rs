//! PRiME runtime manager daemon.
//!
//! Accepts App registrations, gives each App a dedicated channel, optionally
//! attaches to the platform's Device and reports to the UI and logger.
//!
//! # Usage
//!
//! ```bash
//! # Foreground, with a Device
//! prime-rtm start
//!
//! # Background, Apps only
//! prime-rtm start -d --no-device
//!
//! # Ship logs to a remote logger
//! prime-rtm --logger-address 10.0.0.5 --logger-port 9000 start
//!
//! prime-rtm status
//! prime-rtm stop
//!
//! # Debug logging
//! RUST_LOG=prime_rtm=debug prime-rtm start
//! ```
//!
//! # Signal Handling
//!
//! - SIGTERM/SIGINT or `PRIME_UI_RTM_STOP`: graceful shutdown

use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::PathBuf;
use std::process;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use prime_api::InterfaceConfig;
use prime_core::{of_type, Cont, DeviceKnobType, DeviceMonitorType, Disc};
use prime_rtm::{
    spawn_app_registry, AppEvent, AppRegistryHandle, RtmDeviceInterface, RtmUiCommand,
    RtmUiInterface,
};
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

/// PRiME runtime manager
#[derive(Parser, Debug)]
#[command(name = "prime-rtm", version, about)]
struct Args {
    /// TOML file with channel addresses and timings
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Directory for default socket files
    #[arg(long, global = true)]
    socket_dir: Option<PathBuf>,

    /// Do not mirror traffic to the logger
    #[arg(long, global = true)]
    logger_off: bool,

    /// Send logger traffic to this host over UDP
    #[arg(long, global = true)]
    logger_address: Option<String>,

    /// Send logger traffic to this UDP port
    #[arg(long, global = true)]
    logger_port: Option<u16>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the runtime manager
    Start {
        /// Run as a background daemon (fork to background)
        #[arg(short = 'd', long)]
        daemon: bool,

        /// Manage Apps only; do not contact a Device
        #[arg(long)]
        no_device: bool,
    },
    /// Stop the running runtime manager
    Stop,
    /// Show whether the runtime manager is running
    Status,
}

impl Args {
    fn interface_config(&self) -> Result<InterfaceConfig> {
        let mut config = match &self.config {
            Some(path) => InterfaceConfig::load(path)?,
            None => InterfaceConfig::default(),
        };
        if let Some(dir) = self.socket_dir.clone().or_else(socket_dir_from_env) {
            config.socket_dir = dir;
        }
        config.apply_logger_flags(
            self.logger_off,
            self.logger_address.clone(),
            self.logger_port,
        );
        Ok(config)
    }
}

/// `PRIME_SOCKET_DIR`, used when `--socket-dir` is absent.
fn socket_dir_from_env() -> Option<PathBuf> {
    std::env::var_os("PRIME_SOCKET_DIR").map(PathBuf::from)
}

// ============================================================================
// PID File
// ============================================================================

fn state_dir() -> PathBuf {
    dirs::state_dir()
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join("prime")
}

fn pid_file_path() -> PathBuf {
    state_dir().join("prime-rtm.pid")
}

fn log_file_path() -> PathBuf {
    state_dir().join("prime-rtm.log")
}

fn read_pid() -> Option<u32> {
    let mut file = File::open(pid_file_path()).ok()?;
    let mut contents = String::new();
    file.read_to_string(&mut contents).ok()?;
    contents.trim().parse().ok()
}

fn write_pid() -> Result<()> {
    let path = pid_file_path();
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).context("Failed to create state directory")?;
    }
    let mut file = File::create(&path).context("Failed to create PID file")?;
    write!(file, "{}", process::id()).context("Failed to write PID")?;
    Ok(())
}

fn remove_pid_file() {
    let _ = fs::remove_file(pid_file_path());
}

fn is_process_running(pid: u32) -> bool {
    PathBuf::from(format!("/proc/{pid}")).exists()
}

/// PID of a live runtime manager. Removes a stale PID file.
fn running_pid() -> Option<u32> {
    let pid = read_pid()?;
    if is_process_running(pid) {
        return Some(pid);
    }
    remove_pid_file();
    None
}

fn stop_process(pid: u32) -> Result<()> {
    let Ok(raw) = i32::try_from(pid) else {
        bail!("Invalid PID {pid}");
    };
    // SAFETY: kill(2) has no memory-safety preconditions
    let result = unsafe { libc::kill(raw, libc::SIGTERM) };
    if result != 0 {
        bail!("Failed to send SIGTERM to process {pid}");
    }
    Ok(())
}

// ============================================================================
// Entry Point
// ============================================================================

fn main() -> Result<()> {
    let args = Args::parse();
    let config = args.interface_config()?;
    let command = args.command.unwrap_or(Command::Start {
        daemon: false,
        no_device: false,
    });

    match command {
        Command::Start { daemon, no_device } => {
            if let Some(pid) = running_pid() {
                eprintln!("Runtime manager is already running (PID {pid})");
                eprintln!("Use 'prime-rtm stop' to stop it first.");
                process::exit(1);
            }

            if daemon {
                // Must happen before the tokio runtime starts
                daemonize()?;
            }

            write_pid()?;
            let result = run(config, !no_device);
            remove_pid_file();
            result
        }
        Command::Stop => match running_pid() {
            Some(pid) => {
                println!("Stopping runtime manager (PID {pid})...");
                stop_process(pid)?;
                for _ in 0..50 {
                    if !is_process_running(pid) {
                        println!("Runtime manager stopped.");
                        return Ok(());
                    }
                    std::thread::sleep(std::time::Duration::from_millis(100));
                }
                eprintln!("Runtime manager did not stop within 5 seconds.");
                process::exit(1);
            }
            None => {
                println!("Runtime manager is not running.");
                Ok(())
            }
        },
        Command::Status => match running_pid() {
            Some(pid) => {
                println!("Runtime manager is running (PID {pid})");
                println!("Sockets: {}", config.socket_dir.display());
                Ok(())
            }
            None => {
                println!("Runtime manager is not running.");
                process::exit(1);
            }
        },
    }
}

fn daemonize() -> Result<()> {
    use daemonize::Daemonize;

    let log_path = log_file_path();
    if let Some(parent) = log_path.parent() {
        fs::create_dir_all(parent).context("Failed to create log directory")?;
    }
    let stdout = File::create(&log_path).context("Failed to create log file for stdout")?;
    let stderr = stdout
        .try_clone()
        .context("Failed to create log file for stderr")?;

    Daemonize::new()
        .working_directory("/")
        .stdout(stdout)
        .stderr(stderr)
        .start()
        .context("Failed to daemonize")?;
    Ok(())
}

#[tokio::main]
async fn run(config: InterfaceConfig, with_device: bool) -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("prime_rtm=info".parse()?)
                .add_directive("prime_api=info".parse()?),
        )
        .init();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        pid = process::id(),
        socket_dir = %config.socket_dir.display(),
        logger = config.logger_enabled,
        "Runtime manager starting"
    );

    let cancel = CancellationToken::new();
    let shutdown = cancel.clone();
    tokio::spawn(async move {
        if let Err(e) = wait_for_shutdown_signal().await {
            error!(error = %e, "Error waiting for shutdown signal");
        }
        shutdown.cancel();
    });

    let registry = spawn_app_registry(&config)?;
    let (ui, mut ui_commands) = RtmUiInterface::new(&config)?;
    ui.return_rtm_start();

    let device = if with_device {
        let device = RtmDeviceInterface::new(&config)?;
        if let Err(e) = survey_device(&device).await {
            warn!(error = %e, "Device survey failed");
            ui.rtm_error(format!("Device survey failed: {e}"));
        }
        Some(device)
    } else {
        None
    };

    let mut events = registry.subscribe();
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,

            event = events.recv() => match event {
                Ok(event) => log_event(&event),
                Err(RecvError::Lagged(n)) => warn!(skipped = n, "Event log fell behind"),
                Err(RecvError::Closed) => break,
            },

            command = ui_commands.recv() => match command {
                Some(RtmUiCommand::Stop) => {
                    info!("Stop requested by UI");
                    break;
                }
                Some(RtmUiCommand::AppWeight { proc_id, weight }) => {
                    apply_weight(&registry, proc_id, weight).await;
                }
                None => debug!("UI command stream closed"),
            },
        }
    }

    ui.return_rtm_stop();
    registry.shutdown();
    if let Some(device) = device {
        device.shutdown();
    }
    info!("Runtime manager stopped");
    Ok(())
}

/// Fetches the Device's architecture and tables and logs what it offers.
async fn survey_device(device: &RtmDeviceInterface) -> Result<()> {
    let arch = device.dev_arch_get().await?;
    info!(descriptor = %arch.descriptor, units = arch.functional_units.len(), "Device architecture loaded");

    let disc_knobs = device.knob_reg::<Disc>().await?;
    let cont_knobs = device.knob_reg::<Cont>().await?;
    let disc_mons = device.mon_reg::<Disc>().await?;
    let cont_mons = device.mon_reg::<Cont>().await?;

    for fu in &arch.functional_units {
        info!(
            unit = %fu.name,
            knobs = arch.entries_in_functional_unit(&disc_knobs, fu.id).len()
                + arch.entries_in_functional_unit(&cont_knobs, fu.id).len(),
            monitors = arch.entries_in_functional_unit(&disc_mons, fu.id).len()
                + arch.entries_in_functional_unit(&cont_mons, fu.id).len(),
            "Device unit"
        );
    }
    info!(
        frequency_knobs = of_type(&disc_knobs, DeviceKnobType::Frequency).len(),
        power_monitors = of_type(&cont_mons, DeviceMonitorType::Power).len(),
        "Device tables fetched"
    );
    Ok(())
}

async fn apply_weight(registry: &AppRegistryHandle, pid: u32, weight: f32) {
    match registry.set_app_weight(pid, weight).await {
        Ok(()) => info!(pid, weight, "App weight updated"),
        Err(e) => warn!(pid, error = %e, "Cannot apply App weight"),
    }
}

fn log_event(event: &AppEvent) {
    match event {
        AppEvent::AppRegistered { pid, ur_id } => info!(pid, ur_id, "App registered"),
        AppEvent::AppDeregistered { pid, reason } => info!(pid, %reason, "App deregistered"),
        AppEvent::AddressMismatch { claimed_pid, from } => {
            warn!(claimed_pid, from = ?from, "Rejected App registration")
        }
        AppEvent::KnobRegistered(knob) => {
            info!(pid = knob.proc_id, id = knob.id, knob_type = %knob.knob_type, min = %knob.min, max = %knob.max, val = %knob.val, "Knob registered")
        }
        AppEvent::KnobDeregistered { pid, id } => info!(pid, id, "Knob deregistered"),
        AppEvent::KnobChanged(knob) => {
            debug!(pid = knob.proc_id, id = knob.id, min = %knob.min, max = %knob.max, "Knob bounds changed")
        }
        AppEvent::MonitorRegistered(mon) => {
            info!(pid = mon.proc_id, id = mon.id, mon_type = %mon.mon_type, weight = mon.weight, "Monitor registered")
        }
        AppEvent::MonitorDeregistered { pid, id } => info!(pid, id, "Monitor deregistered"),
        AppEvent::MonitorChanged(mon) => {
            debug!(pid = mon.proc_id, id = mon.id, val = %mon.val, min = %mon.min, max = %mon.max, weight = mon.weight, "Monitor changed")
        }
    }
}

/// Waits for SIGTERM or SIGINT.
async fn wait_for_shutdown_signal() -> Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    tokio::select! {
        _ = sigterm.recv() => info!("Received SIGTERM"),
        _ = sigint.recv() => info!("Received SIGINT"),
    }
    Ok(())
}
