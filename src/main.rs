mod backends;
mod classifier;
mod config;
mod generation;
mod inventory;
mod meter;
mod monitor;
mod refresh;
mod report;
mod resolver;
mod traffic;

use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::backends::capture::{detect_capture_backends, list_interfaces, open_live};
use crate::backends::process::{detect_introspectors, select_introspector};
use crate::config::{
    DEFAULT_DEVICE, DEFAULT_REFRESH_SECS, DEFAULT_REPORT_SECS, MonitorConfig, ReportFormat,
};
use crate::monitor::Monitor;

/// proctap - bandwidth of one process tree, from packet capture and /proc
#[derive(Parser, Debug)]
#[command(name = "proctap")]
#[command(version)]
#[command(about = "Attribute live traffic to a process and its children", long_about = None)]
struct Args {
    /// Network interface to capture on
    #[arg(short = 'd', long = "dev", value_name = "IFACE", default_value = DEFAULT_DEVICE)]
    device: String,

    /// Root process id of the monitored tree
    #[arg(short = 'p', long, value_name = "PID", default_value_t = 0)]
    pid: i32,

    /// Seconds between socket inventory refreshes
    #[arg(long, value_name = "SECONDS", default_value_t = DEFAULT_REFRESH_SECS)]
    refresh_interval: u64,

    /// Seconds between report lines
    #[arg(long, value_name = "SECONDS", default_value_t = DEFAULT_REPORT_SECS)]
    report_interval: u64,

    /// Report line format
    #[arg(long, value_enum, default_value_t = ReportFormat::Text)]
    format: ReportFormat,

    /// Capture backend to use instead of the best available one
    #[arg(long, value_name = "BACKEND")]
    capture_backend: Option<String>,

    /// List network interfaces with their addresses and exit
    #[arg(long)]
    list_interfaces: bool,

    /// List all available backends and exit
    #[arg(long)]
    list_backends: bool,
}

impl Args {
    fn monitor_config(&self) -> Result<MonitorConfig> {
        let config = MonitorConfig {
            device: self.device.clone(),
            root_pid: self.pid,
            refresh_secs: self.refresh_interval,
            report_secs: self.report_interval,
            format: self.format,
        };
        config.validate()?;
        Ok(config)
    }
}

fn print_interfaces() {
    println!("Network Interfaces:");
    let interfaces = list_interfaces();
    if interfaces.is_empty() {
        println!("  (none found)");
        return;
    }

    for iface in interfaces {
        let state = if iface.is_up { "up" } else { "down" };
        let kind = if iface.is_loopback { " loopback" } else { "" };
        println!("  {:16} [{}{}] {}", iface.name, state, kind, iface.local);
    }
}

fn print_available_backends() {
    println!("proctap v{} - Available Backends\n", env!("CARGO_PKG_VERSION"));

    println!("Capture Backends:");
    let capture = detect_capture_backends();
    if capture.is_empty() {
        println!("  (none compiled in)");
    }
    for backend in capture {
        let status = if backend.available { "available" } else { "unavailable" };
        println!(
            "  {:20} [priority: {:?}] {}",
            backend.name, backend.priority, status
        );
    }

    println!();

    println!("Process Introspection Backends:");
    let introspectors = detect_introspectors();
    if introspectors.is_empty() {
        println!("  (none compiled in)");
    }
    for backend in introspectors {
        let status = if backend.available { "available" } else { "unavailable" };
        println!(
            "  {:20} [priority: {:?}] {}",
            backend.name, backend.priority, status
        );
    }
}

#[cfg(target_os = "linux")]
fn warn_if_unprivileged() {
    if !nix::unistd::Uid::effective().is_root() {
        log::warn!(
            "Not running as root: capture and other users' /proc entries may be unreadable"
        );
    }
}

#[cfg(not(target_os = "linux"))]
fn warn_if_unprivileged() {}

#[tokio::main]
async fn main() -> Result<()> {
    pretty_env_logger::formatted_builder()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .init();

    let args = Args::parse();

    if args.list_interfaces {
        print_interfaces();
        return Ok(());
    }
    if args.list_backends {
        print_available_backends();
        return Ok(());
    }

    let config = args.monitor_config()?;
    log::info!(
        "Configuration: {}",
        serde_json::to_string(&config).context("Failed to serialize configuration")?
    );
    warn_if_unprivileged();

    let introspector = select_introspector(None)?;
    log::info!(
        "Process introspection: {} (priority {:?})",
        introspector.name(),
        introspector.priority()
    );
    let monitor = Monitor::new(config.clone(), Arc::from(introspector));

    let token = CancellationToken::new();
    let signal_token = token.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                log::info!("Received Ctrl-C");
                signal_token.cancel();
            }
            Err(e) => log::error!("Failed to listen for Ctrl-C: {}", e),
        }
    });

    let device = config.device;
    let preference = args.capture_backend;
    monitor
        .run(
            move || open_live(&device, preference.as_deref()),
            token,
        )
        .await
}
