//! Chord Daemon - Main entry point
//!
//! Serves the selection engine over REST and WebSocket, or answers a single
//! selector query from the command line.

mod api;
mod config;
mod server;
mod state;
mod transport;
mod ws;

use anyhow::Result;
use chord_core::DeviceId;
use clap::Parser;
use std::path::PathBuf;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(name = "chord")]
#[command(about = "Multi-device selection and coordination daemon")]
#[command(version)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "chord.toml")]
    config: PathBuf,

    /// Bind address for web server
    #[arg(short, long)]
    bind: Option<String>,

    /// Device spec file, overriding the configured one
    #[arg(long)]
    spec: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Print the devices matching a selector and exit
    #[arg(long, value_name = "SELECTOR")]
    select: Option<String>,

    /// Print selectors for a comma separated list of device ids and exit
    #[arg(long, value_name = "IDS")]
    suggest: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    info!("Chord v{}", env!("CARGO_PKG_VERSION"));

    let mut config = config::load_config(&args.config)?;
    if let Some(bind) = args.bind {
        config.daemon.bind = bind;
    }
    if let Some(spec) = args.spec {
        config.spec.path = Some(spec);
    }

    info!(
        spec = ?config.spec.path,
        time_range_ms = config.selection.time_range_ms,
        "Configuration loaded"
    );

    let state = state::AppState::new(config.clone())?;

    if let Some(selector) = args.select {
        let mut engine = state.engine.lock().await;
        let selection = engine.try_select(&selector)?;
        println!("{} matches {} devices:", selector, selection.size());
        for device in engine.devices_of(selection.device_ids()) {
            println!("  - {} ({}) type={}", device.name, device.id, device.class.as_str());
        }
        for problem in engine.take_diagnostics() {
            println!("  ! {}", problem);
        }
    } else if let Some(ids) = args.suggest {
        let include: Vec<DeviceId> = ids
            .split(',')
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(DeviceId::from)
            .collect();
        let engine = state.engine.lock().await;
        for suggestion in engine.suggest_selectors(&include, &[]) {
            println!("{}  ({} devices)", suggestion.selector, suggestion.matched.len());
        }
    } else {
        server::run(state, &config.daemon.bind).await?;
    }

    Ok(())
}
