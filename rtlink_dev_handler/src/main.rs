//! # rtlink device handler binary
//!
//! Creates the shared region, installs the configured devices and runs the
//! cycle loop until SIGINT/SIGTERM.
//!
//! # Usage
//!
//! ```bash
//! # Default config path
//! rtlink_dev_handler
//!
//! # Explicit config, different region name, virtual gamepad
//! rtlink_dev_handler --config dev_handler.toml --region bench -s
//!
//! # Verbose JSON logs
//! rtlink_dev_handler -v --json
//! ```

#![deny(warnings)]

use clap::Parser;
use rtlink_common::cancel::CancellationToken;
use rtlink_common::config::{ConfigLoader, LogLevel};
use rtlink_common::consts::DEFAULT_CONFIG_PATH;
use rtlink_dev_handler::{DevHandlerConfig, DeviceHandler, HandlerError, VirtualGamepad};
use rtlink_shm::{GamepadPoller, RegionHandle};
use std::path::PathBuf;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// rtlink device handler - owns the shared device table
#[derive(Parser, Debug)]
#[command(name = "rtlink_dev_handler")]
#[command(author = "RTS007")]
#[command(version)]
#[command(about = "Owns the rtlink shared device table and drives its devices")]
#[command(long_about = None)]
struct Args {
    /// Path to the handler configuration file
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Override the region name from the configuration
    #[arg(short, long)]
    region: Option<String>,

    /// Publish a synthetic gamepad pattern
    #[arg(short = 's', long)]
    simulate: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Output logs in JSON format
    #[arg(long)]
    json: bool,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    if let Err(e) = run() {
        error!("device handler failed: {}", e);
        std::process::exit(1);
    }
    Ok(())
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let mut config = DevHandlerConfig::load(&args.config)?;
    if let Some(name) = &args.region {
        config.region.name = name.clone();
    }
    setup_tracing(&args, config.shared.log_level);
    info!(
        "rtlink device handler v{} starting ({})",
        env!("CARGO_PKG_VERSION"),
        config.shared.service_name
    );

    let gamepad = config.gamepad;
    let region_config = config.region.clone();
    let mut handler = DeviceHandler::new(config)?;

    let cancel = CancellationToken::new();
    let signal = cancel.clone();
    ctrlc::set_handler(move || {
        info!("Received shutdown signal");
        signal.cancel();
    })?;

    let result = std::thread::scope(|s| {
        if args.simulate {
            // The poller maps the region on its own, like a separate process would.
            let region = RegionHandle::attach(&region_config)?;
            let cancel = cancel.clone();
            s.spawn(move || {
                let mut poller = GamepadPoller::new(VirtualGamepad::new(), &gamepad);
                if let Err(e) = poller.run(&region, &cancel) {
                    error!(error = %e, "gamepad poller stopped");
                }
            });
        }
        let result = handler.run(&cancel);
        cancel.cancel();
        Ok::<_, HandlerError>(result)
    })?;

    if let Err(e) = result {
        error!("cycle loop error: {}", e);
    }
    handler.shutdown()?;

    info!("rtlink device handler shutdown complete");
    Ok(())
}

/// Setup tracing subscriber from the configured level and CLI flags.
fn setup_tracing(args: &Args, level: LogLevel) {
    let level = if args.verbose {
        LogLevel::Debug
    } else {
        level
    };

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.as_directive()));

    if args.json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}
