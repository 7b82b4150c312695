//! QMK backlight driver CLI
//!
//! Registers the RGB matrix of every QMK keyboard with VIA raw HID as a
//! multi-color light and drives it from the command line.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;

use qmk_backlight::DriverConfig;
use qmk_transport::{DeviceBus, HidBus, TransportConfig};

mod cli;
use cli::{Cli, Commands};

mod commands;

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose)?;

    let bus: Arc<dyn DeviceBus> = Arc::new(HidBus::new().context("Failed to initialize HID API")?);
    let transport = TransportConfig {
        read_timeout: Duration::from_millis(cli.read_timeout),
        read_mode: cli.read_mode(),
    };

    match cli.command {
        Commands::Scan => commands::scan(bus, transport),
        Commands::Set { color, name } => commands::set(bus, transport, color, name.as_deref()),
        Commands::Watch {
            color,
            feed,
            poll_interval,
        } => {
            let config = DriverConfig {
                transport,
                poll_interval: Duration::from_millis(poll_interval),
                feed: feed.into(),
            };
            commands::watch(bus, config, color)
        }
    }
}

fn init_logging(verbose: bool) -> Result<()> {
    let default = if verbose {
        "qmk_backlight=debug,qmk_backlightd=debug,qmk_keyboard=debug,qmk_transport=debug"
    } else {
        "qmk_backlight=info,qmk_backlightd=info,qmk_keyboard=info,qmk_transport=warn"
    };
    let mut filter = tracing_subscriber::EnvFilter::from_default_env();
    for directive in default.split(',') {
        filter = filter.add_directive(directive.parse().context("Invalid log directive")?);
    }
    tracing_subscriber::fmt().with_env_filter(filter).init();
    Ok(())
}
