// src/main.rs - Command line host running G-code against the virtual HAL
use clap::Parser;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::prelude::*;
use tracing_subscriber::reload;

use octocnc::config::{self, Config};
use octocnc::hardware::VirtualHal;
use octocnc::machine::Machine;

#[derive(Debug, Parser)]
#[command(name = "octocnc", version, about = "Eight axis motion controller")]
struct Args {
    /// TOML machine configuration; built-in defaults when omitted
    #[arg(short, long)]
    config: Option<String>,

    /// G-code file to run; standard input when omitted
    #[arg(short, long)]
    file: Option<String>,

    /// Log at debug level from the start
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync + 'static>> {
    let args = Args::parse();

    let initial = if args.verbose { LevelFilter::DEBUG } else { LevelFilter::INFO };
    let (filter, reload_handle) = reload::Layer::new(initial);
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting octocnc {}", env!("CARGO_PKG_VERSION"));

    let config = match &args.config {
        Some(path) => {
            tracing::info!("Loading configuration from: {}", path);
            config::load_config(path).map_err(|e| {
                tracing::error!("Failed to load config from '{}': {}", path, e);
                Box::new(e) as Box<dyn std::error::Error + Send + Sync + 'static>
            })?
        }
        None => Config::default(),
    };
    if let Some(name) = &config.machine.name {
        tracing::info!("Machine: {}", name);
    }

    let hal = Arc::new(VirtualHal::from_config(&config));
    let mut machine = Machine::new(config, hal).await?;
    machine.set_debug_hook(Box::new(move || {
        match reload_handle.modify(|level| *level = LevelFilter::DEBUG) {
            Ok(()) => tracing::debug!("Debug output enabled"),
            Err(e) => tracing::warn!("Failed to raise log level: {}", e),
        }
    }));

    let input: Box<dyn tokio::io::AsyncRead + Unpin + Send> = match &args.file {
        Some(path) => Box::new(tokio::fs::File::open(path).await?),
        None => Box::new(tokio::io::stdin()),
    };
    let mut lines = BufReader::new(input).lines();
    while let Some(line) = lines.next_line().await? {
        match machine.process_line(&line).await {
            Ok(Some(answer)) => println!("{}", answer),
            Ok(None) => println!("ok"),
            Err(e) => println!("error: {}", e),
        }
    }

    machine.release().await?;
    tracing::info!("Machine released");
    Ok(())
}
