//! M300 GW - Lexicon M300 gateway
//!
//! Keeps a live mirror of an M300's state over MIDI SysEx and relays it to
//! WebSocket clients.

use anyhow::Result;
use clap::Parser;
use std::path::Path;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use m300_gw::api::{self, ApiState};
use m300_gw::config::AppConfig;
use m300_gw::engine::{EngineHandle, EngineOptions, ProtocolEngine};
use m300_gw::sniffer;
use m300_gw::state::{DeviceState, PersistenceActor, PersistenceActorHandle};
use m300_gw::transport::MidirTransport;

/// M300 Gateway - SysEx state sync and WebSocket relay for the Lexicon M300
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.yaml")]
    config: String,

    /// Log level (error, warn, info, debug, trace)
    #[arg(short, long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// List available MIDI ports
    #[arg(long)]
    list_ports: bool,

    /// Print inbound traffic from the first input port matching PATTERN
    #[arg(long, value_name = "PATTERN")]
    sniff: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let args = Args::parse();

    init_logging(&args.log_level)?;

    if args.list_ports {
        sniffer::list_ports_formatted()?;
        return Ok(());
    }

    if let Some(pattern) = &args.sniff {
        sniffer::run_sniffer(pattern).await?;
        return Ok(());
    }

    info!("Starting M300 GW...");
    info!("Configuration file: {}", args.config);

    let config = AppConfig::load_or_default(&args.config).await?;

    let mut state = DeviceState::new();
    if Path::new(&config.presets.file).exists() {
        match state.load_snapshot(&config.presets.file).await {
            Ok(count) => info!("Loaded {} presets from {}", count, config.presets.file),
            Err(e) => warn!("Ignoring preset file {}: {:#}", config.presets.file, e),
        }
    }

    let persistence = PersistenceActor::spawn(&config.presets.file, config.presets.debounce_ms);

    let engine = ProtocolEngine::spawn(
        MidirTransport::default(),
        state,
        EngineOptions::from_config(&config),
        Some(persistence.clone()),
    );

    // The relay stays up without a device; reconnects are driven by the engine
    match engine.connect(None, None).await {
        Ok(ports) => info!("Connected to {} / {}", ports.input, ports.output),
        Err(e) => error!("MIDI connection failed: {}", e),
    }

    run_app(engine, persistence, &config, shutdown_signal()).await?;

    info!("M300 GW shutdown complete");
    Ok(())
}

async fn run_app(
    engine: EngineHandle,
    persistence: PersistenceActorHandle,
    config: &AppConfig,
    shutdown: impl std::future::Future<Output = ()>,
) -> Result<()> {
    let api_state = Arc::new(ApiState {
        engine: engine.clone(),
    });

    let server = api::start_server(api_state, &config.server.host, config.server.port);

    let result = tokio::select! {
        result = server => result,
        _ = shutdown => Ok(()),
    };

    info!("Stopping engine...");
    engine.shutdown().await;

    if let Err(e) = persistence.flush().await {
        warn!("Final preset save failed: {:#}", e);
    }
    persistence.shutdown();

    result
}

fn init_logging(level: &str) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_thread_ids(false)
                .with_thread_names(false),
        )
        .init();

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for Ctrl+C: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
