//! FleetBridge - MQTT to SQS telemetry bridge
//!
//! Usage:
//!   fleetbridge [OPTIONS]
//!
//! Options:
//!   -c, --config <FILE>     Configuration file path
//!   -H, --host <HOST>       Broker hostname (default: localhost)
//!   -p, --port <PORT>       Broker port (default: 1883)
//!   --queue-url <URL>       Queue URL messages are sent to
//!   --endpoint <URL>        Queue endpoint override (local emulators)
//!   -l, --log-level         Log level (error, warn, info, debug, trace)
//!   -h, --help              Print help

use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

use fleetbridge::bridge::Bridge;
use fleetbridge::config::Config;

/// Log level for CLI
#[derive(Debug, Clone, Copy, ValueEnum, Default)]
enum LogLevel {
    /// Only errors
    Error,
    /// Warnings and errors
    Warn,
    /// Informational messages
    #[default]
    Info,
    /// Debug messages
    Debug,
    /// Trace messages (very verbose)
    Trace,
}

impl LogLevel {
    fn to_tracing_level(self) -> Level {
        match self {
            LogLevel::Error => Level::ERROR,
            LogLevel::Warn => Level::WARN,
            LogLevel::Info => Level::INFO,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Trace => Level::TRACE,
        }
    }
}

/// FleetBridge - MQTT to SQS telemetry bridge
#[derive(Parser, Debug)]
#[command(name = "fleetbridge")]
#[command(version = "0.1.0")]
#[command(about = "Forwards MQTT sensor telemetry to an SQS-compatible queue")]
struct Args {
    /// Configuration file path (TOML format)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Broker hostname
    #[arg(short = 'H', long)]
    host: Option<String>,

    /// Broker port
    #[arg(short, long)]
    port: Option<u16>,

    /// Queue URL messages are sent to
    #[arg(long)]
    queue_url: Option<String>,

    /// Queue endpoint override (local emulators)
    #[arg(long)]
    endpoint: Option<String>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(short, long, value_enum)]
    log_level: Option<LogLevel>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Load configuration file if specified, otherwise env vars and defaults
    let load_result = match &args.config {
        Some(path) => Config::load(path),
        None => Config::from_env(),
    };
    let mut config = match load_result {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Error loading configuration: {}", e);
            std::process::exit(1);
        }
    };

    // CLI args override file config
    if let Some(host) = args.host {
        config.broker.host = host;
    }
    if let Some(port) = args.port {
        config.broker.port = port;
    }
    if let Some(url) = args.queue_url {
        config.queue.url = url;
    }
    if let Some(endpoint) = args.endpoint {
        config.queue.endpoint = Some(endpoint);
    }

    // Setup logging - CLI overrides config, config overrides default (info)
    let log_level = args.log_level.unwrap_or_else(|| {
        match config.log.level.to_lowercase().as_str() {
            "error" => LogLevel::Error,
            "warn" => LogLevel::Warn,
            "info" => LogLevel::Info,
            "debug" => LogLevel::Debug,
            "trace" => LogLevel::Trace,
            _ => LogLevel::Info,
        }
    });

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level.to_tracing_level())
        .with_target(false)
        .with_thread_ids(true)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    if let Some(path) = &args.config {
        info!("Loaded configuration from {:?}", path);
    }

    info!("Starting FleetBridge");
    info!("  Broker: {}", config.broker.address());
    info!("  Topics: {}", config.broker.topics.join(", "));
    info!("  Queue URL: {}", config.queue.url);
    if let Some(endpoint) = &config.queue.endpoint {
        info!("  Queue endpoint: {}", endpoint);
    }
    info!("  Region: {}", config.queue.region);
    info!(
        "  Max payload size: {} bytes",
        config.limits.max_payload_size
    );

    let mut bridge = match Bridge::new(config) {
        Ok(bridge) => bridge,
        Err(e) => {
            error!("Failed to initialize queue client: {}", e);
            std::process::exit(1);
        }
    };

    // A broker that is down or rejecting us is fatal at startup
    if let Err(e) = bridge.connect().await {
        error!("Failed to connect to broker: {}", e);
        std::process::exit(1);
    }

    // Run until Ctrl+C
    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for shutdown signal: {}", e);
            std::future::pending::<()>().await;
        }
    };

    bridge.run(shutdown).await?;

    info!("FleetBridge stopped");
    Ok(())
}
