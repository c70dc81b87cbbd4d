//! sngate - MQTT-SN gateway
//!
//! Usage:
//!   sngate [OPTIONS]
//!
//! Options:
//!   -c, --config <FILE>    Configuration file path
//!   -b, --bind <ADDR>      Sensor-network bind address
//!   --broker <HOST:PORT>   MQTT broker address
//!   -l, --log-level        Log level (error, warn, info, debug, trace)
//!   -h, --help             Print help

use std::net::SocketAddrV4;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use sngate::config::Config;
use sngate::gateway::Gateway;
use sngate::transport::UdpSensorNetwork;

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

/// sngate - MQTT-SN gateway
#[derive(Parser, Debug)]
#[command(name = "sngate")]
#[command(author = "sngate Contributors")]
#[command(version = "0.1.0")]
#[command(about = "MQTT-SN transparent/aggregating gateway to an MQTT broker")]
struct Args {
    /// Configuration file path (TOML format)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Sensor-network bind address
    #[arg(short, long)]
    bind: Option<SocketAddrV4>,

    /// MQTT broker host
    #[arg(long)]
    broker_host: Option<String>,

    /// MQTT broker port
    #[arg(long)]
    broker_port: Option<u16>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(short, long, value_enum)]
    log_level: Option<LogLevel>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Load configuration file if specified, otherwise use env vars +
    // defaults.
    let mut config = if let Some(config_path) = &args.config {
        match Config::load(config_path) {
            Ok(cfg) => cfg,
            Err(e) => {
                eprintln!("Error loading config file: {}", e);
                std::process::exit(1);
            }
        }
    } else {
        Config::from_env().unwrap_or_default()
    };

    // Setup logging - CLI overrides config, config overrides default.
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

    // CLI args override file config.
    if let Some(bind) = args.bind {
        config.sensor.bind = bind;
    }
    if let Some(host) = args.broker_host {
        config.broker.host = host;
    }
    if let Some(port) = args.broker_port {
        config.broker.port = port;
    }

    let sensor = Arc::new(
        UdpSensorNetwork::bind(config.sensor.bind, config.sensor.multicast_group).await?,
    );
    info!(
        "sensor network on {}, broker at {}",
        config.sensor.bind,
        config.broker.address()
    );

    let gateway = Gateway::new(&config)?;
    let shutdown = gateway.shutdown_handle();

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown requested");
            shutdown.shutdown();
        }
    });

    gateway.run(sensor).await;
    Ok(())
}
