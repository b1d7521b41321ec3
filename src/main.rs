mod cache;
mod config;
mod decoder;
mod error;
mod logging;
mod models;
mod parser;
mod registry;
mod storage;
mod utils;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{ArgAction, Parser};
use log::{debug, error, info, warn};
use time::OffsetDateTime;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::watch;

use cache::AggregationCache;
use config::SensorConfig;
use decoder::{DecoderCommand, Shutdown, Supervisor, DEFAULT_DECODER};
use error::AppError;
use logging::{LogContext, CONFIG_TARGET, RRD_TARGET, RX_TARGET};
use registry::ChannelRegistry;
use storage::rrd::DEFAULT_RRDTOOL;
use storage::{RrdTool, Schema};

const EXIT_FAILURE: u8 = 1;
const EXIT_INTERRUPTED: u8 = 2;

/// Record rtl_433 sensor telemetry into an RRD file
#[derive(Parser, Debug)]
#[command(name = "rtl433-rrd", version, about, long_about = None)]
struct Cli {
    /// Configuration file
    #[arg(short, long, default_value = "rtl433-rrd.ini", env = "RTL433_RRD_INI")]
    ini: PathBuf,

    /// Log file (defaults to stderr)
    #[arg(short, long)]
    log: Option<PathBuf>,

    /// Increase verbosity
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,

    /// Enable debug mode (timestamps, levels and targets in log lines)
    #[arg(short, long)]
    debug: bool,

    /// rtl_433 executable
    #[arg(long, default_value = DEFAULT_DECODER, env = "RTL433_BIN")]
    decoder: PathBuf,

    /// Extra argument passed to rtl_433 before its output options (repeatable)
    #[arg(long = "decoder-arg", value_name = "ARG", allow_hyphen_values = true)]
    decoder_args: Vec<String>,

    /// rrdtool executable
    #[arg(long, default_value = DEFAULT_RRDTOOL, env = "RRDTOOL_BIN")]
    rrdtool: String,
}

async fn run(cli: Cli, shutdown: watch::Receiver<Option<Shutdown>>) -> Result<Shutdown, AppError> {
    let config_log = LogContext::new(CONFIG_TARGET);
    let rrd_log = LogContext::new(RRD_TARGET);

    // Load configuration
    let config = SensorConfig::from_file(&cli.ini)?;
    config.log_config(config_log);
    let registry = Arc::new(ChannelRegistry::load(&config, config_log)?);
    info!(
        target: config_log.target(),
        "{} channels, protocols {:?}",
        registry.entries().len(),
        registry.protocols()
    );

    // A storage failure never stops ingestion; the next window retries
    let schema = Schema::new(registry.columns().to_vec(), config.storage.step);
    let store = RrdTool::new(cli.rrdtool, config.storage.file.clone(), schema, rrd_log);
    if let Err(e) = store.ensure_created().await {
        error!(target: rrd_log.target(), "Cannot create {}: {}", store.path().display(), e);
    }

    let window = time::Duration::seconds(i64::from(config.storage.step));
    let cache = AggregationCache::new(
        Arc::clone(&registry),
        window,
        OffsetDateTime::now_utc(),
        rrd_log,
    );

    let command = DecoderCommand::new(cli.decoder, registry.protocols())
        .with_extra_args(cli.decoder_args);
    let mut supervisor = Supervisor::new(
        command,
        registry,
        cache,
        store,
        LogContext::new(RX_TARGET),
    );

    let result = supervisor.run(shutdown).await;
    debug!(target: RX_TARGET, "Supervisor {:?}", supervisor.state());
    Ok(result?)
}

/// Publish the first SIGINT or SIGTERM on the shutdown channel
async fn listen_for_shutdown(tx: watch::Sender<Option<Shutdown>>) {
    let mut terminate = match signal(SignalKind::terminate()) {
        Ok(terminate) => Some(terminate),
        Err(e) => {
            warn!("Failed to listen for SIGTERM: {}", e);
            None
        }
    };

    let request = tokio::select! {
        result = tokio::signal::ctrl_c() => match result {
            Ok(()) => Shutdown::Interrupt,
            Err(e) => {
                error!("Failed to listen for Ctrl+C: {}", e);
                return;
            }
        },
        Some(()) = async {
            match terminate.as_mut() {
                Some(terminate) => terminate.recv().await,
                None => std::future::pending().await,
            }
        } => Shutdown::Terminate,
    };

    let _ = tx.send(Some(request));
}

#[tokio::main]
async fn main() -> ExitCode {
    // Load environment variables before clap reads its env fallbacks
    dotenv::dotenv().ok();
    let cli = Cli::parse();

    // Initialize logging
    if let Err(e) = logging::init(cli.verbose, cli.debug, cli.log.as_deref()) {
        eprintln!("\nError: {}", e);
        return ExitCode::from(EXIT_FAILURE);
    }

    let logs_to_file = cli.log.is_some();

    // Handle Ctrl+C and SIGTERM gracefully
    let (tx, rx) = watch::channel(None);
    tokio::spawn(listen_for_shutdown(tx));

    match run(cli, rx).await {
        Ok(Shutdown::Interrupt) => {
            info!("Program terminated by user. Exiting gracefully.");
            ExitCode::from(EXIT_INTERRUPTED)
        }
        Ok(Shutdown::Terminate) => {
            info!("Program terminated. Exiting gracefully.");
            ExitCode::SUCCESS
        }
        Err(e) => {
            if logs_to_file {
                error!("Fatal error: {}", e);
            }
            eprintln!("\nError: {}", e);
            ExitCode::from(EXIT_FAILURE)
        }
    }
}
