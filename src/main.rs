//! Torpool - Tor daemon pool supervisor
//!
//! This is the main entry point for the Torpool application.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::broadcast;
use torpool::config::{load_config, Config};
use torpool::pool::create_pool;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

/// Torpool - run a pool of Tor daemons and rotate their identities
#[derive(Parser, Debug)]
#[command(name = "torpool")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Number of Tor instances (overrides pool.size)
    #[arg(short = 'n', long)]
    size: Option<usize>,

    /// First SOCKS port (overrides pool.start_port)
    #[arg(short = 'p', long)]
    start_port: Option<u16>,

    /// Path to the tor executable (overrides daemon.executable)
    #[arg(long)]
    tor_path: Option<PathBuf>,

    /// Rotate every identity at this interval, in seconds
    #[arg(short, long)]
    rotate_interval: Option<u64>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Enable JSON logging format
    #[arg(long)]
    json_log: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Setup logging
    setup_logging(&args.log_level, args.json_log)?;

    // Load configuration
    let mut config = match &args.config {
        Some(path) => {
            let config = load_config(path)?;
            info!("Configuration loaded from: {:?}", path);
            config
        }
        None => Config::default(),
    };
    apply_overrides(&mut config, &args);

    info!("Torpool v{}", torpool::VERSION);
    info!(
        "Pool of {} instances from port {}",
        config.pool.size, config.pool.start_port
    );

    let pool = create_pool(&config)?;

    // Setup shutdown signal
    let (shutdown_tx, mut shutdown_rx) = broadcast::channel(1);
    tokio::spawn(async move {
        wait_for_shutdown_signal().await;
        let _ = shutdown_tx.send(());
    });

    let infos = tokio::select! {
        result = pool.initialize() => result.context("Failed to initialize pool")?,
        _ = shutdown_rx.recv() => {
            info!("Shutdown requested during startup");
            pool.cleanup().await;
            return Ok(());
        }
    };

    for info in &infos {
        println!("{}", serde_json::to_string(info)?);
    }

    match args.rotate_interval.filter(|secs| *secs > 0) {
        Some(secs) => {
            let mut ticker = tokio::time::interval(Duration::from_secs(secs));
            // The first tick completes immediately
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let results = pool.rotate_identities().await;
                        if results.iter().any(|ok| !ok) {
                            warn!("Identity rotation results: {:?}", results);
                        }
                    }
                    _ = shutdown_rx.recv() => break,
                }
            }
        }
        None => {
            let _ = shutdown_rx.recv().await;
        }
    }

    pool.cleanup().await;
    info!("Shutdown complete");
    Ok(())
}

/// Apply command line overrides on top of the file configuration
fn apply_overrides(config: &mut Config, args: &Args) {
    if let Some(size) = args.size {
        config.pool.size = size;
    }
    if let Some(start_port) = args.start_port {
        config.pool.start_port = start_port;
    }
    if let Some(tor_path) = &args.tor_path {
        config.daemon.executable = Some(tor_path.clone());
    }
}

/// Wait for Ctrl+C, or SIGTERM on unix
async fn wait_for_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {
                        info!("Received Ctrl+C, shutting down...");
                    }
                    _ = sigterm.recv() => {
                        info!("Received SIGTERM, shutting down...");
                    }
                }
                return;
            }
            Err(e) => warn!("Failed to setup SIGTERM handler: {}", e),
        }
    }

    let _ = tokio::signal::ctrl_c().await;
    info!("Received Ctrl+C, shutting down...");
}

/// Setup logging based on configuration
fn setup_logging(level: &str, json: bool) -> Result<()> {
    let level = match level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" | "warning" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    if json {
        let subscriber = FmtSubscriber::builder()
            .with_max_level(level)
            .with_writer(std::io::stderr)
            .json()
            .finish();
        tracing::subscriber::set_global_default(subscriber)?;
    } else {
        let subscriber = FmtSubscriber::builder()
            .with_max_level(level)
            .with_writer(std::io::stderr)
            .with_target(true)
            .with_thread_ids(false)
            .with_thread_names(false)
            .finish();
        tracing::subscriber::set_global_default(subscriber)?;
    }

    Ok(())
}
