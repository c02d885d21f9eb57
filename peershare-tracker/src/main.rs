//! Peershare tracker daemon.
//!
//! Runs one node of the replicated control plane as a foreground service:
//! load persisted state, open the listener, catch up on missed writes from
//! peer trackers, then serve until SIGINT/SIGTERM.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use peershare_tracker::{config::TrackerConfig, persistence, Store, Tracker};
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::Layer;

#[derive(Parser)]
#[command(name = "peershare-tracker")]
#[command(about = "Peershare tracker - replicated control plane node")]
#[command(version)]
struct Args {
    /// Cluster config file: one host:port per line, '#' comments allowed
    config: Option<PathBuf>,

    /// 1-based line number selecting this tracker's own address
    index: Option<usize>,

    /// Listen address used when no config file is given
    #[arg(long, default_value = "127.0.0.1:9000")]
    listen: String,

    /// Path of the persisted state snapshot
    #[arg(long, default_value = persistence::DEFAULT_STATE_FILE)]
    state_file: PathBuf,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, value_enum, default_value_t = LogLevel::Info)]
    log_level: LogLevel,
}

#[derive(Copy, Clone, Debug, clap::ValueEnum)]
enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<LogLevel> for tracing_subscriber::filter::LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Error => Self::ERROR,
            LogLevel::Warn => Self::WARN,
            LogLevel::Info => Self::INFO,
            LogLevel::Debug => Self::DEBUG,
            LogLevel::Trace => Self::TRACE,
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let log_level = tracing_subscriber::filter::LevelFilter::from(args.log_level);
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_thread_ids(false)
                .with_file(true)
                .with_line_number(true)
                .with_filter(log_level),
        )
        .init();

    let config = match (&args.config, args.index) {
        (Some(path), Some(index)) => TrackerConfig::load(path, index)?,
        (None, None) => TrackerConfig::standalone(&args.listen),
        _ => {
            eprintln!("Usage: peershare-tracker [<config_file> <line_number>]");
            std::process::exit(1);
        }
    };

    info!("tracker starting on {}", config.listen_addr);
    info!("sync peers: {:?}", config.peers);

    let tracker = Arc::new(Tracker::new(Store::new(&args.state_file), config.peers));

    // Load persisted state before the listener opens.
    if let Err(e) = tracker.load_state() {
        warn!("failed to load state: {e}");
    }

    let listener = TcpListener::bind(&config.listen_addr).await?;
    info!("tracker listening on {}", config.listen_addr);

    // Catch up on writes missed while this tracker was down.
    let rejoin = tracker.clone();
    tokio::spawn(async move {
        rejoin.pull_state_from_peers().await;
    });

    let server = tracker.clone();
    tokio::spawn(async move {
        server.serve(listener).await;
    });

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("received SIGINT, shutting down...");
        }
        _ = sigterm() => {
            info!("received SIGTERM, shutting down...");
        }
    }

    info!("saving state...");
    if let Err(e) = tracker.save_now().await {
        warn!("error saving state: {e}");
    }

    info!("tracker stopped");
    Ok(())
}

/// Wait for SIGTERM signal (Unix only)
#[cfg(unix)]
async fn sigterm() {
    use tokio::signal::unix::{signal, SignalKind};
    let mut sigterm = signal(SignalKind::terminate()).expect("Failed to register SIGTERM handler");
    sigterm.recv().await;
}

/// No SIGTERM on non-Unix platforms, just wait forever
#[cfg(not(unix))]
async fn sigterm() {
    std::future::pending::<()>().await
}
