use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use rand::Rng;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use floodgate::config::FloodgateConfig;
use floodgate::{Limiter, Outcome};

/// Drive a limiter with synthetic traffic and report what happened.
#[derive(Parser, Debug)]
#[command(name = "floodgate", version, about)]
struct Args {
    /// Path to a YAML configuration file (defaults are used otherwise)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Number of requests to submit
    #[arg(short = 'n', long, default_value_t = 20)]
    requests: usize,

    /// Delay between submissions in milliseconds
    #[arg(long, default_value_t = 50)]
    spacing_ms: u64,

    /// Upper bound of a random delay added to each spacing
    #[arg(long, default_value_t = 0)]
    jitter_ms: u64,

    /// Simulated processing time per admitted request
    #[arg(long, default_value_t = 10)]
    work_ms: u64,

    /// How long to let the worker drain the queue after the last submission
    #[arg(long, default_value_t = 2000)]
    drain_ms: u64,

    /// Emit logs as JSON
    #[arg(long)]
    json: bool,
}

/// A synthetic unit of work.
#[derive(Debug)]
struct Request {
    id: Uuid,
    seq: usize,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if args.json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_thread_ids(true)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_thread_ids(true)
            .init();
    }

    info!("Starting Floodgate demo");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let config = match &args.config {
        Some(path) => FloodgateConfig::from_file(path)?,
        None => FloodgateConfig::default(),
    };
    let limiter = Limiter::new(config.limiter)?;
    info!(config = ?limiter.config(), "Configuration loaded");
    let work = Duration::from_millis(args.work_ms);
    limiter.set_completion_callback(move |request: Request| {
        info!(id = %request.id, seq = request.seq, "Processing request");
        std::thread::sleep(work);
    })?;
    limiter.start()?;

    tokio::select! {
        _ = drive(&limiter, &args) => {
            info!(drain_ms = args.drain_ms, "All requests submitted, draining queue");
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_millis(args.drain_ms)) => {}
                _ = shutdown_signal() => {}
            }
        }
        _ = shutdown_signal() => {
            warn!("Interrupted before all requests were submitted");
        }
    }

    limiter.stop().await;

    println!("{}", serde_json::to_string_pretty(&limiter.snapshot())?);
    info!("Floodgate demo stopped");
    Ok(())
}

/// Submit the configured number of requests, spaced out in time.
async fn drive(limiter: &Limiter<Request>, args: &Args) {
    for seq in 0..args.requests {
        let request = Request {
            id: Uuid::new_v4(),
            seq,
        };
        let id = request.id;

        match limiter.submit(request) {
            Outcome::Taken => info!(%id, seq, "Taken immediately"),
            Outcome::Queued => info!(%id, seq, "Queued"),
            Outcome::Discarded => warn!(%id, seq, rejected = limiter.is_rejected(), "Discarded"),
        }

        let jitter = if args.jitter_ms > 0 {
            rand::thread_rng().gen_range(0..=args.jitter_ms)
        } else {
            0
        };
        tokio::time::sleep(Duration::from_millis(args.spacing_ms + jitter)).await;
    }
}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}
