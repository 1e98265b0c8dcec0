//! SmartPark CLI runner
//!
//! Runs the reservation engine headless. Plate detections are read from
//! stdin as JSON lines and fed to the detection listener.
//!
//! ```sh
//! # Run with default config (~/.config/smartpark/config.toml)
//! smartpark-service
//!
//! # Custom config path
//! smartpark-service --config /etc/smartpark/config.toml
//!
//! # Feed detections from a camera bridge
//! camera-bridge | smartpark-service
//! #   {"plate": "XYZ-9", "timestamp": "2024-05-01T10:02:00Z"}
//!
//! # Validate config without starting
//! smartpark-service --check
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};

use smartpark::application::parking::DetectionEvent;
use smartpark::config::AppConfig;
use smartpark::runtime::{init_tracing, ServiceHandle};
use smartpark::shared::ShutdownSignal;

/// SmartPark: parking reservation lifecycle and waitlist engine.
#[derive(Parser, Debug)]
#[command(
    name = "smartpark-service",
    version,
    about = "Parking reservation lifecycle and waitlist engine",
    long_about = "SmartPark holds parking spots for plates, activates them on camera \
                  detection, expires no-shows and hands freed spots to the waitlist.\n\n\
                  Default config: ~/.config/smartpark/config.toml"
)]
struct Cli {
    /// Path to the configuration file (TOML).
    #[arg(short, long, env = "SMARTPARK_CONFIG")]
    config: Option<PathBuf>,

    /// Override the log level (trace, debug, info, warn, error).
    #[arg(short, long)]
    log_level: Option<String>,

    /// Override the sweeper interval in seconds.
    #[arg(long)]
    sweep_interval: Option<u64>,

    /// Validate the configuration file and exit without starting.
    #[arg(long)]
    check: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // ── Load configuration ─────────────────────────────────────
    let config_path = cli.config.unwrap_or_else(smartpark::default_config_path);

    let mut config = match AppConfig::load(&config_path) {
        Ok(mut cfg) => {
            if let Some(ref level) = cli.log_level {
                cfg.logging.level = level.clone();
            }
            init_tracing(&cfg);
            info!("Configuration loaded from {}", config_path.display());
            cfg
        }
        Err(e) => {
            if cli.check {
                eprintln!("❌ Invalid configuration {}: {}", config_path.display(), e);
                std::process::exit(1);
            }
            tracing_subscriber::fmt()
                .with_env_filter(tracing_subscriber::EnvFilter::new("info"))
                .init();
            error!("Failed to load config from {}: {}", config_path.display(), e);
            error!("Using default configuration.");
            AppConfig::default()
        }
    };

    // ── Apply CLI overrides ────────────────────────────────────
    if let Some(secs) = cli.sweep_interval {
        info!("CLI override: sweeper.interval_secs = {}", secs);
        config.sweeper.interval_secs = secs;
    }

    // ── Config validation mode ─────────────────────────────────
    if cli.check {
        config.validate()?;
        println!("✅ Configuration is valid");
        println!("   Config file     : {}", config_path.display());
        println!("   Spots           : {}", config.spots.len());
        println!("   Waiting timeout : {} min", config.lifecycle.waiting_timeout_minutes);
        println!("   Active window   : {} min", config.lifecycle.active_duration_minutes);
        println!("   Sweep interval  : {} s", config.sweeper.interval_secs);
        println!("   Overstay policy : {:?}", config.sweeper.overstay_policy);
        println!("   Log level       : {}", config.logging.level);
        return Ok(());
    }

    // ── Prometheus exporter ────────────────────────────────────
    if let Some(ref listen) = config.metrics.listen {
        let addr: SocketAddr = listen.parse()?;
        metrics_exporter_prometheus::PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()?;
        info!("📊 Prometheus metrics on http://{}/metrics", addr);
    }

    // ── Start engine ───────────────────────────────────────────
    let handle = ServiceHandle::start(config).await?;
    handle.install_signal_handler();

    let summary = handle.registry.summary().await?;
    info!(
        total = summary.total,
        available = summary.available,
        maintenance = summary.maintenance,
        "🅿️ Lot ready"
    );
    info!("🚀 Reading detections from stdin. Press Ctrl+C to shutdown gracefully.");

    // ── Feed stdin detections until shutdown ───────────────────
    feed_until_shutdown(&handle, BufReader::new(tokio::io::stdin()), handle.shutdown_signal()).await;

    if let Ok(summary) = handle.registry.summary().await {
        info!(
            reserved = summary.reserved,
            occupied = summary.occupied,
            occupancy = %format!("{:.0}%", summary.occupancy_rate() * 100.0),
            "Final lot state"
        );
    }

    if !handle.shutdown().await {
        warn!("Some tasks did not stop in time");
    }
    Ok(())
}

/// Forward detection lines from `input` until the shutdown signal fires.
/// A closed input (e.g. stdin on `/dev/null`) leaves the engine running.
async fn feed_until_shutdown<R>(handle: &ServiceHandle, input: R, shutdown: ShutdownSignal)
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = input.lines();
    let mut input_open = true;
    let stop = shutdown.wait();
    tokio::pin!(stop);

    loop {
        tokio::select! {
            line = lines.next_line(), if input_open => {
                match line {
                    Ok(Some(line)) => forward_detection(handle, &line).await,
                    Ok(None) => {
                        info!("stdin closed, running until shutdown signal");
                        input_open = false;
                    }
                    Err(e) => {
                        error!("Failed to read stdin: {}", e);
                        input_open = false;
                    }
                }
            }
            _ = &mut stop => break,
        }
    }
}

async fn forward_detection(handle: &ServiceHandle, line: &str) {
    let line = line.trim();
    if line.is_empty() {
        return;
    }
    let event: DetectionEvent = match serde_json::from_str(line) {
        Ok(event) => event,
        Err(e) => {
            warn!("Skipping malformed detection {:?}: {}", line, e);
            return;
        }
    };

    if let Some(feed) = &handle.detection_feed {
        feed.record(&event.plate, event.timestamp).await;
    }
    if let Err(e) = handle.detections.publish(event).await {
        warn!("Failed to forward detection: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn closed_input_keeps_engine_running_until_signal() {
        let handle = ServiceHandle::start(AppConfig::default()).await.unwrap();
        let signal = handle.shutdown_signal();

        {
            let feed = feed_until_shutdown(&handle, &b""[..], signal.clone());
            tokio::pin!(feed);
            assert!(tokio::time::timeout(Duration::from_millis(100), &mut feed)
                .await
                .is_err());
            assert!(handle.is_running());

            signal.trigger();
            tokio::time::timeout(Duration::from_secs(1), feed).await.unwrap();
        }
        assert!(handle.shutdown().await);
    }
}
