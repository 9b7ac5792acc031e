//! NFC Jukebox - Rust implementation
//!
//! Kiosk gateway: a proximity card on the reader starts playback of its
//! mapped file or folder, lifting the card stops it.

use anyhow::Result;
use clap::Parser;
use colored::*;
use std::sync::Arc;
use tokio::sync::Mutex as AsyncMutex;
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use nfc_jukebox::config::AppConfig;
use nfc_jukebox::jukebox::Jukebox;
use nfc_jukebox::mapping::{MappingStore, MappingWatcher, ReloadSignal};
use nfc_jukebox::playback::PlaybackController;
use nfc_jukebox::presence::{PresenceDetector, PresenceFileTransport};
use nfc_jukebox::volume::{AlsaMixer, MixerControl, VolumeBridge};

/// NFC Jukebox - drive audio playback from a proximity-card reader
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.yaml")]
    config: String,

    /// Log level (error, warn, info, debug, trace)
    #[arg(short, long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Check the mapping file against the media root and exit
    #[arg(long)]
    check_mapping: bool,

    /// Probe the mixer control and exit
    #[arg(long)]
    probe_mixer: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let args = Args::parse();

    init_logging(&args.log_level)?;

    info!("Starting NFC Jukebox...");
    info!("Configuration file: {}", args.config);

    let config = AppConfig::load(&args.config).await?;

    if args.check_mapping {
        check_mapping(&config).await;
        return Ok(());
    }

    if args.probe_mixer {
        probe_mixer(&config).await;
        return Ok(());
    }

    print_banner(&config);

    let shutdown_signal = shutdown_signal();
    run_app(config, shutdown_signal).await?;

    info!("NFC Jukebox shutdown complete");
    Ok(())
}

async fn run_app(config: AppConfig, shutdown: impl std::future::Future<Output = ()>) -> Result<()> {
    // Mapping table; a missing file is a warning, the watcher recovers later
    let mapping = Arc::new(MappingStore::new(
        config.media_root.clone(),
        config.mapping_file.clone(),
    ));
    match mapping.load().await {
        Ok(count) => info!("Mapping loaded: {} entries", count),
        Err(e) => warn!("⚠️  {} — starting with an empty mapping", e),
    }

    // Volume bridge, probing the mixer once at startup
    let mixer = Arc::new(AlsaMixer::new(&config.mixer));
    let volume = Arc::new(AsyncMutex::new(
        VolumeBridge::init(mixer, &config.volume).await,
    ));

    let playback = PlaybackController::new(config.decoder.clone(), volume.clone());
    let jukebox = Jukebox::new(mapping, playback, volume);

    // Background tasks: card polling and mapping-file watching
    let transport = Arc::new(PresenceFileTransport::new(config.sensor.status_file.clone()));
    let (mut detector, mut presence_events) =
        PresenceDetector::start(transport, config.sensor.clone());
    let mut watcher = MappingWatcher::start(config.mapping_file.clone(), config.reload.interval());

    let mut volume_tick = tokio::time::interval(config.volume.tick_interval());
    volume_tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

    info!(
        "🎶 Ready to scan cards (media root: {})",
        config.media_root.display()
    );

    // Main event loop. Card events, reload signals and volume ticks are all
    // handled here, one at a time.
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            Some(event) = presence_events.recv() => {
                jukebox.handle_event(event).await;
            }

            Some(signal) = watcher.next_signal() => {
                if signal == ReloadSignal::Changed {
                    info!("📝 Mapping file changed, reloading...");
                    jukebox.on_reload().await;
                }
            }

            _ = volume_tick.tick() => {
                jukebox.on_volume_tick().await;
            }

            _ = &mut shutdown => {
                info!("Shutdown signal received, stopping event loop");
                break;
            }
        }
    }

    // Cleanup: never leave an orphan decoder behind
    info!("Shutting down...");
    detector.stop().await;
    watcher.stop().await;
    jukebox.playback().stop_immediately().await;

    Ok(())
}

fn print_banner(config: &AppConfig) {
    println!("\n{}", "NFC Jukebox".bold().cyan());
    println!("{}", "===========".cyan());
    println!("  Place a card on the reader: play its mapped file or folder");
    println!("  Remove the card: stop playback");
    println!(
        "  Volume: external control writes {}",
        config.volume.file.display()
    );
    println!();
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
    tokio::signal::ctrl_c()
        .await
        .expect("Failed to install CTRL+C signal handler");
    info!("Shutdown signal received");
}

async fn check_mapping(config: &AppConfig) {
    println!("\n{}", "=== Mapping file check ===".bold().cyan());
    println!("  Media root: {}", config.media_root.display());
    println!("  Mapping file: {}", config.mapping_file.display());

    let store = MappingStore::new(config.media_root.clone(), config.mapping_file.clone());
    match store.load().await {
        Ok(count) => {
            println!("  Entries: {}", count.to_string().green());

            let snapshot = store.snapshot();
            let mut entries: Vec<_> = snapshot.iter().collect();
            entries.sort();
            for (id, path) in entries {
                let status = if path.exists() {
                    "ok".green()
                } else {
                    "missing".red()
                };
                println!("  {} → {} [{}]", id.yellow(), path.display(), status);
            }
        }
        Err(e) => {
            println!("  {} {}", "warning:".red().bold(), e);
        }
    }
}

async fn probe_mixer(config: &AppConfig) {
    println!("\n{}", "=== Mixer probe ===".bold().cyan());
    let mixer = AlsaMixer::new(&config.mixer);
    match mixer.probe().await {
        Ok(()) => println!(
            "  {}",
            format!(
                "Control '{}' on card {} is available",
                config.mixer.control, config.mixer.card
            )
            .green()
        ),
        Err(e) => println!(
            "  {}",
            format!("Software volume unsupported: {:#}", e).yellow()
        ),
    }
}
