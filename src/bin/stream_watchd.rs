//! stream_watchd - person detection daemon for live camera streams
//!
//! This daemon:
//! 1. Loads the stream configuration (an unreadable config means no streams; a
//!    broker or storage that cannot be set up is logged and skipped)
//! 2. Starts a capture and a processing thread per stream
//! 3. Switches streams on and off from MQTT, one topic per stream
//! 4. Stops every stream on Ctrl-C

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::time::Duration;

use stream_watch::{control::ControlLoop, transport, CaptureFactory, StreamManager, WatchConfig};

const MQTT_REQUEST_CAPACITY: usize = 64;

#[derive(Parser, Debug)]
#[command(name = "stream_watchd", version, about = "Windowed person detection over camera streams")]
struct Args {
    /// Configuration file (JSON, or TOML with a .toml extension).
    #[arg(long, env = "STREAM_WATCH_CONFIG")]
    config: Option<PathBuf>,

    /// Seconds between per-stream health lines (0 disables them).
    #[arg(long, env = "STREAM_WATCH_HEALTH_INTERVAL_SECS", default_value_t = 30)]
    health_interval_secs: u64,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let config = WatchConfig::load_or_default(args.config.as_deref());
    if config.streams.is_empty() {
        log::warn!("no streams configured");
    }

    let mqtt = match &config.mqtt {
        Some(settings) => transport::connect_or_log(settings, MQTT_REQUEST_CAPACITY),
        None => {
            log::warn!("no MQTT broker configured; streams cannot be activated remotely");
            None
        }
    };

    let factory: Arc<dyn CaptureFactory> = Arc::new(config.capture_factory());
    let manager = StreamManager::from_config_or_empty(
        &config,
        factory,
        mqtt.as_ref().map(|(client, _)| client),
    );
    if let Err(e) = manager.start_all() {
        log::error!("{:#}", e);
    }

    let (tx, rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })
    .context("set Ctrl-C handler")?;

    let shutdown = AtomicBool::new(false);
    let health_interval = Duration::from_secs(args.health_interval_secs);

    let report = std::thread::scope(|scope| {
        let control_client = mqtt.map(|(client, mut connection)| {
            let control = ControlLoop::new(&manager, client.clone());
            let shutdown = &shutdown;
            scope.spawn(move || control.run(&mut connection, shutdown));
            client
        });

        log::info!(
            "stream_watchd running {} streams, waiting for shutdown signal (Ctrl-C)...",
            manager.len()
        );
        wait_for_shutdown(&rx, &manager, health_interval);
        log::info!("shutdown signal received, stopping streams...");

        let report = manager.stop_all();
        shutdown.store(true, Ordering::SeqCst);
        if let Some(client) = control_client {
            if let Err(e) = client.try_disconnect() {
                log::warn!("MQTT disconnect failed: {}", e);
            }
        }
        report
    });

    log::info!(
        "stopped {} streams ({} failures)",
        report.stopped.len(),
        report.failures.len()
    );
    for (name, error) in &report.failures {
        log::error!("{}: {:#}", name, error);
    }
    Ok(())
}

fn wait_for_shutdown(rx: &mpsc::Receiver<()>, manager: &StreamManager, interval: Duration) {
    if interval.is_zero() {
        let _ = rx.recv();
        return;
    }
    loop {
        match rx.recv_timeout(interval) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => return,
            Err(RecvTimeoutError::Timeout) => log_health(manager),
        }
    }
}

fn log_health(manager: &StreamManager) {
    for (name, stats) in manager.stats() {
        let active = manager.get(&name).is_some_and(|c| c.is_active());
        log::info!(
            "{} health active={} captured={} buffered={} dropped={} in_flight={} processed={} detections={} read_failures={} collaborator_failures={}",
            name,
            active,
            stats.frames_captured,
            stats.frames_buffered,
            stats.frames_dropped,
            stats.frames_in_flight(),
            stats.batches_processed,
            stats.detections,
            stats.read_failures,
            stats.collaborator_failures
        );
    }
}
