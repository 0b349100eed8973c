mod display;
mod engine;
mod error;
mod http;
mod library;
mod loudness;
mod output;
mod pipeline;
mod player;

use std::sync::Arc;
use std::time::Duration;

use glowbox_proto::config::Config;
use glowbox_proto::platform;
use tokio::sync::mpsc;
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::display::{DisplayDriver, TraceSink};
use crate::engine::EngineShared;
use crate::loudness::LoudnessMeter;
use crate::player::{Player, PlayerCommand, PlayerHandle};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // File + stdout logging
    let data_dir = platform::data_dir();
    std::fs::create_dir_all(&data_dir)?;
    let log_path = data_dir.join("glowboxd.log");

    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)?;

    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(log_file)
        .with_ansi(false);
    let stdout_layer = tracing_subscriber::fmt::layer();

    tracing_subscriber::registry()
        .with(file_layer)
        .with(stdout_layer)
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,glowbox_daemon=debug")),
        )
        .init();

    info!("log file: {:?}", log_path);

    let config = Config::load()?;
    info!("config loaded from: {:?}", Config::config_path());

    // Shared engine state + display
    let shared = Arc::new(EngineShared::new(config.audio.default_volume));
    let display = Arc::new(DisplayDriver::new(
        config.display.led_count,
        Box::new(TraceSink),
    ));
    let _idle_ticker = Arc::clone(&display)
        .spawn_idle_ticker(Duration::from_millis(config.display.idle_period_ms));
    display.start_idle();

    // Audio output stream (owns the audio thread for the rest of the process)
    let meter = LoudnessMeter::new(config.display.smoothing, config.display.gain);
    output::spawn(
        Arc::clone(&shared),
        Arc::clone(&display),
        config.audio.clone(),
        meter,
    )?;

    // Player command loop — all control surfaces funnel into this channel
    let (cmd_tx, cmd_rx) = mpsc::channel::<PlayerCommand>(64);
    let handle = PlayerHandle::new(cmd_tx, Arc::clone(&shared));
    let player = Player::new(config.audio.clone(), shared, display);

    if config.http.enabled {
        let _http_handle = http::start_server(
            config.http.bind_address.clone(),
            config.http.port,
            handle.clone(),
            config.library.dir.clone(),
        );
    }

    info!("daemon initialised, running player loop");
    player.run(cmd_rx).await;

    Ok(())
}
