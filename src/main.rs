use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;

use speedpick::board;
use speedpick::config;
use speedpick::gpio::{Level, PinDriver};
use speedpick::sim::SimulatedGpio;
use speedpick::web;

#[derive(Parser, Debug)]
#[command(name = "speedpick-host", about = "Lock picking timing board host")]
struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "board.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync + 'static>> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let args = Args::parse();
    tracing::info!("Starting speedpick board host");
    tracing::info!("Loading configuration from: {}", args.config.display());

    let config = config::load_config(&args.config).map_err(|e| {
        tracing::error!(
            "Failed to load config from '{}': {}",
            args.config.display(),
            e
        );
        Box::new(e) as Box<dyn std::error::Error + Send + Sync + 'static>
    })?;
    config.validate()?;

    tracing::info!(
        "Board: {} locks, debounce {}s",
        config.locks.len(),
        config.lock_debounce_time_seconds
    );

    // The real GPIO backend plugs in behind the PinDriver trait; the host
    // binary wires the simulator with every input at its unsolved level.
    let gpio = Arc::new(SimulatedGpio::new());
    gpio.set_level(config.start_button_pin, Level::Low);
    gpio.set_level(config.reset_button_pin, Level::Low);
    for lock in &config.locks {
        gpio.set_level(lock.pin, lock.solved_state.toggled());
    }
    let driver: Arc<dyn PinDriver> = gpio;

    let (handle, board_task) = board::spawn(&config, driver);

    let app = web::api::create_router(handle.clone());
    let listener = tokio::net::TcpListener::bind(&config.http_addr).await?;
    tracing::info!("Status API listening on http://{}", listener.local_addr()?);

    tokio::select! {
        result = axum::serve(listener, app) => {
            result?;
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Interrupt received, shutting down");
        }
    }

    if let Err(e) = handle.shutdown().await {
        tracing::warn!("Board shutdown failed: {}", e);
    }
    board_task.await?;

    Ok(())
}
