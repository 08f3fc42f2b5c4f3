pub mod config;
pub mod coordinator;
pub mod error;
pub mod notifications;
pub mod settings;
pub mod sync;
pub mod timer;
pub mod utils;

use std::sync::Arc;

use anyhow::Result;
use log::warn;

use config::AppConfig;
use coordinator::SyncCoordinator;
use notifications::{LogNotifier, NotificationSink};
use settings::SettingsStore;
use sync::{SyncChannel, WebSocketConnector};
use timer::{commands::run_console, TimerController};

pub struct AppState {
    pub coordinator: SyncCoordinator,
    pub settings: SettingsStore,
}

pub fn run() {
    let config = AppConfig::from_env();

    // RUST_LOG still applies per module; FOCUS_FLOW_DEBUG raises the floor.
    let level = if config.debug {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    };
    env_logger::Builder::from_default_env()
        .filter_level(level)
        .init();

    log::info!("Focus Flow starting up...");

    let result = (|| -> Result<()> {
        let runtime = tokio::runtime::Runtime::new()?;
        runtime.block_on(serve(config))
    })();

    if let Err(err) = result {
        log::error!("Focus Flow stopped: {err:#}");
        std::process::exit(1);
    }
}

async fn serve(config: AppConfig) -> Result<()> {
    let settings = SettingsStore::new(config.settings_path.clone())?;
    let timer = TimerController::new(settings.timer_settings());

    let notifier: Arc<dyn NotificationSink> = Arc::new(LogNotifier);
    let channel = SyncChannel::spawn(
        config.sync.clone(),
        Arc::new(WebSocketConnector),
        notifier.clone(),
    );
    let coordinator = SyncCoordinator::attach(
        timer,
        channel.clone(),
        notifier,
        config.sync.drift_threshold_secs,
    );

    if config.auto_connect {
        // Offline is a normal mode; the timer works without a peer.
        if let Err(err) = channel.connect_default().await {
            warn!("Sync server unavailable ({err}); running offline");
        }
    }

    let app = AppState {
        coordinator,
        settings,
    };
    run_console(&app).await?;

    channel.disconnect().await;
    log::info!("Focus Flow shutting down");
    Ok(())
}
