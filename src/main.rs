//! LED Wall Server
//!
//! Runs the Art-Net pipeline on the main thread and the REST/WebSocket API
//! on a small tokio runtime.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};

use ledwall_server::api::{create_shared_state, run_server, SharedStateHandle};
use ledwall_server::artnet::UdpTransport;
use ledwall_server::effects::{register_builtin_effects, EffectRegistry};
use ledwall_server::error::StartupError;
use ledwall_server::pipeline::{Pipeline, PipelineCommand, PipelineExit, Publisher};
use ledwall_server::settings::{LedWallSettings, SettingsStore};

fn main() {
    // Initialize logging with tracing
    use ledwall_server::telemetry::{init_logging, LogConfig};
    let log_config = LogConfig::from_env();
    // Keep the guard alive for the program duration
    let _log_guard = match init_logging(&log_config) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Failed to initialize logging: {}", e);
            None
        }
    };

    tracing::info!("LED Wall Server v{}", env!("CARGO_PKG_VERSION"));

    let settings_path = SettingsStore::resolve_path(std::env::args_os().nth(1).map(PathBuf::from));

    if let Err(e) = run(settings_path.as_deref()) {
        tracing::error!("Startup failed: {}", e);
        std::process::exit(1);
    }

    tracing::info!("LED Wall Server stopped");
}

fn run(settings_path: Option<&Path>) -> Result<(), StartupError> {
    let mut settings = load_settings(settings_path)?;

    let publisher = Publisher::new();
    let (shared_state, mut commands) = create_shared_state(publisher.clone());
    let running = Arc::new(AtomicBool::new(true));

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .thread_name("ledwall-api")
        .enable_all()
        .build()
        .map_err(|source| StartupError::Thread {
            name: "ledwall-api",
            source,
        })?;
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    spawn_signal_handler(&runtime, Arc::clone(&running), shared_state.command_tx.clone());
    if settings.api.enabled {
        spawn_api_server(&runtime, settings.api.bind_addr(), Arc::clone(&shared_state), shutdown_rx);
    } else {
        tracing::info!("API server disabled");
    }

    let result = run_pipeline(&mut settings, settings_path, &publisher, &mut commands, &running);

    let _ = shutdown_tx.send(true);
    runtime.shutdown_timeout(Duration::from_secs(2));
    result
}

/// Run pipelines until shutdown, rebuilding on each settings reload
fn run_pipeline(
    settings: &mut LedWallSettings,
    settings_path: Option<&Path>,
    publisher: &Publisher,
    commands: &mut mpsc::UnboundedReceiver<PipelineCommand>,
    running: &AtomicBool,
) -> Result<(), StartupError> {
    loop {
        let transport = UdpTransport::bind(
            settings.network.bind_addr()?,
            settings.network.target_addr()?,
            settings.network.broadcast,
            settings.network.receive_queue,
        )?;
        let mut pipeline = Pipeline::new(settings, builtin_registry(), Box::new(transport), publisher.clone())?;

        match pipeline.run(commands, running) {
            PipelineExit::Shutdown => return Ok(()),
            PipelineExit::Reload => {}
        }
        // Release the socket before rebinding
        drop(pipeline);

        match load_settings(settings_path) {
            Ok(reloaded) => {
                tracing::info!("Settings reloaded");
                *settings = reloaded;
            }
            Err(e) => {
                tracing::error!("Settings reload failed, keeping previous settings: {}", e);
            }
        }
    }
}

fn load_settings(path: Option<&Path>) -> Result<LedWallSettings, StartupError> {
    let store = match path {
        Some(path) => SettingsStore::load(path)?,
        None => {
            tracing::warn!("No settings path available, using defaults");
            SettingsStore::new()
        }
    };
    let settings = store.settings()?;
    settings.validate()?;
    Ok(settings)
}

fn builtin_registry() -> EffectRegistry {
    let mut registry = EffectRegistry::new();
    register_builtin_effects(&mut registry);
    registry
}

fn spawn_signal_handler(
    runtime: &tokio::runtime::Runtime,
    running: Arc<AtomicBool>,
    command_tx: mpsc::UnboundedSender<PipelineCommand>,
) {
    runtime.spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Shutdown requested");
            running.store(false, Ordering::Release);
            let _ = command_tx.send(PipelineCommand::Shutdown);
        }
    });
}

fn spawn_api_server(
    runtime: &tokio::runtime::Runtime,
    addr: std::net::SocketAddr,
    shared_state: SharedStateHandle,
    shutdown_rx: watch::Receiver<bool>,
) {
    runtime.spawn(async move {
        if let Err(e) = run_server(addr, shared_state, shutdown_rx).await {
            tracing::error!("API server error: {}", e);
        }
    });
}
