//! imetap-daemon: switches the macOS input source on bare Command-key taps
//!
//! A tap of the left Command key alone activates an alphabetic layout;
//! a tap of the right Command key alone activates a regional input
//! method (both configurable). The daemon provides:
//! - A listen-only CGEventTap observing flags-changed and key-down
//!   events system-wide, with permission bootstrapping and self-healing
//! - Edge-triggered tap detection that rejects shortcut chords
//! - Input-source activation via Text Input Source Services, including
//!   the focus-coercion workaround for CJKV targets
//! - IPC for the menu-bar settings app

#![cfg_attr(not(target_os = "macos"), allow(dead_code, unused_imports))]

mod config;
mod events;
mod focus;
mod gesture;
mod hotkey;
mod ipc;
mod lifecycle;
mod sources;
mod switcher;

#[cfg(not(target_os = "macos"))]
fn main() {
    eprintln!("imetap-daemon only supports macOS");
    std::process::exit(1);
}

#[cfg(target_os = "macos")]
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    use std::sync::Arc;

    use tokio::sync::{broadcast, mpsc};
    use tracing::{error, info, warn};
    use tracing_subscriber::EnvFilter;

    use crate::config::{Config, Preferences, SharedPrefs};
    use crate::events::SwitchEvent;
    use crate::focus::TapWindowCoercer;
    use crate::hotkey::TapListener;
    use crate::ipc::Server;
    use crate::lifecycle::{ReloadSignal, ShutdownSignal};
    use crate::sources::TisDirectory;
    use crate::switcher::SwitchExecutor;

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        "imetap-daemon starting"
    );

    // Load configuration and persisted preferences
    let config = Config::load()?;
    config.ensure_dirs()?;
    let prefs = Arc::new(SharedPrefs::new(Preferences::load(&config.prefs_path)?));
    info!(?config.socket_path, "configuration loaded");

    // Create shutdown signal handler
    let shutdown = ShutdownSignal::new();

    // Create channels for inter-component communication
    // Tap listener -> switch executor
    let (decision_tx, decision_rx) = mpsc::channel(32);
    // Switch executor -> main loop / IPC status sync
    let (event_tx, _event_rx) = broadcast::channel::<SwitchEvent>(64);

    // Create the switch executor over the live OS directory
    let executor = Arc::new(SwitchExecutor::new(
        Box::new(TisDirectory::new()),
        Box::new(TapWindowCoercer::new()),
    ));

    // Create the tap listener (runs on a dedicated thread)
    let listener = TapListener::new(decision_tx, Arc::clone(&prefs));
    match listener.start() {
        Ok(()) => {
            info!("tap listener started");
        }
        Err(e) => {
            error!(?e, "failed to start tap listener");
            warn!("continuing without tap detection - check Accessibility permissions");
        }
    }

    // Create IPC server for the settings surface
    let server = Server::with_directory(
        &config.socket_path,
        Arc::clone(&prefs),
        config.prefs_path.clone(),
        Arc::new(TisDirectory::new()),
        event_tx.clone(),
    )?;
    server.set_tap_active(listener.is_running());

    // Subscribe to switch events for IPC status updates
    let mut event_rx = event_tx.subscribe();
    let server_for_events = &server;

    info!("daemon initialized, entering main loop");

    // Main event loop
    tokio::select! {
        // Run the switch executor (processes tap decisions)
        _ = executor.run(decision_rx, Arc::clone(&prefs), event_tx.clone()) => {
            info!("switch executor exited");
        }

        // Run the IPC server (accepts settings-surface connections)
        result = server.run() => {
            if let Err(e) = result {
                error!(?e, "IPC server error");
            }
        }

        // Mirror switch events into the IPC status
        _ = async {
            loop {
                match event_rx.recv().await {
                    Ok(event) => {
                        info!(%event, "switch event");
                        if let SwitchEvent::SwitchCompleted { source_id } = event {
                            server_for_events.set_last_switch(source_id).await;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(skipped = n, "switch event receiver lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        break;
                    }
                }
            }
        } => {
            info!("switch event handler exited");
        }

        // Re-read the preference file on SIGHUP
        _ = async {
            let mut reload = ReloadSignal::new();
            loop {
                reload.wait().await;
                match Preferences::load(&config.prefs_path) {
                    Ok(loaded) => {
                        prefs.apply(loaded).await;
                        info!("preferences reloaded");
                    }
                    Err(e) => {
                        warn!(?e, "failed to reload preferences");
                    }
                }
            }
        } => {
            info!("reload handler exited");
        }

        // Wait for shutdown signal
        _ = shutdown.wait() => {
            info!("shutdown signal received");
        }
    }

    // Cleanup
    info!("shutting down...");

    listener.stop();
    server.shutdown().await;

    info!("imetap-daemon stopped");

    Ok(())
}
