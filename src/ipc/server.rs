//! Unix domain socket server for the settings surface
//!
//! Handles request-response communication and push notifications for
//! the menu-bar app. This layer owns preference mutation: changes land
//! in the shared view and are persisted to disk here, while the core
//! only ever reads.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, error, info, warn};

use crate::config::SharedPrefs;
use crate::events::SwitchEvent;
use crate::sources::SourceDirectory;

use super::protocol::{DaemonStatus, Notification, Request, Response};

/// IPC Server handling settings-surface connections
pub struct Server {
    socket_path: PathBuf,
    listener: Option<UnixListener>,
    ctx: Arc<ServerCtx>,
    shutdown_tx: broadcast::Sender<()>,
}

/// Shared server state
struct ServerCtx {
    prefs: Arc<SharedPrefs>,
    prefs_path: PathBuf,
    directory: Option<Arc<dyn SourceDirectory>>,
    /// Bus the switch executor publishes on; each subscribed client
    /// gets its own receiver
    event_tx: broadcast::Sender<SwitchEvent>,
    start_time: std::time::Instant,
    tap_active: AtomicBool,
    last_switch: RwLock<Option<String>>,
}

impl Server {
    /// Create a new IPC server without input-source enumeration or a
    /// live event bus (sources respond empty, subscriptions stay
    /// silent; used off-macOS and in tests)
    pub fn new(socket_path: &Path, prefs: Arc<SharedPrefs>, prefs_path: PathBuf) -> Result<Self> {
        let (event_tx, _) = broadcast::channel(16);
        Self::build(socket_path, prefs, prefs_path, None, event_tx)
    }

    /// Create a new IPC server backed by an input-source directory and
    /// the daemon's switch event bus
    pub fn with_directory(
        socket_path: &Path,
        prefs: Arc<SharedPrefs>,
        prefs_path: PathBuf,
        directory: Arc<dyn SourceDirectory>,
        event_tx: broadcast::Sender<SwitchEvent>,
    ) -> Result<Self> {
        Self::build(socket_path, prefs, prefs_path, Some(directory), event_tx)
    }

    fn build(
        socket_path: &Path,
        prefs: Arc<SharedPrefs>,
        prefs_path: PathBuf,
        directory: Option<Arc<dyn SourceDirectory>>,
        event_tx: broadcast::Sender<SwitchEvent>,
    ) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = socket_path.parent() {
            std::fs::create_dir_all(parent).context("failed to create socket directory")?;
        }

        // Remove stale socket if it exists
        if socket_path.exists() {
            std::fs::remove_file(socket_path).context("failed to remove stale socket")?;
        }

        let listener = UnixListener::bind(socket_path).context("failed to bind Unix socket")?;

        // Set socket permissions to owner-only (0600)
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(socket_path, std::fs::Permissions::from_mode(0o600))?;
        }

        let (shutdown_tx, _) = broadcast::channel(1);

        let ctx = Arc::new(ServerCtx {
            prefs,
            prefs_path,
            directory,
            event_tx,
            start_time: std::time::Instant::now(),
            tap_active: AtomicBool::new(false),
            last_switch: RwLock::new(None),
        });

        info!(?socket_path, "IPC server listening");

        Ok(Self {
            socket_path: socket_path.to_owned(),
            listener: Some(listener),
            ctx,
            shutdown_tx,
        })
    }

    /// Record whether the event tap listener is running
    pub fn set_tap_active(&self, active: bool) {
        self.ctx.tap_active.store(active, Ordering::SeqCst);
    }

    /// Record the most recently completed switch for status queries
    pub async fn set_last_switch(&self, source_id: String) {
        *self.ctx.last_switch.write().await = Some(source_id);
    }

    /// Run the server, accepting connections
    pub async fn run(&self) -> Result<()> {
        let listener = self.listener.as_ref().context("server not initialized")?;

        loop {
            match listener.accept().await {
                Ok((stream, _addr)) => {
                    debug!("client connected");
                    let ctx = Arc::clone(&self.ctx);
                    let mut shutdown_rx = self.shutdown_tx.subscribe();

                    tokio::spawn(async move {
                        tokio::select! {
                            result = Self::handle_client(stream, ctx) => {
                                if let Err(e) = result {
                                    warn!(?e, "client handler error");
                                }
                            }
                            _ = shutdown_rx.recv() => {
                                debug!("client handler shutting down");
                            }
                        }
                    });
                }
                Err(e) => {
                    error!(?e, "accept error");
                }
            }
        }
    }

    /// Handle a single client connection
    async fn handle_client(mut stream: UnixStream, ctx: Arc<ServerCtx>) -> Result<()> {
        let mut len_buf = [0u8; 4];

        loop {
            // Read message length (4-byte little-endian)
            match stream.read_exact(&mut len_buf).await {
                Ok(_) => {}
                Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                    debug!("client disconnected");
                    return Ok(());
                }
                Err(e) => return Err(e.into()),
            }

            let len = u32::from_le_bytes(len_buf) as usize;
            if len > 1024 * 1024 {
                warn!(len, "message too large, disconnecting");
                return Ok(());
            }

            // Read message body
            let mut msg_buf = vec![0u8; len];
            stream.read_exact(&mut msg_buf).await?;

            // Parse request
            let request: Request =
                serde_json::from_slice(&msg_buf).context("failed to parse request")?;

            debug!(?request, "received request");

            // Process request
            let (response, subscribe) = Self::process_request(request, &ctx).await;

            if subscribe {
                // Subscribe before confirming, so an event fired right
                // after the client sees the confirmation is not lost
                let events = ctx.event_tx.subscribe();
                Self::send_message(&mut stream, &response).await?;
                debug!("client subscribed to notifications");
                return Self::stream_events(stream, events).await;
            }

            // Send response
            Self::send_message(&mut stream, &response).await?;
        }
    }

    /// Push switch events to a subscribed client. The connection is a
    /// notification stream from here on; it ends when the client hangs
    /// up or the event bus closes.
    async fn stream_events(
        mut stream: UnixStream,
        mut events: broadcast::Receiver<SwitchEvent>,
    ) -> Result<()> {
        loop {
            match events.recv().await {
                Ok(event) => {
                    Self::send_message(&mut stream, &Notification::Event(event)).await?;
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(skipped = n, "notification stream lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return Ok(()),
            }
        }
    }

    /// Send a length-prefixed JSON message
    async fn send_message<T: serde::Serialize>(stream: &mut UnixStream, msg: &T) -> Result<()> {
        let msg_bytes = serde_json::to_vec(msg)?;
        let msg_len = (msg_bytes.len() as u32).to_le_bytes();

        stream.write_all(&msg_len).await?;
        stream.write_all(&msg_bytes).await?;

        Ok(())
    }

    /// Process a request and return a response
    /// Returns (Response, should_subscribe)
    async fn process_request(request: Request, ctx: &Arc<ServerCtx>) -> (Response, bool) {
        match request {
            Request::Ping => (Response::Pong, false),

            Request::GetStatus => {
                let prefs = ctx.prefs.snapshot().await;
                let status = DaemonStatus {
                    version: env!("CARGO_PKG_VERSION").to_string(),
                    enabled: prefs.enabled,
                    left_target: prefs.left_target,
                    right_target: prefs.right_target,
                    tap_active: ctx.tap_active.load(Ordering::SeqCst),
                    last_switch: ctx.last_switch.read().await.clone(),
                    uptime_secs: ctx.start_time.elapsed().as_secs(),
                };
                (Response::Status(status), false)
            }

            Request::ListSources => {
                let sources = match &ctx.directory {
                    Some(directory) => directory.list_selectable(),
                    None => {
                        warn!("no input-source directory available");
                        Vec::new()
                    }
                };
                (Response::Sources { sources }, false)
            }

            Request::SetEnabled { enabled } => {
                ctx.prefs.set_enabled(enabled);
                info!(enabled, "tap detection toggled via IPC");
                Self::persist(ctx).await;
                (Response::Updated, false)
            }

            Request::SetTarget { key, target } => {
                info!(%key, %target, "target changed via IPC");
                ctx.prefs.set_target(key, target).await;
                Self::persist(ctx).await;
                (Response::Updated, false)
            }

            Request::Subscribe => (Response::Subscribed, true),
        }
    }

    /// Write the current preferences back to disk. Persistence failure
    /// is logged, not fatal: the live view already carries the change.
    async fn persist(ctx: &Arc<ServerCtx>) {
        let snapshot = ctx.prefs.snapshot().await;
        if let Err(e) = snapshot.save(&ctx.prefs_path) {
            warn!(?e, "failed to persist preferences");
        }
    }

    /// Gracefully shutdown the server
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());

        // Remove socket file
        if self.socket_path.exists() {
            if let Err(e) = std::fs::remove_file(&self.socket_path) {
                warn!(?e, "failed to remove socket file");
            }
        }

        info!("IPC server shutdown complete");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Preferences;
    use crate::hotkey::CommandKey;

    fn test_server(dir: &std::path::Path) -> Server {
        let prefs = Arc::new(SharedPrefs::new(Preferences::default()));
        Server::new(
            &dir.join("daemon.sock"),
            prefs,
            dir.join("preferences.json"),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_set_enabled_persists() {
        let dir = tempfile::tempdir().unwrap();
        let server = test_server(dir.path());

        let (resp, subscribe) =
            Server::process_request(Request::SetEnabled { enabled: false }, &server.ctx).await;
        assert!(matches!(resp, Response::Updated));
        assert!(!subscribe);

        let saved = Preferences::load(&dir.path().join("preferences.json")).unwrap();
        assert!(!saved.enabled);
    }

    #[tokio::test]
    async fn test_status_reflects_target_change() {
        let dir = tempfile::tempdir().unwrap();
        let server = test_server(dir.path());

        Server::process_request(
            Request::SetTarget {
                key: CommandKey::Right,
                target: "Korean".to_string(),
            },
            &server.ctx,
        )
        .await;

        let (resp, _) = Server::process_request(Request::GetStatus, &server.ctx).await;
        let Response::Status(status) = resp else {
            panic!("expected status response");
        };
        assert_eq!(status.right_target, "Korean");
        assert!(!status.tap_active);
    }

    #[tokio::test]
    async fn test_list_sources_without_directory_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let server = test_server(dir.path());

        let (resp, _) = Server::process_request(Request::ListSources, &server.ctx).await;
        assert!(matches!(resp, Response::Sources { ref sources } if sources.is_empty()));
    }

    async fn send_request(stream: &mut UnixStream, request: &Request) {
        let body = serde_json::to_vec(request).unwrap();
        stream
            .write_all(&(body.len() as u32).to_le_bytes())
            .await
            .unwrap();
        stream.write_all(&body).await.unwrap();
    }

    async fn read_message<T: serde::de::DeserializeOwned>(stream: &mut UnixStream) -> T {
        let read = async {
            let mut len_buf = [0u8; 4];
            stream.read_exact(&mut len_buf).await.unwrap();
            let mut body = vec![0u8; u32::from_le_bytes(len_buf) as usize];
            stream.read_exact(&mut body).await.unwrap();
            serde_json::from_slice(&body).unwrap()
        };
        tokio::time::timeout(std::time::Duration::from_secs(1), read)
            .await
            .expect("timed out waiting for message")
    }

    #[tokio::test]
    async fn test_subscribe_turns_connection_into_event_stream() {
        let dir = tempfile::tempdir().unwrap();
        let server = test_server(dir.path());
        let event_tx = server.ctx.event_tx.clone();
        let socket_path = dir.path().join("daemon.sock");

        let server_task = tokio::spawn(async move {
            let _ = server.run().await;
        });

        let mut stream = UnixStream::connect(&socket_path).await.unwrap();
        send_request(&mut stream, &Request::Subscribe).await;
        let resp: Response = read_message(&mut stream).await;
        assert!(matches!(resp, Response::Subscribed));

        event_tx
            .send(SwitchEvent::SwitchCompleted {
                source_id: "com.apple.keylayout.ABC".to_string(),
            })
            .unwrap();

        let note: Notification = read_message(&mut stream).await;
        let Notification::Event(event) = note;
        assert!(matches!(
            event,
            SwitchEvent::SwitchCompleted { ref source_id }
                if source_id == "com.apple.keylayout.ABC"
        ));

        server_task.abort();
    }
}
