//! Daemon Server Implementation
//!
//! Serves one [`Conductor`] to any number of surfaces over a Unix socket:
//! - Accepts connections, keeping only peers with our UID
//! - Subscribes every connection to the conductor's broadcasts
//! - Feeds surface events into the conductor
//! - Drives the conductor's streaming side between events
//!
//! ```text
//!                 DaemonServer::run (owns the Conductor)
//!                           │
//!        ┌──────────────────┼─────────────────────┐
//!        │ accept           │ events              │ next_wake
//!        ▼                  ▼                     ▼
//!   spawn connection   handle_event()        handle_wake()
//!   (conn-1, conn-2…)
//!        │   ▲
//!  frames│   │ConductorMessage frames (Subscription)
//!        ▼   │
//!     socket peer
//! ```
//!
//! The conductor is never shared: the accept loop is its only caller, so no
//! lock is held across backend I/O.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use thiserror::Error;
use tokio::io::AsyncReadExt;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn, Instrument};

use studio_core::transport::{write_frame, FrameDecoder};
use studio_core::{
    Conductor, ConductorMessage, ConductorState, ConnectionId, StudioBackend, Subscription,
    SurfaceEvent, SurfaceRegistry, SurfaceType, TransportError,
};

/// How long a closing connection may take to flush queued messages
const DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

/// How long one frame write may take before the peer is dropped
const WRITE_TIMEOUT: Duration = Duration::from_secs(5);

/// Errors that stop the server
#[derive(Debug, Error)]
pub enum ServerError {
    /// Socket directory could not be created or stale socket removed
    #[error("failed to prepare socket {path:?}: {source}")]
    Prepare {
        /// Socket path
        path: PathBuf,
        /// Underlying IO error
        source: std::io::Error,
    },

    /// Bind failed
    #[error("failed to bind {path:?}: {source}")]
    Bind {
        /// Socket path
        path: PathBuf,
        /// Underlying IO error
        source: std::io::Error,
    },

    /// Permissions could not be restricted
    #[error("failed to set permissions on {path:?}: {source}")]
    Permissions {
        /// Socket path
        path: PathBuf,
        /// Underlying IO error
        source: std::io::Error,
    },

    /// Conductor failed to start or shut down
    #[error("conductor error: {0}")]
    Conductor(#[from] anyhow::Error),
}

/// Per-connection bookkeeping kept by the server
struct ConnectionState {
    connected_at: Instant,
    peer_uid: Option<u32>,
    task: JoinHandle<()>,
}

/// Configuration for the daemon server
#[derive(Clone, Debug)]
pub struct ServerConfig {
    /// Maximum number of concurrent connections
    pub max_connections: usize,
    /// Event channel capacity (from surfaces to conductor)
    pub event_capacity: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            max_connections: 32,
            event_capacity: 256,
        }
    }
}

/// The main daemon server
pub struct DaemonServer {
    socket_path: PathBuf,
    server_config: ServerConfig,
    connection_states: Arc<DashMap<ConnectionId, ConnectionState>>,
}

impl DaemonServer {
    /// Create a server that will listen on `socket_path`
    pub fn new(socket_path: PathBuf) -> Self {
        Self {
            socket_path,
            server_config: ServerConfig::default(),
            connection_states: Arc::new(DashMap::new()),
        }
    }

    /// Replace the server configuration
    #[must_use]
    pub fn with_config(mut self, server_config: ServerConfig) -> Self {
        self.server_config = server_config;
        self
    }

    /// Socket path
    #[must_use]
    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Number of open connections
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.connection_states.len()
    }

    /// UID of the peer, from `SO_PEERCRED`
    #[cfg(target_os = "linux")]
    fn peer_uid(stream: &UnixStream) -> Option<u32> {
        use std::os::unix::io::AsRawFd;

        let fd = stream.as_raw_fd();
        // SAFETY: ucred is plain data; getsockopt fills at most `len` bytes.
        let mut cred: libc::ucred = unsafe { std::mem::zeroed() };
        let mut len = libc::socklen_t::try_from(std::mem::size_of::<libc::ucred>()).ok()?;

        // SAFETY: fd is a live socket owned by `stream`; cred/len point to valid memory.
        let result = unsafe {
            libc::getsockopt(
                fd,
                libc::SOL_SOCKET,
                libc::SO_PEERCRED,
                std::ptr::addr_of_mut!(cred).cast::<libc::c_void>(),
                &mut len,
            )
        };

        (result == 0).then_some(cred.uid)
    }

    #[cfg(not(target_os = "linux"))]
    fn peer_uid(stream: &UnixStream) -> Option<u32> {
        stream.peer_cred().ok().map(|cred| cred.uid())
    }

    fn our_uid() -> u32 {
        // SAFETY: getuid has no preconditions and cannot fail.
        unsafe { libc::getuid() }
    }

    /// Create the socket directory and remove a stale socket file
    fn prepare_socket(&self) -> Result<(), ServerError> {
        let prepare_err = |source| ServerError::Prepare {
            path: self.socket_path.clone(),
            source,
        };

        if let Some(parent) = self.socket_path.parent() {
            if !parent.exists() {
                std::fs::create_dir_all(parent).map_err(prepare_err)?;
                info!(path = ?parent, "Created socket directory");
            }
        }

        if self.socket_path.exists() {
            warn!(path = ?self.socket_path, "Removing stale socket file");
            std::fs::remove_file(&self.socket_path).map_err(prepare_err)?;
        }
        Ok(())
    }

    fn bind(&self) -> Result<UnixListener, ServerError> {
        self.prepare_socket()?;

        let listener = UnixListener::bind(&self.socket_path).map_err(|source| ServerError::Bind {
            path: self.socket_path.clone(),
            source,
        })?;

        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&self.socket_path, std::fs::Permissions::from_mode(0o600))
            .map_err(|source| ServerError::Permissions {
                path: self.socket_path.clone(),
                source,
            })?;

        info!(path = ?self.socket_path, "Listening for connections");
        Ok(listener)
    }

    /// Run until `shutdown` resolves or a surface asks to quit
    ///
    /// # Errors
    ///
    /// Socket setup failures and conductor start/shutdown failures.
    pub async fn run<B, F>(
        &mut self,
        mut conductor: Conductor<B>,
        shutdown: F,
    ) -> Result<(), ServerError>
    where
        B: StudioBackend + 'static,
        F: Future<Output = ()>,
    {
        let listener = self.bind()?;
        let (event_tx, mut event_rx) =
            mpsc::channel::<(ConnectionId, SurfaceEvent)>(self.server_config.event_capacity);

        conductor.start().await?;
        info!("Conductor started");

        let mut shutdown = std::pin::pin!(shutdown);
        loop {
            tokio::select! {
                () = &mut shutdown => {
                    info!("Shutdown requested");
                    break;
                }

                accepted = listener.accept() => match accepted {
                    Ok((stream, _addr)) => self.accept(stream, &conductor, &event_tx),
                    Err(e) => error!(error = %e, "Accept failed"),
                },

                Some((conn_id, event)) = event_rx.recv() => {
                    debug!(conn_id = %conn_id, event_id = %event.event_id().0, "Processing event");
                    if let Err(e) = conductor.handle_event(event).await {
                        warn!(conn_id = %conn_id, error = %e, "Failed to handle event");
                    }
                    if conductor.state() == ConductorState::ShuttingDown {
                        info!(conn_id = %conn_id, "Surface requested shutdown");
                        break;
                    }
                }

                wake = conductor.next_wake() => conductor.handle_wake(wake),
            }
        }

        if conductor.state() != ConductorState::ShuttingDown {
            conductor.shutdown().await?;
        }
        self.cleanup(conductor.surfaces()).await;
        Ok(())
    }

    /// Register and spawn a handler for a new peer
    fn accept<B: StudioBackend + 'static>(
        &self,
        stream: UnixStream,
        conductor: &Conductor<B>,
        event_tx: &mpsc::Sender<(ConnectionId, SurfaceEvent)>,
    ) {
        if self.connection_states.len() >= self.server_config.max_connections {
            warn!("Connection limit reached, rejecting new connection");
            return;
        }

        let peer_uid = Self::peer_uid(&stream);
        let our_uid = Self::our_uid();
        if peer_uid != Some(our_uid) {
            warn!(peer_uid = ?peer_uid, our_uid, "Rejecting connection from different user");
            return;
        }

        let (subscription, surface_rx) = conductor.subscribe(SurfaceType::Headless);
        let conn_id = subscription.id();

        info!(
            conn_id = %conn_id,
            active_connections = self.connection_states.len() + 1,
            "New connection accepted"
        );

        // The handler removes its own entry on exit, so it must not start
        // until the entry exists.
        let (registered_tx, registered_rx) = oneshot::channel();
        let task = tokio::spawn(
            handle_connection(
                stream,
                subscription,
                surface_rx,
                conductor.surfaces().clone(),
                event_tx.clone(),
                Arc::clone(&self.connection_states),
                registered_rx,
            )
            .instrument(tracing::info_span!("connection", %conn_id)),
        );

        self.connection_states.insert(
            conn_id,
            ConnectionState {
                connected_at: Instant::now(),
                peer_uid,
                task,
            },
        );
        let _ = registered_tx.send(());
    }

    /// Close every connection and remove the socket file
    ///
    /// Unregistering a surface drops its sender, so the handler writes what
    /// is still queued (the final `Quit` included) and exits on its own.
    async fn cleanup(&mut self, surfaces: &SurfaceRegistry) {
        let conn_ids: Vec<ConnectionId> = self.connection_states.iter().map(|r| *r.key()).collect();
        for conn_id in conn_ids {
            surfaces.unregister(&conn_id);
            let Some((_, mut state)) = self.connection_states.remove(&conn_id) else {
                continue;
            };
            info!(
                conn_id = %conn_id,
                peer_uid = ?state.peer_uid,
                uptime_secs = state.connected_at.elapsed().as_secs(),
                "Closing connection"
            );
            if tokio::time::timeout(DRAIN_TIMEOUT, &mut state.task).await.is_err() {
                warn!(conn_id = %conn_id, "Connection did not drain, aborting");
                state.task.abort();
            }
        }

        if self.socket_path.exists() {
            if let Err(e) = std::fs::remove_file(&self.socket_path) {
                warn!(error = %e, path = ?self.socket_path, "Failed to remove socket file");
            } else {
                info!(path = ?self.socket_path, "Socket file removed");
            }
        }
        info!("Shutdown complete");
    }
}

/// Pump frames between one peer and the conductor
///
/// Incoming `SurfaceEvent` frames go to the server loop; everything the
/// conductor broadcasts to this connection is written back as frames.
async fn handle_connection(
    stream: UnixStream,
    subscription: Subscription,
    mut surface_rx: mpsc::Receiver<ConductorMessage>,
    surfaces: SurfaceRegistry,
    event_tx: mpsc::Sender<(ConnectionId, SurfaceEvent)>,
    connection_states: Arc<DashMap<ConnectionId, ConnectionState>>,
    registered: oneshot::Receiver<()>,
) {
    let conn_id = subscription.id();
    let _ = registered.await;
    info!("Connection handler started");

    let (mut read_half, mut write_half) = stream.into_split();
    let mut decoder = FrameDecoder::new();
    let mut read_buf = vec![0u8; 8192];

    'conn: loop {
        tokio::select! {
            read = read_half.read(&mut read_buf) => match read {
                Ok(0) => {
                    info!("Client disconnected (EOF)");
                    break;
                }
                Ok(n) => {
                    decoder.push(&read_buf[..n]);
                    loop {
                        match decoder.decode::<SurfaceEvent>() {
                            Ok(Some(event)) => {
                                if let SurfaceEvent::Connected { surface_type, .. } = &event {
                                    surfaces.update_surface_type(&conn_id, surface_type.clone());
                                }
                                if event_tx.send((conn_id, event)).await.is_err() {
                                    debug!("Server loop gone");
                                    break 'conn;
                                }
                            }
                            Ok(None) => break,
                            Err(TransportError::FrameTooLarge { size, max }) => {
                                warn!(size, max, "Oversized frame, closing connection");
                                break 'conn;
                            }
                            Err(e) => warn!(error = %e, "Dropping bad event frame"),
                        }
                    }
                }
                Err(e) => {
                    error!(error = %e, "Read error");
                    break;
                }
            },

            msg = surface_rx.recv() => match msg {
                Some(message) => {
                    let write = write_frame(&mut write_half, &message);
                    match tokio::time::timeout(WRITE_TIMEOUT, write).await {
                        Ok(Ok(())) => {}
                        Ok(Err(e)) => {
                            error!(error = %e, "Write error");
                            break;
                        }
                        Err(_) => {
                            warn!("Peer stopped reading, closing connection");
                            break;
                        }
                    }
                }
                None => {
                    info!("Surface channel closed");
                    break;
                }
            },
        }
    }

    drop(subscription);
    connection_states.remove(&conn_id);
    info!(
        active_connections = connection_states.len(),
        "Connection handler finished"
    );
}
