use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::client::{spawn_connection, ClientRegistry, ConnectionOptions, Delivery};
use crate::error::{BroadcasterError, Result};
use crate::transport::Framing;

/// Broadcast server tuning
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerOptions {
    /// Interface to listen on
    pub host: IpAddr,

    /// Message framing on client connections
    pub framing: Framing,

    /// Messages buffered between producers and the fan-out task
    pub handoff_capacity: usize,

    /// Messages buffered per client
    pub client_queue_capacity: usize,

    /// How long a client's queue may stay backed up without a completed
    /// write before the client is evicted (milliseconds)
    pub stall_timeout_ms: u64,

    /// Write timeout per message (milliseconds)
    pub write_timeout_ms: u64,

    /// WebSocket handshake timeout (milliseconds)
    pub handshake_timeout_ms: u64,

    /// How often the accept loop re-checks the running state (milliseconds)
    pub accept_poll_ms: u64,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            host: IpAddr::from([0, 0, 0, 0]),
            framing: Framing::default(),
            handoff_capacity: 1024,
            client_queue_capacity: 256,
            stall_timeout_ms: 5_000,
            write_timeout_ms: 5_000,
            handshake_timeout_ms: 5_000,
            accept_poll_ms: 1_000,
        }
    }
}

impl ServerOptions {
    fn connection_options(&self) -> ConnectionOptions {
        ConnectionOptions {
            framing: self.framing,
            queue_capacity: self.client_queue_capacity,
            write_timeout: Duration::from_millis(self.write_timeout_ms),
            handshake_timeout: Duration::from_millis(self.handshake_timeout_ms),
        }
    }
}

/// Lifecycle of the listening endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    Stopped,
    Starting,
    Running,
    Stopping,
}

#[derive(Default)]
struct Lifecycle {
    local_addr: Option<SocketAddr>,
    shutdown: Option<watch::Sender<bool>>,
    accept_task: Option<JoinHandle<()>>,
    fanout_task: Option<JoinHandle<()>>,
}

struct Shared {
    state: Mutex<ServerState>,
    handoff: Mutex<Option<mpsc::Sender<Bytes>>>,
    dropped: AtomicU64,
}

impl Shared {
    fn state(&self) -> MutexGuard<'_, ServerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn handoff(&self) -> MutexGuard<'_, Option<mpsc::Sender<Bytes>>> {
        self.handoff.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The accept loop failed; stop taking messages but leave clients connected
    fn accept_failed(&self) {
        self.set_state(ServerState::Stopped);
        self.handoff().take();
    }

    fn set_state(&self, next: ServerState) {
        let mut state = self.state();
        if *state != next {
            tracing::debug!("Broadcast server {:?} -> {:?}", *state, next);
            *state = next;
        }
    }
}

/// TCP fan-out server for encoded sighting messages.
///
/// Producers call [`broadcast`](Self::broadcast) from any thread; the call
/// only enqueues. A fan-out task copies each message into every client's
/// bounded queue and per-client tasks perform the socket writes.
pub struct BroadcastServer {
    options: ServerOptions,
    registry: ClientRegistry,
    shared: Arc<Shared>,
    lifecycle: tokio::sync::Mutex<Lifecycle>,
}

impl BroadcastServer {
    pub fn new(options: ServerOptions) -> Self {
        Self {
            options,
            registry: ClientRegistry::new(),
            shared: Arc::new(Shared {
                state: Mutex::new(ServerState::Stopped),
                handoff: Mutex::new(None),
                dropped: AtomicU64::new(0),
            }),
            lifecycle: tokio::sync::Mutex::new(Lifecycle::default()),
        }
    }

    pub fn options(&self) -> &ServerOptions {
        &self.options
    }

    /// Bind `port` and begin accepting clients.
    ///
    /// Returns the bound address. Calling it while already running returns
    /// the existing address without binding again.
    pub async fn start(&self, port: u16) -> Result<SocketAddr> {
        let mut lifecycle = self.lifecycle.lock().await;
        if let Some(addr) = lifecycle.local_addr {
            if *self.shared.state() == ServerState::Running {
                tracing::debug!("Broadcast server already running on {}", addr);
                return Ok(addr);
            }
            // Accept loop died on its own; clear the leftovers before rebinding.
            self.teardown(&mut lifecycle).await;
        }

        self.shared.set_state(ServerState::Starting);
        let addr = SocketAddr::new(self.options.host, port);
        let listener = match TcpListener::bind(addr).await {
            Ok(listener) => listener,
            Err(source) => {
                self.shared.set_state(ServerState::Stopped);
                return Err(BroadcasterError::Bind { addr, source });
            }
        };
        let local_addr = listener.local_addr()?;

        let (handoff_tx, handoff_rx) = mpsc::channel(self.options.handoff_capacity.max(1));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        lifecycle.fanout_task = Some(tokio::spawn(fan_out(
            self.registry.clone(),
            handoff_rx,
            Duration::from_millis(self.options.stall_timeout_ms),
        )));
        lifecycle.accept_task = Some(tokio::spawn(accept_loop(
            listener,
            self.registry.clone(),
            Arc::clone(&self.shared),
            shutdown_rx,
            self.options.connection_options(),
            Duration::from_millis(self.options.accept_poll_ms.max(1)),
        )));
        lifecycle.shutdown = Some(shutdown_tx);
        lifecycle.local_addr = Some(local_addr);

        *self.shared.handoff() = Some(handoff_tx);
        self.shared.set_state(ServerState::Running);

        tracing::info!("Broadcast server started on {} ({} framing)", local_addr, self.options.framing);
        Ok(local_addr)
    }

    /// Stop accepting, close every client and release the port.
    ///
    /// No-op when the server is not running. After this returns no client
    /// socket is written again.
    pub async fn stop(&self) {
        let mut lifecycle = self.lifecycle.lock().await;
        if lifecycle.local_addr.is_none() {
            return;
        }
        self.teardown(&mut lifecycle).await;
        tracing::info!("Broadcast server stopped");
    }

    async fn teardown(&self, lifecycle: &mut Lifecycle) {
        self.shared.set_state(ServerState::Stopping);
        self.shared.handoff().take();

        if let Some(shutdown) = lifecycle.shutdown.take() {
            let _ = shutdown.send(true);
        }
        if let Some(task) = lifecycle.accept_task.take() {
            // The loop sees the shutdown signal at its next await point.
            let _ = task.await;
        }
        if let Some(task) = lifecycle.fanout_task.take() {
            task.abort();
            let _ = task.await;
        }

        let clients = self.registry.drain();
        let count = clients.len();
        for client in clients {
            client.close().await;
        }
        if count > 0 {
            tracing::info!("Closed {} client(s)", count);
        }

        lifecycle.local_addr = None;
        self.shared.set_state(ServerState::Stopped);
    }

    /// Queue `message` for every connected client.
    ///
    /// Never blocks. Silently ignored unless the server is running; dropped
    /// (and counted) when the hand-off queue is full.
    pub fn broadcast(&self, message: Bytes) {
        let handoff = self.shared.handoff();
        let Some(tx) = handoff.as_ref() else {
            return;
        };
        match tx.try_send(message) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                let dropped = self.shared.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                tracing::warn!("Broadcast queue full, dropping message (total dropped: {})", dropped);
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                tracing::debug!("Broadcast queue closed, message ignored");
            }
        }
    }

    pub fn state(&self) -> ServerState {
        *self.shared.state()
    }

    pub fn is_running(&self) -> bool {
        self.state() == ServerState::Running
    }

    /// Bound address while running
    pub async fn local_addr(&self) -> Option<SocketAddr> {
        let lifecycle = self.lifecycle.lock().await;
        lifecycle.local_addr.filter(|_| self.is_running())
    }

    /// Get current client count
    pub fn client_count(&self) -> usize {
        self.registry.len()
    }

    /// Messages dropped because the hand-off queue was full
    pub fn dropped_messages(&self) -> u64 {
        self.shared.dropped.load(Ordering::Relaxed)
    }
}

impl Default for BroadcastServer {
    fn default() -> Self {
        Self::new(ServerOptions::default())
    }
}

async fn accept_loop(
    listener: TcpListener,
    registry: ClientRegistry,
    shared: Arc<Shared>,
    mut shutdown: watch::Receiver<bool>,
    options: ConnectionOptions,
    poll_interval: Duration,
) {
    loop {
        let state = *shared.state();
        if *shutdown.borrow() || !matches!(state, ServerState::Starting | ServerState::Running) {
            break;
        }

        tokio::select! {
            _ = shutdown.changed() => break,
            accepted = tokio::time::timeout(poll_interval, listener.accept()) => {
                match accepted {
                    Err(_) => continue,
                    Ok(Ok((stream, peer))) => {
                        tracing::info!("New client connection accepted from {}", peer);
                        spawn_connection(&registry, stream, peer, options);
                    }
                    Ok(Err(e)) => {
                        tracing::error!("Failed to accept client: {}", e);
                        shared.accept_failed();
                        break;
                    }
                }
            }
        }
    }
    tracing::info!("Client acceptance task stopped");
}

async fn fan_out(registry: ClientRegistry, mut handoff: mpsc::Receiver<Bytes>, stall_timeout: Duration) {
    while let Some(message) = handoff.recv().await {
        registry.for_each(|client| match client.try_deliver(message.clone()) {
            Delivery::Queued => {}
            Delivery::Lagged { dropped, stalled } if stalled > stall_timeout => {
                tracing::warn!(
                    "Evicting slow client {}: no write completed in {:?} ({} dropped)",
                    client.peer(),
                    stalled,
                    dropped
                );
                if let Some(evicted) = registry.remove(client.id()) {
                    evicted.abort();
                }
            }
            Delivery::Lagged { dropped, .. } => {
                tracing::debug!("Client {} lagging ({} dropped)", client.id(), dropped);
            }
            Delivery::Closed => {
                drop(registry.remove(client.id()));
            }
        });
    }
    tracing::debug!("Fan-out task stopped");
}
