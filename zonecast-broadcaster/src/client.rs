use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use bytes::Bytes;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::{BroadcasterError, Result};
use crate::events::ClientMessage;
use crate::transport::{self, Framing, Inbound, Reader, Writer};

pub type ClientId = u64;

/// Result of handing a message to one client's queue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Queued,
    /// Queue full; the message was dropped for this client.
    ///
    /// `stalled` is how long the client has gone without completing a write
    /// since its first drop.
    Lagged { dropped: usize, stalled: Duration },
    /// Connection task has finished
    Closed,
}

/// Drop bookkeeping shared by the fan-out task and one connection task
#[derive(Debug)]
pub(crate) struct Backlog {
    epoch: Instant,
    dropped: AtomicUsize,
    /// Milliseconds after `epoch`, plus one, of the first drop since the last write; zero when caught up
    stalled_since: AtomicU64,
}

impl Backlog {
    pub(crate) fn new() -> Self {
        Self {
            epoch: Instant::now(),
            dropped: AtomicUsize::new(0),
            stalled_since: AtomicU64::new(0),
        }
    }

    fn now(&self) -> u64 {
        u64::try_from(self.epoch.elapsed().as_millis()).unwrap_or(u64::MAX - 1) + 1
    }

    fn record_drop(&self) -> Delivery {
        let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
        let now = self.now();
        let since = match self.stalled_since.compare_exchange(0, now, Ordering::AcqRel, Ordering::Acquire) {
            Ok(_) => now,
            Err(first) => first,
        };
        Delivery::Lagged {
            dropped,
            stalled: Duration::from_millis(now.saturating_sub(since)),
        }
    }

    fn record_write(&self) {
        self.dropped.store(0, Ordering::Relaxed);
        self.stalled_since.store(0, Ordering::Release);
    }
}

/// Cloneable sending side of one connected client
#[derive(Clone, Debug)]
pub struct ClientHandle {
    id: ClientId,
    peer: SocketAddr,
    tx: mpsc::Sender<Bytes>,
    backlog: Arc<Backlog>,
}

impl ClientHandle {
    pub fn id(&self) -> ClientId {
        self.id
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Queue a message without waiting
    pub fn try_deliver(&self, message: Bytes) -> Delivery {
        match self.tx.try_send(message) {
            Ok(()) => Delivery::Queued,
            Err(mpsc::error::TrySendError::Full(_)) => self.backlog.record_drop(),
            Err(mpsc::error::TrySendError::Closed(_)) => Delivery::Closed,
        }
    }
}

struct Entry {
    handle: ClientHandle,
    task: JoinHandle<()>,
}

/// Connection removed from the registry
pub struct RemovedClient {
    pub handle: ClientHandle,
    task: JoinHandle<()>,
}

impl RemovedClient {
    /// Cancel the connection task without waiting; its socket closes when the task is dropped
    pub fn abort(self) {
        self.task.abort();
    }

    /// Abort the connection task and wait for it, closing its socket
    pub async fn close(self) {
        self.task.abort();
        let _ = self.task.await;
    }
}

/// Thread-safe set of live clients.
///
/// Each critical section is a single map operation; iteration works on a
/// snapshot so callbacks may remove members while it runs.
#[derive(Clone, Default)]
pub struct ClientRegistry {
    clients: Arc<Mutex<HashMap<ClientId, Entry>>>,
    next_id: Arc<AtomicU64>,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<ClientId, Entry>> {
        self.clients.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn allocate_id(&self) -> ClientId {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Register a client, spawning its connection task under the lock.
    ///
    /// A task that finishes at once can only remove itself after it was added.
    pub(crate) fn add(&self, handle: ClientHandle, spawn: impl FnOnce() -> JoinHandle<()>) {
        let (id, peer) = (handle.id, handle.peer);
        let total = {
            let mut clients = self.lock();
            let task = spawn();
            clients.insert(id, Entry { handle, task });
            clients.len()
        };
        tracing::info!("Client {} ({}) added. Total: {}", id, peer, total);
    }

    /// Remove a client; removing an absent client is a no-op
    pub fn remove(&self, id: ClientId) -> Option<RemovedClient> {
        let (entry, remaining) = {
            let mut clients = self.lock();
            let entry = clients.remove(&id);
            (entry, clients.len())
        };
        let entry = entry?;
        tracing::info!("Removed client {} ({}). Remaining: {}", id, entry.handle.peer, remaining);
        Some(RemovedClient { handle: entry.handle, task: entry.task })
    }

    /// Visit every client present when the call started
    pub fn for_each(&self, mut f: impl FnMut(&ClientHandle)) {
        let snapshot: Vec<ClientHandle> = self.lock().values().map(|e| e.handle.clone()).collect();
        for handle in &snapshot {
            f(handle);
        }
    }

    /// Remove and return every client
    pub fn drain(&self) -> Vec<RemovedClient> {
        self.lock()
            .drain()
            .map(|(_, e)| RemovedClient { handle: e.handle, task: e.task })
            .collect()
    }

    /// Get current client count
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Per-connection settings
#[derive(Debug, Clone, Copy)]
pub(crate) struct ConnectionOptions {
    pub framing: Framing,
    pub queue_capacity: usize,
    pub write_timeout: Duration,
    pub handshake_timeout: Duration,
}

/// Spawn the task that owns `stream` and register it
pub(crate) fn spawn_connection(
    registry: &ClientRegistry,
    stream: TcpStream,
    peer: SocketAddr,
    options: ConnectionOptions,
) -> ClientId {
    let (tx, rx) = mpsc::channel(options.queue_capacity.max(1));
    let backlog = Arc::new(Backlog::new());
    let handle = ClientHandle {
        id: registry.allocate_id(),
        peer,
        tx,
        backlog: Arc::clone(&backlog),
    };
    let id = handle.id;

    let owner = registry.clone();
    registry.add(handle, move || tokio::spawn(run_connection(owner, id, stream, peer, rx, backlog, options)));
    id
}

async fn run_connection(
    registry: ClientRegistry,
    id: ClientId,
    stream: TcpStream,
    peer: SocketAddr,
    rx: mpsc::Receiver<Bytes>,
    backlog: Arc<Backlog>,
    options: ConnectionOptions,
) {
    match transport::establish(stream, options.framing, options.handshake_timeout).await {
        Ok((reader, writer)) => {
            if let Err(e) = serve(id, reader, writer, rx, &backlog, options.write_timeout).await {
                tracing::warn!("Client {} ({}) failed: {}", id, peer, e);
            }
        }
        Err(e) => tracing::warn!("Client {} ({}) handshake failed: {}", id, peer, e),
    }
    // Dropping the removed entry only detaches this task's handle.
    drop(registry.remove(id));
}

async fn serve(
    id: ClientId,
    mut reader: Reader,
    mut writer: Writer,
    mut rx: mpsc::Receiver<Bytes>,
    backlog: &Backlog,
    write_timeout: Duration,
) -> Result<()> {
    loop {
        tokio::select! {
            message = rx.recv() => {
                let Some(message) = message else {
                    // Removed from the registry
                    writer.close().await;
                    return Ok(());
                };
                tokio::time::timeout(write_timeout, writer.send(&message))
                    .await
                    .map_err(|_| BroadcasterError::WriteTimeout(write_timeout))??;
                backlog.record_write();
            }
            inbound = reader.next() => {
                match inbound? {
                    Inbound::Closed => {
                        tracing::info!("Client {} disconnected", id);
                        return Ok(());
                    }
                    Inbound::Text(text) => match ClientMessage::parse(&text) {
                        Some(ClientMessage::Subscribe { user_id }) => {
                            tracing::info!("Client {} subscribed (user: {})", id, user_id.as_deref().unwrap_or("-"));
                        }
                        None => tracing::debug!("Ignoring {} bytes from client {}", text.len(), id),
                    },
                }
            }
        }
    }
}
