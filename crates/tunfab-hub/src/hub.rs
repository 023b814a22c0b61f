//! RelayHub — WebSocket listener and per-connection packet forwarding.
//!
//! Each accepted connection gets a reader loop plus a writer task draining an
//! outbound queue. The reader processes frames strictly in arrival order;
//! connections are otherwise independent. When a connection closes, its route
//! entry is purged before the connection task finishes, so no later lookup
//! can route a packet to a dead connection.

use crate::routes::{ConnHandle, RouteTable};

use futures::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};
use tunfab_wire::Frame;

/// Errors from the relay hub.
#[derive(Debug, Error)]
pub enum HubError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("WebSocket error: {0}")]
    Ws(#[from] tokio_tungstenite::tungstenite::Error),
}

/// The central relay — accepts agent connections and forwards packets
/// between them by virtual address.
pub struct RelayHub {
    routes: RouteTable,
    /// Actual bound address (useful when binding to port 0).
    local_addr: SocketAddr,
    next_conn_id: AtomicU64,
}

impl RelayHub {
    /// Bind `listen_addr` and start accepting connections.
    pub async fn start(
        listen_addr: SocketAddr,
    ) -> Result<(Arc<Self>, tokio::task::JoinHandle<()>), HubError> {
        let listener = TcpListener::bind(listen_addr).await?;
        let local_addr = listener.local_addr()?;

        info!("relay hub listening on {}", local_addr);

        let hub = Arc::new(Self {
            routes: RouteTable::new(),
            local_addr,
            next_conn_id: AtomicU64::new(1),
        });

        let hub_clone = Arc::clone(&hub);
        let accept_handle = tokio::spawn(async move {
            Self::accept_loop(listener, hub_clone).await;
        });

        Ok((hub, accept_handle))
    }

    /// Get the actual bound address.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Get a reference to the route table.
    pub fn routes(&self) -> &RouteTable {
        &self.routes
    }

    /// Internal accept loop — runs in a spawned task.
    async fn accept_loop(listener: TcpListener, hub: Arc<RelayHub>) {
        loop {
            match listener.accept().await {
                Ok((stream, addr)) => {
                    debug!("accepted connection from {}", addr);
                    let hub = Arc::clone(&hub);
                    tokio::spawn(async move {
                        if let Err(e) = hub.handle_connection(stream, addr).await {
                            debug!("connection from {} ended: {}", addr, e);
                        }
                    });
                }
                Err(e) => {
                    error!("accept error: {}", e);
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            }
        }
    }

    /// Handle one agent connection for its whole lifetime.
    async fn handle_connection(
        &self,
        stream: TcpStream,
        addr: SocketAddr,
    ) -> Result<(), HubError> {
        let ws = tokio_tungstenite::accept_async(stream).await?;
        let conn_id = self.next_conn_id.fetch_add(1, Ordering::Relaxed);
        let (mut ws_tx, mut ws_rx) = ws.split();

        // Writer task: single ordered path to the socket, fed by this reader
        // (acks) and by other connections forwarding packets here.
        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Message>();
        let writer = tokio::spawn(async move {
            while let Some(msg) = out_rx.recv().await {
                if let Err(e) = ws_tx.send(msg).await {
                    debug!("connection {}: write failed: {}", conn_id, e);
                    break;
                }
            }
            let _ = ws_tx.close().await;
        });

        let handle = ConnHandle::new(conn_id, out_tx);
        // The address most recently registered on this connection.
        let mut registered: Option<String> = None;

        while let Some(msg) = ws_rx.next().await {
            let msg = match msg {
                Ok(m) => m,
                Err(e) => {
                    debug!("connection {}: channel error: {}", conn_id, e);
                    break;
                }
            };
            let text = match msg {
                Message::Text(t) => t,
                Message::Close(_) => break,
                // Ping/pong are answered by tungstenite; binary is not part
                // of the protocol.
                _ => continue,
            };

            match Frame::decode(&text) {
                Ok(Frame::Register { addr: virtual_addr }) => {
                    info!("registered {} on connection {}", virtual_addr, conn_id);
                    self.routes.upsert(virtual_addr.clone(), handle.clone());
                    // A connection holds at most one address: a re-register
                    // under a new address releases the old one.
                    if let Some(prev) = registered.replace(virtual_addr.clone()) {
                        if prev != virtual_addr {
                            self.routes.remove_if(&prev, conn_id);
                        }
                    }
                    let ack = Frame::Registered { addr: virtual_addr };
                    if handle.send(Message::Text(ack.encode())).is_err() {
                        break;
                    }
                }
                Ok(Frame::Tx { dest, payload }) => match self.routes.lookup(&dest) {
                    Some(peer) => {
                        let forward = Frame::Rx { payload };
                        if peer.send(Message::Text(forward.encode())).is_err() {
                            // Peer is closing but not yet purged; drop, never
                            // surface the failure to the sender.
                            warn!("forward to {} failed: connection closing", dest);
                        }
                    }
                    None => {
                        debug!("no route for {}, dropping packet", dest);
                    }
                },
                Ok(frame) => {
                    warn!(
                        "connection {}: unexpected {:?} frame from agent, dropping",
                        conn_id, frame
                    );
                }
                Err(e) => {
                    warn!("connection {}: dropping malformed message: {}", conn_id, e);
                }
            }
        }

        // Purge the route before this task ends: after the connection is
        // observed closed, no lookup may still reach it.
        if let Some(virtual_addr) = registered {
            if self.routes.remove_if(&virtual_addr, conn_id) {
                info!(
                    "unregistered {} (connection {} closed)",
                    virtual_addr, conn_id
                );
            }
        }
        writer.abort();
        debug!("connection {} from {} closed", conn_id, addr);

        Ok(())
    }
}
