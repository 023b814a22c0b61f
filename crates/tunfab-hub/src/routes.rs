//! Route table — tracks which connection owns each virtual address.
//!
//! The table is the hub's only shared state. Entries are ephemeral: created
//! on `register:`, removed when the owning connection closes. The hub must
//! never leave an entry pointing at a closed connection, so removal is keyed
//! by connection id — a late cleanup from an overwritten connection cannot
//! evict a newer registration for the same address.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;

/// Handle to one live connection's outbound queue.
///
/// Frames pushed here are drained by the connection's writer task in order,
/// so forwards from other connections and the hub's own acks share a single
/// ordered path to the socket.
#[derive(Debug, Clone)]
pub struct ConnHandle {
    id: u64,
    sender: mpsc::UnboundedSender<Message>,
}

impl ConnHandle {
    /// Create a handle for the connection `id` draining into `sender`.
    pub fn new(id: u64, sender: mpsc::UnboundedSender<Message>) -> Self {
        Self { id, sender }
    }

    /// Hub-internal connection id.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Queue a message for this connection. Fails only when the writer task
    /// is gone, i.e. the connection is already closing.
    pub fn send(&self, msg: Message) -> Result<(), mpsc::error::SendError<Message>> {
        self.sender.send(msg)
    }
}

/// Thread-safe mapping from virtual address to live connection.
#[derive(Debug, Clone, Default)]
pub struct RouteTable {
    routes: Arc<RwLock<HashMap<String, ConnHandle>>>,
}

impl RouteTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `addr` to `handle`, overwriting any prior entry for that address.
    /// Last registration wins; a prior connection registered under `addr` is
    /// left open but becomes unreachable by address.
    pub fn upsert(&self, addr: String, handle: ConnHandle) {
        let mut routes = self.routes.write().unwrap_or_else(|e| e.into_inner());
        routes.insert(addr, handle);
    }

    /// Look up the connection registered for `addr`.
    pub fn lookup(&self, addr: &str) -> Option<ConnHandle> {
        let routes = self.routes.read().unwrap_or_else(|e| e.into_inner());
        routes.get(addr).cloned()
    }

    /// Remove the entry for `addr` if it still belongs to connection
    /// `conn_id`. Returns whether an entry was removed.
    pub fn remove_if(&self, addr: &str, conn_id: u64) -> bool {
        let mut routes = self.routes.write().unwrap_or_else(|e| e.into_inner());
        match routes.get(addr) {
            Some(handle) if handle.id == conn_id => {
                routes.remove(addr);
                true
            }
            _ => false,
        }
    }

    /// Number of registered addresses.
    pub fn len(&self) -> usize {
        let routes = self.routes.read().unwrap_or_else(|e| e.into_inner());
        routes.len()
    }

    /// Whether no address is registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
