//! tunfab relay hub — routes raw packets between registered endpoints.
//!
//! The hub accepts WebSocket connections from endpoint agents, binds each
//! connection to the virtual address it registers, and forwards `tx:` frames
//! to the connection registered for the destination address as `rx:` frames.
//!
//! - **RelayHub**: listener, accept loop and per-connection handling
//! - **RouteTable**: live virtual address → connection mapping

pub mod hub;
pub mod routes;

pub use hub::{HubError, RelayHub};
pub use routes::{ConnHandle, RouteTable};
