//! tunfab endpoint agent — pumps packets between a local virtual interface
//! and the relay hub.
//!
//! The agent owns one packet interface and one WebSocket channel to the hub.
//! After registering its virtual address it runs two duties until the channel
//! fails: egress (interface → hub) and ingress (hub → interface), then
//! reconnects after a fixed delay. This loop never terminates.
//!
//! - **PacketInterface**: the narrow read/write seam to the device layer
//! - **TunInterface** / **MemoryInterface**: TUN-backed and in-memory adapters
//! - **EndpointAgent**: the connect/register/relay state machine

pub mod agent;
pub mod iface;

pub use agent::{AgentConfig, AgentError, EndpointAgent, DEFAULT_RECONNECT_DELAY};
pub use iface::{MemoryInterface, PacketInterface, TunInterface};
