//! tunfab wire protocol — framing for the packet relay channel.
//!
//! Every message between an endpoint agent and the relay hub is a single
//! WebSocket text message holding one colon-delimited frame. Packet bytes are
//! hex-encoded for transport safety over the text channel.
//!
//! ## Frames
//!
//! - `register:<addr>` — agent declares its virtual address
//! - `registered:<addr>` — hub acknowledgement (informational only)
//! - `tx:<dest>:<hex>` — agent asks the hub to deliver a packet
//! - `rx:<hex>` — hub delivers a packet to the registered destination

pub mod frame;
pub mod packet;

pub use frame::{Frame, WireError, MAX_PACKET_SIZE};
pub use packet::dest_addr;
