//! Raw packet inspection.
//!
//! Packets are opaque IP-framed byte sequences; the relay only ever needs the
//! destination address, which sits at a fixed offset in the IPv4 header.

/// Offset of the destination address within an IPv4 header.
const IPV4_DEST_OFFSET: usize = 16;

/// Derive the dotted-quad destination address from an IPv4 packet.
///
/// Returns `None` for packets too short to carry an IPv4 header; no other
/// validation is performed.
pub fn dest_addr(packet: &[u8]) -> Option<String> {
    let dest = packet.get(IPV4_DEST_OFFSET..IPV4_DEST_OFFSET + 4)?;
    Some(format!("{}.{}.{}.{}", dest[0], dest[1], dest[2], dest[3]))
}
