//! Packet interface adapters.
//!
//! [`PacketInterface`] is the boundary to the device layer: read one queued
//! outbound packet without blocking, or inject one inbound packet. Device
//! creation happens once, before the interface is handed to the agent.

use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::net::Ipv4Addr;
use std::os::fd::AsRawFd;
use std::sync::Mutex;
use tunfab_wire::MAX_PACKET_SIZE;

/// A local virtual network interface, as seen by the endpoint agent.
pub trait PacketInterface: Send + Sync {
    /// Read one outbound raw packet if one is queued. Must never block the
    /// calling loop, not even transiently.
    fn try_read(&self) -> io::Result<Option<Vec<u8>>>;

    /// Write one inbound raw packet to the interface.
    fn write(&self, packet: &[u8]) -> io::Result<()>;
}

/// A TUN device in non-blocking mode.
///
/// Requires root (or CAP_NET_ADMIN) to create.
pub struct TunInterface {
    device: Mutex<tun::Device>,
}

impl TunInterface {
    /// Create and bring up a TUN device with the given name and address.
    pub fn create(name: &str, addr: Ipv4Addr, netmask: Ipv4Addr, mtu: u16) -> io::Result<Self> {
        let mut config = tun::Configuration::default();
        config
            .tun_name(name)
            .address(addr)
            .netmask(netmask)
            .mtu(mtu)
            .up();

        let device = tun::create(&config).map_err(io::Error::other)?;
        set_nonblocking(device.as_raw_fd())?;

        Ok(Self {
            device: Mutex::new(device),
        })
    }
}

impl PacketInterface for TunInterface {
    fn try_read(&self) -> io::Result<Option<Vec<u8>>> {
        let mut buf = [0u8; MAX_PACKET_SIZE];
        let mut device = self.device.lock().unwrap_or_else(|e| e.into_inner());
        match device.read(&mut buf) {
            Ok(0) => Ok(None),
            Ok(n) => Ok(Some(buf[..n].to_vec())),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn write(&self, packet: &[u8]) -> io::Result<()> {
        let mut device = self.device.lock().unwrap_or_else(|e| e.into_inner());
        device.write_all(packet)
    }
}

/// Put a descriptor in non-blocking mode so reads return `WouldBlock`
/// instead of parking the egress loop.
fn set_nonblocking(fd: std::os::fd::RawFd) -> io::Result<()> {
    // SAFETY: fcntl on a descriptor we own and know to be open.
    unsafe {
        let flags = libc::fcntl(fd, libc::F_GETFL);
        if flags < 0 {
            return Err(io::Error::last_os_error());
        }
        if libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) < 0 {
            return Err(io::Error::last_os_error());
        }
    }
    Ok(())
}

/// In-memory interface for tests and loopback experiments.
///
/// `queue_outbound` plays the role of the OS handing the device a packet;
/// `take_inbound` collects what the agent wrote back.
#[derive(Debug, Default)]
pub struct MemoryInterface {
    outbound: Mutex<VecDeque<Vec<u8>>>,
    inbound: Mutex<Vec<Vec<u8>>>,
}

impl MemoryInterface {
    /// Create an empty interface.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a packet for the agent's egress duty to pick up.
    pub fn queue_outbound(&self, packet: Vec<u8>) {
        let mut outbound = self.outbound.lock().unwrap_or_else(|e| e.into_inner());
        outbound.push_back(packet);
    }

    /// Drain every packet the agent has written to the interface so far.
    pub fn take_inbound(&self) -> Vec<Vec<u8>> {
        let mut inbound = self.inbound.lock().unwrap_or_else(|e| e.into_inner());
        std::mem::take(&mut *inbound)
    }
}

impl PacketInterface for MemoryInterface {
    fn try_read(&self) -> io::Result<Option<Vec<u8>>> {
        let mut outbound = self.outbound.lock().unwrap_or_else(|e| e.into_inner());
        Ok(outbound.pop_front())
    }

    fn write(&self, packet: &[u8]) -> io::Result<()> {
        let mut inbound = self.inbound.lock().unwrap_or_else(|e| e.into_inner());
        inbound.push(packet.to_vec());
        Ok(())
    }
}
