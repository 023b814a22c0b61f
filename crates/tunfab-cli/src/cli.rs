//! Clap CLI definitions for tunfab.

use clap::{Parser, Subcommand};
use std::net::{Ipv4Addr, SocketAddr};

/// tunfab — a virtual point-to-point network fabric.
#[derive(Parser)]
#[command(
    name = "tunfab",
    version,
    about = "tunfab — relay raw IP packets between virtual interfaces",
    long_about = "tunfab — relay raw IP packets between virtual interfaces.\n\n\
                  Each endpoint runs an agent attached to a local TUN device; a\n\
                  central hub forwards packets between endpoints by virtual IP."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the relay hub.
    Hub {
        /// Address and port to listen on.
        #[arg(long, default_value = "0.0.0.0:9100")]
        listen: SocketAddr,
    },
    /// Run an endpoint agent attached to a local TUN device.
    Agent {
        /// WebSocket URL of the relay hub (e.g. ws://relay.example.com:9100).
        #[arg(long)]
        hub: String,
        /// Virtual IPv4 address of this endpoint.
        #[arg(long)]
        addr: Ipv4Addr,
        /// Name of the TUN device to create.
        #[arg(long, default_value = "tun0")]
        ifname: String,
        /// Netmask for the TUN device.
        #[arg(long, default_value = "255.255.255.0")]
        netmask: Ipv4Addr,
        /// Interface MTU.
        #[arg(long, default_value_t = 1500)]
        mtu: u16,
        /// Seconds to wait before reconnecting after a channel failure.
        #[arg(long, default_value_t = 5)]
        reconnect_secs: u64,
    },
}
