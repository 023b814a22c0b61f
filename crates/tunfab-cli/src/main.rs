//! tunfab CLI — run a relay hub or an endpoint agent.
//!
//! Device creation (the one privileged step) happens here, before the agent
//! takes over; everything after setup recovers on its own.

mod cli;

use anyhow::Context;
use clap::Parser;
use cli::{Cli, Commands};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tunfab_agent::{AgentConfig, EndpointAgent, TunInterface};
use tunfab_hub::RelayHub;

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();

    match cli.command {
        Commands::Hub { listen } => {
            let (_hub, accept) = RelayHub::start(listen)
                .await
                .context("failed to start relay hub")?;
            accept.await?;
        }
        Commands::Agent {
            hub,
            addr,
            ifname,
            netmask,
            mtu,
            reconnect_secs,
        } => {
            url::Url::parse(&hub).context("invalid hub URL")?;

            let iface = TunInterface::create(&ifname, addr, netmask, mtu)
                .with_context(|| format!("failed to create TUN device {ifname}"))?;
            info!("interface {} is up with address {}", ifname, addr);

            let mut config = AgentConfig::new(hub, addr.to_string());
            config.reconnect_delay = Duration::from_secs(reconnect_secs);

            EndpointAgent::new(config, Arc::new(iface)).run().await;
        }
    }

    Ok(())
}
