//! EndpointAgent — the connect/register/relay state machine.
//!
//! Per connection attempt: Connecting → Registered → Relaying → Closed or
//! Failed. The relay phase runs two duties that progress independently: the
//! egress task owns the channel's sink half, the ingress loop owns the
//! stream half, so a stall in one direction never blocks the other. Channel
//! closure is the only cancellation signal and terminates both.

use crate::iface::PacketInterface;

use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};
use tunfab_wire::{dest_addr, Frame};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;
type WsSource = SplitStream<WsStream>;

/// Delay between reconnect attempts. Fixed, not exponential — matches the
/// channel's expected failure mode (relay restart) where backing off further
/// only prolongs the outage.
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// How long the egress duty sleeps when the interface has nothing queued.
const READ_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Errors from one connection attempt.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("WebSocket error: {0}")]
    Ws(#[from] tokio_tungstenite::tungstenite::Error),
}

/// Configuration for an endpoint agent.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// WebSocket URL of the relay hub.
    pub hub_url: String,
    /// Virtual address this endpoint registers under.
    pub virtual_addr: String,
    /// Delay between reconnect attempts.
    pub reconnect_delay: Duration,
}

impl AgentConfig {
    /// Config with the default reconnect delay.
    pub fn new(hub_url: impl Into<String>, virtual_addr: impl Into<String>) -> Self {
        Self {
            hub_url: hub_url.into(),
            virtual_addr: virtual_addr.into(),
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
        }
    }
}

/// Process-side component pumping packets between a local interface and the
/// relay hub.
pub struct EndpointAgent {
    config: AgentConfig,
    iface: Arc<dyn PacketInterface>,
}

impl EndpointAgent {
    /// Create an agent over an already-created interface.
    pub fn new(config: AgentConfig, iface: Arc<dyn PacketInterface>) -> Self {
        Self { config, iface }
    }

    /// Run forever: connect, register, relay until the channel fails, then
    /// reconnect after the configured delay. There is no retry cap.
    pub async fn run(&self) {
        loop {
            match self.run_connection().await {
                Ok(()) => info!(
                    "channel to {} closed, reconnecting in {:?}",
                    self.config.hub_url, self.config.reconnect_delay
                ),
                Err(e) => warn!(
                    "connection to {} failed: {}, retrying in {:?}",
                    self.config.hub_url, e, self.config.reconnect_delay
                ),
            }
            tokio::time::sleep(self.config.reconnect_delay).await;
        }
    }

    /// One connection attempt, from dial to channel teardown.
    async fn run_connection(&self) -> Result<(), AgentError> {
        let (ws, _) = tokio_tungstenite::connect_async(self.config.hub_url.as_str()).await?;
        info!("connected to hub at {}", self.config.hub_url);
        let (mut ws_tx, mut ws_rx) = ws.split();

        // Register once; the hub's ack is informational and never awaited.
        let register = Frame::Register {
            addr: self.config.virtual_addr.clone(),
        };
        ws_tx.send(Message::Text(register.encode())).await?;
        info!("registered as {}", self.config.virtual_addr);

        let egress = tokio::spawn(egress_loop(Arc::clone(&self.iface), ws_tx));
        let result = self.ingress_loop(&mut ws_rx).await;

        // Channel gone: both duties terminate.
        egress.abort();
        result
    }

    /// Ingress duty: deliver `rx:` frames to the local interface until the
    /// channel closes.
    async fn ingress_loop(&self, ws_rx: &mut WsSource) -> Result<(), AgentError> {
        while let Some(msg) = ws_rx.next().await {
            let text = match msg? {
                Message::Text(t) => t,
                Message::Close(_) => break,
                _ => continue,
            };
            match Frame::decode(&text) {
                Ok(Frame::Rx { payload }) => {
                    if let Err(e) = self.iface.write(&payload) {
                        // Local I/O failure is not fatal to the duty.
                        warn!("interface write failed: {}", e);
                    }
                }
                Ok(Frame::Registered { addr }) => {
                    debug!("hub acknowledged registration of {}", addr);
                }
                Ok(frame) => {
                    warn!("unexpected {:?} frame from hub, dropping", frame);
                }
                Err(e) => {
                    warn!("dropping malformed message from hub: {}", e);
                }
            }
        }
        Ok(())
    }
}

/// Egress duty: forward every packet the interface queues, unconditionally,
/// in read order. Packets too short to carry an IPv4 destination are skipped.
async fn egress_loop(iface: Arc<dyn PacketInterface>, mut ws_tx: WsSink) {
    loop {
        match iface.try_read() {
            Ok(Some(packet)) => {
                let Some(dest) = dest_addr(&packet) else {
                    debug!("outbound packet without IPv4 destination, skipping");
                    continue;
                };
                let frame = Frame::Tx {
                    dest,
                    payload: packet,
                };
                if let Err(e) = ws_tx.send(Message::Text(frame.encode())).await {
                    // Channel dead; the ingress duty sees it too and tears
                    // down the connection.
                    debug!("egress send failed: {}", e);
                    break;
                }
            }
            Ok(None) => tokio::time::sleep(READ_POLL_INTERVAL).await,
            Err(e) => {
                warn!("interface read failed: {}", e);
                tokio::time::sleep(READ_POLL_INTERVAL).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::iface::MemoryInterface;
    use tunfab_hub::RelayHub;

    /// Build a minimal IPv4 packet addressed to `dest` carrying `payload`.
    fn ipv4_packet(dest: [u8; 4], payload: &[u8]) -> Vec<u8> {
        let mut packet = vec![0u8; 20];
        packet[0] = 0x45;
        packet[16..20].copy_from_slice(&dest);
        packet.extend_from_slice(payload);
        packet
    }

    fn spawn_agent(
        hub_url: &str,
        addr: &str,
        iface: Arc<MemoryInterface>,
    ) -> tokio::task::JoinHandle<()> {
        let mut config = AgentConfig::new(hub_url, addr);
        config.reconnect_delay = Duration::from_millis(100);
        tokio::spawn(async move {
            EndpointAgent::new(config, iface).run().await;
        })
    }

    async fn wait_for_routes(hub: &RelayHub, count: usize) {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while hub.routes().len() != count {
            assert!(
                tokio::time::Instant::now() < deadline,
                "expected {count} registered routes, have {}",
                hub.routes().len()
            );
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    async fn wait_for_packet(iface: &MemoryInterface) -> Vec<Vec<u8>> {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        loop {
            let packets = iface.take_inbound();
            if !packets.is_empty() {
                return packets;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "no packet delivered to interface"
            );
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    #[tokio::test]
    async fn test_packet_relayed_between_agents() {
        let (hub, _accept) = RelayHub::start("127.0.0.1:0".parse().unwrap())
            .await
            .unwrap();
        let hub_url = format!("ws://{}", hub.local_addr());

        let iface_a = Arc::new(MemoryInterface::new());
        let iface_b = Arc::new(MemoryInterface::new());
        let agent_a = spawn_agent(&hub_url, "10.0.0.2", Arc::clone(&iface_a));
        let agent_b = spawn_agent(&hub_url, "10.0.0.3", Arc::clone(&iface_b));

        // Both agents must be registered before A emits a packet, otherwise
        // the hub would (correctly) drop it.
        wait_for_routes(&hub, 2).await;

        let packet = ipv4_packet([10, 0, 0, 3], &[0xde, 0xad, 0xbe, 0xef]);
        iface_a.queue_outbound(packet.clone());

        let delivered = wait_for_packet(&iface_b).await;
        assert_eq!(delivered, vec![packet]);

        // Exactly once, and nothing echoed back to the sender.
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(iface_b.take_inbound().is_empty());
        assert!(iface_a.take_inbound().is_empty());

        agent_a.abort();
        agent_b.abort();
    }

    #[tokio::test]
    async fn test_packets_arrive_in_read_order() {
        let (hub, _accept) = RelayHub::start("127.0.0.1:0".parse().unwrap())
            .await
            .unwrap();
        let hub_url = format!("ws://{}", hub.local_addr());

        let iface_a = Arc::new(MemoryInterface::new());
        let iface_b = Arc::new(MemoryInterface::new());
        let agent_a = spawn_agent(&hub_url, "10.0.0.2", Arc::clone(&iface_a));
        let agent_b = spawn_agent(&hub_url, "10.0.0.3", Arc::clone(&iface_b));
        wait_for_routes(&hub, 2).await;

        let first = ipv4_packet([10, 0, 0, 3], &[1]);
        let second = ipv4_packet([10, 0, 0, 3], &[2]);
        iface_a.queue_outbound(first.clone());
        iface_a.queue_outbound(second.clone());

        let mut delivered = wait_for_packet(&iface_b).await;
        while delivered.len() < 2 {
            delivered.extend(wait_for_packet(&iface_b).await);
        }
        assert_eq!(delivered, vec![first, second]);

        agent_a.abort();
        agent_b.abort();
    }

    #[tokio::test]
    async fn test_self_addressed_packet_loops_back() {
        // No special case: an agent may send itself packets through the hub.
        let (hub, _accept) = RelayHub::start("127.0.0.1:0".parse().unwrap())
            .await
            .unwrap();
        let hub_url = format!("ws://{}", hub.local_addr());

        let iface = Arc::new(MemoryInterface::new());
        let agent = spawn_agent(&hub_url, "10.0.0.2", Arc::clone(&iface));
        wait_for_routes(&hub, 1).await;

        let packet = ipv4_packet([10, 0, 0, 2], &[0x42]);
        iface.queue_outbound(packet.clone());
        assert_eq!(wait_for_packet(&iface).await, vec![packet]);

        agent.abort();
    }

    #[tokio::test]
    async fn test_agent_reconnects_after_hub_restart() {
        // Pick a free port, then run the first hub on its own runtime so
        // tearing that runtime down severs the established connection the
        // way a hub crash would.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let first_rt = tokio::runtime::Runtime::new().unwrap();
        let (first_hub, _accept) = first_rt
            .spawn(RelayHub::start(addr))
            .await
            .unwrap()
            .unwrap();

        let iface = Arc::new(MemoryInterface::new());
        let agent = spawn_agent(&format!("ws://{addr}"), "10.0.0.2", Arc::clone(&iface));
        wait_for_routes(&first_hub, 1).await;

        // Relaying is established: a self-addressed packet round-trips.
        let packet = ipv4_packet([10, 0, 0, 2], &[0x01]);
        iface.queue_outbound(packet.clone());
        assert_eq!(wait_for_packet(&iface).await, vec![packet]);

        // Hub goes away, established connection included. Shut down on a
        // blocking thread and wait for the runtime's tasks to be dropped so
        // the listener's port is actually released before we rebind it.
        tokio::task::spawn_blocking(move || first_rt.shutdown_timeout(Duration::from_secs(5)))
            .await
            .unwrap();

        // A restarted hub on the same port sees the agent re-register and
        // packets flow again.
        let (hub, _accept) = RelayHub::start(addr).await.unwrap();
        wait_for_routes(&hub, 1).await;

        let packet = ipv4_packet([10, 0, 0, 2], &[0x02]);
        iface.queue_outbound(packet.clone());
        assert_eq!(wait_for_packet(&iface).await, vec![packet]);

        agent.abort();
    }

    #[tokio::test]
    async fn test_agent_keeps_retrying_until_hub_appears() {
        // Reserve a port, then release it so the first attempts fail.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let iface = Arc::new(MemoryInterface::new());
        let agent = spawn_agent(&format!("ws://{addr}"), "10.0.0.2", Arc::clone(&iface));

        // Let the agent fail at least once before the hub exists.
        tokio::time::sleep(Duration::from_millis(300)).await;

        let (hub, _accept) = RelayHub::start(addr).await.unwrap();
        wait_for_routes(&hub, 1).await;

        let packet = ipv4_packet([10, 0, 0, 2], &[0x99]);
        iface.queue_outbound(packet.clone());
        assert_eq!(wait_for_packet(&iface).await, vec![packet]);

        agent.abort();
    }
}
