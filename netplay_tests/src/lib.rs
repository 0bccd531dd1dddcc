//! Shared fixtures for the integration tests.

use std::{
    net::{IpAddr, Ipv4Addr, SocketAddr},
    time::Duration,
};

use anyhow::Context;
use netplay_service::{
    scripted::ScriptedTransport, ConnectionId, Peer, Service, ServiceError, SessionHandler,
    StopHandle, Transport, UdpHost,
};
use netplay_shared::{
    config::SessionConfig,
    master::NatPeer,
    message::{EventMessage, ObjectMessage},
};

/// Installs a test-writer subscriber once per process.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("debug")
        .with_test_writer()
        .try_init();
}

/// Everything a handler was told, in order.
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    PeerConnected(ConnectionId),
    PeerDisconnected(ConnectionId, u32),
    Object(ConnectionId, ObjectMessage),
    Event(ConnectionId, EventMessage),
    MasterConnected(ConnectionId),
    MasterDisconnected(ConnectionId),
    NatPeers(Vec<NatPeer>),
}

/// Handler that records every callback.
#[derive(Debug, Default)]
pub struct RecordingHandler {
    pub calls: Vec<Call>,
    /// Signalled from inside `on_event` when set.
    pub stop_on_event: Option<StopHandle>,
}

impl RecordingHandler {
    pub fn events(&self) -> Vec<&EventMessage> {
        self.calls
            .iter()
            .filter_map(|c| match c {
                Call::Event(_, e) => Some(e),
                _ => None,
            })
            .collect()
    }
}

impl SessionHandler for RecordingHandler {
    fn on_peer_connected(&mut self, peer: &mut Peer) {
        self.calls.push(Call::PeerConnected(peer.id()));
    }

    fn on_peer_disconnected(&mut self, peer: &Peer, reason: u32) {
        self.calls.push(Call::PeerDisconnected(peer.id(), reason));
    }

    fn on_object(&mut self, peer: &mut Peer, object: ObjectMessage) {
        self.calls.push(Call::Object(peer.id(), object));
    }

    fn on_event(&mut self, peer: &mut Peer, event: EventMessage) {
        if let Some(stop) = &self.stop_on_event {
            stop.request_stop();
        }
        self.calls.push(Call::Event(peer.id(), event));
    }

    fn on_master_connected(&mut self, id: ConnectionId) {
        self.calls.push(Call::MasterConnected(id));
    }

    fn on_master_disconnected(&mut self, id: ConnectionId) {
        self.calls.push(Call::MasterDisconnected(id));
    }

    fn on_nat_peers(&mut self, peers: Vec<NatPeer>) {
        self.calls.push(Call::NatPeers(peers));
    }
}

pub type ScriptedService = Service<ScriptedTransport, RecordingHandler>;

/// A service over a scripted transport, not started.
pub fn scripted_service() -> ScriptedService {
    Service::new(
        ScriptedTransport::new(),
        RecordingHandler::default(),
        &SessionConfig::default(),
    )
}

/// One poll with no elapsed time and no wait.
pub async fn poll_once(svc: &mut ScriptedService) -> Result<(), ServiceError> {
    svc.poll(Duration::ZERO, Duration::ZERO).await
}

pub type UdpService = Service<UdpHost, RecordingHandler>;

/// A started service on an ephemeral localhost UDP port, and that port.
pub async fn udp_service() -> anyhow::Result<(UdpService, SocketAddr)> {
    let host = UdpHost::bind(SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 0)).await?;
    let addr = host.local_addr().context("udp host has no local address")?;
    let mut svc = Service::new(host, RecordingHandler::default(), &SessionConfig::default());
    svc.start()?;
    Ok((svc, addr))
}
