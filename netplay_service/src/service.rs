//! Session service.
//!
//! Owns the transport host and turns its raw connect/disconnect/receive events
//! into typed callbacks on a [`SessionHandler`]. Everything happens inside
//! [`Service::poll`], which the caller drives from its own loop:
//!
//! 1. periodic tasks (network statistics sampling)
//! 2. one bounded wait on the transport, then a drain of queued events
//! 3. per event: classify / dispatch
//! 4. deferred shutdown if a stop was requested
//!
//! Each connection id maps to exactly one [`Link`] owned by the service. A link
//! is created when a connection is classified and removed on its disconnect, so
//! a late packet for a closed connection finds nothing and is dropped.

use std::{
    collections::HashMap,
    net::SocketAddr,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use anyhow::Context;
use bytes::Bytes;
use netplay_shared::{
    config::SessionConfig,
    message::{Envelope, EnvelopeError, Message},
    wire::WireError,
};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::{
    handler::SessionHandler,
    master::{MasterError, MasterServerProxy},
    peer::Peer,
    transport::{
        ConnectionId, ConnectionIntent, Transport, TransportEvent, DUPLICATE_MASTER_CODE,
        INVALID_INTENT_CODE, SHUTDOWN_CODE,
    },
};

/// Service lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceState {
    Uninitialized,
    Starting,
    Started,
    Stopping,
}

impl ServiceState {
    fn is_pollable(self) -> bool {
        matches!(
            self,
            ServiceState::Started | ServiceState::Starting | ServiceState::Stopping
        )
    }
}

/// Errors raised to the caller of the service.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("service is {current:?}, operation needs {expected}")]
    InvalidState {
        current: ServiceState,
        expected: &'static str,
    },

    /// The envelope's outer tag could not be read; the message was discarded.
    #[error("framing error on {id}: {source}")]
    Framing {
        id: ConnectionId,
        #[source]
        source: WireError,
    },

    /// The connect sequence for a connection does not fit its existing classification.
    #[error("unexpected connect on {id}: {detail}")]
    UnexpectedConnect { id: ConnectionId, detail: String },

    #[error(transparent)]
    Master(#[from] MasterError),

    #[error("transport: {0:#}")]
    Transport(#[from] anyhow::Error),
}

impl ServiceError {
    /// Whether the loop driving the service should give up. Everything else
    /// concerns a single message or connection and the service stays usable.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ServiceError::Transport(_) | ServiceError::InvalidState { .. }
        )
    }
}

/// Cloneable stop request flag. Observed at the end of the current poll.
#[derive(Debug, Clone, Default)]
pub struct StopHandle(Arc<AtomicBool>);

impl StopHandle {
    pub fn request_stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    fn take(&self) -> bool {
        self.0.swap(false, Ordering::SeqCst)
    }
}

/// Classification attached to a connection at local connect time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkRole {
    Game,
    Master,
}

/// What a connection id currently stands for.
#[derive(Debug)]
enum Link {
    /// Outgoing connection not yet completed.
    Connecting(LinkRole),
    Peer(Peer),
    Master,
}

pub struct Service<T: Transport, H: SessionHandler> {
    host: T,
    handler: H,
    state: ServiceState,
    links: HashMap<ConnectionId, Link>,
    master: MasterServerProxy,
    stop: StopHandle,
    /// Outgoing game connection whose loss ends the session (client mode).
    primary: Option<ConnectionId>,
    local_ip_address: String,
    stats_interval: Duration,
    stats_elapsed: Duration,
}

impl<T: Transport, H: SessionHandler> Service<T, H> {
    pub fn new(host: T, handler: H, cfg: &SessionConfig) -> Self {
        let mut master = MasterServerProxy::new();
        if let Some(address) = &cfg.master_address {
            master.set_address_and_port(address.clone(), cfg.master_port);
        }
        Self {
            host,
            handler,
            state: ServiceState::Uninitialized,
            links: HashMap::new(),
            master,
            stop: StopHandle::default(),
            primary: None,
            local_ip_address: cfg.local_ip_address.clone(),
            stats_interval: cfg.stats_interval(),
            stats_elapsed: Duration::ZERO,
        }
    }

    /// Shares `stop` with the service, e.g. one already handed to the handler.
    pub fn with_stop_handle(mut self, stop: StopHandle) -> Self {
        self.stop = stop;
        self
    }

    pub fn state(&self) -> ServiceState {
        self.state
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }

    pub fn handler_mut(&mut self) -> &mut H {
        &mut self.handler
    }

    pub fn host(&self) -> &T {
        &self.host
    }

    pub fn host_mut(&mut self) -> &mut T {
        &mut self.host
    }

    pub fn master(&self) -> &MasterServerProxy {
        &self.master
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    pub fn set_master_address_and_port(&mut self, address: impl Into<String>, port: u16) {
        self.master.set_address_and_port(address, port);
    }

    pub fn set_local_ip_address(&mut self, address: impl Into<String>) {
        self.local_ip_address = address.into();
    }

    /// Asks for a shutdown at the end of the current (or next) poll.
    pub fn request_stop(&self) {
        self.stop.request_stop();
    }

    /// Starts a listening service.
    pub fn start(&mut self) -> Result<(), ServiceError> {
        self.expect_state(ServiceState::Uninitialized, "Uninitialized")?;
        self.state = ServiceState::Starting;
        self.stats_elapsed = Duration::ZERO;
        info!(local = ?self.host.local_addr(), "Service started");
        self.state = ServiceState::Started;
        Ok(())
    }

    /// Starts a client service whose session is the connection to `addr`.
    /// The service stays `Starting` until that connection completes.
    pub fn connect(&mut self, addr: SocketAddr) -> Result<ConnectionId, ServiceError> {
        self.expect_state(ServiceState::Uninitialized, "Uninitialized")?;
        let id = self
            .host
            .connect(addr, ConnectionIntent::GameConnection)
            .context("connect to server")?;
        self.links.insert(id, Link::Connecting(LinkRole::Game));
        self.primary = Some(id);
        self.stats_elapsed = Duration::ZERO;
        self.state = ServiceState::Starting;
        info!(%addr, conn = %id, "Connecting to server");
        Ok(id)
    }

    /// Opens the connection to the configured master server.
    pub async fn connect_master(&mut self) -> Result<ConnectionId, ServiceError> {
        self.expect_running()?;
        let (address, port) = self
            .master
            .endpoint()
            .map(|(a, p)| (a.to_string(), p))
            .ok_or(MasterError::NoEndpoint)?;
        let addr = tokio::net::lookup_host((address.as_str(), port))
            .await
            .with_context(|| format!("resolve master {address}:{port}"))?
            .next()
            .with_context(|| format!("master {address}:{port} has no address"))?;
        let id = self
            .host
            .connect(addr, ConnectionIntent::None)
            .context("connect to master")?;
        self.links.insert(id, Link::Connecting(LinkRole::Master));
        info!(%addr, conn = %id, "Connecting to master server");
        Ok(id)
    }

    pub fn peer(&self, id: ConnectionId) -> Option<&Peer> {
        match self.links.get(&id) {
            Some(Link::Peer(peer)) => Some(peer),
            _ => None,
        }
    }

    pub fn peer_mut(&mut self, id: ConnectionId) -> Option<&mut Peer> {
        match self.links.get_mut(&id) {
            Some(Link::Peer(peer)) => Some(peer),
            _ => None,
        }
    }

    pub fn peers(&self) -> impl Iterator<Item = &Peer> {
        self.links.values().filter_map(|link| match link {
            Link::Peer(peer) => Some(peer),
            _ => None,
        })
    }

    pub fn peer_count(&self) -> usize {
        self.peers().count()
    }

    /// Split borrow for collaborators that update peers from their own state.
    pub fn peers_and_handler(&mut self) -> (impl Iterator<Item = &mut Peer>, &mut H) {
        let peers = self.links.values_mut().filter_map(|link| match link {
            Link::Peer(peer) => Some(peer),
            _ => None,
        });
        (peers, &mut self.handler)
    }

    /// Queues `message` for every game peer.
    pub fn broadcast(&mut self, message: impl Into<Message>) {
        let packet = message.into();
        for link in self.links.values_mut() {
            if let Link::Peer(peer) = link {
                peer.send(packet.clone());
            }
        }
    }

    /// Orderly disconnect of one connection. The link goes away, and the
    /// handler hears of it, when the resulting `Disconnect` is drained.
    pub fn disconnect(&mut self, id: ConnectionId, code: u32) {
        self.host.disconnect(id, code);
    }

    /// Hands all queued messages to the transport and pushes them to the socket.
    pub fn flush(&mut self) -> Result<(), ServiceError> {
        self.flush_outbound();
        self.host.flush()?;
        Ok(())
    }

    /// One iteration of the event loop.
    ///
    /// A pending stop request is honoured at the end of every pollable call,
    /// including one that returns an error.
    pub async fn poll(&mut self, elapsed: Duration, timeout: Duration) -> Result<(), ServiceError> {
        if !self.state.is_pollable() {
            return Ok(());
        }

        self.run_periodic_tasks(elapsed);
        self.flush_outbound();

        let drained = self.drain_events(timeout).await;
        if self.state == ServiceState::Uninitialized {
            return drained;
        }

        self.flush_outbound();

        if self.stop.take() {
            self.stop();
        }
        drained
    }

    async fn drain_events(&mut self, timeout: Duration) -> Result<(), ServiceError> {
        let mut next = self.host.service(timeout).await?;
        while let Some(event) = next {
            self.handle_event(event)?;
            if self.state == ServiceState::Uninitialized {
                return Ok(());
            }
            next = self.host.check_events();
        }
        Ok(())
    }

    /// Disconnects everything and returns to `Uninitialized`.
    pub fn stop(&mut self) {
        if self.state == ServiceState::Uninitialized {
            return;
        }
        self.state = ServiceState::Stopping;
        info!(links = self.links.len(), "Service stopping");

        self.flush_outbound();
        for (id, link) in self.links.drain() {
            self.host.disconnect(id, SHUTDOWN_CODE);
            match link {
                Link::Peer(peer) => self.handler.on_peer_disconnected(&peer, SHUTDOWN_CODE),
                Link::Master => {
                    self.master.set_peer(None);
                    self.handler.on_master_disconnected(id);
                }
                Link::Connecting(_) => {}
            }
        }
        if let Err(e) = self.host.flush() {
            warn!(error = %e, "Flush during shutdown failed");
        }
        self.primary = None;
        self.stop.take();
        self.state = ServiceState::Uninitialized;
        info!("Service stopped");
    }

    fn expect_state(&self, expected: ServiceState, name: &'static str) -> Result<(), ServiceError> {
        if self.state != expected {
            return Err(ServiceError::InvalidState {
                current: self.state,
                expected: name,
            });
        }
        Ok(())
    }

    fn expect_running(&self) -> Result<(), ServiceError> {
        if !matches!(self.state, ServiceState::Started | ServiceState::Starting) {
            return Err(ServiceError::InvalidState {
                current: self.state,
                expected: "Starting or Started",
            });
        }
        Ok(())
    }

    fn run_periodic_tasks(&mut self, elapsed: Duration) {
        self.stats_elapsed += elapsed;
        if self.stats_elapsed < self.stats_interval {
            return;
        }
        self.stats_elapsed = Duration::ZERO;
        for (id, link) in self.links.iter_mut() {
            if let Link::Peer(peer) = link {
                peer.record_rtt(self.host.round_trip_time(*id));
                let stats = peer.stats();
                debug!(
                    peer = %id,
                    rtt_ms = stats.round_trip_time.map(|d| d.as_millis() as u64),
                    packets_in = stats.packets_received,
                    bytes_in = stats.bytes_received,
                    packets_out = stats.packets_sent,
                    bytes_out = stats.bytes_sent,
                    malformed = peer.malformed_messages(),
                    "Peer network stats"
                );
            }
        }
    }

    /// A connection the transport already closed keeps its link until the
    /// `Disconnect` event is drained; its queued packets are dropped meanwhile.
    fn flush_outbound(&mut self) {
        for (id, link) in self.links.iter_mut() {
            if let Link::Peer(peer) = link {
                for packet in peer.take_outbound() {
                    if let Err(e) = self.host.send(*id, packet) {
                        debug!(peer = %id, error = %e, "Dropping outbound for closed connection");
                        break;
                    }
                }
            }
        }
    }

    fn handle_event(&mut self, event: TransportEvent) -> Result<(), ServiceError> {
        match event {
            TransportEvent::None => Ok(()),
            TransportEvent::Connect { id, data } => self.on_connected(id, data),
            TransportEvent::Disconnect { id, reason } => {
                self.on_disconnected(id, reason);
                Ok(())
            }
            // `packet` is released when this arm returns, whatever the outcome.
            TransportEvent::Receive { id, packet } => self.on_received(id, packet),
        }
    }

    fn on_connected(&mut self, id: ConnectionId, data: u32) -> Result<(), ServiceError> {
        let Some(intent) = ConnectionIntent::from_u32(data) else {
            warn!(conn = %id, intent = data, "Rejecting connection with unknown intent");
            self.links.remove(&id);
            self.host.disconnect_now(id, INVALID_INTENT_CODE);
            return Ok(());
        };

        match (intent, self.links.remove(&id)) {
            (ConnectionIntent::MasterPushNatPeersToServer, None) => {
                debug!(conn = %id, "Master pushing NAT peers");
                self.on_master_connected(id, false)
            }
            (ConnectionIntent::None, Some(Link::Connecting(LinkRole::Master))) => {
                self.on_master_connected(id, true)
            }
            (ConnectionIntent::None, Some(Link::Connecting(LinkRole::Game)) | None)
            | (ConnectionIntent::GameConnection, None) => {
                self.on_peer_connected(id);
                Ok(())
            }
            (intent, existing) => {
                let detail = format!("{intent:?} on {}", describe(existing.as_ref()));
                if let Some(link) = existing {
                    self.links.insert(id, link);
                }
                error!(conn = %id, %detail, "Unexpected connect");
                Err(ServiceError::UnexpectedConnect { id, detail })
            }
        }
    }

    fn on_master_connected(&mut self, id: ConnectionId, outgoing: bool) -> Result<(), ServiceError> {
        if let Err(e) = self.master.on_connected(id) {
            error!(conn = %id, error = %e, "Refusing second master connection");
            self.host.disconnect_now(id, DUPLICATE_MASTER_CODE);
            return Err(e.into());
        }
        self.links.insert(id, Link::Master);
        if outgoing {
            let port = self.host.local_addr().map(|a| a.port()).unwrap_or_default();
            let registration = self.master.registration(&self.local_ip_address, port);
            self.host.send(id, registration)?;
        }
        self.handler.on_master_connected(id);
        Ok(())
    }

    fn on_peer_connected(&mut self, id: ConnectionId) {
        let mut peer = Peer::new(id, self.host.remote_addr(id));
        info!(peer = %id, remote = ?peer.remote_addr(), "Peer connected");
        self.handler.on_peer_connected(&mut peer);
        self.links.insert(id, Link::Peer(peer));

        if self.primary == Some(id) && self.state == ServiceState::Starting {
            self.state = ServiceState::Started;
            info!(peer = %id, "Session established");
        }
    }

    fn on_disconnected(&mut self, id: ConnectionId, reason: u32) {
        match self.links.remove(&id) {
            Some(Link::Master) => {
                self.master.set_peer(None);
                self.handler.on_master_disconnected(id);
            }
            Some(Link::Peer(peer)) => {
                info!(peer = %id, reason, "Peer disconnected");
                self.handler.on_peer_disconnected(&peer, reason);
            }
            Some(Link::Connecting(role)) => {
                warn!(conn = %id, ?role, reason, "Connection attempt failed");
            }
            None => {
                debug!(conn = %id, reason, "Disconnect for unknown connection");
            }
        }

        if self.primary == Some(id) {
            info!(conn = %id, "Lost server connection");
            self.stop();
        }
    }

    fn on_received(&mut self, id: ConnectionId, packet: Bytes) -> Result<(), ServiceError> {
        match self.links.get_mut(&id) {
            Some(Link::Master) => match self.master.on_received(id, packet) {
                Ok(Some(peers)) => self.handler.on_nat_peers(peers),
                Ok(None) => {}
                Err(e) => warn!(conn = %id, error = %e, "Dropping master message"),
            },
            Some(Link::Peer(peer)) => {
                peer.record_receive(packet.len(), self.host.round_trip_time(id));
                let envelope = match Envelope::decode(packet) {
                    Ok(envelope) => envelope,
                    Err(EnvelopeError::Framing(source)) => {
                        peer.note_malformed();
                        warn!(peer = %id, error = %source, "Discarding unframed message");
                        return Err(ServiceError::Framing { id, source });
                    }
                    Err(err @ EnvelopeError::InnerType { .. }) => {
                        peer.note_malformed();
                        warn!(peer = %id, error = %err, "Dropping message");
                        return Ok(());
                    }
                };
                if let Err(err) = peer.dispatch(envelope, &mut self.handler) {
                    warn!(peer = %id, error = %err, "Dropping malformed payload");
                }
            }
            Some(Link::Connecting(_)) | None => {
                debug!(conn = %id, "Dropping packet for unknown connection");
            }
        }
        Ok(())
    }
}

fn describe(link: Option<&Link>) -> &'static str {
    match link {
        None => "unclassified connection",
        Some(Link::Connecting(LinkRole::Game)) => "pending game connection",
        Some(Link::Connecting(LinkRole::Master)) => "pending master connection",
        Some(Link::Peer(_)) => "live game peer",
        Some(Link::Master) => "live master connection",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scripted::ScriptedTransport;
    use netplay_shared::message::{EventMessage, ObjectMessage};

    #[derive(Default)]
    struct Recorder {
        connected: Vec<ConnectionId>,
        events: usize,
    }

    impl SessionHandler for Recorder {
        fn on_peer_connected(&mut self, peer: &mut Peer) {
            self.connected.push(peer.id());
        }

        fn on_object(&mut self, _peer: &mut Peer, _object: ObjectMessage) {}

        fn on_event(&mut self, _peer: &mut Peer, _event: EventMessage) {
            self.events += 1;
        }
    }

    fn service() -> Service<ScriptedTransport, Recorder> {
        Service::new(
            ScriptedTransport::new(),
            Recorder::default(),
            &SessionConfig::default(),
        )
    }

    #[tokio::test]
    async fn start_twice_is_rejected() {
        let mut svc = service();
        svc.start().unwrap();
        assert!(matches!(
            svc.start(),
            Err(ServiceError::InvalidState { .. })
        ));
    }

    #[tokio::test]
    async fn client_is_starting_until_connected() {
        let mut svc = service();
        let addr: SocketAddr = "127.0.0.1:5900".parse().unwrap();
        let id = svc.connect(addr).unwrap();
        assert_eq!(svc.state(), ServiceState::Starting);
        assert_eq!(
            svc.host().connects,
            vec![(id, addr, ConnectionIntent::GameConnection)]
        );

        svc.host_mut().push_connect(id, ConnectionIntent::None.as_u32());
        svc.poll(Duration::ZERO, Duration::ZERO).await.unwrap();
        assert_eq!(svc.state(), ServiceState::Started);
        assert_eq!(svc.handler().connected, vec![id]);
    }

    #[tokio::test]
    async fn losing_primary_connection_stops_mid_drain() {
        let mut svc = service();
        let id = svc.connect("127.0.0.1:5900".parse().unwrap()).unwrap();
        svc.host_mut().push_connect(id, 0);
        svc.poll(Duration::ZERO, Duration::ZERO).await.unwrap();

        svc.host_mut().push_disconnect(id, 3);
        svc.host_mut().push_connect(ConnectionId(77), 1);
        svc.poll(Duration::ZERO, Duration::ZERO).await.unwrap();

        assert_eq!(svc.state(), ServiceState::Uninitialized);
        // The event after the disconnect was never drained.
        assert_eq!(svc.host().queued_events(), 1);
        assert_eq!(svc.peer_count(), 0);
    }

    #[tokio::test]
    async fn duplicate_connect_for_live_peer_is_a_logic_error() {
        let mut svc = service();
        svc.start().unwrap();
        svc.host_mut().push_connect(ConnectionId(1), 1);
        svc.poll(Duration::ZERO, Duration::ZERO).await.unwrap();

        svc.host_mut().push_connect(ConnectionId(1), 1);
        let err = svc.poll(Duration::ZERO, Duration::ZERO).await.unwrap_err();
        assert!(matches!(err, ServiceError::UnexpectedConnect { .. }));
        assert!(svc.peer(ConnectionId(1)).is_some());
    }

    #[tokio::test]
    async fn stats_are_sampled_after_interval() {
        let mut svc = service();
        svc.start().unwrap();
        svc.host_mut().rtt = Some(Duration::from_millis(42));
        svc.host_mut().push_connect(ConnectionId(1), 1);
        svc.poll(Duration::ZERO, Duration::ZERO).await.unwrap();
        assert_eq!(svc.peer(ConnectionId(1)).unwrap().stats().round_trip_time, None);

        svc.poll(Duration::from_secs(2), Duration::ZERO).await.unwrap();
        assert_eq!(
            svc.peer(ConnectionId(1)).unwrap().stats().round_trip_time,
            Some(Duration::from_millis(42))
        );
    }

    #[tokio::test]
    async fn late_packet_after_disconnect_is_dropped() {
        let mut svc = service();
        svc.start().unwrap();
        svc.host_mut().push_connect(ConnectionId(1), 1);
        svc.host_mut().push_disconnect(ConnectionId(1), 0);
        svc.host_mut().push_receive(ConnectionId(1), Bytes::from_static(&[0x01, 0x00]));
        svc.poll(Duration::ZERO, Duration::ZERO).await.unwrap();
        assert_eq!(svc.handler().events, 0);
        assert_eq!(svc.state(), ServiceState::Started);
    }
}
