//! Transport abstraction consumed by the [`Service`](crate::service::Service).
//!
//! A transport is a host that multiplexes many datagram connections over one
//! socket and reports what happened on them as [`TransportEvent`]s. Delivery
//! guarantees, retransmission and congestion handling belong to the transport;
//! the session layer only sees connect/disconnect/receive.

use std::{fmt, net::SocketAddr, time::Duration};

use async_trait::async_trait;
use bytes::Bytes;

/// Disconnect code sent to a peer that declared an unknown connection intent.
pub const INVALID_INTENT_CODE: u32 = 0x6666_6666;

/// Disconnect code sent to a second master connection while one is active.
pub const DUPLICATE_MASTER_CODE: u32 = 0x6666_6667;

/// Disconnect code for an orderly shutdown.
pub const SHUTDOWN_CODE: u32 = 0;

/// Opaque transport-level connection handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub u32);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Purpose a connecting party declares in its connect metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionIntent {
    /// Reported for our own outgoing connections when they complete.
    None = 0,
    GameConnection = 1,
    MasterPushNatPeersToServer = 2,
}

impl ConnectionIntent {
    /// Number of defined intents; raw values at or above this are invalid.
    pub const COUNT: u32 = 3;

    pub fn from_u32(v: u32) -> Option<Self> {
        match v {
            0 => Some(ConnectionIntent::None),
            1 => Some(ConnectionIntent::GameConnection),
            2 => Some(ConnectionIntent::MasterPushNatPeersToServer),
            _ => None,
        }
    }

    pub fn as_u32(self) -> u32 {
        self as u32
    }
}

/// Something that happened on the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    None,
    /// A connection completed. `data` is the raw connect intent.
    Connect { id: ConnectionId, data: u32 },
    Disconnect { id: ConnectionId, reason: u32 },
    Receive { id: ConnectionId, packet: Bytes },
}

/// Datagram host driven by the session service.
#[async_trait]
pub trait Transport: Send {
    /// Sends queued data and waits up to `timeout` for at most one event.
    async fn service(&mut self, timeout: Duration) -> anyhow::Result<Option<TransportEvent>>;

    /// Returns an already-queued event without touching the socket.
    fn check_events(&mut self) -> Option<TransportEvent>;

    /// Starts an outgoing connection announcing `intent`.
    fn connect(&mut self, addr: SocketAddr, intent: ConnectionIntent)
        -> anyhow::Result<ConnectionId>;

    /// Queues a packet for a connected peer.
    fn send(&mut self, id: ConnectionId, packet: Bytes) -> anyhow::Result<()>;

    /// Pushes every queued packet to the socket.
    fn flush(&mut self) -> anyhow::Result<()>;

    /// Orderly disconnect; a `Disconnect` event follows.
    fn disconnect(&mut self, id: ConnectionId, code: u32);

    /// Drops the connection immediately; no event follows.
    fn disconnect_now(&mut self, id: ConnectionId, code: u32);

    /// Last measured round trip time, if any.
    fn round_trip_time(&self, id: ConnectionId) -> Option<Duration>;

    fn remote_addr(&self, id: ConnectionId) -> Option<SocketAddr>;

    fn local_addr(&self) -> Option<SocketAddr>;
}
