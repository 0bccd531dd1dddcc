//! Per-connection state for game peers.

use std::{collections::VecDeque, net::SocketAddr, time::Duration};

use bytes::Bytes;
use netplay_shared::{
    event::EventType,
    message::{Envelope, EventMessage, Header, Message, ObjectMessage},
    object::ObjectType,
    tick::{SyncOutcome, TickSync},
    wire::WireError,
};
use tokio::time::Instant;
use tracing::{debug, trace};

use crate::{handler::SessionHandler, transport::ConnectionId};

/// Running traffic counters for one connection. Operational only.
#[derive(Debug, Clone)]
pub struct PeerStats {
    pub connected_at: Instant,
    pub packets_received: u64,
    pub bytes_received: u64,
    pub packets_sent: u64,
    pub bytes_sent: u64,
    pub round_trip_time: Option<Duration>,
    pub last_received_at: Option<Instant>,
}

impl PeerStats {
    fn new() -> Self {
        Self {
            connected_at: Instant::now(),
            packets_received: 0,
            bytes_received: 0,
            packets_sent: 0,
            bytes_sent: 0,
            round_trip_time: None,
            last_received_at: None,
        }
    }
}

/// Session-layer representative of one live game connection.
#[derive(Debug)]
pub struct Peer {
    id: ConnectionId,
    remote: Option<SocketAddr>,
    stats: PeerStats,
    sync: TickSync,
    outbound: VecDeque<Bytes>,
    malformed: u32,
}

impl Peer {
    pub(crate) fn new(id: ConnectionId, remote: Option<SocketAddr>) -> Self {
        Self {
            id,
            remote,
            stats: PeerStats::new(),
            sync: TickSync::new(),
            outbound: VecDeque::new(),
            malformed: 0,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.remote
    }

    pub fn stats(&self) -> &PeerStats {
        &self.stats
    }

    /// Tick synchronization state for records received on this connection.
    pub fn sync(&self) -> &TickSync {
        &self.sync
    }

    /// Messages from this peer that failed to decode. What to do about a high
    /// count is up to the caller.
    pub fn malformed_messages(&self) -> u32 {
        self.malformed
    }

    /// Queues a message; it is handed to the transport on the next poll or flush.
    pub fn send(&mut self, message: impl Into<Message>) {
        self.outbound.push_back(message.into().to_bytes());
    }

    pub fn pending_outbound(&self) -> usize {
        self.outbound.len()
    }

    pub(crate) fn take_outbound(&mut self) -> Vec<Bytes> {
        let packets: Vec<Bytes> = self.outbound.drain(..).collect();
        for packet in &packets {
            self.stats.packets_sent += 1;
            self.stats.bytes_sent += packet.len() as u64;
        }
        packets
    }

    pub(crate) fn record_receive(&mut self, len: usize, rtt: Option<Duration>) {
        self.stats.packets_received += 1;
        self.stats.bytes_received += len as u64;
        self.stats.last_received_at = Some(Instant::now());
        self.record_rtt(rtt);
    }

    pub(crate) fn record_rtt(&mut self, rtt: Option<Duration>) {
        if rtt.is_some() {
            self.stats.round_trip_time = rtt;
        }
    }

    pub(crate) fn note_malformed(&mut self) {
        self.malformed = self.malformed.saturating_add(1);
    }

    /// Routes a framed message to the handler. Payload errors are counted and returned.
    pub(crate) fn dispatch<H: SessionHandler>(
        &mut self,
        envelope: Envelope,
        handler: &mut H,
    ) -> Result<(), WireError> {
        let result = match envelope.header {
            Header::Object(object_type) => self.handle_object(object_type, envelope.payload, handler),
            Header::Event(event_type) => self.handle_event(event_type, envelope.payload, handler),
        };
        if result.is_err() {
            self.note_malformed();
        }
        result
    }

    fn handle_object<H: SessionHandler>(
        &mut self,
        object_type: ObjectType,
        payload: Bytes,
        handler: &mut H,
    ) -> Result<(), WireError> {
        let object = ObjectMessage::decode(object_type, payload)?;
        trace!(peer = %self.id, ?object_type, "Object received");
        handler.on_object(self, object);
        Ok(())
    }

    fn handle_event<H: SessionHandler>(
        &mut self,
        event_type: EventType,
        payload: Bytes,
        handler: &mut H,
    ) -> Result<(), WireError> {
        let event = EventMessage::decode(event_type, payload)?;
        if let EventMessage::GameStateUpdate(update) = &event {
            match self.sync.apply(update) {
                SyncOutcome::Applied => {}
                SyncOutcome::Stale => {
                    trace!(peer = %self.id, snapshot = update.snapshot_tick, "Stale snapshot ignored");
                    return Ok(());
                }
                SyncOutcome::Finished => {
                    debug!(peer = %self.id, snapshot = update.snapshot_tick, "Snapshot after winner ignored");
                    return Ok(());
                }
            }
        }
        handler.on_event(self, event);
        Ok(())
    }
}
