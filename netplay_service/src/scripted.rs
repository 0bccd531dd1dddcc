//! Scripted in-memory transport.
//!
//! Helper for tests: events are queued by hand, and everything the service
//! asks of the transport is recorded for inspection.

use std::{collections::VecDeque, net::SocketAddr, time::Duration};

use async_trait::async_trait;
use bytes::Bytes;

use crate::transport::{ConnectionId, ConnectionIntent, Transport, TransportEvent};

#[derive(Debug, Default)]
pub struct ScriptedTransport {
    inbox: VecDeque<TransportEvent>,
    outbound: Vec<(ConnectionId, Bytes)>,
    next_id: u32,
    /// Packets handed to the wire by `flush`, in order.
    pub sent: Vec<(ConnectionId, Bytes)>,
    pub connects: Vec<(ConnectionId, SocketAddr, ConnectionIntent)>,
    pub disconnects: Vec<(ConnectionId, u32)>,
    pub disconnects_now: Vec<(ConnectionId, u32)>,
    pub service_calls: usize,
    pub check_calls: usize,
    pub flushes: usize,
    pub rtt: Option<Duration>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self {
            next_id: 1000,
            ..Self::default()
        }
    }

    pub fn push(&mut self, event: TransportEvent) {
        self.inbox.push_back(event);
    }

    pub fn push_connect(&mut self, id: ConnectionId, data: u32) {
        self.push(TransportEvent::Connect { id, data });
    }

    pub fn push_receive(&mut self, id: ConnectionId, packet: impl Into<Bytes>) {
        self.push(TransportEvent::Receive {
            id,
            packet: packet.into(),
        });
    }

    pub fn push_disconnect(&mut self, id: ConnectionId, reason: u32) {
        self.push(TransportEvent::Disconnect { id, reason });
    }

    pub fn queued_events(&self) -> usize {
        self.inbox.len()
    }

    /// Packets sent to one connection.
    pub fn sent_to(&self, id: ConnectionId) -> Vec<Bytes> {
        self.sent
            .iter()
            .filter(|(to, _)| *to == id)
            .map(|(_, p)| p.clone())
            .collect()
    }

    /// Whether anything at all was asked of the transport.
    pub fn untouched(&self) -> bool {
        self.service_calls == 0
            && self.check_calls == 0
            && self.flushes == 0
            && self.sent.is_empty()
            && self.outbound.is_empty()
            && self.connects.is_empty()
            && self.disconnects.is_empty()
            && self.disconnects_now.is_empty()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn service(&mut self, _timeout: Duration) -> anyhow::Result<Option<TransportEvent>> {
        self.service_calls += 1;
        self.flush()?;
        Ok(self.inbox.pop_front())
    }

    fn check_events(&mut self) -> Option<TransportEvent> {
        self.check_calls += 1;
        self.inbox.pop_front()
    }

    fn connect(
        &mut self,
        addr: SocketAddr,
        intent: ConnectionIntent,
    ) -> anyhow::Result<ConnectionId> {
        let id = ConnectionId(self.next_id);
        self.next_id += 1;
        self.connects.push((id, addr, intent));
        Ok(id)
    }

    fn send(&mut self, id: ConnectionId, packet: Bytes) -> anyhow::Result<()> {
        self.outbound.push((id, packet));
        Ok(())
    }

    fn flush(&mut self) -> anyhow::Result<()> {
        self.flushes += 1;
        self.sent.append(&mut self.outbound);
        Ok(())
    }

    fn disconnect(&mut self, id: ConnectionId, code: u32) {
        self.disconnects.push((id, code));
    }

    fn disconnect_now(&mut self, id: ConnectionId, code: u32) {
        self.disconnects_now.push((id, code));
    }

    fn round_trip_time(&self, _id: ConnectionId) -> Option<Duration> {
        self.rtt
    }

    fn remote_addr(&self, _id: ConnectionId) -> Option<SocketAddr> {
        None
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        None
    }
}
