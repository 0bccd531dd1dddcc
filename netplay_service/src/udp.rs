//! Minimal UDP transport.
//!
//! Datagram layout:
//! ```text
//! [kind: u8] [body ...]
//! CONNECT    = 1  [intent: u32]
//! ACCEPT     = 2
//! DISCONNECT = 3  [reason: u32]
//! DATA       = 4  [packet ...]
//! PING       = 5  [sent_micros: u64]
//! PONG       = 6  [sent_micros: u64]
//! ```
//!
//! One connection per remote address. There is no retransmission; lost
//! datagrams stay lost and the session protocol above tolerates it.

use std::{
    collections::{HashMap, VecDeque},
    net::SocketAddr,
    time::Duration,
};

use anyhow::Context;
use async_trait::async_trait;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio::{net::UdpSocket, time::Instant};
use tracing::{debug, trace, warn};

use crate::transport::{ConnectionId, ConnectionIntent, Transport, TransportEvent};

const KIND_CONNECT: u8 = 1;
const KIND_ACCEPT: u8 = 2;
const KIND_DISCONNECT: u8 = 3;
const KIND_DATA: u8 = 4;
const KIND_PING: u8 = 5;
const KIND_PONG: u8 = 6;

const MAX_DATAGRAM: usize = 64 * 1024;

/// Disconnect reason reported when a connection goes silent or never completes.
pub const TIMEOUT_REASON: u32 = 0x7469_6d65;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConnState {
    Connecting,
    Connected,
}

#[derive(Debug)]
struct UdpConn {
    addr: SocketAddr,
    state: ConnState,
    opened_at: Instant,
    last_heard: Instant,
    rtt: Option<Duration>,
}

/// Timing knobs for [`UdpHost`].
#[derive(Debug, Clone)]
pub struct UdpHostConfig {
    pub ping_interval: Duration,
    pub connect_timeout: Duration,
    pub idle_timeout: Duration,
}

impl Default for UdpHostConfig {
    fn default() -> Self {
        Self {
            ping_interval: Duration::from_secs(1),
            connect_timeout: Duration::from_secs(5),
            idle_timeout: Duration::from_secs(10),
        }
    }
}

/// UDP datagram host.
pub struct UdpHost {
    socket: UdpSocket,
    cfg: UdpHostConfig,
    epoch: Instant,
    next_id: u32,
    conns: HashMap<ConnectionId, UdpConn>,
    by_addr: HashMap<SocketAddr, ConnectionId>,
    pending: VecDeque<TransportEvent>,
    outbound: VecDeque<(SocketAddr, Bytes)>,
    last_ping: Instant,
    recv_buf: Vec<u8>,
}

impl UdpHost {
    pub async fn bind(addr: SocketAddr) -> anyhow::Result<Self> {
        Self::bind_with(addr, UdpHostConfig::default()).await
    }

    pub async fn bind_with(addr: SocketAddr, cfg: UdpHostConfig) -> anyhow::Result<Self> {
        let socket = UdpSocket::bind(addr).await.context("udp bind")?;
        let now = Instant::now();
        Ok(Self {
            socket,
            cfg,
            epoch: now,
            next_id: 1,
            conns: HashMap::new(),
            by_addr: HashMap::new(),
            pending: VecDeque::new(),
            outbound: VecDeque::new(),
            last_ping: now,
            recv_buf: vec![0u8; MAX_DATAGRAM],
        })
    }

    /// Number of connections in any state.
    pub fn connection_count(&self) -> usize {
        self.conns.len()
    }

    fn allocate(&mut self, addr: SocketAddr, state: ConnState) -> ConnectionId {
        let id = ConnectionId(self.next_id);
        self.next_id += 1;
        let now = Instant::now();
        self.conns.insert(
            id,
            UdpConn {
                addr,
                state,
                opened_at: now,
                last_heard: now,
                rtt: None,
            },
        );
        self.by_addr.insert(addr, id);
        id
    }

    fn remove(&mut self, id: ConnectionId) -> Option<UdpConn> {
        let conn = self.conns.remove(&id)?;
        self.by_addr.remove(&conn.addr);
        Some(conn)
    }

    fn queue(&mut self, addr: SocketAddr, kind: u8, body: &[u8]) {
        let mut buf = BytesMut::with_capacity(1 + body.len());
        buf.put_u8(kind);
        buf.put_slice(body);
        self.outbound.push_back((addr, buf.freeze()));
    }

    fn micros_since_epoch(&self) -> u64 {
        Instant::now().duration_since(self.epoch).as_micros() as u64
    }

    fn handle_datagram(&mut self, from: SocketAddr, mut data: Bytes) {
        if !data.has_remaining() {
            return;
        }
        let kind = data.get_u8();
        let known = self.by_addr.get(&from).copied();
        if let Some(id) = known {
            if let Some(conn) = self.conns.get_mut(&id) {
                conn.last_heard = Instant::now();
            }
        }

        match (kind, known) {
            (KIND_CONNECT, None) => {
                if data.remaining() < 4 {
                    trace!(%from, "Short connect datagram");
                    return;
                }
                let intent = data.get_u32();
                let id = self.allocate(from, ConnState::Connected);
                self.queue(from, KIND_ACCEPT, &[]);
                debug!(%from, conn = %id, intent, "Incoming connection");
                self.pending.push_back(TransportEvent::Connect { id, data: intent });
            }
            (KIND_CONNECT, Some(_)) => {
                // Our ACCEPT was lost; answer again without a second event.
                self.queue(from, KIND_ACCEPT, &[]);
            }
            (KIND_ACCEPT, Some(id)) => {
                let Some(conn) = self.conns.get_mut(&id) else {
                    return;
                };
                if conn.state == ConnState::Connecting {
                    conn.state = ConnState::Connected;
                    conn.rtt = Some(Instant::now().duration_since(conn.opened_at));
                    self.pending.push_back(TransportEvent::Connect {
                        id,
                        data: ConnectionIntent::None.as_u32(),
                    });
                }
            }
            (KIND_DISCONNECT, Some(id)) => {
                let reason = if data.remaining() >= 4 { data.get_u32() } else { 0 };
                self.remove(id);
                self.pending.push_back(TransportEvent::Disconnect { id, reason });
            }
            (KIND_DATA, Some(id)) => {
                if self.conns.get(&id).map(|c| c.state) == Some(ConnState::Connected) {
                    self.pending.push_back(TransportEvent::Receive { id, packet: data });
                }
            }
            (KIND_PING, Some(_)) => {
                let body = data.chunk().to_vec();
                self.queue(from, KIND_PONG, &body);
            }
            (KIND_PONG, Some(id)) => {
                if data.remaining() >= 8 {
                    let sent = data.get_u64();
                    let now = self.micros_since_epoch();
                    if let Some(conn) = self.conns.get_mut(&id) {
                        conn.rtt = Some(Duration::from_micros(now.saturating_sub(sent)));
                    }
                }
            }
            (kind, _) => {
                trace!(%from, kind, "Ignoring datagram");
            }
        }
    }

    fn housekeeping(&mut self) {
        let now = Instant::now();
        let expired: Vec<ConnectionId> = self
            .conns
            .iter()
            .filter(|(_, c)| match c.state {
                ConnState::Connecting => now.duration_since(c.opened_at) > self.cfg.connect_timeout,
                ConnState::Connected => now.duration_since(c.last_heard) > self.cfg.idle_timeout,
            })
            .map(|(id, _)| *id)
            .collect();
        for id in expired {
            if let Some(conn) = self.remove(id) {
                debug!(conn = %id, addr = %conn.addr, "Connection timed out");
                self.pending.push_back(TransportEvent::Disconnect {
                    id,
                    reason: TIMEOUT_REASON,
                });
            }
        }

        if now.duration_since(self.last_ping) >= self.cfg.ping_interval {
            self.last_ping = now;
            let stamp = self.micros_since_epoch().to_be_bytes();
            let targets: Vec<SocketAddr> = self
                .conns
                .values()
                .filter(|c| c.state == ConnState::Connected)
                .map(|c| c.addr)
                .collect();
            for addr in targets {
                self.queue(addr, KIND_PING, &stamp);
            }
        }
    }

    /// Pulls every datagram that is already readable.
    fn drain_readable(&mut self) -> anyhow::Result<()> {
        loop {
            match self.socket.try_recv_from(&mut self.recv_buf) {
                Ok((n, from)) => {
                    let data = Bytes::copy_from_slice(&self.recv_buf[..n]);
                    self.handle_datagram(from, data);
                }
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => return Ok(()),
                Err(e) => return Err(e).context("udp recv"),
            }
        }
    }
}

#[async_trait]
impl Transport for UdpHost {
    async fn service(&mut self, timeout: Duration) -> anyhow::Result<Option<TransportEvent>> {
        self.housekeeping();
        self.flush()?;
        if let Some(event) = self.pending.pop_front() {
            return Ok(Some(event));
        }

        let deadline = Instant::now() + timeout;
        loop {
            let received =
                tokio::time::timeout_at(deadline, self.socket.recv_from(&mut self.recv_buf)).await;
            match received {
                Ok(Ok((n, from))) => {
                    let data = Bytes::copy_from_slice(&self.recv_buf[..n]);
                    self.handle_datagram(from, data);
                    self.drain_readable()?;
                    self.flush()?;
                    if let Some(event) = self.pending.pop_front() {
                        return Ok(Some(event));
                    }
                }
                Ok(Err(e)) if e.kind() == std::io::ErrorKind::ConnectionReset => {
                    // ICMP port unreachable surfaced by some platforms; the idle timeout handles it.
                    trace!(error = %e, "udp reset");
                }
                Ok(Err(e)) => return Err(e).context("udp recv"),
                Err(_) => return Ok(None),
            }
        }
    }

    fn check_events(&mut self) -> Option<TransportEvent> {
        self.pending.pop_front()
    }

    fn connect(
        &mut self,
        addr: SocketAddr,
        intent: ConnectionIntent,
    ) -> anyhow::Result<ConnectionId> {
        if self.by_addr.contains_key(&addr) {
            anyhow::bail!("already connected to {addr}");
        }
        let id = self.allocate(addr, ConnState::Connecting);
        self.queue(addr, KIND_CONNECT, &intent.as_u32().to_be_bytes());
        debug!(%addr, conn = %id, ?intent, "Connecting");
        Ok(id)
    }

    fn send(&mut self, id: ConnectionId, packet: Bytes) -> anyhow::Result<()> {
        let conn = self
            .conns
            .get(&id)
            .with_context(|| format!("send to unknown connection {id}"))?;
        if conn.state != ConnState::Connected {
            anyhow::bail!("connection {id} is not established");
        }
        let addr = conn.addr;
        self.queue(addr, KIND_DATA, &packet);
        Ok(())
    }

    fn flush(&mut self) -> anyhow::Result<()> {
        while let Some((addr, datagram)) = self.outbound.pop_front() {
            match self.socket.try_send_to(&datagram, addr) {
                Ok(_) => {}
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    self.outbound.push_front((addr, datagram));
                    break;
                }
                Err(e) => warn!(%addr, error = %e, "udp send failed"),
            }
        }
        Ok(())
    }

    fn disconnect(&mut self, id: ConnectionId, code: u32) {
        if let Some(conn) = self.remove(id) {
            self.queue(conn.addr, KIND_DISCONNECT, &code.to_be_bytes());
            self.pending
                .push_back(TransportEvent::Disconnect { id, reason: code });
        }
    }

    fn disconnect_now(&mut self, id: ConnectionId, code: u32) {
        if let Some(conn) = self.remove(id) {
            self.queue(conn.addr, KIND_DISCONNECT, &code.to_be_bytes());
            if let Err(e) = self.flush() {
                warn!(conn = %id, error = %e, "flush on disconnect failed");
            }
        }
    }

    fn round_trip_time(&self, id: ConnectionId) -> Option<Duration> {
        self.conns.get(&id).and_then(|c| c.rtt)
    }

    fn remote_addr(&self, id: ConnectionId) -> Option<SocketAddr> {
        self.conns.get(&id).map(|c| c.addr)
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        self.socket.local_addr().ok()
    }
}
