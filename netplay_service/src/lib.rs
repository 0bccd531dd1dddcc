//! `netplay_service`
//!
//! Session service on top of a datagram transport:
//! - Polls the transport from the caller's loop (single-threaded, no callbacks from other threads)
//! - Classifies connections by intent: game peer, master server, or rejected
//! - Decodes envelopes and dispatches typed objects/events to a [`SessionHandler`]
//! - Drops stale or post-winner game state per peer
//! - Relays NAT introductions from the master server
//!
//! Transport model:
//! - UDP: one socket, connection-oriented datagrams with an intent on connect

pub mod handler;
pub mod master;
pub mod peer;
pub mod scripted;
pub mod service;
pub mod transport;
pub mod udp;

pub use handler::SessionHandler;
pub use master::{MasterError, MasterServerProxy};
pub use peer::{Peer, PeerStats};
pub use service::{LinkRole, Service, ServiceError, ServiceState, StopHandle};
pub use transport::{ConnectionId, ConnectionIntent, Transport, TransportEvent};
pub use udp::{UdpHost, UdpHostConfig};
