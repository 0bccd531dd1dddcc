//! Collaborator-facing callbacks.
//!
//! The service decodes everything it receives into typed values and hands them
//! to a [`SessionHandler`]. Gameplay, rendering and UI code live behind this
//! trait and never see raw bytes.

use netplay_shared::{
    master::NatPeer,
    message::{EventMessage, ObjectMessage},
};

use crate::{peer::Peer, transport::ConnectionId};

pub trait SessionHandler {
    /// A game peer finished connecting. Messages queued on `peer` go out on the next poll.
    fn on_peer_connected(&mut self, _peer: &mut Peer) {}

    /// A game peer is gone; `peer` is dropped right after this returns.
    fn on_peer_disconnected(&mut self, _peer: &Peer, _reason: u32) {}

    fn on_object(&mut self, peer: &mut Peer, object: ObjectMessage);

    /// Receives every event; a `GameStateUpdate` only arrives when it was newer
    /// than the last one applied on `peer`.
    fn on_event(&mut self, peer: &mut Peer, event: EventMessage);

    fn on_master_connected(&mut self, _id: ConnectionId) {}

    fn on_master_disconnected(&mut self, _id: ConnectionId) {}

    /// The master introduced peers that want to reach us through NAT.
    fn on_nat_peers(&mut self, _peers: Vec<NatPeer>) {}
}
