//! Master-server proxy.
//!
//! Holds at most one live connection to the rendezvous server. That connection
//! is not a game peer: it carries [`MasterMessage`]s, not game envelopes.

use bytes::Bytes;
use netplay_shared::{
    master::{MasterMessage, NatPeer},
    wire::WireError,
};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::transport::ConnectionId;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MasterError {
    #[error("master connection {active} already active, refusing {attempted}")]
    AlreadyConnected {
        active: ConnectionId,
        attempted: ConnectionId,
    },

    #[error("no master address configured")]
    NoEndpoint,

    #[error("master message: {0}")]
    Decode(#[from] WireError),
}

#[derive(Debug, Default)]
pub struct MasterServerProxy {
    endpoint: Option<(String, u16)>,
    active: Option<ConnectionId>,
    introductions: u64,
}

impl MasterServerProxy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Configures the rendezvous target. Does not connect.
    pub fn set_address_and_port(&mut self, address: impl Into<String>, port: u16) {
        let address = address.into();
        debug!(%address, port, "Master endpoint set");
        self.endpoint = Some((address, port));
    }

    pub fn endpoint(&self) -> Option<(&str, u16)> {
        self.endpoint.as_ref().map(|(a, p)| (a.as_str(), *p))
    }

    /// Records the live master connection.
    pub fn on_connected(&mut self, id: ConnectionId) -> Result<(), MasterError> {
        if let Some(active) = self.active {
            return Err(MasterError::AlreadyConnected {
                active,
                attempted: id,
            });
        }
        info!(conn = %id, "Master server connected");
        self.active = Some(id);
        Ok(())
    }

    /// Replaces or clears the active handle. `None` is the disconnect path.
    pub fn set_peer(&mut self, id: Option<ConnectionId>) {
        if id.is_none() {
            if let Some(old) = self.active {
                info!(conn = %old, "Master server disconnected");
            }
        }
        self.active = id;
    }

    pub fn active(&self) -> Option<ConnectionId> {
        self.active
    }

    pub fn is_connected(&self) -> bool {
        self.active.is_some()
    }

    /// Total number of NAT peers introduced so far.
    pub fn introductions(&self) -> u64 {
        self.introductions
    }

    /// Decodes a packet from the master. Returns the introduced peers, if any.
    pub fn on_received(
        &mut self,
        id: ConnectionId,
        packet: Bytes,
    ) -> Result<Option<Vec<NatPeer>>, MasterError> {
        if self.active != Some(id) {
            warn!(conn = %id, active = ?self.active, "Dropping packet for inactive master connection");
            return Ok(None);
        }
        match MasterMessage::decode(packet)? {
            MasterMessage::PushNatPeers { peers } => {
                debug!(conn = %id, count = peers.len(), "NAT peers pushed");
                self.introductions += peers.len() as u64;
                Ok(Some(peers))
            }
            other => {
                warn!(conn = %id, kind = ?other.message_type(), "Unexpected message from master");
                Ok(None)
            }
        }
    }

    /// Registration announcing where this server is reachable.
    pub fn registration(&self, local_address: &str, local_port: u16) -> Bytes {
        MasterMessage::RegisterServer {
            local_address: local_address.to_string(),
            local_port,
        }
        .to_bytes()
    }
}
