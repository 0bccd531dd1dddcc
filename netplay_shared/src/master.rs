//! Messages exchanged with the rendezvous (master) server.
//!
//! These never travel inside a game envelope; the master connection has its
//! own one-byte tag:
//! ```text
//! [tag: u8] [payload ...]
//! ```

use bytes::{Bytes, BytesMut};

use crate::wire::{from_bytes, Wire, WireError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MasterMessageType {
    RegisterServer = 0,
    PushNatPeers = 1,
}

impl MasterMessageType {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(MasterMessageType::RegisterServer),
            1 => Some(MasterMessageType::PushNatPeers),
            _ => None,
        }
    }
}

crate::wire_enum!(MasterMessageType, "MasterMessageType");

/// A remote endpoint the master wants us to open a hole towards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NatPeer {
    pub address: String,
    pub port: u16,
}

impl Wire for NatPeer {
    fn write(&self, out: &mut BytesMut) {
        self.address.write(out);
        self.port.write(out);
    }

    fn read(input: &mut Bytes) -> Result<Self, WireError> {
        Ok(Self {
            address: String::read(input)?,
            port: u16::read(input)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MasterMessage {
    /// Server -> master: where this server can be reached on its local network.
    RegisterServer { local_address: String, local_port: u16 },
    /// Master -> server: clients that want to join and need NAT introduction.
    PushNatPeers { peers: Vec<NatPeer> },
}

impl MasterMessage {
    pub fn message_type(&self) -> MasterMessageType {
        match self {
            MasterMessage::RegisterServer { .. } => MasterMessageType::RegisterServer,
            MasterMessage::PushNatPeers { .. } => MasterMessageType::PushNatPeers,
        }
    }

    pub fn to_bytes(&self) -> Bytes {
        let mut out = BytesMut::new();
        self.message_type().write(&mut out);
        match self {
            MasterMessage::RegisterServer {
                local_address,
                local_port,
            } => {
                local_address.write(&mut out);
                local_port.write(&mut out);
            }
            MasterMessage::PushNatPeers { peers } => peers.write(&mut out),
        }
        out.freeze()
    }

    pub fn decode(mut input: Bytes) -> Result<Self, WireError> {
        match MasterMessageType::read(&mut input)? {
            MasterMessageType::RegisterServer => {
                let (local_address, local_port) = from_bytes::<(String, u16)>(input)?;
                Ok(MasterMessage::RegisterServer {
                    local_address,
                    local_port,
                })
            }
            MasterMessageType::PushNatPeers => Ok(MasterMessage::PushNatPeers {
                peers: from_bytes(input)?,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_nat_peers_decodes() {
        let msg = MasterMessage::PushNatPeers {
            peers: vec![
                NatPeer {
                    address: "10.0.0.5".to_string(),
                    port: 5900,
                },
                NatPeer {
                    address: "192.168.1.20".to_string(),
                    port: 5901,
                },
            ],
        };
        assert_eq!(MasterMessage::decode(msg.to_bytes()).unwrap(), msg);
    }

    #[test]
    fn unknown_master_tag_fails() {
        let err = MasterMessage::decode(Bytes::from_static(&[9])).unwrap_err();
        assert_eq!(
            err,
            WireError::UnknownTag {
                kind: "MasterMessageType",
                value: 9
            }
        );
    }
}
