//! Message envelope.
//!
//! Wire format:
//! ```text
//! [outer: u8 MessageType] [inner: u8 ObjectType | EventType] [payload ...]
//! ```
//!
//! Decoding happens in two levels. The outer tag picks the domain of the inner
//! tag; an unknown outer tag leaves the reader with no idea what follows, so it
//! is reported separately ([`EnvelopeError::Framing`]) from an unknown inner tag
//! ([`EnvelopeError::InnerType`]).

use bytes::{BufMut, Bytes, BytesMut};
use thiserror::Error;

use crate::event::{EventType, GameStateUpdate, PlayerInputsUpdate};
use crate::object::{GameObject, ObjectType, PlayerState};
use crate::wire::{from_bytes, Wire, WireError};

/// Outer type tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    Object = 0,
    Event = 1,
}

impl MessageType {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(MessageType::Object),
            1 => Some(MessageType::Event),
            _ => None,
        }
    }
}

crate::wire_enum!(MessageType, "MessageType");

/// Resolved outer + inner tag pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Header {
    Object(ObjectType),
    Event(EventType),
}

impl Header {
    pub fn message_type(&self) -> MessageType {
        match self {
            Header::Object(_) => MessageType::Object,
            Header::Event(_) => MessageType::Event,
        }
    }

    pub fn inner_tag(&self) -> u8 {
        match self {
            Header::Object(t) => *t as u8,
            Header::Event(t) => *t as u8,
        }
    }
}

/// Envelope decode failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EnvelopeError {
    /// Outer tag missing or unknown; the rest of the buffer cannot be interpreted.
    #[error("envelope framing: {0}")]
    Framing(WireError),

    /// Outer tag known, inner tag missing or unknown for that domain.
    #[error("{outer:?} inner type: {source}")]
    InnerType {
        outer: MessageType,
        #[source]
        source: WireError,
    },
}

/// A framed message with an undecoded payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub header: Header,
    pub payload: Bytes,
}

impl Envelope {
    pub fn new(header: Header, payload: Bytes) -> Self {
        Self { header, payload }
    }

    pub fn encode(&self) -> Bytes {
        let mut out = BytesMut::with_capacity(2 + self.payload.len());
        self.header.message_type().write(&mut out);
        out.put_u8(self.header.inner_tag());
        out.put_slice(&self.payload);
        out.freeze()
    }

    pub fn decode(mut input: Bytes) -> Result<Self, EnvelopeError> {
        let outer = MessageType::read(&mut input).map_err(EnvelopeError::Framing)?;
        let header = match outer {
            MessageType::Object => ObjectType::read(&mut input).map(Header::Object),
            MessageType::Event => EventType::read(&mut input).map(Header::Event),
        }
        .map_err(|source| EnvelopeError::InnerType { outer, source })?;
        Ok(Self {
            header,
            payload: input,
        })
    }
}

/// Decoded OBJECT payloads.
#[derive(Debug, Clone, PartialEq)]
pub enum ObjectMessage {
    Player(PlayerState),
    Game(GameObject),
}

impl ObjectMessage {
    pub fn object_type(&self) -> ObjectType {
        match self {
            ObjectMessage::Player(_) => ObjectType::Player,
            ObjectMessage::Game(_) => ObjectType::Game,
        }
    }

    pub fn decode(object_type: ObjectType, payload: Bytes) -> Result<Self, WireError> {
        match object_type {
            ObjectType::Player => from_bytes(payload).map(ObjectMessage::Player),
            ObjectType::Game => from_bytes(payload).map(ObjectMessage::Game),
        }
    }

    fn write_payload(&self, out: &mut BytesMut) {
        match self {
            ObjectMessage::Player(p) => p.write(out),
            ObjectMessage::Game(g) => g.write(out),
        }
    }
}

/// Decoded EVENT payloads.
#[derive(Debug, Clone, PartialEq)]
pub enum EventMessage {
    PlayerInputsUpdate(PlayerInputsUpdate),
    GameStateUpdate(GameStateUpdate),
}

impl EventMessage {
    pub fn event_type(&self) -> EventType {
        match self {
            EventMessage::PlayerInputsUpdate(_) => EventType::PlayerInputsUpdate,
            EventMessage::GameStateUpdate(_) => EventType::GameStateUpdate,
        }
    }

    pub fn decode(event_type: EventType, payload: Bytes) -> Result<Self, WireError> {
        match event_type {
            EventType::PlayerInputsUpdate => {
                from_bytes(payload).map(EventMessage::PlayerInputsUpdate)
            }
            EventType::GameStateUpdate => from_bytes(payload).map(EventMessage::GameStateUpdate),
        }
    }

    fn write_payload(&self, out: &mut BytesMut) {
        match self {
            EventMessage::PlayerInputsUpdate(u) => u.write(out),
            EventMessage::GameStateUpdate(u) => u.write(out),
        }
    }
}

/// Any message a game peer can send.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Object(ObjectMessage),
    Event(EventMessage),
}

impl Message {
    pub fn header(&self) -> Header {
        match self {
            Message::Object(o) => Header::Object(o.object_type()),
            Message::Event(e) => Header::Event(e.event_type()),
        }
    }

    /// Encodes the full envelope.
    pub fn to_bytes(&self) -> Bytes {
        let mut payload = BytesMut::new();
        match self {
            Message::Object(o) => o.write_payload(&mut payload),
            Message::Event(e) => e.write_payload(&mut payload),
        }
        Envelope::new(self.header(), payload.freeze()).encode()
    }
}

impl From<ObjectMessage> for Message {
    fn from(o: ObjectMessage) -> Self {
        Message::Object(o)
    }
}

impl From<EventMessage> for Message {
    fn from(e: EventMessage) -> Self {
        Message::Event(e)
    }
}

impl From<GameStateUpdate> for Message {
    fn from(u: GameStateUpdate) -> Self {
        Message::Event(EventMessage::GameStateUpdate(u))
    }
}

impl From<PlayerInputsUpdate> for Message {
    fn from(u: PlayerInputsUpdate) -> Self {
        Message::Event(EventMessage::PlayerInputsUpdate(u))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn header_strategy() -> impl Strategy<Value = Header> {
        prop_oneof![
            prop::sample::select(ObjectType::ALL.to_vec()).prop_map(Header::Object),
            prop::sample::select(EventType::ALL.to_vec()).prop_map(Header::Event),
        ]
    }

    proptest! {
        #[test]
        fn envelope_roundtrip(header in header_strategy(), payload in prop::collection::vec(any::<u8>(), 0..256)) {
            let envelope = Envelope::new(header, Bytes::from(payload));
            let back = Envelope::decode(envelope.encode()).unwrap();
            prop_assert_eq!(back, envelope);
        }
    }

    #[test]
    fn framing_is_outer_then_inner() {
        let update = GameStateUpdate {
            input_tick: 1,
            confirm_input_tick: 1,
            snapshot_tick: 1,
            players: Vec::new(),
            has_winner: false,
        };
        let bytes = Message::from(update).to_bytes();
        assert_eq!(bytes[0], MessageType::Event as u8);
        assert_eq!(bytes[1], EventType::GameStateUpdate as u8);
    }

    #[test]
    fn unknown_outer_type_is_framing_error() {
        let err = Envelope::decode(Bytes::from_static(&[0x07, 0x00])).unwrap_err();
        assert!(matches!(err, EnvelopeError::Framing(WireError::UnknownTag { .. })));
    }

    #[test]
    fn empty_buffer_is_framing_error() {
        let err = Envelope::decode(Bytes::new()).unwrap_err();
        assert!(matches!(err, EnvelopeError::Framing(WireError::Truncated { .. })));
    }

    #[test]
    fn unknown_event_type_is_inner_error() {
        let err = Envelope::decode(Bytes::from_static(&[0x01, 0x02, 0xaa])).unwrap_err();
        assert_eq!(
            err,
            EnvelopeError::InnerType {
                outer: MessageType::Event,
                source: WireError::UnknownTag {
                    kind: "EventType",
                    value: 2
                }
            }
        );
    }

    #[test]
    fn object_message_decodes_from_envelope() {
        let msg = Message::Object(ObjectMessage::Game(GameObject {
            round: 1,
            max_rounds: 5,
            status: crate::object::GameStatus::Running,
        }));
        let envelope = Envelope::decode(msg.to_bytes()).unwrap();
        let Header::Object(object_type) = envelope.header else {
            panic!("expected object header");
        };
        let decoded = ObjectMessage::decode(object_type, envelope.payload).unwrap();
        assert_eq!(Message::Object(decoded), msg);
    }
}
