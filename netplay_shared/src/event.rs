//! Events carried in EVENT envelopes.
//!
//! Two events drive the tick synchronization protocol:
//! - `PlayerInputsUpdate`: client -> authority, the client's unconfirmed inputs.
//! - `GameStateUpdate`: authority -> client, the authoritative snapshot plus
//!   which client inputs have been incorporated.

use bitflags::bitflags;
use bytes::{Bytes, BytesMut};

use crate::object::PlayerState;
use crate::wire::{Wire, WireError};
use crate::wire_enum;

/// Inner type tag of an EVENT envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventType {
    PlayerInputsUpdate = 0,
    GameStateUpdate = 1,
}

impl EventType {
    pub const ALL: [EventType; 2] = [EventType::PlayerInputsUpdate, EventType::GameStateUpdate];

    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(EventType::PlayerInputsUpdate),
            1 => Some(EventType::GameStateUpdate),
            _ => None,
        }
    }
}

wire_enum!(EventType, "EventType");

bitflags! {
    /// Buttons held by a player during one input tick.
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
    pub struct PlayerControls: u8 {
        const LEFT = 1 << 0;
        const RIGHT = 1 << 1;
        const UP = 1 << 2;
        const DOWN = 1 << 3;
        const SHOOT = 1 << 4;
        const PICK = 1 << 5;
        const STATUS = 1 << 6;
    }
}

impl Wire for PlayerControls {
    fn write(&self, out: &mut BytesMut) {
        self.bits().write(out);
    }

    fn read(input: &mut Bytes) -> Result<Self, WireError> {
        let raw = u8::read(input)?;
        PlayerControls::from_bits(raw).ok_or(WireError::Invalid {
            field: "PlayerControls",
            reason: format!("unknown bits {raw:#010b}"),
        })
    }
}

/// Controls sampled for a single input tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickInput {
    pub tick: u64,
    pub controls: PlayerControls,
}

impl Wire for TickInput {
    fn write(&self, out: &mut BytesMut) {
        self.tick.write(out);
        self.controls.write(out);
    }

    fn read(input: &mut Bytes) -> Result<Self, WireError> {
        Ok(Self {
            tick: u64::read(input)?,
            controls: PlayerControls::read(input)?,
        })
    }
}

/// Client -> authority: every input the authority has not yet confirmed.
#[derive(Debug, Clone, PartialEq)]
pub struct PlayerInputsUpdate {
    pub player_id: u32,
    /// Newest input tick produced by the client.
    pub input_tick: u64,
    /// Newest snapshot the client has applied.
    pub snapshot_tick: u64,
    /// Unconfirmed inputs, oldest first.
    pub inputs: Vec<TickInput>,
}

impl Wire for PlayerInputsUpdate {
    fn write(&self, out: &mut BytesMut) {
        self.player_id.write(out);
        self.input_tick.write(out);
        self.snapshot_tick.write(out);
        self.inputs.write(out);
    }

    fn read(input: &mut Bytes) -> Result<Self, WireError> {
        let update = Self {
            player_id: u32::read(input)?,
            input_tick: u64::read(input)?,
            snapshot_tick: u64::read(input)?,
            inputs: Vec::read(input)?,
        };
        if update.inputs.iter().any(|i| i.tick > update.input_tick) {
            return Err(WireError::Invalid {
                field: "PlayerInputsUpdate.inputs",
                reason: format!("input newer than input_tick {}", update.input_tick),
            });
        }
        Ok(update)
    }
}

/// Authority -> client: tick synchronization record.
///
/// Field order on the wire is `input_tick, confirm_input_tick, snapshot_tick,
/// players, has_winner`.
#[derive(Debug, Clone, PartialEq)]
pub struct GameStateUpdate {
    pub input_tick: u64,
    /// Newest client input the authority has incorporated; never above `input_tick`.
    pub confirm_input_tick: u64,
    /// Identifies the snapshot `players` reflects.
    pub snapshot_tick: u64,
    pub players: Vec<PlayerState>,
    pub has_winner: bool,
}

impl Wire for GameStateUpdate {
    fn write(&self, out: &mut BytesMut) {
        self.input_tick.write(out);
        self.confirm_input_tick.write(out);
        self.snapshot_tick.write(out);
        self.players.write(out);
        self.has_winner.write(out);
    }

    fn read(input: &mut Bytes) -> Result<Self, WireError> {
        let update = Self {
            input_tick: u64::read(input)?,
            confirm_input_tick: u64::read(input)?,
            snapshot_tick: u64::read(input)?,
            players: Vec::read(input)?,
            has_winner: bool::read(input)?,
        };
        if update.confirm_input_tick > update.input_tick {
            return Err(WireError::Invalid {
                field: "GameStateUpdate.confirm_input_tick",
                reason: format!(
                    "{} is ahead of input_tick {}",
                    update.confirm_input_tick, update.input_tick
                ),
            });
        }
        Ok(update)
    }
}
