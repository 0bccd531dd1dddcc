//! Replicated objects carried in OBJECT envelopes.
//!
//! Only the fields needed to keep peers in sync are modelled here. Rendering,
//! animation and weapon state live with the gameplay collaborators.

use bytes::{Bytes, BytesMut};

use crate::wire::{Wire, WireError};
use crate::wire_enum;

/// Inner type tag of an OBJECT envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectType {
    Player = 0,
    Game = 1,
}

impl ObjectType {
    pub const ALL: [ObjectType; 2] = [ObjectType::Player, ObjectType::Game];

    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(ObjectType::Player),
            1 => Some(ObjectType::Game),
            _ => None,
        }
    }
}

wire_enum!(ObjectType, "ObjectType");

/// Facing direction of a player.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Orientation {
    Left = 0,
    #[default]
    Right = 1,
}

impl Orientation {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(Orientation::Left),
            1 => Some(Orientation::Right),
            _ => None,
        }
    }
}

wire_enum!(Orientation, "Orientation");

/// Snapshot of one player as seen by the authority.
#[derive(Debug, Clone, PartialEq)]
pub struct PlayerState {
    pub id: u32,
    pub position: (f32, f32),
    pub velocity: (f32, f32),
    pub orientation: Orientation,
    pub life: f32,
    pub ammo: u16,
    pub alive: bool,
}

impl PlayerState {
    pub const FULL_LIFE: f32 = 100.0;

    /// A fresh player standing at `position`.
    pub fn spawn(id: u32, position: (f32, f32)) -> Self {
        Self {
            id,
            position,
            velocity: (0.0, 0.0),
            orientation: Orientation::default(),
            life: Self::FULL_LIFE,
            ammo: 10,
            alive: true,
        }
    }
}

impl Wire for PlayerState {
    fn write(&self, out: &mut BytesMut) {
        self.id.write(out);
        self.position.write(out);
        self.velocity.write(out);
        self.orientation.write(out);
        self.life.write(out);
        self.ammo.write(out);
        self.alive.write(out);
    }

    fn read(input: &mut Bytes) -> Result<Self, WireError> {
        Ok(Self {
            id: u32::read(input)?,
            position: Wire::read(input)?,
            velocity: Wire::read(input)?,
            orientation: Orientation::read(input)?,
            life: f32::read(input)?,
            ammo: u16::read(input)?,
            alive: bool::read(input)?,
        })
    }
}

/// Round progress of the current game.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum GameStatus {
    #[default]
    Waiting = 0,
    Running = 1,
    Over = 2,
}

impl GameStatus {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(GameStatus::Waiting),
            1 => Some(GameStatus::Running),
            2 => Some(GameStatus::Over),
            _ => None,
        }
    }
}

wire_enum!(GameStatus, "GameStatus");

/// Game-wide object: which round is being played.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GameObject {
    pub round: u32,
    pub max_rounds: u32,
    pub status: GameStatus,
}

impl Wire for GameObject {
    fn write(&self, out: &mut BytesMut) {
        self.round.write(out);
        self.max_rounds.write(out);
        self.status.write(out);
    }

    fn read(input: &mut Bytes) -> Result<Self, WireError> {
        let object = Self {
            round: u32::read(input)?,
            max_rounds: u32::read(input)?,
            status: GameStatus::read(input)?,
        };
        if object.max_rounds > 0 && object.round > object.max_rounds {
            return Err(WireError::Invalid {
                field: "GameObject.round",
                reason: format!("round {} beyond max {}", object.round, object.max_rounds),
            });
        }
        Ok(object)
    }
}
