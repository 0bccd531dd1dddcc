//! Tick synchronization state.
//!
//! Three counters are in play:
//! - `input_tick`: the tick a batch of inputs belongs to.
//! - `confirm_input_tick`: newest client input the authority has incorporated.
//! - `snapshot_tick`: which authoritative snapshot a player list reflects.
//!
//! Datagrams can arrive late, twice, or not at all. Receivers therefore only
//! ever move forward: a `GameStateUpdate` is applied only when its snapshot is
//! strictly newer than the held one, and clients re-send every unconfirmed
//! input until the authority acknowledges it.

use std::collections::VecDeque;

use crate::event::{GameStateUpdate, PlayerControls, PlayerInputsUpdate, TickInput};
use crate::object::PlayerState;

/// Result of offering a `GameStateUpdate` to a [`TickSync`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    /// The record was newer and is now the held state.
    Applied,
    /// The record's snapshot is not newer than the held one.
    Stale,
    /// A winner was already observed; the session no longer advances.
    Finished,
}

/// Receiver side of the protocol for one connection.
#[derive(Debug, Clone, Default)]
pub struct TickSync {
    last_snapshot_tick: Option<u64>,
    input_tick: u64,
    confirm_input_tick: u64,
    players: Vec<PlayerState>,
    finished: bool,
}

impl TickSync {
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies `update` if it is newer than anything applied so far.
    pub fn apply(&mut self, update: &GameStateUpdate) -> SyncOutcome {
        if self.finished {
            return SyncOutcome::Finished;
        }
        if let Some(last) = self.last_snapshot_tick {
            if update.snapshot_tick <= last {
                return SyncOutcome::Stale;
            }
        }
        self.last_snapshot_tick = Some(update.snapshot_tick);
        self.input_tick = update.input_tick;
        self.confirm_input_tick = self.confirm_input_tick.max(update.confirm_input_tick);
        self.players.clone_from(&update.players);
        self.finished = update.has_winner;
        SyncOutcome::Applied
    }

    pub fn last_snapshot_tick(&self) -> Option<u64> {
        self.last_snapshot_tick
    }

    pub fn input_tick(&self) -> u64 {
        self.input_tick
    }

    pub fn confirm_input_tick(&self) -> u64 {
        self.confirm_input_tick
    }

    pub fn players(&self) -> &[PlayerState] {
        &self.players
    }

    /// Once true, stays true.
    pub fn is_finished(&self) -> bool {
        self.finished
    }
}

/// Client-side record of inputs the authority has not confirmed yet.
#[derive(Debug, Clone)]
pub struct InputHistory {
    entries: VecDeque<TickInput>,
    next_tick: u64,
    capacity: usize,
}

impl InputHistory {
    /// `capacity` bounds the history when the authority stops confirming.
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity),
            next_tick: 1,
            capacity: capacity.max(1),
        }
    }

    /// Stores the controls for the next input tick and returns that tick.
    pub fn record(&mut self, controls: PlayerControls) -> u64 {
        let tick = self.next_tick;
        self.next_tick += 1;
        self.entries.push_back(TickInput { tick, controls });
        while self.entries.len() > self.capacity {
            self.entries.pop_front();
        }
        tick
    }

    /// Drops every entry the authority has incorporated.
    pub fn confirm(&mut self, confirm_input_tick: u64) {
        while self
            .entries
            .front()
            .is_some_and(|e| e.tick <= confirm_input_tick)
        {
            self.entries.pop_front();
        }
    }

    /// Newest tick handed out by [`InputHistory::record`], 0 before the first.
    pub fn input_tick(&self) -> u64 {
        self.next_tick - 1
    }

    pub fn unconfirmed(&self) -> impl Iterator<Item = &TickInput> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Builds the update carrying every unconfirmed input.
    pub fn to_update(&self, player_id: u32, snapshot_tick: u64) -> PlayerInputsUpdate {
        PlayerInputsUpdate {
            player_id,
            input_tick: self.input_tick(),
            snapshot_tick,
            inputs: self.entries.iter().copied().collect(),
        }
    }
}

/// Authority-side counters used to stamp outgoing records.
#[derive(Debug, Clone, Default)]
pub struct TickAuthority {
    input_tick: u64,
    snapshot_tick: u64,
}

impl TickAuthority {
    pub fn new() -> Self {
        Self::default()
    }

    /// Moves to the next simulation step.
    pub fn advance(&mut self) {
        self.input_tick += 1;
        self.snapshot_tick += 1;
    }

    pub fn input_tick(&self) -> u64 {
        self.input_tick
    }

    pub fn snapshot_tick(&self) -> u64 {
        self.snapshot_tick
    }

    /// Builds the record for one receiver. `confirm` is clamped to `input_tick`.
    pub fn update_for(
        &self,
        confirm: u64,
        players: Vec<PlayerState>,
        has_winner: bool,
    ) -> GameStateUpdate {
        GameStateUpdate {
            input_tick: self.input_tick,
            confirm_input_tick: confirm.min(self.input_tick),
            snapshot_tick: self.snapshot_tick,
            players,
            has_winner,
        }
    }
}
