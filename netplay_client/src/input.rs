//! Input handling.
//!
//! In a real game this would integrate with windowing and key bindings. This
//! module turns sampled button state into the per-tick `PlayerControls` the
//! client records and sends.

use netplay_shared::event::PlayerControls;

/// User input state at a moment in time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InputState {
    pub left: bool,
    pub right: bool,
    pub up: bool,
    pub down: bool,
    pub shoot: bool,
    pub pick: bool,
    pub status: bool,
}

impl InputState {
    pub fn controls(self) -> PlayerControls {
        let mut c = PlayerControls::empty();
        c.set(PlayerControls::LEFT, self.left);
        c.set(PlayerControls::RIGHT, self.right);
        c.set(PlayerControls::UP, self.up);
        c.set(PlayerControls::DOWN, self.down);
        c.set(PlayerControls::SHOOT, self.shoot);
        c.set(PlayerControls::PICK, self.pick);
        c.set(PlayerControls::STATUS, self.status);
        c
    }
}

/// Deterministic input pattern for headless runs: walk right and left in
/// alternating one-second stretches, firing every few ticks and reloading
/// when the walk turns around.
pub fn patrol(tick: u64, tick_hz: u32) -> InputState {
    let period = u64::from(tick_hz.max(1));
    let phase = tick % (2 * period);
    InputState {
        right: phase < period,
        left: phase >= period,
        shoot: tick % 5 == 0,
        pick: phase == 0,
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn controls_reflect_buttons() {
        let input = InputState {
            left: true,
            shoot: true,
            ..Default::default()
        };
        assert_eq!(
            input.controls(),
            PlayerControls::LEFT | PlayerControls::SHOOT
        );
        assert!(InputState::default().controls().is_empty());
    }

    #[test]
    fn patrol_turns_around_every_period() {
        assert!(patrol(1, 10).right);
        assert!(patrol(12, 10).left);
        assert!(patrol(20, 10).pick);
    }
}
