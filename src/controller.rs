//! Context-aware routing of a small physical button set onto logical keys.
//!
//! The router never talks to the engine. It sees engine state only through
//! the [`EngineSnapshot`] the stepping context hands it after each step, and
//! its only output is the injection function behind [`KeySink`].

use thiserror::Error;

use crate::engine::GameMode;
use crate::input::KeySender;
use crate::keys::LogicalKey;
use crate::lifecycle::EngineSnapshot;

/// Where routed keys go: `(logical key, hold in steps)`. A hold of zero
/// releases the key.
pub trait KeySink {
    fn inject(&mut self, key: LogicalKey, hold: u32);
}

impl KeySink for KeySender {
    fn inject(&mut self, key: LogicalKey, hold: u32) {
        if let Err(e) = self.tap(key, hold) {
            log::warn!("dropping {} (hold {hold}): {e}", key.name());
        }
    }
}

impl<F: FnMut(LogicalKey, u32)> KeySink for F {
    fn inject(&mut self, key: LogicalKey, hold: u32) {
        self(key, hold)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RouterConfigError {
    #[error("turn hold of {hold} steps does not exceed the engine's slow-turn threshold of {threshold}")]
    TurnHoldTooShort { hold: u32, threshold: u32 },
    #[error("{0} hold must be at least one step")]
    ZeroHold(&'static str),
}

/// Hold durations, in steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RouterConfig {
    pub move_hold: u32,
    pub turn_hold: u32,
    /// Default for single actions. One step would press and release within
    /// the same step.
    pub tap_hold: u32,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            move_hold: 8,
            turn_hold: 12,
            tap_hold: 2,
        }
    }
}

impl RouterConfig {
    /// Checks the holds against the engine's own slow-turn threshold.
    pub fn validate(&self, slow_turn_tics: u32) -> Result<(), RouterConfigError> {
        if self.move_hold == 0 {
            return Err(RouterConfigError::ZeroHold("move"));
        }
        if self.tap_hold == 0 {
            return Err(RouterConfigError::ZeroHold("tap"));
        }
        if self.turn_hold <= slow_turn_tics {
            return Err(RouterConfigError::TurnHoldTooShort {
                hold: self.turn_hold,
                threshold: slow_turn_tics,
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ControllerState {
    pub in_level: bool,
    pub menu_active: bool,
    pub alt_mode: bool,
}

pub struct Controller<S> {
    sink: S,
    config: RouterConfig,
    state: ControllerState,
}

impl<S: KeySink> Controller<S> {
    pub fn new(sink: S) -> Self {
        Self::with_config(sink, RouterConfig::default())
    }

    pub fn with_config(sink: S, config: RouterConfig) -> Self {
        Self {
            sink,
            config,
            state: ControllerState::default(),
        }
    }

    pub fn state(&self) -> ControllerState {
        self.state
    }

    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }

    pub fn move_forward(&mut self) {
        self.directional(LogicalKey::Forward);
    }

    pub fn move_backward(&mut self) {
        self.directional(LogicalKey::Backward);
    }

    fn directional(&mut self, key: LogicalKey) {
        if let Some(opposite) = key.opposite() {
            self.sink.inject(opposite, 0);
        }
        self.sink.inject(key, self.config.move_hold);
    }

    /// L2 in the normal scheme.
    pub fn turn_left(&mut self) {
        self.sink.inject(LogicalKey::TurnLeft, self.config.turn_hold);
    }

    pub fn turn_right(&mut self) {
        self.sink.inject(LogicalKey::TurnRight, self.config.turn_hold);
    }

    /// Flips the alternate scheme. Returns whether anything changed.
    pub fn toggle_mode(&mut self) -> bool {
        if !self.state.in_level {
            return false;
        }
        self.state.alt_mode = !self.state.alt_mode;
        log::debug!("control scheme: {}", if self.state.alt_mode { "alt" } else { "normal" });
        true
    }

    /// Fire in a level, menu-advance everywhere else. Always absorbs the
    /// button.
    pub fn contextual_primary(&mut self) -> bool {
        let key = if self.state.in_level {
            LogicalKey::Fire
        } else {
            LogicalKey::Confirm
        };
        self.sink.inject(key, self.config.tap_hold);
        true
    }

    /// Force-releases every key and drops the alternate scheme. Returns
    /// whether the scheme changed.
    pub fn exit_level(&mut self) -> bool {
        for key in LogicalKey::ALL {
            self.sink.inject(key, 0);
        }
        std::mem::replace(&mut self.state.alt_mode, false)
    }

    /// Mirrors a fresh snapshot. Returns true exactly when this snapshot ends
    /// an active level.
    pub fn update_snapshot(&mut self, snapshot: &EngineSnapshot) -> bool {
        let menu_active = snapshot.alive && snapshot.menu_active;
        let in_level = snapshot.alive && snapshot.mode == GameMode::Level && !menu_active;
        let left_level = self.state.in_level && !in_level;
        self.state.menu_active = menu_active;
        self.state.in_level = in_level;
        if left_level {
            self.state.alt_mode = false;
        }
        left_level
    }

    pub fn press(&mut self, button: Button) -> bool {
        match button {
            Button::Up => self.move_forward(),
            Button::Down => self.move_backward(),
            Button::Back => return self.contextual_primary(),
            Button::L1 => return self.toggle_mode(),
            Button::L2 => {
                if self.state.alt_mode {
                    self.sink.inject(LogicalKey::Use, self.config.tap_hold);
                } else {
                    self.turn_left();
                }
            }
            Button::L3 => {
                if self.state.alt_mode {
                    self.sink.inject(LogicalKey::Cancel, self.config.tap_hold);
                } else if self.state.menu_active {
                    self.sink.inject(LogicalKey::Confirm, self.config.tap_hold);
                } else {
                    self.turn_right();
                }
            }
        }
        true
    }

    pub fn footer(&self) -> [&'static str; 3] {
        footer_labels(self.state.alt_mode)
    }
}

/// The host's physical buttons.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Button {
    Up,
    Down,
    Back,
    L1,
    L2,
    L3,
}

impl Button {
    pub const ALL: [Button; 6] = [
        Button::Up,
        Button::Down,
        Button::Back,
        Button::L1,
        Button::L2,
        Button::L3,
    ];

    pub fn from_name(name: &str) -> Option<Button> {
        match name.trim().to_ascii_uppercase().as_str() {
            "UP" => Some(Button::Up),
            "DOWN" => Some(Button::Down),
            "BACK" => Some(Button::Back),
            "L1" => Some(Button::L1),
            "L2" => Some(Button::L2),
            "L3" => Some(Button::L3),
            _ => None,
        }
    }
}

/// Labels for the L1/L2/L3 footer slots.
pub fn footer_labels(alt_mode: bool) -> [&'static str; 3] {
    if alt_mode {
        ["NRM", "USE", "ESC"]
    } else {
        ["ALT", "◄", "►/OK"]
    }
}
