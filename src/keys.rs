// Logical key vocabulary and its mapping onto the engine's native keycodes.

use serde::{Deserialize, Serialize};

/// Native keycodes understood by the engine's responders.
pub mod native {
    pub const KEY_RIGHTARROW: i32 = 0xae;
    pub const KEY_LEFTARROW: i32 = 0xac;
    pub const KEY_UPARROW: i32 = 0xad;
    pub const KEY_DOWNARROW: i32 = 0xaf;
    pub const KEY_ESCAPE: i32 = 27;
    pub const KEY_ENTER: i32 = 13;
    pub const KEY_TAB: i32 = 9;
    pub const KEY_SPACE: i32 = 32;
    pub const KEY_COMMA: i32 = 44;
    pub const KEY_PERIOD: i32 = 46;
    pub const KEY_RSHIFT: i32 = 0x80 + 0x36;
    pub const KEY_RCTRL: i32 = 0x80 + 0x1d;
    pub const KEY_RALT: i32 = 0x80 + 0x38;
}

/// Small, stable input vocabulary exposed to the host.
///
/// The discriminants are part of the boundary and never change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum LogicalKey {
    Forward = 1,
    Backward = 2,
    TurnLeft = 3,
    TurnRight = 4,
    /// Primary action (fire).
    Fire = 5,
    /// Secondary action (open doors, push switches).
    Use = 6,
    /// Menu cancel / open-close the menu.
    Cancel = 7,
    /// Menu advance.
    Confirm = 8,
}

impl LogicalKey {
    pub const ALL: [LogicalKey; 8] = [
        LogicalKey::Forward,
        LogicalKey::Backward,
        LogicalKey::TurnLeft,
        LogicalKey::TurnRight,
        LogicalKey::Fire,
        LogicalKey::Use,
        LogicalKey::Cancel,
        LogicalKey::Confirm,
    ];

    /// The directional key that must never be held at the same time as `self`.
    pub fn opposite(self) -> Option<LogicalKey> {
        match self {
            LogicalKey::Forward => Some(LogicalKey::Backward),
            LogicalKey::Backward => Some(LogicalKey::Forward),
            _ => None,
        }
    }

    pub fn from_u8(value: u8) -> Option<LogicalKey> {
        LogicalKey::ALL.iter().copied().find(|k| *k as u8 == value)
    }

    pub fn name(self) -> &'static str {
        match self {
            LogicalKey::Forward => "forward",
            LogicalKey::Backward => "backward",
            LogicalKey::TurnLeft => "turn-left",
            LogicalKey::TurnRight => "turn-right",
            LogicalKey::Fire => "fire",
            LogicalKey::Use => "use",
            LogicalKey::Cancel => "cancel",
            LogicalKey::Confirm => "confirm",
        }
    }
}

/// Control bindings as they appear in the engine's configuration file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bindings {
    pub key_right: i32,
    pub key_left: i32,
    pub key_up: i32,
    pub key_down: i32,
    pub key_strafeleft: i32,
    pub key_straferight: i32,
    pub key_fire: i32,
    pub key_use: i32,
    pub key_strafe: i32,
    pub key_speed: i32,
}

impl Bindings {
    /// The canonical set forced over whatever the persisted config says.
    ///
    /// Fire goes on right ctrl: enter is taken by the message-refresh key.
    pub const CANONICAL: Bindings = Bindings {
        key_right: native::KEY_RIGHTARROW,
        key_left: native::KEY_LEFTARROW,
        key_up: native::KEY_UPARROW,
        key_down: native::KEY_DOWNARROW,
        key_strafeleft: native::KEY_COMMA,
        key_straferight: native::KEY_PERIOD,
        key_fire: native::KEY_RCTRL,
        key_use: native::KEY_SPACE,
        key_strafe: native::KEY_RALT,
        key_speed: native::KEY_RSHIFT,
    };

    /// `(config name, value)` pairs, in config file order.
    pub fn entries(&self) -> [(&'static str, i32); 10] {
        [
            ("key_right", self.key_right),
            ("key_left", self.key_left),
            ("key_up", self.key_up),
            ("key_down", self.key_down),
            ("key_strafeleft", self.key_strafeleft),
            ("key_straferight", self.key_straferight),
            ("key_fire", self.key_fire),
            ("key_use", self.key_use),
            ("key_strafe", self.key_strafe),
            ("key_speed", self.key_speed),
        ]
    }

    /// Reads bindings back out of a parsed config, falling back to the
    /// canonical value for anything missing.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<i32>) -> Bindings {
        let c = Bindings::CANONICAL;
        Bindings {
            key_right: lookup("key_right").unwrap_or(c.key_right),
            key_left: lookup("key_left").unwrap_or(c.key_left),
            key_up: lookup("key_up").unwrap_or(c.key_up),
            key_down: lookup("key_down").unwrap_or(c.key_down),
            key_strafeleft: lookup("key_strafeleft").unwrap_or(c.key_strafeleft),
            key_straferight: lookup("key_straferight").unwrap_or(c.key_straferight),
            key_fire: lookup("key_fire").unwrap_or(c.key_fire),
            key_use: lookup("key_use").unwrap_or(c.key_use),
            key_strafe: lookup("key_strafe").unwrap_or(c.key_strafe),
            key_speed: lookup("key_speed").unwrap_or(c.key_speed),
        }
    }
}

/// Logical → native translation fixed at initialization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyMap {
    bindings: Bindings,
}

impl KeyMap {
    pub fn new(bindings: Bindings) -> Self {
        Self { bindings }
    }

    pub fn bindings(&self) -> &Bindings {
        &self.bindings
    }

    pub fn native(&self, key: LogicalKey) -> i32 {
        match key {
            LogicalKey::Forward => self.bindings.key_up,
            LogicalKey::Backward => self.bindings.key_down,
            LogicalKey::TurnLeft => self.bindings.key_left,
            LogicalKey::TurnRight => self.bindings.key_right,
            LogicalKey::Fire => self.bindings.key_fire,
            LogicalKey::Use => self.bindings.key_use,
            // Menu keys are hardwired in the engine's menu responder.
            LogicalKey::Cancel => native::KEY_ESCAPE,
            LogicalKey::Confirm => native::KEY_ENTER,
        }
    }
}

impl Default for KeyMap {
    fn default() -> Self {
        Self::new(Bindings::CANONICAL)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_directional_keys_have_opposites() {
        assert_eq!(LogicalKey::Forward.opposite(), Some(LogicalKey::Backward));
        assert_eq!(LogicalKey::Backward.opposite(), Some(LogicalKey::Forward));
        for key in [LogicalKey::TurnLeft, LogicalKey::Fire, LogicalKey::Cancel] {
            assert_eq!(key.opposite(), None);
        }
    }

    #[test]
    fn discriminants_round_trip() {
        for key in LogicalKey::ALL {
            assert_eq!(LogicalKey::from_u8(key as u8), Some(key));
        }
        assert_eq!(LogicalKey::from_u8(0), None);
        assert_eq!(LogicalKey::from_u8(9), None);
    }

    #[test]
    fn canonical_map_avoids_enter_for_fire() {
        let map = KeyMap::default();
        assert_eq!(map.native(LogicalKey::Fire), native::KEY_RCTRL);
        assert_ne!(map.native(LogicalKey::Fire), native::KEY_ENTER);
        assert_eq!(map.native(LogicalKey::Confirm), native::KEY_ENTER);
        assert_eq!(map.native(LogicalKey::Cancel), native::KEY_ESCAPE);
        assert_eq!(map.native(LogicalKey::Forward), native::KEY_UPARROW);
    }

    #[test]
    fn lookup_falls_back_to_canonical() {
        let b = Bindings::from_lookup(|name| (name == "key_use").then_some(101));
        assert_eq!(b.key_use, 101);
        assert_eq!(b.key_fire, Bindings::CANONICAL.key_fire);
    }
}
