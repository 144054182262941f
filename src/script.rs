// Scripted button input for headless runs.
//
// Format: `start-end:BUTTON+BUTTON;step:BUTTON;...`. A button is
// pressed on the first step its range covers; ranges are inclusive.

use bitflags::bitflags;
use thiserror::Error;

use crate::controller::Button;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct Buttons: u8 {
        const UP = 0b0000_0001;
        const DOWN = 0b0000_0010;
        const BACK = 0b0000_0100;
        const L1 = 0b0000_1000;
        const L2 = 0b0001_0000;
        const L3 = 0b0010_0000;
    }
}

impl Buttons {
    pub fn of(button: Button) -> Buttons {
        match button {
            Button::Up => Buttons::UP,
            Button::Down => Buttons::DOWN,
            Button::Back => Buttons::BACK,
            Button::L1 => Buttons::L1,
            Button::L2 => Buttons::L2,
            Button::L3 => Buttons::L3,
        }
    }

    /// Physical buttons in this set, in a fixed order.
    pub fn buttons(self) -> impl Iterator<Item = Button> {
        Button::ALL
            .into_iter()
            .filter(move |b| self.contains(Buttons::of(*b)))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScriptError {
    #[error("input script is empty")]
    Empty,
    #[error("invalid range in input event '{0}'")]
    Range(String),
    #[error("invalid buttons in input event '{0}'")]
    Buttons(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ScriptedEvent {
    start: u64,
    end: u64,
    mask: Buttons,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Script {
    events: Vec<ScriptedEvent>,
}

impl Script {
    pub fn parse(spec: &str) -> Result<Script, ScriptError> {
        fn parse_buttons(spec: &str) -> Option<Buttons> {
            spec.split(|c| c == ',' || c == '+' || c == '|')
                .map(|name| Button::from_name(name).map(Buttons::of))
                .try_fold(Buttons::empty(), |acc, b| Some(acc | b?))
                .filter(|mask| !mask.is_empty())
        }

        fn parse_range(spec: &str) -> Option<(u64, u64)> {
            let s = spec.trim();
            let (start, end) = match s.split_once('-') {
                Some((a, b)) => (a.trim().parse().ok()?, b.trim().parse().ok()?),
                None => {
                    let t = s.parse().ok()?;
                    (t, t)
                }
            };
            (start <= end).then_some((start, end))
        }

        let spec = spec.trim();
        if spec.is_empty() {
            return Err(ScriptError::Empty);
        }
        let mut events = Vec::new();
        for ent in spec.split(';').map(str::trim).filter(|e| !e.is_empty()) {
            let (range_s, buttons_s) = ent
                .split_once(':')
                .map(|(r, b)| (r.trim(), b.trim()))
                .unwrap_or((ent, "BACK"));
            let (start, end) =
                parse_range(range_s).ok_or_else(|| ScriptError::Range(ent.to_string()))?;
            let mask =
                parse_buttons(buttons_s).ok_or_else(|| ScriptError::Buttons(ent.to_string()))?;
            events.push(ScriptedEvent { start, end, mask });
        }
        if events.is_empty() {
            return Err(ScriptError::Empty);
        }
        Ok(Script { events })
    }

    /// Buttons held down at `step`.
    pub fn mask_for_step(&self, step: u64) -> Buttons {
        self.events
            .iter()
            .filter(|e| step >= e.start && step <= e.end)
            .fold(Buttons::empty(), |acc, e| acc | e.mask)
    }

    /// Buttons that go down at `step`.
    pub fn presses_for_step(&self, step: u64) -> Buttons {
        let before = match step.checked_sub(1) {
            Some(prev) => self.mask_for_step(prev),
            None => Buttons::empty(),
        };
        self.mask_for_step(step) - before
    }

    /// Last step any event covers.
    pub fn last_step(&self) -> u64 {
        self.events.iter().map(|e| e.end).max().unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_ranges_and_single_steps() {
        let s = Script::parse("10-12:UP+L2; 20:back ;30").unwrap();
        assert_eq!(s.mask_for_step(9), Buttons::empty());
        assert_eq!(s.mask_for_step(11), Buttons::UP | Buttons::L2);
        assert_eq!(s.mask_for_step(20), Buttons::BACK);
        assert_eq!(s.mask_for_step(30), Buttons::BACK);
        assert_eq!(s.last_step(), 30);
    }

    #[test]
    fn presses_are_edge_triggered() {
        let s = Script::parse("5-7:UP;6:L1").unwrap();
        assert_eq!(s.presses_for_step(5), Buttons::UP);
        assert_eq!(s.presses_for_step(6), Buttons::L1);
        assert_eq!(s.presses_for_step(7), Buttons::empty());
        let s = Script::parse("0:DOWN").unwrap();
        assert_eq!(s.presses_for_step(0), Buttons::DOWN);
    }

    #[test]
    fn rejects_bad_entries() {
        assert_eq!(Script::parse("  "), Err(ScriptError::Empty));
        assert_eq!(Script::parse(";;"), Err(ScriptError::Empty));
        assert!(matches!(Script::parse("x-3:UP"), Err(ScriptError::Range(_))));
        assert!(matches!(Script::parse("9-3:UP"), Err(ScriptError::Range(_))));
        assert!(matches!(Script::parse("3:JUMP"), Err(ScriptError::Buttons(_))));
    }

    #[test]
    fn buttons_iterate_in_fixed_order() {
        let set = Buttons::L3 | Buttons::UP | Buttons::BACK;
        assert_eq!(
            set.buttons().collect::<Vec<_>>(),
            vec![Button::Up, Button::Back, Button::L3]
        );
    }
}
