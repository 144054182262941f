// Square-wave effects mixer for the reference engine.

use crate::audio::SAMPLE_RATE;

/// Engine tics per second.
pub const TICRATE: u32 = 35;
/// Mixed frames per tic.
pub const FRAMES_PER_TIC: usize = (SAMPLE_RATE / TICRATE) as usize;
const NUM_CHANNELS: usize = 8;
const MAX_VOLUME: i32 = 15;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sfx {
    Pistol,
    MenuMove,
    MenuSelect,
    MenuOpen,
    LevelExit,
}

impl Sfx {
    /// (tone in Hz, length in tics)
    fn shape(self) -> (u32, u32) {
        match self {
            Sfx::Pistol => (220, 6),
            Sfx::MenuMove => (660, 2),
            Sfx::MenuSelect => (880, 3),
            Sfx::MenuOpen => (440, 3),
            Sfx::LevelExit => (330, 20),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct Channel {
    sfx: Option<Sfx>,
    phase: u32,
    half_period: u32,
    remaining: u32,
    volume: i32,
    sep: i32,
}

pub struct Mixer {
    channels: [Channel; NUM_CHANNELS],
    sfx_volume: i32,
    out: Vec<(i16, i16)>,
}

impl Mixer {
    pub fn new() -> Self {
        Self {
            channels: [Channel::default(); NUM_CHANNELS],
            sfx_volume: 8,
            out: Vec::with_capacity(FRAMES_PER_TIC),
        }
    }

    /// Starts `sfx` panned by `sep` (0 = left, 128 = centre, 255 = right).
    /// The channel closest to finishing is stolen when all are busy.
    pub fn start(&mut self, sfx: Sfx, sep: i32) {
        let slot = self
            .channels
            .iter()
            .position(|c| c.sfx.is_none())
            .or_else(|| {
                self.channels
                    .iter()
                    .enumerate()
                    .min_by_key(|(_, c)| c.remaining)
                    .map(|(i, _)| i)
            })
            .unwrap_or(0);
        let (tone, tics) = sfx.shape();
        self.channels[slot] = Channel {
            sfx: Some(sfx),
            phase: 0,
            half_period: (SAMPLE_RATE / (tone * 2)).max(1),
            remaining: tics * FRAMES_PER_TIC as u32,
            volume: self.sfx_volume,
            sep: sep.clamp(0, 255),
        };
    }

    /// Fades every channel a little; called once per tic.
    pub fn update(&mut self) {
        for c in self.channels.iter_mut().filter(|c| c.sfx.is_some()) {
            if c.volume > 1 {
                c.volume -= 1;
            }
        }
    }

    pub fn active(&self) -> usize {
        self.channels.iter().filter(|c| c.sfx.is_some()).count()
    }

    /// Mixes one tic of audio.
    pub fn mix(&mut self) -> &[(i16, i16)] {
        self.out.clear();
        for _ in 0..FRAMES_PER_TIC {
            let (mut l, mut r) = (0i32, 0i32);
            for c in self.channels.iter_mut() {
                if c.sfx.is_none() {
                    continue;
                }
                let sign = if (c.phase / c.half_period) % 2 == 0 { 1 } else { -1 };
                let amp = sign * c.volume * 2048 / MAX_VOLUME;
                l += amp * (255 - c.sep) / 255;
                r += amp * c.sep / 255;
                c.phase = c.phase.wrapping_add(1);
                c.remaining -= 1;
                if c.remaining == 0 {
                    c.sfx = None;
                }
            }
            self.out.push((clip(l), clip(r)));
        }
        &self.out
    }
}

impl Default for Mixer {
    fn default() -> Self {
        Self::new()
    }
}

fn clip(v: i32) -> i16 {
    v.clamp(i16::MIN as i32, i16::MAX as i32) as i16
}
