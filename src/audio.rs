use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::engine::SoundDriver;

/// Output rate of the engine's mixer.
pub const SAMPLE_RATE: u32 = 11025;
const DEFAULT_AUDIO_BUFFER_FRAMES: usize = 16384;

struct AudioRing {
    buffer: VecDeque<(i16, i16)>,
    max_frames: usize,
}

impl AudioRing {
    fn new(max_frames: usize) -> Self {
        Self {
            buffer: VecDeque::with_capacity(max_frames),
            max_frames,
        }
    }

    fn len(&self) -> usize {
        self.buffer.len()
    }

    fn clear(&mut self) {
        self.buffer.clear();
    }

    // Oldest frames are dropped when the host falls behind.
    fn push_samples(&mut self, samples: &[(i16, i16)]) {
        if samples.is_empty() {
            return;
        }
        let needed = self.buffer.len().saturating_add(samples.len());
        if needed > self.max_frames {
            let drop = (needed - self.max_frames).min(self.buffer.len());
            self.buffer.drain(..drop);
        }
        let skip = samples.len().saturating_sub(self.max_frames);
        self.buffer.extend(samples[skip..].iter().copied());
    }

    fn pop_into(&mut self, out: &mut Vec<(i16, i16)>, max: usize) -> usize {
        out.clear();
        let count = self.buffer.len().min(max);
        out.extend(self.buffer.drain(..count));
        count
    }
}

/// Engine-side end of the audio path. Every successful step submits through
/// it; the flush counter lets callers check that none was skipped.
pub struct AudioBridge {
    ring: Arc<Mutex<AudioRing>>,
    flushes: Arc<AtomicU64>,
}

/// Host-side end: pulls mixed frames for whatever output device is in use.
#[derive(Clone)]
pub struct AudioDrain {
    ring: Arc<Mutex<AudioRing>>,
    flushes: Arc<AtomicU64>,
}

impl AudioBridge {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_AUDIO_BUFFER_FRAMES)
    }

    pub fn with_capacity(max_frames: usize) -> Self {
        Self {
            ring: Arc::new(Mutex::new(AudioRing::new(max_frames.max(1)))),
            flushes: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn drain(&self) -> AudioDrain {
        AudioDrain {
            ring: self.ring.clone(),
            flushes: self.flushes.clone(),
        }
    }

    pub fn flushes(&self) -> u64 {
        self.flushes.load(Ordering::Acquire)
    }

    pub fn clear(&self) {
        if let Ok(mut ring) = self.ring.lock() {
            ring.clear();
        }
    }
}

impl Default for AudioBridge {
    fn default() -> Self {
        Self::new()
    }
}

impl SoundDriver for AudioBridge {
    fn submit(&mut self, frames: &[(i16, i16)]) {
        if let Ok(mut ring) = self.ring.lock() {
            ring.push_samples(frames);
        }
        self.flushes.fetch_add(1, Ordering::AcqRel);
    }
}

impl AudioDrain {
    pub fn pop_into(&self, out: &mut Vec<(i16, i16)>, max: usize) -> usize {
        match self.ring.lock() {
            Ok(mut ring) => ring.pop_into(out, max),
            Err(_) => {
                out.clear();
                0
            }
        }
    }

    /// Pulls up to `max` frames as interleaved L, R samples.
    pub fn pop_interleaved(&self, out: &mut Vec<i16>, max: usize) -> usize {
        let mut frames = Vec::new();
        let n = self.pop_into(&mut frames, max);
        out.clear();
        out.reserve(n * 2);
        for (l, r) in frames {
            out.push(l);
            out.push(r);
        }
        n
    }

    pub fn buffered(&self) -> usize {
        self.ring.lock().map(|r| r.len()).unwrap_or(0)
    }

    pub fn flushes(&self) -> u64 {
        self.flushes.load(Ordering::Acquire)
    }
}

/// Where mixed audio goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputChoice {
    Named(String),
    SystemDefault,
    /// No device: samples are drained and dropped.
    Silent,
}

/// Picks an output: the configured device when it is present, else the
/// system default, else nothing.
pub fn choose_output(
    configured: Option<&str>,
    available: &[String],
    has_default: bool,
) -> OutputChoice {
    if let Some(wanted) = configured {
        if let Some(name) = available.iter().find(|n| n.as_str() == wanted) {
            return OutputChoice::Named(name.clone());
        }
        log::warn!("audio device {wanted:?} not found, falling back");
    }
    if has_default || !available.is_empty() {
        OutputChoice::SystemDefault
    } else {
        log::warn!("no audio output available, running silent");
        OutputChoice::Silent
    }
}
