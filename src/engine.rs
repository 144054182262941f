// The seam between the lifecycle layer and the embedded simulation.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::keys::Bindings;
use crate::wad::WadError;

pub const SCREEN_WIDTH: usize = 320;
pub const SCREEN_HEIGHT: usize = 200;
pub const SCREEN_PIXELS: usize = SCREEN_WIDTH * SCREEN_HEIGHT;
/// 256 RGB triplets.
pub const PALETTE_BYTES: usize = 256 * 3;

/// Top-level state the engine reports after each tic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GameMode {
    Level,
    Intermission,
    Finale,
    DemoScreen,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum KeyEventKind {
    Down,
    Up,
}

/// One entry of the engine's internal event stream, in native keycodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyEvent {
    pub kind: KeyEventKind,
    pub code: i32,
}

impl KeyEvent {
    pub fn down(code: i32) -> Self {
        Self { kind: KeyEventKind::Down, code }
    }

    pub fn up(code: i32) -> Self {
        Self { kind: KeyEventKind::Up, code }
    }
}

/// How the engine paces itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimingMode {
    /// Every `run_tic` advances exactly one tic; no wall-clock reads.
    SingleTic,
}

/// Everything the engine needs to boot, resolved by the lifecycle layer.
#[derive(Debug, Clone)]
pub struct Launch {
    pub asset_path: PathBuf,
    pub working_dir: PathBuf,
    pub config_path: PathBuf,
    pub timing: TimingMode,
}

/// What a successful boot loaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootInfo {
    pub asset_path: PathBuf,
    pub lump_count: usize,
    pub asset_bytes: usize,
    pub bindings: Bindings,
}

/// Boot failures the engine reports as ordinary errors rather than through
/// its fatal-error path.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("asset bundle: {0}")]
    Asset(#[from] WadError),
    #[error("reading config {path}: {source}")]
    Config {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Receives the engine's video output (the headless replacement for its
/// video driver).
pub trait VideoDriver {
    /// Called whenever the active palette changes.
    fn set_palette(&mut self, palette: &[u8; PALETTE_BYTES]);
    /// Called once per displayed frame with the palette-indexed screen.
    fn finish_update(&mut self, screen: &[u8; SCREEN_PIXELS]);
}

/// Receives each tic's mixed audio as stereo frames.
pub trait SoundDriver {
    fn submit(&mut self, frames: &[(i16, i16)]);
}

/// The embedded simulation, as seen by the lifecycle layer.
///
/// Implementations report unrecoverable errors through
/// [`crate::fault::fatal`]; the caller always runs them inside a protected
/// region.
pub trait Engine: Send {
    fn boot(&mut self, launch: &Launch) -> Result<BootInfo, EngineError>;

    /// Queues an event; it is consumed at the start of the next tic.
    fn post_event(&mut self, event: KeyEvent);

    /// Advances the simulation by exactly one tic.
    fn run_tic(&mut self);

    fn display(&mut self, video: &mut dyn VideoDriver);

    /// Recomputes channel parameters for the current listener.
    fn update_sound(&mut self);

    /// Mixes this tic's audio. The lifecycle flushes whatever comes back,
    /// including an empty mix, after every successful tic.
    fn mix_sound(&mut self) -> &[(i16, i16)];

    fn game_mode(&self) -> GameMode;

    fn menu_active(&self) -> bool;

    fn gametic(&self) -> u64;

    /// Tics a turn key must be held before turning reaches full speed.
    fn slow_turn_tics(&self) -> u32;
}
