//! Owner of the one embedded engine instance.
//!
//! `Uninitialized -> Ready` on a successful [`Lifecycle::initialize`],
//! `Uninitialized | Ready -> Failed` when initialization or a step faults,
//! and `Failed -> Uninitialized` through an explicit [`Lifecycle::reset`].
//! Every call into the engine runs inside a [`fault::protect`] region; a call
//! refused because another region is active leaves the state untouched.

use std::mem;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::audio::{AudioBridge, AudioDrain};
use crate::defaults::{self, LaunchPaths};
use crate::engine::{
    BootInfo, Engine, EngineError, GameMode, KeyEvent, Launch, SoundDriver, TimingMode,
};
use crate::fault::{self, Fault};
use crate::input::{InjectionError, InputQueue, KeySender};
use crate::keys::{KeyMap, LogicalKey};
use crate::video::{Frame, FrameBridge};

#[cfg(test)]
mod tests;

static CLAIMED: AtomicBool = AtomicBool::new(false);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LifecycleState {
    Uninitialized,
    Ready,
    Failed,
}

/// One coherent read of engine state, taken right after a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineSnapshot {
    pub mode: GameMode,
    pub menu_active: bool,
    pub alive: bool,
    /// Engine tic counter at capture time.
    pub tic: u64,
}

impl EngineSnapshot {
    /// What the host reports while no engine is running.
    pub const OFFLINE: EngineSnapshot = EngineSnapshot {
        mode: GameMode::DemoScreen,
        menu_active: false,
        alive: false,
        tic: 0,
    };
}

#[derive(Debug, Error)]
pub enum InitError {
    #[error("asset path is empty")]
    EmptyPath,
    #[error("asset bundle {0} does not exist")]
    MissingAsset(PathBuf),
    #[error("resolving launch paths: {0}")]
    Paths(#[source] std::io::Error),
    #[error("forcing bindings in {path}: {source}")]
    Config {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error("initialization faulted: {0}")]
    Fault(Fault),
    #[error("a previous initialization failed; reset before retrying")]
    PreviouslyFailed,
    /// Another protected region was active, so the engine was never entered.
    #[error("initialization skipped: a protected region is already active")]
    RegionBusy,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("step {tic} faulted: {fault}")]
pub struct StepFault {
    /// Host step number that faulted (1-based since the last reset).
    pub tic: u64,
    pub fault: Fault,
}

/// Why [`Lifecycle::step`] did not complete.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StepError {
    /// Another protected region was active. The engine was not entered and
    /// nothing changed; the step can be retried.
    #[error("step skipped: a protected region is already active")]
    RegionBusy,
    #[error(transparent)]
    Fault(#[from] StepFault),
}

impl StepError {
    pub fn fault(&self) -> Option<&StepFault> {
        match self {
            StepError::Fault(fault) => Some(fault),
            StepError::RegionBusy => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ResetError {
    #[error("reset is only valid from Failed (state is {0:?})")]
    NotFailed(LifecycleState),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("another lifecycle already owns the engine")]
pub struct AlreadyClaimed;

/// Where to boot from. Unset overrides fall back to the asset's directory.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LaunchOptions {
    pub asset_path: PathBuf,
    pub working_dir: Option<PathBuf>,
    pub config_path: Option<PathBuf>,
}

impl LaunchOptions {
    pub fn new(asset_path: impl Into<PathBuf>) -> Self {
        Self {
            asset_path: asset_path.into(),
            ..Self::default()
        }
    }
}

type Factory<E> = Box<dyn FnMut() -> E + Send>;

pub struct Lifecycle<E: Engine> {
    factory: Factory<E>,
    engine: Option<E>,
    state: LifecycleState,
    keymap: KeyMap,
    input: InputQueue,
    video: FrameBridge,
    audio: AudioBridge,
    snapshot: EngineSnapshot,
    boot: Option<BootInfo>,
    steps: u64,
    last_gametic: u64,
}

impl<E: Engine> Lifecycle<E> {
    /// Claims the process-wide engine slot. `factory` builds a fresh engine
    /// for every initialization attempt.
    pub fn new(factory: impl FnMut() -> E + Send + 'static) -> Result<Self, AlreadyClaimed> {
        if CLAIMED
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(AlreadyClaimed);
        }
        Ok(Self {
            factory: Box::new(factory),
            engine: None,
            state: LifecycleState::Uninitialized,
            keymap: KeyMap::default(),
            input: InputQueue::new(),
            video: FrameBridge::new(),
            audio: AudioBridge::new(),
            snapshot: EngineSnapshot::OFFLINE,
            boot: None,
            steps: 0,
            last_gametic: 0,
        })
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    pub fn is_alive(&self) -> bool {
        self.state == LifecycleState::Ready
    }

    pub fn initialize(&mut self, asset_path: impl AsRef<Path>) -> Result<(), InitError> {
        self.initialize_with(&LaunchOptions::new(asset_path.as_ref()))
    }

    pub fn initialize_with(&mut self, options: &LaunchOptions) -> Result<(), InitError> {
        match self.state {
            LifecycleState::Ready => return Ok(()),
            LifecycleState::Failed => return Err(InitError::PreviouslyFailed),
            LifecycleState::Uninitialized => {}
        }
        if options.asset_path.as_os_str().is_empty() {
            return Err(InitError::EmptyPath);
        }
        if !options.asset_path.is_file() {
            return Err(InitError::MissingAsset(options.asset_path.clone()));
        }
        let paths = LaunchPaths::resolve(
            &options.asset_path,
            options.working_dir.as_deref(),
            options.config_path.as_deref(),
        )
        .map_err(InitError::Paths)?;
        let launch = Launch {
            asset_path: paths.asset_path,
            working_dir: paths.working_dir,
            config_path: paths.config_path,
            timing: TimingMode::SingleTic,
        };

        log::info!("initializing engine from {}", launch.asset_path.display());
        let engine = self.engine.insert((self.factory)());
        let outcome = fault::protect(|| -> Result<(BootInfo, EngineSnapshot), InitError> {
            defaults::force_canonical(&launch.config_path).map_err(|source| {
                InitError::Config {
                    path: launch.config_path.clone(),
                    source,
                }
            })?;
            let info = engine.boot(&launch)?;
            Ok((info, capture(engine)))
        });

        match outcome {
            Ok(Ok((info, snapshot))) => {
                log::info!(
                    "engine ready: {} lumps, {} bytes",
                    info.lump_count,
                    info.asset_bytes
                );
                self.keymap = KeyMap::new(info.bindings);
                self.last_gametic = snapshot.tic;
                self.snapshot = snapshot;
                self.boot = Some(info);
                self.state = LifecycleState::Ready;
                Ok(())
            }
            Ok(Err(e)) => {
                log::error!("engine initialization failed: {e}");
                self.state = LifecycleState::Failed;
                Err(e)
            }
            Err(Fault::AlreadyArmed) => {
                log::warn!("initialization skipped: protected region busy");
                // Never booted, so it can be dropped normally.
                self.engine = None;
                Err(InitError::RegionBusy)
            }
            Err(fault) => {
                log::error!("engine initialization faulted: {fault}");
                self.state = LifecycleState::Failed;
                Err(InitError::Fault(fault))
            }
        }
    }

    /// Advances the engine by one tic. Does nothing unless `Ready`.
    pub fn step(&mut self) -> Result<(), StepError> {
        if self.state != LifecycleState::Ready {
            return Ok(());
        }
        let Some(engine) = self.engine.as_mut() else {
            return Ok(());
        };
        let tic = self.steps + 1;
        let keymap = self.keymap;
        let input = &mut self.input;
        let video = &mut self.video;
        let audio = &mut self.audio;

        let outcome = fault::protect(|| {
            input.drain(|key, kind| {
                log::debug!("tic {tic}: {} {:?}", key.name(), kind);
                engine.post_event(KeyEvent {
                    kind,
                    code: keymap.native(key),
                });
            });
            engine.run_tic();
            engine.display(video);
            engine.update_sound();
            audio.submit(engine.mix_sound());
            capture(engine)
        });

        match outcome {
            Ok(snapshot) => {
                self.video.commit();
                if snapshot.tic != self.last_gametic + 1 {
                    log::warn!(
                        "step {tic} moved the engine from tic {} to {}",
                        self.last_gametic,
                        snapshot.tic
                    );
                }
                self.last_gametic = snapshot.tic;
                self.snapshot = snapshot;
                self.steps = tic;
                Ok(())
            }
            Err(Fault::AlreadyArmed) => {
                log::warn!("step {tic} skipped: protected region busy");
                Err(StepError::RegionBusy)
            }
            Err(fault) => {
                log::error!("step {tic} faulted: {fault}");
                self.video.discard();
                self.input.forget_held();
                self.state = LifecycleState::Failed;
                Err(StepFault { tic, fault }.into())
            }
        }
    }

    /// Drops the failed instance so a fresh one can be initialized. The old
    /// instance is abandoned rather than torn down.
    pub fn reset(&mut self) -> Result<(), ResetError> {
        if self.state != LifecycleState::Failed {
            return Err(ResetError::NotFailed(self.state));
        }
        if let Some(engine) = self.engine.take() {
            mem::forget(engine);
        }
        self.boot = None;
        self.steps = 0;
        self.last_gametic = 0;
        self.input.forget_held();
        self.audio.clear();
        self.state = LifecycleState::Uninitialized;
        log::info!("engine reset");
        Ok(())
    }

    /// Last committed frame. Survives a fault and a reset.
    pub fn get_frame(&self) -> Option<&Frame> {
        self.video.frame()
    }

    /// Snapshot captured by the last successful step (or boot).
    pub fn query_mode_snapshot(&self) -> EngineSnapshot {
        self.snapshot
    }

    pub fn inject_key_down(&self, key: LogicalKey) -> Result<(), InjectionError> {
        self.input.sender().key_down(key)
    }

    pub fn inject_key_up(&self, key: LogicalKey) -> Result<(), InjectionError> {
        self.input.sender().key_up(key)
    }

    pub fn key_sender(&self) -> KeySender {
        self.input.sender()
    }

    pub fn held_keys(&self) -> Vec<LogicalKey> {
        self.input.held().map(|(k, _)| k).collect()
    }

    /// Releases every held key straight into the engine and drops pending
    /// commands. Used when the host stops stepping but keeps the engine.
    pub fn release_held(&mut self) -> Result<(), Fault> {
        let keymap = self.keymap;
        let input = &mut self.input;
        let Some(engine) = self.engine.as_mut().filter(|_| self.state == LifecycleState::Ready)
        else {
            input.forget_held();
            return Ok(());
        };
        let result = fault::protect(|| {
            input.release_all(|key, kind| {
                engine.post_event(KeyEvent {
                    kind,
                    code: keymap.native(key),
                })
            })
        });
        match &result {
            Ok(()) => {}
            Err(Fault::AlreadyArmed) => {
                log::warn!("releasing held keys skipped: protected region busy");
            }
            Err(fault) => {
                log::error!("releasing held keys faulted: {fault}");
                self.input.forget_held();
                self.state = LifecycleState::Failed;
            }
        }
        result
    }

    pub fn audio_drain(&self) -> AudioDrain {
        self.audio.drain()
    }

    /// Audio flushes since the lifecycle was created.
    pub fn audio_flushes(&self) -> u64 {
        self.audio.flushes()
    }

    pub fn steps(&self) -> u64 {
        self.steps
    }

    pub fn boot_info(&self) -> Option<&BootInfo> {
        self.boot.as_ref()
    }

    pub fn keymap(&self) -> &KeyMap {
        &self.keymap
    }

    /// The engine's slow-turn threshold, once an engine is running.
    pub fn slow_turn_tics(&self) -> Option<u32> {
        match (&self.engine, self.state) {
            (Some(engine), LifecycleState::Ready) => Some(engine.slow_turn_tics()),
            _ => None,
        }
    }
}

impl<E: Engine> Drop for Lifecycle<E> {
    fn drop(&mut self) {
        if self.state == LifecycleState::Failed {
            if let Some(engine) = self.engine.take() {
                mem::forget(engine);
            }
        }
        CLAIMED.store(false, Ordering::Release);
    }
}

fn capture<E: Engine>(engine: &E) -> EngineSnapshot {
    EngineSnapshot {
        mode: engine.game_mode(),
        menu_active: engine.menu_active(),
        alive: true,
        tic: engine.gametic(),
    }
}
