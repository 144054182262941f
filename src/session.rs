//! Host glue: runs the stepping context on its own thread.
//!
//! The stepping thread owns the [`Lifecycle`]. After every step it hands the
//! fresh snapshot to the shared router, so the control context (whoever calls
//! [`Session::press`]) only ever sees cached state. Frames are published
//! into a shared buffer every `frame_divisor` steps.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use thiserror::Error;

use crate::config;
use crate::controller::{Button, Controller, ControllerState, RouterConfig, RouterConfigError};
use crate::engine::Engine;
use crate::input::KeySender;
use crate::lifecycle::{EngineSnapshot, Lifecycle, StepError, StepFault};
use crate::shutdown;
use crate::video::Frame;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// The engine left an active level; `alt_cleared` is set when the
    /// alternate control scheme was dropped with it.
    LevelExited { alt_cleared: bool },
    /// A step faulted. The lifecycle has already been reset.
    Died(StepFault),
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("engine is not initialized")]
    NotReady,
    #[error(transparent)]
    Router(#[from] RouterConfigError),
    #[error("spawning stepping thread: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("stepping thread panicked")]
    Panicked,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionConfig {
    pub fps: u32,
    pub frame_divisor: u32,
    pub router: RouterConfig,
}

impl SessionConfig {
    pub fn from_env() -> Self {
        let mut router = RouterConfig::default();
        if let Some(hold) = config::turn_hold() {
            router.turn_hold = hold;
        }
        Self {
            fps: config::fps(),
            frame_divisor: config::frame_divisor(),
            router,
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            fps: config::DEFAULT_FPS,
            frame_divisor: config::DEFAULT_FRAME_DIVISOR,
            router: RouterConfig::default(),
        }
    }
}

type SharedController = Arc<Mutex<Controller<KeySender>>>;

pub struct Session<E: Engine + 'static> {
    controller: SharedController,
    frame: Arc<Mutex<Frame>>,
    tics: Arc<AtomicU64>,
    stop: Arc<AtomicBool>,
    events: Receiver<SessionEvent>,
    handle: Option<JoinHandle<Lifecycle<E>>>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl<E: Engine + 'static> Session<E> {
    pub fn start(lifecycle: Lifecycle<E>, config: SessionConfig) -> Result<Self, SessionError> {
        let threshold = lifecycle.slow_turn_tics().ok_or(SessionError::NotReady)?;
        config.router.validate(threshold)?;

        let controller = Arc::new(Mutex::new(Controller::with_config(
            lifecycle.key_sender(),
            config.router,
        )));
        lock(&controller).update_snapshot(&lifecycle.query_mode_snapshot());
        let frame = Arc::new(Mutex::new(
            lifecycle.get_frame().cloned().unwrap_or_default(),
        ));
        let tics = Arc::new(AtomicU64::new(lifecycle.steps()));
        let stop = Arc::new(AtomicBool::new(false));
        let (tx, events) = mpsc::channel();

        let stepper = Stepper {
            lifecycle,
            controller: controller.clone(),
            frame: frame.clone(),
            tics: tics.clone(),
            stop: stop.clone(),
            events: tx,
            interval: Duration::from_secs(1) / config.fps.max(1),
            frame_divisor: u64::from(config.frame_divisor.max(1)),
        };
        let handle = thread::Builder::new()
            .name("engine-step".into())
            .spawn(move || stepper.run())
            .map_err(SessionError::Spawn)?;
        log::info!("session started at {} fps", config.fps);

        Ok(Self {
            controller,
            frame,
            tics,
            stop,
            events,
            handle: Some(handle),
        })
    }

    /// Routes a physical button. Returns whether the press was consumed.
    pub fn press(&self, button: Button) -> bool {
        lock(&self.controller).press(button)
    }

    /// Handles a level exit reported by [`Session::try_event`]. Returns
    /// whether the footer needs a refresh.
    pub fn exit_level(&self) -> bool {
        lock(&self.controller).exit_level()
    }

    pub fn controller_state(&self) -> ControllerState {
        lock(&self.controller).state()
    }

    pub fn footer(&self) -> [&'static str; 3] {
        lock(&self.controller).footer()
    }

    /// Runs `f` against the last published frame.
    pub fn with_frame<R>(&self, f: impl FnOnce(&Frame) -> R) -> R {
        f(&lock(&self.frame))
    }

    pub fn tics(&self) -> u64 {
        self.tics.load(Ordering::Acquire)
    }

    pub fn try_event(&self) -> Option<SessionEvent> {
        self.events.try_recv().ok()
    }

    pub fn wait_event(&self, timeout: Duration) -> Option<SessionEvent> {
        match self.events.recv_timeout(timeout) {
            Ok(ev) => Some(ev),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Stops stepping and hands the lifecycle back. Held keys are released
    /// into the still-running engine so a later session starts clean.
    ///
    /// The thread also stops by itself once a process quit is requested;
    /// `stop` is still needed to release the keys.
    pub fn stop(mut self) -> Result<Lifecycle<E>, SessionError> {
        self.stop.store(true, Ordering::Release);
        let handle = self.handle.take().ok_or(SessionError::Panicked)?;
        let mut lifecycle = handle.join().map_err(|_| SessionError::Panicked)?;
        if let Err(fault) = lifecycle.release_held() {
            log::warn!("releasing held keys on close: {fault}");
        }
        log::info!("session stopped after {} steps", lifecycle.steps());
        Ok(lifecycle)
    }
}

impl<E: Engine + 'static> Drop for Session<E> {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

struct Stepper<E: Engine> {
    lifecycle: Lifecycle<E>,
    controller: SharedController,
    frame: Arc<Mutex<Frame>>,
    tics: Arc<AtomicU64>,
    stop: Arc<AtomicBool>,
    events: Sender<SessionEvent>,
    interval: Duration,
    frame_divisor: u64,
}

impl<E: Engine> Stepper<E> {
    fn run(mut self) -> Lifecycle<E> {
        let mut stepped = 0u64;
        while !self.stop.load(Ordering::Acquire) && !shutdown::should_quit() {
            let t0 = Instant::now();
            match self.lifecycle.step() {
                Ok(()) => {
                    stepped += 1;
                    self.after_step(stepped);
                }
                // Nothing ran; try again next frame.
                Err(StepError::RegionBusy) => {}
                Err(StepError::Fault(fault)) => {
                    lock(&self.controller).update_snapshot(&EngineSnapshot::OFFLINE);
                    if let Err(e) = self.lifecycle.reset() {
                        log::warn!("reset after fault: {e}");
                    }
                    let _ = self.events.send(SessionEvent::Died(fault));
                    break;
                }
            }

            if let Some(rest) = self.interval.checked_sub(t0.elapsed()) {
                thread::sleep(rest);
            }
        }
        self.lifecycle
    }

    fn after_step(&mut self, stepped: u64) {
        let snapshot = self.lifecycle.query_mode_snapshot();
        let left_level = {
            let mut controller = lock(&self.controller);
            let was_alt = controller.state().alt_mode;
            let left = controller.update_snapshot(&snapshot);
            if left {
                controller.exit_level();
            }
            left.then_some(was_alt)
        };
        if let Some(alt_cleared) = left_level {
            let _ = self.events.send(SessionEvent::LevelExited { alt_cleared });
        }

        if stepped % self.frame_divisor == 0 {
            if let Some(current) = self.lifecycle.get_frame() {
                lock(&self.frame).copy_from(current);
            }
        }
        self.tics.store(self.lifecycle.steps(), Ordering::Release);
    }
}
