//! Single-step embedding of the simulation engine: lifecycle, fault
//! containment, frame/audio bridging and context-aware input routing.

pub mod audio;
pub mod config;
pub mod controller;
pub mod defaults;
pub mod dump;
pub mod engine;
pub mod fault;
pub mod input;
pub mod keys;
pub mod lifecycle;
pub mod script;
pub mod session;
pub mod shutdown;
pub mod sim;
pub mod video;
pub mod wad;

pub use controller::{Button, Controller, ControllerState, KeySink, RouterConfig};
pub use engine::{Engine, GameMode};
pub use fault::Fault;
pub use input::{InjectionError, KeySender};
pub use keys::LogicalKey;
pub use lifecycle::{
    EngineSnapshot, InitError, Lifecycle, LifecycleState, ResetError, StepError, StepFault,
};
pub use video::Frame;

#[cfg(test)]
pub(crate) fn test_lock() -> std::sync::MutexGuard<'static, ()> {
    use std::sync::Mutex;
    static LOCK: Mutex<()> = Mutex::new(());
    LOCK.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
