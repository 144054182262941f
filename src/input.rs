//! Input event queue.
//!
//! Any context may queue key commands through a [`KeySender`]. The stepping
//! context owns the [`InputQueue`] itself: at the start of every step it
//! drains the pending commands into the engine's event stream, then counts
//! down timed holds and releases the ones that expired, all before the tic
//! runs so the engine sees the release on that same tic.

use std::collections::BTreeMap;
use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};

use thiserror::Error;

use crate::engine::KeyEventKind;
use crate::keys::LogicalKey;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum InjectionError {
    #[error("input queue is gone")]
    Disconnected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyCommand {
    /// Press and keep pressed until an explicit [`KeyCommand::Up`].
    Down(LogicalKey),
    Up(LogicalKey),
    /// Press for `hold` steps; a hold of zero releases the key.
    Tap { key: LogicalKey, hold: u32 },
}

#[derive(Debug, Clone)]
pub struct KeySender {
    tx: Sender<KeyCommand>,
}

impl KeySender {
    pub fn send(&self, command: KeyCommand) -> Result<(), InjectionError> {
        self.tx
            .send(command)
            .map_err(|_| InjectionError::Disconnected)
    }

    pub fn key_down(&self, key: LogicalKey) -> Result<(), InjectionError> {
        self.send(KeyCommand::Down(key))
    }

    pub fn key_up(&self, key: LogicalKey) -> Result<(), InjectionError> {
        self.send(KeyCommand::Up(key))
    }

    pub fn tap(&self, key: LogicalKey, hold: u32) -> Result<(), InjectionError> {
        self.send(KeyCommand::Tap { key, hold })
    }
}

/// A key currently pressed by injection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeldKey {
    /// Steps left before release; `None` while latched by an explicit down.
    pub remaining: Option<u32>,
}

pub struct InputQueue {
    tx: Sender<KeyCommand>,
    rx: Receiver<KeyCommand>,
    held: BTreeMap<LogicalKey, HeldKey>,
}

impl InputQueue {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::channel();
        Self {
            tx,
            rx,
            held: BTreeMap::new(),
        }
    }

    pub fn sender(&self) -> KeySender {
        KeySender {
            tx: self.tx.clone(),
        }
    }

    pub fn is_held(&self, key: LogicalKey) -> bool {
        self.held.contains_key(&key)
    }

    pub fn held(&self) -> impl Iterator<Item = (LogicalKey, HeldKey)> + '_ {
        self.held.iter().map(|(k, h)| (*k, *h))
    }

    pub fn held_count(&self) -> usize {
        self.held.len()
    }

    /// Applies every queued command, then runs one countdown. `post` receives
    /// the resulting key transitions in order.
    pub fn drain(&mut self, mut post: impl FnMut(LogicalKey, KeyEventKind)) {
        loop {
            match self.rx.try_recv() {
                Ok(command) => self.apply(command, &mut post),
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
        self.countdown(&mut post);
    }

    fn apply(&mut self, command: KeyCommand, post: &mut impl FnMut(LogicalKey, KeyEventKind)) {
        log::trace!("input: {command:?}");
        match command {
            KeyCommand::Down(key) => self.press(key, None, post),
            KeyCommand::Up(key) => self.release(key, post),
            KeyCommand::Tap { key, hold: 0 } => self.release(key, post),
            KeyCommand::Tap { key, hold } => self.press(key, Some(hold), post),
        }
    }

    fn press(
        &mut self,
        key: LogicalKey,
        remaining: Option<u32>,
        post: &mut impl FnMut(LogicalKey, KeyEventKind),
    ) {
        if let Some(opposite) = key.opposite() {
            self.release(opposite, post);
        }
        if !self.held.contains_key(&key) {
            post(key, KeyEventKind::Down);
        }
        self.held.insert(key, HeldKey { remaining });
    }

    fn release(&mut self, key: LogicalKey, post: &mut impl FnMut(LogicalKey, KeyEventKind)) {
        if self.held.remove(&key).is_some() {
            post(key, KeyEventKind::Up);
        }
    }

    fn countdown(&mut self, post: &mut impl FnMut(LogicalKey, KeyEventKind)) {
        let mut expired = Vec::new();
        for (key, held) in self.held.iter_mut() {
            if let Some(n) = held.remaining.as_mut() {
                *n = n.saturating_sub(1);
                if *n == 0 {
                    expired.push(*key);
                }
            }
        }
        for key in expired {
            self.release(key, post);
        }
    }

    /// Releases every held key through `post` and drops pending commands.
    pub fn release_all(&mut self, mut post: impl FnMut(LogicalKey, KeyEventKind)) {
        for key in std::mem::take(&mut self.held).into_keys() {
            post(key, KeyEventKind::Up);
        }
        self.discard_pending();
    }

    /// Forgets held keys without posting anything; used when the engine that
    /// saw the presses is gone.
    pub fn forget_held(&mut self) {
        self.held.clear();
        self.discard_pending();
    }

    fn discard_pending(&mut self) {
        while self.rx.try_recv().is_ok() {}
    }
}

impl Default for InputQueue {
    fn default() -> Self {
        Self::new()
    }
}
