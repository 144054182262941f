use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize};
use std::sync::{Arc, Mutex};

use tempfile::{tempdir, TempDir};

use super::*;
use crate::defaults::Defaults;
use crate::engine::{KeyEventKind, VideoDriver};
use crate::keys::{native, Bindings};
use crate::sim::{self, SimEngine};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Trap {
    Boot,
    Tic,
    Sound,
    Panic,
}

/// Shared knobs for the engines a test's factory builds.
#[derive(Clone, Default)]
struct Probe {
    trap: Arc<Mutex<Option<Trap>>>,
    built: Arc<AtomicUsize>,
    posted: Arc<Mutex<Vec<(u64, KeyEvent)>>>,
    /// Mix nothing, like an engine whose sound is off.
    muted: Arc<AtomicBool>,
}

impl Probe {
    fn arm(&self, trap: Trap) {
        *self.trap.lock().unwrap() = Some(trap);
    }

    fn fires(&self, at: Trap) -> bool {
        let mut trap = self.trap.lock().unwrap();
        if *trap == Some(at) {
            *trap = None;
            true
        } else {
            false
        }
    }

    fn built(&self) -> usize {
        self.built.load(Ordering::SeqCst)
    }

    fn posted(&self) -> Vec<(u64, KeyEvent)> {
        self.posted.lock().unwrap().clone()
    }
}

/// The reference engine with injectable faults.
struct Trapped {
    inner: SimEngine,
    probe: Probe,
}

impl Engine for Trapped {
    fn boot(&mut self, launch: &Launch) -> Result<BootInfo, EngineError> {
        if self.probe.fires(Trap::Boot) {
            fault::fatal("Z_Malloc: failed on allocation of 8388608 bytes");
        }
        self.inner.boot(launch)
    }

    fn post_event(&mut self, event: KeyEvent) {
        self.probe
            .posted
            .lock()
            .unwrap()
            .push((self.inner.gametic(), event));
        self.inner.post_event(event)
    }

    fn run_tic(&mut self) {
        if self.probe.fires(Trap::Tic) {
            fault::fatal("R_DrawColumn: 400 to 12 at 3");
        }
        if self.probe.fires(Trap::Panic) {
            let lumps: Vec<u8> = Vec::new();
            std::hint::black_box(lumps[std::hint::black_box(3usize)]);
        }
        self.inner.run_tic()
    }

    fn display(&mut self, video: &mut dyn VideoDriver) {
        self.inner.display(video)
    }

    fn update_sound(&mut self) {
        self.inner.update_sound()
    }

    fn mix_sound(&mut self) -> &[(i16, i16)] {
        if self.probe.fires(Trap::Sound) {
            fault::fatal("I_SubmitSound: mixer underrun");
        }
        if self.probe.muted.load(Ordering::SeqCst) {
            return &[];
        }
        self.inner.mix_sound()
    }

    fn game_mode(&self) -> GameMode {
        self.inner.game_mode()
    }

    fn menu_active(&self) -> bool {
        self.inner.menu_active()
    }

    fn gametic(&self) -> u64 {
        self.inner.gametic()
    }

    fn slow_turn_tics(&self) -> u32 {
        self.inner.slow_turn_tics()
    }
}

fn lifecycle() -> (Lifecycle<Trapped>, Probe) {
    let probe = Probe::default();
    let factory_probe = probe.clone();
    let lc = Lifecycle::new(move || {
        factory_probe.built.fetch_add(1, Ordering::SeqCst);
        Trapped {
            inner: SimEngine::new(),
            probe: factory_probe.clone(),
        }
    })
    .unwrap();
    (lc, probe)
}

fn fault_of(result: Result<(), StepError>) -> StepFault {
    match result {
        Err(StepError::Fault(fault)) => fault,
        other => panic!("expected a step fault, got {other:?}"),
    }
}

fn bundle() -> (TempDir, PathBuf) {
    let dir = tempdir().unwrap();
    let path = dir.path().join("doom2.wad");
    sim::write_reference_bundle(&path).unwrap();
    (dir, path)
}

#[test]
fn initialize_and_step_once() {
    let _serial = crate::test_lock();
    let (_dir, wad) = bundle();
    let (mut lc, _) = lifecycle();
    assert_eq!(lc.state(), LifecycleState::Uninitialized);
    assert!(lc.get_frame().is_none());

    lc.initialize(&wad).unwrap();
    assert!(lc.is_alive());
    lc.step().unwrap();

    assert!(lc.is_alive());
    let frame = lc.get_frame().unwrap();
    assert_eq!((frame.width(), frame.height()), (320, 200));
    assert_eq!(frame.as_bytes().len(), 320 * 200 * 4);
    assert!(frame.as_bytes().chunks_exact(4).all(|px| px[3] == 0xff));
    assert_eq!(lc.steps(), 1);
}

#[test]
fn bad_paths_do_not_poison() {
    let _serial = crate::test_lock();
    let (dir, wad) = bundle();
    let (mut lc, probe) = lifecycle();

    assert!(matches!(lc.initialize(""), Err(InitError::EmptyPath)));
    assert!(matches!(
        lc.initialize(dir.path().join("missing.wad")),
        Err(InitError::MissingAsset(_))
    ));
    assert_eq!(lc.state(), LifecycleState::Uninitialized);
    assert_eq!(probe.built(), 0);

    lc.initialize(&wad).unwrap();
    assert!(lc.is_alive());
}

#[test]
fn initialize_is_idempotent_when_ready() {
    let _serial = crate::test_lock();
    let (_dir, wad) = bundle();
    let (mut lc, probe) = lifecycle();
    lc.initialize(&wad).unwrap();
    lc.initialize(&wad).unwrap();
    lc.initialize("").unwrap();
    assert_eq!(probe.built(), 1);
}

#[test]
fn step_is_a_no_op_until_ready() {
    let _serial = crate::test_lock();
    let (mut lc, probe) = lifecycle();
    assert_eq!(lc.step(), Ok(()));
    assert_eq!(lc.steps(), 0);
    assert!(lc.get_frame().is_none());
    assert_eq!(lc.query_mode_snapshot(), EngineSnapshot::OFFLINE);
    assert_eq!(probe.built(), 0);
}

#[test]
fn initialize_forces_canonical_bindings() {
    let _serial = crate::test_lock();
    let (dir, wad) = bundle();
    let cfg = dir.path().join("doomrc.cfg");
    std::fs::write(&cfg, "key_fire 13\nkey_up 119\nsfx_volume 3\nuse_mouse 1\n").unwrap();
    let (mut lc, _) = lifecycle();
    lc.initialize(&wad).unwrap();

    let on_disk = Defaults::load(&cfg).unwrap();
    assert_eq!(on_disk.bindings(), Bindings::CANONICAL);
    assert_eq!(on_disk.get_int("sfx_volume"), Some(3));
    assert_eq!(on_disk.get_int("use_mouse"), Some(0));
    assert_eq!(lc.keymap().native(LogicalKey::Fire), native::KEY_RCTRL);
    assert_eq!(lc.boot_info().unwrap().bindings, Bindings::CANONICAL);
}

#[test]
fn launch_overrides_are_honoured() {
    let _serial = crate::test_lock();
    let (dir, wad) = bundle();
    let cfg = dir.path().join("elsewhere").join("custom.cfg");
    let (mut lc, _) = lifecycle();
    lc.initialize_with(&LaunchOptions {
        asset_path: wad,
        working_dir: Some(dir.path().join("run")),
        config_path: Some(cfg.clone()),
    })
    .unwrap();
    assert!(cfg.is_file());
    assert!(dir.path().join("run").is_dir());
    assert!(!dir.path().join("doomrc.cfg").exists());
}

#[test]
fn faulting_step_keeps_last_frame_and_snapshot() {
    let _serial = crate::test_lock();
    let (_dir, wad) = bundle();
    let (mut lc, probe) = lifecycle();
    lc.initialize(&wad).unwrap();
    lc.step().unwrap();
    lc.step().unwrap();
    let frame = lc.get_frame().unwrap().clone();
    let snapshot = lc.query_mode_snapshot();

    probe.arm(Trap::Tic);
    let err = fault_of(lc.step());
    assert_eq!(err.tic, 3);
    assert!(matches!(err.fault, Fault::Fatal(ref m) if m.starts_with("R_DrawColumn")));

    assert!(!lc.is_alive());
    assert_eq!(lc.state(), LifecycleState::Failed);
    assert_eq!(lc.get_frame().unwrap().as_bytes(), frame.as_bytes());
    assert_eq!(lc.query_mode_snapshot(), snapshot);
    assert!(!fault::is_armed());

    // Failed: further steps do nothing.
    assert_eq!(lc.step(), Ok(()));
    assert_eq!(lc.steps(), 2);
}

#[test]
fn fault_after_display_does_not_publish_the_new_frame() {
    let _serial = crate::test_lock();
    let (_dir, wad) = bundle();
    let (mut lc, probe) = lifecycle();
    lc.initialize(&wad).unwrap();
    lc.step().unwrap();
    let frame = lc.get_frame().unwrap().clone();

    // Open the menu so the next display differs, then die mixing audio.
    lc.inject_key_down(LogicalKey::Cancel).unwrap();
    probe.arm(Trap::Sound);
    assert!(lc.step().is_err());
    assert_eq!(lc.get_frame().unwrap(), &frame);
}

#[test]
fn panics_inside_a_step_are_faults_too() {
    let _serial = crate::test_lock();
    let (_dir, wad) = bundle();
    let (mut lc, probe) = lifecycle();
    lc.initialize(&wad).unwrap();
    probe.arm(Trap::Panic);
    let err = fault_of(lc.step());
    assert!(matches!(err.fault, Fault::Panic(_)));
    assert!(!lc.is_alive());
}

#[test]
fn failed_init_needs_a_reset() {
    let _serial = crate::test_lock();
    let (_dir, wad) = bundle();
    let (mut lc, probe) = lifecycle();

    probe.arm(Trap::Boot);
    assert!(matches!(
        lc.initialize(&wad),
        Err(InitError::Fault(Fault::Fatal(_)))
    ));
    assert_eq!(lc.state(), LifecycleState::Failed);
    assert!(matches!(
        lc.initialize(&wad),
        Err(InitError::PreviouslyFailed)
    ));
    assert_eq!(probe.built(), 1);

    lc.reset().unwrap();
    assert_eq!(lc.state(), LifecycleState::Uninitialized);
    lc.initialize(&wad).unwrap();
    assert!(lc.is_alive());
    assert_eq!(probe.built(), 2);
}

#[test]
fn reset_then_initialize_recovers_after_a_step_fault() {
    let _serial = crate::test_lock();
    let (_dir, wad) = bundle();
    let (mut lc, probe) = lifecycle();
    lc.initialize(&wad).unwrap();
    lc.step().unwrap();
    probe.arm(Trap::Tic);
    lc.step().unwrap_err();

    lc.reset().unwrap();
    assert_eq!(lc.steps(), 0);
    assert!(lc.boot_info().is_none());
    // Still visibly alive between reset and re-init.
    assert!(lc.get_frame().is_some());

    lc.initialize(&wad).unwrap();
    lc.step().unwrap();
    assert!(lc.is_alive());
    assert_eq!(lc.steps(), 1);
}

#[test]
fn reset_is_only_valid_after_failure() {
    let _serial = crate::test_lock();
    let (_dir, wad) = bundle();
    let (mut lc, _) = lifecycle();
    assert_eq!(
        lc.reset(),
        Err(ResetError::NotFailed(LifecycleState::Uninitialized))
    );
    lc.initialize(&wad).unwrap();
    assert_eq!(lc.reset(), Err(ResetError::NotFailed(LifecycleState::Ready)));
    assert!(lc.is_alive());
}

#[test]
fn held_for_exactly_three_steps() {
    let _serial = crate::test_lock();
    let (_dir, wad) = bundle();
    let (mut lc, probe) = lifecycle();
    lc.initialize(&wad).unwrap();

    lc.inject_key_down(LogicalKey::Forward).unwrap();
    for _ in 0..3 {
        lc.step().unwrap();
    }
    assert_eq!(lc.held_keys(), vec![LogicalKey::Forward]);
    lc.inject_key_up(LogicalKey::Forward).unwrap();
    lc.step().unwrap();

    let up = native::KEY_UPARROW;
    assert_eq!(
        probe.posted(),
        vec![(0, KeyEvent::down(up)), (3, KeyEvent::up(up))]
    );
    assert!(lc.held_keys().is_empty());
}

#[test]
fn each_step_advances_one_tic_and_flushes_audio() {
    let _serial = crate::test_lock();
    let (_dir, wad) = bundle();
    let (mut lc, _) = lifecycle();
    lc.initialize(&wad).unwrap();
    let drain = lc.audio_drain();
    for n in 1..=5u64 {
        lc.step().unwrap();
        assert_eq!(lc.query_mode_snapshot().tic, n);
        assert_eq!(lc.audio_flushes(), n);
    }
    assert_eq!(drain.buffered(), 5 * sim::sound::FRAMES_PER_TIC);
}

#[test]
fn snapshot_tracks_menu_and_mode() {
    let _serial = crate::test_lock();
    let (_dir, wad) = bundle();
    let (mut lc, _) = lifecycle();
    lc.initialize(&wad).unwrap();
    let snap = lc.query_mode_snapshot();
    assert_eq!(snap.mode, GameMode::DemoScreen);
    assert!(snap.alive && !snap.menu_active);

    let tx = lc.key_sender();
    tx.tap(LogicalKey::Confirm, 1).unwrap();
    lc.step().unwrap();
    assert!(lc.query_mode_snapshot().menu_active);

    tx.tap(LogicalKey::Confirm, 1).unwrap();
    lc.step().unwrap();
    tx.tap(LogicalKey::Confirm, 1).unwrap();
    lc.step().unwrap();
    let snap = lc.query_mode_snapshot();
    assert_eq!(snap.mode, GameMode::Level);
    assert!(!snap.menu_active);
}

#[test]
fn release_held_reaches_the_engine() {
    let _serial = crate::test_lock();
    let (_dir, wad) = bundle();
    let (mut lc, probe) = lifecycle();
    lc.initialize(&wad).unwrap();
    lc.inject_key_down(LogicalKey::TurnLeft).unwrap();
    lc.step().unwrap();
    lc.inject_key_down(LogicalKey::Fire).unwrap();

    lc.release_held().unwrap();
    assert!(lc.held_keys().is_empty());
    let posted = probe.posted();
    assert_eq!(
        posted.last().map(|(_, e)| *e),
        Some(KeyEvent::up(native::KEY_LEFTARROW))
    );
    // The queued fire press was dropped, not delivered.
    lc.step().unwrap();
    assert!(probe
        .posted()
        .iter()
        .all(|(_, e)| e.code != native::KEY_RCTRL || e.kind != KeyEventKind::Down));
}

#[test]
fn only_one_lifecycle_at_a_time() {
    let _serial = crate::test_lock();
    let (lc, _) = lifecycle();
    assert!(Lifecycle::new(SimEngine::new).is_err());
    drop(lc);
    assert!(Lifecycle::new(SimEngine::new).is_ok());
}

#[test]
fn slow_turn_threshold_comes_from_the_engine() {
    let _serial = crate::test_lock();
    let (_dir, wad) = bundle();
    let (mut lc, _) = lifecycle();
    assert_eq!(lc.slow_turn_tics(), None);
    lc.initialize(&wad).unwrap();
    assert_eq!(lc.slow_turn_tics(), Some(sim::SLOW_TURN_TICS));
    assert!(crate::controller::RouterConfig::default()
        .validate(sim::SLOW_TURN_TICS)
        .is_ok());
}

#[test]
fn audio_is_flushed_even_when_the_engine_mixes_nothing() {
    let _serial = crate::test_lock();
    let (_dir, wad) = bundle();
    let (mut lc, probe) = lifecycle();
    probe.muted.store(true, Ordering::SeqCst);
    lc.initialize(&wad).unwrap();
    let drain = lc.audio_drain();
    for n in 1..=3u64 {
        lc.step().unwrap();
        assert_eq!(lc.audio_flushes(), n);
    }
    assert_eq!(drain.buffered(), 0);

    probe.muted.store(false, Ordering::SeqCst);
    lc.step().unwrap();
    assert_eq!(lc.audio_flushes(), 4);
    assert_eq!(drain.buffered(), sim::sound::FRAMES_PER_TIC);
}

#[test]
fn busy_region_skips_the_step_without_failing() {
    let _serial = crate::test_lock();
    let (_dir, wad) = bundle();
    let (mut lc, probe) = lifecycle();
    lc.initialize(&wad).unwrap();
    lc.step().unwrap();
    lc.inject_key_down(LogicalKey::Use).unwrap();

    let nested = fault::protect(|| lc.step()).unwrap();
    assert_eq!(nested, Err(StepError::RegionBusy));
    assert_eq!(lc.state(), LifecycleState::Ready);
    assert_eq!(lc.steps(), 1);
    assert_eq!(lc.query_mode_snapshot().tic, 1);

    // The queued press was kept and lands on the next real step.
    lc.step().unwrap();
    assert_eq!(lc.steps(), 2);
    assert_eq!(lc.held_keys(), vec![LogicalKey::Use]);
    assert!(probe
        .posted()
        .contains(&(1, KeyEvent::down(native::KEY_SPACE))));

    let nested = fault::protect(|| lc.release_held()).unwrap();
    assert_eq!(nested, Err(Fault::AlreadyArmed));
    assert_eq!(lc.state(), LifecycleState::Ready);
    assert_eq!(lc.held_keys(), vec![LogicalKey::Use]);
    assert_eq!(lc.reset(), Err(ResetError::NotFailed(LifecycleState::Ready)));
}

#[test]
fn busy_region_skips_initialization_without_failing() {
    let _serial = crate::test_lock();
    let (_dir, wad) = bundle();
    let (mut lc, probe) = lifecycle();

    let nested = fault::protect(|| lc.initialize(&wad)).unwrap();
    assert!(matches!(nested, Err(InitError::RegionBusy)));
    assert_eq!(lc.state(), LifecycleState::Uninitialized);
    assert_eq!(lc.slow_turn_tics(), None);

    lc.initialize(&wad).unwrap();
    assert!(lc.is_alive());
    assert_eq!(probe.built(), 2);
}
