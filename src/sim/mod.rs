//! Compact reference engine.
//!
//! Implements the [`Engine`] seam with the same shape as the real thing:
//! an event queue drained at the start of every tic, a title/demo screen
//! that pops the menu on any key, a pausing menu overlay (main, then skill),
//! levels driven by `gamekeydown` with slow-turn acceleration, intermissions
//! and a finale. Unrecoverable conditions go through [`fault::fatal`].

mod render;
pub mod sound;

use std::collections::VecDeque;
use std::path::Path;

use crate::defaults::Defaults;
use crate::engine::{
    BootInfo, Engine, EngineError, GameMode, KeyEvent, KeyEventKind, Launch,
    VideoDriver, PALETTE_BYTES, SCREEN_PIXELS,
};
use crate::fault;
use crate::keys::{native, Bindings};
use crate::wad::{Wad, WadError, WadKind, WadWriter};

use render::Screen;
use sound::{Mixer, Sfx};

/// Tics a turn key must be held before turning leaves slow speed.
pub const SLOW_TURN_TICS: u32 = 6;
/// Forward progress needed to finish a map.
pub const EXIT_DISTANCE: i64 = 4000;
pub const MAPS: u32 = 3;
pub const NUM_PALETTES: usize = 14;
/// First palette of the pickup/fire flash range.
pub const BONUS_PALETTE: usize = 9;

const ANGLE_TURN: [u32; 3] = [640, 1280, 320];
const FORWARD_MOVE: [i64; 2] = [0x19, 0x32];
const MAX_EVENTS: usize = 64;
const BONUS_TICS: u32 = 6;
const REFIRE_TICS: u32 = 8;
const INTERMISSION_MIN_TICS: u32 = 35;
const INTERMISSION_MAX_TICS: u32 = 350;
const FINALE_MIN_TICS: u32 = 35;
const FINALE_MAX_TICS: u32 = 700;

const MAIN_ITEMS: usize = 6;
const SKILL_ITEMS: usize = 5;
const DEFAULT_SKILL: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Title,
    Level,
    Intermission { tics: u32 },
    Finale { tics: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Page {
    Main,
    Skill,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Menu {
    page: Page,
    cursor: usize,
}

impl Menu {
    fn items(&self) -> usize {
        match self.page {
            Page::Main => MAIN_ITEMS,
            Page::Skill => SKILL_ITEMS,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct Player {
    angle: u32,
    distance: i64,
    turnheld: u32,
    health: i32,
    refire: u32,
    bonus: u32,
}

pub struct SimEngine {
    wad: Option<Wad>,
    palettes: Vec<[u8; PALETTE_BYTES]>,
    bindings: Bindings,
    events: VecDeque<KeyEvent>,
    gamekeydown: [bool; 256],
    gametic: u64,
    stage: Stage,
    menu: Option<Menu>,
    accelerate: bool,
    map: u32,
    skill: usize,
    player: Player,
    last_palette: Option<usize>,
    screen: Box<Screen>,
    mixer: Mixer,
}

impl SimEngine {
    pub fn new() -> Self {
        Self {
            wad: None,
            palettes: Vec::new(),
            bindings: Bindings::CANONICAL,
            events: VecDeque::with_capacity(MAX_EVENTS),
            gamekeydown: [false; 256],
            gametic: 0,
            stage: Stage::Title,
            menu: None,
            accelerate: false,
            map: 0,
            skill: DEFAULT_SKILL,
            player: Player::default(),
            last_palette: None,
            screen: Box::new([0u8; SCREEN_PIXELS]),
            mixer: Mixer::new(),
        }
    }

    pub fn map(&self) -> u32 {
        self.map
    }

    pub fn skill(&self) -> usize {
        self.skill
    }

    pub fn angle(&self) -> u32 {
        self.player.angle
    }

    pub fn distance(&self) -> i64 {
        self.player.distance
    }

    pub fn turnheld(&self) -> u32 {
        self.player.turnheld
    }

    pub fn is_key_down(&self, code: i32) -> bool {
        usize::try_from(code)
            .ok()
            .and_then(|c| self.gamekeydown.get(c).copied())
            .unwrap_or(false)
    }

    pub fn menu_cursor(&self) -> Option<usize> {
        self.menu.map(|m| m.cursor)
    }

    fn process_event(&mut self, ev: KeyEvent) {
        if !(0..256).contains(&ev.code) {
            fault::fatal(format!("G_Responder: bad key code {}", ev.code));
        }
        let code = ev.code as usize;
        if ev.kind == KeyEventKind::Up {
            self.gamekeydown[code] = false;
            return;
        }
        if self.menu_responder(ev.code) {
            return;
        }
        match self.stage {
            // Any key on the title/demo screen pops up the menu.
            Stage::Title => self.open_menu(),
            Stage::Level => self.gamekeydown[code] = true,
            Stage::Intermission { tics } => {
                if tics >= INTERMISSION_MIN_TICS && self.is_advance_key(ev.code) {
                    self.accelerate = true;
                }
            }
            Stage::Finale { tics } => {
                if tics >= FINALE_MIN_TICS && self.is_advance_key(ev.code) {
                    self.accelerate = true;
                }
            }
        }
    }

    fn is_advance_key(&self, code: i32) -> bool {
        code == self.bindings.key_fire || code == self.bindings.key_use || code == native::KEY_ENTER
    }

    fn open_menu(&mut self) {
        self.menu = Some(Menu {
            page: Page::Main,
            cursor: 0,
        });
        self.mixer.start(Sfx::MenuOpen, 128);
    }

    /// Menu keys. Eats every key-down while the menu is up.
    fn menu_responder(&mut self, code: i32) -> bool {
        let Some(mut menu) = self.menu else {
            if code == native::KEY_ESCAPE {
                self.open_menu();
                return true;
            }
            return false;
        };
        let n = menu.items();
        match code {
            native::KEY_UPARROW => {
                menu.cursor = (menu.cursor + n - 1) % n;
                self.mixer.start(Sfx::MenuMove, 128);
            }
            native::KEY_DOWNARROW => {
                menu.cursor = (menu.cursor + 1) % n;
                self.mixer.start(Sfx::MenuMove, 128);
            }
            native::KEY_ENTER => {
                self.mixer.start(Sfx::MenuSelect, 128);
                match menu.page {
                    Page::Main if menu.cursor == 0 => {
                        menu = Menu {
                            page: Page::Skill,
                            cursor: DEFAULT_SKILL,
                        };
                    }
                    Page::Main => {}
                    Page::Skill => {
                        self.menu = None;
                        self.new_game(menu.cursor);
                        return true;
                    }
                }
            }
            native::KEY_ESCAPE => {
                match menu.page {
                    Page::Skill => {
                        menu = Menu {
                            page: Page::Main,
                            cursor: 0,
                        }
                    }
                    Page::Main => {
                        self.menu = None;
                        return true;
                    }
                }
            }
            _ => {}
        }
        self.menu = Some(menu);
        true
    }

    fn new_game(&mut self, skill: usize) {
        log::debug!("new game, skill {skill}");
        self.skill = skill;
        self.map = 1;
        self.start_level();
    }

    fn start_level(&mut self) {
        self.stage = Stage::Level;
        self.gamekeydown = [false; 256];
        self.player = Player {
            health: 100,
            ..Player::default()
        };
    }

    fn player_think(&mut self) {
        let b = self.bindings;
        let down = |code: i32| self.is_key_down(code);
        let forward = down(b.key_up);
        let backward = down(b.key_down);
        let left = down(b.key_left);
        let right = down(b.key_right);
        let fire = down(b.key_fire);
        let speed = usize::from(down(b.key_speed));

        let p = &mut self.player;
        if left || right {
            p.turnheld += 1;
        } else {
            p.turnheld = 0;
        }
        let tspeed = if p.turnheld < SLOW_TURN_TICS { 2 } else { speed };
        if right {
            p.angle = p.angle.wrapping_sub(ANGLE_TURN[tspeed] << 16);
        }
        if left {
            p.angle = p.angle.wrapping_add(ANGLE_TURN[tspeed] << 16);
        }

        let mut step = 0;
        if forward {
            step += FORWARD_MOVE[speed];
        }
        if backward {
            step -= FORWARD_MOVE[speed];
        }
        p.distance = (p.distance + step).max(0);

        p.refire = p.refire.saturating_sub(1);
        p.bonus = p.bonus.saturating_sub(1);
        if fire && p.refire == 0 {
            p.refire = REFIRE_TICS;
            p.bonus = BONUS_TICS;
            self.mixer.start(Sfx::Pistol, 128);
        }

        if self.player.distance >= EXIT_DISTANCE {
            log::debug!("map {} finished at tic {}", self.map, self.gametic);
            self.stage = Stage::Intermission { tics: 0 };
            self.gamekeydown = [false; 256];
            self.mixer.start(Sfx::LevelExit, 128);
        }
    }

    fn ticker(&mut self) {
        let accelerate = std::mem::take(&mut self.accelerate);
        match self.stage {
            Stage::Title => {}
            Stage::Level => {
                // The menu pauses a single-player game.
                if self.menu.is_none() {
                    self.player_think();
                }
            }
            Stage::Intermission { tics } => {
                let tics = tics + 1;
                if accelerate || tics >= INTERMISSION_MAX_TICS {
                    if self.map >= MAPS {
                        self.stage = Stage::Finale { tics: 0 };
                    } else {
                        self.map += 1;
                        self.start_level();
                    }
                } else {
                    self.stage = Stage::Intermission { tics };
                }
            }
            Stage::Finale { tics } => {
                let tics = tics + 1;
                if accelerate || tics >= FINALE_MAX_TICS {
                    self.stage = Stage::Title;
                    self.map = 0;
                } else {
                    self.stage = Stage::Finale { tics };
                }
            }
        }
        self.gametic += 1;
    }

    fn palette_index(&self) -> usize {
        let wanted = if self.stage == Stage::Level && self.player.bonus > 0 {
            BONUS_PALETTE
        } else {
            0
        };
        wanted.min(self.palettes.len().saturating_sub(1))
    }
}

impl Default for SimEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl Engine for SimEngine {
    fn boot(&mut self, launch: &Launch) -> Result<BootInfo, EngineError> {
        let wad = Wad::open(&launch.asset_path)?;
        let palettes: Vec<[u8; PALETTE_BYTES]> = match wad.lump("PLAYPAL") {
            Some(raw) if raw.len() >= PALETTE_BYTES => raw
                .chunks_exact(PALETTE_BYTES)
                .map(|chunk| {
                    let mut pal = [0u8; PALETTE_BYTES];
                    pal.copy_from_slice(chunk);
                    pal
                })
                .collect(),
            _ => fault::fatal("W_GetNumForName: PLAYPAL not found!"),
        };
        let defaults =
            Defaults::load(&launch.config_path).map_err(|source| EngineError::Config {
                path: launch.config_path.clone(),
                source,
            })?;
        self.bindings = defaults.bindings();
        self.palettes = palettes;
        self.stage = Stage::Title;
        self.last_palette = None;

        let info = BootInfo {
            asset_path: launch.asset_path.clone(),
            lump_count: wad.lump_count(),
            asset_bytes: wad.byte_len(),
            bindings: self.bindings,
        };
        log::debug!(
            "{} palettes, working dir {}",
            self.palettes.len(),
            launch.working_dir.display()
        );
        self.wad = Some(wad);
        Ok(info)
    }

    fn post_event(&mut self, event: KeyEvent) {
        if self.events.len() == MAX_EVENTS {
            self.events.pop_front();
        }
        self.events.push_back(event);
    }

    fn run_tic(&mut self) {
        while let Some(ev) = self.events.pop_front() {
            self.process_event(ev);
        }
        self.ticker();
    }

    fn display(&mut self, video: &mut dyn VideoDriver) {
        let screen = &mut *self.screen;
        match self.stage {
            Stage::Title => render::title(screen, self.gametic),
            Stage::Level => render::level(
                screen,
                self.player.angle,
                self.player.distance,
                self.map,
                self.player.health,
            ),
            Stage::Intermission { tics } => render::intermission(screen, self.map, tics),
            Stage::Finale { tics } => render::finale(screen, tics),
        }
        if let Some(menu) = self.menu {
            render::menu(screen, menu.items(), menu.cursor);
        }
        let index = self.palette_index();
        if self.last_palette != Some(index) {
            if let Some(pal) = self.palettes.get(index) {
                video.set_palette(pal);
                self.last_palette = Some(index);
            }
        }
        video.finish_update(&self.screen);
    }

    fn update_sound(&mut self) {
        self.mixer.update();
    }

    fn mix_sound(&mut self) -> &[(i16, i16)] {
        self.mixer.mix()
    }

    fn game_mode(&self) -> GameMode {
        match self.stage {
            Stage::Title => GameMode::DemoScreen,
            Stage::Level => GameMode::Level,
            Stage::Intermission { .. } => GameMode::Intermission,
            Stage::Finale { .. } => GameMode::Finale,
        }
    }

    fn menu_active(&self) -> bool {
        self.menu.is_some()
    }

    fn gametic(&self) -> u64 {
        self.gametic
    }

    fn slow_turn_tics(&self) -> u32 {
        SLOW_TURN_TICS
    }
}

/// Palettes the reference bundle ships: a base ramp, eight red (damage)
/// tints, four yellow (bonus) tints and a green one.
pub fn reference_palettes() -> Vec<u8> {
    let mut out = Vec::with_capacity(NUM_PALETTES * PALETTE_BYTES);
    for n in 0..NUM_PALETTES {
        let (tint, amount) = match n {
            0 => ([0u8, 0, 0], 0u32),
            1..=8 => ([255, 0, 0], n as u32 * 28),
            9..=12 => ([215, 186, 69], (n as u32 - 8) * 32),
            _ => ([0, 255, 0], 32),
        };
        for i in 0..256u32 {
            let base = [i, (i * 3) % 256, 255 - i];
            for (c, t) in base.iter().zip(tint) {
                let mixed = (c * (256 - amount) + t as u32 * amount) / 256;
                out.push(mixed as u8);
            }
        }
    }
    out
}

/// The minimal bundle the reference engine boots from.
pub fn reference_bundle() -> Result<WadWriter, WadError> {
    let mut writer = WadWriter::new().lump("PLAYPAL", reference_palettes())?;
    for map in 1..=MAPS {
        writer = writer.lump(&format!("MAP{map:02}"), Vec::new())?;
    }
    Ok(writer)
}

pub fn write_reference_bundle(path: &Path) -> Result<(), WadError> {
    reference_bundle()?.write(path, WadKind::Iwad)
}
