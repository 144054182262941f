//! Desktop host: a window, a keyboard standing in for the six physical
//! buttons, and audio through SDL.
//!
//! Arrow up/down move, Enter/Space is Back, 1/2/3 are L1/L2/L3. F2 closes
//! the session and re-opens it on the same engine instance.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Error, Result};
use clap::Parser;
use sdl2::audio::{AudioQueue, AudioSpecDesired};
use sdl2::event::Event;
use sdl2::keyboard::Keycode;
use sdl2::pixels::PixelFormatEnum;

use doom_embed::audio::{choose_output, AudioDrain, OutputChoice, SAMPLE_RATE};
use doom_embed::config;
use doom_embed::lifecycle::LaunchOptions;
use doom_embed::session::{Session, SessionConfig, SessionEvent};
use doom_embed::shutdown;
use doom_embed::sim::SimEngine;
use doom_embed::video::Frame;
use doom_embed::{Button, Lifecycle};

const SCALE: u32 = 3;
/// Keep roughly this much audio queued ahead of the device.
const AUDIO_LEAD_FRAMES: usize = 2048;

#[derive(Debug, Parser)]
#[command(name = "sdl_host", version)]
struct Args {
    #[arg(long, env = "DOOM_EMBED_IWAD")]
    iwad: PathBuf,
    #[arg(long, env = "DOOM_EMBED_CWD")]
    cwd: Option<PathBuf>,
    #[arg(long, env = "DOOM_EMBED_CONFIG")]
    config: Option<PathBuf>,
    #[arg(long, env = "DOOM_EMBED_FPS")]
    fps: Option<u32>,
    #[arg(long, env = "DOOM_EMBED_AUDIO_DEVICE")]
    audio_device: Option<String>,
}

fn button_for(key: Keycode) -> Option<Button> {
    match key {
        Keycode::Up => Some(Button::Up),
        Keycode::Down => Some(Button::Down),
        Keycode::Return | Keycode::Space => Some(Button::Back),
        Keycode::Num1 => Some(Button::L1),
        Keycode::Num2 => Some(Button::L2),
        Keycode::Num3 => Some(Button::L3),
        _ => None,
    }
}

fn open_audio(sdl: &sdl2::Sdl, configured: Option<&str>) -> Option<AudioQueue<i16>> {
    let Ok(audio) = sdl.audio() else {
        log::warn!("no audio subsystem, running silent");
        return None;
    };
    let available: Vec<String> = (0..audio.num_audio_playback_devices().unwrap_or(0))
        .filter_map(|i| audio.audio_playback_device_name(i).ok())
        .collect();
    let desired = AudioSpecDesired {
        freq: Some(SAMPLE_RATE as i32),
        channels: Some(2),
        samples: Some(512),
    };
    let device = match choose_output(configured, &available, true) {
        OutputChoice::Named(name) => Some(name),
        OutputChoice::SystemDefault => None,
        OutputChoice::Silent => return None,
    };
    match audio.open_queue::<i16, _>(device.as_deref(), &desired) {
        Ok(queue) => {
            queue.resume();
            Some(queue)
        }
        Err(e) => {
            log::warn!("opening audio: {e}, running silent");
            None
        }
    }
}

fn pump_audio(drain: &AudioDrain, queue: Option<&AudioQueue<i16>>, samples: &mut Vec<i16>) {
    let Some(queue) = queue else {
        drain.pop_interleaved(samples, usize::MAX);
        return;
    };
    let queued_frames = queue.size() as usize / 4;
    let want = AUDIO_LEAD_FRAMES.saturating_sub(queued_frames);
    if want == 0 || drain.pop_interleaved(samples, want) == 0 {
        return;
    }
    if let Err(e) = queue.queue_audio(samples) {
        log::warn!("queueing audio: {e}");
    }
}

fn title(footer: [&str; 3], running: bool) -> String {
    let state = if running { "" } else { " (paused)" };
    format!("doom-embed{state}   [1] {}  [2] {}  [3] {}", footer[0], footer[1], footer[2])
}

fn main() -> Result<()> {
    env_logger::init();
    shutdown::install();
    let args = Args::parse();

    let launch = LaunchOptions {
        asset_path: args.iwad.clone(),
        working_dir: args.cwd.clone(),
        config_path: args.config.clone(),
    };
    let mut lifecycle = Lifecycle::new(SimEngine::new)?;
    lifecycle.initialize_with(&launch)?;

    let mut session_config = SessionConfig::from_env();
    if let Some(fps) = args.fps.filter(|&f| f > 0) {
        session_config.fps = fps;
    }

    let sdl = sdl2::init().map_err(Error::msg)?;
    let video = sdl.video().map_err(Error::msg)?;
    let window = video
        .window(
            "doom-embed",
            Frame::WIDTH as u32 * SCALE,
            Frame::HEIGHT as u32 * SCALE,
        )
        .position_centered()
        .build()?;
    let mut canvas = window.into_canvas().present_vsync().build()?;
    let texture_creator = canvas.texture_creator();
    let mut texture = texture_creator.create_texture_streaming(
        PixelFormatEnum::RGBA32,
        Frame::WIDTH as u32,
        Frame::HEIGHT as u32,
    )?;
    let audio_device = args.audio_device.clone().or_else(config::audio_device);
    let audio = open_audio(&sdl, audio_device.as_deref());
    let drain = lifecycle.audio_drain();
    let mut samples = Vec::new();
    let mut events = sdl.event_pump().map_err(Error::msg)?;

    let mut session = Some(Session::start(lifecycle, session_config)?);
    let mut parked: Option<Lifecycle<SimEngine>> = None;
    let mut footer = ["ALT", "◄", "►/OK"];
    let mut shown_title = String::new();

    'main: loop {
        for event in events.poll_iter() {
            match event {
                Event::Quit { .. }
                | Event::KeyDown {
                    keycode: Some(Keycode::Escape),
                    ..
                } => break 'main,
                Event::KeyDown {
                    keycode: Some(Keycode::F2),
                    repeat: false,
                    ..
                } => {
                    if let Some(running) = session.take() {
                        parked = Some(running.stop()?);
                    } else if let Some(mut lc) = parked.take() {
                        // A session that died left the lifecycle reset.
                        if !lc.is_alive() {
                            lc.initialize_with(&launch)?;
                        }
                        session = Some(Session::start(lc, session_config)?);
                    }
                }
                Event::KeyDown {
                    keycode: Some(key),
                    repeat: false,
                    ..
                } => {
                    if let (Some(button), Some(s)) = (button_for(key), &session) {
                        s.press(button);
                    }
                }
                _ => {}
            }
        }
        if shutdown::should_quit() {
            break;
        }

        if let Some(s) = &session {
            while let Some(event) = s.try_event() {
                match event {
                    SessionEvent::LevelExited { alt_cleared } => {
                        log::info!("level exited (alt cleared: {alt_cleared})");
                    }
                    SessionEvent::Died(fault) => {
                        log::error!("engine died: {fault}");
                        shutdown::set_exit_code(1);
                    }
                }
            }
            footer = s.footer();
            s.with_frame(|frame| texture.update(None, frame.as_bytes(), frame.pitch()))?;
        }
        let running = session.as_ref().is_some_and(|s| s.is_running());
        let wanted = title(footer, running);
        if wanted != shown_title {
            canvas
                .window_mut()
                .set_title(&wanted)
                .context("setting window title")?;
            shown_title = wanted;
        }
        pump_audio(&drain, audio.as_ref(), &mut samples);

        canvas.clear();
        canvas.copy(&texture, None, None).map_err(Error::msg)?;
        canvas.present();
        if !running {
            std::thread::sleep(Duration::from_millis(16));
        }
    }

    if let Some(s) = session.take() {
        s.stop()?;
    }
    let code = shutdown::exit_code();
    if code != 0 {
        std::process::exit(code);
    }
    Ok(())
}
