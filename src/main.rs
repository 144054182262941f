use std::path::PathBuf;
use std::process;

use anyhow::{bail, Context, Result};
use clap::Parser;
use serde::Serialize;

use doom_embed::config;
use doom_embed::dump::FrameDump;
use doom_embed::lifecycle::LaunchOptions;
use doom_embed::script::Script;
use doom_embed::shutdown;
use doom_embed::sim::{self, SimEngine};
use doom_embed::{
    Controller, EngineSnapshot, Lifecycle, LifecycleState, RouterConfig, StepError, StepFault,
};

/// Runs the embedded engine headless for a fixed number of steps.
#[derive(Debug, Parser)]
#[command(name = "doom-embed", version)]
struct Args {
    /// Asset bundle to boot from.
    #[arg(long, env = "DOOM_EMBED_IWAD")]
    iwad: Option<PathBuf>,

    /// Steps to run.
    #[arg(long, default_value_t = 350)]
    steps: u64,

    /// Scripted buttons, e.g. `10-12:BACK;40-90:UP`.
    #[arg(long)]
    script: Option<String>,

    /// Write the last frame here as a bincode dump.
    #[arg(long)]
    dump: Option<PathBuf>,

    /// Working directory for the engine.
    #[arg(long, env = "DOOM_EMBED_CWD")]
    cwd: Option<PathBuf>,

    /// Engine config file.
    #[arg(long, env = "DOOM_EMBED_CONFIG")]
    config: Option<PathBuf>,

    /// Write the reference asset bundle to this path and boot from it.
    #[arg(long)]
    make_wad: Option<PathBuf>,

    /// Override the router's turn hold.
    #[arg(long, env = "DOOM_EMBED_TURN_HOLD")]
    turn_hold: Option<u32>,
}

#[derive(Debug, Serialize)]
struct Report {
    state: LifecycleState,
    steps: u64,
    snapshot: EngineSnapshot,
    audio_flushes: u64,
    audio_frames: usize,
    level_exits: u32,
    fault: Option<String>,
    fault_tic: Option<u64>,
}

fn main() {
    env_logger::init();
    shutdown::install();
    if let Err(e) = run(Args::parse()) {
        eprintln!("doom-embed: {e:#}");
        shutdown::set_exit_code(1);
    }
    let code = shutdown::exit_code();
    if code != 0 {
        process::exit(code);
    }
}

fn run(args: Args) -> Result<()> {
    let asset = match (&args.make_wad, &args.iwad) {
        (Some(path), _) => {
            sim::write_reference_bundle(path)
                .with_context(|| format!("writing {}", path.display()))?;
            path.clone()
        }
        (None, Some(path)) => path.clone(),
        (None, None) => match config::asset_path() {
            Some(path) => path,
            None => bail!("no asset bundle: pass --iwad or --make-wad"),
        },
    };
    let script = args
        .script
        .as_deref()
        .map(Script::parse)
        .transpose()
        .context("parsing --script")?;

    let mut lifecycle = Lifecycle::new(SimEngine::new)?;
    lifecycle.initialize_with(&LaunchOptions {
        asset_path: asset,
        working_dir: args.cwd.clone(),
        config_path: args.config.clone(),
    })?;

    let mut router = RouterConfig::default();
    if let Some(hold) = args.turn_hold {
        router.turn_hold = hold;
    }
    if let Some(threshold) = lifecycle.slow_turn_tics() {
        router.validate(threshold)?;
    }
    let mut controller = Controller::with_config(lifecycle.key_sender(), router);
    controller.update_snapshot(&lifecycle.query_mode_snapshot());

    let drain = lifecycle.audio_drain();
    let mut audio_frames = 0usize;
    let mut samples = Vec::new();
    let mut level_exits = 0u32;
    let mut fault: Option<StepFault> = None;

    for step in 0..args.steps {
        if shutdown::should_quit() {
            log::info!("quit requested at step {step}");
            break;
        }
        if let Some(script) = &script {
            for button in script.presses_for_step(step).buttons() {
                let absorbed = controller.press(button);
                log::debug!("step {step}: {button:?} absorbed={absorbed}");
            }
        }
        match lifecycle.step() {
            Ok(()) => {}
            Err(StepError::Fault(f)) => {
                fault = Some(f);
                break;
            }
            Err(e @ StepError::RegionBusy) => return Err(e.into()),
        }
        if controller.update_snapshot(&lifecycle.query_mode_snapshot()) {
            controller.exit_level();
            level_exits += 1;
        }
        // No device here: drain and drop.
        audio_frames += drain.pop_interleaved(&mut samples, usize::MAX);
    }

    if fault.is_none() {
        lifecycle.release_held()?;
    }
    if let Some(path) = &args.dump {
        match lifecycle.get_frame() {
            Some(frame) => {
                FrameDump::capture(frame, lifecycle.steps(), lifecycle.query_mode_snapshot())
                    .save(path)?
            }
            None => log::warn!("no frame to dump"),
        }
    }

    let report = Report {
        state: lifecycle.state(),
        steps: lifecycle.steps(),
        snapshot: lifecycle.query_mode_snapshot(),
        audio_flushes: lifecycle.audio_flushes(),
        audio_frames,
        level_exits,
        fault: fault.as_ref().map(|f| f.fault.to_string()),
        fault_tic: fault.as_ref().map(|f| f.tic),
    };
    if !config::quiet() {
        println!("{}", serde_json::to_string_pretty(&report)?);
    }
    if let Some(f) = fault {
        bail!("{f}");
    }
    Ok(())
}
