// Environment-driven settings, read once.

use std::path::PathBuf;
use std::sync::OnceLock;

fn env_flag(key: &str, default: bool) -> bool {
    std::env::var(key)
        .map(|v| matches!(v.as_str(), "1" | "true" | "TRUE" | "on" | "ON"))
        .unwrap_or(default)
}

fn env_u32(key: &str, default: u32) -> u32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<u32>().ok())
        .unwrap_or(default)
}

fn env_path(key: &str) -> Option<PathBuf> {
    std::env::var_os(key)
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

pub const DEFAULT_FPS: u32 = 30;
pub const DEFAULT_FRAME_DIVISOR: u32 = 2;

pub fn quiet() -> bool {
    static ON: OnceLock<bool> = OnceLock::new();
    *ON.get_or_init(|| env_flag("QUIET", false))
}

/// Host step rate; zero is treated as the default.
pub fn fps() -> u32 {
    static V: OnceLock<u32> = OnceLock::new();
    *V.get_or_init(|| match env_u32("DOOM_EMBED_FPS", DEFAULT_FPS) {
        0 => DEFAULT_FPS,
        n => n,
    })
}

/// Publish every Nth stepped frame to the host.
pub fn frame_divisor() -> u32 {
    static V: OnceLock<u32> = OnceLock::new();
    *V.get_or_init(|| env_u32("DOOM_EMBED_FRAME_DIVISOR", DEFAULT_FRAME_DIVISOR).max(1))
}

pub fn turn_hold() -> Option<u32> {
    static V: OnceLock<Option<u32>> = OnceLock::new();
    *V.get_or_init(|| {
        std::env::var("DOOM_EMBED_TURN_HOLD")
            .ok()
            .and_then(|v| v.trim().parse().ok())
    })
}

pub fn asset_path() -> Option<PathBuf> {
    env_path("DOOM_EMBED_IWAD")
}

pub fn working_dir() -> Option<PathBuf> {
    env_path("DOOM_EMBED_CWD")
}

pub fn config_path() -> Option<PathBuf> {
    env_path("DOOM_EMBED_CONFIG")
}

pub fn audio_device() -> Option<String> {
    env_string("DOOM_EMBED_AUDIO_DEVICE")
}
