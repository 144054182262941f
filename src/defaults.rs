//! The engine's persisted configuration file (`name value` per line) and the
//! canonical overrides forced onto it before every boot.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::keys::Bindings;

/// Non-binding settings forced alongside the control bindings.
const FORCED_SETTINGS: [(&str, i32); 2] = [("use_mouse", 0), ("use_joystick", 0)];

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Defaults {
    entries: Vec<(String, String)>,
}

impl Defaults {
    /// Parses a config file, dropping lines that don't look like `name value`.
    pub fn parse(text: &str) -> Self {
        let mut defaults = Defaults::default();
        for (lineno, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let mut parts = line.splitn(2, char::is_whitespace);
            let name = parts.next().unwrap_or_default();
            let value = parts.next().map(str::trim).unwrap_or_default();
            if !valid_name(name) || !valid_value(value) {
                log::warn!("config line {}: ignoring {:?}", lineno + 1, line);
                continue;
            }
            defaults.set(name, value.to_string());
        }
        defaults
    }

    /// Loads `path`; a missing file is an empty config.
    pub fn load(path: &Path) -> io::Result<Self> {
        match fs::read(path) {
            Ok(bytes) => Ok(Self::parse(&String::from_utf8_lossy(&bytes))),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e),
        }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn get_int(&self, name: &str) -> Option<i32> {
        let raw = self.get(name)?;
        match raw.strip_prefix("0x").or_else(|| raw.strip_prefix("0X")) {
            Some(hex) => i32::from_str_radix(hex, 16).ok(),
            None => raw.parse().ok(),
        }
    }

    pub fn set(&mut self, name: &str, value: String) {
        match self.entries.iter_mut().find(|(n, _)| n == name) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((name.to_string(), value)),
        }
    }

    pub fn bindings(&self) -> Bindings {
        Bindings::from_lookup(|name| self.get_int(name))
    }

    /// Overwrites the control bindings and input-device settings, keeping
    /// everything else.
    pub fn force(&mut self, bindings: &Bindings) {
        for (name, value) in bindings.entries() {
            self.set(name, value.to_string());
        }
        for (name, value) in FORCED_SETTINGS {
            self.set(name, value.to_string());
        }
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        for (name, value) in &self.entries {
            out.push_str(name);
            out.push_str("\t\t");
            out.push_str(value);
            out.push('\n');
        }
        out
    }

    pub fn save(&self, path: &Path) -> io::Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, self.render())
    }
}

/// Loads whatever is at `path`, forces the canonical bindings and writes the
/// result back so the engine reads a known-good file.
pub fn force_canonical(path: &Path) -> io::Result<Defaults> {
    let mut defaults = Defaults::load(path)?;
    let stale = defaults.bindings();
    if stale != Bindings::CANONICAL {
        log::info!("overriding stale control bindings in {}", path.display());
    }
    defaults.force(&Bindings::CANONICAL);
    defaults.save(path)?;
    Ok(defaults)
}

/// Absolute launch paths derived from the asset path and optional overrides.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchPaths {
    pub asset_path: PathBuf,
    pub working_dir: PathBuf,
    pub config_path: PathBuf,
}

pub const DEFAULT_CONFIG_NAME: &str = "doomrc.cfg";

impl LaunchPaths {
    /// The working directory defaults to the asset's directory and the config
    /// file to `<working dir>/doomrc.cfg`. Both directories are created.
    pub fn resolve(
        asset_path: &Path,
        working_dir: Option<&Path>,
        config_path: Option<&Path>,
    ) -> io::Result<Self> {
        let asset_path = absolute(asset_path)?;
        let working_dir = match working_dir {
            Some(dir) => absolute(dir)?,
            None => asset_path
                .parent()
                .map(Path::to_path_buf)
                .unwrap_or_else(|| PathBuf::from("/")),
        };
        let config_path = match config_path {
            Some(p) => absolute(p)?,
            None => working_dir.join(DEFAULT_CONFIG_NAME),
        };
        fs::create_dir_all(&working_dir)?;
        if let Some(parent) = config_path.parent() {
            fs::create_dir_all(parent)?;
        }
        Ok(Self {
            asset_path,
            working_dir,
            config_path,
        })
    }
}

fn absolute(path: &Path) -> io::Result<PathBuf> {
    if path.is_absolute() {
        Ok(path.to_path_buf())
    } else {
        Ok(std::env::current_dir()?.join(path))
    }
}

fn valid_name(name: &str) -> bool {
    !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn valid_value(value: &str) -> bool {
    if value.is_empty() {
        return false;
    }
    if value.starts_with('"') {
        return value.len() >= 2 && value.ends_with('"');
    }
    !value.chars().any(char::is_whitespace) && value.chars().all(|c| c.is_ascii_graphic())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn parse_keeps_valid_lines_and_drops_garbage() {
        let d = Defaults::parse(
            "mouse_sensitivity\t\t5\nkey_fire 13\n\u{fffd}\u{fffd}garbage\nchatmacro0\t\t\"no no\"\nlonely\n",
        );
        assert_eq!(d.get_int("mouse_sensitivity"), Some(5));
        assert_eq!(d.get_int("key_fire"), Some(13));
        assert_eq!(d.get("chatmacro0"), Some("\"no no\""));
        assert_eq!(d.get("lonely"), None);
    }

    #[test]
    fn hex_values_parse() {
        let d = Defaults::parse("key_fire 0x9d\n");
        assert_eq!(d.get_int("key_fire"), Some(0x9d));
    }

    #[test]
    fn force_overrides_bindings_but_keeps_other_settings() {
        let mut d = Defaults::parse("sfx_volume 8\nkey_fire 13\nuse_mouse 1\n");
        d.force(&Bindings::CANONICAL);
        assert_eq!(d.bindings(), Bindings::CANONICAL);
        assert_eq!(d.get_int("sfx_volume"), Some(8));
        assert_eq!(d.get_int("use_mouse"), Some(0));
        assert_eq!(d.get_int("use_joystick"), Some(0));
    }

    #[test]
    fn force_canonical_rewrites_file_on_disk() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("doomrc.cfg");
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, "key_up 119\nkey_down 115\nscreenblocks 10\n").unwrap();

        force_canonical(&path).unwrap();

        let reread = Defaults::load(&path).unwrap();
        assert_eq!(reread.bindings(), Bindings::CANONICAL);
        assert_eq!(reread.get_int("screenblocks"), Some(10));
    }

    #[test]
    fn missing_file_loads_empty() {
        let dir = tempdir().unwrap();
        let d = Defaults::load(&dir.path().join("absent.cfg")).unwrap();
        assert_eq!(d, Defaults::default());
    }

    #[test]
    fn launch_paths_default_to_asset_directory() {
        let dir = tempdir().unwrap();
        let asset = dir.path().join("doom2.wad");
        let paths = LaunchPaths::resolve(&asset, None, None).unwrap();
        assert_eq!(paths.working_dir, dir.path());
        assert_eq!(paths.config_path, dir.path().join(DEFAULT_CONFIG_NAME));
    }

    #[test]
    fn launch_path_overrides_are_created() {
        let dir = tempdir().unwrap();
        let asset = dir.path().join("doom2.wad");
        let cwd = dir.path().join("run");
        let cfg = dir.path().join("cfg").join("custom.cfg");
        let paths = LaunchPaths::resolve(&asset, Some(&cwd), Some(&cfg)).unwrap();
        assert_eq!(paths.working_dir, cwd);
        assert_eq!(paths.config_path, cfg);
        assert!(cwd.is_dir());
        assert!(dir.path().join("cfg").is_dir());
    }
}
