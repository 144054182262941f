//! Frame dumps for headless runs.

use std::fs;
use std::io;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::lifecycle::EngineSnapshot;
use crate::video::Frame;

const MAGIC: [u8; 4] = *b"DEFD";
const VERSION: u32 = 1;

#[derive(Debug, Error)]
pub enum DumpError {
    #[error("dump io: {0}")]
    Io(#[from] io::Error),
    #[error("dump encoding: {0}")]
    Codec(#[from] bincode::Error),
    #[error("not a frame dump")]
    BadMagic,
    #[error("unsupported dump version {0}")]
    Version(u32),
    #[error("frame is {width}x{height} but carries {len} bytes")]
    Size {
        width: u32,
        height: u32,
        len: usize,
    },
}

/// One RGBA frame plus the snapshot it was captured with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameDump {
    magic: [u8; 4],
    version: u32,
    pub width: u32,
    pub height: u32,
    pub step: u64,
    pub snapshot: EngineSnapshot,
    pub rgba: Vec<u8>,
}

impl FrameDump {
    pub fn capture(frame: &Frame, step: u64, snapshot: EngineSnapshot) -> Self {
        Self {
            magic: MAGIC,
            version: VERSION,
            width: frame.width() as u32,
            height: frame.height() as u32,
            step,
            snapshot,
            rgba: frame.as_bytes().to_vec(),
        }
    }

    pub fn save(&self, path: &Path) -> Result<(), DumpError> {
        let bytes = bincode::serialize(self)?;
        fs::write(path, bytes)?;
        log::info!("wrote frame dump for step {} to {}", self.step, path.display());
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self, DumpError> {
        let bytes = fs::read(path)?;
        let dump: FrameDump = bincode::deserialize(&bytes)?;
        if dump.magic != MAGIC {
            return Err(DumpError::BadMagic);
        }
        if dump.version != VERSION {
            return Err(DumpError::Version(dump.version));
        }
        let expected = dump.width as usize * dump.height as usize * 4;
        if dump.rgba.len() != expected {
            return Err(DumpError::Size {
                width: dump.width,
                height: dump.height,
                len: dump.rgba.len(),
            });
        }
        Ok(dump)
    }

    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let i = (y as usize * self.width as usize + x as usize) * 4;
        let px = self.rgba.get(i..i + 4)?;
        Some([px[0], px[1], px[2], px[3]])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::GameMode;
    use tempfile::tempdir;

    fn snapshot() -> EngineSnapshot {
        EngineSnapshot {
            mode: GameMode::Level,
            menu_active: false,
            alive: true,
            tic: 42,
        }
    }

    #[test]
    fn saved_dump_loads_back() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("frame.bin");
        let frame = Frame::blank();
        let dump = FrameDump::capture(&frame, 7, snapshot());
        dump.save(&path).unwrap();

        let loaded = FrameDump::load(&path).unwrap();
        assert_eq!(loaded, dump);
        assert_eq!((loaded.width, loaded.height), (320, 200));
        assert_eq!(loaded.pixel(319, 199), Some([0, 0, 0, 255]));
        assert_eq!(loaded.pixel(320, 0), None);
    }

    #[test]
    fn rejects_foreign_files() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("junk.bin");
        let mut dump = FrameDump::capture(&Frame::blank(), 1, snapshot());
        dump.magic = *b"NOPE";
        dump.save(&path).unwrap();
        assert!(matches!(FrameDump::load(&path), Err(DumpError::BadMagic)));

        let mut dump = FrameDump::capture(&Frame::blank(), 1, snapshot());
        dump.rgba.truncate(10);
        dump.save(&path).unwrap();
        assert!(matches!(FrameDump::load(&path), Err(DumpError::Size { len: 10, .. })));

        fs::write(&path, b"xy").unwrap();
        assert!(matches!(FrameDump::load(&path), Err(DumpError::Codec(_))));
    }
}
