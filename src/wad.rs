// Asset bundle (WAD) reader and writer.

use std::fs;
use std::path::Path;

use thiserror::Error;

const HEADER_LEN: usize = 12;
const DIR_ENTRY_LEN: usize = 16;
const NAME_LEN: usize = 8;

#[derive(Debug, Error)]
pub enum WadError {
    #[error("{0}")]
    Io(#[from] std::io::Error),
    #[error("file too short for a WAD header ({0} bytes)")]
    TooShort(usize),
    #[error("bad identification {0:?}, expected IWAD or PWAD")]
    BadMagic([u8; 4]),
    #[error("lump directory ({count} entries at {offset}) runs past end of file")]
    DirectoryOutOfBounds { count: i32, offset: i32 },
    #[error("lump {name} ({size} bytes at {offset}) runs past end of file")]
    LumpOutOfBounds { name: String, offset: i32, size: i32 },
    #[error("lump name {0:?} is longer than 8 characters")]
    NameTooLong(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WadKind {
    Iwad,
    Pwad,
}

#[derive(Debug, Clone)]
struct Lump {
    name: String,
    offset: usize,
    size: usize,
}

#[derive(Debug, Clone)]
pub struct Wad {
    kind: WadKind,
    data: Vec<u8>,
    lumps: Vec<Lump>,
}

impl Wad {
    pub fn open(path: &Path) -> Result<Self, WadError> {
        let data = fs::read(path)?;
        let wad = Self::parse(data)?;
        log::info!(
            "loaded {:?} {} ({} lumps, {} bytes)",
            wad.kind,
            path.display(),
            wad.lumps.len(),
            wad.data.len()
        );
        Ok(wad)
    }

    pub fn parse(data: Vec<u8>) -> Result<Self, WadError> {
        if data.len() < HEADER_LEN {
            return Err(WadError::TooShort(data.len()));
        }
        let magic = [data[0], data[1], data[2], data[3]];
        let kind = match &magic {
            b"IWAD" => WadKind::Iwad,
            b"PWAD" => WadKind::Pwad,
            _ => return Err(WadError::BadMagic(magic)),
        };
        let count = read_i32(&data, 4);
        let dir_offset = read_i32(&data, 8);

        let dir_end = usize::try_from(count)
            .ok()
            .zip(usize::try_from(dir_offset).ok())
            .and_then(|(n, off)| n.checked_mul(DIR_ENTRY_LEN)?.checked_add(off))
            .filter(|end| *end <= data.len())
            .ok_or(WadError::DirectoryOutOfBounds {
                count,
                offset: dir_offset,
            })?;
        let dir_start = dir_offset as usize;

        let mut lumps = Vec::with_capacity(count as usize);
        for entry in data[dir_start..dir_end].chunks_exact(DIR_ENTRY_LEN) {
            let offset = read_i32(entry, 0);
            let size = read_i32(entry, 4);
            let name = decode_name(&entry[8..16]);
            let extent = usize::try_from(offset)
                .ok()
                .zip(usize::try_from(size).ok())
                .filter(|(off, len)| off.checked_add(*len).is_some_and(|end| end <= data.len()));
            let Some((offset_u, size_u)) = extent else {
                return Err(WadError::LumpOutOfBounds { name, offset, size });
            };
            lumps.push(Lump {
                name,
                offset: offset_u,
                size: size_u,
            });
        }

        Ok(Wad { kind, data, lumps })
    }

    pub fn kind(&self) -> WadKind {
        self.kind
    }

    pub fn lump_count(&self) -> usize {
        self.lumps.len()
    }

    pub fn byte_len(&self) -> usize {
        self.data.len()
    }

    /// Index of the last lump named `name` (later lumps override earlier ones).
    pub fn num_for_name(&self, name: &str) -> Option<usize> {
        self.lumps
            .iter()
            .rposition(|l| l.name.eq_ignore_ascii_case(name))
    }

    pub fn lump(&self, name: &str) -> Option<&[u8]> {
        self.num_for_name(name).map(|i| self.lump_at(i))
    }

    pub fn lump_at(&self, index: usize) -> &[u8] {
        let l = &self.lumps[index];
        &self.data[l.offset..l.offset + l.size]
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.lumps.iter().map(|l| l.name.as_str())
    }
}

/// Builds a WAD in memory.
#[derive(Debug, Default)]
pub struct WadWriter {
    lumps: Vec<(String, Vec<u8>)>,
}

impl WadWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lump(mut self, name: &str, data: impl Into<Vec<u8>>) -> Result<Self, WadError> {
        if name.len() > NAME_LEN {
            return Err(WadError::NameTooLong(name.to_string()));
        }
        self.lumps.push((name.to_ascii_uppercase(), data.into()));
        Ok(self)
    }

    pub fn to_bytes(&self, kind: WadKind) -> Vec<u8> {
        let body: usize = self.lumps.iter().map(|(_, d)| d.len()).sum();
        let dir_offset = HEADER_LEN + body;
        let mut out = Vec::with_capacity(dir_offset + self.lumps.len() * DIR_ENTRY_LEN);

        out.extend_from_slice(match kind {
            WadKind::Iwad => b"IWAD",
            WadKind::Pwad => b"PWAD",
        });
        out.extend_from_slice(&(self.lumps.len() as i32).to_le_bytes());
        out.extend_from_slice(&(dir_offset as i32).to_le_bytes());

        let mut offsets = Vec::with_capacity(self.lumps.len());
        for (_, data) in &self.lumps {
            offsets.push(out.len());
            out.extend_from_slice(data);
        }
        for ((name, data), offset) in self.lumps.iter().zip(offsets) {
            out.extend_from_slice(&(offset as i32).to_le_bytes());
            out.extend_from_slice(&(data.len() as i32).to_le_bytes());
            let mut raw = [0u8; NAME_LEN];
            raw[..name.len()].copy_from_slice(name.as_bytes());
            out.extend_from_slice(&raw);
        }
        out
    }

    pub fn write(&self, path: &Path, kind: WadKind) -> Result<(), WadError> {
        fs::write(path, self.to_bytes(kind))?;
        Ok(())
    }
}

fn read_i32(buf: &[u8], at: usize) -> i32 {
    i32::from_le_bytes([buf[at], buf[at + 1], buf[at + 2], buf[at + 3]])
}

fn decode_name(raw: &[u8]) -> String {
    let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
    raw[..end].iter().map(|&b| b as char).collect()
}
