/// Append-only byte arena in a single memory-mapped file.
///
/// Offset 0 carries a fixed superblock; everything else is reached through
/// byte offsets stored inside records, never pointers. Allocation is
/// bump-only and growth remaps the file without moving existing bytes, so
/// offsets handed out earlier stay valid for the life of the arena.
use crate::error::{HalError, Result};
use byteorder::{ByteOrder, LittleEndian};
use log::{debug, info};
use memmap2::{Mmap, MmapMut};
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

pub const MMAP_MAGIC: [u8; 8] = *b"HALMMAP\0";
pub const MMAP_VERSION: u32 = 1;

/// magic + version + root offset + watermark, padded to an 8-byte boundary.
pub const SUPERBLOCK_LEN: u64 = 32;

const OFFSET_VERSION: usize = 8;
const OFFSET_ROOT: usize = 12;
const OFFSET_WATERMARK: usize = 20;

#[derive(Debug, Clone, Copy)]
pub struct ArenaConfig {
    /// Initial file size on create.
    pub init_size: u64,
    /// Hard ceiling for growth; `None` is unbounded.
    pub max_size: Option<u64>,
}

impl Default for ArenaConfig {
    fn default() -> Self {
        ArenaConfig {
            init_size: 1 << 20,
            max_size: None,
        }
    }
}

enum MapKind {
    ReadOnly(Mmap),
    ReadWrite(MmapMut),
}

pub struct Arena {
    file: File,
    path: PathBuf,
    map: MapKind,
    mapped_len: u64,
    watermark: u64,
    root_offset: u64,
    max_size: Option<u64>,
    dirty: bool,
}

impl Arena {
    pub fn create<P: AsRef<Path>>(path: P, config: &ArenaConfig) -> Result<Arena> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)?;
        let init = config.init_size.max(SUPERBLOCK_LEN);
        file.set_len(init)?;
        let mut map = unsafe { MmapMut::map_mut(&file)? };
        map[..8].copy_from_slice(&MMAP_MAGIC);
        LittleEndian::write_u32(&mut map[OFFSET_VERSION..OFFSET_VERSION + 4], MMAP_VERSION);
        LittleEndian::write_u64(&mut map[OFFSET_ROOT..OFFSET_ROOT + 8], 0);
        LittleEndian::write_u64(&mut map[OFFSET_WATERMARK..OFFSET_WATERMARK + 8], SUPERBLOCK_LEN);
        info!("created mmap arena {} ({init} bytes)", path.display());
        Ok(Arena {
            file,
            path,
            map: MapKind::ReadWrite(map),
            mapped_len: init,
            watermark: SUPERBLOCK_LEN,
            root_offset: 0,
            max_size: config.max_size,
            dirty: true,
        })
    }

    pub fn open<P: AsRef<Path>>(path: P, writable: bool, config: &ArenaConfig) -> Result<Arena> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new().read(true).write(writable).open(&path)?;
        let len = file.metadata()?.len();
        if len < SUPERBLOCK_LEN {
            return Err(HalError::BadFormat(format!(
                "{}: too short for an arena superblock",
                path.display()
            )));
        }
        let map = if writable {
            MapKind::ReadWrite(unsafe { MmapMut::map_mut(&file)? })
        } else {
            MapKind::ReadOnly(unsafe { Mmap::map(&file)? })
        };
        let arena = Arena {
            file,
            path,
            map,
            mapped_len: len,
            watermark: 0,
            root_offset: 0,
            max_size: config.max_size,
            dirty: false,
        };
        let bytes = arena.mapped();
        if bytes[..8] != MMAP_MAGIC {
            return Err(HalError::BadFormat(format!(
                "{}: bad arena magic",
                arena.path.display()
            )));
        }
        let version = LittleEndian::read_u32(&bytes[OFFSET_VERSION..OFFSET_VERSION + 4]);
        if version != MMAP_VERSION {
            return Err(HalError::BadFormat(format!(
                "{}: unsupported arena version {version}",
                arena.path.display()
            )));
        }
        let root_offset = LittleEndian::read_u64(&bytes[OFFSET_ROOT..OFFSET_ROOT + 8]);
        let watermark = LittleEndian::read_u64(&bytes[OFFSET_WATERMARK..OFFSET_WATERMARK + 8]);
        if watermark < SUPERBLOCK_LEN || watermark > len {
            return Err(HalError::BadFormat(format!(
                "{}: arena watermark {watermark} outside file of {len} bytes",
                arena.path.display()
            )));
        }
        let mut arena = arena;
        arena.root_offset = root_offset;
        arena.watermark = watermark;
        debug!(
            "opened arena {} (watermark {watermark}, root {root_offset}, writable={writable})",
            arena.path.display()
        );
        Ok(arena)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn writable(&self) -> bool {
        matches!(self.map, MapKind::ReadWrite(_))
    }

    pub fn root_offset(&self) -> u64 {
        self.root_offset
    }

    pub fn set_root_offset(&mut self, offset: u64) -> Result<()> {
        self.check_writable()?;
        self.root_offset = offset;
        self.dirty = true;
        Ok(())
    }

    pub fn watermark(&self) -> u64 {
        self.watermark
    }

    /// Bump-allocate `nbytes` (8-byte aligned) and return its offset.
    /// Grows the mapping geometrically when the watermark crosses it.
    pub fn allocate(&mut self, nbytes: u64) -> Result<u64> {
        self.check_writable()?;
        let offset = (self.watermark + 7) & !7;
        let new_mark = offset
            .checked_add(nbytes)
            .ok_or_else(|| HalError::OutOfSpace("allocation overflows the arena".into()))?;
        if new_mark > self.mapped_len {
            self.grow(new_mark)?;
        }
        self.watermark = new_mark;
        self.dirty = true;
        Ok(offset)
    }

    fn grow(&mut self, needed: u64) -> Result<()> {
        let mut new_len = self.mapped_len.max(SUPERBLOCK_LEN);
        while new_len < needed {
            new_len *= 2;
        }
        if let Some(max) = self.max_size {
            if new_len > max {
                if needed <= max {
                    new_len = max;
                } else {
                    return Err(HalError::OutOfSpace(format!(
                        "{}: arena would grow to {needed} bytes, past the {max} byte limit",
                        self.path.display()
                    )));
                }
            }
        }
        // A remap never truncates nor reorders, so offsets stay valid.
        self.flush_map()?;
        self.file.set_len(new_len)?;
        self.map = MapKind::ReadWrite(unsafe { MmapMut::map_mut(&self.file)? });
        debug!(
            "grew arena {} from {} to {new_len} bytes",
            self.path.display(),
            self.mapped_len
        );
        self.mapped_len = new_len;
        Ok(())
    }

    fn mapped(&self) -> &[u8] {
        match &self.map {
            MapKind::ReadOnly(m) => &m[..],
            MapKind::ReadWrite(m) => &m[..],
        }
    }

    /// Borrow `len` bytes at `offset`. Fails on ranges past the watermark,
    /// which can only come from a corrupt offset in a record.
    pub fn bytes(&self, offset: u64, len: u64) -> Result<&[u8]> {
        let end = offset
            .checked_add(len)
            .filter(|&e| e <= self.watermark)
            .ok_or_else(|| {
                HalError::CorruptAlignment(format!(
                    "offset range [{offset}, +{len}) outside arena of {} used bytes",
                    self.watermark
                ))
            })?;
        Ok(&self.mapped()[offset as usize..end as usize])
    }

    pub fn bytes_mut(&mut self, offset: u64, len: u64) -> Result<&mut [u8]> {
        self.check_writable()?;
        let end = offset
            .checked_add(len)
            .filter(|&e| e <= self.watermark)
            .ok_or_else(|| {
                HalError::CorruptAlignment(format!(
                    "offset range [{offset}, +{len}) outside arena of {} used bytes",
                    self.watermark
                ))
            })?;
        self.dirty = true;
        match &mut self.map {
            MapKind::ReadWrite(m) => Ok(&mut m[offset as usize..end as usize]),
            MapKind::ReadOnly(_) => unreachable!(),
        }
    }

    pub fn read_u64(&self, offset: u64) -> Result<u64> {
        Ok(LittleEndian::read_u64(self.bytes(offset, 8)?))
    }

    pub fn write_u64(&mut self, offset: u64, value: u64) -> Result<()> {
        LittleEndian::write_u64(self.bytes_mut(offset, 8)?, value);
        Ok(())
    }

    /// Persist the superblock fields and sync the mapping.
    pub fn flush(&mut self) -> Result<()> {
        if !self.dirty {
            return Ok(());
        }
        self.check_writable()?;
        let root = self.root_offset;
        let mark = self.watermark;
        if let MapKind::ReadWrite(m) = &mut self.map {
            LittleEndian::write_u64(&mut m[OFFSET_ROOT..OFFSET_ROOT + 8], root);
            LittleEndian::write_u64(&mut m[OFFSET_WATERMARK..OFFSET_WATERMARK + 8], mark);
        }
        self.flush_map()?;
        self.dirty = false;
        Ok(())
    }

    fn flush_map(&self) -> Result<()> {
        if let MapKind::ReadWrite(m) = &self.map {
            m.flush()?;
        }
        Ok(())
    }

    fn check_writable(&self) -> Result<()> {
        if !self.writable() {
            return Err(HalError::NotWritable(format!(
                "{} opened read-only",
                self.path.display()
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_offsets_survive_growth() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.hal");
        let config = ArenaConfig {
            init_size: 64,
            max_size: None,
        };
        let mut arena = Arena::create(&path, &config).unwrap();
        let first = arena.allocate(16).unwrap();
        arena.bytes_mut(first, 16).unwrap().copy_from_slice(b"0123456789abcdef");
        // force several remaps
        for _ in 0..8 {
            arena.allocate(100).unwrap();
        }
        assert_eq!(arena.bytes(first, 16).unwrap(), b"0123456789abcdef");
        arena.set_root_offset(first).unwrap();
        arena.flush().unwrap();
        drop(arena);

        let arena = Arena::open(&path, false, &ArenaConfig::default()).unwrap();
        assert_eq!(arena.root_offset(), first);
        assert_eq!(arena.bytes(first, 16).unwrap(), b"0123456789abcdef");
    }

    #[test]
    fn test_growth_limit() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.hal");
        let config = ArenaConfig {
            init_size: 64,
            max_size: Some(128),
        };
        let mut arena = Arena::create(&path, &config).unwrap();
        match arena.allocate(4096) {
            Err(HalError::OutOfSpace(_)) => {}
            other => panic!("expected OutOfSpace, got {other:?}"),
        }
    }

    #[test]
    fn test_read_only_refuses_writes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.hal");
        {
            let mut arena = Arena::create(&path, &ArenaConfig::default()).unwrap();
            arena.flush().unwrap();
        }
        let mut arena = Arena::open(&path, false, &ArenaConfig::default()).unwrap();
        assert!(matches!(arena.allocate(8), Err(HalError::NotWritable(_))));
    }
}
