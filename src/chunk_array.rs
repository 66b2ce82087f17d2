/// Fixed-stride typed array persisted as independently compressed chunks.
///
/// Each dataset is divided into equal-sized chunks; a chunk is inflated on
/// first touch and kept in a bounded write-back cache. Eviction is a
/// weighted LRU: chunks that keep getting re-read earn a weight bonus and
/// survive longer, mirroring the HDF5 `w0` cache knob.
use crate::error::{HalError, Result};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use log::{debug, trace};
use std::collections::HashMap;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};

pub const DEFAULT_CHUNK_ELEMS: u64 = 1000;
pub const DEFAULT_DEFLATE_LEVEL: u32 = 2;
pub const DEFAULT_CACHE_CHUNKS: usize = 16;
pub const DEFAULT_CACHE_W0: f64 = 0.75;

/// Per-dataset creation properties. The defaults are part of the public
/// surface of the chunked backend.
#[derive(Debug, Clone, Copy)]
pub struct CreationProps {
    pub chunk_elems: u64,
    pub deflate_level: u32,
    pub cache_chunks: usize,
    pub cache_w0: f64,
}

impl Default for CreationProps {
    fn default() -> Self {
        CreationProps {
            chunk_elems: DEFAULT_CHUNK_ELEMS,
            deflate_level: DEFAULT_DEFLATE_LEVEL,
            cache_chunks: DEFAULT_CACHE_CHUNKS,
            cache_w0: DEFAULT_CACHE_W0,
        }
    }
}

/// Where a chunk lives in the container file. `offset == 0` means the chunk
/// has never been written and reads as zeroes.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ChunkLoc {
    pub offset: u64,
    pub stored_len: u64,
}

struct CachedChunk {
    data: Vec<u8>,
    dirty: bool,
    last_use: u64,
    hits: u64,
}

struct ChunkCache {
    max_chunks: usize,
    w0: f64,
    tick: u64,
    map: HashMap<u64, CachedChunk>,
}

/// Borrowed handles into the owning container: the backing file plus its
/// append watermark. Evicted dirty chunks are appended at the watermark.
pub(crate) struct ArrayIo<'a> {
    pub file: &'a mut File,
    pub end: &'a mut u64,
    pub writable: bool,
}

pub struct ChunkedArray {
    pub(crate) elem_size: u32,
    pub(crate) num_elems: u64,
    pub(crate) chunk_elems: u64,
    pub(crate) deflate_level: u32,
    pub(crate) chunks: Vec<ChunkLoc>,
    cache: ChunkCache,
}

impl ChunkedArray {
    pub(crate) fn new(elem_size: u32, num_elems: u64, props: &CreationProps) -> Result<ChunkedArray> {
        if elem_size == 0 {
            return Err(HalError::PreconditionViolated(
                "dataset element size must be positive".into(),
            ));
        }
        // Chunk size 0 means a single chunk spanning the whole dataset.
        let chunk_elems = if props.chunk_elems == 0 {
            num_elems.max(1)
        } else {
            props.chunk_elems
        };
        if props.deflate_level > 9 {
            return Err(HalError::PreconditionViolated(format!(
                "deflate level {} outside 0-9",
                props.deflate_level
            )));
        }
        let num_chunks = num_elems.div_ceil(chunk_elems);
        Ok(ChunkedArray {
            elem_size,
            num_elems,
            chunk_elems,
            deflate_level: props.deflate_level,
            chunks: vec![
                ChunkLoc {
                    offset: 0,
                    stored_len: 0
                };
                num_chunks as usize
            ],
            cache: ChunkCache {
                max_chunks: props.cache_chunks.max(1),
                w0: props.cache_w0.clamp(0.0, 1.0),
                tick: 0,
                map: HashMap::new(),
            },
        })
    }

    pub fn size(&self) -> u64 {
        self.num_elems
    }

    pub fn elem_size(&self) -> u32 {
        self.elem_size
    }

    fn chunk_byte_len(&self, idx: u64) -> usize {
        let first = idx * self.chunk_elems;
        let elems = self.chunk_elems.min(self.num_elems - first);
        (elems * self.elem_size as u64) as usize
    }

    fn check_index(&self, i: u64, what: &str) -> Result<()> {
        if i >= self.num_elems {
            return Err(HalError::out_of_range(what, i as i64, self.num_elems));
        }
        Ok(())
    }

    /// Copy element `i` into `out` (must be exactly one element long).
    pub(crate) fn get(&mut self, io: &mut ArrayIo<'_>, i: u64, out: &mut [u8]) -> Result<()> {
        self.check_index(i, "chunked array get")?;
        debug_assert_eq!(out.len(), self.elem_size as usize);
        let chunk_idx = i / self.chunk_elems;
        let within = ((i % self.chunk_elems) * self.elem_size as u64) as usize;
        let chunk = self.touch_chunk(io, chunk_idx, false)?;
        out.copy_from_slice(&chunk.data[within..within + out.len()]);
        Ok(())
    }

    /// Overwrite element `i`, marking its chunk dirty.
    pub(crate) fn set(&mut self, io: &mut ArrayIo<'_>, i: u64, data: &[u8]) -> Result<()> {
        self.check_index(i, "chunked array set")?;
        if !io.writable {
            return Err(HalError::NotWritable("chunked array opened read-only".into()));
        }
        debug_assert_eq!(data.len(), self.elem_size as usize);
        let chunk_idx = i / self.chunk_elems;
        let within = ((i % self.chunk_elems) * self.elem_size as u64) as usize;
        let chunk = self.touch_chunk(io, chunk_idx, true)?;
        chunk.data[within..within + data.len()].copy_from_slice(data);
        Ok(())
    }

    /// Copy `count` consecutive elements starting at `start` into `out`.
    pub(crate) fn get_range(
        &mut self,
        io: &mut ArrayIo<'_>,
        start: u64,
        count: u64,
        out: &mut Vec<u8>,
    ) -> Result<()> {
        if count == 0 {
            return Ok(());
        }
        self.check_index(start, "chunked array range")?;
        self.check_index(start + count - 1, "chunked array range")?;
        out.reserve((count * self.elem_size as u64) as usize);
        let mut elem = start;
        while elem < start + count {
            let chunk_idx = elem / self.chunk_elems;
            let chunk_first = chunk_idx * self.chunk_elems;
            let take = (self.chunk_elems - (elem - chunk_first)).min(start + count - elem);
            let from = ((elem - chunk_first) * self.elem_size as u64) as usize;
            let to = from + (take * self.elem_size as u64) as usize;
            let chunk = self.touch_chunk(io, chunk_idx, false)?;
            out.extend_from_slice(&chunk.data[from..to]);
            elem += take;
        }
        Ok(())
    }

    /// Overwrite consecutive elements starting at `start` from `data`.
    pub(crate) fn set_range(&mut self, io: &mut ArrayIo<'_>, start: u64, data: &[u8]) -> Result<()> {
        if data.is_empty() {
            return Ok(());
        }
        if !io.writable {
            return Err(HalError::NotWritable("chunked array opened read-only".into()));
        }
        let count = data.len() as u64 / self.elem_size as u64;
        self.check_index(start, "chunked array range")?;
        self.check_index(start + count - 1, "chunked array range")?;
        let mut elem = start;
        let mut consumed = 0usize;
        while elem < start + count {
            let chunk_idx = elem / self.chunk_elems;
            let chunk_first = chunk_idx * self.chunk_elems;
            let take = (self.chunk_elems - (elem - chunk_first)).min(start + count - elem);
            let from = ((elem - chunk_first) * self.elem_size as u64) as usize;
            let nbytes = (take * self.elem_size as u64) as usize;
            let chunk = self.touch_chunk(io, chunk_idx, true)?;
            chunk.data[from..from + nbytes].copy_from_slice(&data[consumed..consumed + nbytes]);
            elem += take;
            consumed += nbytes;
        }
        Ok(())
    }

    /// Flush all dirty chunks in index order. Idempotent.
    pub(crate) fn write(&mut self, io: &mut ArrayIo<'_>) -> Result<()> {
        let mut dirty: Vec<u64> = self
            .cache
            .map
            .iter()
            .filter(|(_, c)| c.dirty)
            .map(|(&i, _)| i)
            .collect();
        dirty.sort_unstable();
        for idx in dirty {
            self.write_back(io, idx)?;
        }
        Ok(())
    }

    /// Bring a chunk into the cache and return it, evicting as needed.
    fn touch_chunk(
        &mut self,
        io: &mut ArrayIo<'_>,
        idx: u64,
        mark_dirty: bool,
    ) -> Result<&mut CachedChunk> {
        self.cache.tick += 1;
        let tick = self.cache.tick;
        if !self.cache.map.contains_key(&idx) {
            self.evict_to(io, self.cache.max_chunks - 1)?;
            let data = self.load_chunk(io, idx)?;
            self.cache.map.insert(
                idx,
                CachedChunk {
                    data,
                    dirty: false,
                    last_use: tick,
                    hits: 0,
                },
            );
        }
        let chunk = self.cache.map.get_mut(&idx).unwrap();
        chunk.last_use = tick;
        chunk.hits += 1;
        chunk.dirty |= mark_dirty;
        Ok(chunk)
    }

    /// Evict until at most `keep` chunks remain resident.
    fn evict_to(&mut self, io: &mut ArrayIo<'_>, keep: usize) -> Result<()> {
        while self.cache.map.len() > keep {
            let max = self.cache.max_chunks as f64;
            let victim = self
                .cache
                .map
                .iter()
                .map(|(&i, c)| (i, c.last_use as f64 + self.cache.w0 * c.hits as f64 * max))
                .min_by(|a, b| a.1.total_cmp(&b.1))
                .map(|(i, _)| i)
                .unwrap();
            if self.cache.map[&victim].dirty {
                self.write_back(io, victim)?;
            }
            trace!("evicting chunk {victim}");
            self.cache.map.remove(&victim);
        }
        Ok(())
    }

    fn load_chunk(&self, io: &mut ArrayIo<'_>, idx: u64) -> Result<Vec<u8>> {
        let raw_len = self.chunk_byte_len(idx);
        let loc = self.chunks[idx as usize];
        if loc.offset == 0 {
            return Ok(vec![0u8; raw_len]);
        }
        let mut stored = vec![0u8; loc.stored_len as usize];
        io.file.seek(SeekFrom::Start(loc.offset))?;
        io.file.read_exact(&mut stored)?;
        let data = if self.deflate_level == 0 {
            stored
        } else {
            let mut out = Vec::with_capacity(raw_len);
            ZlibDecoder::new(&stored[..]).read_to_end(&mut out)?;
            out
        };
        if data.len() != raw_len {
            return Err(HalError::CorruptAlignment(format!(
                "chunk {idx} inflated to {} bytes, expected {raw_len}",
                data.len()
            )));
        }
        Ok(data)
    }

    /// Append the chunk's current bytes at the container watermark and
    /// repoint its directory entry. The old bytes become dead space.
    fn write_back(&mut self, io: &mut ArrayIo<'_>, idx: u64) -> Result<()> {
        if !io.writable {
            return Err(HalError::NotWritable("chunked array opened read-only".into()));
        }
        let chunk = self.cache.map.get_mut(&idx).unwrap();
        let stored = if self.deflate_level == 0 {
            chunk.data.clone()
        } else {
            let mut enc = ZlibEncoder::new(Vec::new(), Compression::new(self.deflate_level));
            enc.write_all(&chunk.data)?;
            enc.finish()?
        };
        io.file.seek(SeekFrom::Start(*io.end))?;
        io.file.write_all(&stored)?;
        self.chunks[idx as usize] = ChunkLoc {
            offset: *io.end,
            stored_len: stored.len() as u64,
        };
        *io.end += stored.len() as u64;
        chunk.dirty = false;
        debug!(
            "wrote back chunk {idx} ({} -> {} bytes)",
            chunk.data.len(),
            stored.len()
        );
        Ok(())
    }

    pub(crate) fn encode_directory_entry(&self, out: &mut Vec<u8>) {
        out.write_u32::<LittleEndian>(self.elem_size).unwrap();
        out.write_u64::<LittleEndian>(self.num_elems).unwrap();
        out.write_u64::<LittleEndian>(self.chunk_elems).unwrap();
        out.write_u8(self.deflate_level as u8).unwrap();
        out.write_u32::<LittleEndian>(self.chunks.len() as u32).unwrap();
        for loc in &self.chunks {
            out.write_u64::<LittleEndian>(loc.offset).unwrap();
            out.write_u64::<LittleEndian>(loc.stored_len).unwrap();
        }
    }

    pub(crate) fn decode_directory_entry(
        buf: &mut &[u8],
        props: &CreationProps,
    ) -> Result<ChunkedArray> {
        let elem_size = buf.read_u32::<LittleEndian>()?;
        let num_elems = buf.read_u64::<LittleEndian>()?;
        let chunk_elems = buf.read_u64::<LittleEndian>()?;
        let deflate_level = buf.read_u8()? as u32;
        let num_chunks = buf.read_u32::<LittleEndian>()?;
        let mut chunks = Vec::with_capacity(num_chunks as usize);
        for _ in 0..num_chunks {
            let offset = buf.read_u64::<LittleEndian>()?;
            let stored_len = buf.read_u64::<LittleEndian>()?;
            chunks.push(ChunkLoc { offset, stored_len });
        }
        if chunk_elems == 0 || elem_size == 0 {
            return Err(HalError::BadFormat("corrupt dataset directory entry".into()));
        }
        if num_chunks as u64 != num_elems.div_ceil(chunk_elems) {
            return Err(HalError::BadFormat(format!(
                "dataset directory lists {num_chunks} chunks for {num_elems} elements"
            )));
        }
        Ok(ChunkedArray {
            elem_size,
            num_elems,
            chunk_elems,
            deflate_level,
            chunks,
            cache: ChunkCache {
                max_chunks: props.cache_chunks.max(1),
                w0: props.cache_w0.clamp(0.0, 1.0),
                tick: 0,
                map: HashMap::new(),
            },
        })
    }

    #[cfg(test)]
    pub(crate) fn cached_chunks(&self) -> usize {
        self.cache.map.len()
    }
}
