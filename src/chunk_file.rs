/// Single-file hierarchical container for the chunked backend.
///
/// Layout: an HDF5-style signature, a fixed header pointing at the dataset
/// directory, then chunk blobs. Chunks and the directory are append-only;
/// `write()` flushes dirty chunks and rewrites the directory at the end of
/// the file. Space owned by unlinked datasets or superseded chunks is dead
/// until a future repack.
use crate::chunk_array::{ArrayIo, ChunkedArray, CreationProps};
use crate::error::{HalError, Result};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use indexmap::IndexMap;
use log::{debug, info};
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// The eight signature bytes of an HDF5 container.
pub const HDF5_SIGNATURE: [u8; 8] = [0x89, b'H', b'D', b'F', b'\r', b'\n', 0x1a, b'\n'];
pub const CHUNK_FILE_VERSION: u32 = 1;

const HEADER_LEN: u64 = 28; // signature + version + dir offset + dir len

pub struct ChunkFile {
    file: File,
    path: PathBuf,
    writable: bool,
    /// Append watermark; chunk write-backs land here.
    end: u64,
    datasets: IndexMap<String, ChunkedArray>,
    props: CreationProps,
    dirty: bool,
}

impl std::fmt::Debug for ChunkFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChunkFile")
            .field("path", &self.path)
            .field("writable", &self.writable)
            .field("dirty", &self.dirty)
            .finish_non_exhaustive()
    }
}

impl ChunkFile {
    pub fn create<P: AsRef<Path>>(path: P, props: CreationProps) -> Result<ChunkFile> {
        let path = path.as_ref().to_path_buf();
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)?;
        let mut header = Vec::with_capacity(HEADER_LEN as usize);
        header.extend_from_slice(&HDF5_SIGNATURE);
        header.write_u32::<LittleEndian>(CHUNK_FILE_VERSION).unwrap();
        header.write_u64::<LittleEndian>(0).unwrap(); // directory offset, set on write()
        header.write_u64::<LittleEndian>(0).unwrap();
        file.write_all(&header)?;
        info!("created chunked container {}", path.display());
        Ok(ChunkFile {
            file,
            path,
            writable: true,
            end: HEADER_LEN,
            datasets: IndexMap::new(),
            props,
            dirty: true,
        })
    }

    pub fn open<P: AsRef<Path>>(path: P, writable: bool, props: CreationProps) -> Result<ChunkFile> {
        let path = path.as_ref().to_path_buf();
        let mut file = OpenOptions::new().read(true).write(writable).open(&path)?;
        let mut header = [0u8; HEADER_LEN as usize];
        file.read_exact(&mut header).map_err(|_| {
            HalError::BadFormat(format!("{}: too short for a container header", path.display()))
        })?;
        if header[..8] != HDF5_SIGNATURE {
            return Err(HalError::BadFormat(format!(
                "{}: missing container signature",
                path.display()
            )));
        }
        let mut rest = &header[8..];
        let version = rest.read_u32::<LittleEndian>()?;
        if version != CHUNK_FILE_VERSION {
            return Err(HalError::BadFormat(format!(
                "{}: unsupported container version {version}",
                path.display()
            )));
        }
        let dir_offset = rest.read_u64::<LittleEndian>()?;
        let dir_len = rest.read_u64::<LittleEndian>()?;
        if dir_offset == 0 {
            return Err(HalError::BadFormat(format!(
                "{}: no dataset directory (file was never flushed)",
                path.display()
            )));
        }
        let mut dir = vec![0u8; dir_len as usize];
        file.seek(SeekFrom::Start(dir_offset))?;
        file.read_exact(&mut dir)?;
        let datasets = Self::decode_directory(&dir, &props)?;
        debug!(
            "opened {} with {} datasets (writable={writable})",
            path.display(),
            datasets.len()
        );
        Ok(ChunkFile {
            file,
            path,
            writable,
            // New appends reuse the space of the directory being replaced.
            end: dir_offset,
            datasets,
            props,
            dirty: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn writable(&self) -> bool {
        self.writable
    }

    pub fn props(&self) -> &CreationProps {
        &self.props
    }

    pub fn has_dataset(&self, name: &str) -> bool {
        self.datasets.contains_key(name)
    }

    pub fn dataset_names(&self) -> impl Iterator<Item = &str> {
        self.datasets.keys().map(|s| s.as_str())
    }

    /// Reserve a new dataset of `num_elems` elements of `elem_size` bytes.
    pub fn create_dataset(
        &mut self,
        name: &str,
        elem_size: u32,
        num_elems: u64,
        props: &CreationProps,
    ) -> Result<()> {
        self.check_writable()?;
        if self.datasets.contains_key(name) {
            return Err(HalError::PreconditionViolated(format!(
                "dataset {name} already exists"
            )));
        }
        let array = ChunkedArray::new(elem_size, num_elems, props)?;
        self.datasets.insert(name.to_string(), array);
        self.dirty = true;
        Ok(())
    }

    /// Unlink a dataset. Its chunks become dead space in the file.
    pub fn remove_dataset(&mut self, name: &str) -> Result<()> {
        self.check_writable()?;
        if self.datasets.shift_remove(name).is_none() {
            return Err(HalError::NotFound(format!("dataset {name}")));
        }
        self.dirty = true;
        Ok(())
    }

    /// Re-key every dataset under `/old/...` to `/new/...`.
    pub fn rename_prefix(&mut self, old: &str, new: &str) -> Result<()> {
        self.check_writable()?;
        let keys: Vec<String> = self
            .datasets
            .keys()
            .filter(|k| k.starts_with(old))
            .cloned()
            .collect();
        for key in keys {
            let array = self.datasets.shift_remove(&key).unwrap();
            let renamed = format!("{new}{}", &key[old.len()..]);
            self.datasets.insert(renamed, array);
        }
        self.dirty = true;
        Ok(())
    }

    pub fn dataset_len(&self, name: &str) -> Result<u64> {
        Ok(self.dataset(name)?.size())
    }

    pub fn dataset_elem_size(&self, name: &str) -> Result<u32> {
        Ok(self.dataset(name)?.elem_size())
    }

    pub fn read_element(&mut self, name: &str, i: u64, out: &mut [u8]) -> Result<()> {
        let (array, mut io) = self.dataset_io(name)?;
        array.get(&mut io, i, out)
    }

    pub fn write_element(&mut self, name: &str, i: u64, data: &[u8]) -> Result<()> {
        let (array, mut io) = self.dataset_io(name)?;
        array.set(&mut io, i, data)?;
        self.dirty = true;
        Ok(())
    }

    pub fn read_range(&mut self, name: &str, start: u64, count: u64, out: &mut Vec<u8>) -> Result<()> {
        let (array, mut io) = self.dataset_io(name)?;
        array.get_range(&mut io, start, count, out)
    }

    pub fn write_range(&mut self, name: &str, start: u64, data: &[u8]) -> Result<()> {
        let (array, mut io) = self.dataset_io(name)?;
        array.set_range(&mut io, start, data)?;
        self.dirty = true;
        Ok(())
    }

    /// Flush all dirty chunks in index order, then rewrite the dataset
    /// directory and header. Idempotent.
    pub fn write(&mut self) -> Result<()> {
        if !self.dirty {
            return Ok(());
        }
        self.check_writable()?;
        for idx in 0..self.datasets.len() {
            let (_, array) = self.datasets.get_index_mut(idx).unwrap();
            let mut io = ArrayIo {
                file: &mut self.file,
                end: &mut self.end,
                writable: self.writable,
            };
            array.write(&mut io)?;
        }
        let mut dir = Vec::new();
        dir.write_u32::<LittleEndian>(self.datasets.len() as u32).unwrap();
        for (name, array) in &self.datasets {
            dir.write_u16::<LittleEndian>(name.len() as u16).unwrap();
            dir.extend_from_slice(name.as_bytes());
            array.encode_directory_entry(&mut dir);
        }
        let dir_offset = self.end;
        self.file.seek(SeekFrom::Start(dir_offset))?;
        self.file.write_all(&dir)?;
        self.file.set_len(dir_offset + dir.len() as u64)?;
        self.file.seek(SeekFrom::Start(12))?;
        let mut ptr = Vec::with_capacity(16);
        ptr.write_u64::<LittleEndian>(dir_offset).unwrap();
        ptr.write_u64::<LittleEndian>(dir.len() as u64).unwrap();
        self.file.write_all(&ptr)?;
        self.file.sync_data()?;
        self.dirty = false;
        debug!(
            "flushed {} ({} datasets, directory at {dir_offset})",
            self.path.display(),
            self.datasets.len()
        );
        Ok(())
    }

    fn dataset(&self, name: &str) -> Result<&ChunkedArray> {
        self.datasets
            .get(name)
            .ok_or_else(|| HalError::NotFound(format!("dataset {name}")))
    }

    fn dataset_io(&mut self, name: &str) -> Result<(&mut ChunkedArray, ArrayIo<'_>)> {
        let io = ArrayIo {
            file: &mut self.file,
            end: &mut self.end,
            writable: self.writable,
        };
        let array = self
            .datasets
            .get_mut(name)
            .ok_or_else(|| HalError::NotFound(format!("dataset {name}")))?;
        Ok((array, io))
    }

    fn check_writable(&self) -> Result<()> {
        if !self.writable {
            return Err(HalError::NotWritable(format!(
                "{} opened read-only",
                self.path.display()
            )));
        }
        Ok(())
    }

    fn decode_directory(
        mut buf: &[u8],
        props: &CreationProps,
    ) -> Result<IndexMap<String, ChunkedArray>> {
        let count = buf.read_u32::<LittleEndian>()?;
        let mut datasets = IndexMap::with_capacity(count as usize);
        for _ in 0..count {
            let name_len = buf.read_u16::<LittleEndian>()? as usize;
            if buf.len() < name_len {
                return Err(HalError::BadFormat("truncated dataset directory".into()));
            }
            let name = std::str::from_utf8(&buf[..name_len])
                .map_err(|_| HalError::BadFormat("dataset name is not UTF-8".into()))?
                .to_string();
            buf = &buf[name_len..];
            let array = ChunkedArray::decode_directory_entry(&mut buf, props)?;
            datasets.insert(name, array);
        }
        Ok(datasets)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_flush_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.hal");
        let props = CreationProps {
            chunk_elems: 4,
            ..Default::default()
        };
        {
            let mut cf = ChunkFile::create(&path, props).unwrap();
            cf.create_dataset("/g/DNA_ARRAY", 1, 10, &props).unwrap();
            cf.write_range("/g/DNA_ARRAY", 0, b"ACGTACGTAC").unwrap();
            cf.write().unwrap();
        }
        let mut cf = ChunkFile::open(&path, false, props).unwrap();
        assert_eq!(cf.dataset_len("/g/DNA_ARRAY").unwrap(), 10);
        let mut out = Vec::new();
        cf.read_range("/g/DNA_ARRAY", 2, 4, &mut out).unwrap();
        assert_eq!(&out, b"GTAC");
        // writes through a read-only open are refused
        assert!(matches!(
            cf.write_element("/g/DNA_ARRAY", 0, b"T"),
            Err(HalError::NotWritable(_))
        ));
    }

    #[test]
    fn test_unflushed_file_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.hal");
        {
            ChunkFile::create(&path, CreationProps::default()).unwrap();
        }
        match ChunkFile::open(&path, false, CreationProps::default()) {
            Err(HalError::BadFormat(_)) => {}
            other => panic!("expected BadFormat, got {other:?}"),
        }
    }
}
