/// Byte-range readers over alignment files.
///
/// The format detector and the LOD manager only need "read N bytes at an
/// offset"; this trait abstracts over a local file, an in-memory region,
/// and (for callers that bring one) a cached remote fetcher.
use crate::error::{HalError, Result};
use std::cell::RefCell;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

/// Number of bytes peeked to detect the storage format of a file.
pub const DETECT_INITIAL_BYTES: usize = 64;

pub trait BlobReader {
    fn len(&self) -> Result<u64>;

    /// Read up to `buf.len()` bytes starting at `offset`; returns the
    /// number of bytes actually read (short only at end of blob).
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize>;

    fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
}

/// A blob backed by a local file.
pub struct FileBlob {
    file: RefCell<File>,
    len: u64,
}

impl FileBlob {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<FileBlob> {
        let file = File::open(path.as_ref())?;
        let len = file.metadata()?.len();
        Ok(FileBlob {
            file: RefCell::new(file),
            len,
        })
    }
}

impl BlobReader for FileBlob {
    fn len(&self) -> Result<u64> {
        Ok(self.len)
    }

    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        let mut file = self.file.borrow_mut();
        file.seek(SeekFrom::Start(offset))?;
        let mut total = 0;
        while total < buf.len() {
            let n = file.read(&mut buf[total..])?;
            if n == 0 {
                break;
            }
            total += n;
        }
        Ok(total)
    }
}

/// A blob over bytes already in memory (a mapped region, test fixtures).
pub struct MemBlob {
    bytes: Vec<u8>,
}

impl MemBlob {
    pub fn new(bytes: Vec<u8>) -> MemBlob {
        MemBlob { bytes }
    }
}

impl BlobReader for MemBlob {
    fn len(&self) -> Result<u64> {
        Ok(self.bytes.len() as u64)
    }

    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        let start = (offset as usize).min(self.bytes.len());
        let n = buf.len().min(self.bytes.len() - start);
        buf[..n].copy_from_slice(&self.bytes[start..start + n]);
        Ok(n)
    }
}

/// True for paths naming a remote resource rather than a local file.
pub fn is_url(path: &str) -> bool {
    path.contains("://")
}

/// Peek the initial bytes of an alignment file for format detection.
/// URL paths require a caller-supplied blob reader; without one they fail.
pub fn peek_initial_bytes(path: &str) -> Result<Vec<u8>> {
    if is_url(path) {
        return Err(HalError::NotFound(format!(
            "no blob reader configured for URL {path}"
        )));
    }
    let blob = FileBlob::open(path)?;
    peek_initial_bytes_from(&blob)
}

pub fn peek_initial_bytes_from(blob: &dyn BlobReader) -> Result<Vec<u8>> {
    let mut buf = vec![0u8; DETECT_INITIAL_BYTES];
    let n = blob.read_at(0, &mut buf)?;
    buf.truncate(n);
    Ok(buf)
}
