/// The alignment façade: one handle over both storage backends, with
/// format autodetection on open and the genome tree kept at this level.
use crate::arena::ArenaConfig;
use crate::blob::{peek_initial_bytes, peek_initial_bytes_from, BlobReader};
use crate::chunk_array::CreationProps;
use crate::chunk_file::HDF5_SIGNATURE;
use crate::chunked_store::ChunkedStore;
use crate::error::{HalError, Result};
use crate::genome::{Genome, GenomeState};
use crate::metadata::MetaData;
use crate::mmap_store::MmapStore;
use crate::store::Store;
use crate::tree::GenomeTree;
use log::{debug, warn};
use std::cell::RefCell;
use std::path::PathBuf;
use std::rc::Rc;

pub const MMAP_MAGIC: [u8; 8] = crate::arena::MMAP_MAGIC;

/// Storage backend of an alignment file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    /// Chunked, compressed container (backend A).
    Hdf5Like,
    /// Memory-mapped arena (backend B).
    Mmap,
}

impl Format {
    pub fn as_str(&self) -> &'static str {
        match self {
            Format::Hdf5Like => "hdf5-like",
            Format::Mmap => "mmap",
        }
    }

    pub fn parse(s: &str) -> Result<Format> {
        match s {
            "hdf5-like" => Ok(Format::Hdf5Like),
            "mmap" => Ok(Format::Mmap),
            other => Err(HalError::BadFormat(format!(
                "invalid format {other:?}, expected one of \"hdf5-like\" or \"mmap\""
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    ReadOnly,
    ReadWrite,
    Create,
}

/// Shared open options for both backends. One immutable defaults table;
/// callers override by value.
#[derive(Debug, Clone, Copy, Default)]
pub struct OpenOptions {
    pub format: Option<Format>,
    pub chunk: CreationProps,
    pub arena: ArenaConfig,
}

/// Detect the backend of an existing file from its first bytes.
pub fn detect_format(path: &str) -> Result<Format> {
    detect_format_bytes(&peek_initial_bytes(path)?).ok_or_else(|| {
        HalError::BadFormat(format!("unable to determine storage format of {path}"))
    })
}

/// Same detection through a caller-supplied blob reader (URL alignments).
pub fn detect_format_from(blob: &dyn BlobReader) -> Result<Option<Format>> {
    Ok(detect_format_bytes(&peek_initial_bytes_from(blob)?))
}

fn detect_format_bytes(initial: &[u8]) -> Option<Format> {
    if initial.len() >= 8 && initial[..8] == MMAP_MAGIC {
        Some(Format::Mmap)
    } else if initial.len() >= 8 && initial[..8] == HDF5_SIGNATURE {
        Some(Format::Hdf5Like)
    } else {
        None
    }
}

/// Open or create an alignment. An explicit override wins; reads
/// autodetect from the first bytes; creates use the option's format,
/// defaulting to the chunked backend.
pub fn open_alignment(
    path: &str,
    options: &OpenOptions,
    mode: AccessMode,
    override_format: Option<Format>,
) -> Result<Alignment> {
    let format = match override_format {
        Some(f) => f,
        None => {
            if mode == AccessMode::Create {
                options.format.unwrap_or(Format::Hdf5Like)
            } else {
                detect_format(path)?
            }
        }
    };
    let writable = mode != AccessMode::ReadOnly;
    let store = match (format, mode) {
        (Format::Hdf5Like, AccessMode::Create) => {
            Store::Chunked(ChunkedStore::create(path, options.chunk)?)
        }
        (Format::Hdf5Like, _) => Store::Chunked(ChunkedStore::open(path, writable, options.chunk)?),
        (Format::Mmap, AccessMode::Create) => Store::Mmap(MmapStore::create(path, &options.arena)?),
        (Format::Mmap, _) => Store::Mmap(MmapStore::open(path, writable, &options.arena)?),
    };
    Alignment::from_store(store, path, mode == AccessMode::Create)
}

pub(crate) struct AlignmentData {
    pub store: Store,
    pub tree: GenomeTree,
    pub meta: MetaData,
    pub genomes: Vec<Option<GenomeState>>,
    pub path: PathBuf,
    pub tree_dirty: bool,
}

/// A hierarchical alignment: the genome tree plus the backend that holds
/// each genome's arrays. Cloning is cheap and shares the handle.
#[derive(Clone)]
pub struct Alignment {
    pub(crate) data: Rc<RefCell<AlignmentData>>,
}

impl std::fmt::Debug for Alignment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.data.try_borrow() {
            Ok(data) => f
                .debug_struct("Alignment")
                .field("path", &data.path)
                .finish(),
            Err(_) => f.debug_struct("Alignment").finish_non_exhaustive(),
        }
    }
}

impl Alignment {
    /// Create a new alignment file.
    pub fn create(path: &str, options: &OpenOptions) -> Result<Alignment> {
        open_alignment(path, options, AccessMode::Create, None)
    }

    /// Open an existing alignment read-only, autodetecting the backend.
    pub fn open(path: &str) -> Result<Alignment> {
        open_alignment(path, &OpenOptions::default(), AccessMode::ReadOnly, None)
    }

    /// Open an existing alignment for update, autodetecting the backend.
    pub fn open_rw(path: &str) -> Result<Alignment> {
        open_alignment(path, &OpenOptions::default(), AccessMode::ReadWrite, None)
    }

    fn from_store(mut store: Store, path: &str, creating: bool) -> Result<Alignment> {
        let (tree, meta) = if creating {
            (GenomeTree::new(), MetaData::new())
        } else {
            let tree = match store.read_tree()? {
                Some(bytes) => GenomeTree::decode(&bytes)?,
                None => GenomeTree::new(),
            };
            (tree, store.read_root_meta()?)
        };
        let genomes = (0..tree.len()).map(|_| None).collect();
        debug!("opened alignment {path} with {} genomes", tree.len());
        Ok(Alignment {
            data: Rc::new(RefCell::new(AlignmentData {
                store,
                tree,
                meta,
                genomes,
                path: PathBuf::from(path),
                tree_dirty: creating,
            })),
        })
    }

    pub fn path(&self) -> PathBuf {
        self.data.borrow().path.clone()
    }

    pub fn format(&self) -> Format {
        match self.data.borrow().store {
            Store::Chunked(_) => Format::Hdf5Like,
            Store::Mmap(_) => Format::Mmap,
        }
    }

    pub fn num_genomes(&self) -> usize {
        self.data.borrow().tree.len()
    }

    pub fn root_name(&self) -> Option<String> {
        let data = self.data.borrow();
        data.tree.root().map(|id| data.tree.node(id).name.clone())
    }

    pub fn genome_names(&self) -> Vec<String> {
        let data = self.data.borrow();
        (0..data.tree.len())
            .map(|id| data.tree.node(id).name.clone())
            .collect()
    }

    pub fn child_names(&self, name: &str) -> Result<Vec<String>> {
        self.data.borrow().tree.child_names(name)
    }

    pub fn parent_name(&self, name: &str) -> Result<Option<String>> {
        self.data.borrow().tree.parent_name(name)
    }

    pub fn branch_length(&self, name: &str) -> Result<f64> {
        let data = self.data.borrow();
        let id = data
            .tree
            .id_by_name(name)
            .ok_or_else(|| HalError::NotFound(format!("genome {name}")))?;
        Ok(data.tree.node(id).branch_length)
    }

    /// Newick rendering of the genome tree.
    pub fn tree_string(&self) -> String {
        self.data.borrow().tree.newick()
    }

    pub fn add_root_genome(&self, name: &str) -> Result<Genome> {
        let mut data = self.data.borrow_mut();
        data.check_writable()?;
        let id = data.tree.add_root(name)?;
        data.genomes.push(None);
        data.tree_dirty = true;
        drop(data);
        Ok(Genome::new(self.data.clone(), id))
    }

    pub fn add_leaf_genome(&self, name: &str, parent: &str, branch_length: f64) -> Result<Genome> {
        let mut data = self.data.borrow_mut();
        data.check_writable()?;
        let id = data.tree.add_leaf(name, parent, branch_length)?;
        data.genomes.push(None);
        data.tree_dirty = true;
        drop(data);
        Ok(Genome::new(self.data.clone(), id))
    }

    pub fn open_genome(&self, name: &str) -> Result<Genome> {
        let data = self.data.borrow();
        let id = data
            .tree
            .id_by_name(name)
            .ok_or_else(|| HalError::NotFound(format!("genome {name}")))?;
        drop(data);
        Ok(Genome::new(self.data.clone(), id))
    }

    pub fn meta_set(&self, key: &str, value: &str) -> Result<()> {
        let mut data = self.data.borrow_mut();
        data.check_writable()?;
        data.meta.set(key, value);
        Ok(())
    }

    pub fn meta_get(&self, key: &str) -> Option<String> {
        self.data.borrow().meta.get(key).map(|v| v.to_string())
    }

    /// Flush everything dirty: tree, metadata, genome state, chunk caches.
    /// Idempotent; called again from drop.
    pub fn write(&self) -> Result<()> {
        let mut data = self.data.borrow_mut();
        if !data.store.writable() {
            return Ok(());
        }
        if data.tree_dirty {
            let bytes = data.tree.encode();
            data.store.write_tree(&bytes)?;
            data.tree_dirty = false;
        }
        if data.meta.is_dirty() {
            let meta = data.meta.clone();
            data.store.write_root_meta(&meta)?;
            data.meta.mark_clean();
        }
        for id in 0..data.genomes.len() {
            let dirty_meta = match &data.genomes[id] {
                Some(state) if state.meta.is_dirty() => Some(state.meta.clone()),
                _ => None,
            };
            if let Some(meta) = dirty_meta {
                let name = data.tree.node(id).name.clone();
                // a genome whose dimensions were never set has no store
                // record to hang metadata on yet
                if data.store.genome_exists(&name) {
                    data.store.write_genome_meta(&name, &meta)?;
                    data.genomes[id].as_mut().unwrap().meta.mark_clean();
                }
            }
        }
        data.store.flush()
    }
}

impl Drop for Alignment {
    fn drop(&mut self) {
        // write() is idempotent, so every handle drop may flush; a clean
        // handle is a no-op.
        if let Err(err) = self.write() {
            warn!("flush on close failed: {err}");
        }
    }
}

impl AlignmentData {
    pub fn check_writable(&self) -> Result<()> {
        if !self.store.writable() {
            return Err(HalError::NotWritable(format!(
                "{} opened read-only",
                self.path.display()
            )));
        }
        Ok(())
    }

    pub fn genome_name(&self, id: usize) -> String {
        self.tree.node(id).name.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_parse() {
        assert_eq!(Format::parse("hdf5-like").unwrap(), Format::Hdf5Like);
        assert_eq!(Format::parse("mmap").unwrap(), Format::Mmap);
        assert!(matches!(Format::parse("hal"), Err(HalError::BadFormat(_))));
    }

    #[test]
    fn test_detect_format_bytes() {
        assert_eq!(detect_format_bytes(b"HALMMAP\0rest"), Some(Format::Mmap));
        let mut hdf = HDF5_SIGNATURE.to_vec();
        hdf.extend_from_slice(b"tail");
        assert_eq!(detect_format_bytes(&hdf), Some(Format::Hdf5Like));
        assert_eq!(detect_format_bytes(b"PAF\tnope"), None);
        assert_eq!(detect_format_bytes(b""), None);
    }
}
