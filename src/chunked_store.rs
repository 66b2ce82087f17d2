/// Chunked-container backend: one dataset group per genome inside a
/// `ChunkFile`, with the tree and root metadata in root-level datasets.
use crate::chunk_array::CreationProps;
use crate::chunk_file::ChunkFile;
use crate::error::{HalError, Result};
use crate::metadata::MetaData;
use crate::segment::{BottomSegmentData, TopSegmentData, TOP_SEGMENT_LEN};
use crate::sequence::{decode_sequences, encode_sequences, SequenceRecord};
use crate::store::GenomeDims;
use crate::types::Size;
use std::path::Path;

pub const DNA_ARRAY_NAME: &str = "/DNA_ARRAY";
pub const TOP_ARRAY_NAME: &str = "/TOP_ARRAY";
pub const BOTTOM_ARRAY_NAME: &str = "/BOTTOM_ARRAY";
pub const SEQUENCE_ARRAY_NAME: &str = "/SEQUENCE_ARRAY";
pub const META_GROUP_NAME: &str = "/Meta";
const TREE_NAME: &str = "/TREE";

pub(crate) struct ChunkedStore {
    file: ChunkFile,
}

fn dataset(genome: &str, array: &str) -> String {
    format!("/{genome}{array}")
}

impl ChunkedStore {
    pub fn create<P: AsRef<Path>>(path: P, props: CreationProps) -> Result<ChunkedStore> {
        Ok(ChunkedStore {
            file: ChunkFile::create(path, props)?,
        })
    }

    pub fn open<P: AsRef<Path>>(path: P, writable: bool, props: CreationProps) -> Result<ChunkedStore> {
        Ok(ChunkedStore {
            file: ChunkFile::open(path, writable, props)?,
        })
    }

    pub fn writable(&self) -> bool {
        self.file.writable()
    }

    /// Replace a whole variable-length dataset (tree, metadata, sequences).
    fn write_blob(&mut self, name: &str, bytes: &[u8]) -> Result<()> {
        if self.file.has_dataset(name) {
            self.file.remove_dataset(name)?;
        }
        let props = *self.file.props();
        self.file.create_dataset(name, 1, bytes.len() as u64, &props)?;
        if !bytes.is_empty() {
            self.file.write_range(name, 0, bytes)?;
        }
        Ok(())
    }

    fn read_blob(&mut self, name: &str) -> Result<Option<Vec<u8>>> {
        if !self.file.has_dataset(name) {
            return Ok(None);
        }
        let len = self.file.dataset_len(name)?;
        let mut out = Vec::with_capacity(len as usize);
        self.file.read_range(name, 0, len, &mut out)?;
        Ok(Some(out))
    }

    pub fn write_tree(&mut self, bytes: &[u8]) -> Result<()> {
        self.write_blob(TREE_NAME, bytes)
    }

    pub fn read_tree(&mut self) -> Result<Option<Vec<u8>>> {
        self.read_blob(TREE_NAME)
    }

    pub fn write_root_meta(&mut self, meta: &MetaData) -> Result<()> {
        self.write_blob(META_GROUP_NAME, &meta.encode())
    }

    pub fn read_root_meta(&mut self) -> Result<MetaData> {
        match self.read_blob(META_GROUP_NAME)? {
            Some(bytes) => MetaData::decode(&bytes),
            None => Ok(MetaData::new()),
        }
    }

    /// Create (or recreate) the full array group of a genome.
    pub fn create_genome(
        &mut self,
        genome: &str,
        records: &[SequenceRecord],
        num_children: usize,
        store_dna: bool,
    ) -> Result<()> {
        let total: Size = records.iter().map(|r| r.length).sum();
        let num_top: Size = records.iter().map(|r| r.num_top).sum();
        let num_bottom: Size = records.iter().map(|r| r.num_bottom).sum();
        let props = *self.file.props();

        let dna = dataset(genome, DNA_ARRAY_NAME);
        if self.file.has_dataset(&dna) {
            self.file.remove_dataset(&dna)?;
        }
        if store_dna {
            self.file.create_dataset(&dna, 1, total, &props)?;
        }
        self.reset_top_array(genome, num_top)?;
        self.reset_bottom_array(genome, num_bottom, num_children)?;
        self.write_sequences(genome, records)?;
        if !self.file.has_dataset(&dataset(genome, META_GROUP_NAME)) {
            self.write_genome_meta(genome, &MetaData::new())?;
        }
        Ok(())
    }

    /// Drop and recreate the top-segment dataset.
    pub fn reset_top_array(&mut self, genome: &str, num_top: Size) -> Result<()> {
        let name = dataset(genome, TOP_ARRAY_NAME);
        if self.file.has_dataset(&name) {
            self.file.remove_dataset(&name)?;
        }
        let props = *self.file.props();
        self.file
            .create_dataset(&name, TOP_SEGMENT_LEN as u32, num_top, &props)
    }

    /// Drop and recreate the bottom-segment dataset; the stride embeds the
    /// child slot count.
    pub fn reset_bottom_array(&mut self, genome: &str, num_bottom: Size, num_children: usize) -> Result<()> {
        let name = dataset(genome, BOTTOM_ARRAY_NAME);
        if self.file.has_dataset(&name) {
            self.file.remove_dataset(&name)?;
        }
        let props = *self.file.props();
        self.file.create_dataset(
            &name,
            BottomSegmentData::record_len(num_children) as u32,
            num_bottom,
            &props,
        )
    }

    pub fn genome_exists(&self, genome: &str) -> bool {
        self.file.has_dataset(&dataset(genome, SEQUENCE_ARRAY_NAME))
    }

    pub fn genome_dims(&mut self, genome: &str) -> Result<GenomeDims> {
        let records = self.read_sequences(genome)?;
        let top = dataset(genome, TOP_ARRAY_NAME);
        let bottom = dataset(genome, BOTTOM_ARRAY_NAME);
        let stride = self.file.dataset_elem_size(&bottom)? as usize;
        Ok(GenomeDims {
            total_length: records.iter().map(|r| r.length).sum(),
            num_top: self.file.dataset_len(&top)?,
            num_bottom: self.file.dataset_len(&bottom)?,
            num_children: (stride - BottomSegmentData::record_len(0)) / 9,
            has_dna: self.file.has_dataset(&dataset(genome, DNA_ARRAY_NAME)),
        })
    }

    pub fn read_sequences(&mut self, genome: &str) -> Result<Vec<SequenceRecord>> {
        match self.read_blob(&dataset(genome, SEQUENCE_ARRAY_NAME))? {
            Some(bytes) => decode_sequences(&bytes),
            None => Err(HalError::NotFound(format!(
                "genome {genome} has no sequence table"
            ))),
        }
    }

    pub fn write_sequences(&mut self, genome: &str, records: &[SequenceRecord]) -> Result<()> {
        self.write_blob(&dataset(genome, SEQUENCE_ARRAY_NAME), &encode_sequences(records))
    }

    /// The chunked backend does not persist the name hash; it is rebuilt
    /// from the sequence table at load.
    pub fn read_name_hash(&mut self, _genome: &str) -> Result<Option<crate::sequence::SequenceNameHash>> {
        Ok(None)
    }

    pub fn read_genome_meta(&mut self, genome: &str) -> Result<MetaData> {
        match self.read_blob(&dataset(genome, META_GROUP_NAME))? {
            Some(bytes) => MetaData::decode(&bytes),
            None => Ok(MetaData::new()),
        }
    }

    pub fn write_genome_meta(&mut self, genome: &str, meta: &MetaData) -> Result<()> {
        self.write_blob(&dataset(genome, META_GROUP_NAME), &meta.encode())
    }

    pub fn top(&mut self, genome: &str, i: Size) -> Result<TopSegmentData> {
        let mut buf = [0u8; TOP_SEGMENT_LEN];
        self.file
            .read_element(&dataset(genome, TOP_ARRAY_NAME), i, &mut buf)?;
        Ok(TopSegmentData::decode(&buf))
    }

    pub fn set_top(&mut self, genome: &str, i: Size, seg: &TopSegmentData) -> Result<()> {
        let mut buf = [0u8; TOP_SEGMENT_LEN];
        seg.encode(&mut buf);
        self.file
            .write_element(&dataset(genome, TOP_ARRAY_NAME), i, &buf)
    }

    pub fn bottom(&mut self, genome: &str, num_children: usize, i: Size) -> Result<BottomSegmentData> {
        let mut buf = vec![0u8; BottomSegmentData::record_len(num_children)];
        self.file
            .read_element(&dataset(genome, BOTTOM_ARRAY_NAME), i, &mut buf)?;
        Ok(BottomSegmentData::decode(&buf, num_children))
    }

    pub fn set_bottom(&mut self, genome: &str, i: Size, seg: &BottomSegmentData) -> Result<()> {
        let mut buf = vec![0u8; BottomSegmentData::record_len(seg.children.len())];
        seg.encode(&mut buf);
        self.file
            .write_element(&dataset(genome, BOTTOM_ARRAY_NAME), i, &buf)
    }

    /// Read `len` bases as canonical uppercase ASCII.
    pub fn dna_read(&mut self, genome: &str, start: Size, len: Size) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(len as usize);
        self.file
            .read_range(&dataset(genome, DNA_ARRAY_NAME), start, len, &mut out)?;
        Ok(out)
    }

    /// Write canonical uppercase ASCII bases.
    pub fn dna_write(&mut self, genome: &str, start: Size, bases: &[u8]) -> Result<()> {
        self.file
            .write_range(&dataset(genome, DNA_ARRAY_NAME), start, bases)
    }

    pub fn rename_genome(&mut self, old: &str, new: &str) -> Result<()> {
        self.file.rename_prefix(&format!("/{old}/"), &format!("/{new}/"))
    }

    pub fn flush(&mut self) -> Result<()> {
        self.file.write()
    }
}
