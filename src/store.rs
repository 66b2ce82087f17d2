/// Backend dispatch. The two storage strategies expose the same operation
/// set; everything above this layer is backend-agnostic.
use crate::chunked_store::ChunkedStore;
use crate::error::Result;
use crate::metadata::MetaData;
use crate::mmap_store::MmapStore;
use crate::segment::{BottomSegmentData, TopSegmentData};
use crate::sequence::SequenceRecord;
use crate::types::Size;

/// Summary dimensions of one genome's arrays.
#[derive(Debug, Clone, Copy)]
pub struct GenomeDims {
    pub total_length: Size,
    pub num_top: Size,
    pub num_bottom: Size,
    /// Child slot count baked into the bottom-segment stride.
    pub num_children: usize,
    pub has_dna: bool,
}

pub(crate) enum Store {
    Chunked(ChunkedStore),
    Mmap(MmapStore),
}

macro_rules! dispatch {
    ($self:expr, $store:ident => $body:expr) => {
        match $self {
            Store::Chunked($store) => $body,
            Store::Mmap($store) => $body,
        }
    };
}

impl Store {
    pub fn writable(&self) -> bool {
        dispatch!(self, s => s.writable())
    }

    pub fn write_tree(&mut self, bytes: &[u8]) -> Result<()> {
        dispatch!(self, s => s.write_tree(bytes))
    }

    pub fn read_tree(&mut self) -> Result<Option<Vec<u8>>> {
        dispatch!(self, s => s.read_tree())
    }

    pub fn write_root_meta(&mut self, meta: &MetaData) -> Result<()> {
        dispatch!(self, s => s.write_root_meta(meta))
    }

    pub fn read_root_meta(&mut self) -> Result<MetaData> {
        dispatch!(self, s => s.read_root_meta())
    }

    pub fn genome_exists(&self, genome: &str) -> bool {
        dispatch!(self, s => s.genome_exists(genome))
    }

    pub fn create_genome(
        &mut self,
        genome: &str,
        records: &[SequenceRecord],
        num_children: usize,
        store_dna: bool,
    ) -> Result<()> {
        dispatch!(self, s => s.create_genome(genome, records, num_children, store_dna))
    }

    pub fn reset_top_array(&mut self, genome: &str, num_top: Size) -> Result<()> {
        dispatch!(self, s => s.reset_top_array(genome, num_top))
    }

    pub fn reset_bottom_array(&mut self, genome: &str, num_bottom: Size, num_children: usize) -> Result<()> {
        dispatch!(self, s => s.reset_bottom_array(genome, num_bottom, num_children))
    }

    pub fn genome_dims(&mut self, genome: &str) -> Result<GenomeDims> {
        dispatch!(self, s => s.genome_dims(genome))
    }

    pub fn read_sequences(&mut self, genome: &str) -> Result<Vec<SequenceRecord>> {
        dispatch!(self, s => s.read_sequences(genome))
    }

    pub fn write_sequences(&mut self, genome: &str, records: &[SequenceRecord]) -> Result<()> {
        dispatch!(self, s => s.write_sequences(genome, records))
    }

    pub fn read_name_hash(&mut self, genome: &str) -> Result<Option<crate::sequence::SequenceNameHash>> {
        dispatch!(self, s => s.read_name_hash(genome))
    }

    pub fn read_genome_meta(&mut self, genome: &str) -> Result<MetaData> {
        dispatch!(self, s => s.read_genome_meta(genome))
    }

    pub fn write_genome_meta(&mut self, genome: &str, meta: &MetaData) -> Result<()> {
        dispatch!(self, s => s.write_genome_meta(genome, meta))
    }

    pub fn top(&mut self, genome: &str, i: Size) -> Result<TopSegmentData> {
        dispatch!(self, s => s.top(genome, i))
    }

    pub fn set_top(&mut self, genome: &str, i: Size, seg: &TopSegmentData) -> Result<()> {
        dispatch!(self, s => s.set_top(genome, i, seg))
    }

    pub fn bottom(&mut self, genome: &str, num_children: usize, i: Size) -> Result<BottomSegmentData> {
        dispatch!(self, s => s.bottom(genome, num_children, i))
    }

    pub fn set_bottom(&mut self, genome: &str, i: Size, seg: &BottomSegmentData) -> Result<()> {
        dispatch!(self, s => s.set_bottom(genome, i, seg))
    }

    pub fn dna_read(&mut self, genome: &str, start: Size, len: Size) -> Result<Vec<u8>> {
        dispatch!(self, s => s.dna_read(genome, start, len))
    }

    pub fn dna_write(&mut self, genome: &str, start: Size, bases: &[u8]) -> Result<()> {
        dispatch!(self, s => s.dna_write(genome, start, bases))
    }

    pub fn rename_genome(&mut self, old: &str, new: &str) -> Result<()> {
        dispatch!(self, s => s.rename_genome(old, new))
    }

    pub fn flush(&mut self) -> Result<()> {
        dispatch!(self, s => s.flush())
    }
}
