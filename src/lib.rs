// Library exports for halign
pub mod alignment;
pub mod arena;
pub mod blob;
pub mod chunk_array;
pub mod chunk_file;
mod chunked_store;
pub mod column_iter;
pub mod dna;
pub mod error;
pub mod gapped_iter;
pub mod genome;
pub mod lod;
pub mod metadata;
mod mmap_store;
pub mod rearrangement;
pub mod segment;
pub mod segment_iter;
pub mod sequence;
mod store;
pub mod tree;
pub mod types;

pub use alignment::{detect_format, open_alignment, AccessMode, Alignment, Format, OpenOptions};
pub use column_iter::{ColumnIterator, ColumnMap, ColumnOptions, ColumnPosition, SequenceKey};
pub use dna::DnaIterator;
pub use error::{HalError, Result};
pub use gapped_iter::{GappedBottomSegmentIterator, GappedTopSegmentIterator};
pub use genome::{Genome, Sequence};
pub use lod::LodManager;
pub use rearrangement::{Rearrangement, RearrangementKind};
pub use segment::{BottomSegmentData, ChildLink, TopSegmentData};
pub use segment_iter::{BottomSegmentIterator, TopSegmentIterator};
pub use sequence::{SequenceInfo, UpdateInfo};
pub use store::GenomeDims;
pub use types::{Base, SegmentIndex, Size, NULL_INDEX};
