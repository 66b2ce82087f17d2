/// Genome handles and the per-genome operations layered over the store.
///
/// A `Genome` is a cheap cloneable handle into its alignment; segment and
/// DNA accessors copy records out of the backend, so nothing handed to a
/// caller dangles when a chunk is evicted or the arena remaps.
use crate::alignment::AlignmentData;
use crate::column_iter::{ColumnIterator, ColumnOptions};
use crate::dna::DnaIterator;
use crate::error::{HalError, Result};
use crate::gapped_iter::{GappedBottomSegmentIterator, GappedTopSegmentIterator};
use crate::metadata::MetaData;
use crate::rearrangement::Rearrangement;
use crate::segment::{BottomSegmentData, TopSegmentData};
use crate::segment_iter::{BottomSegmentIterator, TopSegmentIterator};
use crate::sequence::{
    layout_sequences, SequenceInfo, SequenceNameHash, SequenceRecord, SiteMap, UpdateInfo,
};
use crate::store::GenomeDims;
use crate::types::{SegmentIndex, Size};
use std::cell::RefCell;
use std::rc::Rc;

pub(crate) struct GenomeState {
    pub dims: GenomeDims,
    pub sequences: Vec<SequenceRecord>,
    pub site_map: SiteMap,
    pub name_hash: SequenceNameHash,
    pub meta: MetaData,
}

impl GenomeState {
    fn empty(num_children: usize) -> GenomeState {
        GenomeState {
            dims: GenomeDims {
                total_length: 0,
                num_top: 0,
                num_bottom: 0,
                num_children,
                has_dna: false,
            },
            sequences: Vec::new(),
            site_map: SiteMap::default(),
            name_hash: SequenceNameHash::default(),
            meta: MetaData::new(),
        }
    }
}

/// One participant in the alignment. Handles are cheap to clone and share
/// the alignment's backend.
#[derive(Clone)]
pub struct Genome {
    pub(crate) data: Rc<RefCell<AlignmentData>>,
    pub(crate) id: usize,
}

impl PartialEq for Genome {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.data, &other.data) && self.id == other.id
    }
}

impl Eq for Genome {}

impl std::fmt::Debug for Genome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Genome").field("id", &self.id).finish_non_exhaustive()
    }
}

impl Genome {
    pub(crate) fn new(data: Rc<RefCell<AlignmentData>>, id: usize) -> Genome {
        Genome { data, id }
    }

    pub fn name(&self) -> String {
        self.data.borrow().genome_name(self.id)
    }

    pub fn is_root(&self) -> bool {
        self.data.borrow().tree.node(self.id).parent.is_none()
    }

    pub fn is_leaf(&self) -> bool {
        self.data.borrow().tree.node(self.id).children.is_empty()
    }

    pub fn num_children(&self) -> usize {
        self.data.borrow().tree.node(self.id).children.len()
    }

    pub fn parent(&self) -> Option<Genome> {
        let parent = self.data.borrow().tree.node(self.id).parent;
        parent.map(|p| Genome::new(self.data.clone(), p))
    }

    pub fn child(&self, c: usize) -> Result<Genome> {
        let data = self.data.borrow();
        let children = &data.tree.node(self.id).children;
        let child = *children.get(c).ok_or_else(|| {
            HalError::out_of_range(
                format!("children of {}", data.genome_name(self.id)),
                c as i64,
                children.len() as u64,
            )
        })?;
        drop(data);
        Ok(Genome::new(self.data.clone(), child))
    }

    pub fn children(&self) -> Vec<Genome> {
        let ids = self.data.borrow().tree.node(self.id).children.clone();
        ids.into_iter()
            .map(|c| Genome::new(self.data.clone(), c))
            .collect()
    }

    /// Position of this genome in its parent's ordered child list.
    pub fn index_in_parent(&self) -> Option<usize> {
        let data = self.data.borrow();
        let parent = data.tree.node(self.id).parent?;
        data.tree.child_position(parent, self.id)
    }

    pub fn sequence_length(&self) -> Size {
        self.data
            .borrow_mut()
            .genome_state(self.id)
            .map(|s| s.dims.total_length)
            .unwrap_or(0)
    }

    pub fn num_top_segments(&self) -> Size {
        self.data
            .borrow_mut()
            .genome_state(self.id)
            .map(|s| s.dims.num_top)
            .unwrap_or(0)
    }

    pub fn num_bottom_segments(&self) -> Size {
        self.data
            .borrow_mut()
            .genome_state(self.id)
            .map(|s| s.dims.num_bottom)
            .unwrap_or(0)
    }

    pub fn num_sequences(&self) -> Size {
        self.data
            .borrow_mut()
            .genome_state(self.id)
            .map(|s| s.sequences.len() as Size)
            .unwrap_or(0)
    }

    pub fn contains_dna_array(&self) -> bool {
        self.data
            .borrow_mut()
            .genome_state(self.id)
            .map(|s| s.dims.has_dna)
            .unwrap_or(false)
    }

    /// Declare per-sequence dimensions and allocate the genome's arrays.
    pub fn set_dimensions(&self, dims: &[SequenceInfo]) -> Result<()> {
        self.data.borrow_mut().set_dimensions(self.id, dims, true)
    }

    /// Same, without allocating a DNA array (coarse levels of detail).
    pub fn set_dimensions_no_dna(&self, dims: &[SequenceInfo]) -> Result<()> {
        self.data.borrow_mut().set_dimensions(self.id, dims, false)
    }

    /// Re-dimension the top-segment array. Sequences missing from
    /// `updates` keep their current counts.
    pub fn update_top_dimensions(&self, updates: &[UpdateInfo]) -> Result<()> {
        self.data.borrow_mut().update_dimensions(self.id, updates, true)
    }

    pub fn update_bottom_dimensions(&self, updates: &[UpdateInfo]) -> Result<()> {
        self.data.borrow_mut().update_dimensions(self.id, updates, false)
    }

    pub fn sequence_by_index(&self, index: u32) -> Result<Sequence> {
        let mut data = self.data.borrow_mut();
        let state = data.genome_state(self.id)?;
        if index as usize >= state.sequences.len() {
            let n = state.sequences.len() as u64;
            let name = data.genome_name(self.id);
            return Err(HalError::out_of_range(
                format!("sequences of {name}"),
                index as i64,
                n,
            ));
        }
        drop(data);
        Ok(Sequence {
            genome: self.clone(),
            index,
        })
    }

    /// Look a sequence up by name through the perfect hash; the candidate
    /// is verified against the stored name before it is returned.
    pub fn sequence_by_name(&self, name: &str) -> Option<Sequence> {
        let mut data = self.data.borrow_mut();
        let state = data.genome_state(self.id).ok()?;
        let candidate = state.name_hash.lookup(name)?;
        let record = state.sequences.get(candidate as usize)?;
        if record.name != name {
            return None;
        }
        drop(data);
        Some(Sequence {
            genome: self.clone(),
            index: candidate,
        })
    }

    /// Sequence containing the given site, in O(log S).
    pub fn sequence_by_site(&self, site: Size) -> Option<Sequence> {
        let mut data = self.data.borrow_mut();
        let state = data.genome_state(self.id).ok()?;
        let index = state.site_map.index_by_site(site)?;
        drop(data);
        Some(Sequence {
            genome: self.clone(),
            index,
        })
    }

    pub(crate) fn sequence_record(&self, index: u32) -> Result<SequenceRecord> {
        let mut data = self.data.borrow_mut();
        let state = data.genome_state(self.id)?;
        state
            .sequences
            .get(index as usize)
            .cloned()
            .ok_or_else(|| {
                HalError::out_of_range("sequence table", index as i64, state.sequences.len() as u64)
            })
    }

    pub fn top_segment(&self, i: SegmentIndex) -> Result<TopSegmentData> {
        self.data.borrow_mut().top_segment(self.id, i)
    }

    pub fn set_top_segment(&self, i: SegmentIndex, seg: &TopSegmentData) -> Result<()> {
        self.data.borrow_mut().set_top_segment(self.id, i, seg)
    }

    pub fn bottom_segment(&self, i: SegmentIndex) -> Result<BottomSegmentData> {
        self.data.borrow_mut().bottom_segment(self.id, i)
    }

    pub fn set_bottom_segment(&self, i: SegmentIndex, seg: &BottomSegmentData) -> Result<()> {
        self.data.borrow_mut().set_bottom_segment(self.id, i, seg)
    }

    /// Index of the top segment containing `site` (binary search on starts).
    pub fn top_index_by_site(&self, site: Size) -> Result<SegmentIndex> {
        self.data.borrow_mut().segment_index_by_site(self.id, site, true)
    }

    pub fn bottom_index_by_site(&self, site: Size) -> Result<SegmentIndex> {
        self.data.borrow_mut().segment_index_by_site(self.id, site, false)
    }

    pub fn get_string(&self) -> Result<String> {
        let len = self.sequence_length();
        self.get_sub_string(0, len)
    }

    pub fn get_sub_string(&self, start: Size, length: Size) -> Result<String> {
        self.data.borrow_mut().dna_read_string(self.id, start, length)
    }

    pub fn set_string(&self, dna: &str) -> Result<()> {
        let len = self.sequence_length();
        if dna.len() as Size != len {
            return Err(HalError::PreconditionViolated(format!(
                "input string of {} bases differs from genome length {len}",
                dna.len()
            )));
        }
        self.set_sub_string(0, dna)
    }

    pub fn set_sub_string(&self, start: Size, dna: &str) -> Result<()> {
        self.data.borrow_mut().dna_write_string(self.id, start, dna)
    }

    pub fn meta_set(&self, key: &str, value: &str) -> Result<()> {
        let mut data = self.data.borrow_mut();
        data.check_writable()?;
        data.genome_state_mut(self.id)?.meta.set(key, value);
        Ok(())
    }

    pub fn meta_get(&self, key: &str) -> Option<String> {
        let mut data = self.data.borrow_mut();
        let state = data.genome_state(self.id).ok()?;
        state.meta.get(key).map(|v| v.to_string())
    }

    /// Rename the genome. The mmap backend reuses the name record in place
    /// when the new name fits its capacity.
    pub fn rename(&self, new_name: &str) -> Result<()> {
        let mut data = self.data.borrow_mut();
        data.check_writable()?;
        let old = data.genome_name(self.id);
        data.tree.rename(&old, new_name)?;
        data.store.rename_genome(&old, new_name)?;
        data.tree_dirty = true;
        Ok(())
    }

    // -- iterator factories --

    pub fn dna_iterator(&self, position: Size) -> Result<DnaIterator> {
        DnaIterator::new(self.clone(), position)
    }

    pub fn top_segment_iterator(&self, index: SegmentIndex) -> Result<TopSegmentIterator> {
        TopSegmentIterator::new(self.clone(), index)
    }

    pub fn bottom_segment_iterator(&self, index: SegmentIndex) -> Result<BottomSegmentIterator> {
        BottomSegmentIterator::new(self.clone(), index)
    }

    pub fn gapped_top_segment_iterator(
        &self,
        index: SegmentIndex,
        gap_threshold: Size,
        atomic: bool,
    ) -> Result<GappedTopSegmentIterator> {
        GappedTopSegmentIterator::new(self.top_segment_iterator(index)?, gap_threshold, atomic)
    }

    pub fn gapped_bottom_segment_iterator(
        &self,
        index: SegmentIndex,
        child_index: usize,
        gap_threshold: Size,
        atomic: bool,
    ) -> Result<GappedBottomSegmentIterator> {
        GappedBottomSegmentIterator::new(
            self.bottom_segment_iterator(index)?,
            child_index,
            gap_threshold,
            atomic,
        )
    }

    pub fn column_iterator(
        &self,
        position: Size,
        last_position: Option<Size>,
        options: &ColumnOptions,
    ) -> Result<ColumnIterator> {
        ColumnIterator::new(self.clone(), position, last_position, options)
    }

    pub fn rearrangement(
        &self,
        position: SegmentIndex,
        gap_threshold: Size,
        n_threshold: f64,
        atomic: bool,
    ) -> Result<Rearrangement> {
        Rearrangement::identify_from_left_breakpoint(
            self.clone(),
            position,
            gap_threshold,
            n_threshold,
            atomic,
        )
    }
}

/// A named contiguous subrange of a genome (a chromosome, a scaffold).
#[derive(Clone)]
pub struct Sequence {
    pub(crate) genome: Genome,
    pub(crate) index: u32,
}

impl Sequence {
    pub fn genome(&self) -> &Genome {
        &self.genome
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn name(&self) -> String {
        self.genome
            .sequence_record(self.index)
            .map(|r| r.name)
            .unwrap_or_default()
    }

    pub fn start(&self) -> Size {
        self.genome
            .sequence_record(self.index)
            .map(|r| r.start)
            .unwrap_or(0)
    }

    pub fn length(&self) -> Size {
        self.genome
            .sequence_record(self.index)
            .map(|r| r.length)
            .unwrap_or(0)
    }

    /// (first index, count) of this sequence's slice of the top array.
    pub fn top_segment_range(&self) -> Result<(Size, Size)> {
        let r = self.genome.sequence_record(self.index)?;
        Ok((r.top_start, r.num_top))
    }

    pub fn bottom_segment_range(&self) -> Result<(Size, Size)> {
        let r = self.genome.sequence_record(self.index)?;
        Ok((r.bottom_start, r.num_bottom))
    }

    pub fn get_sub_string(&self, start: Size, length: Size) -> Result<String> {
        let r = self.genome.sequence_record(self.index)?;
        if start + length > r.length {
            return Err(HalError::out_of_range(
                format!("sequence {}", r.name),
                (start + length) as i64 - 1,
                r.length,
            ));
        }
        self.genome.get_sub_string(r.start + start, length)
    }
}

impl AlignmentData {
    /// Load (or create empty) cached state for a genome.
    pub(crate) fn genome_state(&mut self, id: usize) -> Result<&GenomeState> {
        self.load_genome_state(id)?;
        Ok(self.genomes[id].as_ref().unwrap())
    }

    pub(crate) fn genome_state_mut(&mut self, id: usize) -> Result<&mut GenomeState> {
        self.load_genome_state(id)?;
        Ok(self.genomes[id].as_mut().unwrap())
    }

    fn load_genome_state(&mut self, id: usize) -> Result<()> {
        if self.genomes[id].is_some() {
            return Ok(());
        }
        let name = self.genome_name(id);
        let num_children = self.tree.node(id).children.len();
        let state = if self.store.genome_exists(&name) {
            let dims = self.store.genome_dims(&name)?;
            let sequences = self.store.read_sequences(&name)?;
            let site_map = SiteMap::build(&sequences);
            let name_hash = match self.store.read_name_hash(&name)? {
                Some(hash) => hash,
                None => {
                    let names: Vec<&str> = sequences.iter().map(|r| r.name.as_str()).collect();
                    SequenceNameHash::build(&names)?
                }
            };
            let meta = self.store.read_genome_meta(&name)?;
            GenomeState {
                dims,
                sequences,
                site_map,
                name_hash,
                meta,
            }
        } else {
            GenomeState::empty(num_children)
        };
        self.genomes[id] = Some(state);
        Ok(())
    }

    fn set_dimensions(&mut self, id: usize, dims: &[SequenceInfo], store_dna: bool) -> Result<()> {
        self.check_writable()?;
        let name = self.genome_name(id);
        let num_children = self.tree.node(id).children.len();
        let records = layout_sequences(dims);
        self.store
            .create_genome(&name, &records, num_children, store_dna)?;
        self.genomes[id] = None; // reload from the store on next touch
        Ok(())
    }

    /// Complete a partial per-sequence update list (sequences not named
    /// keep their current counts), then swing the segment array.
    fn update_dimensions(&mut self, id: usize, updates: &[UpdateInfo], is_top: bool) -> Result<()> {
        self.check_writable()?;
        let name = self.genome_name(id);
        let num_children = self.tree.node(id).children.len();
        let mut records = self.genome_state(id)?.sequences.clone();
        for rec in records.iter_mut() {
            let updated = updates.iter().find(|u| u.name == rec.name);
            let count = match (updated, is_top) {
                (Some(u), _) => u.num_segments,
                (None, true) => rec.num_top,
                (None, false) => rec.num_bottom,
            };
            if is_top {
                rec.num_top = count;
            } else {
                rec.num_bottom = count;
            }
        }
        // re-derive the running start indices
        let mut at = 0;
        for rec in records.iter_mut() {
            if is_top {
                rec.top_start = at;
                at += rec.num_top;
            } else {
                rec.bottom_start = at;
                at += rec.num_bottom;
            }
        }
        if is_top {
            self.store.reset_top_array(&name, at)?;
        } else {
            self.store.reset_bottom_array(&name, at, num_children)?;
        }
        self.store.write_sequences(&name, &records)?;
        self.genomes[id] = None;
        Ok(())
    }

    pub(crate) fn top_segment(&mut self, id: usize, i: SegmentIndex) -> Result<TopSegmentData> {
        let name = self.genome_name(id);
        let num_top = self.genome_state(id)?.dims.num_top;
        if i < 0 || i as Size >= num_top {
            return Err(HalError::out_of_range(
                format!("top segments of {name}"),
                i,
                num_top,
            ));
        }
        self.store.top(&name, i as Size)
    }

    pub(crate) fn set_top_segment(
        &mut self,
        id: usize,
        i: SegmentIndex,
        seg: &TopSegmentData,
    ) -> Result<()> {
        let name = self.genome_name(id);
        let num_top = self.genome_state(id)?.dims.num_top;
        if i < 0 || i as Size >= num_top {
            return Err(HalError::out_of_range(
                format!("top segments of {name}"),
                i,
                num_top,
            ));
        }
        self.store.set_top(&name, i as Size, seg)
    }

    pub(crate) fn bottom_segment(&mut self, id: usize, i: SegmentIndex) -> Result<BottomSegmentData> {
        let name = self.genome_name(id);
        let state = self.genome_state(id)?;
        let num_bottom = state.dims.num_bottom;
        let num_children = state.dims.num_children;
        if i < 0 || i as Size >= num_bottom {
            return Err(HalError::out_of_range(
                format!("bottom segments of {name}"),
                i,
                num_bottom,
            ));
        }
        self.store.bottom(&name, num_children, i as Size)
    }

    pub(crate) fn set_bottom_segment(
        &mut self,
        id: usize,
        i: SegmentIndex,
        seg: &BottomSegmentData,
    ) -> Result<()> {
        let name = self.genome_name(id);
        let state = self.genome_state(id)?;
        let num_bottom = state.dims.num_bottom;
        let num_children = state.dims.num_children;
        if i < 0 || i as Size >= num_bottom {
            return Err(HalError::out_of_range(
                format!("bottom segments of {name}"),
                i,
                num_bottom,
            ));
        }
        if seg.children.len() != num_children {
            return Err(HalError::PreconditionViolated(format!(
                "bottom segment carries {} child slots, genome {name} has {num_children}",
                seg.children.len()
            )));
        }
        self.store.set_bottom(&name, i as Size, seg)
    }

    /// Binary search for the segment containing `site`; segments cover the
    /// genome in coordinate order, so a gap here means a corrupt file.
    pub(crate) fn segment_index_by_site(
        &mut self,
        id: usize,
        site: Size,
        top: bool,
    ) -> Result<SegmentIndex> {
        let name = self.genome_name(id);
        let state = self.genome_state(id)?;
        let count = if top {
            state.dims.num_top
        } else {
            state.dims.num_bottom
        };
        let total = state.dims.total_length;
        if site >= total {
            return Err(HalError::out_of_range(
                format!("DNA of {name}"),
                site as i64,
                total,
            ));
        }
        if count == 0 {
            return Err(HalError::NotFound(format!(
                "genome {name} has no {} segments",
                if top { "top" } else { "bottom" }
            )));
        }
        let num_children = state.dims.num_children;
        let read_start = |data: &mut Self, i: Size| -> Result<(Size, Size)> {
            if top {
                let seg = data.store.top(&name, i)?;
                Ok((seg.start, seg.length))
            } else {
                let seg = data.store.bottom(&name, num_children, i)?;
                Ok((seg.start, seg.length))
            }
        };
        let mut lo: Size = 0;
        let mut hi: Size = count - 1;
        while lo < hi {
            let mid = (lo + hi + 1) / 2;
            let (start, _) = read_start(self, mid)?;
            if start <= site {
                lo = mid;
            } else {
                hi = mid - 1;
            }
        }
        let (start, length) = read_start(self, lo)?;
        if site < start || site >= start + length {
            return Err(HalError::CorruptAlignment(format!(
                "segment {lo} of {name} covers [{start}, {}) but was selected for site {site}",
                start + length
            )));
        }
        Ok(lo as SegmentIndex)
    }

    pub(crate) fn dna_read_string(&mut self, id: usize, start: Size, length: Size) -> Result<String> {
        let name = self.genome_name(id);
        let total = self.genome_state(id)?.dims.total_length;
        if length > 0 && start + length > total {
            return Err(HalError::out_of_range(
                format!("DNA of {name}"),
                (start + length) as i64 - 1,
                total,
            ));
        }
        let bytes = self.store.dna_read(&name, start, length)?;
        Ok(String::from_utf8(bytes)
            .map_err(|_| HalError::CorruptAlignment(format!("DNA of {name} is not ASCII")))?)
    }

    /// Canonicalizes to uppercase and validates every character before
    /// anything is written.
    pub(crate) fn dna_write_string(&mut self, id: usize, start: Size, dna: &str) -> Result<()> {
        self.check_writable()?;
        let name = self.genome_name(id);
        let total = self.genome_state(id)?.dims.total_length;
        let length = dna.len() as Size;
        if length > 0 && start + length > total {
            return Err(HalError::out_of_range(
                format!("DNA of {name}"),
                (start + length) as i64 - 1,
                total,
            ));
        }
        let mut canonical = Vec::with_capacity(dna.len());
        for c in dna.chars() {
            let base = crate::types::Base::from_char(c).ok_or_else(|| {
                HalError::PreconditionViolated(format!("invalid DNA character {c:?}"))
            })?;
            canonical.push(base.to_char() as u8);
        }
        self.store.dna_write(&name, start, &canonical)
    }
}
