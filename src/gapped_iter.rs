/// Gap-merged segment runs.
///
/// A gapped iterator represents a maximal run of consecutive segments in
/// which every unaligned stretch is no longer than the gap threshold and
/// every aligned neighbour is collinear: same orientation, same parent (or
/// child), monotonically advancing partner coordinate. Downstream analyses
/// use these to ignore short indels without ever crossing a real
/// breakpoint. `atomic` disables merging entirely.
use crate::error::Result;
use crate::genome::Genome;
use crate::segment::TopSegmentData;
use crate::segment_iter::{BottomSegmentIterator, TopSegmentIterator};
use crate::types::{SegmentIndex, Size};

/// Run of top segments, collinear relative to the parent genome.
pub struct GappedTopSegmentIterator {
    genome: Genome,
    left_index: SegmentIndex,
    right_index: SegmentIndex,
    gap_threshold: Size,
    atomic: bool,
    /// This genome's slot in its parent's child list.
    child_slot: Option<usize>,
}

impl GappedTopSegmentIterator {
    /// Build the run containing `base`'s segment, extended rightward.
    pub fn new(base: TopSegmentIterator, gap_threshold: Size, atomic: bool) -> Result<GappedTopSegmentIterator> {
        let genome = base.genome().clone();
        let child_slot = genome.index_in_parent();
        let index = base.array_index();
        let mut it = GappedTopSegmentIterator {
            genome,
            left_index: index,
            right_index: index,
            gap_threshold,
            atomic,
            child_slot,
        };
        it.extend_right()?;
        Ok(it)
    }

    pub fn left_index(&self) -> SegmentIndex {
        self.left_index
    }

    pub fn right_index(&self) -> SegmentIndex {
        self.right_index
    }

    pub fn num_segments(&self) -> Size {
        (self.right_index - self.left_index + 1) as Size
    }

    pub fn left_iterator(&self) -> Result<TopSegmentIterator> {
        TopSegmentIterator::new(self.genome.clone(), self.left_index)
    }

    pub fn right_iterator(&self) -> Result<TopSegmentIterator> {
        TopSegmentIterator::new(self.genome.clone(), self.right_index)
    }

    /// Genomic span of the whole run, gaps included.
    pub fn span_length(&self) -> Result<Size> {
        let left = self.genome.top_segment(self.left_index)?;
        let right = self.genome.top_segment(self.right_index)?;
        Ok(right.end() - left.start)
    }

    /// True when the run carries at least one aligned segment.
    pub fn is_aligned(&self) -> Result<bool> {
        for i in self.left_index..=self.right_index {
            if self.genome.top_segment(i)?.has_parent() {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Leftmost aligned segment of the run.
    pub fn first_aligned(&self) -> Result<Option<TopSegmentData>> {
        for i in self.left_index..=self.right_index {
            let seg = self.genome.top_segment(i)?;
            if seg.has_parent() {
                return Ok(Some(seg));
            }
        }
        Ok(None)
    }

    /// Rightmost aligned segment of the run.
    pub fn last_aligned(&self) -> Result<Option<TopSegmentData>> {
        for i in (self.left_index..=self.right_index).rev() {
            let seg = self.genome.top_segment(i)?;
            if seg.has_parent() {
                return Ok(Some(seg));
            }
        }
        Ok(None)
    }

    /// Would appending the segment at `next_index` preserve the run
    /// invariant? `next_index` must be adjacent to the right edge, ignoring
    /// any unaligned stretch already skipped by the caller.
    pub fn compatible(&self, next_index: SegmentIndex) -> Result<bool> {
        if self.atomic {
            return Ok(false);
        }
        let next = self.genome.top_segment(next_index)?;
        let cur = match self.last_aligned()? {
            Some(seg) => seg,
            // an unaligned run only absorbs more unaligned segments
            None => return Ok(!next.has_parent()),
        };
        if !next.has_parent() {
            return Ok(true); // caller bounds the unaligned span
        }
        if next.parent_reversed != cur.parent_reversed {
            return Ok(false);
        }
        let (pa, pb) = (cur.parent_index, next.parent_index);
        let forward = !cur.parent_reversed;
        if (forward && pb <= pa) || (!forward && pb >= pa) {
            return Ok(false);
        }
        // every skipped parent segment must be unaligned to this genome
        // and their total length must stay under the threshold
        let parent = match self.genome.parent() {
            Some(p) => p,
            None => return Ok(false),
        };
        let slot = match self.child_slot {
            Some(c) => c,
            None => return Ok(false),
        };
        let (lo, hi) = if pa < pb { (pa, pb) } else { (pb, pa) };
        let mut gap = 0;
        for i in lo + 1..hi {
            let between = parent.bottom_segment(i)?;
            if between.child(slot)?.is_set() {
                return Ok(false);
            }
            gap += between.length;
            if gap > self.gap_threshold {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Grow the run rightward to its maximal extent.
    pub fn extend_right(&mut self) -> Result<()> {
        if self.atomic {
            return Ok(());
        }
        let count = self.genome.num_top_segments() as SegmentIndex;
        loop {
            let mut probe = self.right_index + 1;
            let mut gap = 0;
            while probe < count && !self.genome.top_segment(probe)?.has_parent() {
                gap += self.genome.top_segment(probe)?.length;
                probe += 1;
            }
            if gap > self.gap_threshold {
                break;
            }
            if probe >= count {
                // absorb a trailing unaligned stretch only if the run
                // itself is unaligned
                if self.last_aligned()?.is_none() && probe > self.right_index + 1 {
                    self.right_index = probe - 1;
                }
                break;
            }
            if !self.compatible(probe)? {
                // an unaligned stretch before an incompatible segment still
                // belongs to an unaligned run
                if self.last_aligned()?.is_none() && probe > self.right_index + 1 {
                    self.right_index = probe - 1;
                }
                break;
            }
            self.right_index = probe;
        }
        Ok(())
    }

    /// Grow the run leftward to its maximal extent.
    pub fn extend_left(&mut self) -> Result<()> {
        if self.atomic {
            return Ok(());
        }
        loop {
            let mut probe = self.left_index - 1;
            let mut gap = 0;
            while probe >= 0 && !self.genome.top_segment(probe)?.has_parent() {
                gap += self.genome.top_segment(probe)?.length;
                probe -= 1;
            }
            if gap > self.gap_threshold || probe < 0 {
                break;
            }
            if !self.compatible_left(probe)? {
                break;
            }
            self.left_index = probe;
        }
        Ok(())
    }

    fn compatible_left(&self, prev_index: SegmentIndex) -> Result<bool> {
        // mirror of compatible(): treat the probed segment as the current
        // left edge and the run's first aligned segment as its successor
        let prev = self.genome.top_segment(prev_index)?;
        let cur = match self.first_aligned()? {
            Some(seg) => seg,
            None => return Ok(!prev.has_parent()),
        };
        if !prev.has_parent() {
            return Ok(true);
        }
        if prev.parent_reversed != cur.parent_reversed {
            return Ok(false);
        }
        let (pa, pb) = (prev.parent_index, cur.parent_index);
        let forward = !cur.parent_reversed;
        if (forward && pb <= pa) || (!forward && pb >= pa) {
            return Ok(false);
        }
        let parent = match self.genome.parent() {
            Some(p) => p,
            None => return Ok(false),
        };
        let slot = match self.child_slot {
            Some(c) => c,
            None => return Ok(false),
        };
        let (lo, hi) = if pa < pb { (pa, pb) } else { (pb, pa) };
        let mut gap = 0;
        for i in lo + 1..hi {
            let between = parent.bottom_segment(i)?;
            if between.child(slot)?.is_set() {
                return Ok(false);
            }
            gap += between.length;
            if gap > self.gap_threshold {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Move to the next run to the right.
    pub fn to_right(&mut self) -> Result<bool> {
        let count = self.genome.num_top_segments() as SegmentIndex;
        if self.right_index + 1 >= count {
            return Ok(false);
        }
        self.left_index = self.right_index + 1;
        self.right_index = self.left_index;
        self.extend_right()?;
        Ok(true)
    }

    /// Move to the previous run to the left.
    pub fn to_left(&mut self) -> Result<bool> {
        if self.left_index == 0 {
            return Ok(false);
        }
        self.right_index = self.left_index - 1;
        self.left_index = self.right_index;
        self.extend_left()?;
        Ok(true)
    }
}

/// Run of bottom segments, collinear relative to one child genome.
pub struct GappedBottomSegmentIterator {
    genome: Genome,
    child_slot: usize,
    left_index: SegmentIndex,
    right_index: SegmentIndex,
    gap_threshold: Size,
    atomic: bool,
}

impl GappedBottomSegmentIterator {
    pub fn new(
        base: BottomSegmentIterator,
        child_slot: usize,
        gap_threshold: Size,
        atomic: bool,
    ) -> Result<GappedBottomSegmentIterator> {
        let genome = base.genome().clone();
        let index = base.array_index();
        let mut it = GappedBottomSegmentIterator {
            genome,
            child_slot,
            left_index: index,
            right_index: index,
            gap_threshold,
            atomic,
        };
        it.extend_right()?;
        Ok(it)
    }

    pub fn left_index(&self) -> SegmentIndex {
        self.left_index
    }

    pub fn right_index(&self) -> SegmentIndex {
        self.right_index
    }

    pub fn num_segments(&self) -> Size {
        (self.right_index - self.left_index + 1) as Size
    }

    pub fn span_length(&self) -> Result<Size> {
        let left = self.genome.bottom_segment(self.left_index)?;
        let right = self.genome.bottom_segment(self.right_index)?;
        Ok(right.end() - left.start)
    }

    fn aligned(&self, i: SegmentIndex) -> Result<bool> {
        Ok(self.genome.bottom_segment(i)?.child(self.child_slot)?.is_set())
    }

    fn last_aligned(&self) -> Result<Option<SegmentIndex>> {
        for i in (self.left_index..=self.right_index).rev() {
            if self.aligned(i)? {
                return Ok(Some(i));
            }
        }
        Ok(None)
    }

    pub fn compatible(&self, next_index: SegmentIndex) -> Result<bool> {
        if self.atomic {
            return Ok(false);
        }
        let next = self.genome.bottom_segment(next_index)?;
        let next_link = next.child(self.child_slot)?;
        let cur_idx = match self.last_aligned()? {
            Some(i) => i,
            None => return Ok(!next_link.is_set()),
        };
        if !next_link.is_set() {
            return Ok(true);
        }
        let cur = self.genome.bottom_segment(cur_idx)?;
        let cur_link = cur.child(self.child_slot)?;
        if next_link.reversed != cur_link.reversed {
            return Ok(false);
        }
        let (ta, tb) = (cur_link.child_index, next_link.child_index);
        let forward = !cur_link.reversed;
        if (forward && tb <= ta) || (!forward && tb >= ta) {
            return Ok(false);
        }
        // skipped child segments must be unaligned and short
        let child = self.genome.child(self.child_slot)?;
        let (lo, hi) = if ta < tb { (ta, tb) } else { (tb, ta) };
        let mut gap = 0;
        for i in lo + 1..hi {
            let between = child.top_segment(i)?;
            if between.has_parent() {
                return Ok(false);
            }
            gap += between.length;
            if gap > self.gap_threshold {
                return Ok(false);
            }
        }
        Ok(true)
    }

    pub fn extend_right(&mut self) -> Result<()> {
        if self.atomic {
            return Ok(());
        }
        let count = self.genome.num_bottom_segments() as SegmentIndex;
        loop {
            let mut probe = self.right_index + 1;
            let mut gap = 0;
            while probe < count && !self.aligned(probe)? {
                gap += self.genome.bottom_segment(probe)?.length;
                probe += 1;
            }
            if gap > self.gap_threshold || probe >= count {
                break;
            }
            if !self.compatible(probe)? {
                break;
            }
            self.right_index = probe;
        }
        Ok(())
    }

    pub fn to_right(&mut self) -> Result<bool> {
        let count = self.genome.num_bottom_segments() as SegmentIndex;
        if self.right_index + 1 >= count {
            return Ok(false);
        }
        self.left_index = self.right_index + 1;
        self.right_index = self.left_index;
        self.extend_right()?;
        Ok(true)
    }
}
