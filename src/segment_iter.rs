/// Forward/reverse iterators over top and bottom segment arrays.
///
/// An iterator carries an array index, an orientation flag, and a slice
/// window into the current segment (for callers that start mid-segment).
/// Cross-genome hops compose orientation by XOR with the link's reversed
/// bit. Aligned partner segments always span the same number of bases, so
/// a slice maps across a hop by offset (mirrored when the link flips
/// strand); unequal spans mean the file is corrupt.
use crate::error::{HalError, Result};
use crate::genome::Genome;
use crate::segment::{BottomSegmentData, TopSegmentData};
use crate::types::{SegmentIndex, Size, NULL_INDEX};
use std::cmp::Ordering;

fn map_slice(offset: Size, length: Size, span: Size, flip: bool) -> Size {
    if flip {
        span - offset - length
    } else {
        offset
    }
}

/// Iterator over a genome's top segments.
#[derive(Clone, Debug)]
pub struct TopSegmentIterator {
    genome: Genome,
    index: SegmentIndex,
    slice_offset: Size,
    slice_length: Size,
    reversed: bool,
}

/// Iterator over a genome's bottom segments.
#[derive(Clone, Debug)]
pub struct BottomSegmentIterator {
    genome: Genome,
    index: SegmentIndex,
    slice_offset: Size,
    slice_length: Size,
    reversed: bool,
}

macro_rules! segment_iterator_common {
    ($name:ident, $count:ident, $what:expr) => {
        impl $name {
            pub fn genome(&self) -> &Genome {
                &self.genome
            }

            pub fn array_index(&self) -> SegmentIndex {
                self.index
            }

            pub fn reversed(&self) -> bool {
                self.reversed
            }

            /// Flip orientation in place, keeping the same slice.
            pub fn reverse(&mut self) {
                self.reversed = !self.reversed;
            }

            pub fn slice_offset(&self) -> Size {
                self.slice_offset
            }

            pub fn length(&self) -> Size {
                self.slice_length
            }

            pub fn at_end(&self) -> bool {
                self.index < 0 || self.index as Size >= self.genome.$count()
            }

            /// First position of the slice along the chosen strand.
            pub fn start_position(&self) -> Result<Size> {
                let seg_start = self.segment_start()?;
                Ok(if self.reversed {
                    seg_start + self.slice_offset + self.slice_length - 1
                } else {
                    seg_start + self.slice_offset
                })
            }

            /// Last position of the slice along the chosen strand.
            pub fn end_position(&self) -> Result<Size> {
                let seg_start = self.segment_start()?;
                Ok(if self.reversed {
                    seg_start + self.slice_offset
                } else {
                    seg_start + self.slice_offset + self.slice_length - 1
                })
            }

            /// Step one segment leftward along the chosen strand.
            pub fn to_left(&mut self) -> Result<()> {
                self.step(if self.reversed { 1 } else { -1 })
            }

            /// Step one segment rightward along the chosen strand.
            pub fn to_right(&mut self) -> Result<()> {
                self.step(if self.reversed { -1 } else { 1 })
            }

            fn step(&mut self, delta: i64) -> Result<()> {
                let count = self.genome.$count() as i64;
                self.index = (self.index + delta).clamp(-1, count);
                if self.at_end() {
                    self.slice_offset = 0;
                    self.slice_length = 0;
                } else {
                    self.full_slice()?;
                }
                Ok(())
            }

            fn check_current(&self) -> Result<()> {
                if self.at_end() {
                    return Err(HalError::out_of_range(
                        format!("{} of {}", $what, self.genome.name()),
                        self.index,
                        self.genome.$count(),
                    ));
                }
                Ok(())
            }
        }

        impl PartialEq for $name {
            fn eq(&self, other: &Self) -> bool {
                self.cmp_key() == other.cmp_key()
            }
        }

        impl Eq for $name {}

        impl PartialOrd for $name {
            fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
                Some(self.cmp(other))
            }
        }

        impl Ord for $name {
            /// Total order by (array index, slice offset, orientation).
            fn cmp(&self, other: &Self) -> Ordering {
                self.cmp_key().cmp(&other.cmp_key())
            }
        }

        impl $name {
            fn cmp_key(&self) -> (SegmentIndex, Size, bool) {
                (self.index, self.slice_offset, self.reversed)
            }
        }
    };
}

segment_iterator_common!(TopSegmentIterator, num_top_segments, "top segment iterator");
segment_iterator_common!(BottomSegmentIterator, num_bottom_segments, "bottom segment iterator");

impl TopSegmentIterator {
    /// Position `index` may be one past the last segment (the end
    /// sentinel); anything further out is an error.
    pub fn new(genome: Genome, index: SegmentIndex) -> Result<TopSegmentIterator> {
        let count = genome.num_top_segments();
        if index < 0 || index as Size > count {
            return Err(HalError::out_of_range(
                format!("top segments of {}", genome.name()),
                index,
                count,
            ));
        }
        let mut it = TopSegmentIterator {
            genome,
            index,
            slice_offset: 0,
            slice_length: 0,
            reversed: false,
        };
        if !it.at_end() {
            it.full_slice()?;
        }
        Ok(it)
    }

    pub fn top_segment(&self) -> Result<TopSegmentData> {
        self.check_current()?;
        self.genome.top_segment(self.index)
    }

    fn segment_start(&self) -> Result<Size> {
        Ok(self.top_segment()?.start)
    }

    fn full_slice(&mut self) -> Result<()> {
        self.slice_offset = 0;
        self.slice_length = self.top_segment()?.length;
        Ok(())
    }

    /// Seek to the segment containing `position`; when `slice` is set the
    /// iterator is narrowed to exactly that base.
    pub fn to_site(&mut self, position: Size, slice: bool) -> Result<()> {
        self.index = self.genome.top_index_by_site(position)?;
        let seg = self.top_segment()?;
        if slice {
            self.slice_offset = position - seg.start;
            self.slice_length = 1;
        } else {
            self.slice_offset = 0;
            self.slice_length = seg.length;
        }
        Ok(())
    }

    pub fn has_parent(&self) -> Result<bool> {
        Ok(self.top_segment()?.has_parent())
    }

    /// Hop up to the aligned bottom segment of the parent genome.
    pub fn parent(&self) -> Result<Option<BottomSegmentIterator>> {
        let seg = self.top_segment()?;
        if !seg.has_parent() {
            return Ok(None);
        }
        let parent = self.genome.parent().ok_or_else(|| {
            HalError::CorruptAlignment(format!(
                "top segment {} of {} links to a parent but the genome is the root",
                self.index,
                self.genome.name()
            ))
        })?;
        let bottom = parent.bottom_segment(seg.parent_index)?;
        if bottom.length != seg.length {
            return Err(HalError::CorruptAlignment(format!(
                "top segment {} of {} spans {} bases but bottom segment {} of {} spans {}",
                self.index,
                self.genome.name(),
                seg.length,
                seg.parent_index,
                parent.name(),
                bottom.length
            )));
        }
        Ok(Some(BottomSegmentIterator {
            genome: parent,
            index: seg.parent_index,
            slice_offset: map_slice(self.slice_offset, self.slice_length, seg.length, seg.parent_reversed),
            slice_length: self.slice_length,
            reversed: self.reversed ^ seg.parent_reversed,
        }))
    }

    /// Follow the paralogy cycle one step; false when there is none.
    pub fn to_next_paralogy(&mut self) -> Result<bool> {
        let seg = self.top_segment()?;
        if !seg.has_next_paralogy() {
            return Ok(false);
        }
        let next = self.genome.top_segment(seg.next_paralogy_index)?;
        if next.length != seg.length {
            return Err(HalError::CorruptAlignment(format!(
                "paralogy link {} -> {} of {} joins segments of {} and {} bases",
                self.index,
                seg.next_paralogy_index,
                self.genome.name(),
                seg.length,
                next.length
            )));
        }
        let flip = seg.parent_reversed ^ next.parent_reversed;
        self.slice_offset = map_slice(self.slice_offset, self.slice_length, seg.length, flip);
        self.reversed ^= flip;
        self.index = seg.next_paralogy_index;
        Ok(true)
    }

    /// Cross to the bottom segment of the same genome covering this
    /// slice's left end (the parse index).
    pub fn parse_down(&self) -> Result<Option<BottomSegmentIterator>> {
        let seg = self.top_segment()?;
        if seg.bottom_parse_index == NULL_INDEX {
            return Ok(None);
        }
        let bottom = self.genome.bottom_segment(seg.bottom_parse_index)?;
        let left = seg.start + self.slice_offset;
        let right = left + self.slice_length;
        let overlap_left = left.max(bottom.start);
        let overlap_right = right.min(bottom.end());
        if overlap_left >= overlap_right {
            return Err(HalError::CorruptAlignment(format!(
                "top segment {} of {} parses to bottom segment {} but they do not overlap",
                self.index,
                self.genome.name(),
                seg.bottom_parse_index
            )));
        }
        Ok(Some(BottomSegmentIterator {
            genome: self.genome.clone(),
            index: seg.bottom_parse_index,
            slice_offset: overlap_left - bottom.start,
            slice_length: overlap_right - overlap_left,
            reversed: self.reversed,
        }))
    }
}

impl BottomSegmentIterator {
    pub fn new(genome: Genome, index: SegmentIndex) -> Result<BottomSegmentIterator> {
        let count = genome.num_bottom_segments();
        if index < 0 || index as Size > count {
            return Err(HalError::out_of_range(
                format!("bottom segments of {}", genome.name()),
                index,
                count,
            ));
        }
        let mut it = BottomSegmentIterator {
            genome,
            index,
            slice_offset: 0,
            slice_length: 0,
            reversed: false,
        };
        if !it.at_end() {
            it.full_slice()?;
        }
        Ok(it)
    }

    pub fn bottom_segment(&self) -> Result<BottomSegmentData> {
        self.check_current()?;
        self.genome.bottom_segment(self.index)
    }

    fn segment_start(&self) -> Result<Size> {
        Ok(self.bottom_segment()?.start)
    }

    fn full_slice(&mut self) -> Result<()> {
        self.slice_offset = 0;
        self.slice_length = self.bottom_segment()?.length;
        Ok(())
    }

    pub fn to_site(&mut self, position: Size, slice: bool) -> Result<()> {
        self.index = self.genome.bottom_index_by_site(position)?;
        let seg = self.bottom_segment()?;
        if slice {
            self.slice_offset = position - seg.start;
            self.slice_length = 1;
        } else {
            self.slice_offset = 0;
            self.slice_length = seg.length;
        }
        Ok(())
    }

    pub fn has_child(&self, c: usize) -> Result<bool> {
        Ok(self.bottom_segment()?.child(c)?.is_set())
    }

    /// Hop down to the aligned top segment of child `c`.
    pub fn child(&self, c: usize) -> Result<Option<TopSegmentIterator>> {
        let seg = self.bottom_segment()?;
        let link = seg.child(c)?;
        if !link.is_set() {
            return Ok(None);
        }
        let child = self.genome.child(c)?;
        let top = child.top_segment(link.child_index)?;
        if top.length != seg.length {
            return Err(HalError::CorruptAlignment(format!(
                "bottom segment {} of {} spans {} bases but top segment {} of {} spans {}",
                self.index,
                self.genome.name(),
                seg.length,
                link.child_index,
                child.name(),
                top.length
            )));
        }
        Ok(Some(TopSegmentIterator {
            genome: child,
            index: link.child_index,
            slice_offset: map_slice(self.slice_offset, self.slice_length, seg.length, link.reversed),
            slice_length: self.slice_length,
            reversed: self.reversed ^ link.reversed,
        }))
    }

    /// Cross to the top segment of the same genome covering this slice's
    /// left end.
    pub fn parse_up(&self) -> Result<Option<TopSegmentIterator>> {
        let seg = self.bottom_segment()?;
        if seg.top_parse_index == NULL_INDEX {
            return Ok(None);
        }
        let top = self.genome.top_segment(seg.top_parse_index)?;
        let left = seg.start + self.slice_offset;
        let right = left + self.slice_length;
        let overlap_left = left.max(top.start);
        let overlap_right = right.min(top.end());
        if overlap_left >= overlap_right {
            return Err(HalError::CorruptAlignment(format!(
                "bottom segment {} of {} parses to top segment {} but they do not overlap",
                self.index,
                self.genome.name(),
                seg.top_parse_index
            )));
        }
        Ok(Some(TopSegmentIterator {
            genome: self.genome.clone(),
            index: seg.top_parse_index,
            slice_offset: overlap_left - top.start,
            slice_length: overlap_right - overlap_left,
            reversed: self.reversed,
        }))
    }
}
