/// Classification of the structural event at a breakpoint between
/// adjacent gapped runs of top segments.
///
/// The classifier compares the parent coordinates flanking the left
/// breakpoint of a run: strand flips are inversions, forward jumps are
/// deletions, order violations are transpositions, parent-sequence changes
/// are translocations. Unaligned runs are insertions unless their DNA is
/// mostly N, in which case they are treated as missing sequence.
use crate::error::Result;
use crate::gapped_iter::GappedTopSegmentIterator;
use crate::genome::Genome;
use crate::types::{SegmentIndex, Size};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RearrangementKind {
    Inversion,
    Insertion,
    Deletion,
    Duplication,
    Transposition,
    Translocation,
    Complex,
    Nothing,
}

pub struct Rearrangement {
    genome: Genome,
    gap_threshold: Size,
    n_threshold: f64,
    atomic: bool,
    kind: RearrangementKind,
    left_index: SegmentIndex,
    right_index: SegmentIndex,
}

impl Rearrangement {
    /// Classify the event whose left breakpoint sits at the start of the
    /// run containing top segment `position`.
    pub fn identify_from_left_breakpoint(
        genome: Genome,
        position: SegmentIndex,
        gap_threshold: Size,
        n_threshold: f64,
        atomic: bool,
    ) -> Result<Rearrangement> {
        let mut rea = Rearrangement {
            genome,
            gap_threshold,
            n_threshold,
            atomic,
            kind: RearrangementKind::Nothing,
            left_index: position,
            right_index: position,
        };
        rea.identify(position)?;
        Ok(rea)
    }

    pub fn kind(&self) -> RearrangementKind {
        self.kind
    }

    pub fn left_index(&self) -> SegmentIndex {
        self.left_index
    }

    pub fn right_index(&self) -> SegmentIndex {
        self.right_index
    }

    /// Advance to the run after the current one; false at the array end.
    pub fn identify_next(&mut self) -> Result<bool> {
        let next = self.right_index + 1;
        if next as Size >= self.genome.num_top_segments() {
            return Ok(false);
        }
        self.identify(next)?;
        Ok(true)
    }

    fn identify(&mut self, position: SegmentIndex) -> Result<()> {
        let base = self.genome.top_segment_iterator(position)?;
        let run = GappedTopSegmentIterator::new(base, self.gap_threshold, self.atomic)?;
        self.left_index = run.left_index();
        self.right_index = run.right_index();
        self.kind = self.classify(&run)?;
        Ok(())
    }

    fn classify(&self, run: &GappedTopSegmentIterator) -> Result<RearrangementKind> {
        let cur = match run.first_aligned()? {
            Some(seg) => seg,
            None => {
                // unaligned run: inserted sequence, or an assembly gap
                // when it is mostly N
                if self.n_fraction(run)? >= self.n_threshold {
                    return Ok(RearrangementKind::Nothing);
                }
                return Ok(RearrangementKind::Insertion);
            }
        };
        for i in run.left_index()..=run.right_index() {
            if self.genome.top_segment(i)?.has_next_paralogy() {
                return Ok(RearrangementKind::Duplication);
            }
        }
        // previous aligned segment left of the breakpoint
        let mut prev_idx = run.left_index() - 1;
        let prev = loop {
            if prev_idx < 0 {
                return Ok(RearrangementKind::Nothing); // genome edge
            }
            let seg = self.genome.top_segment(prev_idx)?;
            if seg.has_parent() {
                break seg;
            }
            prev_idx -= 1;
        };
        let parent = match self.genome.parent() {
            Some(p) => p,
            None => return Ok(RearrangementKind::Nothing),
        };
        let slot = self.genome.index_in_parent().unwrap_or(0);

        let prev_bottom = parent.bottom_segment(prev.parent_index)?;
        let cur_bottom = parent.bottom_segment(cur.parent_index)?;
        let prev_seq = parent.sequence_by_site(prev_bottom.start).map(|s| s.index());
        let cur_seq = parent.sequence_by_site(cur_bottom.start).map(|s| s.index());
        if prev_seq != cur_seq {
            return Ok(RearrangementKind::Translocation);
        }
        if prev.parent_reversed != cur.parent_reversed {
            return Ok(RearrangementKind::Inversion);
        }
        let forward = !cur.parent_reversed;
        let in_order = if forward {
            cur.parent_index > prev.parent_index
        } else {
            cur.parent_index < prev.parent_index
        };
        if !in_order {
            return Ok(RearrangementKind::Transposition);
        }
        // deleted parent bases between the two runs
        let (lo, hi) = if prev.parent_index < cur.parent_index {
            (prev.parent_index, cur.parent_index)
        } else {
            (cur.parent_index, prev.parent_index)
        };
        let mut deleted = 0;
        for i in lo + 1..hi {
            let between = parent.bottom_segment(i)?;
            if between.child(slot)?.is_set() {
                // the skipped parent region aligns back into this genome
                return Ok(RearrangementKind::Complex);
            }
            deleted += between.length;
        }
        if deleted > self.gap_threshold {
            return Ok(RearrangementKind::Deletion);
        }
        Ok(RearrangementKind::Nothing)
    }

    /// Fraction of N bases over the run's span; 0 when the genome stores
    /// no DNA.
    fn n_fraction(&self, run: &GappedTopSegmentIterator) -> Result<f64> {
        if !self.genome.contains_dna_array() {
            return Ok(0.0);
        }
        let span = run.span_length()?;
        if span == 0 {
            return Ok(0.0);
        }
        let left = self.genome.top_segment(run.left_index())?;
        let dna = self.genome.get_sub_string(left.start, span)?;
        let ns = dna.chars().filter(|&c| c == 'N').count();
        Ok(ns as f64 / span as f64)
    }
}
