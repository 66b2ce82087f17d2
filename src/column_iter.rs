/// The homologous-column walk.
///
/// One step of the iterator owns one reference base and produces the set
/// of positions in every reachable genome aligned to it. The walk spreads
/// from the reference cursor through three kinds of hops: up a parent
/// link, down each child link, and around a paralogy cycle. A visited set
/// keyed by (genome, array index, orientation) stops re-entry; the tree is
/// acyclic and paralogy cycles are finite, so the walk terminates.
/// Orientation composes by XOR on every hop that carries a reversed flag.
use crate::error::{HalError, Result};
use crate::genome::Genome;
use crate::types::{SegmentIndex, Size, NULL_INDEX};
use std::collections::{BTreeMap, HashMap, HashSet};

/// Construction options; the defaults match a plain whole-tree walk.
#[derive(Debug, Clone, Default)]
pub struct ColumnOptions {
    /// Restrict returned entries to these genomes; absent means all
    /// reachable. The reference genome is always reported.
    pub targets: Option<Vec<String>>,
    /// Longest unaligned span the walk may pull into a column when it
    /// crosses one while hopping between genomes. Zero never follows any
    /// unaligned span.
    pub max_insert_length: Size,
    /// Do not expand through paralogy cycles.
    pub no_dupes: bool,
    /// Drop entries whose genome is internal to the tree.
    pub no_ancestors: bool,
    /// Walk the reference on its reverse complement.
    pub reverse_strand: bool,
    /// Keep at most one entry per genome in each column.
    pub unique: bool,
    /// Follow only single parent links: no paralogs anywhere, and no
    /// sibling spread after an up-hop.
    pub only_orthologs: bool,
}

/// Key of one column entry: the owning genome and sequence by name, so
/// column maps order identically whichever backend produced them.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct SequenceKey {
    pub genome: String,
    pub sequence: String,
}

/// One DNA cursor inside a column; `position` is sequence-relative.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnPosition {
    pub position: Size,
    pub reversed: bool,
}

pub type ColumnMap = BTreeMap<SequenceKey, Vec<ColumnPosition>>;

#[derive(Clone, Copy, PartialEq, Eq)]
enum Origin {
    Reference,
    Up,
    Down,
    Paralog,
    Insert,
}

struct Node {
    genome: usize,
    pos: Size,
    reversed: bool,
    origin: Origin,
}

pub struct ColumnIterator {
    reference: Genome,
    cursor: i64,
    first: i64,
    last: i64,
    dir: i64,
    targets: Option<HashSet<usize>>,
    opts: ColumnOptions,
    column: ColumnMap,
    ended: bool,
    // per-column traversal state
    visited_top: HashSet<(usize, SegmentIndex, bool)>,
    visited_bottom: HashSet<(usize, SegmentIndex, bool)>,
    seen_positions: HashSet<(usize, Size)>,
    genome_entries: HashMap<usize, usize>,
    // (genome, segment index, is_top_layer); spans already pulled into an
    // earlier column are never re-emitted
    emitted_spans: HashSet<(usize, SegmentIndex, bool)>,
}

impl std::fmt::Debug for ColumnIterator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ColumnIterator")
            .field("cursor", &self.cursor)
            .field("first", &self.first)
            .field("last", &self.last)
            .field("ended", &self.ended)
            .finish_non_exhaustive()
    }
}

impl ColumnIterator {
    /// Bounds are checked eagerly; a query outside the reference fails
    /// before the first column is computed.
    pub fn new(
        reference: Genome,
        position: Size,
        last_position: Option<Size>,
        options: &ColumnOptions,
    ) -> Result<ColumnIterator> {
        let len = reference.sequence_length();
        let last = last_position.map_or(len.saturating_sub(1) as i64, |l| l as i64);
        if position as i64 >= len as i64 || last >= len as i64 || last < position as i64 {
            return Err(HalError::OutOfRange {
                what: format!(
                    "column iterator of {}: input indices ({position}, {last})",
                    reference.name()
                ),
                index: last.max(position as i64),
                size: len,
            });
        }
        let targets = match &options.targets {
            None => None,
            Some(names) => {
                let data = reference.data.borrow();
                let mut ids = HashSet::new();
                for name in names {
                    let id = data
                        .tree
                        .id_by_name(name)
                        .ok_or_else(|| HalError::NotFound(format!("target genome {name}")))?;
                    ids.insert(id);
                }
                ids.insert(reference.id);
                drop(data);
                Some(ids)
            }
        };
        let (cursor, dir) = if options.reverse_strand {
            (last, -1)
        } else {
            (position as i64, 1)
        };
        let mut it = ColumnIterator {
            reference,
            cursor,
            first: position as i64,
            last,
            dir,
            targets,
            opts: options.clone(),
            column: ColumnMap::new(),
            ended: false,
            visited_top: HashSet::new(),
            visited_bottom: HashSet::new(),
            seen_positions: HashSet::new(),
            genome_entries: HashMap::new(),
            emitted_spans: HashSet::new(),
        };
        it.recompute()?;
        Ok(it)
    }

    pub fn column(&self) -> &ColumnMap {
        &self.column
    }

    /// Current reference position (genome coordinates).
    pub fn reference_position(&self) -> i64 {
        self.cursor
    }

    pub fn at_end(&self) -> bool {
        self.ended
    }

    /// Advance the reference by one base along the chosen strand,
    /// discarding the previous column and recomputing.
    pub fn to_right(&mut self) -> Result<()> {
        if self.ended {
            return Ok(());
        }
        self.cursor += self.dir;
        if self.cursor < self.first || self.cursor > self.last {
            self.ended = true;
            self.column.clear();
            return Ok(());
        }
        self.recompute()
    }

    fn genome(&self, id: usize) -> Genome {
        Genome::new(self.reference.data.clone(), id)
    }

    fn recompute(&mut self) -> Result<()> {
        self.column.clear();
        self.visited_top.clear();
        self.visited_bottom.clear();
        self.seen_positions.clear();
        self.genome_entries.clear();
        let mut stack = vec![Node {
            genome: self.reference.id,
            pos: self.cursor as Size,
            reversed: self.opts.reverse_strand,
            origin: Origin::Reference,
        }];
        while let Some(node) = stack.pop() {
            self.add_entry(&node)?;
            self.expand(&node, &mut stack)?;
        }
        Ok(())
    }

    /// Entry filters restrict what a column reports; the walk itself keeps
    /// spreading through filtered genomes.
    fn add_entry(&mut self, node: &Node) -> Result<()> {
        if !self.seen_positions.insert((node.genome, node.pos)) {
            return Ok(());
        }
        let genome = self.genome(node.genome);
        if let Some(targets) = &self.targets {
            if !targets.contains(&node.genome) {
                return Ok(());
            }
        }
        if self.opts.no_ancestors && node.genome != self.reference.id && !genome.is_leaf() {
            return Ok(());
        }
        if self.opts.unique && self.genome_entries.get(&node.genome).copied().unwrap_or(0) > 0 {
            return Ok(());
        }
        let sequence = genome.sequence_by_site(node.pos).ok_or_else(|| {
            HalError::CorruptAlignment(format!(
                "position {} of {} belongs to no sequence",
                node.pos,
                genome.name()
            ))
        })?;
        let key = SequenceKey {
            genome: genome.name(),
            sequence: sequence.name(),
        };
        self.column.entry(key).or_default().push(ColumnPosition {
            position: node.pos - sequence.start(),
            reversed: node.reversed,
        });
        *self.genome_entries.entry(node.genome).or_insert(0) += 1;
        Ok(())
    }

    fn expand(&mut self, node: &Node, stack: &mut Vec<Node>) -> Result<()> {
        let genome = self.genome(node.genome);
        if genome.num_top_segments() > 0 {
            self.expand_up(node, &genome, stack)?;
        }
        let block_down = self.opts.only_orthologs && node.origin == Origin::Up;
        if genome.num_bottom_segments() > 0 && !block_down {
            self.expand_down(node, &genome, stack)?;
        }
        Ok(())
    }

    fn expand_up(&mut self, node: &Node, genome: &Genome, stack: &mut Vec<Node>) -> Result<()> {
        let t_idx = genome.top_index_by_site(node.pos)?;
        if !self.visited_top.insert((node.genome, t_idx, node.reversed)) {
            return Ok(());
        }
        let t = genome.top_segment(t_idx)?;
        if !(self.opts.no_dupes || self.opts.only_orthologs) && t.has_next_paralogy() {
            self.expand_paralogy(node, genome, t_idx, stack)?;
        }
        if !t.has_parent() {
            return Ok(());
        }
        let parent = genome.parent().ok_or_else(|| {
            HalError::CorruptAlignment(format!(
                "top segment {t_idx} of {} has a parent link but the genome is the root",
                genome.name()
            ))
        })?;
        let b = parent.bottom_segment(t.parent_index)?;
        let slot = genome.index_in_parent().ok_or_else(|| {
            HalError::CorruptAlignment(format!(
                "{} is not among the children of {}",
                genome.name(),
                parent.name()
            ))
        })?;
        let link = b.child(slot)?;
        // the parent back-links one member of a paralogy cycle; any other
        // member is legitimate as long as the cycle contains the one
        // back-linked
        let reciprocal = if link.child_index == t_idx {
            link.reversed == t.parent_reversed
        } else {
            self.cycle_contains(genome, t_idx, link.child_index)?
        };
        if !reciprocal || b.length != t.length {
            return Err(HalError::CorruptAlignment(format!(
                "top segment {t_idx} of {} and bottom segment {} of {} do not reciprocate \
                 (back-link {}, reversed {}/{}, lengths {}/{})",
                genome.name(),
                t.parent_index,
                parent.name(),
                link.child_index,
                t.parent_reversed,
                link.reversed,
                t.length,
                b.length
            )));
        }
        let off = node.pos - t.start;
        let ppos = if t.parent_reversed {
            b.start + b.length - 1 - off
        } else {
            b.start + off
        };
        if self.opts.max_insert_length > 0 {
            self.queue_unaligned_span(&parent, t.parent_index, false, Some(slot), node.reversed ^ t.parent_reversed, stack)?;
        }
        stack.push(Node {
            genome: parent.id,
            pos: ppos,
            reversed: node.reversed ^ t.parent_reversed,
            origin: Origin::Up,
        });
        Ok(())
    }

    /// Does the paralogy cycle through `from` pass through `needle`?
    fn cycle_contains(&self, genome: &Genome, from: SegmentIndex, needle: SegmentIndex) -> Result<bool> {
        let num_top = genome.num_top_segments();
        let mut cur = genome.top_segment(from)?.next_paralogy_index;
        let mut steps: Size = 0;
        while cur != from && cur != NULL_INDEX && steps < num_top {
            if cur == needle {
                return Ok(true);
            }
            cur = genome.top_segment(cur)?.next_paralogy_index;
            steps += 1;
        }
        Ok(false)
    }

    fn expand_paralogy(
        &mut self,
        node: &Node,
        genome: &Genome,
        t_idx: SegmentIndex,
        stack: &mut Vec<Node>,
    ) -> Result<()> {
        let t = genome.top_segment(t_idx)?;
        let num_top = genome.num_top_segments();
        let off = node.pos - t.start;
        // offset in the shared parent frame
        let poff = if t.parent_reversed {
            t.length - 1 - off
        } else {
            off
        };
        let mut cur_idx = t.next_paralogy_index;
        let mut steps: Size = 0;
        while cur_idx != t_idx {
            if cur_idx == NULL_INDEX || steps >= num_top {
                return Err(HalError::CorruptAlignment(format!(
                    "paralogy cycle from top segment {t_idx} of {} does not close",
                    genome.name()
                )));
            }
            steps += 1;
            let t2 = genome.top_segment(cur_idx)?;
            if t2.length != t.length {
                return Err(HalError::CorruptAlignment(format!(
                    "paralogy cycle members {t_idx} and {cur_idx} of {} span {} and {} bases",
                    genome.name(),
                    t.length,
                    t2.length
                )));
            }
            let off2 = if t2.parent_reversed {
                t2.length - 1 - poff
            } else {
                poff
            };
            let rev2 = node.reversed ^ t.parent_reversed ^ t2.parent_reversed;
            if self.visited_top.insert((node.genome, cur_idx, rev2)) {
                stack.push(Node {
                    genome: node.genome,
                    pos: t2.start + off2,
                    reversed: rev2,
                    origin: Origin::Paralog,
                });
            }
            cur_idx = t2.next_paralogy_index;
        }
        Ok(())
    }

    fn expand_down(&mut self, node: &Node, genome: &Genome, stack: &mut Vec<Node>) -> Result<()> {
        let b_idx = genome.bottom_index_by_site(node.pos)?;
        if !self.visited_bottom.insert((node.genome, b_idx, node.reversed)) {
            return Ok(());
        }
        let b = genome.bottom_segment(b_idx)?;
        for (c, link) in b.children.iter().enumerate() {
            if !link.is_set() {
                continue;
            }
            let child = genome.child(c)?;
            let t = child.top_segment(link.child_index)?;
            if t.parent_index != b_idx || t.parent_reversed != link.reversed || t.length != b.length {
                return Err(HalError::CorruptAlignment(format!(
                    "bottom segment {b_idx} of {} and top segment {} of {} do not reciprocate \
                     (back-link {}, reversed {}/{}, lengths {}/{})",
                    genome.name(),
                    link.child_index,
                    child.name(),
                    t.parent_index,
                    link.reversed,
                    t.parent_reversed,
                    b.length,
                    t.length
                )));
            }
            let off = node.pos - b.start;
            let cpos = if link.reversed {
                t.start + t.length - 1 - off
            } else {
                t.start + off
            };
            let crev = node.reversed ^ link.reversed;
            if self.opts.max_insert_length > 0 {
                self.queue_unaligned_span(&child, link.child_index, true, None, crev, stack)?;
            }
            stack.push(Node {
                genome: child.id,
                pos: cpos,
                reversed: crev,
                origin: Origin::Down,
            });
        }
        Ok(())
    }

    /// Pull an adjacent unaligned span into the column, bounded by the
    /// insertion budget. The span sits behind the landing segment in walk
    /// order: insertions in a child (segments with no parent link) and
    /// deletions in a parent (segments with no link to the child we
    /// ascended from). Each span is charged against the budget on its own
    /// branch and emitted at most once over the iterator's life.
    fn queue_unaligned_span(
        &mut self,
        genome: &Genome,
        landing: SegmentIndex,
        top_layer: bool,
        child_slot: Option<usize>,
        reversed: bool,
        stack: &mut Vec<Node>,
    ) -> Result<()> {
        let count = if top_layer {
            genome.num_top_segments()
        } else {
            genome.num_bottom_segments()
        } as SegmentIndex;
        let unaligned = |data: &Genome, i: SegmentIndex| -> Result<Option<(Size, Size)>> {
            if top_layer {
                let seg = data.top_segment(i)?;
                Ok((!seg.has_parent()).then_some((seg.start, seg.length)))
            } else {
                let seg = data.bottom_segment(i)?;
                let aligned = match child_slot {
                    Some(slot) => seg.child(slot)?.is_set(),
                    None => true,
                };
                Ok((!aligned).then_some((seg.start, seg.length)))
            }
        };
        // scan behind the landing segment in walk order
        let step = -self.dir;
        let mut span: Size = 0;
        let mut segments = Vec::new();
        let mut i = landing + step;
        while i >= 0 && i < count {
            match unaligned(genome, i)? {
                Some((start, length)) => {
                    span += length;
                    if span > self.opts.max_insert_length {
                        return Ok(()); // too long: the branch is truncated here
                    }
                    segments.push((i, start, length));
                    i += step;
                }
                None => break,
            }
        }
        for (idx, start, length) in segments {
            if !self.emitted_spans.insert((genome.id, idx, top_layer)) {
                continue;
            }
            for pos in start..start + length {
                stack.push(Node {
                    genome: genome.id,
                    pos,
                    reversed,
                    origin: Origin::Insert,
                });
            }
        }
        Ok(())
    }
}
