/// Segment records and their on-disk encoding.
///
/// Both backends persist segments with the same little-endian record
/// layout; only the container differs. Bottom segments carry one child
/// slot per child of the owning genome, so their stride depends on the
/// genome's child count.
use crate::error::{HalError, Result};
use crate::types::{SegmentIndex, Size, NULL_INDEX};
use byteorder::{ByteOrder, LittleEndian};

/// start + length + parent + reversed + parse + paralogy
pub const TOP_SEGMENT_LEN: usize = 8 + 8 + 8 + 1 + 8 + 8;

/// start + length + parse, before the child slots
const BOTTOM_FIXED_LEN: usize = 8 + 8 + 8;
const CHILD_SLOT_LEN: usize = 9;

/// A range of a child genome aligned up to a region of its parent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TopSegmentData {
    pub start: Size,
    pub length: Size,
    /// Index of the aligned bottom segment in the parent, or NULL_INDEX.
    pub parent_index: SegmentIndex,
    pub parent_reversed: bool,
    /// Bottom segment of the same genome covering `start`, or NULL_INDEX.
    pub bottom_parse_index: SegmentIndex,
    /// Next member of this segment's paralogy cycle, or NULL_INDEX.
    pub next_paralogy_index: SegmentIndex,
}

impl TopSegmentData {
    pub fn unaligned(start: Size, length: Size) -> TopSegmentData {
        TopSegmentData {
            start,
            length,
            parent_index: NULL_INDEX,
            parent_reversed: false,
            bottom_parse_index: NULL_INDEX,
            next_paralogy_index: NULL_INDEX,
        }
    }

    pub fn has_parent(&self) -> bool {
        self.parent_index != NULL_INDEX
    }

    pub fn has_next_paralogy(&self) -> bool {
        self.next_paralogy_index != NULL_INDEX
    }

    pub fn end(&self) -> Size {
        self.start + self.length
    }

    pub fn encode(&self, out: &mut [u8]) {
        LittleEndian::write_u64(&mut out[0..8], self.start);
        LittleEndian::write_u64(&mut out[8..16], self.length);
        LittleEndian::write_i64(&mut out[16..24], self.parent_index);
        out[24] = self.parent_reversed as u8;
        LittleEndian::write_i64(&mut out[25..33], self.bottom_parse_index);
        LittleEndian::write_i64(&mut out[33..41], self.next_paralogy_index);
    }

    pub fn decode(buf: &[u8]) -> TopSegmentData {
        TopSegmentData {
            start: LittleEndian::read_u64(&buf[0..8]),
            length: LittleEndian::read_u64(&buf[8..16]),
            parent_index: LittleEndian::read_i64(&buf[16..24]),
            parent_reversed: buf[24] != 0,
            bottom_parse_index: LittleEndian::read_i64(&buf[25..33]),
            next_paralogy_index: LittleEndian::read_i64(&buf[33..41]),
        }
    }
}

/// One child slot of a bottom segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChildLink {
    /// Top segment index in the child genome, or NULL_INDEX.
    pub child_index: SegmentIndex,
    pub reversed: bool,
}

impl ChildLink {
    pub fn null() -> ChildLink {
        ChildLink {
            child_index: NULL_INDEX,
            reversed: false,
        }
    }

    pub fn is_set(&self) -> bool {
        self.child_index != NULL_INDEX
    }
}

/// A range of a parent genome aligned down to one region in each child.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BottomSegmentData {
    pub start: Size,
    pub length: Size,
    /// Top segment of the same genome covering `start`, or NULL_INDEX.
    pub top_parse_index: SegmentIndex,
    pub children: Vec<ChildLink>,
}

impl BottomSegmentData {
    pub fn unaligned(start: Size, length: Size, num_children: usize) -> BottomSegmentData {
        BottomSegmentData {
            start,
            length,
            top_parse_index: NULL_INDEX,
            children: vec![ChildLink::null(); num_children],
        }
    }

    pub fn end(&self) -> Size {
        self.start + self.length
    }

    pub fn child(&self, c: usize) -> Result<ChildLink> {
        self.children.get(c).copied().ok_or_else(|| {
            HalError::out_of_range("bottom segment child slot", c as i64, self.children.len() as u64)
        })
    }

    /// Record stride for a genome with `num_children` children.
    pub fn record_len(num_children: usize) -> usize {
        BOTTOM_FIXED_LEN + CHILD_SLOT_LEN * num_children
    }

    pub fn encode(&self, out: &mut [u8]) {
        LittleEndian::write_u64(&mut out[0..8], self.start);
        LittleEndian::write_u64(&mut out[8..16], self.length);
        LittleEndian::write_i64(&mut out[16..24], self.top_parse_index);
        for (c, link) in self.children.iter().enumerate() {
            let at = BOTTOM_FIXED_LEN + c * CHILD_SLOT_LEN;
            LittleEndian::write_i64(&mut out[at..at + 8], link.child_index);
            out[at + 8] = link.reversed as u8;
        }
    }

    pub fn decode(buf: &[u8], num_children: usize) -> BottomSegmentData {
        let mut children = Vec::with_capacity(num_children);
        for c in 0..num_children {
            let at = BOTTOM_FIXED_LEN + c * CHILD_SLOT_LEN;
            children.push(ChildLink {
                child_index: LittleEndian::read_i64(&buf[at..at + 8]),
                reversed: buf[at + 8] != 0,
            });
        }
        BottomSegmentData {
            start: LittleEndian::read_u64(&buf[0..8]),
            length: LittleEndian::read_u64(&buf[8..16]),
            top_parse_index: LittleEndian::read_i64(&buf[16..24]),
            children,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_top_segment_roundtrip() {
        let seg = TopSegmentData {
            start: 100,
            length: 50,
            parent_index: 7,
            parent_reversed: true,
            bottom_parse_index: NULL_INDEX,
            next_paralogy_index: 3,
        };
        let mut buf = [0u8; TOP_SEGMENT_LEN];
        seg.encode(&mut buf);
        assert_eq!(TopSegmentData::decode(&buf), seg);
    }

    #[test]
    fn test_bottom_segment_roundtrip() {
        let mut seg = BottomSegmentData::unaligned(10, 20, 3);
        seg.top_parse_index = 2;
        seg.children[1] = ChildLink {
            child_index: 42,
            reversed: true,
        };
        let mut buf = vec![0u8; BottomSegmentData::record_len(3)];
        seg.encode(&mut buf);
        assert_eq!(BottomSegmentData::decode(&buf, 3), seg);
        assert!(seg.child(1).unwrap().is_set());
        assert!(!seg.child(0).unwrap().is_set());
        assert!(seg.child(5).is_err());
    }
}
