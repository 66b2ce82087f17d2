/// Segment iterator mechanics: stepping, seeking, slicing, ordering, and
/// the cross-genome and cross-layer hops.
mod common;

use anyhow::Result;
use common::{family_alignment, paralogy_alignment, star_alignment, FORMATS};
use halign::HalError;
use pretty_assertions::assert_eq;
use tempfile::TempDir;

#[test]
fn test_stepping_and_end_sentinel() -> Result<()> {
    let dir = TempDir::new()?;
    let aln = star_alignment(&dir.path().join("s.hal"), FORMATS[0])?;
    let leaf = aln.open_genome("L")?;
    let mut it = leaf.top_segment_iterator(0)?;
    assert_eq!(it.array_index(), 0);
    assert_eq!(it.start_position()?, 0);
    assert_eq!(it.length(), 10);
    it.to_right()?;
    it.to_right()?;
    assert_eq!(it.array_index(), 2);
    assert!(!it.at_end());
    it.to_right()?;
    assert!(it.at_end());
    // the end iterator equals the one-past-last sentinel
    let end = leaf.top_segment_iterator(3)?;
    assert_eq!(it, end);
    // out-of-range construction fails eagerly
    assert!(matches!(
        leaf.top_segment_iterator(4),
        Err(HalError::OutOfRange { .. })
    ));
    Ok(())
}

#[test]
fn test_to_site_and_slicing() -> Result<()> {
    let dir = TempDir::new()?;
    let aln = star_alignment(&dir.path().join("s.hal"), FORMATS[1])?;
    let leaf = aln.open_genome("L")?;
    let mut it = leaf.top_segment_iterator(0)?;
    it.to_site(17, true)?;
    assert_eq!(it.array_index(), 1);
    assert_eq!(it.start_position()?, 17);
    assert_eq!(it.length(), 1);
    it.to_site(17, false)?;
    assert_eq!(it.start_position()?, 10);
    assert_eq!(it.length(), 10);
    Ok(())
}

#[test]
fn test_total_order() -> Result<()> {
    let dir = TempDir::new()?;
    let aln = star_alignment(&dir.path().join("s.hal"), FORMATS[0])?;
    let leaf = aln.open_genome("L")?;
    let mut a = leaf.top_segment_iterator(0)?;
    let b = leaf.top_segment_iterator(1)?;
    assert!(a < b);
    a.to_site(12, true)?;
    let mut c = leaf.top_segment_iterator(1)?;
    c.to_site(15, true)?;
    assert!(a < c); // same segment, smaller slice offset
    let mut d = c.clone();
    d.reverse();
    assert!(c < d); // orientation breaks the tie
    Ok(())
}

#[test]
fn test_reversed_walk() -> Result<()> {
    let dir = TempDir::new()?;
    let aln = star_alignment(&dir.path().join("s.hal"), FORMATS[0])?;
    let leaf = aln.open_genome("L")?;
    let mut it = leaf.top_segment_iterator(2)?;
    it.reverse();
    assert_eq!(it.start_position()?, 29); // right end on the minus strand
    it.to_right()?; // moves leftward in genome coordinates
    assert_eq!(it.array_index(), 1);
    it.to_left()?;
    assert_eq!(it.array_index(), 2);
    Ok(())
}

#[test]
fn test_parent_and_child_hops() -> Result<()> {
    for format in FORMATS {
        let dir = TempDir::new()?;
        let aln = star_alignment(&dir.path().join("s.hal"), format)?;
        let leaf = aln.open_genome("L")?;
        let root = aln.open_genome("R")?;

        let mut it = leaf.top_segment_iterator(0)?;
        it.to_site(13, true)?;
        let parent = it.parent()?.expect("segment 1 is aligned");
        assert_eq!(parent.genome().name(), "R");
        assert_eq!(parent.array_index(), 1);
        assert_eq!(parent.start_position()?, 13);
        assert!(!parent.reversed());

        let bottom = root.bottom_segment_iterator(2)?;
        let child = bottom.child(0)?.expect("child 0 is linked");
        assert_eq!(child.genome().name(), "L");
        assert_eq!(child.array_index(), 2);
    }
    Ok(())
}

#[test]
fn test_parse_hops() -> Result<()> {
    let dir = TempDir::new()?;
    let aln = family_alignment(&dir.path().join("f.hal"), FORMATS[1])?;
    let dad = aln.open_genome("dad")?;

    let mut top = dad.top_segment_iterator(0)?;
    top.to_site(34, true)?;
    let down = top.parse_down()?.expect("parse index is set");
    assert_eq!(down.array_index(), 3);
    assert_eq!(down.start_position()?, 34);
    assert_eq!(down.length(), 1);

    let bottom = dad.bottom_segment_iterator(7)?;
    let up = bottom.parse_up()?.expect("parse index is set");
    assert_eq!(up.array_index(), 7);
    assert_eq!(up.length(), 10);
    Ok(())
}

#[test]
fn test_paralogy_hop() -> Result<()> {
    for format in FORMATS {
        let dir = TempDir::new()?;
        let aln = paralogy_alignment(&dir.path().join("p.hal"), format)?;
        let child = aln.open_genome("C")?;
        let mut it = child.top_segment_iterator(0)?;
        it.to_site(4, true)?;
        assert!(it.to_next_paralogy()?);
        assert_eq!(it.array_index(), 1);
        assert_eq!(it.start_position()?, 14);
        // one more step closes the length-2 cycle
        assert!(it.to_next_paralogy()?);
        assert_eq!(it.array_index(), 0);
        assert_eq!(it.start_position()?, 4);
    }
    Ok(())
}

#[test]
fn test_dna_iterator_window() -> Result<()> {
    for format in FORMATS {
        let dir = TempDir::new()?;
        let aln = star_alignment(&dir.path().join("s.hal"), format)?;
        let leaf = aln.open_genome("L")?;
        let reference = leaf.get_string()?;

        let mut it = leaf.dna_iterator(0)?;
        assert_eq!(it.read_string(30)?, reference);
        assert!(it.at_end());

        // a reverse iterator walks the complement leftward
        let mut rev = leaf.dna_iterator(29)?;
        rev.reverse();
        let walked = rev.read_string(30)?;
        let expected: String = reference
            .chars()
            .rev()
            .map(halign::types::complement_char)
            .collect();
        assert_eq!(walked, expected);

        // writes flush through the window
        let mut w = leaf.dna_iterator(5)?;
        w.write_string("NNNN")?;
        w.flush()?;
        assert_eq!(leaf.get_sub_string(5, 4)?, "NNNN");
    }
    Ok(())
}
