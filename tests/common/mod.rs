#![allow(dead_code)]
/// Shared builders for synthetic alignments used across the test suite.
use anyhow::Result;
use halign::{
    open_alignment, AccessMode, Alignment, BottomSegmentData, ChildLink, Format, OpenOptions,
    SequenceInfo, TopSegmentData, NULL_INDEX,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

pub const FORMATS: [Format; 2] = [Format::Hdf5Like, Format::Mmap];

/// Generate a stable random DNA sequence with a fixed seed.
pub fn random_dna(length: usize, seed: u64) -> String {
    let mut rng = StdRng::seed_from_u64(seed);
    let bases = ['A', 'C', 'G', 'T'];
    (0..length).map(|_| bases[rng.gen_range(0..4)]).collect()
}

pub fn create(path: &std::path::Path, format: Format) -> Result<Alignment> {
    let options = OpenOptions {
        format: Some(format),
        ..Default::default()
    };
    Ok(open_alignment(
        path.to_str().unwrap(),
        &options,
        AccessMode::Create,
        None,
    )?)
}

/// Root `R` over one child `L`, both 30 bases long, three segments of ten
/// mapping one-to-one.
pub fn star_alignment(path: &std::path::Path, format: Format) -> Result<Alignment> {
    let aln = create(path, format)?;
    let root = aln.add_root_genome("R")?;
    let leaf = aln.add_leaf_genome("L", "R", 0.1)?;
    leaf.set_dimensions(&[SequenceInfo::new("seq", 30, 3, 0)])?;
    root.set_dimensions(&[SequenceInfo::new("seq", 30, 0, 3)])?;
    let dna = random_dna(30, 7);
    root.set_string(&dna)?;
    leaf.set_string(&dna)?;
    for i in 0..3i64 {
        leaf.set_top_segment(
            i,
            &TopSegmentData {
                start: i as u64 * 10,
                length: 10,
                parent_index: i,
                parent_reversed: false,
                bottom_parse_index: NULL_INDEX,
                next_paralogy_index: NULL_INDEX,
            },
        )?;
        root.set_bottom_segment(
            i,
            &BottomSegmentData {
                start: i as u64 * 10,
                length: 10,
                top_parse_index: NULL_INDEX,
                children: vec![ChildLink {
                    child_index: i,
                    reversed: false,
                }],
            },
        )?;
    }
    aln.write()?;
    Ok(aln)
}

/// Four genomes (grandpa, dad, son1, son2), each 100 bases in ten
/// segments of ten, identity mapping throughout.
pub fn family_alignment(path: &std::path::Path, format: Format) -> Result<Alignment> {
    let aln = create(path, format)?;
    let grandpa = aln.add_root_genome("grandpa")?;
    let dad = aln.add_leaf_genome("dad", "grandpa", 1e-10)?;
    let son1 = aln.add_leaf_genome("son1", "dad", 1e-10)?;
    let son2 = aln.add_leaf_genome("son2", "dad", 1e-10)?;

    son1.set_dimensions(&[SequenceInfo::new("seq", 100, 10, 0)])?;
    son2.set_dimensions(&[SequenceInfo::new("seq", 100, 10, 0)])?;
    dad.set_dimensions(&[SequenceInfo::new("seq", 100, 10, 10)])?;
    grandpa.set_dimensions(&[SequenceInfo::new("seq", 100, 0, 10)])?;

    let dna = random_dna(100, 11);
    for genome in [&grandpa, &dad, &son1, &son2] {
        genome.set_string(&dna)?;
    }

    for i in 0..10i64 {
        let start = i as u64 * 10;
        for son in [&son1, &son2] {
            son.set_top_segment(
                i,
                &TopSegmentData {
                    start,
                    length: 10,
                    parent_index: i,
                    parent_reversed: false,
                    bottom_parse_index: NULL_INDEX,
                    next_paralogy_index: NULL_INDEX,
                },
            )?;
        }
        dad.set_top_segment(
            i,
            &TopSegmentData {
                start,
                length: 10,
                parent_index: i,
                parent_reversed: false,
                bottom_parse_index: i,
                next_paralogy_index: NULL_INDEX,
            },
        )?;
        dad.set_bottom_segment(
            i,
            &BottomSegmentData {
                start,
                length: 10,
                top_parse_index: i,
                children: vec![
                    ChildLink {
                        child_index: i,
                        reversed: false,
                    },
                    ChildLink {
                        child_index: i,
                        reversed: false,
                    },
                ],
            },
        )?;
        grandpa.set_bottom_segment(
            i,
            &BottomSegmentData {
                start,
                length: 10,
                top_parse_index: NULL_INDEX,
                children: vec![ChildLink {
                    child_index: i,
                    reversed: false,
                }],
            },
        )?;
    }
    aln.write()?;
    Ok(aln)
}

/// Parent `P` (10 bases) whose child `C` (20 bases) carries two copies of
/// the parent region: a length-2 paralogy cycle.
pub fn paralogy_alignment(path: &std::path::Path, format: Format) -> Result<Alignment> {
    let aln = create(path, format)?;
    let parent = aln.add_root_genome("P")?;
    let child = aln.add_leaf_genome("C", "P", 0.2)?;
    child.set_dimensions(&[SequenceInfo::new("seq", 20, 2, 0)])?;
    parent.set_dimensions(&[SequenceInfo::new("seq", 10, 0, 1)])?;
    let unit = random_dna(10, 23);
    parent.set_string(&unit)?;
    child.set_string(&format!("{unit}{unit}"))?;
    child.set_top_segment(
        0,
        &TopSegmentData {
            start: 0,
            length: 10,
            parent_index: 0,
            parent_reversed: false,
            bottom_parse_index: NULL_INDEX,
            next_paralogy_index: 1,
        },
    )?;
    child.set_top_segment(
        1,
        &TopSegmentData {
            start: 10,
            length: 10,
            parent_index: 0,
            parent_reversed: false,
            bottom_parse_index: NULL_INDEX,
            next_paralogy_index: 0,
        },
    )?;
    parent.set_bottom_segment(
        0,
        &BottomSegmentData {
            start: 0,
            length: 10,
            top_parse_index: NULL_INDEX,
            children: vec![ChildLink {
                child_index: 0,
                reversed: false,
            }],
        },
    )?;
    aln.write()?;
    Ok(aln)
}

/// Root `R` (20 bases, two segments) over child `L` (30 bases) with an
/// unaligned 10-base stretch between the two aligned child segments.
pub fn insertion_alignment(path: &std::path::Path, format: Format) -> Result<Alignment> {
    let aln = create(path, format)?;
    let root = aln.add_root_genome("R")?;
    let leaf = aln.add_leaf_genome("L", "R", 0.1)?;
    leaf.set_dimensions(&[SequenceInfo::new("seq", 30, 3, 0)])?;
    root.set_dimensions(&[SequenceInfo::new("seq", 20, 0, 2)])?;
    root.set_string(&random_dna(20, 31))?;
    leaf.set_string(&random_dna(30, 37))?;
    leaf.set_top_segment(
        0,
        &TopSegmentData {
            start: 0,
            length: 10,
            parent_index: 0,
            parent_reversed: false,
            bottom_parse_index: NULL_INDEX,
            next_paralogy_index: NULL_INDEX,
        },
    )?;
    leaf.set_top_segment(1, &TopSegmentData::unaligned(10, 10))?;
    leaf.set_top_segment(
        2,
        &TopSegmentData {
            start: 20,
            length: 10,
            parent_index: 1,
            parent_reversed: false,
            bottom_parse_index: NULL_INDEX,
            next_paralogy_index: NULL_INDEX,
        },
    )?;
    root.set_bottom_segment(
        0,
        &BottomSegmentData {
            start: 0,
            length: 10,
            top_parse_index: NULL_INDEX,
            children: vec![ChildLink {
                child_index: 0,
                reversed: false,
            }],
        },
    )?;
    root.set_bottom_segment(
        1,
        &BottomSegmentData {
            start: 10,
            length: 10,
            top_parse_index: NULL_INDEX,
            children: vec![ChildLink {
                child_index: 2,
                reversed: false,
            }],
        },
    )?;
    aln.write()?;
    Ok(aln)
}

/// A random two-genome alignment: the child's segments alternate between
/// aligned (forward or reversed) and unaligned, always covering both
/// genomes exactly. Deterministic for a given seed.
pub fn random_alignment(path: &std::path::Path, format: Format, seed: u64) -> Result<Alignment> {
    let mut rng = StdRng::seed_from_u64(seed);
    let num_segments = rng.gen_range(4..12) as i64;
    let seg_len = rng.gen_range(3..9) as u64;
    let total = num_segments as u64 * seg_len;

    let aln = create(path, format)?;
    let root = aln.add_root_genome("root")?;
    let leaf = aln.add_leaf_genome("leaf", "root", 0.5)?;
    leaf.set_dimensions(&[SequenceInfo::new("seq", total, num_segments as u64, 0)])?;
    root.set_dimensions(&[SequenceInfo::new("seq", total, 0, num_segments as u64)])?;
    root.set_string(&random_dna(total as usize, seed ^ 1))?;
    leaf.set_string(&random_dna(total as usize, seed ^ 2))?;

    // a random permutation of parent slots keeps links one-to-one
    let mut slots: Vec<i64> = (0..num_segments).collect();
    for i in (1..slots.len()).rev() {
        slots.swap(i, rng.gen_range(0..=i));
    }
    let mut children = vec![ChildLink { child_index: NULL_INDEX, reversed: false }; num_segments as usize];
    for i in 0..num_segments {
        let start = i as u64 * seg_len;
        if rng.gen_bool(0.25) {
            leaf.set_top_segment(i, &TopSegmentData::unaligned(start, seg_len))?;
        } else {
            let parent = slots[i as usize];
            let reversed = rng.gen_bool(0.5);
            leaf.set_top_segment(
                i,
                &TopSegmentData {
                    start,
                    length: seg_len,
                    parent_index: parent,
                    parent_reversed: reversed,
                    bottom_parse_index: NULL_INDEX,
                    next_paralogy_index: NULL_INDEX,
                },
            )?;
            children[parent as usize] = ChildLink {
                child_index: i,
                reversed,
            };
        }
    }
    for i in 0..num_segments {
        root.set_bottom_segment(
            i,
            &BottomSegmentData {
                start: i as u64 * seg_len,
                length: seg_len,
                top_parse_index: NULL_INDEX,
                children: vec![children[i as usize]],
            },
        )?;
    }
    aln.write()?;
    Ok(aln)
}
