/// Column iterator scenarios: star and four-genome trees, paralogy
/// filters, insertion budgets, strand and entry filters.
mod common;

use anyhow::Result;
use common::{
    family_alignment, insertion_alignment, paralogy_alignment, star_alignment, FORMATS,
};
use halign::{ColumnOptions, HalError};
use pretty_assertions::assert_eq;
use tempfile::TempDir;

#[test]
fn test_star_columns() -> Result<()> {
    for format in FORMATS {
        let dir = TempDir::new()?;
        let aln = star_alignment(&dir.path().join("star.hal"), format)?;
        let leaf = aln.open_genome("L")?;
        let mut it = leaf.column_iterator(0, None, &ColumnOptions::default())?;
        for column_number in 0..30u64 {
            assert!(!it.at_end());
            let col = it.column();
            assert_eq!(col.len(), 2, "column {column_number} genome count");
            for (key, positions) in col {
                assert_eq!(positions.len(), 1, "column {column_number} of {key:?}");
                assert_eq!(positions[0].position, column_number);
                assert!(!positions[0].reversed);
            }
            it.to_right()?;
        }
        assert!(it.at_end());
    }
    Ok(())
}

#[test]
fn test_family_columns_from_every_genome() -> Result<()> {
    for format in FORMATS {
        let dir = TempDir::new()?;
        let aln = family_alignment(&dir.path().join("family.hal"), format)?;
        for name in ["grandpa", "dad", "son1", "son2"] {
            let genome = aln.open_genome(name)?;
            let mut it = genome.column_iterator(0, None, &ColumnOptions::default())?;
            for column_number in 0..100u64 {
                let col = it.column();
                assert_eq!(col.len(), 4, "reference {name}, column {column_number}");
                for (key, positions) in col {
                    assert_eq!(positions.len(), 1);
                    assert_eq!(
                        positions[0].position, column_number,
                        "reference {name}, column {column_number}, entry {key:?}"
                    );
                }
                it.to_right()?;
            }
            assert!(it.at_end());
        }
    }
    Ok(())
}

#[test]
fn test_last_position_bounds_walk() -> Result<()> {
    let dir = TempDir::new()?;
    let aln = star_alignment(&dir.path().join("star.hal"), FORMATS[0])?;
    let leaf = aln.open_genome("L")?;
    let mut it = leaf.column_iterator(5, Some(9), &ColumnOptions::default())?;
    let mut count = 0;
    while !it.at_end() {
        count += 1;
        it.to_right()?;
    }
    assert_eq!(count, 5);
    Ok(())
}

#[test]
fn test_out_of_range_is_eager() -> Result<()> {
    let dir = TempDir::new()?;
    let aln = star_alignment(&dir.path().join("star.hal"), FORMATS[1])?;
    let leaf = aln.open_genome("L")?;
    for (position, last) in [(30, None), (0, Some(30)), (10, Some(5))] {
        match leaf.column_iterator(position, last, &ColumnOptions::default()) {
            Err(HalError::OutOfRange { .. }) => {}
            other => panic!("expected OutOfRange for ({position}, {last:?}), got {other:?}"),
        }
    }
    Ok(())
}

#[test]
fn test_paralogy_expansion_and_no_dupes() -> Result<()> {
    for format in FORMATS {
        let dir = TempDir::new()?;
        let aln = paralogy_alignment(&dir.path().join("dup.hal"), format)?;
        let parent = aln.open_genome("P")?;

        // both copies by default
        let it = parent.column_iterator(3, Some(3), &ColumnOptions::default())?;
        let child_positions: Vec<u64> = it
            .column()
            .iter()
            .filter(|(k, _)| k.genome == "C")
            .flat_map(|(_, v)| v.iter().map(|p| p.position))
            .collect();
        assert_eq!(child_positions, vec![3, 13]);

        // a single copy under no_dupes
        let options = ColumnOptions {
            no_dupes: true,
            ..Default::default()
        };
        let it = parent.column_iterator(3, Some(3), &options)?;
        let child_positions: Vec<u64> = it
            .column()
            .iter()
            .filter(|(k, _)| k.genome == "C")
            .flat_map(|(_, v)| v.iter().map(|p| p.position))
            .collect();
        assert_eq!(child_positions, vec![3]);

        // walking the child reaches the other copy through the cycle
        let child = aln.open_genome("C")?;
        let it = child.column_iterator(2, Some(2), &ColumnOptions::default())?;
        let child_positions: Vec<u64> = it
            .column()
            .iter()
            .filter(|(k, _)| k.genome == "C")
            .flat_map(|(_, v)| v.iter().map(|p| p.position))
            .collect();
        assert_eq!(child_positions, vec![2, 12]);
    }
    Ok(())
}

#[test]
fn test_unique_keeps_one_entry_per_genome() -> Result<()> {
    let dir = TempDir::new()?;
    let aln = paralogy_alignment(&dir.path().join("dup.hal"), FORMATS[0])?;
    let parent = aln.open_genome("P")?;
    let options = ColumnOptions {
        unique: true,
        ..Default::default()
    };
    let it = parent.column_iterator(0, Some(0), &options)?;
    let child_entries: usize = it
        .column()
        .iter()
        .filter(|(k, _)| k.genome == "C")
        .map(|(_, v)| v.len())
        .sum();
    assert_eq!(child_entries, 1);
    Ok(())
}

/// Count child-genome entries over a whole reference walk.
fn total_child_entries(
    aln: &halign::Alignment,
    reference: &str,
    child: &str,
    options: &ColumnOptions,
) -> Result<usize> {
    let genome = aln.open_genome(reference)?;
    let mut it = genome.column_iterator(0, None, options)?;
    let mut total = 0;
    while !it.at_end() {
        total += it
            .column()
            .iter()
            .filter(|(k, _)| k.genome == child)
            .map(|(_, v)| v.len())
            .sum::<usize>();
        it.to_right()?;
    }
    Ok(total)
}

#[test]
fn test_insertion_budget() -> Result<()> {
    for format in FORMATS {
        let dir = TempDir::new()?;
        let aln = insertion_alignment(&dir.path().join("ins.hal"), format)?;

        // budget zero never follows an unaligned span
        let zero = ColumnOptions::default();
        assert_eq!(total_child_entries(&aln, "R", "L", &zero)?, 20);

        // a ten-base span truncates a five-base budget
        let small = ColumnOptions {
            max_insert_length: 5,
            ..Default::default()
        };
        assert_eq!(total_child_entries(&aln, "R", "L", &small)?, 20);

        // a generous budget pulls the whole branch in
        let large = ColumnOptions {
            max_insert_length: 100,
            ..Default::default()
        };
        assert_eq!(total_child_entries(&aln, "R", "L", &large)?, 30);
    }
    Ok(())
}

#[test]
fn test_reverse_strand_walk() -> Result<()> {
    let dir = TempDir::new()?;
    let aln = star_alignment(&dir.path().join("star.hal"), FORMATS[0])?;
    let leaf = aln.open_genome("L")?;
    let options = ColumnOptions {
        reverse_strand: true,
        ..Default::default()
    };
    let mut it = leaf.column_iterator(0, None, &options)?;
    let mut expected = 29i64;
    while !it.at_end() {
        assert_eq!(it.reference_position(), expected);
        for positions in it.column().values() {
            assert!(positions.iter().all(|p| p.reversed));
        }
        expected -= 1;
        it.to_right()?;
    }
    assert_eq!(expected, -1);
    Ok(())
}

#[test]
fn test_no_ancestors_drops_internal_genomes() -> Result<()> {
    let dir = TempDir::new()?;
    let aln = family_alignment(&dir.path().join("family.hal"), FORMATS[0])?;
    let son = aln.open_genome("son1")?;
    let options = ColumnOptions {
        no_ancestors: true,
        ..Default::default()
    };
    let it = son.column_iterator(0, Some(0), &options)?;
    let genomes: Vec<String> = it.column().keys().map(|k| k.genome.clone()).collect();
    assert_eq!(genomes, vec!["son1", "son2"]);
    Ok(())
}

#[test]
fn test_only_orthologs_follows_the_direct_line() -> Result<()> {
    let dir = TempDir::new()?;
    let aln = family_alignment(&dir.path().join("family.hal"), FORMATS[0])?;
    let son = aln.open_genome("son1")?;
    let options = ColumnOptions {
        only_orthologs: true,
        ..Default::default()
    };
    let it = son.column_iterator(7, Some(7), &options)?;
    let genomes: Vec<String> = it.column().keys().map(|k| k.genome.clone()).collect();
    // only single parent links are followed: the ancestral line, without
    // spreading back down into siblings
    assert_eq!(genomes, vec!["dad", "grandpa", "son1"]);
    Ok(())
}

#[test]
fn test_targets_restrict_entries_not_traversal() -> Result<()> {
    let dir = TempDir::new()?;
    let aln = family_alignment(&dir.path().join("family.hal"), FORMATS[1])?;
    let son = aln.open_genome("son1")?;
    let options = ColumnOptions {
        targets: Some(vec!["son2".to_string()]),
        ..Default::default()
    };
    let it = son.column_iterator(42, Some(42), &options)?;
    let genomes: Vec<String> = it.column().keys().map(|k| k.genome.clone()).collect();
    // son2 is only reachable through dad, which is filtered from the
    // column but still traversed
    assert_eq!(genomes, vec!["son1", "son2"]);
    Ok(())
}
