/// Both backends must describe the same alignment identically: equal
/// trees, DNA, segment records, and column walks for the same synthetic
/// input.
mod common;

use anyhow::Result;
use common::{family_alignment, random_alignment, FORMATS};
use halign::{Alignment, ColumnMap, ColumnOptions, Format};
use pretty_assertions::assert_eq;
use tempfile::TempDir;

fn collect_columns(aln: &Alignment, reference: &str, options: &ColumnOptions) -> Result<Vec<ColumnMap>> {
    let genome = aln.open_genome(reference)?;
    let mut it = genome.column_iterator(0, None, options)?;
    let mut columns = Vec::new();
    while !it.at_end() {
        columns.push(it.column().clone());
        it.to_right()?;
    }
    Ok(columns)
}

#[test]
fn test_family_walks_match() -> Result<()> {
    let dir = TempDir::new()?;
    let chunked = family_alignment(&dir.path().join("a.hal"), Format::Hdf5Like)?;
    let mapped = family_alignment(&dir.path().join("b.hal"), Format::Mmap)?;
    for options in [
        ColumnOptions::default(),
        ColumnOptions {
            no_ancestors: true,
            ..Default::default()
        },
        ColumnOptions {
            reverse_strand: true,
            ..Default::default()
        },
    ] {
        for reference in ["grandpa", "dad", "son1", "son2"] {
            assert_eq!(
                collect_columns(&chunked, reference, &options)?,
                collect_columns(&mapped, reference, &options)?,
                "reference {reference}"
            );
        }
    }
    Ok(())
}

#[test]
fn test_random_alignments_match() -> Result<()> {
    for seed in [1u64, 17, 4242] {
        let dir = TempDir::new()?;
        let chunked = random_alignment(&dir.path().join("a.hal"), Format::Hdf5Like, seed)?;
        let mapped = random_alignment(&dir.path().join("b.hal"), Format::Mmap, seed)?;

        for name in ["root", "leaf"] {
            let a = chunked.open_genome(name)?;
            let b = mapped.open_genome(name)?;
            assert_eq!(a.get_string()?, b.get_string()?, "seed {seed}, DNA of {name}");
        }
        let a = chunked.open_genome("leaf")?;
        let b = mapped.open_genome("leaf")?;
        for i in 0..a.num_top_segments() as i64 {
            assert_eq!(a.top_segment(i)?, b.top_segment(i)?, "seed {seed}, top {i}");
        }
        assert_eq!(
            collect_columns(&chunked, "leaf", &ColumnOptions::default())?,
            collect_columns(&mapped, "leaf", &ColumnOptions::default())?,
            "seed {seed} column walk"
        );
        assert_eq!(
            collect_columns(&chunked, "root", &ColumnOptions::default())?,
            collect_columns(&mapped, "root", &ColumnOptions::default())?,
            "seed {seed} root walk"
        );
    }
    Ok(())
}

#[test]
fn test_walks_survive_reopen() -> Result<()> {
    for format in FORMATS {
        let dir = TempDir::new()?;
        let path = dir.path().join("f.hal");
        let before = {
            let aln = family_alignment(&path, format)?;
            collect_columns(&aln, "dad", &ColumnOptions::default())?
        };
        let aln = Alignment::open(path.to_str().unwrap())?;
        let after = collect_columns(&aln, "dad", &ColumnOptions::default())?;
        assert_eq!(before, after);
    }
    Ok(())
}
