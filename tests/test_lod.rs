/// LOD manager: index parsing, level selection, DNA-availability
/// fallback, and the error cases.
mod common;

use anyhow::Result;
use common::{create, random_dna};
use halign::{Format, HalError, LodManager, OpenOptions, SequenceInfo};
use std::fs;
use tempfile::TempDir;

/// Write a two-level setup: fine.hal with DNA, coarse.hal without.
fn write_levels(dir: &std::path::Path) -> Result<()> {
    let fine = create(&dir.join("fine.hal"), Format::Hdf5Like)?;
    let g = fine.add_root_genome("g")?;
    g.set_dimensions(&[SequenceInfo::new("chr", 40, 0, 0)])?;
    g.set_string(&random_dna(40, 3))?;
    fine.write()?;

    let coarse = create(&dir.join("coarse.hal"), Format::Hdf5Like)?;
    let g = coarse.add_root_genome("g")?;
    g.set_dimensions_no_dna(&[SequenceInfo::new("chr", 40, 0, 0)])?;
    coarse.write()?;

    fs::write(dir.join("lod.txt"), "0 fine.hal\n\n1000 coarse.hal\n")?;
    Ok(())
}

#[test]
fn test_level_selection() -> Result<()> {
    let dir = TempDir::new()?;
    write_levels(dir.path())?;
    let index = dir.path().join("lod.txt");
    let mut lod = LodManager::load(index.to_str().unwrap(), &OpenOptions::default())?;
    assert_eq!(lod.num_levels(), 2);

    let fine = lod.alignment_for(500, false)?;
    assert!(fine.path().ends_with("fine.hal"));

    let coarse = lod.alignment_for(5000, false)?;
    assert!(coarse.path().ends_with("coarse.hal"));

    // the coarse level holds no DNA, so a DNA query falls back
    let with_dna = lod.alignment_for(5000, true)?;
    assert!(with_dna.path().ends_with("fine.hal"));
    Ok(())
}

#[test]
fn test_exact_threshold_boundary() -> Result<()> {
    let dir = TempDir::new()?;
    write_levels(dir.path())?;
    let index = dir.path().join("lod.txt");
    let mut lod = LodManager::load(index.to_str().unwrap(), &OpenOptions::default())?;
    assert!(lod.alignment_for(999, false)?.path().ends_with("fine.hal"));
    assert!(lod.alignment_for(1000, false)?.path().ends_with("coarse.hal"));
    Ok(())
}

#[test]
fn test_missing_finest_level_is_rejected() -> Result<()> {
    let dir = TempDir::new()?;
    let index = dir.path().join("lod.txt");
    fs::write(&index, "1000 coarse.hal\n")?;
    match LodManager::load(index.to_str().unwrap(), &OpenOptions::default()) {
        Err(HalError::BadFormat(msg)) => assert!(msg.contains("range value 0")),
        other => panic!("expected BadFormat, got {other:?}"),
    }
    Ok(())
}

#[test]
fn test_parse_error_names_line() -> Result<()> {
    let dir = TempDir::new()?;
    let index = dir.path().join("lod.txt");
    fs::write(&index, "0 fine.hal\nnot-a-number fine.hal\n")?;
    match LodManager::load(index.to_str().unwrap(), &OpenOptions::default()) {
        Err(HalError::BadFormat(msg)) => assert!(msg.contains("line 2"), "got: {msg}"),
        other => panic!("expected BadFormat, got {other:?}"),
    }
    Ok(())
}

#[test]
fn test_finest_level_must_hold_dna() -> Result<()> {
    let dir = TempDir::new()?;
    let coarse = create(&dir.path().join("nodna.hal"), Format::Mmap)?;
    let g = coarse.add_root_genome("g")?;
    g.set_dimensions_no_dna(&[SequenceInfo::new("chr", 10, 0, 0)])?;
    coarse.write()?;
    drop(coarse);

    let index = dir.path().join("lod.txt");
    fs::write(&index, "0 nodna.hal\n")?;
    let mut lod = LodManager::load(index.to_str().unwrap(), &OpenOptions::default())?;
    match lod.alignment_for(10, false) {
        Err(HalError::BadFormat(msg)) => assert!(msg.contains("DNA")),
        other => panic!("expected BadFormat, got {other:?}"),
    }
    Ok(())
}

#[test]
fn test_single_level_wrapper() -> Result<()> {
    let dir = TempDir::new()?;
    write_levels(dir.path())?;
    let fine = dir.path().join("fine.hal");
    let mut lod = LodManager::load_single_level(fine.to_str().unwrap(), &OpenOptions::default())?;
    assert_eq!(lod.num_levels(), 1);
    assert!(lod.alignment_for(1_000_000, true)?.path().ends_with("fine.hal"));
    Ok(())
}
