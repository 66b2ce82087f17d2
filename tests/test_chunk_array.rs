/// Chunked-array store exercised directly across a sweep of chunk sizes
/// (including 0: one chunk spanning the dataset) and deflate levels.
use anyhow::Result;
use byteorder::{ByteOrder, LittleEndian};
use halign::chunk_array::CreationProps;
use halign::chunk_file::ChunkFile;
use halign::HalError;
use tempfile::TempDir;

const N: u64 = 1000;
const CHUNK_SIZES: [u64; 8] = [0, 4, 8, 16, 32, 128, 512, 1000];

fn props(chunk_elems: u64, deflate_level: u32) -> CreationProps {
    CreationProps {
        chunk_elems,
        deflate_level,
        ..Default::default()
    }
}

fn fill_and_check(deflate_level: u32) -> Result<()> {
    for chunk_elems in CHUNK_SIZES {
        let dir = TempDir::new()?;
        let path = dir.path().join("array.hal");
        let p = props(chunk_elems, deflate_level);
        {
            let mut file = ChunkFile::create(&path, p)?;
            file.create_dataset("/numbers", 8, N, &p)?;
            let mut buf = [0u8; 8];
            for i in 0..N {
                LittleEndian::write_u64(&mut buf, i);
                file.write_element("/numbers", i, &buf)?;
            }
            file.write()?;
        }
        let mut file = ChunkFile::open(&path, false, p)?;
        assert_eq!(file.dataset_len("/numbers")?, N);
        let mut buf = [0u8; 8];
        for i in 0..N {
            file.read_element("/numbers", i, &mut buf)?;
            assert_eq!(
                LittleEndian::read_u64(&buf),
                i,
                "chunk size {chunk_elems}, level {deflate_level}, element {i}"
            );
        }
    }
    Ok(())
}

#[test]
fn test_create_and_load() -> Result<()> {
    fill_and_check(2)
}

#[test]
fn test_stored_uncompressed() -> Result<()> {
    fill_and_check(0)
}

#[test]
fn test_max_compression() -> Result<()> {
    fill_and_check(9)
}

#[test]
fn test_out_of_range_access() -> Result<()> {
    let dir = TempDir::new()?;
    let p = props(16, 2);
    let mut file = ChunkFile::create(dir.path().join("a.hal"), p)?;
    file.create_dataset("/d", 4, 10, &p)?;
    let mut buf = [0u8; 4];
    match file.read_element("/d", 10, &mut buf) {
        Err(HalError::OutOfRange { index, size, .. }) => {
            assert_eq!((index, size), (10, 10));
        }
        other => panic!("expected OutOfRange, got {other:?}"),
    }
    assert!(matches!(
        file.write_element("/d", 99, &buf),
        Err(HalError::OutOfRange { .. })
    ));
    Ok(())
}

#[test]
fn test_unlink_and_recreate() -> Result<()> {
    let dir = TempDir::new()?;
    let path = dir.path().join("a.hal");
    let p = props(8, 2);
    let mut file = ChunkFile::create(&path, p)?;
    file.create_dataset("/d", 1, 16, &p)?;
    file.write_range("/d", 0, b"0123456789abcdef")?;
    file.remove_dataset("/d")?;
    assert!(!file.has_dataset("/d"));
    // recreating after an unlink starts from zeroes
    file.create_dataset("/d", 1, 4, &p)?;
    file.write()?;
    let mut out = Vec::new();
    file.read_range("/d", 0, 4, &mut out)?;
    assert_eq!(out, vec![0u8; 4]);
    assert!(matches!(
        file.remove_dataset("/ghost"),
        Err(HalError::NotFound(_))
    ));
    Ok(())
}

#[test]
fn test_sparse_dataset_reads_zero() -> Result<()> {
    // elements never written read back as zeroes after a flush
    let dir = TempDir::new()?;
    let path = dir.path().join("a.hal");
    let p = props(4, 2);
    {
        let mut file = ChunkFile::create(&path, p)?;
        file.create_dataset("/d", 1, 12, &p)?;
        file.write_element("/d", 5, b"x")?;
        file.write()?;
    }
    let mut file = ChunkFile::open(&path, false, p)?;
    let mut out = Vec::new();
    file.read_range("/d", 0, 12, &mut out)?;
    let mut expected = vec![0u8; 12];
    expected[5] = b'x';
    assert_eq!(out, expected);
    Ok(())
}
