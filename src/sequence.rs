/// Per-genome sequence table plus the two lookup structures built at
/// creation time: a site map for position queries and a minimal perfect
/// hash for name queries. The hash may return a wrong candidate for a name
/// that was never inserted, so callers always verify the name on a hit.
use crate::error::{HalError, Result};
use crate::types::Size;
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

/// Creation-time dimensions of one sequence.
#[derive(Debug, Clone)]
pub struct SequenceInfo {
    pub name: String,
    pub length: Size,
    pub num_top: Size,
    pub num_bottom: Size,
}

impl SequenceInfo {
    pub fn new(name: &str, length: Size, num_top: Size, num_bottom: Size) -> SequenceInfo {
        SequenceInfo {
            name: name.to_string(),
            length,
            num_top,
            num_bottom,
        }
    }
}

/// A segment-count update for one sequence of an existing genome.
#[derive(Debug, Clone)]
pub struct UpdateInfo {
    pub name: String,
    pub num_segments: Size,
}

impl UpdateInfo {
    pub fn new(name: &str, num_segments: Size) -> UpdateInfo {
        UpdateInfo {
            name: name.to_string(),
            num_segments,
        }
    }
}

/// Resolved placement of one sequence inside its genome's arrays.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SequenceRecord {
    pub name: String,
    pub start: Size,
    pub length: Size,
    pub top_start: Size,
    pub num_top: Size,
    pub bottom_start: Size,
    pub num_bottom: Size,
}

impl SequenceRecord {
    pub fn end(&self) -> Size {
        self.start + self.length
    }
}

/// Lay sequences out back to back, assigning array offsets.
pub fn layout_sequences(dims: &[SequenceInfo]) -> Vec<SequenceRecord> {
    let mut records = Vec::with_capacity(dims.len());
    let mut start = 0;
    let mut top_start = 0;
    let mut bottom_start = 0;
    for info in dims {
        records.push(SequenceRecord {
            name: info.name.clone(),
            start,
            length: info.length,
            top_start,
            num_top: info.num_top,
            bottom_start,
            num_bottom: info.num_bottom,
        });
        start += info.length;
        top_start += info.num_top;
        bottom_start += info.num_bottom;
    }
    records
}

pub fn encode_sequences(records: &[SequenceRecord]) -> Vec<u8> {
    let mut out = Vec::new();
    out.write_u32::<LittleEndian>(records.len() as u32).unwrap();
    for rec in records {
        out.write_u16::<LittleEndian>(rec.name.len() as u16).unwrap();
        out.extend_from_slice(rec.name.as_bytes());
        for v in [
            rec.start,
            rec.length,
            rec.top_start,
            rec.num_top,
            rec.bottom_start,
            rec.num_bottom,
        ] {
            out.write_u64::<LittleEndian>(v).unwrap();
        }
    }
    out
}

pub fn decode_sequences(mut buf: &[u8]) -> Result<Vec<SequenceRecord>> {
    let count = buf.read_u32::<LittleEndian>()? as usize;
    let mut records = Vec::with_capacity(count);
    for _ in 0..count {
        let name_len = buf.read_u16::<LittleEndian>()? as usize;
        if buf.len() < name_len {
            return Err(HalError::BadFormat("truncated sequence table".into()));
        }
        let name = std::str::from_utf8(&buf[..name_len])
            .map_err(|_| HalError::BadFormat("sequence name is not UTF-8".into()))?
            .to_string();
        buf = &buf[name_len..];
        let mut vals = [0u64; 6];
        for v in vals.iter_mut() {
            *v = buf.read_u64::<LittleEndian>()?;
        }
        records.push(SequenceRecord {
            name,
            start: vals[0],
            length: vals[1],
            top_start: vals[2],
            num_top: vals[3],
            bottom_start: vals[4],
            num_bottom: vals[5],
        });
    }
    Ok(records)
}

/// Sorted (start, index) pairs answering "which sequence holds site X"
/// by binary search.
#[derive(Debug, Default, Clone)]
pub struct SiteMap {
    starts: Vec<(Size, u32)>,
    total: Size,
}

impl SiteMap {
    pub fn build(records: &[SequenceRecord]) -> SiteMap {
        let mut starts: Vec<(Size, u32)> = records
            .iter()
            .enumerate()
            .map(|(i, r)| (r.start, i as u32))
            .collect();
        starts.sort_unstable();
        let total = records.iter().map(|r| r.length).sum();
        SiteMap { starts, total }
    }

    /// Sequence index containing `site`, or None past the genome end.
    pub fn index_by_site(&self, site: Size) -> Option<u32> {
        if site >= self.total {
            return None;
        }
        let at = self.starts.partition_point(|&(start, _)| start <= site);
        // at > 0 because the first sequence starts at 0
        Some(self.starts[at - 1].1)
    }
}

/// Minimal perfect hash over sequence names, with per-bucket displacement
/// seeds. Lookups for unknown names can return an arbitrary slot, so the
/// caller verifies the candidate's name.
#[derive(Debug, Default, Clone)]
pub struct SequenceNameHash {
    num_buckets: u32,
    seeds: Vec<u32>,
    slots: Vec<u32>,
}

const BUCKET_SALT: u64 = 0x9e37_79b9_7f4a_7c15;
const MAX_SEED_TRIES: u32 = 100_000;

fn fnv1a(seed: u64, bytes: &[u8]) -> u64 {
    let mut hash = 0xcbf2_9ce4_8422_2325u64 ^ seed.wrapping_mul(0x100_0000_01b3);
    for &b in bytes {
        hash ^= b as u64;
        hash = hash.wrapping_mul(0x100_0000_01b3);
    }
    hash
}

impl SequenceNameHash {
    pub fn build(names: &[&str]) -> Result<SequenceNameHash> {
        let n = names.len();
        if n == 0 {
            return Ok(SequenceNameHash::default());
        }
        let num_buckets = (n as u32).div_ceil(4).max(1);
        'salt: for global_salt in 0..64u64 {
            let mut buckets: Vec<Vec<usize>> = vec![Vec::new(); num_buckets as usize];
            for (i, name) in names.iter().enumerate() {
                let b = fnv1a(BUCKET_SALT ^ global_salt, name.as_bytes()) % num_buckets as u64;
                buckets[b as usize].push(i);
            }
            let mut order: Vec<usize> = (0..buckets.len()).collect();
            order.sort_by_key(|&b| std::cmp::Reverse(buckets[b].len()));

            let mut seeds = vec![0u32; num_buckets as usize];
            let mut slots = vec![u32::MAX; n];
            for &b in &order {
                if buckets[b].is_empty() {
                    continue;
                }
                let mut placed = false;
                'seed: for seed in 1..MAX_SEED_TRIES {
                    let mut claimed = Vec::with_capacity(buckets[b].len());
                    for &i in &buckets[b] {
                        let slot =
                            (fnv1a(seed as u64 ^ (global_salt << 32), names[i].as_bytes()) % n as u64)
                                as usize;
                        if slots[slot] != u32::MAX || claimed.contains(&slot) {
                            continue 'seed;
                        }
                        claimed.push(slot);
                    }
                    for (&i, &slot) in buckets[b].iter().zip(claimed.iter()) {
                        slots[slot] = i as u32;
                    }
                    seeds[b] = seed;
                    placed = true;
                    break;
                }
                if !placed {
                    continue 'salt;
                }
            }
            return Ok(SequenceNameHash {
                num_buckets: num_buckets | ((global_salt as u32) << 24),
                seeds,
                slots,
            });
        }
        // Duplicate names are the only way every salt can fail.
        Err(HalError::PreconditionViolated(
            "could not build sequence name hash (duplicate sequence names?)".into(),
        ))
    }

    fn split(&self) -> (u64, u64) {
        let salt = (self.num_buckets >> 24) as u64;
        let buckets = (self.num_buckets & 0x00ff_ffff) as u64;
        (salt, buckets)
    }

    /// Candidate sequence index for `name`; the caller must verify.
    pub fn lookup(&self, name: &str) -> Option<u32> {
        if self.slots.is_empty() {
            return None;
        }
        let (salt, buckets) = self.split();
        let b = fnv1a(BUCKET_SALT ^ salt, name.as_bytes()) % buckets;
        let seed = self.seeds[b as usize];
        if seed == 0 {
            return None;
        }
        let slot = (fnv1a(seed as u64 ^ (salt << 32), name.as_bytes()) % self.slots.len() as u64) as usize;
        Some(self.slots[slot])
    }

    pub(crate) fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.write_u32::<LittleEndian>(self.num_buckets).unwrap();
        out.write_u32::<LittleEndian>(self.seeds.len() as u32).unwrap();
        for &s in &self.seeds {
            out.write_u32::<LittleEndian>(s).unwrap();
        }
        out.write_u32::<LittleEndian>(self.slots.len() as u32).unwrap();
        for &s in &self.slots {
            out.write_u32::<LittleEndian>(s).unwrap();
        }
        out
    }

    pub(crate) fn decode(mut buf: &[u8]) -> Result<SequenceNameHash> {
        let num_buckets = buf.read_u32::<LittleEndian>()?;
        let num_seeds = buf.read_u32::<LittleEndian>()? as usize;
        let mut seeds = Vec::with_capacity(num_seeds);
        for _ in 0..num_seeds {
            seeds.push(buf.read_u32::<LittleEndian>()?);
        }
        let num_slots = buf.read_u32::<LittleEndian>()? as usize;
        let mut slots = Vec::with_capacity(num_slots);
        for _ in 0..num_slots {
            slots.push(buf.read_u32::<LittleEndian>()?);
        }
        Ok(SequenceNameHash {
            num_buckets,
            seeds,
            slots,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dims() -> Vec<SequenceInfo> {
        vec![
            SequenceInfo::new("chr1", 100, 10, 5),
            SequenceInfo::new("chr2", 50, 5, 0),
            SequenceInfo::new("chrM", 16, 1, 1),
        ]
    }

    #[test]
    fn test_layout_and_site_map() {
        let records = layout_sequences(&dims());
        assert_eq!(records[1].start, 100);
        assert_eq!(records[1].top_start, 10);
        assert_eq!(records[2].bottom_start, 5);
        let map = SiteMap::build(&records);
        assert_eq!(map.index_by_site(0), Some(0));
        assert_eq!(map.index_by_site(99), Some(0));
        assert_eq!(map.index_by_site(100), Some(1));
        assert_eq!(map.index_by_site(165), Some(2));
        assert_eq!(map.index_by_site(166), None);
    }

    #[test]
    fn test_sequence_table_roundtrip() {
        let records = layout_sequences(&dims());
        let decoded = decode_sequences(&encode_sequences(&records)).unwrap();
        assert_eq!(decoded, records);
    }

    #[test]
    fn test_name_hash_exact() {
        let names: Vec<String> = (0..200).map(|i| format!("scaffold_{i}")).collect();
        let refs: Vec<&str> = names.iter().map(|s| s.as_str()).collect();
        let hash = SequenceNameHash::build(&refs).unwrap();
        for (i, name) in names.iter().enumerate() {
            assert_eq!(hash.lookup(name), Some(i as u32), "lookup of {name}");
        }
        let decoded = SequenceNameHash::decode(&hash.encode()).unwrap();
        assert_eq!(decoded.lookup("scaffold_123"), Some(123));
    }

    #[test]
    fn test_name_hash_empty() {
        let hash = SequenceNameHash::build(&[]).unwrap();
        assert_eq!(hash.lookup("anything"), None);
    }
}
