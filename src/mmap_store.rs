/// Mmap backend: all records live in the arena and reference each other by
/// byte offset. Genome headers are fixed-size and rewritten in place;
/// variable records (tree, metadata, tables) are replaced by allocating a
/// new record and swinging the owning offset.
use crate::arena::{Arena, ArenaConfig};
use crate::error::{HalError, Result};
use crate::metadata::MetaData;
use crate::segment::{BottomSegmentData, TopSegmentData, TOP_SEGMENT_LEN};
use crate::sequence::{decode_sequences, encode_sequences, SequenceNameHash, SequenceRecord};
use crate::store::GenomeDims;
use crate::types::{Base, Size};
use byteorder::{ByteOrder, LittleEndian};
use indexmap::IndexMap;
use log::debug;
use std::path::Path;

/// Fixed genome header layout (all offsets little-endian):
///   0 total_len, 8 num_sequences, 16 num_top, 24 num_bottom,
///   32 num_children (u32), 36 pad, 40 dna_off, 48 seqs_off, 56 seqs_len,
///   64 tops_off, 72 bottoms_off, 80 meta_off, 88 meta_len,
///   96 hash_off, 104 hash_len, 112 name_off, 120 name_cap (u32),
///   124 name_len (u32)
const GENOME_HEADER_LEN: u64 = 128;

const F_TOTAL_LEN: u64 = 0;
const F_NUM_SEQUENCES: u64 = 8;
const F_NUM_TOP: u64 = 16;
const F_NUM_BOTTOM: u64 = 24;
const F_NUM_CHILDREN: u64 = 32;
const F_DNA_OFF: u64 = 40;
const F_SEQS_OFF: u64 = 48;
const F_SEQS_LEN: u64 = 56;
const F_TOPS_OFF: u64 = 64;
const F_BOTTOMS_OFF: u64 = 72;
const F_META_OFF: u64 = 80;
const F_META_LEN: u64 = 88;
const F_HASH_OFF: u64 = 96;
const F_HASH_LEN: u64 = 104;
const F_NAME_OFF: u64 = 112;
const F_NAME_CAP: u64 = 120;
const F_NAME_LEN: u64 = 124;

pub(crate) struct MmapStore {
    arena: Arena,
    /// genome name -> header offset, in creation order
    headers: IndexMap<String, u64>,
    tree_off: u64,
    tree_len: u64,
    meta_off: u64,
    meta_len: u64,
}

impl MmapStore {
    pub fn create<P: AsRef<Path>>(path: P, config: &ArenaConfig) -> Result<MmapStore> {
        let arena = Arena::create(path, config)?;
        Ok(MmapStore {
            arena,
            headers: IndexMap::new(),
            tree_off: 0,
            tree_len: 0,
            meta_off: 0,
            meta_len: 0,
        })
    }

    pub fn open<P: AsRef<Path>>(path: P, writable: bool, config: &ArenaConfig) -> Result<MmapStore> {
        let arena = Arena::open(path, writable, config)?;
        let mut store = MmapStore {
            arena,
            headers: IndexMap::new(),
            tree_off: 0,
            tree_len: 0,
            meta_off: 0,
            meta_len: 0,
        };
        store.load_root()?;
        Ok(store)
    }

    pub fn writable(&self) -> bool {
        self.arena.writable()
    }

    /// Root record: tree_off, tree_len, meta_off, meta_len, num_genomes,
    /// then one header offset per genome in creation order.
    fn load_root(&mut self) -> Result<()> {
        let root = self.arena.root_offset();
        if root == 0 {
            return Ok(()); // freshly created, nothing reachable yet
        }
        let fixed = self.arena.bytes(root, 40)?;
        self.tree_off = LittleEndian::read_u64(&fixed[0..8]);
        self.tree_len = LittleEndian::read_u64(&fixed[8..16]);
        self.meta_off = LittleEndian::read_u64(&fixed[16..24]);
        self.meta_len = LittleEndian::read_u64(&fixed[24..32]);
        let num_genomes = LittleEndian::read_u64(&fixed[32..40]);
        let table = self.arena.bytes(root + 40, num_genomes * 8)?.to_vec();
        for g in 0..num_genomes as usize {
            let header = LittleEndian::read_u64(&table[g * 8..g * 8 + 8]);
            let name = self.read_name(header)?;
            self.headers.insert(name, header);
        }
        debug!("loaded {} genome headers from arena root", self.headers.len());
        Ok(())
    }

    fn write_root(&mut self) -> Result<()> {
        let mut buf = Vec::with_capacity(40 + self.headers.len() * 8);
        for v in [self.tree_off, self.tree_len, self.meta_off, self.meta_len] {
            let mut tmp = [0u8; 8];
            LittleEndian::write_u64(&mut tmp, v);
            buf.extend_from_slice(&tmp);
        }
        let mut tmp = [0u8; 8];
        LittleEndian::write_u64(&mut tmp, self.headers.len() as u64);
        buf.extend_from_slice(&tmp);
        for &off in self.headers.values() {
            LittleEndian::write_u64(&mut tmp, off);
            buf.extend_from_slice(&tmp);
        }
        let off = self.arena.allocate(buf.len() as u64)?;
        self.arena.bytes_mut(off, buf.len() as u64)?.copy_from_slice(&buf);
        self.arena.set_root_offset(off)
    }

    fn read_name(&self, header: u64) -> Result<String> {
        let name_off = self.field(header, F_NAME_OFF)?;
        let meta = self.arena.bytes(header + F_NAME_CAP, 8)?;
        let name_len = LittleEndian::read_u32(&meta[4..8]) as u64;
        let bytes = self.arena.bytes(name_off, name_len)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|_| HalError::CorruptAlignment(format!("genome name at {name_off} is not UTF-8")))
    }

    fn field(&self, header: u64, field: u64) -> Result<u64> {
        self.arena.read_u64(header + field)
    }

    fn set_field(&mut self, header: u64, field: u64, value: u64) -> Result<()> {
        self.arena.write_u64(header + field, value)
    }

    fn header_of(&self, genome: &str) -> Result<u64> {
        self.headers
            .get(genome)
            .copied()
            .ok_or_else(|| HalError::NotFound(format!("genome {genome}")))
    }

    /// Allocate a record and copy `bytes` into it.
    fn store_record(&mut self, bytes: &[u8]) -> Result<u64> {
        let off = self.arena.allocate(bytes.len() as u64)?;
        if !bytes.is_empty() {
            self.arena
                .bytes_mut(off, bytes.len() as u64)?
                .copy_from_slice(bytes);
        }
        Ok(off)
    }

    pub fn write_tree(&mut self, bytes: &[u8]) -> Result<()> {
        self.tree_off = self.store_record(bytes)?;
        self.tree_len = bytes.len() as u64;
        self.write_root()
    }

    pub fn read_tree(&mut self) -> Result<Option<Vec<u8>>> {
        if self.tree_off == 0 {
            return Ok(None);
        }
        Ok(Some(self.arena.bytes(self.tree_off, self.tree_len)?.to_vec()))
    }

    pub fn write_root_meta(&mut self, meta: &MetaData) -> Result<()> {
        let bytes = meta.encode();
        self.meta_off = self.store_record(&bytes)?;
        self.meta_len = bytes.len() as u64;
        self.write_root()
    }

    pub fn read_root_meta(&mut self) -> Result<MetaData> {
        if self.meta_off == 0 {
            return Ok(MetaData::new());
        }
        MetaData::decode(self.arena.bytes(self.meta_off, self.meta_len)?)
    }

    pub fn genome_exists(&self, genome: &str) -> bool {
        self.headers.contains_key(genome)
    }

    /// Create (or re-dimension) a genome: allocates the DNA nibble array,
    /// the segment arrays, and the lookup records, then (re)writes the
    /// fixed header.
    pub fn create_genome(
        &mut self,
        genome: &str,
        records: &[SequenceRecord],
        num_children: usize,
        store_dna: bool,
    ) -> Result<()> {
        let total: Size = records.iter().map(|r| r.length).sum();
        let num_top: Size = records.iter().map(|r| r.num_top).sum();
        let num_bottom: Size = records.iter().map(|r| r.num_bottom).sum();

        let header = match self.headers.get(genome) {
            Some(&h) => h,
            None => {
                let h = self.arena.allocate(GENOME_HEADER_LEN)?;
                self.arena.bytes_mut(h, GENOME_HEADER_LEN)?.fill(0);
                let name_off = self.store_record(genome.as_bytes())?;
                self.set_field(h, F_NAME_OFF, name_off)?;
                let mut cap_len = [0u8; 8];
                LittleEndian::write_u32(&mut cap_len[0..4], genome.len() as u32);
                LittleEndian::write_u32(&mut cap_len[4..8], genome.len() as u32);
                self.arena.bytes_mut(h + F_NAME_CAP, 8)?.copy_from_slice(&cap_len);
                self.headers.insert(genome.to_string(), h);
                self.write_root()?;
                h
            }
        };

        let dna_off = if store_dna {
            let nbytes = total.div_ceil(2);
            let off = self.arena.allocate(nbytes)?;
            self.arena.bytes_mut(off, nbytes)?.fill(0);
            off
        } else {
            0
        };
        let tops_off = self.allocate_zeroed(num_top * TOP_SEGMENT_LEN as u64)?;
        let bottoms_off =
            self.allocate_zeroed(num_bottom * BottomSegmentData::record_len(num_children) as u64)?;

        self.set_field(header, F_TOTAL_LEN, total)?;
        self.set_field(header, F_NUM_SEQUENCES, records.len() as u64)?;
        self.set_field(header, F_NUM_TOP, num_top)?;
        self.set_field(header, F_NUM_BOTTOM, num_bottom)?;
        self.arena
            .write_u64(header + F_NUM_CHILDREN, num_children as u64)?;
        self.set_field(header, F_DNA_OFF, dna_off)?;
        self.set_field(header, F_TOPS_OFF, tops_off)?;
        self.set_field(header, F_BOTTOMS_OFF, bottoms_off)?;
        self.write_sequences(genome, records)?;
        if self.field(header, F_META_OFF)? == 0 {
            self.write_genome_meta(genome, &MetaData::new())?;
        }
        Ok(())
    }

    fn allocate_zeroed(&mut self, nbytes: u64) -> Result<u64> {
        let off = self.arena.allocate(nbytes)?;
        if nbytes > 0 {
            self.arena.bytes_mut(off, nbytes)?.fill(0);
        }
        Ok(off)
    }

    /// Swing the top array to a fresh allocation of `num_top` records.
    pub fn reset_top_array(&mut self, genome: &str, num_top: Size) -> Result<()> {
        let header = self.header_of(genome)?;
        let off = self.allocate_zeroed(num_top * TOP_SEGMENT_LEN as u64)?;
        self.set_field(header, F_TOPS_OFF, off)?;
        self.set_field(header, F_NUM_TOP, num_top)
    }

    pub fn reset_bottom_array(&mut self, genome: &str, num_bottom: Size, num_children: usize) -> Result<()> {
        let header = self.header_of(genome)?;
        let off =
            self.allocate_zeroed(num_bottom * BottomSegmentData::record_len(num_children) as u64)?;
        self.set_field(header, F_BOTTOMS_OFF, off)?;
        self.set_field(header, F_NUM_BOTTOM, num_bottom)?;
        self.arena.write_u64(header + F_NUM_CHILDREN, num_children as u64)
    }

    pub fn genome_dims(&mut self, genome: &str) -> Result<GenomeDims> {
        let header = self.header_of(genome)?;
        Ok(GenomeDims {
            total_length: self.field(header, F_TOTAL_LEN)?,
            num_top: self.field(header, F_NUM_TOP)?,
            num_bottom: self.field(header, F_NUM_BOTTOM)?,
            num_children: self.field(header, F_NUM_CHILDREN)? as usize,
            has_dna: self.field(header, F_DNA_OFF)? != 0,
        })
    }

    pub fn read_sequences(&mut self, genome: &str) -> Result<Vec<SequenceRecord>> {
        let header = self.header_of(genome)?;
        let off = self.field(header, F_SEQS_OFF)?;
        let len = self.field(header, F_SEQS_LEN)?;
        if off == 0 {
            return Err(HalError::NotFound(format!(
                "genome {genome} has no sequence table"
            )));
        }
        decode_sequences(self.arena.bytes(off, len)?)
    }

    pub fn write_sequences(&mut self, genome: &str, records: &[SequenceRecord]) -> Result<()> {
        let header = self.header_of(genome)?;
        let bytes = encode_sequences(records);
        let off = self.store_record(&bytes)?;
        self.set_field(header, F_SEQS_OFF, off)?;
        self.set_field(header, F_SEQS_LEN, bytes.len() as u64)?;
        // the perfect hash is rebuilt alongside the table it indexes
        let names: Vec<&str> = records.iter().map(|r| r.name.as_str()).collect();
        let hash = SequenceNameHash::build(&names)?;
        let hash_bytes = hash.encode();
        let hash_off = self.store_record(&hash_bytes)?;
        self.set_field(header, F_HASH_OFF, hash_off)?;
        self.set_field(header, F_HASH_LEN, hash_bytes.len() as u64)
    }

    pub fn read_name_hash(&mut self, genome: &str) -> Result<Option<SequenceNameHash>> {
        let header = self.header_of(genome)?;
        let off = self.field(header, F_HASH_OFF)?;
        if off == 0 {
            return Ok(None);
        }
        let len = self.field(header, F_HASH_LEN)?;
        Ok(Some(SequenceNameHash::decode(self.arena.bytes(off, len)?)?))
    }

    pub fn read_genome_meta(&mut self, genome: &str) -> Result<MetaData> {
        let header = self.header_of(genome)?;
        let off = self.field(header, F_META_OFF)?;
        if off == 0 {
            return Ok(MetaData::new());
        }
        let len = self.field(header, F_META_LEN)?;
        MetaData::decode(self.arena.bytes(off, len)?)
    }

    pub fn write_genome_meta(&mut self, genome: &str, meta: &MetaData) -> Result<()> {
        let header = self.header_of(genome)?;
        let bytes = meta.encode();
        let off = self.store_record(&bytes)?;
        self.set_field(header, F_META_OFF, off)?;
        self.set_field(header, F_META_LEN, bytes.len() as u64)
    }

    fn segment_slot(&self, genome: &str, field: u64, count_field: u64, i: Size, stride: u64, what: &str) -> Result<u64> {
        let header = self.header_of(genome)?;
        let count = self.field(header, count_field)?;
        if i >= count {
            return Err(HalError::out_of_range(
                format!("{what} of {genome}"),
                i as i64,
                count,
            ));
        }
        Ok(self.field(header, field)? + i * stride)
    }

    pub fn top(&mut self, genome: &str, i: Size) -> Result<TopSegmentData> {
        let at = self.segment_slot(
            genome,
            F_TOPS_OFF,
            F_NUM_TOP,
            i,
            TOP_SEGMENT_LEN as u64,
            "top segment array",
        )?;
        Ok(TopSegmentData::decode(self.arena.bytes(at, TOP_SEGMENT_LEN as u64)?))
    }

    pub fn set_top(&mut self, genome: &str, i: Size, seg: &TopSegmentData) -> Result<()> {
        let at = self.segment_slot(
            genome,
            F_TOPS_OFF,
            F_NUM_TOP,
            i,
            TOP_SEGMENT_LEN as u64,
            "top segment array",
        )?;
        let mut buf = [0u8; TOP_SEGMENT_LEN];
        seg.encode(&mut buf);
        self.arena.bytes_mut(at, TOP_SEGMENT_LEN as u64)?.copy_from_slice(&buf);
        Ok(())
    }

    pub fn bottom(&mut self, genome: &str, num_children: usize, i: Size) -> Result<BottomSegmentData> {
        let stride = BottomSegmentData::record_len(num_children) as u64;
        let at = self.segment_slot(genome, F_BOTTOMS_OFF, F_NUM_BOTTOM, i, stride, "bottom segment array")?;
        Ok(BottomSegmentData::decode(
            self.arena.bytes(at, stride)?,
            num_children,
        ))
    }

    pub fn set_bottom(&mut self, genome: &str, i: Size, seg: &BottomSegmentData) -> Result<()> {
        let stride = BottomSegmentData::record_len(seg.children.len()) as u64;
        let at = self.segment_slot(genome, F_BOTTOMS_OFF, F_NUM_BOTTOM, i, stride, "bottom segment array")?;
        let mut buf = vec![0u8; stride as usize];
        seg.encode(&mut buf);
        self.arena.bytes_mut(at, stride)?.copy_from_slice(&buf);
        Ok(())
    }

    fn dna_location(&self, genome: &str, start: Size, len: Size) -> Result<(u64, Size)> {
        let header = self.header_of(genome)?;
        let total = self.field(header, F_TOTAL_LEN)?;
        if len > 0 && start + len > total {
            return Err(HalError::out_of_range(
                format!("DNA array of {genome}"),
                (start + len - 1) as i64,
                total,
            ));
        }
        let dna_off = self.field(header, F_DNA_OFF)?;
        if dna_off == 0 {
            return Err(HalError::NotFound(format!("genome {genome} stores no DNA")));
        }
        Ok((dna_off, total))
    }

    /// Read `len` bases as canonical uppercase ASCII, unpacking nibbles
    /// (high nibble first).
    pub fn dna_read(&mut self, genome: &str, start: Size, len: Size) -> Result<Vec<u8>> {
        if len == 0 {
            return Ok(Vec::new());
        }
        let (dna_off, _) = self.dna_location(genome, start, len)?;
        let first_byte = start / 2;
        let last_byte = (start + len - 1) / 2;
        let packed = self
            .arena
            .bytes(dna_off + first_byte, last_byte - first_byte + 1)?;
        let mut out = Vec::with_capacity(len as usize);
        for pos in start..start + len {
            let byte = packed[(pos / 2 - first_byte) as usize];
            let code = if pos % 2 == 0 { byte >> 4 } else { byte & 0x0f };
            let base = Base::from_code(code).ok_or_else(|| {
                HalError::CorruptAlignment(format!(
                    "invalid DNA code {code} at position {pos} of {genome}"
                ))
            })?;
            out.push(base.to_char() as u8);
        }
        Ok(out)
    }

    /// Write canonical uppercase ASCII bases. Bytes shared with untouched
    /// neighbours are read-modify-written.
    pub fn dna_write(&mut self, genome: &str, start: Size, bases: &[u8]) -> Result<()> {
        if bases.is_empty() {
            return Ok(());
        }
        let len = bases.len() as Size;
        let (dna_off, _) = self.dna_location(genome, start, len)?;
        let first_byte = start / 2;
        let last_byte = (start + len - 1) / 2;
        let slice = self
            .arena
            .bytes_mut(dna_off + first_byte, last_byte - first_byte + 1)?;
        for (i, &ascii) in bases.iter().enumerate() {
            let pos = start + i as Size;
            let code = Base::from_char(ascii as char)
                .ok_or_else(|| {
                    HalError::PreconditionViolated(format!(
                        "invalid DNA character {:?} at position {pos}",
                        ascii as char
                    ))
                })?
                .code();
            let at = (pos / 2 - first_byte) as usize;
            if pos % 2 == 0 {
                slice[at] = (slice[at] & 0x0f) | (code << 4);
            } else {
                slice[at] = (slice[at] & 0xf0) | code;
            }
        }
        Ok(())
    }

    /// Rename in place when the new name fits the record's capacity,
    /// otherwise allocate a fresh name record and swing the header.
    pub fn rename_genome(&mut self, old: &str, new: &str) -> Result<()> {
        let header = match self.headers.get(old) {
            Some(&h) => h,
            // nothing stored yet for this genome; only the tree knows it
            None => return Ok(()),
        };
        let cap = LittleEndian::read_u32(self.arena.bytes(header + F_NAME_CAP, 4)?);
        if new.len() as u32 <= cap {
            let name_off = self.field(header, F_NAME_OFF)?;
            self.arena
                .bytes_mut(name_off, new.len() as u64)?
                .copy_from_slice(new.as_bytes());
        } else {
            let name_off = self.store_record(new.as_bytes())?;
            self.set_field(header, F_NAME_OFF, name_off)?;
            let mut buf = [0u8; 4];
            LittleEndian::write_u32(&mut buf, new.len() as u32);
            self.arena.bytes_mut(header + F_NAME_CAP, 4)?.copy_from_slice(&buf);
        }
        let mut buf = [0u8; 4];
        LittleEndian::write_u32(&mut buf, new.len() as u32);
        self.arena.bytes_mut(header + F_NAME_LEN, 4)?.copy_from_slice(&buf);
        let off = self.headers.shift_remove(old).unwrap();
        self.headers.insert(new.to_string(), off);
        Ok(())
    }

    pub fn flush(&mut self) -> Result<()> {
        self.arena.flush()
    }
}
