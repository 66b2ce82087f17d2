/// String key/value metadata attached to the alignment and to each genome.
///
/// The map is held in memory, tracked with a dirty bit, and persisted
/// wholesale on flush. Insertion order is kept so a round-trip reproduces
/// the file byte for byte.
use crate::error::{HalError, Result};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use indexmap::IndexMap;

#[derive(Debug, Default, Clone)]
pub struct MetaData {
    map: IndexMap<String, String>,
    dirty: bool,
}

impl MetaData {
    pub fn new() -> MetaData {
        MetaData::default()
    }

    pub fn set(&mut self, key: &str, value: &str) {
        self.map.insert(key.to_string(), value.to_string());
        self.dirty = true;
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.map.get(key).map(|v| v.as_str())
    }

    pub fn has(&self, key: &str) -> bool {
        self.map.contains_key(key)
    }

    pub fn map(&self) -> &IndexMap<String, String> {
        &self.map
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub(crate) fn mark_clean(&mut self) {
        self.dirty = false;
    }

    pub(crate) fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.write_u32::<LittleEndian>(self.map.len() as u32).unwrap();
        for (k, v) in &self.map {
            out.write_u32::<LittleEndian>(k.len() as u32).unwrap();
            out.extend_from_slice(k.as_bytes());
            out.write_u32::<LittleEndian>(v.len() as u32).unwrap();
            out.extend_from_slice(v.as_bytes());
        }
        out
    }

    pub(crate) fn decode(mut buf: &[u8]) -> Result<MetaData> {
        let count = buf.read_u32::<LittleEndian>()?;
        let mut map = IndexMap::with_capacity(count as usize);
        for _ in 0..count {
            let k = read_string(&mut buf)?;
            let v = read_string(&mut buf)?;
            map.insert(k, v);
        }
        Ok(MetaData { map, dirty: false })
    }
}

fn read_string(buf: &mut &[u8]) -> Result<String> {
    let len = buf.read_u32::<LittleEndian>()? as usize;
    if buf.len() < len {
        return Err(HalError::BadFormat("truncated metadata record".into()));
    }
    let s = std::str::from_utf8(&buf[..len])
        .map_err(|_| HalError::BadFormat("metadata is not UTF-8".into()))?
        .to_string();
    *buf = &buf[len..];
    Ok(s)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metadata_roundtrip() {
        let mut meta = MetaData::new();
        meta.set("assembler", "cactus");
        meta.set("date", "2024-01-01");
        assert!(meta.is_dirty());
        let decoded = MetaData::decode(&meta.encode()).unwrap();
        assert_eq!(decoded.get("assembler"), Some("cactus"));
        assert_eq!(decoded.get("date"), Some("2024-01-01"));
        assert!(!decoded.is_dirty());
        // order preserved
        let keys: Vec<_> = decoded.map().keys().cloned().collect();
        assert_eq!(keys, ["assembler", "date"]);
    }
}
