/// DNA access through a byte-oriented window.
///
/// The window buffers a block of decoded bases around the cursor; writes
/// land in the window and are flushed when the cursor leaves it, on an
/// explicit `flush()`, or on drop. Each backend does its own packing below
/// this layer (bytes in the chunked store, nibbles in the arena).
use crate::error::{HalError, Result};
use crate::genome::Genome;
use crate::types::{complement_char, Size};
use log::warn;

const WINDOW_BASES: Size = 1024;

struct DnaBuffer {
    start: Size,
    bases: Vec<u8>,
    dirty: bool,
}

/// Cursor over a genome's DNA, optionally walking the reverse complement.
pub struct DnaIterator {
    genome: Genome,
    position: i64,
    reversed: bool,
    buffer: Option<DnaBuffer>,
}

impl DnaIterator {
    pub fn new(genome: Genome, position: Size) -> Result<DnaIterator> {
        let len = genome.sequence_length();
        if position > len {
            return Err(HalError::out_of_range(
                format!("DNA of {}", genome.name()),
                position as i64,
                len,
            ));
        }
        Ok(DnaIterator {
            genome,
            position: position as i64,
            reversed: false,
            buffer: None,
        })
    }

    pub fn genome(&self) -> &Genome {
        &self.genome
    }

    pub fn position(&self) -> i64 {
        self.position
    }

    pub fn reversed(&self) -> bool {
        self.reversed
    }

    /// Flip to the other strand in place; the cursor stays on its base.
    pub fn reverse(&mut self) {
        self.reversed = !self.reversed;
    }

    pub fn at_end(&self) -> bool {
        self.position < 0 || self.position as Size >= self.genome.sequence_length()
    }

    /// Step one base along the chosen strand.
    pub fn to_right(&mut self) {
        self.position += if self.reversed { -1 } else { 1 };
    }

    pub fn to_site(&mut self, position: Size) -> Result<()> {
        let len = self.genome.sequence_length();
        if position >= len {
            return Err(HalError::out_of_range(
                format!("DNA of {}", self.genome.name()),
                position as i64,
                len,
            ));
        }
        self.position = position as i64;
        Ok(())
    }

    /// Base under the cursor (complemented on the reverse strand).
    pub fn base(&mut self) -> Result<char> {
        let pos = self.check_position()?;
        let raw = self.window_byte(pos)? as char;
        Ok(if self.reversed { complement_char(raw) } else { raw })
    }

    /// Overwrite the base under the cursor. A reverse-strand write stores
    /// the complement.
    pub fn set_base(&mut self, base: char) -> Result<()> {
        let pos = self.check_position()?;
        let stored = if self.reversed {
            complement_char(base)
        } else {
            base
        };
        let canonical = crate::types::Base::from_char(stored)
            .ok_or_else(|| {
                HalError::PreconditionViolated(format!("invalid DNA character {base:?}"))
            })?
            .to_char() as u8;
        self.ensure_window(pos)?;
        let buf = self.buffer.as_mut().unwrap();
        buf.bases[(pos - buf.start) as usize] = canonical;
        buf.dirty = true;
        Ok(())
    }

    /// Read `length` bases from the cursor, advancing past them.
    pub fn read_string(&mut self, length: Size) -> Result<String> {
        let mut out = String::with_capacity(length as usize);
        for _ in 0..length {
            out.push(self.base()?);
            self.to_right();
        }
        Ok(out)
    }

    /// Write a string from the cursor, advancing past it.
    pub fn write_string(&mut self, dna: &str) -> Result<()> {
        for c in dna.chars() {
            self.set_base(c)?;
            self.to_right();
        }
        Ok(())
    }

    /// Write the window back if dirty.
    pub fn flush(&mut self) -> Result<()> {
        if let Some(buf) = &mut self.buffer {
            if buf.dirty {
                let text = std::str::from_utf8(&buf.bases)
                    .expect("window holds canonical ASCII")
                    .to_string();
                self.genome.set_sub_string(buf.start, &text)?;
                buf.dirty = false;
            }
        }
        Ok(())
    }

    fn check_position(&self) -> Result<Size> {
        if self.at_end() {
            return Err(HalError::out_of_range(
                format!("DNA of {}", self.genome.name()),
                self.position,
                self.genome.sequence_length(),
            ));
        }
        Ok(self.position as Size)
    }

    fn window_byte(&mut self, pos: Size) -> Result<u8> {
        self.ensure_window(pos)?;
        let buf = self.buffer.as_ref().unwrap();
        Ok(buf.bases[(pos - buf.start) as usize])
    }

    fn ensure_window(&mut self, pos: Size) -> Result<()> {
        if let Some(buf) = &self.buffer {
            if pos >= buf.start && pos < buf.start + buf.bases.len() as Size {
                return Ok(());
            }
        }
        self.flush()?;
        let len = self.genome.sequence_length();
        let start = pos - pos % WINDOW_BASES;
        let take = WINDOW_BASES.min(len - start);
        let text = self.genome.get_sub_string(start, take)?;
        self.buffer = Some(DnaBuffer {
            start,
            bases: text.into_bytes(),
            dirty: false,
        });
        Ok(())
    }
}

impl Drop for DnaIterator {
    fn drop(&mut self) {
        if let Err(err) = self.flush() {
            warn!("DNA window flush on drop failed: {err}");
        }
    }
}
