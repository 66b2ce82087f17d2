/// Core index and base types shared by every component.
///
/// Array indices are signed so that `NULL_INDEX` can mark absent links
/// (a missing parent, an empty child slot, the end of a paralogy chain).

/// Index into a DNA, top-segment or bottom-segment array.
pub type SegmentIndex = i64;

/// Unsigned size/length in bases or elements.
pub type Size = u64;

/// Sentinel for an absent index (no parent, no child, no paralogy link).
pub const NULL_INDEX: SegmentIndex = -1;

/// A DNA base. Case-insensitive on read, canonical uppercase on write.
/// The numeric codes are the nibble encoding used by the mmap backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Base {
    A = 0,
    C = 1,
    G = 2,
    T = 3,
    N = 4,
}

impl Base {
    /// Decode a character, accepting lowercase. Unknown characters are None.
    pub fn from_char(c: char) -> Option<Base> {
        match c {
            'A' | 'a' => Some(Base::A),
            'C' | 'c' => Some(Base::C),
            'G' | 'g' => Some(Base::G),
            'T' | 't' => Some(Base::T),
            'N' | 'n' => Some(Base::N),
            _ => None,
        }
    }

    /// Canonical uppercase character.
    pub fn to_char(self) -> char {
        match self {
            Base::A => 'A',
            Base::C => 'C',
            Base::G => 'G',
            Base::T => 'T',
            Base::N => 'N',
        }
    }

    /// 4-bit code used by the nibble-packed DNA array.
    pub fn code(self) -> u8 {
        self as u8
    }

    /// Decode a 4-bit code. Codes above 4 are invalid.
    pub fn from_code(code: u8) -> Option<Base> {
        match code {
            0 => Some(Base::A),
            1 => Some(Base::C),
            2 => Some(Base::G),
            3 => Some(Base::T),
            4 => Some(Base::N),
            _ => None,
        }
    }

    /// Watson-Crick complement; N stays N.
    pub fn complement(self) -> Base {
        match self {
            Base::A => Base::T,
            Base::T => Base::A,
            Base::C => Base::G,
            Base::G => Base::C,
            Base::N => Base::N,
        }
    }

    pub fn is_n(self) -> bool {
        self == Base::N
    }
}

/// Complement a raw character, preserving unknown characters as N.
pub fn complement_char(c: char) -> char {
    match Base::from_char(c) {
        Some(b) => b.complement().to_char(),
        None => 'N',
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_codes_roundtrip() {
        for c in ['A', 'C', 'G', 'T', 'N'] {
            let b = Base::from_char(c).unwrap();
            assert_eq!(Base::from_code(b.code()), Some(b));
            assert_eq!(b.to_char(), c);
        }
        // lowercase reads map to uppercase writes
        assert_eq!(Base::from_char('g').unwrap().to_char(), 'G');
        assert_eq!(Base::from_char('x'), None);
        assert_eq!(Base::from_code(9), None);
    }

    #[test]
    fn test_complement() {
        assert_eq!(Base::A.complement(), Base::T);
        assert_eq!(Base::G.complement(), Base::C);
        assert_eq!(Base::N.complement(), Base::N);
        assert_eq!(complement_char('a'), 'T');
    }
}
