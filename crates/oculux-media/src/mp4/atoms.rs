//! MP4 atom definitions and slice-based header parsing.

use crate::{Error, Result};

/// Four-character atom type code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AtomType(pub [u8; 4]);

impl AtomType {
    pub const FTYP: Self = Self(*b"ftyp");
    pub const STYP: Self = Self(*b"styp");
    pub const MOOV: Self = Self(*b"moov");
    pub const MDAT: Self = Self(*b"mdat");
    pub const MVHD: Self = Self(*b"mvhd");
    pub const TRAK: Self = Self(*b"trak");
    pub const TKHD: Self = Self(*b"tkhd");
    pub const MDIA: Self = Self(*b"mdia");
    pub const MDHD: Self = Self(*b"mdhd");
    pub const HDLR: Self = Self(*b"hdlr");
    pub const MINF: Self = Self(*b"minf");
    pub const STBL: Self = Self(*b"stbl");
    pub const STSD: Self = Self(*b"stsd");
    pub const MVEX: Self = Self(*b"mvex");
    pub const MEHD: Self = Self(*b"mehd");
    pub const TREX: Self = Self(*b"trex");
    pub const SIDX: Self = Self(*b"sidx");
    pub const MOOF: Self = Self(*b"moof");
    pub const MFHD: Self = Self(*b"mfhd");
    pub const TRAF: Self = Self(*b"traf");
    pub const TFHD: Self = Self(*b"tfhd");
    pub const TFDT: Self = Self(*b"tfdt");
    pub const TRUN: Self = Self(*b"trun");
    pub const SAIO: Self = Self(*b"saio");
    pub const SAIZ: Self = Self(*b"saiz");
    pub const SENC: Self = Self(*b"senc");

    /// Create from bytes.
    pub fn from_bytes(bytes: [u8; 4]) -> Self {
        Self(bytes)
    }

    /// Get the 4-char code as a string.
    pub fn as_str(&self) -> &str {
        std::str::from_utf8(&self.0).unwrap_or("????")
    }
}

impl std::fmt::Display for AtomType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Parsed atom header.
#[derive(Debug, Clone, Copy)]
pub struct Atom {
    /// Atom type code.
    pub atom_type: AtomType,
    /// Atom size including header. Zero means "extends to end of stream".
    pub size: u64,
    /// Size of the header (8 or 16 bytes).
    pub header_size: u8,
}

impl Atom {
    /// Parse an atom header from the start of `buf`.
    ///
    /// Returns `Ok(None)` when fewer bytes than the header needs are
    /// available.
    pub fn parse(buf: &[u8]) -> Result<Option<Self>> {
        if buf.len() < 8 {
            return Ok(None);
        }

        let size = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]) as u64;
        let atom_type = AtomType::from_bytes([buf[4], buf[5], buf[6], buf[7]]);

        let (size, header_size) = match size {
            1 => {
                if buf.len() < 16 {
                    return Ok(None);
                }
                (read_u64(buf, 8)?, 16u8)
            }
            0 => (0, 8u8),
            _ => (size, 8u8),
        };

        if size != 0 && size < header_size as u64 {
            return Err(Error::invalid_mp4(format!(
                "atom {atom_type} declares size {size}, smaller than its header"
            )));
        }

        Ok(Some(Self {
            atom_type,
            size,
            header_size,
        }))
    }

    /// Get the data size (size - header).
    pub fn data_size(&self) -> u64 {
        self.size.saturating_sub(self.header_size as u64)
    }
}

/// A child atom inside a container body.
#[derive(Debug, Clone, Copy)]
pub struct Child<'a> {
    /// Parsed header.
    pub atom: Atom,
    /// The complete box, header included.
    pub raw: &'a [u8],
}

impl<'a> Child<'a> {
    /// The box content after the header.
    pub fn body(&self) -> &'a [u8] {
        &self.raw[self.atom.header_size as usize..]
    }
}

/// Iterator over the child atoms packed inside a container body.
///
/// Iteration stops at the first child that does not fit in the remaining
/// bytes.
pub struct Children<'a> {
    data: &'a [u8],
    pos: usize,
}

/// Iterate over the child atoms of a container body.
pub fn children(data: &[u8]) -> Children<'_> {
    Children { data, pos: 0 }
}

impl<'a> Iterator for Children<'a> {
    type Item = Child<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        let rest = self.data.get(self.pos..)?;
        let atom = Atom::parse(rest).ok().flatten()?;
        let size = if atom.size == 0 {
            rest.len()
        } else {
            usize::try_from(atom.size).ok()?
        };
        if size > rest.len() {
            return None;
        }
        self.pos += size;
        Some(Child {
            atom,
            raw: &rest[..size],
        })
    }
}

/// Find the body of the first child atom with the given type.
pub fn find_child(data: &[u8], atom_type: AtomType) -> Option<&[u8]> {
    children(data)
        .find(|child| child.atom.atom_type == atom_type)
        .map(|child| child.body())
}

fn underflow(data: &[u8], need: usize) -> Error {
    Error::BufferUnderflow {
        need,
        have: data.len(),
    }
}

/// Read a big-endian u16 at `offset`.
pub fn read_u16(data: &[u8], offset: usize) -> Result<u16> {
    data.get(offset..offset + 2)
        .map(|b| u16::from_be_bytes([b[0], b[1]]))
        .ok_or_else(|| underflow(data, offset + 2))
}

/// Read a big-endian u32 at `offset`.
pub fn read_u32(data: &[u8], offset: usize) -> Result<u32> {
    data.get(offset..offset + 4)
        .map(|b| u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
        .ok_or_else(|| underflow(data, offset + 4))
}

/// Read a big-endian u64 at `offset`.
pub fn read_u64(data: &[u8], offset: usize) -> Result<u64> {
    data.get(offset..offset + 8)
        .map(|b| u64::from_be_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]]))
        .ok_or_else(|| underflow(data, offset + 8))
}

/// Split a full box body into `(version, flags)`.
pub fn fullbox_header(data: &[u8]) -> Result<(u8, u32)> {
    let value = read_u32(data, 0)?;
    Ok(((value >> 24) as u8, value & 0x00FF_FFFF))
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn test_parse_needs_full_header() {
        assert!(Atom::parse(&[0, 0, 0, 16, b'm']).unwrap().is_none());

        let atom = Atom::parse(&[0, 0, 0, 16, b'm', b'o', b'o', b'v'])
            .unwrap()
            .unwrap();
        assert_eq!(atom.atom_type, AtomType::MOOV);
        assert_eq!(atom.size, 16);
        assert_eq!(atom.data_size(), 8);
    }

    #[test]
    fn test_parse_extended_size() {
        let mut buf = vec![0, 0, 0, 1];
        buf.extend_from_slice(b"mdat");
        buf.extend_from_slice(&40u64.to_be_bytes());
        let atom = Atom::parse(&buf).unwrap().unwrap();
        assert_eq!(atom.size, 40);
        assert_eq!(atom.header_size, 16);
    }

    #[test]
    fn test_parse_rejects_undersized_atom() {
        let result = Atom::parse(&[0, 0, 0, 4, b'f', b'r', b'e', b'e']);
        assert_matches!(result, Err(Error::InvalidMp4(_)));
    }

    #[test]
    fn test_children_iteration() {
        let mut data = Vec::new();
        data.extend_from_slice(&[0, 0, 0, 9]);
        data.extend_from_slice(b"aaaa");
        data.push(7);
        data.extend_from_slice(&[0, 0, 0, 8]);
        data.extend_from_slice(b"bbbb");
        // Truncated trailing child is ignored.
        data.extend_from_slice(&[0, 0, 0, 20]);
        data.extend_from_slice(b"cccc");

        let found: Vec<_> = children(&data)
            .map(|child| (child.atom.atom_type, child.body().to_vec()))
            .collect();
        assert_eq!(found.len(), 2);
        assert_eq!(found[0], (AtomType(*b"aaaa"), vec![7]));
        assert_eq!(found[1], (AtomType(*b"bbbb"), vec![]));
        assert_eq!(find_child(&data, AtomType(*b"aaaa")), Some(&[7u8][..]));
    }

    #[test]
    fn test_read_helpers_report_underflow() {
        let data = [0u8, 1, 2];
        assert_eq!(read_u16(&data, 1).unwrap(), 0x0102);
        assert_matches!(
            read_u32(&data, 0),
            Err(Error::BufferUnderflow { need: 4, have: 3 })
        );
    }
}
