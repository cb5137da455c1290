//! Archive file layout (header and table of contents).
//!
//! All integers are little-endian. The file is:
//!
//! ```text
//! Header (32 bytes) → entry payloads → table of contents
//! ```
//!
//! Table-of-contents entries are variable length (they carry the entry
//! name inline) and are written in the same order the graph builder
//! created the nodes, so identical inputs produce identical archives.

use crate::reader::FormatError;

/// Magic bytes at offset 0: b"BNDR".
pub const MAGIC: [u8; 4] = *b"BNDR";

/// Current format version.
pub const VERSION: u32 = 1;

/// Size of the fixed header in bytes.
pub const HEADER_SIZE: usize = 32;

/// Entry payload is deflate-compressed.
pub const FLAG_COMPRESSED: u8 = 0b0000_0001;

/// Entry is a package (its name owns a subtree of dotted names).
pub const FLAG_PACKAGE: u8 = 0b0000_0010;

/// File header - first 32 bytes of the archive.
///
/// Layout:
/// - 0-3: magic bytes b"BNDR"
/// - 4-7: format version (u32)
/// - 8-11: entry count (u32)
/// - 12-19: table-of-contents offset (u64)
/// - 20-27: table-of-contents size in bytes (u64)
/// - 28-31: CRC32 of the table-of-contents bytes (u32)
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Header {
    pub magic: [u8; 4],
    pub version: u32,
    pub entry_count: u32,
    pub toc_offset: u64,
    pub toc_size: u64,
    pub toc_checksum: u32,
}

impl Default for Header {
    fn default() -> Self {
        Self {
            magic: MAGIC,
            version: VERSION,
            entry_count: 0,
            toc_offset: 0,
            toc_size: 0,
            toc_checksum: 0,
        }
    }
}

impl Header {
    /// Encode the header into its 32-byte representation.
    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut bytes = [0u8; HEADER_SIZE];
        bytes[0..4].copy_from_slice(&self.magic);
        bytes[4..8].copy_from_slice(&self.version.to_le_bytes());
        bytes[8..12].copy_from_slice(&self.entry_count.to_le_bytes());
        bytes[12..20].copy_from_slice(&self.toc_offset.to_le_bytes());
        bytes[20..28].copy_from_slice(&self.toc_size.to_le_bytes());
        bytes[28..32].copy_from_slice(&self.toc_checksum.to_le_bytes());
        bytes
    }

    /// Decode a header from the first 32 bytes of an archive.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, FormatError> {
        if bytes.len() < HEADER_SIZE {
            return Err(FormatError::FileTooSmall(bytes.len()));
        }
        Ok(Self {
            magic: [bytes[0], bytes[1], bytes[2], bytes[3]],
            version: read_u32_le(bytes, 4),
            entry_count: read_u32_le(bytes, 8),
            toc_offset: read_u64_le(bytes, 12),
            toc_size: read_u64_le(bytes, 20),
            toc_checksum: read_u32_le(bytes, 28),
        })
    }

    pub fn validate_magic(&self) -> bool {
        self.magic == MAGIC
    }

    pub fn validate_version(&self) -> bool {
        self.version == VERSION
    }
}

/// Type tag of an archive entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum EntryKind {
    /// Module code (source unit bytes).
    Code = 0,
    /// Native extension binary.
    Extension = 1,
    /// Bundled data file.
    Data = 2,
    /// Zero-length marker for a package with no init code.
    PackageMarker = 3,
}

impl EntryKind {
    pub fn from_u8(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(Self::Code),
            1 => Some(Self::Extension),
            2 => Some(Self::Data),
            3 => Some(Self::PackageMarker),
            _ => None,
        }
    }
}

/// One table-of-contents record.
///
/// Wire layout: name length (u16), name bytes (UTF-8), kind tag (u8),
/// flags (u8), payload offset (u64), stored length (u64), uncompressed
/// length (u64).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TocEntry {
    pub name: String,
    pub kind: EntryKind,
    pub flags: u8,
    pub offset: u64,
    pub stored_size: u64,
    pub real_size: u64,
}

impl TocEntry {
    pub fn is_compressed(&self) -> bool {
        self.flags & FLAG_COMPRESSED != 0
    }

    pub fn is_package(&self) -> bool {
        self.flags & FLAG_PACKAGE != 0 || self.kind == EntryKind::PackageMarker
    }

    /// Append the wire representation to `out`.
    pub fn encode(&self, out: &mut Vec<u8>) {
        let name = self.name.as_bytes();
        debug_assert!(name.len() <= u16::MAX as usize, "entry name too long");
        out.extend_from_slice(&(name.len() as u16).to_le_bytes());
        out.extend_from_slice(name);
        out.push(self.kind as u8);
        out.push(self.flags);
        out.extend_from_slice(&self.offset.to_le_bytes());
        out.extend_from_slice(&self.stored_size.to_le_bytes());
        out.extend_from_slice(&self.real_size.to_le_bytes());
    }

    /// Decode one record from `bytes` starting at `*pos`, advancing `*pos`.
    pub fn decode(bytes: &[u8], pos: &mut usize) -> Result<Self, FormatError> {
        let name_len = take(bytes, pos, 2).map(|b| read_u16_le(b, 0))? as usize;
        let name_bytes = take(bytes, pos, name_len)?;
        let name = std::str::from_utf8(name_bytes)
            .map_err(|_| FormatError::TruncatedToc)?
            .to_owned();
        let tag = take(bytes, pos, 1)?[0];
        let kind = EntryKind::from_u8(tag).ok_or(FormatError::UnknownEntryKind { tag })?;
        let flags = take(bytes, pos, 1)?[0];
        let offset = take(bytes, pos, 8).map(|b| read_u64_le(b, 0))?;
        let stored_size = take(bytes, pos, 8).map(|b| read_u64_le(b, 0))?;
        let real_size = take(bytes, pos, 8).map(|b| read_u64_le(b, 0))?;
        Ok(Self {
            name,
            kind,
            flags,
            offset,
            stored_size,
            real_size,
        })
    }
}

/// Slice `len` bytes at `*pos`, advancing `*pos`.
fn take<'a>(bytes: &'a [u8], pos: &mut usize, len: usize) -> Result<&'a [u8], FormatError> {
    let end = pos.checked_add(len).ok_or(FormatError::TruncatedToc)?;
    if end > bytes.len() {
        return Err(FormatError::TruncatedToc);
    }
    let slice = &bytes[*pos..end];
    *pos = end;
    Ok(slice)
}

#[inline]
fn read_u16_le(bytes: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes([bytes[offset], bytes[offset + 1]])
}

#[inline]
fn read_u32_le(bytes: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([
        bytes[offset],
        bytes[offset + 1],
        bytes[offset + 2],
        bytes[offset + 3],
    ])
}

#[inline]
fn read_u64_le(bytes: &[u8], offset: usize) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&bytes[offset..offset + 8]);
    u64::from_le_bytes(buf)
}
