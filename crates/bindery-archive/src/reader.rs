//! Read side of the archive: validation, the name index, and the
//! [`Loader`] protocol.
//!
//! [`Archive::open`] validates the whole table of contents up front and
//! builds the name index once; after that every lookup is O(1). Payload
//! decompression happens lazily on [`get`](Archive::get), never at open
//! time, so startup cost is proportional to the entries actually used.

use std::borrow::Cow;
use std::collections::HashMap;
use std::io::{self, Read};
use std::path::Path;

use flate2::read::DeflateDecoder;

use crate::format::{EntryKind, HEADER_SIZE, Header, TocEntry};

/// Archive open or access error.
///
/// Any variant produced during [`Archive::open`] is fatal for that open:
/// no handle is returned and no lookup can be partially satisfied.
#[derive(Debug, thiserror::Error)]
pub enum FormatError {
    #[error("file too small: {0} bytes (minimum {HEADER_SIZE})")]
    FileTooSmall(usize),
    #[error("invalid magic: expected BNDR")]
    InvalidMagic,
    #[error("unsupported version: {0} (expected {expected})", expected = crate::format::VERSION)]
    UnsupportedVersion(u32),
    #[error("table of contents out of bounds: offset {offset} size {size}, file is {file_len} bytes")]
    TocOutOfBounds { offset: u64, size: u64, file_len: u64 },
    #[error("table of contents checksum mismatch: header says {expected:#010x}, got {actual:#010x}")]
    ChecksumMismatch { expected: u32, actual: u32 },
    #[error("truncated table of contents")]
    TruncatedToc,
    #[error("unknown entry kind tag {tag}")]
    UnknownEntryKind { tag: u8 },
    #[error("payload for `{name}` out of bounds: offset {offset} size {size}")]
    PayloadOutOfBounds { name: String, offset: u64, size: u64 },
    #[error("duplicate entry `{0}`")]
    DuplicateEntry(String),
    #[error("entry `{name}` decompressed to {actual} bytes, expected {expected}")]
    SizeMismatch {
        name: String,
        expected: u64,
        actual: u64,
    },
    #[error("corrupt payload for `{name}`: {source}")]
    Corrupt { name: String, source: io::Error },
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

/// One resolved entry: its type tag and (decompressed) bytes.
#[derive(Debug)]
pub struct Entry<'a> {
    pub kind: EntryKind,
    pub bytes: Cow<'a, [u8]>,
}

/// The protocol an embedding runtime uses to satisfy module lookups from
/// an archive instead of the filesystem.
///
/// The protocol only supplies bytes and metadata; it never executes code.
pub trait Loader {
    /// Does an entry with this exact name exist?
    fn has(&self, name: &str) -> bool;

    /// Fetch an entry's type tag and bytes. `None` if the name is absent;
    /// `Err` only when a stored payload fails to decompress.
    fn get(&self, name: &str) -> Option<Result<Entry<'_>, FormatError>>;

    /// Immediate child names of a package, in table-of-contents order.
    /// An empty `package` lists top-level entries.
    fn children(&self, package: &str) -> Vec<&str>;
}

/// An opened archive with its in-memory name index.
///
/// Read-only and safe for concurrent lookups: `get` decompresses into a
/// fresh buffer per call, so calls for distinct names share no mutable
/// state. Concurrent `get`s for the same name each pay the inflate cost.
#[derive(Debug)]
pub struct Archive {
    bytes: Vec<u8>,
    toc: Vec<TocEntry>,
    index: HashMap<String, usize>,
}

impl Archive {
    /// Open an archive file, validating header and table of contents.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, FormatError> {
        let bytes = std::fs::read(path)?;
        Self::from_bytes(bytes)
    }

    /// Open an archive from owned bytes.
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self, FormatError> {
        let header = Header::from_bytes(&bytes)?;
        if !header.validate_magic() {
            return Err(FormatError::InvalidMagic);
        }
        if !header.validate_version() {
            return Err(FormatError::UnsupportedVersion(header.version));
        }

        let file_len = bytes.len() as u64;
        let toc_end = header.toc_offset.checked_add(header.toc_size);
        if header.toc_offset < HEADER_SIZE as u64 || toc_end.is_none_or(|end| end > file_len) {
            return Err(FormatError::TocOutOfBounds {
                offset: header.toc_offset,
                size: header.toc_size,
                file_len,
            });
        }

        let toc_bytes =
            &bytes[header.toc_offset as usize..(header.toc_offset + header.toc_size) as usize];
        let actual = crc32fast::hash(toc_bytes);
        if actual != header.toc_checksum {
            return Err(FormatError::ChecksumMismatch {
                expected: header.toc_checksum,
                actual,
            });
        }

        let mut toc = Vec::with_capacity(header.entry_count as usize);
        let mut index = HashMap::with_capacity(header.entry_count as usize);
        let mut pos = 0usize;
        for i in 0..header.entry_count as usize {
            let entry = TocEntry::decode(toc_bytes, &mut pos)?;
            let payload_end = entry.offset.checked_add(entry.stored_size);
            if entry.offset < HEADER_SIZE as u64
                || payload_end.is_none_or(|end| end > header.toc_offset)
            {
                return Err(FormatError::PayloadOutOfBounds {
                    name: entry.name.clone(),
                    offset: entry.offset,
                    size: entry.stored_size,
                });
            }
            if index.insert(entry.name.clone(), i).is_some() {
                return Err(FormatError::DuplicateEntry(entry.name.clone()));
            }
            toc.push(entry);
        }
        if pos != toc_bytes.len() {
            return Err(FormatError::TruncatedToc);
        }

        Ok(Self { bytes, toc, index })
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.toc.len()
    }

    /// Check if the archive has no entries.
    pub fn is_empty(&self) -> bool {
        self.toc.is_empty()
    }

    /// Entry names in table-of-contents order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.toc.iter().map(|e| e.name.as_str())
    }

    /// The table-of-contents record for a name, if present.
    pub fn toc_entry(&self, name: &str) -> Option<&TocEntry> {
        self.index.get(name).map(|&i| &self.toc[i])
    }

    /// Whether the named entry is a package (marker or package code).
    pub fn is_package(&self, name: &str) -> bool {
        self.toc_entry(name).is_some_and(TocEntry::is_package)
    }

    fn payload(&self, entry: &TocEntry) -> &[u8] {
        // Bounds were validated at open time.
        &self.bytes[entry.offset as usize..(entry.offset + entry.stored_size) as usize]
    }

    fn inflate(&self, entry: &TocEntry) -> Result<Vec<u8>, FormatError> {
        let mut out = Vec::with_capacity(entry.real_size as usize);
        let mut decoder = DeflateDecoder::new(self.payload(entry));
        decoder.read_to_end(&mut out).map_err(|e| FormatError::Corrupt {
            name: entry.name.clone(),
            source: e,
        })?;
        if out.len() as u64 != entry.real_size {
            return Err(FormatError::SizeMismatch {
                name: entry.name.clone(),
                expected: entry.real_size,
                actual: out.len() as u64,
            });
        }
        Ok(out)
    }
}

impl Loader for Archive {
    fn has(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    fn get(&self, name: &str) -> Option<Result<Entry<'_>, FormatError>> {
        let entry = self.toc_entry(name)?;
        let result = if entry.is_compressed() {
            self.inflate(entry).map(|bytes| Entry {
                kind: entry.kind,
                bytes: Cow::Owned(bytes),
            })
        } else {
            Ok(Entry {
                kind: entry.kind,
                bytes: Cow::Borrowed(self.payload(entry)),
            })
        };
        Some(result)
    }

    fn children(&self, package: &str) -> Vec<&str> {
        self.toc
            .iter()
            .filter_map(|e| {
                let rest = if package.is_empty() {
                    e.name.as_str()
                } else {
                    e.name
                        .strip_prefix(package)?
                        .strip_prefix('.')?
                };
                if rest.is_empty() || rest.contains('.') {
                    None
                } else {
                    Some(e.name.as_str())
                }
            })
            .collect()
    }
}
