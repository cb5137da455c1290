//! Archive container format and loader protocol for bindery.
//!
//! This crate contains:
//! - Format definitions (Header, table-of-contents entries, kind tags)
//! - The read-side [`Archive`] with its O(1) name index
//! - The [`Loader`] protocol an embedding runtime consumes
//!
//! The archive layout is: 32-byte header, concatenated entry payloads,
//! table of contents. The table of contents sits at the end because entry
//! offsets are only known after payloads are finalized.

pub mod format;
pub mod reader;


pub use format::{
    EntryKind, FLAG_COMPRESSED, FLAG_PACKAGE, HEADER_SIZE, Header, MAGIC, TocEntry, VERSION,
};
pub use reader::{Archive, Entry, FormatError, Loader};
