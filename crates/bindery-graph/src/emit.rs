//! Archive emission: the resolved closure serialized into the container.
//!
//! Entries are written in registry creation order and compressed
//! sequentially, so identical inputs produce byte-identical archives.
//! On-disk writes stage through a sibling temp file and rename into
//! place; a failed write never leaves a truncated archive behind.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use bindery_archive::{
    EntryKind, FLAG_COMPRESSED, FLAG_PACKAGE, HEADER_SIZE, Header, TocEntry,
};
use flate2::Compression;
use flate2::write::DeflateEncoder;
use indexmap::IndexSet;
use tracing::debug;

use crate::build::BuildOutcome;
use crate::registry::NodeKind;

#[derive(Debug, thiserror::Error)]
pub enum ArchiveWriteError {
    #[error("failed to read payload for `{name}`")]
    Payload {
        name: String,
        #[source]
        source: std::io::Error,
    },
    #[error("duplicate archive entry `{0}`")]
    DuplicateEntry(String),
    #[error("failed to write archive to `{path}`")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Serializes a build outcome into archive bytes.
#[derive(Debug, Default)]
pub struct ArchiveWriter {
    level: Compression,
}

impl ArchiveWriter {
    pub fn new() -> Self {
        Self {
            level: Compression::default(),
        }
    }

    pub fn with_compression(mut self, level: Compression) -> Self {
        self.level = level;
        self
    }

    /// Emit the whole container as bytes.
    ///
    /// Node entries come first, in creation order: source units and
    /// package inits as code, init-less packages as zero-length markers,
    /// extensions as binaries. Hook-carried data files and binaries are
    /// appended after the node entries.
    pub fn to_bytes(&self, outcome: &BuildOutcome) -> Result<Vec<u8>, ArchiveWriteError> {
        let mut payloads: Vec<u8> = Vec::new();
        let mut toc: Vec<TocEntry> = Vec::new();
        let mut seen: IndexSet<String> = IndexSet::new();

        for (_, node) in outcome.registry.nodes() {
            match &node.kind {
                NodeKind::Source(unit) => {
                    let bytes = read_payload(&node.name, &unit.path)?;
                    self.push_entry(
                        &mut payloads,
                        &mut toc,
                        &mut seen,
                        &node.name,
                        EntryKind::Code,
                        0,
                        &bytes,
                    )?;
                }
                NodeKind::Package(unit) => match &unit.init {
                    Some(init) => {
                        let bytes = read_payload(&node.name, init)?;
                        self.push_entry(
                            &mut payloads,
                            &mut toc,
                            &mut seen,
                            &node.name,
                            EntryKind::Code,
                            FLAG_PACKAGE,
                            &bytes,
                        )?;
                    }
                    None => {
                        self.push_entry(
                            &mut payloads,
                            &mut toc,
                            &mut seen,
                            &node.name,
                            EntryKind::PackageMarker,
                            FLAG_PACKAGE,
                            &[],
                        )?;
                    }
                },
                NodeKind::Extension(unit) => {
                    let bytes = read_payload(&node.name, &unit.path)?;
                    self.push_entry(
                        &mut payloads,
                        &mut toc,
                        &mut seen,
                        &node.name,
                        EntryKind::Extension,
                        0,
                        &bytes,
                    )?;
                }
                // Aliases are never independently packaged; missing and
                // excluded names have no payload.
                NodeKind::Alias(_) | NodeKind::Missing(_) | NodeKind::Excluded => {}
            }
        }

        for mapping in &outcome.data_files {
            let bytes = read_payload(&mapping.dest, &mapping.source)?;
            self.push_entry(
                &mut payloads,
                &mut toc,
                &mut seen,
                &mapping.dest,
                EntryKind::Data,
                0,
                &bytes,
            )?;
        }
        for mapping in &outcome.binaries {
            let bytes = read_payload(&mapping.dest, &mapping.source)?;
            self.push_entry(
                &mut payloads,
                &mut toc,
                &mut seen,
                &mapping.dest,
                EntryKind::Extension,
                0,
                &bytes,
            )?;
        }

        let mut toc_bytes: Vec<u8> = Vec::new();
        for entry in &toc {
            entry.encode(&mut toc_bytes);
        }

        let header = Header {
            entry_count: toc.len() as u32,
            toc_offset: (HEADER_SIZE + payloads.len()) as u64,
            toc_size: toc_bytes.len() as u64,
            toc_checksum: crc32fast::hash(&toc_bytes),
            ..Header::default()
        };

        let mut out = Vec::with_capacity(HEADER_SIZE + payloads.len() + toc_bytes.len());
        out.extend_from_slice(&header.to_bytes());
        out.extend_from_slice(&payloads);
        out.extend_from_slice(&toc_bytes);
        debug!(entries = toc.len(), bytes = out.len(), "archive assembled");
        Ok(out)
    }

    /// Emit to a file, staging through `<path>.tmp` in the same
    /// directory. The partial file is removed on any failure.
    pub fn write_to_path(
        &self,
        outcome: &BuildOutcome,
        path: &Path,
    ) -> Result<(), ArchiveWriteError> {
        let bytes = self.to_bytes(outcome)?;

        let mut staged = path.as_os_str().to_owned();
        staged.push(".tmp");
        let staged = PathBuf::from(staged);

        let result = fs::write(&staged, &bytes)
            .and_then(|()| fs::rename(&staged, path));
        if let Err(source) = result {
            let _ = fs::remove_file(&staged);
            return Err(ArchiveWriteError::Io {
                path: path.to_path_buf(),
                source,
            });
        }
        Ok(())
    }

    /// Append one payload, compressed when that shrinks it, and its TOC
    /// entry. Offsets are absolute within the final file.
    #[allow(clippy::too_many_arguments)]
    fn push_entry(
        &self,
        payloads: &mut Vec<u8>,
        toc: &mut Vec<TocEntry>,
        seen: &mut IndexSet<String>,
        name: &str,
        kind: EntryKind,
        flags: u8,
        bytes: &[u8],
    ) -> Result<(), ArchiveWriteError> {
        if !seen.insert(name.to_owned()) {
            return Err(ArchiveWriteError::DuplicateEntry(name.to_owned()));
        }

        let (stored, flags) = match self.deflate(name, bytes)? {
            Some(compressed) if compressed.len() < bytes.len() => {
                (compressed, flags | FLAG_COMPRESSED)
            }
            _ => (bytes.to_vec(), flags),
        };

        let offset = (HEADER_SIZE + payloads.len()) as u64;
        payloads.extend_from_slice(&stored);
        toc.push(TocEntry {
            name: name.to_owned(),
            kind,
            flags,
            offset,
            stored_size: stored.len() as u64,
            real_size: bytes.len() as u64,
        });
        Ok(())
    }

    fn deflate(&self, name: &str, bytes: &[u8]) -> Result<Option<Vec<u8>>, ArchiveWriteError> {
        if bytes.is_empty() {
            return Ok(None);
        }
        let mut encoder = DeflateEncoder::new(Vec::new(), self.level);
        encoder
            .write_all(bytes)
            .and_then(|()| encoder.finish())
            .map(Some)
            .map_err(|source| ArchiveWriteError::Payload {
                name: name.to_owned(),
                source,
            })
    }
}

fn read_payload(name: &str, path: &Path) -> Result<Vec<u8>, ArchiveWriteError> {
    fs::read(path).map_err(|source| ArchiveWriteError::Payload {
        name: name.to_owned(),
        source,
    })
}
