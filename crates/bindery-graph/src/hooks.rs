//! Per-module override records and their merge rules.
//!
//! A hook attaches packaging knowledge the scanner cannot see: hidden
//! dependencies loaded through dynamic machinery, names to suppress, and
//! extra files to carry. Records are plain data; the only executable part
//! is the post-resolution callback, registered programmatically and
//! fault-isolated by the builder.

use std::fs;
use std::path::{Path, PathBuf};

use indexmap::{IndexMap, IndexSet};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::registry::{EdgeKind, NodeId, NodeKind, NodeRegistry};

/// One file carried into the archive on a node's behalf.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileMapping {
    /// Path on disk.
    pub source: PathBuf,
    /// Logical destination name within the archive.
    pub dest: String,
}

/// Override record for one dotted name, deserializable from JSON.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HookRecord {
    /// Dotted name the record applies to.
    pub module: String,
    /// Names required at run time that no source line imports.
    #[serde(default)]
    pub hidden_imports: Vec<String>,
    /// Names suppressed from this node's reachable subtree.
    #[serde(default)]
    pub excludes: Vec<String>,
    /// Data files bundled alongside the node.
    #[serde(default)]
    pub data_files: Vec<FileMapping>,
    /// Binary files bundled alongside the node.
    #[serde(default)]
    pub binaries: Vec<FileMapping>,
}

/// Result of merging every record applicable to one name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergedHook {
    pub hidden_imports: Vec<String>,
    pub excludes: IndexSet<String>,
    pub data_files: Vec<FileMapping>,
    pub binaries: Vec<FileMapping>,
}

impl MergedHook {
    pub fn is_empty(&self) -> bool {
        self.hidden_imports.is_empty()
            && self.excludes.is_empty()
            && self.data_files.is_empty()
            && self.binaries.is_empty()
    }

    fn absorb(&mut self, record: &HookRecord) {
        for name in &record.hidden_imports {
            if !self.hidden_imports.contains(name) {
                self.hidden_imports.push(name.clone());
            }
        }
        for name in &record.excludes {
            self.excludes.insert(name.clone());
        }
        for mapping in &record.data_files {
            if !self.data_files.contains(mapping) {
                self.data_files.push(mapping.clone());
            }
        }
        for mapping in &record.binaries {
            if !self.binaries.contains(mapping) {
                self.binaries.push(mapping.clone());
            }
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum HookError {
    #[error("failed to read hook directory")]
    Io(#[from] std::io::Error),
    #[error("hook file `{file}` is not a valid record")]
    Parse {
        file: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Mutation seam handed to post-resolution callbacks.
///
/// Everything a callback may do to the graph goes through here; the
/// builder applies the queued requests after the callback returns, so a
/// failing callback leaves no half-applied state behind.
pub struct HookCtx<'a> {
    node: NodeId,
    registry: &'a mut NodeRegistry,
    /// Names the callback wants traversed, in request order.
    pending: Vec<String>,
    /// Names the callback wants suppressed below this node.
    excludes: Vec<String>,
}

impl<'a> HookCtx<'a> {
    pub fn new(node: NodeId, registry: &'a mut NodeRegistry) -> Self {
        Self {
            node,
            registry,
            pending: Vec::new(),
            excludes: Vec::new(),
        }
    }

    pub fn node(&self) -> NodeId {
        self.node
    }

    pub fn name(&self) -> &str {
        &self.registry.node(self.node).name
    }

    /// Request an additional dependency edge; the builder resolves and
    /// enqueues it like a hidden import.
    pub fn add_dependency(&mut self, name: impl Into<String>) {
        self.pending.push(name.into());
    }

    /// Suppress a name from this node's reachable subtree.
    pub fn exclude(&mut self, name: impl Into<String>) {
        self.excludes.push(name.into());
    }

    /// Exclude the node the callback is running on. Its edges are
    /// dropped and it is never scanned or archived.
    pub fn exclude_self(&mut self) {
        self.registry.make_excluded(self.node);
    }

    /// Drop every recorded edge from this node to `target`.
    pub fn remove_edges_to(&mut self, target: &str) -> bool {
        let Some(target) = self.registry.get(target) else {
            return false;
        };
        let doomed: Vec<(NodeId, NodeId, EdgeKind)> = self
            .registry
            .edges_from(self.node)
            .filter(|e| e.target == target)
            .map(|e| (e.source, e.target, e.kind))
            .collect();
        let removed = !doomed.is_empty();
        for (source, target, kind) in doomed {
            self.registry.remove_edge(source, target, kind);
        }
        removed
    }

    /// Advertise this node under an additional name. Fails when the name
    /// is already taken.
    pub fn alias(&mut self, name: impl Into<String>) -> bool {
        self.registry
            .register(name, NodeKind::Alias(self.node))
            .is_ok()
    }

    /// Append a lookup root to this node's package search path.
    pub fn extend_search_path(&mut self, root: impl Into<PathBuf>) -> bool {
        match self.registry.node_mut(self.node).as_package_mut() {
            Some(unit) => {
                unit.search_path.push(root.into());
                true
            }
            None => false,
        }
    }

    /// Prepend a lookup root to this node's package search path.
    pub fn prepend_search_path(&mut self, root: impl Into<PathBuf>) -> bool {
        match self.registry.node_mut(self.node).as_package_mut() {
            Some(unit) => {
                unit.search_path.insert(0, root.into());
                true
            }
            None => false,
        }
    }

    /// Consume the queued requests. Builder-side API.
    pub fn into_requests(self) -> (Vec<String>, Vec<String>) {
        (self.pending, self.excludes)
    }
}

/// Post-resolution callback. Errors become `HookFailure` diagnostics on
/// the node, never build failures.
pub type Callback = Box<dyn Fn(&mut HookCtx<'_>) -> Result<(), String>>;

/// Stores hook records in two layers (builtin, then user) and answers
/// merged lookups.
#[derive(Default)]
pub struct HookEngine {
    builtin: IndexMap<String, HookRecord>,
    user: IndexMap<String, HookRecord>,
    callbacks: IndexMap<String, Vec<Callback>>,
}

impl HookEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.builtin.is_empty() && self.user.is_empty() && self.callbacks.is_empty()
    }

    /// Register a shipped record. Repeated registrations for one name
    /// merge additively.
    pub fn register_builtin(&mut self, record: HookRecord) {
        merge_record(&mut self.builtin, record);
    }

    /// Register a caller-supplied record, which layers above builtins.
    pub fn register_user(&mut self, record: HookRecord) {
        merge_record(&mut self.user, record);
    }

    /// Attach a post-resolution callback to an exact dotted name.
    pub fn register_callback(
        &mut self,
        name: impl Into<String>,
        callback: impl Fn(&mut HookCtx<'_>) -> Result<(), String> + 'static,
    ) {
        self.callbacks
            .entry(name.into())
            .or_default()
            .push(Box::new(callback));
    }

    /// Load user records from `hook-<name>.json` files in one directory,
    /// read in sorted filename order. Returns how many were loaded.
    pub fn load_dir(&mut self, dir: &Path) -> Result<usize, HookError> {
        let mut paths: Vec<PathBuf> = fs::read_dir(dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| {
                path.file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.starts_with("hook-") && n.ends_with(".json"))
            })
            .collect();
        paths.sort();

        for path in &paths {
            let text = fs::read_to_string(path)?;
            let record: HookRecord =
                serde_json::from_str(&text).map_err(|source| HookError::Parse {
                    file: path.clone(),
                    source,
                })?;
            debug!(module = %record.module, file = %path.display(), "loaded hook record");
            self.register_user(record);
        }
        Ok(paths.len())
    }

    /// Merge every record applicable to `name`: nearest-ancestor builtin,
    /// nearest-ancestor user, exact builtin, exact user. Additive lists
    /// concatenate with first-occurrence dedup; exclusions union.
    pub fn lookup(&self, name: &str) -> MergedHook {
        let mut merged = MergedHook::default();

        if let Some(ancestor) = self.nearest_ancestor(name) {
            if let Some(record) = self.builtin.get(ancestor) {
                merged.absorb(record);
            }
            if let Some(record) = self.user.get(ancestor) {
                merged.absorb(record);
            }
        }
        if let Some(record) = self.builtin.get(name) {
            merged.absorb(record);
        }
        if let Some(record) = self.user.get(name) {
            merged.absorb(record);
        }

        merged
    }

    /// Callbacks applicable to `name`: the nearest ancestor's first, then
    /// the exact match's, each in registration order.
    pub fn callbacks_for(&self, name: &str) -> impl Iterator<Item = &Callback> {
        let ancestor = self
            .nearest_ancestor_with_callback(name)
            .and_then(|a| self.callbacks.get(a))
            .map(|v| v.as_slice())
            .unwrap_or_default();
        let exact = self
            .callbacks
            .get(name)
            .map(|v| v.as_slice())
            .unwrap_or_default();
        ancestor.iter().chain(exact.iter())
    }

    /// Nearest strict ancestor package with any record. The returned
    /// slice borrows from `name`, not from the engine.
    fn nearest_ancestor<'n>(&self, name: &'n str) -> Option<&'n str> {
        ancestors(name).find(|a| self.builtin.contains_key(*a) || self.user.contains_key(*a))
    }

    fn nearest_ancestor_with_callback<'n>(&self, name: &'n str) -> Option<&'n str> {
        ancestors(name).find(|a| self.callbacks.contains_key(*a))
    }
}

/// Strict ancestors of a dotted name, nearest first.
fn ancestors(name: &str) -> impl Iterator<Item = &str> {
    std::iter::successors(name.rsplit_once('.').map(|(p, _)| p), |prev| {
        prev.rsplit_once('.').map(|(p, _)| p)
    })
}

fn merge_record(layer: &mut IndexMap<String, HookRecord>, record: HookRecord) {
    match layer.get_mut(&record.module) {
        Some(existing) => {
            let mut merged = MergedHook::default();
            merged.absorb(existing);
            merged.absorb(&record);
            existing.hidden_imports = merged.hidden_imports;
            existing.excludes = merged.excludes.into_iter().collect();
            existing.data_files = merged.data_files;
            existing.binaries = merged.binaries;
        }
        None => {
            layer.insert(record.module.clone(), record);
        }
    }
}
