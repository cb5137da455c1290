//! Bindery graph builder: static reachability analysis over import
//! relationships, hook merging, and archive emission.
//!
//! The pipeline:
//! - `scan` - logical-line splitting and import statement extraction
//! - `resolve` - raw import references to concrete candidate names
//! - `hooks` - per-module override records merged during traversal
//! - `build` - breadth-first closure construction from entry points
//! - `emit` - serialization of the resolved closure into the archive
//! - `diagnostics` - the ordered report of recoverable problems
//!
//! Graph construction is single-threaded by design: pending names are
//! processed in first-enqueued order so two builds over identical inputs
//! produce identical node order, diagnostics, and archive bytes.

pub mod build;
pub mod diagnostics;
pub mod emit;
pub mod hooks;
pub mod registry;
pub mod resolve;
pub mod scan;

#[cfg(test)]
mod build_tests;
#[cfg(test)]
mod diagnostics_tests;

pub use build::{BuildError, BuildOutcome, EntryPoint, GraphBuilder};
pub use diagnostics::{Diagnostic, DiagnosticKind, Diagnostics, Severity};
pub use emit::{ArchiveWriteError, ArchiveWriter};
pub use hooks::{FileMapping, HookCtx, HookEngine, HookError, HookRecord, MergedHook};
pub use registry::{Edge, EdgeKind, Node, NodeId, NodeKind, NodeRegistry};
pub use resolve::{Candidate, Found, ResolveError, Resolver, SearchPath};
