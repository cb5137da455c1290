//! Breadth-first closure construction from entry points.
//!
//! Pending names are processed in first-enqueued order and edges within a
//! node in source-appearance order, so two builds over identical inputs
//! produce an identical node-creation order, identical diagnostics, and
//! identical archive bytes. Each name transitions at most once from
//! pending to a terminal variant, which bounds the traversal even through
//! import cycles.

use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use indexmap::{IndexMap, IndexSet};
use tracing::debug;

use crate::diagnostics::{DiagnosticKind, Diagnostics};
use crate::hooks::{FileMapping, HookCtx, HookEngine};
use crate::registry::{
    EdgeKind, ExtensionUnit, NodeId, NodeKind, NodeRegistry, PackageUnit, SourceUnit,
};
use crate::resolve::{Found, Resolver, SearchPath};
use crate::scan::{Members, ScannedModule, scan_source};

/// One traversal root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryPoint {
    /// Dotted name for libraries, a source file path for programs.
    pub target: String,
    /// Program entries prepend their own directory to the search path.
    pub is_program: bool,
}

impl EntryPoint {
    pub fn program(path: impl Into<String>) -> Self {
        Self {
            target: path.into(),
            is_program: true,
        }
    }

    pub fn library(name: impl Into<String>) -> Self {
        Self {
            target: name.into(),
            is_program: false,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("build aborted by external signal")]
    Aborted,
    #[error("entry point `{0}` does not name a module")]
    BadEntryPoint(String),
}

/// Everything the archive writer and the report renderer consume.
#[derive(Debug)]
pub struct BuildOutcome {
    pub registry: NodeRegistry,
    pub diagnostics: Diagnostics,
    /// Hook-declared data files, in merge order.
    pub data_files: Vec<FileMapping>,
    /// Hook-declared binary files, in merge order.
    pub binaries: Vec<FileMapping>,
}

/// Orchestrates the traversal: resolver and hook engine plugged into one
/// FIFO queue over pending names.
pub struct GraphBuilder {
    search: SearchPath,
    hooks: HookEngine,
    abort: Option<Arc<AtomicBool>>,
}

impl GraphBuilder {
    pub fn new(search: SearchPath) -> Self {
        Self {
            search,
            hooks: HookEngine::new(),
            abort: None,
        }
    }

    pub fn with_hooks(mut self, hooks: HookEngine) -> Self {
        self.hooks = hooks;
        self
    }

    /// Install an abort signal, checked once per queue iteration. Partial
    /// state is discarded on abort, never returned.
    pub fn with_abort(mut self, flag: Arc<AtomicBool>) -> Self {
        self.abort = Some(flag);
        self
    }

    pub fn build(self, entries: &[EntryPoint]) -> Result<BuildOutcome, BuildError> {
        let mut traversal = Traversal {
            search: self.search,
            resolver: Resolver::new(),
            registry: NodeRegistry::new(),
            diagnostics: Diagnostics::new(),
            queue: VecDeque::new(),
            excluded: IndexSet::new(),
            exports: IndexMap::new(),
            data_files: Vec::new(),
            binaries: Vec::new(),
        };

        for entry in entries {
            let name = traversal.admit_entry(entry)?;
            traversal.enqueue(&name, None, EdgeKind::Absolute, false);
        }

        while let Some(pending) = traversal.queue.pop_front() {
            if let Some(flag) = &self.abort
                && flag.load(Ordering::Relaxed)
            {
                return Err(BuildError::Aborted);
            }
            match pending {
                Pending::Visit {
                    name,
                    referrer,
                    kind,
                    guarded,
                } => traversal.visit(&self.hooks, name, referrer, kind, guarded),
                Pending::StarExpand {
                    package,
                    referrer,
                    guarded,
                } => traversal.expand_star(&package, referrer, guarded),
            }
        }

        traversal.note_missing();
        traversal.note_cycles();

        Ok(BuildOutcome {
            registry: traversal.registry,
            diagnostics: traversal.diagnostics,
            data_files: traversal.data_files,
            binaries: traversal.binaries,
        })
    }
}

enum Pending {
    Visit {
        name: String,
        referrer: Option<NodeId>,
        kind: EdgeKind,
        guarded: bool,
    },
    /// Deferred star expansion: runs after the package itself was
    /// visited, so its export list is known.
    StarExpand {
        package: String,
        referrer: NodeId,
        guarded: bool,
    },
}

struct Traversal {
    search: SearchPath,
    resolver: Resolver,
    registry: NodeRegistry,
    diagnostics: Diagnostics,
    queue: VecDeque<Pending>,
    /// Union of every exclusion list seen so far; prefix-matched.
    excluded: IndexSet<String>,
    /// Export lists collected while scanning, for star expansion.
    exports: IndexMap<String, Vec<String>>,
    data_files: Vec<FileMapping>,
    binaries: Vec<FileMapping>,
}

impl Traversal {
    fn admit_entry(&mut self, entry: &EntryPoint) -> Result<String, BuildError> {
        if !entry.is_program {
            return Ok(entry.target.clone());
        }
        let path = PathBuf::from(&entry.target);
        let stem = path
            .file_stem()
            .and_then(|s| s.to_str())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| BuildError::BadEntryPoint(entry.target.clone()))?
            .to_owned();
        match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => self.search.prepend(parent),
            _ => self.search.prepend("."),
        }
        Ok(stem)
    }

    /// Push a pending name, its unregistered ancestors first, so packages
    /// are always registered before their subunits.
    fn enqueue(&mut self, name: &str, referrer: Option<NodeId>, kind: EdgeKind, guarded: bool) {
        let mut prefix = String::new();
        let mut parts = name.split('.').peekable();
        while let Some(part) = parts.next() {
            if !prefix.is_empty() {
                prefix.push('.');
            }
            prefix.push_str(part);
            if parts.peek().is_none() {
                self.queue.push_back(Pending::Visit {
                    name: prefix.clone(),
                    referrer,
                    kind,
                    guarded,
                });
            } else if !self.registry.contains(&prefix) {
                self.queue.push_back(Pending::Visit {
                    name: prefix.clone(),
                    referrer: None,
                    kind: EdgeKind::Absolute,
                    guarded,
                });
            }
        }
    }

    fn is_excluded_name(&self, name: &str) -> bool {
        self.excluded.iter().any(|e| {
            name == e
                || name
                    .strip_prefix(e.as_str())
                    .is_some_and(|rest| rest.starts_with('.'))
        })
    }

    /// Read and scan one source file. An unreadable or non-decodable file
    /// degrades to a diagnostic; the node is kept without outgoing edges
    /// and the rest of the closure is unaffected.
    fn scan_file(&mut self, name: &str, path: &Path) -> Option<ScannedModule> {
        match fs::read_to_string(path) {
            Ok(text) => Some(scan_source(&text)),
            Err(err) => {
                self.diagnostics.report(
                    DiagnosticKind::UnreadableSource,
                    name,
                    format!("{}: {}", path.display(), err),
                );
                None
            }
        }
    }

    fn visit(
        &mut self,
        hooks: &HookEngine,
        name: String,
        referrer: Option<NodeId>,
        kind: EdgeKind,
        guarded: bool,
    ) {
        // Exclusion dominates: checked before variant determination, so
        // an excluded name is never scanned and never promoted.
        if self.is_excluded_name(&name) {
            if !self.registry.contains(&name) {
                let _ = self.registry.register(&name, NodeKind::Excluded);
            }
            return;
        }

        // Terminal variants are visited once; later references only fold
        // into the edge set (and the missing-reference bookkeeping).
        if let Some(id) = self.registry.get(&name) {
            if self.registry.node(id).is_missing() {
                let _ = self.registry.register_missing(&name, guarded, referrer);
            }
            if let Some(referrer) = referrer {
                self.registry.add_edge(referrer, id, kind);
            }
            return;
        }

        let found = self.resolver.locate(&name, &self.registry, &self.search);
        let (id, scanned) = match found {
            Found::NotFound => {
                // The diagnostic is rendered after the queue drains, from
                // the node's final state; later references may still drop
                // its guarded status.
                let Ok(id) = self.registry.register_missing(&name, guarded, referrer) else {
                    return;
                };
                if let Some(referrer) = referrer {
                    self.registry.add_edge(referrer, id, kind);
                }
                debug!(%name, guarded, "unresolved reference");
                return;
            }
            Found::Source { path } => {
                let scanned = self.scan_file(&name, &path);
                let Ok(id) = self
                    .registry
                    .register(&name, NodeKind::Source(SourceUnit { path }))
                else {
                    return;
                };
                (id, scanned)
            }
            Found::Package {
                init,
                search_path,
                namespace,
            } => {
                let scanned = init.as_ref().and_then(|init| self.scan_file(&name, init));
                let Ok(id) = self.registry.register(
                    &name,
                    NodeKind::Package(PackageUnit {
                        init,
                        search_path,
                        namespace,
                    }),
                ) else {
                    return;
                };
                (id, scanned)
            }
            Found::Extension { path } => {
                let Ok(id) = self
                    .registry
                    .register(&name, NodeKind::Extension(ExtensionUnit { path }))
                else {
                    return;
                };
                (id, None)
            }
        };
        debug!(%name, "registered node");

        if let Some(referrer) = referrer {
            self.registry.add_edge(referrer, id, kind);
        }
        if let Some(exports) = scanned.as_ref().and_then(|s| s.exports.clone()) {
            self.exports.insert(name.clone(), exports);
        }

        // Static edges attach now (to targets that already exist) so the
        // hook callback observes them; unseen targets get their edge when
        // they are visited.
        let is_package = matches!(self.registry.node(id).kind, NodeKind::Package(_));
        let mut static_targets: Vec<StaticTarget> = Vec::new();
        if let Some(scanned) = &scanned {
            for raw in &scanned.imports {
                let candidates = match self.resolver.resolve_import(
                    &name,
                    is_package,
                    raw,
                    &self.registry,
                    &self.search,
                ) {
                    Ok(candidates) => candidates,
                    Err(err) => {
                        // Over-deep relative references still land in the
                        // registry so the graph and the report agree.
                        let target = format!("{}{}", ".".repeat(raw.level as usize), raw.target);
                        let kind = if raw.guarded {
                            EdgeKind::Conditional
                        } else {
                            EdgeKind::Relative(raw.level)
                        };
                        if let Ok(missing) =
                            self.registry.register_missing(&target, raw.guarded, Some(id))
                        {
                            self.registry.add_edge(id, missing, kind);
                        }
                        debug!(%target, %err, "unresolvable relative reference");
                        continue;
                    }
                };
                let star = matches!(raw.members, Members::Star);
                for (i, candidate) in candidates.into_iter().enumerate() {
                    // `from . import x` inside an init names the package
                    // itself; a self-edge says nothing.
                    if candidate.name == name {
                        continue;
                    }
                    if let Some(target) = self.registry.get(&candidate.name) {
                        self.registry.add_edge(id, target, candidate.kind);
                        if self.registry.node(target).is_missing() {
                            let _ = self.registry.register_missing(
                                &candidate.name,
                                raw.guarded,
                                Some(id),
                            );
                        }
                    }
                    static_targets.push(StaticTarget {
                        name: candidate.name,
                        kind: candidate.kind,
                        guarded: raw.guarded,
                        star: star && i == 0,
                    });
                }
            }
        }

        // Hook record: carried files first, then the exclusion set, which
        // must be in force before any of this node's edges are enqueued.
        let merged = hooks.lookup(&name);
        for mapping in &merged.data_files {
            if !self.data_files.contains(mapping) {
                self.data_files.push(mapping.clone());
            }
        }
        for mapping in &merged.binaries {
            if !self.binaries.contains(mapping) {
                self.binaries.push(mapping.clone());
            }
        }
        for exclude in &merged.excludes {
            self.excluded.insert(exclude.clone());
        }

        // Post-resolution callbacks, fault-isolated per node.
        let callback_deps = {
            let mut ctx = HookCtx::new(id, &mut self.registry);
            for callback in hooks.callbacks_for(&name) {
                if let Err(detail) = callback(&mut ctx) {
                    self.diagnostics
                        .report(DiagnosticKind::HookFailure, &name, detail);
                }
            }
            let (pending, excludes) = ctx.into_requests();
            for exclude in excludes {
                self.excluded.insert(exclude);
            }
            pending
        };

        if self.registry.node(id).is_excluded() {
            // The callback excluded the node it ran on; nothing below it
            // is traversed.
            self.excluded.insert(name);
            return;
        }

        // Hidden dependencies enqueue before the node's own static edges.
        for dep in merged.hidden_imports.iter().chain(callback_deps.iter()) {
            if self.is_excluded_name(dep) {
                continue;
            }
            self.enqueue(dep, Some(id), EdgeKind::Absolute, false);
        }

        for target in static_targets {
            if self.is_excluded_name(&target.name) {
                continue;
            }
            self.enqueue(&target.name, Some(id), target.kind, target.guarded);
            if target.star {
                self.queue.push_back(Pending::StarExpand {
                    package: target.name,
                    referrer: id,
                    guarded: target.guarded,
                });
            }
        }
    }

    /// Lazy star expansion; the package was visited by the time this
    /// queue entry surfaces.
    fn expand_star(&mut self, package: &str, referrer: NodeId, guarded: bool) {
        let exports = self.exports.get(package).cloned();
        let members = self.resolver.expand_star(
            package,
            exports.as_deref(),
            &self.registry,
            &self.search,
        );
        let kind = if guarded {
            EdgeKind::Conditional
        } else {
            EdgeKind::Star
        };
        for member in members {
            if self.is_excluded_name(&member) {
                continue;
            }
            self.enqueue(&member, Some(referrer), kind, guarded);
        }
    }

    /// One report entry per name that stayed unresolved, rendered from
    /// the registry's final state: a reference seen after the first one
    /// may have dropped the node's guarded status, and the report has to
    /// reflect that.
    fn note_missing(&mut self) {
        for (_, node) in self.registry.nodes() {
            let NodeKind::Missing(unit) = &node.kind else {
                continue;
            };
            let detail = if unit.referenced_by.is_empty() {
                "no candidate on the search path".to_owned()
            } else {
                let referrers: Vec<String> = unit
                    .referenced_by
                    .iter()
                    .map(|&id| format!("`{}`", self.registry.node(id).name))
                    .collect();
                format!("referenced by {}", referrers.join(", "))
            };
            self.diagnostics.report(
                DiagnosticKind::Missing {
                    guarded: unit.guarded,
                },
                &node.name,
                detail,
            );
        }
    }

    /// One informational note per non-trivial strongly connected
    /// component of the final edge set.
    fn note_cycles(&mut self) {
        for scc in SccFinder::cycles(&self.registry) {
            // Members arrive sorted by creation order.
            let names: Vec<&str> = scc
                .iter()
                .map(|&id| self.registry.node(id).name.as_str())
                .collect();
            let first = names[0].to_owned();
            let mut detail = names.join(" -> ");
            detail.push_str(" -> ");
            detail.push_str(&first);
            self.diagnostics
                .report(DiagnosticKind::CycleNote, first, detail);
        }
    }
}

struct StaticTarget {
    name: String,
    kind: EdgeKind,
    guarded: bool,
    star: bool,
}

/// Tarjan's algorithm over the registry's edge set; only components with
/// a real cycle (two or more nodes, or a self-edge) are returned, ordered
/// by their earliest-created member.
struct SccFinder {
    adjacency: Vec<Vec<usize>>,
    index: Vec<Option<u32>>,
    lowlink: Vec<u32>,
    on_stack: Vec<bool>,
    stack: Vec<usize>,
    next: u32,
    components: Vec<Vec<usize>>,
}

impl SccFinder {
    fn cycles(registry: &NodeRegistry) -> Vec<Vec<NodeId>> {
        let len = registry.len();
        let mut adjacency: Vec<Vec<usize>> = vec![Vec::new(); len];
        for edge in registry.edges() {
            let (s, t) = (edge.source.index(), edge.target.index());
            if !adjacency[s].contains(&t) {
                adjacency[s].push(t);
            }
        }

        let mut finder = Self {
            adjacency,
            index: vec![None; len],
            lowlink: vec![0; len],
            on_stack: vec![false; len],
            stack: Vec::new(),
            next: 0,
            components: Vec::new(),
        };
        for v in 0..len {
            if finder.index[v].is_none() {
                finder.connect(v);
            }
        }

        let mut cycles: Vec<Vec<usize>> = finder
            .components
            .into_iter()
            .filter(|scc| scc.len() > 1 || finder_self_loop(registry, scc))
            .map(|mut scc| {
                scc.sort_unstable();
                scc
            })
            .collect();
        cycles.sort_by_key(|scc| scc[0]);

        cycles
            .into_iter()
            .map(|scc| {
                scc.into_iter()
                    .filter_map(|v| {
                        registry
                            .nodes()
                            .nth(v)
                            .map(|(id, _)| id)
                    })
                    .collect()
            })
            .collect()
    }

    /// Iterative formulation: the explicit frame stack keeps the depth
    /// independent of how long an import chain gets.
    fn connect(&mut self, root: usize) {
        let mut frames: Vec<(usize, usize)> = vec![(root, 0)];
        while let Some((v, mut i)) = frames.pop() {
            if i == 0 {
                self.index[v] = Some(self.next);
                self.lowlink[v] = self.next;
                self.next += 1;
                self.stack.push(v);
                self.on_stack[v] = true;
            } else {
                // Returning from the child pushed at neighbor i - 1.
                let w = self.adjacency[v][i - 1];
                self.lowlink[v] = self.lowlink[v].min(self.lowlink[w]);
            }

            let mut descended = false;
            while i < self.adjacency[v].len() {
                let w = self.adjacency[v][i];
                i += 1;
                if self.index[w].is_none() {
                    frames.push((v, i));
                    frames.push((w, 0));
                    descended = true;
                    break;
                }
                if self.on_stack[w]
                    && let Some(index) = self.index[w]
                {
                    self.lowlink[v] = self.lowlink[v].min(index);
                }
            }
            if descended {
                continue;
            }

            if Some(self.lowlink[v]) == self.index[v] {
                let mut component = Vec::new();
                while let Some(w) = self.stack.pop() {
                    self.on_stack[w] = false;
                    component.push(w);
                    if w == v {
                        break;
                    }
                }
                self.components.push(component);
            }
        }
    }
}

fn finder_self_loop(registry: &NodeRegistry, scc: &[usize]) -> bool {
    scc.len() == 1
        && registry
            .edges()
            .any(|e| e.source.index() == scc[0] && e.target.index() == scc[0])
}
