//! Import resolution: raw references to concrete candidate names.
//!
//! Resolution is a pure function of the search-path model, the registry,
//! and the filesystem; it is idempotent over an unchanged model, which the
//! builder relies on for reproducible traversal order. All containers here
//! are ordered, never hashed.

use std::fs;
use std::path::{Path, PathBuf};

use indexmap::IndexSet;
use tracing::trace;

use crate::registry::{EdgeKind, NodeId, NodeKind, NodeRegistry};
use crate::scan::{Members, RawImport};

/// Native binary suffixes probed alongside source files.
const EXTENSION_SUFFIXES: [&str; 2] = ["so", "pyd"];

/// Ordered list of global lookup roots. Package nodes carry their own
/// per-package entry lists; this is only the top level.
#[derive(Debug, Clone, Default)]
pub struct SearchPath {
    roots: Vec<PathBuf>,
}

impl SearchPath {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_roots(roots: Vec<PathBuf>) -> Self {
        Self { roots }
    }

    pub fn prepend(&mut self, root: impl Into<PathBuf>) {
        self.roots.insert(0, root.into());
    }

    pub fn append(&mut self, root: impl Into<PathBuf>) {
        self.roots.push(root.into());
    }

    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }
}

/// What a dotted name would resolve to if a node were created for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Found {
    Source {
        path: PathBuf,
    },
    Package {
        init: Option<PathBuf>,
        search_path: Vec<PathBuf>,
        namespace: bool,
    },
    Extension {
        path: PathBuf,
    },
    NotFound,
}

impl Found {
    pub fn is_found(&self) -> bool {
        !matches!(self, Found::NotFound)
    }
}

/// One resolved target of an import statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    /// Full dotted name of the target.
    pub name: String,
    /// Edge kind the reference should be recorded with.
    pub kind: EdgeKind,
}

/// Recoverable resolution failures. Unresolvable names are not an error
/// (they become missing nodes); this covers references that are malformed
/// relative to their referrer.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ResolveError {
    #[error("relative import in `{referrer}` walks up {level} levels, beyond its package chain")]
    TooManyLevels { referrer: String, level: u8 },
}

/// Maps raw import references onto candidate node names.
#[derive(Debug, Default)]
pub struct Resolver;

impl Resolver {
    pub fn new() -> Self {
        Self
    }

    /// Locate a dotted name. The final segment is probed in the parent
    /// package's own search-path entries when the parent is registered
    /// (hooks may have widened them), falling back to a filesystem walk,
    /// and top-level names go through the global roots.
    pub fn locate(&self, name: &str, registry: &NodeRegistry, search: &SearchPath) -> Found {
        let Some((parent, last)) = name.rsplit_once('.') else {
            return probe(name, search.roots());
        };

        let roots = match registry.get(parent) {
            Some(id) => match &registry.node(self.canonical(id, registry)).kind {
                NodeKind::Package(p) => p.search_path.clone(),
                _ => return Found::NotFound,
            },
            None => match self.locate(parent, registry, search) {
                Found::Package { search_path, .. } => search_path,
                _ => return Found::NotFound,
            },
        };
        probe(last, &roots)
    }

    /// Resolve one import statement of `referrer` into candidate names,
    /// in source-appearance order.
    ///
    /// Member candidates (`from x import a`) are produced only when the
    /// member is a real submodule; a plain attribute resolves to just the
    /// target itself. Star expansion is not performed here - the builder
    /// expands it lazily, after the target has been scanned, through
    /// [`Resolver::expand_star`].
    pub fn resolve_import(
        &self,
        referrer: &str,
        referrer_is_package: bool,
        raw: &RawImport,
        registry: &NodeRegistry,
        search: &SearchPath,
    ) -> Result<Vec<Candidate>, ResolveError> {
        let target = if raw.level > 0 {
            let base = relative_base(referrer, referrer_is_package, raw.level).ok_or(
                ResolveError::TooManyLevels {
                    referrer: referrer.to_owned(),
                    level: raw.level,
                },
            )?;
            if raw.target.is_empty() {
                base
            } else {
                format!("{base}.{}", raw.target)
            }
        } else {
            raw.target.clone()
        };

        let kind = if raw.guarded {
            EdgeKind::Conditional
        } else if let Members::Star = raw.members {
            EdgeKind::Star
        } else if raw.level > 0 {
            EdgeKind::Relative(raw.level)
        } else {
            EdgeKind::Absolute
        };

        let mut candidates = vec![Candidate {
            name: target.clone(),
            kind,
        }];

        if let Members::Names(names) = &raw.members {
            for member in names {
                let full = format!("{target}.{member}");
                if self.locate(&full, registry, search).is_found() {
                    candidates.push(Candidate {
                        name: full,
                        kind,
                    });
                }
            }
        }

        trace!(referrer, ?candidates, "resolved import");
        Ok(candidates)
    }

    /// Expand a star reference into the target package's public
    /// submodules.
    ///
    /// With an explicit export list the list is used verbatim, keeping
    /// only members that are real submodules. Without one, the package's
    /// search-path entries are enumerated (sorted within each entry for
    /// reproducibility). Excluded names are skipped either way.
    pub fn expand_star(
        &self,
        package: &str,
        exports: Option<&[String]>,
        registry: &NodeRegistry,
        search: &SearchPath,
    ) -> Vec<String> {
        let mut members: IndexSet<String> = IndexSet::new();

        match exports {
            Some(exports) => {
                for export in exports {
                    let full = format!("{package}.{export}");
                    if self.locate(&full, registry, search).is_found() {
                        members.insert(full);
                    }
                }
            }
            None => {
                let Some(id) = registry.get(package) else {
                    return Vec::new();
                };
                let Some(unit) = registry.node(id).as_package() else {
                    return Vec::new();
                };
                for root in &unit.search_path {
                    for name in list_submodules(root) {
                        members.insert(format!("{package}.{name}"));
                    }
                }
            }
        }

        members
            .into_iter()
            .filter(|name| {
                registry
                    .get(name)
                    .is_none_or(|id| !registry.node(id).is_excluded())
            })
            .collect()
    }

    /// Follow alias links to the canonical node.
    fn canonical(&self, id: NodeId, registry: &NodeRegistry) -> NodeId {
        let mut id = id;
        while let NodeKind::Alias(next) = registry.node(id).kind {
            id = next;
        }
        id
    }
}

/// Base package for a relative import. None when the referrer's chain is
/// shallower than the stated level.
fn relative_base(referrer: &str, referrer_is_package: bool, level: u8) -> Option<String> {
    let mut parts: Vec<&str> = referrer.split('.').collect();
    if !referrer_is_package {
        parts.pop();
    }
    for _ in 1..level {
        parts.pop();
    }
    if parts.is_empty() {
        return None;
    }
    Some(parts.join("."))
}

/// Probe one name segment across ordered roots. Within a root a regular
/// package wins over a source file, which wins over a native binary.
/// Init-less directories across all roots merge into one namespace
/// package.
fn probe(segment: &str, roots: &[PathBuf]) -> Found {
    let mut namespace_dirs: Vec<PathBuf> = Vec::new();

    for root in roots {
        let dir = root.join(segment);
        if dir.is_dir() {
            let init = dir.join("__init__.py");
            if init.is_file() {
                return Found::Package {
                    init: Some(init),
                    search_path: vec![dir],
                    namespace: false,
                };
            }
            namespace_dirs.push(dir);
        }

        let source = root.join(format!("{segment}.py"));
        if source.is_file() {
            return Found::Source { path: source };
        }

        for suffix in EXTENSION_SUFFIXES {
            let binary = root.join(format!("{segment}.{suffix}"));
            if binary.is_file() {
                return Found::Extension { path: binary };
            }
        }
    }

    if !namespace_dirs.is_empty() {
        return Found::Package {
            init: None,
            search_path: namespace_dirs,
            namespace: true,
        };
    }
    Found::NotFound
}

/// Immediate submodule names inside one directory, sorted.
fn list_submodules(root: &Path) -> Vec<String> {
    let Ok(entries) = fs::read_dir(root) else {
        return Vec::new();
    };

    let mut names: Vec<String> = Vec::new();
    for entry in entries.flatten() {
        let path = entry.path();
        let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
            continue;
        };
        if stem == "__init__" || stem.is_empty() {
            continue;
        }
        if path.is_dir() {
            names.push(stem.to_owned());
            continue;
        }
        let Some(suffix) = path.extension().and_then(|s| s.to_str()) else {
            continue;
        };
        if suffix == "py" || EXTENSION_SUFFIXES.contains(&suffix) {
            names.push(stem.to_owned());
        }
    }
    names.sort();
    names.dedup();
    names
}
