//! Node registry: owns all graph nodes, their identities, and the edge set.
//!
//! Node identity is the dotted name, unique for the lifetime of one build.
//! A node's variant is decided the first time the name is resolved and
//! never silently changes afterward; the only sanctioned transition is an
//! explicit exclusion at resolution time (a hook callback marking the node
//! it is running on). Nodes and edges are stored in creation order, which
//! downstream consumers rely on for reproducible output.

use std::path::PathBuf;

use indexmap::{IndexMap, IndexSet};

/// Identifier of a node within one registry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u32);

impl NodeId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// How a reference reached its target.
///
/// Guarded references of any syntactic shape are recorded as
/// `Conditional`; a failure to resolve them is tolerable at run time.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EdgeKind {
    Absolute,
    Relative(u8),
    Star,
    Conditional,
}

/// A directed, registry-global edge. Deduplicated by (source, target, kind).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Edge {
    pub source: NodeId,
    pub target: NodeId,
    pub kind: EdgeKind,
}

/// A plain module backed by one source file.
#[derive(Debug, Clone)]
pub struct SourceUnit {
    pub path: PathBuf,
}

/// A package: optional init source plus an ordered, mutable list of
/// directories its subunits are looked up in.
///
/// Hooks and runtime path tricks operate through this one seam - they
/// prepend or append entries rather than being special-cased elsewhere.
#[derive(Debug, Clone)]
pub struct PackageUnit {
    /// Init source file, absent for namespace packages.
    pub init: Option<PathBuf>,
    /// Ordered lookup roots for subunits.
    pub search_path: Vec<PathBuf>,
    /// Namespace-package semantics: no single canonical location.
    pub namespace: bool,
}

/// A name bound to a native binary artifact. Static analysis discovers no
/// edges here; any edges come from hooks.
#[derive(Debug, Clone)]
pub struct ExtensionUnit {
    pub path: PathBuf,
}

/// A name that was referenced but never resolved.
#[derive(Debug, Clone)]
pub struct MissingUnit {
    /// True only while every reference to this name was guarded.
    pub guarded: bool,
    /// Nodes that referenced this name, in reference order.
    pub referenced_by: Vec<NodeId>,
}

/// Variant of a graph node.
#[derive(Debug)]
pub enum NodeKind {
    Source(SourceUnit),
    Package(PackageUnit),
    Extension(ExtensionUnit),
    /// Re-exported reference to another node; never independently packaged.
    Alias(NodeId),
    Missing(MissingUnit),
    Excluded,
}

/// A single addressable unit in the dependency graph.
#[derive(Debug)]
pub struct Node {
    pub name: String,
    pub kind: NodeKind,
}

impl Node {
    pub fn is_excluded(&self) -> bool {
        matches!(self.kind, NodeKind::Excluded)
    }

    pub fn is_missing(&self) -> bool {
        matches!(self.kind, NodeKind::Missing(_))
    }

    /// Whether this node contributes a payload to the archive.
    pub fn is_packageable(&self) -> bool {
        matches!(
            self.kind,
            NodeKind::Source(_) | NodeKind::Package(_) | NodeKind::Extension(_)
        )
    }

    pub fn as_package(&self) -> Option<&PackageUnit> {
        match &self.kind {
            NodeKind::Package(p) => Some(p),
            _ => None,
        }
    }

    pub fn as_package_mut(&mut self) -> Option<&mut PackageUnit> {
        match &mut self.kind {
            NodeKind::Package(p) => Some(p),
            _ => None,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("`{0}` is already registered; a node's variant never changes")]
    AlreadyRegistered(String),
}

/// Owner of all nodes and edges for the duration of one build.
#[derive(Debug, Default)]
pub struct NodeRegistry {
    nodes: Vec<Node>,
    by_name: IndexMap<String, NodeId>,
    edges: IndexSet<(NodeId, NodeId, EdgeKind)>,
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<NodeId> {
        self.by_name.get(name).copied()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.index()]
    }

    pub fn node_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id.index()]
    }

    /// Register a new node. The name must not be taken - variants are
    /// fixed at first registration.
    pub fn register(&mut self, name: impl Into<String>, kind: NodeKind) -> Result<NodeId, RegistryError> {
        let name = name.into();
        if self.by_name.contains_key(&name) {
            return Err(RegistryError::AlreadyRegistered(name));
        }
        let id = NodeId(self.nodes.len() as u32);
        self.by_name.insert(name.clone(), id);
        self.nodes.push(Node { name, kind });
        Ok(id)
    }

    /// Register a missing name, or fold another reference into an existing
    /// missing node. The unit stays guarded only while every reference to
    /// it was guarded.
    pub fn register_missing(
        &mut self,
        name: &str,
        guarded: bool,
        referrer: Option<NodeId>,
    ) -> Result<NodeId, RegistryError> {
        if let Some(id) = self.get(name) {
            match &mut self.node_mut(id).kind {
                NodeKind::Missing(unit) => {
                    unit.guarded &= guarded;
                    if let Some(referrer) = referrer
                        && !unit.referenced_by.contains(&referrer)
                    {
                        unit.referenced_by.push(referrer);
                    }
                    return Ok(id);
                }
                _ => return Err(RegistryError::AlreadyRegistered(name.to_owned())),
            }
        }
        self.register(
            name,
            NodeKind::Missing(MissingUnit {
                guarded,
                referenced_by: referrer.into_iter().collect(),
            }),
        )
    }

    /// Turn an already-registered node into `Excluded`, dropping every
    /// edge that touches it. Only legal at resolution time (the builder
    /// invokes this for a hook callback running on the node itself).
    pub fn make_excluded(&mut self, id: NodeId) {
        self.nodes[id.index()].kind = NodeKind::Excluded;
        self.edges.retain(|&(s, t, _)| s != id && t != id);
    }

    /// Record an edge. Returns false when it was a duplicate or touches
    /// an excluded node (no edges from or to exclusions are kept).
    pub fn add_edge(&mut self, source: NodeId, target: NodeId, kind: EdgeKind) -> bool {
        if self.node(source).is_excluded() || self.node(target).is_excluded() {
            return false;
        }
        self.edges.insert((source, target, kind))
    }

    pub fn remove_edge(&mut self, source: NodeId, target: NodeId, kind: EdgeKind) -> bool {
        self.edges.shift_remove(&(source, target, kind))
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    /// All edges in insertion order.
    pub fn edges(&self) -> impl Iterator<Item = Edge> + '_ {
        self.edges
            .iter()
            .map(|&(source, target, kind)| Edge { source, target, kind })
    }

    /// Outgoing edges of one node, in insertion order.
    pub fn edges_from(&self, id: NodeId) -> impl Iterator<Item = Edge> + '_ {
        self.edges().filter(move |e| e.source == id)
    }

    /// Nodes in creation order.
    pub fn nodes(&self) -> impl Iterator<Item = (NodeId, &Node)> {
        self.nodes
            .iter()
            .enumerate()
            .map(|(i, node)| (NodeId(i as u32), node))
    }
}
