//! Diagnostics collection for accumulating build problems.
//!
//! Resolution and hook failures are collected, not thrown: one bad module
//! never aborts closure computation. The collection preserves emission
//! order, which is deterministic because traversal order is.

use std::fmt;

/// What went wrong, keyed to the node it happened on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DiagnosticKind {
    /// A referenced name could not be resolved. Guarded references are
    /// expected to be tolerated at run time.
    Missing { guarded: bool },
    /// A located source file could not be read or decoded. The node is
    /// kept in the graph without outgoing edges.
    UnreadableSource,
    /// A hook callback failed; the hook was skipped for this node.
    HookFailure,
    /// A cyclic import group was observed. Informational only.
    CycleNote,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Severity {
    #[default]
    Error,
    Warning,
    Note,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Error => write!(f, "error"),
            Severity::Warning => write!(f, "warning"),
            Severity::Note => write!(f, "note"),
        }
    }
}

impl DiagnosticKind {
    pub fn severity(&self) -> Severity {
        match self {
            Self::Missing { guarded: false } => Severity::Error,
            Self::Missing { guarded: true } => Severity::Warning,
            Self::UnreadableSource => Severity::Error,
            Self::HookFailure => Severity::Warning,
            Self::CycleNote => Severity::Note,
        }
    }
}

/// One entry of the build report: kind, the node it is attached to, and
/// free-form detail for the report renderer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub kind: DiagnosticKind,
    pub node: String,
    pub detail: String,
}

impl Diagnostic {
    pub fn new(kind: DiagnosticKind, node: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            kind,
            node: node.into(),
            detail: detail.into(),
        }
    }

    pub fn severity(&self) -> Severity {
        self.kind.severity()
    }

    pub fn is_error(&self) -> bool {
        self.severity() == Severity::Error
    }

    pub fn is_warning(&self) -> bool {
        self.severity() == Severity::Warning
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            DiagnosticKind::Missing { guarded } => write!(
                f,
                "{}: `{}` could not be resolved: {}{}",
                self.severity(),
                self.node,
                self.detail,
                if guarded { " (guarded)" } else { "" }
            ),
            DiagnosticKind::UnreadableSource => write!(
                f,
                "{}: source for `{}` could not be read: {}",
                self.severity(),
                self.node,
                self.detail
            ),
            DiagnosticKind::HookFailure => write!(
                f,
                "{}: hook for `{}` failed: {}",
                self.severity(),
                self.node,
                self.detail
            ),
            DiagnosticKind::CycleNote => write!(
                f,
                "{}: `{}` participates in an import cycle: {}",
                self.severity(),
                self.node,
                self.detail
            ),
        }
    }
}

/// Ordered collection of diagnostics from one build.
#[derive(Debug, Clone, Default)]
pub struct Diagnostics(Vec<Diagnostic>);

impl Diagnostics {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn push(&mut self, diag: Diagnostic) {
        self.0.push(diag);
    }

    pub fn report(
        &mut self,
        kind: DiagnosticKind,
        node: impl Into<String>,
        detail: impl Into<String>,
    ) {
        self.0.push(Diagnostic::new(kind, node, detail));
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Diagnostic> {
        self.0.iter()
    }

    pub fn has_errors(&self) -> bool {
        self.0.iter().any(|d| d.is_error())
    }

    pub fn error_count(&self) -> usize {
        self.0.iter().filter(|d| d.is_error()).count()
    }

    pub fn warning_count(&self) -> usize {
        self.0.iter().filter(|d| d.is_warning()).count()
    }

    pub fn as_slice(&self) -> &[Diagnostic] {
        &self.0
    }

    pub fn into_vec(self) -> Vec<Diagnostic> {
        self.0
    }

    pub fn extend(&mut self, other: Diagnostics) {
        self.0.extend(other.0);
    }

    /// Render the whole report, one diagnostic per line.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for diag in &self.0 {
            out.push_str(&diag.to_string());
            out.push('\n');
        }
        out
    }
}

impl IntoIterator for Diagnostics {
    type Item = Diagnostic;
    type IntoIter = std::vec::IntoIter<Diagnostic>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a> IntoIterator for &'a Diagnostics {
    type Item = &'a Diagnostic;
    type IntoIter = std::slice::Iter<'a, Diagnostic>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}
