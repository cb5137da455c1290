use crate::diagnostics::{Diagnostic, DiagnosticKind, Diagnostics, Severity};

#[test]
fn severity_mapping() {
    assert_eq!(
        DiagnosticKind::Missing { guarded: false }.severity(),
        Severity::Error
    );
    assert_eq!(
        DiagnosticKind::Missing { guarded: true }.severity(),
        Severity::Warning
    );
    assert_eq!(DiagnosticKind::HookFailure.severity(), Severity::Warning);
    assert_eq!(DiagnosticKind::CycleNote.severity(), Severity::Note);
}

#[test]
fn counts_and_queries() {
    let mut diags = Diagnostics::new();
    diags.report(
        DiagnosticKind::Missing { guarded: false },
        "gone",
        "referenced by `app`",
    );
    diags.report(DiagnosticKind::Missing { guarded: true }, "maybe", "guarded");
    diags.report(DiagnosticKind::CycleNote, "a", "a -> b -> a");

    assert_eq!(diags.len(), 3);
    assert!(diags.has_errors());
    assert_eq!(diags.error_count(), 1);
    assert_eq!(diags.warning_count(), 1);
}

#[test]
fn emission_order_is_preserved() {
    let mut diags = Diagnostics::new();
    diags.report(DiagnosticKind::HookFailure, "z", "first");
    diags.report(DiagnosticKind::HookFailure, "a", "second");

    let nodes: Vec<&str> = diags.iter().map(|d| d.node.as_str()).collect();
    assert_eq!(nodes, vec!["z", "a"]);
}

#[test]
fn display_includes_severity_and_node() {
    let diag = Diagnostic::new(
        DiagnosticKind::Missing { guarded: true },
        "optional_lib",
        "referenced by `pkgA`",
    );
    let rendered = diag.to_string();
    assert!(rendered.starts_with("warning:"));
    assert!(rendered.contains("optional_lib"));
    assert!(rendered.contains("(guarded)"));
}

#[test]
fn render_emits_one_line_per_diagnostic() {
    let mut diags = Diagnostics::new();
    diags.report(DiagnosticKind::HookFailure, "pkg", "callback raised");
    diags.report(DiagnosticKind::CycleNote, "a", "a -> a");

    let report = diags.render();
    assert_eq!(report.lines().count(), 2);
}

#[test]
fn empty_collection_has_no_errors() {
    let diags = Diagnostics::new();
    assert!(diags.is_empty());
    assert!(!diags.has_errors());
}
