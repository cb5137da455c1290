use std::fs;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use indoc::indoc;
use tempfile::TempDir;

use crate::build::{BuildError, BuildOutcome, EntryPoint, GraphBuilder};
use crate::diagnostics::{DiagnosticKind, Severity};
use crate::hooks::{HookEngine, HookRecord};
use crate::registry::{EdgeKind, NodeKind};
use crate::resolve::SearchPath;

fn tree(files: &[(&str, &str)]) -> TempDir {
    let dir = tempfile::tempdir().unwrap();
    for (rel, contents) in files {
        let path = dir.path().join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, contents).unwrap();
    }
    dir
}

fn build_library(dir: &TempDir, entry: &str) -> BuildOutcome {
    let search = SearchPath::from_roots(vec![dir.path().to_path_buf()]);
    GraphBuilder::new(search)
        .build(&[EntryPoint::library(entry)])
        .unwrap()
}

fn node_names(outcome: &BuildOutcome) -> Vec<&str> {
    outcome
        .registry
        .nodes()
        .map(|(_, n)| n.name.as_str())
        .collect()
}

#[test]
fn guarded_missing_import_is_a_warning_not_an_error() {
    let dir = tree(&[
        ("app.py", "import pkgA\n"),
        (
            "pkgA/__init__.py",
            indoc! {r#"
                import pkgA.sub

                try:
                    import optional_lib
                except ImportError:
                    optional_lib = None
            "#},
        ),
        ("pkgA/sub.py", ""),
    ]);

    // Program entry: its own directory joins the search path.
    let outcome = GraphBuilder::new(SearchPath::new())
        .build(&[EntryPoint::program(
            dir.path().join("app.py").to_string_lossy().into_owned(),
        )])
        .unwrap();

    assert_eq!(
        node_names(&outcome),
        vec!["app", "pkgA", "pkgA.sub", "optional_lib"]
    );
    let missing = outcome.registry.get("optional_lib").unwrap();
    match &outcome.registry.node(missing).kind {
        NodeKind::Missing(unit) => assert!(unit.guarded),
        other => panic!("expected missing, got {other:?}"),
    }

    assert_eq!(outcome.diagnostics.len(), 1);
    let diag = &outcome.diagnostics.as_slice()[0];
    assert_eq!(diag.kind, DiagnosticKind::Missing { guarded: true });
    assert_eq!(diag.severity(), Severity::Warning);
    assert!(!outcome.diagnostics.has_errors());
}

#[test]
fn unguarded_missing_import_is_an_error_but_build_completes() {
    let dir = tree(&[("app.py", "import gone\n")]);
    let outcome = build_library(&dir, "app");

    assert!(outcome.diagnostics.has_errors());
    assert!(outcome.registry.contains("gone"));
    assert!(outcome.registry.contains("app"));
}

#[test]
fn hook_hidden_dependency_and_exclusion() {
    let dir = tree(&[
        ("app.py", "import pkgA\n"),
        ("pkgA/__init__.py", "import pkgA.debug_only\n"),
        ("pkgA/debug_only.py", "import pkgA.heavy\n"),
        ("pkgA/heavy.py", ""),
        ("native_ext.so", "\x7fELF"),
    ]);

    let mut hooks = HookEngine::new();
    hooks.register_builtin(HookRecord {
        module: "pkgA".to_owned(),
        hidden_imports: vec!["native_ext".to_owned()],
        excludes: vec!["pkgA.debug_only".to_owned()],
        data_files: Vec::new(),
        binaries: Vec::new(),
    });

    let search = SearchPath::from_roots(vec![dir.path().to_path_buf()]);
    let outcome = GraphBuilder::new(search)
        .with_hooks(hooks)
        .build(&[EntryPoint::library("app")])
        .unwrap();

    // The hidden dependency is in the closure despite never being
    // imported by any source line.
    let native = outcome.registry.get("native_ext").unwrap();
    assert!(matches!(
        outcome.registry.node(native).kind,
        NodeKind::Extension(_)
    ));

    // The excluded name never appears, and its own imports were never
    // traversed.
    assert!(!outcome.registry.contains("pkgA.debug_only"));
    assert!(!outcome.registry.contains("pkgA.heavy"));
}

#[test]
fn hidden_dependencies_enqueue_before_static_edges() {
    let dir = tree(&[("app.py", "import zzz\n"), ("zzz.py", ""), ("aaa.py", "")]);

    let mut hooks = HookEngine::new();
    hooks.register_builtin(HookRecord {
        module: "app".to_owned(),
        hidden_imports: vec!["aaa".to_owned()],
        excludes: Vec::new(),
        data_files: Vec::new(),
        binaries: Vec::new(),
    });

    let search = SearchPath::from_roots(vec![dir.path().to_path_buf()]);
    let outcome = GraphBuilder::new(search)
        .with_hooks(hooks)
        .build(&[EntryPoint::library("app")])
        .unwrap();

    assert_eq!(node_names(&outcome), vec!["app", "aaa", "zzz"]);
}

#[test]
fn cycle_registers_n_nodes_n_edges_and_one_note() {
    let dir = tree(&[
        ("a.py", "import b\n"),
        ("b.py", "import c\n"),
        ("c.py", "import a\n"),
    ]);
    let outcome = build_library(&dir, "a");

    assert_eq!(outcome.registry.len(), 3);
    assert_eq!(outcome.registry.edge_count(), 3);

    let notes: Vec<_> = outcome
        .diagnostics
        .iter()
        .filter(|d| d.kind == DiagnosticKind::CycleNote)
        .collect();
    assert_eq!(notes.len(), 1);
    assert!(notes[0].detail.contains("a -> b -> c -> a"));
    assert!(!outcome.diagnostics.has_errors());
}

#[test]
fn ancestors_are_registered_before_children() {
    let dir = tree(&[
        ("app.py", "import deep.nested.leaf\n"),
        ("deep/__init__.py", ""),
        ("deep/nested/__init__.py", ""),
        ("deep/nested/leaf.py", ""),
    ]);
    let outcome = build_library(&dir, "app");

    assert_eq!(
        node_names(&outcome),
        vec!["app", "deep", "deep.nested", "deep.nested.leaf"]
    );
}

#[test]
fn relative_imports_resolve_through_the_package_chain() {
    let dir = tree(&[
        ("pkg/__init__.py", ""),
        ("pkg/mod.py", "from . import util\n"),
        ("pkg/util.py", ""),
    ]);
    let outcome = build_library(&dir, "pkg.mod");

    assert!(outcome.registry.contains("pkg.util"));
    let mod_id = outcome.registry.get("pkg.mod").unwrap();
    let util_id = outcome.registry.get("pkg.util").unwrap();
    assert!(
        outcome
            .registry
            .edges_from(mod_id)
            .any(|e| e.target == util_id && e.kind == EdgeKind::Relative(1))
    );
}

#[test]
fn star_import_expands_through_the_export_list() {
    let dir = tree(&[
        ("app.py", "from pkg import *\n"),
        ("pkg/__init__.py", "__all__ = [\"alpha\"]\n"),
        ("pkg/alpha.py", ""),
        ("pkg/beta.py", ""),
    ]);
    let outcome = build_library(&dir, "app");

    // Only the exported submodule joins the closure.
    assert!(outcome.registry.contains("pkg.alpha"));
    assert!(!outcome.registry.contains("pkg.beta"));

    let app = outcome.registry.get("app").unwrap();
    let alpha = outcome.registry.get("pkg.alpha").unwrap();
    assert!(
        outcome
            .registry
            .edges_from(app)
            .any(|e| e.target == alpha && e.kind == EdgeKind::Star)
    );
}

#[test]
fn star_import_without_exports_takes_every_submodule() {
    let dir = tree(&[
        ("app.py", "from pkg import *\n"),
        ("pkg/__init__.py", ""),
        ("pkg/one.py", ""),
        ("pkg/two.py", ""),
    ]);
    let outcome = build_library(&dir, "app");

    assert!(outcome.registry.contains("pkg.one"));
    assert!(outcome.registry.contains("pkg.two"));
}

#[test]
fn failing_callback_is_isolated_to_its_node() {
    let dir = tree(&[("app.py", "import helper\n"), ("helper.py", "")]);

    let mut hooks = HookEngine::new();
    hooks.register_callback("app", |_ctx| Err("callback raised".to_owned()));

    let search = SearchPath::from_roots(vec![dir.path().to_path_buf()]);
    let outcome = GraphBuilder::new(search)
        .with_hooks(hooks)
        .build(&[EntryPoint::library("app")])
        .unwrap();

    // Traversal continued past the failure.
    assert!(outcome.registry.contains("helper"));
    let failures: Vec<_> = outcome
        .diagnostics
        .iter()
        .filter(|d| d.kind == DiagnosticKind::HookFailure)
        .collect();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].node, "app");
    assert_eq!(failures[0].detail, "callback raised");
}

#[test]
fn callback_can_exclude_its_own_node() {
    let dir = tree(&[
        ("app.py", "import noisy\n"),
        ("noisy.py", "import payload\n"),
        ("payload.py", ""),
    ]);

    let mut hooks = HookEngine::new();
    hooks.register_callback("noisy", |ctx| {
        ctx.exclude_self();
        Ok(())
    });

    let search = SearchPath::from_roots(vec![dir.path().to_path_buf()]);
    let outcome = GraphBuilder::new(search)
        .with_hooks(hooks)
        .build(&[EntryPoint::library("app")])
        .unwrap();

    let noisy = outcome.registry.get("noisy").unwrap();
    assert!(outcome.registry.node(noisy).is_excluded());
    // Nothing below the excluded node was traversed.
    assert!(!outcome.registry.contains("payload"));
}

#[test]
fn callback_dependencies_follow_record_hidden_imports() {
    let dir = tree(&[
        ("app.py", ""),
        ("from_record.py", ""),
        ("from_callback.py", ""),
    ]);

    let mut hooks = HookEngine::new();
    hooks.register_builtin(HookRecord {
        module: "app".to_owned(),
        hidden_imports: vec!["from_record".to_owned()],
        excludes: Vec::new(),
        data_files: Vec::new(),
        binaries: Vec::new(),
    });
    hooks.register_callback("app", |ctx| {
        ctx.add_dependency("from_callback");
        Ok(())
    });

    let search = SearchPath::from_roots(vec![dir.path().to_path_buf()]);
    let outcome = GraphBuilder::new(search)
        .with_hooks(hooks)
        .build(&[EntryPoint::library("app")])
        .unwrap();

    assert_eq!(
        node_names(&outcome),
        vec!["app", "from_record", "from_callback"]
    );
}

#[test]
fn missing_references_fold_and_lose_guarded_status() {
    let dir = tree(&[
        ("app.py", "import first\nimport second\n"),
        (
            "first.py",
            indoc! {r#"
                try:
                    import ghost
                except ImportError:
                    ghost = None
            "#},
        ),
        ("second.py", "import ghost\n"),
    ]);
    let outcome = build_library(&dir, "app");

    let ghost = outcome.registry.get("ghost").unwrap();
    match &outcome.registry.node(ghost).kind {
        NodeKind::Missing(unit) => {
            assert!(!unit.guarded);
            assert_eq!(unit.referenced_by.len(), 2);
        }
        other => panic!("expected missing, got {other:?}"),
    }

    // The report carries the settled status: the guarded-first reference
    // does not hide the later unguarded one.
    assert_eq!(outcome.diagnostics.len(), 1);
    let diag = &outcome.diagnostics.as_slice()[0];
    assert_eq!(diag.kind, DiagnosticKind::Missing { guarded: false });
    assert!(diag.detail.contains("`first`"));
    assert!(diag.detail.contains("`second`"));
    assert!(outcome.diagnostics.has_errors());
}

#[test]
fn unreadable_source_degrades_to_a_diagnostic() {
    let dir = tree(&[("app.py", "import mangled\nimport after\n"), ("after.py", "")]);
    fs::write(dir.path().join("mangled.py"), [0x80u8, 0xff, 0xfe]).unwrap();
    let outcome = build_library(&dir, "app");

    // The bad file keeps its node and the traversal continues past it.
    assert!(outcome.registry.contains("mangled"));
    assert!(outcome.registry.contains("after"));
    let unreadable: Vec<_> = outcome
        .diagnostics
        .iter()
        .filter(|d| d.kind == DiagnosticKind::UnreadableSource)
        .collect();
    assert_eq!(unreadable.len(), 1);
    assert_eq!(unreadable[0].node, "mangled");
    assert_eq!(unreadable[0].severity(), Severity::Error);
}

#[test]
fn over_deep_relative_import_becomes_a_missing_node() {
    let dir = tree(&[
        ("pkg/__init__.py", ""),
        ("pkg/mod.py", "from ...far import thing\n"),
    ]);
    let outcome = build_library(&dir, "pkg.mod");

    let missing = outcome.registry.get("...far").unwrap();
    assert!(outcome.registry.node(missing).is_missing());
    let mod_id = outcome.registry.get("pkg.mod").unwrap();
    assert!(
        outcome
            .registry
            .edges_from(mod_id)
            .any(|e| e.target == missing && e.kind == EdgeKind::Relative(3))
    );
    assert!(
        outcome
            .diagnostics
            .iter()
            .any(|d| d.node == "...far" && d.kind == DiagnosticKind::Missing { guarded: false })
    );
}

#[test]
fn abort_flag_discards_the_build() {
    let dir = tree(&[("app.py", "")]);
    let flag = Arc::new(AtomicBool::new(true));

    let search = SearchPath::from_roots(vec![dir.path().to_path_buf()]);
    let result = GraphBuilder::new(search)
        .with_abort(Arc::clone(&flag))
        .build(&[EntryPoint::library("app")]);

    assert!(matches!(result, Err(BuildError::Aborted)));
    flag.store(false, Ordering::Relaxed);
}

#[test]
fn builds_are_deterministic() {
    let files: &[(&str, &str)] = &[
        ("app.py", "import pkg\nimport other\n"),
        ("pkg/__init__.py", "from . import a, b\n"),
        ("pkg/a.py", ""),
        ("pkg/b.py", "import other\n"),
        ("other.py", ""),
    ];
    let dir = tree(files);

    let first = build_library(&dir, "app");
    let second = build_library(&dir, "app");

    assert_eq!(node_names(&first), node_names(&second));
    let edges = |o: &BuildOutcome| {
        o.registry
            .edges()
            .map(|e| (e.source, e.target, e.kind))
            .collect::<Vec<_>>()
    };
    assert_eq!(edges(&first), edges(&second));
    assert_eq!(
        first.diagnostics.as_slice().len(),
        second.diagnostics.as_slice().len()
    );
}

#[test]
fn long_import_chains_survive_the_cycle_pass() {
    let dir = tempfile::tempdir().unwrap();
    let n = 400;
    for i in 0..n {
        let next = (i + 1) % n;
        fs::write(
            dir.path().join(format!("m{i:03}.py")),
            format!("import m{next:03}\n"),
        )
        .unwrap();
    }

    let search = SearchPath::from_roots(vec![dir.path().to_path_buf()]);
    let outcome = GraphBuilder::new(search)
        .build(&[EntryPoint::library("m000")])
        .unwrap();

    assert_eq!(outcome.registry.len(), n);
    let notes: Vec<_> = outcome
        .diagnostics
        .iter()
        .filter(|d| d.kind == DiagnosticKind::CycleNote)
        .collect();
    assert_eq!(notes.len(), 1);
    assert!(notes[0].detail.starts_with("m000 -> m001"));
}

#[test]
fn bad_program_entry_is_rejected() {
    let result = GraphBuilder::new(SearchPath::new())
        .build(&[EntryPoint::program("..")]);
    assert!(matches!(result, Err(BuildError::BadEntryPoint(_))));
}
