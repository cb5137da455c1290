use indoc::indoc;

use crate::scan::{Members, scan_source};

#[test]
fn plain_import() {
    let module = scan_source("import os.path\n");
    assert_eq!(module.imports.len(), 1);
    let imp = &module.imports[0];
    assert_eq!(imp.level, 0);
    assert_eq!(imp.target, "os.path");
    assert_eq!(imp.members, Members::None);
    assert!(!imp.guarded);
    assert_eq!(imp.line, 1);
}

#[test]
fn comma_separated_import_yields_one_entry_each() {
    let module = scan_source("import sys, json as j\n");
    let targets: Vec<&str> = module.imports.iter().map(|i| i.target.as_str()).collect();
    assert_eq!(targets, vec!["sys", "json"]);
}

#[test]
fn from_import_records_member_names() {
    let module = scan_source("from pkg.sub import a, b as c\n");
    assert_eq!(module.imports.len(), 1);
    let imp = &module.imports[0];
    assert_eq!(imp.target, "pkg.sub");
    assert_eq!(
        imp.members,
        Members::Names(vec!["a".into(), "b".into()])
    );
}

#[test]
fn relative_import_counts_dots() {
    let module = scan_source("from ..util import helpers\n");
    let imp = &module.imports[0];
    assert_eq!(imp.level, 2);
    assert_eq!(imp.target, "util");
}

#[test]
fn bare_relative_import_has_empty_target() {
    let module = scan_source("from . import sibling\n");
    let imp = &module.imports[0];
    assert_eq!(imp.level, 1);
    assert_eq!(imp.target, "");
    assert_eq!(imp.members, Members::Names(vec!["sibling".into()]));
}

#[test]
fn star_import() {
    let module = scan_source("from pkg import *\n");
    assert_eq!(module.imports[0].members, Members::Star);
}

#[test]
fn parenthesized_import_list_spans_lines() {
    let src = indoc! {r#"
        from pkg import (
            first,
            second as two,
            third,
        )
    "#};
    let module = scan_source(src);
    assert_eq!(module.imports.len(), 1);
    assert_eq!(
        module.imports[0].members,
        Members::Names(vec!["first".into(), "second".into(), "third".into()])
    );
    assert_eq!(module.imports[0].line, 1);
}

#[test]
fn try_block_marks_imports_guarded() {
    let src = indoc! {r#"
        try:
            import optional_lib
        except ImportError:
            optional_lib = None
    "#};
    let module = scan_source(src);
    assert_eq!(module.imports.len(), 1);
    assert!(module.imports[0].guarded);
}

#[test]
fn conditional_block_marks_imports_guarded() {
    let src = indoc! {r#"
        if sys.version_info >= (3, 8):
            import importlib.metadata
        else:
            import importlib_metadata
    "#};
    let module = scan_source(src);
    assert_eq!(module.imports.len(), 2);
    assert!(module.imports.iter().all(|i| i.guarded));
}

#[test]
fn function_body_imports_are_not_guarded() {
    let src = indoc! {r#"
        def load():
            import json
            return json
    "#};
    let module = scan_source(src);
    assert_eq!(module.imports.len(), 1);
    assert!(!module.imports[0].guarded);
}

#[test]
fn guard_applies_through_nested_blocks() {
    let src = indoc! {r#"
        try:
            def helper():
                import deep
        except ImportError:
            pass
    "#};
    let module = scan_source(src);
    assert!(module.imports[0].guarded);
}

#[test]
fn dedent_leaves_the_guard() {
    let src = indoc! {r#"
        try:
            import maybe
        except ImportError:
            pass

        import always
    "#};
    let module = scan_source(src);
    assert_eq!(module.imports.len(), 2);
    assert!(module.imports[0].guarded);
    assert!(!module.imports[1].guarded);
}

#[test]
fn export_list_is_collected() {
    let src = indoc! {r#"
        __all__ = ["alpha", 'beta']

        import os
    "#};
    let module = scan_source(src);
    assert_eq!(
        module.exports,
        Some(vec!["alpha".to_owned(), "beta".to_owned()])
    );
}

#[test]
fn nested_export_list_is_ignored() {
    let src = indoc! {r#"
        def f():
            __all__ = ["x"]
    "#};
    let module = scan_source(src);
    assert_eq!(module.exports, None);
}

#[test]
fn docstring_imports_are_invisible() {
    let src = indoc! {r#"
        """
        import fake
        """
        import real
    "#};
    let module = scan_source(src);
    assert_eq!(module.imports.len(), 1);
    assert_eq!(module.imports[0].target, "real");
    assert_eq!(module.imports[0].line, 4);
}

#[test]
fn malformed_lines_are_skipped() {
    let module = scan_source("import\nfrom import x\nimport ok\n");
    assert_eq!(module.imports.len(), 1);
    assert_eq!(module.imports[0].target, "ok");
}
