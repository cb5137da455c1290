//! Source scanning: logical-line splitting and import extraction.
//!
//! The scanner is deliberately shallow. It understands exactly enough of
//! the surface syntax to find import statements, guard context, and the
//! module's explicit export list; it never executes anything and lines it
//! cannot make sense of are skipped rather than fatal.

mod imports;
mod lexer;
mod lines;

#[cfg(test)]
mod imports_tests;

pub use imports::{Members, RawImport, ScannedModule, scan_source};
pub use lexer::{Tok, Token, lex, token_text};
pub use lines::{LogicalLine, logical_lines};
