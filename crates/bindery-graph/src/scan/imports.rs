//! Import statement extraction.
//!
//! Walks the logical lines of one source file, tracking guard context
//! through an indentation stack, and collects every import statement plus
//! the module's explicit export list when one is declared at top level.
//! Lines that do not parse as imports are skipped, never fatal.

use crate::scan::lexer::{Tok, Token, lex, token_text};
use crate::scan::lines::logical_lines;

/// Which members a `from` import pulls in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Members {
    /// Plain `import a.b` form; the whole target is bound.
    None,
    /// `from x import *`.
    Star,
    /// `from x import a, b as c`. Original names, aliases dropped.
    Names(Vec<String>),
}

/// One import statement as written, before resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawImport {
    /// Relative level: number of leading dots in a `from` import.
    pub level: u8,
    /// Dotted target name. Empty for `from . import x` forms.
    pub target: String,
    pub members: Members,
    /// True when the statement sits inside a try or conditional block.
    pub guarded: bool,
    /// 1-based line the statement starts on.
    pub line: u32,
}

/// Scan result for one source file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScannedModule {
    pub imports: Vec<RawImport>,
    /// Top-level `__all__` list, when declared with a literal.
    pub exports: Option<Vec<String>>,
}

/// Extract imports and the export list from source text.
pub fn scan_source(src: &str) -> ScannedModule {
    let mut module = ScannedModule::default();
    // Stack of (indent, guards) for enclosing blocks.
    let mut guards: Vec<(u32, bool)> = Vec::new();

    for ll in logical_lines(src) {
        while guards.last().is_some_and(|&(indent, _)| indent >= ll.indent) {
            guards.pop();
        }
        let guarded = guards.iter().any(|&(_, g)| g);

        let tokens = lex(&ll.text);
        let Some(first) = tokens.first() else { continue };

        match first.tok {
            Tok::Import => {
                let mut cursor = Cursor::new(&ll.text, &tokens);
                cursor.bump();
                parse_import(&mut cursor, guarded, ll.line, &mut module.imports);
            }
            Tok::From => {
                let mut cursor = Cursor::new(&ll.text, &tokens);
                cursor.bump();
                parse_from(&mut cursor, guarded, ll.line, &mut module.imports);
            }
            Tok::Try | Tok::Except | Tok::Finally | Tok::If | Tok::Elif | Tok::Else => {
                guards.push((ll.indent, true));
            }
            Tok::Ident
                if ll.indent == 0
                    && token_text(&ll.text, first) == "__all__"
                    && tokens.get(1).map(|t| t.tok) == Some(Tok::Eq) =>
            {
                module.exports = Some(parse_exports(&ll.text, &tokens[2..]));
            }
            _ => {
                // Any other block opener (def, class, with, ...) scopes
                // its body but does not guard it.
                if tokens.last().map(|t| t.tok) == Some(Tok::Colon) {
                    guards.push((ll.indent, false));
                }
            }
        }
    }

    module
}

/// `import a.b as c, d` - one statement, one entry per comma clause.
fn parse_import(cursor: &mut Cursor<'_>, guarded: bool, line: u32, out: &mut Vec<RawImport>) {
    loop {
        let Some(target) = cursor.dotted_name() else { return };
        out.push(RawImport {
            level: 0,
            target,
            members: Members::None,
            guarded,
            line,
        });
        if cursor.eat(Tok::As) && !cursor.eat(Tok::Ident) {
            return;
        }
        if !cursor.eat(Tok::Comma) {
            return;
        }
    }
}

/// `from ...pkg import x, y as z` / `from x import *` / parenthesized list.
fn parse_from(cursor: &mut Cursor<'_>, guarded: bool, line: u32, out: &mut Vec<RawImport>) {
    let mut level = 0u8;
    while cursor.eat(Tok::Dot) {
        level = level.saturating_add(1);
    }

    let target = if cursor.peek() == Some(Tok::Import) {
        // `from . import x` has no dotted target at all, but only the
        // relative form may omit it.
        if level == 0 {
            return;
        }
        String::new()
    } else {
        match cursor.dotted_name() {
            Some(name) => name,
            None => return,
        }
    };

    if !cursor.eat(Tok::Import) {
        return;
    }

    let members = if cursor.eat(Tok::Star) {
        Members::Star
    } else {
        cursor.eat(Tok::LParen);
        let mut names = Vec::new();
        loop {
            let Some(name) = cursor.ident() else { break };
            names.push(name);
            if cursor.eat(Tok::As) && !cursor.eat(Tok::Ident) {
                break;
            }
            if !cursor.eat(Tok::Comma) {
                break;
            }
        }
        if names.is_empty() {
            return;
        }
        Members::Names(names)
    };

    out.push(RawImport {
        level,
        target,
        members,
        guarded,
        line,
    });
}

/// Collect string literals from a `__all__ = [...]` right-hand side.
/// Non-literal entries make the list unusable, but a partial read is
/// still better than none for star expansion.
fn parse_exports(line: &str, tokens: &[Token]) -> Vec<String> {
    tokens
        .iter()
        .filter(|t| t.tok == Tok::Str)
        .map(|t| {
            let text = token_text(line, t);
            text[1..text.len() - 1].to_owned()
        })
        .collect()
}

struct Cursor<'l> {
    line: &'l str,
    tokens: &'l [Token],
    pos: usize,
}

impl<'l> Cursor<'l> {
    fn new(line: &'l str, tokens: &'l [Token]) -> Self {
        Self { line, tokens, pos: 0 }
    }

    fn peek(&self) -> Option<Tok> {
        self.tokens.get(self.pos).map(|t| t.tok)
    }

    fn bump(&mut self) -> Option<&'l Token> {
        let token = self.tokens.get(self.pos)?;
        self.pos += 1;
        Some(token)
    }

    fn eat(&mut self, tok: Tok) -> bool {
        if self.peek() == Some(tok) {
            self.pos += 1;
            return true;
        }
        false
    }

    /// Next identifier's text, or None without consuming.
    fn ident(&mut self) -> Option<String> {
        if self.peek() == Some(Tok::Ident) {
            let token = self.bump()?;
            return Some(token_text(self.line, token).to_owned());
        }
        None
    }

    /// `a.b.c` - at least one identifier.
    fn dotted_name(&mut self) -> Option<String> {
        let mut name = self.ident()?;
        while self.peek() == Some(Tok::Dot) {
            self.pos += 1;
            match self.ident() {
                Some(part) => {
                    name.push('.');
                    name.push_str(&part);
                }
                None => break,
            }
        }
        Some(name)
    }
}
