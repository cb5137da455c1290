//! Token lexer for single logical lines.
//!
//! Produces span-based tokens; text is sliced from the line only when
//! needed. Characters the lexer cannot classify are skipped - the import
//! grammar is a small island inside a language we do not otherwise parse.

use std::ops::Range;

use logos::Logos;

/// Token kinds relevant to import statements and export lists.
#[derive(Logos, Debug, Clone, Copy, PartialEq, Eq)]
#[logos(skip r"[ \t]+")]
pub enum Tok {
    #[token("import")]
    Import,
    #[token("from")]
    From,
    #[token("as")]
    As,
    #[token("try")]
    Try,
    #[token("except")]
    Except,
    #[token("finally")]
    Finally,
    #[token("if")]
    If,
    #[token("elif")]
    Elif,
    #[token("else")]
    Else,

    #[regex(r"[A-Za-z_][A-Za-z0-9_]*")]
    Ident,

    #[token(".")]
    Dot,
    #[token(",")]
    Comma,
    #[token("*")]
    Star,
    #[token("(")]
    LParen,
    #[token(")")]
    RParen,
    #[token("[")]
    LBracket,
    #[token("]")]
    RBracket,
    #[token(":")]
    Colon,
    #[token("=")]
    Eq,

    #[regex(r#""([^"\\]|\\.)*""#)]
    #[regex(r#"'([^'\\]|\\.)*'"#)]
    Str,
}

/// A token with its span into the lexed line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Token {
    pub tok: Tok,
    pub span: (u32, u32),
}

/// Tokenize one logical line, skipping anything unclassifiable.
pub fn lex(line: &str) -> Vec<Token> {
    let mut tokens = Vec::new();
    let mut lexer = Tok::lexer(line);
    while let Some(result) = lexer.next() {
        if let Ok(tok) = result {
            let Range { start, end } = lexer.span();
            tokens.push(Token {
                tok,
                span: (start as u32, end as u32),
            });
        }
    }
    tokens
}

/// Retrieve the text slice for a token. O(1) slice into the line.
#[inline]
pub fn token_text<'l>(line: &'l str, token: &Token) -> &'l str {
    &line[token.span.0 as usize..token.span.1 as usize]
}
