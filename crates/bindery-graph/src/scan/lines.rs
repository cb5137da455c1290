//! Logical-line splitting.
//!
//! Physical lines are joined across trailing backslashes and unbalanced
//! brackets, comments are stripped, and triple-quoted string bodies are
//! dropped so a docstring can never smuggle a fake import statement into
//! the scanner. Import statements only ever need statement granularity,
//! so nothing finer is preserved.

/// One cleaned statement line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogicalLine {
    /// 1-based physical line the statement starts on.
    pub line: u32,
    /// Indentation of the first physical line, in columns (tab = 8).
    pub indent: u32,
    /// Cleaned statement text: comments removed, continuations joined.
    pub text: String,
}

struct Acc {
    line: u32,
    indent: u32,
    text: String,
    depth: i32,
}

/// Split source into logical lines.
pub fn logical_lines(src: &str) -> Vec<LogicalLine> {
    let mut out = Vec::new();
    let mut triple: Option<char> = None;
    let mut cur: Option<Acc> = None;

    for (idx, raw) in src.lines().enumerate() {
        let lineno = (idx + 1) as u32;
        let mut rest = raw;

        if let Some(q) = triple {
            match find_triple(rest, q) {
                Some(pos) => {
                    triple = None;
                    rest = &rest[pos + 3..];
                    if cur.is_none() {
                        // Closed a free-standing docstring; drop the tail.
                        continue;
                    }
                }
                None => continue,
            }
        }

        let acc = cur.get_or_insert_with(|| Acc {
            line: lineno,
            indent: measure_indent(raw),
            text: String::new(),
            depth: 0,
        });

        let continued = clean_into(rest, acc, &mut triple);
        if triple.is_some() || continued || acc.depth > 0 {
            acc.text.push(' ');
            continue;
        }

        flush(&mut cur, &mut out);
    }
    flush(&mut cur, &mut out);

    out
}

fn flush(cur: &mut Option<Acc>, out: &mut Vec<LogicalLine>) {
    if let Some(acc) = cur.take() {
        let text = acc.text.trim().to_owned();
        if !text.is_empty() {
            out.push(LogicalLine {
                line: acc.line,
                indent: acc.indent,
                text,
            });
        }
    }
}

fn measure_indent(raw: &str) -> u32 {
    let mut col = 0u32;
    for c in raw.chars() {
        match c {
            ' ' => col += 1,
            '\t' => col = (col / 8 + 1) * 8,
            _ => break,
        }
    }
    col
}

/// Find the closing triple delimiter for quote char `q`.
fn find_triple(s: &str, q: char) -> Option<usize> {
    let needle: String = std::iter::repeat_n(q, 3).collect();
    s.find(&needle)
}

/// Append the cleaned content of one physical line to `acc`, tracking
/// bracket depth. Returns true when the line ends with a backslash
/// continuation; sets `triple` when an unclosed triple-quoted string
/// begins.
fn clean_into(seg: &str, acc: &mut Acc, triple: &mut Option<char>) -> bool {
    let chars: Vec<char> = seg.chars().collect();
    let mut i = 0;
    let mut in_str: Option<char> = None;
    let mut escaped = false;

    while i < chars.len() {
        let c = chars[i];

        if let Some(q) = in_str {
            acc.text.push(c);
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == q {
                in_str = None;
            }
            i += 1;
            continue;
        }

        match c {
            '#' => break,
            '"' | '\'' => {
                if chars.get(i + 1) == Some(&c) && chars.get(i + 2) == Some(&c) {
                    // Triple-quoted string: drop its body entirely.
                    let tail: String = chars[i + 3..].iter().collect();
                    match find_triple(&tail, c) {
                        Some(pos) => {
                            // `pos` is a byte offset; advance in chars.
                            i += tail[..pos].chars().count() + 6;
                            continue;
                        }
                        None => {
                            *triple = Some(c);
                            return false;
                        }
                    }
                }
                in_str = Some(c);
                acc.text.push(c);
            }
            '(' | '[' | '{' => {
                acc.depth += 1;
                acc.text.push(c);
            }
            ')' | ']' | '}' => {
                acc.depth -= 1;
                acc.text.push(c);
            }
            '\\' if chars[i + 1..].iter().all(|c| c.is_whitespace()) => {
                return true;
            }
            _ => acc.text.push(c),
        }
        i += 1;
    }

    false
}
