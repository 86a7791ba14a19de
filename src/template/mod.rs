//! Template text handling: splitting text into literal and `${...}` segments,
//! and evaluating the expression segments.
//!
//! # Example
//!
//! ```ignore
//! let segments = split("<p>${1}</p>")?;
//! assert_eq!(segments[1], Segment::Expression("${1}".into()));
//! ```

mod eval;
mod jinja;

pub use eval::{Evaluator, IncludeFn, Scope, Value, Variables, stringify};
pub use jinja::JinjaEvaluator;

use crate::error::SplitError;
use std::borrow::Cow;
use std::mem;

/// Opening token of an expression.
pub const OPEN: &str = "${";

/// Escape character that turns a following `${` into literal text.
const ESCAPE: u8 = b'\\';

const ESCAPED_OPEN: &str = "\\${";

/// Quoting delimiter; `${` after an odd number of these is literal.
const QUOTE: char = '`';

// ============================================================================
// Segments
// ============================================================================

/// One piece of split template text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    /// Text copied to the output as is.
    Literal(String),
    /// Full expression source including the `${` and `}` delimiters.
    Expression(String),
}

impl Segment {
    /// Source text of this segment.
    pub fn text(&self) -> &str {
        match self {
            Segment::Literal(text) | Segment::Expression(text) => text,
        }
    }

    /// Expression body between the delimiters, `None` for literals.
    pub fn code(&self) -> Option<&str> {
        match self {
            Segment::Literal(_) => None,
            Segment::Expression(text) => Some(&text[OPEN.len()..text.len() - 1]),
        }
    }

    pub const fn is_expression(&self) -> bool {
        matches!(self, Segment::Expression(_))
    }
}

// ============================================================================
// Splitting
// ============================================================================

/// Split text into ordered literal and expression segments.
///
/// Concatenating [`Segment::text`] of the result reproduces `text` exactly.
pub fn split(text: &str) -> Result<Vec<Segment>, SplitError> {
    if !text.contains(OPEN) {
        return Ok(if text.is_empty() {
            Vec::new()
        } else {
            vec![Segment::Literal(text.to_owned())]
        });
    }

    let mut segments = Vec::new();
    let mut literal = String::new();
    let mut cursor = 0;

    while let Some(found) = text[cursor..].find(OPEN) {
        let start = cursor + found;
        literal.push_str(&text[cursor..start]);
        let end = find_close(text, start)?;

        if is_escaped(&literal) || in_open_quote(&literal) {
            literal.push_str(&text[start..end]);
        } else {
            if !literal.is_empty() {
                segments.push(Segment::Literal(mem::take(&mut literal)));
            }
            segments.push(Segment::Expression(text[start..end].to_owned()));
        }
        cursor = end;
    }

    literal.push_str(&text[cursor..]);
    if !literal.is_empty() {
        segments.push(Segment::Literal(literal));
    }

    Ok(segments)
}

/// Whether `text` contains at least one expression segment.
pub fn has_expressions(text: &str) -> Result<bool, SplitError> {
    if !text.contains(OPEN) {
        return Ok(false);
    }
    Ok(split(text)?.iter().any(Segment::is_expression))
}

/// Concatenate segments, replacing each expression with `eval(code)`.
///
/// Literal text is [`unescape`]d.
pub fn render_segments<E>(
    segments: &[Segment],
    mut eval: impl FnMut(&str) -> Result<String, E>,
) -> Result<String, E> {
    let mut out = String::new();
    for segment in segments {
        match segment.code() {
            Some(code) => out.push_str(&eval(code)?),
            None => out.push_str(&unescape(segment.text())),
        }
    }
    Ok(out)
}

/// Output form of literal text: one escape is dropped in front of every
/// escaped `${`.
pub fn unescape(literal: &str) -> Cow<'_, str> {
    if literal.contains(ESCAPED_OPEN) {
        Cow::Owned(literal.replace(ESCAPED_OPEN, OPEN))
    } else {
        Cow::Borrowed(literal)
    }
}

/// Byte index just past the `}` matching the `${` at `start`.
///
/// Every `{` (including the one in a nested `${`) opens a level. Braces in
/// quoted strings inside the expression body are ignored.
fn find_close(text: &str, start: usize) -> Result<usize, SplitError> {
    let bytes = text.as_bytes();
    let mut depth = 1usize;
    let mut quote: Option<u8> = None;
    let mut i = start + OPEN.len();

    while i < bytes.len() {
        let byte = bytes[i];
        match quote {
            Some(_) if byte == ESCAPE => i += 1,
            Some(q) if byte == q => quote = None,
            Some(_) => {}
            None => match byte {
                b'\'' | b'"' | b'`' => quote = Some(byte),
                b'{' => depth += 1,
                b'}' => {
                    depth -= 1;
                    if depth == 0 {
                        return Ok(i + 1);
                    }
                }
                _ => {}
            },
        }
        i += 1;
    }

    Err(SplitError::UnterminatedExpression { offset: start })
}

/// An odd run of trailing escapes escapes the next `${`.
fn is_escaped(literal: &str) -> bool {
    let run = literal.bytes().rev().take_while(|&b| b == ESCAPE).count();
    run % 2 == 1
}

fn in_open_quote(literal: &str) -> bool {
    literal.matches(QUOTE).count() % 2 == 1
}

// ============================================================================
// Tests
// ============================================================================
