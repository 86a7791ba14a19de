//! A small CSS selector subset.
//!
//! Supported: type (`p`, `*`), `#id`, `.class`, `[attr]`, `[attr=v]`,
//! `[attr~=v]`, `[attr^=v]`, `[attr$=v]`, `[attr*=v]`, descendant (` `) and
//! child (`>`) combinators, and comma separated lists.

use super::{Document, NodeId};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("invalid selector `{selector}`: {reason}")]
pub struct SelectorError {
    pub selector: String,
    pub reason: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Combinator {
    Descendant,
    Child,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AttrOp {
    Equals,
    Includes,
    Prefix,
    Suffix,
    Substring,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Condition {
    Id(String),
    Class(String),
    Attr {
        name: String,
        test: Option<(AttrOp, String)>,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct Compound {
    /// `None` matches any tag.
    tag: Option<String>,
    conditions: Vec<Condition>,
}

/// Compounds joined by combinators; the combinator of the first is unused.
type Complex = Vec<(Combinator, Compound)>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selector {
    alternatives: Vec<Complex>,
}

impl Selector {
    pub fn parse(selector: &str) -> Result<Self, SelectorError> {
        Parser::new(selector).parse()
    }

    /// Whether element `node` matches any alternative of this selector.
    pub fn matches(&self, doc: &Document, node: NodeId) -> bool {
        self.alternatives.iter().any(|complex| {
            !complex.is_empty() && matches_from(complex, complex.len() - 1, doc, node)
        })
    }
}

fn matches_from(complex: &Complex, index: usize, doc: &Document, node: NodeId) -> bool {
    let (combinator, compound) = &complex[index];
    if !compound.matches(doc, node) {
        return false;
    }
    if index == 0 {
        return true;
    }
    match combinator {
        Combinator::Child => doc
            .parent(node)
            .is_some_and(|parent| matches_from(complex, index - 1, doc, parent)),
        Combinator::Descendant => doc
            .ancestors(node)
            .any(|ancestor| matches_from(complex, index - 1, doc, ancestor)),
    }
}

impl Compound {
    fn matches(&self, doc: &Document, node: NodeId) -> bool {
        let Some(element) = doc.element(node) else {
            return false;
        };
        if let Some(tag) = &self.tag
            && !element.is(tag)
        {
            return false;
        }
        self.conditions.iter().all(|condition| match condition {
            Condition::Id(id) => doc.attr(node, "id").is_some_and(|v| v == *id),
            Condition::Class(class) => doc
                .attr(node, "class")
                .is_some_and(|v| v.split_ascii_whitespace().any(|c| c == class)),
            Condition::Attr { name, test } => match (doc.attr(node, name), test) {
                (None, _) => false,
                (Some(_), None) => true,
                (Some(value), Some((op, expected))) => op.test(&value, expected),
            },
        })
    }
}

impl AttrOp {
    fn test(self, value: &str, expected: &str) -> bool {
        match self {
            AttrOp::Equals => value == expected,
            AttrOp::Includes => value.split_ascii_whitespace().any(|v| v == expected),
            AttrOp::Prefix => !expected.is_empty() && value.starts_with(expected),
            AttrOp::Suffix => !expected.is_empty() && value.ends_with(expected),
            AttrOp::Substring => !expected.is_empty() && value.contains(expected),
        }
    }
}

// ============================================================================
// Parsing
// ============================================================================

struct Parser<'a> {
    source: &'a str,
    chars: std::iter::Peekable<std::str::Chars<'a>>,
}

fn is_ident(c: char) -> bool {
    c.is_alphanumeric() || matches!(c, '-' | '_' | ':')
}

impl<'a> Parser<'a> {
    fn new(source: &'a str) -> Self {
        Self {
            source,
            chars: source.chars().peekable(),
        }
    }

    fn error(&self, reason: impl Into<String>) -> SelectorError {
        SelectorError {
            selector: self.source.to_owned(),
            reason: reason.into(),
        }
    }

    fn skip_whitespace(&mut self) -> bool {
        let mut skipped = false;
        while self.chars.next_if(|c| c.is_whitespace()).is_some() {
            skipped = true;
        }
        skipped
    }

    fn ident(&mut self) -> String {
        let mut out = String::new();
        while let Some(c) = self.chars.next_if(|&c| is_ident(c)) {
            out.push(c);
        }
        out
    }

    fn required_ident(&mut self, what: &str) -> Result<String, SelectorError> {
        let ident = self.ident();
        if ident.is_empty() {
            return Err(self.error(format!("expected {what}")));
        }
        Ok(ident)
    }

    fn parse(mut self) -> Result<Selector, SelectorError> {
        let mut alternatives = Vec::new();
        loop {
            alternatives.push(self.complex()?);
            match self.chars.next() {
                None => break,
                Some(',') => continue,
                Some(c) => return Err(self.error(format!("unexpected `{c}`"))),
            }
        }
        Ok(Selector { alternatives })
    }

    fn complex(&mut self) -> Result<Complex, SelectorError> {
        let mut complex = Complex::new();
        let mut combinator = Combinator::Descendant;
        self.skip_whitespace();
        loop {
            let Some(compound) = self.compound()? else {
                return Err(self.error("expected a selector"));
            };
            complex.push((combinator, compound));

            let spaced = self.skip_whitespace();
            combinator = match self.chars.peek() {
                None | Some(',') => return Ok(complex),
                Some('>') => {
                    self.chars.next();
                    self.skip_whitespace();
                    Combinator::Child
                }
                Some(_) if spaced => Combinator::Descendant,
                Some(&c) => return Err(self.error(format!("unexpected `{c}`"))),
            };
        }
    }

    /// Parse one compound selector; `None` when nothing was consumed.
    fn compound(&mut self) -> Result<Option<Compound>, SelectorError> {
        let mut compound = Compound::default();
        let universal = self.chars.next_if_eq(&'*').is_some();
        if !universal {
            let tag = self.ident();
            if !tag.is_empty() {
                compound.tag = Some(tag);
            }
        }
        loop {
            let condition = match self.chars.peek() {
                Some('#') => {
                    self.chars.next();
                    Condition::Id(self.required_ident("an id")?)
                }
                Some('.') => {
                    self.chars.next();
                    Condition::Class(self.required_ident("a class name")?)
                }
                Some('[') => {
                    self.chars.next();
                    self.attribute()?
                }
                _ => break,
            };
            compound.conditions.push(condition);
        }
        if !universal && compound == Compound::default() {
            return Ok(None);
        }
        Ok(Some(compound))
    }

    fn attribute(&mut self) -> Result<Condition, SelectorError> {
        self.skip_whitespace();
        let name = self.required_ident("an attribute name")?;
        self.skip_whitespace();
        let op = match self.chars.next() {
            Some(']') => return Ok(Condition::Attr { name, test: None }),
            Some('=') => AttrOp::Equals,
            Some(c @ ('~' | '^' | '$' | '*')) => {
                if self.chars.next() != Some('=') {
                    return Err(self.error(format!("expected `=` after `{c}`")));
                }
                match c {
                    '~' => AttrOp::Includes,
                    '^' => AttrOp::Prefix,
                    '$' => AttrOp::Suffix,
                    _ => AttrOp::Substring,
                }
            }
            _ => return Err(self.error("malformed attribute selector")),
        };
        self.skip_whitespace();
        let value = match self.chars.next_if(|&c| c == '"' || c == '\'') {
            Some(quote) => {
                let mut value = String::new();
                loop {
                    match self.chars.next() {
                        Some(c) if c == quote => break,
                        Some(c) => value.push(c),
                        None => return Err(self.error("unterminated string")),
                    }
                }
                value
            }
            None => self.required_ident("an attribute value")?,
        };
        self.skip_whitespace();
        if self.chars.next() != Some(']') {
            return Err(self.error("expected `]`"));
        }
        Ok(Condition::Attr {
            name,
            test: Some((op, value)),
        })
    }
}
