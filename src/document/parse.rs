//! HTML tokenizing on top of quick-xml.
//!
//! quick-xml is used as a tokenizer only: every event is mapped back to the
//! exact source span it came from, so the tree can be serialized without
//! changing a byte. HTML rules quick-xml does not know about (void elements,
//! raw text bodies, implicitly closed elements) are applied here.

use super::{Document, Element, NodeId, NodeKind, is_raw_text, is_void};
use crate::template::{self, Segment};
use quick_xml::{Reader, events::Event};
use regex::{Captures, Regex};
use std::borrow::Cow;
use std::sync::LazyLock;
use thiserror::Error;

/// Markup could not be tokenized.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("malformed markup at byte {position}: {reason}")]
pub struct DocumentError {
    pub position: usize,
    pub reason: String,
}

const MARK_OPEN: char = '\u{E000}';
const MARK_CLOSE: char = '\u{E001}';

static PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new("\u{E000}([0-9]+)\u{E001}").unwrap());

#[inline]
fn create_xml_reader(content: &str) -> Reader<&[u8]> {
    let mut reader = Reader::from_str(content);
    reader.config_mut().trim_text(false);
    reader.config_mut().enable_all_checks(false);
    reader.config_mut().allow_unmatched_ends = true;
    reader.config_mut().allow_dangling_amp = true;
    reader
}

// ============================================================================
// Expression placeholders
// ============================================================================

/// Source text with every expression swapped for an opaque placeholder.
struct Protected {
    text: String,
    expressions: Vec<String>,
}

impl Protected {
    fn new(source: &str) -> Self {
        // Malformed templates are parsed as plain markup; the error surfaces
        // when the affected node is evaluated.
        let Ok(segments) = template::split(source) else {
            return Self {
                text: source.to_owned(),
                expressions: Vec::new(),
            };
        };

        let mut text = String::with_capacity(source.len());
        let mut expressions = Vec::new();
        for segment in segments {
            match segment {
                Segment::Literal(literal) => text.push_str(&literal),
                Segment::Expression(expression) => {
                    text.push(MARK_OPEN);
                    text.push_str(&expressions.len().to_string());
                    text.push(MARK_CLOSE);
                    expressions.push(expression);
                }
            }
        }
        Self { text, expressions }
    }

    fn restore<'a>(&self, text: &'a str) -> Cow<'a, str> {
        if self.expressions.is_empty() {
            return Cow::Borrowed(text);
        }
        PLACEHOLDER.replace_all(text, |caps: &Captures| {
            caps[1]
                .parse::<usize>()
                .ok()
                .and_then(|index| self.expressions.get(index))
                .cloned()
                .unwrap_or_else(|| caps[0].to_owned())
        })
    }
}

// ============================================================================
// Tree building
// ============================================================================

struct Builder<'a> {
    doc: Document,
    /// Open elements, innermost last.
    open: Vec<NodeId>,
    protected: &'a Protected,
}

impl Builder<'_> {
    fn parent(&self) -> NodeId {
        self.open.last().copied().unwrap_or(Document::ROOT)
    }

    fn text_in(&mut self, parent: NodeId, raw: &str) {
        let text = self.protected.restore(raw);
        self.doc.push_text(parent, &text);
    }

    fn text(&mut self, raw: &str) {
        self.text_in(self.parent(), raw);
    }

    fn raw(&mut self, raw: &str) {
        let kind = NodeKind::Raw(self.protected.restore(raw).into_owned());
        self.doc.push(self.parent(), kind);
    }

    fn element(&mut self, tag: &str, raw_attrs: &str, self_closing: bool) -> NodeId {
        let element = Element {
            tag: self.protected.restore(tag).into_owned(),
            raw_attrs: self.protected.restore(raw_attrs).into_owned(),
            self_closing,
            end_tag: None,
        };
        self.doc.push(self.parent(), NodeKind::Element(element))
    }

    fn set_end_tag(&mut self, id: NodeId, raw: &str) {
        let end_tag = self.protected.restore(raw).into_owned();
        if let Some(element) = self.doc.element_mut(id) {
            element.end_tag = Some(end_tag);
        }
    }

    /// Close the innermost open element named `tag`, implicitly closing
    /// everything opened after it. Unmatched end tags are kept as raw text.
    fn close(&mut self, tag: &str, raw: &str) {
        match self.open.iter().rposition(|&id| self.doc.is_element(id, tag)) {
            Some(index) => {
                let id = self.open[index];
                self.open.truncate(index);
                self.set_end_tag(id, raw);
            }
            None => self.raw(raw),
        }
    }
}

/// Find the end tag of a raw text element whose body starts at `from`.
///
/// Returns `(body_end, after_end_tag)`; both are the input length when the
/// body runs to the end of input.
fn find_raw_text_end(text: &str, from: usize, tag: &str) -> (usize, usize) {
    let bytes = text.as_bytes();
    let mut cursor = from;
    while let Some(offset) = text[cursor..].find("</") {
        let start = cursor + offset;
        let name_end = start + 2 + tag.len();
        let name_matches = bytes
            .get(start + 2..name_end)
            .is_some_and(|name| name.eq_ignore_ascii_case(tag.as_bytes()));
        let terminated = bytes
            .get(name_end)
            .is_none_or(|&b| b == b'>' || b == b'/' || b.is_ascii_whitespace());
        if name_matches && terminated {
            let close = text[name_end..]
                .find('>')
                .map_or(text.len(), |p| name_end + p + 1);
            return (start, close);
        }
        cursor = start + 2;
    }
    (text.len(), text.len())
}

/// Whether `rest` starts with text or with a `<` that begins a tag, end tag,
/// comment, doctype or processing instruction.
fn opens_markup(rest: &str) -> bool {
    let mut chars = rest.chars();
    if chars.next() != Some('<') {
        return true;
    }
    chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || matches!(c, '/' | '!' | '?' | MARK_OPEN))
}

pub(super) fn parse(source: &str) -> Result<Document, DocumentError> {
    let protected = Protected::new(source);
    let text = protected.text.as_str();
    let mut builder = Builder {
        doc: Document::new(),
        open: Vec::new(),
        protected: &protected,
    };

    // Offset of the reader's input within `text`; raw text bodies restart it.
    let mut base = 0usize;
    let mut reader = create_xml_reader(text);

    loop {
        let start = base + reader.buffer_position() as usize;
        if !opens_markup(&text[start..]) {
            // A stray `<` is text; read on right after it.
            builder.text("<");
            base = start + 1;
            reader = create_xml_reader(&text[base..]);
            continue;
        }
        let event = match reader.read_event() {
            Ok(event) => event,
            Err(err) => {
                return Err(DocumentError {
                    position: base + reader.error_position() as usize,
                    reason: err.to_string(),
                });
            }
        };
        let end = base + reader.buffer_position() as usize;
        let raw = &text[start..end];

        match event {
            Event::Start(e) => {
                let name_len = e.name().as_ref().len();
                let tag = &raw[1..1 + name_len];
                let raw_attrs = &raw[1 + name_len..raw.len() - 1];

                if is_void(tag) {
                    builder.element(tag, raw_attrs, false);
                } else if is_raw_text(tag) {
                    let id = builder.element(tag, raw_attrs, false);
                    let (body_end, next) = find_raw_text_end(text, end, tag);
                    if body_end > end {
                        builder.text_in(id, &text[end..body_end]);
                    }
                    if next > body_end {
                        builder.set_end_tag(id, &text[body_end..next]);
                    }
                    base = next;
                    reader = create_xml_reader(&text[next..]);
                } else {
                    let id = builder.element(tag, raw_attrs, false);
                    builder.open.push(id);
                }
            }
            Event::Empty(e) => {
                let name_len = e.name().as_ref().len();
                let tag = &raw[1..1 + name_len];
                builder.element(tag, &raw[1 + name_len..raw.len() - 2], true);
            }
            Event::End(e) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                builder.close(&name, raw);
            }
            Event::Text(_) | Event::GeneralRef(_) => builder.text(raw),
            Event::Comment(_)
            | Event::CData(_)
            | Event::Decl(_)
            | Event::PI(_)
            | Event::DocType(_) => builder.raw(raw),
            Event::Eof => break,
        }
    }

    Ok(builder.doc)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protect_and_restore() {
        let protected = Protected::new("<a href=\"${x}\">${'<b>'}</a>");
        assert_eq!(protected.expressions, vec!["${x}", "${'<b>'}"]);
        assert!(!protected.text.contains("<b>"));
        assert_eq!(
            protected.restore(&protected.text),
            "<a href=\"${x}\">${'<b>'}</a>"
        );
    }

    #[test]
    fn test_unterminated_expression_parses_as_markup() {
        let html = "<p>${</p>";
        let doc = parse(html).unwrap();
        assert_eq!(doc.to_html(), html);
    }

    #[test]
    fn test_raw_text_end_tag_case_insensitive() {
        let html = "<SCRIPT>let a = '</scripts>';</Script ><p>x</p>";
        let doc = parse(html).unwrap();
        assert_eq!(doc.to_html(), html);
        let script = doc.select_str("script").unwrap()[0];
        assert_eq!(doc.text_content(script), "let a = '</scripts>';");
        assert_eq!(doc.select_str("p").unwrap().len(), 1);
    }

    #[test]
    fn test_unterminated_raw_text_runs_to_end() {
        let html = "<style>p { color: red }";
        let doc = parse(html).unwrap();
        assert_eq!(doc.to_html(), html);
    }

    #[test]
    fn test_entities_merge_into_one_text_node() {
        let doc = parse("<p>a &amp; b &nbsp; c & d</p>").unwrap();
        let p = doc.select_str("p").unwrap()[0];
        assert_eq!(doc.children(p).len(), 1);
        assert_eq!(doc.text_content(p), "a &amp; b &nbsp; c & d");
    }

    #[test]
    fn test_stray_less_than_is_text() {
        let html = "<div><p>1 < 2</p><p>y <3</p></div>a <";
        let doc = parse(html).unwrap();
        assert_eq!(doc.to_html(), html);

        let paragraphs = doc.select_str("div > p").unwrap();
        assert_eq!(paragraphs.len(), 2);
        assert_eq!(doc.text_content(paragraphs[0]), "1 < 2");
        assert_eq!(doc.children(paragraphs[0]).len(), 1);
        assert_eq!(doc.text_content(paragraphs[1]), "y <3");
        assert_eq!(doc.children(Document::ROOT).len(), 2);
    }

    #[test]
    fn test_unclosed_tag_is_error() {
        let err = parse("<p>x</p><div class=\"a\"").unwrap_err();
        assert!(err.position >= 8);
    }
}
