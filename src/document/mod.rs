//! Addressable HTML tree with byte-identical re-serialization.
//!
//! Nodes live in an arena and are addressed by [`NodeId`]. Elements keep
//! their raw attribute text and raw end tag, so any subtree that is not
//! touched serializes back to exactly the bytes it was parsed from.
//!
//! ```text
//! <div class="a">x</div>
//!  ^^^ ^^^^^^^^^^ ^ ^^^^^^
//!  tag raw_attrs  | end_tag
//!                 text child
//! ```

mod attrs;
mod parse;
mod selector;

pub use attrs::escape_value;
pub use parse::DocumentError;
pub use selector::{Selector, SelectorError};

use crate::template;

/// Index of a node in its document's arena.
pub type NodeId = usize;

/// Elements that never have an end tag.
const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "source", "track",
    "wbr",
];

/// Elements whose body is raw text rather than markup.
const RAW_TEXT_ELEMENTS: &[&str] = &["script", "style"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Element {
    /// Tag name as written in the source.
    pub tag: String,
    /// Everything between the tag name and `>` (or `/>`), verbatim.
    pub raw_attrs: String,
    pub self_closing: bool,
    /// Raw end tag; `None` for void or implicitly closed elements.
    pub end_tag: Option<String>,
}

impl Element {
    /// Create an element that serializes with a matching end tag.
    pub fn new(tag: &str) -> Self {
        Self {
            tag: tag.to_owned(),
            raw_attrs: String::new(),
            self_closing: false,
            end_tag: (!is_void(tag)).then(|| format!("</{tag}>")),
        }
    }

    pub fn is(&self, tag: &str) -> bool {
        self.tag.eq_ignore_ascii_case(tag)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeKind {
    Root,
    Element(Element),
    Text(String),
    /// Comments, doctypes, processing instructions and stray end tags.
    Raw(String),
}

#[derive(Debug, Clone)]
struct Node {
    kind: NodeKind,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
}

#[derive(Debug, Clone)]
pub struct Document {
    nodes: Vec<Node>,
}

impl Default for Document {
    fn default() -> Self {
        Self::new()
    }
}

impl Document {
    pub const ROOT: NodeId = 0;

    /// An empty document containing only the root node.
    pub fn new() -> Self {
        Self {
            nodes: vec![Node {
                kind: NodeKind::Root,
                parent: None,
                children: Vec::new(),
            }],
        }
    }

    /// Parse a document or fragment.
    pub fn parse(text: &str) -> Result<Self, DocumentError> {
        parse::parse(text)
    }

    // ========================================================================
    // Structure
    // ========================================================================

    pub fn kind(&self, id: NodeId) -> &NodeKind {
        &self.nodes[id].kind
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.nodes[id].parent
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        &self.nodes[id].children
    }

    pub fn element(&self, id: NodeId) -> Option<&Element> {
        match &self.nodes[id].kind {
            NodeKind::Element(element) => Some(element),
            _ => None,
        }
    }

    pub fn element_mut(&mut self, id: NodeId) -> Option<&mut Element> {
        match &mut self.nodes[id].kind {
            NodeKind::Element(element) => Some(element),
            _ => None,
        }
    }

    /// Whether `id` is an element with the given tag (case-insensitive).
    pub fn is_element(&self, id: NodeId, tag: &str) -> bool {
        self.element(id).is_some_and(|e| e.is(tag))
    }

    pub fn text(&self, id: NodeId) -> Option<&str> {
        match &self.nodes[id].kind {
            NodeKind::Text(text) => Some(text),
            _ => None,
        }
    }

    /// Ancestors from the parent up to and including the root.
    pub fn ancestors(&self, id: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        std::iter::successors(self.parent(id), move |&n| self.parent(n))
    }

    /// Number of parent steps from `node` up to `ancestor`.
    pub fn depth_below(&self, ancestor: NodeId, node: NodeId) -> Option<usize> {
        if node == ancestor {
            return Some(0);
        }
        self.ancestors(node)
            .position(|n| n == ancestor)
            .map(|steps| steps + 1)
    }

    /// All attached nodes below `id` in document order (pre-order), excluding `id`.
    pub fn descendants(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack: Vec<NodeId> = self.children(id).iter().rev().copied().collect();
        while let Some(node) = stack.pop() {
            out.push(node);
            stack.extend(self.children(node).iter().rev().copied());
        }
        out
    }

    /// Every attached element, in document order.
    pub fn elements(&self) -> Vec<NodeId> {
        self.descendants(Self::ROOT)
            .into_iter()
            .filter(|&id| self.element(id).is_some())
            .collect()
    }

    /// Concatenated text of all text nodes below `id`.
    pub fn text_content(&self, id: NodeId) -> String {
        self.descendants(id)
            .into_iter()
            .filter_map(|n| self.text(n))
            .collect()
    }

    // ========================================================================
    // Attributes
    // ========================================================================

    pub fn attr(&self, id: NodeId, name: &str) -> Option<String> {
        self.element(id)
            .and_then(|e| attrs::get(&e.raw_attrs, name))
    }

    /// Every attribute of `id` as `(name, unescaped value)`, in source order.
    pub fn attrs(&self, id: NodeId) -> Vec<(String, String)> {
        self.element(id)
            .map(|e| attrs::all(&e.raw_attrs))
            .unwrap_or_default()
    }

    pub fn has_attr(&self, id: NodeId, name: &str) -> bool {
        self.attr(id, name).is_some()
    }

    /// Set an attribute to an unescaped value, adding it if missing.
    pub fn set_attr(&mut self, id: NodeId, name: &str, value: &str) {
        if let Some(element) = self.element_mut(id) {
            element.raw_attrs = attrs::set(&element.raw_attrs, name, value);
        }
    }

    // ========================================================================
    // Selection
    // ========================================================================

    /// Attached elements matching `selector`, in document order.
    pub fn select(&self, selector: &Selector) -> Vec<NodeId> {
        self.elements()
            .into_iter()
            .filter(|&id| selector.matches(self, id))
            .collect()
    }

    /// Parse `selector` and select with it.
    pub fn select_str(&self, selector: &str) -> Result<Vec<NodeId>, SelectorError> {
        Ok(self.select(&Selector::parse(selector)?))
    }

    /// Whether the serialized subtree at `id` holds an unescaped expression.
    ///
    /// Malformed template text counts, so the render reports it.
    pub fn subtree_has_expressions(&self, id: NodeId) -> bool {
        template::has_expressions(&self.outer_html(id)).unwrap_or(true)
    }

    // ========================================================================
    // Mutation
    // ========================================================================

    fn push(&mut self, parent: NodeId, kind: NodeKind) -> NodeId {
        let id = self.nodes.len();
        self.nodes.push(Node {
            kind,
            parent: Some(parent),
            children: Vec::new(),
        });
        self.nodes[parent].children.push(id);
        id
    }

    /// Append text, merging with a trailing text sibling.
    fn push_text(&mut self, parent: NodeId, text: &str) {
        if let Some(&last) = self.nodes[parent].children.last()
            && let NodeKind::Text(existing) = &mut self.nodes[last].kind
        {
            existing.push_str(text);
            return;
        }
        self.push(parent, NodeKind::Text(text.to_owned()));
    }

    /// Append a new child node and return its id.
    pub fn append(&mut self, parent: NodeId, kind: NodeKind) -> NodeId {
        self.push(parent, kind)
    }

    pub fn set_text(&mut self, id: NodeId, text: String) {
        if let NodeKind::Text(existing) = &mut self.nodes[id].kind {
            *existing = text;
        }
    }

    /// Replace every child of `id` with a single text node.
    pub fn replace_children_with_text(&mut self, id: NodeId, text: String) {
        for child in std::mem::take(&mut self.nodes[id].children) {
            self.nodes[child].parent = None;
        }
        self.push(id, NodeKind::Text(text));
    }

    /// Detach `id` (and its subtree) from the tree.
    pub fn remove(&mut self, id: NodeId) {
        if let Some(parent) = self.nodes[id].parent.take() {
            self.nodes[parent].children.retain(|&c| c != id);
        }
    }

    /// Replace `id` with the top-level nodes of `fragment`, returning the new ids.
    pub fn replace_with_fragment(&mut self, id: NodeId, fragment: &Document) -> Vec<NodeId> {
        let Some(parent) = self.nodes[id].parent else {
            return Vec::new();
        };
        let imported = self.import(fragment, parent);
        let siblings = &mut self.nodes[parent].children;
        // `import` appended the new nodes; move them into place.
        siblings.truncate(siblings.len() - imported.len());
        if let Some(position) = siblings.iter().position(|&c| c == id) {
            siblings.splice(position..=position, imported.iter().copied());
        }
        self.nodes[id].parent = None;
        imported
    }

    /// Copy every attached node of `fragment` below `parent`.
    fn import(&mut self, fragment: &Document, parent: NodeId) -> Vec<NodeId> {
        fragment
            .children(Self::ROOT)
            .iter()
            .map(|&child| self.import_node(fragment, child, parent))
            .collect()
    }

    fn import_node(&mut self, fragment: &Document, node: NodeId, parent: NodeId) -> NodeId {
        let id = self.push(parent, fragment.kind(node).clone());
        for &child in fragment.children(node) {
            self.import_node(fragment, child, id);
        }
        id
    }

    // ========================================================================
    // Serialization
    // ========================================================================

    pub fn to_html(&self) -> String {
        self.inner_html(Self::ROOT)
    }

    pub fn outer_html(&self, id: NodeId) -> String {
        let mut out = String::new();
        self.write_node(id, &mut out);
        out
    }

    pub fn inner_html(&self, id: NodeId) -> String {
        let mut out = String::new();
        for &child in self.children(id) {
            self.write_node(child, &mut out);
        }
        out
    }

    fn write_node(&self, id: NodeId, out: &mut String) {
        match &self.nodes[id].kind {
            NodeKind::Root => {
                for &child in self.children(id) {
                    self.write_node(child, out);
                }
            }
            NodeKind::Element(element) => {
                out.push('<');
                out.push_str(&element.tag);
                out.push_str(&element.raw_attrs);
                out.push_str(if element.self_closing { "/>" } else { ">" });
                for &child in self.children(id) {
                    self.write_node(child, out);
                }
                if let Some(end_tag) = &element.end_tag {
                    out.push_str(end_tag);
                }
            }
            NodeKind::Text(text) | NodeKind::Raw(text) => out.push_str(text),
        }
    }
}

impl std::fmt::Display for Document {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_html())
    }
}

fn is_void(tag: &str) -> bool {
    VOID_ELEMENTS.iter().any(|v| v.eq_ignore_ascii_case(tag))
}

fn is_raw_text(tag: &str) -> bool {
    RAW_TEXT_ELEMENTS.iter().any(|v| v.eq_ignore_ascii_case(tag))
}

// ============================================================================
// Tests
// ============================================================================
