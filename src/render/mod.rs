//! Page rendering.
//!
//! # Pipeline
//!
//! ```text
//! render(page)
//!     │
//!     ├── render_document()     parse, rewrite canonical, bind providers
//!     │       │
//!     │       └── Pass::walk()  evaluate attributes and text in document order
//!     │               │
//!     │               └── include(file) ──► render_document() (no terminal transforms)
//!     │
//!     ├── integrity::apply()    sha256 of inline bodies, CSP merge
//!     └── minify::minify()
//! ```
//!
//! Every render owns its document, provider cache and include chain; a
//! [`Renderer`] can be shared by any number of concurrent renders.

mod integrity;
mod minify;

use crate::config::SiteConfig;
use crate::context::{BindingTable, RenderContext, bind};
use crate::document::{Document, NodeId, escape_value};
use crate::error::{EvalError, RenderError};
use crate::routes::{self, BaseUri, DocumentHandle, PageDescriptor, ParameterSet};
use crate::template::{self, Evaluator, IncludeFn, OPEN, Scope, Segment, Value, stringify};
use crate::utils::resolve::resolve;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Parameter naming the language variant of a page.
const LANG: &str = "lang";

// ============================================================================
// Asset rendering
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssetKind {
    Script,
    Style,
}

/// Transforms the body of an inline `<script>` or `<style>`.
pub trait AssetRenderer: Send + Sync {
    fn render(&self, kind: AssetKind, body: &str, location: &Path) -> anyhow::Result<String>;
}

/// Leaves inline bodies unchanged.
#[derive(Debug, Default, Clone, Copy)]
pub struct Passthrough;

impl AssetRenderer for Passthrough {
    fn render(&self, _kind: AssetKind, body: &str, _location: &Path) -> anyhow::Result<String> {
        Ok(body.to_owned())
    }
}

// ============================================================================
// Renderer
// ============================================================================

/// Renders pages with one configuration and one evaluator.
#[derive(Clone)]
pub struct Renderer {
    config: Arc<SiteConfig>,
    base: BaseUri,
    evaluator: Arc<dyn Evaluator>,
    assets: Arc<dyn AssetRenderer>,
}

/// Identity of a document render inside one include chain.
#[derive(Debug, Clone, PartialEq, Eq)]
struct ChainEntry {
    location: PathBuf,
    params: String,
}

impl ChainEntry {
    fn new(location: &Path, params: &ParameterSet) -> Self {
        Self {
            location: location.to_path_buf(),
            params: Value::Object(params.clone()).to_string(),
        }
    }
}

impl Renderer {
    pub fn new(config: Arc<SiteConfig>, evaluator: Arc<dyn Evaluator>) -> Self {
        Self {
            base: config.base_uri(),
            config,
            evaluator,
            assets: Arc::new(Passthrough),
        }
    }

    #[cfg(test)]
    pub fn with_assets(mut self, assets: Arc<dyn AssetRenderer>) -> Self {
        self.assets = assets;
        self
    }

    /// Render one page to final HTML.
    ///
    /// No HTML is returned when any expression fails.
    pub fn render(&self, page: &PageDescriptor) -> Result<String, RenderError> {
        let mut doc = self.render_document(page, &page.source, &[])?;

        let build = &self.config.build;
        let hashed = integrity::apply(&mut doc, build);
        Ok(minify::minify(doc.to_html(), build, hashed))
    }

    /// Evaluate one document for `page` without terminal transforms.
    fn render_document(
        &self,
        page: &PageDescriptor,
        handle: &DocumentHandle,
        chain: &[ChainEntry],
    ) -> Result<Document, RenderError> {
        let location = handle.location();
        let location_name = location.display().to_string();

        let entry = ChainEntry::new(location, &page.parameters);
        if chain.contains(&entry) {
            return Err(RenderError::CyclicInclude {
                chain: chain
                    .iter()
                    .chain(std::iter::once(&entry))
                    .map(|e| e.location.display().to_string())
                    .collect(),
            });
        }
        let mut chain = chain.to_vec();
        chain.push(entry);

        let content = handle.read().map_err(|source| RenderError::Io {
            path: location.to_path_buf(),
            source,
        })?;
        let mut doc = Document::parse(&content).map_err(|source| RenderError::Document {
            location: location_name.clone(),
            source,
        })?;

        if chain.len() == 1 && !page.partial {
            self.rewrite_canonical(&mut doc, page);
        }

        let table = bind(&doc).map_err(|source| RenderError::Bind {
            location: location_name.clone(),
            source,
        })?;
        for &script in table.scripts() {
            doc.remove(script);
        }

        let mut pass = Pass::new(self, page, location, &table, chain);
        pass.walk(&mut doc, Document::ROOT)?;
        tracing::debug!(
            page = %page.path,
            document = %location_name,
            providers = pass.ctx.evaluated(),
            "rendered document"
        );
        Ok(doc)
    }

    /// Point the first canonical link at the page URL and drop the others.
    fn rewrite_canonical(&self, doc: &mut Document, page: &PageDescriptor) {
        let url = self.base.url(&page.path);
        for (index, link) in routes::canonical_links(doc).into_iter().enumerate() {
            if index == 0 {
                doc.set_attr(link, "href", &url);
            } else {
                doc.remove(link);
            }
        }
    }

    /// Render `specifier`, resolved next to `location`, as markup.
    fn include(
        &self,
        page: &PageDescriptor,
        location: &Path,
        specifier: &str,
        chain: &[ChainEntry],
    ) -> Result<String, RenderError> {
        let dir = location.parent().unwrap_or(Path::new(""));
        let path = resolve(specifier, &[dir]).ok_or_else(|| RenderError::IncludeNotFound {
            page: page.path.clone(),
            location: location.display().to_string(),
            specifier: specifier.to_owned(),
        })?;

        let doc = self.render_document(page, &DocumentHandle::File(path), chain)?;
        Ok(doc.to_html())
    }
}

// ============================================================================
// Document pass
// ============================================================================

/// State of one document render.
struct Pass<'a> {
    renderer: &'a Renderer,
    page: &'a PageDescriptor,
    location: &'a Path,
    location_name: String,
    ctx: RenderContext<'a>,
    include: IncludeFn,
    /// Typed error raised inside `include`, reported instead of the
    /// evaluator's message.
    failure: Arc<Mutex<Option<RenderError>>>,
    /// Pages of referenced documents, for reference resolution.
    references: FxHashMap<PathBuf, Vec<PageDescriptor>>,
}

impl<'a> Pass<'a> {
    fn new(
        renderer: &'a Renderer,
        page: &'a PageDescriptor,
        location: &'a Path,
        table: &'a BindingTable,
        chain: Vec<ChainEntry>,
    ) -> Self {
        let failure = Arc::new(Mutex::new(None));
        let include: IncludeFn = {
            let renderer = renderer.clone();
            let page = page.clone();
            let location = location.to_path_buf();
            let failure = Arc::clone(&failure);
            Arc::new(move |specifier: &str| {
                renderer
                    .include(&page, &location, specifier, &chain)
                    .map_err(|err| {
                        let message = err.to_string();
                        failure.lock().get_or_insert(err);
                        message
                    })
            })
        };

        Self {
            renderer,
            page,
            location,
            location_name: location.display().to_string(),
            ctx: RenderContext::new(
                table,
                renderer.evaluator.as_ref(),
                &page.parameters,
                location,
            ),
            include,
            failure,
            references: FxHashMap::default(),
        }
    }

    /// Process the children of `node` in document order.
    ///
    /// Nodes spliced in while walking are not visited again.
    fn walk(&mut self, doc: &mut Document, node: NodeId) -> Result<(), RenderError> {
        for child in doc.children(node).to_vec() {
            if doc.element(child).is_some() {
                self.element(doc, child)?;
            } else if doc.text(child).is_some() {
                self.text(doc, child)?;
            }
        }
        Ok(())
    }

    fn element(&mut self, doc: &mut Document, node: NodeId) -> Result<(), RenderError> {
        let raw = doc
            .element(node)
            .map(|e| e.raw_attrs.clone())
            .unwrap_or_default();
        if has_template(&raw) {
            let rendered = self.evaluate(doc, node, &raw, |value| escape_value(&value).into_owned())?;
            if let Some(element) = doc.element_mut(node) {
                element.raw_attrs = rendered;
            }
        }

        if self.renderer.config.build.resolve {
            self.resolve_references(doc, node)?;
        }

        if let Some(kind) = asset_kind(doc, node) {
            if kind == AssetKind::Style {
                self.style_text(doc, node)?;
            }
            return self.asset(doc, node, kind);
        }
        self.walk(doc, node)
    }

    /// Evaluate the body of a `<style>`; script bodies stay verbatim.
    fn style_text(&mut self, doc: &mut Document, node: NodeId) -> Result<(), RenderError> {
        for child in doc.children(node).to_vec() {
            let Some(text) = doc.text(child).filter(|t| has_template(t)).map(str::to_owned) else {
                continue;
            };
            let rendered = self.evaluate(doc, child, &text, |value| value)?;
            doc.set_text(child, rendered);
        }
        Ok(())
    }

    fn text(&mut self, doc: &mut Document, node: NodeId) -> Result<(), RenderError> {
        let Some(text) = doc.text(node).filter(|t| has_template(t)).map(str::to_owned) else {
            return Ok(());
        };
        let rendered = self.evaluate(doc, node, &text, |value| value)?;

        if !looks_like_markup(&rendered) {
            doc.set_text(node, rendered);
            return Ok(());
        }

        let fragment = Document::parse(&rendered).map_err(|source| RenderError::Document {
            location: self.location_name.clone(),
            source,
        })?;
        for id in doc.replace_with_fragment(node, &fragment) {
            for inner in std::iter::once(id).chain(doc.descendants(id)) {
                if let Some(kind) = asset_kind(doc, inner) {
                    self.asset(doc, inner, kind)?;
                }
            }
        }
        Ok(())
    }

    /// Evaluate every expression in `text` with the scope visible at `node`.
    fn evaluate(
        &mut self,
        doc: &Document,
        node: NodeId,
        text: &str,
        post: impl Fn(String) -> String,
    ) -> Result<String, RenderError> {
        let segments = template::split(text).map_err(|source| RenderError::Template {
            page: self.page.path.clone(),
            location: self.location_name.clone(),
            source,
        })?;
        if !segments.iter().any(Segment::is_expression) {
            return Ok(template::unescape(text).into_owned());
        }

        let vars = self
            .ctx
            .scope_for(doc, node)
            .map_err(|source| self.eval_error(source))?;
        let scope = Scope::new(vars).with_include(Arc::clone(&self.include));
        let evaluator = self.renderer.evaluator.as_ref();

        template::render_segments(&segments, |code| {
            evaluator
                .evaluate(code, &scope)
                .map(|value| post(stringify(&value)))
                .map_err(|source| self.eval_error(source))
        })
    }

    fn eval_error(&self, source: EvalError) -> RenderError {
        if let Some(err) = self.failure.lock().take() {
            return err;
        }
        RenderError::Evaluate {
            page: self.page.path.clone(),
            location: self.location_name.clone(),
            source,
        }
    }

    /// Run an inline script or style body through the asset renderer.
    fn asset(&mut self, doc: &mut Document, node: NodeId, kind: AssetKind) -> Result<(), RenderError> {
        if doc.has_attr(node, "src") {
            return Ok(());
        }
        let body = doc.text_content(node);
        if body.is_empty() {
            return Ok(());
        }
        let rendered = self
            .renderer
            .assets
            .render(kind, &body, self.location)
            .map_err(|source| RenderError::Asset {
                page: self.page.path.clone(),
                location: self.location_name.clone(),
                source,
            })?;
        if rendered != body {
            doc.replace_children_with_text(node, rendered);
        }
        Ok(())
    }

    /// Replace attribute values naming a local `.html` document with the URL
    /// of that document's best matching page.
    fn resolve_references(&mut self, doc: &mut Document, node: NodeId) -> Result<(), RenderError> {
        let renderer = self.renderer;
        let dir = self.location.parent().unwrap_or(Path::new(""));

        for (name, value) in doc.attrs(node) {
            let value = value.trim();
            if !is_local_document(value) {
                continue;
            }
            let Some(path) = resolve(value, &[dir]) else {
                continue;
            };

            let mut params = self.page.parameters.clone();
            let pages = self.referenced_pages(path)?;
            if let Some(lang) = lang_hint(doc, node, pages) {
                params.insert(LANG.to_owned(), Value::String(lang));
            }
            if let Some(target) = routes::best_match(pages, &params) {
                let url = renderer.base.url(&target.path);
                tracing::debug!(reference = %value, %url, "resolved local reference");
                doc.set_attr(node, &name, &url);
            }
        }
        Ok(())
    }

    fn referenced_pages(&mut self, path: PathBuf) -> Result<&[PageDescriptor], RenderError> {
        if !self.references.contains_key(&path) {
            let pages = routes::enumerate(
                &DocumentHandle::File(path.clone()),
                &self.renderer.base,
                self.renderer.evaluator.as_ref(),
            )
            .map_err(|source| RenderError::Enumeration {
                location: self.location_name.clone(),
                source: Box::new(source),
            })?;
            self.references.insert(path.clone(), pages);
        }
        Ok(self.references.get(&path).map(Vec::as_slice).unwrap_or_default())
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn has_template(text: &str) -> bool {
    text.contains(OPEN) && text.contains('}')
}

/// Whether evaluated text has to be parsed rather than kept as text.
fn looks_like_markup(text: &str) -> bool {
    text.match_indices('<').any(|(index, _)| {
        text[index + 1..]
            .chars()
            .next()
            .is_some_and(|c| c.is_ascii_alphabetic() || c == '/' || c == '!')
    })
}

fn asset_kind(doc: &Document, node: NodeId) -> Option<AssetKind> {
    if doc.is_element(node, "script") {
        Some(AssetKind::Script)
    } else if doc.is_element(node, "style") {
        Some(AssetKind::Style)
    } else {
        None
    }
}

/// A single relative path to an `.html` file.
fn is_local_document(value: &str) -> bool {
    !value.is_empty()
        && !value.contains("://")
        && !value.starts_with(['/', '#'])
        && !value.contains(char::is_whitespace)
        && value
            .split(['?', '#'])
            .next()
            .is_some_and(|path| path.to_ascii_lowercase().ends_with(".html"))
}

/// The nearest `hreflang` or `lang` naming a language one of `pages` has.
fn lang_hint(doc: &Document, node: NodeId, pages: &[PageDescriptor]) -> Option<String> {
    std::iter::once(node)
        .chain(doc.ancestors(node))
        .filter_map(|n| doc.attr(n, "hreflang").or_else(|| doc.attr(n, "lang")))
        .find(|lang| {
            pages
                .iter()
                .any(|p| p.parameters.get(LANG).and_then(Value::as_str) == Some(lang.as_str()))
        })
}

// ============================================================================
// Tests
// ============================================================================
