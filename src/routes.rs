//! Route enumeration.
//!
//! A document declares its routes with `<link rel="canonical" href="...">`.
//! An `href` without expressions is a single static route. An `href` with
//! expressions is evaluated against the context providers bound to the link;
//! every expression that yields a list contributes one axis of a Cartesian
//! product, and each combination becomes one page.
//!
//! ```text
//! <script target="head">{"lang": ["de", "en"], "id": ["a", "b", "c"]}</script>
//! <link rel="canonical" href="/${lang}/${id}/">
//!
//! => /de/a/ /de/b/ /de/c/ /en/a/ /en/b/ /en/c/
//! ```

use crate::context::{RenderContext, bind};
use crate::document::{Document, NodeId};
use crate::error::EnumerationError;
use crate::template::{self, Evaluator, Scope, Segment, Value, Variables, stringify};
use rustc_hash::FxHashSet;
use std::borrow::Cow;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Expression source text to the value chosen for one page.
pub type ParameterSet = Variables;

/// Where a document's content comes from. Exactly one way is set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DocumentHandle {
    /// Read from disk.
    File(PathBuf),
    /// Literal content; `location` is used for `__filename` and includes.
    Inline { content: String, location: PathBuf },
}

impl DocumentHandle {
    pub fn location(&self) -> &Path {
        match self {
            DocumentHandle::File(path) => path,
            DocumentHandle::Inline { location, .. } => location,
        }
    }

    pub fn read(&self) -> io::Result<Cow<'_, str>> {
        match self {
            DocumentHandle::File(path) => fs::read_to_string(path).map(Cow::Owned),
            DocumentHandle::Inline { content, .. } => Ok(Cow::Borrowed(content)),
        }
    }
}

/// One concrete output route of a document.
#[derive(Debug, Clone, PartialEq)]
pub struct PageDescriptor {
    /// Normalized route path, always starting with `/`.
    pub path: String,
    pub parameters: ParameterSet,
    pub source: DocumentHandle,
    /// Not publishable: the document has no usable canonical route.
    pub partial: bool,
}

impl PageDescriptor {
    fn partial(source: &DocumentHandle) -> Self {
        Self {
            path: "/".to_owned(),
            parameters: ParameterSet::new(),
            source: source.clone(),
            partial: true,
        }
    }
}

// ============================================================================
// Base URI
// ============================================================================

/// Origin and path prefix that every route lives under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BaseUri {
    /// `scheme://host[:port]`, empty when the URI has no scheme.
    origin: String,
    /// Always starts and ends with `/`.
    path: String,
}

impl BaseUri {
    pub fn parse(uri: &str) -> Self {
        let (origin, path) = split_origin(uri.trim());
        let path = path.trim_matches('/');
        Self {
            origin: origin.trim_end_matches('/').to_owned(),
            path: if path.is_empty() {
                "/".to_owned()
            } else {
                format!("/{path}/")
            },
        }
    }

    /// Join a route below the base path. Absolute URLs keep only their path.
    pub fn route(&self, href: &str) -> String {
        let (_, path) = split_origin(href);
        format!("{}{}", self.path, path.trim_start_matches('/'))
    }

    /// Absolute URL of a normalized route path.
    pub fn url(&self, path: &str) -> String {
        format!("{}{path}", self.origin)
    }
}

impl Default for BaseUri {
    fn default() -> Self {
        Self::parse("/")
    }
}

/// Split `scheme://host/path` into `("scheme://host", "/path")`.
fn split_origin(uri: &str) -> (&str, &str) {
    let Some(scheme_end) = uri.find("://") else {
        return ("", uri);
    };
    let host_start = scheme_end + 3;
    match uri[host_start..].find('/') {
        Some(offset) => uri.split_at(host_start + offset),
        None => (uri, "/"),
    }
}

// ============================================================================
// Normalization
// ============================================================================

/// Normalize a route path.
///
/// Query and fragment are dropped, dot segments are resolved, a trailing
/// `.html` and then a trailing `index` segment are stripped, and duplicate
/// slashes collapse. Directory
/// routes end with `/`; routes to other files (`/feed.xml`) keep their name.
/// Returns `None` for paths that cannot be routes.
pub fn normalize(path: &str) -> Option<String> {
    let path = path.split(['?', '#']).next().unwrap_or_default();
    if path.chars().any(char::is_control) {
        return None;
    }

    let mut segments: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            segment => segments.push(segment),
        }
    }
    if let Some(&last) = segments.last() {
        if let Some(stem) = last.strip_suffix(".html") {
            segments.pop();
            segments.push(stem);
        } else if last.contains('.') {
            return Some(format!("/{}", segments.join("/")));
        }
    }
    if segments.last().is_some_and(|&s| s == "index" || s.is_empty()) {
        segments.pop();
    }

    if segments.is_empty() {
        Some("/".to_owned())
    } else {
        Some(format!("/{}/", segments.join("/")))
    }
}

// ============================================================================
// Enumeration
// ============================================================================

/// `<link rel="canonical">` elements in document order.
pub fn canonical_links(doc: &Document) -> Vec<NodeId> {
    doc.elements()
        .into_iter()
        .filter(|&id| {
            doc.is_element(id, "link")
                && doc.attr(id, "rel").is_some_and(|rel| {
                    rel.split_ascii_whitespace()
                        .any(|token| token.eq_ignore_ascii_case("canonical"))
                })
        })
        .collect()
}

enum Part {
    Static(String),
    Dynamic { code: String, value: Value },
}

/// Enumerate every page a document produces.
///
/// A document without a usable canonical route yields exactly one partial
/// page. Evaluation errors abort enumeration of the whole document.
pub fn enumerate(
    handle: &DocumentHandle,
    base: &BaseUri,
    evaluator: &dyn Evaluator,
) -> Result<Vec<PageDescriptor>, EnumerationError> {
    let location = handle.location();
    let location_name = location.display().to_string();

    let content = handle.read().map_err(|source| EnumerationError::Io {
        path: location.to_path_buf(),
        source,
    })?;
    if !content.to_ascii_lowercase().contains("canonical") {
        return Ok(vec![PageDescriptor::partial(handle)]);
    }

    let doc = Document::parse(&content).map_err(|source| EnumerationError::Document {
        location: location_name.clone(),
        source,
    })?;
    let canonicals = canonical_links(&doc);
    if canonicals.is_empty() {
        return Ok(vec![PageDescriptor::partial(handle)]);
    }
    let table = bind(&doc).map_err(|source| EnumerationError::Bind {
        location: location_name.clone(),
        source,
    })?;

    let mut pages = Vec::new();
    let mut seen = FxHashSet::default();

    for canonical in canonicals {
        let Some(href) = doc.attr(canonical, "href").filter(|h| !h.trim().is_empty()) else {
            continue;
        };
        let segments = template::split(&href).map_err(|source| EnumerationError::Template {
            location: location_name.clone(),
            template: href.clone(),
            source,
        })?;

        let routes = if segments.iter().any(Segment::is_expression) {
            let mut ctx = RenderContext::preflight(&table, evaluator, location);
            let evaluate_error = |source| EnumerationError::Evaluate {
                location: location_name.clone(),
                template: href.clone(),
                source,
            };
            let scope = Scope::new(ctx.scope_for(&doc, canonical).map_err(evaluate_error)?);

            let mut parts = Vec::with_capacity(segments.len());
            for segment in &segments {
                parts.push(match segment.code() {
                    Some(code) => Part::Dynamic {
                        code: code.trim().to_owned(),
                        value: evaluator.evaluate(code, &scope).map_err(evaluate_error)?,
                    },
                    None => Part::Static(segment.text().to_owned()),
                });
            }
            combinations(&parts)
        } else {
            vec![(href.clone(), ParameterSet::new())]
        };

        for (route, parameters) in routes {
            let Some(path) = normalize(&base.route(&route)) else {
                tracing::debug!(location = %location_name, %route, "dropping invalid route");
                continue;
            };
            if seen.insert(path.clone()) {
                pages.push(PageDescriptor {
                    path,
                    parameters,
                    source: handle.clone(),
                    partial: false,
                });
            }
        }
    }

    if pages.is_empty() {
        return Ok(vec![PageDescriptor::partial(handle)]);
    }
    tracing::debug!(location = %location_name, pages = pages.len(), "enumerated routes");
    Ok(pages)
}

/// Expand list-valued parts into concrete `(route, parameters)` pairs.
///
/// The first list-valued part varies slowest. An empty list yields nothing.
fn combinations(parts: &[Part]) -> Vec<(String, ParameterSet)> {
    let axes: Vec<(usize, &[Value])> = parts
        .iter()
        .enumerate()
        .filter_map(|(index, part)| match part {
            Part::Dynamic {
                value: Value::Array(items),
                ..
            } => Some((index, items.as_slice())),
            _ => None,
        })
        .collect();
    if axes.iter().any(|(_, items)| items.is_empty()) {
        return Vec::new();
    }

    let mut out = Vec::new();
    let mut positions = vec![0usize; axes.len()];
    loop {
        let mut route = String::new();
        let mut parameters = ParameterSet::new();
        for (index, part) in parts.iter().enumerate() {
            match part {
                Part::Static(text) => route.push_str(text),
                Part::Dynamic { code, value } => {
                    let chosen = match axes.iter().position(|(i, _)| *i == index) {
                        Some(axis) => &axes[axis].1[positions[axis]],
                        None => value,
                    };
                    route.push_str(&stringify(chosen));
                    parameters.insert(code.clone(), chosen.clone());
                }
            }
        }
        out.push((route, parameters));

        // Advance like an odometer, last axis first.
        let mut axis = axes.len();
        loop {
            if axis == 0 {
                return out;
            }
            axis -= 1;
            positions[axis] += 1;
            if positions[axis] < axes[axis].1.len() {
                break;
            }
            positions[axis] = 0;
        }
    }
}

/// The page sharing the most parameter values with `params`.
///
/// Ties go to the earliest page.
pub fn best_match<'a>(pages: &'a [PageDescriptor], params: &ParameterSet) -> Option<&'a PageDescriptor> {
    let score = |page: &PageDescriptor| {
        page.parameters
            .iter()
            .filter(|&(key, value)| params.get(key) == Some(value))
            .count()
    };
    pages
        .iter()
        .enumerate()
        .max_by_key(|(index, page)| (score(page), std::cmp::Reverse(*index)))
        .map(|(_, page)| page)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::template::JinjaEvaluator;
    use serde_json::json;
    use tempfile::TempDir;

    fn inline(content: &str) -> DocumentHandle {
        DocumentHandle::Inline {
            content: content.to_owned(),
            location: PathBuf::from("/site/src/items.html"),
        }
    }

    fn paths(pages: &[PageDescriptor]) -> Vec<&str> {
        pages.iter().map(|p| p.path.as_str()).collect()
    }

    fn run(content: &str) -> Vec<PageDescriptor> {
        enumerate(&inline(content), &BaseUri::default(), &JinjaEvaluator).unwrap()
    }

    const LANG_ITEMS: &str = r#"<html><head>
<link rel="canonical" href="/${lang}/${id}/">
<script target="head">{"lang": ["de", "en"], "id": ["a", "b", "c"]}</script>
</head><body><p>${id}</p></body></html>"#;

    #[test]
    fn test_cartesian_product_is_complete_and_ordered() {
        let pages = run(LANG_ITEMS);
        assert_eq!(
            paths(&pages),
            vec!["/de/a/", "/de/b/", "/de/c/", "/en/a/", "/en/b/", "/en/c/"]
        );
        assert_eq!(pages[4].parameters["lang"], json!("en"));
        assert_eq!(pages[4].parameters["id"], json!("b"));
        assert!(pages.iter().all(|p| !p.partial));
    }

    #[test]
    fn test_enumeration_is_deterministic() {
        assert_eq!(run(LANG_ITEMS), run(LANG_ITEMS));
    }

    #[test]
    fn test_items_example() {
        let pages = run(r#"<html><head><link rel="canonical" href="/items/${id}/"></head>
<script target="html">{"id": ["a", "b"]}</script>
<main><p>${id}</p></main></html>"#);
        assert_eq!(paths(&pages), vec!["/items/a/", "/items/b/"]);
    }

    #[test]
    fn test_provider_outside_link_is_not_visible() {
        let doc = r#"<head><link rel="canonical" href="/items/${id}/"></head>
<script target="main">{"id": ["a", "b"]}</script>
<main><p>${id}</p></main>"#;
        let err = enumerate(&inline(doc), &BaseUri::default(), &JinjaEvaluator).unwrap_err();
        assert!(matches!(err, EnumerationError::Evaluate { .. }));
    }

    #[test]
    fn test_parameter_providers_skipped_while_enumerating() {
        let pages = run(r#"<html><head><link rel="canonical" href="/items/${id}/"></head>
<script target="html">{"id": ["a", "b"]}</script>
<script target="html">{"label": "Item " ~ params.id}</script>
<main><p>${label}</p></main></html>"#);
        assert_eq!(paths(&pages), vec!["/items/a/", "/items/b/"]);
    }

    #[test]
    fn test_provider_targeting_ancestor_of_link() {
        let pages = run(r#"<head><link rel="canonical" href="/items/${id}/"></head>
<script target="head">{"id": ["a", "b"]}</script>"#);
        assert_eq!(paths(&pages), vec!["/items/a/", "/items/b/"]);
    }

    #[test]
    fn test_no_canonical_is_single_partial_page() {
        let pages = run("<p>${title}</p>");
        assert_eq!(pages.len(), 1);
        assert!(pages[0].partial);
        assert_eq!(pages[0].path, "/");

        let pages = run("<link rel=\"canonical\"><p>canonical</p>");
        assert_eq!(pages.len(), 1);
        assert!(pages[0].partial);
    }

    #[test]
    fn test_static_route() {
        let pages = run(r#"<link rel="canonical" href="/about/index.html">"#);
        assert_eq!(paths(&pages), vec!["/about/"]);
        assert!(pages[0].parameters.is_empty());
    }

    #[test]
    fn test_duplicates_keep_first() {
        let pages = run(r#"<link rel="canonical" href="/${id}/">
<link rel="canonical" href="/b.html">
<script target="link">{"id": ["a", "b", "a"]}</script>"#);
        assert_eq!(paths(&pages), vec!["/a/", "/b/"]);
        assert_eq!(pages[1].parameters["id"], json!("b"));
    }

    #[test]
    fn test_scalar_expression_is_single_page() {
        let pages = run(r#"<link rel="canonical" href="/${ 'home' }/${ 1 + 1 }/">"#);
        assert_eq!(paths(&pages), vec!["/home/2/"]);
        assert_eq!(pages[0].parameters["'home'"], json!("home"));
        assert_eq!(pages[0].parameters["1 + 1"], json!(2));
    }

    #[test]
    fn test_empty_list_yields_partial() {
        let pages = run(r#"<link rel="canonical" href="/${id}/"><script target="link">{"id": []}</script>"#);
        assert_eq!(pages.len(), 1);
        assert!(pages[0].partial);
    }

    #[test]
    fn test_base_path_prefixes_routes() {
        let base = BaseUri::parse("https://example.com/docs");
        let pages = enumerate(
            &inline(r#"<link rel="canonical" href="/items/${ 'a' }/">"#),
            &base,
            &JinjaEvaluator,
        )
        .unwrap();
        assert_eq!(paths(&pages), vec!["/docs/items/a/"]);
        assert_eq!(base.url(&pages[0].path), "https://example.com/docs/items/a/");
    }

    #[test]
    fn test_evaluation_error_aborts() {
        let err = enumerate(
            &inline(r#"<link rel="canonical" href="/${missing}/">"#),
            &BaseUri::default(),
            &JinjaEvaluator,
        )
        .unwrap_err();
        match err {
            EnumerationError::Evaluate {
                location,
                template,
                source,
            } => {
                assert_eq!(location, "/site/src/items.html");
                assert_eq!(template, "/${missing}/");
                assert_eq!(source.code, "missing");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_unterminated_template_is_error() {
        let err = enumerate(
            &inline(r#"<link rel="canonical" href="/${id/">"#),
            &BaseUri::default(),
            &JinjaEvaluator,
        )
        .unwrap_err();
        assert!(matches!(err, EnumerationError::Template { .. }));
    }

    #[test]
    fn test_file_handle() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("about.html");
        fs::write(&file, r#"<link rel="canonical" href="/about/">"#).unwrap();
        let handle = DocumentHandle::File(file.clone());
        let pages = enumerate(&handle, &BaseUri::default(), &JinjaEvaluator).unwrap();
        assert_eq!(paths(&pages), vec!["/about/"]);
        assert_eq!(pages[0].source, handle);

        let missing = DocumentHandle::File(dir.path().join("missing.html"));
        let err = enumerate(&missing, &BaseUri::default(), &JinjaEvaluator).unwrap_err();
        assert!(matches!(err, EnumerationError::Io { .. }));
    }

    #[test]
    fn test_normalize() {
        assert_eq!(normalize("/").as_deref(), Some("/"));
        assert_eq!(normalize("").as_deref(), Some("/"));
        assert_eq!(normalize("/index.html").as_deref(), Some("/"));
        assert_eq!(normalize("/index").as_deref(), Some("/"));
        assert_eq!(normalize("a/b").as_deref(), Some("/a/b/"));
        assert_eq!(normalize("//a//b/index.html").as_deref(), Some("/a/b/"));
        assert_eq!(normalize("/a/b.html?x=1#top").as_deref(), Some("/a/b/"));
        assert_eq!(normalize("/feed.xml").as_deref(), Some("/feed.xml"));
        assert_eq!(normalize("/a/./b/../c/").as_deref(), Some("/a/c/"));
        assert_eq!(normalize("/../../etc/passwd.txt").as_deref(), Some("/etc/passwd.txt"));
        assert_eq!(normalize("/a/\nb/"), None);
    }

    #[test]
    fn test_base_uri() {
        let base = BaseUri::parse("http://localhost:8080/");
        assert_eq!(base.origin, "http://localhost:8080");
        assert_eq!(base.path, "/");
        assert_eq!(base.route("/a/"), "/a/");
        assert_eq!(base.route("https://other.org/x/"), "/x/");

        let base = BaseUri::parse("https://example.com");
        assert_eq!(base.path, "/");
        assert_eq!(base.url("/a/"), "https://example.com/a/");
    }

    #[test]
    fn test_best_match() {
        let page = |path: &str, params: serde_json::Value| PageDescriptor {
            path: path.into(),
            parameters: match params {
                Value::Object(map) => map,
                _ => ParameterSet::new(),
            },
            source: inline(""),
            partial: false,
        };
        let pages = vec![
            page("/de/a/", json!({"lang": "de", "id": "a"})),
            page("/en/a/", json!({"lang": "en", "id": "a"})),
            page("/en/b/", json!({"lang": "en", "id": "b"})),
        ];
        let want = |params: serde_json::Value| match params {
            Value::Object(map) => map,
            _ => ParameterSet::new(),
        };
        assert_eq!(best_match(&pages, &want(json!({"lang": "en", "id": "b"}))).unwrap().path, "/en/b/");
        assert_eq!(best_match(&pages, &want(json!({"lang": "en"}))).unwrap().path, "/en/a/");
        assert_eq!(best_match(&pages, &ParameterSet::new()).unwrap().path, "/de/a/");
        assert!(best_match(&[], &ParameterSet::new()).is_none());
    }
}
