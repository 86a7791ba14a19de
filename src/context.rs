//! Context providers and scoped render contexts.
//!
//! A context provider is a `<script target="selector">` element whose body is
//! an expression evaluating to a map. Every node inside one of the provider's
//! targets can read the keys of that map. Lookups walk outward from the node:
//! keys bound closer to the node shadow keys bound further out.
//!
//! ```text
//! <script target="main">{"id": ["a", "b"]}</script>
//! <main><p>${id}</p></main>      <- `id` is visible inside <main>
//! ```

use crate::document::{Document, NodeId, Selector};
use crate::error::{BindError, EvalError};
use crate::template::{Evaluator, Scope, Value, Variables};
use regex::Regex;
use rustc_hash::FxHashMap;
use std::path::Path;
use std::sync::LazyLock;

/// Attribute naming the subtree a provider feeds.
pub const TARGET_ATTR: &str = "target";

/// A provider bound to at least one target that still holds expressions.
#[derive(Debug, Clone)]
pub struct Provider {
    pub selector: String,
    /// Expression source of the provider body.
    pub code: String,
    /// Matched targets, in document order.
    pub targets: Vec<NodeId>,
}

/// Result of [`bind`]: which providers feed which subtrees.
#[derive(Debug, Clone, Default)]
pub struct BindingTable {
    /// Every `script[target]` element, including dropped ones.
    scripts: Vec<NodeId>,
    providers: Vec<Provider>,
}

/// Discover context providers and resolve their targets.
///
/// Providers are not evaluated here. A provider whose selector matches
/// nothing, or only subtrees without expressions, is dropped.
pub fn bind(doc: &Document) -> Result<BindingTable, BindError> {
    let mut table = BindingTable::default();

    for node in doc.elements() {
        if !doc.is_element(node, "script") {
            continue;
        }
        let Some(selector) = doc.attr(node, TARGET_ATTR) else {
            continue;
        };
        table.scripts.push(node);

        let targets = doc.select(&Selector::parse(&selector)?);
        if !targets.iter().any(|&t| doc.subtree_has_expressions(t)) {
            tracing::debug!(%selector, "dropping context provider without consumers");
            continue;
        }

        table.providers.push(Provider {
            selector,
            code: doc.text_content(node),
            targets,
        });
    }

    Ok(table)
}

impl BindingTable {
    /// Every provider declaration, for removal from rendered output.
    pub fn scripts(&self) -> &[NodeId] {
        &self.scripts
    }

    /// Indices of providers visible from `node`, closest first.
    ///
    /// Providers whose target is the same ancestor keep document order.
    pub fn providers_for(&self, doc: &Document, node: NodeId) -> Vec<usize> {
        // (distance to the closest target containing `node`, provider index)
        let mut visible: Vec<(usize, usize)> = self
            .providers
            .iter()
            .enumerate()
            .filter_map(|(index, provider)| {
                provider
                    .targets
                    .iter()
                    .filter_map(|&target| doc.depth_below(target, node))
                    .min()
                    .map(|depth| (depth, index))
            })
            .collect();
        visible.sort_unstable();
        visible.into_iter().map(|(_, index)| index).collect()
    }
}

// ============================================================================
// Render context
// ============================================================================

/// Variables every expression of a page can see, before providers.
///
/// `params` holds the whole parameter set and each parameter is also bound
/// under its own name.
pub fn seed_variables(params: &Variables, location: &Path) -> Variables {
    let mut vars = ambient_variables(params, location);
    for (key, value) in params {
        vars.insert(key.clone(), value.clone());
    }
    vars
}

/// Variables visible to provider bodies.
pub fn ambient_variables(params: &Variables, location: &Path) -> Variables {
    let dirname = location.parent().unwrap_or(Path::new(""));
    let mut vars = Variables::new();
    vars.insert("params".into(), Value::Object(params.clone()));
    vars.insert(
        "__filename".into(),
        Value::String(location.display().to_string()),
    );
    vars.insert(
        "__dirname".into(),
        Value::String(dirname.display().to_string()),
    );
    vars
}

static READS_PARAMS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\bparams\b").expect("valid params pattern"));

/// Whether a provider body depends on the page parameters.
fn reads_params(code: &str) -> bool {
    READS_PARAMS.is_match(code)
}

/// Per-render scope resolution with memoized provider payloads.
///
/// One instance belongs to exactly one render; payloads are never shared
/// between pages.
pub struct RenderContext<'a> {
    table: &'a BindingTable,
    evaluator: &'a dyn Evaluator,
    seeds: Variables,
    ambient: Variables,
    cache: FxHashMap<usize, Variables>,
    /// Route enumeration: no page exists yet, so providers reading
    /// `params` contribute nothing.
    preflight: bool,
}

impl<'a> RenderContext<'a> {
    pub fn new(
        table: &'a BindingTable,
        evaluator: &'a dyn Evaluator,
        params: &Variables,
        location: &Path,
    ) -> Self {
        Self {
            table,
            evaluator,
            seeds: seed_variables(params, location),
            ambient: ambient_variables(params, location),
            cache: FxHashMap::default(),
            preflight: false,
        }
    }

    /// Context for evaluating route templates before any page exists.
    pub fn preflight(table: &'a BindingTable, evaluator: &'a dyn Evaluator, location: &Path) -> Self {
        Self {
            preflight: true,
            ..Self::new(table, evaluator, &Variables::new(), location)
        }
    }

    /// Evaluate provider `index` on first use and return its payload.
    pub fn payload(&mut self, index: usize) -> Result<&Variables, EvalError> {
        if !self.cache.contains_key(&index) {
            let provider = &self.table.providers[index];
            if self.preflight && reads_params(&provider.code) {
                tracing::debug!(
                    selector = %provider.selector,
                    "skipping parameter-dependent context provider"
                );
                self.cache.insert(index, Variables::new());
                return Ok(&self.cache[&index]);
            }
            let scope = Scope::new(self.ambient.clone());
            let payload = match self.evaluator.evaluate(&provider.code, &scope)? {
                Value::Object(map) => map,
                other => {
                    return Err(EvalError::new(
                        &provider.code,
                        format!("context provider must evaluate to a map, got `{other}`"),
                    ));
                }
            };
            tracing::debug!(
                selector = %provider.selector,
                keys = payload.len(),
                "evaluated context provider"
            );
            self.cache.insert(index, payload);
        }
        Ok(&self.cache[&index])
    }

    /// Variables visible at `node`: seeds first, then providers closest first.
    /// A key already bound is never overridden.
    pub fn scope_for(&mut self, doc: &Document, node: NodeId) -> Result<Variables, EvalError> {
        let mut vars = self.seeds.clone();
        for index in self.table.providers_for(doc, node) {
            for (key, value) in self.payload(index)? {
                if !vars.contains_key(key) {
                    vars.insert(key.clone(), value.clone());
                }
            }
        }
        Ok(vars)
    }

    /// Number of providers evaluated so far.
    pub fn evaluated(&self) -> usize {
        self.cache.len()
    }
}

// ============================================================================
// Tests
// ============================================================================
