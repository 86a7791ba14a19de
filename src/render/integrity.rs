//! Subresource integrity for inline scripts and styles, and the matching
//! Content-Security-Policy hash sources.
//!
//! ```text
//! <script>run()</script>
//!   => <script integrity="sha256-...">run()</script>
//!      <meta http-equiv="Content-Security-Policy" content="script-src 'self' 'sha256-...'">
//! ```

use super::minify::Hashed;
use crate::config::BuildConfig;
use crate::document::{Document, Element, NodeId, NodeKind};
use base64::{Engine, engine::general_purpose::STANDARD};
use sha2::{Digest, Sha256};

const CSP: &str = "content-security-policy";
const DEFAULT_SRC: &str = "default-src";

/// `sha256-<base64>` digest of an inline body.
pub fn digest(body: &str) -> String {
    format!("sha256-{}", STANDARD.encode(Sha256::digest(body.as_bytes())))
}

/// Hash every inline script and style enabled in `[build.js]`/`[build.css]`
/// and merge the hashes into the page's CSP.
pub fn apply(doc: &mut Document, build: &BuildConfig) -> Hashed {
    let mut scripts = Vec::new();
    let mut styles = Vec::new();

    for node in doc.elements() {
        let hashes = if doc.is_element(node, "script") && build.js.integrity {
            &mut scripts
        } else if doc.is_element(node, "style") && build.css.integrity {
            &mut styles
        } else {
            continue;
        };
        if doc.has_attr(node, "src") {
            continue;
        }
        let body = doc.text_content(node);
        if body.trim().is_empty() {
            continue;
        }
        let hash = digest(&body);
        doc.set_attr(node, "integrity", &hash);
        hashes.push(hash);
    }

    let hashed = Hashed {
        scripts: !scripts.is_empty(),
        styles: !styles.is_empty(),
    };
    if !hashed.scripts && !hashed.styles {
        return hashed;
    }

    let additions = [("script-src", scripts), ("style-src", styles)];
    match find_policy(doc) {
        Some(meta) => {
            let policy = doc.attr(meta, "content").unwrap_or_default();
            doc.set_attr(meta, "content", &merge_policy(&policy, &additions));
        }
        None if build.csp.inject => match doc.select_str("head").ok().and_then(|h| h.first().copied()) {
            Some(head) => {
                let meta = doc.append(head, NodeKind::Element(Element::new("meta")));
                doc.set_attr(meta, "http-equiv", "Content-Security-Policy");
                doc.set_attr(meta, "content", &merge_policy("", &additions));
            }
            None => tracing::warn!("cannot inject Content-Security-Policy: page has no <head>"),
        },
        None => {}
    }

    hashed
}

/// The first `<meta http-equiv="Content-Security-Policy">`.
fn find_policy(doc: &Document) -> Option<NodeId> {
    doc.elements().into_iter().find(|&node| {
        doc.is_element(node, "meta")
            && doc
                .attr(node, "http-equiv")
                .is_some_and(|v| v.trim().eq_ignore_ascii_case(CSP))
    })
}

/// Merge hash sources into CSP directives.
///
/// Existing directives and tokens keep their order; new hash tokens are
/// appended sorted, without duplicates. A directive that does not exist yet
/// starts from the `default-src` sources it would otherwise fall back to.
pub fn merge_policy(policy: &str, additions: &[(&str, Vec<String>)]) -> String {
    let mut directives: Vec<(String, Vec<String>)> = policy
        .split(';')
        .filter_map(|directive| {
            let mut tokens = directive.split_ascii_whitespace();
            let name = tokens.next()?.to_ascii_lowercase();
            Some((name, tokens.map(str::to_owned).collect()))
        })
        .collect();

    for (name, hashes) in additions {
        if hashes.is_empty() {
            continue;
        }
        let mut tokens: Vec<String> = hashes.iter().map(|h| format!("'{h}'")).collect();
        tokens.sort();
        tokens.dedup();

        let index = match directives.iter().position(|(n, _)| n == name) {
            Some(index) => index,
            None => {
                let fallback = directives
                    .iter()
                    .find(|(n, _)| n == DEFAULT_SRC)
                    .map(|(_, sources)| sources.clone())
                    .unwrap_or_default();
                directives.push(((*name).to_owned(), fallback));
                directives.len() - 1
            }
        };

        let sources = &mut directives[index].1;
        for token in tokens {
            if !sources.contains(&token) {
                sources.push(token);
            }
        }
    }

    directives
        .iter()
        .map(|(name, sources)| {
            if sources.is_empty() {
                name.clone()
            } else {
                format!("{name} {}", sources.join(" "))
            }
        })
        .collect::<Vec<_>>()
        .join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_digest() {
        // printf 'alert(1)' | openssl dgst -sha256 -binary | base64
        assert_eq!(
            digest("alert(1)"),
            "sha256-bhHHL3z2vDgxUt0W3dWQOrprscmda2Y5pLsLg4GF+pI="
        );
    }

    #[test]
    fn test_merge_policy_keeps_order_and_dedupes() {
        let merged = merge_policy(
            "default-src 'self'; script-src 'self' 'sha256-b'",
            &[(
                "script-src",
                vec!["sha256-c".into(), "sha256-b".into(), "sha256-a".into(), "sha256-c".into()],
            )],
        );
        assert_eq!(
            merged,
            "default-src 'self'; script-src 'self' 'sha256-b' 'sha256-a' 'sha256-c'"
        );
    }

    #[test]
    fn test_merge_policy_new_directive_inherits_default_src() {
        let merged = merge_policy(
            "default-src 'self' https://cdn.example; img-src *",
            &[("style-src", vec!["sha256-x".into()]), ("script-src", Vec::new())],
        );
        assert_eq!(
            merged,
            "default-src 'self' https://cdn.example; img-src *; style-src 'self' https://cdn.example 'sha256-x'"
        );
    }

    #[test]
    fn test_apply_hashes_inline_bodies_and_updates_meta() {
        let html = r#"<html><head><meta http-equiv="content-security-policy" content="script-src 'self'"></head><body><script>alert(1)</script><script src="/a.js"></script><style>p{}</style><script> </script></body></html>"#;
        let mut doc = Document::parse(html).unwrap();
        let hashed = apply(&mut doc, &BuildConfig::default());
        assert!(hashed.scripts && hashed.styles);

        let out = doc.to_html();
        let script = digest("alert(1)");
        let style = digest("p{}");
        assert!(out.contains(&format!(r#"<script integrity="{script}">"#)));
        assert!(out.contains(r#"<script src="/a.js">"#));
        assert!(out.contains(&format!(r#"<style integrity="{style}">"#)));
        assert!(out.contains(&format!("script-src 'self' '{script}'; style-src '{style}'")));
    }

    #[test]
    fn test_apply_injects_meta_only_when_enabled() {
        let html = "<html><head></head><body><script>alert(1)</script></body></html>";

        let mut doc = Document::parse(html).unwrap();
        apply(&mut doc, &BuildConfig::default());
        assert!(!doc.to_html().contains("Content-Security-Policy"));

        let mut build = BuildConfig::default();
        build.csp.inject = true;
        let mut doc = Document::parse(html).unwrap();
        apply(&mut doc, &build);
        let out = doc.to_html();
        assert!(out.contains(&format!(
            r#"<meta http-equiv="Content-Security-Policy" content="script-src '{}'">"#,
            digest("alert(1)")
        )));
    }

    #[test]
    fn test_apply_respects_disabled_integrity() {
        let mut build = BuildConfig::default();
        build.js.integrity = false;
        let mut doc = Document::parse("<script>alert(1)</script><style>p{}</style>").unwrap();
        let hashed = apply(&mut doc, &build);
        assert!(!hashed.scripts);
        assert!(hashed.styles);
        assert!(!doc.to_html().contains("<script integrity"));
    }
}
