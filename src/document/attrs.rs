//! Raw attribute text helpers.
//!
//! Attribute text is kept verbatim on the element. These helpers read it with
//! quick-xml's HTML attribute rules (unquoted and valueless attributes are
//! allowed) and rebuild it only when an attribute is changed.

use quick_xml::escape::unescape;
use quick_xml::events::BytesStart;
use std::borrow::Cow;

/// Escape `value` for any quoted attribute: `&`, `"`, `'` and `<`.
pub fn escape_value(value: &str) -> Cow<'_, str> {
    escape(value, true)
}

fn escape(value: &str, single_quote: bool) -> Cow<'_, str> {
    let special = |c: char| matches!(c, '&' | '"' | '<') || (single_quote && c == '\'');
    if !value.contains(special) {
        return Cow::Borrowed(value);
    }
    let mut out = String::with_capacity(value.len() + 8);
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '"' => out.push_str("&quot;"),
            '<' => out.push_str("&lt;"),
            '\'' if single_quote => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    Cow::Owned(out)
}

/// Parse raw attribute text into `(name, raw value)` pairs in source order.
fn parse(raw: &str) -> Vec<(String, String)> {
    // quick-xml expects the tag name in front of the attributes.
    let start = BytesStart::from_content(format!("x{raw}"), 1);
    let mut attributes = start.html_attributes();
    attributes.with_checks(false);
    attributes
        .flatten()
        .map(|attr| {
            (
                String::from_utf8_lossy(attr.key.as_ref()).into_owned(),
                String::from_utf8_lossy(&attr.value).into_owned(),
            )
        })
        .collect()
}

fn write(attrs: &[(String, String)]) -> String {
    let mut out = String::new();
    for (name, value) in attrs {
        out.push(' ');
        out.push_str(name);
        if !value.is_empty() {
            out.push_str("=\"");
            out.push_str(value);
            out.push('"');
        }
    }
    out
}

fn unescaped(value: String) -> String {
    match unescape(&value) {
        Ok(unescaped) => unescaped.into_owned(),
        // Unknown named references such as `&nbsp;` stay as written.
        Err(_) => value,
    }
}

/// Unescaped value of `name`, matched case-insensitively.
pub fn get(raw: &str, name: &str) -> Option<String> {
    parse(raw)
        .into_iter()
        .find(|(key, _)| key.eq_ignore_ascii_case(name))
        .map(|(_, value)| unescaped(value))
}

/// Every attribute with its unescaped value.
pub fn all(raw: &str) -> Vec<(String, String)> {
    parse(raw)
        .into_iter()
        .map(|(name, value)| (name, unescaped(value)))
        .collect()
}

/// Set `name` to the unescaped `value`, appending it when missing.
///
/// The attribute is written double-quoted, so `'` is kept as is.
pub fn set(raw: &str, name: &str, value: &str) -> String {
    let mut attrs = requote(parse(raw));
    let escaped = escape(value, false).into_owned();
    match attrs.iter_mut().find(|(key, _)| key.eq_ignore_ascii_case(name)) {
        Some((_, existing)) => *existing = escaped,
        None => attrs.push((name.to_owned(), escaped)),
    }
    write(&attrs)
}

/// Values are rewritten double-quoted; single-quoted ones may hold `"`.
fn requote(attrs: Vec<(String, String)>) -> Vec<(String, String)> {
    attrs
        .into_iter()
        .map(|(name, value)| (name, value.replace('"', "&quot;")))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_quoted_unquoted_and_bare() {
        let raw = r#" rel=canonical href="/a/?x=1&amp;y=2" hidden data-x='say "hi"'"#;
        assert_eq!(get(raw, "rel").as_deref(), Some("canonical"));
        assert_eq!(get(raw, "HREF").as_deref(), Some("/a/?x=1&y=2"));
        assert_eq!(get(raw, "hidden").as_deref(), Some(""));
        assert_eq!(get(raw, "data-x").as_deref(), Some(r#"say "hi""#));
        assert_eq!(get(raw, "missing"), None);
    }

    #[test]
    fn test_all_in_source_order() {
        let raw = r#" href="a.html" hidden title='x &amp; y'"#;
        assert_eq!(
            all(raw),
            vec![
                ("href".to_owned(), "a.html".to_owned()),
                ("hidden".to_owned(), String::new()),
                ("title".to_owned(), "x & y".to_owned()),
            ]
        );
    }

    #[test]
    fn test_get_keeps_unknown_entities() {
        assert_eq!(get(r#" title="a&nbsp;b""#, "title").as_deref(), Some("a&nbsp;b"));
    }

    #[test]
    fn test_set_replaces_and_appends() {
        let raw = r#" rel="canonical" href="/items/${id}/""#;
        assert_eq!(set(raw, "href", "/items/a/"), r#" rel="canonical" href="/items/a/""#);
        assert_eq!(
            set(raw, "integrity", "sha256-x"),
            r#" rel="canonical" href="/items/${id}/" integrity="sha256-x""#
        );
    }

    #[test]
    fn test_escape_value() {
        assert!(matches!(escape_value("plain text"), Cow::Borrowed(_)));
        assert_eq!(escape_value(r#"<a href="x">&"#), "&lt;a href=&quot;x&quot;>&amp;");
        assert_eq!(escape_value("it's"), "it&#39;s");
        assert_eq!(get(&format!(" title='{}'", escape_value("it's")), "title").as_deref(), Some("it's"));
    }

    #[test]
    fn test_set_escapes_value() {
        assert_eq!(set("", "title", r#"a "b" & c"#), r#" title="a &quot;b&quot; &amp; c""#);
        assert_eq!(set("", "content", "script-src 'self'"), r#" content="script-src 'self'""#);
    }

    #[test]
    fn test_set_requotes_single_quoted_values() {
        let raw = r#" data-x='say "hi"' defer"#;
        assert_eq!(
            set(raw, "id", "x"),
            r#" data-x="say &quot;hi&quot;" defer id="x""#
        );
    }
}
