//! HTML minification, the last terminal transform of a root render.

use crate::config::BuildConfig;

/// What the integrity step emitted, so minification can keep hashes valid.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Hashed {
    pub scripts: bool,
    pub styles: bool,
}

/// Minify `html` according to `[build]`; returned unchanged when disabled.
///
/// Inline JS/CSS is minified only when enabled for its kind and no
/// integrity hash was computed over the original body.
pub fn minify(html: String, build: &BuildConfig, hashed: Hashed) -> String {
    if !build.minify {
        return html;
    }

    let mut cfg = minify_html::Cfg::new();
    cfg.keep_closing_tags = true;
    cfg.keep_html_and_head_opening_tags = true;
    cfg.keep_comments = false;
    cfg.minify_css = build.css.minify && !hashed.styles;
    cfg.minify_js = build.js.minify && !hashed.scripts;
    cfg.remove_bangs = true;
    cfg.remove_processing_instructions = true;

    let minified = minify_html::minify(html.as_bytes(), &cfg);
    String::from_utf8(minified).unwrap_or(html)
}
