//! `[build]` section configuration.
//!
//! Contains build settings: paths, worker count, terminal transforms and the
//! post-build hook.

use super::defaults;
use educe::Educe;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

// ============================================================================
// Main BuildConfig
// ============================================================================

/// `[build]` section in pages.toml - build pipeline configuration.
///
/// # Example
/// ```toml
/// [build]
/// content = "src"          # Source directory
/// output = "dist"          # Output directory, cleared on every build
/// minify = true            # Minify HTML
/// parallelism = 4          # Render workers (default: available cores)
/// hook = ["./deploy.sh"]   # Runs after a successful build
///
/// [build.js]
/// integrity = true
///
/// [build.csp]
/// inject = true
/// ```
#[derive(Debug, Clone, Educe, Serialize, Deserialize)]
#[educe(Default)]
#[serde(default, deny_unknown_fields)]
pub struct BuildConfig {
    /// Project root directory (usually set via CLI `--root`).
    #[serde(default = "defaults::build::root")]
    #[educe(Default = defaults::build::root())]
    pub root: Option<PathBuf>,

    /// Source document directory.
    #[serde(default = "defaults::build::content")]
    #[educe(Default = defaults::build::content())]
    pub content: PathBuf,

    /// Build output directory.
    #[serde(default = "defaults::build::output")]
    #[educe(Default = defaults::build::output())]
    pub output: PathBuf,

    /// Minify rendered HTML.
    #[serde(default = "defaults::r#true")]
    #[educe(Default = true)]
    pub minify: bool,

    /// Rewrite attribute values naming local `.html` files to page URLs.
    #[serde(default = "defaults::r#true")]
    #[educe(Default = true)]
    pub resolve: bool,

    /// Number of render workers; defaults to the available parallelism.
    #[serde(default = "defaults::build::parallelism")]
    #[educe(Default = defaults::build::parallelism())]
    pub parallelism: Option<usize>,

    /// Command run once after a successful build, with the output directory
    /// appended as the last argument.
    #[serde(default = "defaults::build::hook")]
    #[educe(Default = defaults::build::hook())]
    pub hook: Vec<String>,

    /// Inline script handling.
    #[serde(default)]
    pub js: AssetConfig,

    /// Inline style handling.
    #[serde(default)]
    pub css: AssetConfig,

    /// Content-Security-Policy handling.
    #[serde(default)]
    pub csp: CspConfig,
}

// ============================================================================
// Sub-configurations
// ============================================================================

/// `[build.js]` and `[build.css]` sections.
#[derive(Debug, Clone, Educe, Serialize, Deserialize)]
#[educe(Default)]
#[serde(deny_unknown_fields)]
pub struct AssetConfig {
    /// Minify inline bodies as part of HTML minification.
    #[serde(default = "defaults::r#true")]
    #[educe(Default = true)]
    pub minify: bool,

    /// Emit `integrity` hashes for inline bodies and merge them into the CSP.
    #[serde(default = "defaults::r#true")]
    #[educe(Default = true)]
    pub integrity: bool,
}

/// `[build.csp]` section.
#[derive(Debug, Clone, Educe, Serialize, Deserialize)]
#[educe(Default)]
#[serde(deny_unknown_fields)]
pub struct CspConfig {
    /// Create a CSP meta tag in `<head>` for pages that have none.
    #[serde(default = "defaults::r#false")]
    #[educe(Default = false)]
    pub inject: bool,
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::super::SiteConfig;
    use super::*;

    #[test]
    fn test_build_config_defaults() {
        let config: SiteConfig = toml::from_str("").unwrap();

        assert_eq!(config.build.content, PathBuf::from("src"));
        assert_eq!(config.build.output, PathBuf::from("dist"));
        assert!(config.build.minify);
        assert!(config.build.resolve);
        assert_eq!(config.build.parallelism, None);
        assert!(config.build.hook.is_empty());
        assert!(config.build.js.minify && config.build.js.integrity);
        assert!(config.build.css.minify && config.build.css.integrity);
        assert!(!config.build.csp.inject);
    }

    #[test]
    fn test_build_config_full() {
        let config = r#"
            [build]
            content = "pages"
            output = "public"
            minify = false
            resolve = false
            parallelism = 2
            hook = ["rsync", "-a"]

            [build.js]
            integrity = false

            [build.css]
            minify = false

            [build.csp]
            inject = true
        "#;
        let config: SiteConfig = toml::from_str(config).unwrap();

        assert_eq!(config.build.content, PathBuf::from("pages"));
        assert_eq!(config.build.output, PathBuf::from("public"));
        assert!(!config.build.minify);
        assert!(!config.build.resolve);
        assert_eq!(config.build.parallelism, Some(2));
        assert_eq!(config.build.hook, vec!["rsync", "-a"]);
        assert!(config.build.js.minify);
        assert!(!config.build.js.integrity);
        assert!(!config.build.css.minify);
        assert!(config.build.css.integrity);
        assert!(config.build.csp.inject);
    }

    #[test]
    fn test_build_config_unknown_field() {
        let config = r#"
            [build.js]
            bundle = true
        "#;
        let result: Result<SiteConfig, _> = toml::from_str(config);
        assert!(result.is_err());
    }
}
