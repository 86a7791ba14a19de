//! Site configuration management for `pages.toml`.
//!
//! # Sections
//!
//! | Section        | Purpose                                          |
//! |----------------|--------------------------------------------------|
//! | `[base]`       | Base URI the site is published under             |
//! | `[build]`      | Paths, workers, minification, post-build hook    |
//! | `[build.js]`   | Inline script minification and integrity hashes  |
//! | `[build.css]`  | Inline style minification and integrity hashes   |
//! | `[build.csp]`  | Content-Security-Policy meta handling            |
//!
//! # Example
//!
//! ```toml
//! [base]
//! url = "https://example.com"
//!
//! [build]
//! content = "src"
//! output = "dist"
//! minify = true
//!
//! [build.csp]
//! inject = true
//! ```
//!
//! The loaded value is passed explicitly to every enumeration and render;
//! nothing reads configuration from global state.

mod base;
mod build;
pub mod defaults;
mod error;

pub use base::BaseConfig;
pub use build::BuildConfig;
pub use error::ConfigError;

use crate::cli::{Cli, Commands};
use crate::routes::BaseUri;
use anyhow::{Context, Result, bail};
use educe::Educe;
use serde::{Deserialize, Serialize};
use std::{
    fs,
    num::NonZeroUsize,
    path::{Path, PathBuf},
    thread,
};

// ============================================================================
// Root Configuration
// ============================================================================

/// Root configuration structure representing pages.toml
#[derive(Debug, Clone, Educe, Serialize, Deserialize)]
#[educe(Default)]
#[serde(deny_unknown_fields)]
pub struct SiteConfig {
    /// Absolute path to the config file (set after loading)
    #[serde(skip)]
    pub config_path: PathBuf,

    /// Publishing location
    #[serde(default)]
    pub base: BaseConfig,

    /// Build settings
    #[serde(default)]
    pub build: BuildConfig,
}

impl SiteConfig {
    /// Parse configuration from TOML string
    pub fn from_str(content: &str) -> Result<Self> {
        let config: SiteConfig = toml::from_str(content).map_err(ConfigError::from)?;
        Ok(config)
    }

    /// Load configuration from file path
    pub fn from_path(path: &Path) -> Result<Self> {
        let content =
            fs::read_to_string(path).map_err(|err| ConfigError::Io(path.to_path_buf(), err))?;
        let mut config = Self::from_str(&content)?;
        config.config_path = path.to_path_buf();
        Ok(config)
    }

    /// Get the root directory path
    pub fn get_root(&self) -> &Path {
        self.build.root.as_deref().unwrap_or(Path::new("./"))
    }

    /// Set the root directory path
    pub fn set_root(&mut self, path: &Path) {
        self.build.root = Some(path.to_path_buf())
    }

    /// Parsed `[base].url`.
    pub fn base_uri(&self) -> BaseUri {
        BaseUri::parse(&self.base.url)
    }

    /// Number of render workers.
    pub fn parallelism(&self) -> usize {
        self.build.parallelism.unwrap_or_else(|| {
            thread::available_parallelism()
                .map(NonZeroUsize::get)
                .unwrap_or(1)
        })
    }

    /// Update configuration with CLI arguments
    pub fn update_with_cli(&mut self, cli: &Cli) {
        let root = cli
            .root
            .as_ref()
            .cloned()
            .unwrap_or_else(|| self.get_root().to_owned());

        self.update_path_with_root(cli, &root);

        let build_args = cli.build_args();
        Self::update_option(&mut self.build.minify, build_args.minify.as_ref());
        Self::update_option(&mut self.base.url, build_args.base_url.as_ref());
        if build_args.parallelism.is_some() {
            self.build.parallelism = build_args.parallelism;
        }
    }

    /// Update config option if CLI value is provided
    fn update_option<T: Clone>(config_option: &mut T, cli_option: Option<&T>) {
        if let Some(option) = cli_option {
            *config_option = option.clone();
        }
    }

    /// Update all paths relative to root directory and normalize to absolute paths
    fn update_path_with_root(&mut self, cli: &Cli, root: &Path) {
        // Apply CLI overrides first
        Self::update_option(&mut self.build.content, cli.content.as_ref());
        Self::update_option(&mut self.build.output, cli.output.as_ref());

        let root = Self::normalize_path(root);
        self.set_root(&root);

        self.config_path = Self::normalize_path(&root.join(&cli.config));
        self.build.content = Self::normalize_path(&root.join(&self.build.content));
        self.build.output = Self::normalize_path(&root.join(&self.build.output));
    }

    /// Normalize a path to absolute, using canonicalize if the path exists
    fn normalize_path(path: &Path) -> PathBuf {
        path.canonicalize().unwrap_or_else(|_| {
            // For non-existent paths, manually make them absolute
            if path.is_absolute() {
                path.to_path_buf()
            } else {
                std::env::current_dir()
                    .map(|cwd| cwd.join(path))
                    .unwrap_or_else(|_| path.to_path_buf())
            }
        })
    }

    /// Validate configuration for the current command
    pub fn validate(&self, cli: &Cli) -> Result<()> {
        let url = &self.base.url;
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            bail!(ConfigError::Validation(
                "[base.url] must start with http:// or https://".into()
            ));
        }

        if self.build.parallelism == Some(0) {
            bail!(ConfigError::Validation(
                "[build.parallelism] must be at least 1".into()
            ));
        }

        if !self.build.hook.is_empty() {
            Self::check_command_installed("[build.hook]", &self.build.hook)?;
        }

        if let Commands::Build { .. } = &cli.command {
            let content = &self.build.content;
            if !content.is_dir() {
                bail!(ConfigError::Validation(format!(
                    "[build.content] `{}` is not a directory",
                    content.display()
                )));
            }

            // The output directory is cleared on every build.
            let output = &self.build.output;
            if content.starts_with(output) || self.get_root().starts_with(output) {
                bail!(ConfigError::Validation(format!(
                    "[build.output] `{}` must not contain the sources",
                    output.display()
                )));
            }
        }

        Ok(())
    }

    /// Check if a command is installed and available
    fn check_command_installed(field: &str, command: &[String]) -> Result<()> {
        let Some(cmd) = command.first() else {
            bail!(ConfigError::Validation(format!(
                "{field} must have at least one element"
            )));
        };

        which::which(cmd)
            .with_context(|| format!("`{cmd}` not found. Please install it first."))?;

        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================
