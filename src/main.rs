//! Pagesmith - a static site builder for parameterized HTML documents.

mod build;
mod cli;
mod config;
mod context;
mod document;
mod error;
mod logger;
mod render;
mod routes;
mod template;
mod utils;

use anyhow::{Context, Result, bail};
use build::{CommandHook, PostBuildHook, build_site};
use clap::Parser;
use cli::{Cli, Commands};
use config::SiteConfig;
use render::Renderer;
use routes::{DocumentHandle, PageDescriptor, enumerate};
use std::{
    io::{Write, stdout},
    path::Path,
    sync::Arc,
};
use template::JinjaEvaluator;

fn main() -> Result<()> {
    let cli = Cli::parse();
    logger::init_tracing(cli.verbose);
    let config = load_config(&cli)?;

    match &cli.command {
        Commands::Build { .. } => {
            let hook = CommandHook::from_config(&config);
            build_site(&config, hook.as_ref().map(|h| h as &dyn PostBuildHook))?;
            Ok(())
        }
        Commands::Pages { file, .. } => list_pages(&config, file),
        Commands::Render { file, path, .. } => render_page(config, file, path.as_deref()),
    }
}

/// Load and validate configuration from CLI arguments.
///
/// A project without a config file builds with the defaults.
fn load_config(cli: &Cli) -> Result<SiteConfig> {
    let root = cli.root.as_deref().unwrap_or(Path::new("./"));
    let config_path = root.join(&cli.config);

    let mut config = if config_path.exists() {
        SiteConfig::from_path(&config_path)?
    } else {
        tracing::debug!(path = %config_path.display(), "no config file, using defaults");
        SiteConfig::default()
    };
    config.update_with_cli(cli);
    config.validate(cli)?;

    Ok(config)
}

fn pages_of(config: &SiteConfig, file: &Path) -> Result<Vec<PageDescriptor>> {
    let file = file
        .canonicalize()
        .with_context(|| format!("`{}` not found", file.display()))?;
    let pages = enumerate(&DocumentHandle::File(file), &config.base_uri(), &JinjaEvaluator)?;
    Ok(pages)
}

/// Print every page a document expands to.
fn list_pages(config: &SiteConfig, file: &Path) -> Result<()> {
    for page in pages_of(config, file)? {
        let parameters = serde_json::to_string(&page.parameters)?;
        if page.partial {
            log!("pages"; "{} (partial) {}", page.path, parameters);
        } else {
            log!("pages"; "{} {}", page.path, parameters);
        }
    }
    Ok(())
}

/// Render one page of a document to stdout.
fn render_page(config: SiteConfig, file: &Path, path: Option<&str>) -> Result<()> {
    let pages = pages_of(&config, file)?;
    let page = match path {
        Some(path) => pages.iter().find(|page| page.path == path),
        None => pages.first(),
    };
    let Some(page) = page else {
        bail!(
            "`{}` has no page `{}`",
            file.display(),
            path.unwrap_or_default()
        );
    };

    let renderer = Renderer::new(Arc::new(config), Arc::new(JinjaEvaluator));
    let html = renderer.render(page)?;

    let mut stdout = stdout().lock();
    stdout.write_all(html.as_bytes())?;
    stdout.flush()?;
    Ok(())
}
