//! Command-line interface definitions.
//!
//! Defines all CLI arguments and subcommands using clap.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Pagesmith static site builder CLI
#[derive(Parser, Debug, Clone)]
#[command(version, about, long_about = None, arg_required_else_help = true)]
pub struct Cli {
    /// Project root directory
    #[arg(short, long)]
    pub root: Option<PathBuf>,

    /// Output directory path (relative to project root)
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Content directory path (relative to project root)
    #[arg(short, long)]
    pub content: Option<PathBuf>,

    /// Config file name (default: pages.toml)
    #[arg(short = 'C', long, default_value = "pages.toml")]
    pub config: PathBuf,

    /// Print debug diagnostics
    #[arg(short, long)]
    pub verbose: bool,

    /// subcommands
    #[command(subcommand)]
    pub command: Commands,
}

/// Arguments shared by every subcommand
#[derive(clap::Args, Debug, Clone, Default)]
pub struct BuildArgs {
    /// Minify the html content
    #[arg(short, long, action = clap::ArgAction::Set, num_args = 0..=1, default_missing_value = "true", require_equals = false)]
    pub minify: Option<bool>,

    /// Override base URL for the site.
    ///
    /// The path part becomes the prefix of every route:
    ///   pagesmith build --base-url "https://example.github.io/docs"
    #[arg(long = "base-url")]
    pub base_url: Option<String>,

    /// Number of render workers
    #[arg(short = 'j', long)]
    pub parallelism: Option<usize>,
}

/// Available subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Deletes the output directory if there is one and rebuilds the site
    Build {
        #[command(flatten)]
        build_args: BuildArgs,
    },

    /// List the pages one document expands to
    Pages {
        /// Document path, relative to the current directory
        file: PathBuf,

        #[command(flatten)]
        build_args: BuildArgs,
    },

    /// Render one page of a document to stdout
    Render {
        /// Document path, relative to the current directory
        file: PathBuf,

        /// Route to render (default: the first enumerated page)
        #[arg(short, long)]
        path: Option<String>,

        #[command(flatten)]
        build_args: BuildArgs,
    },
}

impl Cli {
    pub const fn build_args(&self) -> &BuildArgs {
        match &self.command {
            Commands::Build { build_args }
            | Commands::Pages { build_args, .. }
            | Commands::Render { build_args, .. } => build_args,
        }
    }
}
