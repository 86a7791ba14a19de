//! Error taxonomy for splitting, evaluation, enumeration, rendering and building.
//!
//! Each layer wraps the layer below it and adds the context needed to locate
//! a fault: document location, page path and the offending expression text.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

use crate::document::{DocumentError, SelectorError};

/// Malformed template text.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SplitError {
    #[error("unterminated expression starting at byte {offset}")]
    UnterminatedExpression { offset: usize },
}

/// An expression raised an error while being evaluated.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("`{code}`: {message}")]
pub struct EvalError {
    /// Source text of the expression.
    pub code: String,
    pub message: String,
}

impl EvalError {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_owned(),
            message: message.into(),
        }
    }
}

/// Context provider discovery failed.
#[derive(Debug, Error)]
pub enum BindError {
    #[error("context provider has an invalid target")]
    Selector(#[from] SelectorError),
}

/// Route enumeration for one document failed.
#[derive(Debug, Error)]
pub enum EnumerationError {
    #[error("failed to read `{}`", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("{location}: failed to parse document")]
    Document {
        location: String,
        #[source]
        source: DocumentError,
    },

    #[error("{location}: failed to bind context providers")]
    Bind {
        location: String,
        #[source]
        source: BindError,
    },

    #[error("{location}: malformed route template `{template}`")]
    Template {
        location: String,
        template: String,
        #[source]
        source: SplitError,
    },

    #[error("{location}: failed to evaluate route template `{template}`")]
    Evaluate {
        location: String,
        template: String,
        #[source]
        source: EvalError,
    },
}

/// Rendering one page failed.
#[derive(Debug, Error)]
pub enum RenderError {
    #[error("failed to read `{}`", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("{location}: failed to parse document")]
    Document {
        location: String,
        #[source]
        source: DocumentError,
    },

    #[error("{location}: failed to bind context providers")]
    Bind {
        location: String,
        #[source]
        source: BindError,
    },

    #[error("{location} ({page}): malformed template")]
    Template {
        page: String,
        location: String,
        #[source]
        source: SplitError,
    },

    #[error("{location} ({page}): expression failed")]
    Evaluate {
        page: String,
        location: String,
        #[source]
        source: EvalError,
    },

    #[error("{location}: failed to enumerate referenced document")]
    Enumeration {
        location: String,
        #[source]
        source: Box<EnumerationError>,
    },

    #[error("{location} ({page}): inline asset rendering failed")]
    Asset {
        page: String,
        location: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("{location} ({page}): included file `{specifier}` not found")]
    IncludeNotFound {
        page: String,
        location: String,
        specifier: String,
    },

    #[error("cyclic include: {}", chain.join(" -> "))]
    CyclicInclude { chain: Vec<String> },
}

/// The build stopped before every page was written.
#[derive(Debug, Error)]
pub enum BuildError {
    #[error("failed to prepare output directory `{}`", path.display())]
    Output {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to write `{}`", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error(transparent)]
    Enumeration(#[from] EnumerationError),

    #[error("failed to start render workers")]
    Pool(#[from] rayon::ThreadPoolBuildError),

    #[error("build aborted: page `{page}` failed")]
    Aborted {
        page: String,
        #[source]
        source: RenderError,
    },

    #[error("post-build hook failed")]
    Hook(#[source] anyhow::Error),
}
