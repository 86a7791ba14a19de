//! Specifier resolution for `include(...)` and local references.
//!
//! ```text
//! resolve("partials/nav.html", [/site/src])  => /site/src/partials/nav.html
//! resolve("/abs/file.html", ..)              => /abs/file.html
//! resolve("file:///abs/file.html", ..)       => /abs/file.html
//! ```

use std::path::{Path, PathBuf};

const FILE_SCHEME: &str = "file://";

/// Resolve `specifier` to an existing file.
///
/// Absolute paths and `file://` URLs are used as is; relative specifiers are
/// tried against each location in order. Query and fragment are ignored.
pub fn resolve<P: AsRef<Path>>(specifier: &str, locations: &[P]) -> Option<PathBuf> {
    let specifier = specifier
        .split(['?', '#'])
        .next()
        .unwrap_or_default()
        .trim();
    if specifier.is_empty() {
        return None;
    }

    let path = Path::new(specifier.strip_prefix(FILE_SCHEME).unwrap_or(specifier));
    if path.is_absolute() {
        return path.is_file().then(|| path.to_path_buf());
    }
    if specifier.contains("://") {
        return None;
    }

    locations
        .iter()
        .map(|location| location.as_ref().join(path))
        .find(|candidate| candidate.is_file())
}
