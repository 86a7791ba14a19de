//! Site building orchestration.
//!
//! # Architecture
//!
//! ```text
//! build_site()
//!     │
//!     ├── prepare_output()   clear and recreate the output directory
//!     │
//!     ├── enumerate_pages()  every .html document → PageDescriptors
//!     │       │               (parallel, source order kept, partials dropped)
//!     │
//!     ├── render_pages()     fixed-size pool, fail fast, progress done/total
//!     │       │
//!     │       └── write_page()   /a/b/ → a/b/index.html
//!     │
//!     └── PostBuildHook::run()
//! ```

use crate::{
    config::SiteConfig,
    error::BuildError,
    log,
    logger::ProgressBar,
    render::Renderer,
    routes::{BaseUri, DocumentHandle, PageDescriptor, enumerate},
    template::{Evaluator, JinjaEvaluator},
    utils::{exec::exec, fs::collect_documents},
};
use parking_lot::Mutex;
use rayon::prelude::*;
use rustc_hash::FxHashSet;
use std::{
    error::Error,
    ffi::OsString,
    fs,
    path::{Path, PathBuf},
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

/// Outcome of a successful build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildReport {
    /// Number of page files written.
    pub pages: usize,
    pub output: PathBuf,
}

// ============================================================================
// Post-build hook
// ============================================================================

/// Runs once after every page has been written.
pub trait PostBuildHook: Send + Sync {
    fn run(&self, output: &Path) -> anyhow::Result<()>;
}

/// Runs `[build].hook` with the output directory as the last argument.
#[derive(Debug, Clone)]
pub struct CommandHook {
    command: Vec<String>,
    root: PathBuf,
}

impl CommandHook {
    pub fn new(command: Vec<String>, root: PathBuf) -> Self {
        Self { command, root }
    }

    /// The configured hook, if any.
    pub fn from_config(config: &SiteConfig) -> Option<Self> {
        (!config.build.hook.is_empty())
            .then(|| Self::new(config.build.hook.clone(), config.get_root().to_path_buf()))
    }
}

impl PostBuildHook for CommandHook {
    fn run(&self, output: &Path) -> anyhow::Result<()> {
        exec(Some(&self.root), &self.command, &[OsString::from(output)])?;
        Ok(())
    }
}

// ============================================================================
// Build
// ============================================================================

/// Build the site with the default evaluator.
pub fn build_site(
    config: &SiteConfig,
    hook: Option<&dyn PostBuildHook>,
) -> Result<BuildReport, BuildError> {
    build_site_with(config, Arc::new(JinjaEvaluator), hook, |_, _| {})
}

/// Build the site, reporting `(completed, total)` after every written page.
pub fn build_site_with(
    config: &SiteConfig,
    evaluator: Arc<dyn Evaluator>,
    hook: Option<&dyn PostBuildHook>,
    on_progress: impl Fn(usize, usize) + Sync,
) -> Result<BuildReport, BuildError> {
    let output = &config.build.output;
    prepare_output(output)?;

    let documents = collect_documents(&config.build.content);
    let pages = enumerate_pages(&documents, &config.base_uri(), evaluator.as_ref())?;
    log!("build"; "rendering {} pages", pages.len());

    let renderer = Renderer::new(Arc::new(config.clone()), evaluator);
    let progress = ProgressBar::new("render", pages.len());
    let result = render_pages(&renderer, &pages, output, config.parallelism(), |done, total| {
        if let Some(progress) = &progress {
            progress.set(done, total);
        }
        on_progress(done, total);
    });
    if let Some(progress) = &progress {
        progress.finish();
    }
    let written = result?;

    if let Some(hook) = hook {
        log!("hook"; "running post-build hook");
        hook.run(output).map_err(BuildError::Hook)?;
    }

    log!("build"; "done: {} pages -> {}", written, output.display());
    Ok(BuildReport {
        pages: written,
        output: output.clone(),
    })
}

/// Remove everything in `output` and recreate it empty.
fn prepare_output(output: &Path) -> Result<(), BuildError> {
    let output_error = |source| BuildError::Output {
        path: output.to_path_buf(),
        source,
    };
    if output.exists() {
        fs::remove_dir_all(output).map_err(output_error)?;
    }
    fs::create_dir_all(output).map_err(output_error)
}

/// Publishable pages of every document, in document order.
///
/// A route produced by more than one page is built from the first.
pub fn enumerate_pages(
    documents: &[PathBuf],
    base: &BaseUri,
    evaluator: &dyn Evaluator,
) -> Result<Vec<PageDescriptor>, BuildError> {
    let per_document = documents
        .par_iter()
        .map(|path| enumerate(&DocumentHandle::File(path.clone()), base, evaluator))
        .collect::<Result<Vec<_>, _>>()?;

    let mut seen = FxHashSet::default();
    let pages = per_document
        .into_iter()
        .flatten()
        .filter(|page| !page.partial)
        .filter(|page| {
            let fresh = seen.insert(page.path.clone());
            if !fresh {
                tracing::warn!(
                    route = %page.path,
                    document = %page.source.location().display(),
                    "route already produced by another page, skipping"
                );
            }
            fresh
        })
        .collect();
    Ok(pages)
}

/// Render and write `pages` on `min(parallelism, pages)` workers.
///
/// The first failure stops new renders from starting; renders already in
/// flight finish but their output is discarded. Returns the number of pages
/// written.
pub fn render_pages(
    renderer: &Renderer,
    pages: &[PageDescriptor],
    output: &Path,
    parallelism: usize,
    on_progress: impl Fn(usize, usize) + Sync,
) -> Result<usize, BuildError> {
    let total = pages.len();
    if total == 0 {
        return Ok(0);
    }

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(parallelism.clamp(1, total))
        .thread_name(|index| format!("render-{index}"))
        .build()?;

    let aborted = AtomicBool::new(false);
    let failure: Mutex<Option<BuildError>> = Mutex::new(None);
    // Guarded so reports arrive in increasing order.
    let completed = Mutex::new(0);

    pool.install(|| {
        pages.par_iter().for_each(|page| {
            if aborted.load(Ordering::SeqCst) {
                return;
            }

            let result = renderer
                .render(page)
                .map_err(|source| BuildError::Aborted {
                    page: page.path.clone(),
                    source,
                })
                .and_then(|html| {
                    if aborted.load(Ordering::SeqCst) {
                        return Ok(false);
                    }
                    write_page(output, &page.path, &html).map(|()| true)
                });

            match result {
                Ok(true) => {
                    let mut completed = completed.lock();
                    *completed += 1;
                    on_progress(*completed, total);
                }
                Ok(false) => {}
                Err(err) => {
                    if !aborted.swap(true, Ordering::SeqCst) {
                        log!("error"; "{}", error_chain(&err));
                        *failure.lock() = Some(err);
                    }
                }
            }
        });
    });

    match failure.into_inner() {
        Some(err) => Err(err),
        None => Ok(*completed.lock()),
    }
}

/// Output file for a route below `output`.
///
/// `/a/b/` maps to `a/b/index.html`, `/a/b.ext` to `a/b.ext` and an
/// extensionless `/a/b` to `a/b.html`.
pub fn output_path(output: &Path, route: &str) -> PathBuf {
    let relative = route.trim_start_matches('/');
    let mut path = output.join(relative);
    if relative.is_empty() || route.ends_with('/') {
        path.push("index.html");
    } else if path.extension().is_none() {
        path.set_extension("html");
    }
    path
}

/// Write a page next to its final path, then move it into place, so the
/// final path never holds a partly written page.
fn write_page(output: &Path, route: &str, html: &str) -> Result<(), BuildError> {
    let path = output_path(output, route);
    let write_error = |source| BuildError::Write {
        path: path.clone(),
        source,
    };
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(write_error)?;
    }

    let staged = staging_path(&path);
    if let Err(err) = fs::write(&staged, html).and_then(|()| fs::rename(&staged, &path)) {
        fs::remove_file(&staged).ok();
        return Err(write_error(err));
    }
    Ok(())
}

/// Hidden sibling of `path` used while a page is written.
fn staging_path(path: &Path) -> PathBuf {
    let mut name = OsString::from(".");
    name.push(path.file_name().unwrap_or_default());
    name.push(".tmp");
    path.with_file_name(name)
}

/// `error: cause: cause` on one line.
fn error_chain(err: &dyn Error) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{EvalError, RenderError};
    use crate::template::{Scope, Value};
    use tempfile::TempDir;

    const ITEMS: &str = r#"<html><head>
<link rel="canonical" href="/items/${id}/">
<script target="head, main">{"id": ["a", "b", "c", "d", "e"]}</script>
</head><body><main><p>${id}</p></main></body></html>"#;

    /// Fails every expression `id` evaluated while `id` is `"c"`.
    struct FailOnC;

    impl Evaluator for FailOnC {
        fn evaluate(&self, code: &str, scope: &Scope) -> Result<Value, EvalError> {
            if code.trim() == "id" && scope.vars.get("id") == Some(&Value::from("c")) {
                return Err(EvalError::new(code, "refusing to render c"));
            }
            JinjaEvaluator.evaluate(code, scope)
        }
    }

    fn site(files: &[(&str, &str)]) -> (TempDir, SiteConfig) {
        let dir = TempDir::new().unwrap();
        let content = dir.path().join("src");
        for (name, body) in files {
            let path = content.join(name);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(path, body).unwrap();
        }

        let mut config = SiteConfig::default();
        config.set_root(dir.path());
        config.build.content = content;
        config.build.output = dir.path().join("dist");
        config.build.minify = false;
        (dir, config)
    }

    #[test]
    fn test_output_path() {
        let out = Path::new("/out");
        assert_eq!(output_path(out, "/"), PathBuf::from("/out/index.html"));
        assert_eq!(output_path(out, "/a/b/"), PathBuf::from("/out/a/b/index.html"));
        assert_eq!(output_path(out, "/a/feed.xml"), PathBuf::from("/out/a/feed.xml"));
        assert_eq!(output_path(out, "/a/b"), PathBuf::from("/out/a/b.html"));
    }

    #[test]
    fn test_staging_path_is_hidden_sibling() {
        assert_eq!(
            staging_path(Path::new("/out/a/index.html")),
            PathBuf::from("/out/a/.index.html.tmp")
        );
    }

    #[test]
    fn test_write_page_leaves_no_staging_file() {
        let dir = TempDir::new().unwrap();
        write_page(dir.path(), "/a/", "<p>a</p>").unwrap();
        let files: Vec<_> = fs::read_dir(dir.path().join("a"))
            .unwrap()
            .map(|entry| entry.unwrap().file_name())
            .collect();
        assert_eq!(files, vec![OsString::from("index.html")]);
    }

    #[cfg(unix)]
    #[test]
    fn test_failed_write_leaves_no_page() {
        let dir = TempDir::new().unwrap();
        // The final path is a directory, so moving the page into place fails.
        fs::create_dir_all(dir.path().join("a/index.html/x")).unwrap();
        let err = write_page(dir.path(), "/a/", "<p>a</p>").unwrap_err();
        assert!(matches!(err, BuildError::Write { .. }));
        assert!(!dir.path().join("a/.index.html.tmp").exists());
        assert!(dir.path().join("a/index.html").is_dir());
    }

    #[test]
    fn test_build_writes_every_page_and_drops_partials() {
        let (_dir, config) = site(&[
            ("items.html", ITEMS),
            ("index.html", r#"<link rel="canonical" href="/"><h1>home</h1>"#),
            ("partials/nav.html", "<nav>${1}</nav>"),
        ]);
        fs::create_dir_all(&config.build.output).unwrap();
        fs::write(config.build.output.join("stale.html"), "old").unwrap();

        let report = build_site(&config, None).unwrap();
        let output = &config.build.output;

        assert_eq!(report.pages, 6);
        assert!(!output.join("stale.html").exists());
        assert!(!output.join("partials").exists());
        assert_eq!(
            fs::read_to_string(output.join("index.html")).unwrap(),
            r#"<link rel="canonical" href="http://localhost:8080/"><h1>home</h1>"#
        );
        let c = fs::read_to_string(output.join("items/c/index.html")).unwrap();
        assert!(c.contains("<p>c</p>"));
        assert!(c.contains(r#"href="http://localhost:8080/items/c/""#));
    }

    #[test]
    fn test_progress_is_monotonic() {
        let (_dir, mut config) = site(&[("items.html", ITEMS)]);
        config.build.parallelism = Some(4);

        let reports = Mutex::new(Vec::new());
        build_site_with(&config, Arc::new(JinjaEvaluator), None, |done, total| {
            reports.lock().push((done, total));
        })
        .unwrap();

        let reports = reports.into_inner();
        assert_eq!(reports, (1..=5).map(|done| (done, 5)).collect::<Vec<_>>());
    }

    #[test]
    fn test_failure_aborts_build() {
        let (_dir, mut config) = site(&[("items.html", ITEMS)]);
        config.build.parallelism = Some(1);

        let err = build_site_with(&config, Arc::new(FailOnC), None, |_, _| {}).unwrap_err();
        let BuildError::Aborted { page, source } = &err else {
            panic!("unexpected error: {err}");
        };
        assert_eq!(page, "/items/c/");
        assert!(matches!(source, RenderError::Evaluate { .. }));

        let output = &config.build.output;
        assert!(output.join("items/a/index.html").exists());
        assert!(output.join("items/b/index.html").exists());
        assert!(!output.join("items/c/index.html").exists());
        assert!(!output.join("items/d/index.html").exists());
        assert!(!output.join("items/e/index.html").exists());
    }

    #[test]
    fn test_failing_page_never_written_in_parallel() {
        let (_dir, mut config) = site(&[("items.html", ITEMS)]);
        config.build.parallelism = Some(4);

        let err = build_site_with(&config, Arc::new(FailOnC), None, |_, _| {}).unwrap_err();
        assert!(matches!(err, BuildError::Aborted { .. }));
        assert!(!config.build.output.join("items/c/index.html").exists());
    }

    #[test]
    fn test_enumeration_error_stops_build() {
        let (_dir, config) = site(&[(
            "bad.html",
            r#"<link rel="canonical" href="/${missing}/"><p>${missing}</p>"#,
        )]);
        let err = build_site(&config, None).unwrap_err();
        assert!(matches!(err, BuildError::Enumeration(_)));
    }

    #[test]
    fn test_duplicate_routes_keep_first() {
        let (_dir, config) = site(&[
            ("a.html", r#"<link rel="canonical" href="/same/"><p>a</p>"#),
            ("b.html", r#"<link rel="canonical" href="/same/"><p>b</p>"#),
        ]);
        let report = build_site(&config, None).unwrap();
        assert_eq!(report.pages, 1);
        let html = fs::read_to_string(config.build.output.join("same/index.html")).unwrap();
        assert!(html.contains("<p>a</p>"));
    }

    struct Recording(Mutex<Vec<PathBuf>>);

    impl PostBuildHook for Recording {
        fn run(&self, output: &Path) -> anyhow::Result<()> {
            self.0.lock().push(output.to_path_buf());
            Ok(())
        }
    }

    #[test]
    fn test_hook_runs_once_after_success() {
        let (_dir, config) = site(&[("items.html", ITEMS)]);
        let hook = Recording(Mutex::new(Vec::new()));
        build_site(&config, Some(&hook)).unwrap();
        assert_eq!(hook.0.into_inner(), vec![config.build.output.clone()]);
    }

    #[test]
    fn test_hook_skipped_after_failure() {
        let (_dir, config) = site(&[("items.html", ITEMS)]);
        let hook = Recording(Mutex::new(Vec::new()));
        let result = build_site_with(&config, Arc::new(FailOnC), Some(&hook), |_, _| {});
        assert!(result.is_err());
        assert!(hook.0.into_inner().is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn test_command_hook_failure() {
        let (dir, config) = site(&[("items.html", ITEMS)]);
        let hook = CommandHook::new(vec!["false".into()], dir.path().to_path_buf());
        let err = build_site(&config, Some(&hook)).unwrap_err();
        assert!(matches!(err, BuildError::Hook(_)));
    }
}
