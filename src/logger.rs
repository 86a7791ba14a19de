//! Terminal output: colored log lines, a render progress bar and debug
//! diagnostics.
//!
//! # Example
//!
//! ```ignore
//! log!("build"; "rendering {} pages", count);
//!
//! let progress = ProgressBar::new("render", pages.len());
//! progress.set(done, total);
//! progress.finish();
//! ```

use colored::{ColoredString, Colorize};
use crossterm::{
    cursor, execute,
    terminal::{Clear, ClearType, size},
};
use parking_lot::Mutex;
use std::{
    io::{Write, stdout},
    sync::{
        OnceLock,
        atomic::{AtomicBool, Ordering},
    },
};
use tracing_subscriber::EnvFilter;

/// Cached terminal width (fetched once on first use)
static TERMINAL_WIDTH: OnceLock<u16> = OnceLock::new();

/// Whether a progress bar currently owns the last terminal line
static BAR_ACTIVE: AtomicBool = AtomicBool::new(false);

// ============================================================================
// Layout Constants
// ============================================================================
//
// Progress bar format: "[render] [████░░░░] 42/100"
//                       ^------^ ^-------^ ^----^
//                       prefix   bar       count

/// Brackets around the module name plus the following space
const PREFIX_OVERHEAD: usize = 3;
/// " [" + "] " around the bar itself
const BAR_OVERHEAD: usize = 4;
const MIN_BAR_WIDTH: usize = 10;
const MAX_BAR_WIDTH: usize = 40;

fn terminal_width() -> usize {
    *TERMINAL_WIDTH.get_or_init(|| size().map(|(w, _)| w).unwrap_or(120)) as usize
}

// ============================================================================
// Log Macro
// ============================================================================

/// Log a message with a colored module prefix.
///
/// # Usage
/// ```ignore
/// log!("module"; "message with {} formatting", args);
/// ```
#[macro_export]
macro_rules! log {
    ($module:expr; $($arg:tt)*) => {{
        $crate::logger::log($module, &format!($($arg)*))
    }};
}

/// Print one prefixed line, keeping an active progress bar below it.
///
/// Single-line messages are truncated to the terminal width.
pub fn log(module: &str, message: &str) {
    let prefix = colorize_prefix(module);
    let mut stdout = stdout().lock();

    let bar_active = BAR_ACTIVE.load(Ordering::SeqCst);
    if bar_active {
        write!(stdout, "\r").ok();
        execute!(stdout, Clear(ClearType::CurrentLine)).ok();
    }

    let message = if message.contains('\n') {
        message
    } else {
        let max = terminal_width().saturating_sub(module.len() + PREFIX_OVERHEAD);
        truncate_str(message, max)
    };
    writeln!(stdout, "{prefix} {message}").ok();
    stdout.flush().ok();
}

fn colorize_prefix(module: &str) -> ColoredString {
    let prefix = format!("[{module}]");
    match module.to_ascii_lowercase().as_str() {
        "hook" => prefix.bright_blue().bold(),
        "pages" => prefix.bright_green().bold(),
        "error" => prefix.bright_red().bold(),
        _ => prefix.bright_yellow().bold(),
    }
}

/// Truncate a string to at most `max_len` bytes on a char boundary.
fn truncate_str(s: &str, max_len: usize) -> &str {
    if s.len() <= max_len {
        return s;
    }
    let mut end = max_len;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

// ============================================================================
// Progress Bar
// ============================================================================

/// A single progress line redrawn in place.
///
/// Updates may arrive from any worker thread; redraws are serialized.
pub struct ProgressBar {
    prefix: ColoredString,
    prefix_len: usize,
    lock: Mutex<()>,
}

impl ProgressBar {
    /// Start a bar, or `None` when there is at most one item to show.
    pub fn new(module: &str, total: usize) -> Option<Self> {
        if total <= 1 {
            return None;
        }
        BAR_ACTIVE.store(true, Ordering::SeqCst);
        let bar = Self {
            prefix: colorize_prefix(module),
            prefix_len: module.len() + PREFIX_OVERHEAD,
            lock: Mutex::new(()),
        };
        bar.set(0, total);
        Some(bar)
    }

    /// Redraw with `done` of `total` items complete.
    pub fn set(&self, done: usize, total: usize) {
        let _guard = self.lock.lock();
        let count = format!("{done}/{total}");
        let available =
            terminal_width().saturating_sub(self.prefix_len + BAR_OVERHEAD + count.len());
        let line = render_bar(done, total, available.clamp(MIN_BAR_WIDTH, MAX_BAR_WIDTH));

        let mut stdout = stdout().lock();
        write!(stdout, "\r").ok();
        execute!(stdout, Clear(ClearType::CurrentLine)).ok();
        write!(stdout, "{} [{line}] {count}", self.prefix).ok();
        stdout.flush().ok();
    }

    /// Clear the bar line.
    pub fn finish(&self) {
        if !BAR_ACTIVE.swap(false, Ordering::SeqCst) {
            return;
        }
        let _guard = self.lock.lock();
        let mut stdout = stdout().lock();
        write!(stdout, "\r").ok();
        execute!(stdout, Clear(ClearType::CurrentLine), cursor::MoveToColumn(0)).ok();
        stdout.flush().ok();
    }
}

impl Drop for ProgressBar {
    fn drop(&mut self) {
        self.finish();
    }
}

/// Filled and empty cells for `done / total` in `width` characters.
fn render_bar(done: usize, total: usize, width: usize) -> String {
    let filled = if total > 0 {
        (done.min(total) * width) / total
    } else {
        0
    };
    "█".repeat(filled) + &"░".repeat(width - filled)
}

// ============================================================================
// Diagnostics
// ============================================================================

/// Install the `tracing` subscriber for debug diagnostics.
///
/// `--verbose` enables `debug` for this crate; otherwise `RUST_LOG` is
/// honored and the default level is `warn`. Diagnostics go to stderr so
/// they never mix with rendered output on stdout.
pub fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("pagesmith=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init()
        .ok();
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_str() {
        assert_eq!(truncate_str("hello", 10), "hello");
        assert_eq!(truncate_str("hello world", 5), "hello");
        assert_eq!(truncate_str("hello", 0), "");
    }

    #[test]
    fn test_truncate_str_unicode_boundary() {
        // "€" is 3 bytes
        assert_eq!(truncate_str("€€", 4), "€");
        assert_eq!(truncate_str("a€b", 3), "a");
        assert_eq!(truncate_str("a€b", 4), "a€");
    }

    #[test]
    fn test_render_bar() {
        assert_eq!(render_bar(0, 4, 4), "░░░░");
        assert_eq!(render_bar(2, 4, 4), "██░░");
        assert_eq!(render_bar(4, 4, 4), "████");
        assert_eq!(render_bar(9, 4, 4), "████");
        assert_eq!(render_bar(0, 0, 3), "░░░");
    }

    #[test]
    fn test_no_bar_for_single_item() {
        assert!(ProgressBar::new("render", 1).is_none());
        assert!(ProgressBar::new("render", 0).is_none());
    }
}
