//! External command execution.
//!
//! Runs a configured command line, logging its stderr through `log!` and
//! turning a non-zero exit into an error that carries the command output.

use crate::log;
use anyhow::{Context, Result, bail};
use regex::Regex;
use std::{
    ffi::OsString,
    path::Path,
    process::{Command, Output},
    sync::LazyLock,
};

/// Run `command` (program followed by its arguments) with `extra` appended.
///
/// # Errors
/// Returns error if the command cannot be started or exits unsuccessfully.
pub fn exec(root: Option<&Path>, command: &[String], extra: &[OsString]) -> Result<Output> {
    let (name, mut cmd) = prepare(root, command, extra)?;

    let output = cmd
        .output()
        .with_context(|| format!("Failed to execute `{name}`"))?;

    if !output.status.success() {
        bail!(format_error(&name, &output));
    }

    log_lines(&name, &String::from_utf8_lossy(&output.stdout));
    log_lines(&name, &String::from_utf8_lossy(&output.stderr));
    Ok(output)
}

/// Prepare a Command from components.
fn prepare(root: Option<&Path>, command: &[String], extra: &[OsString]) -> Result<(String, Command)> {
    let (program, args) = command.split_first().context("Empty command")?;

    let mut cmd = Command::new(program);
    cmd.args(args).args(extra.iter().filter(|a| !a.is_empty()));

    if let Some(dir) = root {
        cmd.current_dir(dir);
    }

    Ok((program.clone(), cmd))
}

fn strip_ansi(s: &str) -> std::borrow::Cow<'_, str> {
    static RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"\x1b\[[0-9;]*m").expect("valid ansi pattern"));
    RE.replace_all(s, "")
}

/// Log the non-blank lines of `output` under the command name.
fn log_lines(name: &str, output: &str) {
    let lines: Vec<_> = output
        .lines()
        .filter(|line| !strip_ansi(line).trim().is_empty())
        .collect();
    if !lines.is_empty() {
        log!(name; "{}", lines.join("\n"));
    }
}

/// Format command error message.
fn format_error(name: &str, output: &Output) -> String {
    let stderr = String::from_utf8_lossy(&output.stderr);
    let stdout = String::from_utf8_lossy(&output.stdout);

    let mut msg = format!("Command `{name}` failed with {}", output.status);
    for stream in [stderr.trim(), stdout.trim()] {
        if !stream.is_empty() {
            msg.push('\n');
            msg.push_str(&strip_ansi(stream));
        }
    }
    msg
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prepare_empty() {
        assert!(prepare(None, &[], &[]).is_err());
    }

    #[test]
    fn test_prepare_valid() {
        let (name, cmd) = prepare(
            None,
            &["echo".into(), "hello".into()],
            &[OsString::new(), OsString::from("world")],
        )
        .unwrap();
        assert_eq!(name, "echo");
        let args: Vec<_> = cmd.get_args().collect();
        assert_eq!(args, vec!["hello", "world"]);
    }

    #[cfg(unix)]
    #[test]
    fn test_exec_success_and_failure() {
        let output = exec(None, &["echo".into()], &[OsString::from("hi")]).unwrap();
        assert_eq!(String::from_utf8_lossy(&output.stdout).trim(), "hi");

        let err = exec(None, &["false".into()], &[]).unwrap_err();
        assert!(err.to_string().contains("Command `false` failed"));
    }

    #[test]
    fn test_strip_ansi() {
        assert_eq!(strip_ansi("\x1b[31mRed\x1b[0m"), "Red");
        assert_eq!(strip_ansi("\x1b[1;32mGreen Bold\x1b[0m"), "Green Bold");
        assert_eq!(strip_ansi("Plain text"), "Plain text");
    }
}
