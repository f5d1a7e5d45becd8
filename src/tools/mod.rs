// src/tools/mod.rs

//! External tool adapters
//!
//! Each submodule turns typed options into a [`ToolCommand`]: a program, an
//! argument vector and an optional stdin payload. Nothing here interprets
//! tool output beyond the exit code; the calling phase decides what a
//! failure means.

pub mod createrepo;
pub mod iso;
pub mod koji;
pub mod lorax;
pub mod ostree;
pub mod repoclosure;
pub mod runroot;
pub mod squashfs;

use crate::error::{Error, Result};
use std::fmt;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use tracing::{debug, info};

/// A fully built command line
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolCommand {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    pub env: Vec<(String, String)>,
    pub stdin: Option<Vec<u8>>,
}

impl ToolCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Self::default()
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn path_arg(self, path: &Path) -> Self {
        self.arg(path.to_string_lossy().into_owned())
    }

    /// `--flag=value`
    pub fn opt(self, flag: &str, value: impl fmt::Display) -> Self {
        self.arg(format!("{flag}={value}"))
    }

    pub fn opt_if(self, cond: bool, flag: &str) -> Self {
        if cond { self.arg(flag) } else { self }
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn stdin(mut self, payload: impl Into<Vec<u8>>) -> Self {
        self.stdin = Some(payload.into());
        self
    }

    /// Program followed by its arguments
    pub fn argv(&self) -> Vec<String> {
        let mut argv = Vec::with_capacity(self.args.len() + 1);
        argv.push(self.program.clone());
        argv.extend(self.args.iter().cloned());
        argv
    }

    /// Shell-quoted rendering, used for logs and remote execution
    pub fn to_shell(&self) -> String {
        let mut out = String::new();
        if let Some(cwd) = &self.cwd {
            out.push_str(&format!("cd {} && ", shell_quote(&cwd.to_string_lossy())));
        }
        let words: Vec<String> = self.argv().iter().map(|w| shell_quote(w)).collect();
        out.push_str(&words.join(" "));
        out
    }
}

impl fmt::Display for ToolCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_shell())
    }
}

/// Quote a word for a POSIX shell when it needs it
pub fn shell_quote(word: &str) -> String {
    let safe = !word.is_empty()
        && word
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./=:,+@%".contains(c));
    if safe {
        word.to_string()
    } else {
        format!("'{}'", word.replace('\'', r"'\''"))
    }
}

fn spawn(cmd: &ToolCommand, log: &Path) -> Result<std::process::Output> {
    if let Some(parent) = log.parent() {
        fs::create_dir_all(parent)?;
    }
    info!("Running {}", cmd.program);
    debug!("Command: {} (log {})", cmd, log.display());

    let mut command = Command::new(&cmd.program);
    command.args(&cmd.args);
    if let Some(cwd) = &cmd.cwd {
        command.current_dir(cwd);
    }
    for (key, value) in &cmd.env {
        command.env(key, value);
    }
    command
        .stdin(if cmd.stdin.is_some() { Stdio::piped() } else { Stdio::null() })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    let mut child = command.spawn().map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            Error::ToolNotFound {
                tool: cmd.program.clone(),
                package: cmd.program.clone(),
            }
        } else {
            Error::Io(e)
        }
    })?;
    if let (Some(payload), Some(mut stdin)) = (&cmd.stdin, child.stdin.take()) {
        stdin.write_all(payload)?;
    }
    let output = child.wait_with_output()?;

    let mut file = File::create(log)?;
    writeln!(file, "$ {cmd}")?;
    file.write_all(&output.stdout)?;
    file.write_all(&output.stderr)?;
    writeln!(file, "# exit: {}", output.status)?;

    if !output.status.success() {
        return Err(Error::CommandFailed {
            command: cmd.to_shell(),
            status: output.status.to_string(),
            log: log.to_path_buf(),
        });
    }
    Ok(output)
}

/// Run to completion, writing combined output to `log`
pub fn run(cmd: &ToolCommand, log: &Path) -> Result<()> {
    spawn(cmd, log).map(|_| ())
}

/// Run and return stdout; output is logged as with [`run`]
pub fn run_capture(cmd: &ToolCommand, log: &Path) -> Result<String> {
    let output = spawn(cmd, log)?;
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// A host tool and the package that ships it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Requirement {
    pub tool: &'static str,
    pub package: &'static str,
}

impl Requirement {
    pub const fn new(tool: &'static str, package: &'static str) -> Self {
        Self { tool, package }
    }
}

/// Tools absent from `PATH`
pub fn missing_tools(requirements: &[Requirement]) -> Vec<Requirement> {
    let mut missing: Vec<Requirement> = requirements
        .iter()
        .filter(|r| which::which(r.tool).is_err())
        .copied()
        .collect();
    missing.dedup();
    missing
}

/// Fail with the first missing tool
pub fn check_tools(requirements: &[Requirement]) -> Result<()> {
    match missing_tools(requirements).first() {
        Some(r) => Err(Error::ToolNotFound {
            tool: r.tool.to_string(),
            package: r.package.to_string(),
        }),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_and_shell_rendering() {
        let cmd = ToolCommand::new("createrepo_c")
            .arg("--verbose")
            .opt("--workers", 4)
            .opt_if(false, "--database")
            .arg("/srv/my repo");
        assert_eq!(cmd.argv(), vec!["createrepo_c", "--verbose", "--workers=4", "/srv/my repo"]);
        assert_eq!(cmd.to_shell(), "createrepo_c --verbose --workers=4 '/srv/my repo'");
    }

    #[test]
    fn test_shell_quote() {
        assert_eq!(shell_quote("plain"), "plain");
        assert_eq!(shell_quote(""), "''");
        assert_eq!(shell_quote("it's"), r"'it'\''s'");
    }

    #[test]
    fn test_run_logs_output() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("logs/echo.log");
        run(&ToolCommand::new("sh").args(["-c", "echo hello"]), &log).unwrap();
        let text = fs::read_to_string(&log).unwrap();
        assert!(text.contains("hello"));
        assert!(text.contains("# exit:"));
    }

    #[test]
    fn test_run_failure_names_log() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("fail.log");
        let err = run(&ToolCommand::new("sh").args(["-c", "exit 3"]), &log).unwrap_err();
        match err {
            Error::CommandFailed { log: path, .. } => assert_eq!(path, log),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_run_capture_with_stdin() {
        let dir = tempfile::tempdir().unwrap();
        let out = run_capture(&ToolCommand::new("cat").stdin("payload"), &dir.path().join("cat.log")).unwrap();
        assert_eq!(out, "payload");
    }

    #[test]
    fn test_missing_tools() {
        let missing = missing_tools(&[
            Requirement::new("sh", "bash"),
            Requirement::new("definitely-not-a-real-tool-42", "nothing"),
        ]);
        assert_eq!(missing.len(), 1);
        assert!(matches!(
            check_tools(&missing),
            Err(Error::ToolNotFound { .. })
        ));
    }
}
