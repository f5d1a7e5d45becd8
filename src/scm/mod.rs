// src/scm/mod.rs

//! Fetching files and directories from source control
//!
//! Every backend exports into a caller-provided directory. Work happens in
//! a temporary directory that is removed when the export returns, whether
//! it succeeded or not. External commands are retried with a fixed
//! back-off.

pub mod cvs;
pub mod file;
pub mod git;
pub mod rpm;

use crate::config::{ScmKind, ScmSpec};
use crate::error::{Error, Result};
use crate::tools::{self, Requirement, ToolCommand};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};
use walkdir::WalkDir;

/// Default number of attempts for an external SCM command
pub const DEFAULT_ATTEMPTS: u32 = 5;
/// Default pause between attempts
pub const DEFAULT_BACKOFF: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Retry {
    pub attempts: u32,
    pub backoff: Duration,
}

impl Default for Retry {
    fn default() -> Self {
        Self {
            attempts: DEFAULT_ATTEMPTS,
            backoff: DEFAULT_BACKOFF,
        }
    }
}

impl Retry {
    /// Run `f` until it succeeds or the attempts are used up
    ///
    /// A missing tool is not retried.
    pub fn run<T>(&self, what: &str, mut f: impl FnMut() -> Result<T>) -> Result<T> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match f() {
                Ok(value) => return Ok(value),
                Err(e @ Error::ToolNotFound { .. }) => return Err(e),
                Err(e) => {
                    if attempt >= self.attempts.max(1) {
                        return Err(Error::Scm(format!("{what} failed after {attempt} attempts: {e}")));
                    }
                    warn!("{} attempt {} failed: {}, retrying...", what, attempt, e);
                    std::thread::sleep(self.backoff);
                }
            }
        }
    }
}

/// Shared state of every backend: where commands log and how they retry
#[derive(Debug, Clone)]
pub struct ScmContext {
    pub log: PathBuf,
    pub retry: Retry,
    /// Build command run inside a git clone before extraction
    pub command: Option<String>,
}

impl ScmContext {
    pub fn new(log: impl Into<PathBuf>) -> Self {
        Self {
            log: log.into(),
            retry: Retry::default(),
            command: None,
        }
    }

    fn run(&self, cmd: &ToolCommand) -> Result<()> {
        self.retry.run(&cmd.program, || tools::run(cmd, &self.log))
    }
}

/// One SCM flavour
pub trait ScmBackend {
    /// Copy the contents of `dir` into `out`
    fn export_dir(&self, root: Option<&str>, dir: &str, branch: Option<&str>, out: &Path) -> Result<()>;

    /// Copy `file` into `out`, keeping only its base name
    fn export_file(&self, root: Option<&str>, file: &str, branch: Option<&str>, out: &Path) -> Result<()>;
}

/// Backend for a descriptor kind
pub fn backend(kind: ScmKind, ctx: ScmContext) -> Box<dyn ScmBackend> {
    match kind {
        ScmKind::File => Box::new(file::FileBackend),
        ScmKind::Git => Box::new(git::GitBackend::new(ctx)),
        ScmKind::Cvs => Box::new(cvs::CvsBackend::new(ctx)),
        ScmKind::Rpm => Box::new(rpm::RpmBackend::new(ctx)),
    }
}

/// Host tools a descriptor kind needs
pub fn requirements(kind: ScmKind) -> Vec<Requirement> {
    match kind {
        ScmKind::File => Vec::new(),
        ScmKind::Git => vec![git::GIT],
        ScmKind::Cvs => vec![cvs::CVS],
        ScmKind::Rpm => vec![rpm::RPM2CPIO, rpm::CPIO],
    }
}

/// Export everything a descriptor names into `out`
pub fn fetch(spec: &ScmSpec, out: &Path, log: &Path) -> Result<()> {
    fs::create_dir_all(out)?;
    match spec {
        ScmSpec::Path(path) => file::FileBackend.export_file(None, path, None, out),
        ScmSpec::Table(table) => {
            let ctx = ScmContext {
                command: table.command.clone(),
                ..ScmContext::new(log)
            };
            let backend = backend(table.scm, ctx);
            let root = table.repo.as_deref();
            let branch = table.branch.as_deref();
            for file in table.file.iter().flat_map(|f| f.iter()) {
                backend.export_file(root, file, branch, out)?;
            }
            for dir in table.dir.iter().flat_map(|d| d.iter()) {
                backend.export_dir(root, dir, branch, out)?;
            }
            Ok(())
        }
    }
}

/// Export a single-file descriptor and return where the file landed
pub fn fetch_file(spec: &ScmSpec, out: &Path, log: &Path) -> Result<PathBuf> {
    let name = match spec {
        ScmSpec::Path(path) => Some(path.as_str()),
        ScmSpec::Table(table) => table.file.as_ref().and_then(|f| f.iter().next()).map(String::as_str),
    }
    .ok_or_else(|| Error::Scm("descriptor does not name a file".to_string()))?;
    fetch(spec, out, log)?;
    let target = out.join(base_name(name));
    if !target.is_file() {
        return Err(Error::Scm(format!("{} was not exported", target.display())));
    }
    Ok(target)
}

pub(crate) fn base_name(path: &str) -> &str {
    path.trim_end_matches('/').rsplit('/').next().unwrap_or(path)
}

/// Copy a tree's contents into `dst`, recreating symlinks
pub fn copy_tree(src: &Path, dst: &Path) -> Result<()> {
    for entry in WalkDir::new(src).follow_links(false) {
        let entry = entry.map_err(|e| Error::Io(e.into()))?;
        let relative = entry.path().strip_prefix(src).unwrap_or(entry.path());
        let target = dst.join(relative);
        let file_type = entry.file_type();
        if file_type.is_dir() {
            fs::create_dir_all(&target)?;
        } else if file_type.is_symlink() {
            let link = fs::read_link(entry.path())?;
            if target.symlink_metadata().is_ok() {
                fs::remove_file(&target)?;
            }
            std::os::unix::fs::symlink(link, &target)?;
        } else {
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::copy(entry.path(), &target)?;
        }
    }
    debug!("Copied {} into {}", src.display(), dst.display());
    Ok(())
}

/// Copy a file or a whole directory into `out`
pub(crate) fn copy_into(path: &Path, out: &Path) -> Result<()> {
    if path.is_dir() {
        copy_tree(path, out)
    } else {
        fs::create_dir_all(out)?;
        let name = path
            .file_name()
            .ok_or_else(|| Error::Scm(format!("{} has no file name", path.display())))?;
        fs::copy(path, out.join(name))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ScmTable;
    use std::cell::Cell;

    #[test]
    fn test_retry_gives_up() {
        let retry = Retry {
            attempts: 3,
            backoff: Duration::ZERO,
        };
        let calls = Cell::new(0);
        let result: Result<()> = retry.run("fetch", || {
            calls.set(calls.get() + 1);
            Err(Error::Scm("boom".to_string()))
        });
        assert_eq!(calls.get(), 3);
        assert!(result.unwrap_err().to_string().contains("after 3 attempts"));
    }

    #[test]
    fn test_retry_recovers_and_skips_missing_tools() {
        let retry = Retry {
            attempts: 5,
            backoff: Duration::ZERO,
        };
        let calls = Cell::new(0);
        let value = retry
            .run("fetch", || {
                calls.set(calls.get() + 1);
                if calls.get() < 2 {
                    Err(Error::Scm("flaky".to_string()))
                } else {
                    Ok(7)
                }
            })
            .unwrap();
        assert_eq!(value, 7);

        calls.set(0);
        let missing: Result<()> = retry.run("fetch", || {
            calls.set(calls.get() + 1);
            Err(Error::ToolNotFound {
                tool: "git".to_string(),
                package: "git".to_string(),
            })
        });
        assert!(missing.is_err());
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn test_fetch_file_from_plain_path() {
        let src = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        let variants = src.path().join("variants.xml");
        fs::write(&variants, "<variants/>").unwrap();

        let spec = ScmSpec::Path(variants.display().to_string());
        let fetched = fetch_file(&spec, out.path(), &out.path().join("scm.log")).unwrap();
        assert_eq!(fetched, out.path().join("variants.xml"));
        assert_eq!(fs::read_to_string(fetched).unwrap(), "<variants/>");
    }

    #[test]
    fn test_fetch_dir_table() {
        let src = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        fs::create_dir_all(src.path().join("extra/sub")).unwrap();
        fs::write(src.path().join("extra/GPL"), "license").unwrap();
        fs::write(src.path().join("extra/sub/README"), "hi").unwrap();

        let spec = ScmSpec::Table(ScmTable {
            scm: ScmKind::File,
            repo: None,
            branch: None,
            file: None,
            dir: Some(crate::config::OneOrMany::One(src.path().join("extra").display().to_string())),
            command: None,
            target: None,
        });
        fetch(&spec, out.path(), &out.path().join("scm.log")).unwrap();
        assert!(out.path().join("GPL").is_file());
        assert!(out.path().join("sub/README").is_file());
    }

    #[test]
    fn test_base_name() {
        assert_eq!(base_name("a/b/comps.xml"), "comps.xml");
        assert_eq!(base_name("a/dir/"), "dir");
    }
}
