// src/scm/git.rs

//! Git repositories
//!
//! HTTP(S) remotes do not serve `git archive`, so they are fetched shallowly
//! into a scratch clone; every other transport streams an archive of just
//! the requested path.

use super::{copy_into, copy_tree, ScmBackend, ScmContext};
use crate::error::{Error, Result};
use crate::tools::{self, shell_quote, Requirement, ToolCommand};
use std::path::Path;
use tempfile::TempDir;
use tracing::debug;
use url::Url;

pub const GIT: Requirement = Requirement::new("git", "git");

const DEFAULT_BRANCH: &str = "master";

pub struct GitBackend {
    ctx: ScmContext,
}

/// Whether a remote needs a clone instead of `git archive`
pub fn is_http(repo: &str) -> bool {
    Url::parse(repo)
        .map(|u| matches!(u.scheme(), "http" | "https"))
        .unwrap_or(false)
}

/// `git archive --remote=REPO BRANCH PATH | tar xf -`, run inside `dest`
pub fn archive_command(repo: &str, branch: &str, path: &str, dest: &Path) -> ToolCommand {
    let pipeline = format!(
        "git archive --remote={} {} {} | tar xf -",
        shell_quote(repo),
        shell_quote(branch),
        shell_quote(path.trim_end_matches('/'))
    );
    ToolCommand::new("sh").arg("-c").arg(pipeline).current_dir(dest)
}

/// Shallow fetch of a single ref into `dest`
pub fn clone_commands(repo: &str, branch: &str, dest: &Path) -> Vec<ToolCommand> {
    vec![
        ToolCommand::new(GIT.tool).arg("init").path_arg(dest),
        ToolCommand::new(GIT.tool)
            .args(["fetch", "--depth", "1"])
            .arg(repo)
            .arg(branch)
            .current_dir(dest),
        ToolCommand::new(GIT.tool).args(["checkout", "FETCH_HEAD"]).current_dir(dest),
    ]
}

impl GitBackend {
    pub fn new(ctx: ScmContext) -> Self {
        Self { ctx }
    }

    fn checkout(&self, root: Option<&str>, path: &str, branch: Option<&str>) -> Result<TempDir> {
        let repo = root
            .filter(|r| !r.is_empty())
            .ok_or_else(|| Error::Scm("git SCM needs a repository".to_string()))?;
        let branch = branch.unwrap_or(DEFAULT_BRANCH);
        let tmp = tempfile::tempdir()?;
        debug!("Exporting {} from {} ({})", path, repo, branch);

        if is_http(repo) {
            for cmd in clone_commands(repo, branch, tmp.path()) {
                self.ctx.run(&cmd)?;
            }
            if let Some(command) = &self.ctx.command {
                let build = ToolCommand::new("sh").arg("-c").arg(command.as_str()).current_dir(tmp.path());
                tools::run(&build, &self.ctx.log)?;
            }
        } else {
            self.ctx.run(&archive_command(repo, branch, path, tmp.path()))?;
        }
        Ok(tmp)
    }
}

impl ScmBackend for GitBackend {
    fn export_dir(&self, root: Option<&str>, dir: &str, branch: Option<&str>, out: &Path) -> Result<()> {
        let tmp = self.checkout(root, dir, branch)?;
        let exported = tmp.path().join(dir.trim_end_matches('/'));
        if !exported.is_dir() {
            return Err(Error::Scm(format!("directory '{dir}' not found in {}", root.unwrap_or_default())));
        }
        copy_tree(&exported, out)
    }

    fn export_file(&self, root: Option<&str>, file: &str, branch: Option<&str>, out: &Path) -> Result<()> {
        let tmp = self.checkout(root, file, branch)?;
        let exported = tmp.path().join(file);
        if !exported.is_file() {
            return Err(Error::Scm(format!("file '{file}' not found in {}", root.unwrap_or_default())));
        }
        copy_into(&exported, out)
    }
}
