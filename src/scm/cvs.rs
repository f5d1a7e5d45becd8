// src/scm/cvs.rs

//! CVS modules, exported with the `cvs` command line

use super::{copy_into, copy_tree, ScmBackend, ScmContext};
use crate::error::{Error, Result};
use crate::tools::{Requirement, ToolCommand};
use std::path::Path;

pub const CVS: Requirement = Requirement::new("cvs", "cvs");

const DEFAULT_BRANCH: &str = "HEAD";

pub struct CvsBackend {
    ctx: ScmContext,
}

/// `cvs -q -d ROOT export -r BRANCH PATH`, run inside `dest`
pub fn export_command(root: &str, branch: &str, path: &str, dest: &Path) -> ToolCommand {
    ToolCommand::new(CVS.tool)
        .args(["-q", "-d", root, "export", "-r", branch])
        .arg(path.trim_end_matches('/'))
        .current_dir(dest)
}

impl CvsBackend {
    pub fn new(ctx: ScmContext) -> Self {
        Self { ctx }
    }

    fn export(&self, root: Option<&str>, path: &str, branch: Option<&str>) -> Result<tempfile::TempDir> {
        let root = root
            .filter(|r| !r.is_empty())
            .ok_or_else(|| Error::Scm("cvs SCM needs a CVSROOT".to_string()))?;
        let tmp = tempfile::tempdir()?;
        let cmd = export_command(root, branch.unwrap_or(DEFAULT_BRANCH), path, tmp.path());
        self.ctx.run(&cmd)?;
        Ok(tmp)
    }
}

impl ScmBackend for CvsBackend {
    fn export_dir(&self, root: Option<&str>, dir: &str, branch: Option<&str>, out: &Path) -> Result<()> {
        let tmp = self.export(root, dir, branch)?;
        copy_tree(&tmp.path().join(dir.trim_end_matches('/')), out)
    }

    fn export_file(&self, root: Option<&str>, file: &str, branch: Option<&str>, out: &Path) -> Result<()> {
        let tmp = self.export(root, file, branch)?;
        copy_into(&tmp.path().join(file), out)
    }
}
