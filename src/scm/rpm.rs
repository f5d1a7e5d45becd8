// src/scm/rpm.rs

//! Content extracted from RPM packages
//!
//! The repository is a glob of package files. Each package is exploded
//! into scratch space; a `dir` ending in `/` exports the directory's
//! contents, otherwise the directory itself is exported.

use super::{base_name, copy_into, copy_tree, ScmBackend, ScmContext};
use crate::error::{Error, Result};
use crate::tools::{shell_quote, Requirement, ToolCommand};
use std::path::{Path, PathBuf};

pub const RPM2CPIO: Requirement = Requirement::new("rpm2cpio", "rpm");
pub const CPIO: Requirement = Requirement::new("cpio", "cpio");

pub struct RpmBackend {
    ctx: ScmContext,
}

/// `rpm2cpio RPM | cpio -iduv --quiet`, run inside `dest`
pub fn explode_command(rpm: &Path, dest: &Path) -> ToolCommand {
    let pipeline = format!(
        "rpm2cpio {} | cpio -iduv --quiet",
        shell_quote(&rpm.to_string_lossy())
    );
    ToolCommand::new("sh").arg("-c").arg(pipeline).current_dir(dest)
}

fn packages(root: Option<&str>) -> Result<Vec<PathBuf>> {
    let pattern = root
        .filter(|r| !r.is_empty())
        .ok_or_else(|| Error::Scm("rpm SCM needs a package path".to_string()))?;
    let mut rpms: Vec<PathBuf> = glob::glob(pattern)
        .map_err(|e| Error::Scm(format!("bad glob '{pattern}': {e}")))?
        .filter_map(|entry| entry.ok())
        .collect();
    if rpms.is_empty() {
        return Err(Error::Scm(format!("no package matches '{pattern}'")));
    }
    rpms.sort();
    Ok(rpms)
}

/// Where an exported directory lands inside `out`
pub fn dir_target(dir: &str, out: &Path) -> PathBuf {
    if dir.ends_with('/') {
        out.to_path_buf()
    } else {
        out.join(base_name(dir))
    }
}

impl RpmBackend {
    pub fn new(ctx: ScmContext) -> Self {
        Self { ctx }
    }

    fn explode(&self, rpm: &Path) -> Result<tempfile::TempDir> {
        let tmp = tempfile::tempdir()?;
        self.ctx.run(&explode_command(rpm, tmp.path()))?;
        Ok(tmp)
    }
}

fn in_payload(root: &Path, path: &str) -> PathBuf {
    root.join(path.trim_start_matches('/').trim_end_matches('/'))
}

impl ScmBackend for RpmBackend {
    fn export_dir(&self, root: Option<&str>, dir: &str, _branch: Option<&str>, out: &Path) -> Result<()> {
        for rpm in packages(root)? {
            let tmp = self.explode(&rpm)?;
            let source = in_payload(tmp.path(), dir);
            if !source.is_dir() {
                return Err(Error::Scm(format!("{} holds no directory '{dir}'", rpm.display())));
            }
            copy_tree(&source, &dir_target(dir, out))?;
        }
        Ok(())
    }

    fn export_file(&self, root: Option<&str>, file: &str, _branch: Option<&str>, out: &Path) -> Result<()> {
        for rpm in packages(root)? {
            let tmp = self.explode(&rpm)?;
            let source = in_payload(tmp.path(), file);
            if !source.is_file() {
                return Err(Error::Scm(format!("{} holds no file '{file}'", rpm.display())));
            }
            copy_into(&source, out)?;
        }
        Ok(())
    }
}
