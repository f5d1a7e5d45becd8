// src/scm/file.rs

//! Local files: paths are absolute and may be globs

use super::{copy_into, copy_tree, ScmBackend};
use crate::error::{Error, Result};
use std::path::{Path, PathBuf};

pub struct FileBackend;

fn expand(pattern: &str) -> Result<Vec<PathBuf>> {
    let mut matches: Vec<PathBuf> = glob::glob(pattern)
        .map_err(|e| Error::Scm(format!("bad glob '{pattern}': {e}")))?
        .filter_map(|entry| entry.ok())
        .collect();
    if matches.is_empty() {
        return Err(Error::Scm(format!("no file matches '{pattern}'")));
    }
    matches.sort();
    Ok(matches)
}

fn check_root(root: Option<&str>) -> Result<()> {
    match root {
        Some(root) if !root.is_empty() => Err(Error::Scm(format!(
            "file SCM does not take a repository, got '{root}'"
        ))),
        _ => Ok(()),
    }
}

impl ScmBackend for FileBackend {
    fn export_dir(&self, root: Option<&str>, dir: &str, _branch: Option<&str>, out: &Path) -> Result<()> {
        check_root(root)?;
        for path in expand(dir)? {
            copy_tree(&path, out)?;
        }
        Ok(())
    }

    fn export_file(&self, root: Option<&str>, file: &str, _branch: Option<&str>, out: &Path) -> Result<()> {
        check_root(root)?;
        for path in expand(file)? {
            copy_into(&path, out)?;
        }
        Ok(())
    }
}
