// src/tools/createrepo.rs

//! `createrepo_c` / `createrepo`

use super::{Requirement, ToolCommand};
use std::path::PathBuf;

pub const CREATEREPO_C: Requirement = Requirement::new("createrepo_c", "createrepo_c");
pub const CREATEREPO: Requirement = Requirement::new("createrepo", "createrepo");

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreaterepoOptions {
    pub directory: PathBuf,
    pub use_createrepo_c: bool,
    pub checksum: String,
    pub workers: usize,
    pub database: bool,
    pub deltas: bool,
    /// Comps file embedded as group metadata
    pub groupfile: Option<PathBuf>,
    /// Restrict to the listed package paths (relative to `directory`)
    pub pkglist: Option<PathBuf>,
    /// Reuse metadata from this older repository
    pub update_md_path: Option<PathBuf>,
    pub outputdir: Option<PathBuf>,
}

impl CreaterepoOptions {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
            use_createrepo_c: true,
            checksum: "sha256".to_string(),
            workers: 1,
            database: false,
            deltas: false,
            groupfile: None,
            pkglist: None,
            update_md_path: None,
            outputdir: None,
        }
    }

    pub fn requirement(&self) -> Requirement {
        if self.use_createrepo_c { CREATEREPO_C } else { CREATEREPO }
    }
}

pub fn command(opts: &CreaterepoOptions) -> ToolCommand {
    let mut cmd = ToolCommand::new(opts.requirement().tool)
        .arg("--verbose")
        .opt("--checksum", &opts.checksum)
        .opt("--workers", opts.workers)
        .arg(if opts.database { "--database" } else { "--no-database" })
        .opt_if(opts.deltas, "--deltas");
    if let Some(groupfile) = &opts.groupfile {
        cmd = cmd.opt("--groupfile", groupfile.display());
    }
    if let Some(pkglist) = &opts.pkglist {
        cmd = cmd.opt("--pkglist", pkglist.display());
    }
    if let Some(old) = &opts.update_md_path {
        cmd = cmd
            .arg("--update")
            .arg("--skip-stat")
            .opt("--update-md-path", old.display());
    }
    if let Some(out) = &opts.outputdir {
        cmd = cmd.opt("--outputdir", out.display());
    }
    cmd.path_arg(&opts.directory)
}
