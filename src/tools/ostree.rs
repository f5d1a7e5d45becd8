// src/tools/ostree.rs

//! `rpm-ostree` and `ostree` command lines

use super::{Requirement, ToolCommand};
use std::path::{Path, PathBuf};

pub const RPM_OSTREE: Requirement = Requirement::new("rpm-ostree", "rpm-ostree");
pub const OSTREE: Requirement = Requirement::new("ostree", "ostree");

pub fn init_repo(repo: &Path) -> ToolCommand {
    ToolCommand::new(OSTREE.tool)
        .arg("init")
        .opt("--repo", repo.display())
        .arg("--mode=archive")
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComposeTree {
    pub repo: PathBuf,
    pub treefile: PathBuf,
    pub commitid_file: PathBuf,
    pub version: Option<String>,
    pub force_new_commit: bool,
    pub cachedir: Option<PathBuf>,
}

pub fn compose_tree(opts: &ComposeTree) -> ToolCommand {
    let mut cmd = ToolCommand::new(RPM_OSTREE.tool)
        .args(["compose", "tree"])
        .opt("--repo", opts.repo.display())
        .opt("--write-commitid-to", opts.commitid_file.display());
    if let Some(version) = &opts.version {
        cmd = cmd.opt("--add-metadata-string", format!("version={version}"));
    }
    if let Some(cachedir) = &opts.cachedir {
        cmd = cmd.opt("--cachedir", cachedir.display());
    }
    cmd.opt_if(opts.force_new_commit, "--force-nocache")
        .path_arg(&opts.treefile)
}

pub fn update_summary(repo: &Path) -> ToolCommand {
    ToolCommand::new(OSTREE.tool)
        .arg("summary")
        .opt("--repo", repo.display())
        .arg("--update")
}
