// src/tools/koji.rs

//! `koji` command lines for package listing and image tasks

use super::{Requirement, ToolCommand};
use std::fmt::Write as _;
use std::path::{Path, PathBuf};

pub const KOJI: Requirement = Requirement::new("koji", "koji");

fn koji(profile: Option<&str>) -> ToolCommand {
    let cmd = ToolCommand::new("koji");
    match profile {
        Some(profile) => cmd.opt("--profile", profile),
        None => cmd,
    }
}

/// Latest builds tagged into `tag`
pub fn list_tagged(profile: Option<&str>, tag: &str, inherit: bool, event: Option<u64>) -> ToolCommand {
    let mut cmd = koji(profile)
        .args(["list-tagged", "--latest", "--quiet"])
        .opt_if(inherit, "--inherit");
    if let Some(event) = event {
        cmd = cmd.opt("--event", event);
    }
    cmd.arg(tag)
}

/// Tree of a task and its descendants as JSON
pub fn task_descendents(profile: Option<&str>, task_id: u64) -> ToolCommand {
    koji(profile)
        .args(["call", "--json-output", "getTaskDescendents"])
        .arg(task_id.to_string())
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LiveTask {
    pub name: String,
    pub version: String,
    pub target: String,
    pub arch: String,
    pub kickstart: String,
    pub ksurl: Option<String>,
    pub release: Option<String>,
    pub repos: Vec<String>,
    pub specfile: Option<String>,
    pub scratch: bool,
    /// `live` for spin-livecd, `appliance` for spin-appliance
    pub image_type: String,
}

pub fn spin_live(profile: Option<&str>, task: &LiveTask) -> ToolCommand {
    let subcommand = if task.image_type == "appliance" {
        "spin-appliance"
    } else {
        "spin-livecd"
    };
    let mut cmd = koji(profile)
        .args([subcommand, "--wait", "--noprogress"])
        .opt_if(task.scratch, "--scratch");
    if let Some(ksurl) = &task.ksurl {
        cmd = cmd.opt("--ksurl", ksurl);
    }
    if let Some(release) = &task.release {
        cmd = cmd.opt("--release", release);
    }
    if let Some(specfile) = &task.specfile {
        cmd = cmd.opt("--specfile", specfile);
    }
    for repo in &task.repos {
        cmd = cmd.opt("--repo", repo);
    }
    cmd.args([
        task.name.as_str(),
        task.version.as_str(),
        task.target.as_str(),
        task.arch.as_str(),
        task.kickstart.as_str(),
    ])
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LiveMediaTask {
    pub name: String,
    pub version: String,
    pub target: String,
    pub arches: Vec<String>,
    pub kickstart: String,
    pub ksurl: Option<String>,
    pub release: Option<String>,
    pub title: Option<String>,
    pub install_tree: Option<String>,
    pub repos: Vec<String>,
    pub scratch: bool,
}

pub fn spin_livemedia(profile: Option<&str>, task: &LiveMediaTask) -> ToolCommand {
    let mut cmd = koji(profile)
        .args(["spin-livemedia", "--wait", "--noprogress"])
        .opt_if(task.scratch, "--scratch");
    if let Some(ksurl) = &task.ksurl {
        cmd = cmd.opt("--ksurl", ksurl);
    }
    if let Some(release) = &task.release {
        cmd = cmd.opt("--release", release);
    }
    if let Some(title) = &task.title {
        cmd = cmd.opt("--title", title);
    }
    if let Some(tree) = &task.install_tree {
        cmd = cmd.opt("--install-tree", tree);
    }
    for repo in &task.repos {
        cmd = cmd.opt("--repo", repo);
    }
    cmd.args([
        task.name.as_str(),
        task.version.as_str(),
        task.target.as_str(),
        task.arches.join(",").as_str(),
        task.kickstart.as_str(),
    ])
}

/// Options rendered into the `image-build --config` INI file
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImageBuildTask {
    pub name: String,
    pub version: String,
    pub release: Option<String>,
    pub target: String,
    pub arches: Vec<String>,
    pub formats: Vec<String>,
    pub kickstart: String,
    pub ksurl: Option<String>,
    pub distro: String,
    pub disk_size: Option<u64>,
    pub install_tree: String,
    pub repos: Vec<String>,
    pub scratch: bool,
}

impl ImageBuildTask {
    pub fn render_config(&self) -> String {
        let mut out = String::from("[image-build]\n");
        let mut line = |key: &str, value: &str| {
            let _ = writeln!(out, "{key} = {value}");
        };
        line("name", &self.name);
        line("version", &self.version);
        if let Some(release) = &self.release {
            line("release", release);
        }
        line("target", &self.target);
        line("arches", &self.arches.join(","));
        line("format", &self.formats.join(","));
        line("kickstart", &self.kickstart);
        if let Some(ksurl) = &self.ksurl {
            line("ksurl", ksurl);
        }
        line("distro", &self.distro);
        if let Some(size) = self.disk_size {
            line("disk_size", &size.to_string());
        }
        line("install_tree", &self.install_tree);
        line("repo", &self.repos.join(","));
        if self.scratch {
            line("scratch", "True");
        }
        out
    }
}

pub fn image_build(profile: Option<&str>, config_file: &Path) -> ToolCommand {
    koji(profile)
        .args(["image-build", "--wait", "--noprogress"])
        .opt("--config", config_file.display())
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerTask {
    pub target: String,
    pub source: String,
    pub git_branch: String,
    pub repo_urls: Vec<String>,
    pub scratch: bool,
}

pub fn container_build(profile: Option<&str>, task: &ContainerTask) -> ToolCommand {
    let mut cmd = koji(profile)
        .args(["container-build", "--wait", "--noprogress"])
        .opt_if(task.scratch, "--scratch")
        .opt("--git-branch", &task.git_branch);
    for url in &task.repo_urls {
        cmd = cmd.opt("--repo-url", url);
    }
    cmd.args([task.target.as_str(), task.source.as_str()])
}

/// Task id from `Created task: N` in koji output
pub fn parse_task_id(output: &str) -> Option<u64> {
    output
        .lines()
        .find_map(|l| l.trim().strip_prefix("Created task:"))
        .and_then(|id| id.trim().parse().ok())
}

/// Output directory of a task under the koji top directory
pub fn task_dir(topdir: &Path, task_id: u64) -> PathBuf {
    topdir
        .join("work")
        .join("tasks")
        .join((task_id % 10000).to_string())
        .join(task_id.to_string())
}

/// Build directory: `packages/<name>/<version>/<release>`
pub fn build_dir(topdir: &Path, nvr: &str) -> Option<PathBuf> {
    let (rest, release) = nvr.rsplit_once('-')?;
    let (name, version) = rest.rsplit_once('-')?;
    Some(topdir.join("packages").join(name).join(version).join(release))
}
